use std::path::Path;

use anyhow::Result;
use tracing::{info, warn};

use crate::catalog::{self, CatalogLock};
use crate::fetch::Fetch;
use crate::model::Platform;
use crate::sources::Source;

pub struct RunReport {
    pub platform: Platform,
    /// Records this run produced for the platform (after dedup).
    pub fetched: usize,
    /// Records from other platforms left untouched.
    pub kept: usize,
    pub total: usize,
}

/// One adapter run: collect, then load-merge-save under the catalog lock.
pub async fn run_source(source: &dyn Source, fetcher: &dyn Fetch, catalog_path: &Path) -> Result<RunReport> {
    let platform = source.platform();
    info!("{}: collecting templates", platform);

    let batch = source.collect(fetcher).await;
    for t in &batch {
        for issue in t.validate() {
            warn!("{}: {}", platform, issue);
        }
    }
    if batch.is_empty() {
        warn!("{}: nothing collected, its catalog slice will be emptied", platform);
    }
    let fetched = batch.len();

    let _lock = CatalogLock::acquire(catalog_path).await?;
    let existing = catalog::load(catalog_path);
    let merged = catalog::merge(existing, platform, batch);
    let total = merged.templates.len();
    catalog::save(catalog_path, &merged)?;

    info!("{}: saved {} templates ({} total)", platform, fetched, total);
    Ok(RunReport {
        platform,
        fetched,
        kept: total - fetched,
        total,
    })
}

// ── Tests ──

#[cfg(test)]
mod tests {
    use async_trait::async_trait;

    use super::*;
    use crate::fetch::tests::StubFetcher;
    use crate::model::{record_id, Catalog, Template};

    struct Canned(Platform, Vec<Template>);

    #[async_trait]
    impl Source for Canned {
        fn platform(&self) -> Platform {
            self.0
        }

        async fn collect(&self, _: &dyn Fetch) -> Vec<Template> {
            self.1.clone()
        }
    }

    fn tpl(platform: Platform, native: &str, sales: u64) -> Template {
        let mut t = Template::new(platform, native, format!("Template {}", native), "now");
        t.sales = sales;
        t
    }

    #[tokio::test]
    async fn runs_accumulate_per_platform() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data/templates.json");
        let fetcher = StubFetcher::default();

        let envato = Canned(
            Platform::ThemeForest,
            vec![
                tpl(Platform::ThemeForest, "1", 10),
                tpl(Platform::ThemeForest, "2", 50),
                tpl(Platform::ThemeForest, "3", 5),
            ],
        );
        let framer = Canned(Platform::Framer, vec![tpl(Platform::Framer, "nova", 0)]);

        run_source(&envato, &fetcher, &path).await.unwrap();
        let report = run_source(&framer, &fetcher, &path).await.unwrap();
        assert_eq!((report.fetched, report.kept, report.total), (1, 3, 4));

        let again = run_source(&envato, &fetcher, &path).await.unwrap();
        assert_eq!(again.total, 4);

        let saved: Catalog = catalog::load(&path);
        let ids: Vec<&str> = saved.templates.iter().filter_map(record_id).collect();
        assert_eq!(ids, ["framer-nova", "envato-2", "envato-1", "envato-3"]);
        assert_eq!(saved.source, "aggregated");
        assert!(!path.with_file_name("templates.json.lock").exists());
    }

    #[tokio::test]
    async fn keeps_existing_source_label_and_foreign_records() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("templates.json");
        std::fs::write(
            &path,
            r#"{"lastUpdated":"","source":"curated","templates":[
                {"id":"webflow-a","title":"A","screenshots":[]},
                {"id":"framer-old","title":"Old"}
            ]}"#,
        )
        .unwrap();

        let framer = Canned(Platform::Framer, vec![tpl(Platform::Framer, "new", 0)]);
        run_source(&framer, &StubFetcher::default(), &path).await.unwrap();

        let raw: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(raw["source"], "curated");
        assert_eq!(raw["templates"][0]["id"], "webflow-a");
        assert!(raw["templates"][0]["screenshots"].is_array());
        assert_eq!(raw["templates"][1]["id"], "framer-new");
        assert_eq!(raw["templates"].as_array().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn loosely_typed_foreign_records_survive_a_run() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("templates.json");
        let webflow = r#"{"id":"webflow-a","title":"A","rating":0,"sales":0}"#;
        let envato = r#"{"id":"envato-1","title":"B","updatedAt":null,"sales":1.5,"tags":null}"#;
        std::fs::write(
            &path,
            format!(r#"{{"source":"curated","templates":[{},{}]}}"#, webflow, envato),
        )
        .unwrap();

        let framer = Canned(Platform::Framer, vec![tpl(Platform::Framer, "nova", 0)]);
        let report = run_source(&framer, &StubFetcher::default(), &path).await.unwrap();
        assert_eq!((report.fetched, report.kept, report.total), (1, 2, 3));

        let raw: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(raw["source"], "curated");
        let records = raw["templates"].as_array().unwrap();
        assert_eq!(serde_json::to_string(&records[0]).unwrap(), webflow);
        assert_eq!(serde_json::to_string(&records[1]).unwrap(), envato);
        assert_eq!(records[2]["id"], "framer-nova");
    }
}
