use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

pub const DEFAULT_CATALOG_PATH: &str = "public/data/templates.json";

/// One search against the discovery API.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct QuerySpec {
    #[serde(default)]
    pub term: String,
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub tags: String,
}

impl QuerySpec {
    pub fn new(term: &str, category: &str, tags: &str) -> Self {
        QuerySpec {
            term: term.to_string(),
            category: category.to_string(),
            tags: tags.to_string(),
        }
    }

    pub fn label(&self) -> &str {
        [self.term.as_str(), self.category.as_str()]
            .into_iter()
            .find(|s| !s.is_empty())
            .unwrap_or("all")
    }
}

/// One listing page on an HTML storefront, tagged with the category it represents.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct PageSpec {
    pub url: String,
    pub label: String,
}

impl PageSpec {
    pub fn new(url: &str, label: &str) -> Self {
        PageSpec {
            url: url.to_string(),
            label: label.to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EnvatoSettings {
    pub api_base: String,
    pub page_size: usize,
    pub delay_ms: u64,
    pub queries: Vec<QuerySpec>,
}

impl Default for EnvatoSettings {
    fn default() -> Self {
        EnvatoSettings {
            api_base: "https://api.envato.com/v1/discovery/search/search/item".to_string(),
            page_size: 30,
            delay_ms: 500,
            queries: vec![
                QuerySpec::new("", "wordpress", "technology,creative,portfolio,agency"),
                QuerySpec::new("startup", "wordpress", ""),
                QuerySpec::new("saas", "site-templates", ""),
            ],
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ListingSettings {
    #[serde(default = "default_listing_delay")]
    pub delay_ms: u64,
    /// Empty means the storefront's built-in page table.
    #[serde(default)]
    pub pages: Vec<PageSpec>,
}

fn default_listing_delay() -> u64 {
    1000
}

impl ListingSettings {
    pub fn webflow() -> Self {
        ListingSettings {
            delay_ms: default_listing_delay(),
            pages: vec![
                PageSpec::new("https://webflow.com/templates", "Popular"),
                PageSpec::new("https://webflow.com/templates/featured", "Featured"),
                PageSpec::new("https://webflow.com/templates/category/technology", "Technology"),
                PageSpec::new("https://webflow.com/templates/category/portfolio", "Portfolio"),
            ],
        }
    }

    pub fn framer() -> Self {
        ListingSettings {
            delay_ms: default_listing_delay(),
            pages: vec![
                PageSpec::new(
                    "https://framer.com/marketplace/templates/?sort=popular&period=7",
                    "Popular (7 days)",
                ),
                PageSpec::new(
                    "https://framer.com/marketplace/templates/?sort=popular&period=30",
                    "Popular (30 days)",
                ),
                PageSpec::new("https://framer.com/marketplace/templates/?sort=new", "New"),
            ],
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub catalog_path: PathBuf,
    pub request_timeout_secs: u64,
    pub env_file: PathBuf,
    pub envato: EnvatoSettings,
    pub webflow: ListingSettings,
    pub framer: ListingSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            catalog_path: PathBuf::from(DEFAULT_CATALOG_PATH),
            request_timeout_secs: 15,
            env_file: PathBuf::from(".env"),
            envato: EnvatoSettings::default(),
            webflow: ListingSettings::webflow(),
            framer: ListingSettings::framer(),
        }
    }
}

fn env_source() -> config::Environment {
    config::Environment::with_prefix("CATALOG")
        .prefix_separator("_")
        .separator("__")
}

impl Settings {
    /// Defaults, then `catalog.toml` if present, then `CATALOG_*` env vars (`__` nests).
    pub fn load() -> Result<Self> {
        let cfg = config::Config::builder()
            .add_source(config::File::with_name("catalog").required(false))
            .add_source(env_source())
            .build()
            .context("Failed to assemble settings")?;
        Self::from_config(cfg)
    }

    fn from_config(cfg: config::Config) -> Result<Self> {
        let mut settings: Settings = cfg.try_deserialize().context("Invalid settings")?;
        if settings.webflow.pages.is_empty() {
            settings.webflow.pages = ListingSettings::webflow().pages;
        }
        if settings.framer.pages.is_empty() {
            settings.framer.pages = ListingSettings::framer().pages;
        }
        Ok(settings)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

// ── Tests ──

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_carry_source_tables() {
        let s = Settings::default();
        assert_eq!(s.catalog_path, PathBuf::from(DEFAULT_CATALOG_PATH));
        assert_eq!(s.envato.queries.len(), 3);
        assert_eq!(s.webflow.pages.len(), 4);
        assert_eq!(s.framer.pages.len(), 3);
        assert_eq!(s.framer.pages[2].label, "New");
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let toml = r#"
            request_timeout_secs = 5

            [envato]
            page_size = 10

            [[framer.pages]]
            url = "https://framer.com/marketplace/templates/?sort=new"
            label = "New"
        "#;
        let s = Settings::from_config(
            config::Config::builder()
                .add_source(config::File::from_str(toml, config::FileFormat::Toml))
                .build()
                .unwrap(),
        )
        .unwrap();

        assert_eq!(s.request_timeout(), Duration::from_secs(5));
        assert_eq!(s.envato.page_size, 10);
        assert_eq!(s.envato.queries.len(), 3);
        assert_eq!(s.framer.pages.len(), 1);
        assert_eq!(s.framer.delay_ms, 1000);
        assert_eq!(s.webflow.pages.len(), 4);
    }

    #[test]
    fn delay_only_tables_keep_default_pages() {
        let toml = "[webflow]\ndelay_ms = 0\n\n[framer]\ndelay_ms = 250\n";
        let s = Settings::from_config(
            config::Config::builder()
                .add_source(config::File::from_str(toml, config::FileFormat::Toml))
                .build()
                .unwrap(),
        )
        .unwrap();

        assert_eq!(s.webflow.delay_ms, 0);
        assert_eq!(s.webflow.pages.len(), 4);
        assert_eq!(s.framer.delay_ms, 250);
        assert_eq!(s.framer.pages.len(), 3);
    }

    #[test]
    fn env_delay_override_keeps_default_pages() {
        let vars = [("CATALOG_WEBFLOW__DELAY_MS".to_string(), "0".to_string())]
            .into_iter()
            .collect();
        let s = Settings::from_config(
            config::Config::builder()
                .add_source(env_source().source(Some(vars)))
                .build()
                .unwrap(),
        )
        .unwrap();

        assert_eq!(s.webflow.delay_ms, 0);
        assert_eq!(s.webflow.pages[0].label, "Popular");
        assert_eq!(s.framer.delay_ms, 1000);
    }

    #[test]
    fn query_label_falls_back() {
        assert_eq!(QuerySpec::new("saas", "site-templates", "").label(), "saas");
        assert_eq!(QuerySpec::new("", "wordpress", "").label(), "wordpress");
        assert_eq!(QuerySpec::default().label(), "all");
    }
}
