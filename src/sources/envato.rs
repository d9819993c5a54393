use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Map, Value};
use tracing::{info, warn};
use url::Url;

use super::{pause, progress, Source};
use crate::catalog::dedup_by_id;
use crate::config::{EnvatoSettings, QuerySpec};
use crate::fetch::Fetch;
use crate::model::{now_iso, Platform, Template, MAX_TAGS};
use crate::text::{strip_html, take_chars, truncate_words};

const MAX_PAGE_SIZE: usize = 30;
const SITE: &str = "themeforest.net";
const DESCRIPTION_MAX: usize = 800;
const SUMMARY_MAX: usize = 300;
const FEATURES_MAX: usize = 200;
const COMPAT_KEYS: [&str; 3] = ["compatible-software", "compatible-browsers", "software-version"];

/// ThemeForest via the Envato discovery API.
pub struct EnvatoSource {
    token: String,
    settings: EnvatoSettings,
}

impl EnvatoSource {
    pub fn new(token: String, settings: EnvatoSettings) -> Self {
        EnvatoSource { token, settings }
    }

    fn search_url(&self, query: &QuerySpec) -> Result<Url, url::ParseError> {
        let page_size = self.settings.page_size.min(MAX_PAGE_SIZE).to_string();
        let mut url = Url::parse(&self.settings.api_base)?;
        {
            let mut q = url.query_pairs_mut();
            q.append_pair("site", SITE)
                .append_pair("sort_by", "sales")
                .append_pair("sort_direction", "desc")
                .append_pair("page_size", &page_size);
            for (key, value) in [
                ("term", &query.term),
                ("category", &query.category),
                ("tags", &query.tags),
            ] {
                if !value.is_empty() {
                    q.append_pair(key, value);
                }
            }
        }
        Ok(url)
    }

    async fn search(&self, fetcher: &dyn Fetch, query: &QuerySpec) -> Vec<Value> {
        let url = match self.search_url(query) {
            Ok(url) => url,
            Err(e) => {
                warn!("Bad API base {:?}: {}", self.settings.api_base, e);
                return Vec::new();
            }
        };
        let auth = format!("Bearer {}", self.token);

        let body = match fetcher.fetch(url.as_str(), &[("Authorization", auth.as_str())]).await {
            Ok(body) => body,
            Err(e) => {
                warn!("API error for query {:?}: {}", query.label(), e);
                return Vec::new();
            }
        };

        match serde_json::from_str::<Value>(&body) {
            Ok(Value::Object(mut obj)) => match obj.remove("matches") {
                Some(Value::Array(items)) => items,
                _ => {
                    warn!("No matches array for query {:?}", query.label());
                    Vec::new()
                }
            },
            Ok(_) => {
                warn!("Unexpected response shape for query {:?}", query.label());
                Vec::new()
            }
            Err(e) => {
                warn!("Invalid JSON for query {:?}: {}", query.label(), e);
                Vec::new()
            }
        }
    }
}

#[async_trait]
impl Source for EnvatoSource {
    fn platform(&self) -> Platform {
        Platform::ThemeForest
    }

    async fn collect(&self, fetcher: &dyn Fetch) -> Vec<Template> {
        let queries = &self.settings.queries;
        let delay = Duration::from_millis(self.settings.delay_ms);
        let pb = progress(queries.len());
        let mut batch = Vec::new();

        for (i, query) in queries.iter().enumerate() {
            pb.set_message(query.label().to_string());
            let items = self.search(fetcher, query).await;
            info!("Query {:?}: {} items", query.label(), items.len());

            let scraped_at = now_iso();
            batch.extend(items.iter().map(|item| normalize(item, &scraped_at)));

            pb.inc(1);
            pause(delay, i, queries.len()).await;
        }

        pb.finish_and_clear();
        dedup_by_id(batch)
    }
}

// ── Normalization ──

/// Map one raw search match onto the canonical record.
pub fn normalize(item: &Value, scraped_at: &str) -> Template {
    let attrs = flatten_attributes(item.get("attributes"));
    let previews = item.get("previews");

    let native_id = scalar_string(item.get("id"));
    if native_id.is_empty() {
        warn!("API item without id: {:?}", str_field(item, "name"));
    }

    let mut t = Template::new(
        Platform::ThemeForest,
        &native_id,
        non_empty(str_field(item, "name")).unwrap_or("Untitled"),
        scraped_at,
    );

    t.author = non_empty(str_field(item, "author_username"))
        .unwrap_or("Unknown")
        .to_string();
    t.category = non_empty(attr_str(&attrs, "category_name"))
        .unwrap_or("WordPress")
        .to_string();
    t.price = format_price(item.get("price_cents"));

    let (rating, count) = rating(item.get("rating"));
    t.rating = rating;
    t.rating_count = count;
    t.sales = item
        .get("number_of_sales")
        .and_then(as_count)
        .unwrap_or(0);

    // a blank category_name still suppresses the classification fallback
    let category_tag = match attrs.get("category_name") {
        Some(_) => non_empty(attr_str(&attrs, "category_name")),
        None => non_empty(str_field(item, "classification")),
    };
    t.tags = tags(item.get("tags").or_else(|| attrs.get("tags")), category_tag);

    t.thumbnail = thumbnail(previews);
    t.url = str_field(item, "url").to_string();
    t.preview_url = previews
        .and_then(|p| p.get("live_site"))
        .map(|l| str_field(l, "url").to_string())
        .unwrap_or_default();

    let summary = non_empty(str_field(item, "description_short"))
        .or_else(|| non_empty(str_field(item, "summary")))
        .unwrap_or("");
    t.description = description(str_field(item, "description"), summary);
    t.features = take_chars(summary, FEATURES_MAX);
    t.compatibility = compatibility(&attrs);
    t.updated_at = str_field(item, "updated_at").to_string();

    t
}

/// Attributes arrive either as one object or as a list of single-key objects.
fn flatten_attributes(raw: Option<&Value>) -> Map<String, Value> {
    match raw {
        Some(Value::Object(map)) => map.clone(),
        Some(Value::Array(list)) => {
            let mut out = Map::new();
            for entry in list {
                if let Value::Object(map) = entry {
                    out.extend(map.clone());
                }
            }
            out
        }
        _ => Map::new(),
    }
}

/// Thumbnail fallback chain, first non-empty wins.
fn thumbnail(previews: Option<&Value>) -> String {
    let Some(p) = previews else {
        return String::new();
    };
    let chain: [fn(&Value) -> Option<&Value>; 3] = [
        |p| p.get("landscape_url")?.get("landscape_url"),
        |p| p.get("icon_with_landscape_preview")?.get("landscape_url"),
        |p| p.get("icon_with_landscape_preview")?.get("icon_url"),
    ];
    chain
        .iter()
        .filter_map(|get| get(p).and_then(Value::as_str))
        .find(|s| !s.trim().is_empty())
        .unwrap_or("")
        .to_string()
}

fn rating(raw: Option<&Value>) -> (f64, u64) {
    let Some(Value::Object(r)) = raw else {
        return (0.0, 0);
    };
    let value = r.get("rating").and_then(Value::as_f64).unwrap_or(0.0);
    let count = r.get("count").and_then(as_count).unwrap_or(0);
    ((value.clamp(0.0, 5.0) * 10.0).round() / 10.0, count)
}

fn tags(raw: Option<&Value>, category: Option<&str>) -> Vec<String> {
    let candidates: Vec<String> = match raw {
        Some(Value::String(s)) => s.split(',').map(|t| t.trim().to_string()).collect(),
        Some(Value::Array(list)) => list.iter().map(|v| scalar_string(Some(v))).collect(),
        _ => Vec::new(),
    };

    let mut out: Vec<String> = Vec::new();
    for tag in candidates {
        if !tag.is_empty() && !out.contains(&tag) {
            out.push(tag);
        }
    }
    if let Some(cat) = category {
        if !out.iter().any(|t| t == cat) {
            out.insert(0, cat.to_string());
        }
    }
    out.truncate(MAX_TAGS);
    out
}

/// Whole-dollar string, halves rounded to even; absent or zero is "Free".
fn format_price(raw: Option<&Value>) -> String {
    let cents = raw.and_then(Value::as_f64).unwrap_or(0.0);
    if cents <= 0.0 {
        return "Free".to_string();
    }
    format!("${}", (cents / 100.0).round_ties_even() as u64)
}

fn description(html: &str, summary: &str) -> String {
    let cleaned = strip_html(html);
    if cleaned.is_empty() {
        truncate_words(summary.trim(), SUMMARY_MAX)
    } else {
        truncate_words(&cleaned, DESCRIPTION_MAX)
    }
}

fn compatibility(attrs: &Map<String, Value>) -> String {
    COMPAT_KEYS
        .iter()
        .filter_map(|k| match attrs.get(*k)? {
            Value::Array(list) => Some(
                list.iter()
                    .map(|v| scalar_string(Some(v)))
                    .filter(|s| !s.is_empty())
                    .collect::<Vec<_>>()
                    .join(", "),
            ),
            other => Some(scalar_string(Some(other))),
        })
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join(", ")
}

fn str_field<'a>(v: &'a Value, key: &str) -> &'a str {
    v.get(key).and_then(Value::as_str).unwrap_or("")
}

fn attr_str<'a>(attrs: &'a Map<String, Value>, key: &str) -> &'a str {
    attrs.get(key).and_then(Value::as_str).unwrap_or("")
}

fn non_empty(s: &str) -> Option<&str> {
    let s = s.trim();
    (!s.is_empty()).then_some(s)
}

/// Strings and numbers as text; anything else is empty.
fn scalar_string(v: Option<&Value>) -> String {
    match v {
        Some(Value::String(s)) => s.trim().to_string(),
        Some(Value::Number(n)) => n.to_string(),
        Some(Value::Bool(b)) => b.to_string(),
        _ => String::new(),
    }
}

fn as_count(v: &Value) -> Option<u64> {
    v.as_u64()
        .or_else(|| v.as_f64().filter(|f| *f >= 0.0).map(|f| f as u64))
        .or_else(|| v.as_str().and_then(|s| s.trim().parse().ok()))
}

// ── Tests ──

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::fetch::tests::StubFetcher;
    use crate::text::ELLIPSIS;

    const NOW: &str = "2026-10-18T00:00:00+00:00";

    fn settings(api_base: &str, queries: Vec<QuerySpec>) -> EnvatoSettings {
        EnvatoSettings {
            api_base: api_base.to_string(),
            page_size: 50,
            delay_ms: 0,
            queries,
        }
    }

    #[test]
    fn fixture_item_normalizes() {
        let raw = std::fs::read_to_string("tests/fixtures/envato_search.json").unwrap();
        let body: Value = serde_json::from_str(&raw).unwrap();
        let items = body["matches"].as_array().unwrap();
        let t = normalize(&items[0], NOW);

        assert_eq!(t.id, "envato-2833226");
        assert_eq!(t.title, "Avada | Website Builder For WordPress & WooCommerce");
        assert_eq!(t.author, "ThemeFusion");
        assert_eq!(t.platform, "ThemeForest");
        assert_eq!(t.category, "Corporate");
        assert_eq!(t.price, "$69");
        assert_eq!(t.rating, 4.8);
        assert_eq!(t.rating_count, 24910);
        assert_eq!(t.sales, 1002431);
        assert_eq!(t.tags[0], "Corporate");
        assert!(t.tags.contains(&"business".to_string()));
        assert_eq!(t.thumbnail, "https://market-resized.envatousercontent.com/avada/landscape.jpg");
        assert_eq!(t.preview_url, "https://themeforest.net/item/avada/full_screen_preview/2833226");
        assert_eq!(t.description, "The #1 selling WordPress theme. Build anything.");
        assert_eq!(t.features, "Website builder for WordPress");
        assert_eq!(t.compatibility, "WordPress 6.5, Chrome, Firefox, Safari");
        assert_eq!(t.updated_at, "2026-09-30T12:00:00+10:00");
        assert_eq!(t.scraped_at, NOW);
    }

    #[test]
    fn attribute_list_is_flattened() {
        let item = json!({
            "id": 1,
            "attributes": [{"category_name": "Blog"}, {"compatible-software": "WordPress 6"}],
        });
        let t = normalize(&item, NOW);
        assert_eq!(t.category, "Blog");
        assert_eq!(t.compatibility, "WordPress 6");
        assert_eq!(t.tags, ["Blog"]);
    }

    #[test]
    fn thumbnail_falls_back_to_icon() {
        let item = json!({
            "id": 5,
            "previews": {"icon_with_landscape_preview": {"icon_url": "https://cdn.example/icon.png"}},
        });
        assert_eq!(normalize(&item, NOW).thumbnail, "https://cdn.example/icon.png");
    }

    #[test]
    fn thumbnail_prefers_landscape_of_icon_preview() {
        let item = json!({
            "previews": {"icon_with_landscape_preview": {
                "icon_url": "https://cdn.example/icon.png",
                "landscape_url": "https://cdn.example/land.png"
            }},
        });
        assert_eq!(normalize(&item, NOW).thumbnail, "https://cdn.example/land.png");
    }

    #[test]
    fn missing_pieces_default() {
        let t = normalize(&json!({}), NOW);
        assert_eq!(t.id, "envato-");
        assert_eq!(t.title, "Untitled");
        assert_eq!(t.author, "Unknown");
        assert_eq!(t.category, "WordPress");
        assert_eq!(t.price, "Free");
        assert_eq!((t.rating, t.rating_count, t.sales), (0.0, 0, 0));
        assert!(t.tags.is_empty());
        assert_eq!(t.thumbnail, "");
    }

    #[test]
    fn tags_from_string_dedup_and_cap() {
        let item = json!({
            "classification": "site-templates",
            "tags": "a, b, a, c, d, e, f, g, h, i",
        });
        let t = normalize(&item, NOW);
        assert_eq!(t.tags, ["site-templates", "a", "b", "c", "d", "e", "f", "g"]);
    }

    #[test]
    fn category_tag_not_duplicated() {
        let item = json!({
            "attributes": {"category_name": "Portfolio"},
            "tags": ["creative", "Portfolio", 3],
        });
        assert_eq!(normalize(&item, NOW).tags, ["creative", "Portfolio", "3"]);
    }

    #[test]
    fn blank_category_name_adds_no_tag() {
        let item = json!({
            "attributes": [{"category_name": ""}],
            "classification": "site-templates",
            "tags": ["creative"],
        });
        assert_eq!(normalize(&item, NOW).tags, ["creative"]);
    }

    #[test]
    fn price_rounds_to_whole_dollars() {
        assert_eq!(format_price(Some(&json!(5900))), "$59");
        assert_eq!(format_price(Some(&json!(1950))), "$20");
        assert_eq!(format_price(Some(&json!(2050))), "$20");
        assert_eq!(format_price(Some(&json!(2150))), "$22");
        assert_eq!(format_price(Some(&json!(2051))), "$21");
        assert_eq!(format_price(Some(&json!(0))), "Free");
        assert_eq!(format_price(None), "Free");
    }

    #[test]
    fn rating_is_rounded_and_clamped() {
        assert_eq!(rating(Some(&json!({"rating": 4.76, "count": 10}))), (4.8, 10));
        assert_eq!(rating(Some(&json!({"rating": 7}))), (5.0, 0));
        assert_eq!(rating(Some(&json!(4.5))), (0.0, 0));
    }

    #[test]
    fn long_description_is_word_truncated() {
        let words = "lorem ipsum dolor sit amet ".repeat(60);
        let item = json!({"description": format!("<p>{}</p>", words)});
        let d = normalize(&item, NOW).description;

        assert!(d.chars().count() <= DESCRIPTION_MAX);
        assert!(d.ends_with(ELLIPSIS));
        let last = d.trim_end_matches(ELLIPSIS).rsplit(' ').next().unwrap();
        assert!(["lorem", "ipsum", "dolor", "sit", "amet"].contains(&last));
    }

    #[test]
    fn empty_description_uses_summary() {
        let item = json!({"description": "<p> </p>", "summary": "Short and sweet"});
        let t = normalize(&item, NOW);
        assert_eq!(t.description, "Short and sweet");
        assert_eq!(t.features, "Short and sweet");
    }

    #[test]
    fn search_url_caps_page_size_and_skips_empty_filters() {
        let source = EnvatoSource::new(
            "t".into(),
            settings("https://api.example/search", Vec::new()),
        );
        let url = source
            .search_url(&QuerySpec::new("saas", "site-templates", ""))
            .unwrap();
        assert_eq!(
            url.as_str(),
            "https://api.example/search?site=themeforest.net&sort_by=sales&sort_direction=desc&page_size=30&term=saas&category=site-templates"
        );
    }

    #[tokio::test]
    async fn failing_query_does_not_abort_run() {
        let api = "https://api.example/search";
        let queries = vec![
            QuerySpec::new("broken", "", ""),
            QuerySpec::new("saas", "", ""),
        ];
        let source = EnvatoSource::new("tok".into(), settings(api, queries));
        let ok_url = source.search_url(&QuerySpec::new("saas", "", "")).unwrap();
        let fixture = std::fs::read_to_string("tests/fixtures/envato_search.json").unwrap();
        let fetcher = StubFetcher::default().with(ok_url.as_str(), &fixture);

        let out = source.collect(&fetcher).await;

        assert_eq!(fetcher.requested().len(), 2);
        let ids: Vec<&str> = out.iter().map(|t| t.id.as_str()).collect();
        assert_eq!(ids, ["envato-2833226", "envato-9999", "envato-4444"]);

        let requests = fetcher.requests.lock().unwrap();
        assert_eq!(requests[1].1, [("Authorization".to_string(), "Bearer tok".to_string())]);
    }

    #[tokio::test]
    async fn non_json_body_yields_nothing() {
        let api = "https://api.example/search";
        let source = EnvatoSource::new("tok".into(), settings(api, vec![QuerySpec::default()]));
        let url = source.search_url(&QuerySpec::default()).unwrap();
        let fetcher = StubFetcher::default().with(url.as_str(), "<html>rate limited</html>");
        assert!(source.collect(&fetcher).await.is_empty());
    }
}
