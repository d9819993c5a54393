use std::sync::LazyLock;

use regex::Regex;
use scraper::Selector;
use url::Url;

use super::listing::{ListingSource, MarketRules};
use crate::config::ListingSettings;
use crate::model::Platform;

pub static RULES: LazyLock<MarketRules> = LazyLock::new(|| MarketRules {
    platform: Platform::Webflow,
    origin: Url::parse("https://webflow.com").unwrap(),
    primary: Selector::parse("a[href*='/templates/html/']").unwrap(),
    fallback: Selector::parse(".tm-card, .template-card, [class*='template']").unwrap(),
    item_href: Regex::new(r"/templates/html/([A-Za-z0-9][A-Za-z0-9_-]*)/?(?:[?#].*)?$").unwrap(),
    sentinels: &[],
    author_href: Regex::new(r"/templates/designers/").unwrap(),
    canonical_url: None,
    extra_tags: &[],
    compatibility: "",
    preview_is_url: false,
});

/// Webflow template marketplace listing pages.
pub fn source(settings: ListingSettings) -> ListingSource {
    ListingSource::new(&RULES, settings)
}

// ── Tests ──
