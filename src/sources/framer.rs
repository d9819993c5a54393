use std::sync::LazyLock;

use regex::Regex;
use scraper::Selector;
use url::Url;

use super::listing::{ListingSource, MarketRules};
use crate::config::ListingSettings;
use crate::model::Platform;

pub static RULES: LazyLock<MarketRules> = LazyLock::new(|| MarketRules {
    platform: Platform::Framer,
    origin: Url::parse("https://framer.com").unwrap(),
    primary: Selector::parse("a[href*='/marketplace/templates/']").unwrap(),
    // item_href does the filtering when the primary selector misses
    fallback: Selector::parse("a[href]").unwrap(),
    item_href: Regex::new(r"/marketplace/templates/([a-z0-9-]+)/?$").unwrap(),
    sentinels: &["new"],
    author_href: Regex::new(r"framer\.com/@").unwrap(),
    canonical_url: Some("https://framer.com/marketplace/templates/{slug}/"),
    extra_tags: &["Website"],
    compatibility: "Framer",
    preview_is_url: true,
});

/// Framer marketplace listing pages.
pub fn source(settings: ListingSettings) -> ListingSource {
    ListingSource::new(&RULES, settings)
}

// ── Tests ──
