use std::collections::HashSet;
use std::sync::LazyLock;
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use thiserror::Error;
use tracing::{debug, info, warn};
use url::Url;

use super::{pause, progress, Source};
use crate::catalog::dedup_by_id;
use crate::config::ListingSettings;
use crate::fetch::Fetch;
use crate::model::{now_iso, Platform, Template};
use crate::text::{collapse_ws, title_from_slug, truncate_words};

static PRICE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$\d[\d,]*(?:\.\d{2})?").unwrap());
static TRAILING_PRICE_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\$\d.*$").unwrap());
static HEADING_SEL: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("h2, h3, h4, h5, span, p").unwrap());
static IMG_SEL: LazyLock<Selector> = LazyLock::new(|| Selector::parse("img").unwrap());
static LINK_SEL: LazyLock<Selector> = LazyLock::new(|| Selector::parse("a[href]").unwrap());

const DIRECT_TEXT_MAX: usize = 100;
const DESCRIPTION_MAX: usize = 200;

/// How one HTML storefront lays out its listing cards.
pub struct MarketRules {
    pub platform: Platform,
    pub origin: Url,
    /// Anchors pointing at template detail pages.
    pub primary: Selector,
    /// Looser selection, used only when `primary` finds nothing.
    pub fallback: Selector,
    /// Detail-page href; capture group 1 is the slug.
    pub item_href: Regex,
    /// Slugs that look like items but are listing/filter pages.
    pub sentinels: &'static [&'static str],
    pub author_href: Regex,
    /// Canonical detail URL with a `{slug}` placeholder; `None` keeps the absolute href.
    pub canonical_url: Option<&'static str>,
    /// Tags between the platform name and the category.
    pub extra_tags: &'static [&'static str],
    pub compatibility: &'static str,
    pub preview_is_url: bool,
}

#[derive(Debug, Error)]
pub enum CardSkip {
    #[error("card has no link")]
    NoHref,
    #[error("{0} is not a template link")]
    NotAnItem(String),
    #[error("{0:?} is a listing page, not a template")]
    Sentinel(String),
    #[error("{0:?} already seen on this page")]
    Duplicate(String),
    #[error("{0:?} has no usable title")]
    NoTitle(String),
    #[error("bad link {href:?}: {source}")]
    BadUrl {
        href: String,
        #[source]
        source: url::ParseError,
    },
}

/// The pieces of one card that field extractors look at.
struct Card<'a> {
    el: ElementRef<'a>,
    slug: &'a str,
}

type Extractor = fn(&Card, &MarketRules) -> Option<String>;

const TITLE_CHAIN: [Extractor; 3] = [title_from_heading, title_from_direct_text, title_from_card_slug];
const THUMBNAIL_CHAIN: [Extractor; 3] = [img_src, img_data_src, img_srcset];
const PRICE_CHAIN: [Extractor; 2] = [price_in_card, price_in_container];

/// Evaluate extractors in order; first non-empty result wins.
fn first_of(chain: &[Extractor], card: &Card, rules: &MarketRules) -> Option<String> {
    chain
        .iter()
        .filter_map(|extract| extract(card, rules))
        .find(|v| !v.trim().is_empty())
}

// ── Page parsing ──

/// Parse every template card on one listing page. Cards that fail are skipped.
pub fn parse_listing(html: &str, category: &str, rules: &MarketRules, scraped_at: &str) -> Vec<Template> {
    let doc = Html::parse_document(html);
    let mut cards: Vec<ElementRef> = doc.select(&rules.primary).collect();
    if cards.is_empty() {
        debug!("{}: primary selector empty, trying fallback", rules.platform);
        cards = doc.select(&rules.fallback).collect();
    }

    let mut seen: HashSet<String> = HashSet::new();
    let mut out = Vec::new();

    for el in cards {
        match extract_card(el, category, rules, &mut seen, scraped_at) {
            Ok(t) => out.push(t),
            Err(skip @ CardSkip::BadUrl { .. }) => warn!("{}: skipping card: {}", rules.platform, skip),
            Err(skip) => debug!("{}: skipping card: {}", rules.platform, skip),
        }
    }
    out
}

fn extract_card(
    el: ElementRef,
    category: &str,
    rules: &MarketRules,
    seen: &mut HashSet<String>,
    scraped_at: &str,
) -> Result<Template, CardSkip> {
    let href = card_href(el).ok_or(CardSkip::NoHref)?;
    let absolute = rules
        .origin
        .join(href)
        .map_err(|source| CardSkip::BadUrl {
            href: href.to_string(),
            source,
        })?;

    let slug = rules
        .item_href
        .captures(absolute.as_str())
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
        .ok_or_else(|| CardSkip::NotAnItem(href.to_string()))?;
    if rules.sentinels.contains(&slug.as_str()) {
        return Err(CardSkip::Sentinel(slug));
    }
    if !seen.insert(slug.clone()) {
        return Err(CardSkip::Duplicate(slug));
    }

    let card = Card { el, slug: &slug };
    let title = first_of(&TITLE_CHAIN, &card, rules).unwrap_or_default();
    if title.chars().count() < 2 {
        return Err(CardSkip::NoTitle(slug));
    }

    let url = match rules.canonical_url {
        Some(pattern) => pattern.replace("{slug}", &slug),
        None => absolute.to_string(),
    };
    let platform = rules.platform;

    let mut t = Template::new(platform, &slug, title.clone(), scraped_at);
    t.author = card_author(&card, rules).unwrap_or_else(|| "Unknown".to_string());
    t.category = category.to_string();
    t.price = first_of(&PRICE_CHAIN, &card, rules).unwrap_or_else(|| "Free".to_string());
    t.thumbnail = first_of(&THUMBNAIL_CHAIN, &card, rules)
        .map(|raw| resolve_image_url(&raw, &rules.origin))
        .unwrap_or_default();
    t.tags = std::iter::once(platform.name())
        .chain(rules.extra_tags.iter().copied())
        .chain(std::iter::once(category))
        .map(str::to_string)
        .collect();
    t.description = truncate_words(
        &format!(
            "{} — a {} {} template.",
            title,
            category.to_lowercase(),
            platform.name()
        ),
        DESCRIPTION_MAX,
    );
    t.compatibility = rules.compatibility.to_string();
    if rules.preview_is_url {
        t.preview_url = url.clone();
    }
    t.url = url;

    Ok(t)
}

/// The card's own link target, else its first descendant link.
fn card_href<'a>(el: ElementRef<'a>) -> Option<&'a str> {
    el.value()
        .attr("href")
        .or_else(|| el.value().attr("data-href"))
        .or_else(|| el.select(&LINK_SEL).next()?.value().attr("href"))
        .map(str::trim)
        .filter(|h| !h.is_empty())
}

// ── Field extractors ──

/// First non-blank line of the element's text, without a glued-on price.
fn clean_title(raw: &str) -> Option<String> {
    let line = raw.lines().map(str::trim).find(|l| !l.is_empty())?;
    let line = collapse_ws(&TRAILING_PRICE_RE.replace(line, ""));
    (!line.is_empty()).then_some(line)
}

fn element_text(el: ElementRef) -> String {
    el.text().collect()
}

fn title_from_heading(card: &Card, _: &MarketRules) -> Option<String> {
    let heading = card.el.select(&HEADING_SEL).next()?;
    clean_title(&element_text(heading))
}

fn title_from_direct_text(card: &Card, _: &MarketRules) -> Option<String> {
    let text = element_text(card.el);
    if collapse_ws(&text).chars().count() >= DIRECT_TEXT_MAX {
        return None;
    }
    clean_title(&text)
}

fn title_from_card_slug(card: &Card, _: &MarketRules) -> Option<String> {
    Some(title_from_slug(card.slug))
}

fn first_img_attr<'a>(card: &Card<'a>, attr: &str) -> Option<&'a str> {
    let img = card.el.select(&IMG_SEL).next()?;
    img.value().attr(attr).map(str::trim).filter(|v| !v.is_empty())
}

fn img_src(card: &Card, _: &MarketRules) -> Option<String> {
    // inline data: URIs are lazy-load placeholders
    first_img_attr(card, "src")
        .filter(|v| !v.starts_with("data:"))
        .map(str::to_string)
}

fn img_data_src(card: &Card, _: &MarketRules) -> Option<String> {
    first_img_attr(card, "data-src").map(str::to_string)
}

fn img_srcset(card: &Card, _: &MarketRules) -> Option<String> {
    first_img_attr(card, "srcset")?
        .split_whitespace()
        .next()
        .map(|s| s.trim_end_matches(',').to_string())
}

fn find_price(text: &str) -> Option<String> {
    PRICE_RE.find(text).map(|m| m.as_str().to_string())
}

fn price_in_card(card: &Card, _: &MarketRules) -> Option<String> {
    find_price(&element_text(card.el))
}

fn price_in_container(card: &Card, _: &MarketRules) -> Option<String> {
    let parent = card.el.parent().and_then(ElementRef::wrap)?;
    find_price(&element_text(parent))
}

fn card_author(card: &Card, rules: &MarketRules) -> Option<String> {
    card.el
        .select(&LINK_SEL)
        .filter(|a| a.value().attr("href").is_some_and(|h| rules.author_href.is_match(h)))
        .map(|a| collapse_ws(&element_text(a)))
        .find(|name| !name.is_empty())
}

/// Absolute image URL. Image-proxy links (`...?url=<encoded>&w=...`) resolve to the
/// URL they wrap; relative paths resolve against `origin`.
pub fn resolve_image_url(raw: &str, origin: &Url) -> String {
    let raw = raw.trim();
    if raw.is_empty() {
        return String::new();
    }
    let Ok(resolved) = origin.join(raw) else {
        return raw.to_string();
    };

    let wrapped = resolved
        .query_pairs()
        .find(|(k, _)| k == "url")
        .map(|(_, v)| v.into_owned());
    if let Some(inner) = wrapped {
        let inner = inner.trim();
        if inner.starts_with("http://") || inner.starts_with("https://") {
            return inner.to_string();
        }
        if inner.starts_with('/') {
            if let Ok(u) = origin.join(inner) {
                return u.to_string();
            }
        }
    }
    resolved.to_string()
}

// ── Adapter ──

/// One HTML storefront: a fixed set of listing pages scraped with `rules`.
pub struct ListingSource {
    rules: &'static MarketRules,
    settings: ListingSettings,
}

impl ListingSource {
    pub fn new(rules: &'static MarketRules, settings: ListingSettings) -> Self {
        ListingSource { rules, settings }
    }
}

#[async_trait]
impl Source for ListingSource {
    fn platform(&self) -> Platform {
        self.rules.platform
    }

    async fn collect(&self, fetcher: &dyn Fetch) -> Vec<Template> {
        let pages = &self.settings.pages;
        let delay = Duration::from_millis(self.settings.delay_ms);
        let pb = progress(pages.len());
        let mut batch = Vec::new();

        for (i, page) in pages.iter().enumerate() {
            pb.set_message(page.label.clone());
            match fetcher.fetch(&page.url, &[]).await {
                Ok(html) => {
                    let found = parse_listing(&html, &page.label, self.rules, &now_iso());
                    info!("{} {:?}: {} templates", self.rules.platform, page.label, found.len());
                    batch.extend(found);
                }
                Err(e) => warn!("Failed to fetch {}: {}", page.url, e),
            }
            pb.inc(1);
            pause(delay, i, pages.len()).await;
        }

        pb.finish_and_clear();
        dedup_by_id(batch)
    }
}

// ── Tests ──
