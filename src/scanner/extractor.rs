//! Raw entry → `Listing`.
//!
//! Every field is looked up through an ordered list of candidate selectors and
//! text heuristics instead of one fixed layout, so a markup change degrades a
//! field to `None` rather than failing the whole listing. Only identity and
//! title are mandatory.

use chrono::{DateTime, Duration, NaiveDate, NaiveTime, TimeZone, Utc};
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use sha2::{Digest, Sha256};
use std::sync::OnceLock;
use url::Url;

use super::price::parse_price;
use super::types::{Availability, Currency, Listing, RawListing};
use crate::core::error::ExtractionError;

pub trait Extractor: Send + Sync {
    fn extract(&self, raw: &RawListing) -> Result<Listing, ExtractionError>;

    /// Listing page worth fetching for more detail, if the entry links to one.
    fn detail_url(&self, _raw: &RawListing) -> Option<String> {
        None
    }
}

struct FieldSelectors {
    id: Vec<(Selector, &'static str)>,
    link: Vec<(Selector, &'static str)>,
    title: Vec<Selector>,
    price: Vec<Selector>,
    description: Vec<Selector>,
    location: Vec<Selector>,
    posted: Vec<Selector>,
    posted_attr: Vec<(Selector, &'static str)>,
    badges: Vec<Selector>,
    detail_rows: Vec<Selector>,
    detail_value: Vec<Selector>,
    condition_attr: Vec<(Selector, &'static str)>,
}

fn compile(list: &[&str]) -> Vec<Selector> {
    list.iter().filter_map(|s| Selector::parse(s).ok()).collect()
}

fn compile_attr(list: &[(&str, &'static str)]) -> Vec<(Selector, &'static str)> {
    list.iter()
        .filter_map(|(s, attr)| Selector::parse(s).ok().map(|sel| (sel, *attr)))
        .collect()
}

impl FieldSelectors {
    fn new() -> Self {
        Self {
            id: compile_attr(&[
                ("[data-adid]", "data-adid"),
                ("[data-listing-id]", "data-listing-id"),
                ("[data-id]", "data-id"),
            ]),
            link: compile_attr(&[
                ("[data-href]", "data-href"),
                ("a.ellipsis[href]", "href"),
                ("h2 a[href]", "href"),
                ("a[href]", "href"),
            ]),
            title: compile(&[
                ".aditem-main--middle h2",
                "a.ellipsis",
                "#viewad-title",
                "[itemprop=name]",
                "h2",
                "h1",
                "a[href]",
            ]),
            price: compile(&[
                "#viewad-price",
                ".aditem-main--middle--price-shipping--price",
                ".aditem-main--middle--price",
                "[itemprop=price]",
                ".price",
            ]),
            description: compile(&[
                "#viewad-description-text",
                "[itemprop=description]",
                ".aditem-main--middle--description",
                ".description",
                "p",
            ]),
            location: compile(&[
                "#viewad-locality",
                ".aditem-main--top--left",
                "[itemprop=address]",
                ".location",
            ]),
            posted: compile(&[
                ".aditem-main--top--right",
                "#viewad-extra-info",
                ".posted",
            ]),
            posted_attr: compile_attr(&[("time[datetime]", "datetime")]),
            badges: compile(&[
                ".badge",
                ".tag",
                ".simpletag",
                ".status",
                "[class*=reserved]",
                "[class*=sold]",
            ]),
            detail_rows: compile(&[
                "li.addetailslist--detail",
                ".addetailslist li",
                ".details li",
                "dl div",
                "tr",
            ]),
            detail_value: compile(&[".addetailslist--detail--value", "dd", "td:last-child"]),
            condition_attr: compile_attr(&[("[data-condition]", "data-condition")]),
        }
    }
}

fn distance_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"(?i)(\d+(?:[.,]\d+)?)\s*km\b").expect("static pattern"))
}

fn condition_phrase_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"(?i)\b(?:artikelzustand|zustand|condition)\s*[:\-]\s*([^\n.,;!()]{2,30})")
            .expect("static pattern")
    })
}

fn clock_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"(\d{1,2}):(\d{2})").expect("static pattern"))
}

fn date_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"(\d{1,2})\.(\d{1,2})\.(\d{4})").expect("static pattern"))
}

/// Layout-tolerant extractor for classifieds result pages and listing pages.
pub struct HtmlExtractor {
    default_currency: Currency,
    selectors: FieldSelectors,
}

impl HtmlExtractor {
    pub fn new(default_currency: Currency) -> Self {
        Self {
            default_currency,
            selectors: FieldSelectors::new(),
        }
    }

    pub fn extract_at(
        &self,
        raw: &RawListing,
        now: DateTime<Utc>,
    ) -> Result<Listing, ExtractionError> {
        let summary = Html::parse_fragment(&raw.html);
        let detail = raw.detail_html.as_deref().map(Html::parse_document);

        let summary_text = collapse(summary.root_element().text());
        if summary_text.is_empty() && self.listing_url(&summary, raw).is_none() {
            return Err(ExtractionError::Empty);
        }

        let url = self.listing_url(&summary, raw);
        let id = self
            .listing_id(&summary, url.as_ref())
            .ok_or(ExtractionError::MissingId)?;
        let url = url.ok_or_else(|| ExtractionError::MissingField {
            id: id.clone(),
            field: "url",
        })?;

        // Listing page first where it carries the richer version of a field.
        let docs: Vec<&Html> = detail.iter().chain(std::iter::once(&summary)).collect();

        let title = first_text(&[&summary], &self.selectors.title)
            .or_else(|| first_text(&docs, &self.selectors.title))
            .ok_or_else(|| ExtractionError::MissingField {
                id: id.clone(),
                field: "title",
            })?;

        let price = first_text(&docs, &self.selectors.price)
            .and_then(|text| parse_price(&text, self.default_currency));

        let description = first_text(&docs, &self.selectors.description).unwrap_or_default();

        let condition = self
            .condition(&docs)
            .or_else(|| condition_from_text(&description));

        let location = first_text(&docs, &self.selectors.location);
        let distance_km = location
            .as_deref()
            .and_then(parse_distance_km)
            .or_else(|| parse_distance_km(&summary_text));

        let availability = if summary_text.is_empty() {
            Availability::Unknown
        } else {
            let mut markers = title.clone();
            for doc in &docs {
                for selector in &self.selectors.badges {
                    for el in doc.select(selector) {
                        markers.push(' ');
                        markers.push_str(&collapse(el.text()));
                    }
                }
            }
            availability_from_markers(&markers)
        };

        let posted_at = first_attr(&docs, &self.selectors.posted_attr)
            .or_else(|| first_text(&docs, &self.selectors.posted))
            .and_then(|text| parse_posted_at(&text, now));

        Ok(Listing {
            id,
            title,
            price,
            condition,
            description,
            location,
            distance_km,
            availability,
            url: url.to_string(),
            posted_at,
        })
    }

    fn listing_url(&self, summary: &Html, raw: &RawListing) -> Option<Url> {
        let base = Url::parse(&raw.source_url).ok();
        let href = first_attr(&[summary], &self.selectors.link)?;
        match base {
            Some(base) => base.join(&href).ok(),
            None => Url::parse(&href).ok(),
        }
    }

    fn listing_id(&self, summary: &Html, url: Option<&Url>) -> Option<String> {
        if let Some(id) = first_attr(&[summary], &self.selectors.id) {
            return Some(id);
        }
        let url = url?;
        id_from_url(url).or_else(|| Some(hashed_id(url)))
    }

    fn condition(&self, docs: &[&Html]) -> Option<String> {
        if let Some(value) = first_attr(docs, &self.selectors.condition_attr) {
            return Some(value);
        }

        for doc in docs {
            for row_selector in &self.selectors.detail_rows {
                for row in doc.select(row_selector) {
                    let text = collapse(row.text());
                    let lower = text.to_lowercase();
                    let label = ["artikelzustand", "zustand", "condition"]
                        .into_iter()
                        .find(|l| lower.starts_with(l));
                    let Some(label) = label else { continue };

                    let value = self
                        .row_value(row)
                        .unwrap_or_else(|| text.get(label.len()..).unwrap_or_default().to_string());
                    let value = value.trim_matches(|c: char| c == ':' || c.is_whitespace());
                    if !value.is_empty() {
                        return Some(value.to_string());
                    }
                }
            }
        }
        None
    }

    fn row_value(&self, row: ElementRef<'_>) -> Option<String> {
        self.selectors.detail_value.iter().find_map(|s| {
            row.select(s)
                .map(|el| collapse(el.text()))
                .find(|t| !t.is_empty())
        })
    }
}

impl Extractor for HtmlExtractor {
    fn extract(&self, raw: &RawListing) -> Result<Listing, ExtractionError> {
        self.extract_at(raw, Utc::now())
    }

    fn detail_url(&self, raw: &RawListing) -> Option<String> {
        let summary = Html::parse_fragment(&raw.html);
        self.listing_url(&summary, raw).map(|u| u.to_string())
    }
}

fn collapse<'a>(parts: impl Iterator<Item = &'a str>) -> String {
    parts
        .flat_map(str::split_whitespace)
        .collect::<Vec<_>>()
        .join(" ")
}

fn first_text(docs: &[&Html], selectors: &[Selector]) -> Option<String> {
    selectors.iter().find_map(|selector| {
        docs.iter().find_map(|doc| {
            doc.select(selector)
                .map(|el| collapse(el.text()))
                .find(|t| !t.is_empty())
        })
    })
}

fn first_attr(docs: &[&Html], selectors: &[(Selector, &'static str)]) -> Option<String> {
    selectors.iter().find_map(|(selector, attr)| {
        docs.iter().find_map(|doc| {
            doc.select(selector)
                .filter_map(|el| el.value().attr(attr))
                .map(str::trim)
                .find(|v| !v.is_empty())
                .map(str::to_string)
        })
    })
}

/// Numeric ad id embedded in the URL path, e.g. `/s-anzeige/op-1/2912345678-74-3331`.
fn id_from_url(url: &Url) -> Option<String> {
    let segments: Vec<&str> = url.path_segments()?.collect();
    segments.iter().rev().find_map(|segment| {
        segment
            .split('-')
            .find(|part| part.len() >= 6 && part.chars().all(|c| c.is_ascii_digit()))
            .map(str::to_string)
    })
}

fn hashed_id(url: &Url) -> String {
    let mut canonical = url.clone();
    canonical.set_query(None);
    canonical.set_fragment(None);
    let digest = Sha256::digest(canonical.as_str().trim_end_matches('/').as_bytes());
    format!("{:x}", digest)
}

pub fn parse_distance_km(text: &str) -> Option<f64> {
    let caps = distance_pattern().captures(text)?;
    caps.get(1)?.as_str().replace(',', ".").parse().ok()
}

fn condition_from_text(text: &str) -> Option<String> {
    let caps = condition_phrase_pattern().captures(text)?;
    let value = caps.get(1)?.as_str().trim();
    (!value.is_empty()).then(|| value.to_string())
}

pub fn availability_from_markers(text: &str) -> Availability {
    let lower = text.to_lowercase();
    let words: Vec<&str> = lower
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .collect();

    if words.iter().any(|w| matches!(*w, "reserviert" | "reserved")) {
        Availability::Reserved
    } else if words
        .iter()
        .any(|w| matches!(*w, "verkauft" | "sold" | "gelöscht" | "deleted"))
    {
        Availability::Sold
    } else {
        Availability::Available
    }
}

pub fn parse_posted_at(text: &str, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(text.trim()) {
        return Some(dt.with_timezone(&Utc));
    }

    let lower = text.to_lowercase();
    let time = clock_pattern()
        .captures(&lower)
        .and_then(|c| {
            NaiveTime::from_hms_opt(c[1].parse().ok()?, c[2].parse().ok()?, 0)
        })
        .unwrap_or_default();

    let date = if lower.contains("heute") || lower.contains("today") {
        now.date_naive()
    } else if lower.contains("gestern") || lower.contains("yesterday") {
        (now - Duration::days(1)).date_naive()
    } else {
        let c = date_pattern().captures(&lower)?;
        NaiveDate::from_ymd_opt(c[3].parse().ok()?, c[2].parse().ok()?, c[1].parse().ok()?)?
    };

    Some(Utc.from_utc_datetime(&date.and_time(time)))
}
