use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Currency {
    Eur,
    Usd,
    Gbp,
    Chf,
}

impl Currency {
    pub fn symbol(&self) -> &'static str {
        match self {
            Currency::Eur => "€",
            Currency::Usd => "$",
            Currency::Gbp => "£",
            Currency::Chf => "CHF",
        }
    }
}

/// Amount in minor units so price comparisons are exact to the cent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Money {
    pub amount_cents: i64,
    pub currency: Currency,
}

impl Money {
    pub fn new(amount_cents: i64, currency: Currency) -> Self {
        Self {
            amount_cents,
            currency,
        }
    }

    pub fn from_major(amount: f64, currency: Currency) -> Self {
        Self::new((amount * 100.0).round() as i64, currency)
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let major = self.amount_cents / 100;
        let minor = (self.amount_cents % 100).abs();
        if minor == 0 {
            write!(f, "{} {}", major, self.currency.symbol())
        } else {
            write!(f, "{}.{:02} {}", major, minor, self.currency.symbol())
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Availability {
    Available,
    Reserved,
    Sold,
    Unknown,
}

impl fmt::Display for Availability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Availability::Available => "available",
            Availability::Reserved => "reserved",
            Availability::Sold => "sold",
            Availability::Unknown => "unknown",
        };
        f.write_str(label)
    }
}

/// One marketplace entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Listing {
    /// Stable across runs for the same entry; the dedup key.
    pub id: String,
    pub title: String,
    pub price: Option<Money>,
    pub condition: Option<String>,
    pub description: String,
    pub location: Option<String>,
    pub distance_km: Option<f64>,
    pub availability: Availability,
    pub url: String,
    pub posted_at: Option<DateTime<Utc>>,
}

/// A listing as it came off the search page, before extraction.
#[derive(Debug, Clone, PartialEq)]
pub struct RawListing {
    /// Page the entry was found on; relative links resolve against it.
    pub source_url: String,
    pub html: String,
    /// Full listing page, when detail fetching is enabled and succeeded.
    pub detail_html: Option<String>,
}

impl RawListing {
    pub fn new(source_url: impl Into<String>, html: impl Into<String>) -> Self {
        Self {
            source_url: source_url.into(),
            html: html.into(),
            detail_html: None,
        }
    }
}
