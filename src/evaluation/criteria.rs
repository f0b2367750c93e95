use std::collections::BTreeSet;

use crate::core::config::CriteriaConfig;
use crate::scanner::{Availability, Currency, Money};

/// Buyer thresholds. Snapshotted at INIT and shared read-only for the run.
#[derive(Debug, Clone, PartialEq)]
pub struct Criteria {
    /// Inclusive.
    pub max_price: Money,
    /// Normalized (trimmed, lower-cased).
    pub allowed_conditions: BTreeSet<String>,
    /// Lower-cased.
    pub excluded_keywords: Vec<String>,
    /// Inclusive.
    pub max_distance_km: f64,
    pub required_availability: Availability,
}

impl Criteria {
    pub fn new<C, K>(
        max_price: Money,
        allowed_conditions: C,
        excluded_keywords: K,
        max_distance_km: f64,
    ) -> Self
    where
        C: IntoIterator,
        C::Item: AsRef<str>,
        K: IntoIterator,
        K::Item: AsRef<str>,
    {
        Self {
            max_price,
            allowed_conditions: allowed_conditions
                .into_iter()
                .map(|c| normalize(c.as_ref()))
                .filter(|c| !c.is_empty())
                .collect(),
            excluded_keywords: excluded_keywords
                .into_iter()
                .map(|k| normalize(k.as_ref()))
                .filter(|k| !k.is_empty())
                .collect(),
            max_distance_km,
            required_availability: Availability::Available,
        }
    }

    pub fn from_config(config: &CriteriaConfig, currency: Currency) -> Self {
        Self::new(
            Money::from_major(config.max_price, currency),
            &config.allowed_conditions,
            &config.excluded_keywords,
            config.max_distance_km,
        )
    }

    pub fn allows_condition(&self, condition: &str) -> bool {
        self.allowed_conditions.contains(&normalize(condition))
    }

    /// First excluded keyword found in `text`, case-insensitively.
    pub fn excluded_keyword_in(&self, text: &str) -> Option<&str> {
        let haystack = normalize(text);
        self.excluded_keywords
            .iter()
            .find(|k| haystack.contains(k.as_str()))
            .map(String::as_str)
    }
}

/// Lower-cases, trims and collapses inner whitespace.
pub fn normalize(text: &str) -> String {
    text.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}
