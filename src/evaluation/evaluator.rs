use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::classifier::ConditionClassifier;
use super::criteria::Criteria;
use crate::core::error::EvaluationError;
use crate::scanner::Listing;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationResult {
    pub listing_id: String,
    pub matches: bool,
    /// Ordered. On exclusion the first entry is the failing rule.
    pub reasons: Vec<String>,
    pub evaluated_at: DateTime<Utc>,
}

/// Explicit rules, applied in order; the first failure decides.
///
/// Pure in `(listing, criteria)`: the same inputs always give the same
/// `matches` and `reasons`.
pub fn apply_rules(listing: &Listing, criteria: &Criteria) -> Result<Vec<String>, String> {
    if listing.availability != criteria.required_availability {
        return Err(format!("not available ({})", listing.availability));
    }

    let price = listing.price.ok_or("price missing")?;
    if price.currency != criteria.max_price.currency {
        return Err(format!(
            "currency mismatch ({} vs {})",
            price.currency.symbol(),
            criteria.max_price.currency.symbol()
        ));
    }
    if price.amount_cents > criteria.max_price.amount_cents {
        return Err(format!(
            "price exceeds ceiling ({} > {})",
            price, criteria.max_price
        ));
    }

    let condition = listing.condition.as_deref().ok_or("condition missing")?;
    if !criteria.allows_condition(condition) {
        return Err(format!("condition not allowed ({})", condition.trim()));
    }

    if let Some(keyword) = criteria.excluded_keyword_in(&listing.description) {
        return Err(format!("excluded keyword ({})", keyword));
    }

    let distance = listing
        .distance_km
        .filter(|d| d.is_finite())
        .ok_or("distance missing")?;
    if distance > criteria.max_distance_km {
        return Err(format!(
            "distance exceeds ceiling ({} km > {} km)",
            distance, criteria.max_distance_km
        ));
    }

    Ok(vec![
        format!("price {} within ceiling {}", price, criteria.max_price),
        format!("condition {}", condition.trim()),
        format!("{} km away", distance),
    ])
}

pub fn evaluate(listing: &Listing, criteria: &Criteria) -> EvaluationResult {
    let (matches, reasons) = match apply_rules(listing, criteria) {
        Ok(rationale) => (true, rationale),
        Err(reason) => (false, vec![reason]),
    };

    EvaluationResult {
        listing_id: listing.id.clone(),
        matches,
        reasons,
        evaluated_at: Utc::now(),
    }
}

/// Rule layer plus an optional free-text classifier.
///
/// The classifier only runs on listings that already pass every explicit rule
/// and can only veto them.
pub struct Evaluator {
    criteria: Arc<Criteria>,
    classifier: Option<Arc<dyn ConditionClassifier>>,
}

impl Evaluator {
    pub fn new(criteria: Arc<Criteria>) -> Self {
        Self {
            criteria,
            classifier: None,
        }
    }

    pub fn with_classifier(mut self, classifier: Arc<dyn ConditionClassifier>) -> Self {
        self.classifier = Some(classifier);
        self
    }

    pub fn criteria(&self) -> &Criteria {
        &self.criteria
    }

    pub async fn evaluate(&self, listing: &Listing) -> Result<EvaluationResult, EvaluationError> {
        let mut result = evaluate(listing, &self.criteria);
        if !result.matches {
            return Ok(result);
        }

        let Some(classifier) = &self.classifier else {
            return Ok(result);
        };

        let verdict = classifier.classify(listing).await?;
        let note = format!("classifier: {}", verdict.rationale);
        if verdict.acceptable {
            result.reasons.push(note);
        } else {
            result.matches = false;
            result.reasons = vec![note];
        }
        Ok(result)
    }
}
