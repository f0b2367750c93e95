use crate::evaluation::EvaluationResult;
use crate::pipeline::RunReport;
use crate::scanner::Listing;

/// Telegram rejects messages above 4096 characters.
pub const MAX_MESSAGE_CHARS: usize = 4096;

const DESCRIPTION_PREVIEW_CHARS: usize = 280;

pub fn format_listing_alert(listing: &Listing, evaluation: &EvaluationResult) -> String {
    let price = listing
        .price
        .map(|p| p.to_string())
        .unwrap_or_else(|| "n/a".to_string());
    let condition = listing.condition.as_deref().unwrap_or("n/a");
    let distance = match listing.distance_km {
        Some(d) => format!("{:.1} km", d),
        None => "n/a".to_string(),
    };

    let mut out = String::new();
    out.push_str(&format!("🎯 {}\n", listing.title.trim()));
    out.push_str(&format!("💶 {}\n", price));
    out.push_str(&format!("🔧 {}\n", condition));
    match listing.location.as_deref() {
        Some(location) => out.push_str(&format!("📍 {} ({})\n", distance, location)),
        None => out.push_str(&format!("📍 {}\n", distance)),
    }

    let description = preview(&listing.description, DESCRIPTION_PREVIEW_CHARS);
    if !description.is_empty() {
        out.push('\n');
        out.push_str(&description);
        out.push('\n');
    }

    if !evaluation.reasons.is_empty() {
        out.push_str(&format!("\n✅ {}\n", evaluation.reasons.join("; ")));
    }
    out.push_str(&format!("\n🔗 {}", listing.url));

    truncate(&out, MAX_MESSAGE_CHARS)
}

pub fn format_run_summary(report: &RunReport) -> String {
    let c = &report.counters;
    let mut out = String::new();
    out.push_str("✅ Scout run completed\n");
    out.push_str(&format!(
        "processed={} matched={} notified={} duplicates={} errored={}\n",
        c.processed, c.matched, c.notified, c.duplicates, c.errored
    ));
    out.push_str(&format!("pages={}", report.pages_fetched));
    if c.fetch_errors > 0 {
        out.push_str(&format!(" fetch_errors={}", c.fetch_errors));
    }
    if report.timed_out {
        out.push_str(" (timed out)");
    }
    out.push_str(&format!("\nrun={}", report.run_id));
    out
}

pub fn format_failure_alert(report: &RunReport) -> String {
    let cause = report.error.as_deref().unwrap_or("unknown error");
    truncate(
        &format!(
            "🚨 Scout run failed\n{}\nprocessed={} notified={}\nrun={}",
            cause, report.counters.processed, report.counters.notified, report.run_id
        ),
        MAX_MESSAGE_CHARS,
    )
}

fn preview(text: &str, max_chars: usize) -> String {
    let collapsed = text.split_whitespace().collect::<Vec<_>>().join(" ");
    truncate(&collapsed, max_chars)
}

fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let mut cut: String = text.chars().take(max_chars.saturating_sub(1)).collect();
    cut.push('…');
    cut
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::{RunCounters, RunOutcome, RunState};
    use crate::scanner::{Availability, Currency, Money};
    use chrono::Utc;
    use uuid::Uuid;

    fn listing() -> Listing {
        Listing {
            id: "2912345678".into(),
            title: "Teenage Engineering OP-1 ".into(),
            price: Some(Money::new(45000, Currency::Eur)),
            condition: Some("Sehr gut".into()),
            description: "Kaum benutzt,\n\n  mit Tasche".into(),
            location: Some("10115 Berlin".into()),
            distance_km: Some(20.0),
            availability: Availability::Available,
            url: "https://www.kleinanzeigen.de/s-anzeige/op-1/2912345678".into(),
            posted_at: None,
        }
    }

    fn report(outcome: RunOutcome, error: Option<&str>) -> RunReport {
        RunReport {
            run_id: Uuid::nil(),
            outcome,
            state: RunState::Done,
            started_at: Utc::now(),
            finished_at: Utc::now(),
            counters: RunCounters {
                processed: 10,
                matched: 2,
                notified: 1,
                duplicates: 1,
                errored: 0,
                fetch_errors: 0,
            },
            pages_fetched: 2,
            timed_out: false,
            error: error.map(String::from),
        }
    }

    #[test]
    fn test_alert_contains_required_fields() {
        let evaluation = EvaluationResult {
            listing_id: "2912345678".into(),
            matches: true,
            reasons: vec!["price 450 € within ceiling 599.99 €".into()],
            evaluated_at: Utc::now(),
        };
        let text = format_listing_alert(&listing(), &evaluation);

        assert!(text.contains("Teenage Engineering OP-1"));
        assert!(text.contains("450 €"));
        assert!(text.contains("Sehr gut"));
        assert!(text.contains("20.0 km"));
        assert!(text.contains("10115 Berlin"));
        assert!(text.contains("Kaum benutzt, mit Tasche"));
        assert!(text.ends_with("https://www.kleinanzeigen.de/s-anzeige/op-1/2912345678"));
    }

    #[test]
    fn test_long_alert_is_truncated() {
        let mut long = listing();
        long.title = "x".repeat(5000);
        let evaluation = EvaluationResult {
            listing_id: long.id.clone(),
            matches: true,
            reasons: vec![],
            evaluated_at: Utc::now(),
        };
        let text = format_listing_alert(&long, &evaluation);
        assert_eq!(text.chars().count(), MAX_MESSAGE_CHARS);
    }

    #[test]
    fn test_summary_and_failure_messages() {
        let summary = format_run_summary(&report(RunOutcome::Success, None));
        assert!(summary.contains("processed=10 matched=2 notified=1"));

        let failure = format_failure_alert(&report(
            RunOutcome::FatalFailure,
            Some("first search page unreachable"),
        ));
        assert!(failure.starts_with("🚨"));
        assert!(failure.contains("first search page unreachable"));
    }
}
