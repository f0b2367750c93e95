use super::context::{RunOutcome, RunReport};

/// Console summary of a finished run.
pub fn format_report(report: &RunReport) -> String {
    let c = &report.counters;
    let (badge, label) = match report.outcome {
        RunOutcome::Success => ("\x1b[32m✅", "SUCCESS"),
        RunOutcome::PartialFailure => ("\x1b[33m⚠️ ", "PARTIAL FAILURE"),
        RunOutcome::FatalFailure => ("\x1b[31m❌", "FATAL FAILURE"),
    };
    let elapsed = (report.finished_at - report.started_at).num_milliseconds() as f64 / 1000.0;

    let mut output = String::new();
    output.push_str("\n╔══════════════════════════════════════════════════════════════════════╗\n");
    output.push_str("║                      MARKETPLACE SCOUT RUN                           ║\n");
    output.push_str("╚══════════════════════════════════════════════════════════════════════╝\n\n");

    output.push_str(&format!("{} {}\x1b[0m ({})\n", badge, label, report.state));
    output.push_str(&format!("🆔 Run: {}\n", report.run_id));
    output.push_str(&format!("⏱️  Duration: {:.1}s", elapsed));
    if report.timed_out {
        output.push_str(" (timed out)");
    }
    output.push_str("\n\n");

    output.push_str(&format!("📄 Pages fetched:  {}\n", report.pages_fetched));
    output.push_str(&format!("   • Processed:    {}\n", c.processed));
    output.push_str(&format!("   • Matched:      {}\n", c.matched));
    output.push_str(&format!("   • Notified:     {}\n", c.notified));
    output.push_str(&format!("   • Duplicates:   {}\n", c.duplicates));
    output.push_str(&format!("   • Errored:      {}\n", c.errored));
    if c.fetch_errors > 0 {
        output.push_str(&format!("   • Page errors:  {}\n", c.fetch_errors));
    }

    if let Some(error) = &report.error {
        output.push_str(&format!("\n\x1b[31m🚨 {}\x1b[0m\n", error));
    }

    output.push_str("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━\n");
    output
}
