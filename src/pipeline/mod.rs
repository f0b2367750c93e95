pub mod context;
pub mod orchestrator;
pub mod reporter;
pub mod trigger;

pub use context::{Counter, RunContext, RunCounters, RunOutcome, RunReport, RunState};
pub use orchestrator::{Orchestrator, RunSettings};
pub use reporter::format_report;
pub use trigger::Trigger;
