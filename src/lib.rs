pub mod api;
pub mod core;
pub mod evaluation;
pub mod monitoring;
pub mod notify;
pub mod pipeline;
pub mod scanner;

pub use crate::core::{Config, Credentials};
pub use crate::pipeline::{Orchestrator, RunOutcome, RunReport, RunState, Trigger};
