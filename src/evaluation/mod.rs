pub mod classifier;
pub mod criteria;
pub mod evaluator;

pub use classifier::{ClassifierVerdict, ConditionClassifier, LlmClassifier};
pub use criteria::Criteria;
pub use evaluator::{evaluate, EvaluationResult, Evaluator};
