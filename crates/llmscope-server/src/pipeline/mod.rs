//! The detection pipeline: windowed aggregation, concurrent rule
//! evaluation, incident transitions, and notification dispatch, composed
//! into one cycle by [`cycle::DetectionCycle`].

pub mod aggregator;
pub mod cycle;
pub mod dispatcher;
pub mod evaluator;
pub mod incidents;

pub use aggregator::MetricAggregator;
pub use cycle::{CycleSummary, DetectionCycle};
pub use dispatcher::Dispatcher;
pub use evaluator::RuleEvaluator;
pub use incidents::{IncidentManager, IncidentOutcome};
