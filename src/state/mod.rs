pub mod metrics_store;

pub use metrics_store::{ApplyOutcome, MetricsStore};
