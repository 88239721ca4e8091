pub mod context;
pub mod ingest;
pub mod latency;

pub use context::{ContextAssembler, ContextMsg};
pub use ingest::{EngineCounters, IngestionEngine, Worker};
pub use latency::LatencyStats;
