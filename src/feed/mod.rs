pub mod backfill;
pub mod connection;
pub mod messages;

pub use connection::FeedManager;
pub use messages::{BetFrame, FeedFrame, OutcomeFrame};
