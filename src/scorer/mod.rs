pub mod risk;

pub use risk::{classify, combined_score, compute_score, evaluate};
