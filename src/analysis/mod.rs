pub mod enrichment;
pub mod prompt;
pub mod readiness;
