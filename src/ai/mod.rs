pub mod client;
pub mod draft;
pub mod rate_limit;
