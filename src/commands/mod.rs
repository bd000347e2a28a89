pub mod db;
pub mod draft;
pub mod ingest;
pub mod release;
pub mod settings;
