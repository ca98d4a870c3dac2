pub mod config;
pub mod error;
pub mod export;
pub mod model;
pub mod orchestrator;
pub mod prompt;
pub mod providers;
pub mod retrieval;
pub mod section;
pub mod server;
pub mod usage;
