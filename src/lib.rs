pub mod config;
pub mod error;
pub mod extract;
pub mod gate;
pub mod ingest;
pub mod llm;
pub mod prompt;
pub mod registry;
pub mod server;
pub mod service;
pub mod store;
