pub mod constants;
pub mod error;
pub mod types;

pub mod config;
pub mod observability;
pub mod pipeline;
pub mod source;

// Application layer and its adapters
pub mod app;
pub mod infra;
