pub mod aws;
pub mod config;
pub mod llm;
pub mod pipeline;
pub mod query;
pub mod schema;
pub mod terminal;
