//! Ask free-text questions about sensor data and get answers backed by a SQL query.
//!
//! The [`core::pipeline::Orchestrator`] turns a question into a validated `SELECT`, runs it on
//! the query engine, and synthesizes an answer. [`interfaces`] exposes it over HTTP.

pub mod core;
pub mod interfaces;
pub mod logging;
