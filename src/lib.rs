//! Comet library crate
//!
//! Exposes the agent loop, tools, and supporting modules so integration
//! tests and external tooling can drive runs without going through CLI
//! startup.

pub mod agent;
pub mod config;
pub mod events;
pub mod history;
pub mod llm;
pub mod redact;
pub mod render;
pub mod repo;
pub mod tools;
pub mod truncate;
