//! # Friction Intelligence Integrations
//!
//! Salesforce OAuth flow, Jira connection and the credential store backing
//! them: handlers, persistence, token crypto and server wiring.

pub mod auth;
pub mod config;
pub mod credential_store;
pub mod crypto;
pub mod db;
pub mod error;
pub mod handlers;
pub mod jira;
pub mod models;
pub mod oauth;
pub mod repositories;
pub mod server;
pub mod telemetry;
pub use migration;
