//! # Data Models
//!
//! SeaORM entities for integrations and their token records, plus the domain
//! enums and value types shared by the store, handlers and refresh job.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

pub mod integration;
pub mod metadata;
pub mod token_record;
pub mod tokens;

pub use integration::Entity as Integration;
pub use metadata::{IntegrationMetadata, JiraMetadata, SalesforceMetadata};
pub use token_record::Entity as TokenRecord;
pub use tokens::TokenPair;

/// Basic service information response
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ServiceInfo {
    /// The name of the service
    pub service: String,
    /// The version of the service
    pub version: String,
}

impl Default for ServiceInfo {
    fn default() -> Self {
        Self {
            service: "friction-integrations".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

/// External system an integration connects to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum SystemType {
    Salesforce,
    Jira,
}

impl SystemType {
    pub const ALL: [SystemType; 2] = [SystemType::Salesforce, SystemType::Jira];

    /// Value persisted in the `system_type` column.
    pub fn as_str(&self) -> &'static str {
        match self {
            SystemType::Salesforce => "salesforce",
            SystemType::Jira => "jira",
        }
    }

    /// Whether the system hands out refresh tokens.
    pub fn supports_refresh(&self) -> bool {
        matches!(self, SystemType::Salesforce)
    }
}

impl fmt::Display for SystemType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when a string is not a known enum value.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown {kind} '{value}'")]
pub struct ParseEnumError {
    pub kind: &'static str,
    pub value: String,
}

impl FromStr for SystemType {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "salesforce" => Ok(SystemType::Salesforce),
            "jira" => Ok(SystemType::Jira),
            other => Err(ParseEnumError {
                kind: "system type",
                value: other.to_string(),
            }),
        }
    }
}

/// Lifecycle state of an integration row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum IntegrationStatus {
    Active,
    Disconnected,
    Error,
}

impl IntegrationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            IntegrationStatus::Active => "active",
            IntegrationStatus::Disconnected => "disconnected",
            IntegrationStatus::Error => "error",
        }
    }
}

impl fmt::Display for IntegrationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for IntegrationStatus {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(IntegrationStatus::Active),
            "disconnected" => Ok(IntegrationStatus::Disconnected),
            "error" => Ok(IntegrationStatus::Error),
            other => Err(ParseEnumError {
                kind: "integration status",
                value: other.to_string(),
            }),
        }
    }
}
