//! Typed integration metadata.
//!
//! Stored in the `metadata` JSON column, tagged by `system` so a row can be
//! decoded without consulting its `system_type`.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::SystemType;

/// Identity details captured from the Salesforce token response.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(deny_unknown_fields)]
pub struct SalesforceMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub org_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    /// Identity service URL (`id` in the token response).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub identity_url: Option<String>,
    /// Milliseconds since the epoch, as reported by Salesforce.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub issued_at: Option<String>,
}

impl SalesforceMetadata {
    /// Derives org and user ids from an identity URL of the form
    /// `https://login.salesforce.com/id/{org_id}/{user_id}`.
    pub fn from_identity_url(identity_url: &str, issued_at: Option<String>) -> Self {
        let mut segments = identity_url
            .trim_end_matches('/')
            .rsplit('/')
            .map(str::to_string);
        let user_id = segments.next();
        let org_id = segments.next();
        let has_id_prefix = segments.next().as_deref() == Some("id");

        Self {
            org_id: org_id.filter(|_| has_id_prefix),
            user_id: user_id.filter(|_| has_id_prefix),
            identity_url: Some(identity_url.to_string()),
            issued_at,
            ..Default::default()
        }
    }
}

/// Atlassian account details returned by `/myself`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(deny_unknown_fields)]
pub struct JiraMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub account_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

/// Per-system metadata attached to an integration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(tag = "system", rename_all = "lowercase")]
pub enum IntegrationMetadata {
    Salesforce(SalesforceMetadata),
    Jira(JiraMetadata),
}

impl IntegrationMetadata {
    /// System type this metadata variant belongs to.
    pub fn system_type(&self) -> SystemType {
        match self {
            IntegrationMetadata::Salesforce(_) => SystemType::Salesforce,
            IntegrationMetadata::Jira(_) => SystemType::Jira,
        }
    }
}
