//! PIM data models for Azure Privileged Identity Management.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::ActivationConfig;
use crate::error::DiscoveryError;

/// Request type for activating one's own eligible assignment.
pub const REQUEST_TYPE_SELF_ACTIVATE: &str = "SelfActivate";

/// Expiration type for a fixed-length activation.
pub const EXPIRATION_AFTER_DURATION: &str = "AfterDuration";

/// Error code Azure returns when the role is already active.
pub const ROLE_ASSIGNMENT_EXISTS: &str = "RoleAssignmentExists";

/// An eligible-but-inactive role assignment visible to the current principal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoleEligibilityInstance {
    /// Full scope path.
    /// Format: /subscriptions/{sub}[/resourceGroups/...]
    pub scope_id: String,

    /// Subscription display name as shown in the portal.
    pub subscription_name: String,

    /// Subscription ID (GUID only), taken from the scope path.
    pub subscription_id: String,

    /// Principal ID (caller's Azure AD object ID).
    pub principal_id: String,

    /// Role definition ID (full path).
    pub role_definition_id: String,

    /// Role eligibility schedule this activation links to.
    pub eligibility_schedule_id: String,
}

impl RoleEligibilityInstance {
    /// Build an instance from one listing entry, deriving the subscription id.
    pub fn from_item(item: RoleEligibilityItem) -> Result<Self, DiscoveryError> {
        let properties = item.properties;
        let scope = properties.expanded_properties.scope;
        let subscription_id = subscription_id_from_scope(&scope.id)?.to_string();

        Ok(Self {
            scope_id: scope.id,
            subscription_name: scope.display_name,
            subscription_id,
            principal_id: properties.principal_id,
            role_definition_id: properties.role_definition_id,
            eligibility_schedule_id: properties.role_eligibility_schedule_id,
        })
    }

    /// Short role identifier for log lines (the trailing GUID of the definition path).
    pub fn role_label(&self) -> &str {
        self.role_definition_id
            .rsplit('/')
            .find(|segment| !segment.is_empty())
            .unwrap_or(&self.role_definition_id)
    }
}

/// Extract the subscription GUID from a scope path.
///
/// The GUID is segment 2 after splitting on `/`, so `/subscriptions/{id}/...`
/// yields `{id}`.
pub fn subscription_id_from_scope(scope_id: &str) -> Result<&str, DiscoveryError> {
    match scope_id.split('/').nth(2) {
        Some(segment) if !segment.is_empty() => Ok(segment),
        _ => Err(DiscoveryError::InvalidScope(scope_id.to_string())),
    }
}

/// Request to activate one eligible role.
///
/// Built inside the activation task so every attempt carries its own `request_id`.
#[derive(Debug, Clone)]
pub struct ActivationRequest {
    pub subscription_id: String,
    pub principal_id: String,
    pub role_definition_id: String,
    pub eligibility_schedule_id: String,
    pub justification: String,
    /// ISO-8601 duration.
    pub duration: String,
    /// Idempotency key addressed in the request URL.
    pub request_id: Uuid,
}

impl ActivationRequest {
    /// Create a request with a freshly generated request id.
    pub fn new(instance: &RoleEligibilityInstance, settings: &ActivationConfig) -> Self {
        Self {
            subscription_id: instance.subscription_id.clone(),
            principal_id: instance.principal_id.clone(),
            role_definition_id: instance.role_definition_id.clone(),
            eligibility_schedule_id: instance.eligibility_schedule_id.clone(),
            justification: settings.justification.clone(),
            duration: settings.duration.clone(),
            request_id: Uuid::new_v4(),
        }
    }

    /// JSON body expected by the roleAssignmentScheduleRequests endpoint.
    pub fn body(&self) -> ActivationRequestBody<'_> {
        ActivationRequestBody {
            properties: ActivationProperties {
                principal_id: &self.principal_id,
                role_definition_id: &self.role_definition_id,
                request_type: REQUEST_TYPE_SELF_ACTIVATE,
                linked_role_eligibility_schedule_id: &self.eligibility_schedule_id,
                justification: &self.justification,
                schedule_info: ScheduleInfo {
                    expiration: Expiration {
                        expiration_type: EXPIRATION_AFTER_DURATION,
                        end_date_time: None,
                        duration: &self.duration,
                    },
                },
            },
        }
    }
}

/// Why an activation did not go through.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActivationFailure {
    /// The request never got a response (connect error, timeout, ...).
    Transport(String),
    /// Azure answered with a non-success status.
    Rejected { status: u16, body: String },
    /// The activation task panicked or was cancelled.
    Aborted(String),
}

impl fmt::Display for ActivationFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Transport(message) => write!(f, "request failed: {}", message),
            Self::Rejected { status, body } => write!(f, "HTTP {}: {}", status, body),
            Self::Aborted(message) => write!(f, "task aborted: {}", message),
        }
    }
}

/// Result of one activation attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActivationOutcome {
    Activated,
    AlreadyActive,
    /// Dry run: nothing was sent.
    Skipped,
    Failed(ActivationFailure),
}

impl ActivationOutcome {
    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failed(_))
    }
}

impl fmt::Display for ActivationOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Activated => f.write_str("activated"),
            Self::AlreadyActive => f.write_str("already active"),
            Self::Skipped => f.write_str("skipped (dry run)"),
            Self::Failed(failure) => write!(f, "failed: {}", failure),
        }
    }
}

// --- API Response Types ---

#[derive(Debug, Deserialize)]
pub struct RoleEligibilityListResponse {
    pub value: Vec<RoleEligibilityItem>,
}

#[derive(Debug, Deserialize)]
pub struct RoleEligibilityItem {
    pub properties: RoleEligibilityProperties,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoleEligibilityProperties {
    pub principal_id: String,
    pub role_definition_id: String,
    pub role_eligibility_schedule_id: String,
    pub expanded_properties: ExpandedProperties,
}

#[derive(Debug, Deserialize)]
pub struct ExpandedProperties {
    pub scope: ExpandedScope,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExpandedScope {
    pub id: String,
    pub display_name: String,
}

/// ARM error envelope: `{"error": {"code": "...", "message": "..."}}`.
#[derive(Debug, Deserialize)]
pub struct ErrorResponse {
    pub error: ErrorDetail,
}

#[derive(Debug, Deserialize)]
pub struct ErrorDetail {
    #[serde(default)]
    pub code: Option<String>,
}

// --- Request Body Types ---

#[derive(Debug, Serialize)]
pub struct ActivationRequestBody<'a> {
    properties: ActivationProperties<'a>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ActivationProperties<'a> {
    principal_id: &'a str,
    role_definition_id: &'a str,
    request_type: &'a str,
    linked_role_eligibility_schedule_id: &'a str,
    justification: &'a str,
    schedule_info: ScheduleInfo<'a>,
}

#[derive(Debug, Serialize)]
struct ScheduleInfo<'a> {
    expiration: Expiration<'a>,
}

#[derive(Debug, Serialize)]
struct Expiration<'a> {
    #[serde(rename = "type")]
    expiration_type: &'a str,
    #[serde(rename = "endDateTime")]
    end_date_time: Option<&'a str>,
    duration: &'a str,
}
