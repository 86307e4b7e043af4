//! Azure PIM API client for role management.
//!
//! Uses the Azure Resource Management API to interact with PIM.

use std::time::Duration as StdDuration;

use reqwest::{Client, StatusCode};
use tracing::{debug, error, info, warn};

use super::models::{
    ActivationFailure, ActivationOutcome, ActivationRequest, ErrorResponse,
    RoleEligibilityItem, RoleEligibilityListResponse, ROLE_ASSIGNMENT_EXISTS,
};
use crate::error::DiscoveryError;

/// API version for PIM operations.
const API_VERSION_PIM: &str = "2020-10-01";

/// HTTP request timeout.
const HTTP_TIMEOUT: StdDuration = StdDuration::from_secs(30);

/// HTTP connection timeout.
const HTTP_CONNECT_TIMEOUT: StdDuration = StdDuration::from_secs(10);

/// Azure PIM API client.
///
/// Cheap to clone: the underlying connection pool is shared.
#[derive(Debug, Clone)]
pub struct PimClient {
    http_client: Client,
    base_url: String,
}

impl PimClient {
    /// Create a new PIM client against the given management endpoint.
    pub fn with_base_url(base_url: &str) -> Result<Self, reqwest::Error> {
        let http_client = Client::builder()
            .timeout(HTTP_TIMEOUT)
            .connect_timeout(HTTP_CONNECT_TIMEOUT)
            .build()?;

        Ok(Self {
            http_client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    /// URL listing every eligibility instance the caller is a target of.
    pub fn eligibility_instances_url(&self) -> String {
        format!(
            "{}/providers/Microsoft.Authorization/roleEligibilityScheduleInstances?api-version={}&$filter=asTarget()",
            self.base_url, API_VERSION_PIM
        )
    }

    /// URL of the schedule request created by an activation.
    pub fn activation_url(&self, request: &ActivationRequest) -> String {
        format!(
            "{}/providers/Microsoft.Subscription/subscriptions/{}/providers/Microsoft.Authorization/roleAssignmentScheduleRequests/{}?api-version={}",
            self.base_url, request.subscription_id, request.request_id, API_VERSION_PIM
        )
    }

    /// List all role eligibility schedule instances targeting the caller.
    pub async fn list_eligibility_instances(
        &self,
        access_token: &str,
    ) -> Result<Vec<RoleEligibilityItem>, DiscoveryError> {
        let url = self.eligibility_instances_url();

        debug!("Fetching role eligibility schedule instances from {}", url);

        let response = self
            .http_client
            .get(&url)
            .bearer_auth(access_token.trim())
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            error!(
                "Failed to get role eligibility schedule instances: HTTP {} - {}",
                status, body
            );
            return Err(DiscoveryError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let listing: RoleEligibilityListResponse = serde_json::from_str(&body)
            .map_err(|e| DiscoveryError::InvalidResponse(e.to_string()))?;

        info!(
            "Retrieved {} role eligibility schedule instances",
            listing.value.len()
        );
        Ok(listing.value)
    }

    /// Submit one activation request and classify the response.
    ///
    /// Never fails: transport and API errors become [`ActivationOutcome::Failed`].
    pub async fn activate_role(
        &self,
        access_token: &str,
        request: &ActivationRequest,
    ) -> ActivationOutcome {
        let url = self.activation_url(request);

        let response = match self
            .http_client
            .put(&url)
            .bearer_auth(access_token.trim())
            .json(&request.body())
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => {
                error!("Failed to activate PIM: {}", e);
                return ActivationOutcome::Failed(ActivationFailure::Transport(e.to_string()));
            }
        };

        let status = response.status();
        if is_accepted(status) {
            return ActivationOutcome::Activated;
        }

        match response.text().await {
            Ok(body) => classify_rejection(status.as_u16(), body),
            Err(e) => {
                error!("Failed to read response body for HTTP {}: {}", status, e);
                ActivationOutcome::Failed(ActivationFailure::Transport(e.to_string()))
            }
        }
    }
}

/// Status codes Azure uses for a created or accepted schedule request.
fn is_accepted(status: StatusCode) -> bool {
    matches!(status.as_u16(), 200 | 201 | 202)
}

/// Classify a non-success activation response from its status and body.
pub fn classify_rejection(status: u16, body: String) -> ActivationOutcome {
    match serde_json::from_str::<ErrorResponse>(&body) {
        Ok(parsed) if parsed.error.code.as_deref() == Some(ROLE_ASSIGNMENT_EXISTS) => {
            ActivationOutcome::AlreadyActive
        }
        Ok(_) => ActivationOutcome::Failed(ActivationFailure::Rejected { status, body }),
        Err(e) => {
            warn!("Failed to parse error response (HTTP {}): {}", status, e);
            ActivationOutcome::Failed(ActivationFailure::Rejected { status, body })
        }
    }
}
