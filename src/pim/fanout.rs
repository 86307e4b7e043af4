//! Concurrent activation of every discovered role.
//!
//! One task per role. Tasks share nothing mutable: each gets its own copy of
//! the role, the token and a clone of the client, and hands its outcome back
//! through its join handle.

use std::sync::Arc;

use tracing::{debug, error, info, warn};

use super::client::PimClient;
use super::discovery::DiscoveredRoles;
use super::models::{
    ActivationFailure, ActivationOutcome, ActivationRequest, RoleEligibilityInstance,
};
use crate::config::ActivationConfig;

/// Outcome for one role.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActivationReport {
    pub subscription_name: String,
    pub role: String,
    pub outcome: ActivationOutcome,
}

/// All outcomes of one run, in launch order.
#[derive(Debug, Clone, Default)]
pub struct RunReport {
    pub entries: Vec<ActivationReport>,
}

impl RunReport {
    pub fn has_failures(&self) -> bool {
        self.entries.iter().any(|entry| entry.outcome.is_failure())
    }

    pub fn failure_count(&self) -> usize {
        self.entries
            .iter()
            .filter(|entry| entry.outcome.is_failure())
            .count()
    }

    /// Process exit code: 0 unless some activation failed.
    pub fn exit_code(&self) -> u8 {
        if self.has_failures() {
            1
        } else {
            0
        }
    }
}

/// Activate every discovered role concurrently and wait for all of them.
pub async fn activate_all(
    client: &PimClient,
    access_token: &str,
    roles: &DiscoveredRoles,
    settings: &ActivationConfig,
    dry_run: bool,
) -> RunReport {
    let token: Arc<str> = Arc::from(access_token);
    let settings = Arc::new(settings.clone());

    let handles: Vec<_> = roles
        .instances()
        .map(|instance| {
            let client = client.clone();
            let token = Arc::clone(&token);
            let settings = Arc::clone(&settings);
            let instance = instance.clone();
            let label = (
                instance.subscription_name.clone(),
                instance.role_label().to_string(),
            );
            let handle = tokio::spawn(async move {
                activate_one(&client, &token, &instance, &settings, dry_run).await
            });
            (label, handle)
        })
        .collect();

    let mut report = RunReport::default();
    for ((subscription_name, role), handle) in handles {
        let outcome = handle.await.unwrap_or_else(|e| {
            error!("Activation task for {} did not finish: {}", subscription_name, e);
            ActivationOutcome::Failed(ActivationFailure::Aborted(e.to_string()))
        });
        report.entries.push(ActivationReport {
            subscription_name,
            role,
            outcome,
        });
    }

    report
}

/// Build, send and classify one activation.
async fn activate_one(
    client: &PimClient,
    access_token: &str,
    instance: &RoleEligibilityInstance,
    settings: &ActivationConfig,
    dry_run: bool,
) -> ActivationOutcome {
    let request = ActivationRequest::new(instance, settings);

    if dry_run {
        info!(
            "Dry run, not activating {} on {}: PUT {}",
            instance.role_label(),
            instance.subscription_name,
            client.activation_url(&request)
        );
        match serde_json::to_string(&request.body()) {
            Ok(body) => debug!("Dry run request body: {}", body),
            Err(e) => debug!("Failed to serialize dry run request body: {}", e),
        }
        return ActivationOutcome::Skipped;
    }

    info!(
        "Activating {} on {} for {}",
        instance.role_label(),
        instance.subscription_name,
        request.duration
    );

    let outcome = client.activate_role(access_token, &request).await;
    match &outcome {
        ActivationOutcome::Activated => {
            info!("Successfully activated PIM for {}", instance.subscription_name)
        }
        ActivationOutcome::AlreadyActive => {
            warn!("PIM is already activated for {}", instance.subscription_name)
        }
        ActivationOutcome::Failed(failure) => error!(
            "Failed to activate PIM for {}: {}",
            instance.subscription_name, failure
        ),
        ActivationOutcome::Skipped => {}
    }
    outcome
}
