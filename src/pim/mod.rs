//! Azure Privileged Identity Management (PIM) activation pipeline.
//!
//! This module provides functionality for:
//! - Discovering eligible PIM roles on the requested subscriptions
//! - Activating all of them concurrently
//! - Classifying each outcome (activated, already active, skipped, failed)

pub mod client;
pub mod discovery;
pub mod fanout;
pub mod models;

#[cfg(test)]
pub(crate) mod test_server;

use std::collections::BTreeSet;

use tracing::info;

pub use client::PimClient;
pub use discovery::DiscoveredRoles;
pub use fanout::RunReport;

use crate::config::ActivationConfig;
use crate::error::DiscoveryError;

/// Discover eligible roles, then activate them all.
///
/// Discovery errors abort before any activation is sent. Activation failures
/// are reported per role in the returned [`RunReport`].
pub async fn run(
    client: &PimClient,
    access_token: &str,
    targets: &BTreeSet<String>,
    settings: &ActivationConfig,
    dry_run: bool,
) -> Result<(DiscoveredRoles, RunReport), DiscoveryError> {
    let roles = discovery::discover(client, access_token, targets).await?;

    if roles.is_empty() {
        info!("No eligible roles matched, nothing to activate");
    }

    let report = fanout::activate_all(client, access_token, &roles, settings, dry_run).await;
    Ok((roles, report))
}
