//! Discovery of eligible roles on the requested subscriptions.

use std::collections::{BTreeMap, BTreeSet};

use tracing::{debug, info, warn};

use super::client::PimClient;
use super::models::{RoleEligibilityInstance, RoleEligibilityItem};
use crate::error::DiscoveryError;

/// Eligible roles grouped by subscription display name.
///
/// A subscription can carry several eligible roles; all of them are kept in
/// the order the API returned them.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DiscoveredRoles {
    by_subscription: BTreeMap<String, Vec<RoleEligibilityInstance>>,
}

impl DiscoveredRoles {
    pub fn get(&self, subscription_name: &str) -> Option<&[RoleEligibilityInstance]> {
        self.by_subscription
            .get(subscription_name)
            .map(Vec::as_slice)
    }

    /// Subscriptions with at least one match.
    pub fn subscription_count(&self) -> usize {
        self.by_subscription.len()
    }

    /// Total number of eligible roles across all subscriptions.
    pub fn instance_count(&self) -> usize {
        self.by_subscription.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.by_subscription.is_empty()
    }

    pub fn instances(&self) -> impl Iterator<Item = &RoleEligibilityInstance> {
        self.by_subscription.values().flatten()
    }

    /// Requested names with no eligible role.
    pub fn missing<'a>(&self, targets: &'a BTreeSet<String>) -> Vec<&'a str> {
        targets
            .iter()
            .filter(|name| !self.by_subscription.contains_key(*name))
            .map(String::as_str)
            .collect()
    }

    fn insert(&mut self, instance: RoleEligibilityInstance) {
        self.by_subscription
            .entry(instance.subscription_name.clone())
            .or_default()
            .push(instance);
    }
}

/// Keep only the listing entries on one of the target subscriptions.
///
/// Names are compared exactly. The subscription id is derived only for kept
/// entries, so a malformed scope fails the batch only when it was requested.
pub fn filter_instances(
    items: Vec<RoleEligibilityItem>,
    targets: &BTreeSet<String>,
) -> Result<DiscoveredRoles, DiscoveryError> {
    let mut roles = DiscoveredRoles::default();

    for item in items {
        let scope = &item.properties.expanded_properties.scope;
        debug!(
            "Role found: {} on {} ({})",
            item.properties.role_definition_id, scope.display_name, scope.id
        );

        if !targets.contains(&scope.display_name) {
            continue;
        }

        let instance = RoleEligibilityInstance::from_item(item)?;
        info!(
            "Found eligible role {} on {}",
            instance.role_label(),
            instance.subscription_name
        );
        roles.insert(instance);
    }

    Ok(roles)
}

/// Fetch eligible roles and keep those on the target subscriptions.
pub async fn discover(
    client: &PimClient,
    access_token: &str,
    targets: &BTreeSet<String>,
) -> Result<DiscoveredRoles, DiscoveryError> {
    let items = client.list_eligibility_instances(access_token).await?;
    let roles = filter_instances(items, targets)?;

    for name in roles.missing(targets) {
        warn!("No eligible role found for subscription {}", name);
    }

    info!(
        "Matched {} eligible roles on {} of {} subscriptions",
        roles.instance_count(),
        roles.subscription_count(),
        targets.len()
    );
    Ok(roles)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pim::test_server::{StubResponse, StubServer};
    use serde_json::{json, Value};

    fn item(display_name: &str, scope_id: &str, role: &str) -> Value {
        json!({
            "id": format!("{}/providers/Microsoft.Authorization/roleEligibilityScheduleInstances/x", scope_id),
            "properties": {
                "principalId": "p1",
                "roleDefinitionId": role,
                "roleEligibilityScheduleId": format!("e-{}", role),
                "memberType": "Direct",
                "expandedProperties": {
                    "principal": { "id": "p1", "type": "User" },
                    "scope": { "id": scope_id, "displayName": display_name, "type": "subscription" }
                }
            }
        })
    }

    fn parse(items: Vec<Value>) -> Vec<RoleEligibilityItem> {
        serde_json::from_value(Value::Array(items)).unwrap()
    }

    fn targets(names: &[&str]) -> BTreeSet<String> {
        names.iter().map(|name| name.to_string()).collect()
    }

    #[test]
    fn test_keeps_only_target_subscriptions() {
        let items = parse(vec![
            item("Sub-A", "/subscriptions/aaaa", "r1"),
            item("Sub-C", "/subscriptions/cccc", "r1"),
            item("sub-a", "/subscriptions/dddd", "r1"),
            item("Sub-A ", "/subscriptions/eeee", "r1"),
        ]);

        let roles = filter_instances(items, &targets(&["Sub-A", "Sub-B"])).unwrap();

        assert_eq!(roles.subscription_count(), 1);
        assert_eq!(roles.instance_count(), 1);
        assert!(roles.get("Sub-C").is_none());
        assert!(roles.get("sub-a").is_none());
        assert_eq!(roles.get("Sub-A").unwrap()[0].subscription_id, "aaaa");
        assert_eq!(roles.missing(&targets(&["Sub-A", "Sub-B"])), vec!["Sub-B"]);
    }

    #[test]
    fn test_carries_fields_through() {
        let items = parse(vec![item(
            "Sub-A",
            "/subscriptions/ffffffff-0000-0000-0000-000000000000/resourceGroups/x",
            "r1",
        )]);

        let roles = filter_instances(items, &targets(&["Sub-A", "Sub-B"])).unwrap();
        let instance = &roles.get("Sub-A").unwrap()[0];

        assert_eq!(
            instance,
            &RoleEligibilityInstance {
                scope_id: "/subscriptions/ffffffff-0000-0000-0000-000000000000/resourceGroups/x"
                    .to_string(),
                subscription_name: "Sub-A".to_string(),
                subscription_id: "ffffffff-0000-0000-0000-000000000000".to_string(),
                principal_id: "p1".to_string(),
                role_definition_id: "r1".to_string(),
                eligibility_schedule_id: "e-r1".to_string(),
            }
        );
        assert!(roles.get("Sub-B").is_none());
    }

    #[test]
    fn test_keeps_every_role_on_a_subscription() {
        let items = parse(vec![
            item("Sub-A", "/subscriptions/aaaa", "owner"),
            item("Sub-A", "/subscriptions/aaaa", "reader"),
        ]);

        let roles = filter_instances(items, &targets(&["Sub-A"])).unwrap();
        let on_a = roles.get("Sub-A").unwrap();

        assert_eq!(on_a.len(), 2);
        assert_eq!(on_a[0].role_definition_id, "owner");
        assert_eq!(on_a[1].role_definition_id, "reader");
    }

    #[test]
    fn test_unrequested_invalid_scope_is_ignored() {
        let items = parse(vec![
            item("Tenant Root Group", "/", "r1"),
            item("Sub-Z", "/subscriptions", "r1"),
            item("Sub-A", "/subscriptions/aaaa", "r1"),
        ]);

        let roles = filter_instances(items, &targets(&["Sub-A"])).unwrap();

        assert_eq!(roles.instance_count(), 1);
        assert_eq!(roles.get("Sub-A").unwrap()[0].subscription_id, "aaaa");
    }

    #[test]
    fn test_requested_invalid_scope_fails_the_batch() {
        let items = parse(vec![
            item("Sub-A", "/subscriptions/aaaa", "r1"),
            item("Tenant Root Group", "/", "r1"),
        ]);

        let result = filter_instances(items, &targets(&["Sub-A", "Tenant Root Group"]));

        assert!(matches!(result, Err(DiscoveryError::InvalidScope(scope)) if scope == "/"));
    }

    #[test]
    fn test_no_matches_is_empty() {
        let items = parse(vec![item("Sub-C", "/subscriptions/cccc", "r1")]);
        let roles = filter_instances(items, &targets(&["Sub-A"])).unwrap();
        assert!(roles.is_empty());
        assert_eq!(roles.instances().count(), 0);
    }

    #[tokio::test]
    async fn test_discover_against_stub() {
        let body = json!({ "value": [
            item("Sub-A", "/subscriptions/aaaa", "r1"),
            item("Sub-B", "/subscriptions/bbbb", "r2"),
        ]})
        .to_string();
        let server = StubServer::start(move |_| StubResponse::json(200, &body)).await;
        let client = PimClient::with_base_url(&server.base_url()).unwrap();

        let roles = discover(&client, "token", &targets(&["Sub-B"])).await.unwrap();

        assert_eq!(roles.instance_count(), 1);
        assert_eq!(roles.get("Sub-B").unwrap()[0].subscription_id, "bbbb");
    }

    #[tokio::test]
    async fn test_discover_missing_field_is_error() {
        let body = json!({ "value": [{ "properties": { "principalId": "p1" } }] }).to_string();
        let server = StubServer::start(move |_| StubResponse::json(200, &body)).await;
        let client = PimClient::with_base_url(&server.base_url()).unwrap();

        let result = discover(&client, "token", &targets(&["Sub-A"])).await;
        assert!(matches!(result, Err(DiscoveryError::InvalidResponse(_))));
    }

    #[tokio::test]
    async fn test_discover_forbidden_is_error() {
        let server = StubServer::start(|_| {
            StubResponse::json(403, r#"{"error":{"code":"AuthorizationFailed"}}"#)
        })
        .await;
        let client = PimClient::with_base_url(&server.base_url()).unwrap();

        let result = discover(&client, "token", &targets(&["Sub-A"])).await;
        assert!(matches!(
            result,
            Err(DiscoveryError::Status { status: 403, .. })
        ));
    }
}
