//! The default versioned route table.

use crate::definition::RouteDefinition;
use hera_core::{OperationClass, SecurityTier};
use http::Method;

/// Version of the default table.
pub const API_VERSION: &str = "v2";

/// Returns the routes served by a stock deployment.
#[must_use]
pub fn default_routes() -> Vec<RouteDefinition> {
    vec![
        // entities
        RouteDefinition::new(Method::GET, "/api/v2/entities", "list_entities")
            .rpc("hera_entity_read_v2")
            .permissions(["entities:read"]),
        RouteDefinition::new(Method::POST, "/api/v2/entities", "create_entity")
            .rpc("hera_entity_upsert_v2")
            .permissions(["entities:write"]),
        RouteDefinition::new(Method::POST, "/api/v2/entities/search", "search_entities")
            .rpc("hera_entity_read_v2")
            .class(OperationClass::Read)
            .tier(SecurityTier::Low)
            .permissions(["entities:read"]),
        RouteDefinition::new(Method::GET, "/api/v2/entities/:id", "get_entity")
            .rpc("hera_entity_read_v2")
            .permissions(["entities:read"]),
        RouteDefinition::new(Method::PUT, "/api/v2/entities/:id", "update_entity")
            .rpc("hera_entity_upsert_v2")
            .permissions(["entities:write"]),
        RouteDefinition::new(Method::DELETE, "/api/v2/entities/:id", "delete_entity")
            .rpc("hera_entity_delete_v2")
            .permissions(["entities:delete"])
            .tier(SecurityTier::Critical),
        RouteDefinition::new(Method::POST, "/api/v2/entities/:id/dynamic-fields", "set_dynamic_fields")
            .rpc("hera_dynamic_data_batch_v2")
            .permissions(["entities:write"]),
        // relationships
        RouteDefinition::new(Method::GET, "/api/v2/relationships", "list_relationships")
            .rpc("hera_relationship_read_v2")
            .permissions(["relationships:read"]),
        RouteDefinition::new(Method::POST, "/api/v2/relationships", "create_relationship")
            .rpc("hera_relationship_create_v2")
            .permissions(["relationships:write"]),
        RouteDefinition::new(Method::DELETE, "/api/v2/relationships/:id", "delete_relationship")
            .rpc("hera_relationship_delete_v2")
            .permissions(["relationships:write"]),
        // transactions
        RouteDefinition::new(Method::GET, "/api/v2/transactions", "list_transactions")
            .rpc("hera_txn_read_v2")
            .permissions(["transactions:read"]),
        RouteDefinition::new(Method::GET, "/api/v2/transactions/:id", "get_transaction")
            .rpc("hera_txn_read_v2")
            .permissions(["transactions:read"]),
        RouteDefinition::new(Method::POST, "/api/v2/transactions", "create_transaction")
            .rpc("hera_txn_create_v2")
            .permissions(["transactions:write"]),
        RouteDefinition::new(Method::POST, "/api/v2/transactions/:id/post", "post_transaction")
            .rpc("hera_txn_post_v2")
            .permissions(["transactions:post"]),
        RouteDefinition::new(Method::POST, "/api/v2/transactions/:id/approve", "approve_transaction")
            .rpc("hera_txn_approve_v2")
            .permissions(["transactions:approve"]),
        RouteDefinition::new(Method::POST, "/api/v2/transactions/:id/reverse", "reverse_transaction")
            .rpc("hera_txn_reverse_v2")
            .permissions(["transactions:post"]),
        RouteDefinition::new(Method::GET, "/api/v2/ledger/balances", "ledger_balances")
            .rpc("hera_ledger_balance_read_v2")
            .permissions(["ledger:read"])
            .tier(SecurityTier::Medium),
        // organization administration
        RouteDefinition::new(Method::POST, "/api/v2/organizations/:id/members", "upsert_member")
            .rpc("hera_org_membership_upsert_v2")
            .permissions(["organizations:admin"])
            .tier(SecurityTier::Critical),
        // retired v1 surface
        RouteDefinition::new(Method::POST, "/api/v1/universal", "legacy_universal").deprecated(),
        RouteDefinition::new(Method::GET, "/api/v1/entities", "legacy_list_entities").deprecated(),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_live_route_has_rpc_and_permissions() {
        for route in default_routes().iter().filter(|r| !r.deprecated) {
            assert!(route.rpc_action.is_some(), "{}", route.signature());
            assert!(!route.required_permissions.is_empty(), "{}", route.signature());
        }
    }

    #[test]
    fn test_finance_routes() {
        let finance: Vec<_> = default_routes()
            .into_iter()
            .filter(|r| r.operation_class == OperationClass::Finance)
            .map(|r| r.handler)
            .collect();
        assert!(finance.contains(&"create_transaction".to_string()));
        assert!(finance.contains(&"approve_transaction".to_string()));
        assert!(!finance.contains(&"list_transactions".to_string()));
    }
}
