//! Entity registry
//!
//! Static configuration for every entity type mirrored from the remote
//! warehouse API. One `EntityConfig` per entity type replaces the
//! per-entity service duplication in earlier generations of this system:
//! the fetch/transform/upsert pipeline is written once and parameterized
//! by these records.

use serde::{Deserialize, Serialize};

/// The entity types the mirror replicates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Products,
    Picklists,
    Warehouses,
    Users,
    Suppliers,
    Batches,
    PurchaseOrders,
}

impl EntityKind {
    /// All configured entity types, in default sync order
    pub fn all() -> &'static [EntityKind] {
        &[
            EntityKind::Products,
            EntityKind::Picklists,
            EntityKind::Warehouses,
            EntityKind::Users,
            EntityKind::Suppliers,
            EntityKind::Batches,
            EntityKind::PurchaseOrders,
        ]
    }

    pub fn as_str(&self) -> &'static str {
        self.config().name
    }

    /// Static configuration for this entity type
    pub fn config(&self) -> &'static EntityConfig {
        match self {
            EntityKind::Products => &PRODUCTS,
            EntityKind::Picklists => &PICKLISTS,
            EntityKind::Warehouses => &WAREHOUSES,
            EntityKind::Users => &USERS,
            EntityKind::Suppliers => &SUPPLIERS,
            EntityKind::Batches => &BATCHES,
            EntityKind::PurchaseOrders => &PURCHASE_ORDERS,
        }
    }
}

impl std::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for EntityKind {
    type Err = stockmirror_common::MirrorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "products" | "product" => Ok(EntityKind::Products),
            "picklists" | "picklist" => Ok(EntityKind::Picklists),
            "warehouses" | "warehouse" => Ok(EntityKind::Warehouses),
            "users" | "user" => Ok(EntityKind::Users),
            "suppliers" | "supplier" => Ok(EntityKind::Suppliers),
            "batches" | "batch" => Ok(EntityKind::Batches),
            "purchase_orders" | "purchaseorders" | "purchase_order" => {
                Ok(EntityKind::PurchaseOrders)
            },
            other => Err(stockmirror_common::MirrorError::UnknownEntity(
                other.to_string(),
            )),
        }
    }
}

/// Static, immutable configuration for one mirrored entity type
#[derive(Debug, Clone)]
pub struct EntityConfig {
    /// Entity type this record configures
    pub kind: EntityKind,
    /// Canonical name, also used as the `sync_runs.entity_type` key
    pub name: &'static str,
    /// Destination table name
    pub table: &'static str,
    /// Source-side unique identifier field name
    pub id_field: &'static str,
    /// REST resource path under the API base URL
    pub api_path: &'static str,
    /// Field used as a human-readable label in log messages
    pub display_field: &'static str,
    /// Field carrying the record's last-modified timestamp
    pub updated_field: &'static str,
}

static PRODUCTS: EntityConfig = EntityConfig {
    kind: EntityKind::Products,
    name: "products",
    table: "products",
    id_field: "idproduct",
    api_path: "products",
    display_field: "name",
    updated_field: "updated",
};

static PICKLISTS: EntityConfig = EntityConfig {
    kind: EntityKind::Picklists,
    name: "picklists",
    table: "picklists",
    id_field: "idpicklist",
    api_path: "picklists",
    display_field: "picklistid",
    updated_field: "updated",
};

static WAREHOUSES: EntityConfig = EntityConfig {
    kind: EntityKind::Warehouses,
    name: "warehouses",
    table: "warehouses",
    id_field: "idwarehouse",
    api_path: "warehouses",
    display_field: "name",
    updated_field: "updated",
};

static USERS: EntityConfig = EntityConfig {
    kind: EntityKind::Users,
    name: "users",
    table: "users",
    id_field: "iduser",
    api_path: "users",
    display_field: "username",
    updated_field: "updated",
};

static SUPPLIERS: EntityConfig = EntityConfig {
    kind: EntityKind::Suppliers,
    name: "suppliers",
    table: "suppliers",
    id_field: "idsupplier",
    api_path: "suppliers",
    display_field: "name",
    updated_field: "updated",
};

static BATCHES: EntityConfig = EntityConfig {
    kind: EntityKind::Batches,
    name: "batches",
    table: "batches",
    id_field: "idbatch",
    api_path: "batches",
    display_field: "batchnumber",
    updated_field: "updated",
};

static PURCHASE_ORDERS: EntityConfig = EntityConfig {
    kind: EntityKind::PurchaseOrders,
    name: "purchase_orders",
    table: "purchase_orders",
    id_field: "idpurchaseorder",
    api_path: "purchaseorders",
    display_field: "purchaseorderid",
    updated_field: "updated",
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_all_entities_configured() {
        assert_eq!(EntityKind::all().len(), 7);
        for kind in EntityKind::all() {
            let config = kind.config();
            assert_eq!(config.kind, *kind);
            assert!(!config.table.is_empty());
            assert!(!config.id_field.is_empty());
            assert!(!config.api_path.is_empty());
        }
    }

    #[test]
    fn test_entity_kind_from_str() {
        assert_eq!("products".parse::<EntityKind>().unwrap(), EntityKind::Products);
        assert_eq!("Warehouse".parse::<EntityKind>().unwrap(), EntityKind::Warehouses);
        assert_eq!(
            "purchase-orders".parse::<EntityKind>().unwrap(),
            EntityKind::PurchaseOrders
        );
        assert!("gadgets".parse::<EntityKind>().is_err());
    }

    #[test]
    fn test_entity_kind_roundtrip() {
        for kind in EntityKind::all() {
            let parsed: EntityKind = kind.as_str().parse().unwrap();
            assert_eq!(parsed, *kind);
        }
    }

    #[test]
    fn test_table_names_unique() {
        let mut tables: Vec<&str> = EntityKind::all().iter().map(|k| k.config().table).collect();
        tables.sort_unstable();
        tables.dedup();
        assert_eq!(tables.len(), EntityKind::all().len());
    }
}
