//! Persistence gateway for valuation and order snapshots.
//!
//! The engine never persists anything. The service loads snapshots through a
//! [`LedgerGateway`], runs the engine, and hands everything the call produced
//! (product snapshots, order snapshots, stock movements) back as one
//! [`ChangeSet`]. A gateway must apply a change set atomically and refuse it
//! when any snapshot was changed since it was loaded.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use chrono::Utc;
use thiserror::Error;

use forgecost_core::{AggregateRoot, ExpectedVersion, TenantId};
use forgecost_events::LedgerEntry;
use forgecost_inventory::{ProductId, ProductValuation, StockMovement};
use forgecost_manufacturing::{ManufacturingOrderCosting, ManufacturingOrderId};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum GatewayError {
    /// A snapshot changed (or appeared) since it was loaded.
    #[error("concurrency conflict: {0}")]
    Concurrency(String),

    /// A change set or stored record belongs to another tenant.
    #[error("tenant isolation violation: {0}")]
    TenantIsolation(String),

    /// The change set is internally inconsistent.
    #[error("invalid change set: {0}")]
    InvalidChangeSet(String),

    #[error("storage failure: {0}")]
    Storage(String),
}

/// What a stored snapshot must look like for a write to go through.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum WriteCondition {
    /// Nothing is stored under this id yet.
    Absent,
    /// The stored snapshot is at this version.
    Version(ExpectedVersion),
}

impl WriteCondition {
    fn check(self, what: &str, stored: Option<u64>) -> Result<(), GatewayError> {
        match (self, stored) {
            (WriteCondition::Absent, None) => Ok(()),
            (WriteCondition::Absent, Some(v)) => Err(GatewayError::Concurrency(format!(
                "{what} already exists at version {v}"
            ))),
            (WriteCondition::Version(_), None) => Err(GatewayError::Concurrency(format!(
                "{what} does not exist"
            ))),
            (WriteCondition::Version(expected), Some(actual)) if expected.matches(actual) => Ok(()),
            (WriteCondition::Version(expected), Some(actual)) => Err(GatewayError::Concurrency(
                format!("{what}: expected {expected:?}, found {actual}"),
            )),
        }
    }
}

/// Everything one engine call produced, committed all-or-nothing.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChangeSet {
    products: Vec<(ProductValuation, WriteCondition)>,
    orders: Vec<(ManufacturingOrderCosting, WriteCondition)>,
    movements: Vec<StockMovement>,
}

impl ChangeSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a product that must not exist yet.
    pub fn create_product(mut self, product: ProductValuation) -> Self {
        self.products.push((product, WriteCondition::Absent));
        self
    }

    /// Replace a product stored at `loaded_version`.
    pub fn update_product(mut self, product: ProductValuation, loaded_version: u64) -> Self {
        self.products.push((
            product,
            WriteCondition::Version(ExpectedVersion::Exact(loaded_version)),
        ));
        self
    }

    pub fn create_order(mut self, order: ManufacturingOrderCosting) -> Self {
        self.orders.push((order, WriteCondition::Absent));
        self
    }

    pub fn update_order(mut self, order: ManufacturingOrderCosting, loaded_version: u64) -> Self {
        self.orders.push((
            order,
            WriteCondition::Version(ExpectedVersion::Exact(loaded_version)),
        ));
        self
    }

    /// Ledger records; each must belong to a product updated in the same set.
    pub fn record_movements(mut self, movements: impl IntoIterator<Item = StockMovement>) -> Self {
        self.movements.extend(movements);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.products.is_empty() && self.orders.is_empty() && self.movements.is_empty()
    }

    pub fn products(&self) -> &[(ProductValuation, WriteCondition)] {
        &self.products
    }

    pub fn orders(&self) -> &[(ManufacturingOrderCosting, WriteCondition)] {
        &self.orders
    }

    pub fn movements(&self) -> &[StockMovement] {
        &self.movements
    }

    fn validate(&self, tenant_id: TenantId) -> Result<(), GatewayError> {
        for (idx, (product, _)) in self.products.iter().enumerate() {
            if product.tenant_id() != tenant_id {
                return Err(GatewayError::TenantIsolation(format!(
                    "change set contains a foreign product snapshot (index {idx})"
                )));
            }
            if self.products[..idx]
                .iter()
                .any(|(p, _)| p.product_id() == product.product_id())
            {
                return Err(GatewayError::InvalidChangeSet(format!(
                    "product {} appears more than once",
                    product.product_id()
                )));
            }
        }
        for (idx, (order, _)) in self.orders.iter().enumerate() {
            if order.tenant_id() != tenant_id {
                return Err(GatewayError::TenantIsolation(format!(
                    "change set contains a foreign order snapshot (index {idx})"
                )));
            }
            if self.orders[..idx].iter().any(|(o, _)| o.mo_id() == order.mo_id()) {
                return Err(GatewayError::InvalidChangeSet(format!(
                    "order {} appears more than once",
                    order.mo_id()
                )));
            }
        }
        for movement in &self.movements {
            if !self
                .products
                .iter()
                .any(|(p, _)| p.product_id() == movement.product_id)
            {
                return Err(GatewayError::InvalidChangeSet(format!(
                    "movement for product {} without its snapshot",
                    movement.product_id
                )));
            }
        }
        Ok(())
    }
}

/// Tenant-scoped snapshot storage with atomic, version-checked commits.
pub trait LedgerGateway: Send + Sync {
    fn load_product(
        &self,
        tenant_id: TenantId,
        product_id: ProductId,
    ) -> Result<Option<ProductValuation>, GatewayError>;

    fn load_order(
        &self,
        tenant_id: TenantId,
        mo_id: ManufacturingOrderId,
    ) -> Result<Option<ManufacturingOrderCosting>, GatewayError>;

    fn list_products(&self, tenant_id: TenantId) -> Result<Vec<ProductValuation>, GatewayError>;

    /// Ledger of one product in sequence order.
    fn movements(
        &self,
        tenant_id: TenantId,
        product_id: ProductId,
    ) -> Result<Vec<LedgerEntry<StockMovement>>, GatewayError>;

    /// Apply `changes` atomically; returns the ledger entries it recorded.
    fn commit(
        &self,
        tenant_id: TenantId,
        changes: ChangeSet,
    ) -> Result<Vec<LedgerEntry<StockMovement>>, GatewayError>;
}

impl<G> LedgerGateway for Arc<G>
where
    G: LedgerGateway + ?Sized,
{
    fn load_product(
        &self,
        tenant_id: TenantId,
        product_id: ProductId,
    ) -> Result<Option<ProductValuation>, GatewayError> {
        (**self).load_product(tenant_id, product_id)
    }

    fn load_order(
        &self,
        tenant_id: TenantId,
        mo_id: ManufacturingOrderId,
    ) -> Result<Option<ManufacturingOrderCosting>, GatewayError> {
        (**self).load_order(tenant_id, mo_id)
    }

    fn list_products(&self, tenant_id: TenantId) -> Result<Vec<ProductValuation>, GatewayError> {
        (**self).list_products(tenant_id)
    }

    fn movements(
        &self,
        tenant_id: TenantId,
        product_id: ProductId,
    ) -> Result<Vec<LedgerEntry<StockMovement>>, GatewayError> {
        (**self).movements(tenant_id, product_id)
    }

    fn commit(
        &self,
        tenant_id: TenantId,
        changes: ChangeSet,
    ) -> Result<Vec<LedgerEntry<StockMovement>>, GatewayError> {
        (**self).commit(tenant_id, changes)
    }
}

#[derive(Debug, Default)]
struct Tables {
    products: HashMap<(TenantId, ProductId), ProductValuation>,
    orders: HashMap<(TenantId, ManufacturingOrderId), ManufacturingOrderCosting>,
    ledger: HashMap<(TenantId, ProductId), Vec<LedgerEntry<StockMovement>>>,
}

/// In-memory gateway.
///
/// Intended for tests/dev. One lock guards all tables so a commit is checked
/// and applied as a unit.
#[derive(Debug, Default)]
pub struct InMemoryLedgerGateway {
    tables: RwLock<Tables>,
}

impl InMemoryLedgerGateway {
    pub fn new() -> Self {
        Self::default()
    }

    fn poisoned() -> GatewayError {
        GatewayError::Storage("lock poisoned".to_string())
    }
}

impl LedgerGateway for InMemoryLedgerGateway {
    fn load_product(
        &self,
        tenant_id: TenantId,
        product_id: ProductId,
    ) -> Result<Option<ProductValuation>, GatewayError> {
        let tables = self.tables.read().map_err(|_| Self::poisoned())?;
        Ok(tables.products.get(&(tenant_id, product_id)).cloned())
    }

    fn load_order(
        &self,
        tenant_id: TenantId,
        mo_id: ManufacturingOrderId,
    ) -> Result<Option<ManufacturingOrderCosting>, GatewayError> {
        let tables = self.tables.read().map_err(|_| Self::poisoned())?;
        Ok(tables.orders.get(&(tenant_id, mo_id)).cloned())
    }

    fn list_products(&self, tenant_id: TenantId) -> Result<Vec<ProductValuation>, GatewayError> {
        let tables = self.tables.read().map_err(|_| Self::poisoned())?;
        let mut products: Vec<ProductValuation> = tables
            .products
            .iter()
            .filter(|((t, _), _)| *t == tenant_id)
            .map(|(_, p)| p.clone())
            .collect();
        products.sort_by_key(|p| *p.product_id().0.as_uuid());
        Ok(products)
    }

    fn movements(
        &self,
        tenant_id: TenantId,
        product_id: ProductId,
    ) -> Result<Vec<LedgerEntry<StockMovement>>, GatewayError> {
        let tables = self.tables.read().map_err(|_| Self::poisoned())?;
        Ok(tables
            .ledger
            .get(&(tenant_id, product_id))
            .cloned()
            .unwrap_or_default())
    }

    fn commit(
        &self,
        tenant_id: TenantId,
        changes: ChangeSet,
    ) -> Result<Vec<LedgerEntry<StockMovement>>, GatewayError> {
        if changes.is_empty() {
            return Ok(vec![]);
        }
        changes.validate(tenant_id)?;

        let mut tables = self.tables.write().map_err(|_| Self::poisoned())?;

        // Check every condition before touching anything.
        for (product, condition) in &changes.products {
            let stored = tables
                .products
                .get(&(tenant_id, product.product_id()))
                .map(|stored| stored.version());
            condition.check(&format!("product {}", product.product_id()), stored)?;
        }
        for (order, condition) in &changes.orders {
            let stored = tables
                .orders
                .get(&(tenant_id, order.mo_id()))
                .map(|stored| stored.version());
            condition.check(&format!("order {}", order.mo_id()), stored)?;
        }

        let ChangeSet {
            products,
            orders,
            movements,
        } = changes;

        let recorded_at = Utc::now();
        let mut committed = Vec::with_capacity(movements.len());
        for movement in movements {
            let stream = tables
                .ledger
                .entry((tenant_id, movement.product_id))
                .or_default();
            let next = stream.last().map(|e| e.sequence_number()).unwrap_or(0) + 1;
            let entry = LedgerEntry::record(tenant_id, next, recorded_at, movement);
            stream.push(entry.clone());
            committed.push(entry);
        }
        for (product, _) in products {
            tables
                .products
                .insert((tenant_id, product.product_id()), product);
        }
        for (order, _) in orders {
            tables.orders.insert((tenant_id, order.mo_id()), order);
        }

        Ok(committed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use forgecost_core::AggregateId;
    use forgecost_inventory::{
        ReferenceType, StockTransaction, StockTransactionProcessor, ValuationMethod,
    };

    fn product(tenant_id: TenantId) -> ProductValuation {
        ProductValuation::new(
            ProductId::new(AggregateId::new()),
            tenant_id,
            ValuationMethod::Fifo,
        )
    }

    fn receive(p: &ProductValuation, qty: f64, rate: f64) -> (ProductValuation, StockMovement) {
        let tx = StockTransaction::incoming(
            p.product_id(),
            qty,
            rate,
            ReferenceType::PurchaseReceipt,
            "PO-1",
            Utc::now(),
        );
        let (next, result) = StockTransactionProcessor::new(p.tenant_id())
            .process(p, &tx)
            .unwrap();
        (next, result.movement())
    }

    #[test]
    fn create_then_update_assigns_ledger_sequence() {
        let gateway = InMemoryLedgerGateway::new();
        let tenant = TenantId::new();
        let p = product(tenant);
        gateway
            .commit(tenant, ChangeSet::new().create_product(p.clone()))
            .unwrap();

        let (p1, m1) = receive(&p, 10.0, 2.0);
        let (p2, m2) = receive(&p1, 5.0, 3.0);
        let entries = gateway
            .commit(
                tenant,
                ChangeSet::new()
                    .update_product(p2.clone(), p.version())
                    .record_movements([m1, m2]),
            )
            .unwrap();

        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].sequence_number(), 1);
        assert_eq!(entries[1].sequence_number(), 2);
        assert_eq!(entries[0].event_type(), "inventory.stock.movement_recorded");
        assert_eq!(gateway.load_product(tenant, p.product_id()).unwrap(), Some(p2));
        assert_eq!(gateway.movements(tenant, p.product_id()).unwrap().len(), 2);
    }

    #[test]
    fn stale_version_rejects_whole_change_set() {
        let gateway = InMemoryLedgerGateway::new();
        let tenant = TenantId::new();
        let a = product(tenant);
        let b = product(tenant);
        gateway
            .commit(
                tenant,
                ChangeSet::new().create_product(a.clone()).create_product(b.clone()),
            )
            .unwrap();

        let (a1, ma) = receive(&a, 1.0, 1.0);
        let (b1, _) = receive(&b, 1.0, 1.0);
        let err = gateway
            .commit(
                tenant,
                ChangeSet::new()
                    .update_product(a1, a.version())
                    .update_product(b1, b.version() + 5)
                    .record_movements([ma]),
            )
            .unwrap_err();

        assert!(matches!(err, GatewayError::Concurrency(_)));
        assert_eq!(gateway.load_product(tenant, a.product_id()).unwrap(), Some(a.clone()));
        assert!(gateway.movements(tenant, a.product_id()).unwrap().is_empty());
    }

    #[test]
    fn duplicate_create_is_a_conflict() {
        let gateway = InMemoryLedgerGateway::new();
        let tenant = TenantId::new();
        let p = product(tenant);
        gateway
            .commit(tenant, ChangeSet::new().create_product(p.clone()))
            .unwrap();
        assert!(matches!(
            gateway.commit(tenant, ChangeSet::new().create_product(p)),
            Err(GatewayError::Concurrency(_))
        ));
    }

    #[test]
    fn tenants_are_isolated() {
        let gateway = InMemoryLedgerGateway::new();
        let tenant = TenantId::new();
        let other = TenantId::new();
        let p = product(tenant);

        assert!(matches!(
            gateway.commit(other, ChangeSet::new().create_product(p.clone())),
            Err(GatewayError::TenantIsolation(_))
        ));
        gateway
            .commit(tenant, ChangeSet::new().create_product(p.clone()))
            .unwrap();
        assert_eq!(gateway.load_product(other, p.product_id()).unwrap(), None);
        assert!(gateway.list_products(other).unwrap().is_empty());
        assert_eq!(gateway.list_products(tenant).unwrap().len(), 1);
    }

    #[test]
    fn movement_without_snapshot_is_rejected() {
        let gateway = InMemoryLedgerGateway::new();
        let tenant = TenantId::new();
        let p = product(tenant);
        let (_, movement) = receive(&p, 1.0, 1.0);
        assert!(matches!(
            gateway.commit(tenant, ChangeSet::new().record_movements([movement])),
            Err(GatewayError::InvalidChangeSet(_))
        ));
    }
}
