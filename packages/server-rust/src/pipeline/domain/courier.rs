//! In-memory courier pool.
//!
//! Each courier serves at most one order at a time. Assignment picks uniformly
//! among idle couriers; repeating an assignment for the same order returns the
//! courier it already holds, so redelivered commands are harmless.

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use dispatch_core::messages::{AssignCourier, UnassignCourier};
use dispatch_core::{CausalContext, CourierId, OrderId};
use parking_lot::RwLock;
use rand::seq::SliceRandom;
use tracing::debug;

use crate::traits::{CourierUseCases, UseCaseError};

/// Courier roster plus live order assignments.
#[derive(Debug, Default)]
pub struct CourierPool {
    couriers: RwLock<Vec<CourierId>>,
    /// order -> courier
    assignments: DashMap<OrderId, CourierId>,
    /// courier -> order, the inverse of `assignments`
    busy: DashMap<CourierId, OrderId>,
}

impl CourierPool {
    #[must_use]
    pub fn new(couriers: impl IntoIterator<Item = CourierId>) -> Self {
        let pool = Self::empty();
        for courier in couriers {
            pool.add_courier(courier);
        }
        pool
    }

    /// A pool with no couriers: every assignment fails.
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// Adds a courier to the roster. Duplicates are ignored.
    pub fn add_courier(&self, courier: CourierId) {
        let mut couriers = self.couriers.write();
        if !couriers.contains(&courier) {
            couriers.push(courier);
        }
    }

    /// Number of couriers on the roster.
    #[must_use]
    pub fn len(&self) -> usize {
        self.couriers.read().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Courier currently serving `order_id`, if any.
    #[must_use]
    pub fn assignment(&self, order_id: &OrderId) -> Option<CourierId> {
        self.assignments.get(order_id).map(|entry| entry.value().clone())
    }

    fn assign(&self, order_id: OrderId) -> Result<CourierId, UseCaseError> {
        // The order's entry stays locked until the assignment is recorded, so
        // concurrent assigns for one order settle on a single courier.
        let slot = match self.assignments.entry(order_id) {
            Entry::Occupied(existing) => return Ok(existing.get().clone()),
            Entry::Vacant(slot) => slot,
        };

        let mut idle: Vec<CourierId> = self
            .couriers
            .read()
            .iter()
            .filter(|courier| !self.busy.contains_key(*courier))
            .cloned()
            .collect();
        idle.shuffle(&mut rand::rng());

        // Another order may claim a candidate concurrently; try the next one.
        for courier in idle {
            if let Entry::Vacant(busy) = self.busy.entry(courier.clone()) {
                busy.insert(slot.key().clone());
                slot.insert(courier.clone());
                return Ok(courier);
            }
        }

        Err(UseCaseError::NoEligibleCourier {
            order_id: slot.into_key(),
        })
    }

    fn release(&self, order_id: &OrderId) -> Option<CourierId> {
        let (_, courier) = self.assignments.remove(order_id)?;
        self.busy.remove(&courier);
        Some(courier)
    }
}

#[async_trait]
impl CourierUseCases for CourierPool {
    async fn assign_courier(
        &self,
        _ctx: &CausalContext,
        request: AssignCourier,
    ) -> Result<CourierId, UseCaseError> {
        let courier = self.assign(request.order_id)?;
        debug!(courier_id = %courier, "courier reserved");
        Ok(courier)
    }

    async fn unassign_courier(
        &self,
        _ctx: &CausalContext,
        request: UnassignCourier,
    ) -> Result<Option<CourierId>, UseCaseError> {
        Ok(self.release(&request.order_id))
    }
}
