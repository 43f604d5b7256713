//! Courier domain payloads.
//!
//! Field names follow the order service's wire format (`orderID`, `courierID`).

use serde::{Deserialize, Serialize};

use crate::types::{CourierId, OrderId};

/// Payload of `create_order.assign_courier`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssignCourier {
    #[serde(rename = "orderID")]
    pub order_id: OrderId,
}

/// Payload of `create_order.unassign_courier`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnassignCourier {
    #[serde(rename = "orderID")]
    pub order_id: OrderId,
}

/// Payload of `courier.courier_assigned`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CourierAssigned {
    #[serde(rename = "orderID")]
    pub order_id: OrderId,
    #[serde(rename = "courierID")]
    pub courier_id: CourierId,
}

/// Payload of `courier.courier_assignment_failed`.
///
/// Carries only the order so the saga can roll the order back.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CourierAssignmentFailed {
    #[serde(rename = "orderID")]
    pub order_id: OrderId,
}

/// Payload of `courier.courier_unassigned`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CourierUnassigned {
    #[serde(rename = "orderID")]
    pub order_id: OrderId,
    #[serde(rename = "courierID")]
    pub courier_id: CourierId,
}
