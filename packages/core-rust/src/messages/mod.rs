//! Closed catalogue of command and result names exchanged over the broker.
//!
//! Command names are the tags producers put in the `name` field of a command
//! envelope; result names are what the dispatcher publishes back. Both sets are
//! closed: a name outside the catalogue is rejected at dispatch time.
//! Payload shapes live in the per-domain submodules.

use std::fmt;
use std::str::FromStr;

pub mod courier;

pub use courier::{
    AssignCourier, CourierAssigned, CourierAssignmentFailed, CourierUnassigned, UnassignCourier,
};

/// Version of the command/result catalogue. Bumped whenever a name is added or removed.
pub const CATALOGUE_VERSION: u32 = 1;

/// Wire names of every command this service accepts.
pub mod command_names {
    pub const ASSIGN_COURIER: &str = "create_order.assign_courier";
    pub const UNASSIGN_COURIER: &str = "create_order.unassign_courier";
}

/// Wire names of every result this service publishes.
pub mod result_names {
    pub const COURIER_ASSIGNED: &str = "courier.courier_assigned";
    pub const COURIER_ASSIGNMENT_FAILED: &str = "courier.courier_assignment_failed";
    pub const COURIER_UNASSIGNED: &str = "courier.courier_unassigned";
}

/// Error returned when a name is not part of the catalogue.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unrecognized name: {0}")]
pub struct UnknownName(pub String);

/// Commands accepted by the dispatcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandKind {
    /// Pick an available courier for a freshly created order.
    AssignCourier,
    /// Saga compensation: release the courier held by an order.
    UnassignCourier,
}

impl CommandKind {
    /// Every command in the catalogue.
    pub const ALL: [Self; 2] = [Self::AssignCourier, Self::UnassignCourier];

    /// Returns the wire name of this command.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::AssignCourier => command_names::ASSIGN_COURIER,
            Self::UnassignCourier => command_names::UNASSIGN_COURIER,
        }
    }
}

impl FromStr for CommandKind {
    type Err = UnknownName;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            command_names::ASSIGN_COURIER => Ok(Self::AssignCourier),
            command_names::UNASSIGN_COURIER => Ok(Self::UnassignCourier),
            other => Err(UnknownName(other.to_string())),
        }
    }
}

impl fmt::Display for CommandKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Results published by the dispatcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResultKind {
    CourierAssigned,
    CourierAssignmentFailed,
    CourierUnassigned,
}

impl ResultKind {
    /// Every result in the catalogue.
    pub const ALL: [Self; 3] = [
        Self::CourierAssigned,
        Self::CourierAssignmentFailed,
        Self::CourierUnassigned,
    ];

    /// Returns the wire name of this result.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::CourierAssigned => result_names::COURIER_ASSIGNED,
            Self::CourierAssignmentFailed => result_names::COURIER_ASSIGNMENT_FAILED,
            Self::CourierUnassigned => result_names::COURIER_UNASSIGNED,
        }
    }
}

impl FromStr for ResultKind {
    type Err = UnknownName;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| UnknownName(s.to_string()))
    }
}

impl fmt::Display for ResultKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_command_parses_from_its_wire_name() {
        for kind in CommandKind::ALL {
            assert_eq!(kind.as_str().parse::<CommandKind>(), Ok(kind));
        }
    }

    #[test]
    fn every_result_parses_from_its_wire_name() {
        for kind in ResultKind::ALL {
            assert_eq!(kind.as_str().parse::<ResultKind>(), Ok(kind));
        }
    }

    #[test]
    fn unknown_command_is_rejected() {
        let err = "unknown.command".parse::<CommandKind>().unwrap_err();
        assert_eq!(err, UnknownName("unknown.command".to_string()));
    }

    #[test]
    fn command_names_are_case_sensitive() {
        assert!("CREATE_ORDER.ASSIGN_COURIER".parse::<CommandKind>().is_err());
    }
}
