use async_trait::async_trait;
use dispatch_core::messages::{AssignCourier, UnassignCourier};
use dispatch_core::{CausalContext, CourierId, OrderId};

use crate::broker::{BrokerError, BrokerMessage, OutboundMessage};

/// Consuming side of a broker client, bound to one topic.
/// Implementations: in-memory topic (tests), newline-delimited stdin.
#[async_trait]
pub trait MessageSource: Send + Sync {
    /// Wait for the next raw message.
    ///
    /// Must be cancel-safe: the reader abandons the returned future on
    /// shutdown, and dropping it must not lose a message that was not returned.
    async fn read_message(&self) -> Result<BrokerMessage, BrokerError>;

    /// Release the client's resources. Called by the owner after the reader stops.
    async fn close(&self) -> Result<(), BrokerError>;
}

/// Producing side of a broker client.
#[async_trait]
pub trait MessageSink: Send + Sync {
    /// Publish a batch of messages. Either all are accepted or an error is returned.
    async fn write_messages(&self, messages: Vec<OutboundMessage>) -> Result<(), BrokerError>;

    /// Flush and release the client's resources.
    async fn close(&self) -> Result<(), BrokerError>;
}

/// Courier use-cases invoked by the command dispatcher.
/// Implementations: in-memory courier pool; a persistent store lives outside this crate.
#[async_trait]
pub trait CourierUseCases: Send + Sync {
    /// Assign a courier to the order and return it.
    ///
    /// Returns [`UseCaseError::NoEligibleCourier`] when nobody is available;
    /// that outcome is published as a failure result, not treated as an error.
    async fn assign_courier(
        &self,
        ctx: &CausalContext,
        request: AssignCourier,
    ) -> Result<CourierId, UseCaseError>;

    /// Release the courier held by the order, if any.
    async fn unassign_courier(
        &self,
        ctx: &CausalContext,
        request: UnassignCourier,
    ) -> Result<Option<CourierId>, UseCaseError>;
}

/// Outcome of a use-case that did not succeed.
#[derive(Debug, thiserror::Error)]
pub enum UseCaseError {
    /// Business-level failure: a valid domain event for downstream consumers.
    #[error("no eligible courier for order {order_id}")]
    NoEligibleCourier { order_id: OrderId },
    /// Anything else (storage down, invariant broken). Never reaches the wire.
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}
