//! Command dispatcher: the closed dispatch table from command name to use-case.
//!
//! Implemented as a `tower::Service<CommandEnvelope>` so the processor can wrap
//! it in the timeout and metrics layers.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use dispatch_core::codec::CodecError;
use dispatch_core::messages::{
    AssignCourier, CourierAssigned, CourierAssignmentFailed, CourierUnassigned, UnassignCourier,
};
use dispatch_core::{CommandEnvelope, CommandKind, ResultEnvelope, ResultKind};
use tower::Service;
use tracing::debug;

use crate::traits::{CourierUseCases, UseCaseError};

/// Why a command produced no result.
#[derive(Debug, thiserror::Error)]
pub enum HandleError {
    #[error("unrecognized command: {name}")]
    UnrecognizedCommand { name: String },
    #[error("malformed payload for {command}: {source}")]
    MalformedPayload {
        command: CommandKind,
        #[source]
        source: CodecError,
    },
    #[error("{command} failed: {source}")]
    UseCase {
        command: CommandKind,
        #[source]
        source: anyhow::Error,
    },
    #[error("could not build result for {command}: {source}")]
    Result {
        command: CommandKind,
        #[source]
        source: CodecError,
    },
    #[error("command handler timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },
}

impl HandleError {
    /// Short label for logs and metrics.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::UnrecognizedCommand { .. } => "unrecognized",
            Self::MalformedPayload { .. } => "malformed_payload",
            Self::UseCase { .. } => "use_case",
            Self::Result { .. } => "result",
            Self::Timeout { .. } => "timeout",
        }
    }
}

/// Outcome of handling one command: zero or one result.
pub type HandleOutcome = Result<Option<ResultEnvelope>, HandleError>;

/// Routes each command to the use-case bound to its name.
#[derive(Clone)]
pub struct CommandDispatcher {
    couriers: Arc<dyn CourierUseCases>,
}

impl CommandDispatcher {
    #[must_use]
    pub fn new(couriers: Arc<dyn CourierUseCases>) -> Self {
        Self { couriers }
    }

    /// Handles one command.
    ///
    /// Success and business failure both yield a result; internal use-case
    /// failures yield an error and nothing reaches the wire.
    ///
    /// # Errors
    ///
    /// See [`HandleError`]; `Timeout` is only produced by the timeout layer.
    pub async fn handle(&self, command: CommandEnvelope) -> HandleOutcome {
        let kind = command
            .kind()
            .map_err(|unknown| HandleError::UnrecognizedCommand { name: unknown.0 })?;

        match kind {
            CommandKind::AssignCourier => self.assign_courier(kind, &command).await,
            CommandKind::UnassignCourier => self.unassign_courier(kind, &command).await,
        }
    }

    async fn assign_courier(&self, kind: CommandKind, command: &CommandEnvelope) -> HandleOutcome {
        let request: AssignCourier = decode(kind, command)?;
        let order_id = request.order_id.clone();

        let result = match self.couriers.assign_courier(&command.context, request).await {
            Ok(courier_id) => {
                debug!(order_id = %order_id, courier_id = %courier_id, "courier assigned");
                ResultEnvelope::new(
                    ResultKind::CourierAssigned,
                    &CourierAssigned {
                        order_id,
                        courier_id,
                    },
                    command.context.clone(),
                )
            }
            Err(UseCaseError::NoEligibleCourier { order_id }) => {
                debug!(order_id = %order_id, "no eligible courier");
                ResultEnvelope::new(
                    ResultKind::CourierAssignmentFailed,
                    &CourierAssignmentFailed { order_id },
                    command.context.clone(),
                )
            }
            Err(UseCaseError::Internal(source)) => {
                return Err(HandleError::UseCase {
                    command: kind,
                    source,
                })
            }
        };

        result
            .map(Some)
            .map_err(|source| HandleError::Result {
                command: kind,
                source,
            })
    }

    async fn unassign_courier(
        &self,
        kind: CommandKind,
        command: &CommandEnvelope,
    ) -> HandleOutcome {
        let request: UnassignCourier = decode(kind, command)?;
        let order_id = request.order_id.clone();

        let released = self
            .couriers
            .unassign_courier(&command.context, request)
            .await
            .map_err(|err| HandleError::UseCase {
                command: kind,
                source: match err {
                    UseCaseError::Internal(source) => source,
                    other => anyhow::Error::new(other),
                },
            })?;

        let Some(courier_id) = released else {
            debug!(order_id = %order_id, "order had no courier");
            return Ok(None);
        };

        ResultEnvelope::new(
            ResultKind::CourierUnassigned,
            &CourierUnassigned {
                order_id,
                courier_id,
            },
            command.context.clone(),
        )
        .map(Some)
        .map_err(|source| HandleError::Result {
            command: kind,
            source,
        })
    }
}

fn decode<T: serde::de::DeserializeOwned>(
    kind: CommandKind,
    command: &CommandEnvelope,
) -> Result<T, HandleError> {
    command
        .decode_payload()
        .map_err(|source| HandleError::MalformedPayload {
            command: kind,
            source,
        })
}

impl Service<CommandEnvelope> for CommandDispatcher {
    type Response = Option<ResultEnvelope>;
    type Error = HandleError;
    type Future = Pin<Box<dyn Future<Output = HandleOutcome> + Send>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, command: CommandEnvelope) -> Self::Future {
        let dispatcher = self.clone();
        Box::pin(async move { dispatcher.handle(command).await })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
