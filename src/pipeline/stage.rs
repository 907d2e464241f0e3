//! Core stage abstraction and runner for the turn pipeline.

use crate::pipeline::error::{ErrorReporter, StationError};
use crate::protocol::ServerMessage;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::mpsc;

/// A long-lived processing stage.
///
/// Each stage consumes one input queue and owns whatever senders it needs
/// downstream (the next stage's queue, the client outbox).
#[async_trait]
pub trait Stage: Send + 'static {
    /// The input type this stage receives.
    type Input: Send + 'static;

    /// Processes a single input item.
    ///
    /// A `Recoverable` error drops the item; a `Fatal` error stops the stage.
    async fn process(&mut self, input: Self::Input) -> Result<(), StationError>;

    /// Returns the name of this stage for logging and error reporting.
    fn name(&self) -> &'static str;

    /// Called once the input queue is closed or the stage failed fatally.
    async fn shutdown(&mut self) {}
}

/// Main processing loop for a stage. Returns the stage name when it stops.
pub async fn run_stage<S: Stage>(
    mut stage: S,
    mut input_rx: mpsc::Receiver<S::Input>,
    error_reporter: Arc<dyn ErrorReporter>,
) -> &'static str {
    let name = stage.name();
    tracing::debug!(stage = name, "Stage started");

    while let Some(input) = input_rx.recv().await {
        match stage.process(input).await {
            Ok(()) => {}
            Err(err @ StationError::Recoverable(_)) => {
                error_reporter.report(name, &err);
            }
            Err(err @ StationError::Fatal(_)) => {
                error_reporter.report(name, &err);
                break;
            }
        }
    }

    stage.shutdown().await;
    tracing::debug!(stage = name, "Stage stopped");
    name
}

/// Send into a downstream queue; a closed queue is fatal.
pub async fn forward<T>(tx: &mpsc::Sender<T>, item: T, queue: &str) -> Result<(), StationError> {
    tx.send(item)
        .await
        .map_err(|_| StationError::queue_closed(queue))
}

/// Bounded queue of messages to the client socket.
#[derive(Debug, Clone)]
pub struct Outbox {
    tx: mpsc::Sender<ServerMessage>,
}

impl Outbox {
    pub fn new(tx: mpsc::Sender<ServerMessage>) -> Self {
        Self { tx }
    }

    /// Queue a message; fails fatally once the client is gone.
    pub async fn send(&self, message: ServerMessage) -> Result<(), StationError> {
        self.tx
            .send(message)
            .await
            .map_err(|_| StationError::disconnected())
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}
