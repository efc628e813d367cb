//! Per-direction processing pipelines.
//!
//! Inbound bytes and outbound packets flow through an ordered chain of
//! [`Processor`]s held by a [`ProcessingSettings`]. Each pass is driven by a
//! [`ProcessingContext`], which owns the pipeline cursor, the current buffer
//! and any cross-processor scratch state.

mod context;
mod settings;

use std::{fmt, sync::Arc};

pub use context::{ContextPool, ProcessingContext};
pub use settings::{PendingQueues, ProcessingSettings};

use crate::connection::Connection;

/// Outcome of a single processor invocation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ProcessingState {
    /// The processor handled the data; continue with the next one.
    Success,
    /// The processor declined the data; continue with the next one.
    Failure,
    /// Processing of the current data is finished.
    Stop,
    /// More bytes are required before the current segment can be handled.
    ///
    /// Only meaningful while decoding.
    InsufficientData,
    /// Park the current segment and retry it on a later receive pass.
    HandleLater,
}

/// Direction a [`ProcessingSettings`] serves.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ProcessingType {
    /// Outgoing packets are encoded into bytes.
    Encoding,
    /// Incoming bytes are decoded into protocol state.
    Decoding,
}

impl ProcessingType {
    pub(crate) fn as_str(self) -> &'static str {
        match self {
            ProcessingType::Encoding => "encoding",
            ProcessingType::Decoding => "decoding",
        }
    }
}

type ProcessorFn =
    dyn Fn(&Connection, &mut ProcessingContext<'_>) -> ProcessingState + Send + Sync + 'static;

/// A named pipeline step.
///
/// Processors compare equal when their names match, so a protocol module can
/// remove or position its own steps without holding on to the original
/// closure.
///
/// ```
/// use brokerframe::processing::{ProcessingState, Processor};
///
/// let stop_on_empty = Processor::new("stop-on-empty", |_conn, ctx| {
///     if ctx.buffer().is_none_or(|b| b.is_empty()) {
///         ProcessingState::Stop
///     } else {
///         ProcessingState::Success
///     }
/// });
/// assert_eq!(stop_on_empty.name(), "stop-on-empty");
/// ```
#[derive(Clone)]
pub struct Processor {
    name: &'static str,
    handler: Arc<ProcessorFn>,
}

impl Processor {
    /// Wrap `handler` as a processor identified by `name`.
    pub fn new<F>(name: &'static str, handler: F) -> Self
    where
        F: Fn(&Connection, &mut ProcessingContext<'_>) -> ProcessingState + Send + Sync + 'static,
    {
        Self {
            name,
            handler: Arc::new(handler),
        }
    }

    /// Name identifying this processor within a pipeline.
    #[must_use]
    pub fn name(&self) -> &'static str { self.name }

    /// Invoke the processor.
    pub fn process(
        &self,
        connection: &Connection,
        context: &mut ProcessingContext<'_>,
    ) -> ProcessingState {
        (self.handler)(connection, context)
    }
}

impl PartialEq for Processor {
    fn eq(&self, other: &Self) -> bool { self.name == other.name }
}

impl Eq for Processor {}

impl fmt::Debug for Processor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Processor").field(&self.name).finish()
    }
}
