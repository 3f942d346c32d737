//! Algorithm contract and name-bound operation dispatch.

mod host;
pub mod seq_scan;

pub use host::{AlgorithmHost, BackgroundHandle, RunningOperation};

use std::collections::HashMap;
use std::io::{BufRead, Write};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::errors::EngineError;
use crate::operation::{Operation, OperationKind};

/// Execution-scoped context passed through every processing call: the
/// cooperative cancellation flag of the current run.
#[derive(Debug, Clone, Default)]
pub struct ProcessContext {
    interrupt: Arc<AtomicBool>,
}

impl ProcessContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Context wired to an existing flag, typically an operation's own.
    pub fn with_flag(interrupt: Arc<AtomicBool>) -> Self {
        Self { interrupt }
    }

    pub fn interrupted(&self) -> bool {
        self.interrupt.load(Ordering::Relaxed)
    }

    pub fn interrupt(&self) {
        self.interrupt.store(true, Ordering::Relaxed);
    }
}

/// Handler bound to one operation kind of a concrete algorithm.
pub type OperationHandler<A> =
    fn(&A, &mut dyn Operation, &ProcessContext) -> Result<(), EngineError>;

/// Dispatch table from operation kind to handler, populated by explicit
/// registration at construction.
pub struct ExecutorTable<A> {
    handlers: HashMap<OperationKind, OperationHandler<A>>,
}

impl<A> ExecutorTable<A> {
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    pub fn register(&mut self, kind: OperationKind, handler: OperationHandler<A>) {
        self.handlers.insert(kind, handler);
    }

    /// Most specific handler: the exact kind first, then the declared
    /// supertype chain.
    pub fn resolve(&self, kind: OperationKind) -> Option<OperationHandler<A>> {
        kind.ancestry()
            .find_map(|candidate| self.handlers.get(&candidate).copied())
    }

    /// Kinds with a direct binding, for introspection.
    pub fn supported(&self) -> Vec<OperationKind> {
        self.handlers.keys().copied().collect()
    }
}

impl<A> Default for ExecutorTable<A> {
    fn default() -> Self {
        Self::new()
    }
}

impl<A> std::fmt::Debug for ExecutorTable<A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutorTable")
            .field("supported", &self.supported())
            .finish()
    }
}

/// A search algorithm able to execute the operations it registered for.
pub trait Algorithm: Send + Sync + Sized + 'static {
    /// Immutable name identifying the algorithm instance.
    fn name(&self) -> &str;

    fn operation_executor(&self) -> &ExecutorTable<Self>;

    fn supported_operations(&self) -> Vec<OperationKind> {
        self.operation_executor().supported()
    }
}

/// Dispatches the operation to the most specific registered handler.
#[tracing::instrument(skip_all, fields(operation = %operation.kind()))]
pub fn execute_operation<A: Algorithm>(
    algorithm: &A,
    operation: &mut dyn Operation,
    context: &ProcessContext,
) -> Result<(), EngineError> {
    let handler = algorithm
        .operation_executor()
        .resolve(operation.kind())
        .ok_or(EngineError::NotSupported(operation.kind()))?;
    handler(algorithm, operation, context)
}

/// Ability to dump the whole algorithm state into an opaque snapshot and
/// rebuild from it. Concurrency primitives are never part of the snapshot;
/// the host reconstructs them on load.
pub trait AlgorithmSnapshot: Algorithm {
    fn write_snapshot(&self, writer: &mut dyn Write) -> Result<(), EngineError>;

    fn read_snapshot(name: &str, reader: &mut dyn BufRead) -> Result<Self, EngineError>;
}
