//! Concurrency layer wrapping an algorithm: bounded running-operation
//! count, termination registry, background execution and statistics hooks.

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use std::time::Instant;

use metrisch_types::id::UniqueId;
use metrisch_utils::parallel::Semaphore;
use metrisch_utils::persistence::write_snapshot;
use metrisch_utils::stats::{
    STAT_ACCESSED_OBJECTS, STAT_ANSWER_COUNT, STAT_ANSWER_DISTANCE, STAT_EXECUTION_MILLIS,
    OperationStats,
};

use crate::algorithm::{Algorithm, AlgorithmSnapshot, ProcessContext, execute_operation};
use crate::errors::EngineError;
use crate::operation::{Operation, OperationCode, OperationKind};

/// Default bound on concurrently running operations.
pub const DEFAULT_RUNNING_OPERATIONS: usize = 1024;

/// Registry entry of a live operation.
#[derive(Debug, Clone)]
pub struct RunningOperation {
    pub kind: OperationKind,
    pub started: Instant,
    interrupt: Arc<AtomicBool>,
}

/// Handle of an operation executing on a background thread.
#[derive(Debug)]
pub struct BackgroundHandle {
    id: UniqueId,
    join: JoinHandle<(Box<dyn Operation>, Result<(), EngineError>)>,
}

impl BackgroundHandle {
    pub fn id(&self) -> UniqueId {
        self.id
    }

    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }
}

/// Wraps an algorithm with the execution machinery.
#[derive(Debug)]
pub struct AlgorithmHost<A: Algorithm> {
    algorithm: Arc<A>,
    limit: Semaphore,
    running: flurry::HashMap<UniqueId, RunningOperation>,
}

impl<A: Algorithm> AlgorithmHost<A> {
    pub fn new(algorithm: A) -> Self {
        Self::with_limit(algorithm, DEFAULT_RUNNING_OPERATIONS)
    }

    pub fn with_limit(algorithm: A, running_limit: usize) -> Self {
        Self {
            algorithm: Arc::new(algorithm),
            limit: Semaphore::new(running_limit.max(1)),
            running: flurry::HashMap::new(),
        }
    }

    pub fn algorithm(&self) -> &A {
        &self.algorithm
    }

    /// Executes the operation on the calling thread, blocking for a permit
    /// when the running-operation limit is reached.
    ///
    /// Handler failures are captured into the operation's error code; only
    /// dispatch misses and argument errors surface as `Err`.
    #[tracing::instrument(skip_all, fields(algorithm = %self.algorithm.name()))]
    pub fn execute(&self, operation: &mut dyn Operation) -> Result<(), EngineError> {
        let _permit = self.limit.acquire();
        let _registered = self.register(operation);
        let context = ProcessContext::with_flag(operation.header().interrupt_flag());

        let started = Instant::now();
        let result = execute_operation(self.algorithm.as_ref(), operation, &context);
        operation.header_mut().stats_mut().execution_millis +=
            started.elapsed().as_millis() as u64;
        self.record_statistics(operation);

        match result {
            Ok(()) => {
                if !operation.header().code().is_terminal() {
                    operation.end_operation(OperationCode::ResponseReturned)?;
                }
                Ok(())
            }
            Err(error) => self.capture_failure(operation, error),
        }
    }

    /// Failure policy: interruption and infrastructure failures become the
    /// operation's terminal code; unsupported dispatch and bad arguments are
    /// also surfaced to the caller.
    fn capture_failure(
        &self,
        operation: &mut dyn Operation,
        error: EngineError,
    ) -> Result<(), EngineError> {
        let code = match &error {
            EngineError::Interrupted => OperationCode::Interrupted,
            EngineError::NotSupported(_) => OperationCode::NotSupported,
            _ => OperationCode::Failed,
        };
        if !operation.header().code().is_terminal() {
            // The first terminal transition wins; a failure after an end is
            // only logged.
            let _ = operation.end_operation(code);
        }
        match error {
            EngineError::Interrupted => Ok(()),
            EngineError::IoFailure(io) => {
                tracing::error!("operation failed on io: {io}");
                Ok(())
            }
            surfaced => Err(surfaced),
        }
    }

    /// Records derived aggregates into the operation parameters.
    fn record_statistics(&self, operation: &mut dyn Operation) {
        let stats = *operation.header().stats();
        let ranking = operation
            .ranked_answer()
            .map(|answer| (answer.len(), answer.entries().last().map(|e| e.distance)));
        let header = operation.header_mut();
        header.set_param(
            STAT_ACCESSED_OBJECTS,
            serde_json::json!(stats.accessed_objects()),
        );
        header.set_param(
            STAT_EXECUTION_MILLIS,
            serde_json::json!(stats.execution_millis),
        );
        if let Some((count, distance)) = ranking {
            header.set_param(STAT_ANSWER_COUNT, serde_json::json!(count));
            if let Some(distance) = distance {
                header.set_param(STAT_ANSWER_DISTANCE, serde_json::json!(distance));
            }
        }
    }

    fn register<'host>(&'host self, operation: &dyn Operation) -> RegistrationGuard<'host> {
        let targets = operation.interrupt_targets();
        let guard = self.running.guard();
        let mut ids = Vec::with_capacity(targets.len());
        let kind = operation.kind();
        for (id, interrupt) in targets {
            self.running.insert(
                id,
                RunningOperation {
                    kind,
                    started: Instant::now(),
                    interrupt,
                },
                &guard,
            );
            ids.push(id);
        }
        drop(guard);
        RegistrationGuard {
            registry: &self.running,
            ids,
        }
    }

    /// Snapshot of the live operations.
    pub fn running_operations(&self) -> Vec<(UniqueId, RunningOperation)> {
        let guard = self.running.guard();
        self.running
            .iter(&guard)
            .map(|(id, info)| (*id, info.clone()))
            .collect()
    }

    /// Cooperatively interrupts a running operation (or a batch
    /// sub-operation) by id.
    pub fn terminate_operation(&self, id: UniqueId) -> Result<(), EngineError> {
        let guard = self.running.guard();
        let info = self
            .running
            .get(&id, &guard)
            .ok_or(EngineError::UnknownOperation(id))?;
        info.interrupt.store(true, Ordering::Relaxed);
        tracing::debug!("operation {id} flagged for termination");
        Ok(())
    }
}

impl<A: Algorithm> AlgorithmHost<A> {
    /// Runs the operation on a dedicated thread, returning immediately.
    pub fn background_execute(self: &Arc<Self>, operation: Box<dyn Operation>) -> BackgroundHandle {
        let id = operation.header().id();
        let host = Arc::clone(self);
        let name = format!("{}-op", self.algorithm.name());
        let join = std::thread::Builder::new()
            .name(name)
            .spawn(move || {
                let mut operation = operation;
                let result = host.execute(operation.as_mut());
                (operation, result)
            })
            .expect("could not spawn background operation thread");
        BackgroundHandle { id, join }
    }

    /// Joins a background execution, merging the operation's statistics into
    /// the caller's scope. Failures surface here, at the join point.
    pub fn wait_background(
        &self,
        handle: BackgroundHandle,
        caller_stats: &mut OperationStats,
    ) -> Result<Box<dyn Operation>, EngineError> {
        let (operation, result) = handle.join.join().map_err(|_| {
            EngineError::InvalidArgument("background operation thread panicked".to_owned())
        })?;
        caller_stats.merge(operation.header().stats());
        result.map(|()| operation)
    }
}

impl<A: AlgorithmSnapshot> AlgorithmHost<A> {
    /// Persists the algorithm after quiescing: all permits are held, so no
    /// operation is in flight while the snapshot is written.
    pub fn store_to_file(&self, path: &Path) -> Result<(), EngineError> {
        let _quiesced = self.limit.acquire_all();
        write_snapshot(path, |writer| {
            self.algorithm
                .write_snapshot(writer)
                .map_err(|error| std::io::Error::other(error.to_string()))
        })
        .map_err(|error| EngineError::IoFailure(std::io::Error::other(error.to_string())))?;
        tracing::debug!(
            "algorithm {} persisted to {}",
            self.algorithm.name(),
            path.display()
        );
        Ok(())
    }

    /// Rebuilds a host around an algorithm restored from a snapshot file;
    /// the semaphore and registry are fresh.
    pub fn restore_from_file(
        name: &str,
        path: &Path,
        running_limit: usize,
    ) -> Result<Self, EngineError> {
        let file = std::fs::File::open(path)?;
        let mut reader = std::io::BufReader::new(file);
        let algorithm = A::read_snapshot(name, &mut reader)?;
        Ok(Self::with_limit(algorithm, running_limit))
    }
}

/// Removes registry entries when the execution scope ends, panics included.
struct RegistrationGuard<'host> {
    registry: &'host flurry::HashMap<UniqueId, RunningOperation>,
    ids: Vec<UniqueId>,
}

impl Drop for RegistrationGuard<'_> {
    fn drop(&mut self) {
        let guard = self.registry.guard();
        for id in &self.ids {
            self.registry.remove(id, &guard);
        }
    }
}
