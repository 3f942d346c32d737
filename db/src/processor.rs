//! Navigation processors: the traversal plan of one operation over one
//! algorithm, split into independent units of work.

use parking_lot::Mutex;

use crate::algorithm::ProcessContext;
use crate::errors::EngineError;

/// Result of advancing a processor by one unit of work.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    Continue,
    Finished,
}

/// Traversal plan advanced one step at a time on the caller thread.
pub trait NavigationProcessor {
    fn process_step(&mut self, context: &ProcessContext) -> Result<StepOutcome, EngineError>;
}

/// A self-contained unit of work extracted from an asynchronous processor.
pub type StepTask = Box<dyn FnOnce(&ProcessContext) -> Result<(), EngineError> + Send>;

/// Processor whose steps may run concurrently.
///
/// Both execution forms must produce an equivalent final operation state
/// given the same input; tasks therefore update shared operation state
/// (answers, counters) through their own synchronization.
pub trait AsyncNavigationProcessor: NavigationProcessor {
    /// Next independent unit of work, or `None` when the traversal is
    /// exhausted.
    fn next_step_task(&mut self) -> Option<StepTask>;
}

/// Runs the processor to completion on the caller thread, observing
/// cancellation between steps. A partial answer accumulated before an
/// interruption stays valid.
pub fn run_processor<P: NavigationProcessor + ?Sized>(
    processor: &mut P,
    context: &ProcessContext,
) -> Result<(), EngineError> {
    loop {
        if context.interrupted() {
            return Err(EngineError::Interrupted);
        }
        match processor.process_step(context)? {
            StepOutcome::Continue => {}
            StepOutcome::Finished => return Ok(()),
        }
    }
}

/// Runs an asynchronous processor with its steps submitted to the pool.
///
/// The scope joins every spawned step before returning; a failing step is
/// recorded and surfaced once all in-flight work has settled.
pub fn run_processor_parallel<P: AsyncNavigationProcessor + ?Sized + Send>(
    processor: &mut P,
    pool: &rayon::ThreadPool,
    context: &ProcessContext,
) -> Result<(), EngineError> {
    let failure: Mutex<Option<EngineError>> = Mutex::new(None);
    pool.scope(|scope| {
        while let Some(task) = processor.next_step_task() {
            if context.interrupted() {
                break;
            }
            let failure = &failure;
            let context = context.clone();
            scope.spawn(move |_| {
                if let Err(error) = task(&context) {
                    tracing::error!("navigation step failed: {error}");
                    let mut slot = failure.lock();
                    if slot.is_none() {
                        *slot = Some(error);
                    }
                }
            });
        }
    });
    if context.interrupted() {
        return Err(EngineError::Interrupted);
    }
    match failure.into_inner() {
        Some(error) => Err(error),
        None => Ok(()),
    }
}
