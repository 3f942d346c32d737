//! Sequential scan: the reference algorithm evaluating every query against
//! every stored object, with text-stream ingestion and a staged parallel
//! pipeline for batch k-NN.

use std::io::{BufRead, Write};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use ahash::AHashMap;
use crossbeam::channel::{Receiver, bounded};
use metrisch_types::distance::{DistanceStats, distance_with_threshold};
use metrisch_types::object::LocalObject;
use metrisch_types::text::{DEFAULT_REGISTRY, TextObjectStream, read_object, write_object};
use metrisch_utils::parallel::partition_groups;
use parking_lot::{Mutex, RwLock};

use crate::algorithm::{
    Algorithm, AlgorithmSnapshot, ExecutorTable, ProcessContext,
};
use crate::errors::EngineError;
use crate::operation::{
    BatchKnnQuery, CandidateSetOperation, GetObjectQuery, InsertOperation, KnnQuery, Operation,
    OperationCode, OperationKind, RangeQuery, RankedAnswer, expect_operation,
};
use crate::processor::{
    AsyncNavigationProcessor, NavigationProcessor, StepOutcome, StepTask, run_processor,
    run_processor_parallel,
};

/// A chunk of objects staged between the data reader and the query workers.
type Chunk = Arc<Vec<Arc<dyn LocalObject>>>;

/// Tunables of a sequential scan instance.
#[derive(Debug, Clone)]
pub struct ScanConfig {
    /// Objects staged per chunk.
    pub chunk_size: usize,
    /// Query worker threads for batch k-NN and the refinement pool size.
    pub pool_size: usize,
    /// Staged chunks a worker may lag behind the reader.
    pub channel_depth: usize,
    /// Inserting past this limit still succeeds but reports
    /// `SoftCapacityExceeded`.
    pub soft_capacity: Option<usize>,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            chunk_size: 1000,
            pool_size: rayon::current_num_threads(),
            channel_depth: 3,
            soft_capacity: None,
        }
    }
}

/// Brute-force scan over an in-memory object list.
#[derive(Debug)]
pub struct SequentialScan {
    name: String,
    objects: RwLock<Vec<Arc<dyn LocalObject>>>,
    config: ScanConfig,
    executor: ExecutorTable<SequentialScan>,
    pool: rayon::ThreadPool,
    write_flag: Arc<AtomicBool>,
}

impl SequentialScan {
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_config(name, ScanConfig::default())
    }

    pub fn with_config(name: impl Into<String>, config: ScanConfig) -> Self {
        let mut executor = ExecutorTable::new();
        executor.register(OperationKind::Insert, SequentialScan::handle_insert);
        executor.register(OperationKind::Knn, SequentialScan::handle_knn);
        executor.register(OperationKind::Range, SequentialScan::handle_range);
        executor.register(OperationKind::GetObject, SequentialScan::handle_get);
        executor.register(OperationKind::BatchKnn, SequentialScan::handle_batch_knn);
        executor.register(
            OperationKind::CandidateSet,
            SequentialScan::handle_candidate,
        );
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(config.pool_size.max(1))
            .build()
            .expect("could not build the scan thread pool");
        Self {
            name: name.into(),
            objects: RwLock::new(Vec::new()),
            config,
            executor,
            pool,
            write_flag: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Bulk-loads every object of the given type from a text file.
    #[tracing::instrument(skip_all, fields(path = %path.as_ref().display()))]
    pub fn from_text_file(
        name: impl Into<String>,
        config: ScanConfig,
        path: impl AsRef<Path>,
        tag: &str,
    ) -> Result<Self, EngineError> {
        let scan = Self::with_config(name, config);
        let mut stream = TextObjectStream::open(path, tag)?;
        let mut loaded = 0usize;
        while let Some(object) = stream.next_object(&DEFAULT_REGISTRY)? {
            scan.objects.write().push(Arc::from(object));
            loaded += 1;
        }
        tracing::debug!("loaded {loaded} objects into {}", scan.name);
        Ok(scan)
    }

    pub fn object_count(&self) -> usize {
        self.objects.read().len()
    }

    /// Direct insertion bypassing the operation layer, for bulk loading.
    pub fn insert_object(&self, object: Arc<dyn LocalObject>) {
        self.objects.write().push(object);
        self.mark_dirty();
    }

    pub fn config(&self) -> &ScanConfig {
        &self.config
    }

    /// Set whenever the stored objects change; snapshot schedulers reset it.
    pub fn write_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.write_flag)
    }

    fn mark_dirty(&self) {
        let _ = self
            .write_flag
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst);
    }

    fn objects_snapshot(&self) -> Vec<Arc<dyn LocalObject>> {
        self.objects.read().clone()
    }

    fn locator_index(&self) -> AHashMap<String, Arc<dyn LocalObject>> {
        self.objects
            .read()
            .iter()
            .filter_map(|object| {
                object
                    .header()
                    .locator()
                    .map(|locator| (locator.to_owned(), Arc::clone(object)))
            })
            .collect()
    }

    fn handle_insert(
        &self,
        operation: &mut dyn Operation,
        _context: &ProcessContext,
    ) -> Result<(), EngineError> {
        let insert = expect_operation::<InsertOperation>(operation)?;
        let object = Arc::clone(insert.object());
        let code = {
            let mut objects = self.objects.write();
            objects.push(object);
            match self.config.soft_capacity {
                Some(limit) if objects.len() > limit => OperationCode::SoftCapacityExceeded,
                _ => OperationCode::ObjectInserted,
            }
        };
        self.mark_dirty();
        insert.header_mut().end(code)
    }

    #[tracing::instrument(skip_all)]
    fn handle_knn(
        &self,
        operation: &mut dyn Operation,
        context: &ProcessContext,
    ) -> Result<(), EngineError> {
        let objects = self.objects_snapshot();
        let knn = expect_operation::<KnnQuery>(operation)?;
        let mut processor = ChunkEvalProcessor {
            chunks: objects.chunks(self.config.chunk_size.max(1)),
            evaluate: |candidate: &Arc<dyn LocalObject>| knn.evaluate(candidate).map(|_| ()),
        };
        run_processor(&mut processor, context)
    }

    #[tracing::instrument(skip_all)]
    fn handle_range(
        &self,
        operation: &mut dyn Operation,
        context: &ProcessContext,
    ) -> Result<(), EngineError> {
        let objects = self.objects_snapshot();
        let range = expect_operation::<RangeQuery>(operation)?;
        let mut processor = ChunkEvalProcessor {
            chunks: objects.chunks(self.config.chunk_size.max(1)),
            evaluate: |candidate: &Arc<dyn LocalObject>| range.evaluate(candidate).map(|_| ()),
        };
        run_processor(&mut processor, context)
    }

    fn handle_get(
        &self,
        operation: &mut dyn Operation,
        context: &ProcessContext,
    ) -> Result<(), EngineError> {
        let objects = self.objects_snapshot();
        let get = expect_operation::<GetObjectQuery>(operation)?;
        for chunk in objects.chunks(self.config.chunk_size.max(1)) {
            if context.interrupted() {
                return Err(EngineError::Interrupted);
            }
            for candidate in chunk {
                if get.evaluate(candidate) {
                    return Ok(());
                }
            }
        }
        Ok(())
    }

    /// Batch k-NN with staged data: one reader thread broadcasts chunks of
    /// the stored objects into a bounded channel per query worker, so disk
    /// and decoding never wait for distance computation (and vice versa).
    #[tracing::instrument(skip_all)]
    fn handle_batch_knn(
        &self,
        operation: &mut dyn Operation,
        context: &ProcessContext,
    ) -> Result<(), EngineError> {
        let objects = self.objects_snapshot();
        let batch = expect_operation::<BatchKnnQuery>(operation)?;
        let total = batch.operation_count();
        if total == 0 {
            return Ok(());
        }

        let workers = self.config.pool_size.max(1);
        let chunk_size = self.config.chunk_size.max(1);
        let depth = self.config.channel_depth.max(1);

        let reader_failed = Arc::new(AtomicBool::new(false));
        let worker_failed = Arc::new(AtomicBool::new(false));

        let group_ranges = partition_groups(total, workers);
        let mut groups: Vec<&mut [KnnQuery]> = Vec::with_capacity(group_ranges.len());
        let mut rest = batch.operations_mut();
        for range in &group_ranges {
            let (group, tail) = std::mem::take(&mut rest).split_at_mut(range.len());
            groups.push(group);
            rest = tail;
        }
        debug_assert!(rest.is_empty(), "group ranges must cover every sub-query");
        let mut senders = Vec::with_capacity(groups.len());
        let mut receivers = Vec::with_capacity(groups.len());
        for _ in 0..groups.len() {
            let (sender, receiver) = bounded::<Chunk>(depth);
            senders.push(sender);
            receivers.push(receiver);
        }

        std::thread::scope(|scope| {
            {
                let reader_failed = Arc::clone(&reader_failed);
                let context = context.clone();
                let objects = &objects;
                let mut senders = senders;
                scope.spawn(move || {
                    let outcome = catch_unwind(AssertUnwindSafe(|| {
                        for chunk in objects.chunks(chunk_size) {
                            if context.interrupted() {
                                break;
                            }
                            let staged: Chunk = Arc::new(chunk.to_vec());
                            senders.retain(|sender| sender.send(Arc::clone(&staged)).is_ok());
                            if senders.is_empty() {
                                break;
                            }
                        }
                    }));
                    if outcome.is_err() {
                        reader_failed.store(true, Ordering::SeqCst);
                        tracing::error!("batch data reader failed");
                    }
                    let sentinel: Chunk = Arc::new(Vec::new());
                    for sender in &senders {
                        let _ = sender.send(Arc::clone(&sentinel));
                    }
                });
            }

            for (group, receiver) in groups.into_iter().zip(receivers) {
                let context = context.clone();
                let worker_failed = Arc::clone(&worker_failed);
                scope.spawn(move || {
                    let outcome = catch_unwind(AssertUnwindSafe(|| {
                        batch_worker_loop(group, &receiver, &context);
                    }));
                    if outcome.is_err() {
                        worker_failed.store(true, Ordering::SeqCst);
                        tracing::error!("batch query worker failed, partial answers kept");
                    }
                });
            }
        });

        let reader_failed = reader_failed.load(Ordering::SeqCst);
        let worker_failed = worker_failed.load(Ordering::SeqCst);
        let interrupted = context.interrupted();
        for query in batch.operations_mut() {
            if query.header().code().is_terminal() {
                continue;
            }
            let code = if reader_failed {
                OperationCode::Failed
            } else if interrupted {
                OperationCode::Interrupted
            } else {
                OperationCode::ResponseReturned
            };
            let _ = query.header_mut().end(code);
        }
        if interrupted {
            return Err(EngineError::Interrupted);
        }
        if reader_failed || worker_failed {
            batch.header_mut().end(OperationCode::Failed)?;
        }
        Ok(())
    }

    /// Refines proposed candidate locators against the query on the pool;
    /// each drained batch is an independent unit of work.
    #[tracing::instrument(skip_all)]
    fn handle_candidate(
        &self,
        operation: &mut dyn Operation,
        context: &ProcessContext,
    ) -> Result<(), EngineError> {
        let index = Arc::new(self.locator_index());
        let candidate = expect_operation::<CandidateSetOperation>(operation)?;
        let stats = Arc::new(Mutex::new(DistanceStats::default()));
        let mut processor = CandidateRefineProcessor {
            receiver: candidate.take_handle(),
            index,
            query: Arc::clone(candidate.query()),
            answer: candidate.shared_answer(),
            stats: Arc::clone(&stats),
            done: false,
        };
        let result = run_processor_parallel(&mut processor, &self.pool, context);
        candidate
            .header_mut()
            .stats_mut()
            .distances
            .merge(&stats.lock());
        result
    }
}

impl Algorithm for SequentialScan {
    fn name(&self) -> &str {
        &self.name
    }

    fn operation_executor(&self) -> &ExecutorTable<Self> {
        &self.executor
    }
}

impl AlgorithmSnapshot for SequentialScan {
    /// Dump format: per object, one line with the wire type tag followed by
    /// the object's text form.
    fn write_snapshot(&self, writer: &mut dyn Write) -> Result<(), EngineError> {
        for object in self.objects.read().iter() {
            writeln!(writer, "{}", object.type_tag()).map_err(EngineError::IoFailure)?;
            write_object(object.as_ref(), writer)?;
        }
        Ok(())
    }

    fn read_snapshot(name: &str, reader: &mut dyn BufRead) -> Result<Self, EngineError> {
        let scan = SequentialScan::new(name);
        loop {
            let mut tag = String::new();
            if reader.read_line(&mut tag).map_err(EngineError::IoFailure)? == 0 {
                break;
            }
            let tag = tag.trim();
            if tag.is_empty() {
                continue;
            }
            let Some(object) = read_object(reader, tag, &DEFAULT_REGISTRY)? else {
                return Err(EngineError::InvalidArgument(format!(
                    "snapshot names type {tag} but holds no object"
                )));
            };
            scan.objects.write().push(Arc::from(object));
        }
        Ok(scan)
    }
}

/// Sequential traversal evaluating one query per chunk step.
struct ChunkEvalProcessor<'a, F> {
    chunks: std::slice::Chunks<'a, Arc<dyn LocalObject>>,
    evaluate: F,
}

impl<F> NavigationProcessor for ChunkEvalProcessor<'_, F>
where
    F: FnMut(&Arc<dyn LocalObject>) -> Result<(), EngineError>,
{
    fn process_step(&mut self, _context: &ProcessContext) -> Result<StepOutcome, EngineError> {
        let Some(chunk) = self.chunks.next() else {
            return Ok(StepOutcome::Finished);
        };
        for candidate in chunk {
            (self.evaluate)(candidate)?;
        }
        Ok(StepOutcome::Continue)
    }
}

/// Consumes staged chunks until the sentinel, evaluating every live
/// sub-query of the group against every chunk object. Cancellation is
/// observed between chunks, per sub-query.
fn batch_worker_loop(
    group: &mut [KnnQuery],
    receiver: &Receiver<Chunk>,
    context: &ProcessContext,
) {
    loop {
        let chunk = match receiver.recv() {
            Ok(chunk) => chunk,
            Err(_) => return,
        };
        if chunk.is_empty() {
            return;
        }
        let mut live = 0usize;
        for query in group.iter_mut() {
            if query.header().code().is_terminal() {
                continue;
            }
            if context.interrupted() || query.header().interrupted() {
                let _ = query.header_mut().end(OperationCode::Interrupted);
                continue;
            }
            let mut failed = false;
            for candidate in chunk.iter() {
                if let Err(error) = query.evaluate(candidate) {
                    tracing::error!("sub-query evaluation failed: {error}");
                    let _ = query.header_mut().end(OperationCode::Failed);
                    failed = true;
                    break;
                }
            }
            if !failed {
                live += 1;
            }
        }
        // All sub-queries settled; dropping the receiver lets the reader
        // skip this channel.
        if live == 0 {
            return;
        }
    }
}

/// Drains candidate batches and refines them against the storage index.
struct CandidateRefineProcessor {
    receiver: Receiver<Vec<String>>,
    index: Arc<AHashMap<String, Arc<dyn LocalObject>>>,
    query: Arc<dyn LocalObject>,
    answer: Arc<RankedAnswer>,
    stats: Arc<Mutex<DistanceStats>>,
    done: bool,
}

impl CandidateRefineProcessor {
    fn next_batch(&mut self) -> Option<Vec<String>> {
        if self.done {
            return None;
        }
        let batch = self.receiver.recv().unwrap_or_default();
        if batch.is_empty() {
            self.done = true;
            return None;
        }
        Some(batch)
    }
}

fn refine_candidates(
    index: &AHashMap<String, Arc<dyn LocalObject>>,
    query: &Arc<dyn LocalObject>,
    answer: &RankedAnswer,
    locators: Vec<String>,
    stats: &Mutex<DistanceStats>,
) -> Result<(), EngineError> {
    let mut local = DistanceStats::default();
    for locator in locators {
        let Some(candidate) = index.get(&locator) else {
            continue;
        };
        let threshold = answer.threshold();
        let distance =
            distance_with_threshold(query.as_ref(), candidate.as_ref(), threshold, &mut local)?;
        if distance <= threshold {
            answer.add(candidate, distance);
        }
    }
    stats.lock().merge(&local);
    Ok(())
}

impl NavigationProcessor for CandidateRefineProcessor {
    fn process_step(&mut self, _context: &ProcessContext) -> Result<StepOutcome, EngineError> {
        let Some(batch) = self.next_batch() else {
            return Ok(StepOutcome::Finished);
        };
        refine_candidates(&self.index, &self.query, &self.answer, batch, &self.stats)?;
        Ok(StepOutcome::Continue)
    }
}

impl AsyncNavigationProcessor for CandidateRefineProcessor {
    fn next_step_task(&mut self) -> Option<StepTask> {
        let batch = self.next_batch()?;
        let index = Arc::clone(&self.index);
        let query = Arc::clone(&self.query);
        let answer = Arc::clone(&self.answer);
        let stats = Arc::clone(&self.stats);
        Some(Box::new(move |_context| {
            refine_candidates(&index, &query, &answer, batch, &stats)
        }))
    }
}
