//! Candidate-set refinement operation.
//!
//! An index proposes candidate locators into a bounded queue; the refining
//! algorithm drains them, evaluates the exact distance against the query
//! object and ranks the survivors. The empty batch is the terminal sentinel
//! signalling producer completion.

use std::any::Any;
use std::num::NonZeroUsize;
use std::sync::Arc;

use crossbeam::channel::{Receiver, Sender, bounded};
use metrisch_types::object::LocalObject;

use crate::errors::EngineError;
use crate::operation::answer::{AnswerType, RankedAnswer};
use crate::operation::{Operation, OperationHeader, OperationKind};

#[derive(Debug)]
pub struct CandidateSetOperation {
    header: OperationHeader,
    query: Arc<dyn LocalObject>,
    sender: Sender<Vec<String>>,
    receiver: Receiver<Vec<String>>,
    answer: Arc<RankedAnswer>,
}

impl CandidateSetOperation {
    pub fn new(query: Arc<dyn LocalObject>, k: NonZeroUsize, queue_capacity: NonZeroUsize) -> Self {
        let (sender, receiver) = bounded(queue_capacity.get());
        Self {
            header: OperationHeader::new(),
            query,
            sender,
            receiver,
            answer: Arc::new(RankedAnswer::bounded(k, AnswerType::FullData)),
        }
    }

    pub fn query(&self) -> &Arc<dyn LocalObject> {
        &self.query
    }

    pub fn answer(&self) -> &RankedAnswer {
        &self.answer
    }

    pub fn shared_answer(&self) -> Arc<RankedAnswer> {
        Arc::clone(&self.answer)
    }

    /// Blocking producer side; an empty batch marks the end of candidates.
    pub fn put(&self, locators: Vec<String>) -> Result<(), EngineError> {
        self.sender.send(locators).map_err(|_| {
            EngineError::InvalidArgument("candidate queue has no consumer left".to_owned())
        })
    }

    /// Signals producer completion to the consumers.
    pub fn finish_producing(&self) {
        let _ = self.sender.send(Vec::new());
    }

    /// Blocking consumer side; the empty batch means the producers are done.
    /// A disconnected queue counts as completion as well.
    pub fn take(&self) -> Vec<String> {
        self.receiver.recv().unwrap_or_default()
    }

    /// Consumer handle usable from worker tasks.
    pub fn take_handle(&self) -> Receiver<Vec<String>> {
        self.receiver.clone()
    }
}

impl Operation for CandidateSetOperation {
    fn header(&self) -> &OperationHeader {
        &self.header
    }

    fn header_mut(&mut self) -> &mut OperationHeader {
        &mut self.header
    }

    fn kind(&self) -> OperationKind {
        OperationKind::CandidateSet
    }

    fn ranked_answer(&self) -> Option<&RankedAnswer> {
        Some(&self.answer)
    }

    /// The clone shares the queue and the answer, so producers may keep
    /// feeding whichever copy they hold.
    fn clone_operation(&self) -> Box<dyn Operation> {
        Box::new(CandidateSetOperation {
            header: self.header.clone(),
            query: Arc::clone(&self.query),
            sender: self.sender.clone(),
            receiver: self.receiver.clone(),
            answer: Arc::clone(&self.answer),
        })
    }

    fn clear_surplus_data(&mut self) {
        self.answer.clear_surplus_data();
    }

    fn update_from(&mut self, other: &dyn Operation) -> Result<(), EngineError> {
        let Some(other) = other.downcast_ref::<CandidateSetOperation>() else {
            return Err(EngineError::InvalidArgument(
                "cannot merge a foreign operation of a different kind".to_owned(),
            ));
        };
        if !Arc::ptr_eq(&self.answer, &other.answer) {
            self.answer.merge_from(&other.answer);
        }
        self.header.merge_from(&other.header);
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use metrisch_types::vector::FloatVector;
    use pretty_assertions::assert_eq;

    fn capacity(n: usize) -> NonZeroUsize {
        NonZeroUsize::new(n).unwrap()
    }

    #[test]
    fn queue_delivers_batches_in_order_with_a_sentinel() {
        let query: Arc<dyn LocalObject> = Arc::new(FloatVector::new(vec![0.0]));
        let operation = CandidateSetOperation::new(query, capacity(5), capacity(2));

        operation.put(vec!["u/1".to_owned(), "u/2".to_owned()]).unwrap();
        operation.put(vec!["u/3".to_owned()]).unwrap();
        operation.finish_producing();

        assert_eq!(operation.take(), vec!["u/1".to_owned(), "u/2".to_owned()]);
        assert_eq!(operation.take(), vec!["u/3".to_owned()]);
        assert!(operation.take().is_empty());
    }

    #[test]
    fn bounded_queue_blocks_producers_until_drained() {
        let query: Arc<dyn LocalObject> = Arc::new(FloatVector::new(vec![0.0]));
        let operation = Arc::new(CandidateSetOperation::new(query, capacity(5), capacity(1)));
        operation.put(vec!["u/1".to_owned()]).unwrap();

        let producer = {
            let operation = Arc::clone(&operation);
            std::thread::spawn(move || {
                operation.put(vec!["u/2".to_owned()]).unwrap();
            })
        };
        std::thread::sleep(std::time::Duration::from_millis(20));
        assert!(!producer.is_finished());

        assert_eq!(operation.take(), vec!["u/1".to_owned()]);
        producer.join().unwrap();
        assert_eq!(operation.take(), vec!["u/2".to_owned()]);
    }
}
