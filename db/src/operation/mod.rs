//! The operation model: every unit of work submitted to an algorithm is an
//! operation carrying its own identity, terminal error code, parameter map
//! and statistics scope.

mod answer;
mod batch;
mod candidate;
mod insert;
mod query;

pub use answer::{AnswerObject, AnswerType, RankedAnswer, RankedEntry};
pub use batch::BatchKnnQuery;
pub use candidate::CandidateSetOperation;
pub use insert::InsertOperation;
pub use query::{GetObjectQuery, KnnQuery, RangeQuery};

use std::any::Any;
use std::collections::BTreeMap;
use std::fmt::Debug;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use metrisch_types::id::UniqueId;
use metrisch_utils::stats::OperationStats;
use serde::{Deserialize, Serialize};

use crate::errors::EngineError;

/// Terminal-state code of an operation.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display,
)]
pub enum OperationCode {
    NotStarted,
    ObjectInserted,
    SoftCapacityExceeded,
    ResponseReturned,
    NotSupported,
    Interrupted,
    Failed,
}

impl OperationCode {
    pub fn is_terminal(self) -> bool {
        !matches!(self, OperationCode::NotStarted)
    }

    /// Soft-capacity overflow still inserts the object, so it counts as a
    /// success with a warning code.
    pub fn is_success(self) -> bool {
        matches!(
            self,
            OperationCode::ObjectInserted
                | OperationCode::SoftCapacityExceeded
                | OperationCode::ResponseReturned
        )
    }
}

/// Kind of an operation together with its declared supertype chain, used by
/// the dispatch table in place of runtime reflection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display)]
pub enum OperationKind {
    Operation,
    Query,
    Ranking,
    Knn,
    Range,
    GetObject,
    Insert,
    BatchKnn,
    CandidateSet,
}

impl OperationKind {
    pub fn parent(self) -> Option<OperationKind> {
        match self {
            OperationKind::Operation => None,
            OperationKind::Query | OperationKind::Insert | OperationKind::BatchKnn => {
                Some(OperationKind::Operation)
            }
            OperationKind::Ranking | OperationKind::GetObject => Some(OperationKind::Query),
            OperationKind::Knn | OperationKind::Range | OperationKind::CandidateSet => {
                Some(OperationKind::Ranking)
            }
        }
    }

    /// The kind itself followed by its supertypes up to the root.
    pub fn ancestry(self) -> impl Iterator<Item = OperationKind> {
        std::iter::successors(Some(self), |kind| kind.parent())
    }

    pub fn is_ranking(self) -> bool {
        self.ancestry().any(|kind| kind == OperationKind::Ranking)
    }
}

/// Identity, code, parameters, statistics and the cooperative interrupt
/// flag shared by every operation.
#[derive(Debug, Clone)]
pub struct OperationHeader {
    id: UniqueId,
    code: OperationCode,
    params: BTreeMap<String, serde_json::Value>,
    stats: OperationStats,
    interrupt: Arc<AtomicBool>,
}

impl OperationHeader {
    pub fn new() -> Self {
        Self {
            id: UniqueId::new(),
            code: OperationCode::NotStarted,
            params: BTreeMap::new(),
            stats: OperationStats::default(),
            interrupt: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn id(&self) -> UniqueId {
        self.id
    }

    pub fn code(&self) -> OperationCode {
        self.code
    }

    /// Transitions into a terminal code; exactly one transition is allowed.
    pub fn end(&mut self, code: OperationCode) -> Result<(), EngineError> {
        if !code.is_terminal() {
            return Err(EngineError::InvalidArgument(format!(
                "cannot end an operation with the non-terminal code {code}"
            )));
        }
        if self.code.is_terminal() {
            return Err(EngineError::InvalidArgument(format!(
                "operation {} already ended with {}",
                self.id, self.code
            )));
        }
        self.code = code;
        Ok(())
    }

    pub fn param(&self, name: &str) -> Option<&serde_json::Value> {
        self.params.get(name)
    }

    pub fn set_param(&mut self, name: impl Into<String>, value: serde_json::Value) {
        self.params.insert(name.into(), value);
    }

    pub fn params(&self) -> &BTreeMap<String, serde_json::Value> {
        &self.params
    }

    pub fn stats(&self) -> &OperationStats {
        &self.stats
    }

    pub fn stats_mut(&mut self) -> &mut OperationStats {
        &mut self.stats
    }

    pub fn interrupted(&self) -> bool {
        self.interrupt.load(Ordering::Relaxed)
    }

    pub fn interrupt_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.interrupt)
    }

    /// Merges the foreign header of a partial upstream execution: counters
    /// and parameters add up, the terminal code transfers if this side has
    /// none yet.
    pub fn merge_from(&mut self, other: &OperationHeader) {
        self.stats.merge(&other.stats);
        for (name, value) in &other.params {
            self.params.insert(name.clone(), value.clone());
        }
        if !self.code.is_terminal() && other.code.is_terminal() {
            self.code = other.code;
        }
    }
}

impl Default for OperationHeader {
    fn default() -> Self {
        Self::new()
    }
}

/// Object-safe contract of every operation.
pub trait Operation: Debug + Send {
    fn header(&self) -> &OperationHeader;

    fn header_mut(&mut self) -> &mut OperationHeader;

    fn kind(&self) -> OperationKind;

    /// The ranked answer of ranking queries; `None` elsewhere.
    fn ranked_answer(&self) -> Option<&RankedAnswer> {
        None
    }

    /// Duplicate keeping the operation identity, so answers produced
    /// elsewhere merge back into the original.
    fn clone_operation(&self) -> Box<dyn Operation>;

    /// Strips non-index payloads before transport.
    fn clear_surplus_data(&mut self) {}

    /// Merges partial results of an upstream execution of the same
    /// operation.
    fn update_from(&mut self, other: &dyn Operation) -> Result<(), EngineError>;

    /// Ids and interrupt flags this operation responds to; batch operations
    /// add their sub-operations.
    fn interrupt_targets(&self) -> Vec<(UniqueId, Arc<AtomicBool>)> {
        vec![(self.header().id(), self.header().interrupt_flag())]
    }

    fn as_any(&self) -> &dyn Any;

    fn as_any_mut(&mut self) -> &mut dyn Any;
}

impl dyn Operation + '_ {
    pub fn id(&self) -> UniqueId {
        self.header().id()
    }

    pub fn was_successful(&self) -> bool {
        self.header().code().is_success()
    }

    pub fn end_operation(&mut self, code: OperationCode) -> Result<(), EngineError> {
        self.header_mut().end(code)
    }

    pub fn downcast_ref<T: Operation + 'static>(&self) -> Option<&T> {
        self.as_any().downcast_ref::<T>()
    }

    pub fn downcast_mut<T: Operation + 'static>(&mut self) -> Option<&mut T> {
        self.as_any_mut().downcast_mut::<T>()
    }
}

/// Downcast with the kind mismatch surfaced as a dispatch error.
pub fn expect_operation<T: Operation + 'static>(
    operation: &mut dyn Operation,
) -> Result<&mut T, EngineError> {
    let kind = operation.kind();
    operation
        .downcast_mut::<T>()
        .ok_or(EngineError::NotSupported(kind))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn end_is_allowed_exactly_once() {
        let mut header = OperationHeader::new();
        assert!(!header.code().is_terminal());
        header.end(OperationCode::ResponseReturned).unwrap();
        assert!(header.code().is_success());
        assert!(header.end(OperationCode::Failed).is_err());
        assert_eq!(header.code(), OperationCode::ResponseReturned);
    }

    #[test]
    fn ending_with_a_non_terminal_code_is_rejected() {
        let mut header = OperationHeader::new();
        assert!(header.end(OperationCode::NotStarted).is_err());
    }

    #[test]
    fn ancestry_walks_to_the_root() {
        let chain: Vec<OperationKind> = OperationKind::Knn.ancestry().collect();
        assert_eq!(
            chain,
            vec![
                OperationKind::Knn,
                OperationKind::Ranking,
                OperationKind::Query,
                OperationKind::Operation
            ]
        );
        assert!(OperationKind::Knn.is_ranking());
        assert!(!OperationKind::Insert.is_ranking());
    }

    #[test]
    fn merge_from_transfers_the_terminal_code_once() {
        let mut local = OperationHeader::new();
        let mut remote = OperationHeader::new();
        remote.stats_mut().distances.computations = 5;
        remote.end(OperationCode::ResponseReturned).unwrap();

        local.merge_from(&remote);
        assert_eq!(local.code(), OperationCode::ResponseReturned);
        assert_eq!(local.stats().distances.computations, 5);
    }
}
