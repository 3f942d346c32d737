use std::any::Any;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;

use metrisch_types::id::UniqueId;

use crate::errors::EngineError;
use crate::operation::query::KnnQuery;
use crate::operation::{Operation, OperationHeader, OperationKind};

/// A batch of k-NN sub-queries processed as a unit.
///
/// The batch terminates only when every sub-operation has terminated; each
/// sub-query keeps its own answer, statistics and interrupt flag.
#[derive(Debug)]
pub struct BatchKnnQuery {
    header: OperationHeader,
    queries: Vec<KnnQuery>,
}

impl BatchKnnQuery {
    pub fn new(queries: Vec<KnnQuery>) -> Self {
        Self {
            header: OperationHeader::new(),
            queries,
        }
    }

    pub fn operation_count(&self) -> usize {
        self.queries.len()
    }

    pub fn operation(&self, index: usize) -> Option<&KnnQuery> {
        self.queries.get(index)
    }

    pub fn operations(&self) -> &[KnnQuery] {
        &self.queries
    }

    pub fn operations_mut(&mut self) -> &mut [KnnQuery] {
        &mut self.queries
    }

    pub fn all_terminated(&self) -> bool {
        self.queries
            .iter()
            .all(|query| query.header().code().is_terminal())
    }
}

impl Operation for BatchKnnQuery {
    fn header(&self) -> &OperationHeader {
        &self.header
    }

    fn header_mut(&mut self) -> &mut OperationHeader {
        &mut self.header
    }

    fn kind(&self) -> OperationKind {
        OperationKind::BatchKnn
    }

    fn clone_operation(&self) -> Box<dyn Operation> {
        let queries = self.queries.iter().map(KnnQuery::clone_query).collect();
        Box::new(BatchKnnQuery {
            header: self.header.clone(),
            queries,
        })
    }

    fn clear_surplus_data(&mut self) {
        for query in &mut self.queries {
            query.clear_surplus_data();
        }
    }

    fn update_from(&mut self, other: &dyn Operation) -> Result<(), EngineError> {
        let Some(other) = other.downcast_ref::<BatchKnnQuery>() else {
            return Err(EngineError::InvalidArgument(
                "cannot merge a foreign operation of a different kind".to_owned(),
            ));
        };
        if self.queries.len() != other.queries.len() {
            return Err(EngineError::InvalidArgument(format!(
                "batch sizes differ: {} vs {}",
                self.queries.len(),
                other.queries.len()
            )));
        }
        for (mine, theirs) in self.queries.iter_mut().zip(&other.queries) {
            mine.update_from(theirs)?;
        }
        self.header.merge_from(&other.header);
        Ok(())
    }

    fn interrupt_targets(&self) -> Vec<(UniqueId, Arc<AtomicBool>)> {
        let mut targets = vec![(self.header.id(), self.header.interrupt_flag())];
        for query in &self.queries {
            targets.push((query.header().id(), query.header().interrupt_flag()));
        }
        targets
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}
