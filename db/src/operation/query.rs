//! Single-query ranking operations.

use std::any::Any;
use std::num::NonZeroUsize;
use std::sync::Arc;

use metrisch_types::distance::distance_with_threshold;
use metrisch_types::object::LocalObject;

use crate::errors::EngineError;
use crate::operation::answer::{AnswerType, RankedAnswer, RankedEntry};
use crate::operation::{Operation, OperationHeader, OperationKind};

/// k-nearest-neighbour query over one query object.
#[derive(Debug)]
pub struct KnnQuery {
    header: OperationHeader,
    query: Arc<dyn LocalObject>,
    k: NonZeroUsize,
    answer: RankedAnswer,
}

impl KnnQuery {
    pub fn new(query: Arc<dyn LocalObject>, k: NonZeroUsize) -> Self {
        Self::with_answer_type(query, k, AnswerType::FullData)
    }

    pub fn with_answer_type(
        query: Arc<dyn LocalObject>,
        k: NonZeroUsize,
        answer_type: AnswerType,
    ) -> Self {
        Self {
            header: OperationHeader::new(),
            query,
            k,
            answer: RankedAnswer::bounded(k, answer_type),
        }
    }

    pub fn query(&self) -> &Arc<dyn LocalObject> {
        &self.query
    }

    pub fn k(&self) -> NonZeroUsize {
        self.k
    }

    pub fn answer(&self) -> &RankedAnswer {
        &self.answer
    }

    /// Typed duplicate keeping the operation identity.
    pub fn clone_query(&self) -> KnnQuery {
        KnnQuery {
            header: self.header.clone(),
            query: Arc::clone(&self.query),
            k: self.k,
            answer: self.answer.clone(),
        }
    }

    /// Evaluates one candidate: the current k-th distance serves both as
    /// the exclusion radius for the filter chains and as the evaluation
    /// threshold, so hopeless candidates cost as little as possible.
    pub fn evaluate(&mut self, candidate: &Arc<dyn LocalObject>) -> Result<bool, EngineError> {
        let threshold = self.answer.threshold();
        if self
            .query
            .header()
            .filters()
            .exclude(candidate.header().filters(), threshold)
        {
            self.header.stats_mut().distances.savings += 1;
            return Ok(false);
        }
        let distance = distance_with_threshold(
            self.query.as_ref(),
            candidate.as_ref(),
            threshold,
            &mut self.header.stats_mut().distances,
        )?;
        if distance <= threshold {
            Ok(self.answer.add(candidate, distance))
        } else {
            Ok(false)
        }
    }
}

impl Operation for KnnQuery {
    fn header(&self) -> &OperationHeader {
        &self.header
    }

    fn header_mut(&mut self) -> &mut OperationHeader {
        &mut self.header
    }

    fn kind(&self) -> OperationKind {
        OperationKind::Knn
    }

    fn ranked_answer(&self) -> Option<&RankedAnswer> {
        Some(&self.answer)
    }

    fn clone_operation(&self) -> Box<dyn Operation> {
        Box::new(self.clone_query())
    }

    fn clear_surplus_data(&mut self) {
        self.answer.clear_surplus_data();
    }

    fn update_from(&mut self, other: &dyn Operation) -> Result<(), EngineError> {
        let Some(other) = other.downcast_ref::<KnnQuery>() else {
            return Err(EngineError::InvalidArgument(
                "cannot merge a foreign operation of a different kind".to_owned(),
            ));
        };
        self.answer.merge_from(&other.answer);
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

/// Range query returning everything within the radius.
#[derive(Debug)]
pub struct RangeQuery {
    header: OperationHeader,
    query: Arc<dyn LocalObject>,
    radius: f32,
    answer: RankedAnswer,
}

impl RangeQuery {
    pub fn new(query: Arc<dyn LocalObject>, radius: f32) -> Self {
        Self::with_answer_type(query, radius, AnswerType::FullData)
    }

    pub fn with_answer_type(
        query: Arc<dyn LocalObject>,
        radius: f32,
        answer_type: AnswerType,
    ) -> Self {
        Self {
            header: OperationHeader::new(),
            query,
            radius,
            answer: RankedAnswer::unbounded(answer_type),
        }
    }

    pub fn query(&self) -> &Arc<dyn LocalObject> {
        &self.query
    }

    pub fn radius(&self) -> f32 {
        self.radius
    }

    pub fn answer(&self) -> &RankedAnswer {
        &self.answer
    }

    /// The radius may tighten as an index narrows the search, never loosen.
    pub fn set_radius(&mut self, radius: f32) -> Result<(), EngineError> {
        if radius > self.radius {
            return Err(EngineError::InvalidArgument(format!(
                "radius may only tighten: {radius} > {}",
                self.radius
            )));
        }
        self.radius = radius;
        Ok(())
    }

    pub fn evaluate(&mut self, candidate: &Arc<dyn LocalObject>) -> Result<bool, EngineError> {
        if self
            .query
            .header()
            .filters()
            .exclude(candidate.header().filters(), self.radius)
        {
            self.header.stats_mut().distances.savings += 1;
            return Ok(false);
        }
        let distance = distance_with_threshold(
            self.query.as_ref(),
            candidate.as_ref(),
            self.radius,
            &mut self.header.stats_mut().distances,
        )?;
        if distance <= self.radius {
            Ok(self.answer.add(candidate, distance))
        } else {
            Ok(false)
        }
    }
}

impl Operation for RangeQuery {
    fn header(&self) -> &OperationHeader {
        &self.header
    }

    fn header_mut(&mut self) -> &mut OperationHeader {
        &mut self.header
    }

    fn kind(&self) -> OperationKind {
        OperationKind::Range
    }

    fn ranked_answer(&self) -> Option<&RankedAnswer> {
        Some(&self.answer)
    }

    fn clone_operation(&self) -> Box<dyn Operation> {
        Box::new(RangeQuery {
            header: self.header.clone(),
            query: Arc::clone(&self.query),
            radius: self.radius,
            answer: self.answer.clone(),
        })
    }

    fn clear_surplus_data(&mut self) {
        self.answer.clear_surplus_data();
    }

    fn update_from(&mut self, other: &dyn Operation) -> Result<(), EngineError> {
        let Some(other) = other.downcast_ref::<RangeQuery>() else {
            return Err(EngineError::InvalidArgument(
                "cannot merge a foreign operation of a different kind".to_owned(),
            ));
        };
        self.answer.merge_from(&other.answer);
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

/// Singleton query locating one object by its locator URI.
#[derive(Debug)]
pub struct GetObjectQuery {
    header: OperationHeader,
    locator: String,
    result: Option<RankedEntry>,
}

impl GetObjectQuery {
    pub fn new(locator: impl Into<String>) -> Self {
        Self {
            header: OperationHeader::new(),
            locator: locator.into(),
            result: None,
        }
    }

    pub fn locator(&self) -> &str {
        &self.locator
    }

    pub fn result(&self) -> Option<&RankedEntry> {
        self.result.as_ref()
    }

    /// Matches on the locator; the singleton answer is the object at
    /// distance zero.
    pub fn evaluate(&mut self, candidate: &Arc<dyn LocalObject>) -> bool {
        if self.result.is_some() {
            return false;
        }
        if candidate.header().locator() == Some(self.locator.as_str()) {
            self.result = Some(RankedEntry {
                distance: 0.0,
                object: super::answer::AnswerObject::Full(Arc::clone(candidate)),
            });
            return true;
        }
        false
    }
}

impl Operation for GetObjectQuery {
    fn header(&self) -> &OperationHeader {
        &self.header
    }

    fn header_mut(&mut self) -> &mut OperationHeader {
        &mut self.header
    }

    fn kind(&self) -> OperationKind {
        OperationKind::GetObject
    }

    fn clone_operation(&self) -> Box<dyn Operation> {
        Box::new(GetObjectQuery {
            header: self.header.clone(),
            locator: self.locator.clone(),
            result: self.result.clone(),
        })
    }

    fn update_from(&mut self, other: &dyn Operation) -> Result<(), EngineError> {
        let Some(other) = other.downcast_ref::<GetObjectQuery>() else {
            return Err(EngineError::InvalidArgument(
                "cannot merge a foreign operation of a different kind".to_owned(),
            ));
        };
        if self.result.is_none() {
            self.result = other.result.clone();
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
