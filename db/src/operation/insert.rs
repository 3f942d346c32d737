use std::any::Any;
use std::sync::Arc;

use metrisch_types::object::LocalObject;

use crate::errors::EngineError;
use crate::operation::{Operation, OperationHeader, OperationKind};

/// Inserts one object into the target algorithm's storage.
#[derive(Debug)]
pub struct InsertOperation {
    header: OperationHeader,
    object: Arc<dyn LocalObject>,
}

impl InsertOperation {
    pub fn new(object: Arc<dyn LocalObject>) -> Self {
        Self {
            header: OperationHeader::new(),
            object,
        }
    }

    pub fn object(&self) -> &Arc<dyn LocalObject> {
        &self.object
    }
}

impl Operation for InsertOperation {
    fn header(&self) -> &OperationHeader {
        &self.header
    }

    fn header_mut(&mut self) -> &mut OperationHeader {
        &mut self.header
    }

    fn kind(&self) -> OperationKind {
        OperationKind::Insert
    }

    fn clone_operation(&self) -> Box<dyn Operation> {
        Box::new(InsertOperation {
            header: self.header.clone(),
            object: Arc::clone(&self.object),
        })
    }

    fn update_from(&mut self, other: &dyn Operation) -> Result<(), EngineError> {
        if other.downcast_ref::<InsertOperation>().is_none() {
            return Err(EngineError::InvalidArgument(
                "cannot merge a foreign operation of a different kind".to_owned(),
            ));
        }
        self.header.merge_from(other.header());
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}
