use metrisch_types::errors::ObjectError;
use metrisch_types::id::UniqueId;
use thiserror::Error;

use crate::operation::OperationKind;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("no method bound for operation kind {0}")]
    NotSupported(OperationKind),
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("operation was interrupted")]
    Interrupted,
    #[error("io failure: {0}")]
    IoFailure(#[from] std::io::Error),
    #[error("operation {0} is not running")]
    UnknownOperation(UniqueId),
    #[error(transparent)]
    Object(#[from] ObjectError),
}
