use thiserror::Error;

/// Errors raised by the metric-object kernel.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ObjectError {
    #[error("distance is not defined between {left} and {right}")]
    ClassMismatch {
        left: &'static str,
        right: &'static str,
    },
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("operation not defined for this object type: {0}")]
    InvalidOperation(&'static str),
    #[error("filter {0} does not support cloning")]
    CloneUnsupported(&'static str),
    #[error("filter {0} has no text form")]
    TextUnsupported(&'static str),
    #[error("unexpected end of stream while reading {0}")]
    UnexpectedEnd(&'static str),
    #[error("unknown type tag {0}")]
    UnknownType(String),
    #[error("io error: {0}")]
    Io(String),
}

impl From<std::io::Error> for ObjectError {
    fn from(input: std::io::Error) -> Self {
        Self::Io(input.to_string())
    }
}
