use thiserror::Error;

pub type LyrebirdResult<T> = Result<T, LyrebirdError>;

/// Errors surfaced by the stub engine.
///
/// The display strings for [`LyrebirdError::NoStubFound`] and
/// [`LyrebirdError::StreamResponseForUnary`] are part of the wire contract:
/// clients observe them verbatim as gRPC `INTERNAL` status messages.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LyrebirdError {
    #[error("Can't find any stub for {0}")]
    NoStubFound(String),

    #[error("Found stream response for unary output")]
    StreamResponseForUnary,

    #[error("service not found: {0}")]
    ServiceNotFound(String),

    #[error("method description not found: {0}")]
    MethodNotFound(String),

    #[error("method name already registered: {0}")]
    MethodNameTaken(String),

    #[error("method description {0} is referenced by stubs")]
    MethodInUse(String),

    #[error("stub not found: {0}")]
    StubNotFound(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("invalid stream delay: {0}")]
    InvalidDelay(String),

    #[error("invalid predicate pattern: {0}")]
    InvalidPattern(String),

    #[error("unresolved reference: {0}")]
    UnresolvedReference(String),

    #[error("proto compilation failed: {0}")]
    ProtoCompile(String),

    #[error("unknown message class: {0}")]
    UnknownMessageClass(String),

    #[error("ambiguous message class: {0}")]
    AmbiguousMessageClass(String),

    #[error("message conversion failed: {0}")]
    Conversion(String),
}
