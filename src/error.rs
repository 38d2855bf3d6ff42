//! Engine-internal error type.
//!
//! JL distinguishes two error surfaces: Rust-level [`VmError`] values, which
//! signal malformed bytecode or host-side invariant violations that abort
//! execution outright, and JL-level exceptions (instances of `Error`
//! subclasses) that unwind through the block chain per the exception system
//! (§4.7). [`VmError::kind`] maps the former onto the latter's `ErrorKind`
//! roster so `vm_throw_error` can bridge a Rust failure into a raised JL
//! exception instead of aborting the whole engine.

use std::fmt;

use thiserror::Error;

/// The eight user-visible JL error kinds (spec §7), each surfaced as a raised
/// instance of an `Error` subclass once it crosses into JL-land.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    TypeError,
    NilError,
    IndexError,
    ArithmeticError,
    TimeoutError,
    ArgumentError,
    IOError,
    InternalError,
}

impl ErrorKind {
    pub fn class_name(self) -> &'static str {
        match self {
            ErrorKind::TypeError => "TypeError",
            ErrorKind::NilError => "NilError",
            ErrorKind::IndexError => "IndexError",
            ErrorKind::ArithmeticError => "ArithmeticError",
            ErrorKind::TimeoutError => "TimeoutError",
            ErrorKind::ArgumentError => "ArgumentError",
            ErrorKind::IOError => "IOError",
            ErrorKind::InternalError => "InternalError",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.class_name())
    }
}

#[derive(Debug, Error)]
pub enum VmError {
    #[error("type error: {0}")]
    Type(String),

    #[error("nil error: {0}")]
    Nil(String),

    #[error("index out of range: {0}")]
    Index(String),

    #[error("arithmetic error: {0}")]
    Arithmetic(String),

    #[error("timed out: {0}")]
    Timeout(String),

    #[error("invalid argument: {0}")]
    Argument(String),

    #[error("io error: {0}")]
    Io(String),

    #[error("internal invariant violated: {0}")]
    Internal(String),

    #[error("malformed bytecode at offset {offset}: {message}")]
    Parse { offset: usize, message: String },

    #[error("invalid opcode byte 0x{0:02x}")]
    InvalidOpcode(u8),

    #[error("operand stack underflow")]
    StackUnderflow,

    #[error("operand stack exceeded limit of {0}")]
    StackOverflow(usize),

    #[error("block chain exceeded max depth of {0}")]
    CallDepthExceeded(usize),

    #[error("try-nesting exceeded max depth of {0}")]
    TryDepthExceeded(usize),

    #[error("unhandled exception: {0}")]
    UnhandledException(String),

    #[error("unknown module: {0}")]
    UnknownModule(String),

    #[error("unknown reference: {0}")]
    UnknownReference(String),
}

pub type VmResult<T> = Result<T, VmError>;

impl VmError {
    pub fn type_(msg: impl Into<String>) -> Self {
        VmError::Type(msg.into())
    }
    pub fn nil(msg: impl Into<String>) -> Self {
        VmError::Nil(msg.into())
    }
    pub fn index(msg: impl Into<String>) -> Self {
        VmError::Index(msg.into())
    }
    pub fn arithmetic(msg: impl Into<String>) -> Self {
        VmError::Arithmetic(msg.into())
    }
    pub fn timeout(msg: impl Into<String>) -> Self {
        VmError::Timeout(msg.into())
    }
    pub fn argument(msg: impl Into<String>) -> Self {
        VmError::Argument(msg.into())
    }
    pub fn io(msg: impl Into<String>) -> Self {
        VmError::Io(msg.into())
    }
    pub fn internal(msg: impl Into<String>) -> Self {
        VmError::Internal(msg.into())
    }
    pub fn parse(offset: usize, message: impl Into<String>) -> Self {
        VmError::Parse { offset, message: message.into() }
    }

    /// The JL `ErrorKind` a Rust-level failure surfaces as once raised into
    /// JL code. Parser/bytecode-shape failures have no JL-level counterpart
    /// (they can't occur once a module is loaded) and map to `InternalError`.
    pub fn kind(&self) -> ErrorKind {
        match self {
            VmError::Type(_) => ErrorKind::TypeError,
            VmError::Nil(_) => ErrorKind::NilError,
            VmError::Index(_) => ErrorKind::IndexError,
            VmError::Arithmetic(_) => ErrorKind::ArithmeticError,
            VmError::Timeout(_) => ErrorKind::TimeoutError,
            VmError::Argument(_) => ErrorKind::ArgumentError,
            VmError::Io(_) => ErrorKind::IOError,
            _ => ErrorKind::InternalError,
        }
    }

    /// Whether this failure should be raised as a catchable JL exception
    /// (walks the block chain) rather than aborting the engine outright.
    pub fn is_catchable(&self) -> bool {
        matches!(
            self,
            VmError::Type(_)
                | VmError::Nil(_)
                | VmError::Index(_)
                | VmError::Arithmetic(_)
                | VmError::Timeout(_)
                | VmError::Argument(_)
                | VmError::Io(_)
        )
    }
}

impl From<std::io::Error> for VmError {
    fn from(e: std::io::Error) -> Self {
        VmError::Io(e.to_string())
    }
}
