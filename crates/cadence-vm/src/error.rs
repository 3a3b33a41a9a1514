//! Error types for the compiler, the loader and the interpreters

use cadence_ast::Span;
use cadence_types::ModelId;
use std::fmt;
use thiserror::Error;

/// Category of a compilation diagnostic
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CompileErrorKind {
    /// Reference that neither a local, the schema registry nor a constant resolves
    UnknownVariable,
    /// Operand, condition or assignment of the wrong type
    TypeMismatch,
    /// Imported namespace unknown to the schema registry
    UnresolvedImport,
    /// Call, goto or default continuation naming a flow that does not exist
    UnknownFlow,
    /// Two flows with the same name
    DuplicateFlow,
    /// Flow graph cycle (call, goto or default continuation)
    RecursiveFlow,
    /// Two continuation points with the same name
    DuplicateContinuationPoint,
    /// Negative, non-finite or oversized continuation timeout
    InvalidTimeout,
    /// Call to a function that is not a builtin
    UnknownFunction,
    /// Wrong number of arguments or vector components
    ArityMismatch,
    /// Assignment to an input or channel, or intent on a plain output
    InvalidTarget,
    /// Repeat count above the supported bound
    InvalidRepeatCount,
    /// Document without any flow
    EmptyDocument,
    /// A table outgrew its binary encoding
    Limit,
}

impl CompileErrorKind {
    pub fn name(self) -> &'static str {
        match self {
            CompileErrorKind::UnknownVariable => "unknown variable",
            CompileErrorKind::TypeMismatch => "type mismatch",
            CompileErrorKind::UnresolvedImport => "unresolved import",
            CompileErrorKind::UnknownFlow => "unknown flow",
            CompileErrorKind::DuplicateFlow => "duplicate flow",
            CompileErrorKind::RecursiveFlow => "recursive flow",
            CompileErrorKind::DuplicateContinuationPoint => "duplicate continuation point",
            CompileErrorKind::InvalidTimeout => "invalid timeout",
            CompileErrorKind::UnknownFunction => "unknown function",
            CompileErrorKind::ArityMismatch => "arity mismatch",
            CompileErrorKind::InvalidTarget => "invalid target",
            CompileErrorKind::InvalidRepeatCount => "invalid repeat count",
            CompileErrorKind::EmptyDocument => "empty document",
            CompileErrorKind::Limit => "limit exceeded",
        }
    }
}

/// One compilation diagnostic. Compilation reports all of them at once.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompileError {
    pub kind: CompileErrorKind,
    pub message: String,
    pub span: Span,
}

impl CompileError {
    pub fn new(kind: CompileErrorKind, span: Span, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            span,
        }
    }
}

impl fmt::Display for CompileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {} at {}", self.kind.name(), self.message, self.span)
    }
}

impl std::error::Error for CompileError {}

/// Malformed or incompatible binary Model. Always detected at load time.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LoadError {
    #[error("input too short: {0} bytes")]
    TooShort(usize),

    #[error("bad magic bytes")]
    BadMagic,

    #[error("unsupported format version {0}")]
    UnsupportedVersion(u16),

    #[error("unknown flag bits {0:#06x}")]
    UnknownFlags(u16),

    #[error("declared payload length {declared} does not match actual {actual}")]
    LengthMismatch { declared: usize, actual: usize },

    #[error("checksum mismatch")]
    ChecksumMismatch,

    #[error("decompression failed: {0}")]
    Decompression(String),

    #[error("debug info could not be decoded: {0}")]
    DebugInfo(String),

    #[error("section table is inconsistent: {0}")]
    SectionLayout(&'static str),

    #[error("section {0} is truncated")]
    Truncated(&'static str),

    #[error("section {0} has trailing bytes")]
    TrailingBytes(&'static str),

    #[error("string {0} is not valid UTF-8")]
    InvalidUtf8(usize),

    #[error("unknown value type tag {0}")]
    InvalidType(u8),

    #[error("schema entry {name} is invalid: {reason}")]
    InvalidSchema { name: String, reason: &'static str },

    #[error("unknown opcode {byte} at {offset}")]
    InvalidOpcode { offset: usize, byte: u8 },

    #[error("operand {operand} of {opcode} at {offset} is out of range")]
    OperandOutOfRange {
        offset: usize,
        opcode: &'static str,
        operand: u32,
    },

    #[error("continuation point {index} is invalid: {reason}")]
    ContinuationPoint { index: usize, reason: &'static str },

    #[error("entry offset {0} is out of range")]
    EntryOutOfRange(u32),

    #[error("stack analysis failed: {0}")]
    Stack(#[from] StackError),

    #[error("declared max stack {declared} does not cover analysed depth {required} (ceiling {ceiling})")]
    StackLimit {
        declared: u16,
        required: u16,
        ceiling: u16,
    },

    #[error("declared call depth {declared} does not cover analysed depth {required}")]
    CallDepthLimit { declared: u16, required: u16 },

    #[error("extension flag and extension header disagree")]
    ExtensionHeader,

    #[error("model declares continuation points; use the streaming interpreter")]
    RequiresStreaming,
}

/// Failure of the static operand-stack analysis
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StackError {
    #[error("unknown opcode at {0}")]
    UnknownOpcode(usize),

    #[error("stack underflow at {0}")]
    Underflow(usize),

    #[error("inconsistent stack depth at {0}")]
    Mismatch(usize),

    #[error("call or return with a non-empty stack at {0}")]
    Unbalanced(usize),

    #[error("execution falls off the end of the code at {0}")]
    FallsOffEnd(usize),

    #[error("branch target {target} at {offset} is out of range")]
    BadTarget { offset: usize, target: usize },

    #[error("stack depth exceeds {0}")]
    TooDeep(u16),

    #[error("routine at {0} can call itself")]
    RecursiveCall(usize),

    #[error("call nesting exceeds 65535")]
    CallsTooDeep,
}

/// Failure while encoding a Model to bytes
#[derive(Debug, Error)]
pub enum EncodeError {
    #[error("compression failed: {0}")]
    Compression(#[from] std::io::Error),

    #[error("debug info could not be encoded: {0}")]
    DebugInfo(#[from] rmp_serde::encode::Error),

    #[error("name {0:?} is missing from the string table")]
    MissingString(String),

    #[error("{0} does not fit its binary encoding")]
    Overflow(&'static str),
}

/// Fault raised during evaluation.
///
/// A Model that passed load-time verification cannot raise these except for
/// caller misuse (state length, instruction ceiling); anything else indicates a
/// compiler defect. Faults are fatal for the evaluation.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EvaluationFault {
    #[error("operand stack overflow at {ip}")]
    StackOverflow { ip: usize },

    #[error("operand stack underflow at {ip}")]
    StackUnderflow { ip: usize },

    #[error("call stack overflow at {ip}")]
    CallStackOverflow { ip: usize },

    #[error("instruction limit of {limit} exceeded")]
    InstructionLimit { limit: u32 },

    #[error("{what} state has {actual} slots, model expects {expected}")]
    StateMismatch {
        what: &'static str,
        expected: usize,
        actual: usize,
    },

    #[error("invalid opcode {byte} at {ip}")]
    InvalidOpcode { ip: usize, byte: u8 },

    #[error("invalid operand at {ip}")]
    InvalidOperand { ip: usize },

    #[error("instruction pointer {ip} is out of range")]
    ProgramCounter { ip: usize },

    #[error("continuation point reached at {ip} outside the streaming interpreter")]
    UnexpectedPause { ip: usize },

    #[error("interpreter already faulted")]
    Faulted,
}

/// Reason an extension attachment was ignored.
///
/// Attachment races are expected; callers typically discard these.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AttachmentRejected {
    #[error("model is not an extension")]
    NotAnExtension,

    #[error("no continuation point is awaiting an extension")]
    NoPendingPoint,

    #[error("extension targets parent {actual}, running model is {expected}")]
    ParentMismatch { expected: ModelId, actual: ModelId },

    #[error("extension targets a different continuation point")]
    AttachPointMismatch,

    #[error("continuation point already resolved")]
    AlreadyResolved,

    #[error("continuation point deadline elapsed")]
    DeadlineElapsed,

    #[error("extension {0} is already part of the running chain")]
    CircularExtension(ModelId),

    #[error("extension chain longer than {limit}")]
    ChainTooDeep { limit: usize },

    #[error("extension variable {name} does not match the running model's schema")]
    SchemaMismatch { name: String },
}

/// Failure to bind a Model to an entity's state and channels
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BindError {
    #[error("state provider has no value for input {name}")]
    UnknownInput { name: String },

    #[error("channel {name} is not configured in the merger")]
    UnknownChannel { name: String },

    #[error(transparent)]
    Load(#[from] LoadError),
}
