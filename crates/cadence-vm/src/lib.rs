//! Cadence Virtual Machine
//!
//! This crate compiles behavior documents into compact bytecode Models and
//! executes them on latency-constrained clients.
//!
//! # Architecture
//!
//! - A stack-based instruction set with one uniform `f64` value type
//! - Operand stack, locals and call stack sized once per Model; `evaluate`
//!   never allocates
//! - Continuation points that pause a long-running sequence until an
//!   extension attaches or a deadline elapses
//!
//! # Modules
//!
//! - `opcode`: Instruction set definitions and encoding
//! - `bytecode`: The immutable Model and its tables
//! - `format`: Binary (de)serialization and load-time verification
//! - `compiler`: Semantic analysis, IR, optimization and code generation
//! - `vm`: The per-cycle interpreter
//! - `streaming`: The continuation-aware interpreter for long sequences
//! - `intents` / `cycle`: Bridging Model outputs into the intent merger
//! - `error`: Error types for every layer

pub mod bytecode;
pub mod bytecode_debug;
pub mod compiler;
pub mod cycle;
pub mod error;
pub mod format;
pub mod intents;
pub mod opcode;
pub mod streaming;
pub mod vm;

mod verify;

// Re-export main types
pub use bytecode::{ContinuationPoint, Model, ModelFlags};
pub use bytecode_debug::disassemble;
pub use compiler::{
    compile, Access, CompileOptions, Compiler, SchemaRegistry, StaticSchemaRegistry, VariableSchema,
};
pub use cycle::{BehaviorStack, SnapshotState, StateProvider};
pub use error::{
    AttachmentRejected, BindError, CompileError, CompileErrorKind, EncodeError, EvaluationFault,
    LoadError,
};
pub use format::load_model;
pub use intents::BoundChannels;
pub use opcode::OpCode;
pub use streaming::{ExtensionAttacher, StreamState, StreamingConfig, StreamingInterpreter};
pub use vm::{Interpreter, VmConfig};
