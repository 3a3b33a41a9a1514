//! Behavior document AST.
//!
//! The concrete grammar lives upstream; producers hand the compiler a
//! [`Document`] either built in code (see [`build`]) or deserialized from
//! JSON with serde.

pub mod ast;
pub mod build;
pub mod span;

pub use ast::{
    BinaryOp, Document, ExtensionTarget, Expr, ExprKind, Flow, Import, Stmt, StmtKind,
    UnaryOp,
};
pub use span::Span;
