//! AST node definitions

use crate::span::Span;
use serde::{Deserialize, Serialize};

/// A complete behavior document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    /// Document name (the Model identifier is derived from it)
    pub name: String,

    /// Schema namespaces made visible to unqualified references
    #[serde(default)]
    pub imports: Vec<Import>,

    /// Present when this document extends a running parent at a continuation point
    #[serde(default)]
    pub extends: Option<ExtensionTarget>,

    /// Named flows; the first one is the entry flow
    pub flows: Vec<Flow>,
}

/// Import of a schema namespace
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Import {
    pub namespace: String,
    #[serde(default)]
    pub span: Span,
}

/// Attachment target of an extension document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtensionTarget {
    /// Name of the parent document
    pub parent: String,
    /// Continuation point name in the parent
    pub attach_point: String,
}

/// A named sequence of statements
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Flow {
    pub name: String,
    pub body: Vec<Stmt>,
    #[serde(default)]
    pub span: Span,
}

/// Statement with its location
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Stmt {
    pub kind: StmtKind,
    #[serde(default)]
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StmtKind {
    /// Block-scoped local binding: `let name = value`
    Let { name: String, value: Expr },

    /// Output assignment: `target = value`
    Assign { target: String, value: Expr },

    /// Channel contribution: `intent channel <- value @ urgency`
    Intent {
        channel: String,
        value: Expr,
        urgency: Expr,
    },

    /// Conditional block
    If {
        condition: Expr,
        then_body: Vec<Stmt>,
        #[serde(default)]
        else_body: Vec<Stmt>,
    },

    /// Bounded loop with a constant iteration count
    Repeat { count: u32, body: Vec<Stmt> },

    /// Run another flow, then continue here
    Call { flow: String },

    /// Continue in another flow without returning
    Goto { flow: String },

    /// Suspend a streaming execution for `seconds`
    Wait { seconds: Expr },

    /// Named pause awaiting an optional extension
    Continuation {
        name: String,
        /// Seconds to wait for an extension
        timeout: f64,
        /// Flow to run when no extension attaches in time
        default_flow: String,
    },

    /// Stop execution
    Halt,
}

/// Expression with its location
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Expr {
    pub kind: ExprKind,
    #[serde(default)]
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExprKind {
    Number(f64),
    Bool(bool),
    Str(String),
    /// Three-component vector literal
    Vector(Vec<Expr>),
    /// Reference to an input or a local
    Variable(String),
    Unary {
        op: UnaryOp,
        operand: Box<Expr>,
    },
    Binary {
        op: BinaryOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    /// `condition ? then_expr : else_expr`
    Conditional {
        condition: Box<Expr>,
        then_expr: Box<Expr>,
        else_expr: Box<Expr>,
    },
    /// Builtin function call
    Call { function: String, args: Vec<Expr> },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnaryOp {
    Neg,
    Not,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
}

impl BinaryOp {
    /// Operator symbol, used in diagnostics
    pub fn symbol(self) -> &'static str {
        match self {
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Mod => "%",
            BinaryOp::Eq => "==",
            BinaryOp::Ne => "!=",
            BinaryOp::Lt => "<",
            BinaryOp::Le => "<=",
            BinaryOp::Gt => ">",
            BinaryOp::Ge => ">=",
            BinaryOp::And => "&&",
            BinaryOp::Or => "||",
        }
    }

    pub fn is_arithmetic(self) -> bool {
        matches!(
            self,
            BinaryOp::Add | BinaryOp::Sub | BinaryOp::Mul | BinaryOp::Div | BinaryOp::Mod
        )
    }

    pub fn is_ordering(self) -> bool {
        matches!(self, BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge)
    }

    pub fn is_logical(self) -> bool {
        matches!(self, BinaryOp::And | BinaryOp::Or)
    }
}

impl Document {
    /// Entry flow (first declared)
    pub fn entry(&self) -> Option<&Flow> {
        self.flows.first()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_document_from_json() {
        let source = r#"{
            "name": "guard",
            "imports": [{"namespace": "combat"}],
            "flows": [{
                "name": "main",
                "body": [
                    {"kind": {"if": {
                        "condition": {"kind": {"binary": {
                            "op": "gt",
                            "left": {"kind": {"variable": "stamina"}},
                            "right": {"kind": {"number": 30.0}}
                        }}},
                        "then_body": [
                            {"kind": {"assign": {"target": "action", "value": {"kind": {"str": "block"}}}}}
                        ]
                    }}, "span": {"line": 3, "column": 5}}
                ]
            }]
        }"#;

        let doc: Document = serde_json::from_str(source).unwrap();
        assert_eq!(doc.name, "guard");
        assert_eq!(doc.imports[0].namespace, "combat");
        assert!(doc.extends.is_none());

        let flow = doc.entry().unwrap();
        assert_eq!(flow.body[0].span, Span::new(3, 5));
        match &flow.body[0].kind {
            StmtKind::If {
                then_body,
                else_body,
                ..
            } => {
                assert_eq!(then_body.len(), 1);
                assert!(else_body.is_empty());
            }
            other => panic!("Expected If, got {:?}", other),
        }
    }

    #[test]
    fn test_operator_classes() {
        assert!(BinaryOp::Mod.is_arithmetic());
        assert!(BinaryOp::Ge.is_ordering());
        assert!(!BinaryOp::Eq.is_ordering());
        assert!(BinaryOp::Or.is_logical());
        assert_eq!(BinaryOp::Le.symbol(), "<=");
    }
}
