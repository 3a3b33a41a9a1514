//! Convenience constructors for building documents in code.
//!
//! All nodes get a default span; use [`at`] to attach a location to a statement.

use crate::ast::*;
use crate::span::Span;

fn expr(kind: ExprKind) -> Expr {
    Expr {
        kind,
        span: Span::default(),
    }
}

fn stmt(kind: StmtKind) -> Stmt {
    Stmt {
        kind,
        span: Span::default(),
    }
}

pub fn num(value: f64) -> Expr {
    expr(ExprKind::Number(value))
}

pub fn boolean(value: bool) -> Expr {
    expr(ExprKind::Bool(value))
}

pub fn string(value: &str) -> Expr {
    expr(ExprKind::Str(value.to_string()))
}

pub fn vector(x: Expr, y: Expr, z: Expr) -> Expr {
    expr(ExprKind::Vector(vec![x, y, z]))
}

pub fn var(name: &str) -> Expr {
    expr(ExprKind::Variable(name.to_string()))
}

pub fn unary(op: UnaryOp, operand: Expr) -> Expr {
    expr(ExprKind::Unary {
        op,
        operand: Box::new(operand),
    })
}

pub fn binary(op: BinaryOp, left: Expr, right: Expr) -> Expr {
    expr(ExprKind::Binary {
        op,
        left: Box::new(left),
        right: Box::new(right),
    })
}

pub fn select(condition: Expr, then_expr: Expr, else_expr: Expr) -> Expr {
    expr(ExprKind::Conditional {
        condition: Box::new(condition),
        then_expr: Box::new(then_expr),
        else_expr: Box::new(else_expr),
    })
}

pub fn call(function: &str, args: Vec<Expr>) -> Expr {
    expr(ExprKind::Call {
        function: function.to_string(),
        args,
    })
}

pub fn let_(name: &str, value: Expr) -> Stmt {
    stmt(StmtKind::Let {
        name: name.to_string(),
        value,
    })
}

pub fn assign(target: &str, value: Expr) -> Stmt {
    stmt(StmtKind::Assign {
        target: target.to_string(),
        value,
    })
}

pub fn intent(channel: &str, value: Expr, urgency: Expr) -> Stmt {
    stmt(StmtKind::Intent {
        channel: channel.to_string(),
        value,
        urgency,
    })
}

pub fn if_(condition: Expr, then_body: Vec<Stmt>, else_body: Vec<Stmt>) -> Stmt {
    stmt(StmtKind::If {
        condition,
        then_body,
        else_body,
    })
}

pub fn repeat(count: u32, body: Vec<Stmt>) -> Stmt {
    stmt(StmtKind::Repeat { count, body })
}

pub fn call_flow(flow: &str) -> Stmt {
    stmt(StmtKind::Call {
        flow: flow.to_string(),
    })
}

pub fn goto(flow: &str) -> Stmt {
    stmt(StmtKind::Goto {
        flow: flow.to_string(),
    })
}

pub fn wait(seconds: Expr) -> Stmt {
    stmt(StmtKind::Wait { seconds })
}

pub fn continuation(name: &str, timeout: f64, default_flow: &str) -> Stmt {
    stmt(StmtKind::Continuation {
        name: name.to_string(),
        timeout,
        default_flow: default_flow.to_string(),
    })
}

pub fn halt() -> Stmt {
    stmt(StmtKind::Halt)
}

/// Attach a location to a statement
pub fn at(mut statement: Stmt, line: u32, column: u32) -> Stmt {
    statement.span = Span::new(line, column);
    statement
}

pub fn flow(name: &str, body: Vec<Stmt>) -> Flow {
    Flow {
        name: name.to_string(),
        body,
        span: Span::default(),
    }
}

pub fn document(name: &str, flows: Vec<Flow>) -> Document {
    Document {
        name: name.to_string(),
        imports: Vec::new(),
        extends: None,
        flows,
    }
}

pub fn import(namespace: &str) -> Import {
    Import {
        namespace: namespace.to_string(),
        span: Span::default(),
    }
}

/// Turn a document into an extension of `parent` at `attach_point`
pub fn extending(mut doc: Document, parent: &str, attach_point: &str) -> Document {
    doc.extends = Some(ExtensionTarget {
        parent: parent.to_string(),
        attach_point: attach_point.to_string(),
    });
    doc
}
