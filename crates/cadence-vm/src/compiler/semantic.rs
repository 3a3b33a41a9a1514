//! Semantic analysis: name resolution, slot assignment and type checking.
//!
//! Produces a typed tree where every reference is already an input slot, a
//! local slot or a constant. All errors of a document are collected; a
//! failed initializer poisons its local so that later uses stay quiet.

use super::constants::{get_constant, ConstantPool};
use super::schema::{Access, SchemaRegistry, VariableSchema};
use super::symbols::{Local, SymbolTable};
use crate::bytecode::{ChannelBinding, ExtensionHeader, Schema, SchemaEntry};
use crate::error::{CompileError, CompileErrorKind};
use cadence_ast::{BinaryOp, Document, Expr, ExprKind, Span, Stmt, StmtKind, UnaryOp};
use cadence_types::{name_hash, ModelId, ValueType};
use std::collections::HashMap;

/// Upper bound on a `repeat` count
pub(crate) const MAX_REPEAT: u32 = 10_000;

pub(crate) type FlowIndex = usize;

/// Builtin functions callable from expressions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) enum Builtin {
    Random,
    Lerp,
    Clamp,
    Min,
    Max,
    Abs,
}

impl Builtin {
    fn lookup(name: &str) -> Option<Self> {
        match name {
            "random" => Some(Builtin::Random),
            "lerp" => Some(Builtin::Lerp),
            "clamp" => Some(Builtin::Clamp),
            "min" => Some(Builtin::Min),
            "max" => Some(Builtin::Max),
            "abs" => Some(Builtin::Abs),
            _ => None,
        }
    }

    fn arity(self) -> usize {
        match self {
            Builtin::Random => 0,
            Builtin::Abs => 1,
            Builtin::Min | Builtin::Max => 2,
            Builtin::Lerp | Builtin::Clamp => 3,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct TypedExpr {
    pub(crate) kind: TypedExprKind,
    pub(crate) ty: ValueType,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum TypedExprKind {
    /// Number, bool (0/1) or string-table index
    Const(f64),
    /// Three number components
    Vector(Vec<TypedExpr>),
    Input(u16),
    Local(u16),
    Unary(UnaryOp, Box<TypedExpr>),
    Binary(BinaryOp, Box<TypedExpr>, Box<TypedExpr>),
    Select(Box<TypedExpr>, Box<TypedExpr>, Box<TypedExpr>),
    Builtin(Builtin, Vec<TypedExpr>),
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct TypedStmt {
    pub(crate) kind: TypedStmtKind,
    pub(crate) span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum TypedStmtKind {
    SetLocal {
        slot: u16,
        value: TypedExpr,
    },
    SetOutput {
        slot: u16,
        value: TypedExpr,
    },
    Intent {
        value_slot: u16,
        urgency_slot: u16,
        value: TypedExpr,
        urgency: TypedExpr,
    },
    If {
        condition: TypedExpr,
        then_body: Vec<TypedStmt>,
        else_body: Vec<TypedStmt>,
    },
    Repeat {
        count: u32,
        counter: u16,
        body: Vec<TypedStmt>,
    },
    Call(FlowIndex),
    Goto(FlowIndex),
    Wait(TypedExpr),
    Continuation {
        point: usize,
        default: FlowIndex,
    },
    Halt,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct TypedFlow {
    pub(crate) name: String,
    pub(crate) body: Vec<TypedStmt>,
    pub(crate) span: Span,
}

/// Continuation point as declared in the document
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct DeclaredPoint {
    pub(crate) name: String,
    pub(crate) timeout_ms: u32,
}

/// Output of semantic analysis
#[derive(Debug)]
pub(crate) struct Analysis {
    pub(crate) flows: Vec<TypedFlow>,
    pub(crate) schema: Schema,
    pub(crate) points: Vec<DeclaredPoint>,
    pub(crate) local_count: usize,
    pub(crate) max_call_depth: u16,
    pub(crate) extension: Option<ExtensionHeader>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Edge {
    /// Returns to the caller; adds a call frame
    Call,
    /// Goto or default continuation; replaces the current flow
    Jump,
}

/// Run semantic analysis over a whole document
pub(crate) fn analyze(
    document: &Document,
    registry: &dyn SchemaRegistry,
    pool: &mut ConstantPool,
) -> Result<Analysis, Vec<CompileError>> {
    let mut analyzer = Analyzer::new(registry, pool);
    analyzer.check_document(document);
    analyzer.finish(document)
}

struct Analyzer<'a> {
    registry: &'a dyn SchemaRegistry,
    pool: &'a mut ConstantPool,
    imports: Vec<String>,
    symbols: SymbolTable,
    flow_index: HashMap<String, FlowIndex>,
    schema: Schema,
    input_slots: usize,
    output_slots: usize,
    points: Vec<DeclaredPoint>,
    edges: Vec<Vec<(FlowIndex, Edge)>>,
    current_flow: FlowIndex,
    flows: Vec<TypedFlow>,
    errors: Vec<CompileError>,
}

impl<'a> Analyzer<'a> {
    fn new(registry: &'a dyn SchemaRegistry, pool: &'a mut ConstantPool) -> Self {
        Self {
            registry,
            pool,
            imports: Vec::new(),
            symbols: SymbolTable::new(),
            flow_index: HashMap::new(),
            schema: Schema::default(),
            input_slots: 0,
            output_slots: 0,
            points: Vec::new(),
            edges: Vec::new(),
            current_flow: 0,
            flows: Vec::new(),
            errors: Vec::new(),
        }
    }

    fn error(&mut self, kind: CompileErrorKind, span: Span, message: impl Into<String>) {
        self.errors.push(CompileError::new(kind, span, message));
    }

    // ===== Document =====

    fn check_document(&mut self, document: &Document) {
        if document.flows.is_empty() {
            self.error(
                CompileErrorKind::EmptyDocument,
                Span::default(),
                format!("document `{}` declares no flows", document.name),
            );
            return;
        }

        for import in &document.imports {
            if self.registry.has_namespace(&import.namespace) {
                self.imports.push(import.namespace.clone());
            } else {
                self.error(
                    CompileErrorKind::UnresolvedImport,
                    import.span,
                    format!("namespace `{}` is unknown", import.namespace),
                );
            }
        }

        for (index, flow) in document.flows.iter().enumerate() {
            if self.flow_index.contains_key(&flow.name) {
                self.error(
                    CompileErrorKind::DuplicateFlow,
                    flow.span,
                    format!("flow `{}` is declared more than once", flow.name),
                );
            } else {
                self.flow_index.insert(flow.name.clone(), index);
            }
        }

        self.edges = vec![Vec::new(); document.flows.len()];
        for (index, flow) in document.flows.iter().enumerate() {
            self.current_flow = index;
            let body = self.check_block(&flow.body);
            self.flows.push(TypedFlow {
                name: flow.name.clone(),
                body,
                span: flow.span,
            });
        }
    }

    fn finish(mut self, document: &Document) -> Result<Analysis, Vec<CompileError>> {
        let max_call_depth = if self.flows.is_empty() {
            0
        } else {
            self.check_flow_graph(document)
        };

        if !self.errors.is_empty() {
            return Err(self.errors);
        }

        let extension = document.extends.as_ref().map(|target| ExtensionHeader {
            parent: ModelId::from_name(&target.parent),
            attach_hash: name_hash(&target.attach_point),
        });

        Ok(Analysis {
            flows: self.flows,
            schema: self.schema,
            points: self.points,
            local_count: self.symbols.slot_count(),
            max_call_depth,
            extension,
        })
    }

    /// Reject cycles over call, goto and default edges and compute the
    /// deepest call chain reachable from the entry flow.
    fn check_flow_graph(&mut self, document: &Document) -> u16 {
        let count = self.edges.len();
        let order = topological_order(count, |node| {
            self.edges[node].iter().map(|(target, _)| *target).collect()
        });
        let mut ordered = vec![false; count];
        for &node in &order {
            ordered[node] = true;
        }

        // Unordered nodes sit on a cycle or downstream of one
        let mut cyclic = false;
        for node in 0..count {
            if !ordered[node] && self.reaches(node, node) {
                cyclic = true;
                let flow = &document.flows[node];
                self.error(
                    CompileErrorKind::RecursiveFlow,
                    flow.span,
                    format!(
                        "flow `{}` can reach itself through call, goto or continuation",
                        flow.name
                    ),
                );
            }
        }
        if cyclic {
            return 0;
        }

        // Successors come later in topological order
        let mut depth = vec![0usize; count];
        for &node in order.iter().rev() {
            depth[node] = self.edges[node]
                .iter()
                .map(|(target, edge)| match edge {
                    Edge::Call => depth[*target] + 1,
                    Edge::Jump => depth[*target],
                })
                .max()
                .unwrap_or(0);
        }

        match u16::try_from(depth[0]) {
            Ok(depth) => depth,
            Err(_) => {
                self.error(
                    CompileErrorKind::Limit,
                    Span::default(),
                    "call depth exceeds 65535",
                );
                0
            }
        }
    }

    /// Whether `to` is reachable from `from` over at least one edge
    fn reaches(&self, from: FlowIndex, to: FlowIndex) -> bool {
        let mut visited = vec![false; self.edges.len()];
        let mut stack: Vec<FlowIndex> = self.edges[from].iter().map(|(t, _)| *t).collect();
        while let Some(node) = stack.pop() {
            if node == to {
                return true;
            }
            if !std::mem::replace(&mut visited[node], true) {
                stack.extend(self.edges[node].iter().map(|(t, _)| *t));
            }
        }
        false
    }

    // ===== Slots =====

    fn resolve(&self, name: &str) -> Option<(String, VariableSchema)> {
        if let Some(schema) = self.registry.lookup(name) {
            return Some((name.to_string(), schema));
        }
        self.imports.iter().find_map(|namespace| {
            let qualified = format!("{namespace}.{name}");
            self.registry
                .lookup(&qualified)
                .map(|schema| (qualified, schema))
        })
    }

    fn slot(&mut self, start: usize, width: usize, span: Span, what: &str) -> Option<u16> {
        if start + width > u16::MAX as usize {
            self.error(
                CompileErrorKind::Limit,
                span,
                format!("too many {what} slots"),
            );
            return None;
        }
        Some(start as u16)
    }

    fn bind_input(&mut self, name: &str, ty: ValueType, span: Span) -> Option<u16> {
        if let Some(entry) = self.schema.inputs.iter().find(|e| e.name == name) {
            return Some(entry.slot);
        }
        let slot = self.slot(self.input_slots, ty.width(), span, "input")?;
        self.input_slots += ty.width();
        self.pool.add_string(name);
        self.schema.inputs.push(SchemaEntry {
            name: name.to_string(),
            ty,
            slot,
        });
        Some(slot)
    }

    fn bind_output(&mut self, name: &str, ty: ValueType, span: Span) -> Option<u16> {
        if let Some(entry) = self.schema.outputs.iter().find(|e| e.name == name) {
            return Some(entry.slot);
        }
        let slot = self.slot(self.output_slots, ty.width(), span, "output")?;
        self.output_slots += ty.width();
        self.pool.add_string(name);
        self.schema.outputs.push(SchemaEntry {
            name: name.to_string(),
            ty,
            slot,
        });
        Some(slot)
    }

    fn bind_channel(&mut self, name: &str, ty: ValueType, span: Span) -> Option<(u16, u16)> {
        if let Some(channel) = self.schema.channels.iter().find(|c| c.name == name) {
            return Some((channel.value_slot, channel.urgency_slot));
        }
        let value_slot = self.slot(self.output_slots, ty.width() + 1, span, "output")?;
        let urgency_slot = value_slot + ty.width() as u16;
        self.output_slots += ty.width() + 1;
        self.pool.add_string(name);
        self.schema.channels.push(ChannelBinding {
            name: name.to_string(),
            ty,
            value_slot,
            urgency_slot,
        });
        Some((value_slot, urgency_slot))
    }

    fn allocate_local(&mut self, width: usize, span: Span) -> Option<u16> {
        let start = self.symbols.allocate(width);
        self.slot(start, width, span, "local")
    }

    // ===== Statements =====

    fn check_block(&mut self, stmts: &[Stmt]) -> Vec<TypedStmt> {
        self.symbols.push_scope();
        let typed = stmts
            .iter()
            .filter_map(|stmt| {
                self.check_stmt(stmt).map(|kind| TypedStmt {
                    kind,
                    span: stmt.span,
                })
            })
            .collect();
        self.symbols.pop_scope();
        typed
    }

    fn check_stmt(&mut self, stmt: &Stmt) -> Option<TypedStmtKind> {
        let span = stmt.span;
        match &stmt.kind {
            StmtKind::Let { name, value } => {
                let value = self.check_expr(value);
                let local = match &value {
                    Some(v) => Local {
                        slot: self.allocate_local(v.ty.width(), span)?,
                        ty: Some(v.ty),
                    },
                    None => Local { slot: 0, ty: None },
                };
                self.symbols.define(name, local);
                Some(TypedStmtKind::SetLocal {
                    slot: local.slot,
                    value: value?,
                })
            }

            StmtKind::Assign { target, value } => {
                let value = self.check_expr(value);
                self.check_assign(target, value, span)
            }

            StmtKind::Intent {
                channel,
                value,
                urgency,
            } => {
                let value = self.check_expr(value);
                let urgency = self.check_expr(urgency);
                self.check_intent(channel, value, urgency, span)
            }

            StmtKind::If {
                condition,
                then_body,
                else_body,
            } => {
                let condition = self.check_expr(condition);
                let condition = self.expect_type(condition, ValueType::Bool, "condition", span);
                let then_body = self.check_block(then_body);
                let else_body = self.check_block(else_body);
                Some(TypedStmtKind::If {
                    condition: condition?,
                    then_body,
                    else_body,
                })
            }

            StmtKind::Repeat { count, body } => {
                if *count > MAX_REPEAT {
                    self.error(
                        CompileErrorKind::InvalidRepeatCount,
                        span,
                        format!("repeat count {count} exceeds {MAX_REPEAT}"),
                    );
                }
                let counter = self.allocate_local(1, span);
                let body = self.check_block(body);
                if *count > MAX_REPEAT {
                    return None;
                }
                Some(TypedStmtKind::Repeat {
                    count: *count,
                    counter: counter?,
                    body,
                })
            }

            StmtKind::Call { flow } => {
                let target = self.flow_edge(flow, Edge::Call, span)?;
                Some(TypedStmtKind::Call(target))
            }

            StmtKind::Goto { flow } => {
                let target = self.flow_edge(flow, Edge::Jump, span)?;
                Some(TypedStmtKind::Goto(target))
            }

            StmtKind::Wait { seconds } => {
                let seconds = self.check_expr(seconds);
                let seconds = self.expect_type(seconds, ValueType::Number, "wait duration", span)?;
                Some(TypedStmtKind::Wait(seconds))
            }

            StmtKind::Continuation {
                name,
                timeout,
                default_flow,
            } => self.check_continuation(name, *timeout, default_flow, span),

            StmtKind::Halt => Some(TypedStmtKind::Halt),
        }
    }

    fn check_assign(
        &mut self,
        target: &str,
        value: Option<TypedExpr>,
        span: Span,
    ) -> Option<TypedStmtKind> {
        if let Some(local) = self.symbols.get(target) {
            let ty = local.ty?;
            let value = self.expect_type(value, ty, "assigned value", span)?;
            return Some(TypedStmtKind::SetLocal {
                slot: local.slot,
                value,
            });
        }

        match self.resolve(target) {
            Some((qualified, schema)) if schema.access == Access::Output => {
                let value = self.expect_type(value, schema.ty, "assigned value", span);
                let slot = self.bind_output(&qualified, schema.ty, span)?;
                Some(TypedStmtKind::SetOutput { slot, value: value? })
            }
            Some((qualified, schema)) => {
                let what = match schema.access {
                    Access::Input => "an input",
                    _ => "a channel; use an intent",
                };
                self.error(
                    CompileErrorKind::InvalidTarget,
                    span,
                    format!("`{qualified}` is {what} and cannot be assigned"),
                );
                None
            }
            None => {
                let kind = if get_constant(target).is_some() {
                    CompileErrorKind::InvalidTarget
                } else {
                    CompileErrorKind::UnknownVariable
                };
                self.error(kind, span, format!("cannot assign to `{target}`"));
                None
            }
        }
    }

    fn check_intent(
        &mut self,
        channel: &str,
        value: Option<TypedExpr>,
        urgency: Option<TypedExpr>,
        span: Span,
    ) -> Option<TypedStmtKind> {
        let urgency = self.expect_type(urgency, ValueType::Number, "urgency", span);
        match self.resolve(channel) {
            Some((qualified, schema)) if schema.access == Access::Channel => {
                let value = self.expect_type(value, schema.ty, "intent value", span);
                let (value_slot, urgency_slot) = self.bind_channel(&qualified, schema.ty, span)?;
                Some(TypedStmtKind::Intent {
                    value_slot,
                    urgency_slot,
                    value: value?,
                    urgency: urgency?,
                })
            }
            Some((qualified, _)) => {
                self.error(
                    CompileErrorKind::InvalidTarget,
                    span,
                    format!("`{qualified}` is not an intent channel"),
                );
                None
            }
            None => {
                self.error(
                    CompileErrorKind::UnknownVariable,
                    span,
                    format!("unknown channel `{channel}`"),
                );
                None
            }
        }
    }

    fn check_continuation(
        &mut self,
        name: &str,
        timeout: f64,
        default_flow: &str,
        span: Span,
    ) -> Option<TypedStmtKind> {
        let millis = timeout * 1000.0;
        let timeout_ms = if timeout.is_finite() && timeout >= 0.0 && millis <= u32::MAX as f64 {
            Some(millis.round() as u32)
        } else {
            self.error(
                CompileErrorKind::InvalidTimeout,
                span,
                format!(
                    "timeout of continuation `{name}` must be between 0 and {} seconds, found {timeout}",
                    u32::MAX / 1000
                ),
            );
            None
        };

        if self.points.iter().any(|p| p.name == name) {
            self.error(
                CompileErrorKind::DuplicateContinuationPoint,
                span,
                format!("continuation point `{name}` is declared more than once"),
            );
            return None;
        }

        let default = self.flow_edge(default_flow, Edge::Jump, span);
        self.pool.add_string(name);
        self.points.push(DeclaredPoint {
            name: name.to_string(),
            timeout_ms: timeout_ms.unwrap_or(0),
        });
        timeout_ms?;
        Some(TypedStmtKind::Continuation {
            point: self.points.len() - 1,
            default: default?,
        })
    }

    fn flow_edge(&mut self, name: &str, edge: Edge, span: Span) -> Option<FlowIndex> {
        match self.flow_index.get(name).copied() {
            Some(target) => {
                self.edges[self.current_flow].push((target, edge));
                Some(target)
            }
            None => {
                self.error(
                    CompileErrorKind::UnknownFlow,
                    span,
                    format!("flow `{name}` does not exist"),
                );
                None
            }
        }
    }

    // ===== Expressions =====

    fn expect_type(
        &mut self,
        expr: Option<TypedExpr>,
        expected: ValueType,
        what: &str,
        span: Span,
    ) -> Option<TypedExpr> {
        let expr = expr?;
        if expr.ty == expected {
            Some(expr)
        } else {
            self.error(
                CompileErrorKind::TypeMismatch,
                span,
                format!("{what} must be {expected}, found {}", expr.ty),
            );
            None
        }
    }

    fn check_expr(&mut self, expr: &Expr) -> Option<TypedExpr> {
        let span = expr.span;
        match &expr.kind {
            ExprKind::Number(value) => Some(constant(*value, ValueType::Number)),

            ExprKind::Bool(value) => Some(constant(
                if *value { 1.0 } else { 0.0 },
                ValueType::Bool,
            )),

            ExprKind::Str(text) => {
                let idx = self.pool.add_string(text);
                Some(constant(idx as f64, ValueType::String))
            }

            ExprKind::Vector(items) => {
                let components: Vec<Option<TypedExpr>> = items
                    .iter()
                    .map(|item| {
                        let checked = self.check_expr(item);
                        self.expect_type(checked, ValueType::Number, "vector component", item.span)
                    })
                    .collect();
                if components.len() != 3 {
                    self.error(
                        CompileErrorKind::ArityMismatch,
                        span,
                        format!("vector needs 3 components, found {}", components.len()),
                    );
                    return None;
                }
                let components = components.into_iter().collect::<Option<Vec<_>>>()?;
                Some(TypedExpr {
                    kind: TypedExprKind::Vector(components),
                    ty: ValueType::Vector3,
                })
            }

            ExprKind::Variable(name) => self.check_variable(name, span),

            ExprKind::Unary { op, operand } => {
                let operand = self.check_expr(operand);
                let ty = match op {
                    UnaryOp::Neg => ValueType::Number,
                    UnaryOp::Not => ValueType::Bool,
                };
                let operand = self.expect_type(operand, ty, "operand", span)?;
                Some(TypedExpr {
                    kind: TypedExprKind::Unary(*op, Box::new(operand)),
                    ty,
                })
            }

            ExprKind::Binary { op, left, right } => {
                let left = self.check_expr(left);
                let right = self.check_expr(right);
                self.check_binary(*op, left?, right?, span)
            }

            ExprKind::Conditional {
                condition,
                then_expr,
                else_expr,
            } => {
                let condition = self.check_expr(condition);
                let condition = self.expect_type(condition, ValueType::Bool, "condition", span);
                let then_expr = self.check_expr(then_expr);
                let else_expr = self.check_expr(else_expr);
                let (condition, then_expr, else_expr) = (condition?, then_expr?, else_expr?);
                if then_expr.ty != else_expr.ty {
                    self.error(
                        CompileErrorKind::TypeMismatch,
                        span,
                        format!(
                            "conditional branches differ: {} and {}",
                            then_expr.ty, else_expr.ty
                        ),
                    );
                    return None;
                }
                let ty = then_expr.ty;
                Some(TypedExpr {
                    kind: TypedExprKind::Select(
                        Box::new(condition),
                        Box::new(then_expr),
                        Box::new(else_expr),
                    ),
                    ty,
                })
            }

            ExprKind::Call { function, args } => {
                let args: Vec<Option<TypedExpr>> = args
                    .iter()
                    .map(|arg| {
                        let checked = self.check_expr(arg);
                        self.expect_type(checked, ValueType::Number, "argument", arg.span)
                    })
                    .collect();
                let Some(builtin) = Builtin::lookup(function) else {
                    self.error(
                        CompileErrorKind::UnknownFunction,
                        span,
                        format!("unknown function `{function}`"),
                    );
                    return None;
                };
                if args.len() != builtin.arity() {
                    self.error(
                        CompileErrorKind::ArityMismatch,
                        span,
                        format!(
                            "`{function}` takes {} arguments, found {}",
                            builtin.arity(),
                            args.len()
                        ),
                    );
                    return None;
                }
                let args = args.into_iter().collect::<Option<Vec<_>>>()?;
                Some(TypedExpr {
                    kind: TypedExprKind::Builtin(builtin, args),
                    ty: ValueType::Number,
                })
            }
        }
    }

    fn check_variable(&mut self, name: &str, span: Span) -> Option<TypedExpr> {
        if let Some(local) = self.symbols.get(name) {
            return Some(TypedExpr {
                kind: TypedExprKind::Local(local.slot),
                ty: local.ty?,
            });
        }

        match self.resolve(name) {
            Some((qualified, schema)) if schema.access == Access::Input => {
                let slot = self.bind_input(&qualified, schema.ty, span)?;
                Some(TypedExpr {
                    kind: TypedExprKind::Input(slot),
                    ty: schema.ty,
                })
            }
            Some((qualified, _)) => {
                self.error(
                    CompileErrorKind::InvalidTarget,
                    span,
                    format!("`{qualified}` is write-only and cannot be read"),
                );
                None
            }
            None => match get_constant(name) {
                Some(value) => Some(constant(value, ValueType::Number)),
                None => {
                    self.error(
                        CompileErrorKind::UnknownVariable,
                        span,
                        format!("unknown variable `{name}`"),
                    );
                    None
                }
            },
        }
    }

    fn check_binary(
        &mut self,
        op: BinaryOp,
        left: TypedExpr,
        right: TypedExpr,
        span: Span,
    ) -> Option<TypedExpr> {
        let (lt, rt) = (left.ty, right.ty);
        let ty = if op.is_arithmetic() {
            (lt == ValueType::Number && rt == ValueType::Number).then_some(ValueType::Number)
        } else if op.is_ordering() {
            (lt == ValueType::Number && rt == ValueType::Number).then_some(ValueType::Bool)
        } else if op.is_logical() {
            (lt == ValueType::Bool && rt == ValueType::Bool).then_some(ValueType::Bool)
        } else {
            // Equality works on any scalar type as long as both sides agree
            (lt == rt && lt != ValueType::Vector3).then_some(ValueType::Bool)
        };

        match ty {
            Some(ty) => Some(TypedExpr {
                kind: TypedExprKind::Binary(op, Box::new(left), Box::new(right)),
                ty,
            }),
            None => {
                self.error(
                    CompileErrorKind::TypeMismatch,
                    span,
                    format!("operator `{}` cannot combine {lt} and {rt}", op.symbol()),
                );
                None
            }
        }
    }
}

fn constant(value: f64, ty: ValueType) -> TypedExpr {
    TypedExpr {
        kind: TypedExprKind::Const(value),
        ty,
    }
}

/// Kahn's algorithm; nodes on or behind a cycle are left out
fn topological_order(count: usize, successors: impl Fn(usize) -> Vec<usize>) -> Vec<usize> {
    let adjacency: Vec<Vec<usize>> = (0..count).map(&successors).collect();
    let mut in_degree = vec![0usize; count];
    for targets in &adjacency {
        for &target in targets {
            in_degree[target] += 1;
        }
    }

    let mut ready: Vec<usize> = (0..count).filter(|&n| in_degree[n] == 0).collect();
    let mut order = Vec::with_capacity(count);
    while let Some(node) = ready.pop() {
        order.push(node);
        for &target in &adjacency[node] {
            in_degree[target] -= 1;
            if in_degree[target] == 0 {
                ready.push(target);
            }
        }
    }
    order
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::schema::StaticSchemaRegistry;
    use cadence_ast::build::*;

    fn registry() -> StaticSchemaRegistry {
        StaticSchemaRegistry::new()
            .input("combat.stamina", ValueType::Number)
            .input("combat.enemy_staggered", ValueType::Bool)
            .input("position", ValueType::Vector3)
            .output("action", ValueType::String)
            .channel("locomotion", ValueType::Vector3)
    }

    fn analyze_doc(doc: &Document) -> Result<Analysis, Vec<CompileError>> {
        let mut pool = ConstantPool::new();
        analyze(doc, &registry(), &mut pool)
    }

    fn kinds(errors: &[CompileError]) -> Vec<CompileErrorKind> {
        errors.iter().map(|e| e.kind).collect()
    }

    #[test]
    fn test_imports_resolve_unqualified_names() {
        let mut doc = document(
            "brain",
            vec![flow(
                "main",
                vec![let_(
                    "tired",
                    binary(BinaryOp::Lt, var("stamina"), num(10.0)),
                )],
            )],
        );
        doc.imports.push(import("combat"));

        let analysis = analyze_doc(&doc).unwrap();
        assert_eq!(analysis.schema.inputs.len(), 1);
        assert_eq!(analysis.schema.inputs[0].name, "combat.stamina");
        assert_eq!(analysis.local_count, 1);
    }

    #[test]
    fn test_errors_are_accumulated() {
        let doc = document(
            "brain",
            vec![flow(
                "main",
                vec![
                    let_("a", var("missing")),
                    let_("b", binary(BinaryOp::Add, boolean(true), num(1.0))),
                    call_flow("nowhere"),
                    // Poisoned local: no second error
                    let_("c", binary(BinaryOp::Add, var("a"), num(1.0))),
                ],
            )],
        );
        let errors = analyze_doc(&doc).unwrap_err();
        assert_eq!(
            kinds(&errors),
            vec![
                CompileErrorKind::UnknownVariable,
                CompileErrorKind::TypeMismatch,
                CompileErrorKind::UnknownFlow,
            ]
        );
    }

    #[test]
    fn test_unresolved_import() {
        let mut doc = document("brain", vec![flow("main", vec![halt()])]);
        doc.imports.push(import("stealth"));
        let errors = analyze_doc(&doc).unwrap_err();
        assert_eq!(kinds(&errors), vec![CompileErrorKind::UnresolvedImport]);
    }

    #[test]
    fn test_recursion_rejected() {
        let doc = document(
            "brain",
            vec![
                flow("main", vec![call_flow("a")]),
                flow("a", vec![call_flow("b")]),
                flow("b", vec![goto("a")]),
            ],
        );
        let errors = analyze_doc(&doc).unwrap_err();
        assert_eq!(
            kinds(&errors),
            vec![CompileErrorKind::RecursiveFlow, CompileErrorKind::RecursiveFlow]
        );
        assert!(errors[0].message.contains("`a`"));
    }

    #[test]
    fn test_call_depth() {
        let doc = document(
            "brain",
            vec![
                flow("main", vec![call_flow("a"), goto("c")]),
                flow("a", vec![call_flow("b")]),
                flow("b", vec![halt()]),
                flow("c", vec![call_flow("b")]),
            ],
        );
        assert_eq!(analyze_doc(&doc).unwrap().max_call_depth, 2);
    }

    #[test]
    fn test_invalid_targets() {
        let doc = document(
            "brain",
            vec![flow(
                "main",
                vec![
                    assign("position", vector(num(0.0), num(0.0), num(0.0))),
                    assign("locomotion", vector(num(0.0), num(0.0), num(0.0))),
                    intent("action", string("idle"), num(1.0)),
                ],
            )],
        );
        let errors = analyze_doc(&doc).unwrap_err();
        assert_eq!(
            kinds(&errors),
            vec![
                CompileErrorKind::InvalidTarget,
                CompileErrorKind::InvalidTarget,
                CompileErrorKind::InvalidTarget,
            ]
        );
    }

    #[test]
    fn test_channel_slots_follow_outputs() {
        let doc = document(
            "brain",
            vec![flow(
                "main",
                vec![
                    assign("action", string("idle")),
                    intent(
                        "locomotion",
                        vector(num(1.0), num(0.0), num(0.0)),
                        num(0.5),
                    ),
                ],
            )],
        );
        let analysis = analyze_doc(&doc).unwrap();
        let channel = &analysis.schema.channels[0];
        assert_eq!(channel.value_slot, 1);
        assert_eq!(channel.urgency_slot, 4);
        assert_eq!(analysis.schema.output_len(), 5);
    }

    #[test]
    fn test_continuation_checks() {
        let doc = document(
            "brain",
            vec![
                flow(
                    "main",
                    vec![
                        continuation("cp", -1.0, "ending"),
                        continuation("cp", 1.0, "ending"),
                        continuation("other", 1.0, "missing"),
                    ],
                ),
                flow("ending", vec![halt()]),
            ],
        );
        let errors = analyze_doc(&doc).unwrap_err();
        assert_eq!(
            kinds(&errors),
            vec![
                CompileErrorKind::InvalidTimeout,
                CompileErrorKind::DuplicateContinuationPoint,
                CompileErrorKind::UnknownFlow,
            ]
        );
    }

    #[test]
    fn test_builtin_arity() {
        let doc = document(
            "brain",
            vec![flow(
                "main",
                vec![
                    let_("a", call("lerp", vec![num(1.0)])),
                    let_("b", call("sqrt", vec![num(4.0)])),
                    let_("c", call("clamp", vec![num(4.0), num(0.0), num(1.0)])),
                ],
            )],
        );
        let errors = analyze_doc(&doc).unwrap_err();
        assert_eq!(
            kinds(&errors),
            vec![
                CompileErrorKind::ArityMismatch,
                CompileErrorKind::UnknownFunction,
            ]
        );
    }

    #[test]
    fn test_repeat_bound() {
        let doc = document(
            "brain",
            vec![flow("main", vec![repeat(MAX_REPEAT + 1, vec![halt()])])],
        );
        let errors = analyze_doc(&doc).unwrap_err();
        assert_eq!(kinds(&errors), vec![CompileErrorKind::InvalidRepeatCount]);
    }

    #[test]
    fn test_empty_document() {
        let doc = document("brain", vec![]);
        let errors = analyze_doc(&doc).unwrap_err();
        assert_eq!(kinds(&errors), vec![CompileErrorKind::EmptyDocument]);
    }
}
