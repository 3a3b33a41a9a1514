//! Intermediate representation: scalar expressions in basic blocks.
//!
//! Vector values are split into three scalar components here, so every IR
//! expression leaves exactly one value on the operand stack. `Wait` and
//! continuation points terminate their block; nothing after them in the same
//! block can observe a suspension.

use super::semantic::{Analysis, Builtin, TypedExpr, TypedExprKind, TypedStmt, TypedStmtKind};
use crate::opcode::OpCode;
use cadence_ast::{BinaryOp, Span, UnaryOp};

pub(crate) type BlockId = usize;

#[derive(Debug, Clone)]
pub(crate) enum Expr {
    Const(f64),
    Input(u16),
    Local(u16),
    Random,
    Unary(OpCode, Box<Expr>),
    Binary(OpCode, Box<Expr>, Box<Expr>),
    /// `Lerp` or `Clamp`
    Ternary(OpCode, Box<Expr>, Box<Expr>, Box<Expr>),
    /// Evaluates only the selected branch
    Select(Box<Expr>, Box<Expr>, Box<Expr>),
}

impl Expr {
    pub(crate) fn unary(op: OpCode, operand: Expr) -> Self {
        Expr::Unary(op, Box::new(operand))
    }

    pub(crate) fn binary(op: OpCode, left: Expr, right: Expr) -> Self {
        Expr::Binary(op, Box::new(left), Box::new(right))
    }

    /// Free of `random()`, so evaluating it twice gives the same value
    pub(crate) fn is_pure(&self) -> bool {
        match self {
            Expr::Random => false,
            Expr::Const(_) | Expr::Input(_) | Expr::Local(_) => true,
            Expr::Unary(_, a) => a.is_pure(),
            Expr::Binary(_, a, b) => a.is_pure() && b.is_pure(),
            Expr::Ternary(_, a, b, c) | Expr::Select(a, b, c) => {
                a.is_pure() && b.is_pure() && c.is_pure()
            }
        }
    }

    pub(crate) fn reads_locals(&self) -> bool {
        match self {
            Expr::Local(_) => true,
            Expr::Const(_) | Expr::Input(_) | Expr::Random => false,
            Expr::Unary(_, a) => a.reads_locals(),
            Expr::Binary(_, a, b) => a.reads_locals() || b.reads_locals(),
            Expr::Ternary(_, a, b, c) | Expr::Select(a, b, c) => {
                a.reads_locals() || b.reads_locals() || c.reads_locals()
            }
        }
    }

    /// Structural equality; constants compare by bit pattern
    pub(crate) fn same(&self, other: &Expr) -> bool {
        match (self, other) {
            (Expr::Const(a), Expr::Const(b)) => a.to_bits() == b.to_bits(),
            (Expr::Input(a), Expr::Input(b)) | (Expr::Local(a), Expr::Local(b)) => a == b,
            (Expr::Random, Expr::Random) => true,
            (Expr::Unary(op1, a1), Expr::Unary(op2, a2)) => op1 == op2 && a1.same(a2),
            (Expr::Binary(op1, a1, b1), Expr::Binary(op2, a2, b2)) => {
                op1 == op2 && a1.same(a2) && b1.same(b2)
            }
            (Expr::Ternary(op1, a1, b1, c1), Expr::Ternary(op2, a2, b2, c2)) => {
                op1 == op2 && a1.same(a2) && b1.same(b2) && c1.same(c2)
            }
            (Expr::Select(a1, b1, c1), Expr::Select(a2, b2, c2)) => {
                a1.same(a2) && b1.same(b2) && c1.same(c2)
            }
            _ => false,
        }
    }

    /// Number of nodes
    pub(crate) fn size(&self) -> usize {
        match self {
            Expr::Const(_) | Expr::Input(_) | Expr::Local(_) | Expr::Random => 1,
            Expr::Unary(_, a) => 1 + a.size(),
            Expr::Binary(_, a, b) => 1 + a.size() + b.size(),
            Expr::Ternary(_, a, b, c) | Expr::Select(a, b, c) => {
                1 + a.size() + b.size() + c.size()
            }
        }
    }
}

#[derive(Debug, Clone)]
pub(crate) enum Inst {
    SetLocal(u16, Expr),
    SetOutput(u16, Expr),
    /// Run the flow starting at the block, then continue
    Call(BlockId),
}

impl Inst {
    pub(crate) fn expr(&self) -> Option<&Expr> {
        match self {
            Inst::SetLocal(_, e) | Inst::SetOutput(_, e) => Some(e),
            Inst::Call(_) => None,
        }
    }

    pub(crate) fn expr_mut(&mut self) -> Option<&mut Expr> {
        match self {
            Inst::SetLocal(_, e) | Inst::SetOutput(_, e) => Some(e),
            Inst::Call(_) => None,
        }
    }
}

#[derive(Debug, Clone)]
pub(crate) enum Terminator {
    Jump(BlockId),
    Branch {
        condition: Expr,
        then_block: BlockId,
        else_block: BlockId,
    },
    /// End of a flow: back to the caller, or halt when there is none
    Return,
    Halt,
    Wait {
        seconds: Expr,
        next: BlockId,
    },
    /// Continuation point; `default` is the entry of the default flow
    Pause {
        point: usize,
        default: BlockId,
    },
}

impl Terminator {
    pub(crate) fn successors(&self) -> Vec<BlockId> {
        match self {
            Terminator::Jump(target) => vec![*target],
            Terminator::Branch {
                then_block,
                else_block,
                ..
            } => vec![*then_block, *else_block],
            Terminator::Return | Terminator::Halt => Vec::new(),
            Terminator::Wait { next, .. } => vec![*next],
            Terminator::Pause { default, .. } => vec![*default],
        }
    }

    pub(crate) fn expr(&self) -> Option<&Expr> {
        match self {
            Terminator::Branch { condition, .. } => Some(condition),
            Terminator::Wait { seconds, .. } => Some(seconds),
            _ => None,
        }
    }

    pub(crate) fn expr_mut(&mut self) -> Option<&mut Expr> {
        match self {
            Terminator::Branch { condition, .. } => Some(condition),
            Terminator::Wait { seconds, .. } => Some(seconds),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub(crate) struct Block {
    pub(crate) insts: Vec<(Inst, Span)>,
    pub(crate) terminator: Terminator,
    pub(crate) terminator_span: Span,
}

/// Whole-document IR
#[derive(Debug, Clone)]
pub(crate) struct Program {
    pub(crate) blocks: Vec<Block>,
    /// Emission order
    pub(crate) layout: Vec<BlockId>,
    /// Entry block of each flow, in document order
    pub(crate) flows: Vec<(String, BlockId)>,
    pub(crate) local_count: usize,
}

impl Program {
    /// Entry block of the document's first flow
    pub(crate) fn entry(&self) -> BlockId {
        self.flows.first().map(|(_, block)| *block).unwrap_or(0)
    }

    pub(crate) fn allocate_local(&mut self) -> usize {
        let slot = self.local_count;
        self.local_count += 1;
        slot
    }

    /// Blocks reachable from the entry flow, through jumps, calls and defaults
    pub(crate) fn reachable(&self) -> Vec<bool> {
        let mut seen = vec![false; self.blocks.len()];
        let mut stack = vec![self.entry()];
        while let Some(id) = stack.pop() {
            if std::mem::replace(&mut seen[id], true) {
                continue;
            }
            let block = &self.blocks[id];
            for (inst, _) in &block.insts {
                if let Inst::Call(target) = inst {
                    stack.push(*target);
                }
            }
            stack.extend(block.terminator.successors());
        }
        seen
    }
}

/// Lower the typed tree into basic blocks
pub(crate) fn build(analysis: &Analysis) -> Program {
    let mut builder = Builder {
        blocks: Vec::new(),
        layout: Vec::new(),
        current: 0,
        local_count: analysis.local_count,
        entries: Vec::new(),
    };
    let entries: Vec<BlockId> = analysis.flows.iter().map(|_| builder.new_block()).collect();
    builder.entries = entries;

    for (index, flow) in analysis.flows.iter().enumerate() {
        builder.switch_to(builder.entries[index]);
        builder.lower_stmts(&flow.body);
        builder.terminate(Terminator::Return, flow.span);
    }

    let flows = analysis
        .flows
        .iter()
        .zip(&builder.entries)
        .map(|(flow, &block)| (flow.name.clone(), block))
        .collect();

    Program {
        blocks: builder.blocks,
        layout: builder.layout,
        flows,
        local_count: builder.local_count,
    }
}

struct Builder {
    blocks: Vec<Block>,
    layout: Vec<BlockId>,
    current: BlockId,
    local_count: usize,
    entries: Vec<BlockId>,
}

impl Builder {
    fn new_block(&mut self) -> BlockId {
        self.blocks.push(Block {
            insts: Vec::new(),
            terminator: Terminator::Return,
            terminator_span: Span::default(),
        });
        self.blocks.len() - 1
    }

    fn switch_to(&mut self, block: BlockId) {
        self.current = block;
        self.layout.push(block);
    }

    fn emit(&mut self, inst: Inst, span: Span) {
        self.blocks[self.current].insts.push((inst, span));
    }

    fn terminate(&mut self, terminator: Terminator, span: Span) {
        let block = &mut self.blocks[self.current];
        block.terminator = terminator;
        block.terminator_span = span;
    }

    /// Terminate the current block and continue in a fresh one that nothing
    /// jumps to
    fn terminate_and_detach(&mut self, terminator: Terminator, span: Span) {
        self.terminate(terminator, span);
        let next = self.new_block();
        self.switch_to(next);
    }

    fn lower_stmts(&mut self, stmts: &[TypedStmt]) {
        for stmt in stmts {
            self.lower_stmt(stmt);
        }
    }

    fn lower_stmt(&mut self, stmt: &TypedStmt) {
        let span = stmt.span;
        match &stmt.kind {
            TypedStmtKind::SetLocal { slot, value } => {
                for (i, component) in self.lower_expr(value, span).into_iter().enumerate() {
                    self.emit(Inst::SetLocal(slot + i as u16, component), span);
                }
            }

            TypedStmtKind::SetOutput { slot, value } => {
                for (i, component) in self.lower_expr(value, span).into_iter().enumerate() {
                    self.emit(Inst::SetOutput(slot + i as u16, component), span);
                }
            }

            TypedStmtKind::Intent {
                value_slot,
                urgency_slot,
                value,
                urgency,
            } => {
                let components = self.lower_expr(value, span);
                let urgency = self.lower_scalar(urgency, span);
                for (i, component) in components.into_iter().enumerate() {
                    self.emit(Inst::SetOutput(value_slot + i as u16, component), span);
                }
                self.emit(Inst::SetOutput(*urgency_slot, urgency), span);
            }

            TypedStmtKind::If {
                condition,
                then_body,
                else_body,
            } => {
                let condition = self.lower_scalar(condition, span);
                let then_block = self.new_block();
                let merge = self.new_block();
                let else_block = if else_body.is_empty() {
                    merge
                } else {
                    self.new_block()
                };
                self.terminate(
                    Terminator::Branch {
                        condition,
                        then_block,
                        else_block,
                    },
                    span,
                );

                self.switch_to(then_block);
                self.lower_stmts(then_body);
                self.terminate(Terminator::Jump(merge), span);

                if else_block != merge {
                    self.switch_to(else_block);
                    self.lower_stmts(else_body);
                    self.terminate(Terminator::Jump(merge), span);
                }
                self.switch_to(merge);
            }

            TypedStmtKind::Repeat {
                count,
                counter,
                body,
            } => {
                if *count == 0 {
                    return;
                }
                self.emit(Inst::SetLocal(*counter, Expr::Const(*count as f64)), span);
                let header = self.new_block();
                let body_block = self.new_block();
                let exit = self.new_block();
                self.terminate(Terminator::Jump(header), span);

                self.switch_to(header);
                self.terminate(
                    Terminator::Branch {
                        condition: Expr::binary(OpCode::Gt, Expr::Local(*counter), Expr::Const(0.0)),
                        then_block: body_block,
                        else_block: exit,
                    },
                    span,
                );

                self.switch_to(body_block);
                self.emit(
                    Inst::SetLocal(
                        *counter,
                        Expr::binary(OpCode::Sub, Expr::Local(*counter), Expr::Const(1.0)),
                    ),
                    span,
                );
                self.lower_stmts(body);
                self.terminate(Terminator::Jump(header), span);

                self.switch_to(exit);
            }

            TypedStmtKind::Call(flow) => {
                let target = self.entries[*flow];
                self.emit(Inst::Call(target), span);
            }

            TypedStmtKind::Goto(flow) => {
                let target = self.entries[*flow];
                self.terminate_and_detach(Terminator::Jump(target), span);
            }

            TypedStmtKind::Wait(seconds) => {
                let seconds = self.lower_scalar(seconds, span);
                let next = self.new_block();
                self.terminate(Terminator::Wait { seconds, next }, span);
                self.switch_to(next);
            }

            TypedStmtKind::Continuation { point, default } => {
                let default = self.entries[*default];
                self.terminate_and_detach(
                    Terminator::Pause {
                        point: *point,
                        default,
                    },
                    span,
                );
            }

            TypedStmtKind::Halt => self.terminate_and_detach(Terminator::Halt, span),
        }
    }

    fn lower_scalar(&mut self, expr: &TypedExpr, span: Span) -> Expr {
        let mut components = self.lower_expr(expr, span);
        components.swap_remove(0)
    }

    /// One IR expression per slot of the value
    fn lower_expr(&mut self, expr: &TypedExpr, span: Span) -> Vec<Expr> {
        let width = expr.ty.width() as u16;
        match &expr.kind {
            TypedExprKind::Const(value) => vec![Expr::Const(*value)],

            TypedExprKind::Vector(items) => items
                .iter()
                .map(|item| self.lower_scalar(item, span))
                .collect(),

            TypedExprKind::Input(slot) => (0..width).map(|i| Expr::Input(slot + i)).collect(),

            TypedExprKind::Local(slot) => (0..width).map(|i| Expr::Local(slot + i)).collect(),

            TypedExprKind::Unary(op, operand) => {
                let operand = self.lower_scalar(operand, span);
                let op = match op {
                    UnaryOp::Neg => OpCode::Neg,
                    UnaryOp::Not => OpCode::Not,
                };
                vec![Expr::unary(op, operand)]
            }

            TypedExprKind::Binary(op, left, right) => {
                let left = self.lower_scalar(left, span);
                let right = self.lower_scalar(right, span);
                vec![Expr::binary(binary_opcode(*op), left, right)]
            }

            TypedExprKind::Select(condition, then_expr, else_expr) => {
                let mut condition = self.lower_scalar(condition, span);
                if width > 1 && !condition.is_pure() {
                    // Every component must see the same random draw
                    let temp = self.local_count as u16;
                    self.local_count += 1;
                    self.emit(Inst::SetLocal(temp, condition), span);
                    condition = Expr::Local(temp);
                }
                let then_parts = self.lower_expr(then_expr, span);
                let else_parts = self.lower_expr(else_expr, span);
                then_parts
                    .into_iter()
                    .zip(else_parts)
                    .map(|(a, b)| Expr::Select(Box::new(condition.clone()), Box::new(a), Box::new(b)))
                    .collect()
            }

            TypedExprKind::Builtin(builtin, args) => {
                let mut args: Vec<Expr> = args.iter().map(|arg| self.lower_scalar(arg, span)).collect();
                let mut next = || Box::new(args.remove(0));
                let lowered = match builtin {
                    Builtin::Random => Expr::Random,
                    Builtin::Abs => Expr::Unary(OpCode::Abs, next()),
                    Builtin::Min => Expr::Binary(OpCode::Min, next(), next()),
                    Builtin::Max => Expr::Binary(OpCode::Max, next(), next()),
                    Builtin::Lerp => Expr::Ternary(OpCode::Lerp, next(), next(), next()),
                    Builtin::Clamp => Expr::Ternary(OpCode::Clamp, next(), next(), next()),
                };
                vec![lowered]
            }
        }
    }
}

pub(crate) fn binary_opcode(op: BinaryOp) -> OpCode {
    match op {
        BinaryOp::Add => OpCode::Add,
        BinaryOp::Sub => OpCode::Sub,
        BinaryOp::Mul => OpCode::Mul,
        BinaryOp::Div => OpCode::Div,
        BinaryOp::Mod => OpCode::Mod,
        BinaryOp::Eq => OpCode::Eq,
        BinaryOp::Ne => OpCode::Ne,
        BinaryOp::Lt => OpCode::Lt,
        BinaryOp::Le => OpCode::Le,
        BinaryOp::Gt => OpCode::Gt,
        BinaryOp::Ge => OpCode::Ge,
        BinaryOp::And => OpCode::And,
        BinaryOp::Or => OpCode::Or,
    }
}
