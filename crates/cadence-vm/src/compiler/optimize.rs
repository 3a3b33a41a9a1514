//! IR optimization passes, gated by level.
//!
//! - 1: constant folding
//! - 2: + dead-branch elimination, jump threading, unreachable block removal
//! - 3: + caching of repeated input/constant-only subexpressions per block
//!
//! Every pass preserves the observable output for every input and seed. In
//! particular nothing that contains `random()` is ever folded, duplicated or
//! dropped, so the random sequence stays the same.

use super::ir::{Block, BlockId, Expr, Inst, Program, Terminator};
use crate::vm::ops::ValueOperations;
use tracing::debug;

pub(crate) fn optimize(program: &mut Program, level: u8) {
    if level >= 1 {
        fold_constants(program);
    }
    if level >= 2 {
        eliminate_dead_branches(program);
        thread_jumps(program);
        remove_unreachable(program);
    }
    if level >= 3 {
        cache_subexpressions(program);
    }
}

// ===== Constant folding =====

fn fold_constants(program: &mut Program) {
    for block in &mut program.blocks {
        for (inst, _) in &mut block.insts {
            if let Some(expr) = inst.expr_mut() {
                fold(expr);
            }
        }
        if let Some(expr) = block.terminator.expr_mut() {
            fold(expr);
        }
    }
}

fn const_of(expr: &Expr) -> Option<f64> {
    match expr {
        Expr::Const(value) => Some(*value),
        _ => None,
    }
}

fn take(expr: &mut Expr) -> Expr {
    std::mem::replace(expr, Expr::Const(0.0))
}

/// Fold bottom-up. An operator folds only when all of its operands are
/// constants; a select folds when its condition is.
pub(crate) fn fold(expr: &mut Expr) {
    let replacement = match expr {
        Expr::Const(_) | Expr::Input(_) | Expr::Local(_) | Expr::Random => None,
        Expr::Unary(op, a) => {
            fold(a);
            const_of(a)
                .and_then(|x| ValueOperations::unary(*op, x))
                .map(Expr::Const)
        }
        Expr::Binary(op, a, b) => {
            fold(a);
            fold(b);
            match (const_of(a), const_of(b)) {
                (Some(x), Some(y)) => ValueOperations::binary(*op, x, y).map(Expr::Const),
                _ => None,
            }
        }
        Expr::Ternary(op, a, b, c) => {
            fold(a);
            fold(b);
            fold(c);
            match (const_of(a), const_of(b), const_of(c)) {
                (Some(x), Some(y), Some(z)) => {
                    ValueOperations::ternary(*op, x, y, z).map(Expr::Const)
                }
                _ => None,
            }
        }
        Expr::Select(condition, a, b) => {
            fold(condition);
            fold(a);
            fold(b);
            const_of(condition).map(|c| {
                if ValueOperations::is_truthy(c) {
                    take(a)
                } else {
                    take(b)
                }
            })
        }
    };
    if let Some(replacement) = replacement {
        *expr = replacement;
    }
}

// ===== Control flow =====

fn eliminate_dead_branches(program: &mut Program) {
    for block in &mut program.blocks {
        if let Terminator::Branch {
            condition: Expr::Const(c),
            then_block,
            else_block,
        } = block.terminator
        {
            let target = if ValueOperations::is_truthy(c) {
                then_block
            } else {
                else_block
            };
            block.terminator = Terminator::Jump(target);
        }
    }
}

/// Follow chains of empty blocks that only jump
fn final_target(blocks: &[Block], mut target: BlockId) -> BlockId {
    for _ in 0..blocks.len() {
        let block = &blocks[target];
        match block.terminator {
            Terminator::Jump(next) if block.insts.is_empty() && next != target => target = next,
            _ => break,
        }
    }
    target
}

fn thread_jumps(program: &mut Program) {
    let snapshot = program.blocks.clone();
    for block in &mut program.blocks {
        for (inst, _) in &mut block.insts {
            if let Inst::Call(target) = inst {
                *target = final_target(&snapshot, *target);
            }
        }
        match &mut block.terminator {
            Terminator::Jump(target) => *target = final_target(&snapshot, *target),
            Terminator::Branch {
                then_block,
                else_block,
                ..
            } => {
                *then_block = final_target(&snapshot, *then_block);
                *else_block = final_target(&snapshot, *else_block);
            }
            Terminator::Wait { next, .. } => *next = final_target(&snapshot, *next),
            Terminator::Pause { default, .. } => *default = final_target(&snapshot, *default),
            Terminator::Return | Terminator::Halt => {}
        }

        // Both arms agree: only keep the condition if evaluating it matters
        if let Terminator::Branch {
            condition,
            then_block,
            else_block,
        } = &block.terminator
        {
            if then_block == else_block && condition.is_pure() {
                block.terminator = Terminator::Jump(*then_block);
            }
        }
    }
}

fn remove_unreachable(program: &mut Program) {
    let reachable = program.reachable();
    let before = program.layout.len();
    program.layout.retain(|&id| reachable[id]);
    debug!(
        removed = before - program.layout.len(),
        "Unreachable blocks removed"
    );
}

// ===== Subexpression caching =====

fn is_candidate(expr: &Expr) -> bool {
    expr.size() >= 2 && expr.is_pure() && !expr.reads_locals()
}

fn collect_candidates<'e>(expr: &'e Expr, out: &mut Vec<&'e Expr>) {
    if is_candidate(expr) {
        out.push(expr);
    }
    match expr {
        Expr::Const(_) | Expr::Input(_) | Expr::Local(_) | Expr::Random => {}
        Expr::Unary(_, a) => collect_candidates(a, out),
        Expr::Binary(_, a, b) => {
            collect_candidates(a, out);
            collect_candidates(b, out);
        }
        Expr::Ternary(_, a, b, c) | Expr::Select(a, b, c) => {
            collect_candidates(a, out);
            collect_candidates(b, out);
            collect_candidates(c, out);
        }
    }
}

/// Largest candidate that occurs at least twice in the block
fn largest_repeated(block: &Block) -> Option<Expr> {
    let mut candidates = Vec::new();
    for (inst, _) in &block.insts {
        if let Some(expr) = inst.expr() {
            collect_candidates(expr, &mut candidates);
        }
    }
    if let Some(expr) = block.terminator.expr() {
        collect_candidates(expr, &mut candidates);
    }

    let mut best: Option<&Expr> = None;
    for (i, expr) in candidates.iter().enumerate() {
        if best.is_some_and(|b| b.size() >= expr.size()) {
            continue;
        }
        if candidates[i + 1..].iter().any(|other| expr.same(other)) {
            best = Some(expr);
        }
    }
    best.cloned()
}

fn replace_all(expr: &mut Expr, target: &Expr, slot: u16) {
    if expr.same(target) {
        *expr = Expr::Local(slot);
        return;
    }
    match expr {
        Expr::Const(_) | Expr::Input(_) | Expr::Local(_) | Expr::Random => {}
        Expr::Unary(_, a) => replace_all(a, target, slot),
        Expr::Binary(_, a, b) => {
            replace_all(a, target, slot);
            replace_all(b, target, slot);
        }
        Expr::Ternary(_, a, b, c) | Expr::Select(a, b, c) => {
            replace_all(a, target, slot);
            replace_all(b, target, slot);
            replace_all(c, target, slot);
        }
    }
}

fn cache_subexpressions(program: &mut Program) {
    let mut cached = 0usize;
    for id in program.layout.clone() {
        while let Some(expr) = largest_repeated(&program.blocks[id]) {
            let slot = program.allocate_local() as u16;
            let block = &mut program.blocks[id];
            for (inst, _) in &mut block.insts {
                if let Some(e) = inst.expr_mut() {
                    replace_all(e, &expr, slot);
                }
            }
            if let Some(e) = block.terminator.expr_mut() {
                replace_all(e, &expr, slot);
            }
            let span = block
                .insts
                .first()
                .map(|(_, span)| *span)
                .unwrap_or(block.terminator_span);
            // Candidates never read locals, so inserting in front is always
            // before every use, including uses inside earlier cached values
            block.insts.insert(0, (Inst::SetLocal(slot, expr), span));
            cached += 1;
        }
    }
    debug!(cached, "Subexpressions cached");
}
