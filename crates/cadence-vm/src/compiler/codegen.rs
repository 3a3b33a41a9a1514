//! Bytecode emission from optimized IR

use super::constants::ConstantPool;
use super::ir::{BlockId, Expr, Inst, Program, Terminator};
use super::semantic::DeclaredPoint;
use crate::bytecode::{ContinuationPoint, DebugMap};
use crate::error::{CompileError, CompileErrorKind};
use crate::opcode::{instruction::*, OpCode, MAX_OPERAND};
use cadence_ast::Span;
use cadence_types::name_hash;

/// Code and tables produced for one program
#[derive(Debug)]
pub(crate) struct Generated {
    pub(crate) code: Vec<u32>,
    pub(crate) entry_offset: u32,
    pub(crate) continuation_points: Vec<ContinuationPoint>,
    pub(crate) debug: DebugMap,
}

/// A jump, call or default offset waiting for its block to be placed
enum Fixup {
    Instruction { pos: usize, target: BlockId },
    DefaultOffset { point: usize, target: BlockId },
}

pub(crate) struct CodeGenerator<'a> {
    program: &'a Program,
    points: &'a [DeclaredPoint],
    pool: &'a mut ConstantPool,
    code: Vec<u32>,
    block_start: Vec<Option<u32>>,
    fixups: Vec<Fixup>,
    emitted_points: Vec<ContinuationPoint>,
    debug: DebugMap,
}

impl<'a> CodeGenerator<'a> {
    pub(crate) fn new(
        program: &'a Program,
        points: &'a [DeclaredPoint],
        pool: &'a mut ConstantPool,
    ) -> Self {
        Self {
            program,
            points,
            pool,
            code: Vec::new(),
            block_start: vec![None; program.blocks.len()],
            fixups: Vec::new(),
            emitted_points: Vec::new(),
            debug: DebugMap::default(),
        }
    }

    /// Emit every block in layout order and resolve all targets
    pub(crate) fn generate(mut self) -> Result<Generated, CompileError> {
        let program = self.program;
        for (i, &id) in program.layout.iter().enumerate() {
            let next = program.layout.get(i + 1).copied();
            self.emit_block(id, next);
        }

        self.check_limits()?;
        self.resolve_fixups()?;

        let entry_offset = self.start_of(program.entry())?;
        Ok(Generated {
            code: self.code,
            entry_offset,
            continuation_points: self.emitted_points,
            debug: self.debug,
        })
    }

    fn emit_block(&mut self, id: BlockId, next: Option<BlockId>) {
        let program = self.program;
        let block = &program.blocks[id];
        let start = self.current_position() as u32;
        self.block_start[id] = Some(start);

        if let Some((name, _)) = program.flows.iter().find(|(_, entry)| *entry == id) {
            self.debug.flows.push((start, name.clone()));
        }

        for (inst, span) in &block.insts {
            self.mark(*span);
            match inst {
                Inst::SetLocal(slot, value) => {
                    self.emit_expr(value);
                    self.emit(encode(OpCode::StoreLocal, u32::from(*slot)));
                }
                Inst::SetOutput(slot, value) => {
                    self.emit_expr(value);
                    self.emit(encode(OpCode::StoreOutput, u32::from(*slot)));
                }
                Inst::Call(target) => self.emit_to_block(OpCode::Call, *target),
            }
        }

        self.mark(block.terminator_span);
        match &block.terminator {
            Terminator::Jump(target) => {
                if next != Some(*target) {
                    self.emit_to_block(OpCode::Jump, *target);
                }
            }
            Terminator::Branch {
                condition,
                then_block,
                else_block,
            } => {
                self.emit_expr(condition);
                if next == Some(*else_block) {
                    self.emit_to_block(OpCode::JumpIfTrue, *then_block);
                } else {
                    self.emit_to_block(OpCode::JumpIfFalse, *else_block);
                    if next != Some(*then_block) {
                        self.emit_to_block(OpCode::Jump, *then_block);
                    }
                }
            }
            Terminator::Return => {
                self.emit(encode_op(OpCode::Return));
            }
            Terminator::Halt => {
                self.emit(encode_op(OpCode::Halt));
            }
            Terminator::Wait { seconds, next: resume } => {
                self.emit_expr(seconds);
                self.emit(encode_op(OpCode::Wait));
                if next != Some(*resume) {
                    self.emit_to_block(OpCode::Jump, *resume);
                }
            }
            Terminator::Pause { point, default } => self.emit_pause(*point, *default),
        }
    }

    /// Continuation points are numbered in emission order, so a point whose
    /// pause was optimized away leaves no table entry behind
    fn emit_pause(&mut self, point: usize, default: BlockId) {
        let declared = &self.points[point];
        let index = self.emitted_points.len();
        let offset = self.current_position() as u32;
        self.emitted_points.push(ContinuationPoint {
            name: declared.name.clone(),
            name_hash: name_hash(&declared.name),
            timeout_ms: declared.timeout_ms,
            default_offset: 0,
            offset,
        });
        self.emit(encode(OpCode::Pause, index as u32));
        self.fixups.push(Fixup::DefaultOffset {
            point: index,
            target: default,
        });
    }

    fn emit_expr(&mut self, expr: &Expr) {
        match expr {
            Expr::Const(value) => {
                let idx = self.pool.add_constant(*value);
                self.emit(encode(OpCode::PushConst, idx as u32));
            }
            Expr::Input(slot) => {
                self.emit(encode(OpCode::LoadInput, u32::from(*slot)));
            }
            Expr::Local(slot) => {
                self.emit(encode(OpCode::LoadLocal, u32::from(*slot)));
            }
            Expr::Random => {
                self.emit(encode_op(OpCode::Random));
            }
            Expr::Unary(op, operand) => {
                self.emit_expr(operand);
                self.emit(encode_op(*op));
            }
            Expr::Binary(op, left, right) => {
                self.emit_expr(left);
                self.emit_expr(right);
                self.emit(encode_op(*op));
            }
            Expr::Ternary(op, a, b, c) => {
                self.emit_expr(a);
                self.emit_expr(b);
                self.emit_expr(c);
                self.emit(encode_op(*op));
            }
            Expr::Select(condition, then_expr, else_expr) => {
                self.emit_expr(condition);
                let to_else = self.emit(encode_op(OpCode::JumpIfFalse));
                self.emit_expr(then_expr);
                let to_end = self.emit(encode_op(OpCode::Jump));
                self.patch_jump(to_else);
                self.emit_expr(else_expr);
                self.patch_jump(to_end);
            }
        }
    }

    /// Emit instruction
    fn emit(&mut self, instruction: u32) -> usize {
        self.code.push(instruction);
        self.code.len() - 1
    }

    /// Emit a jump or call whose target is the start of a block
    fn emit_to_block(&mut self, opcode: OpCode, target: BlockId) {
        let pos = self.emit(encode_op(opcode));
        self.fixups.push(Fixup::Instruction { pos, target });
    }

    /// Get current code position
    fn current_position(&self) -> usize {
        self.code.len()
    }

    /// Point the jump at `pos` to the current position
    fn patch_jump(&mut self, pos: usize) {
        let opcode = decode_opcode(self.code[pos]);
        let target = self.current_position() as u32;
        self.code[pos] = (u32::from(opcode) << 24) | (target & MAX_OPERAND);
    }

    /// Record the source location of the code emitted next
    fn mark(&mut self, span: Span) {
        let offset = self.current_position() as u32;
        match self.debug.spans.last_mut() {
            Some((_, last)) if *last == span => {}
            Some((start, last)) if *start == offset => *last = span,
            _ => self.debug.spans.push((offset, span)),
        }
    }

    fn start_of(&self, block: BlockId) -> Result<u32, CompileError> {
        self.block_start[block].ok_or_else(|| {
            CompileError::new(
                CompileErrorKind::Limit,
                Span::default(),
                format!("block {block} is referenced but was never emitted"),
            )
        })
    }

    fn resolve_fixups(&mut self) -> Result<(), CompileError> {
        let fixups = std::mem::take(&mut self.fixups);
        for fixup in fixups {
            match fixup {
                Fixup::Instruction { pos, target } => {
                    let start = self.start_of(target)?;
                    let opcode = decode_opcode(self.code[pos]);
                    self.code[pos] = (u32::from(opcode) << 24) | start;
                }
                Fixup::DefaultOffset { point, target } => {
                    self.emitted_points[point].default_offset = self.start_of(target)?;
                }
            }
        }
        Ok(())
    }

    fn check_limits(&self) -> Result<(), CompileError> {
        let limit = |what: &str, len: usize| {
            if len > MAX_OPERAND as usize {
                Err(CompileError::new(
                    CompileErrorKind::Limit,
                    Span::default(),
                    format!("{what} has {len} entries, at most {MAX_OPERAND} are addressable"),
                ))
            } else {
                Ok(())
            }
        };
        limit("code", self.code.len())?;
        limit("constant pool", self.pool.constants.len())?;
        limit("string table", self.pool.strings.len())?;
        limit("continuation point table", self.emitted_points.len())
    }
}
