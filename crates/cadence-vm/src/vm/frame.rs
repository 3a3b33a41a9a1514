//! Execution state of one interpreter instance
//!
//! All buffers are sized from the Model when the machine is created.
//! Running never grows them.

use super::result::ExecutionResult;
use super::rng::SplitMix64;
use crate::bytecode::Model;
use crate::error::EvaluationFault;
use crate::opcode::{instruction::*, OpCode};

/// Caller-owned state an evaluation reads and writes
pub(crate) struct Io<'s> {
    pub(crate) constants: &'s [f64],
    pub(crate) inputs: &'s [f64],
    pub(crate) outputs: &'s mut [f64],
}

#[derive(Debug, Clone)]
pub(crate) struct Machine {
    stack: Vec<f64>,
    sp: usize,
    pub(crate) locals: Vec<f64>,
    calls: Vec<usize>,
    depth: usize,
    pub(crate) ip: usize,
    pub(crate) rng: SplitMix64,
    executed: u32,
    limit: u32,
}

impl Machine {
    pub(crate) fn new(model: &Model, instruction_limit: u32, seed: u64) -> Self {
        Self {
            stack: vec![0.0; usize::from(model.max_stack())],
            sp: 0,
            locals: vec![0.0; usize::from(model.local_count())],
            calls: vec![0; usize::from(model.max_call_depth())],
            depth: 0,
            ip: model.entry_offset() as usize,
            rng: SplitMix64::new(seed),
            executed: 0,
            limit: instruction_limit,
        }
    }

    /// Rewind to `entry` with empty stacks and zeroed locals
    pub(crate) fn reset(&mut self, entry: usize) {
        self.sp = 0;
        self.depth = 0;
        self.ip = entry;
        self.locals.fill(0.0);
    }

    /// Start a new instruction budget
    pub(crate) fn reset_budget(&mut self) {
        self.executed = 0;
    }

    /// Fetch-decode-execute until the program halts, waits or pauses
    pub(crate) fn run(
        &mut self,
        model: &Model,
        inputs: &[f64],
        outputs: &mut [f64],
    ) -> Result<ExecutionResult, EvaluationFault> {
        let code = model.code();
        let mut io = Io {
            constants: model.constants(),
            inputs,
            outputs,
        };

        loop {
            let ip = self.ip;
            let word = *code.get(ip).ok_or(EvaluationFault::ProgramCounter { ip })?;

            self.executed += 1;
            if self.executed > self.limit {
                return Err(EvaluationFault::InstructionLimit { limit: self.limit });
            }

            let byte = decode_opcode(word);
            let opcode = OpCode::from_u8(byte).ok_or(EvaluationFault::InvalidOpcode { ip, byte })?;
            let operand = decode_operand(word) as usize;
            self.ip = ip + 1;

            match self.execute_instruction(opcode, operand, &mut io)? {
                ExecutionResult::Continue => continue,
                stop => return Ok(stop),
            }
        }
    }

    /// Execute a single instruction
    fn execute_instruction(
        &mut self,
        opcode: OpCode,
        operand: usize,
        io: &mut Io<'_>,
    ) -> Result<ExecutionResult, EvaluationFault> {
        match opcode {
            // Stack manipulation
            OpCode::PushConst | OpCode::Pop | OpCode::Dup | OpCode::Swap | OpCode::Nop => {
                self.execute_stack(opcode, operand, io)
            }

            // Variables and outputs
            OpCode::LoadInput | OpCode::LoadLocal | OpCode::StoreLocal | OpCode::StoreOutput => {
                self.execute_variables(opcode, operand, io)
            }

            // Arithmetic operations
            OpCode::Add
            | OpCode::Sub
            | OpCode::Mul
            | OpCode::Div
            | OpCode::Mod
            | OpCode::Neg
            | OpCode::Min
            | OpCode::Max
            | OpCode::Abs => self.execute_arithmetic(opcode),

            // Comparison operations
            OpCode::Eq | OpCode::Ne | OpCode::Lt | OpCode::Le | OpCode::Gt | OpCode::Ge => {
                self.execute_comparison(opcode)
            }

            // Logical operations
            OpCode::Not | OpCode::And | OpCode::Or => self.execute_logical(opcode),

            // Control flow
            OpCode::Jump
            | OpCode::JumpIfFalse
            | OpCode::JumpIfTrue
            | OpCode::Call
            | OpCode::Return
            | OpCode::Halt
            | OpCode::Wait
            | OpCode::Pause => self.execute_control(opcode, operand),

            // Utilities
            OpCode::Random | OpCode::Lerp | OpCode::Clamp => self.execute_utility(opcode),
        }
    }

    // ===== Helper methods =====

    /// Offset of the instruction being executed
    #[inline]
    pub(crate) fn here(&self) -> usize {
        self.ip.saturating_sub(1)
    }

    #[inline]
    pub(crate) fn push(&mut self, value: f64) -> Result<(), EvaluationFault> {
        let slot = self
            .stack
            .get_mut(self.sp)
            .ok_or(EvaluationFault::StackOverflow { ip: self.ip.saturating_sub(1) })?;
        *slot = value;
        self.sp += 1;
        Ok(())
    }

    #[inline]
    pub(crate) fn pop(&mut self) -> Result<f64, EvaluationFault> {
        if self.sp == 0 {
            return Err(EvaluationFault::StackUnderflow { ip: self.here() });
        }
        self.sp -= 1;
        Ok(self.stack[self.sp])
    }

    #[inline]
    pub(crate) fn peek(&self) -> Result<f64, EvaluationFault> {
        self.sp
            .checked_sub(1)
            .map(|top| self.stack[top])
            .ok_or(EvaluationFault::StackUnderflow { ip: self.here() })
    }

    /// Push a return address
    #[inline]
    pub(crate) fn push_call(&mut self, return_to: usize) -> Result<(), EvaluationFault> {
        let slot = self
            .calls
            .get_mut(self.depth)
            .ok_or(EvaluationFault::CallStackOverflow { ip: self.ip.saturating_sub(1) })?;
        *slot = return_to;
        self.depth += 1;
        Ok(())
    }

    /// Pop a return address; `None` at the outermost flow
    #[inline]
    pub(crate) fn pop_call(&mut self) -> Option<usize> {
        self.depth = self.depth.checked_sub(1)?;
        Some(self.calls[self.depth])
    }

    #[cfg(test)]
    pub(crate) fn stack_len(&self) -> usize {
        self.sp
    }
}
