//! Stack manipulation instruction execution

use crate::error::EvaluationFault;
use crate::opcode::OpCode;
use crate::vm::frame::{Io, Machine};
use crate::vm::result::ExecutionResult;

impl Machine {
    /// Execute stack manipulation instructions
    pub(crate) fn execute_stack(
        &mut self,
        opcode: OpCode,
        operand: usize,
        io: &mut Io<'_>,
    ) -> Result<ExecutionResult, EvaluationFault> {
        match opcode {
            OpCode::PushConst => {
                let value = *io
                    .constants
                    .get(operand)
                    .ok_or(EvaluationFault::InvalidOperand { ip: self.here() })?;
                self.push(value)?;
            }

            OpCode::Pop => {
                self.pop()?;
            }

            OpCode::Dup => {
                let value = self.peek()?;
                self.push(value)?;
            }

            OpCode::Swap => {
                let top = self.pop()?;
                let below = self.pop()?;
                self.push(top)?;
                self.push(below)?;
            }

            OpCode::Nop => {}

            _ => unreachable!("Non-stack opcode in stack handler"),
        }
        Ok(ExecutionResult::Continue)
    }
}
