//! Logical instruction execution

use crate::error::EvaluationFault;
use crate::opcode::OpCode;
use crate::vm::frame::Machine;
use crate::vm::ops::ValueOperations;
use crate::vm::result::ExecutionResult;

impl Machine {
    /// Execute logical instructions. Operands are both evaluated; there is
    /// no short-circuit at this level.
    pub(crate) fn execute_logical(
        &mut self,
        opcode: OpCode,
    ) -> Result<ExecutionResult, EvaluationFault> {
        let result = match opcode {
            OpCode::Not => {
                let value = self.pop()?;
                ValueOperations::unary(opcode, value)
            }
            OpCode::And | OpCode::Or => {
                let right = self.pop()?;
                let left = self.pop()?;
                ValueOperations::binary(opcode, left, right)
            }
            _ => unreachable!("Non-logical opcode in logical handler"),
        };
        self.push(result.unwrap_or(0.0))?;
        Ok(ExecutionResult::Continue)
    }
}
