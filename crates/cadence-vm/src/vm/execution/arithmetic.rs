//! Arithmetic instruction execution

use crate::error::EvaluationFault;
use crate::opcode::OpCode;
use crate::vm::frame::Machine;
use crate::vm::ops::ValueOperations;
use crate::vm::result::ExecutionResult;

impl Machine {
    /// Execute arithmetic instructions
    pub(crate) fn execute_arithmetic(
        &mut self,
        opcode: OpCode,
    ) -> Result<ExecutionResult, EvaluationFault> {
        let result = match opcode {
            OpCode::Neg | OpCode::Abs => {
                let value = self.pop()?;
                ValueOperations::unary(opcode, value)
            }

            OpCode::Add
            | OpCode::Sub
            | OpCode::Mul
            | OpCode::Div
            | OpCode::Mod
            | OpCode::Min
            | OpCode::Max => {
                let right = self.pop()?;
                let left = self.pop()?;
                ValueOperations::binary(opcode, left, right)
            }

            _ => unreachable!("Non-arithmetic opcode in arithmetic handler"),
        };
        self.push(result.unwrap_or(f64::NAN))?;
        Ok(ExecutionResult::Continue)
    }
}
