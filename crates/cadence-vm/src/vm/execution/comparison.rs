//! Comparison instruction execution

use crate::error::EvaluationFault;
use crate::opcode::OpCode;
use crate::vm::frame::Machine;
use crate::vm::ops::ValueOperations;
use crate::vm::result::ExecutionResult;

impl Machine {
    /// Execute comparison instructions
    ///
    /// Comparisons follow IEEE-754: anything involving NaN is false except `!=`.
    pub(crate) fn execute_comparison(
        &mut self,
        opcode: OpCode,
    ) -> Result<ExecutionResult, EvaluationFault> {
        let right = self.pop()?;
        let left = self.pop()?;
        let result = match opcode {
            OpCode::Eq | OpCode::Ne | OpCode::Lt | OpCode::Le | OpCode::Gt | OpCode::Ge => {
                ValueOperations::binary(opcode, left, right)
            }
            _ => unreachable!("Non-comparison opcode in comparison handler"),
        };
        self.push(result.unwrap_or(0.0))?;
        Ok(ExecutionResult::Continue)
    }
}
