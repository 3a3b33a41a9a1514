//! Utility instruction execution (random, lerp, clamp)

use crate::error::EvaluationFault;
use crate::opcode::OpCode;
use crate::vm::frame::Machine;
use crate::vm::ops::ValueOperations;
use crate::vm::result::ExecutionResult;

impl Machine {
    /// Execute utility instructions
    pub(crate) fn execute_utility(
        &mut self,
        opcode: OpCode,
    ) -> Result<ExecutionResult, EvaluationFault> {
        match opcode {
            OpCode::Random => {
                let value = self.rng.next_f64();
                self.push(value)?;
            }

            OpCode::Lerp | OpCode::Clamp => {
                let c = self.pop()?;
                let b = self.pop()?;
                let a = self.pop()?;
                let result = ValueOperations::ternary(opcode, a, b, c).unwrap_or(f64::NAN);
                self.push(result)?;
            }

            _ => unreachable!("Non-utility opcode in utility handler"),
        }
        Ok(ExecutionResult::Continue)
    }
}
