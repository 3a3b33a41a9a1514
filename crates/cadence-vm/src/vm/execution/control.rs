//! Control flow instruction execution

use crate::error::EvaluationFault;
use crate::opcode::OpCode;
use crate::vm::frame::Machine;
use crate::vm::ops::ValueOperations;
use crate::vm::result::ExecutionResult;

impl Machine {
    /// Execute control flow instructions
    ///
    /// Jump targets are absolute offsets; the loader has already checked
    /// them against the code length.
    pub(crate) fn execute_control(
        &mut self,
        opcode: OpCode,
        operand: usize,
    ) -> Result<ExecutionResult, EvaluationFault> {
        match opcode {
            OpCode::Jump => {
                self.ip = operand;
                Ok(ExecutionResult::Continue)
            }

            OpCode::JumpIfFalse => {
                let cond = self.pop()?;
                if !ValueOperations::is_truthy(cond) {
                    self.ip = operand;
                }
                Ok(ExecutionResult::Continue)
            }

            OpCode::JumpIfTrue => {
                let cond = self.pop()?;
                if ValueOperations::is_truthy(cond) {
                    self.ip = operand;
                }
                Ok(ExecutionResult::Continue)
            }

            OpCode::Call => {
                self.push_call(self.ip)?;
                self.ip = operand;
                Ok(ExecutionResult::Continue)
            }

            OpCode::Return => match self.pop_call() {
                Some(return_to) => {
                    self.ip = return_to;
                    Ok(ExecutionResult::Continue)
                }
                None => Ok(ExecutionResult::Halt),
            },

            OpCode::Halt => Ok(ExecutionResult::Halt),

            OpCode::Wait => {
                let seconds = self.pop()?;
                Ok(ExecutionResult::Wait(seconds))
            }

            OpCode::Pause => Ok(ExecutionResult::Pause(operand)),

            _ => unreachable!("Non-control opcode in control handler"),
        }
    }
}
