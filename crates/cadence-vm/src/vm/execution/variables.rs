//! Input, local and output instruction execution

use crate::error::EvaluationFault;
use crate::opcode::OpCode;
use crate::vm::frame::{Io, Machine};
use crate::vm::result::ExecutionResult;

impl Machine {
    /// Execute variable access instructions
    pub(crate) fn execute_variables(
        &mut self,
        opcode: OpCode,
        operand: usize,
        io: &mut Io<'_>,
    ) -> Result<ExecutionResult, EvaluationFault> {
        let invalid = EvaluationFault::InvalidOperand { ip: self.here() };

        match opcode {
            OpCode::LoadInput => {
                let value = *io.inputs.get(operand).ok_or(invalid)?;
                self.push(value)?;
            }

            OpCode::LoadLocal => {
                let value = *self.locals.get(operand).ok_or(invalid)?;
                self.push(value)?;
            }

            OpCode::StoreLocal => {
                let value = self.pop()?;
                *self.locals.get_mut(operand).ok_or(invalid)? = value;
            }

            OpCode::StoreOutput => {
                let value = self.pop()?;
                *io.outputs.get_mut(operand).ok_or(invalid)? = value;
            }

            _ => unreachable!("Non-variable opcode in variable handler"),
        }
        Ok(ExecutionResult::Continue)
    }
}
