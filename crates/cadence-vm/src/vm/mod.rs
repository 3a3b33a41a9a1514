//! Virtual Machine implementation
//!
//! One [`Interpreter`] per Model per entity. Construction sizes the operand
//! stack, locals and call stack from the Model header; `evaluate` reuses
//! them on every cycle and never allocates.

use crate::bytecode::Model;
use crate::error::{EvaluationFault, LoadError};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

// Module structure
mod execution;
pub(crate) mod frame;
pub(crate) mod ops;
pub(crate) mod result;
pub(crate) mod rng;

// Internal imports
use frame::Machine;
use result::ExecutionResult;

/// Default instruction ceiling per evaluation
pub const DEFAULT_INSTRUCTION_LIMIT: u32 = 100_000;

/// Interpreter settings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VmConfig {
    /// Instructions one evaluation (or one streaming advance) may execute
    pub instruction_limit: u32,
    /// Initial seed of the `random()` generator
    pub seed: u64,
}

impl Default for VmConfig {
    fn default() -> Self {
        Self {
            instruction_limit: DEFAULT_INSTRUCTION_LIMIT,
            seed: 0,
        }
    }
}

/// Check a caller buffer against the length the Model expects
pub(crate) fn check_len(what: &'static str, expected: usize, actual: usize) -> Result<(), EvaluationFault> {
    if expected == actual {
        Ok(())
    } else {
        Err(EvaluationFault::StateMismatch {
            what,
            expected,
            actual,
        })
    }
}

/// Per-cycle interpreter for Models without continuation points
#[derive(Debug, Clone)]
pub struct Interpreter {
    model: Arc<Model>,
    machine: Machine,
}

impl Interpreter {
    /// Create an interpreter for a loaded Model
    pub fn new(model: Arc<Model>, config: VmConfig) -> Result<Self, LoadError> {
        if model.has_continuation_points() {
            return Err(LoadError::RequiresStreaming);
        }
        let machine = Machine::new(&model, config.instruction_limit, config.seed);
        Ok(Self { model, machine })
    }

    pub fn model(&self) -> &Arc<Model> {
        &self.model
    }

    /// Restart the `random()` sequence from `seed`
    pub fn reseed(&mut self, seed: u64) {
        self.machine.rng = rng::SplitMix64::new(seed);
    }

    /// Run the Model once from its entry point.
    ///
    /// `outputs` is zero-filled first, so a channel the Model does not write
    /// this cycle reports urgency 0. `Wait` instructions are ignored.
    pub fn evaluate(&mut self, inputs: &[f64], outputs: &mut [f64]) -> Result<(), EvaluationFault> {
        check_len("input", self.model.input_len(), inputs.len())?;
        check_len("output", self.model.output_len(), outputs.len())?;

        outputs.fill(0.0);
        self.machine.reset(self.model.entry_offset() as usize);
        self.machine.reset_budget();

        loop {
            match self.machine.run(&self.model, inputs, outputs)? {
                ExecutionResult::Halt => return Ok(()),
                ExecutionResult::Wait(_) | ExecutionResult::Continue => continue,
                ExecutionResult::Pause(_) => {
                    return Err(EvaluationFault::UnexpectedPause {
                        ip: self.machine.here(),
                    })
                }
            }
        }
    }
}
