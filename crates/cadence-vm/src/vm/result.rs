//! Execution result types

/// Result of instruction execution
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) enum ExecutionResult {
    /// Continue to next instruction
    Continue,
    /// Halt, or return from the outermost flow
    Halt,
    /// Suspend for the given number of seconds
    Wait(f64),
    /// Reached the continuation point with this table index
    Pause(usize),
}
