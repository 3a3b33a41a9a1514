//! Continuation-aware interpreter for long-running sequences
//!
//! Per continuation point:
//!
//! ```text
//! Running --PAUSE--> AwaitingExtension --attach before deadline--> Running (extension entry)
//!                                      \--deadline elapsed-------> Running (default offset)
//! Running --HALT--> Terminal
//! ```
//!
//! The interpreter owns its clock: every [`StreamingInterpreter::advance`]
//! adds `dt` and publishes the result so that attachers on other threads can
//! judge the deadline without touching the interpreter.

use crate::bytecode::Model;
use crate::error::EvaluationFault;
use crate::vm::result::ExecutionResult;
use crate::vm::{check_len, VmConfig};
use cadence_types::sync::{Arc, Ordering};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info};

mod attach;

pub use attach::ExtensionAttacher;

use attach::{Pending, Shared, Stage};

/// Default bound on nested extensions
pub const DEFAULT_MAX_EXTENSION_CHAIN: usize = 8;

/// Observable state after an advance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamState {
    Running,
    AwaitingExtension,
    Terminal,
}

/// Streaming interpreter settings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamingConfig {
    /// Per-advance instruction ceiling and seed
    pub vm: VmConfig,
    /// Extensions that may be attached in sequence, each to a point of the previous one
    pub max_extension_chain: usize,
}

impl Default for StreamingConfig {
    fn default() -> Self {
        Self {
            vm: VmConfig::default(),
            max_extension_chain: DEFAULT_MAX_EXTENSION_CHAIN,
        }
    }
}

/// Continuation point the current stage is paused at
#[derive(Debug, Clone, Copy)]
struct Awaiting {
    point: usize,
    deadline: Duration,
    default_offset: usize,
}

/// Drives one Model (and any extensions attached to it) over time.
///
/// Outputs are not cleared between advances: a sequence keeps the values it
/// last wrote. String-typed slots are resolved with
/// [`StreamingInterpreter::resolve_string`], whichever Model wrote them.
#[derive(Debug)]
pub struct StreamingInterpreter {
    root: Arc<Model>,
    stage: Stage,
    shared: Arc<Shared>,
    clock: Duration,
    state: StreamState,
    wait_until: Option<Duration>,
    awaiting: Option<Awaiting>,
    faulted: bool,
}

fn to_nanos(time: Duration) -> u64 {
    u64::try_from(time.as_nanos()).unwrap_or(u64::MAX)
}

fn seconds(value: f64) -> Duration {
    if value > 0.0 {
        Duration::try_from_secs_f64(value).unwrap_or(Duration::MAX)
    } else {
        Duration::ZERO
    }
}

impl StreamingInterpreter {
    pub fn new(model: Arc<Model>, config: StreamingConfig) -> Self {
        let stage = Stage::root(Arc::clone(&model), config.vm.instruction_limit, config.vm.seed);
        let shared = Arc::new(Shared::new(
            Arc::clone(&model),
            config.vm.instruction_limit,
            config.vm.seed,
            config.max_extension_chain,
        ));
        Self {
            root: model,
            stage,
            shared,
            clock: Duration::ZERO,
            state: StreamState::Running,
            wait_until: None,
            awaiting: None,
            faulted: false,
        }
    }

    /// Handle for attaching extensions from other threads
    pub fn attacher(&self) -> ExtensionAttacher {
        ExtensionAttacher {
            shared: Arc::clone(&self.shared),
        }
    }

    /// Model the instance was created with; inputs and outputs follow its schema
    pub fn model(&self) -> &Arc<Model> {
        &self.root
    }

    /// Model currently executing (the root or an attached extension)
    pub fn current_model(&self) -> &Arc<Model> {
        &self.stage.model
    }

    /// Resolve a string-typed slot value to its text.
    ///
    /// Indices of the root Model's string table stay valid after extensions
    /// attach; strings an extension introduces are appended after them.
    pub fn resolve_string(&self, value: f64) -> Option<&str> {
        if !(value >= 0.0) || value.fract() != 0.0 {
            return None;
        }
        self.stage.strings.get(value as usize).map(String::as_str)
    }

    /// Index of a string in the instance string table
    pub fn string_index(&self, text: &str) -> Option<usize> {
        self.stage.strings.iter().position(|s| s == text)
    }

    pub fn state(&self) -> StreamState {
        self.state
    }

    /// Sum of every `dt` passed to `advance`
    pub fn clock(&self) -> Duration {
        self.clock
    }

    /// Name of the continuation point being waited at
    pub fn awaiting_point(&self) -> Option<&str> {
        let awaiting = self.awaiting?;
        self.stage
            .model
            .continuation_points()
            .get(awaiting.point)
            .map(|point| point.name.as_str())
    }

    /// Move the clock forward by `dt` and execute until the sequence waits,
    /// pauses or halts.
    ///
    /// A fault is fatal: the instance becomes Terminal and every later call
    /// reports [`EvaluationFault::Faulted`].
    pub fn advance(
        &mut self,
        dt: Duration,
        inputs: &[f64],
        outputs: &mut [f64],
    ) -> Result<StreamState, EvaluationFault> {
        if self.faulted {
            return Err(EvaluationFault::Faulted);
        }
        if self.state == StreamState::Terminal {
            return Ok(StreamState::Terminal);
        }
        check_len("input", self.root.input_len(), inputs.len())?;
        check_len("output", self.root.output_len(), outputs.len())?;

        self.clock = self.clock.saturating_add(dt);
        self.shared.clock.store(to_nanos(self.clock), Ordering::Release);

        let result = self.step(inputs, outputs);
        match result {
            Ok(state) => {
                self.state = state;
                if state == StreamState::Terminal {
                    self.release_retired();
                }
                Ok(state)
            }
            Err(fault) => {
                debug!(%fault, model = %self.stage.model.id(), "Streaming instance faulted");
                self.faulted = true;
                self.state = StreamState::Terminal;
                self.release_retired();
                Err(fault)
            }
        }
    }

    /// Drop the stage an extension replaced; nothing can attach once Terminal
    fn release_retired(&self) {
        let retired = self.shared.slot.lock().retired.take();
        drop(retired);
    }

    /// Whether a replaced stage is still held
    #[cfg(test)]
    pub(crate) fn holds_retired_stage(&self) -> bool {
        self.shared.slot.lock().retired.is_some()
    }

    fn step(&mut self, inputs: &[f64], outputs: &mut [f64]) -> Result<StreamState, EvaluationFault> {
        self.stage.machine.reset_budget();

        loop {
            if let Some(until) = self.wait_until {
                if self.clock < until {
                    return Ok(StreamState::Running);
                }
                self.wait_until = None;
            }

            if let Some(awaiting) = self.awaiting {
                if !self.resolve(awaiting) {
                    return Ok(StreamState::AwaitingExtension);
                }
            }

            match self.stage.run(inputs, outputs)? {
                ExecutionResult::Halt => {
                    debug!(model = %self.stage.model.id(), clock = ?self.clock, "Sequence terminal");
                    return Ok(StreamState::Terminal);
                }
                ExecutionResult::Wait(value) => {
                    self.wait_until = Some(self.clock.saturating_add(seconds(value)));
                }
                ExecutionResult::Pause(point) => self.pause(point)?,
                ExecutionResult::Continue => {}
            }
        }
    }

    /// Enter AwaitingExtension for a continuation point of the current stage
    fn pause(&mut self, point: usize) -> Result<(), EvaluationFault> {
        let model = &self.stage.model;
        let declared = model
            .continuation_points()
            .get(point)
            .ok_or(EvaluationFault::InvalidOperand {
                ip: self.stage.machine.here(),
            })?;
        let deadline = self
            .clock
            .saturating_add(Duration::from_millis(u64::from(declared.timeout_ms)));

        self.shared.slot.lock().pending = Some(Pending {
            parent: model.id(),
            attach_hash: declared.name_hash,
            deadline: to_nanos(deadline),
            resolved: false,
        });
        self.awaiting = Some(Awaiting {
            point,
            deadline,
            default_offset: declared.default_offset as usize,
        });
        debug!(point = %declared.name, ?deadline, "Awaiting extension");
        Ok(())
    }

    /// Leave AwaitingExtension if an extension arrived or the deadline
    /// passed. Returns false while still waiting.
    fn resolve(&mut self, awaiting: Awaiting) -> bool {
        let timed_out = self.clock >= awaiting.deadline;
        if !timed_out && !self.shared.ready.load(Ordering::Acquire) {
            return false;
        }

        let mut slot = self.shared.slot.lock();
        // An attachment made before the deadline wins even if this advance
        // also crossed it
        if let Some(incoming) = slot.incoming.take() {
            self.shared.ready.store(false, Ordering::Release);
            slot.retired = Some(std::mem::replace(&mut self.stage, incoming));
            drop(slot);

            self.awaiting = None;
            debug!(extension = %self.stage.model.id(), clock = ?self.clock, "Switched to extension");
            return true;
        }
        if !timed_out {
            return false;
        }
        if let Some(pending) = slot.pending.as_mut() {
            pending.resolved = true;
        }
        drop(slot);

        info!(
            point = self.awaiting_point().unwrap_or_default(),
            model = %self.stage.model.id(),
            "Continuation point timed out, running default"
        );
        self.awaiting = None;
        self.stage.machine.ip = awaiting.default_offset;
        true
    }
}
