//! Extension attachment
//!
//! [`ExtensionAttacher::attach`] runs on any thread. Everything that
//! allocates (slot remaps, execution buffers) happens there, before the slot
//! lock is taken; the advancing thread only swaps a prepared [`Stage`] in.
//!
//! String-typed slots hold indices into one table per instance: the root
//! Model's strings followed by whatever each attached extension adds. An
//! extension keeps executing against its own table; its string slots are
//! translated on the way in and out.

use crate::bytecode::{Model, Schema};
use crate::error::{AttachmentRejected, EvaluationFault};
use crate::vm::frame::Machine;
use crate::vm::result::ExecutionResult;
use cadence_types::sync::{AtomicBool, AtomicU64, Arc, Mutex, Ordering};
use cadence_types::{ModelId, ValueType};
use tracing::debug;

/// A model ready to execute, with its own buffers
#[derive(Debug)]
pub(crate) struct Stage {
    pub(crate) model: Arc<Model>,
    pub(crate) machine: Machine,
    /// Instance string table as of this stage
    pub(crate) strings: Arc<[String]>,
    remap: Option<Remap>,
}

/// Translation between an extension's slots and the root Model's slots
#[derive(Debug)]
struct Remap {
    /// Root input slot of each extension input slot
    inputs: Vec<usize>,
    /// Root output slot of each extension output slot
    outputs: Vec<usize>,
    input_buf: Vec<f64>,
    output_buf: Vec<f64>,
    strings: StringMap,
}

/// Translation between an extension's string table and the instance table
#[derive(Debug)]
struct StringMap {
    /// Instance index of each extension string
    to_instance: Vec<f64>,
    /// Extension index of each instance string; strings the extension does
    /// not know are carried as `-(index + 1)`
    from_instance: Vec<f64>,
    /// Extension input slots holding strings
    inputs: Vec<usize>,
    /// Extension output slots holding strings
    outputs: Vec<usize>,
}

fn as_index(value: f64) -> Option<usize> {
    if value >= 0.0 && value.fract() == 0.0 && value < u32::MAX as f64 {
        Some(value as usize)
    } else {
        None
    }
}

impl StringMap {
    /// Append the strings of `extension` missing from `instance`
    fn build(
        instance: &[String],
        extension: &[String],
        inputs: Vec<usize>,
        outputs: Vec<usize>,
    ) -> (Arc<[String]>, Self) {
        let mut table = instance.to_vec();
        let mut to_instance = Vec::with_capacity(extension.len());
        for text in extension {
            let index = match table.iter().position(|s| s == text) {
                Some(index) => index,
                None => {
                    table.push(text.clone());
                    table.len() - 1
                }
            };
            to_instance.push(index as f64);
        }

        let mut from_instance: Vec<f64> = (0..table.len()).map(|k| -(k as f64) - 1.0).collect();
        for (ext, &index) in to_instance.iter().enumerate() {
            from_instance[index as usize] = ext as f64;
        }

        let map = Self {
            to_instance,
            from_instance,
            inputs,
            outputs,
        };
        (Arc::from(table), map)
    }

    fn extension_value(&self, value: f64) -> f64 {
        match as_index(value) {
            Some(k) => self
                .from_instance
                .get(k)
                .copied()
                .unwrap_or(-value - 1.0),
            None => value,
        }
    }

    fn instance_value(&self, value: f64) -> f64 {
        if let Some(ext) = as_index(value) {
            return self.to_instance.get(ext).copied().unwrap_or(value);
        }
        if value < 0.0 && value.fract() == 0.0 {
            -value - 1.0
        } else {
            value
        }
    }
}

impl Stage {
    pub(crate) fn root(model: Arc<Model>, instruction_limit: u32, seed: u64) -> Self {
        let machine = Machine::new(&model, instruction_limit, seed);
        let strings = Arc::from(model.strings());
        Self {
            model,
            machine,
            strings,
            remap: None,
        }
    }

    /// Run until halt, wait or pause, in the root Model's slot layout
    pub(crate) fn run(
        &mut self,
        inputs: &[f64],
        outputs: &mut [f64],
    ) -> Result<ExecutionResult, EvaluationFault> {
        let Some(remap) = &mut self.remap else {
            return self.machine.run(&self.model, inputs, outputs);
        };

        for (dst, &src) in remap.input_buf.iter_mut().zip(&remap.inputs) {
            *dst = inputs[src];
        }
        for (dst, &src) in remap.output_buf.iter_mut().zip(&remap.outputs) {
            *dst = outputs[src];
        }
        for &slot in &remap.strings.inputs {
            remap.input_buf[slot] = remap.strings.extension_value(remap.input_buf[slot]);
        }
        for &slot in &remap.strings.outputs {
            remap.output_buf[slot] = remap.strings.extension_value(remap.output_buf[slot]);
        }
        let result = self
            .machine
            .run(&self.model, &remap.input_buf, &mut remap.output_buf);
        for &slot in &remap.strings.outputs {
            remap.output_buf[slot] = remap.strings.instance_value(remap.output_buf[slot]);
        }
        for (&value, &dst) in remap.output_buf.iter().zip(&remap.outputs) {
            outputs[dst] = value;
        }
        result
    }
}

/// Slot translation of one extension, plus its string-typed slots
struct SlotMap {
    inputs: Vec<usize>,
    outputs: Vec<usize>,
    string_inputs: Vec<usize>,
    string_outputs: Vec<usize>,
}

/// Map every slot of `extension` onto the matching name and type in `root`
fn remap(root: &Schema, extension: &Schema) -> Result<SlotMap, AttachmentRejected> {
    let mismatch = |name: &str| AttachmentRejected::SchemaMismatch {
        name: name.to_string(),
    };

    let mut string_inputs = Vec::new();
    let mut string_outputs = Vec::new();

    let mut inputs = vec![0; extension.input_len()];
    for entry in &extension.inputs {
        if entry.ty == ValueType::String {
            string_inputs.push(usize::from(entry.slot));
        }
        let target = root
            .inputs
            .iter()
            .find(|r| r.name == entry.name && r.ty == entry.ty)
            .ok_or_else(|| mismatch(&entry.name))?;
        for i in 0..entry.ty.width() {
            inputs[usize::from(entry.slot) + i] = usize::from(target.slot) + i;
        }
    }

    let mut outputs = vec![0; extension.output_len()];
    for entry in &extension.outputs {
        if entry.ty == ValueType::String {
            string_outputs.push(usize::from(entry.slot));
        }
        let target = root
            .outputs
            .iter()
            .find(|r| r.name == entry.name && r.ty == entry.ty)
            .ok_or_else(|| mismatch(&entry.name))?;
        for i in 0..entry.ty.width() {
            outputs[usize::from(entry.slot) + i] = usize::from(target.slot) + i;
        }
    }
    for channel in &extension.channels {
        if channel.ty == ValueType::String {
            string_outputs.push(usize::from(channel.value_slot));
        }
        let target = root
            .channels
            .iter()
            .find(|r| r.name == channel.name && r.ty == channel.ty)
            .ok_or_else(|| mismatch(&channel.name))?;
        for i in 0..channel.ty.width() {
            outputs[usize::from(channel.value_slot) + i] = usize::from(target.value_slot) + i;
        }
        outputs[usize::from(channel.urgency_slot)] = usize::from(target.urgency_slot);
    }

    Ok(SlotMap {
        inputs,
        outputs,
        string_inputs,
        string_outputs,
    })
}

/// Continuation point currently waiting for an extension
#[derive(Debug, Clone, Copy)]
pub(crate) struct Pending {
    /// Model that reached the point
    pub(crate) parent: ModelId,
    pub(crate) attach_hash: u32,
    /// Clock value (nanoseconds) after which the default continuation runs
    pub(crate) deadline: u64,
    /// Set once by whichever happens first: an attachment or the timeout
    pub(crate) resolved: bool,
}

#[derive(Debug)]
pub(crate) struct SlotState {
    pub(crate) pending: Option<Pending>,
    /// Attached extension not yet picked up by the interpreter
    pub(crate) incoming: Option<Stage>,
    /// Stage replaced by an extension; freed by the next attachment or
    /// when the instance terminates
    pub(crate) retired: Option<Stage>,
    /// Root Model id followed by every attached extension id
    pub(crate) lineage: Vec<ModelId>,
    /// Instance string table including the latest accepted extension
    pub(crate) strings: Arc<[String]>,
}

/// State shared between one streaming interpreter and its attachers
#[derive(Debug)]
pub(crate) struct Shared {
    pub(crate) slot: Mutex<SlotState>,
    /// An extension is waiting in `incoming`
    pub(crate) ready: AtomicBool,
    /// Interpreter clock in nanoseconds, published after every advance
    pub(crate) clock: AtomicU64,
    root: Arc<Model>,
    instruction_limit: u32,
    seed: u64,
    max_extension_chain: usize,
}

impl Shared {
    pub(crate) fn new(
        root: Arc<Model>,
        instruction_limit: u32,
        seed: u64,
        max_extension_chain: usize,
    ) -> Self {
        let mut lineage = Vec::with_capacity(max_extension_chain + 1);
        lineage.push(root.id());
        let strings = Arc::from(root.strings());
        Self {
            slot: Mutex::new(SlotState {
                pending: None,
                incoming: None,
                retired: None,
                lineage,
                strings,
            }),
            ready: AtomicBool::new(false),
            clock: AtomicU64::new(0),
            root,
            instruction_limit,
            seed,
            max_extension_chain,
        }
    }
}

/// Handle for attaching extensions to one streaming interpreter.
///
/// Cheap to clone and usable from any thread.
#[derive(Debug, Clone)]
pub struct ExtensionAttacher {
    pub(crate) shared: Arc<Shared>,
}

impl ExtensionAttacher {
    /// Offer an extension for the continuation point the interpreter is
    /// waiting at.
    ///
    /// At most one extension is accepted per point; a rejection leaves the
    /// interpreter untouched and is an expected outcome of racing the
    /// deadline, not an error worth surfacing.
    pub fn attach(&self, extension: Arc<Model>) -> Result<(), AttachmentRejected> {
        let result = self.try_attach(extension);
        if let Err(reason) = &result {
            debug!(%reason, "Extension rejected");
        }
        result
    }

    fn try_attach(&self, extension: Arc<Model>) -> Result<(), AttachmentRejected> {
        let header = *extension
            .extension()
            .ok_or(AttachmentRejected::NotAnExtension)?;

        let shared = &self.shared;
        let slots = remap(shared.root.schema(), extension.schema())?;

        loop {
            let base = Arc::clone(&shared.slot.lock().strings);
            let (strings, string_map) = StringMap::build(
                &base,
                extension.strings(),
                slots.string_inputs.clone(),
                slots.string_outputs.clone(),
            );
            let remap = Remap {
                input_buf: vec![0.0; slots.inputs.len()],
                output_buf: vec![0.0; slots.outputs.len()],
                inputs: slots.inputs.clone(),
                outputs: slots.outputs.clone(),
                strings: string_map,
            };
            let machine = Machine::new(
                &extension,
                shared.instruction_limit,
                shared.seed ^ extension.id().0,
            );
            let stage = Stage {
                model: Arc::clone(&extension),
                machine,
                strings: Arc::clone(&strings),
                remap: Some(remap),
            };

            let retired = {
                let mut slot = shared.slot.lock();
                // Another extension was accepted while the table was built
                if !Arc::ptr_eq(&slot.strings, &base) {
                    continue;
                }
                let pending = slot.pending.ok_or(AttachmentRejected::NoPendingPoint)?;
                if pending.resolved {
                    return Err(AttachmentRejected::AlreadyResolved);
                }
                if header.parent != pending.parent {
                    return Err(AttachmentRejected::ParentMismatch {
                        expected: pending.parent,
                        actual: header.parent,
                    });
                }
                if header.attach_hash != pending.attach_hash {
                    return Err(AttachmentRejected::AttachPointMismatch);
                }
                if shared.clock.load(Ordering::Acquire) >= pending.deadline {
                    return Err(AttachmentRejected::DeadlineElapsed);
                }
                if slot.lineage.contains(&extension.id()) {
                    return Err(AttachmentRejected::CircularExtension(extension.id()));
                }
                if slot.lineage.len() > shared.max_extension_chain {
                    return Err(AttachmentRejected::ChainTooDeep {
                        limit: shared.max_extension_chain,
                    });
                }

                slot.pending = Some(Pending {
                    resolved: true,
                    ..pending
                });
                slot.lineage.push(extension.id());
                slot.strings = strings;
                slot.incoming = Some(stage);
                shared.ready.store(true, Ordering::Release);
                slot.retired.take()
            };
            drop(retired);
            break;
        }

        debug!(extension = %extension.id(), parent = %header.parent, "Extension attached");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn texts(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_string_table_appends_new_strings() {
        let (table, map) = StringMap::build(
            &texts(&["intro", "shared"]),
            &texts(&["shared", "twist"]),
            vec![],
            vec![0],
        );
        assert_eq!(&*table, &texts(&["intro", "shared", "twist"])[..]);
        assert_eq!(map.to_instance, vec![1.0, 2.0]);

        // Extension strings land at their instance index
        assert_eq!(map.instance_value(0.0), 1.0);
        assert_eq!(map.instance_value(1.0), 2.0);
        assert_eq!(map.extension_value(2.0), 1.0);
    }

    #[test]
    fn test_unknown_strings_pass_through_unchanged() {
        let (_, map) = StringMap::build(&texts(&["intro", "shared"]), &texts(&["shared"]), vec![], vec![]);

        // `intro` is foreign to the extension but survives the round trip
        let carried = map.extension_value(0.0);
        assert!(carried < 0.0);
        assert_ne!(carried, map.extension_value(1.0));
        assert_eq!(map.instance_value(carried), 0.0);

        // Indices past the table and non-index values are kept as-is
        assert_eq!(map.instance_value(map.extension_value(9.0)), 9.0);
        assert_eq!(map.extension_value(0.5), 0.5);
        assert!(map.instance_value(f64::NAN).is_nan());
    }
}
