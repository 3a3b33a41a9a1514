//! Entity decision cycle
//!
//! A [`BehaviorStack`] holds every Model active for one entity. Each cycle it
//! evaluates all of them against the entity's live state, then folds their
//! channel outputs through one [`IntentMerger`]. No state is shared between
//! stacks, so different entities can be driven from different threads.

use crate::bytecode::Model;
use crate::error::{BindError, EvaluationFault};
use crate::intents::BoundChannels;
use crate::vm::{Interpreter, VmConfig};
use cadence_intent::{Contribution, IntentMerger, IntentValue, MergedIntent, MergerConfig, Resolved, SourceId};
use cadence_types::ValueType;
use std::sync::Arc;

/// Opaque source of named numeric inputs.
///
/// Names are resolved to keys once, when a Model is registered; every cycle
/// afterwards reads by key.
pub trait StateProvider {
    type Key: Copy;

    /// Resolve an input name of the given type
    fn resolve(&self, name: &str, ty: ValueType) -> Option<Self::Key>;

    /// Write the current value into `out` (`ty.width()` slots)
    fn read(&self, key: Self::Key, out: &mut [f64]);
}

/// In-memory [`StateProvider`] for hosts without their own state store.
///
/// Keys are entry positions and stay valid for the life of the snapshot,
/// even when an entry is later overwritten with a different type.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SnapshotState {
    entries: Vec<(String, ValueType, [f64; 3])>,
}

impl SnapshotState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a scalar input, or overwrite an existing one
    pub fn set(&mut self, name: &str, value: f64) {
        self.write(name, ValueType::Number, [value, 0.0, 0.0]);
    }

    pub fn set_bool(&mut self, name: &str, value: bool) {
        self.write(name, ValueType::Bool, [if value { 1.0 } else { 0.0 }, 0.0, 0.0]);
    }

    pub fn set_vector(&mut self, name: &str, value: [f64; 3]) {
        self.write(name, ValueType::Vector3, value);
    }

    pub fn get(&self, name: &str) -> Option<&[f64]> {
        self.entries
            .iter()
            .find(|(n, _, _)| n == name)
            .map(|(_, ty, values)| &values[..ty.width()])
    }

    fn write(&mut self, name: &str, ty: ValueType, values: [f64; 3]) {
        match self.entries.iter_mut().find(|(n, _, _)| n == name) {
            Some(entry) => {
                entry.1 = ty;
                entry.2 = values;
            }
            None => self.entries.push((name.to_string(), ty, values)),
        }
    }
}

impl StateProvider for SnapshotState {
    type Key = usize;

    fn resolve(&self, name: &str, ty: ValueType) -> Option<usize> {
        self.entries
            .iter()
            .position(|(n, t, _)| n == name && t.width() == ty.width())
    }

    fn read(&self, key: usize, out: &mut [f64]) {
        if let Some((_, _, values)) = self.entries.get(key) {
            let width = out.len().min(values.len());
            out[..width].copy_from_slice(&values[..width]);
        }
    }
}

#[derive(Debug)]
struct Member<K> {
    interpreter: Interpreter,
    /// Provider key, first input slot and width of every input
    inputs: Vec<(K, usize, usize)>,
    input_buf: Vec<f64>,
    output_buf: Vec<f64>,
    channels: BoundChannels,
}

/// All Models active for one entity, plus the merger that combines them
pub struct BehaviorStack<P: StateProvider> {
    provider: P,
    members: Vec<Member<P::Key>>,
    merger: IntentMerger,
    contributions: Vec<Contribution>,
}

impl<P: StateProvider> BehaviorStack<P> {
    pub fn new(provider: P, config: MergerConfig) -> Self {
        Self {
            provider,
            members: Vec::new(),
            merger: IntentMerger::new(config),
            contributions: Vec::new(),
        }
    }

    /// Add a Model. Its registration order is its [`SourceId`], which
    /// breaks urgency ties on exclusive channels.
    pub fn register(&mut self, model: Arc<Model>, config: VmConfig) -> Result<SourceId, BindError> {
        let channels = BoundChannels::bind(&model, self.merger.config())?;
        let inputs = model
            .schema()
            .inputs
            .iter()
            .map(|entry| {
                self.provider
                    .resolve(&entry.name, entry.ty)
                    .map(|key| (key, usize::from(entry.slot), entry.ty.width()))
                    .ok_or_else(|| BindError::UnknownInput {
                        name: entry.name.clone(),
                    })
            })
            .collect::<Result<Vec<_>, _>>()?;

        let input_buf = vec![0.0; model.input_len()];
        let output_buf = vec![0.0; model.output_len()];
        let interpreter = Interpreter::new(model, config)?;

        let source = SourceId(self.members.len() as u32);
        self.contributions.reserve(channels.len());
        self.members.push(Member {
            interpreter,
            inputs,
            input_buf,
            output_buf,
            channels,
        });
        tracing::debug!(source = source.0, "Behavior registered");
        Ok(source)
    }

    pub fn provider(&self) -> &P {
        &self.provider
    }

    pub fn provider_mut(&mut self) -> &mut P {
        &mut self.provider
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Reseed every member; member `i` uses `seed + i`
    pub fn reseed(&mut self, seed: u64) {
        for (i, member) in self.members.iter_mut().enumerate() {
            member.interpreter.reseed(seed.wrapping_add(i as u64));
        }
    }

    /// Evaluate every Model, then merge their intents
    pub fn evaluate(&mut self) -> Result<&MergedIntent, EvaluationFault> {
        self.contributions.clear();
        for member in &mut self.members {
            for &(key, slot, width) in &member.inputs {
                self.provider.read(key, &mut member.input_buf[slot..slot + width]);
            }
            member
                .interpreter
                .evaluate(&member.input_buf, &mut member.output_buf)?;
        }
        for (i, member) in self.members.iter().enumerate() {
            member
                .channels
                .collect(SourceId(i as u32), &member.output_buf, &mut self.contributions);
        }
        Ok(self.merger.merge(&self.contributions))
    }

    /// Outputs written by a member in the last cycle
    pub fn outputs(&self, source: SourceId) -> Option<&[f64]> {
        self.members
            .get(source.0 as usize)
            .map(|member| member.output_buf.as_slice())
    }

    pub fn model(&self, source: SourceId) -> Option<&Arc<Model>> {
        self.members
            .get(source.0 as usize)
            .map(|member| member.interpreter.model())
    }

    /// Text of a resolved string-valued channel, looked up in the winner's
    /// string table
    pub fn resolve_symbol(&self, resolved: &Resolved) -> Option<&str> {
        let IntentValue::Symbol(index) = resolved.value else {
            return None;
        };
        let model = self.model(resolved.winner?)?;
        model.strings().get(index as usize).map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_state() {
        let mut state = SnapshotState::new();
        state.set("stamina", 40.0);
        state.set_vector("position", [1.0, 2.0, 3.0]);
        state.set("stamina", 45.0);

        let key = state.resolve("stamina", ValueType::Number).unwrap();
        let mut out = [0.0];
        state.read(key, &mut out);
        assert_eq!(out, [45.0]);

        assert!(state.resolve("position", ValueType::Number).is_none());
        let key = state.resolve("position", ValueType::Vector3).unwrap();
        let mut out = [0.0; 3];
        state.read(key, &mut out);
        assert_eq!(out, [1.0, 2.0, 3.0]);
        assert_eq!(state.get("missing"), None);
    }

    #[test]
    fn test_retyped_entry_keeps_its_key() {
        let mut state = SnapshotState::new();
        state.set("target", 2.0);
        state.set("stamina", 40.0);
        let stamina = state.resolve("stamina", ValueType::Number).unwrap();

        state.set_vector("target", [4.0, 5.0, 6.0]);
        state.set("stamina", 30.0);
        assert_eq!(state.resolve("stamina", ValueType::Number), Some(stamina));
        assert_eq!(state.get("target"), Some(&[4.0, 5.0, 6.0][..]));
        assert!(state.resolve("target", ValueType::Number).is_none());

        // A member bound while `target` was scalar reads the first component
        let mut out = [0.0];
        state.read(0, &mut out);
        assert_eq!(out, [4.0]);
        state.read(stamina, &mut out);
        assert_eq!(out, [30.0]);
    }

    #[test]
    fn test_bool_is_numeric() {
        let mut state = SnapshotState::new();
        state.set_bool("staggered", true);
        assert_eq!(state.get("staggered"), Some(&[1.0][..]));
        assert!(state.resolve("staggered", ValueType::Bool).is_some());
    }
}
