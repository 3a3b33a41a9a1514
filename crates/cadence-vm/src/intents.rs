//! Reading intent outputs out of a Model's output vector

use crate::bytecode::Model;
use crate::error::BindError;
use cadence_intent::{ChannelId, Contribution, IntentValue, MergerConfig, SourceId};
use cadence_types::ValueType;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Binding {
    channel: ChannelId,
    ty: ValueType,
    value_slot: usize,
    urgency_slot: usize,
}

/// A Model's channel bindings resolved against one merger configuration.
///
/// Names are matched once here; [`BoundChannels::collect`] only indexes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BoundChannels {
    bindings: Vec<Binding>,
}

impl BoundChannels {
    pub fn bind(model: &Model, config: &MergerConfig) -> Result<Self, BindError> {
        let bindings = model
            .schema()
            .channels
            .iter()
            .map(|binding| {
                let channel = config
                    .channel(&binding.name)
                    .ok_or_else(|| BindError::UnknownChannel {
                        name: binding.name.clone(),
                    })?;
                Ok(Binding {
                    channel,
                    ty: binding.ty,
                    value_slot: usize::from(binding.value_slot),
                    urgency_slot: usize::from(binding.urgency_slot),
                })
            })
            .collect::<Result<Vec<_>, BindError>>()?;
        Ok(Self { bindings })
    }

    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }

    /// Append one contribution per bound channel.
    ///
    /// Every channel is reported, including the ones the Model left at
    /// urgency 0. A string value that is not a string-table index is
    /// reported as an abstention.
    pub fn collect(&self, source: SourceId, outputs: &[f64], out: &mut Vec<Contribution>) {
        for binding in &self.bindings {
            let urgency = outputs.get(binding.urgency_slot).copied().unwrap_or(0.0);
            let slot = binding.value_slot;
            let value = match binding.ty {
                ValueType::Vector3 => match outputs.get(slot..slot + 3) {
                    Some(&[x, y, z]) => Some(IntentValue::Vector([x, y, z])),
                    _ => None,
                },
                ValueType::String => outputs
                    .get(slot)
                    .copied()
                    .filter(|v| *v >= 0.0 && v.fract() == 0.0 && *v <= f64::from(u32::MAX))
                    .map(|v| IntentValue::Symbol(v as u32)),
                ValueType::Number | ValueType::Bool => {
                    outputs.get(slot).copied().map(IntentValue::Scalar)
                }
            };
            let (value, urgency) = match value {
                Some(value) => (value, urgency),
                None => (IntentValue::Symbol(0), 0.0),
            };
            out.push(Contribution::new(source, binding.channel, value, urgency));
        }
    }
}
