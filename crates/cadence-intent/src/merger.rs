//! Per-channel resolution of contributions

use crate::channel::{ChannelId, MergerConfig, ResolutionPolicy, SourceId};
use crate::value::{Contribution, IntentValue, Urgency};

/// Resolved decision for one channel
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Resolved {
    pub value: IntentValue,
    /// Urgency of the strongest contributor
    pub urgency: Urgency,
    /// Winning contributor; `None` when several values were blended
    pub winner: Option<SourceId>,
}

/// One resolved value (or no result) per configured channel
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MergedIntent {
    slots: Vec<Option<Resolved>>,
}

impl MergedIntent {
    /// Result for a channel; `None` means nobody wanted it this cycle
    pub fn get(&self, channel: ChannelId) -> Option<&Resolved> {
        self.slots.get(channel.index()).and_then(Option::as_ref)
    }

    /// Iterate over channels that produced a result
    pub fn iter(&self) -> impl Iterator<Item = (ChannelId, &Resolved)> {
        self.slots.iter().enumerate().filter_map(|(idx, slot)| {
            slot.as_ref().map(|resolved| (ChannelId(idx as u16), resolved))
        })
    }

    pub fn is_empty(&self) -> bool {
        self.slots.iter().all(Option::is_none)
    }
}

/// Scratch accumulator for one channel
#[derive(Debug, Clone, Copy, Default)]
struct Accumulator {
    /// Index into the contribution slice of the strongest contributor
    strongest: Option<usize>,
    weight: f64,
    sum: [f64; 3],
}

/// Folds contributions into a [`MergedIntent`].
///
/// Buffers are sized once from the config; `merge` does not allocate.
#[derive(Debug, Clone)]
pub struct IntentMerger {
    config: MergerConfig,
    scratch: Vec<Accumulator>,
    merged: MergedIntent,
}

impl IntentMerger {
    pub fn new(config: MergerConfig) -> Self {
        let channels = config.len();
        Self {
            config,
            scratch: vec![Accumulator::default(); channels],
            merged: MergedIntent {
                slots: vec![None; channels],
            },
        }
    }

    pub fn config(&self) -> &MergerConfig {
        &self.config
    }

    /// Resolve every channel from this cycle's contributions.
    ///
    /// Never fails: contributions to unknown channels are ignored and a
    /// channel with no non-zero urgency resolves to no result.
    pub fn merge(&mut self, contributions: &[Contribution]) -> &MergedIntent {
        for acc in self.scratch.iter_mut() {
            *acc = Accumulator::default();
        }

        // Pass 1: strongest contributor per channel
        for (idx, contribution) in contributions.iter().enumerate() {
            let Some(acc) = self.scratch.get_mut(contribution.channel.index()) else {
                tracing::trace!(channel = contribution.channel.0, "contribution to unknown channel ignored");
                continue;
            };
            if contribution.urgency.is_abstention() {
                continue;
            }
            let replace = match acc.strongest {
                None => true,
                Some(current) => outranks(contribution, &contributions[current]),
            };
            if replace {
                acc.strongest = Some(idx);
            }
        }

        // Pass 2: blend where the policy asks for it
        for contribution in contributions {
            let channel = contribution.channel.index();
            if self.config.policy(contribution.channel) != Some(ResolutionPolicy::Blendable) {
                continue;
            }
            let acc = &mut self.scratch[channel];
            let Some(strongest) = acc.strongest else {
                continue;
            };
            if contribution.urgency.is_abstention()
                || !contribution.value.same_kind(&contributions[strongest].value)
            {
                continue;
            }
            if let Some(components) = contribution.value.components() {
                let weight = contribution.urgency.get();
                acc.weight += weight;
                for (sum, component) in acc.sum.iter_mut().zip(components) {
                    *sum += weight * component;
                }
            }
        }

        for (channel, slot) in self.merged.slots.iter_mut().enumerate() {
            let acc = &self.scratch[channel];
            *slot = acc.strongest.map(|strongest| {
                let best = &contributions[strongest];
                let policy = self.config.channels[channel].policy;
                resolve(policy, best, acc)
            });
        }

        &self.merged
    }

    /// Result of the last merge
    pub fn merged(&self) -> &MergedIntent {
        &self.merged
    }
}

/// Strictly higher urgency wins; on equal urgency the earlier-registered source wins.
/// Equal urgency from the same source keeps the first contribution seen.
#[inline]
fn outranks(candidate: &Contribution, current: &Contribution) -> bool {
    if candidate.urgency.get() != current.urgency.get() {
        return candidate.urgency.get() > current.urgency.get();
    }
    candidate.source < current.source
}

fn resolve(policy: ResolutionPolicy, best: &Contribution, acc: &Accumulator) -> Resolved {
    let exclusive = Resolved {
        value: best.value,
        urgency: best.urgency,
        winner: Some(best.source),
    };

    if policy == ResolutionPolicy::Exclusive || acc.weight <= 0.0 {
        return exclusive;
    }

    let [x, y, z] = acc.sum.map(|component| component / acc.weight);
    let value = match best.value {
        IntentValue::Scalar(_) => IntentValue::Scalar(x),
        IntentValue::Vector(_) => IntentValue::Vector([x, y, z]),
        IntentValue::Symbol(_) => return exclusive,
    };

    Resolved {
        value,
        urgency: best.urgency,
        winner: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::ChannelSpec;
    use approx::assert_relative_eq;
    use proptest::prelude::*;

    const ACTION: ChannelId = ChannelId(0);
    const MOVEMENT: ChannelId = ChannelId(1);

    fn merger() -> IntentMerger {
        IntentMerger::new(MergerConfig::new(vec![
            ChannelSpec::exclusive("action"),
            ChannelSpec::blendable("movement"),
        ]))
    }

    fn symbol(source: u32, value: u32, urgency: f64) -> Contribution {
        Contribution::new(SourceId(source), ACTION, IntentValue::Symbol(value), urgency)
    }

    fn movement(source: u32, value: [f64; 3], urgency: f64) -> Contribution {
        Contribution::new(SourceId(source), MOVEMENT, IntentValue::Vector(value), urgency)
    }

    #[test]
    fn test_exclusive_highest_urgency_wins() {
        let mut merger = merger();
        let merged = merger.merge(&[symbol(0, 10, 0.9), symbol(1, 20, 0.3)]);

        let action = merged.get(ACTION).unwrap();
        assert_eq!(action.value, IntentValue::Symbol(10));
        assert_eq!(action.winner, Some(SourceId(0)));
    }

    #[test]
    fn test_exclusive_order_independent_of_slice() {
        let mut merger = merger();
        let merged = merger.merge(&[symbol(1, 20, 0.3), symbol(0, 10, 0.9)]);
        assert_eq!(merged.get(ACTION).unwrap().value, IntentValue::Symbol(10));
    }

    #[test]
    fn test_exclusive_tie_goes_to_first_registered() {
        let mut merger = merger();

        // Source 2 appears first in the slice but registered later
        let merged = merger.merge(&[symbol(2, 20, 0.5), symbol(1, 10, 0.5)]);
        assert_eq!(merged.get(ACTION).unwrap().winner, Some(SourceId(1)));

        for _ in 0..10 {
            let merged = merger.merge(&[symbol(2, 20, 0.5), symbol(1, 10, 0.5)]);
            assert_eq!(merged.get(ACTION).unwrap().value, IntentValue::Symbol(10));
        }
    }

    #[test]
    fn test_blend_weighted_average() {
        let mut merger = merger();
        let merged = merger.merge(&[
            movement(0, [0.0, 0.0, 0.0], 0.6),
            movement(1, [10.0, 0.0, 0.0], 0.4),
        ]);

        let resolved = merged.get(MOVEMENT).unwrap();
        match resolved.value {
            IntentValue::Vector([x, y, z]) => {
                assert_relative_eq!(x, 4.0, epsilon = 1e-12);
                assert_relative_eq!(y, 0.0);
                assert_relative_eq!(z, 0.0);
            }
            other => panic!("Expected Vector, got {:?}", other),
        }
        assert_eq!(resolved.winner, None);
        assert_relative_eq!(resolved.urgency.get(), 0.6);
    }

    #[test]
    fn test_blend_all_zero_has_no_result() {
        let mut merger = merger();
        let merged = merger.merge(&[
            movement(0, [1.0, 0.0, 0.0], 0.0),
            movement(1, [2.0, 0.0, 0.0], 0.0),
        ]);
        assert!(merged.get(MOVEMENT).is_none());
    }

    #[test]
    fn test_empty_contributions() {
        let mut merger = merger();
        let merged = merger.merge(&[]);
        assert!(merged.is_empty());
        assert!(merged.get(ACTION).is_none());
        assert!(merged.get(ChannelId(99)).is_none());
    }

    #[test]
    fn test_abstention_never_wins() {
        let mut merger = merger();
        let merged = merger.merge(&[symbol(0, 1, 0.0), symbol(1, 2, 0.05)]);
        assert_eq!(merged.get(ACTION).unwrap().winner, Some(SourceId(1)));
    }

    #[test]
    fn test_blend_ignores_other_value_kinds() {
        let mut merger = merger();
        let merged = merger.merge(&[
            movement(0, [2.0, 2.0, 2.0], 0.5),
            Contribution::new(SourceId(1), MOVEMENT, IntentValue::Scalar(100.0), 0.4),
            movement(2, [4.0, 4.0, 4.0], 0.5),
        ]);
        assert_eq!(
            merged.get(MOVEMENT).unwrap().value,
            IntentValue::Vector([3.0, 3.0, 3.0])
        );
    }

    #[test]
    fn test_blendable_symbols_resolve_exclusively() {
        let mut merger = merger();
        let merged = merger.merge(&[
            Contribution::new(SourceId(0), MOVEMENT, IntentValue::Symbol(4), 0.2),
            Contribution::new(SourceId(1), MOVEMENT, IntentValue::Symbol(5), 0.7),
        ]);
        let resolved = merged.get(MOVEMENT).unwrap();
        assert_eq!(resolved.value, IntentValue::Symbol(5));
        assert_eq!(resolved.winner, Some(SourceId(1)));
    }

    #[test]
    fn test_unknown_channel_ignored() {
        let mut merger = merger();
        let merged = merger.merge(&[Contribution::new(
            SourceId(0),
            ChannelId(42),
            IntentValue::Scalar(1.0),
            1.0,
        )]);
        assert!(merged.is_empty());
    }

    #[test]
    fn test_merge_resets_previous_cycle() {
        let mut merger = merger();
        merger.merge(&[symbol(0, 1, 0.8)]);
        let merged = merger.merge(&[]);
        assert!(merged.get(ACTION).is_none());
    }

    fn arb_contribution() -> impl Strategy<Value = Contribution> {
        (0u32..4, 0u16..3, -10.0f64..10.0, -0.5f64..1.5).prop_map(
            |(source, channel, value, urgency)| {
                Contribution::new(
                    SourceId(source),
                    ChannelId(channel),
                    IntentValue::Scalar(value),
                    urgency,
                )
            },
        )
    }

    proptest! {
        #[test]
        fn prop_merge_is_total_and_repeatable(
            contributions in proptest::collection::vec(arb_contribution(), 0..16)
        ) {
            let mut merger = merger();
            let first = merger.merge(&contributions).clone();
            let second = merger.merge(&contributions).clone();
            prop_assert_eq!(first, second);
        }

        #[test]
        fn prop_blend_stays_within_bounds(
            contributions in proptest::collection::vec(arb_contribution(), 1..16)
        ) {
            let mut merger = merger();
            let merged = merger.merge(&contributions);
            if let Some(resolved) = merged.get(MOVEMENT) {
                if let IntentValue::Scalar(v) = resolved.value {
                    prop_assert!((-10.0 - 1e-9..=10.0 + 1e-9).contains(&v));
                }
            }
        }
    }
}
