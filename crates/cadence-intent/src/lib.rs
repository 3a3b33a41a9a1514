//! Intent Channel Merger
//!
//! Several behavior models evaluated for the same entity in the same cycle
//! each produce `(channel, value, urgency)` contributions. The merger folds
//! them into one resolved value per channel, using the resolution policy
//! declared for that channel:
//!
//! - `Exclusive`: the strictly most urgent contribution wins; ties go to the
//!   contributor registered first.
//! - `Blendable`: values are averaged, weighted by `urgency / sum(urgency)`.
//!
//! Urgency 0 is an explicit abstention. A channel nobody wants has no result.

pub mod channel;
pub mod merger;
pub mod value;

pub use channel::{ChannelId, ChannelSpec, MergerConfig, ResolutionPolicy, SourceId};
pub use merger::{IntentMerger, MergedIntent, Resolved};
pub use value::{Contribution, IntentValue, Urgency};
