//! Channel declarations

use serde::{Deserialize, Serialize};

/// Index of a channel in a [`MergerConfig`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ChannelId(pub u16);

impl ChannelId {
    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Registration order of a contributor within an entity.
///
/// Lower ids win urgency ties on exclusive channels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SourceId(pub u32);

/// How competing contributions to one channel are resolved
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionPolicy {
    /// Highest urgency wins outright
    Exclusive,
    /// Urgency-weighted average of all contributions
    Blendable,
}

/// A named channel and its policy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelSpec {
    pub name: String,
    pub policy: ResolutionPolicy,
}

impl ChannelSpec {
    pub fn exclusive(name: &str) -> Self {
        Self {
            name: name.to_string(),
            policy: ResolutionPolicy::Exclusive,
        }
    }

    pub fn blendable(name: &str) -> Self {
        Self {
            name: name.to_string(),
            policy: ResolutionPolicy::Blendable,
        }
    }
}

/// Channel table for one entity type
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MergerConfig {
    pub channels: Vec<ChannelSpec>,
}

impl MergerConfig {
    pub fn new(channels: Vec<ChannelSpec>) -> Self {
        Self { channels }
    }

    /// Resolve a channel name to its id
    pub fn channel(&self, name: &str) -> Option<ChannelId> {
        self.channels
            .iter()
            .position(|spec| spec.name == name)
            .and_then(|idx| u16::try_from(idx).ok())
            .map(ChannelId)
    }

    /// Policy of a channel
    pub fn policy(&self, channel: ChannelId) -> Option<ResolutionPolicy> {
        self.channels.get(channel.index()).map(|spec| spec.policy)
    }

    pub fn len(&self) -> usize {
        self.channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_lookup() {
        let config = MergerConfig::new(vec![
            ChannelSpec::exclusive("action"),
            ChannelSpec::blendable("movement"),
        ]);

        assert_eq!(config.channel("movement"), Some(ChannelId(1)));
        assert_eq!(config.channel("gaze"), None);
        assert_eq!(
            config.policy(ChannelId(0)),
            Some(ResolutionPolicy::Exclusive)
        );
        assert_eq!(config.policy(ChannelId(7)), None);
    }

    #[test]
    fn test_config_from_json() {
        let config: MergerConfig = serde_json::from_str(
            r#"{"channels": [
                {"name": "action", "policy": "exclusive"},
                {"name": "movement", "policy": "blendable"}
            ]}"#,
        )
        .unwrap();

        assert_eq!(config.len(), 2);
        assert_eq!(config.channels[1], ChannelSpec::blendable("movement"));
    }
}
