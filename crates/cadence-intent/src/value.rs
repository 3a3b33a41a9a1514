//! Intent values and urgency

use crate::channel::{ChannelId, SourceId};
use serde::{Deserialize, Serialize};

/// Value carried by a channel contribution
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntentValue {
    Scalar(f64),
    Vector([f64; 3]),
    /// String-table index of the contributing Model; never blended
    Symbol(u32),
}

impl IntentValue {
    /// True when both values have the same variant
    #[inline]
    pub fn same_kind(&self, other: &IntentValue) -> bool {
        std::mem::discriminant(self) == std::mem::discriminant(other)
    }

    /// Components used for blending; `None` for symbols
    #[inline]
    pub(crate) fn components(&self) -> Option<[f64; 3]> {
        match *self {
            IntentValue::Scalar(v) => Some([v, 0.0, 0.0]),
            IntentValue::Vector(v) => Some(v),
            IntentValue::Symbol(_) => None,
        }
    }
}

/// How strongly a contributor wants its value to win, in `[0, 1]`
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Default, Serialize, Deserialize)]
#[serde(from = "f64")]
pub struct Urgency(f64);

impl Urgency {
    /// Explicit abstention
    pub const ZERO: Urgency = Urgency(0.0);
    pub const MAX: Urgency = Urgency(1.0);

    /// Clamp into `[0, 1]`; NaN becomes 0
    pub fn new(value: f64) -> Self {
        if value.is_nan() {
            return Urgency::ZERO;
        }
        Urgency(value.clamp(0.0, 1.0))
    }

    #[inline]
    pub fn get(self) -> f64 {
        self.0
    }

    #[inline]
    pub fn is_abstention(self) -> bool {
        self.0 <= 0.0
    }
}

impl From<f64> for Urgency {
    fn from(value: f64) -> Self {
        Urgency::new(value)
    }
}

/// One `(channel, value, urgency)` triple from one evaluation of one Model
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Contribution {
    pub source: SourceId,
    pub channel: ChannelId,
    pub value: IntentValue,
    pub urgency: Urgency,
}

impl Contribution {
    pub fn new(source: SourceId, channel: ChannelId, value: IntentValue, urgency: f64) -> Self {
        Self {
            source,
            channel,
            value,
            urgency: Urgency::new(urgency),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_urgency_clamping() {
        assert_eq!(Urgency::new(1.7).get(), 1.0);
        assert_eq!(Urgency::new(-0.2).get(), 0.0);
        assert_eq!(Urgency::new(f64::NAN).get(), 0.0);
        assert_eq!(Urgency::new(0.25).get(), 0.25);
        assert!(Urgency::new(0.0).is_abstention());
    }

    #[test]
    fn test_deserialized_urgency_is_clamped() {
        let urgency: Urgency = serde_json::from_str("-3.0").unwrap();
        assert_eq!(urgency.get(), 0.0);

        let contribution: Contribution = serde_json::from_str(
            r#"{"source": 2, "channel": 0, "value": {"scalar": 1.5}, "urgency": 7.5}"#,
        )
        .unwrap();
        assert_eq!(contribution.urgency.get(), 1.0);
        assert_eq!(contribution.value, IntentValue::Scalar(1.5));
        assert_eq!(serde_json::to_string(&contribution.urgency).unwrap(), "1.0");
    }

    #[test]
    fn test_value_kinds() {
        assert!(IntentValue::Scalar(1.0).same_kind(&IntentValue::Scalar(5.0)));
        assert!(!IntentValue::Scalar(1.0).same_kind(&IntentValue::Symbol(1)));
        assert_eq!(IntentValue::Symbol(3).components(), None);
    }
}
