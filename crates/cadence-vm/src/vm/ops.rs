//! Numeric operation helpers
//!
//! Shared by the interpreter and the constant folder so that a folded
//! expression produces the exact bits the interpreter would have produced.

use crate::opcode::OpCode;

/// Numeric operations on the VM's uniform `f64` values
pub(crate) struct ValueOperations;

impl ValueOperations {
    #[inline]
    pub(crate) fn is_truthy(value: f64) -> bool {
        value != 0.0
    }

    #[inline]
    pub(crate) fn from_bool(value: bool) -> f64 {
        if value {
            1.0
        } else {
            0.0
        }
    }

    /// `Neg`, `Not` or `Abs`
    #[inline]
    pub(crate) fn unary(opcode: OpCode, value: f64) -> Option<f64> {
        match opcode {
            OpCode::Neg => Some(-value),
            OpCode::Not => Some(Self::from_bool(!Self::is_truthy(value))),
            OpCode::Abs => Some(value.abs()),
            _ => None,
        }
    }

    /// Arithmetic, comparison and logical binary operators
    #[inline]
    pub(crate) fn binary(opcode: OpCode, left: f64, right: f64) -> Option<f64> {
        let result = match opcode {
            OpCode::Add => left + right,
            OpCode::Sub => left - right,
            OpCode::Mul => left * right,
            OpCode::Div => left / right,
            // Truncated remainder, sign follows the dividend
            OpCode::Mod => left % right,
            OpCode::Min => left.min(right),
            OpCode::Max => left.max(right),
            OpCode::Eq => Self::from_bool(left == right),
            OpCode::Ne => Self::from_bool(left != right),
            OpCode::Lt => Self::from_bool(left < right),
            OpCode::Le => Self::from_bool(left <= right),
            OpCode::Gt => Self::from_bool(left > right),
            OpCode::Ge => Self::from_bool(left >= right),
            OpCode::And => Self::from_bool(Self::is_truthy(left) && Self::is_truthy(right)),
            OpCode::Or => Self::from_bool(Self::is_truthy(left) || Self::is_truthy(right)),
            _ => return None,
        };
        Some(result)
    }

    /// `Lerp` or `Clamp`
    #[inline]
    pub(crate) fn ternary(opcode: OpCode, a: f64, b: f64, c: f64) -> Option<f64> {
        match opcode {
            OpCode::Lerp => Some(a + (b - a) * c),
            // Total for inverted or NaN bounds (f64::clamp panics there)
            OpCode::Clamp => Some(a.max(b).min(c)),
            _ => None,
        }
    }
}
