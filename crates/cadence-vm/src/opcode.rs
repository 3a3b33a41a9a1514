//! OpCode definitions for the Cadence VM
//!
//! This module defines the complete instruction set for the VM.
//! Instructions are encoded as 32-bit values:
//!
//! Format: [8-bit opcode][24-bit operand]
//!
//! The operand is a constant index, a slot index, an absolute code offset or a
//! continuation point index depending on the opcode. Opcodes without an operand
//! encode it as zero.

use std::fmt;

/// Largest value an operand can carry
pub const MAX_OPERAND: u32 = 0x00FF_FFFF;

/// Virtual machine instruction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum OpCode {
    // ===== Stack =====
    /// Push constant: push K[op]
    PushConst = 0,
    /// Discard the top of stack
    Pop = 1,
    /// Duplicate the top of stack
    Dup = 2,
    /// Swap the two topmost values
    Swap = 3,

    // ===== Variables =====
    /// Push input slot: push I[op]
    LoadInput = 10,
    /// Push local slot: push L[op]
    LoadLocal = 11,
    /// Pop into local slot: L[op] = pop
    StoreLocal = 12,
    /// Pop into output slot: O[op] = pop
    StoreOutput = 13,

    // ===== Arithmetic =====
    /// b = pop, a = pop, push a + b
    Add = 20,
    /// b = pop, a = pop, push a - b
    Sub = 21,
    /// b = pop, a = pop, push a * b
    Mul = 22,
    /// b = pop, a = pop, push a / b
    Div = 23,
    /// b = pop, a = pop, push a % b
    Mod = 24,
    /// push -pop
    Neg = 25,
    /// b = pop, a = pop, push min(a, b)
    Min = 26,
    /// b = pop, a = pop, push max(a, b)
    Max = 27,
    /// push |pop|
    Abs = 28,

    // ===== Comparison =====
    Eq = 30,
    Ne = 31,
    Lt = 32,
    Le = 33,
    Gt = 34,
    Ge = 35,

    // ===== Logical =====
    /// push !truthy(pop)
    Not = 40,
    /// b = pop, a = pop, push truthy(a) && truthy(b)
    And = 41,
    /// b = pop, a = pop, push truthy(a) || truthy(b)
    Or = 42,

    // ===== Control Flow =====
    /// Unconditional jump: IP = op
    Jump = 50,
    /// if !truthy(pop) then IP = op
    JumpIfFalse = 51,
    /// if truthy(pop) then IP = op
    JumpIfTrue = 52,
    /// Push return address, IP = op
    Call = 53,
    /// Pop return address; halt when the call stack is empty
    Return = 54,
    /// Stop execution
    Halt = 55,

    // ===== Utility =====
    /// push seeded uniform random in [0, 1)
    Random = 60,
    /// t = pop, b = pop, a = pop, push a + (b - a) * t
    Lerp = 61,
    /// hi = pop, lo = pop, x = pop, push x clamped to [lo, hi]
    Clamp = 62,

    // ===== Streaming =====
    /// Suspend for pop seconds (no-op outside the streaming interpreter)
    Wait = 70,
    /// Pause at continuation point op
    Pause = 71,

    // ===== Special =====
    /// No operation
    Nop = 255,
}

impl OpCode {
    /// Get opcode from byte value
    pub fn from_u8(byte: u8) -> Option<Self> {
        match byte {
            0 => Some(OpCode::PushConst),
            1 => Some(OpCode::Pop),
            2 => Some(OpCode::Dup),
            3 => Some(OpCode::Swap),
            10 => Some(OpCode::LoadInput),
            11 => Some(OpCode::LoadLocal),
            12 => Some(OpCode::StoreLocal),
            13 => Some(OpCode::StoreOutput),
            20 => Some(OpCode::Add),
            21 => Some(OpCode::Sub),
            22 => Some(OpCode::Mul),
            23 => Some(OpCode::Div),
            24 => Some(OpCode::Mod),
            25 => Some(OpCode::Neg),
            26 => Some(OpCode::Min),
            27 => Some(OpCode::Max),
            28 => Some(OpCode::Abs),
            30 => Some(OpCode::Eq),
            31 => Some(OpCode::Ne),
            32 => Some(OpCode::Lt),
            33 => Some(OpCode::Le),
            34 => Some(OpCode::Gt),
            35 => Some(OpCode::Ge),
            40 => Some(OpCode::Not),
            41 => Some(OpCode::And),
            42 => Some(OpCode::Or),
            50 => Some(OpCode::Jump),
            51 => Some(OpCode::JumpIfFalse),
            52 => Some(OpCode::JumpIfTrue),
            53 => Some(OpCode::Call),
            54 => Some(OpCode::Return),
            55 => Some(OpCode::Halt),
            60 => Some(OpCode::Random),
            61 => Some(OpCode::Lerp),
            62 => Some(OpCode::Clamp),
            70 => Some(OpCode::Wait),
            71 => Some(OpCode::Pause),
            255 => Some(OpCode::Nop),
            _ => None,
        }
    }

    /// Convert opcode to byte value
    #[inline]
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    /// Get human-readable name
    pub fn name(self) -> &'static str {
        match self {
            OpCode::PushConst => "PUSH_CONST",
            OpCode::Pop => "POP",
            OpCode::Dup => "DUP",
            OpCode::Swap => "SWAP",
            OpCode::LoadInput => "LOAD_INPUT",
            OpCode::LoadLocal => "LOAD_LOCAL",
            OpCode::StoreLocal => "STORE_LOCAL",
            OpCode::StoreOutput => "STORE_OUTPUT",
            OpCode::Add => "ADD",
            OpCode::Sub => "SUB",
            OpCode::Mul => "MUL",
            OpCode::Div => "DIV",
            OpCode::Mod => "MOD",
            OpCode::Neg => "NEG",
            OpCode::Min => "MIN",
            OpCode::Max => "MAX",
            OpCode::Abs => "ABS",
            OpCode::Eq => "EQ",
            OpCode::Ne => "NE",
            OpCode::Lt => "LT",
            OpCode::Le => "LE",
            OpCode::Gt => "GT",
            OpCode::Ge => "GE",
            OpCode::Not => "NOT",
            OpCode::And => "AND",
            OpCode::Or => "OR",
            OpCode::Jump => "JUMP",
            OpCode::JumpIfFalse => "JUMP_IF_FALSE",
            OpCode::JumpIfTrue => "JUMP_IF_TRUE",
            OpCode::Call => "CALL",
            OpCode::Return => "RETURN",
            OpCode::Halt => "HALT",
            OpCode::Random => "RANDOM",
            OpCode::Lerp => "LERP",
            OpCode::Clamp => "CLAMP",
            OpCode::Wait => "WAIT",
            OpCode::Pause => "PAUSE",
            OpCode::Nop => "NOP",
        }
    }

    /// Values popped and pushed by this instruction
    pub fn stack_effect(self) -> (u16, u16) {
        match self {
            OpCode::PushConst | OpCode::LoadInput | OpCode::LoadLocal | OpCode::Random => (0, 1),
            OpCode::Pop | OpCode::StoreLocal | OpCode::StoreOutput => (1, 0),
            OpCode::Dup => (1, 2),
            OpCode::Swap => (2, 2),
            OpCode::Add
            | OpCode::Sub
            | OpCode::Mul
            | OpCode::Div
            | OpCode::Mod
            | OpCode::Min
            | OpCode::Max
            | OpCode::Eq
            | OpCode::Ne
            | OpCode::Lt
            | OpCode::Le
            | OpCode::Gt
            | OpCode::Ge
            | OpCode::And
            | OpCode::Or => (2, 1),
            OpCode::Neg | OpCode::Abs | OpCode::Not => (1, 1),
            OpCode::Lerp | OpCode::Clamp => (3, 1),
            OpCode::JumpIfFalse | OpCode::JumpIfTrue | OpCode::Wait => (1, 0),
            OpCode::Jump
            | OpCode::Call
            | OpCode::Return
            | OpCode::Halt
            | OpCode::Pause
            | OpCode::Nop => (0, 0),
        }
    }

    /// True for opcodes whose operand carries meaning
    pub fn has_operand(self) -> bool {
        matches!(
            self,
            OpCode::PushConst
                | OpCode::LoadInput
                | OpCode::LoadLocal
                | OpCode::StoreLocal
                | OpCode::StoreOutput
                | OpCode::Jump
                | OpCode::JumpIfFalse
                | OpCode::JumpIfTrue
                | OpCode::Call
                | OpCode::Pause
        )
    }
}

impl fmt::Display for OpCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Instruction encoding/decoding utilities
pub mod instruction {
    use super::{OpCode, MAX_OPERAND};

    /// Encode an instruction; the operand is truncated to 24 bits
    #[inline]
    pub fn encode(opcode: OpCode, operand: u32) -> u32 {
        ((opcode.as_u8() as u32) << 24) | (operand & MAX_OPERAND)
    }

    /// Encode an instruction without operand
    #[inline]
    pub fn encode_op(opcode: OpCode) -> u32 {
        encode(opcode, 0)
    }

    /// Decode instruction opcode byte
    #[inline]
    pub fn decode_opcode(instruction: u32) -> u8 {
        (instruction >> 24) as u8
    }

    /// Decode the 24-bit operand
    #[inline]
    pub fn decode_operand(instruction: u32) -> u32 {
        instruction & MAX_OPERAND
    }
}
