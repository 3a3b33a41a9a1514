//! Instruction execution handlers

mod arithmetic;
mod comparison;
mod control;
mod logical;
mod stack;
mod utility;
mod variables;
