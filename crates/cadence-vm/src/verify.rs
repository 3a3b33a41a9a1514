//! Structural verification shared by the code generator and the loader.
//!
//! A Model that passes [`verify_model`] cannot fault during evaluation except
//! through caller misuse (state lengths) or the instruction ceiling.

use crate::bytecode::{ContinuationPoint, Model, ModelFlags};
use crate::error::{LoadError, StackError};
use crate::opcode::{instruction, OpCode};
use cadence_types::name_hash;
use std::collections::HashMap;

/// Hard ceiling on the operand stack depth a Model may declare
pub const MAX_STACK: u16 = 1024;

/// Check every invariant of a decoded Model
pub(crate) fn verify_model(model: &Model) -> Result<(), LoadError> {
    if model.flags.contains(ModelFlags::IS_EXTENSION) != model.extension.is_some() {
        return Err(LoadError::ExtensionHeader);
    }
    if model.flags.contains(ModelFlags::HAS_CONTINUATION_POINTS)
        != !model.continuation_points.is_empty()
    {
        return Err(LoadError::ContinuationPoint {
            index: 0,
            reason: "flag does not match the table",
        });
    }
    if model.flags.contains(ModelFlags::DEBUG_INFO) != model.debug.is_some() {
        return Err(LoadError::DebugInfo("flag does not match the section".into()));
    }

    verify_schema(model)?;
    verify_code(model)?;
    verify_continuation_points(model)?;

    if model.entry_offset as usize >= model.code.len() {
        return Err(LoadError::EntryOutOfRange(model.entry_offset));
    }

    let required = analyze_stack(
        &model.code,
        model.entry_offset as usize,
        &model.continuation_points,
    )?;
    if model.max_stack < required || model.max_stack > MAX_STACK {
        return Err(LoadError::StackLimit {
            declared: model.max_stack,
            required,
            ceiling: MAX_STACK,
        });
    }

    let calls = analyze_call_depth(
        &model.code,
        model.entry_offset as usize,
        &model.continuation_points,
    )?;
    if model.max_call_depth < calls {
        return Err(LoadError::CallDepthLimit {
            declared: model.max_call_depth,
            required: calls,
        });
    }

    Ok(())
}

fn verify_schema(model: &Model) -> Result<(), LoadError> {
    let inputs = &model.schema.inputs;
    let outputs = &model.schema.outputs;
    for (i, entry) in inputs.iter().enumerate() {
        if inputs[..i].iter().any(|other| other.name == entry.name) {
            return Err(LoadError::InvalidSchema {
                name: entry.name.clone(),
                reason: "duplicate input",
            });
        }
    }
    for (i, entry) in outputs.iter().enumerate() {
        if outputs[..i].iter().any(|other| other.name == entry.name) {
            return Err(LoadError::InvalidSchema {
                name: entry.name.clone(),
                reason: "duplicate output",
            });
        }
    }
    for channel in &model.schema.channels {
        let value = channel.value_slot as usize..channel.value_slot as usize + channel.ty.width();
        if value.contains(&(channel.urgency_slot as usize)) {
            return Err(LoadError::InvalidSchema {
                name: channel.name.clone(),
                reason: "urgency slot overlaps the value",
            });
        }
    }
    Ok(())
}

fn verify_code(model: &Model) -> Result<(), LoadError> {
    if model.code.is_empty() {
        return Err(LoadError::Truncated("code"));
    }

    let input_len = model.schema.input_len() as u32;
    let output_len = model.schema.output_len() as u32;
    let code_len = model.code.len() as u32;

    for (offset, &word) in model.code.iter().enumerate() {
        let byte = instruction::decode_opcode(word);
        let opcode = OpCode::from_u8(byte).ok_or(LoadError::InvalidOpcode { offset, byte })?;
        let operand = instruction::decode_operand(word);

        let bound = match opcode {
            OpCode::PushConst => model.constants.len() as u32,
            OpCode::LoadInput => input_len,
            OpCode::LoadLocal | OpCode::StoreLocal => u32::from(model.local_count),
            OpCode::StoreOutput => output_len,
            OpCode::Jump | OpCode::JumpIfFalse | OpCode::JumpIfTrue | OpCode::Call => code_len,
            OpCode::Pause => model.continuation_points.len() as u32,
            // Operand-less opcodes must encode zero
            _ => 1,
        };
        if operand >= bound {
            return Err(LoadError::OperandOutOfRange {
                offset,
                opcode: opcode.name(),
                operand,
            });
        }
    }
    Ok(())
}

fn verify_continuation_points(model: &Model) -> Result<(), LoadError> {
    let code_len = model.code.len();
    for (index, point) in model.continuation_points.iter().enumerate() {
        if point.name_hash != name_hash(&point.name) {
            return Err(LoadError::ContinuationPoint {
                index,
                reason: "name hash does not match the name",
            });
        }
        if point.default_offset as usize >= code_len {
            return Err(LoadError::ContinuationPoint {
                index,
                reason: "default offset out of range",
            });
        }
        let pauses = model
            .code
            .iter()
            .filter(|&&word| {
                instruction::decode_opcode(word) == OpCode::Pause.as_u8()
                    && instruction::decode_operand(word) as usize == index
            })
            .count();
        if pauses != 1 {
            return Err(LoadError::ContinuationPoint {
                index,
                reason: "must be referenced by exactly one pause",
            });
        }
        let at_offset = model.code.get(point.offset as usize).copied();
        if at_offset != Some(instruction::encode(OpCode::Pause, index as u32)) {
            return Err(LoadError::ContinuationPoint {
                index,
                reason: "offset does not hold its pause",
            });
        }
    }
    Ok(())
}

/// Compute the maximum operand stack depth reachable from `entry`.
///
/// Walks every path once per offset. Calls, returns and pauses require an
/// empty operand stack; a pause continues at its default offset. Every
/// reachable offset must be entered with a single consistent depth.
pub(crate) fn analyze_stack(
    code: &[u32],
    entry: usize,
    points: &[ContinuationPoint],
) -> Result<u16, StackError> {
    let mut depth_at: Vec<Option<u16>> = vec![None; code.len()];
    let mut worklist = vec![(entry, 0u16)];
    let mut max_depth = 0u16;

    while let Some((start, start_depth)) = worklist.pop() {
        let mut pc = start;
        let mut depth = start_depth;

        loop {
            match depth_at.get(pc) {
                None => return Err(StackError::FallsOffEnd(pc)),
                Some(Some(seen)) if *seen == depth => break,
                Some(Some(_)) => return Err(StackError::Mismatch(pc)),
                Some(None) => depth_at[pc] = Some(depth),
            }

            let word = code[pc];
            let opcode = OpCode::from_u8(instruction::decode_opcode(word))
                .ok_or(StackError::UnknownOpcode(pc))?;
            let operand = instruction::decode_operand(word) as usize;

            let (pop, push) = opcode.stack_effect();
            depth = depth.checked_sub(pop).ok_or(StackError::Underflow(pc))? + push;
            if depth > MAX_STACK {
                return Err(StackError::TooDeep(MAX_STACK));
            }
            max_depth = max_depth.max(depth);

            let here = pc;
            let target = move |target: usize| {
                if target < code.len() {
                    Ok(target)
                } else {
                    Err(StackError::BadTarget {
                        offset: here,
                        target,
                    })
                }
            };

            match opcode {
                OpCode::Jump => pc = target(operand)?,
                OpCode::JumpIfFalse | OpCode::JumpIfTrue => {
                    worklist.push((target(operand)?, depth));
                    pc += 1;
                }
                OpCode::Call => {
                    if depth != 0 {
                        return Err(StackError::Unbalanced(pc));
                    }
                    worklist.push((target(operand)?, 0));
                    pc += 1;
                }
                OpCode::Return => {
                    if depth != 0 {
                        return Err(StackError::Unbalanced(pc));
                    }
                    break;
                }
                OpCode::Pause => {
                    if depth != 0 {
                        return Err(StackError::Unbalanced(pc));
                    }
                    let point = points.get(operand).ok_or(StackError::BadTarget {
                        offset: pc,
                        target: operand,
                    })?;
                    worklist.push((target(point.default_offset as usize)?, 0));
                    break;
                }
                OpCode::Halt => break,
                _ => pc += 1,
            }
        }
    }

    Ok(max_depth)
}

/// Compute the longest chain of nested calls reachable from `entry`.
///
/// Every call target is a routine of its own; jumps and continuation
/// defaults stay in the current routine's frame. Recursion is rejected.
pub(crate) fn analyze_call_depth(
    code: &[u32],
    entry: usize,
    points: &[ContinuationPoint],
) -> Result<u16, StackError> {
    let mut callees: HashMap<usize, Vec<usize>> = HashMap::new();
    let mut discovered = vec![entry];
    while let Some(start) = discovered.pop() {
        if callees.contains_key(&start) {
            continue;
        }
        let targets = routine_calls(code, start, points)?;
        discovered.extend(targets.iter().copied());
        callees.insert(start, targets);
    }

    #[derive(Clone, Copy)]
    enum Mark {
        Active,
        Done(u32),
    }

    // Iterative post-order walk of the call graph
    let mut marks: HashMap<usize, Mark> = HashMap::from([(entry, Mark::Active)]);
    let mut path = vec![(entry, 0usize)];
    while let Some(frame) = path.last_mut() {
        let (routine, next) = *frame;
        let targets = callees.get(&routine).map_or(&[][..], Vec::as_slice);

        if let Some(&target) = targets.get(next) {
            frame.1 += 1;
            match marks.get(&target) {
                Some(Mark::Active) => return Err(StackError::RecursiveCall(target)),
                Some(Mark::Done(_)) => {}
                None => {
                    marks.insert(target, Mark::Active);
                    path.push((target, 0));
                }
            }
            continue;
        }

        let depth = targets
            .iter()
            .filter_map(|target| match marks.get(target) {
                Some(Mark::Done(depth)) => Some(depth + 1),
                _ => None,
            })
            .max()
            .unwrap_or(0);
        marks.insert(routine, Mark::Done(depth));
        path.pop();
    }

    match marks.get(&entry) {
        Some(Mark::Done(depth)) => u16::try_from(*depth).map_err(|_| StackError::CallsTooDeep),
        _ => Ok(0),
    }
}

/// Distinct call targets reachable from `start` without entering a callee
fn routine_calls(
    code: &[u32],
    start: usize,
    points: &[ContinuationPoint],
) -> Result<Vec<usize>, StackError> {
    let mut visited = vec![false; code.len()];
    let mut worklist = vec![start];
    let mut calls = Vec::new();

    while let Some(mut pc) = worklist.pop() {
        loop {
            match visited.get_mut(pc) {
                None => return Err(StackError::FallsOffEnd(pc)),
                Some(true) => break,
                Some(seen) => *seen = true,
            }

            let word = code[pc];
            let opcode = OpCode::from_u8(instruction::decode_opcode(word))
                .ok_or(StackError::UnknownOpcode(pc))?;
            let operand = instruction::decode_operand(word) as usize;

            match opcode {
                OpCode::Jump => pc = operand,
                OpCode::JumpIfFalse | OpCode::JumpIfTrue => {
                    worklist.push(operand);
                    pc += 1;
                }
                OpCode::Call => {
                    if !calls.contains(&operand) {
                        calls.push(operand);
                    }
                    pc += 1;
                }
                OpCode::Pause => {
                    if let Some(point) = points.get(operand) {
                        worklist.push(point.default_offset as usize);
                    }
                    break;
                }
                OpCode::Return | OpCode::Halt => break,
                _ => pc += 1,
            }
        }
    }
    Ok(calls)
}

#[cfg(test)]
mod tests {
    use super::*;
    use instruction::{encode, encode_op};

    #[test]
    fn test_straight_line_depth() {
        let code = vec![
            encode(OpCode::PushConst, 0),
            encode(OpCode::PushConst, 1),
            encode(OpCode::PushConst, 2),
            encode_op(OpCode::Lerp),
            encode(OpCode::StoreOutput, 0),
            encode_op(OpCode::Return),
        ];
        assert_eq!(analyze_stack(&code, 0, &[]), Ok(3));
    }

    #[test]
    fn test_return_requires_empty_stack() {
        let code = vec![
            encode(OpCode::PushConst, 0),
            encode(OpCode::JumpIfFalse, 3),
            encode(OpCode::PushConst, 0),
            encode_op(OpCode::Return),
        ];
        assert_eq!(analyze_stack(&code, 0, &[]), Err(StackError::Unbalanced(3)));
    }

    #[test]
    fn test_join_depths_must_agree() {
        let code = vec![
            encode(OpCode::PushConst, 0),
            encode(OpCode::JumpIfTrue, 3),
            encode(OpCode::PushConst, 0),
            encode_op(OpCode::Halt),
        ];
        assert_eq!(analyze_stack(&code, 0, &[]), Err(StackError::Mismatch(3)));
    }

    #[test]
    fn test_underflow_detected() {
        let code = vec![encode_op(OpCode::Add), encode_op(OpCode::Halt)];
        assert_eq!(analyze_stack(&code, 0, &[]), Err(StackError::Underflow(0)));
    }

    #[test]
    fn test_falls_off_end() {
        let code = vec![encode(OpCode::PushConst, 0), encode_op(OpCode::Pop)];
        assert_eq!(analyze_stack(&code, 0, &[]), Err(StackError::FallsOffEnd(2)));
    }

    #[test]
    fn test_call_depth_follows_nesting() {
        let code = vec![
            encode(OpCode::Call, 2),
            encode_op(OpCode::Return),
            encode(OpCode::Call, 5),
            encode(OpCode::Call, 5),
            encode_op(OpCode::Return),
            encode_op(OpCode::Return),
        ];
        assert_eq!(analyze_call_depth(&code, 0, &[]), Ok(2));
        assert_eq!(analyze_call_depth(&code, 2, &[]), Ok(1));
        assert_eq!(analyze_call_depth(&code, 5, &[]), Ok(0));
    }

    #[test]
    fn test_jumps_stay_in_frame() {
        // A loop around a call needs one frame, not one per iteration
        let code = vec![
            encode(OpCode::Call, 3),
            encode(OpCode::Jump, 0),
            encode_op(OpCode::Halt),
            encode_op(OpCode::Return),
        ];
        assert_eq!(analyze_call_depth(&code, 0, &[]), Ok(1));
    }

    #[test]
    fn test_recursive_call_rejected() {
        let code = vec![
            encode(OpCode::Call, 2),
            encode_op(OpCode::Halt),
            encode(OpCode::Call, 4),
            encode_op(OpCode::Return),
            encode(OpCode::Call, 2),
            encode_op(OpCode::Return),
        ];
        assert_eq!(
            analyze_call_depth(&code, 0, &[]),
            Err(StackError::RecursiveCall(2))
        );
    }

    #[test]
    fn test_pause_follows_default() {
        let point = ContinuationPoint {
            name: "cp".into(),
            name_hash: name_hash("cp"),
            timeout_ms: 100,
            default_offset: 2,
            offset: 0,
        };
        let code = vec![
            encode(OpCode::Pause, 0),
            encode_op(OpCode::Halt),
            encode(OpCode::PushConst, 0),
            encode_op(OpCode::Return),
        ];
        // The default branch leaves a value on the stack at its return
        assert_eq!(
            analyze_stack(&code, 0, std::slice::from_ref(&point)),
            Err(StackError::Unbalanced(3))
        );
    }
}
