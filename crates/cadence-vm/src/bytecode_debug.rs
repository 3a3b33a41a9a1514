//! Bytecode debugging utilities

use crate::bytecode::Model;
use crate::opcode::{instruction::*, OpCode};
use std::fmt::Write;

/// Render a Model as a human-readable listing
pub fn disassemble(model: &Model) -> String {
    let mut out = String::new();
    // Writing into a String cannot fail
    let _ = write_model(&mut out, model);
    out
}

fn write_model(out: &mut String, model: &Model) -> std::fmt::Result {
    writeln!(out, "========== Model: {} ==========", model.id())?;
    writeln!(
        out,
        "Stack: {}  Calls: {}  Locals: {}  Entry: {:04}",
        model.max_stack(),
        model.max_call_depth(),
        model.local_count(),
        model.entry_offset()
    )?;
    if let Some(ext) = model.extension() {
        writeln!(out, "Extends: {} at #{:08x}", ext.parent, ext.attach_hash)?;
    }

    let schema = model.schema();
    for entry in &schema.inputs {
        writeln!(out, "  in  I[{}] {}: {}", entry.slot, entry.name, entry.ty)?;
    }
    for entry in &schema.outputs {
        writeln!(out, "  out O[{}] {}: {}", entry.slot, entry.name, entry.ty)?;
    }
    for channel in &schema.channels {
        writeln!(
            out,
            "  chn O[{}] {}: {} (urgency O[{}])",
            channel.value_slot, channel.name, channel.ty, channel.urgency_slot
        )?;
    }
    for (i, point) in model.continuation_points().iter().enumerate() {
        writeln!(
            out,
            "  pnt P[{}] {} timeout={}ms default={:04}",
            i, point.name, point.timeout_ms, point.default_offset
        )?;
    }

    writeln!(out, "\nBytecode:")?;
    let debug = model.debug_map();
    for (offset, &instruction) in model.code().iter().enumerate() {
        let offset32 = offset as u32;
        if let Some(flow) = debug.and_then(|d| d.flow_starting_at(offset32)) {
            writeln!(out, "{}:", flow)?;
        }
        write!(out, "{:04}  ", offset)?;
        write_instruction(out, model, instruction)?;
        if let Some(span) = debug.and_then(|d| d.span_at(offset32)) {
            write!(out, "  @{}", span)?;
        }
        writeln!(out)?;
    }
    Ok(())
}

fn write_instruction(out: &mut String, model: &Model, instruction: u32) -> std::fmt::Result {
    let byte = decode_opcode(instruction);
    let Some(opcode) = OpCode::from_u8(byte) else {
        return write!(out, "UNKNOWN       opcode={} (raw: 0x{:08x})", byte, instruction);
    };
    let operand = decode_operand(instruction);
    if !opcode.has_operand() {
        return write!(out, "{}", opcode.name());
    }

    write!(out, "{:<14}{}", opcode.name(), operand)?;
    match opcode {
        OpCode::PushConst => match model.constants().get(operand as usize) {
            Some(value) => match model.resolve_string(*value) {
                Some(text) if carries_strings(model) => {
                    write!(out, "  ; {:?} (\"{}\")", value, text)
                }
                _ => write!(out, "  ; {:?}", value),
            },
            None => write!(out, "  ; ???"),
        },
        OpCode::LoadInput => write_slot(out, &model.schema().inputs, operand),
        OpCode::StoreOutput => {
            let schema = model.schema();
            if let Some(entry) = schema.outputs.iter().find(|e| covers(e.slot, e.ty.width(), operand)) {
                write!(out, "  ; {}", entry.name)
            } else if let Some(channel) = schema.channels.iter().find(|c| {
                covers(c.value_slot, c.ty.width(), operand)
            }) {
                write!(out, "  ; {}", channel.name)
            } else if let Some(channel) = schema
                .channels
                .iter()
                .find(|c| u32::from(c.urgency_slot) == operand)
            {
                write!(out, "  ; {}.urgency", channel.name)
            } else {
                Ok(())
            }
        }
        OpCode::Pause => match model.continuation_points().get(operand as usize) {
            Some(point) => write!(out, "  ; {}", point.name),
            None => write!(out, "  ; ???"),
        },
        _ => Ok(()),
    }
}

fn write_slot(out: &mut String, entries: &[crate::bytecode::SchemaEntry], operand: u32) -> std::fmt::Result {
    match entries.iter().find(|e| covers(e.slot, e.ty.width(), operand)) {
        Some(entry) => write!(out, "  ; {}", entry.name),
        None => Ok(()),
    }
}

fn covers(slot: u16, width: usize, operand: u32) -> bool {
    let start = u32::from(slot);
    operand >= start && operand < start + width as u32
}

/// String constants are table indices; only annotate them when a string-typed
/// output or channel exists
fn carries_strings(model: &Model) -> bool {
    let schema = model.schema();
    schema.outputs.iter().any(|e| e.ty == cadence_types::ValueType::String)
        || schema.channels.iter().any(|c| c.ty == cadence_types::ValueType::String)
}
