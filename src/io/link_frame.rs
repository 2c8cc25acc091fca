//! Microcontroller status line decoding
//!
//! Lines are tagged CSV with a fixed field order per firmware schema:
//! - legacy:  `DIST,<uint>,OWNER,<0|1>,PIR,<0|1>,GATE,<0|1>`
//! - session: `DIST,<uint>,PIR,<0|1>,SESSION,<0|1>,OWNER,<0|1>,GATE,<0|1>`
//!
//! The whole line must match; nothing is assigned until every field checks out.

use crate::domain::types::{LinkSchema, SensorFrame};
use crate::infra::error::FrameDecodeError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Field {
    Dist,
    Owner,
    Pir,
    Session,
    Gate,
}

impl Field {
    fn tag(&self) -> &'static str {
        match self {
            Field::Dist => "DIST",
            Field::Owner => "OWNER",
            Field::Pir => "PIR",
            Field::Session => "SESSION",
            Field::Gate => "GATE",
        }
    }
}

const LEGACY_LAYOUT: [Field; 4] = [Field::Dist, Field::Owner, Field::Pir, Field::Gate];
const SESSION_LAYOUT: [Field; 5] =
    [Field::Dist, Field::Pir, Field::Session, Field::Owner, Field::Gate];

fn layout(schema: LinkSchema) -> &'static [Field] {
    match schema {
        LinkSchema::Legacy => &LEGACY_LAYOUT,
        LinkSchema::Session => &SESSION_LAYOUT,
    }
}

fn parse_distance(index: usize, value: &str) -> Result<u32, FrameDecodeError> {
    // `u32::from_str` accepts a leading '+', the firmware never sends one
    if value.is_empty() || !value.bytes().all(|b| b.is_ascii_digit()) {
        return Err(FrameDecodeError::Number { index, value: value.to_string() });
    }
    value.parse().map_err(|_| FrameDecodeError::Number { index, value: value.to_string() })
}

fn parse_flag(index: usize, value: &str) -> Result<bool, FrameDecodeError> {
    match value {
        "0" => Ok(false),
        "1" => Ok(true),
        _ => Err(FrameDecodeError::Flag { index, value: value.to_string() }),
    }
}

/// Decode one line (without its line terminator) for the given schema
pub fn parse(line: &str, schema: LinkSchema) -> Result<SensorFrame, FrameDecodeError> {
    let fields = layout(schema);
    let parts: Vec<&str> = line.split(',').collect();
    let expected = fields.len() * 2;
    if parts.len() != expected {
        return Err(FrameDecodeError::Arity { expected, found: parts.len() });
    }

    let mut distance_cm = None;
    let mut motion = None;
    let mut gate = None;
    let mut session = None;
    let mut owner = None;

    for (i, field) in fields.iter().enumerate() {
        let tag_index = i * 2;
        let value_index = tag_index + 1;
        let tag = parts[tag_index];
        if tag != field.tag() {
            return Err(FrameDecodeError::Tag {
                index: tag_index,
                expected: field.tag(),
                found: tag.to_string(),
            });
        }

        let value = parts[value_index];
        match field {
            Field::Dist => distance_cm = Some(parse_distance(value_index, value)?),
            Field::Pir => motion = Some(parse_flag(value_index, value)?),
            Field::Gate => gate = Some(parse_flag(value_index, value)?),
            Field::Session => session = Some(parse_flag(value_index, value)?),
            Field::Owner => owner = Some(parse_flag(value_index, value)?),
        }
    }

    // Every layout carries DIST, PIR and GATE
    match (distance_cm, motion, gate) {
        (Some(distance_cm), Some(motion_detected), Some(gate_open)) => Ok(SensorFrame {
            distance_cm,
            motion_detected,
            gate_open,
            session_echo: session,
            owner_echo: owner,
        }),
        _ => Err(FrameDecodeError::Arity { expected, found: parts.len() }),
    }
}
