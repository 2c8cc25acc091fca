//! Shared types for the gate fusion controller

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use std::time::{SystemTime, UNIX_EPOCH};

/// Current UNIX time in whole seconds
pub fn epoch_secs() -> i64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_secs() as i64
}

/// Which status-line layout the microcontroller firmware speaks.
///
/// The schema also selects the controller variant: `Legacy` firmware has no
/// session concept, so the gateway runs without a session timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LinkSchema {
    /// `DIST,<n>,OWNER,<0|1>,PIR,<0|1>,GATE,<0|1>`
    Legacy,
    /// `DIST,<n>,PIR,<0|1>,SESSION,<0|1>,OWNER,<0|1>,GATE,<0|1>`
    Session,
}

impl LinkSchema {
    pub fn as_str(&self) -> &'static str {
        match self {
            LinkSchema::Legacy => "legacy",
            LinkSchema::Session => "session",
        }
    }

    pub fn has_session(&self) -> bool {
        matches!(self, LinkSchema::Session)
    }
}

/// One decoded status line from the microcontroller
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SensorFrame {
    pub distance_cm: u32,
    pub motion_detected: bool,
    pub gate_open: bool,
    /// Microcontroller's own session flag (telemetry only)
    pub session_echo: Option<bool>,
    /// Microcontroller's own owner flag (telemetry only)
    pub owner_echo: Option<bool>,
}

/// Detected face region in frame pixel coordinates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
pub struct Region {
    pub x: i32,
    pub y: i32,
    pub w: i32,
    pub h: i32,
}

/// Classification result for one detected region.
///
/// `confidence` is distance-like: lower means a better match.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize)]
pub struct IdentityObservation {
    pub region: Region,
    #[serde(default)]
    pub label: Option<i32>,
    pub confidence: f64,
}

/// Regions classified in one tick; a frame rarely holds more than a few faces
pub type Observations = SmallVec<[IdentityObservation; 4]>;

/// Best-matching region of a tick
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BestMatch {
    pub region: Region,
    pub is_authorized: bool,
    pub confidence: f64,
}

/// Controller decision for one tick
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FusionOutput {
    pub session_active: bool,
    pub owner_authorized: bool,
    /// Advisory only; the microcontroller owns the real gate state
    pub gate_should_open: bool,
}

/// Outbound command channel to the microcontroller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Channel {
    Owner,
    Session,
}

impl Channel {
    pub const ALL: [Channel; 2] = [Channel::Owner, Channel::Session];

    pub fn as_str(&self) -> &'static str {
        match self {
            Channel::Owner => "owner",
            Channel::Session => "session",
        }
    }

    pub(crate) fn index(&self) -> usize {
        match self {
            Channel::Owner => 0,
            Channel::Session => 1,
        }
    }
}

/// Telemetry snapshot sent to the bus and the log store
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GateEvent {
    pub timestamp: i64,
    pub distance_cm: u32,
    pub pir_motion: bool,
    pub session_active: bool,
    pub owner: bool,
    pub gate_open: bool,
    pub lamp_on: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mcu_session: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mcu_owner: Option<bool>,
}

impl GateEvent {
    /// Combine the controller decision with the last known sensor fields.
    /// The lamp follows the gate on the current firmware.
    pub fn snapshot(timestamp: i64, frame: &SensorFrame, output: &FusionOutput) -> Self {
        Self {
            timestamp,
            distance_cm: frame.distance_cm,
            pir_motion: frame.motion_detected,
            session_active: output.session_active,
            owner: output.owner_authorized,
            gate_open: frame.gate_open,
            lamp_on: frame.gate_open,
            mcu_session: frame.session_echo,
            mcu_owner: frame.owner_echo,
        }
    }
}
