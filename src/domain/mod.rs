//! Domain models - core types shared by the controller, link and telemetry
//!
//! - `SensorFrame` - one decoded microcontroller status line
//! - `IdentityObservation` / `BestMatch` - face classification results
//! - `FusionOutput` - the controller decision for a tick
//! - `GateEvent` - telemetry snapshot

pub mod types;

pub use types::{
    epoch_secs, BestMatch, Channel, FusionOutput, GateEvent, IdentityObservation, LinkSchema,
    Observations, Region, SensorFrame,
};
