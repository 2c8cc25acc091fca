//! Services - control logic
//!
//! - `stabilizer` - Hysteresis filter for the per-frame owner signal
//! - `session` - Motion-triggered session deadline
//! - `identity` - Owner match over classified face regions
//! - `fusion` - Combines the three into the per-tick decision
//! - `gateway` - Tick loop driving link, oracle and telemetry

pub mod fusion;
pub mod gateway;
pub mod identity;
pub mod session;
pub mod stabilizer;

// Re-export commonly used types
pub use fusion::FusionController;
pub use gateway::{Gateway, TickOutcome};
