//! Fusion controller - composes session timer, identity resolver and
//! owner stabilizer into the per-tick command pair.
//!
//! One tick runs in phases so the caller can keep camera I/O outside:
//! 1. `observe_link` for a freshly parsed sensor frame (motion re-arms the session)
//! 2. `advance` evaluates the session; its result says whether recognition is due
//! 3. `fold_recognition` with the oracle's observations (only when due)
//! 4. `output` for the decision handed to the command link and telemetry
//!
//! Without a session timer (legacy firmware) recognition runs every tick and
//! the advisory gate decision uses the distance threshold instead.

use crate::domain::types::{BestMatch, FusionOutput, IdentityObservation, SensorFrame};
use crate::infra::config::Config;
use crate::services::identity::IdentityResolver;
use crate::services::session::SessionTimer;
use crate::services::stabilizer::Stabilizer;
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// Session state change produced by `advance`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionTransition {
    None,
    Started,
    Expired,
}

/// What the tick should do about recognition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TickPlan {
    pub recognize: bool,
    pub transition: SessionTransition,
}

pub struct FusionController {
    session: Option<SessionTimer>,
    resolver: IdentityResolver,
    owner: Stabilizer,
    gate_threshold_cm: u32,
    last_frame: Option<SensorFrame>,
    last_best: Option<BestMatch>,
    was_active: bool,
}

impl FusionController {
    pub fn new(
        session_duration: Option<Duration>,
        resolver: IdentityResolver,
        owner: Stabilizer,
        gate_threshold_cm: u32,
    ) -> Self {
        Self {
            session: session_duration.map(SessionTimer::new),
            resolver,
            owner,
            gate_threshold_cm,
            last_frame: None,
            last_best: None,
            was_active: false,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        let session = config
            .link_schema()
            .has_session()
            .then(|| Duration::from_secs(config.session_duration_secs()));
        Self::new(
            session,
            IdentityResolver::new(config.owner_label(), config.confidence_threshold()),
            Stabilizer::new(config.debounce_on_frames(), config.debounce_off_frames()),
            config.gate_threshold_cm(),
        )
    }

    /// Fold a freshly parsed frame; motion re-arms the session
    pub fn observe_link(&mut self, frame: SensorFrame, now: Instant) {
        if frame.motion_detected {
            if let Some(ref mut session) = self.session {
                session.trigger(now);
                debug!(remaining_ms = %session.remaining(now).as_millis(), "session_rearmed");
            }
        }
        self.last_frame = Some(frame);
    }

    /// Evaluate the session and decide whether recognition runs this tick.
    ///
    /// Expiry forces the owner signal off and clears the stabilizer; a
    /// session boundary is never debounced.
    pub fn advance(&mut self, now: Instant) -> TickPlan {
        let Some(ref mut session) = self.session else {
            return TickPlan { recognize: true, transition: SessionTransition::None };
        };

        let active = session.evaluate(now);
        let transition = match (self.was_active, active) {
            (false, true) => SessionTransition::Started,
            (true, false) => SessionTransition::Expired,
            _ => SessionTransition::None,
        };
        self.was_active = active;

        match transition {
            SessionTransition::Started => {
                info!(duration_secs = %session.duration().as_secs(), "session_started");
            }
            SessionTransition::Expired => {
                info!(owner_was = %self.owner.value(), "session_expired");
            }
            SessionTransition::None => {}
        }

        if !active {
            self.owner.reset();
            self.last_best = None;
        }

        TickPlan { recognize: active, transition }
    }

    /// Feed one tick of classified regions into the owner stabilizer
    pub fn fold_recognition(&mut self, observations: &[IdentityObservation]) -> Option<BestMatch> {
        let before = self.owner.value();
        let raw = self.resolver.owner_present(observations);
        let stable = self.owner.update(raw);
        self.last_best = self.resolver.resolve(observations);

        if stable != before {
            info!(
                owner = %stable,
                confidence = ?self.last_best.map(|b| b.confidence),
                "owner_stable"
            );
        }
        tracing::trace!(raw = %raw, stable = %stable, regions = observations.len(), "owner_raw");

        self.last_best
    }

    /// Current decision
    pub fn output(&self) -> FusionOutput {
        let owner_authorized = self.owner.value();
        match self.session {
            Some(ref session) => {
                let session_active = session.is_active();
                FusionOutput {
                    session_active,
                    owner_authorized,
                    gate_should_open: session_active && owner_authorized,
                }
            }
            None => {
                let near = self
                    .last_frame
                    .is_some_and(|frame| frame.distance_cm <= self.gate_threshold_cm);
                FusionOutput {
                    session_active: false,
                    owner_authorized,
                    gate_should_open: owner_authorized && near,
                }
            }
        }
    }

    pub fn has_session(&self) -> bool {
        self.session.is_some()
    }

    /// Most recent sensor frame (may be stale relative to the current tick)
    pub fn last_frame(&self) -> Option<&SensorFrame> {
        self.last_frame.as_ref()
    }

    pub fn last_best(&self) -> Option<BestMatch> {
        self.last_best
    }
}
