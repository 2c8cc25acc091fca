//! Identity resolution over one tick's classified face regions

use crate::domain::types::{BestMatch, IdentityObservation};

/// Owner identity and acceptance threshold
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IdentityResolver {
    owner_label: i32,
    confidence_threshold: f64,
}

impl IdentityResolver {
    pub fn new(owner_label: i32, confidence_threshold: f64) -> Self {
        Self { owner_label, confidence_threshold }
    }

    /// An observation authorizes only for the owner label with confidence
    /// strictly below the threshold
    pub fn is_authorized(&self, obs: &IdentityObservation) -> bool {
        obs.label == Some(self.owner_label) && obs.confidence < self.confidence_threshold
    }

    /// Pick the lowest-confidence observation; ties keep the first seen
    pub fn resolve(&self, observations: &[IdentityObservation]) -> Option<BestMatch> {
        let mut best: Option<&IdentityObservation> = None;
        for obs in observations {
            match best {
                Some(current) if obs.confidence >= current.confidence => {}
                _ => best = Some(obs),
            }
        }

        best.map(|obs| BestMatch {
            region: obs.region,
            is_authorized: self.is_authorized(obs),
            confidence: obs.confidence,
        })
    }

    /// Whether any region in the tick is the authorized owner.
    ///
    /// This is the raw signal fed to the stabilizer: the owner may be
    /// visible even when a stranger's face scores a better match.
    pub fn owner_present(&self, observations: &[IdentityObservation]) -> bool {
        observations.iter().any(|obs| self.is_authorized(obs))
    }

    pub fn owner_label(&self) -> i32 {
        self.owner_label
    }

    pub fn confidence_threshold(&self) -> f64 {
        self.confidence_threshold
    }
}
