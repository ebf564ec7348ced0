//! Classification Adapter
//!
//! The detection core consumes the trained classifier through the one-method
//! [`Classifier`] trait and never sees model internals. A deterministic
//! rule-based implementation ships as the default so the daemon runs without
//! an external model artifact; anything honoring the trait can replace it.

use thiserror::Error;

use crate::features::FeatureWindow;
use crate::frame::AttackType;

/// Predicted class for one feature window.
///
/// A closed enum: predictions outside the monitored set cannot be
/// represented, so stray model labels collapse to `Normal` at the adapter
/// boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Label {
    Normal,
    Deauth,
    BeaconFlood,
    RogueAp,
}

impl Label {
    pub fn attack_type(self) -> Option<AttackType> {
        match self {
            Label::Normal => None,
            Label::Deauth => Some(AttackType::Deauth),
            Label::BeaconFlood => Some(AttackType::BeaconFlood),
            Label::RogueAp => Some(AttackType::RogueAp),
        }
    }

    pub fn from_attack(attack: AttackType) -> Self {
        match attack {
            AttackType::Deauth => Label::Deauth,
            AttackType::BeaconFlood => Label::BeaconFlood,
            AttackType::RogueAp => Label::RogueAp,
        }
    }
}

/// Result of classifying one sealed window.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Classification {
    pub label: Label,
    /// In [0, 1].
    pub confidence: f64,
}

impl Classification {
    /// Fail-safe stand-in when the classifier is unavailable: prefer a
    /// missed detection over a false alarm.
    pub const NORMAL_FALLBACK: Classification = Classification {
        label: Label::Normal,
        confidence: 0.0,
    };
}

#[derive(Debug, Error)]
pub enum ClassifierError {
    #[error("classifier unavailable: {0}")]
    Unavailable(String),
    #[error("malformed classifier output: {0}")]
    Malformed(String),
}

/// The capability the core requires of any classifier.
pub trait Classifier: Send {
    fn classify(&self, window: &FeatureWindow) -> Result<Classification, ClassifierError>;
}

/// Deterministic rule-based classifier.
///
/// Thresholds follow the conservative labeling rules used to build the
/// training set: only very clear evidence gets an attack label. Confidence
/// scales with how far the observed rate exceeds the labeling threshold,
/// reaching 1.0 at twice the threshold.
#[derive(Debug, Clone)]
pub struct RuleClassifier {
    /// Deauth frames per second before the window is labeled an attack.
    pub deauth_rate: f64,
    /// Beacon frames per second before the window is labeled a flood.
    pub beacon_rate: f64,
    /// Beacon + probe-response frames per second for the rogue-AP label.
    pub rogue_rate: f64,
    /// Distinct BSSIDs required in a window before rogue-AP is considered.
    pub rogue_min_bssids: u64,
}

impl Default for RuleClassifier {
    fn default() -> Self {
        Self {
            deauth_rate: 10.0,
            beacon_rate: 100.0,
            rogue_rate: 10.0,
            rogue_min_bssids: 2,
        }
    }
}

impl RuleClassifier {
    fn confidence(rate: f64, threshold: f64) -> f64 {
        (rate / (2.0 * threshold)).clamp(0.0, 1.0)
    }
}

impl Classifier for RuleClassifier {
    fn classify(&self, window: &FeatureWindow) -> Result<Classification, ClassifierError> {
        let deauth = window.attack_rate(AttackType::Deauth);
        if deauth > self.deauth_rate {
            return Ok(Classification {
                label: Label::Deauth,
                confidence: Self::confidence(deauth, self.deauth_rate),
            });
        }

        let beacon = window.attack_rate(AttackType::BeaconFlood);
        if beacon > self.beacon_rate {
            return Ok(Classification {
                label: Label::BeaconFlood,
                confidence: Self::confidence(beacon, self.beacon_rate),
            });
        }

        // Rogue APs advertise an existing network from a second BSSID:
        // elevated beacon/probe-response activity across divergent BSSIDs,
        // well below flood volume.
        let rogue = window.attack_rate(AttackType::RogueAp);
        if rogue > self.rogue_rate && window.unique_bssid_count >= self.rogue_min_bssids {
            return Ok(Classification {
                label: Label::RogueAp,
                confidence: Self::confidence(rogue, self.rogue_rate),
            });
        }

        Ok(Classification {
            label: Label::Normal,
            confidence: 1.0,
        })
    }
}
