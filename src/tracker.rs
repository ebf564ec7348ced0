//! Attack-State Tracking
//!
//! One tracker per attack type, each an independent two-state machine
//! (`Monitoring` -> `Alerted` -> back after cooldown) that turns noisy
//! per-window predictions into de-duplicated alerts. Trackers never share
//! state; a flood of one attack type cannot mask another.

use std::collections::{HashMap, VecDeque};

use crate::alert::Alert;
use crate::classify::Classification;
use crate::config::Thresholds;
use crate::features::FeatureWindow;
use crate::frame::{AttackType, MacAddr, Timestamp};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TrackerState {
    Monitoring,
    Alerted,
}

/// What the tracker keeps from one matching classification result.
#[derive(Debug, Clone)]
struct Prediction {
    confidence: f64,
    rate: f64,
    relevant_frames: u64,
    attacker: Option<MacAddr>,
}

/// Per-attack-type alert state machine.
///
/// All time arithmetic uses stream time (the incoming window's `end`), so a
/// replayed trace alerts at identical timestamps.
#[derive(Debug)]
pub struct AttackTracker {
    attack: AttackType,
    thresholds: Thresholds,
    lookback: usize,
    recent: VecDeque<Prediction>,
    state: TrackerState,
    last_alert: Option<Timestamp>,
    suppressed: u64,
    suppressed_total: u64,
    filtered: u64,
    alerts: u64,
}

impl AttackTracker {
    pub fn new(attack: AttackType, thresholds: Thresholds, lookback: u32) -> Self {
        // Lookback never shrinks below min_predictions, or the alert
        // condition could not be met at all.
        let lookback = lookback.max(thresholds.min_predictions).max(1) as usize;
        Self {
            attack,
            thresholds,
            lookback,
            recent: VecDeque::with_capacity(lookback),
            state: TrackerState::Monitoring,
            last_alert: None,
            suppressed: 0,
            suppressed_total: 0,
            filtered: 0,
            alerts: 0,
        }
    }

    pub fn attack(&self) -> AttackType {
        self.attack
    }

    /// Matching results that failed the confidence/count/rate criteria.
    pub fn filtered(&self) -> u64 {
        self.filtered
    }

    /// Matching results swallowed by the cooldown since the last alert.
    pub fn suppressed(&self) -> u64 {
        self.suppressed
    }

    /// Lifetime count of cooldown-suppressed results.
    pub fn suppressed_total(&self) -> u64 {
        self.suppressed_total
    }

    pub fn alerts_emitted(&self) -> u64 {
        self.alerts
    }

    /// Consume one classification result whose label matches this tracker's
    /// attack type, together with the window it came from.
    pub fn observe(&mut self, result: &Classification, window: &FeatureWindow) -> Option<Alert> {
        debug_assert_eq!(result.label.attack_type(), Some(self.attack));

        let now = window.end;

        self.recent.push_back(Prediction {
            confidence: result.confidence,
            rate: window.attack_rate(self.attack),
            relevant_frames: window.relevant_frames(self.attack),
            attacker: *window.dominant_sources.get(self.attack),
        });
        while self.recent.len() > self.lookback {
            self.recent.pop_front();
        }

        if self.state == TrackerState::Alerted {
            let last = self.last_alert.expect("alerted state has an alert time");
            if now.micros_since(last) < self.thresholds.cooldown_secs * 1_000_000 {
                self.suppressed += 1;
                self.suppressed_total += 1;
                return None;
            }
            // Cooldown elapsed; predictions are kept so a sustained attack
            // re-alerts promptly.
            self.state = TrackerState::Monitoring;
        }

        let qualifying: Vec<&Prediction> = self
            .recent
            .iter()
            .filter(|p| p.confidence >= self.thresholds.confidence)
            .collect();

        // Max instantaneous rate over the qualifying windows; each window
        // rate already uses wall-clock duration, so bursty arrival within a
        // window cannot inflate it.
        let observed_rate = qualifying.iter().map(|p| p.rate).fold(0.0, f64::max);
        let relevant_total: u64 = qualifying.iter().map(|p| p.relevant_frames).sum();

        let triggered = qualifying.len() as u32 >= self.thresholds.min_predictions
            && observed_rate >= self.thresholds.rate_threshold
            && relevant_total >= self.thresholds.min_frames;

        if !triggered {
            self.filtered += 1;
            return None;
        }

        let confidence =
            qualifying.iter().map(|p| p.confidence).sum::<f64>() / qualifying.len() as f64;
        let attacker = dominant_attacker(&qualifying);

        self.state = TrackerState::Alerted;
        self.last_alert = Some(now);
        self.alerts += 1;
        let suppressed_since_last = std::mem::take(&mut self.suppressed);

        Some(Alert {
            attack_type: self.attack,
            attacker,
            confidence,
            timestamp: now,
            suppressed_since_last,
        })
    }
}

/// Most frequent dominant MAC across the qualifying windows, ties broken by
/// MAC ordering.
fn dominant_attacker(qualifying: &[&Prediction]) -> Option<MacAddr> {
    let mut tally: HashMap<MacAddr, u64> = HashMap::new();
    for p in qualifying {
        if let Some(mac) = p.attacker {
            *tally.entry(mac).or_insert(0) += 1;
        }
    }
    tally
        .iter()
        .max_by(|(mac_a, n_a), (mac_b, n_b)| n_a.cmp(n_b).then(mac_b.cmp(mac_a)))
        .map(|(mac, _)| *mac)
}
