//! Alert records and delivery sinks.

use chrono::DateTime;
use colored::Colorize;
use tracing::warn;

use crate::frame::{AttackType, MacAddr, Timestamp};

/// Relative severity of an attack type, for operator display.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Medium,
    High,
}

impl Severity {
    pub fn name(&self) -> &'static str {
        match self {
            Severity::Medium => "MEDIUM",
            Severity::High => "HIGH",
        }
    }
}

impl AttackType {
    pub fn severity(&self) -> Severity {
        match self {
            AttackType::Deauth | AttackType::RogueAp => Severity::High,
            AttackType::BeaconFlood => Severity::Medium,
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            AttackType::Deauth => "forced disconnection of clients from the network",
            AttackType::BeaconFlood => "flood of fabricated network advertisements",
            AttackType::RogueAp => "access point impersonating a legitimate network",
        }
    }
}

/// An emitted security notification. Immutable; ownership moves to the sink.
#[derive(Debug, Clone, PartialEq)]
pub struct Alert {
    pub attack_type: AttackType,
    /// Most frequent dominant attacker MAC among the qualifying windows,
    /// when one could be established.
    pub attacker: Option<MacAddr>,
    /// Mean confidence of the qualifying predictions, not any single
    /// window's value.
    pub confidence: f64,
    /// Stream time of the window that triggered the alert.
    pub timestamp: Timestamp,
    /// Matching results swallowed by the cooldown since the previous alert.
    pub suppressed_since_last: u64,
}

/// Where alerts go. Delivery must not block the trackers; the pipeline puts
/// a bounded queue in front of whatever implements this.
pub trait AlertSink: Send {
    fn deliver(&mut self, alert: &Alert);
}

/// Prints a colored alert block to the console and mirrors it to the log.
#[derive(Debug, Default)]
pub struct ConsoleSink;

impl ConsoleSink {
    fn recommendations(attack: AttackType) -> &'static [&'static str] {
        match attack {
            AttackType::Deauth => &[
                "check which clients are being disconnected",
                "locate the device sending the deauth frames",
                "consider switching the AP channel",
                "enable 802.11w (PMF) on the access point",
            ],
            AttackType::BeaconFlood => &[
                "ignore newly appearing networks",
                "do not join unknown SSIDs",
                "verify the air with a second capture tool",
            ],
            AttackType::RogueAp => &[
                "do not connect to the duplicate network",
                "verify the legitimate BSSID of your AP",
                "warn other users of the network",
            ],
        }
    }
}

impl AlertSink for ConsoleSink {
    fn deliver(&mut self, alert: &Alert) {
        let severity = alert.attack_type.severity();
        let when = DateTime::from_timestamp_micros(alert.timestamp.micros() as i64)
            .map(|dt| dt.format("%Y-%m-%d %H:%M:%S%.3f UTC").to_string())
            .unwrap_or_else(|| alert.timestamp.to_string());
        let attacker = alert
            .attacker
            .map(|mac| mac.to_string())
            .unwrap_or_else(|| "unknown".to_string());

        let title = format!("SECURITY ALERT: {}", alert.attack_type).red().bold();
        println!();
        println!("{}", title);
        println!("  {}", alert.attack_type.description());
        println!("  time:       {}", when);
        println!("  severity:   {}", severity.name().yellow());
        println!("  attacker:   {}", attacker.cyan());
        println!("  confidence: {:.0}%", alert.confidence * 100.0);
        if alert.suppressed_since_last > 0 {
            println!(
                "  suppressed: {} repeat detections since previous alert",
                alert.suppressed_since_last
            );
        }
        println!("  recommended:");
        for r in Self::recommendations(alert.attack_type) {
            println!("    - {}", r);
        }
        println!();

        warn!(
            attack = %alert.attack_type,
            attacker = %attacker,
            confidence = alert.confidence,
            suppressed = alert.suppressed_since_last,
            "security alert emitted"
        );
    }
}

/// Collects alerts in memory. Used by tests and the replay summary.
#[derive(Debug, Default)]
pub struct MemorySink {
    pub alerts: Vec<Alert>,
}

impl AlertSink for MemorySink {
    fn deliver(&mut self, alert: &Alert) {
        self.alerts.push(alert.clone());
    }
}
