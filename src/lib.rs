//! airsentry — passive 802.11 attack detection.
//!
//! Watches management/control traffic on a monitor-mode interface and
//! raises de-duplicated alerts for deauthentication floods, beacon floods,
//! and rogue access points. The detection core is a windowed feature
//! aggregator feeding a pluggable classifier, whose per-window predictions
//! are debounced by one state machine per attack type.

pub mod alert;
pub mod capture;
pub mod classify;
pub mod config;
pub mod features;
pub mod frame;
pub mod pipeline;
pub mod tracker;

pub use alert::{Alert, AlertSink, ConsoleSink, MemorySink};
pub use classify::{Classification, Classifier, ClassifierError, Label, RuleClassifier};
pub use config::{Config, Thresholds};
pub use features::{FeatureWindow, WindowAggregator};
pub use frame::{AttackType, Frame, FrameSubtype, MacAddr, PerAttack, Timestamp};
pub use pipeline::{Pipeline, PipelineReport, PipelineStats};
pub use tracker::AttackTracker;
