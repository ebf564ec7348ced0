//! End-to-end pipeline tests over deterministic frame traces.

use tokio::sync::mpsc;

use airsentry::capture::FrameQueue;
use airsentry::classify::{Classification, Classifier, ClassifierError, Label};
use airsentry::{
    AttackType, Config, Frame, FrameSubtype, MacAddr, MemorySink, Pipeline, PipelineReport,
    Timestamp,
};

const ATTACKER: MacAddr = MacAddr::new([0x02, 0xaa, 0xbb, 0xcc, 0xdd, 0xee]);
const AP: MacAddr = MacAddr::new([0x04, 0x10, 0x20, 0x30, 0x40, 0x50]);

/// Labels any window with deauth traffic at or above `min_rate`.
struct StubClassifier {
    min_rate: f64,
    confidence: f64,
}

impl Classifier for StubClassifier {
    fn classify(&self, window: &airsentry::FeatureWindow) -> Result<Classification, ClassifierError> {
        if window.deauth_rate >= self.min_rate {
            Ok(Classification {
                label: Label::Deauth,
                confidence: self.confidence,
            })
        } else {
            Ok(Classification {
                label: Label::Normal,
                confidence: 1.0,
            })
        }
    }
}

/// Always unavailable, as if the model artifact were missing.
struct BrokenClassifier;

impl Classifier for BrokenClassifier {
    fn classify(&self, _: &airsentry::FeatureWindow) -> Result<Classification, ClassifierError> {
        Err(ClassifierError::Unavailable("model not loaded".into()))
    }
}

/// `per_sec` deauth frames per second for `secs` seconds, starting at 0.
fn deauth_flood(secs: u64, per_sec: u64) -> Vec<Frame> {
    let step = 1_000_000 / per_sec;
    let mut frames = Vec::new();
    for s in 0..secs {
        for i in 0..per_sec {
            frames.push(Frame {
                timestamp: Timestamp::from_micros(s * 1_000_000 + i * step),
                source_mac: ATTACKER,
                bssid: Some(AP),
                subtype: FrameSubtype::Deauth,
                signal_dbm: Some(-55),
            });
        }
    }
    frames
}

/// Run a trace through a fresh pipeline and collect the emitted alerts.
async fn run_trace(
    frames: Vec<Frame>,
    classifier: Box<dyn Classifier>,
) -> (PipelineReport, Vec<airsentry::Alert>) {
    let pipeline = Pipeline::new(Config::default(), classifier);
    let (queue, frame_rx) = FrameQueue::bounded(frames.len().max(1), pipeline.stats());
    for frame in frames {
        queue.push_blocking(frame);
    }
    drop(queue);

    let (_shutdown_tx, shutdown_rx) = mpsc::channel::<()>(1);
    let (report, sink) = pipeline
        .run(frame_rx, MemorySink::default(), shutdown_rx)
        .await
        .expect("pipeline run");
    (report, sink.alerts)
}

fn stub() -> Box<dyn Classifier> {
    Box::new(StubClassifier {
        min_rate: 5.0,
        confidence: 0.9,
    })
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn flood_emits_exactly_one_alert() {
    // 10 deauth/s for 20s exceeds every default deauth threshold.
    let (report, alerts) = run_trace(deauth_flood(20, 10), stub()).await;

    assert_eq!(alerts.len(), 1);
    let alert = &alerts[0];
    assert_eq!(alert.attack_type, AttackType::Deauth);
    assert_eq!(alert.attacker, Some(ATTACKER));
    // Fires when the 15th qualifying window (ending at t=15s) lands.
    assert_eq!(alert.timestamp, Timestamp::from_secs(15));
    assert!((alert.confidence - 0.9).abs() < 1e-9);

    assert_eq!(report.stats.windows_sealed, 20);
    assert_eq!(report.stats.alerts_emitted, 1);
    assert_eq!(*report.alerts_per_attack.get(AttackType::Deauth), 1);
    // Windows 16..20 landed inside the cooldown.
    assert_eq!(*report.suppressed.get(AttackType::Deauth), 5);
    // The other trackers never saw a matching label.
    assert_eq!(*report.alerts_per_attack.get(AttackType::BeaconFlood), 0);
    assert_eq!(*report.filtered.get(AttackType::RogueAp), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn sustained_flood_realerts_after_cooldown() {
    // 80s of sustained flooding: first alert at 15s, cooldown until 75s,
    // second alert as soon as it lapses.
    let (report, alerts) = run_trace(deauth_flood(80, 10), stub()).await;

    assert_eq!(alerts.len(), 2);
    assert_eq!(alerts[0].timestamp, Timestamp::from_secs(15));
    assert_eq!(alerts[1].timestamp, Timestamp::from_secs(75));
    // Windows ending 16..74 were swallowed by the cooldown.
    assert_eq!(alerts[1].suppressed_since_last, 59);
    assert_eq!(*report.alerts_per_attack.get(AttackType::Deauth), 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn short_flood_only_filters() {
    // 14 qualifying windows, one short of min_predictions=15.
    let (report, alerts) = run_trace(deauth_flood(14, 10), stub()).await;

    assert!(alerts.is_empty());
    assert_eq!(*report.filtered.get(AttackType::Deauth), 14);
    assert_eq!(report.stats.alerts_emitted, 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn classifier_failure_is_not_fatal() {
    let (report, alerts) = run_trace(deauth_flood(20, 10), Box::new(BrokenClassifier)).await;

    assert!(alerts.is_empty());
    assert_eq!(report.stats.classifier_errors, 20);
    assert_eq!(report.stats.windows_sealed, 20);
    // Fallback results are Normal/0.0: nothing matched, nothing filtered.
    assert_eq!(*report.filtered.get(AttackType::Deauth), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn quiet_gaps_still_seal_windows() {
    // One second of traffic, four silent seconds, one more second: the
    // silent stretch yields empty windows, not a coverage gap.
    let mut frames = deauth_flood(1, 4);
    for f in deauth_flood(1, 4) {
        frames.push(Frame {
            timestamp: f.timestamp.add_micros(5_000_000),
            ..f
        });
    }
    let (report, _alerts) = run_trace(frames, stub()).await;
    assert_eq!(report.stats.windows_sealed, 6);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn replay_is_idempotent() {
    let (report_a, alerts_a) = run_trace(deauth_flood(40, 12), stub()).await;
    let (report_b, alerts_b) = run_trace(deauth_flood(40, 12), stub()).await;

    assert_eq!(alerts_a, alerts_b);
    assert!(!alerts_a.is_empty());
    assert_eq!(report_a.stats.windows_sealed, report_b.stats.windows_sealed);
    assert_eq!(
        report_a.suppressed.get(AttackType::Deauth),
        report_b.suppressed.get(AttackType::Deauth)
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn late_frames_are_counted_not_fatal() {
    let mut frames = deauth_flood(3, 10);
    // A frame from well before the open window arrives out of order.
    frames.push(Frame {
        timestamp: Timestamp::from_micros(500),
        source_mac: ATTACKER,
        bssid: Some(AP),
        subtype: FrameSubtype::Deauth,
        signal_dbm: None,
    });
    let (report, _alerts) = run_trace(frames, stub()).await;
    assert_eq!(report.stats.late_frames, 1);
}
