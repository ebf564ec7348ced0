//! Detection pipeline
//!
//! Wires the components into concurrent tasks joined by bounded queues:
//!
//! capture thread -> frame queue (drop-oldest) -> aggregate/classify loop
//! -> per-tracker queues -> tracker tasks -> alert queue -> sink task.
//!
//! Windows are sealed and dispatched strictly in start order, and a
//! window's classification reaches every tracker before the next window is
//! sealed. Shutdown is cooperative: the in-flight window is sealed and
//! classified best effort, then the channels close in order so every task
//! drains. No window is classified twice.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use crossbeam_channel::{Receiver, RecvTimeoutError};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::alert::{Alert, AlertSink};
use crate::classify::{Classification, Classifier};
use crate::config::{Config, Thresholds};
use crate::features::{FeatureWindow, WindowAggregator};
use crate::frame::{AttackType, Frame, PerAttack, Timestamp};
use crate::tracker::AttackTracker;

/// Pipeline-wide diagnostic counters.
///
/// Shared across the capture thread, the pipeline loop, and the tracker
/// tasks; all updates are relaxed since these are only read for reporting.
#[derive(Debug, Default)]
pub struct PipelineStats {
    frames_captured: AtomicU64,
    frames_dropped: AtomicU64,
    late_frames: AtomicU64,
    windows_sealed: AtomicU64,
    classifier_errors: AtomicU64,
    alerts_emitted: AtomicU64,
    capture_errors: AtomicU64,
    capture_down: AtomicBool,
}

/// Plain-value snapshot of [`PipelineStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub frames_captured: u64,
    pub frames_dropped: u64,
    pub late_frames: u64,
    pub windows_sealed: u64,
    pub classifier_errors: u64,
    pub alerts_emitted: u64,
    pub capture_errors: u64,
}

impl PipelineStats {
    pub fn record_frame(&self) {
        self.frames_captured.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_drop(&self) {
        self.frames_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_capture_error(&self) {
        self.capture_errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Capture health, reported by the capture thread. While the interface
    /// is erroring the pipeline stops advancing stream time on its own, so
    /// no windows are fabricated blind; sealing resumes with the frames
    /// that arrive once capture recovers.
    pub fn set_capture_down(&self, down: bool) {
        self.capture_down.store(down, Ordering::Relaxed);
    }

    pub fn capture_down(&self) -> bool {
        self.capture_down.load(Ordering::Relaxed)
    }

    fn record_window(&self) {
        self.windows_sealed.fetch_add(1, Ordering::Relaxed);
    }

    fn record_classifier_error(&self) {
        self.classifier_errors.fetch_add(1, Ordering::Relaxed);
    }

    fn record_alert(&self) {
        self.alerts_emitted.fetch_add(1, Ordering::Relaxed);
    }

    fn set_late_frames(&self, count: u64) {
        self.late_frames.store(count, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            frames_captured: self.frames_captured.load(Ordering::Relaxed),
            frames_dropped: self.frames_dropped.load(Ordering::Relaxed),
            late_frames: self.late_frames.load(Ordering::Relaxed),
            windows_sealed: self.windows_sealed.load(Ordering::Relaxed),
            classifier_errors: self.classifier_errors.load(Ordering::Relaxed),
            alerts_emitted: self.alerts_emitted.load(Ordering::Relaxed),
            capture_errors: self.capture_errors.load(Ordering::Relaxed),
        }
    }

    pub fn log_summary(&self) {
        let s = self.snapshot();
        info!(
            frames = s.frames_captured,
            dropped = s.frames_dropped,
            late = s.late_frames,
            windows = s.windows_sealed,
            classifier_errors = s.classifier_errors,
            alerts = s.alerts_emitted,
            capture_errors = s.capture_errors,
            "pipeline counters"
        );
    }
}

/// One sealed window and its classification, fanned out to every tracker.
#[derive(Debug, Clone)]
struct WindowVerdict {
    window: Arc<FeatureWindow>,
    result: Classification,
}

/// Final accounting returned when the pipeline stops.
#[derive(Debug, Clone, Default)]
pub struct PipelineReport {
    pub stats: StatsSnapshot,
    pub alerts_per_attack: PerAttack<u64>,
    /// Matching results that failed the alert criteria (step-5 filtering).
    pub filtered: PerAttack<u64>,
    /// Matching results swallowed by cooldowns, lifetime total.
    pub suppressed: PerAttack<u64>,
}

/// The detection pipeline. Consumes a frame stream, produces alerts.
pub struct Pipeline {
    config: Config,
    classifier: Box<dyn Classifier>,
    stats: Arc<PipelineStats>,
}

impl Pipeline {
    pub fn new(config: Config, classifier: Box<dyn Classifier>) -> Self {
        Self {
            config,
            classifier,
            stats: Arc::new(PipelineStats::default()),
        }
    }

    /// Shared counters, for wiring the capture side and for observers.
    pub fn stats(&self) -> Arc<PipelineStats> {
        Arc::clone(&self.stats)
    }

    /// Run until the frame channel closes or a shutdown signal arrives.
    ///
    /// Returns the final report together with the sink, so callers keep
    /// access to whatever the sink accumulated.
    pub async fn run<S: AlertSink + 'static>(
        self,
        frame_rx: Receiver<Frame>,
        sink: S,
        mut shutdown_rx: mpsc::Receiver<()>,
    ) -> Result<(PipelineReport, S)> {
        let (alert_tx, mut alert_rx) = mpsc::channel::<Alert>(256);

        // Delivery happens off the tracker tasks so a slow sink can never
        // block detection.
        let sink_handle: JoinHandle<S> = tokio::spawn(async move {
            let mut sink = sink;
            while let Some(alert) = alert_rx.recv().await {
                sink.deliver(&alert);
            }
            sink
        });

        let mut tracker_txs = Vec::with_capacity(AttackType::ALL.len());
        let mut tracker_handles = Vec::with_capacity(AttackType::ALL.len());
        for attack in AttackType::ALL {
            let (tx, rx) = mpsc::channel::<WindowVerdict>(64);
            tracker_txs.push(tx);
            tracker_handles.push(spawn_tracker(
                attack,
                *self.config.thresholds.get(attack),
                self.config.detection.lookback,
                rx,
                alert_tx.clone(),
                Arc::clone(&self.stats),
            ));
        }
        drop(alert_tx);

        let window_micros = self.config.detection.window_ms * 1000;
        let mut aggregator = WindowAggregator::new(window_micros);

        // Maps stream time to the wall clock once the first frame arrives,
        // so quiet air still seals (empty) windows at the right cadence.
        let mut origin: Option<(Timestamp, Instant)> = None;

        let stats_interval =
            Duration::from_secs(self.config.general.stats_interval_secs.max(1));
        let mut last_stats = Instant::now();

        info!(
            window_ms = self.config.detection.window_ms,
            "detection pipeline started"
        );

        loop {
            if shutdown_rx.try_recv().is_ok() {
                info!("shutdown signal received");
                break;
            }

            match frame_rx.recv_timeout(Duration::from_millis(100)) {
                Ok(frame) => {
                    if origin.is_none() {
                        origin = Some((frame.timestamp, Instant::now()));
                    }
                    let sealed = aggregator.ingest(&frame);
                    self.dispatch(sealed, &tracker_txs).await;
                }
                Err(RecvTimeoutError::Timeout) => {
                    // While capture is erroring, don't fabricate windows
                    // from the wall clock; sealing resumes with real frames.
                    if !self.stats.capture_down() {
                        if let Some((first_ts, first_wall)) = origin {
                            let now =
                                first_ts.add_micros(first_wall.elapsed().as_micros() as u64);
                            let sealed = aggregator.tick(now);
                            self.dispatch(sealed, &tracker_txs).await;
                        }
                    }
                }
                Err(RecvTimeoutError::Disconnected) => {
                    debug!("frame channel closed, stopping pipeline");
                    break;
                }
            }

            self.stats.set_late_frames(aggregator.late_frames());
            if last_stats.elapsed() >= stats_interval {
                self.stats.log_summary();
                last_stats = Instant::now();
            }
        }

        // Seal and classify the in-flight window before teardown.
        if let Some(window) = aggregator.flush() {
            self.dispatch(vec![window], &tracker_txs).await;
        }
        self.stats.set_late_frames(aggregator.late_frames());

        drop(tracker_txs);
        let mut report = PipelineReport::default();
        for handle in tracker_handles {
            let tracker = handle.await?;
            let attack = tracker.attack();
            *report.alerts_per_attack.get_mut(attack) = tracker.alerts_emitted();
            *report.filtered.get_mut(attack) = tracker.filtered();
            *report.suppressed.get_mut(attack) = tracker.suppressed_total();
        }

        let sink = sink_handle.await?;
        report.stats = self.stats.snapshot();
        info!("detection pipeline stopped");
        Ok((report, sink))
    }

    /// Classify sealed windows in order and hand each verdict to every
    /// tracker before moving on to the next window.
    async fn dispatch(
        &self,
        sealed: Vec<FeatureWindow>,
        tracker_txs: &[mpsc::Sender<WindowVerdict>],
    ) {
        for window in sealed {
            self.stats.record_window();

            let result = match self.classifier.classify(&window) {
                Ok(result) => result,
                Err(e) => {
                    // Fail safe: a broken classifier must look like quiet
                    // air, not like an attack or a crash.
                    self.stats.record_classifier_error();
                    debug!("classifier error, substituting normal: {}", e);
                    Classification::NORMAL_FALLBACK
                }
            };

            let verdict = WindowVerdict {
                window: Arc::new(window),
                result,
            };
            for tx in tracker_txs {
                if tx.send(verdict.clone()).await.is_err() {
                    return;
                }
            }
        }
    }
}

fn spawn_tracker(
    attack: AttackType,
    thresholds: Thresholds,
    lookback: u32,
    mut rx: mpsc::Receiver<WindowVerdict>,
    alert_tx: mpsc::Sender<Alert>,
    stats: Arc<PipelineStats>,
) -> JoinHandle<AttackTracker> {
    tokio::spawn(async move {
        let mut tracker = AttackTracker::new(attack, thresholds, lookback);
        while let Some(verdict) = rx.recv().await {
            if verdict.result.label.attack_type() != Some(attack) {
                continue;
            }
            if let Some(alert) = tracker.observe(&verdict.result, &verdict.window) {
                stats.record_alert();
                if alert_tx.try_send(alert).is_err() {
                    warn!(attack = %attack, "alert queue saturated, alert not delivered");
                }
            }
        }
        info!(
            attack = %attack,
            alerts = tracker.alerts_emitted(),
            filtered = tracker.filtered(),
            suppressed = tracker.suppressed_total(),
            "tracker stopped"
        );
        tracker
    })
}
