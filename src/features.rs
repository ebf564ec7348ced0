//! Windowed Feature Aggregation
//!
//! Reduces the unbounded frame stream to a bounded sequence of fixed-duration
//! feature windows. Windows are aligned to multiples of the configured
//! duration, sealed exactly once, and emitted in strictly increasing start
//! order. Quiet intervals still produce (zero-valued) windows so the
//! classifier sees the absence of traffic too.

use std::collections::{HashMap, HashSet};

use crate::frame::{AttackType, Frame, FrameSubtype, MacAddr, PerAttack, Timestamp};

/// Features computed over one sealed window.
///
/// Invariant: `end - start` equals the configured window duration, and the
/// per-subtype counts sum to `frame_count`.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureWindow {
    pub start: Timestamp,
    pub end: Timestamp,
    pub frame_count: u64,
    pub deauth_count: u64,
    pub beacon_count: u64,
    pub probe_response_count: u64,
    pub other_mgmt_count: u64,
    pub data_count: u64,
    pub control_count: u64,
    pub unique_bssid_count: u64,
    pub unique_source_mac_count: u64,
    /// Deauth frames per second of wall-clock window time.
    pub deauth_rate: f64,
    pub avg_signal_dbm: Option<f64>,
    /// Most frequent valid source MAC among each attack's suspicious
    /// subtypes, ties broken by MAC ordering.
    pub dominant_sources: PerAttack<Option<MacAddr>>,
}

impl FeatureWindow {
    pub fn duration_secs(&self) -> f64 {
        self.end.secs_since(self.start)
    }

    /// Frames relevant to an attack class within this window.
    ///
    /// Rogue-AP activity shows up as beacons and probe responses
    /// advertising the impersonated network, so both count toward it.
    pub fn relevant_frames(&self, attack: AttackType) -> u64 {
        match attack {
            AttackType::Deauth => self.deauth_count,
            AttackType::BeaconFlood => self.beacon_count,
            AttackType::RogueAp => self.beacon_count + self.probe_response_count,
        }
    }

    /// Attack-relevant frames per second of wall-clock window time.
    pub fn attack_rate(&self, attack: AttackType) -> f64 {
        let secs = self.duration_secs();
        if secs <= 0.0 {
            return 0.0;
        }
        self.relevant_frames(attack) as f64 / secs
    }
}

/// In-flight window accumulator. Sealed into a `FeatureWindow` exactly once.
#[derive(Debug)]
struct WindowBuilder {
    start: Timestamp,
    end: Timestamp,
    frame_count: u64,
    deauth_count: u64,
    beacon_count: u64,
    probe_response_count: u64,
    other_mgmt_count: u64,
    data_count: u64,
    control_count: u64,
    bssids: HashSet<MacAddr>,
    sources: HashSet<MacAddr>,
    signal_sum: i64,
    signal_samples: u64,
    deauth_sources: HashMap<MacAddr, u64>,
    beacon_sources: HashMap<MacAddr, u64>,
    probe_sources: HashMap<MacAddr, u64>,
}

impl WindowBuilder {
    fn new(start: Timestamp, duration_micros: u64) -> Self {
        Self {
            start,
            end: start.add_micros(duration_micros),
            frame_count: 0,
            deauth_count: 0,
            beacon_count: 0,
            probe_response_count: 0,
            other_mgmt_count: 0,
            data_count: 0,
            control_count: 0,
            bssids: HashSet::new(),
            sources: HashSet::new(),
            signal_sum: 0,
            signal_samples: 0,
            deauth_sources: HashMap::new(),
            beacon_sources: HashMap::new(),
            probe_sources: HashMap::new(),
        }
    }

    fn add(&mut self, frame: &Frame) {
        self.frame_count += 1;
        self.sources.insert(frame.source_mac);
        if let Some(bssid) = frame.bssid {
            self.bssids.insert(bssid);
        }
        if let Some(dbm) = frame.signal_dbm {
            self.signal_sum += dbm as i64;
            self.signal_samples += 1;
        }

        let suspicious_tally = match frame.subtype {
            FrameSubtype::Deauth => {
                self.deauth_count += 1;
                Some(&mut self.deauth_sources)
            }
            FrameSubtype::Beacon => {
                self.beacon_count += 1;
                Some(&mut self.beacon_sources)
            }
            FrameSubtype::ProbeResponse => {
                self.probe_response_count += 1;
                Some(&mut self.probe_sources)
            }
            FrameSubtype::OtherManagement => {
                self.other_mgmt_count += 1;
                None
            }
            FrameSubtype::Data => {
                self.data_count += 1;
                None
            }
            FrameSubtype::Control => {
                self.control_count += 1;
                None
            }
        };

        if let Some(tally) = suspicious_tally {
            if frame.source_mac.is_valid_source() {
                *tally.entry(frame.source_mac).or_insert(0) += 1;
            }
        }
    }

    fn seal(self) -> FeatureWindow {
        let duration_secs = self.end.secs_since(self.start);
        let deauth_rate = if duration_secs > 0.0 {
            self.deauth_count as f64 / duration_secs
        } else {
            0.0
        };

        let avg_signal_dbm = if self.signal_samples > 0 {
            Some(self.signal_sum as f64 / self.signal_samples as f64)
        } else {
            None
        };

        // Rogue-AP candidates span beacons and probe responses.
        let mut rogue_sources = self.beacon_sources.clone();
        for (mac, count) in &self.probe_sources {
            *rogue_sources.entry(*mac).or_insert(0) += count;
        }

        FeatureWindow {
            start: self.start,
            end: self.end,
            frame_count: self.frame_count,
            deauth_count: self.deauth_count,
            beacon_count: self.beacon_count,
            probe_response_count: self.probe_response_count,
            other_mgmt_count: self.other_mgmt_count,
            data_count: self.data_count,
            control_count: self.control_count,
            unique_bssid_count: self.bssids.len() as u64,
            unique_source_mac_count: self.sources.len() as u64,
            deauth_rate,
            avg_signal_dbm,
            dominant_sources: PerAttack {
                deauth: mode(&self.deauth_sources),
                beacon_flood: mode(&self.beacon_sources),
                rogue_ap: mode(&rogue_sources),
            },
        }
    }
}

/// Mode of a MAC tally; ties broken by MAC ordering so sealing is
/// deterministic regardless of hash iteration order.
fn mode(tally: &HashMap<MacAddr, u64>) -> Option<MacAddr> {
    tally
        .iter()
        .max_by(|(mac_a, n_a), (mac_b, n_b)| n_a.cmp(n_b).then(mac_b.cmp(mac_a)))
        .map(|(mac, _)| *mac)
}

/// Buckets frames into aligned fixed-duration windows.
#[derive(Debug)]
pub struct WindowAggregator {
    duration_micros: u64,
    current: Option<WindowBuilder>,
    late_frames: u64,
}

impl WindowAggregator {
    pub fn new(duration_micros: u64) -> Self {
        assert!(duration_micros > 0, "window duration must be non-zero");
        Self {
            duration_micros,
            current: None,
            late_frames: 0,
        }
    }

    /// Frames dropped for arriving older than the open window.
    pub fn late_frames(&self) -> u64 {
        self.late_frames
    }

    fn aligned_start(&self, ts: Timestamp) -> Timestamp {
        Timestamp::from_micros(ts.micros() - ts.micros() % self.duration_micros)
    }

    /// Seal every window ending at or before `until`, opening the next one
    /// each time so coverage has no gaps. Empty windows are emitted too.
    fn seal_until(&mut self, until: Timestamp) -> Vec<FeatureWindow> {
        let mut sealed = Vec::new();
        loop {
            let next_start = match &self.current {
                Some(builder) if until >= builder.end => builder.end,
                _ => break,
            };
            let finished = self.current.take().expect("window present");
            sealed.push(finished.seal());
            self.current = Some(WindowBuilder::new(next_start, self.duration_micros));
        }
        sealed
    }

    /// Bucket one frame, returning any windows sealed by its arrival.
    ///
    /// A frame older than the open window's start is dropped and counted;
    /// it never reopens a sealed window.
    pub fn ingest(&mut self, frame: &Frame) -> Vec<FeatureWindow> {
        if self.current.is_none() {
            let start = self.aligned_start(frame.timestamp);
            self.current = Some(WindowBuilder::new(start, self.duration_micros));
        }

        if frame.timestamp < self.current.as_ref().expect("window open").start {
            self.late_frames += 1;
            return Vec::new();
        }

        let sealed = self.seal_until(frame.timestamp);
        self.current
            .as_mut()
            .expect("window open after sealing")
            .add(frame);
        sealed
    }

    /// Advance stream time, sealing any windows whose range has elapsed.
    ///
    /// Opens the first window if none exists yet, so a silent interface
    /// still produces a steady stream of empty windows.
    pub fn tick(&mut self, now: Timestamp) -> Vec<FeatureWindow> {
        if self.current.is_none() {
            let start = self.aligned_start(now);
            self.current = Some(WindowBuilder::new(start, self.duration_micros));
        }
        self.seal_until(now)
    }

    /// Seal the in-flight window early (shutdown path). The returned window
    /// keeps its nominal `end` so the duration invariant holds.
    pub fn flush(&mut self) -> Option<FeatureWindow> {
        self.current.take().map(WindowBuilder::seal)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(ts_micros: u64, src: [u8; 6], subtype: FrameSubtype) -> Frame {
        Frame {
            timestamp: Timestamp::from_micros(ts_micros),
            source_mac: MacAddr::new(src),
            bssid: Some(MacAddr::new([0xaa, 0xbb, 0xcc, 0, 0, 1])),
            subtype,
            signal_dbm: Some(-60),
        }
    }

    const SRC_A: [u8; 6] = [0x02, 0, 0, 0, 0, 0xaa];
    const SRC_B: [u8; 6] = [0x02, 0, 0, 0, 0, 0xbb];

    #[test]
    fn test_counts_sum_to_frame_count() {
        let mut agg = WindowAggregator::new(1_000_000);
        for i in 0..10 {
            let sub = match i % 4 {
                0 => FrameSubtype::Deauth,
                1 => FrameSubtype::Beacon,
                2 => FrameSubtype::Data,
                _ => FrameSubtype::Control,
            };
            assert!(agg.ingest(&frame(i * 1000, SRC_A, sub)).is_empty());
        }
        let sealed = agg.tick(Timestamp::from_secs(1));
        assert_eq!(sealed.len(), 1);
        let w = &sealed[0];
        assert_eq!(w.frame_count, 10);
        assert_eq!(
            w.deauth_count
                + w.beacon_count
                + w.probe_response_count
                + w.other_mgmt_count
                + w.data_count
                + w.control_count,
            w.frame_count
        );
        assert_eq!(w.unique_source_mac_count, 1);
        assert_eq!(w.unique_bssid_count, 1);
    }

    #[test]
    fn test_window_alignment_and_duration() {
        let mut agg = WindowAggregator::new(1_000_000);
        // First frame mid-window: window aligns down to 3s.
        agg.ingest(&frame(3_400_000, SRC_A, FrameSubtype::Data));
        let sealed = agg.ingest(&frame(4_100_000, SRC_A, FrameSubtype::Data));
        assert_eq!(sealed.len(), 1);
        assert_eq!(sealed[0].start, Timestamp::from_secs(3));
        assert_eq!(sealed[0].end, Timestamp::from_secs(4));
    }

    #[test]
    fn test_empty_windows_emitted_without_gaps() {
        let mut agg = WindowAggregator::new(1_000_000);
        agg.ingest(&frame(0, SRC_A, FrameSubtype::Beacon));
        // Next frame three windows later: two empty windows in between.
        let sealed = agg.ingest(&frame(3_200_000, SRC_A, FrameSubtype::Beacon));
        assert_eq!(sealed.len(), 3);
        assert_eq!(sealed[0].frame_count, 1);
        assert_eq!(sealed[1].frame_count, 0);
        assert_eq!(sealed[2].frame_count, 0);
        // Strictly increasing, contiguous coverage.
        for pair in sealed.windows(2) {
            assert_eq!(pair[0].end, pair[1].start);
            assert!(pair[0].start < pair[1].start);
        }
    }

    #[test]
    fn test_late_frame_dropped_and_counted() {
        let mut agg = WindowAggregator::new(1_000_000);
        agg.ingest(&frame(5_000_000, SRC_A, FrameSubtype::Data));
        let sealed = agg.ingest(&frame(4_900_000, SRC_A, FrameSubtype::Data));
        assert!(sealed.is_empty());
        assert_eq!(agg.late_frames(), 1);
        // The late frame did not land in the open window.
        let w = agg.flush().unwrap();
        assert_eq!(w.frame_count, 1);
    }

    #[test]
    fn test_deauth_rate_uses_wall_clock_duration() {
        let mut agg = WindowAggregator::new(2_000_000);
        for i in 0..10 {
            agg.ingest(&frame(i * 1000, SRC_A, FrameSubtype::Deauth));
        }
        let w = agg.tick(Timestamp::from_secs(2)).remove(0);
        // 10 deauths over a 2s window = 5/s, regardless of burstiness.
        assert!((w.deauth_rate - 5.0).abs() < 1e-9);
        assert!((w.attack_rate(AttackType::Deauth) - 5.0).abs() < 1e-9);
    }

    #[test]
    fn test_dominant_source_is_mode_of_suspicious_frames() {
        let mut agg = WindowAggregator::new(1_000_000);
        agg.ingest(&frame(0, SRC_A, FrameSubtype::Deauth));
        agg.ingest(&frame(1000, SRC_B, FrameSubtype::Deauth));
        agg.ingest(&frame(2000, SRC_B, FrameSubtype::Deauth));
        // Data frames from A don't count toward dominance.
        agg.ingest(&frame(3000, SRC_A, FrameSubtype::Data));
        agg.ingest(&frame(4000, SRC_A, FrameSubtype::Data));
        let w = agg.tick(Timestamp::from_secs(1)).remove(0);
        assert_eq!(
            *w.dominant_sources.get(AttackType::Deauth),
            Some(MacAddr::new(SRC_B))
        );
        assert_eq!(*w.dominant_sources.get(AttackType::BeaconFlood), None);
    }

    #[test]
    fn test_invalid_source_never_dominant() {
        let mut agg = WindowAggregator::new(1_000_000);
        for i in 0..5 {
            agg.ingest(&frame(i * 1000, [0xff; 6], FrameSubtype::Deauth));
        }
        agg.ingest(&frame(6000, SRC_A, FrameSubtype::Deauth));
        let w = agg.tick(Timestamp::from_secs(1)).remove(0);
        assert_eq!(
            *w.dominant_sources.get(AttackType::Deauth),
            Some(MacAddr::new(SRC_A))
        );
    }

    #[test]
    fn test_rogue_rate_spans_beacons_and_probe_responses() {
        let mut agg = WindowAggregator::new(1_000_000);
        for i in 0..4 {
            agg.ingest(&frame(i * 1000, SRC_A, FrameSubtype::Beacon));
        }
        for i in 4..10 {
            agg.ingest(&frame(i * 1000, SRC_A, FrameSubtype::ProbeResponse));
        }
        let w = agg.tick(Timestamp::from_secs(1)).remove(0);
        assert_eq!(w.relevant_frames(AttackType::RogueAp), 10);
        assert!((w.attack_rate(AttackType::RogueAp) - 10.0).abs() < 1e-9);
        assert_eq!(w.relevant_frames(AttackType::BeaconFlood), 4);
    }

    #[test]
    fn test_tick_before_any_frame_opens_coverage() {
        let mut agg = WindowAggregator::new(1_000_000);
        assert!(agg.tick(Timestamp::from_micros(500_000)).is_empty());
        let sealed = agg.tick(Timestamp::from_secs(2));
        assert_eq!(sealed.len(), 2);
        assert_eq!(sealed[0].start, Timestamp::from_secs(0));
        assert_eq!(sealed[0].frame_count, 0);
    }
}
