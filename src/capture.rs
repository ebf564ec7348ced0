//! Frame capture boundary.
//!
//! Thin wrapper over pcap: opens a monitor-mode interface (or a recorded
//! capture file), strips the radiotap header down to the signal reading,
//! and reduces each 802.11 header to a [`Frame`]. Raw bytes never cross
//! this boundary.
//!
//! Errors split two ways: failing to open the capture is fatal and surfaced
//! with an actionable message; mid-stream read errors are recoverable — the
//! loop logs, backs off, and keeps the pipeline alive.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender, TrySendError};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::CaptureConfig;
use crate::frame::{Frame, FrameSubtype, MacAddr, Timestamp};
use crate::pipeline::PipelineStats;

/// Link types a monitor-mode capture can hand us.
const DLT_IEEE802_11: i32 = 105;
const DLT_IEEE802_11_RADIO: i32 = 127;

#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("capture interface unavailable: {0}")]
    Open(String),
    #[error("capture link-type {0} is not 802.11 (is the interface in monitor mode?)")]
    LinkType(i32),
    #[error("capture read failed: {0}")]
    Read(String),
}

/// Bounded ingestion queue with drop-oldest overflow.
///
/// The producer side holds a receiver clone (the channel is MPMC), so when
/// the queue is full the oldest unconsumed frame is evicted and counted
/// rather than stalling capture — staying live beats staying complete.
pub struct FrameQueue {
    tx: Sender<Frame>,
    evict_rx: Receiver<Frame>,
    stats: Arc<PipelineStats>,
}

impl FrameQueue {
    /// Create a queue of the given capacity, returning the consumer end.
    pub fn bounded(capacity: usize, stats: Arc<PipelineStats>) -> (Self, Receiver<Frame>) {
        let (tx, rx) = crossbeam_channel::bounded(capacity);
        let queue = Self {
            tx,
            evict_rx: rx.clone(),
            stats,
        };
        (queue, rx)
    }

    pub fn push(&self, frame: Frame) {
        self.stats.record_frame();
        match self.tx.try_send(frame) {
            Ok(()) => {}
            Err(TrySendError::Full(frame)) => {
                if self.evict_rx.try_recv().is_ok() {
                    self.stats.record_drop();
                }
                // A consumer may have drained the queue in between; if it
                // filled again the frame is lost and counted as a drop.
                if self.tx.try_send(frame).is_err() {
                    self.stats.record_drop();
                }
            }
            Err(TrySendError::Disconnected(_)) => {}
        }
    }

    /// Blocking variant for offline replay: applies backpressure instead of
    /// shedding load, so a replayed trace is processed in full.
    pub fn push_blocking(&self, frame: Frame) {
        self.stats.record_frame();
        let _ = self.tx.send(frame);
    }
}

/// Open the configured interface and pump frames until shutdown.
///
/// Returns the capture thread handle; the open itself happens before the
/// thread is spawned so permission and interface errors fail fast.
pub fn spawn_live(
    config: &CaptureConfig,
    queue: FrameQueue,
    shutdown: Arc<AtomicBool>,
) -> Result<thread::JoinHandle<()>, CaptureError> {
    let mut cap = pcap::Capture::from_device(config.interface.as_str())
        .map_err(|e| CaptureError::Open(format!("{}: {}", config.interface, e)))?
        .promisc(config.promiscuous)
        .immediate_mode(config.immediate)
        .buffer_size(config.buffer_size as i32)
        .timeout(100)
        .open()
        .map_err(|e| CaptureError::Open(format!("{}: {}", config.interface, e)))?;

    let has_radiotap = link_layout(&cap)?;
    info!(
        interface = %config.interface,
        radiotap = has_radiotap,
        "capture started"
    );

    let interface = config.interface.clone();
    let handle = thread::spawn(move || {
        while !shutdown.load(Ordering::SeqCst) {
            match cap.next_packet() {
                Ok(packet) => {
                    if queue.stats.capture_down() {
                        info!(interface = %interface, "capture recovered");
                        queue.stats.set_capture_down(false);
                    }
                    let ts = packet_timestamp(packet.header);
                    if let Some(frame) = parse_frame(packet.data, ts, has_radiotap) {
                        queue.push(frame);
                    }
                }
                Err(pcap::Error::TimeoutExpired) => {}
                Err(e) => {
                    // Driver hiccups are recoverable; the pipeline pauses
                    // window sealing until frames flow again.
                    queue.stats.record_capture_error();
                    queue.stats.set_capture_down(true);
                    warn!(interface = %interface, "capture interrupted: {}", e);
                    thread::sleep(Duration::from_millis(250));
                }
            }
        }
        debug!("capture thread stopped");
    });

    Ok(handle)
}

/// Feed a recorded capture file through the queue. Returns the number of
/// frames delivered.
pub fn replay_file<P: AsRef<Path>>(path: P, queue: &FrameQueue) -> Result<u64, CaptureError> {
    let mut cap = pcap::Capture::from_file(path.as_ref())
        .map_err(|e| CaptureError::Open(format!("{}: {}", path.as_ref().display(), e)))?;

    let has_radiotap = link_layout(&cap)?;
    let mut delivered = 0u64;

    loop {
        match cap.next_packet() {
            Ok(packet) => {
                let ts = packet_timestamp(packet.header);
                if let Some(frame) = parse_frame(packet.data, ts, has_radiotap) {
                    queue.push_blocking(frame);
                    delivered += 1;
                }
            }
            Err(pcap::Error::NoMorePackets) => break,
            Err(e) => return Err(CaptureError::Read(e.to_string())),
        }
    }

    Ok(delivered)
}

fn link_layout<T: pcap::Activated + ?Sized>(cap: &pcap::Capture<T>) -> Result<bool, CaptureError> {
    match cap.get_datalink().0 {
        DLT_IEEE802_11_RADIO => Ok(true),
        DLT_IEEE802_11 => Ok(false),
        other => Err(CaptureError::LinkType(other)),
    }
}

fn packet_timestamp(header: &pcap::PacketHeader) -> Timestamp {
    Timestamp::from_micros(header.ts.tv_sec as u64 * 1_000_000 + header.ts.tv_usec as u64)
}

/// Parse one captured packet into a [`Frame`], tolerating truncation.
pub fn parse_frame(data: &[u8], timestamp: Timestamp, has_radiotap: bool) -> Option<Frame> {
    let (signal_dbm, offset) = if has_radiotap {
        parse_radiotap(data)?
    } else {
        (None, 0)
    };
    let dot11 = data.get(offset..)?;
    if dot11.len() < 2 {
        return None;
    }

    let fc0 = dot11[0];
    let fc1 = dot11[1];
    if fc0 & 0x03 != 0 {
        // Only protocol version 0 exists on the air.
        return None;
    }
    let frame_type = (fc0 >> 2) & 0x03;
    let raw_subtype = (fc0 >> 4) & 0x0f;
    let subtype = FrameSubtype::from_fc(frame_type, raw_subtype);

    let source_mac = MacAddr::from_slice(dot11.get(10..16).unwrap_or(&[])).unwrap_or(MacAddr::ZERO);

    let to_ds = fc1 & 0x01 != 0;
    let from_ds = fc1 & 0x02 != 0;
    let bssid = match frame_type {
        // Management: BSSID is address 3.
        0 => MacAddr::from_slice(dot11.get(16..22).unwrap_or(&[])),
        // Data: which address carries the BSSID depends on the DS bits.
        2 => match (to_ds, from_ds) {
            (false, false) => MacAddr::from_slice(dot11.get(16..22).unwrap_or(&[])),
            (true, false) => MacAddr::from_slice(dot11.get(4..10).unwrap_or(&[])),
            (false, true) => MacAddr::from_slice(dot11.get(10..16).unwrap_or(&[])),
            (true, true) => None,
        },
        _ => None,
    };

    Some(Frame {
        timestamp,
        source_mac,
        bssid,
        subtype,
        signal_dbm,
    })
}

/// Minimal radiotap walk: returns the dBm antenna signal (if present) and
/// the offset where the 802.11 header starts.
///
/// Only the fields preceding DBM_ANTSIGNAL in the first present word are
/// walked; everything after is skipped via the declared header length.
/// Field alignment is relative to the start of the radiotap header.
pub fn parse_radiotap(data: &[u8]) -> Option<(Option<i8>, usize)> {
    const TSFT: u32 = 1 << 0;
    const FLAGS: u32 = 1 << 1;
    const RATE: u32 = 1 << 2;
    const CHANNEL: u32 = 1 << 3;
    const FHSS: u32 = 1 << 4;
    const DBM_ANTSIGNAL: u32 = 1 << 5;
    const EXT: u32 = 1 << 31;

    if data.len() < 8 || data[0] != 0 {
        return None;
    }
    let length = u16::from_le_bytes([data[2], data[3]]) as usize;
    if length < 8 || data.len() < length {
        return None;
    }

    let present = u32::from_le_bytes([data[4], data[5], data[6], data[7]]);

    // Chained present words (EXT bit) push the field area back.
    let mut pos = 8usize;
    let mut last = present;
    while last & EXT != 0 {
        let word = data.get(pos..pos + 4)?;
        last = u32::from_le_bytes([word[0], word[1], word[2], word[3]]);
        pos += 4;
    }

    fn align_to(pos: usize, align: usize) -> usize {
        if pos % align != 0 {
            pos + (align - pos % align)
        } else {
            pos
        }
    }

    if present & TSFT != 0 {
        pos = align_to(pos, 8) + 8;
    }
    if present & FLAGS != 0 {
        pos += 1;
    }
    if present & RATE != 0 {
        pos += 1;
    }
    if present & CHANNEL != 0 {
        pos = align_to(pos, 2) + 4;
    }
    if present & FHSS != 0 {
        pos = align_to(pos, 2) + 2;
    }

    let signal = if present & DBM_ANTSIGNAL != 0 && pos < length {
        Some(data[pos] as i8)
    } else {
        None
    };

    Some((signal, length))
}
