//! ISO-TP-style frame reassembly and payload decoding.
//!
//! Responses arrive as whitespace-separated hex byte lines, one per CAN
//! frame, possibly split across a first frame (carrying the total length)
//! and continuation frames (carrying a cyclic index). Frames are grouped by
//! responding channel id so concurrent multi-frame responses from several
//! ECUs stay separate. A completed payload is decoded identifier-by-
//! identifier via the [`pid`](crate::pid) registry and the results are
//! emitted into the downstream measurement queue.

use crate::buffer::ByteBuffer;
use crate::pid::{self, MeasuredValue};
use crate::queue::BlockingQueue;
use log::{debug, trace};
use smallvec::SmallVec;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

/// Payload bytes of a single frame (a CAN frame carries at most 8).
type FramePayload = SmallVec<[u8; 8]>;

/// Length sentinel before the declaring first frame has been seen. A
/// continuation that arrives first accumulates under this and can never
/// complete; the next first frame for the channel supersedes it.
const LENGTH_UNKNOWN: usize = usize::MAX;

/// Fragments of one in-flight response on a single channel.
///
/// `accumulated` is always the sum of the stored fragment lengths; the
/// response is complete once it reaches the declared total.
#[derive(Debug)]
struct FrameAccumulator {
    declared_len: usize,
    frames: BTreeMap<u8, FramePayload>,
    accumulated: usize,
}

impl FrameAccumulator {
    fn new() -> Self {
        Self {
            declared_len: LENGTH_UNKNOWN,
            frames: BTreeMap::new(),
            accumulated: 0,
        }
    }

    fn insert(&mut self, frame_index: u8, bytes: FramePayload) {
        self.accumulated += bytes.len();
        if let Some(replaced) = self.frames.insert(frame_index, bytes) {
            self.accumulated -= replaced.len();
        }
    }

    fn is_complete(&self) -> bool {
        self.accumulated >= self.declared_len
    }

    /// Concatenate fragments in ascending frame-index order.
    fn combine(self) -> Vec<u8> {
        self.frames.into_values().flatten().collect()
    }
}

/// Per-channel frame reassembler and payload decoder.
pub struct Reassembler {
    accumulators: HashMap<u32, FrameAccumulator>,
    buffer: ByteBuffer,
    measurements: Arc<BlockingQueue<MeasuredValue>>,
}

impl Reassembler {
    /// Create a reassembler emitting into `measurements`.
    #[must_use]
    pub fn new(measurements: Arc<BlockingQueue<MeasuredValue>>) -> Self {
        Self {
            accumulators: HashMap::new(),
            buffer: ByteBuffer::new(),
            measurements,
        }
    }

    /// Whether every channel has completed (no outstanding fragments).
    /// Gates the scheduler's advance to the next request.
    #[must_use]
    pub fn can_send_next(&self) -> bool {
        self.accumulators.is_empty()
    }

    /// Discard all in-flight fragments. Used on disconnect and on
    /// protocol-error recovery so one session's data never bleeds into the
    /// next.
    pub fn reset(&mut self) {
        self.accumulators.clear();
    }

    /// Ingest one decoded response line.
    ///
    /// Lines with fewer than three hex tokens are too short to be a real
    /// response and are ignored without touching accumulator state.
    pub fn ingest_line(&mut self, line: &str) {
        let tokens: Vec<u32> = line
            .split_whitespace()
            .filter_map(|token| u32::from_str_radix(token, 16).ok())
            .collect();
        if tokens.len() < 3 {
            trace!("ignoring short line: {line:?}");
            return;
        }

        let channel = tokens[0];
        let pci = tokens[1];
        let is_multi_frame = (pci >> 4) > 0;
        let is_first_frame = !is_multi_frame || pci == 0x10;
        let frame_index = if is_multi_frame { (pci & 0x0F) as u8 } else { 0 };

        // Header layout: single frame = channel + length, multi-frame first
        // = channel + PCI + length, continuation = channel + PCI.
        let header_len = if is_first_frame {
            if is_multi_frame {
                4
            } else {
                3
            }
        } else {
            2
        };
        let payload: FramePayload = tokens
            .get(header_len..)
            .unwrap_or(&[])
            .iter()
            .map(|&byte| byte as u8)
            .collect();

        if is_first_frame {
            // A first frame declares a new response, superseding any stale
            // fragments left on this channel.
            let mut fresh = FrameAccumulator::new();
            let length_token = tokens[if is_multi_frame { 2 } else { 1 }] as usize;
            // The length field counts the response-service echo byte, which
            // the header strip already consumed.
            fresh.declared_len = length_token.saturating_sub(1);
            self.accumulators.insert(channel, fresh);
        }
        let accumulator = self
            .accumulators
            .entry(channel)
            .or_insert_with(FrameAccumulator::new);

        accumulator.insert(frame_index, payload);
        trace!(
            "channel {channel:03X}: frame {frame_index}, {}/{} bytes",
            accumulator.accumulated,
            accumulator.declared_len
        );

        if accumulator.is_complete() {
            if let Some(complete) = self.accumulators.remove(&channel) {
                debug!("channel {channel:03X}: response complete");
                self.decode_payload(complete.combine());
            }
        }
    }

    /// Walk a combined payload, emitting one measurement per recognized
    /// identifier. Stops cleanly at the first unrecognized identifier (its
    /// byte width is unknown) or when too few bytes remain.
    fn decode_payload(&mut self, data: Vec<u8>) {
        self.buffer.set_data(data);
        while self.buffer.has_next() {
            let id = self.buffer.read_n_bytes(1)[0];
            let Some(spec) = pid::lookup(id) else {
                debug!("stopping decode at unrecognized identifier {id:#04X}");
                break;
            };
            if self.buffer.remaining() < spec.data_len {
                debug!("truncated payload for identifier {id:#04X}");
                break;
            }
            let measured = spec.decode(self.buffer.read_n_bytes(spec.data_len));
            debug!("decoded {measured}");
            self.measurements.enqueue(measured);
        }
    }
}
