//! Request scheduling and connection lifecycle.
//!
//! Architecture:
//! - Request pump thread: waits on the request queue, hands the head
//!   request's encoded line to the outgoing queue (config commands already
//!   queued there drain first)
//! - Outgoing sender thread: waits on the outgoing queue, sleeps the
//!   current message interval, writes one CR-terminated line to the
//!   transport
//! - Notification handling runs on the transport's thread: lines go to the
//!   reassembler, link-status error tokens escalate the interval and retry
//!   the same head request, completed responses rotate the head to the back
//!
//! The link tolerates exactly one in-flight command, so a send is released
//! only by the response to the previous one: the outgoing queue holds its
//! elements quietly and `handle_notification` grants one permit per
//! observed response.

use crate::pid::{MeasuredValue, Pid};
use crate::queue::BlockingQueue;
use crate::reassembly::Reassembler;
use crate::request::{build_requests, Request, MAX_PIDS_PER_REQUEST};
use crate::transport::Transport;
use log::{debug, info, trace, warn};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Adapter configuration sequence sent after every (re)connect: echo off,
/// protocol auto, linefeeds off, headers on. Headers are required so
/// responses carry the channel id the reassembler groups by.
const SETUP_COMMANDS: &[&str] = &["AT E0", "AT SP 0", "AT L0", "AT H1"];

/// Link-layer status tokens that mean "retry later", not payload.
const ERROR_TOKENS: &[&str] = &["NO DATA", "UNABLE TO CONNECT", "ERROR", "STOPPED"];

/// Characters stripped from both ends of a notification (includes the
/// adapter's `>` prompt).
const TRIM_CHARS: [char; 4] = [' ', '\r', '\n', '>'];

/// Multiplier applied to the message interval on a link error.
const BACKOFF_FACTOR: u64 = 5;

/// Pacing and grouping knobs for [`ObdEngine`].
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Most parameters per poll request.
    pub chunk_size: usize,
    /// Cautious pacing right after a connection comes up.
    pub fresh_interval: Duration,
    /// Fast steady-state pacing, restored on every well-formed response.
    pub nominal_interval: Duration,
    /// Backoff ceiling.
    pub max_interval: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            chunk_size: MAX_PIDS_PER_REQUEST,
            fresh_interval: Duration::from_millis(1000),
            nominal_interval: Duration::from_millis(300),
            max_interval: Duration::from_millis(5000),
        }
    }
}

struct Shared {
    transport: Arc<dyn Transport>,
    outgoing: BlockingQueue<String>,
    requests: BlockingQueue<Request>,
    measurements: Arc<BlockingQueue<MeasuredValue>>,
    reassembler: Mutex<Reassembler>,
    interval_ms: AtomicU64,
    config: EngineConfig,
}

/// The OBD-II communication engine.
///
/// Constructed once with the transport handle and the parameter set to
/// monitor; collaborators keep a reference and drive it with the
/// transport's lifecycle events. Decoded values stream out of
/// [`ObdEngine::measurements`].
pub struct ObdEngine {
    shared: Arc<Shared>,
    interested: Vec<Pid>,
    workers: Vec<JoinHandle<()>>,
}

impl ObdEngine {
    /// Create an engine with default pacing and spawn its worker threads.
    #[must_use]
    pub fn new(transport: Arc<dyn Transport>, interested: &[Pid]) -> Self {
        Self::with_config(transport, interested, EngineConfig::default())
    }

    /// Create an engine with explicit pacing configuration.
    #[must_use]
    pub fn with_config(
        transport: Arc<dyn Transport>,
        interested: &[Pid],
        config: EngineConfig,
    ) -> Self {
        let measurements = Arc::new(BlockingQueue::new());
        let shared = Arc::new(Shared {
            transport,
            outgoing: BlockingQueue::new(),
            requests: BlockingQueue::new(),
            measurements: Arc::clone(&measurements),
            reassembler: Mutex::new(Reassembler::new(measurements)),
            interval_ms: AtomicU64::new(interval_millis(config.fresh_interval)),
            config,
        });

        let sender_shared = Arc::clone(&shared);
        let pump_shared = Arc::clone(&shared);
        let workers = vec![
            thread::Builder::new()
                .name("obd-sender".into())
                .spawn(move || sender_task(&sender_shared))
                .expect("failed to spawn sender thread"),
            thread::Builder::new()
                .name("obd-requests".into())
                .spawn(move || request_pump_task(&pump_shared))
                .expect("failed to spawn request pump thread"),
        ];

        Self {
            shared,
            interested: interested.to_vec(),
            workers,
        }
    }

    /// The downstream measurement stream, consumed by the trip collaborator.
    #[must_use]
    pub fn measurements(&self) -> Arc<BlockingQueue<MeasuredValue>> {
        Arc::clone(&self.shared.measurements)
    }

    /// Current pacing delay between physical writes.
    #[must_use]
    pub fn message_interval(&self) -> Duration {
        Duration::from_millis(self.shared.interval_ms.load(Ordering::Relaxed))
    }

    /// The transport link came up: wipe any previous session, send the
    /// adapter configuration sequence, then start polling the monitored
    /// parameters round-robin.
    pub fn on_connected(&self) {
        info!("adapter link up, initializing");
        self.shared.outgoing.clear();
        self.shared.requests.clear();
        self.shared.reassembler.lock().unwrap().reset();
        self.shared.interval_ms.store(
            interval_millis(self.shared.config.fresh_interval),
            Ordering::Relaxed,
        );

        for command in SETUP_COMMANDS {
            self.shared.outgoing.enqueue_paced((*command).to_string());
        }
        for request in build_requests(&self.interested, self.shared.config.chunk_size) {
            self.shared.requests.enqueue_quietly(request);
        }
        // One starting permit: the head request goes out once per observed
        // response cycle from here on.
        self.shared.requests.signal();
    }

    /// The transport link dropped: discard everything in flight. Partial
    /// frames and undelivered requests are never retried across sessions.
    pub fn on_disconnected(&self) {
        info!("adapter link down, discarding in-flight state");
        self.shared.outgoing.clear();
        self.shared.requests.clear();
        self.shared.reassembler.lock().unwrap().reset();
    }

    /// The transport restored a previous session: run the full
    /// initialization again before resuming polling.
    pub fn on_restored(&self) {
        info!("adapter session restored");
        self.on_connected();
    }

    /// Feed one raw transport notification into the engine.
    ///
    /// Called from the transport's notification context; parsing is
    /// synchronous and never blocks on queue capacity.
    pub fn handle_notification(&self, data: &[u8]) {
        let text = String::from_utf8_lossy(data);
        let trimmed = text.trim_matches(TRIM_CHARS.as_slice());

        // Protocol-search chatter is not a response: it must not pace the
        // next send (the real answer is still coming).
        let lines: Vec<&str> = trimmed
            .split(['\r', '\n'])
            .filter(|line| !line.is_empty() && !line.contains("SEARCHING"))
            .collect();
        if data.len() <= 1 || lines.is_empty() {
            trace!("discarding notification {trimmed:?}");
            return;
        }
        debug!("rx {trimmed:?}");

        // One response observed, one send released.
        self.shared.outgoing.signal();

        if lines
            .iter()
            .any(|line| ERROR_TOKENS.iter().any(|token| line.contains(token)))
        {
            self.escalate_backoff(trimmed);
            // Retry the same head request; rotation happens only on data.
            self.shared.requests.signal();
            return;
        }

        // Split on single spaces only: command echoes like "AT E0\r\rOK"
        // stay under three tokens and count as chatter, while any real
        // response line carries at least channel, PCI and one data byte.
        let token_count = lines
            .join("\r")
            .split(' ')
            .filter(|token| !token.is_empty())
            .count();
        if token_count < 3 {
            // Setup acknowledgements and other chatter. The signal above
            // already released the next queued command.
            return;
        }

        self.shared.interval_ms.store(
            interval_millis(self.shared.config.nominal_interval),
            Ordering::Relaxed,
        );

        let mut reassembler = self.shared.reassembler.lock().unwrap();
        for line in lines.iter().filter(|line| line.contains(' ')) {
            reassembler.ingest_line(line);
        }
        let complete = reassembler.can_send_next();
        drop(reassembler);

        if complete {
            self.shared.requests.move_to_back();
            self.shared.requests.signal();
        }
    }

    fn escalate_backoff(&self, token: &str) {
        let current = self.shared.interval_ms.load(Ordering::Relaxed);
        let ceiling = interval_millis(self.shared.config.max_interval);
        let escalated = current.saturating_mul(BACKOFF_FACTOR).min(ceiling);
        self.shared.interval_ms.store(escalated, Ordering::Relaxed);
        warn!("link reported {token:?}, backing off to {escalated}ms");
    }

    /// Stop the worker threads and close all queues. Blocked downstream
    /// consumers wake with `None`.
    pub fn shutdown(self) {
        debug!("engine shutting down");
        self.shared.outgoing.close();
        self.shared.requests.close();
        self.shared.measurements.close();
        for worker in self.workers {
            let _ = worker.join();
        }
    }
}

fn interval_millis(interval: Duration) -> u64 {
    u64::try_from(interval.as_millis()).unwrap_or(u64::MAX)
}

/// Waits for a send permit, paces, writes. Rate limiting happens after the
/// wake, not before, so a backoff change applies to the very next send.
fn sender_task(shared: &Shared) {
    debug!("outgoing sender started");
    loop {
        let Some(line) = shared.outgoing.dequeue() else {
            if shared.outgoing.is_closed() {
                break;
            }
            continue;
        };
        thread::sleep(Duration::from_millis(
            shared.interval_ms.load(Ordering::Relaxed),
        ));
        debug!("tx {line:?}");
        if let Err(e) = shared.transport.write(&format!("{line}\r")) {
            warn!("dropping outgoing line: {e}");
        }
    }
    debug!("outgoing sender stopped");
}

/// Waits on the request rotation and stages the head request's line. The
/// head stays queued so a completed response can rotate it and an error
/// response can retry it in place.
fn request_pump_task(shared: &Shared) {
    debug!("request pump started");
    loop {
        let Some(request) = shared.requests.wait_peek() else {
            if shared.requests.is_closed() {
                break;
            }
            continue;
        };
        shared.outgoing.enqueue_paced(request.encoded().to_string());
    }
    debug!("request pump stopped");
}
