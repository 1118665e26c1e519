//! OBD-II communication engine for the triplog trip logger.
//!
//! This library turns the half-duplex, line-oriented ELM327 text protocol
//! running over an unreliable link into a stream of typed physical
//! measurements. It multiplexes several logical requests over one
//! request/response channel that permits a single outstanding command,
//! reassembles multi-frame CAN responses, adapts pacing to link quality,
//! and decodes binary payloads into physically meaningful values.
//!
//! Architecture:
//! - [`ObdEngine`] owns the request rotation, the paced outgoing sender,
//!   and the connection lifecycle
//! - [`Reassembler`] accumulates possibly-fragmented frames per channel id
//!   and decodes completed payloads via the [`pid`] registry
//! - [`BlockingQueue`] is the backbone of every producer/consumer edge
//! - The physical link (BLE, TCP, ...) stays outside the crate behind the
//!   [`Transport`] trait; measurements leave through [`ObdEngine::measurements`]

pub mod buffer;
pub mod engine;
pub mod pid;
pub mod queue;
pub mod reassembly;
pub mod request;
pub mod transport;

pub use buffer::ByteBuffer;
pub use engine::{EngineConfig, ObdEngine};
pub use pid::{MeasuredValue, Pid, PidSpec, ALL_PIDS};
pub use queue::BlockingQueue;
pub use reassembly::Reassembler;
pub use request::{build_requests, Request, MAX_PIDS_PER_REQUEST, SERVICE_CURRENT_DATA};
pub use transport::{Transport, TransportError};
