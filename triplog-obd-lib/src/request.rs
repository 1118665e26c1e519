//! Request construction: parameter groups encoded as service-01 command lines.

use crate::pid::Pid;
use std::fmt::Write as _;

/// Service id for "show current data".
pub const SERVICE_CURRENT_DATA: &str = "01";

/// Most parameters one request line may carry.
pub const MAX_PIDS_PER_REQUEST: usize = 3;

/// One encoded poll request for a group of parameters.
///
/// Immutable once constructed. Equality is defined by the encoded line, so
/// a request rebuilt for the same parameter group compares equal; queue
/// de-duplication and retry matching rely on this.
#[derive(Debug, Clone)]
pub struct Request {
    sid: String,
    pids: Vec<Pid>,
    encoded: String,
}

impl Request {
    /// Build a request for `pids` under service `sid`.
    ///
    /// The encoded line is `"<sid> "` followed by each parameter id as two
    /// uppercase hex digits.
    #[must_use]
    pub fn new(sid: &str, pids: &[Pid]) -> Self {
        let mut encoded = String::with_capacity(sid.len() + 1 + pids.len() * 2);
        encoded.push_str(sid);
        encoded.push(' ');
        for pid in pids {
            write!(encoded, "{:02X}", pid.id()).expect("writing to a String cannot fail");
        }
        Self {
            sid: sid.to_string(),
            pids: pids.to_vec(),
            encoded,
        }
    }

    #[must_use]
    pub fn sid(&self) -> &str {
        &self.sid
    }

    #[must_use]
    pub fn pids(&self) -> &[Pid] {
        &self.pids
    }

    /// The command line as written to the adapter (without the trailing CR).
    #[must_use]
    pub fn encoded(&self) -> &str {
        &self.encoded
    }
}

impl PartialEq for Request {
    fn eq(&self, other: &Self) -> bool {
        self.encoded == other.encoded
    }
}

impl Eq for Request {}

/// Partition `pids` into consecutive groups of at most `chunk_size` and
/// build one service-01 request per group, preserving input order.
///
/// Identical input always yields identical output ordering.
///
/// # Panics
///
/// Panics if `chunk_size` is zero, a construction bug rather than a
/// runtime condition.
#[must_use]
pub fn build_requests(pids: &[Pid], chunk_size: usize) -> Vec<Request> {
    assert!(chunk_size > 0, "chunk size must be positive");
    pids.chunks(chunk_size)
        .map(|group| Request::new(SERVICE_CURRENT_DATA, group))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn engine_load_and_speed_encode_as_one_line() {
        let requests = build_requests(&[Pid::EngineLoad, Pid::EngineSpeed], 3);
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].encoded(), "01 040C");
    }

    #[test]
    fn chunking_preserves_order_and_multiset() {
        let pids = [
            Pid::EngineLoad,
            Pid::EngineSpeed,
            Pid::VehicleSpeed,
            Pid::FuelTankLevel,
            Pid::Odometer,
        ];
        let requests = build_requests(&pids, 2);
        assert_eq!(requests.len(), 3);
        assert!(requests.iter().all(|r| r.pids().len() <= 2));

        let flattened: Vec<Pid> = requests.iter().flat_map(|r| r.pids().iter().copied()).collect();
        assert_eq!(flattened, pids);
    }

    #[test]
    fn rebuilt_request_compares_equal() {
        let a = Request::new(SERVICE_CURRENT_DATA, &[Pid::CoolantTemperature]);
        let b = Request::new(SERVICE_CURRENT_DATA, &[Pid::CoolantTemperature]);
        assert_eq!(a, b);

        let c = Request::new(SERVICE_CURRENT_DATA, &[Pid::VehicleSpeed]);
        assert_ne!(a, c);
    }

    #[test]
    fn identical_input_is_deterministic() {
        let pids = [Pid::EngineSpeed, Pid::Odometer, Pid::FuelTankLevel];
        let first: Vec<String> = build_requests(&pids, 2)
            .iter()
            .map(|r| r.encoded().to_string())
            .collect();
        let second: Vec<String> = build_requests(&pids, 2)
            .iter()
            .map(|r| r.encoded().to_string())
            .collect();
        assert_eq!(first, second);
    }

    #[test]
    fn high_bit_ids_render_uppercase() {
        let request = Request::new(SERVICE_CURRENT_DATA, &[Pid::Odometer, Pid::AmbientAirTemperature]);
        assert_eq!(request.encoded(), "01 A646");
    }

    #[test]
    #[should_panic(expected = "chunk size must be positive")]
    fn zero_chunk_size_is_a_contract_violation() {
        let _ = build_requests(&[Pid::EngineLoad], 0);
    }
}
