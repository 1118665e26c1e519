//! End-to-end engine test: a scripted adapter session covering the full
//! parameter set, multi-frame responses, link noise, and recovery.

use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};
use triplog_obd_lib::{EngineConfig, MeasuredValue, ObdEngine, Pid, Transport, TransportError};

struct ScriptedLink {
    writes: Mutex<Vec<String>>,
}

impl ScriptedLink {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            writes: Mutex::new(Vec::new()),
        })
    }

    fn wait_for_write(&self, count: usize) -> String {
        let deadline = Instant::now() + Duration::from_secs(2);
        loop {
            let writes = self.writes.lock().unwrap();
            if writes.len() >= count {
                return writes[count - 1].clone();
            }
            drop(writes);
            assert!(Instant::now() < deadline, "timed out waiting for write #{count}");
            thread::sleep(Duration::from_millis(2));
        }
    }
}

impl Transport for ScriptedLink {
    fn write(&self, line: &str) -> Result<(), TransportError> {
        self.writes.lock().unwrap().push(line.to_string());
        Ok(())
    }
}

fn fast_config() -> EngineConfig {
    EngineConfig {
        chunk_size: 3,
        fresh_interval: Duration::from_millis(5),
        nominal_interval: Duration::from_millis(1),
        max_interval: Duration::from_millis(50),
    }
}

fn drain(queue: &triplog_obd_lib::BlockingQueue<MeasuredValue>) -> Vec<MeasuredValue> {
    let mut out = Vec::new();
    while !queue.is_empty() {
        if let Some(measured) = queue.dequeue() {
            out.push(measured);
        }
    }
    out
}

#[test]
fn full_parameter_sweep_over_a_noisy_link() {
    let link = ScriptedLink::new();
    let all = [
        Pid::EngineLoad,
        Pid::CoolantTemperature,
        Pid::EngineSpeed,
        Pid::VehicleSpeed,
        Pid::IntakeAirTemperature,
        Pid::MassAirFlow,
        Pid::ThrottlePosition,
        Pid::EngineRunTime,
        Pid::FuelTankLevel,
        Pid::AmbientAirTemperature,
        Pid::EngineFuelRate,
        Pid::Odometer,
    ];
    let engine = ObdEngine::with_config(Arc::clone(&link) as Arc<dyn Transport>, &all, fast_config());

    engine.on_connected();

    // Adapter setup, one command per acknowledgement.
    assert_eq!(link.wait_for_write(1), "AT E0\r");
    engine.handle_notification(b"OK\r\r>");
    assert_eq!(link.wait_for_write(2), "AT SP 0\r");
    engine.handle_notification(b"OK\r\r>");
    assert_eq!(link.wait_for_write(3), "AT L0\r");
    engine.handle_notification(b"OK\r\r>");
    assert_eq!(link.wait_for_write(4), "AT H1\r");
    engine.handle_notification(b"OK\r\r>");

    // Twelve parameters in chunks of three: four poll requests.
    assert_eq!(link.wait_for_write(5), "01 04050C\r");

    // The bus answers after a protocol search; the search chatter is noise.
    engine.handle_notification(b"SEARCHING...\r");
    engine.handle_notification(b"7E8 10 08 41 04 80 05 6E\r\r>");
    engine.handle_notification(b"7E8 21 0C 1A F8 00 00 00 00\r\r>");

    assert_eq!(link.wait_for_write(6), "01 0D0F10\r");
    engine.handle_notification(b"7E8 10 08 41 0D 3C 0F 46\r\r>");
    engine.handle_notification(b"7E8 21 10 01 90 00 00 00 00\r\r>");

    // A flaky stretch: the same request must be retried, slower.
    assert_eq!(link.wait_for_write(7), "01 111F2F\r");
    let before_backoff = engine.message_interval();
    engine.handle_notification(b"NO DATA\r\r>");
    assert_eq!(link.wait_for_write(8), "01 111F2F\r");
    assert!(engine.message_interval() > before_backoff);

    engine.handle_notification(b"7E8 10 08 41 11 FF 1F 00 3C\r\r>");
    engine.handle_notification(b"7E8 21 2F 80 00 00 00 00 00\r\r>");
    // A well-formed response restores the nominal pace.
    assert_eq!(engine.message_interval(), Duration::from_millis(1));

    assert_eq!(link.wait_for_write(9), "01 465EA6\r");
    engine.handle_notification(b"7E8 10 0B 41 46 3F 5E 00 C8\r\r>");
    engine.handle_notification(b"7E8 21 A6 00 01 38 80 00 00\r\r>");

    // Rotation wraps around to the first group.
    assert_eq!(link.wait_for_write(10), "01 04050C\r");

    let decoded = drain(&engine.measurements());
    let expected: Vec<(Pid, f64, &str)> = vec![
        (Pid::EngineLoad, 128.0 / 2.55, "%"),
        (Pid::CoolantTemperature, 70.0, "°C"),
        (Pid::EngineSpeed, 1726.0, "RPM"),
        (Pid::VehicleSpeed, 60.0, "km/h"),
        (Pid::IntakeAirTemperature, 30.0, "°C"),
        (Pid::MassAirFlow, 4.0, "g/s"),
        (Pid::ThrottlePosition, 100.0, "%"),
        (Pid::EngineRunTime, 60.0, "s"),
        (Pid::FuelTankLevel, 100.0 * 128.0 / 255.0, "%"),
        (Pid::AmbientAirTemperature, 23.0, "°C"),
        (Pid::EngineFuelRate, 10.0, "L/h"),
        (Pid::Odometer, 8000.0, "km"),
    ];
    assert_eq!(decoded.len(), expected.len());
    for (measured, (pid, value, unit)) in decoded.iter().zip(&expected) {
        assert_eq!(measured.pid, *pid);
        assert!(
            (measured.value - value).abs() < 1e-9,
            "{pid}: {} vs {value}",
            measured.value
        );
        assert_eq!(measured.unit, *unit);
    }

    engine.shutdown();
}

#[test]
fn disconnect_mid_session_then_reconnect_reinitializes() {
    let link = ScriptedLink::new();
    let engine = ObdEngine::with_config(
        Arc::clone(&link) as Arc<dyn Transport>,
        &[Pid::EngineSpeed, Pid::VehicleSpeed],
        fast_config(),
    );

    engine.on_connected();
    for written in 1..=4 {
        link.wait_for_write(written);
        engine.handle_notification(b"OK\r\r>");
    }
    assert_eq!(link.wait_for_write(5), "01 0C0D\r");

    // The link dies while a multi-frame response is half-delivered.
    engine.handle_notification(b"7E8 10 08 41 0C 1A F8 0D 3C\r\r>");
    engine.on_disconnected();

    // Reconnection starts from the cautious interval and a fresh setup.
    engine.on_connected();
    assert_eq!(engine.message_interval(), Duration::from_millis(5));
    assert_eq!(link.wait_for_write(6), "AT E0\r");

    // The half-delivered response left nothing behind.
    assert!(engine.measurements().is_empty());

    engine.shutdown();
}
