//! Mock ELM327 adapter + simulated vehicle for exercising triplog.
//!
//! Speaks the headers-on line format: responses carry the channel id and
//! ISO-TP framing, split into first/continuation frames when the payload
//! exceeds a single CAN frame. Simulated values vary over time so a
//! connected monitor shows a moving engine.
//!
//! Usage: cargo run -p triplog-mock-elm327-server
//! Then point triplog-monitor at 127.0.0.1:35000.

use clap::Parser;
use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::time::Instant;
use triplog_obd_lib::Pid;

/// Responding channel id reported in headers-on mode.
const CHANNEL_ID: &str = "7E8";

/// Data bytes per CAN frame after the PCI byte.
const FRAME_DATA_LEN: usize = 7;

#[derive(Parser, Debug)]
#[command(name = "triplog-mock-elm327")]
#[command(about = "Mock ELM327 adapter with a simulated vehicle")]
struct Args {
    /// Port to listen on
    #[arg(short, long, default_value_t = 35000)]
    port: u16,
}

fn main() {
    let args = Args::parse();
    let bind = format!("0.0.0.0:{}", args.port);
    println!("Mock ELM327 starting on {bind}...");
    let listener = TcpListener::bind(&bind).expect("Failed to bind");
    println!("Mock ELM327 ready - waiting for connections...");

    for stream in listener.incoming() {
        match stream {
            Ok(stream) => {
                println!("Client connected: {:?}", stream.peer_addr());
                std::thread::spawn(|| handle_client(stream));
            }
            Err(e) => eprintln!("Connection error: {e}"),
        }
    }
}

/// Per-connection adapter settings, mutated by AT commands.
struct AdapterState {
    echo_enabled: bool,
    linefeeds_enabled: bool,
    headers_enabled: bool,
    /// The first data request after a reset answers with search chatter
    /// prepended, like a real adapter probing the bus protocol.
    searched: bool,
}

impl Default for AdapterState {
    fn default() -> Self {
        Self {
            echo_enabled: true,
            linefeeds_enabled: true,
            headers_enabled: false,
            searched: false,
        }
    }
}

impl AdapterState {
    fn line_ending(&self) -> &'static str {
        if self.linefeeds_enabled {
            "\r\n"
        } else {
            "\r"
        }
    }
}

fn handle_client(mut stream: TcpStream) {
    let mut buffer = Vec::new();
    let mut byte = [0u8; 1];
    let vehicle = VehicleSim::new();
    let mut state = AdapterState::default();

    loop {
        match stream.read(&mut byte) {
            Ok(0) => {
                println!("Client disconnected");
                break;
            }
            Ok(_) => {
                let ch = byte[0];

                // Echo character if enabled
                if state.echo_enabled && stream.write_all(&byte).is_err() {
                    break;
                }

                // Carriage return terminates command
                if ch == b'\r' {
                    let command = String::from_utf8_lossy(&buffer).trim().to_uppercase();

                    if !command.is_empty() {
                        println!("RX: {command}");
                        let response = process_command(&command, &vehicle, &mut state);
                        println!("TX: {}", response.escape_debug());

                        if let Err(e) = stream.write_all(response.as_bytes()) {
                            eprintln!("Write error: {e}");
                            break;
                        }
                    }

                    buffer.clear();
                } else if ch != b'\n' {
                    // Accumulate command (ignore linefeeds)
                    buffer.push(ch);
                }
            }
            Err(e) => {
                eprintln!("Read error: {e}");
                break;
            }
        }
    }
}

/// Simulated vehicle: values are functions of elapsed time.
struct VehicleSim {
    start: Instant,
}

impl VehicleSim {
    fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    fn elapsed(&self) -> f32 {
        self.start.elapsed().as_secs_f32()
    }

    /// Current RPM: ramp up, hold, ramp down, repeat.
    fn rpm(&self) -> u32 {
        const MIN_RPM: f32 = 800.0;
        const MAX_RPM: f32 = 3500.0;
        const RAMP_TIME: f32 = 4.0;
        const HOLD_TIME: f32 = 3.0;
        const CYCLE_TIME: f32 = 2.0 * (RAMP_TIME + HOLD_TIME);

        let phase = self.elapsed() % CYCLE_TIME;
        let rpm = if phase < RAMP_TIME {
            MIN_RPM + (MAX_RPM - MIN_RPM) * (phase / RAMP_TIME)
        } else if phase < RAMP_TIME + HOLD_TIME {
            MAX_RPM
        } else if phase < 2.0 * RAMP_TIME + HOLD_TIME {
            let ramp_phase = phase - RAMP_TIME - HOLD_TIME;
            MAX_RPM - (MAX_RPM - MIN_RPM) * (ramp_phase / RAMP_TIME)
        } else {
            MIN_RPM
        };
        rpm as u32
    }

    /// Road speed roughly tracking the RPM cycle.
    fn speed_kmh(&self) -> u8 {
        (self.rpm() / 45).min(120) as u8
    }

    /// Coolant warms from 20 °C toward 90 °C.
    fn coolant_c(&self) -> f32 {
        90.0_f32.min(20.0 + self.elapsed() / 2.0)
    }

    /// Fuel drains slowly from 80 %.
    fn fuel_percent(&self) -> f32 {
        0.0_f32.max(80.0 - self.elapsed() / 60.0)
    }

    /// Encoded data bytes for one parameter, per the ECU conventions the
    /// engine decodes with.
    fn data_bytes(&self, pid: Pid) -> Vec<u8> {
        match pid {
            Pid::EngineLoad => vec![(35.0 * 2.55) as u8],
            Pid::CoolantTemperature => vec![(self.coolant_c() + 40.0) as u8],
            Pid::EngineSpeed => {
                let quarters = self.rpm() * 4;
                vec![(quarters >> 8) as u8, (quarters & 0xFF) as u8]
            }
            Pid::VehicleSpeed => vec![self.speed_kmh()],
            Pid::IntakeAirTemperature => vec![25 + 40],
            Pid::MassAirFlow => {
                // Scale airflow with RPM, in hundredths of g/s.
                let centigrams = (self.rpm() * 2).min(u32::from(u16::MAX));
                vec![(centigrams >> 8) as u8, (centigrams & 0xFF) as u8]
            }
            Pid::ThrottlePosition => vec![(20.0 * 2.55) as u8],
            Pid::EngineRunTime => {
                let seconds = (self.elapsed() as u32).min(u32::from(u16::MAX));
                vec![(seconds >> 8) as u8, (seconds & 0xFF) as u8]
            }
            Pid::FuelTankLevel => vec![(self.fuel_percent() * 2.55) as u8],
            Pid::AmbientAirTemperature => vec![18 + 40],
            Pid::EngineFuelRate => {
                // Rough burn in twentieths of L/h, proportional to RPM.
                let twentieths = (self.rpm() / 20).min(u32::from(u16::MAX));
                vec![(twentieths >> 8) as u8, (twentieths & 0xFF) as u8]
            }
            Pid::Odometer => {
                // 84023.5 km plus a bit of simulated driving.
                let tenths = 840_235 + (self.elapsed() * 10.0) as u32;
                tenths.to_be_bytes().to_vec()
            }
        }
    }
}

fn process_command(cmd: &str, vehicle: &VehicleSim, state: &mut AdapterState) -> String {
    // Adapters accept commands with or without internal spaces.
    let normalized = cmd.replace(' ', "");
    let le = state.line_ending();

    if let Some(at) = normalized.strip_prefix("AT") {
        return handle_at_command(at, state);
    }

    // Mode 01 - current data, one or more PIDs
    if let Some(pid_hex) = normalized.strip_prefix("01") {
        let Ok(ids) = hex::decode(pid_hex) else {
            return format!("?{le}{le}>");
        };
        if ids.is_empty() {
            return format!("?{le}{le}>");
        }

        let mut payload = vec![0x41];
        for id in ids {
            let Some(pid) = Pid::from_u8(id) else {
                return format!("NO DATA{le}{le}>");
            };
            payload.push(id);
            payload.extend(vehicle.data_bytes(pid));
        }

        let mut response = String::new();
        if !state.searched {
            // First bus access: protocol probe chatter precedes the data.
            state.searched = true;
            response.push_str("SEARCHING...");
            response.push_str(le);
        }
        response.push_str(&frame_response(&payload, state));
        response.push_str(le);
        response.push('>');
        return response;
    }

    // Unknown command
    format!("?{le}{le}>")
}

fn handle_at_command(at: &str, state: &mut AdapterState) -> String {
    let le = state.line_ending();
    let response_text = match at {
        "Z" => {
            *state = AdapterState::default();
            let le = state.line_ending();
            return format!("{le}ELM327 v1.5{le}>");
        }
        "E0" => {
            state.echo_enabled = false;
            "OK"
        }
        "E1" => {
            state.echo_enabled = true;
            "OK"
        }
        "L0" => {
            state.linefeeds_enabled = false;
            "OK"
        }
        "L1" => {
            state.linefeeds_enabled = true;
            "OK"
        }
        "H0" => {
            state.headers_enabled = false;
            "OK"
        }
        "H1" => {
            state.headers_enabled = true;
            "OK"
        }
        "I" => "ELM327 v1.5",
        "WS" | "FE" | "D" => "OK",
        _ if at.starts_with("SP") => "OK",
        _ if at.starts_with("ST") => "OK",
        _ if at.starts_with("AT") => "OK",
        _ => "?",
    };
    format!("{le}{response_text}{le}>")
}

/// Render a response payload as headers-on CAN frame lines, splitting into
/// ISO-TP first/continuation frames when it exceeds a single frame.
fn frame_response(payload: &[u8], state: &AdapterState) -> String {
    let le = state.line_ending();

    if !state.headers_enabled {
        // Headers off: plain payload bytes, one line.
        return hex_join(payload);
    }

    if payload.len() <= FRAME_DATA_LEN {
        // Single frame: PCI low nibble is the payload length, padded out to
        // a full 8-byte frame.
        let mut frame = vec![payload.len() as u8];
        frame.extend_from_slice(payload);
        frame.resize(1 + FRAME_DATA_LEN, 0x00);
        return format!("{CHANNEL_ID} {}", hex_join(&frame));
    }

    // Multi-frame: first frame declares the total length and carries six
    // bytes; continuations carry seven each under a cyclic index.
    let mut lines = Vec::new();
    let mut first = vec![0x10, payload.len() as u8];
    first.extend_from_slice(&payload[..6]);
    lines.push(format!("{CHANNEL_ID} {}", hex_join(&first)));

    for (index, chunk) in payload[6..].chunks(FRAME_DATA_LEN).enumerate() {
        // Continuation indexes cycle 1..=F.
        let pci = 0x20 | ((index as u8 + 1) & 0x0F);
        let mut frame = vec![pci];
        frame.extend_from_slice(chunk);
        frame.resize(1 + FRAME_DATA_LEN, 0x00);
        lines.push(format!("{CHANNEL_ID} {}", hex_join(&frame)));
    }

    lines.join(le)
}

fn hex_join(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|byte| format!("{byte:02X}"))
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headers_on_state() -> AdapterState {
        AdapterState {
            headers_enabled: true,
            linefeeds_enabled: false,
            searched: true,
            ..AdapterState::default()
        }
    }

    #[test]
    fn short_payload_fits_one_frame() {
        let state = headers_on_state();
        // 41 0D 28: three bytes, single frame, zero-padded.
        let framed = frame_response(&[0x41, 0x0D, 0x28], &state);
        assert_eq!(framed, "7E8 03 41 0D 28 00 00 00 00");
    }

    #[test]
    fn long_payload_splits_into_iso_tp_frames() {
        let state = headers_on_state();
        let payload = [0x41, 0x2F, 0xE8, 0x46, 0x3F, 0x1F, 0x00, 0x0E, 0x0D];
        let framed = frame_response(&payload, &state);
        assert_eq!(
            framed,
            "7E8 10 09 41 2F E8 46 3F 1F\r7E8 21 00 0E 0D 00 00 00 00"
        );
    }

    #[test]
    fn at_commands_mutate_state() {
        let mut state = AdapterState::default();
        assert!(handle_at_command("E0", &mut state).contains("OK"));
        assert!(!state.echo_enabled);

        assert!(handle_at_command("H1", &mut state).contains("OK"));
        assert!(state.headers_enabled);

        handle_at_command("L0", &mut state);
        assert_eq!(state.line_ending(), "\r");

        let reset = handle_at_command("Z", &mut state);
        assert!(reset.contains("ELM327"));
        assert!(state.echo_enabled);
    }

    #[test]
    fn data_request_encodes_requested_pids() {
        let vehicle = VehicleSim::new();
        let mut state = headers_on_state();

        let response = process_command("01 0D2F", &vehicle, &mut state);
        // 41 (service echo) 0D <speed> 2F <fuel>: five bytes, one frame.
        assert!(response.starts_with("7E8 05 41 0D "));
        assert!(response.ends_with("\r>"));
    }

    #[test]
    fn unknown_pid_reports_no_data() {
        let vehicle = VehicleSim::new();
        let mut state = headers_on_state();
        let response = process_command("01 FF", &vehicle, &mut state);
        assert!(response.contains("NO DATA"));
    }

    #[test]
    fn first_data_request_prepends_search_chatter() {
        let vehicle = VehicleSim::new();
        let mut state = AdapterState {
            searched: false,
            ..headers_on_state()
        };

        let first = process_command("01 0D", &vehicle, &mut state);
        assert!(first.contains("SEARCHING"));

        let second = process_command("01 0D", &vehicle, &mut state);
        assert!(!second.contains("SEARCHING"));
    }

    #[test]
    fn full_parameter_payload_round_trips_through_framing() {
        let vehicle = VehicleSim::new();
        let mut state = headers_on_state();

        // Three two-byte parameters: payload is 41 + 3 * 3 = 10 bytes, so
        // the response must be multi-frame.
        let response = process_command("01 0C105E", &vehicle, &mut state);
        let lines: Vec<&str> = response.trim_end_matches('>').split('\r').collect();
        let frames: Vec<&str> = lines.iter().copied().filter(|l| !l.is_empty()).collect();
        assert_eq!(frames.len(), 2);
        assert!(frames[0].starts_with("7E8 10 0A 41 0C"));
        assert!(frames[1].starts_with("7E8 21"));
    }
}
