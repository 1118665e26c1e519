//! OBD-II parameter identifiers and their decode formulas.
//!
//! Each parameter is a single-byte identifier with a fixed data width and a
//! pure scaling formula (ECU convention). The registry is a static dispatch
//! table: no runtime closures, trivially testable.

use std::fmt;
use std::str::FromStr;

/// Service 01 parameter identifiers the engine knows how to decode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Pid {
    EngineLoad = 0x04,
    CoolantTemperature = 0x05,
    EngineSpeed = 0x0C,
    VehicleSpeed = 0x0D,
    IntakeAirTemperature = 0x0F,
    MassAirFlow = 0x10,
    ThrottlePosition = 0x11,
    EngineRunTime = 0x1F,
    FuelTankLevel = 0x2F,
    AmbientAirTemperature = 0x46,
    EngineFuelRate = 0x5E,
    Odometer = 0xA6,
}

/// All registered parameters, in identifier order.
pub const ALL_PIDS: &[Pid] = &[
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

impl Pid {
    /// Try to convert a raw identifier byte to a `Pid`.
    ///
    /// Unknown identifiers are `None`, not an error: responses may carry
    /// parameters this build does not monitor.
    #[must_use]
    pub fn from_u8(id: u8) -> Option<Self> {
        match id {
            0x04 => Some(Self::EngineLoad),
            0x05 => Some(Self::CoolantTemperature),
            0x0C => Some(Self::EngineSpeed),
            0x0D => Some(Self::VehicleSpeed),
            0x0F => Some(Self::IntakeAirTemperature),
            0x10 => Some(Self::MassAirFlow),
            0x11 => Some(Self::ThrottlePosition),
            0x1F => Some(Self::EngineRunTime),
            0x2F => Some(Self::FuelTankLevel),
            0x46 => Some(Self::AmbientAirTemperature),
            0x5E => Some(Self::EngineFuelRate),
            0xA6 => Some(Self::Odometer),
            _ => None,
        }
    }

    /// The raw identifier byte.
    #[must_use]
    pub fn id(self) -> u8 {
        self as u8
    }

    /// The static decode spec for this parameter.
    #[must_use]
    pub fn spec(self) -> &'static PidSpec {
        match self {
            Self::EngineLoad => &ENGINE_LOAD,
            Self::CoolantTemperature => &COOLANT_TEMPERATURE,
            Self::EngineSpeed => &ENGINE_SPEED,
            Self::VehicleSpeed => &VEHICLE_SPEED,
            Self::IntakeAirTemperature => &INTAKE_AIR_TEMPERATURE,
            Self::MassAirFlow => &MASS_AIR_FLOW,
            Self::ThrottlePosition => &THROTTLE_POSITION,
            Self::EngineRunTime => &ENGINE_RUN_TIME,
            Self::FuelTankLevel => &FUEL_TANK_LEVEL,
            Self::AmbientAirTemperature => &AMBIENT_AIR_TEMPERATURE,
            Self::EngineFuelRate => &ENGINE_FUEL_RATE,
            Self::Odometer => &ODOMETER,
        }
    }

    /// Kebab-case name, used by CLI arguments and config files.
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::EngineLoad => "engine-load",
            Self::CoolantTemperature => "coolant-temperature",
            Self::EngineSpeed => "engine-speed",
            Self::VehicleSpeed => "vehicle-speed",
            Self::IntakeAirTemperature => "intake-air-temperature",
            Self::MassAirFlow => "mass-air-flow",
            Self::ThrottlePosition => "throttle-position",
            Self::EngineRunTime => "engine-run-time",
            Self::FuelTankLevel => "fuel-tank-level",
            Self::AmbientAirTemperature => "ambient-air-temperature",
            Self::EngineFuelRate => "engine-fuel-rate",
            Self::Odometer => "odometer",
        }
    }
}

impl fmt::Display for Pid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Pid {
    type Err = UnknownPid;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ALL_PIDS
            .iter()
            .copied()
            .find(|pid| pid.name() == s)
            .ok_or_else(|| UnknownPid(s.to_string()))
    }
}

/// Error for a parameter name that is not in the registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownPid(pub String);

impl fmt::Display for UnknownPid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown parameter name: {:?}", self.0)
    }
}

impl std::error::Error for UnknownPid {}

/// Decode spec for one parameter: expected byte width, unit symbol, and the
/// pure scaling formula.
pub struct PidSpec {
    pub pid: Pid,
    /// Number of payload bytes following the identifier byte.
    pub data_len: usize,
    pub unit: &'static str,
    decode: fn(&[u8]) -> f64,
}

impl PidSpec {
    /// Decode `bytes` into a measurement.
    ///
    /// `bytes` must be exactly [`PidSpec::data_len`] long; callers guarantee
    /// the length from their own bookkeeping.
    #[must_use]
    pub fn decode(&self, bytes: &[u8]) -> MeasuredValue {
        debug_assert_eq!(bytes.len(), self.data_len);
        MeasuredValue {
            pid: self.pid,
            value: (self.decode)(bytes),
            unit: self.unit,
        }
    }
}

/// One successfully decoded parameter value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MeasuredValue {
    pub pid: Pid,
    pub value: f64,
    pub unit: &'static str,
}

impl fmt::Display for MeasuredValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {:.1} {}", self.pid, self.value, self.unit)
    }
}

/// Look up the spec for a raw identifier byte.
#[must_use]
pub fn lookup(id: u8) -> Option<&'static PidSpec> {
    Pid::from_u8(id).map(Pid::spec)
}

/// Decode a raw identifier plus payload, or `None` for an unregistered id.
#[must_use]
pub fn decode(id: u8, bytes: &[u8]) -> Option<MeasuredValue> {
    lookup(id).map(|spec| spec.decode(bytes))
}

fn word(bytes: &[u8]) -> f64 {
    256.0 * f64::from(bytes[0]) + f64::from(bytes[1])
}

fn decode_engine_load(bytes: &[u8]) -> f64 {
    f64::from(bytes[0]) / 2.55
}

fn decode_temperature(bytes: &[u8]) -> f64 {
    f64::from(bytes[0]) - 40.0
}

fn decode_engine_speed(bytes: &[u8]) -> f64 {
    word(bytes) / 4.0
}

fn decode_vehicle_speed(bytes: &[u8]) -> f64 {
    f64::from(bytes[0])
}

fn decode_mass_air_flow(bytes: &[u8]) -> f64 {
    word(bytes) / 100.0
}

fn decode_percentage(bytes: &[u8]) -> f64 {
    100.0 * f64::from(bytes[0]) / 255.0
}

fn decode_run_time(bytes: &[u8]) -> f64 {
    word(bytes)
}

fn decode_fuel_rate(bytes: &[u8]) -> f64 {
    word(bytes) / 20.0
}

fn decode_odometer(bytes: &[u8]) -> f64 {
    let tenths = u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
    f64::from(tenths) / 10.0
}

static ENGINE_LOAD: PidSpec = PidSpec {
    pid: Pid::EngineLoad,
    data_len: 1,
    unit: "%",
    decode: decode_engine_load,
};

static COOLANT_TEMPERATURE: PidSpec = PidSpec {
    pid: Pid::CoolantTemperature,
    data_len: 1,
    unit: "°C",
    decode: decode_temperature,
};

static ENGINE_SPEED: PidSpec = PidSpec {
    pid: Pid::EngineSpeed,
    data_len: 2,
    unit: "RPM",
    decode: decode_engine_speed,
};

static VEHICLE_SPEED: PidSpec = PidSpec {
    pid: Pid::VehicleSpeed,
    data_len: 1,
    unit: "km/h",
    decode: decode_vehicle_speed,
};

static INTAKE_AIR_TEMPERATURE: PidSpec = PidSpec {
    pid: Pid::IntakeAirTemperature,
    data_len: 1,
    unit: "°C",
    decode: decode_temperature,
};

static MASS_AIR_FLOW: PidSpec = PidSpec {
    pid: Pid::MassAirFlow,
    data_len: 2,
    unit: "g/s",
    decode: decode_mass_air_flow,
};

static THROTTLE_POSITION: PidSpec = PidSpec {
    pid: Pid::ThrottlePosition,
    data_len: 1,
    unit: "%",
    decode: decode_percentage,
};

static ENGINE_RUN_TIME: PidSpec = PidSpec {
    pid: Pid::EngineRunTime,
    data_len: 2,
    unit: "s",
    decode: decode_run_time,
};

static FUEL_TANK_LEVEL: PidSpec = PidSpec {
    pid: Pid::FuelTankLevel,
    data_len: 1,
    unit: "%",
    decode: decode_percentage,
};

static AMBIENT_AIR_TEMPERATURE: PidSpec = PidSpec {
    pid: Pid::AmbientAirTemperature,
    data_len: 1,
    unit: "°C",
    decode: decode_temperature,
};

static ENGINE_FUEL_RATE: PidSpec = PidSpec {
    pid: Pid::EngineFuelRate,
    data_len: 2,
    unit: "L/h",
    decode: decode_fuel_rate,
};

static ODOMETER: PidSpec = PidSpec {
    pid: Pid::Odometer,
    data_len: 4,
    unit: "km",
    decode: decode_odometer,
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn engine_load_full_range() {
        for v in 0..=255u8 {
            let measured = Pid::EngineLoad.spec().decode(&[v]);
            let expected = f64::from(v) / 2.55;
            assert!((measured.value - expected).abs() < 1e-9, "byte {v}");
        }
        assert_eq!(Pid::EngineLoad.spec().decode(&[255]).value, 100.0);
    }

    #[test]
    fn engine_speed_formula() {
        // 0x1A 0xF8 = 6904 quarter-revolutions
        let measured = Pid::EngineSpeed.spec().decode(&[0x1A, 0xF8]);
        assert_eq!(measured.value, 1726.0);
        assert_eq!(measured.unit, "RPM");

        let idle = Pid::EngineSpeed.spec().decode(&[0x0C, 0x81]);
        assert!((idle.value - 800.25).abs() < 1e-9);
    }

    #[test]
    fn engine_speed_full_range() {
        for b0 in 0..=255u8 {
            for b1 in [0u8, 1, 3, 127, 128, 255] {
                let measured = Pid::EngineSpeed.spec().decode(&[b0, b1]);
                let expected = (256.0 * f64::from(b0) + f64::from(b1)) / 4.0;
                assert!(
                    (measured.value - expected).abs() < 1e-9,
                    "bytes {b0:02X} {b1:02X}"
                );
            }
        }
    }

    #[test]
    fn temperatures_are_offset_by_forty() {
        assert_eq!(Pid::CoolantTemperature.spec().decode(&[0x4F]).value, 39.0);
        assert_eq!(Pid::AmbientAirTemperature.spec().decode(&[0x46]).value, 30.0);
        assert_eq!(Pid::IntakeAirTemperature.spec().decode(&[0x00]).value, -40.0);
    }

    #[test]
    fn fuel_tank_level_scales_to_percent() {
        assert_eq!(Pid::FuelTankLevel.spec().decode(&[0xFF]).value, 100.0);
        assert_eq!(Pid::FuelTankLevel.spec().decode(&[0x00]).value, 0.0);
        let half = Pid::FuelTankLevel.spec().decode(&[0x80]).value;
        assert!((half - 100.0 * 128.0 / 255.0).abs() < 1e-9);
    }

    #[test]
    fn odometer_is_big_endian_tenths() {
        // 0x00013880 = 80000 tenths = 8000.0 km
        let measured = Pid::Odometer.spec().decode(&[0x00, 0x01, 0x38, 0x80]);
        assert_eq!(measured.value, 8000.0);
        assert_eq!(measured.unit, "km");
    }

    #[test]
    fn mass_air_flow_and_fuel_rate() {
        assert_eq!(Pid::MassAirFlow.spec().decode(&[0x01, 0x90]).value, 4.0);
        assert_eq!(Pid::EngineFuelRate.spec().decode(&[0x00, 0x64]).value, 5.0);
    }

    #[test]
    fn registry_lookup_by_raw_id() {
        let spec = lookup(0x0C).expect("engine speed is registered");
        assert_eq!(spec.pid, Pid::EngineSpeed);
        assert_eq!(spec.data_len, 2);

        assert!(lookup(0x00).is_none());
        assert!(decode(0xFE, &[]).is_none());
    }

    #[test]
    fn every_pid_resolves_its_own_spec() {
        for &pid in ALL_PIDS {
            assert_eq!(pid.spec().pid, pid);
            assert_eq!(Pid::from_u8(pid.id()), Some(pid));
        }
    }

    #[test]
    fn names_round_trip() {
        for &pid in ALL_PIDS {
            assert_eq!(pid.name().parse::<Pid>().unwrap(), pid);
        }
        assert!("boost-pressure".parse::<Pid>().is_err());
    }
}
