//! OBD-II PID Definitions and Reply Decoding
//!
//! Turns a framed ELM327 reply such as `41 0C 1A F8` into a one-line
//! narration. Replies the decoder cannot use produce the marker narrations
//! that [`crate::ResponseClassifier`] suppresses.

use crate::framer::CR_CARET;
use crate::mode;
use serde::{Deserialize, Serialize};

/// Narration for a reply with nothing to decode
pub const NO_MESSAGE: &str = "No message";

/// Turns a framed reply into narration text
pub trait ResponseDecoder: Send + Sync {
    /// Decode `raw` framed text into a narration
    fn decode(&self, raw: &str) -> String;
}

/// Standard OBD-II PIDs for Mode 01 (current data)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum Pid {
    /// Monitor status since DTCs cleared (0x01)
    MonitorStatus = 0x01,
    /// Calculated engine load (0x04)
    EngineLoad = 0x04,
    /// Engine coolant temperature (0x05)
    CoolantTemp = 0x05,
    /// Short-term fuel trim bank 1 (0x06)
    ShortFuelTrim = 0x06,
    /// Long-term fuel trim bank 1 (0x07)
    LongFuelTrim = 0x07,
    /// Intake manifold absolute pressure (0x0B)
    IntakeManifoldPressure = 0x0B,
    /// Engine RPM (0x0C)
    Rpm = 0x0C,
    /// Vehicle speed (0x0D)
    Speed = 0x0D,
    /// Intake air temperature (0x0F)
    IntakeAirTemp = 0x0F,
    /// Mass air flow rate (0x10)
    Maf = 0x10,
    /// Throttle position (0x11)
    ThrottlePosition = 0x11,
    /// Oxygen sensor voltage bank 1, sensor 1 (0x14)
    O2Voltage = 0x14,
}

impl Pid {
    /// Look up a PID by its hex value
    pub fn from_hex(value: u8) -> Option<Self> {
        let pid = match value {
            0x01 => Pid::MonitorStatus,
            0x04 => Pid::EngineLoad,
            0x05 => Pid::CoolantTemp,
            0x06 => Pid::ShortFuelTrim,
            0x07 => Pid::LongFuelTrim,
            0x0B => Pid::IntakeManifoldPressure,
            0x0C => Pid::Rpm,
            0x0D => Pid::Speed,
            0x0F => Pid::IntakeAirTemp,
            0x10 => Pid::Maf,
            0x11 => Pid::ThrottlePosition,
            0x14 => Pid::O2Voltage,
            _ => return None,
        };
        Some(pid)
    }

    /// Get the number of response bytes for this PID
    pub fn response_bytes(&self) -> usize {
        match self {
            Pid::MonitorStatus => 4,
            Pid::Rpm | Pid::Maf | Pid::O2Voltage => 2,
            _ => 1,
        }
    }

    /// Human-readable name used in narrations
    pub fn description(&self) -> &'static str {
        match self {
            Pid::MonitorStatus => "Monitor status",
            Pid::EngineLoad => "Calculated engine load",
            Pid::CoolantTemp => "Engine coolant temperature",
            Pid::ShortFuelTrim => "Short term fuel trim (bank 1)",
            Pid::LongFuelTrim => "Long term fuel trim (bank 1)",
            Pid::IntakeManifoldPressure => "Intake manifold pressure",
            Pid::Rpm => "Engine RPM",
            Pid::Speed => "Vehicle speed",
            Pid::IntakeAirTemp => "Intake air temperature",
            Pid::Maf => "Mass air flow rate",
            Pid::ThrottlePosition => "Throttle position",
            Pid::O2Voltage => "Oxygen sensor 1 voltage",
        }
    }

    fn unit(&self) -> &'static str {
        match self {
            Pid::MonitorStatus => "",
            Pid::EngineLoad | Pid::ShortFuelTrim | Pid::LongFuelTrim | Pid::ThrottlePosition => "%",
            Pid::CoolantTemp | Pid::IntakeAirTemp => "°C",
            Pid::IntakeManifoldPressure => "kPa",
            Pid::Rpm => "rpm",
            Pid::Speed => "km/h",
            Pid::Maf => "g/s",
            Pid::O2Voltage => "V",
        }
    }
}

/// A decoded mode 01 reply
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PidResponse {
    /// The PID that was answered
    pub pid: Pid,
    /// Decoded value
    pub value: f64,
    /// Data bytes following the mode and PID bytes
    pub raw_bytes: Vec<u8>,
}

impl PidResponse {
    /// Decode data bytes for `pid`, or `None` when too few bytes arrived
    pub fn decode(pid: Pid, raw_bytes: Vec<u8>) -> Option<Self> {
        if raw_bytes.len() < pid.response_bytes() {
            return None;
        }
        let value = Self::decode_value(pid, &raw_bytes);
        Some(Self {
            pid,
            value,
            raw_bytes,
        })
    }

    /// Decode the raw bytes to a value based on the PID formula
    fn decode_value(pid: Pid, bytes: &[u8]) -> f64 {
        let a = bytes[0] as f64;
        let b = bytes.get(1).copied().unwrap_or(0) as f64;
        match pid {
            // DTC count: A & 0x7F
            Pid::MonitorStatus => (bytes[0] & 0x7F) as f64,
            // Engine Load, throttle: A * 100 / 255 (%)
            Pid::EngineLoad | Pid::ThrottlePosition => a * 100.0 / 255.0,
            // Temperatures: A - 40 (°C)
            Pid::CoolantTemp | Pid::IntakeAirTemp => a - 40.0,
            // Short/Long fuel trim: (A - 128) * 100 / 128 (%)
            Pid::ShortFuelTrim | Pid::LongFuelTrim => (a - 128.0) * 100.0 / 128.0,
            // Pressure, speed: A
            Pid::IntakeManifoldPressure | Pid::Speed => a,
            // RPM: ((A*256)+B)/4
            Pid::Rpm => (a * 256.0 + b) / 4.0,
            // MAF: ((A*256)+B) / 100 (g/s)
            Pid::Maf => (a * 256.0 + b) / 100.0,
            // O2 Voltage: A / 200 (V)
            Pid::O2Voltage => a / 200.0,
        }
    }

    /// One-line narration of this reply
    pub fn narrate(&self) -> String {
        match self.pid {
            Pid::MonitorStatus => {
                let lamp = if self.raw_bytes[0] & 0x80 != 0 { "on" } else { "off" };
                format!(
                    "Check engine light is {}, {} trouble codes stored",
                    lamp, self.value as u32
                )
            }
            Pid::Rpm
            | Pid::Speed
            | Pid::IntakeManifoldPressure
            | Pid::CoolantTemp
            | Pid::IntakeAirTemp => {
                format!("{}: {:.0} {}", self.pid.description(), self.value, self.pid.unit())
            }
            Pid::Maf | Pid::O2Voltage => {
                format!("{}: {:.2} {}", self.pid.description(), self.value, self.pid.unit())
            }
            _ => format!("{}: {:.1} {}", self.pid.description(), self.value, self.pid.unit()),
        }
    }
}

/// Decoder for ELM327 mode 01 replies
#[derive(Debug, Clone, Copy, Default)]
pub struct PidDecoder;

impl PidDecoder {
    /// Create a decoder
    pub fn new() -> Self {
        Self
    }

    /// Parse a reply line into bytes; `None` unless it is an even run of hex digits
    fn parse_hex_line(line: &str) -> Option<Vec<u8>> {
        let compact: String = line.split_whitespace().collect();
        if compact.len() < 4 || compact.len() % 2 != 0 {
            return None;
        }
        (0..compact.len())
            .step_by(2)
            .map(|i| u8::from_str_radix(compact.get(i..i + 2)?, 16).ok())
            .collect()
    }
}

impl ResponseDecoder for PidDecoder {
    fn decode(&self, raw: &str) -> String {
        let cleaned = raw.replace(CR_CARET, "\n").replace('>', "");
        let lines: Vec<&str> = cleaned
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .collect();

        if lines.is_empty() {
            return NO_MESSAGE.to_string();
        }

        let reply_mode = mode::CURRENT_DATA + mode::RESPONSE_OFFSET;
        for line in &lines {
            let Some(bytes) = Self::parse_hex_line(line) else {
                continue;
            };
            if bytes[0] != reply_mode {
                continue;
            }
            let code = bytes[1];
            let Some(pid) = Pid::from_hex(code) else {
                return format!("No PID description for {:02X}{:02X}", mode::CURRENT_DATA, code);
            };
            return match PidResponse::decode(pid, bytes[2..].to_vec()) {
                Some(response) => response.narrate(),
                None => format!("Invalid response: {}", line),
            };
        }

        if lines.iter().any(|line| line.to_uppercase().contains("NO DATA")) {
            return NO_MESSAGE.to_string();
        }
        format!("Invalid response: {}", lines.join(" "))
    }
}
