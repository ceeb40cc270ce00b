//! Wire Protocol for the Sensor Node
//!
//! Text protocol, one exchange per connection:
//! ```text
//! client -> node   READ_ALL\n
//! node   -> client TEMP:36.6|HUM:48.0|HR:72|SPO2:98\n
//! ```
//! The response is read once; whatever arrived is decoded. Only the first line
//! carrying the temperature marker is considered. Unknown keys and malformed
//! tokens are skipped without discarding the rest of the line.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Substring identifying the reading line inside a response
pub const RECORD_MARKER: &str = "TEMP:";

/// Separator between `KEY:VALUE` tokens
pub const FIELD_DELIMITER: char = '|';

/// Separator between key and value inside a token
pub const KEY_VALUE_SEPARATOR: char = ':';

/// Sensor readings carried by the protocol
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SensorField {
    Temperature,
    Humidity,
    HeartRate,
    Spo2,
}

impl SensorField {
    pub const ALL: [SensorField; 4] = [
        SensorField::Temperature,
        SensorField::Humidity,
        SensorField::HeartRate,
        SensorField::Spo2,
    ];

    /// Key used on the wire
    pub fn wire_key(&self) -> &'static str {
        match self {
            Self::Temperature => "TEMP",
            Self::Humidity => "HUM",
            Self::HeartRate => "HR",
            Self::Spo2 => "SPO2",
        }
    }

    pub fn from_wire_key(key: &str) -> Option<Self> {
        match key {
            "TEMP" => Some(Self::Temperature),
            "HUM" => Some(Self::Humidity),
            "HR" => Some(Self::HeartRate),
            "SPO2" => Some(Self::Spo2),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Temperature => "temperature",
            Self::Humidity => "humidity",
            Self::HeartRate => "heart_rate",
            Self::Spo2 => "spo2",
        }
    }

    pub fn unit(&self) -> &'static str {
        match self {
            Self::Temperature => "°C",
            Self::Humidity => "%",
            Self::HeartRate => "BPM",
            Self::Spo2 => "%",
        }
    }
}

impl fmt::Display for SensorField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One poll's worth of readings. Any subset may be absent.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    pub temperature: Option<f64>,
    pub humidity: Option<f64>,
    pub heart_rate: Option<f64>,
    pub spo2: Option<f64>,
}

impl Sample {
    pub fn new(temperature: f64, humidity: f64, heart_rate: f64, spo2: f64) -> Self {
        Self {
            temperature: Some(temperature),
            humidity: Some(humidity),
            heart_rate: Some(heart_rate),
            spo2: Some(spo2),
        }
    }

    pub fn get(&self, field: SensorField) -> Option<f64> {
        match field {
            SensorField::Temperature => self.temperature,
            SensorField::Humidity => self.humidity,
            SensorField::HeartRate => self.heart_rate,
            SensorField::Spo2 => self.spo2,
        }
    }

    fn slot(&mut self, field: SensorField) -> &mut Option<f64> {
        match field {
            SensorField::Temperature => &mut self.temperature,
            SensorField::Humidity => &mut self.humidity,
            SensorField::HeartRate => &mut self.heart_rate,
            SensorField::Spo2 => &mut self.spo2,
        }
    }

    /// Present readings in protocol order
    pub fn present(&self) -> impl Iterator<Item = (SensorField, f64)> + '_ {
        SensorField::ALL
            .into_iter()
            .filter_map(move |field| self.get(field).map(|v| (field, v)))
    }

    pub fn missing(&self) -> Vec<SensorField> {
        SensorField::ALL
            .into_iter()
            .filter(|&field| self.get(field).is_none())
            .collect()
    }

    /// True when no field was decoded ("no usable data this cycle")
    pub fn is_empty(&self) -> bool {
        self.present().next().is_none()
    }

    pub fn is_complete(&self) -> bool {
        SensorField::ALL.iter().all(|&field| self.get(field).is_some())
    }
}

/// A token that could not be used
#[derive(Debug, Clone, PartialEq)]
pub enum TokenError {
    /// Token without `:`
    MissingSeparator(String),
    /// Key not recognised by this protocol version (ignored)
    UnknownKey(String),
    /// Recognised key whose value is not a finite decimal number
    InvalidNumber { key: String, value: String },
}

impl TokenError {
    /// Unknown keys are expected from newer firmware and are not counted as rejections
    pub fn is_rejection(&self) -> bool {
        !matches!(self, Self::UnknownKey(_))
    }
}

impl fmt::Display for TokenError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingSeparator(token) => write!(f, "token without separator: {:?}", token),
            Self::UnknownKey(key) => write!(f, "unknown key: {:?}", key),
            Self::InvalidNumber { key, value } => {
                write!(f, "invalid number for {}: {:?}", key, value)
            }
        }
    }
}

impl std::error::Error for TokenError {}

/// Decoded response plus any tokens that were skipped
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DecodedFrame {
    pub sample: Sample,
    pub skipped: Vec<TokenError>,
}

impl DecodedFrame {
    /// Number of malformed tokens (unknown keys excluded)
    pub fn rejected(&self) -> usize {
        self.skipped.iter().filter(|e| e.is_rejection()).count()
    }
}

/// Encode the poll command as sent on the wire
pub fn encode_request(command: &str) -> Vec<u8> {
    let command = command.trim_end_matches(['\r', '\n']);
    let mut buf = Vec::with_capacity(command.len() + 1);
    buf.extend_from_slice(command.as_bytes());
    buf.push(b'\n');
    buf
}

/// Decode a raw response into a sample
pub fn decode(raw: &[u8]) -> Sample {
    decode_frame(raw).sample
}

/// Decode a raw response, keeping track of skipped tokens
pub fn decode_frame(raw: &[u8]) -> DecodedFrame {
    let text = String::from_utf8_lossy(raw);
    text.split('\n')
        .map(|line| line.trim_end_matches('\r'))
        .find(|line| line.contains(RECORD_MARKER))
        .map(decode_line)
        .unwrap_or_default()
}

/// Decode a single `KEY:VALUE|KEY:VALUE` line
pub fn decode_line(line: &str) -> DecodedFrame {
    let mut frame = DecodedFrame::default();

    for token in line.trim().split(FIELD_DELIMITER) {
        let token = token.trim();
        if token.is_empty() {
            continue;
        }

        let Some((key, value)) = token.split_once(KEY_VALUE_SEPARATOR) else {
            frame.skipped.push(TokenError::MissingSeparator(token.to_string()));
            continue;
        };
        let (key, value) = (key.trim(), value.trim());

        let Some(field) = SensorField::from_wire_key(key) else {
            frame.skipped.push(TokenError::UnknownKey(key.to_string()));
            continue;
        };

        match value.parse::<f64>() {
            Ok(v) if v.is_finite() => *frame.sample.slot(field) = Some(v),
            _ => frame.skipped.push(TokenError::InvalidNumber {
                key: key.to_string(),
                value: value.to_string(),
            }),
        }
    }

    frame
}

/// Encode a sample as a response line (used by the emulator)
pub fn encode_sample(sample: &Sample) -> String {
    let mut line = sample
        .present()
        .map(|(field, value)| format!("{}:{:.1}", field.wire_key(), value))
        .collect::<Vec<_>>()
        .join("|");
    line.push('\n');
    line
}
