// src/models.rs
use std::fmt;
use std::str::FromStr;

use alloy::primitives::Address;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Error;

/// Aggregation window of a relation / bundle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Window {
    #[serde(rename = "1d")]
    Day,
    #[serde(rename = "7d")]
    Week,
    #[serde(rename = "30d")]
    Month,
}

impl Window {
    pub const ALL: [Window; 3] = [Window::Day, Window::Week, Window::Month];

    pub fn as_str(&self) -> &'static str {
        match self {
            Window::Day => "1d",
            Window::Week => "7d",
            Window::Month => "30d",
        }
    }

    pub fn days(&self) -> u32 {
        match self {
            Window::Day => 1,
            Window::Week => 7,
            Window::Month => 30,
        }
    }
}

impl fmt::Display for Window {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Window {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "1d" => Ok(Window::Day),
            "7d" => Ok(Window::Week),
            "30d" => Ok(Window::Month),
            other => Err(Error::InvalidWindow(other.to_string())),
        }
    }
}

/// Behavioral archetype of a corridor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BundleType {
    Accumulation,
    Distribution,
    Flow,
    Wash,
    Rotation,
    Unknown,
}

impl BundleType {
    pub fn as_str(&self) -> &'static str {
        match self {
            BundleType::Accumulation => "accumulation",
            BundleType::Distribution => "distribution",
            BundleType::Flow => "flow",
            BundleType::Wash => "wash",
            BundleType::Rotation => "rotation",
            BundleType::Unknown => "unknown",
        }
    }
}

impl fmt::Display for BundleType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BundleType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "accumulation" => Ok(BundleType::Accumulation),
            "distribution" => Ok(BundleType::Distribution),
            "flow" => Ok(BundleType::Flow),
            "wash" => Ok(BundleType::Wash),
            "rotation" => Ok(BundleType::Rotation),
            "unknown" => Ok(BundleType::Unknown),
            other => Err(format!("unknown bundle type: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalType {
    NewCorridor,
    AccumulationStart,
    AccumulationEnd,
    DistributionStart,
    DistributionEnd,
    BundleChange,
    IntensitySpike,
    IntensityDrop,
    WashDetected,
    WashCleared,
    RotationShift,
    CorridorDormant,
}

impl SignalType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SignalType::NewCorridor => "new_corridor",
            SignalType::AccumulationStart => "accumulation_start",
            SignalType::AccumulationEnd => "accumulation_end",
            SignalType::DistributionStart => "distribution_start",
            SignalType::DistributionEnd => "distribution_end",
            SignalType::BundleChange => "bundle_change",
            SignalType::IntensitySpike => "intensity_spike",
            SignalType::IntensityDrop => "intensity_drop",
            SignalType::WashDetected => "wash_detected",
            SignalType::WashCleared => "wash_cleared",
            SignalType::RotationShift => "rotation_shift",
            SignalType::CorridorDormant => "corridor_dormant",
        }
    }
}

impl fmt::Display for SignalType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SignalType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parsed = match s {
            "new_corridor" => SignalType::NewCorridor,
            "accumulation_start" => SignalType::AccumulationStart,
            "accumulation_end" => SignalType::AccumulationEnd,
            "distribution_start" => SignalType::DistributionStart,
            "distribution_end" => SignalType::DistributionEnd,
            "bundle_change" => SignalType::BundleChange,
            "intensity_spike" => SignalType::IntensitySpike,
            "intensity_drop" => SignalType::IntensityDrop,
            "wash_detected" => SignalType::WashDetected,
            "wash_cleared" => SignalType::WashCleared,
            "rotation_shift" => SignalType::RotationShift,
            "corridor_dormant" => SignalType::CorridorDormant,
            other => return Err(format!("unknown signal type: {other}")),
        };
        Ok(parsed)
    }
}

/// Sign label of a bundle's netflow, seen from the `from` address
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NetflowDirection {
    Forward,
    Reverse,
    Balanced,
}

impl NetflowDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            NetflowDirection::Forward => "forward",
            NetflowDirection::Reverse => "reverse",
            NetflowDirection::Balanced => "balanced",
        }
    }
}

impl FromStr for NetflowDirection {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "forward" => Ok(NetflowDirection::Forward),
            "reverse" => Ok(NetflowDirection::Reverse),
            "balanced" => Ok(NetflowDirection::Balanced),
            other => Err(format!("unknown netflow direction: {other}")),
        }
    }
}

/// Pre-computed directed edge between two addresses (read-only input)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelationAggregate {
    pub from: String,
    pub to: String,
    pub window: Window,
    pub interaction_count: u64,
    pub volume_raw: String, // exact integer, never parsed as float
    pub density_score: f64,
    pub first_seen_at: DateTime<Utc>,
    pub last_seen_at: DateTime<Utc>,
}

/// Latest classification of a directed corridor in one window
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Bundle {
    pub from: String,
    pub to: String,
    pub window: Window,
    pub bundle_type: BundleType,
    pub confidence: f64,
    pub interaction_count: u64,
    pub density_score: f64,
    pub netflow_raw: String,
    pub netflow_direction: NetflowDirection,
    pub intensity_score: f64,
    pub consistency_score: f64,
    pub first_seen_at: DateTime<Utc>,
    pub last_seen_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Bundle {
    pub fn entity_id(&self) -> String {
        format!("{}:{}", self.from, self.to)
    }

    pub fn corridor_key(&self) -> String {
        format!("{}:{}:{}", self.from, self.to, self.window)
    }
}

/// Everything needed to persist a new signal
#[derive(Debug, Clone, Serialize)]
pub struct SignalInput {
    pub entity_type: String,
    pub entity_id: String,
    pub signal_type: SignalType,
    pub window: Window,
    pub prev_bundle_type: Option<BundleType>,
    pub new_bundle_type: Option<BundleType>,
    pub prev_intensity: Option<f64>,
    pub new_intensity: Option<f64>,
    pub confidence: f64,
    pub related_addresses: Vec<String>,
    pub created_at: DateTime<Utc>,
}

/// Persisted, append-only change event
#[derive(Debug, Clone, Serialize)]
pub struct Signal {
    pub id: i64,
    pub entity_type: String,
    pub entity_id: String,
    pub signal_type: SignalType,
    pub window: Window,
    pub prev_bundle_type: Option<BundleType>,
    pub new_bundle_type: Option<BundleType>,
    pub prev_intensity: Option<f64>,
    pub new_intensity: Option<f64>,
    pub confidence: f64,
    pub related_addresses: Vec<String>,
    pub status: String,
    pub created_at: DateTime<Utc>,
}

/// Lowercase an address; EVM hex addresses go through `Address` so padding and
/// checksum casing are normalised.
pub fn normalize_address(raw: &str) -> String {
    let trimmed = raw.trim();
    match trimmed.parse::<Address>() {
        Ok(addr) => addr.to_string().to_lowercase(),
        Err(_) => trimmed.to_lowercase(),
    }
}

/// Timestamps are stored as fixed-width RFC3339 so SQL string comparison orders them.
pub fn fmt_ts(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub fn parse_ts(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_window_parse() {
        assert_eq!("7d".parse::<Window>().unwrap(), Window::Week);
        assert_eq!(" 30D ".parse::<Window>().unwrap(), Window::Month);
        assert!("2h".parse::<Window>().is_err());
    }

    #[test]
    fn test_signal_type_names_parse_back() {
        for name in ["new_corridor", "wash_cleared", "corridor_dormant"] {
            let parsed: SignalType = name.parse().unwrap();
            assert_eq!(parsed.as_str(), name);
        }
    }

    #[test]
    fn test_normalize_address() {
        assert_eq!(
            normalize_address("0x65E64963F9C5a663e7d7E986De45A9D8324aC0CE"),
            "0x65e64963f9c5a663e7d7e986de45a9d8324ac0ce"
        );
        assert_eq!(normalize_address(" SomeSolanaKey "), "somesolanakey");
    }

    #[test]
    fn test_timestamps_sort_as_strings() {
        let a = Utc.with_ymd_and_hms(2024, 1, 9, 23, 0, 0).unwrap();
        let b = Utc.with_ymd_and_hms(2024, 1, 10, 1, 0, 0).unwrap();
        assert!(fmt_ts(&a) < fmt_ts(&b));
        assert_eq!(parse_ts(&fmt_ts(&a)), Some(a));
    }
}
