//! Exit-node observations and raw-field overrides.
//!
//! An [`Observation`] is only ever built through validation, so every
//! downstream stage can rely on its domain invariants.

use std::collections::BTreeMap;
use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Result, TorsightError};

/// Raw observation payload as received from a caller.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ObservationInput {
    pub exit_ip: Option<String>,
    pub exit_country: Option<String>,
    pub bandwidth: Option<f64>,
    pub circuit_setup_duration: Option<f64>,
    pub total_bytes: Option<i64>,
    #[serde(default)]
    pub timestamp: Option<String>,
}

/// A validated, immutable exit-node observation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Observation {
    exit_ip: IpAddr,
    country: String,
    bandwidth: f64,
    setup_duration: f64,
    total_bytes: u64,
    timestamp: Option<DateTime<Utc>>,
}

impl Observation {
    pub fn new(
        exit_ip: &str,
        country: &str,
        bandwidth: f64,
        setup_duration: f64,
        total_bytes: u64,
        timestamp: Option<DateTime<Utc>>,
    ) -> Result<Self> {
        Ok(Self {
            exit_ip: parse_ip(exit_ip)?,
            country: parse_country(country)?,
            bandwidth: positive(RawField::Bandwidth, bandwidth)?,
            setup_duration: positive(RawField::SetupDuration, setup_duration)?,
            total_bytes,
            timestamp,
        })
    }

    pub fn from_input(input: &ObservationInput) -> Result<Self> {
        let exit_ip = required(RawField::ExitIp, input.exit_ip.as_deref())?;
        let country = required(RawField::ExitCountry, input.exit_country.as_deref())?;
        let bandwidth = required(RawField::Bandwidth, input.bandwidth)?;
        let setup = required(RawField::SetupDuration, input.circuit_setup_duration)?;
        let total_bytes = required(RawField::TotalBytes, input.total_bytes)?;
        if total_bytes < 0 {
            return Err(TorsightError::invalid_observation(
                RawField::TotalBytes.name(),
                format!("must be >= 0, got {total_bytes}"),
            ));
        }
        let timestamp = input
            .timestamp
            .as_deref()
            .map(parse_timestamp)
            .transpose()?;

        Self::new(exit_ip, country, bandwidth, setup, total_bytes as u64, timestamp)
    }

    pub fn exit_ip(&self) -> IpAddr {
        self.exit_ip
    }

    /// Upper-cased ISO 3166 alpha-2 code.
    pub fn country(&self) -> &str {
        &self.country
    }

    pub fn bandwidth(&self) -> f64 {
        self.bandwidth
    }

    pub fn setup_duration(&self) -> f64 {
        self.setup_duration
    }

    pub fn total_bytes(&self) -> u64 {
        self.total_bytes
    }

    pub fn timestamp(&self) -> Option<DateTime<Utc>> {
        self.timestamp
    }

    /// Numeric value of a raw field, if the field is numeric.
    pub fn numeric(&self, field: RawField) -> Option<f64> {
        match field {
            RawField::Bandwidth => Some(self.bandwidth),
            RawField::SetupDuration => Some(self.setup_duration),
            RawField::TotalBytes => Some(self.total_bytes as f64),
            _ => None,
        }
    }

    /// Current value of a raw field in its wire representation.
    pub fn value_of(&self, field: RawField) -> serde_json::Value {
        match field {
            RawField::ExitIp => serde_json::Value::from(self.exit_ip.to_string()),
            RawField::ExitCountry => serde_json::Value::from(self.country.clone()),
            RawField::Bandwidth => serde_json::Value::from(self.bandwidth),
            RawField::SetupDuration => serde_json::Value::from(self.setup_duration),
            RawField::TotalBytes => serde_json::Value::from(self.total_bytes),
            RawField::Timestamp => self
                .timestamp
                .map(|t| serde_json::Value::from(t.to_rfc3339()))
                .unwrap_or(serde_json::Value::Null),
        }
    }

    /// Copy of this observation with one numeric raw field replaced.
    pub fn with_numeric(&self, field: RawField, value: f64) -> Result<Self> {
        let mut next = self.clone();
        match field {
            RawField::Bandwidth => next.bandwidth = positive(field, value)?,
            RawField::SetupDuration => next.setup_duration = positive(field, value)?,
            RawField::TotalBytes => {
                let rounded = value.round();
                // u64::MAX as f64 rounds up to 2^64, which is already out of range
                if !value.is_finite() || value < 0.0 || rounded >= u64::MAX as f64 {
                    return Err(TorsightError::invalid_observation(
                        field.name(),
                        format!("must be a finite value in 0..2^64, got {value}"),
                    ));
                }
                next.total_bytes = rounded as u64;
            }
            _ => {
                return Err(TorsightError::invalid_observation(
                    field.name(),
                    "field is not numeric",
                ))
            }
        }
        Ok(next)
    }

    /// Copy of this observation with every override applied.
    ///
    /// Domain violations are reported as `InvalidOverride` naming the field.
    pub fn with_overrides(&self, overrides: &ObservationOverrides) -> Result<Self> {
        let mut next = self.clone();
        for (field, value) in overrides.iter() {
            next.apply(*field, value).map_err(|e| match e {
                TorsightError::InvalidObservation { field, reason } => {
                    TorsightError::InvalidOverride { field, reason }
                }
                other => other,
            })?;
        }
        Ok(next)
    }

    fn apply(&mut self, field: RawField, value: &serde_json::Value) -> Result<()> {
        let wrong_type = |expected: &str| {
            TorsightError::invalid_observation(field.name(), format!("expected {expected}, got {value}"))
        };
        match field {
            RawField::ExitIp => {
                let s = value.as_str().ok_or_else(|| wrong_type("a string"))?;
                self.exit_ip = parse_ip(s)?;
            }
            RawField::ExitCountry => {
                let s = value.as_str().ok_or_else(|| wrong_type("a string"))?;
                self.country = parse_country(s)?;
            }
            RawField::Bandwidth | RawField::SetupDuration => {
                let v = value.as_f64().ok_or_else(|| wrong_type("a number"))?;
                *self = self.with_numeric(field, v)?;
            }
            RawField::TotalBytes => {
                let v = value.as_f64().ok_or_else(|| wrong_type("a number"))?;
                if v.fract() != 0.0 {
                    return Err(wrong_type("an integer"));
                }
                *self = self.with_numeric(field, v)?;
            }
            RawField::Timestamp => {
                self.timestamp = match value {
                    serde_json::Value::Null => None,
                    serde_json::Value::String(s) => Some(parse_timestamp(s)?),
                    _ => return Err(wrong_type("an RFC 3339 string or null")),
                };
            }
        }
        Ok(())
    }
}

/// The raw observation fields a caller may override.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RawField {
    ExitIp,
    ExitCountry,
    Bandwidth,
    #[serde(rename = "circuit_setup_duration")]
    SetupDuration,
    TotalBytes,
    Timestamp,
}

impl RawField {
    pub const ALL: [RawField; 6] = [
        RawField::ExitIp,
        RawField::ExitCountry,
        RawField::Bandwidth,
        RawField::SetupDuration,
        RawField::TotalBytes,
        RawField::Timestamp,
    ];

    /// Fields that sensitivity analysis perturbs by a relative step.
    pub const NUMERIC: [RawField; 3] = [
        RawField::Bandwidth,
        RawField::SetupDuration,
        RawField::TotalBytes,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            RawField::ExitIp => "exit_ip",
            RawField::ExitCountry => "exit_country",
            RawField::Bandwidth => "bandwidth",
            RawField::SetupDuration => "circuit_setup_duration",
            RawField::TotalBytes => "total_bytes",
            RawField::Timestamp => "timestamp",
        }
    }

    pub fn is_numeric(&self) -> bool {
        Self::NUMERIC.contains(self)
    }
}

impl fmt::Display for RawField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for RawField {
    type Err = TorsightError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "exit_ip" => Ok(RawField::ExitIp),
            "exit_country" | "country" => Ok(RawField::ExitCountry),
            "bandwidth" => Ok(RawField::Bandwidth),
            "circuit_setup_duration" | "setup_duration" => Ok(RawField::SetupDuration),
            "total_bytes" => Ok(RawField::TotalBytes),
            "timestamp" => Ok(RawField::Timestamp),
            other => Err(TorsightError::invalid_override(
                other,
                "not a raw observation field",
            )),
        }
    }
}

/// Sparse set of raw-field replacements, ordered by field.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ObservationOverrides {
    values: BTreeMap<RawField, serde_json::Value>,
}

impl ObservationOverrides {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a caller-supplied map, rejecting keys that are not raw fields
    /// and keys that name a field already set under another alias.
    pub fn from_map<'a, I>(entries: I) -> Result<Self>
    where
        I: IntoIterator<Item = (&'a String, &'a serde_json::Value)>,
    {
        let mut values = BTreeMap::new();
        for (key, value) in entries {
            let field: RawField = key.parse()?;
            if values.insert(field, value.clone()).is_some() {
                return Err(TorsightError::invalid_override(
                    field.name(),
                    format!("`{key}` overrides a field that is already set"),
                ));
            }
        }
        Ok(Self { values })
    }

    pub fn with(mut self, field: RawField, value: impl Into<serde_json::Value>) -> Self {
        self.values.insert(field, value.into());
        self
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn fields(&self) -> impl Iterator<Item = RawField> + '_ {
        self.values.keys().copied()
    }

    pub fn get(&self, field: RawField) -> Option<&serde_json::Value> {
        self.values.get(&field)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&RawField, &serde_json::Value)> {
        self.values.iter()
    }

    /// Overrides containing only `field`.
    pub fn only(&self, field: RawField) -> Self {
        let values = self
            .values
            .get(&field)
            .map(|v| BTreeMap::from([(field, v.clone())]))
            .unwrap_or_default();
        Self { values }
    }
}

fn required<T>(field: RawField, value: Option<T>) -> Result<T> {
    value.ok_or_else(|| TorsightError::invalid_observation(field.name(), "required field is missing"))
}

fn parse_ip(raw: &str) -> Result<IpAddr> {
    raw.trim().parse::<IpAddr>().map_err(|_| {
        TorsightError::invalid_observation(
            RawField::ExitIp.name(),
            format!("`{raw}` is not a valid IPv4 or IPv6 address"),
        )
    })
}

/// Validates the ISO 3166 alpha-2 *shape*; membership in the reference
/// table is decided later and falls back to the unknown-country encoding.
pub fn parse_country(raw: &str) -> Result<String> {
    let code = raw.trim();
    if code.len() != 2 || !code.chars().all(|c| c.is_ascii_alphabetic()) {
        return Err(TorsightError::invalid_observation(
            RawField::ExitCountry.name(),
            format!("`{raw}` is not an ISO 3166 alpha-2 code"),
        ));
    }
    Ok(code.to_ascii_uppercase())
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw.trim())
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| {
            TorsightError::invalid_observation(
                RawField::Timestamp.name(),
                format!("`{raw}` is not RFC 3339: {e}"),
            )
        })
}

fn positive(field: RawField, value: f64) -> Result<f64> {
    if value.is_finite() && value > 0.0 {
        Ok(value)
    } else {
        Err(TorsightError::invalid_observation(
            field.name(),
            format!("must be a finite value > 0, got {value}"),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Observation {
        Observation::new("45.33.32.156", "de", 7.5, 2.0, 500_000, None).unwrap()
    }

    #[test]
    fn test_country_is_upper_cased() {
        assert_eq!(sample().country(), "DE");
    }

    #[test]
    fn test_negative_bandwidth_rejected() {
        let err = Observation::new("45.33.32.156", "DE", -1.0, 2.0, 1, None).unwrap_err();
        assert_eq!(err.field(), Some("bandwidth"));
    }

    #[test]
    fn test_malformed_ip_rejected() {
        let err = Observation::new("999.1.1.1", "DE", 1.0, 2.0, 1, None).unwrap_err();
        assert_eq!(err.kind(), "invalid_observation");
        assert_eq!(err.field(), Some("exit_ip"));
    }

    #[test]
    fn test_ipv6_accepted() {
        assert!(Observation::new("2001:db8::1", "NL", 1.0, 1.0, 0, None).is_ok());
    }

    #[test]
    fn test_malformed_country_rejected() {
        assert!(Observation::new("1.2.3.4", "DEU", 1.0, 1.0, 0, None).is_err());
        assert!(Observation::new("1.2.3.4", "1X", 1.0, 1.0, 0, None).is_err());
    }

    #[test]
    fn test_from_input_missing_field() {
        let input = ObservationInput {
            exit_ip: Some("1.2.3.4".into()),
            exit_country: Some("DE".into()),
            bandwidth: None,
            circuit_setup_duration: Some(2.0),
            total_bytes: Some(10),
            timestamp: None,
        };
        let err = Observation::from_input(&input).unwrap_err();
        assert_eq!(err.field(), Some("bandwidth"));
    }

    #[test]
    fn test_from_input_negative_bytes() {
        let input = ObservationInput {
            exit_ip: Some("1.2.3.4".into()),
            exit_country: Some("DE".into()),
            bandwidth: Some(1.0),
            circuit_setup_duration: Some(2.0),
            total_bytes: Some(-5),
            timestamp: Some("2025-01-04T10:00:00Z".into()),
        };
        let err = Observation::from_input(&input).unwrap_err();
        assert_eq!(err.field(), Some("total_bytes"));
    }

    #[test]
    fn test_overrides_replace_only_named_fields() {
        let obs = sample();
        let overrides = ObservationOverrides::new()
            .with(RawField::Bandwidth, 10.0)
            .with(RawField::ExitCountry, "us");
        let next = obs.with_overrides(&overrides).unwrap();
        assert_eq!(next.bandwidth(), 10.0);
        assert_eq!(next.country(), "US");
        assert_eq!(next.setup_duration(), obs.setup_duration());
        assert_eq!(next.total_bytes(), obs.total_bytes());
        assert_eq!(next.exit_ip(), obs.exit_ip());
    }

    #[test]
    fn test_override_domain_violation_is_invalid_override() {
        let overrides = ObservationOverrides::new().with(RawField::Bandwidth, 0.0);
        let err = sample().with_overrides(&overrides).unwrap_err();
        assert_eq!(err.kind(), "invalid_override");
        assert_eq!(err.field(), Some("bandwidth"));
    }

    #[test]
    fn test_override_wrong_type() {
        let overrides = ObservationOverrides::new().with(RawField::TotalBytes, "lots");
        let err = sample().with_overrides(&overrides).unwrap_err();
        assert_eq!(err.kind(), "invalid_override");
    }

    #[test]
    fn test_unknown_override_key() {
        let map = BTreeMap::from([("guard_bandwidth".to_string(), serde_json::json!(3.0))]);
        let err = ObservationOverrides::from_map(&map).unwrap_err();
        assert_eq!(err.kind(), "invalid_override");
        assert_eq!(err.field(), Some("guard_bandwidth"));
    }

    #[test]
    fn test_override_aliases() {
        let map = BTreeMap::from([
            ("country".to_string(), serde_json::json!("FR")),
            ("setup_duration".to_string(), serde_json::json!(3.5)),
        ]);
        let overrides = ObservationOverrides::from_map(&map).unwrap();
        assert_eq!(overrides.len(), 2);
        assert!(overrides.get(RawField::ExitCountry).is_some());
        assert!(overrides.get(RawField::SetupDuration).is_some());
    }

    #[test]
    fn test_override_alias_collision_rejected() {
        let map = BTreeMap::from([
            ("country".to_string(), serde_json::json!("FR")),
            ("exit_country".to_string(), serde_json::json!("US")),
        ]);
        let err = ObservationOverrides::from_map(&map).unwrap_err();
        assert_eq!(err.kind(), "invalid_override");
        assert_eq!(err.field(), Some("exit_country"));
    }

    #[test]
    fn test_total_bytes_beyond_u64_rejected() {
        let err = sample().with_numeric(RawField::TotalBytes, 1e20).unwrap_err();
        assert_eq!(err.kind(), "invalid_observation");
        assert_eq!(err.field(), Some("total_bytes"));
        assert!(sample().with_numeric(RawField::TotalBytes, 1e15).is_ok());

        let overrides = ObservationOverrides::new().with(RawField::TotalBytes, 3e19);
        let err = sample().with_overrides(&overrides).unwrap_err();
        assert_eq!(err.kind(), "invalid_override");
    }

    #[test]
    fn test_timestamp_override_and_clear() {
        let obs = sample();
        let set = ObservationOverrides::new().with(RawField::Timestamp, "2025-03-01T22:15:00Z");
        let with_ts = obs.with_overrides(&set).unwrap();
        assert!(with_ts.timestamp().is_some());

        let clear = ObservationOverrides::new().with(RawField::Timestamp, serde_json::Value::Null);
        assert!(with_ts.with_overrides(&clear).unwrap().timestamp().is_none());
    }

    #[test]
    fn test_only_keeps_single_field() {
        let overrides = ObservationOverrides::new()
            .with(RawField::Bandwidth, 3.0)
            .with(RawField::TotalBytes, 10);
        let only = overrides.only(RawField::TotalBytes);
        assert_eq!(only.len(), 1);
        assert!(only.get(RawField::Bandwidth).is_none());
    }
}
