//! Resource predicates used by degradation levels and reassignment rules.
//!
//! Syntax is `METRIC OP NUMBER`, e.g. `CPU_USAGE > 0.9` or
//! `MEMORY_USAGE >= 768`. The literal `ALWAYS` matches unconditionally.

use ironloop_core::RecoveryError;
use std::fmt;
use std::str::FromStr;

use crate::monitor::ResourceUsage;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Metric {
    /// Fraction 0.0–1.0
    CpuUsage,
    /// Megabytes
    MemoryUsage,
    /// MB/s
    DiskIo,
    /// Milliseconds
    NetworkLatency,
}

impl Metric {
    fn read(self, usage: &ResourceUsage) -> f64 {
        match self {
            Self::CpuUsage => usage.cpu,
            Self::MemoryUsage => usage.memory_mb,
            Self::DiskIo => usage.disk_io_mbps,
            Self::NetworkLatency => usage.network_latency_ms,
        }
    }

    fn as_str(self) -> &'static str {
        match self {
            Self::CpuUsage => "CPU_USAGE",
            Self::MemoryUsage => "MEMORY_USAGE",
            Self::DiskIo => "DISK_IO",
            Self::NetworkLatency => "NETWORK_LATENCY",
        }
    }
}

impl FromStr for Metric {
    type Err = RecoveryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "CPU_USAGE" => Ok(Self::CpuUsage),
            "MEMORY_USAGE" => Ok(Self::MemoryUsage),
            "DISK_IO" => Ok(Self::DiskIo),
            "NETWORK_LATENCY" => Ok(Self::NetworkLatency),
            other => Err(RecoveryError::InvalidCondition(format!("unknown metric '{other}'"))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparison {
    Gt,
    Ge,
    Lt,
    Le,
    Eq,
}

impl Comparison {
    // Two-character operators first so `>=` is not read as `>`.
    const TOKENS: [(&'static str, Comparison); 5] = [
        (">=", Comparison::Ge),
        ("<=", Comparison::Le),
        ("==", Comparison::Eq),
        (">", Comparison::Gt),
        ("<", Comparison::Lt),
    ];

    fn apply(self, left: f64, right: f64) -> bool {
        match self {
            Self::Gt => left > right,
            Self::Ge => left >= right,
            Self::Lt => left < right,
            Self::Le => left <= right,
            Self::Eq => (left - right).abs() < f64::EPSILON,
        }
    }

    fn as_str(self) -> &'static str {
        match self {
            Self::Gt => ">",
            Self::Ge => ">=",
            Self::Lt => "<",
            Self::Le => "<=",
            Self::Eq => "==",
        }
    }
}

/// A parsed resource predicate.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Condition {
    Always,
    Compare {
        metric: Metric,
        op: Comparison,
        value: f64,
    },
}

impl Condition {
    pub fn holds(&self, usage: &ResourceUsage) -> bool {
        match self {
            Self::Always => true,
            Self::Compare { metric, op, value } => op.apply(metric.read(usage), *value),
        }
    }

    /// Parse every condition, failing on the first malformed one.
    pub fn parse_all(raw: &[String]) -> Result<Vec<Self>, RecoveryError> {
        raw.iter().map(|c| c.parse()).collect()
    }
}

impl FromStr for Condition {
    type Err = RecoveryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.eq_ignore_ascii_case("ALWAYS") {
            return Ok(Self::Always);
        }

        let (pos, token, op) = Comparison::TOKENS
            .iter()
            .find_map(|(token, op)| s.find(token).map(|pos| (pos, *token, *op)))
            .ok_or_else(|| RecoveryError::InvalidCondition(format!("no comparison in '{s}'")))?;

        let metric: Metric = s[..pos].trim().parse()?;
        let raw_value = s[pos + token.len()..].trim();
        let value: f64 = raw_value.parse().map_err(|_| {
            RecoveryError::InvalidCondition(format!("'{raw_value}' is not a number in '{s}'"))
        })?;

        Ok(Self::Compare { metric, op, value })
    }
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Always => f.write_str("ALWAYS"),
            Self::Compare { metric, op, value } => {
                write!(f, "{} {} {}", metric.as_str(), op.as_str(), value)
            }
        }
    }
}
