//! Post-recovery checks.
//!
//! A recovery that succeeded but left the process over a `High` severity
//! threshold is treated as failed.

use ironloop_config::ValidationThresholds;
use ironloop_core::Severity;
use serde::Serialize;
use std::time::Duration;

use crate::monitor::{PerformanceSnapshot, ResourceUsage};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ValidationCheck {
    pub name: &'static str,
    pub passed: bool,
    pub severity: Severity,
    pub observed: f64,
    pub limit: f64,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ValidationReport {
    pub checks: Vec<ValidationCheck>,
}

impl ValidationReport {
    /// Run every resource, performance and duration check.
    pub fn run(
        thresholds: &ValidationThresholds,
        usage: &ResourceUsage,
        performance: &PerformanceSnapshot,
        duration: Duration,
        timeout: Duration,
    ) -> Self {
        let mut report = Self::default();

        report.at_most("cpu", Severity::High, usage.cpu, thresholds.max_cpu);
        report.at_most("memory", Severity::High, usage.memory_mb, thresholds.max_memory_mb);
        report.at_most("disk_io", Severity::Medium, usage.disk_io_mbps, thresholds.max_disk_io_mbps);
        report.at_most(
            "network_latency",
            Severity::Medium,
            usage.network_latency_ms,
            thresholds.max_network_latency_ms,
        );

        report.at_least("success_rate", Severity::High, performance.success_rate, thresholds.min_success_rate);
        report.at_most("error_rate", Severity::High, performance.error_rate, thresholds.max_error_rate);
        report.at_most("latency", Severity::Medium, performance.latency_ms, thresholds.max_latency_ms);
        report.at_least("throughput", Severity::Low, performance.throughput, thresholds.min_throughput);

        report.at_most(
            "duration",
            Severity::High,
            duration.as_secs_f64() * 1000.0,
            timeout.as_secs_f64() * 1000.0,
        );

        report
    }

    fn at_most(&mut self, name: &'static str, severity: Severity, observed: f64, limit: f64) {
        self.checks.push(ValidationCheck {
            name,
            passed: observed <= limit,
            severity,
            observed,
            limit,
        });
    }

    fn at_least(&mut self, name: &'static str, severity: Severity, observed: f64, limit: f64) {
        self.checks.push(ValidationCheck {
            name,
            passed: observed >= limit,
            severity,
            observed,
            limit,
        });
    }

    /// False when any check of severity `High` or above failed.
    pub fn is_valid(&self) -> bool {
        !self.checks.iter().any(|c| !c.passed && c.severity >= Severity::High)
    }

    pub fn failures(&self) -> impl Iterator<Item = &ValidationCheck> {
        self.checks.iter().filter(|c| !c.passed)
    }
}
