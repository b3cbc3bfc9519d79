//! Resource and performance sampling.
//!
//! The manager snapshots resource usage when it builds a recovery context;
//! degradation levels, reassignment rules and post-recovery validation all
//! read that snapshot.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::time::Instant;
use sysinfo::{Pid, ProcessesToUpdate, System};

/// Point-in-time resource usage.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceUsage {
    /// CPU usage as a fraction (0.0–1.0)
    pub cpu: f64,
    pub memory_mb: f64,
    pub disk_io_mbps: f64,
    pub network_latency_ms: f64,
}

/// How the system has been performing recently.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PerformanceSnapshot {
    pub success_rate: f64,
    pub error_rate: f64,
    pub latency_ms: f64,
    /// Operations per second
    pub throughput: f64,
}

impl PerformanceSnapshot {
    /// A snapshot that passes every default threshold.
    pub fn nominal() -> Self {
        Self {
            success_rate: 1.0,
            error_rate: 0.0,
            latency_ms: 0.0,
            throughput: 100.0,
        }
    }
}

impl Default for PerformanceSnapshot {
    fn default() -> Self {
        Self::nominal()
    }
}

/// Source of resource and performance readings.
pub trait ResourceMonitor: Send + Sync {
    fn resource_usage(&self) -> ResourceUsage;

    /// Hosts without a performance feed report nominal figures.
    fn performance(&self) -> PerformanceSnapshot {
        PerformanceSnapshot::nominal()
    }
}

/// Samples the current process through `sysinfo`.
///
/// CPU is the global figure; memory and disk IO belong to this process.
/// Network latency is not sampled and reads as zero.
pub struct SystemResourceMonitor {
    state: Mutex<SamplerState>,
}

struct SamplerState {
    system: System,
    pid: Option<Pid>,
    last_sample: Instant,
}

impl SystemResourceMonitor {
    pub fn new() -> Self {
        let mut system = System::new();
        system.refresh_cpu_usage();
        system.refresh_memory();
        Self {
            state: Mutex::new(SamplerState {
                system,
                pid: sysinfo::get_current_pid().ok(),
                last_sample: Instant::now(),
            }),
        }
    }
}

impl Default for SystemResourceMonitor {
    fn default() -> Self {
        Self::new()
    }
}

impl ResourceMonitor for SystemResourceMonitor {
    fn resource_usage(&self) -> ResourceUsage {
        let mut state = self.state.lock();
        let elapsed = state.last_sample.elapsed().as_secs_f64().max(f64::EPSILON);
        state.last_sample = Instant::now();

        state.system.refresh_cpu_usage();
        state.system.refresh_memory();

        let cpu = f64::from(state.system.global_cpu_usage()) / 100.0;
        let mut usage = ResourceUsage {
            cpu: cpu.clamp(0.0, 1.0),
            memory_mb: state.system.used_memory() as f64 / (1024.0 * 1024.0),
            ..ResourceUsage::default()
        };

        if let Some(pid) = state.pid {
            state.system.refresh_processes(ProcessesToUpdate::Some(&[pid]), true);
            if let Some(process) = state.system.process(pid) {
                let disk = process.disk_usage();
                usage.memory_mb = process.memory() as f64 / (1024.0 * 1024.0);
                usage.disk_io_mbps =
                    (disk.read_bytes + disk.written_bytes) as f64 / (1024.0 * 1024.0) / elapsed;
            }
        }

        usage
    }
}

/// Returns fixed readings. Used by tests and by hosts that sample elsewhere.
#[derive(Debug, Clone, Copy, Default)]
pub struct FixedResourceMonitor {
    pub usage: ResourceUsage,
    pub performance: PerformanceSnapshot,
}

impl FixedResourceMonitor {
    pub fn new(usage: ResourceUsage) -> Self {
        Self {
            usage,
            performance: PerformanceSnapshot::nominal(),
        }
    }

    pub fn with_performance(mut self, performance: PerformanceSnapshot) -> Self {
        self.performance = performance;
        self
    }
}

impl ResourceMonitor for FixedResourceMonitor {
    fn resource_usage(&self) -> ResourceUsage {
        self.usage
    }

    fn performance(&self) -> PerformanceSnapshot {
        self.performance
    }
}
