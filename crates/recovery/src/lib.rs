//! # IronLoop Recovery
//!
//! Fault tolerance for the agent loop. A [`RecoveryManager`] holds an
//! ordered registry of strategies, picks the first one that accepts a
//! failure, runs it under a timeout and cancellation token, optionally
//! validates the outcome against resource thresholds, and records metrics.
//!
//! Strategies never touch the failing component directly. They drive the
//! [`RecoveryHandler`](ironloop_core::RecoveryHandler) the error exposes.

pub mod condition;
pub mod context;
pub mod manager;
pub mod metrics;
pub mod monitor;
pub mod strategy;
pub mod validation;

pub use condition::{Comparison, Condition, Metric};
pub use context::{RecoveryContext, RecoveryPhase, RecoveryResult, StrategyOutcome};
pub use manager::{RecoveryManager, StrategyPredicate};
pub use metrics::{MetricsTracker, RecordedRun, RecoveryMetrics, StrategyMetrics, WindowStats};
pub use monitor::{FixedResourceMonitor, PerformanceSnapshot, ResourceMonitor, ResourceUsage, SystemResourceMonitor};
pub use strategy::{
    AgentStrategy, CircuitBreakerStrategy, CircuitSnapshot, CircuitState, DegradationLevel,
    GracefulDegradationStrategy, RecoveryStrategy, RetryStrategy,
};
pub use validation::{ValidationCheck, ValidationReport};
