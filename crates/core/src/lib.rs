//! # IronLoop Core
//!
//! Domain types, traits, and error definitions shared by the agent loop and
//! the recovery subsystem. This crate has **no runtime logic of its own**:
//! it defines the seams (language model, tools, output parser, telemetry,
//! recovery handler) that the other crates implement against.
//!
//! ## Design Philosophy
//!
//! Every collaborator is a trait here. Implementations live in their
//! respective crates or in the host. This enables:
//! - Swapping implementations via configuration
//! - Easy testing with scripted stand-ins
//! - Clean dependency graph (all crates depend inward on core)

pub mod agent;
pub mod error;
pub mod event;
pub mod message;
pub mod parsed;
pub mod provider;
pub mod recoverable;
pub mod tool;

// Re-export key types at crate root for ergonomics
pub use agent::{AgentProfile, Task, TaskStatus};
pub use error::{Error, ProviderError, RecoveryError, Result, ToolError};
pub use event::{DomainEvent, EventBus, EventLevel, FanoutSink, TelemetrySink, TracingSink};
pub use message::{Conversation, ConversationId, Message, Role};
pub use parsed::{OutputParser, ParsedOutput};
pub use provider::{Provider, ProviderRequest, ProviderResponse, StreamChunk, Usage};
pub use recoverable::{
    AgentFailure, ErrorContext, ErrorKind, HandlerOutcome, Operation, Recoverable,
    RecoveryHandler, Severity, StrategyKind,
};
pub use tool::{Tool, ToolDefinition, ToolRegistry};
