//! # BerinIA Agent Runtime
//!
//! Multi-agent orchestration runtime for outbound lead-generation pipelines.
//!
//! The runtime coordinates a roster of LLM-driven agents: a registry that
//! lazily instantiates them from a static definition table, an Overseer
//! that is the single dispatch point (timeouts, error translation, status
//! tracking), a durable priority time-queue, conversational front doors
//! (MetaAgent and AdminInterpreter), a webhook ingress for inbound SMS and
//! WhatsApp traffic, knowledge retrieval for prompt enrichment, and a
//! multi-sink rotating logger.

pub mod admin;
pub mod agents;
pub mod cli;
pub mod error;
pub mod knowledge;
pub mod listener;
pub mod llm;
pub mod meta;
pub mod overseer;
pub mod scheduler;
pub mod server;
pub mod system;
pub mod utilities;

pub use admin::{AdminInterpreterAgent, DelegationRequest};
pub use agents::{Agent, AgentRegistry, AgentStatus};
pub use error::AgentError;
pub use knowledge::{KnowledgeChunk, KnowledgeStore};
pub use listener::{InboundEvent, ResponseListenerAgent};
pub use llm::{Complexity, LLMService};
pub use meta::MetaAgent;
pub use overseer::Overseer;
pub use scheduler::{ScheduledTask, Scheduler, TaskData, TaskExecutor};
pub use utilities::logger::RuntimeLogger;

/// Library version.
pub const VERSION: &str = "0.1.0";
