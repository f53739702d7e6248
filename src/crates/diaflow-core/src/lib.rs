//! # diaflow-core - Diagram-Driven Workflow Execution
//!
//! A runtime that accepts a directed graph of typed nodes (LLM calls, code
//! runners, conditionals, file I/O, endpoints) and drives it to completion,
//! honoring dependency ordering, conditional branching, bounded iteration
//! loops, parallel execution of independent nodes, and streaming progress
//! events.
//!
//! ## Core Concepts
//!
//! - **Diagram**: the wire form, keyed maps of nodes and arrows plus person
//!   and api-key references ([`Diagram`]).
//! - **Graph**: the compiled form, typed nodes with adjacency and a
//!   cycle-tolerant topological order ([`Graph`]).
//! - **Engine**: the scheduler that discovers ready nodes, runs each
//!   ready-set in parallel, re-queues loop members on false conditions, and
//!   emits events ([`ExecutionEngine`]).
//! - **Handlers**: one implementation per node type, registered by kind and
//!   fed validated properties, resolved inputs, and injected services
//!   ([`NodeHandler`], [`HandlerRegistry`]).
//! - **Persons**: named LLM personas with append-only conversations and
//!   forgetting as a view, never a destructive edit
//!   ([`ConversationManager`], [`ForgetMode`]).
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use diaflow_core::{
//!     Diagram, ExecutionEngine, ExecutionOptions, FnSink, Settings,
//! };
//! use serde_json::json;
//! use std::sync::Arc;
//!
//! # async fn example() -> diaflow_core::Result<()> {
//! let diagram = Diagram::from_value(json!({
//!     "nodes": {
//!         "s": {"type": "start", "data": {"output": "hello"}},
//!         "e": {"type": "endpoint", "data": {"save_to_file": false}},
//!     },
//!     "arrows": {
//!         "a1": {"source": "s", "target": "e"},
//!     },
//! }))?;
//!
//! let engine = ExecutionEngine::new(Settings::from_env());
//! let sink = Arc::new(FnSink::new(|event| println!("{event:?}")));
//! let result = engine
//!     .execute(&diagram, ExecutionOptions::default(), sink)
//!     .await?;
//! assert!(result.is_success());
//! # Ok(())
//! # }
//! ```
//!
//! ## Execution Model
//!
//! ```text
//!  Diagram ──build──▶ Graph ──▶ ┌────────── scheduler round ──────────┐
//!                               │ resolver: which pending nodes ready │
//!                               │ skip policy: iteration ceilings,    │
//!                               │   consumed first-only, cascades     │
//!                               │ handlers run concurrently against a │
//!                               │   read-only context snapshot        │
//!                               │ scheduler merges results, emits     │
//!                               │   events, re-queues loop members    │
//!                               └─────────────────────────────────────┘
//! ```
//!
//! The execution context is mutated only by the scheduler between rounds
//! (single-writer discipline). Conversation history is the one shared
//! mutable collaborator; it serializes per person, so jobs for different
//! persons write concurrently.
//!
//! ## Module Organization
//!
//! - [`diagram`] / [`graph`] - wire form and compiled graph
//! - [`engine`] - scheduler, options, cancellation
//! - [`resolver`] / [`controller`] - readiness and skip policy
//! - [`inputs`] / [`transform`] - per-arrow value extraction and
//!   content-type strategies
//! - [`handler`] / [`handlers`] - handler contract and built-ins
//! - [`conversation`] / [`memory`] - persons, history, forgetting
//! - [`llm`] - client contract, retry, pooling
//! - [`events`] - progress events and sinks
//! - [`expr`] / [`template`] - condition expressions and prompt templates
//! - [`config`] / [`error`] - settings and the error taxonomy

pub mod config;
pub mod context;
pub mod controller;
pub mod conversation;
pub mod diagram;
pub mod engine;
pub mod error;
pub mod events;
pub mod expr;
pub mod graph;
pub mod handler;
pub mod handlers;
pub mod inputs;
pub mod llm;
pub mod memory;
pub mod output;
pub mod resolver;
pub mod template;
pub mod transform;

pub use config::Settings;
pub use context::{ExecutionContext, SkipReason};
pub use conversation::{
    Conversation, ConversationManager, Message, MessageType, PersonConfig, PersonId,
};
pub use diagram::{ApiKeyRef, ArrowSpec, Diagram, NodeSpec};
pub use engine::{CancelToken, ExecutionEngine, ExecutionOptions, RunResult};
pub use error::{EngineError, Result};
pub use events::{
    ChannelSink, CollectSink, EventSink, ExecutionEvent, FnSink, NullSink,
};
pub use graph::{Arrow, ArrowId, Graph, HandleRef, Node, NodeId, NodeKind};
pub use handler::{
    FileService, HandlerRegistry, InteractiveHandler, LocalFileService, NodeHandler, Services,
};
pub use inputs::{ResolvedInput, ResolvedInputs};
pub use llm::{ChatMessage, ChatRole, LlmClient, LlmRequest, LlmResponse, LlmService};
pub use memory::ForgetMode;
pub use output::{NodeOutput, TokenUsage};
pub use resolver::DependencyResolver;
pub use transform::ContentType;
