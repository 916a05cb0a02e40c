//! eosbridge-core: deferred event dispatch between an online-services SDK
//! and a frame-driven scripting host.
//!
//! # Architecture
//!
//! ```text
//! SDK callback (inside Platform::tick)
//!        │  client_data = ContextHandle
//!        ▼
//! InstanceRegistry::resolve ──▶ RuntimeContext::on_handle_global_event::<K>
//!                                      │  DispatchTask<K>::acquire_from
//!                                      ▼
//!                               FIFO queue (Arc<dyn QueuedTask>)
//!                                      │  drained on every host frame
//!                                      ▼
//!                               EventDispatcher::dispatch ──▶ script listeners
//! ```
//!
//! # Modules
//!
//! - `task`: dispatch tasks and the event kinds they capture
//! - `dispatcher`: delivery contract and the native listener dispatcher
//! - `context`: per-host runtime context (queue, SDK handles, operations)
//! - `registry`: process-wide instance registry with generation-checked handles
//! - `host`: host execution contexts and the per-frame event
//! - `event`: host-native event representation
//! - `sdk`: SDK boundary traits and plain data
//! - `sdk_guard`: reference-counted SDK initialization
//! - `simulator`: deterministic in-process SDK
//! - `config`: TOML configuration and launcher arguments
//! - `logging`: tracing setup and SDK log forwarding
//!
//! # Safety
//!
//! This crate forbids unsafe code.

#![forbid(unsafe_code)]

pub mod config;
pub mod context;
pub mod dispatcher;
pub mod error;
pub mod event;
pub mod host;
pub mod logging;
pub mod registry;
pub mod sdk;
pub mod sdk_guard;
pub mod simulator;
pub mod task;

pub use context::{ContextEnv, RuntimeContext};
pub use error::{Error, Result};
pub use registry::{ContextHandle, InstanceRegistry};
