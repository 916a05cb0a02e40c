//! Error types for eosbridge-core

use crate::host::HostId;
use crate::sdk::ResultCode;
use std::thread::ThreadId;
use thiserror::Error;

/// Main error type for eosbridge-core
///
/// Only construction and configuration problems surface here. SDK result
/// codes reach scripts as ordinary events with `isError` set.
#[derive(Error, Debug)]
pub enum Error {
    /// A runtime context was requested without a host execution context
    #[error("no host execution context to bind the runtime context to")]
    NullHostContext,

    /// A second runtime context was constructed off the recorded thread
    #[error("runtime contexts are bound to thread {expected:?}; refusing construction on {actual:?}")]
    ThreadAffinity {
        /// Thread that created the first live context
        expected: ThreadId,
        /// Thread that attempted construction
        actual: ThreadId,
    },

    /// The host already has a live runtime context
    #[error("host {0} already has a runtime context")]
    DuplicateHost(HostId),

    /// The SDK refused to initialize
    #[error("SDK initialization failed: {0}")]
    SdkInit(ResultCode),

    /// The SDK did not hand back a platform instance
    #[error("SDK platform could not be created")]
    PlatformUnavailable,

    /// An operation needed a platform but the context never connected
    #[error("no SDK platform is connected")]
    NoPlatform,

    /// An operation needed an authenticated account
    #[error("no account is logged on")]
    NotLoggedOn,

    /// Invalid argument from the script layer
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Configuration error
    #[error("Config error: {0}")]
    Config(String),

    /// I/O error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// TOML parse error
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
}

/// Result type alias using eosbridge-core's Error
pub type Result<T> = std::result::Result<T, Error>;
