//! Reference-counted ownership of the process-global SDK.
//!
//! The first [`SdkLease`] initializes the SDK and installs the log
//! forwarder; dropping the last one shuts it down. Runtime contexts created
//! while the SDK is live only add a lease.

use crate::error::{Error, Result};
use crate::logging::forward_sdk_log;
use crate::sdk::{InitializeOptions, ResultCode, Sdk, SdkLogLevel};
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{debug, info, warn};

pub struct SdkGuard {
    sdk: Arc<dyn Sdk>,
    leases: Mutex<usize>,
}

impl SdkGuard {
    pub fn new(sdk: Arc<dyn Sdk>) -> Arc<Self> {
        Arc::new(Self {
            sdk,
            leases: Mutex::new(0),
        })
    }

    pub fn sdk(&self) -> &Arc<dyn Sdk> {
        &self.sdk
    }

    /// Take a lease, initializing the SDK if nobody holds one.
    pub fn acquire(self: &Arc<Self>, options: &InitializeOptions) -> Result<SdkLease> {
        let mut leases = self.leases.lock();
        if *leases == 0 {
            let code = self.sdk.initialize(options);
            match code {
                ResultCode::SUCCESS => {
                    info!(
                        product_name = %options.product_name,
                        product_version = %options.product_version,
                        "SDK initialized"
                    );
                }
                ResultCode::ALREADY_CONFIGURED => {
                    warn!(result = %code, "SDK was already configured");
                }
                _ => return Err(Error::SdkInit(code)),
            }

            let code = self
                .sdk
                .set_log_callback(SdkLogLevel::VeryVerbose, Box::new(forward_sdk_log));
            if !code.is_success() {
                warn!(result = %code, "failed to install SDK log forwarding");
            }
        }
        *leases += 1;
        debug!(leases = *leases, "SDK lease acquired");
        Ok(SdkLease {
            guard: Arc::clone(self),
        })
    }

    pub fn lease_count(&self) -> usize {
        *self.leases.lock()
    }

    fn release(&self) {
        let mut leases = self.leases.lock();
        *leases = leases.saturating_sub(1);
        debug!(leases = *leases, "SDK lease released");
        if *leases == 0 {
            let code = self.sdk.shutdown();
            if code.is_success() {
                info!("SDK shut down");
            } else {
                warn!(result = %code, "SDK shutdown failed");
            }
        }
    }
}

/// Keeps the SDK initialized while held.
pub struct SdkLease {
    guard: Arc<SdkGuard>,
}

impl Drop for SdkLease {
    fn drop(&mut self) {
        self.guard.release();
    }
}
