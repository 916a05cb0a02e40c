//! Per-host runtime context.
//!
//! A [`RuntimeContext`] owns the dispatch queue, the event dispatcher and the
//! SDK handles for one host instance. It ticks the SDK and drains the queue
//! on every host frame. SDK callbacks are routed back to it through the
//! [`InstanceRegistry`] and enter the queue through
//! [`RuntimeContext::on_handle_global_event`].

use crate::config::BridgeConfig;
use crate::dispatcher::EventDispatcher;
use crate::error::{Error, Result};
use crate::host::{ENTER_FRAME_EVENT, HostId, HostRuntime, ListenerId, main_host};
use crate::registry::{ContextHandle, InstanceRegistry};
use crate::sdk::{
    AccountId, AuthInterface, CallbackInfo, EcomInterface, LoginCallbackInfo, LoginCredentials,
    LoginOptions, NotificationPosition, Platform,
};
use crate::sdk_guard::{SdkGuard, SdkLease};
use crate::task::{
    CheckoutTransaction, DispatchTask, EntitlementsTransaction, EventKind, LoadProducts,
    LoginResponse, QueuedTask,
};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::{Arc, Weak};
use tracing::{debug, info, trace, warn};

/// Process-level collaborators shared by every context.
#[derive(Clone)]
pub struct ContextEnv {
    pub registry: Arc<InstanceRegistry>,
    pub sdk: Arc<SdkGuard>,
}

impl ContextEnv {
    pub fn new(registry: Arc<InstanceRegistry>, sdk: Arc<SdkGuard>) -> Self {
        Self { registry, sdk }
    }

    /// Use the process-wide registry.
    pub fn with_global_registry(sdk: Arc<SdkGuard>) -> Self {
        Self::new(InstanceRegistry::global(), sdk)
    }
}

/// SDK handles held once connected.
#[derive(Clone)]
struct Connection {
    platform: Arc<dyn Platform>,
    auth: Arc<dyn AuthInterface>,
    ecom: Arc<dyn EcomInterface>,
}

pub struct RuntimeContext {
    handle: ContextHandle,
    host_id: HostId,
    host: Weak<dyn HostRuntime>,
    frame_listener: ListenerId,
    registry: Arc<InstanceRegistry>,
    sdk: Arc<SdkGuard>,
    dispatcher: Arc<dyn EventDispatcher>,
    queue: Mutex<VecDeque<Arc<dyn QueuedTask>>>,
    connection: Mutex<Option<Connection>>,
    lease: Mutex<Option<SdkLease>>,
    account_id: Mutex<Option<AccountId>>,
}

impl RuntimeContext {
    /// Create the context for `host`.
    ///
    /// Coroutine hosts are resolved to their main host first. The dispatcher
    /// is built by `make_dispatcher` against that main host.
    pub fn new<F>(
        host: Option<Arc<dyn HostRuntime>>,
        env: &ContextEnv,
        make_dispatcher: F,
    ) -> Result<Arc<Self>>
    where
        F: FnOnce(&Arc<dyn HostRuntime>) -> Arc<dyn EventDispatcher>,
    {
        let host = host.ok_or(Error::NullHostContext)?;
        let main = main_host(host);
        let host_id = main.id();
        let handle = env.registry.register(host_id)?;
        let dispatcher = make_dispatcher(&main);

        let context = Arc::new_cyclic(|weak: &Weak<Self>| {
            env.registry.bind(handle, weak.clone());

            let target = weak.clone();
            let frame_listener = main.add_runtime_listener(
                ENTER_FRAME_EVENT,
                Arc::new(move || {
                    if let Some(context) = target.upgrade() {
                        context.on_tick();
                    }
                }),
            );

            Self {
                handle,
                host_id,
                host: Arc::downgrade(&main),
                frame_listener,
                registry: Arc::clone(&env.registry),
                sdk: Arc::clone(&env.sdk),
                dispatcher,
                queue: Mutex::new(VecDeque::new()),
                connection: Mutex::new(None),
                lease: Mutex::new(None),
                account_id: Mutex::new(None),
            }
        });

        info!(context = %handle, host = host_id, "runtime context created");
        Ok(context)
    }

    pub fn handle(&self) -> ContextHandle {
        self.handle
    }

    pub fn host_id(&self) -> HostId {
        self.host_id
    }

    pub fn dispatcher(&self) -> &Arc<dyn EventDispatcher> {
        &self.dispatcher
    }

    // -----------------------------------------------------------------------
    // SDK connection
    // -----------------------------------------------------------------------

    /// Take an SDK lease and create this context's platform.
    ///
    /// The lease is kept even when platform creation fails, so the SDK stays
    /// initialized for as long as the context lives.
    pub fn connect(&self, config: &BridgeConfig) -> Result<()> {
        if self.connection.lock().is_some() {
            debug!(context = %self.handle, "already connected");
            return Ok(());
        }

        if self.lease.lock().is_none() {
            let lease = self.sdk.acquire(&config.sdk.initialize_options())?;
            *self.lease.lock() = Some(lease);
        }

        let platform = self
            .sdk
            .sdk()
            .create_platform(&config.platform.platform_options())
            .ok_or(Error::PlatformUnavailable)?;
        let connection = Connection {
            auth: platform.auth(),
            ecom: platform.ecom(),
            platform,
        };
        *self.connection.lock() = Some(connection);
        info!(context = %self.handle, "SDK platform connected");
        Ok(())
    }

    pub fn is_connected(&self) -> bool {
        self.connection.lock().is_some()
    }

    fn connection(&self) -> Option<Connection> {
        self.connection.lock().clone()
    }

    fn ecom(&self) -> Option<Arc<dyn EcomInterface>> {
        self.connection.lock().as_ref().map(|c| Arc::clone(&c.ecom))
    }

    pub fn account_id(&self) -> Option<AccountId> {
        self.account_id.lock().clone()
    }

    fn set_account_id(&self, account: Option<AccountId>) {
        *self.account_id.lock() = account;
    }

    // -----------------------------------------------------------------------
    // Queue
    // -----------------------------------------------------------------------

    /// Per-frame work: tick the SDK, then drain the queue.
    ///
    /// The drain pops until it observes an empty queue, so tasks pushed by
    /// callbacks fired during the tick, or by listeners during the drain,
    /// are delivered in this same pass.
    pub fn on_tick(&self) {
        let platform = self.connection.lock().as_ref().map(|c| Arc::clone(&c.platform));
        if let Some(platform) = platform {
            platform.tick();
        }

        let mut drained = 0usize;
        let mut delivered = 0usize;
        while let Some(task) = self.pop_task() {
            if task.execute() {
                delivered += 1;
            }
            drained += 1;
        }
        if drained > 0 {
            trace!(context = %self.handle, drained, delivered, "dispatch queue drained");
        }
    }

    fn pop_task(&self) -> Option<Arc<dyn QueuedTask>> {
        self.queue.lock().pop_front()
    }

    /// Append a task to the back of the queue.
    pub fn push_task(&self, task: Arc<dyn QueuedTask>) {
        self.queue.lock().push_back(task);
    }

    pub fn queued_len(&self) -> usize {
        self.queue.lock().len()
    }

    /// Single ingestion point for SDK callback payloads.
    ///
    /// Enrichment queries are only allowed when the payload names this
    /// context as its originator.
    pub fn on_handle_global_event<K: EventKind>(&self, info: &K::Info) {
        let mut task = DispatchTask::<K>::new();
        task.set_dispatcher(Arc::clone(&self.dispatcher));
        task.set_had_io_failure(info.result_code().is_transport_failure());

        let ecom = if info.client_data() == Some(self.handle) {
            self.ecom()
        } else {
            None
        };
        task.acquire_from(info, ecom.as_deref());

        debug!(
            context = %self.handle,
            event = K::EVENT_NAME,
            result = %info.result_code(),
            "queued SDK event"
        );
        self.push_task(Arc::new(task));
    }

    // -----------------------------------------------------------------------
    // Operations
    // -----------------------------------------------------------------------

    pub fn login(&self, credentials: LoginCredentials) -> Result<()> {
        let connection = self.connection().ok_or(Error::NoPlatform)?;
        let options = LoginOptions::new(credentials);
        let registry = Arc::clone(&self.registry);
        connection.auth.login(
            &options,
            Some(self.handle),
            Box::new(move |info: &LoginCallbackInfo| {
                let Some(context) = route(&registry, info) else {
                    return;
                };
                if info.result_code.is_success() {
                    context.set_account_id(info.local_user_id.clone());
                }
                context.on_handle_global_event::<LoginResponse>(info);
            }),
        );
        Ok(())
    }

    pub fn login_with_account_portal(&self) -> Result<()> {
        self.login(LoginCredentials::AccountPortal)
    }

    /// Both an account and a platform are present.
    pub fn is_logged_on(&self) -> bool {
        self.account_id.lock().is_some() && self.is_connected()
    }

    /// Id token for the logged-in account, if the SDK can produce one.
    pub fn auth_id_token(&self) -> Option<String> {
        let account = self.account_id()?;
        let connection = self.connection()?;
        match connection.auth.copy_id_token(&account) {
            Ok(token) => Some(token),
            Err(code) => {
                warn!(context = %self.handle, result = %code, "failed to copy id token");
                None
            }
        }
    }

    pub fn load_products(&self) -> Result<()> {
        let (connection, account) = self.session()?;
        connection.ecom.query_offers(
            &account,
            Some(self.handle),
            forward::<LoadProducts>(&self.registry),
        );
        Ok(())
    }

    pub fn purchase(&self, offer_id: &str) -> Result<()> {
        if offer_id.is_empty() {
            return Err(Error::InvalidArgument("offer id must not be empty".to_string()));
        }
        let (connection, account) = self.session()?;
        connection.ecom.checkout(
            &account,
            &[offer_id.to_string()],
            Some(self.handle),
            forward::<CheckoutTransaction>(&self.registry),
        );
        Ok(())
    }

    /// Re-query owned entitlements, redeemed ones included.
    pub fn restore(&self) -> Result<()> {
        let (connection, account) = self.session()?;
        connection.ecom.query_entitlements(
            &account,
            true,
            Some(self.handle),
            forward::<EntitlementsTransaction>(&self.registry),
        );
        Ok(())
    }

    pub fn set_notification_position(&self, position: &str) -> Result<()> {
        let position: NotificationPosition =
            position.parse().map_err(Error::InvalidArgument)?;
        let connection = self.connection().ok_or(Error::NoPlatform)?;
        let code = connection.platform.set_notification_position(position);
        if !code.is_success() {
            warn!(context = %self.handle, result = %code, "failed to set notification position");
        }
        Ok(())
    }

    fn session(&self) -> Result<(Connection, AccountId)> {
        let connection = self.connection().ok_or(Error::NoPlatform)?;
        let account = self.account_id().ok_or(Error::NotLoggedOn)?;
        Ok((connection, account))
    }
}

/// Resolve a callback to its context. Incomplete results and stale handles
/// are dropped.
fn route<I: CallbackInfo>(registry: &InstanceRegistry, info: &I) -> Option<Arc<RuntimeContext>> {
    if !info.result_code().is_operation_complete() {
        trace!(result = %info.result_code(), "operation will retry, waiting for completion");
        return None;
    }
    let Some(handle) = info.client_data() else {
        debug!("SDK callback without client data");
        return None;
    };
    let context = registry.resolve(handle);
    if context.is_none() {
        debug!(context = %handle, "SDK callback for a destroyed context");
    }
    context
}

/// Trampoline forwarding a callback into its context's queue.
fn forward<K>(registry: &Arc<InstanceRegistry>) -> Box<dyn FnMut(&K::Info) + Send>
where
    K: EventKind,
{
    let registry = Arc::clone(registry);
    Box::new(move |info: &K::Info| {
        if let Some(context) = route(&registry, info) {
            context.on_handle_global_event::<K>(info);
        }
    })
}

impl Drop for RuntimeContext {
    fn drop(&mut self) {
        if let Some(host) = self.host.upgrade() {
            host.remove_runtime_listener(ENTER_FRAME_EVENT, self.frame_listener);
        }

        let dropped = self.queue.get_mut().len();
        self.queue.get_mut().clear();

        if let Some(connection) = self.connection.get_mut().take() {
            connection.platform.release();
        }
        drop(self.lease.get_mut().take());
        self.registry.deregister(self.handle);

        info!(context = %self.handle, dropped_events = dropped, "runtime context destroyed");
    }
}
