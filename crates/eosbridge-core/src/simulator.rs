//! Deterministic in-process SDK.
//!
//! Requests queue their callbacks; the callbacks fire from the next
//! [`Platform::tick`], the same way the native SDK delivers them. Catalog,
//! entitlements and per-operation result codes come from a
//! [`SimulatorConfig`], which the CLI loads from TOML.

use crate::registry::ContextHandle;
use crate::sdk::{
    AccountId, AuthInterface, CatalogOffer, CheckoutCallback, CheckoutCallbackInfo,
    EcomInterface, Entitlement, InitializeOptions, LogCallback, LogMessage, LoginCallback,
    LoginCallbackInfo, LoginOptions, NotificationPosition, Platform, PlatformOptions,
    QueryEntitlementsCallback, QueryEntitlementsCallbackInfo, QueryOffersCallback,
    QueryOffersCallbackInfo, ResultCode, Sdk, SdkLogLevel, Transaction,
};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

const LOG_CATEGORY: &str = "LogEOSSimulator";

/// Behavior of the simulated SDK.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulatorConfig {
    /// Account reported by successful logins.
    pub account_id: String,
    pub initialize_result: ResultCode,
    pub login_result: ResultCode,
    pub query_offers_result: ResultCode,
    pub checkout_result: ResultCode,
    pub query_entitlements_result: ResultCode,
    /// Whether `create_platform` hands back a platform.
    pub platform_available: bool,
    pub offers: Vec<CatalogOffer>,
    /// Entitlements the account owns before any checkout.
    pub entitlements: Vec<Entitlement>,
    /// Offer indices whose copy fails.
    pub failing_offer_copies: Vec<u32>,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self {
            account_id: "sim-account".to_string(),
            initialize_result: ResultCode::SUCCESS,
            login_result: ResultCode::SUCCESS,
            query_offers_result: ResultCode::SUCCESS,
            checkout_result: ResultCode::SUCCESS,
            query_entitlements_result: ResultCode::SUCCESS,
            platform_available: true,
            offers: Vec::new(),
            entitlements: Vec::new(),
            failing_offer_copies: Vec::new(),
        }
    }
}

/// Call counters, for assertions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SimulatorStats {
    pub initialize_calls: usize,
    pub shutdown_calls: usize,
    pub platforms_created: usize,
    pub platforms_released: usize,
    pub ticks: usize,
    pub callbacks_fired: usize,
    pub open_transactions: usize,
}

#[derive(Default)]
struct Counters {
    initialize_calls: AtomicUsize,
    shutdown_calls: AtomicUsize,
    platforms_created: AtomicUsize,
    platforms_released: AtomicUsize,
    ticks: AtomicUsize,
    callbacks_fired: AtomicUsize,
    open_transactions: AtomicUsize,
}

type Deferred = Box<dyn FnOnce() + Send>;

struct SimState {
    config: Mutex<SimulatorConfig>,
    owned: Mutex<Vec<Entitlement>>,
    last_query: Mutex<Vec<Entitlement>>,
    transactions: Mutex<HashMap<String, Vec<Entitlement>>>,
    pending: Mutex<VecDeque<Deferred>>,
    log_callback: Mutex<Option<Arc<dyn Fn(&LogMessage) + Send + Sync>>>,
    notification_position: Mutex<Option<NotificationPosition>>,
    next_id: AtomicU64,
    counters: Counters,
}

impl SimState {
    fn log(&self, level: SdkLogLevel, message: impl Into<String>) {
        let callback = self.log_callback.lock().clone();
        if let Some(callback) = callback {
            callback(&LogMessage {
                category: LOG_CATEGORY.to_string(),
                message: message.into(),
                level,
            });
        }
    }

    fn defer(&self, callback: Deferred) {
        self.pending.lock().push_back(callback);
    }

    fn next_id(&self, prefix: &str) -> String {
        format!("{prefix}-{}", self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    fn account(&self) -> AccountId {
        AccountId::new(self.config.lock().account_id.clone())
    }

    /// Run the callbacks queued before this tick began.
    fn fire_pending(&self) {
        let batch: Vec<Deferred> = self.pending.lock().drain(..).collect();
        for callback in batch {
            self.counters.callbacks_fired.fetch_add(1, Ordering::Relaxed);
            callback();
        }
    }
}

/// Process-global entry points of the simulated SDK.
pub struct SimulatedSdk {
    state: Arc<SimState>,
}

impl SimulatedSdk {
    pub fn new(config: SimulatorConfig) -> Arc<Self> {
        let owned = config.entitlements.clone();
        Arc::new(Self {
            state: Arc::new(SimState {
                config: Mutex::new(config),
                owned: Mutex::new(owned),
                last_query: Mutex::new(Vec::new()),
                transactions: Mutex::new(HashMap::new()),
                pending: Mutex::new(VecDeque::new()),
                log_callback: Mutex::new(None),
                notification_position: Mutex::new(None),
                next_id: AtomicU64::new(1),
                counters: Counters::default(),
            }),
        })
    }

    pub fn stats(&self) -> SimulatorStats {
        let c = &self.state.counters;
        SimulatorStats {
            initialize_calls: c.initialize_calls.load(Ordering::Relaxed),
            shutdown_calls: c.shutdown_calls.load(Ordering::Relaxed),
            platforms_created: c.platforms_created.load(Ordering::Relaxed),
            platforms_released: c.platforms_released.load(Ordering::Relaxed),
            ticks: c.ticks.load(Ordering::Relaxed),
            callbacks_fired: c.callbacks_fired.load(Ordering::Relaxed),
            open_transactions: c.open_transactions.load(Ordering::Relaxed),
        }
    }

    /// Change behavior for requests issued from now on.
    pub fn update_config(&self, update: impl FnOnce(&mut SimulatorConfig)) {
        update(&mut self.state.config.lock());
    }

    /// Run `callback` during the next platform tick, after earlier requests.
    pub fn schedule(&self, callback: impl FnOnce() + Send + 'static) {
        self.state.defer(Box::new(callback));
    }

    pub fn pending_callbacks(&self) -> usize {
        self.state.pending.lock().len()
    }

    pub fn notification_position(&self) -> Option<NotificationPosition> {
        *self.state.notification_position.lock()
    }

    /// Entitlements the account currently owns.
    pub fn owned_entitlements(&self) -> Vec<Entitlement> {
        self.state.owned.lock().clone()
    }
}

impl Sdk for SimulatedSdk {
    fn initialize(&self, options: &InitializeOptions) -> ResultCode {
        self.state
            .counters
            .initialize_calls
            .fetch_add(1, Ordering::Relaxed);
        let result = self.state.config.lock().initialize_result;
        self.state.log(
            SdkLogLevel::Info,
            format!(
                "initialize {} {} -> {result}",
                options.product_name, options.product_version
            ),
        );
        result
    }

    fn shutdown(&self) -> ResultCode {
        self.state
            .counters
            .shutdown_calls
            .fetch_add(1, Ordering::Relaxed);
        self.state.log(SdkLogLevel::Info, "shutdown");
        ResultCode::SUCCESS
    }

    fn set_log_callback(&self, _level: SdkLogLevel, callback: LogCallback) -> ResultCode {
        *self.state.log_callback.lock() = Some(Arc::from(callback));
        ResultCode::SUCCESS
    }

    fn create_platform(&self, options: &PlatformOptions) -> Option<Arc<dyn Platform>> {
        if !self.state.config.lock().platform_available {
            self.state
                .log(SdkLogLevel::Error, "platform creation refused");
            return None;
        }
        self.state
            .counters
            .platforms_created
            .fetch_add(1, Ordering::Relaxed);
        self.state.log(
            SdkLogLevel::Verbose,
            format!("platform created for product {}", options.product_id),
        );
        Some(Arc::new(SimulatedPlatform {
            state: Arc::clone(&self.state),
        }))
    }
}

struct SimulatedPlatform {
    state: Arc<SimState>,
}

impl Platform for SimulatedPlatform {
    fn tick(&self) {
        self.state.counters.ticks.fetch_add(1, Ordering::Relaxed);
        self.state.fire_pending();
    }

    fn release(&self) {
        self.state
            .counters
            .platforms_released
            .fetch_add(1, Ordering::Relaxed);
    }

    fn auth(&self) -> Arc<dyn AuthInterface> {
        Arc::new(SimulatedAuth {
            state: Arc::clone(&self.state),
        })
    }

    fn ecom(&self) -> Arc<dyn EcomInterface> {
        Arc::new(SimulatedEcom {
            state: Arc::clone(&self.state),
        })
    }

    fn set_notification_position(&self, position: NotificationPosition) -> ResultCode {
        *self.state.notification_position.lock() = Some(position);
        ResultCode::SUCCESS
    }
}

struct SimulatedAuth {
    state: Arc<SimState>,
}

impl AuthInterface for SimulatedAuth {
    fn login(
        &self,
        options: &LoginOptions,
        client_data: Option<ContextHandle>,
        mut callback: LoginCallback,
    ) {
        let result = self.state.config.lock().login_result;
        let account = self.state.account();
        self.state.log(
            SdkLogLevel::Verbose,
            format!("login requested with {:?}", options.credentials),
        );
        let state = Arc::clone(&self.state);
        self.state.defer(Box::new(move || {
            if !result.is_success() {
                state.log(SdkLogLevel::Warning, format!("login failed: {result}"));
            }
            callback(&LoginCallbackInfo {
                result_code: result,
                client_data,
                local_user_id: result.is_success().then_some(account),
            });
        }));
    }

    fn copy_id_token(&self, account: &AccountId) -> Result<String, ResultCode> {
        if *account == self.state.account() {
            Ok(format!("eyJhbGciOiJSUzI1NiJ9.{account}.sim"))
        } else {
            Err(ResultCode::INVALID_USER)
        }
    }
}

struct SimulatedEcom {
    state: Arc<SimState>,
}

impl EcomInterface for SimulatedEcom {
    fn query_offers(
        &self,
        local_user: &AccountId,
        client_data: Option<ContextHandle>,
        mut callback: QueryOffersCallback,
    ) {
        let result = self.state.config.lock().query_offers_result;
        let local_user = local_user.clone();
        self.state.defer(Box::new(move || {
            callback(&QueryOffersCallbackInfo {
                result_code: result,
                client_data,
                local_user_id: Some(local_user),
            });
        }));
    }

    fn offer_count(&self, _local_user: &AccountId) -> u32 {
        self.state.config.lock().offers.len() as u32
    }

    fn copy_offer_by_index(
        &self,
        _local_user: &AccountId,
        index: u32,
    ) -> (ResultCode, Option<CatalogOffer>) {
        let config = self.state.config.lock();
        if config.failing_offer_copies.contains(&index) {
            return (ResultCode::ECOM_CATALOG_ITEM_STALE, None);
        }
        match config.offers.get(index as usize) {
            Some(offer) if offer.price_result.is_success() => {
                (ResultCode::SUCCESS, Some(offer.clone()))
            }
            Some(offer) => (
                ResultCode::ECOM_CATALOG_OFFER_PRICE_INVALID,
                Some(offer.clone()),
            ),
            None => (ResultCode::NOT_FOUND, None),
        }
    }

    fn checkout(
        &self,
        local_user: &AccountId,
        offer_ids: &[String],
        client_data: Option<ContextHandle>,
        mut callback: CheckoutCallback,
    ) {
        let local_user = local_user.clone();
        let offer_ids = offer_ids.to_vec();
        let state = Arc::clone(&self.state);
        self.state.defer(Box::new(move || {
            let (result, offers) = {
                let config = state.config.lock();
                let offers: Option<Vec<CatalogOffer>> = offer_ids
                    .iter()
                    .map(|id| config.offers.iter().find(|o| &o.id == id).cloned())
                    .collect();
                match offers {
                    Some(offers) if config.checkout_result.is_success() => {
                        (ResultCode::SUCCESS, offers)
                    }
                    Some(_) => (config.checkout_result, Vec::new()),
                    None => (ResultCode::NOT_FOUND, Vec::new()),
                }
            };

            let transaction_id = result.is_success().then(|| {
                let granted: Vec<Entitlement> = offers
                    .iter()
                    .map(|offer| Entitlement {
                        entitlement_id: state.next_id("ent"),
                        catalog_item_id: if offer.catalog_item_id.is_empty() {
                            offer.id.clone()
                        } else {
                            offer.catalog_item_id.clone()
                        },
                        redeemed: false,
                    })
                    .collect();
                let id = state.next_id("txn");
                state.owned.lock().extend(granted.iter().cloned());
                state.transactions.lock().insert(id.clone(), granted);
                id
            });

            callback(&CheckoutCallbackInfo {
                result_code: result,
                client_data,
                local_user_id: Some(local_user),
                transaction_id,
            });
        }));
    }

    fn copy_transaction_by_id(
        &self,
        _local_user: &AccountId,
        transaction_id: &str,
    ) -> Result<Arc<dyn Transaction>, ResultCode> {
        let entitlements = self
            .state
            .transactions
            .lock()
            .get(transaction_id)
            .cloned()
            .ok_or(ResultCode::NOT_FOUND)?;
        self.state
            .counters
            .open_transactions
            .fetch_add(1, Ordering::Relaxed);
        Ok(Arc::new(SimulatedTransaction {
            id: transaction_id.to_string(),
            entitlements,
            state: Arc::clone(&self.state),
        }))
    }

    fn query_entitlements(
        &self,
        local_user: &AccountId,
        include_redeemed: bool,
        client_data: Option<ContextHandle>,
        mut callback: QueryEntitlementsCallback,
    ) {
        let local_user = local_user.clone();
        let state = Arc::clone(&self.state);
        self.state.defer(Box::new(move || {
            let result = state.config.lock().query_entitlements_result;
            if result.is_success() {
                let snapshot: Vec<Entitlement> = state
                    .owned
                    .lock()
                    .iter()
                    .filter(|e| include_redeemed || !e.redeemed)
                    .cloned()
                    .collect();
                *state.last_query.lock() = snapshot;
            }
            callback(&QueryEntitlementsCallbackInfo {
                result_code: result,
                client_data,
                local_user_id: Some(local_user),
            });
        }));
    }

    fn entitlement_count(&self, _local_user: &AccountId) -> u32 {
        self.state.last_query.lock().len() as u32
    }

    fn copy_entitlement_by_index(
        &self,
        _local_user: &AccountId,
        index: u32,
    ) -> (ResultCode, Option<Entitlement>) {
        match self.state.last_query.lock().get(index as usize) {
            Some(entitlement) => (ResultCode::SUCCESS, Some(entitlement.clone())),
            None => (ResultCode::NOT_FOUND, None),
        }
    }
}

struct SimulatedTransaction {
    id: String,
    entitlements: Vec<Entitlement>,
    state: Arc<SimState>,
}

impl Transaction for SimulatedTransaction {
    fn id(&self) -> &str {
        &self.id
    }

    fn entitlement_count(&self) -> u32 {
        self.entitlements.len() as u32
    }

    fn copy_entitlement_by_index(&self, index: u32) -> (ResultCode, Option<Entitlement>) {
        match self.entitlements.get(index as usize) {
            Some(entitlement) => (ResultCode::SUCCESS, Some(entitlement.clone())),
            None => (ResultCode::NOT_FOUND, None),
        }
    }
}

impl Drop for SimulatedTransaction {
    fn drop(&mut self) {
        self.state
            .counters
            .open_transactions
            .fetch_sub(1, Ordering::Relaxed);
    }
}
