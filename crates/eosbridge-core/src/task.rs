//! Dispatch tasks: one captured SDK result awaiting delivery.
//!
//! A task is built from a callback payload, optionally enriched with
//! synchronous SDK queries, and then queued as an immutable
//! `Arc<dyn QueuedTask>`. At drain time it materializes a [`HostEvent`]
//! and hands it to its dispatcher.
//!
//! ```text
//! Captured ──queue──▶ Queued ──execute──▶ Delivered
//!                        └──context drop──▶ Dropped
//! ```

use crate::dispatcher::EventDispatcher;
use crate::event::{EventFields, EventValue, HostEvent, event_names};
use crate::sdk::{
    AccountId, CallbackInfo, CatalogOffer, CheckoutCallbackInfo, EcomInterface, Entitlement,
    LoginCallbackInfo, QueryEntitlementsCallbackInfo, QueryOffersCallbackInfo, ResultCode,
};
use std::sync::Arc;
use tracing::{debug, warn};

/// One kind of event: its name, the payload it captures, and its fields.
pub trait EventKind: Default + Send + Sync + 'static {
    /// Outward event name. Several kinds may share one.
    const EVENT_NAME: &'static str;

    type Info: CallbackInfo + 'static;

    /// Copy what this kind needs out of the callback payload.
    ///
    /// `ecom` is only provided when the originating context may enrich the
    /// event with further SDK queries.
    fn acquire_from(&mut self, info: &Self::Info, ecom: Option<&dyn EcomInterface>);

    fn result_code(&self) -> ResultCode;

    /// Add the kind-specific fields to an event already carrying the common ones.
    fn materialize_into(&self, event: &mut HostEvent);
}

/// Type-erased view the queue holds.
pub trait QueuedTask: Send + Sync {
    fn event_name(&self) -> &'static str;

    /// Build the host-native event. Pure.
    fn materialize(&self) -> HostEvent;

    /// Deliver through the associated dispatcher. Returns whether delivery
    /// happened; a missing or unbound dispatcher is not an error.
    fn execute(&self) -> bool;
}

/// Captured event of kind `K`.
pub struct DispatchTask<K: EventKind> {
    kind: K,
    dispatcher: Option<Arc<dyn EventDispatcher>>,
    had_io_failure: bool,
}

impl<K: EventKind> Default for DispatchTask<K> {
    fn default() -> Self {
        Self {
            kind: K::default(),
            dispatcher: None,
            had_io_failure: false,
        }
    }
}

impl<K: EventKind> DispatchTask<K> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn acquire_from(&mut self, info: &K::Info, ecom: Option<&dyn EcomInterface>) {
        self.kind.acquire_from(info, ecom);
    }

    pub fn set_dispatcher(&mut self, dispatcher: Arc<dyn EventDispatcher>) {
        self.dispatcher = Some(dispatcher);
    }

    pub fn dispatcher(&self) -> Option<&Arc<dyn EventDispatcher>> {
        self.dispatcher.as_ref()
    }

    pub fn set_had_io_failure(&mut self, failed: bool) {
        self.had_io_failure = failed;
    }

    pub fn had_io_failure(&self) -> bool {
        self.had_io_failure
    }

    pub fn kind(&self) -> &K {
        &self.kind
    }
}

impl<K: EventKind> QueuedTask for DispatchTask<K> {
    fn event_name(&self) -> &'static str {
        K::EVENT_NAME
    }

    fn materialize(&self) -> HostEvent {
        let code = self.kind.result_code();
        let mut event = HostEvent::new(K::EVENT_NAME)
            .with("isError", !code.is_success())
            .with("resultCode", code.0);
        self.kind.materialize_into(&mut event);
        if self.had_io_failure {
            event.set("ioFailure", true);
        }
        event
    }

    fn execute(&self) -> bool {
        let Some(dispatcher) = self.dispatcher.as_ref() else {
            debug!(event = K::EVENT_NAME, "no dispatcher associated, dropping event");
            return false;
        };
        if !dispatcher.is_bound() {
            debug!(event = K::EVENT_NAME, "dispatcher unbound, dropping event");
            return false;
        }
        if self.had_io_failure {
            debug!(event = K::EVENT_NAME, "delivering event captured after a transport failure");
        }
        let event = self.materialize();
        dispatcher.dispatch(&event)
    }
}

// ---------------------------------------------------------------------------
// Captured records
// ---------------------------------------------------------------------------

/// One catalog offer as scripts see it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Product {
    pub title: String,
    pub description: String,
    pub product_identifier: String,
    pub localized_price: String,
    pub price_is_valid: bool,
}

impl TryFrom<&CatalogOffer> for Product {
    /// The offending `decimal_point`.
    type Error = u32;

    fn try_from(offer: &CatalogOffer) -> Result<Self, Self::Error> {
        let localized_price = offer.localized_price().ok_or(offer.decimal_point)?;
        Ok(Self {
            title: offer.title.clone(),
            description: offer.description.clone(),
            product_identifier: offer.id.clone(),
            localized_price,
            price_is_valid: offer.price_result.is_success(),
        })
    }
}

impl From<&Product> for EventValue {
    fn from(product: &Product) -> Self {
        EventFields::new()
            .with("title", product.title.as_str())
            .with("description", product.description.as_str())
            .with("productIdentifier", product.product_identifier.as_str())
            .with("localizedPrice", product.localized_price.as_str())
            .with("priceIsValid", product.price_is_valid)
            .into()
    }
}

/// One owned entitlement as scripts see it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StoreTransaction {
    pub receipt: String,
    pub identifier: String,
    pub product_identifier: String,
}

impl From<&Entitlement> for StoreTransaction {
    fn from(entitlement: &Entitlement) -> Self {
        Self {
            receipt: entitlement.catalog_item_id.clone(),
            identifier: entitlement.entitlement_id.clone(),
            product_identifier: entitlement.catalog_item_id.clone(),
        }
    }
}

impl From<&StoreTransaction> for EventValue {
    fn from(transaction: &StoreTransaction) -> Self {
        EventFields::new()
            .with("receipt", transaction.receipt.as_str())
            .with("identifier", transaction.identifier.as_str())
            .with("productIdentifier", transaction.product_identifier.as_str())
            .into()
    }
}

fn set_selected_account(event: &mut HostEvent, account: Option<&AccountId>) {
    if let Some(account) = account {
        event.set("selectedAccountId", account.as_str());
    }
}

/// Page through `count` entitlements, skipping the ones that fail to copy.
fn collect_entitlements(
    count: u32,
    mut copy: impl FnMut(u32) -> (ResultCode, Option<Entitlement>),
) -> Vec<StoreTransaction> {
    let mut transactions = Vec::with_capacity(count as usize);
    for index in 0..count {
        match copy(index) {
            (code, Some(entitlement))
                if code.is_success() || code == ResultCode::ECOM_ENTITLEMENT_STALE =>
            {
                transactions.push(StoreTransaction::from(&entitlement));
            }
            (code, _) => {
                warn!(index, result = %code, "skipping entitlement that failed to copy");
            }
        }
    }
    transactions
}

// ---------------------------------------------------------------------------
// Kinds
// ---------------------------------------------------------------------------

/// Completion of a login request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LoginResponse {
    result: ResultCode,
    selected_account_id: Option<AccountId>,
}

impl Default for LoginResponse {
    fn default() -> Self {
        Self {
            result: ResultCode::UNEXPECTED_ERROR,
            selected_account_id: None,
        }
    }
}

impl LoginResponse {
    pub fn selected_account_id(&self) -> Option<&AccountId> {
        self.selected_account_id.as_ref()
    }
}

impl EventKind for LoginResponse {
    const EVENT_NAME: &'static str = event_names::LOGIN_RESPONSE;
    type Info = LoginCallbackInfo;

    fn acquire_from(&mut self, info: &Self::Info, _ecom: Option<&dyn EcomInterface>) {
        self.result = info.result_code;
        if info.result_code.is_success() {
            self.selected_account_id = info.local_user_id.clone();
        }
    }

    fn result_code(&self) -> ResultCode {
        self.result
    }

    fn materialize_into(&self, event: &mut HostEvent) {
        set_selected_account(event, self.selected_account_id.as_ref());
    }
}

/// Completion of an offer query, with the offers copied out.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LoadProducts {
    result: ResultCode,
    selected_account_id: Option<AccountId>,
    products: Option<Vec<Product>>,
}

impl Default for LoadProducts {
    fn default() -> Self {
        Self {
            result: ResultCode::UNEXPECTED_ERROR,
            selected_account_id: None,
            products: None,
        }
    }
}

impl LoadProducts {
    pub fn products(&self) -> &[Product] {
        self.products.as_deref().unwrap_or_default()
    }
}

impl EventKind for LoadProducts {
    const EVENT_NAME: &'static str = event_names::LOAD_PRODUCTS;
    type Info = QueryOffersCallbackInfo;

    fn acquire_from(&mut self, info: &Self::Info, ecom: Option<&dyn EcomInterface>) {
        self.result = info.result_code;
        if !info.result_code.is_success() {
            return;
        }
        self.selected_account_id = info.local_user_id().cloned();
        let (Some(ecom), Some(user)) = (ecom, info.local_user_id()) else {
            return;
        };

        let count = ecom.offer_count(user);
        let mut products = Vec::with_capacity(count as usize);
        for index in 0..count {
            match ecom.copy_offer_by_index(user, index) {
                (code, Some(offer))
                    if code.is_success()
                        || code == ResultCode::ECOM_CATALOG_OFFER_PRICE_INVALID
                        || code == ResultCode::ECOM_CATALOG_OFFER_STALE =>
                {
                    match Product::try_from(&offer) {
                        Ok(product) => products.push(product),
                        Err(decimal_point) => {
                            warn!(index, decimal_point, "skipping catalog offer with an unusable price scale");
                        }
                    }
                }
                (code, _) => {
                    warn!(index, result = %code, "skipping catalog offer that failed to copy");
                }
            }
        }
        self.products = Some(products);
    }

    fn result_code(&self) -> ResultCode {
        self.result
    }

    fn materialize_into(&self, event: &mut HostEvent) {
        set_selected_account(event, self.selected_account_id.as_ref());
        if let Some(products) = &self.products {
            event.set(
                "products",
                products.iter().map(EventValue::from).collect::<Vec<_>>(),
            );
        }
    }
}

/// Completion of a checkout, with the entitlements the transaction granted.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CheckoutTransaction {
    result: ResultCode,
    selected_account_id: Option<AccountId>,
    transaction_id: Option<String>,
    transactions: Option<Vec<StoreTransaction>>,
}

impl Default for CheckoutTransaction {
    fn default() -> Self {
        Self {
            result: ResultCode::UNEXPECTED_ERROR,
            selected_account_id: None,
            transaction_id: None,
            transactions: None,
        }
    }
}

impl CheckoutTransaction {
    pub fn transaction_id(&self) -> Option<&str> {
        self.transaction_id.as_deref()
    }

    pub fn transactions(&self) -> &[StoreTransaction] {
        self.transactions.as_deref().unwrap_or_default()
    }
}

impl EventKind for CheckoutTransaction {
    const EVENT_NAME: &'static str = event_names::STORE_TRANSACTION;
    type Info = CheckoutCallbackInfo;

    fn acquire_from(&mut self, info: &Self::Info, ecom: Option<&dyn EcomInterface>) {
        self.result = info.result_code;
        self.transaction_id = info.transaction_id.clone();
        if !info.result_code.is_success() {
            return;
        }
        self.selected_account_id = info.local_user_id().cloned();
        let (Some(ecom), Some(user), Some(transaction_id)) =
            (ecom, info.local_user_id(), info.transaction_id.as_deref())
        else {
            return;
        };

        match ecom.copy_transaction_by_id(user, transaction_id) {
            Ok(transaction) => {
                self.transactions = Some(collect_entitlements(
                    transaction.entitlement_count(),
                    |index| transaction.copy_entitlement_by_index(index),
                ));
            }
            Err(code) => {
                warn!(transaction_id, result = %code, "failed to copy checkout transaction");
                self.transactions = Some(Vec::new());
            }
        }
    }

    fn result_code(&self) -> ResultCode {
        self.result
    }

    fn materialize_into(&self, event: &mut HostEvent) {
        set_selected_account(event, self.selected_account_id.as_ref());
        if let Some(transactions) = &self.transactions {
            event.set(
                "transactions",
                transactions.iter().map(EventValue::from).collect::<Vec<_>>(),
            );
        }
    }
}

/// Completion of an entitlement query (restore).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EntitlementsTransaction {
    result: ResultCode,
    selected_account_id: Option<AccountId>,
    transactions: Option<Vec<StoreTransaction>>,
}

impl Default for EntitlementsTransaction {
    fn default() -> Self {
        Self {
            result: ResultCode::UNEXPECTED_ERROR,
            selected_account_id: None,
            transactions: None,
        }
    }
}

impl EntitlementsTransaction {
    pub fn transactions(&self) -> &[StoreTransaction] {
        self.transactions.as_deref().unwrap_or_default()
    }
}

impl EventKind for EntitlementsTransaction {
    const EVENT_NAME: &'static str = event_names::STORE_TRANSACTION;
    type Info = QueryEntitlementsCallbackInfo;

    fn acquire_from(&mut self, info: &Self::Info, ecom: Option<&dyn EcomInterface>) {
        self.result = info.result_code;
        if !info.result_code.is_success() {
            return;
        }
        self.selected_account_id = info.local_user_id().cloned();
        let (Some(ecom), Some(user)) = (ecom, info.local_user_id()) else {
            return;
        };
        self.transactions = Some(collect_entitlements(
            ecom.entitlement_count(user),
            |index| ecom.copy_entitlement_by_index(user, index),
        ));
    }

    fn result_code(&self) -> ResultCode {
        self.result
    }

    fn materialize_into(&self, event: &mut HostEvent) {
        set_selected_account(event, self.selected_account_id.as_ref());
        if let Some(transactions) = &self.transactions {
            event.set(
                "transactions",
                transactions.iter().map(EventValue::from).collect::<Vec<_>>(),
            );
        }
    }
}
