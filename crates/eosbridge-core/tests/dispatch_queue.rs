//! Dispatch queue integration tests.
//!
//! Drives runtime contexts through a native `FrameHost` and the simulated
//! SDK, checking ordering, reentrancy, teardown and end-to-end event shapes.

use eosbridge_core::config::BridgeConfig;
use eosbridge_core::dispatcher::{EventDispatcher, ListenerDispatcher};
use eosbridge_core::event::{EventValue, HostEvent, event_names};
use eosbridge_core::host::{CoroutineHost, FrameHost, HostRuntime};
use eosbridge_core::sdk::{
    AccountId, CatalogOffer, Entitlement, LoginCallbackInfo, LoginCredentials,
    QueryOffersCallbackInfo, ResultCode,
};
use eosbridge_core::sdk_guard::SdkGuard;
use eosbridge_core::simulator::{SimulatedSdk, SimulatorConfig};
use eosbridge_core::task::{DispatchTask, LoadProducts, LoginResponse, QueuedTask};
use eosbridge_core::{ContextEnv, Error, InstanceRegistry, RuntimeContext};
use parking_lot::Mutex;
use proptest::prelude::*;
use std::sync::{Arc, Weak};

// =============================================================================
// Fixture
// =============================================================================

struct Fixture {
    frame: Arc<FrameHost>,
    sdk: Arc<SimulatedSdk>,
    env: ContextEnv,
    dispatcher: Arc<ListenerDispatcher>,
    context: Arc<RuntimeContext>,
    events: Arc<Mutex<Vec<HostEvent>>>,
}

fn env_for(sdk: &Arc<SimulatedSdk>) -> ContextEnv {
    ContextEnv::new(
        Arc::new(InstanceRegistry::new()),
        SdkGuard::new(sdk.clone()),
    )
}

fn context_on(
    host: Arc<dyn HostRuntime>,
    env: &ContextEnv,
) -> (Arc<RuntimeContext>, Arc<ListenerDispatcher>) {
    let dispatcher = Arc::new(ListenerDispatcher::new(&host));
    let for_context: Arc<dyn EventDispatcher> = dispatcher.clone();
    let context = RuntimeContext::new(Some(host), env, move |_| for_context).unwrap();
    (context, dispatcher)
}

fn record_all(dispatcher: &ListenerDispatcher) -> Arc<Mutex<Vec<HostEvent>>> {
    let events = Arc::new(Mutex::new(Vec::new()));
    for name in [
        event_names::LOGIN_RESPONSE,
        event_names::LOAD_PRODUCTS,
        event_names::STORE_TRANSACTION,
    ] {
        let e = Arc::clone(&events);
        dispatcher.add_listener(name, move |event| {
            e.lock().push(event.clone());
            Ok(())
        });
    }
    events
}

fn fixture(config: SimulatorConfig) -> Fixture {
    let sdk = SimulatedSdk::new(config);
    let env = env_for(&sdk);
    let frame = FrameHost::new();
    let (context, dispatcher) = context_on(frame.clone(), &env);
    let events = record_all(&dispatcher);
    Fixture {
        frame,
        sdk,
        env,
        dispatcher,
        context,
        events,
    }
}

fn connected(config: SimulatorConfig) -> Fixture {
    let fx = fixture(config);
    fx.context.connect(&BridgeConfig::default()).unwrap();
    fx
}

fn logged_in(config: SimulatorConfig) -> Fixture {
    let fx = connected(config);
    fx.context.login_with_account_portal().unwrap();
    fx.frame.enter_frame();
    assert!(fx.context.is_logged_on());
    fx.events.lock().clear();
    fx
}

fn login_info(code: ResultCode, handle_from: &RuntimeContext) -> LoginCallbackInfo {
    LoginCallbackInfo {
        result_code: code,
        client_data: Some(handle_from.handle()),
        local_user_id: Some(AccountId::new("abc123")),
    }
}

fn offer(id: &str, cents: u64, price_result: ResultCode) -> CatalogOffer {
    CatalogOffer {
        id: id.to_string(),
        catalog_item_id: format!("item-{id}"),
        title: format!("Title {id}"),
        description: format!("Description {id}"),
        currency_code: "USD".to_string(),
        price_result,
        current_price: cents,
        decimal_point: 2,
    }
}

fn str_field<'a>(event: &'a HostEvent, key: &str) -> Option<&'a str> {
    event.get(key).and_then(EventValue::as_str)
}

// =============================================================================
// Queue ordering and reentrancy
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn drain_preserves_fifo_order(codes in proptest::collection::vec(0i32..20_000, 0..40)) {
        let fx = fixture(SimulatorConfig::default());
        for code in &codes {
            fx.context
                .on_handle_global_event::<LoginResponse>(&login_info(ResultCode(*code), &fx.context));
        }
        prop_assert_eq!(fx.context.queued_len(), codes.len());

        fx.frame.enter_frame();

        let delivered: Vec<i32> = fx
            .events
            .lock()
            .iter()
            .map(|e| e.get("resultCode").and_then(EventValue::as_i64).unwrap() as i32)
            .collect();
        prop_assert_eq!(delivered, codes);
        prop_assert_eq!(fx.context.queued_len(), 0);
    }
}

#[test]
fn callbacks_fired_by_tick_are_delivered_in_same_frame() {
    let fx = connected(SimulatorConfig::default());
    fx.context.login(LoginCredentials::PersistentAuth).unwrap();
    assert!(fx.events.lock().is_empty());

    fx.frame.enter_frame();

    let events = fx.events.lock();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].name(), event_names::LOGIN_RESPONSE);
    assert_eq!(fx.context.queued_len(), 0);
}

#[test]
fn tasks_pushed_during_drain_are_delivered_in_same_pass() {
    let fx = fixture(SimulatorConfig::default());
    let registry = Arc::clone(&fx.env.registry);
    let host_id = fx.context.host_id();
    fx.dispatcher
        .add_listener(event_names::LOGIN_RESPONSE, move |_| {
            let context = registry.instance_for_id(host_id).expect("context is live");
            context.on_handle_global_event::<LoadProducts>(&QueryOffersCallbackInfo {
                result_code: ResultCode::SUCCESS,
                client_data: None,
                local_user_id: None,
            });
            Ok(())
        });

    fx.context
        .on_handle_global_event::<LoginResponse>(&login_info(ResultCode::SUCCESS, &fx.context));
    fx.frame.enter_frame();

    let names: Vec<String> = fx.events.lock().iter().map(|e| e.name().to_string()).collect();
    assert_eq!(names, vec!["loginResponse", "loadProducts"]);
    assert_eq!(fx.context.queued_len(), 0);
}

#[test]
fn task_without_dispatcher_is_dropped_without_disturbing_queue() {
    let fx = fixture(SimulatorConfig::default());
    let mut orphan = DispatchTask::<LoginResponse>::new();
    orphan.acquire_from(&login_info(ResultCode::SUCCESS, &fx.context), None);
    assert!(!orphan.execute());

    fx.context.push_task(Arc::new(orphan));
    fx.context
        .on_handle_global_event::<LoginResponse>(&login_info(ResultCode::CANCELED, &fx.context));
    fx.frame.enter_frame();

    let events = fx.events.lock();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].get("resultCode").and_then(EventValue::as_i64), Some(17));
    assert_eq!(fx.context.queued_len(), 0);
}

#[test]
fn suspended_host_keeps_events_queued() {
    let fx = fixture(SimulatorConfig::default());
    fx.context
        .on_handle_global_event::<LoginResponse>(&login_info(ResultCode::SUCCESS, &fx.context));

    fx.frame.suspend();
    fx.frame.enter_frame();
    assert_eq!(fx.context.queued_len(), 1);
    assert!(!fx.dispatcher.is_bound());

    fx.frame.resume();
    fx.frame.enter_frame();
    assert_eq!(fx.events.lock().len(), 1);
}

// =============================================================================
// Lifecycle
// =============================================================================

#[test]
fn destroying_context_drops_queued_tasks_undelivered() {
    let fx = connected(SimulatorConfig::default());
    let mut weak_tasks: Vec<Weak<dyn QueuedTask>> = Vec::new();
    for _ in 0..5 {
        let mut task = DispatchTask::<LoginResponse>::new();
        task.set_dispatcher(Arc::clone(fx.context.dispatcher()));
        task.acquire_from(&login_info(ResultCode::SUCCESS, &fx.context), None);
        let task: Arc<dyn QueuedTask> = Arc::new(task);
        weak_tasks.push(Arc::downgrade(&task));
        fx.context.push_task(task);
    }

    let Fixture {
        frame,
        sdk,
        env,
        context,
        events,
        ..
    } = fx;
    drop(context);

    assert!(weak_tasks.iter().all(|w| w.upgrade().is_none()));
    assert_eq!(frame.frame_listener_count(), 0);
    frame.enter_frame();
    assert!(events.lock().is_empty());

    assert!(env.registry.is_empty());
    let stats = sdk.stats();
    assert_eq!(stats.platforms_released, 1);
    assert_eq!(stats.shutdown_calls, 1);
}

#[test]
fn construction_without_host_fails() {
    let sdk = SimulatedSdk::new(SimulatorConfig::default());
    let env = env_for(&sdk);
    let result = RuntimeContext::new(None, &env, |host| {
        Arc::new(ListenerDispatcher::new(host)) as Arc<dyn EventDispatcher>
    });
    assert!(matches!(result, Err(Error::NullHostContext)));
    assert!(env.registry.is_empty());
}

#[test]
fn second_context_from_other_thread_fails() {
    let fx = fixture(SimulatorConfig::default());
    let env = fx.env.clone();
    let other: Arc<dyn HostRuntime> = FrameHost::new();

    let remote_host = Arc::clone(&other);
    let result = std::thread::spawn(move || {
        RuntimeContext::new(Some(remote_host), &env, |host| {
            Arc::new(ListenerDispatcher::new(host)) as Arc<dyn EventDispatcher>
        })
        .map(|_| ())
    })
    .join()
    .unwrap();
    assert!(matches!(result, Err(Error::ThreadAffinity { .. })));
    assert_eq!(fx.env.registry.len(), 1);

    let (same_thread, _) = context_on(other, &fx.env);
    assert_eq!(fx.env.registry.len(), 2);
    drop(same_thread);
    assert_eq!(fx.env.registry.len(), 1);
}

#[test]
fn second_context_for_same_host_is_rejected() {
    let fx = fixture(SimulatorConfig::default());
    let main: Arc<dyn HostRuntime> = fx.frame.clone();
    let co: Arc<dyn HostRuntime> = CoroutineHost::new(&main);

    for host in [main, co] {
        let result = RuntimeContext::new(Some(host), &fx.env, |host| {
            Arc::new(ListenerDispatcher::new(host)) as Arc<dyn EventDispatcher>
        });
        assert!(matches!(result, Err(Error::DuplicateHost(id)) if id == fx.frame.id()));
    }
    assert_eq!(fx.env.registry.len(), 1);
    assert_eq!(fx.frame.frame_listener_count(), 1);

    let Fixture { frame, env, context, .. } = fx;
    drop(context);
    let (rebound, _) = context_on(frame.clone(), &env);
    assert_eq!(env.registry.len(), 1);
    assert_eq!(rebound.host_id(), frame.id());
}

#[test]
fn coroutine_host_resolves_to_main_context() {
    let fx = fixture(SimulatorConfig::default());
    let main: Arc<dyn HostRuntime> = fx.frame.clone();
    let co: Arc<dyn HostRuntime> = CoroutineHost::new(&main);

    let by_main = fx.env.registry.instance_for(&main).unwrap();
    let by_co = fx.env.registry.instance_for(&co).unwrap();
    assert!(Arc::ptr_eq(&by_main, &fx.context));
    assert!(Arc::ptr_eq(&by_co, &fx.context));
}

#[test]
fn context_created_from_coroutine_binds_main_host() {
    let sdk = SimulatedSdk::new(SimulatorConfig::default());
    let env = env_for(&sdk);
    let frame = FrameHost::new();
    let main: Arc<dyn HostRuntime> = frame.clone();
    let co: Arc<dyn HostRuntime> = CoroutineHost::new(&main);

    let (context, _) = context_on(co, &env);
    assert_eq!(context.host_id(), main.id());
    assert_eq!(frame.frame_listener_count(), 1);
}

#[test]
fn sdk_initialized_once_and_shut_down_with_last_context() {
    let fx = connected(SimulatorConfig::default());
    let (second, _) = context_on(FrameHost::new(), &fx.env);
    second.connect(&BridgeConfig::default()).unwrap();

    assert_eq!(fx.sdk.stats().initialize_calls, 1);
    assert_eq!(fx.sdk.stats().platforms_created, 2);

    drop(second);
    assert_eq!(fx.sdk.stats().shutdown_calls, 0);

    let Fixture { sdk, context, .. } = fx;
    drop(context);
    assert_eq!(sdk.stats().shutdown_calls, 1);
    assert_eq!(sdk.stats().platforms_released, 2);
}

#[test]
fn callback_for_destroyed_context_is_ignored() {
    let sdk = SimulatedSdk::new(SimulatorConfig::default());
    let env = env_for(&sdk);

    let (first, _) = context_on(FrameHost::new(), &env);
    first.connect(&BridgeConfig::default()).unwrap();
    first.login_with_account_portal().unwrap();
    drop(first);

    let frame = FrameHost::new();
    let (second, dispatcher) = context_on(frame.clone(), &env);
    let events = record_all(&dispatcher);
    second.connect(&BridgeConfig::default()).unwrap();

    frame.enter_frame();
    assert_eq!(sdk.stats().callbacks_fired, 1);
    assert!(events.lock().is_empty());
    assert!(!second.is_logged_on());
}

#[test]
fn failed_platform_creation_keeps_lease_until_drop() {
    let fx = fixture(SimulatorConfig {
        platform_available: false,
        ..SimulatorConfig::default()
    });
    let err = fx.context.connect(&BridgeConfig::default()).unwrap_err();
    assert!(matches!(err, Error::PlatformUnavailable));
    assert_eq!(fx.env.sdk.lease_count(), 1);
    assert!(matches!(
        fx.context.login_with_account_portal(),
        Err(Error::NoPlatform)
    ));

    let Fixture { sdk, context, .. } = fx;
    drop(context);
    assert_eq!(sdk.stats().shutdown_calls, 1);
}

// =============================================================================
// End-to-end event shapes
// =============================================================================

#[test]
fn login_success_event() {
    let fx = connected(SimulatorConfig {
        account_id: "abc123".to_string(),
        ..SimulatorConfig::default()
    });
    fx.context.login_with_account_portal().unwrap();
    fx.frame.enter_frame();

    let events = fx.events.lock();
    assert_eq!(events.len(), 1);
    let event = &events[0];
    assert_eq!(event.name(), "loginResponse");
    assert_eq!(
        event.fields().keys(),
        vec!["isError", "resultCode", "selectedAccountId"]
    );
    assert_eq!(event.get("isError").and_then(EventValue::as_bool), Some(false));
    assert_eq!(event.get("resultCode").and_then(EventValue::as_i64), Some(0));
    assert_eq!(str_field(event, "selectedAccountId"), Some("abc123"));
    assert_eq!(fx.context.account_id(), Some(AccountId::new("abc123")));
    assert!(fx.context.is_logged_on());
}

#[test]
fn login_failure_event_and_no_session() {
    let fx = connected(SimulatorConfig {
        login_result: ResultCode::INVALID_CREDENTIALS,
        ..SimulatorConfig::default()
    });
    fx.context
        .login(LoginCredentials::ExchangeCode("code".to_string()))
        .unwrap();
    fx.frame.enter_frame();

    let events = fx.events.lock();
    assert_eq!(events[0].get("isError").and_then(EventValue::as_bool), Some(true));
    assert_eq!(events[0].get("resultCode").and_then(EventValue::as_i64), Some(2));
    assert!(events[0].get("selectedAccountId").is_none());
    assert!(!fx.context.is_logged_on());
    assert!(fx.context.auth_id_token().is_none());
}

#[test]
fn load_products_event_keeps_offer_order() {
    let fx = logged_in(SimulatorConfig {
        offers: vec![
            offer("gems", 499, ResultCode::SUCCESS),
            offer("coins", 1999, ResultCode::ECOM_CATALOG_OFFER_PRICE_INVALID),
        ],
        ..SimulatorConfig::default()
    });
    fx.context.load_products().unwrap();
    fx.frame.enter_frame();

    let events = fx.events.lock();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].name(), "loadProducts");
    assert_eq!(
        events[0].fields().keys(),
        vec!["isError", "resultCode", "selectedAccountId", "products"]
    );
    assert_eq!(str_field(&events[0], "selectedAccountId"), Some("sim-account"));
    let products = events[0].get("products").and_then(EventValue::as_list).unwrap();
    assert_eq!(products.len(), 2);

    let first = products[0].as_table().unwrap();
    let second = products[1].as_table().unwrap();
    assert_eq!(
        first.get("productIdentifier").and_then(EventValue::as_str),
        Some("gems")
    );
    assert_eq!(
        first.get("localizedPrice").and_then(EventValue::as_str),
        Some("USD4.99")
    );
    assert_eq!(
        first.get("description").and_then(EventValue::as_str),
        Some("Description gems")
    );
    assert_eq!(first.get("priceIsValid").and_then(EventValue::as_bool), Some(true));
    assert_eq!(
        second.get("productIdentifier").and_then(EventValue::as_str),
        Some("coins")
    );
    assert_eq!(second.get("priceIsValid").and_then(EventValue::as_bool), Some(false));
}

#[test]
fn offer_copy_failure_skips_only_that_offer() {
    let fx = logged_in(SimulatorConfig {
        offers: vec![
            offer("a", 100, ResultCode::SUCCESS),
            offer("b", 200, ResultCode::SUCCESS),
            offer("c", 300, ResultCode::SUCCESS),
        ],
        failing_offer_copies: vec![1],
        ..SimulatorConfig::default()
    });
    fx.context.load_products().unwrap();
    fx.frame.enter_frame();

    let events = fx.events.lock();
    let ids: Vec<&str> = events[0]
        .get("products")
        .and_then(EventValue::as_list)
        .unwrap()
        .iter()
        .filter_map(|p| p.as_table()?.get("productIdentifier")?.as_str())
        .collect();
    assert_eq!(ids, vec!["a", "c"]);
    assert_eq!(events[0].get("isError").and_then(EventValue::as_bool), Some(false));
}

#[test]
fn offer_with_oversized_price_scale_is_skipped() {
    let mut corrupt = offer("corrupt", 100, ResultCode::SUCCESS);
    corrupt.decimal_point = u32::MAX;
    let fx = logged_in(SimulatorConfig {
        offers: vec![offer("gems", 499, ResultCode::SUCCESS), corrupt],
        ..SimulatorConfig::default()
    });
    fx.context.load_products().unwrap();
    fx.frame.enter_frame();

    let events = fx.events.lock();
    let products = events[0].get("products").and_then(EventValue::as_list).unwrap();
    assert_eq!(products.len(), 1);
    assert_eq!(
        products[0].as_table().unwrap().get("productIdentifier").and_then(EventValue::as_str),
        Some("gems")
    );
}

#[test]
fn non_success_result_has_no_collections() {
    let fx = logged_in(SimulatorConfig {
        offers: vec![offer("gems", 499, ResultCode::SUCCESS)],
        query_offers_result: ResultCode::ACCESS_DENIED,
        checkout_result: ResultCode::CANCELED,
        ..SimulatorConfig::default()
    });
    fx.context.load_products().unwrap();
    fx.context.purchase("gems").unwrap();
    fx.frame.enter_frame();

    let events = fx.events.lock();
    assert_eq!(events.len(), 2);
    assert_eq!(events[0].name(), "loadProducts");
    assert_eq!(events[0].get("isError").and_then(EventValue::as_bool), Some(true));
    assert_eq!(events[0].get("resultCode").and_then(EventValue::as_i64), Some(5));
    assert!(events[0].get("products").is_none());
    assert!(events[0].get("selectedAccountId").is_none());

    assert_eq!(events[1].name(), "storeTransaction");
    assert_eq!(events[1].get("resultCode").and_then(EventValue::as_i64), Some(17));
    assert!(events[1].get("transactions").is_none());
    assert!(events[1].get("selectedAccountId").is_none());
}

#[test]
fn purchase_then_restore_report_entitlements() {
    let fx = logged_in(SimulatorConfig {
        offers: vec![offer("gems", 499, ResultCode::SUCCESS)],
        entitlements: vec![Entitlement {
            entitlement_id: "ent-old".to_string(),
            catalog_item_id: "item-legacy".to_string(),
            redeemed: true,
        }],
        ..SimulatorConfig::default()
    });

    fx.context.purchase("gems").unwrap();
    fx.frame.enter_frame();
    fx.context.restore().unwrap();
    fx.frame.enter_frame();

    let events = fx.events.lock();
    assert_eq!(events.len(), 2);
    assert!(events.iter().all(|e| e.name() == "storeTransaction"));
    assert!(
        events
            .iter()
            .all(|e| str_field(e, "selectedAccountId") == Some("sim-account"))
    );

    let bought = events[0].get("transactions").and_then(EventValue::as_list).unwrap();
    assert_eq!(bought.len(), 1);
    let entry = bought[0].as_table().unwrap();
    assert_eq!(entry.get("receipt").and_then(EventValue::as_str), Some("item-gems"));
    assert_eq!(
        entry.get("productIdentifier").and_then(EventValue::as_str),
        Some("item-gems")
    );

    let restored = events[1].get("transactions").and_then(EventValue::as_list).unwrap();
    let receipts: Vec<&str> = restored
        .iter()
        .filter_map(|t| t.as_table()?.get("receipt")?.as_str())
        .collect();
    assert_eq!(receipts, vec!["item-legacy", "item-gems"]);
    assert_eq!(fx.sdk.stats().open_transactions, 0);
}

// =============================================================================
// Operation preconditions
// =============================================================================

#[test]
fn operations_require_platform_and_session() {
    let fx = fixture(SimulatorConfig::default());
    assert!(matches!(fx.context.load_products(), Err(Error::NoPlatform)));
    assert!(!fx.context.is_logged_on());

    fx.context.connect(&BridgeConfig::default()).unwrap();
    assert!(matches!(fx.context.load_products(), Err(Error::NotLoggedOn)));
    assert!(matches!(fx.context.restore(), Err(Error::NotLoggedOn)));
    assert!(matches!(
        fx.context.purchase(""),
        Err(Error::InvalidArgument(_))
    ));
}

#[test]
fn notification_position_is_validated() {
    let fx = connected(SimulatorConfig::default());
    fx.context.set_notification_position("topRight").unwrap();
    assert_eq!(
        fx.sdk.notification_position(),
        Some(eosbridge_core::sdk::NotificationPosition::TopRight)
    );
    assert!(matches!(
        fx.context.set_notification_position("center"),
        Err(Error::InvalidArgument(_))
    ));
}

#[test]
fn id_token_available_after_login() {
    let fx = logged_in(SimulatorConfig::default());
    let token = fx.context.auth_id_token().unwrap();
    assert!(token.contains("sim-account"));
}
