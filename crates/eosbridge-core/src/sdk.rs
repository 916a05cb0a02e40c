//! Boundary to the online-services SDK.
//!
//! The SDK is callback driven: requests take a `client_data` handle and a
//! boxed callback, and the callback fires later from inside
//! [`Platform::tick`]. Everything a callback hands over is owned data, so no
//! reference into SDK memory outlives the callback.
//!
//! Production builds implement these traits over the native library; the
//! [`crate::simulator`] module implements them in-process.

use crate::registry::ContextHandle;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

// ---------------------------------------------------------------------------
// Result codes
// ---------------------------------------------------------------------------

/// Numeric result code reported by every SDK operation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResultCode(pub i32);

impl ResultCode {
    pub const SUCCESS: Self = Self(0);
    pub const NO_CONNECTION: Self = Self(1);
    pub const INVALID_CREDENTIALS: Self = Self(2);
    pub const INVALID_USER: Self = Self(3);
    pub const INVALID_AUTH: Self = Self(4);
    pub const ACCESS_DENIED: Self = Self(5);
    pub const TOO_MANY_REQUESTS: Self = Self(8);
    pub const ALREADY_PENDING: Self = Self(9);
    pub const INVALID_PARAMETERS: Self = Self(10);
    pub const NOT_CONFIGURED: Self = Self(14);
    pub const ALREADY_CONFIGURED: Self = Self(15);
    pub const CANCELED: Self = Self(17);
    pub const NOT_FOUND: Self = Self(18);
    pub const OPERATION_WILL_RETRY: Self = Self(19);
    pub const ECOM_ENTITLEMENT_STALE: Self = Self(10000);
    pub const ECOM_CATALOG_OFFER_STALE: Self = Self(10001);
    pub const ECOM_CATALOG_ITEM_STALE: Self = Self(10002);
    pub const ECOM_CATALOG_OFFER_PRICE_INVALID: Self = Self(10003);
    pub const UNEXPECTED_ERROR: Self = Self(0x7FFF_FFFF);

    pub const fn is_success(self) -> bool {
        self.0 == Self::SUCCESS.0
    }

    /// False while the SDK intends to invoke the same callback again.
    pub const fn is_operation_complete(self) -> bool {
        self.0 != Self::OPERATION_WILL_RETRY.0
    }

    /// Transport-level failure, independent of the operation's own outcome.
    pub const fn is_transport_failure(self) -> bool {
        self.0 == Self::NO_CONNECTION.0
    }

    /// Symbolic name, when the code is one this crate knows.
    pub const fn name(self) -> Option<&'static str> {
        Some(match self {
            Self::SUCCESS => "Success",
            Self::NO_CONNECTION => "NoConnection",
            Self::INVALID_CREDENTIALS => "InvalidCredentials",
            Self::INVALID_USER => "InvalidUser",
            Self::INVALID_AUTH => "InvalidAuth",
            Self::ACCESS_DENIED => "AccessDenied",
            Self::TOO_MANY_REQUESTS => "TooManyRequests",
            Self::ALREADY_PENDING => "AlreadyPending",
            Self::INVALID_PARAMETERS => "InvalidParameters",
            Self::NOT_CONFIGURED => "NotConfigured",
            Self::ALREADY_CONFIGURED => "AlreadyConfigured",
            Self::CANCELED => "Canceled",
            Self::NOT_FOUND => "NotFound",
            Self::OPERATION_WILL_RETRY => "OperationWillRetry",
            Self::ECOM_ENTITLEMENT_STALE => "Ecom_EntitlementStale",
            Self::ECOM_CATALOG_OFFER_STALE => "Ecom_CatalogOfferStale",
            Self::ECOM_CATALOG_ITEM_STALE => "Ecom_CatalogItemStale",
            Self::ECOM_CATALOG_OFFER_PRICE_INVALID => "Ecom_CatalogOfferPriceInvalid",
            Self::UNEXPECTED_ERROR => "UnexpectedError",
            _ => return None,
        })
    }
}

impl fmt::Display for ResultCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name() {
            Some(name) => write!(f, "{name} ({})", self.0),
            None => write!(f, "Unknown ({})", self.0),
        }
    }
}

// ---------------------------------------------------------------------------
// Plain data copied out of the SDK
// ---------------------------------------------------------------------------

/// Account identifier as reported by the auth interface.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AccountId(String);

impl AccountId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One catalog offer, copied by index after a successful offer query.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogOffer {
    pub id: String,
    #[serde(default)]
    pub catalog_item_id: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub currency_code: String,
    /// Outcome of the price lookup for this offer.
    #[serde(default = "success_code")]
    pub price_result: ResultCode,
    /// Price in minor units; divide by `10^decimal_point`.
    pub current_price: u64,
    pub decimal_point: u32,
}

fn success_code() -> ResultCode {
    ResultCode::SUCCESS
}

impl CatalogOffer {
    /// Largest `decimal_point` whose scale fits a `u64` price.
    pub const MAX_DECIMAL_POINT: u32 = 19;

    /// Currency code followed by the price with `decimal_point` fraction digits.
    ///
    /// `None` when `decimal_point` exceeds [`Self::MAX_DECIMAL_POINT`].
    pub fn localized_price(&self) -> Option<String> {
        if self.decimal_point > Self::MAX_DECIMAL_POINT {
            return None;
        }
        if self.decimal_point == 0 {
            return Some(format!("{}{}", self.currency_code, self.current_price));
        }
        let scale = 10u64.checked_pow(self.decimal_point)?;
        let whole = self.current_price / scale;
        let fraction = self.current_price % scale;
        Some(format!(
            "{}{whole}.{fraction:0width$}",
            self.currency_code,
            width = self.decimal_point as usize
        ))
    }
}

/// One entitlement owned by an account or granted by a transaction.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entitlement {
    pub entitlement_id: String,
    pub catalog_item_id: String,
    #[serde(default)]
    pub redeemed: bool,
}

// ---------------------------------------------------------------------------
// Options
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InitializeOptions {
    pub product_name: String,
    pub product_version: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PlatformOptions {
    pub product_id: String,
    pub sandbox_id: String,
    pub deployment_id: String,
    pub client_id: String,
    pub client_secret: String,
    pub encryption_key: String,
}

/// Credentials presented to [`AuthInterface::login`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LoginCredentials {
    /// Refresh token persisted by the SDK on mobile platforms.
    PersistentAuth,
    /// Exchange code handed over by the launcher.
    ExchangeCode(String),
    /// Interactive account portal overlay.
    AccountPortal,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AuthScope {
    BasicProfile,
    FriendsList,
    Presence,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LoginOptions {
    pub credentials: LoginCredentials,
    pub scopes: Vec<AuthScope>,
}

impl LoginOptions {
    pub fn new(credentials: LoginCredentials) -> Self {
        Self {
            credentials,
            scopes: vec![AuthScope::BasicProfile],
        }
    }
}

/// Corner used by the SDK overlay for its notifications.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NotificationPosition {
    TopLeft,
    TopRight,
    BottomLeft,
    BottomRight,
}

impl FromStr for NotificationPosition {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "topLeft" => Ok(Self::TopLeft),
            "topRight" => Ok(Self::TopRight),
            "bottomLeft" => Ok(Self::BottomLeft),
            "bottomRight" => Ok(Self::BottomRight),
            _ => Err(format!(
                "unknown notification position: {s}. Expected one of: topLeft, topRight, bottomLeft, bottomRight"
            )),
        }
    }
}

// ---------------------------------------------------------------------------
// Callback payloads
// ---------------------------------------------------------------------------

/// Fields shared by every callback payload.
pub trait CallbackInfo {
    fn result_code(&self) -> ResultCode;

    /// Handle passed by the call site that issued the request.
    fn client_data(&self) -> Option<ContextHandle>;

    fn local_user_id(&self) -> Option<&AccountId>;
}

macro_rules! callback_info {
    ($(#[$meta:meta])* $name:ident { $($(#[$fmeta:meta])* $field:ident: $ty:ty),* $(,)? }) => {
        $(#[$meta])*
        #[derive(Clone, Debug, PartialEq, Eq)]
        pub struct $name {
            pub result_code: ResultCode,
            pub client_data: Option<ContextHandle>,
            pub local_user_id: Option<AccountId>,
            $($(#[$fmeta])* pub $field: $ty,)*
        }

        impl CallbackInfo for $name {
            fn result_code(&self) -> ResultCode {
                self.result_code
            }

            fn client_data(&self) -> Option<ContextHandle> {
                self.client_data
            }

            fn local_user_id(&self) -> Option<&AccountId> {
                self.local_user_id.as_ref()
            }
        }
    };
}

callback_info!(
    /// Completion of [`AuthInterface::login`].
    LoginCallbackInfo {}
);
callback_info!(
    /// Completion of [`EcomInterface::query_offers`].
    QueryOffersCallbackInfo {}
);
callback_info!(
    /// Completion of [`EcomInterface::checkout`].
    CheckoutCallbackInfo {
        /// Set when the checkout produced a transaction.
        transaction_id: Option<String>,
    }
);
callback_info!(
    /// Completion of [`EcomInterface::query_entitlements`].
    QueryEntitlementsCallbackInfo {}
);

pub type LoginCallback = Box<dyn FnMut(&LoginCallbackInfo) + Send>;
pub type QueryOffersCallback = Box<dyn FnMut(&QueryOffersCallbackInfo) + Send>;
pub type CheckoutCallback = Box<dyn FnMut(&CheckoutCallbackInfo) + Send>;
pub type QueryEntitlementsCallback = Box<dyn FnMut(&QueryEntitlementsCallbackInfo) + Send>;

// ---------------------------------------------------------------------------
// Logging hook
// ---------------------------------------------------------------------------

/// Severity attached to SDK log messages.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum SdkLogLevel {
    Off,
    Fatal,
    Error,
    Warning,
    Info,
    Verbose,
    VeryVerbose,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LogMessage {
    pub category: String,
    pub message: String,
    pub level: SdkLogLevel,
}

pub type LogCallback = Box<dyn Fn(&LogMessage) + Send + Sync>;

// ---------------------------------------------------------------------------
// Interfaces
// ---------------------------------------------------------------------------

/// Process-global SDK entry points.
pub trait Sdk: Send + Sync {
    fn initialize(&self, options: &InitializeOptions) -> ResultCode;

    fn shutdown(&self) -> ResultCode;

    fn set_log_callback(&self, level: SdkLogLevel, callback: LogCallback) -> ResultCode;

    fn create_platform(&self, options: &PlatformOptions) -> Option<Arc<dyn Platform>>;
}

/// One platform instance. Callbacks for requests issued through it fire
/// from inside [`Platform::tick`].
pub trait Platform: Send + Sync {
    fn tick(&self);

    fn release(&self);

    fn auth(&self) -> Arc<dyn AuthInterface>;

    fn ecom(&self) -> Arc<dyn EcomInterface>;

    fn set_notification_position(&self, position: NotificationPosition) -> ResultCode;
}

pub trait AuthInterface: Send + Sync {
    fn login(
        &self,
        options: &LoginOptions,
        client_data: Option<ContextHandle>,
        callback: LoginCallback,
    );

    /// Copy the id token (a JSON web token) for a logged-in account.
    fn copy_id_token(&self, account: &AccountId) -> Result<String, ResultCode>;
}

pub trait EcomInterface: Send + Sync {
    fn query_offers(
        &self,
        local_user: &AccountId,
        client_data: Option<ContextHandle>,
        callback: QueryOffersCallback,
    );

    fn offer_count(&self, local_user: &AccountId) -> u32;

    /// Copy one offer. The code may be a non-fatal warning such as
    /// [`ResultCode::ECOM_CATALOG_OFFER_STALE`] alongside a valid offer.
    fn copy_offer_by_index(
        &self,
        local_user: &AccountId,
        index: u32,
    ) -> (ResultCode, Option<CatalogOffer>);

    fn checkout(
        &self,
        local_user: &AccountId,
        offer_ids: &[String],
        client_data: Option<ContextHandle>,
        callback: CheckoutCallback,
    );

    /// The returned transaction is released when the last handle drops.
    fn copy_transaction_by_id(
        &self,
        local_user: &AccountId,
        transaction_id: &str,
    ) -> Result<Arc<dyn Transaction>, ResultCode>;

    fn query_entitlements(
        &self,
        local_user: &AccountId,
        include_redeemed: bool,
        client_data: Option<ContextHandle>,
        callback: QueryEntitlementsCallback,
    );

    fn entitlement_count(&self, local_user: &AccountId) -> u32;

    fn copy_entitlement_by_index(
        &self,
        local_user: &AccountId,
        index: u32,
    ) -> (ResultCode, Option<Entitlement>);
}

/// A completed checkout transaction.
pub trait Transaction: Send + Sync {
    fn id(&self) -> &str;

    fn entitlement_count(&self) -> u32;

    fn copy_entitlement_by_index(&self, index: u32) -> (ResultCode, Option<Entitlement>);
}
