//! Bridge configuration (TOML) and launcher argument parsing.

use crate::error::{Error, Result};
use crate::logging::LogConfig;
use crate::sdk::{InitializeOptions, PlatformOptions};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Top-level configuration file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    pub sdk: SdkSection,
    pub platform: PlatformSection,
    pub logging: LogConfig,
}

/// `[sdk]`: values passed to SDK initialization.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SdkSection {
    pub product_name: String,
    pub product_version: String,
}

impl Default for SdkSection {
    fn default() -> Self {
        Self {
            product_name: "Coromon".to_string(),
            product_version: "1.3.6".to_string(),
        }
    }
}

impl SdkSection {
    pub fn initialize_options(&self) -> InitializeOptions {
        InitializeOptions {
            product_name: self.product_name.clone(),
            product_version: self.product_version.clone(),
        }
    }
}

/// `[platform]`: credentials for platform creation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PlatformSection {
    pub product_id: String,
    pub sandbox_id: String,
    pub deployment_id: String,
    pub client_id: String,
    pub client_secret: String,
    pub encryption_key: String,
}

impl PlatformSection {
    pub fn platform_options(&self) -> PlatformOptions {
        PlatformOptions {
            product_id: self.product_id.clone(),
            sandbox_id: self.sandbox_id.clone(),
            deployment_id: self.deployment_id.clone(),
            client_id: self.client_id.clone(),
            client_secret: self.client_secret.clone(),
            encryption_key: self.encryption_key.clone(),
        }
    }
}

impl BridgeConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    pub fn from_toml_str(text: &str) -> Result<Self> {
        Ok(toml::from_str(text)?)
    }

    /// Check the fields platform creation cannot do without.
    pub fn validate(&self) -> Result<()> {
        let required = [
            ("sdk.product_name", &self.sdk.product_name),
            ("sdk.product_version", &self.sdk.product_version),
            ("platform.product_id", &self.platform.product_id),
            ("platform.sandbox_id", &self.platform.sandbox_id),
            ("platform.deployment_id", &self.platform.deployment_id),
            ("platform.client_id", &self.platform.client_id),
        ];
        let missing: Vec<&str> = required
            .iter()
            .filter(|(_, value)| value.trim().is_empty())
            .map(|(name, _)| *name)
            .collect();
        if missing.is_empty() {
            Ok(())
        } else {
            Err(Error::Config(format!(
                "missing required settings: {}",
                missing.join(", ")
            )))
        }
    }
}

/// Credentials handed over by a launcher on the command line.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LaunchArgs {
    pub auth_type: Option<String>,
    pub auth_password: Option<String>,
}

impl LaunchArgs {
    /// Parse `-AUTH_TYPE=<type>` and `-AUTH_PASSWORD=<secret>`; other
    /// arguments are ignored.
    pub fn parse<I, S>(args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut parsed = Self::default();
        for arg in args {
            let arg = arg.as_ref();
            if let Some(value) = arg.strip_prefix("-AUTH_TYPE=") {
                parsed.auth_type = Some(value.to_string());
            } else if let Some(value) = arg.strip_prefix("-AUTH_PASSWORD=") {
                parsed.auth_password = Some(value.to_string());
            }
        }
        parsed
    }

    /// The exchange code, when the launcher asked for exchange-code login.
    pub fn exchange_code(&self) -> Option<&str> {
        match (self.auth_type.as_deref(), self.auth_password.as_deref()) {
            (Some(kind), Some(code)) if kind.eq_ignore_ascii_case("exchangecode") => Some(code),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logging::LogFormat;
    use std::io::Write;

    const FULL: &str = r#"
[sdk]
product_name = "Demo"
product_version = "2.0.0"

[platform]
product_id = "prod"
sandbox_id = "sandbox"
deployment_id = "deploy"
client_id = "client"
client_secret = "secret"

[logging]
level = "debug"
format = "json"
"#;

    #[test]
    fn parses_all_sections() {
        let config = BridgeConfig::from_toml_str(FULL).unwrap();
        assert_eq!(config.sdk.product_name, "Demo");
        assert_eq!(config.platform.deployment_id, "deploy");
        assert_eq!(config.logging.format, LogFormat::Json);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn defaults_fill_missing_sections() {
        let config = BridgeConfig::from_toml_str("").unwrap();
        assert_eq!(config.sdk.product_name, "Coromon");
        assert_eq!(config.sdk.product_version, "1.3.6");
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn validate_lists_missing_fields() {
        let err = BridgeConfig::default().validate().unwrap_err();
        let text = err.to_string();
        assert!(text.contains("platform.product_id"));
        assert!(text.contains("platform.client_id"));
        assert!(!text.contains("client_secret"));
    }

    #[test]
    fn load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(FULL.as_bytes()).unwrap();
        let config = BridgeConfig::load(file.path()).unwrap();
        assert_eq!(config.platform.client_secret, "secret");
    }

    #[test]
    fn malformed_toml_is_an_error() {
        let err = BridgeConfig::from_toml_str("[sdk\nproduct_name = 1").unwrap_err();
        assert!(matches!(err, Error::Toml(_)));
    }

    #[test]
    fn launch_args_exchange_code() {
        let args = LaunchArgs::parse([
            "game.exe",
            "-AUTH_LOGIN=unused",
            "-AUTH_PASSWORD=abcdef",
            "-AUTH_TYPE=exchangecode",
        ]);
        assert_eq!(args.exchange_code(), Some("abcdef"));

        let other = LaunchArgs::parse(["-AUTH_TYPE=password", "-AUTH_PASSWORD=x"]);
        assert_eq!(other.exchange_code(), None);
        assert_eq!(LaunchArgs::parse(Vec::<String>::new()), LaunchArgs::default());
    }
}
