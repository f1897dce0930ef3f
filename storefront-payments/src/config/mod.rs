use secrecy::Secret;
use serde::Deserialize;
use service_core::config as core_config;
use service_core::error::AppError;
use std::env;

#[derive(Debug, Clone, Deserialize)]
pub struct PaymentsConfig {
    #[serde(flatten)]
    pub common: core_config::Config,
    pub service_name: String,
    pub log_level: String,
    pub otlp_endpoint: Option<String>,
    pub ledger: LedgerConfig,
    pub checkout: CheckoutConfig,
    pub providers: ProvidersConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LedgerConfig {
    pub backend: LedgerBackend,
    pub mongodb_uri: Secret<String>,
    pub database: String,
}

#[derive(Debug, Clone, Copy, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum LedgerBackend {
    Mongodb,
    Memory,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CheckoutConfig {
    pub default_currency: String,
    pub expiry_minutes: i64,
    /// `{transaction_id}` is substituted when a caller gives no return URL.
    pub return_url_template: String,
    pub cancel_url_template: String,
    pub subject_prefix: String,
    pub gateway_timeout_secs: u64,
}

impl Default for CheckoutConfig {
    fn default() -> Self {
        Self {
            default_currency: "CNY".to_string(),
            expiry_minutes: 30,
            return_url_template: "http://localhost:3000/checkout/result?transaction_id={transaction_id}"
                .to_string(),
            cancel_url_template: "http://localhost:3000/checkout?cancelled={transaction_id}"
                .to_string(),
            subject_prefix: "Order".to_string(),
            gateway_timeout_secs: 15,
        }
    }
}

/// Credentials per gateway. A provider without credentials is not registered.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProvidersConfig {
    pub wallet_a: Option<WalletAConfig>,
    pub wallet_b: Option<WalletBConfig>,
    pub card: Option<CardConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WalletAConfig {
    pub app_id: String,
    /// Merchant RSA private key, PEM or bare base64 (PKCS#8 or PKCS#1).
    pub private_key: Secret<String>,
    /// Gateway RSA public key, PEM or bare base64 SPKI.
    pub gateway_public_key: String,
    pub gateway_url: String,
    pub notify_url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WalletBConfig {
    pub app_id: String,
    pub mch_id: String,
    pub api_key: Secret<String>,
    pub gateway_url: String,
    pub notify_url: String,
    pub client_ip: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CardConfig {
    pub secret_key: Secret<String>,
    pub webhook_secret: Secret<String>,
    pub api_base_url: String,
    pub publishable_key: Option<String>,
}

impl PaymentsConfig {
    pub fn load() -> Result<Self, AppError> {
        // Load common config (handles .env and APP__ prefix)
        let common_config = core_config::Config::load()?;

        let is_prod = env::var("ENVIRONMENT").unwrap_or_else(|_| "dev".to_string()) == "prod";

        let backend: LedgerBackend = get_env("LEDGER_BACKEND", Some("mongodb"), is_prod)?
            .parse()
            .map_err(|e: String| AppError::ConfigError(anyhow::anyhow!(e)))?;
        let mongodb_uri = match backend {
            LedgerBackend::Mongodb => get_env("MONGODB_URI", None, is_prod)?,
            LedgerBackend::Memory => env::var("MONGODB_URI").unwrap_or_default(),
        };

        let defaults = CheckoutConfig::default();
        let checkout = CheckoutConfig {
            default_currency: get_env(
                "CHECKOUT_DEFAULT_CURRENCY",
                Some(defaults.default_currency.as_str()),
                false,
            )?,
            expiry_minutes: parse_env("CHECKOUT_EXPIRY_MINUTES", defaults.expiry_minutes)?,
            return_url_template: get_env(
                "CHECKOUT_RETURN_URL",
                Some(defaults.return_url_template.as_str()),
                is_prod,
            )?,
            cancel_url_template: get_env(
                "CHECKOUT_CANCEL_URL",
                Some(defaults.cancel_url_template.as_str()),
                is_prod,
            )?,
            subject_prefix: get_env("CHECKOUT_SUBJECT", Some(defaults.subject_prefix.as_str()), false)?,
            gateway_timeout_secs: parse_env("GATEWAY_TIMEOUT_SECS", defaults.gateway_timeout_secs)?,
        };

        Ok(PaymentsConfig {
            common: common_config,
            service_name: get_env("SERVICE_NAME", Some("storefront-payments"), false)?,
            log_level: get_env("LOG_LEVEL", Some("info"), false)?,
            otlp_endpoint: env::var("OTLP_ENDPOINT").ok().filter(|v| !v.is_empty()),
            ledger: LedgerConfig {
                backend,
                mongodb_uri: Secret::new(mongodb_uri),
                database: get_env("MONGODB_DATABASE", Some("storefront_payments"), is_prod)?,
            },
            checkout,
            providers: ProvidersConfig::from_env(),
        })
    }
}

impl ProvidersConfig {
    /// Read per-provider credentials. Missing required keys leave that
    /// provider unconfigured rather than failing startup.
    pub fn from_env() -> Self {
        let wallet_a = match (
            optional_env("WALLET_A_APP_ID"),
            optional_env("WALLET_A_PRIVATE_KEY"),
            optional_env("WALLET_A_GATEWAY_PUBLIC_KEY"),
        ) {
            (Some(app_id), Some(private_key), Some(gateway_public_key)) => Some(WalletAConfig {
                app_id,
                private_key: Secret::new(private_key),
                gateway_public_key,
                gateway_url: optional_env("WALLET_A_GATEWAY_URL")
                    .unwrap_or_else(|| "https://openapi.alipay.com/gateway.do".to_string()),
                notify_url: optional_env("WALLET_A_NOTIFY_URL").unwrap_or_default(),
            }),
            _ => None,
        };

        let wallet_b = match (
            optional_env("WALLET_B_APP_ID"),
            optional_env("WALLET_B_MCH_ID"),
            optional_env("WALLET_B_API_KEY"),
        ) {
            (Some(app_id), Some(mch_id), Some(api_key)) => Some(WalletBConfig {
                app_id,
                mch_id,
                api_key: Secret::new(api_key),
                gateway_url: optional_env("WALLET_B_GATEWAY_URL")
                    .unwrap_or_else(|| "https://api.mch.weixin.qq.com".to_string()),
                notify_url: optional_env("WALLET_B_NOTIFY_URL").unwrap_or_default(),
                client_ip: optional_env("WALLET_B_CLIENT_IP")
                    .unwrap_or_else(|| "127.0.0.1".to_string()),
            }),
            _ => None,
        };

        let card = match (
            optional_env("CARD_SECRET_KEY"),
            optional_env("CARD_WEBHOOK_SECRET"),
        ) {
            (Some(secret_key), Some(webhook_secret)) => Some(CardConfig {
                secret_key: Secret::new(secret_key),
                webhook_secret: Secret::new(webhook_secret),
                api_base_url: optional_env("CARD_API_BASE_URL")
                    .unwrap_or_else(|| "https://api.stripe.com/v1".to_string()),
                publishable_key: optional_env("CARD_PUBLISHABLE_KEY"),
            }),
            _ => None,
        };

        Self {
            wallet_a,
            wallet_b,
            card,
        }
    }
}

impl std::str::FromStr for LedgerBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "mongodb" => Ok(LedgerBackend::Mongodb),
            "memory" => Ok(LedgerBackend::Memory),
            _ => Err(format!("Invalid ledger backend: {}", s)),
        }
    }
}

fn optional_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn parse_env<T>(key: &str, default: T) -> Result<T, AppError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(val) => val.parse().map_err(|e: T::Err| {
            AppError::ConfigError(anyhow::anyhow!("{} has an invalid value: {}", key, e))
        }),
        Err(_) => Ok(default),
    }
}

fn get_env(key: &str, default: Option<&str>, is_prod: bool) -> Result<String, AppError> {
    match env::var(key) {
        Ok(val) => Ok(val),
        Err(_) => {
            if is_prod {
                Err(AppError::ConfigError(anyhow::anyhow!(format!(
                    "{} is required in production but not set",
                    key
                ))))
            } else if let Some(def) = default {
                Ok(def.to_string())
            } else {
                Err(AppError::ConfigError(anyhow::anyhow!(format!(
                    "{} is required but not set",
                    key
                ))))
            }
        }
    }
}
