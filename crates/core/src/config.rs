use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::policy::{PolicyTable, TierPolicy};

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub server: ServerConfig,
    pub providers: ProvidersConfig,
    pub marketplace: MarketplaceConfig,
    pub tiers: PolicyTable,
    pub payments: PaymentsConfig,
    pub breaker: BreakerConfig,
    pub logging: LoggingConfig,
}

#[derive(Clone, Debug)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub timeout_secs: u64,
}

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub bind_address: String,
    pub port: u16,
    pub graceful_shutdown_secs: u64,
}

/// One optional credential block per upstream model family. A missing
/// credential disables that adapter at bootstrap; it never disables the
/// runtime itself.
#[derive(Clone, Debug)]
pub struct ProvidersConfig {
    pub openai: Option<ApiProviderConfig>,
    pub anthropic: Option<ApiProviderConfig>,
    pub ollama: Option<LocalProviderConfig>,
}

#[derive(Clone, Debug)]
pub struct ApiProviderConfig {
    pub api_key: SecretString,
    pub base_url: Option<String>,
    /// Model ids this provider serves. Empty means the bootstrap default
    /// set for the family.
    pub models: Vec<String>,
}

#[derive(Clone, Debug)]
pub struct LocalProviderConfig {
    pub base_url: String,
    pub models: Vec<String>,
}

#[derive(Clone, Debug)]
pub struct MarketplaceConfig {
    /// ISO 4217 code; all prices and revenue are in this single currency.
    pub currency: String,
    pub history_tail_limit: usize,
    /// Users on the paid plan. Stands in for the external identity
    /// collaborator in single-node deployments.
    pub paid_users: Vec<String>,
    /// Load the demo template catalog at startup. For development and
    /// end-to-end runs; the upsert is idempotent.
    pub seed_demo_catalog: bool,
}

#[derive(Clone, Debug)]
pub struct PaymentsConfig {
    /// HMAC secret for inbound payment events. When unset the webhook
    /// endpoint rejects everything.
    pub webhook_secret: Option<SecretString>,
}

#[derive(Clone, Debug)]
pub struct BreakerConfig {
    pub rate_limit_threshold: u32,
    pub window_secs: u64,
    pub cooloff_secs: u64,
}

#[derive(Clone, Debug)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Compact,
    Pretty,
    Json,
}

impl std::str::FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "compact" => Ok(Self::Compact),
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(ConfigError::Validation(format!(
                "unsupported log format `{other}` (expected compact|pretty|json)"
            ))),
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    pub database_url: Option<String>,
    pub log_level: Option<String>,
    pub currency: Option<String>,
    pub openai_api_key: Option<String>,
    pub anthropic_api_key: Option<String>,
    pub ollama_base_url: Option<String>,
    pub webhook_secret: Option<String>,
    pub paid_users: Option<Vec<String>>,
}

#[derive(Clone, Debug, Default)]
pub struct LoadOptions {
    pub config_path: Option<PathBuf>,
    pub require_file: bool,
    pub overrides: ConfigOverrides,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config file `{path}`: {source}")]
    ReadFile { path: PathBuf, source: std::io::Error },
    #[error("could not parse config file `{path}`: {source}")]
    ParseFile { path: PathBuf, source: toml::de::Error },
    #[error("required config file was not found: `{0}`")]
    MissingConfigFile(PathBuf),
    #[error("environment variable interpolation failed for `{var}`")]
    MissingEnvInterpolation { var: String },
    #[error("unterminated environment interpolation expression")]
    UnterminatedInterpolation,
    #[error("invalid environment override for `{key}`: `{value}`")]
    InvalidEnvOverride { key: String, value: String },
    #[error("configuration validation failed: {0}")]
    Validation(String),
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig {
                url: "sqlite://agora.db".to_string(),
                max_connections: 5,
                timeout_secs: 30,
            },
            server: ServerConfig {
                bind_address: "127.0.0.1".to_string(),
                port: 8080,
                graceful_shutdown_secs: 15,
            },
            providers: ProvidersConfig { openai: None, anthropic: None, ollama: None },
            marketplace: MarketplaceConfig {
                currency: "USD".to_string(),
                history_tail_limit: 10,
                paid_users: Vec::new(),
                seed_demo_catalog: false,
            },
            tiers: PolicyTable::default(),
            payments: PaymentsConfig { webhook_secret: None },
            breaker: BreakerConfig { rate_limit_threshold: 5, window_secs: 60, cooloff_secs: 120 },
            logging: LoggingConfig { level: "info".to_string(), format: LogFormat::Compact },
        }
    }
}

fn secret_value(value: String) -> SecretString {
    value.into()
}

impl AppConfig {
    pub fn load(options: LoadOptions) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        let maybe_path = resolve_config_path(options.config_path.as_deref());

        if let Some(path) = maybe_path {
            let patch = read_patch(&path)?;
            config.apply_patch(patch);
        } else if options.require_file {
            let expected = options.config_path.unwrap_or_else(|| PathBuf::from("agora.toml"));
            return Err(ConfigError::MissingConfigFile(expected));
        }

        config.apply_env_overrides()?;
        config.apply_overrides(options.overrides);
        config.validate()?;

        Ok(config)
    }

    fn apply_patch(&mut self, patch: ConfigPatch) {
        if let Some(database) = patch.database {
            if let Some(url) = database.url {
                self.database.url = url;
            }
            if let Some(max_connections) = database.max_connections {
                self.database.max_connections = max_connections;
            }
            if let Some(timeout_secs) = database.timeout_secs {
                self.database.timeout_secs = timeout_secs;
            }
        }

        if let Some(server) = patch.server {
            if let Some(bind_address) = server.bind_address {
                self.server.bind_address = bind_address;
            }
            if let Some(port) = server.port {
                self.server.port = port;
            }
            if let Some(graceful_shutdown_secs) = server.graceful_shutdown_secs {
                self.server.graceful_shutdown_secs = graceful_shutdown_secs;
            }
        }

        if let Some(providers) = patch.providers {
            if let Some(openai) = providers.openai {
                if let Some(api_key) = openai.api_key {
                    self.providers.openai = Some(ApiProviderConfig {
                        api_key: secret_value(api_key),
                        base_url: openai.base_url,
                        models: openai.models.unwrap_or_default(),
                    });
                }
            }
            if let Some(anthropic) = providers.anthropic {
                if let Some(api_key) = anthropic.api_key {
                    self.providers.anthropic = Some(ApiProviderConfig {
                        api_key: secret_value(api_key),
                        base_url: anthropic.base_url,
                        models: anthropic.models.unwrap_or_default(),
                    });
                }
            }
            if let Some(ollama) = providers.ollama {
                if let Some(base_url) = ollama.base_url {
                    self.providers.ollama = Some(LocalProviderConfig {
                        base_url,
                        models: ollama.models.unwrap_or_default(),
                    });
                }
            }
        }

        if let Some(marketplace) = patch.marketplace {
            if let Some(currency) = marketplace.currency {
                self.marketplace.currency = currency;
            }
            if let Some(history_tail_limit) = marketplace.history_tail_limit {
                self.marketplace.history_tail_limit = history_tail_limit;
            }
            if let Some(paid_users) = marketplace.paid_users {
                self.marketplace.paid_users = paid_users;
            }
            if let Some(seed_demo_catalog) = marketplace.seed_demo_catalog {
                self.marketplace.seed_demo_catalog = seed_demo_catalog;
            }
        }

        if let Some(tiers) = patch.tiers {
            apply_tier_patch(&mut self.tiers.essential, tiers.essential);
            apply_tier_patch(&mut self.tiers.professional, tiers.professional);
            apply_tier_patch(&mut self.tiers.premium, tiers.premium);
            apply_tier_patch(&mut self.tiers.elite, tiers.elite);
        }

        if let Some(payments) = patch.payments {
            if let Some(webhook_secret) = payments.webhook_secret {
                self.payments.webhook_secret = Some(secret_value(webhook_secret));
            }
        }

        if let Some(breaker) = patch.breaker {
            if let Some(rate_limit_threshold) = breaker.rate_limit_threshold {
                self.breaker.rate_limit_threshold = rate_limit_threshold;
            }
            if let Some(window_secs) = breaker.window_secs {
                self.breaker.window_secs = window_secs;
            }
            if let Some(cooloff_secs) = breaker.cooloff_secs {
                self.breaker.cooloff_secs = cooloff_secs;
            }
        }

        if let Some(logging) = patch.logging {
            if let Some(level) = logging.level {
                self.logging.level = level;
            }
            if let Some(format) = logging.format {
                self.logging.format = format;
            }
        }
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Some(value) = read_env("AGORA_DATABASE_URL") {
            self.database.url = value;
        }
        if let Some(value) = read_env("AGORA_DATABASE_MAX_CONNECTIONS") {
            self.database.max_connections = parse_u32("AGORA_DATABASE_MAX_CONNECTIONS", &value)?;
        }
        if let Some(value) = read_env("AGORA_DATABASE_TIMEOUT_SECS") {
            self.database.timeout_secs = parse_u64("AGORA_DATABASE_TIMEOUT_SECS", &value)?;
        }

        if let Some(value) = read_env("AGORA_SERVER_BIND_ADDRESS") {
            self.server.bind_address = value;
        }
        if let Some(value) = read_env("AGORA_SERVER_PORT") {
            self.server.port = parse_u16("AGORA_SERVER_PORT", &value)?;
        }
        if let Some(value) = read_env("AGORA_SERVER_GRACEFUL_SHUTDOWN_SECS") {
            self.server.graceful_shutdown_secs =
                parse_u64("AGORA_SERVER_GRACEFUL_SHUTDOWN_SECS", &value)?;
        }

        if let Some(value) = read_env("AGORA_OPENAI_API_KEY") {
            let existing = self.providers.openai.take();
            self.providers.openai = Some(ApiProviderConfig {
                api_key: secret_value(value),
                base_url: existing.as_ref().and_then(|p| p.base_url.clone()),
                models: existing.map(|p| p.models).unwrap_or_default(),
            });
        }
        if let Some(value) = read_env("AGORA_ANTHROPIC_API_KEY") {
            let existing = self.providers.anthropic.take();
            self.providers.anthropic = Some(ApiProviderConfig {
                api_key: secret_value(value),
                base_url: existing.as_ref().and_then(|p| p.base_url.clone()),
                models: existing.map(|p| p.models).unwrap_or_default(),
            });
        }
        if let Some(value) = read_env("AGORA_OLLAMA_BASE_URL") {
            let models =
                self.providers.ollama.take().map(|p| p.models).unwrap_or_default();
            self.providers.ollama = Some(LocalProviderConfig { base_url: value, models });
        }

        if let Some(value) = read_env("AGORA_CURRENCY") {
            self.marketplace.currency = value;
        }
        if let Some(value) = read_env("AGORA_HISTORY_TAIL_LIMIT") {
            self.marketplace.history_tail_limit =
                parse_u32("AGORA_HISTORY_TAIL_LIMIT", &value)? as usize;
        }
        if let Some(value) = read_env("AGORA_PAID_USERS") {
            self.marketplace.paid_users =
                value.split(',').map(|user| user.trim().to_string()).collect();
        }
        if let Some(value) = read_env("AGORA_SEED_DEMO_CATALOG") {
            self.marketplace.seed_demo_catalog = parse_bool("AGORA_SEED_DEMO_CATALOG", &value)?;
        }

        if let Some(value) = read_env("AGORA_PAYMENTS_WEBHOOK_SECRET") {
            self.payments.webhook_secret = Some(secret_value(value));
        }

        if let Some(value) = read_env("AGORA_BREAKER_RATE_LIMIT_THRESHOLD") {
            self.breaker.rate_limit_threshold =
                parse_u32("AGORA_BREAKER_RATE_LIMIT_THRESHOLD", &value)?;
        }
        if let Some(value) = read_env("AGORA_BREAKER_COOLOFF_SECS") {
            self.breaker.cooloff_secs = parse_u64("AGORA_BREAKER_COOLOFF_SECS", &value)?;
        }

        if let Some(value) = read_env("AGORA_LOGGING_LEVEL") {
            self.logging.level = value;
        }
        if let Some(value) = read_env("AGORA_LOGGING_FORMAT") {
            self.logging.format = value.parse()?;
        }

        Ok(())
    }

    fn apply_overrides(&mut self, overrides: ConfigOverrides) {
        if let Some(database_url) = overrides.database_url {
            self.database.url = database_url;
        }
        if let Some(log_level) = overrides.log_level {
            self.logging.level = log_level;
        }
        if let Some(currency) = overrides.currency {
            self.marketplace.currency = currency;
        }
        if let Some(api_key) = overrides.openai_api_key {
            self.providers.openai = Some(ApiProviderConfig {
                api_key: secret_value(api_key),
                base_url: None,
                models: Vec::new(),
            });
        }
        if let Some(api_key) = overrides.anthropic_api_key {
            self.providers.anthropic = Some(ApiProviderConfig {
                api_key: secret_value(api_key),
                base_url: None,
                models: Vec::new(),
            });
        }
        if let Some(base_url) = overrides.ollama_base_url {
            self.providers.ollama = Some(LocalProviderConfig { base_url, models: Vec::new() });
        }
        if let Some(webhook_secret) = overrides.webhook_secret {
            self.payments.webhook_secret = Some(secret_value(webhook_secret));
        }
        if let Some(paid_users) = overrides.paid_users {
            self.marketplace.paid_users = paid_users;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_database(&self.database)?;
        validate_server(&self.server)?;
        validate_providers(&self.providers)?;
        validate_marketplace(&self.marketplace)?;
        validate_tiers(&self.tiers)?;
        validate_breaker(&self.breaker)?;
        validate_logging(&self.logging)?;
        Ok(())
    }
}

#[derive(Debug, Default, Deserialize)]
struct ConfigPatch {
    database: Option<DatabasePatch>,
    server: Option<ServerPatch>,
    providers: Option<ProvidersPatch>,
    marketplace: Option<MarketplacePatch>,
    tiers: Option<TiersPatch>,
    payments: Option<PaymentsPatch>,
    breaker: Option<BreakerPatch>,
    logging: Option<LoggingPatch>,
}

#[derive(Debug, Default, Deserialize)]
struct DatabasePatch {
    url: Option<String>,
    max_connections: Option<u32>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct ServerPatch {
    bind_address: Option<String>,
    port: Option<u16>,
    graceful_shutdown_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct ProvidersPatch {
    openai: Option<ApiProviderPatch>,
    anthropic: Option<ApiProviderPatch>,
    ollama: Option<LocalProviderPatch>,
}

#[derive(Debug, Default, Deserialize)]
struct ApiProviderPatch {
    api_key: Option<String>,
    base_url: Option<String>,
    models: Option<Vec<String>>,
}

#[derive(Debug, Default, Deserialize)]
struct LocalProviderPatch {
    base_url: Option<String>,
    models: Option<Vec<String>>,
}

#[derive(Debug, Default, Deserialize)]
struct MarketplacePatch {
    currency: Option<String>,
    history_tail_limit: Option<usize>,
    paid_users: Option<Vec<String>>,
    seed_demo_catalog: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
struct TiersPatch {
    essential: Option<TierPatch>,
    professional: Option<TierPatch>,
    premium: Option<TierPatch>,
    elite: Option<TierPatch>,
}

#[derive(Debug, Default, Deserialize)]
struct TierPatch {
    per_call_timeout_secs: Option<u64>,
    monthly_cap_free: Option<u32>,
    monthly_cap_paid: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
struct PaymentsPatch {
    webhook_secret: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct BreakerPatch {
    rate_limit_threshold: Option<u32>,
    window_secs: Option<u64>,
    cooloff_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct LoggingPatch {
    level: Option<String>,
    format: Option<LogFormat>,
}

fn apply_tier_patch(target: &mut TierPolicy, patch: Option<TierPatch>) {
    let Some(patch) = patch else {
        return;
    };
    if let Some(per_call_timeout_secs) = patch.per_call_timeout_secs {
        target.per_call_timeout_secs = per_call_timeout_secs;
    }
    if let Some(monthly_cap_free) = patch.monthly_cap_free {
        target.monthly_cap_free = monthly_cap_free;
    }
    if let Some(monthly_cap_paid) = patch.monthly_cap_paid {
        target.monthly_cap_paid = monthly_cap_paid;
    }
}

fn resolve_config_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return path.exists().then_some(path.to_path_buf());
    }

    [PathBuf::from("agora.toml"), PathBuf::from("config/agora.toml")]
        .into_iter()
        .find(|path| path.exists())
}

fn read_patch(path: &Path) -> Result<ConfigPatch, ConfigError> {
    let raw = fs::read_to_string(path)
        .map_err(|source| ConfigError::ReadFile { path: path.to_path_buf(), source })?;

    let interpolated = interpolate_env_vars(&raw)?;
    toml::from_str::<ConfigPatch>(&interpolated)
        .map_err(|source| ConfigError::ParseFile { path: path.to_path_buf(), source })
}

fn interpolate_env_vars(input: &str) -> Result<String, ConfigError> {
    let mut output = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && matches!(chars.peek(), Some('{')) {
            chars.next();
            let mut key = String::new();

            loop {
                match chars.next() {
                    Some('}') => break,
                    Some(next) => key.push(next),
                    None => return Err(ConfigError::UnterminatedInterpolation),
                }
            }

            let value = env::var(&key)
                .map_err(|_| ConfigError::MissingEnvInterpolation { var: key.clone() })?;
            output.push_str(&value);
            continue;
        }

        output.push(ch);
    }

    Ok(output)
}

fn validate_database(database: &DatabaseConfig) -> Result<(), ConfigError> {
    let url = database.url.trim();
    let sqlite_url =
        url.starts_with("sqlite://") || url.starts_with("sqlite::") || url == ":memory:";
    if !sqlite_url {
        return Err(ConfigError::Validation(
            "database.url must be a sqlite URL (`sqlite://...`, `sqlite::...`, or `:memory:`)"
                .to_string(),
        ));
    }

    if database.max_connections == 0 {
        return Err(ConfigError::Validation(
            "database.max_connections must be greater than zero".to_string(),
        ));
    }

    if database.timeout_secs == 0 || database.timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "database.timeout_secs must be in range 1..=300".to_string(),
        ));
    }

    Ok(())
}

fn validate_server(server: &ServerConfig) -> Result<(), ConfigError> {
    if server.port == 0 {
        return Err(ConfigError::Validation("server.port must be greater than zero".to_string()));
    }

    if server.graceful_shutdown_secs == 0 {
        return Err(ConfigError::Validation(
            "server.graceful_shutdown_secs must be greater than zero".to_string(),
        ));
    }

    Ok(())
}

fn validate_providers(providers: &ProvidersConfig) -> Result<(), ConfigError> {
    for (name, provider) in
        [("openai", &providers.openai), ("anthropic", &providers.anthropic)]
    {
        if let Some(provider) = provider {
            if provider.api_key.expose_secret().trim().is_empty() {
                return Err(ConfigError::Validation(format!(
                    "providers.{name}.api_key must not be empty when the section is present"
                )));
            }
        }
    }

    if let Some(ollama) = &providers.ollama {
        if !ollama.base_url.starts_with("http://") && !ollama.base_url.starts_with("https://") {
            return Err(ConfigError::Validation(
                "providers.ollama.base_url must start with http:// or https://".to_string(),
            ));
        }
    }

    Ok(())
}

fn validate_marketplace(marketplace: &MarketplaceConfig) -> Result<(), ConfigError> {
    let currency = marketplace.currency.trim();
    if currency.len() != 3 || !currency.chars().all(|c| c.is_ascii_uppercase()) {
        return Err(ConfigError::Validation(
            "marketplace.currency must be a three-letter ISO 4217 code".to_string(),
        ));
    }

    if marketplace.history_tail_limit < 10 {
        return Err(ConfigError::Validation(
            "marketplace.history_tail_limit must be at least 10".to_string(),
        ));
    }

    Ok(())
}

fn validate_tiers(tiers: &PolicyTable) -> Result<(), ConfigError> {
    for (name, tier) in [
        ("essential", tiers.essential),
        ("professional", tiers.professional),
        ("premium", tiers.premium),
        ("elite", tiers.elite),
    ] {
        if tier.per_call_timeout_secs == 0 || tier.per_call_timeout_secs > 300 {
            return Err(ConfigError::Validation(format!(
                "tiers.{name}.per_call_timeout_secs must be in range 1..=300"
            )));
        }
        if tier.monthly_cap_paid < tier.monthly_cap_free {
            return Err(ConfigError::Validation(format!(
                "tiers.{name}: monthly_cap_paid must be at least monthly_cap_free"
            )));
        }
    }

    Ok(())
}

fn validate_breaker(breaker: &BreakerConfig) -> Result<(), ConfigError> {
    if breaker.window_secs == 0 || breaker.cooloff_secs == 0 {
        return Err(ConfigError::Validation(
            "breaker.window_secs and breaker.cooloff_secs must be greater than zero".to_string(),
        ));
    }

    Ok(())
}

fn validate_logging(logging: &LoggingConfig) -> Result<(), ConfigError> {
    let level = logging.level.trim().to_ascii_lowercase();
    match level.as_str() {
        "trace" | "debug" | "info" | "warn" | "error" => Ok(()),
        _ => Err(ConfigError::Validation(
            "logging.level must be one of trace|debug|info|warn|error".to_string(),
        )),
    }
}

fn read_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn parse_u16(key: &str, value: &str) -> Result<u16, ConfigError> {
    value.parse::<u16>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_u32(key: &str, value: &str) -> Result<u32, ConfigError> {
    value.parse::<u32>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_u64(key: &str, value: &str) -> Result<u64, ConfigError> {
    value.parse::<u64>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_bool(key: &str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" => Ok(true),
        "false" | "0" | "no" => Ok(false),
        _ => Err(ConfigError::InvalidEnvOverride {
            key: key.to_string(),
            value: value.to_string(),
        }),
    }
}
