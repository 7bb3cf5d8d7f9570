//! Worker configuration.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use reelgen_models::{LimitTable, TierLimits, UserId};

use crate::error::{WorkerError, WorkerResult};
use crate::speech::VoiceBook;

/// Text generation provider settings.
#[derive(Debug, Clone)]
pub struct ScriptConfig {
    pub api_key: String,
    pub base_url: String,
    pub model: String,
    pub max_tokens: u32,
    pub generate_temperature: f32,
    pub improve_temperature: f32,
    pub max_attempts: u32,
    /// First backoff delay; doubles per attempt.
    pub retry_base: Duration,
}

/// Speech provider chain settings.
#[derive(Debug, Clone)]
pub struct SpeechConfig {
    pub elevenlabs_api_key: String,
    pub elevenlabs_base_url: String,
    pub elevenlabs_model: String,
    pub elevenlabs_voices: VoiceBook,
    /// Fallback provider. Disabled when no key is configured.
    pub openai_api_key: Option<String>,
    pub openai_base_url: String,
    pub openai_model: String,
    pub openai_voices: VoiceBook,
    pub max_attempts: u32,
    /// Linear backoff step between attempts.
    pub retry_step: Duration,
}

/// Payment provider settings.
#[derive(Debug, Clone)]
pub struct PaymentConfig {
    pub token: String,
    pub base_url: String,
    /// Asset invoices are issued in.
    pub asset: String,
    /// Fiat currency the catalog prices are quoted in.
    pub fiat: String,
    /// Where the provider sends the user after paying.
    pub return_url: Option<String>,
}

/// Which store backend to run against.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreBackend {
    Firestore,
    Memory,
}

/// Worker configuration.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Fixed timeout for every outbound provider request
    pub request_timeout: Duration,
    /// Scratch directory for synthesized audio and renders
    pub work_dir: PathBuf,
    /// Directory holding background clips
    pub asset_dir: PathBuf,
    /// Directory for finished videos awaiting delivery
    pub output_dir: PathBuf,
    /// Maximum concurrent encoder processes
    pub encoder_pool_size: usize,
    pub encode_timeout: Duration,
    pub limits: LimitTable,
    /// Users notified about delivery failures
    pub admin_ids: Vec<UserId>,
    /// How often open invoices are re-checked
    pub sweep_interval: Duration,
    /// Open invoices older than this are left out of the sweep
    pub invoice_max_age: Duration,
    pub store_backend: StoreBackend,
    pub script: ScriptConfig,
    pub speech: SpeechConfig,
    pub payment: PaymentConfig,
}

impl WorkerConfig {
    /// Create config from environment variables.
    ///
    /// Provider secrets are required; everything else has a default.
    pub fn from_env() -> WorkerResult<Self> {
        let openai_api_key = required("OPENAI_API_KEY")?;
        let openai_base_url = url_var("OPENAI_BASE_URL", "https://api.openai.com/v1")?;

        let script = ScriptConfig {
            api_key: openai_api_key.clone(),
            base_url: openai_base_url.clone(),
            model: env_string("GPT_MODEL", "gpt-4o-mini"),
            max_tokens: env_parse("SCRIPT_MAX_TOKENS", 300),
            generate_temperature: env_parse("SCRIPT_TEMPERATURE", 0.7),
            improve_temperature: env_parse("SCRIPT_IMPROVE_TEMPERATURE", 0.5),
            max_attempts: env_parse("SCRIPT_MAX_ATTEMPTS", 3),
            retry_base: Duration::from_millis(env_parse("SCRIPT_RETRY_BASE_MS", 1000)),
        };

        let default_voice = env_string("DEFAULT_VOICE_ID", "21m00Tcm4TlvDq8ikWAM");
        let speech = SpeechConfig {
            elevenlabs_api_key: required("ELEVENLABS_API_KEY")?,
            elevenlabs_base_url: url_var("ELEVENLABS_BASE_URL", "https://api.elevenlabs.io/v1")?,
            elevenlabs_model: env_string("ELEVENLABS_MODEL", "eleven_monolingual_v2"),
            elevenlabs_voices: VoiceBook {
                premium_default: env_string("PREMIUM_VOICE_ID", &default_voice),
                default: default_voice,
                male: env_string("MALE_VOICE_ID", "pNInz6obpgDQGcFmaJgB"),
                female: env_string("FEMALE_VOICE_ID", "EXAVITQu4vr4xnSDxMaL"),
                accepts_explicit: true,
            },
            openai_api_key: optional("TTS_FALLBACK_API_KEY").or(Some(openai_api_key)),
            openai_base_url: url_var("TTS_FALLBACK_BASE_URL", &openai_base_url)?,
            openai_model: env_string("TTS_FALLBACK_MODEL", "tts-1"),
            openai_voices: VoiceBook {
                default: env_string("FALLBACK_VOICE", "alloy"),
                premium_default: env_string("FALLBACK_PREMIUM_VOICE", "alloy"),
                male: env_string("FALLBACK_MALE_VOICE", "onyx"),
                female: env_string("FALLBACK_FEMALE_VOICE", "nova"),
                accepts_explicit: false,
            },
            max_attempts: env_parse("TTS_MAX_ATTEMPTS", 3),
            retry_step: Duration::from_millis(env_parse("TTS_RETRY_STEP_MS", 1000)),
        };

        let payment = PaymentConfig {
            token: required("CRYPTOPAY_TOKEN")?,
            base_url: url_var("CRYPTOPAY_API_URL", "https://pay.crypt.bot/api")?,
            asset: env_string("CRYPTOPAY_ASSET", "USDT"),
            fiat: env_string("CRYPTOPAY_FIAT", "RUB"),
            return_url: optional("PAYMENT_RETURN_URL"),
        };

        let defaults = LimitTable::default();
        let limits = LimitTable {
            free: tier_limits("FREE", defaults.free),
            lite: tier_limits("LITE", defaults.lite),
            premium: tier_limits("PREMIUM", defaults.premium),
        };

        let store_backend = match env_string("STORE_BACKEND", "firestore").to_lowercase().as_str() {
            "memory" => StoreBackend::Memory,
            "firestore" => StoreBackend::Firestore,
            other => {
                return Err(WorkerError::config_error(format!(
                    "STORE_BACKEND must be firestore or memory, got {}",
                    other
                )))
            }
        };

        Ok(Self {
            request_timeout: Duration::from_secs(env_parse("REQUEST_TIMEOUT_SECS", 30)),
            work_dir: PathBuf::from(env_string("WORKER_WORK_DIR", "/tmp/reelgen")),
            asset_dir: PathBuf::from(env_string("ASSETS_DIR", "assets/backgrounds")),
            output_dir: PathBuf::from(env_string("OUTPUT_DIR", "/tmp/reelgen/out")),
            encoder_pool_size: env_parse("WORKER_MAX_FFMPEG", 2),
            encode_timeout: Duration::from_secs(env_parse("WORKER_ENCODE_TIMEOUT_SECS", 300)),
            limits,
            admin_ids: parse_admin_ids(&env_string("ADMIN_IDS", "")),
            sweep_interval: Duration::from_secs(env_parse("PAYMENT_SWEEP_INTERVAL_SECS", 60)),
            invoice_max_age: Duration::from_secs(env_parse("INVOICE_MAX_AGE_HOURS", 48u64) * 3600),
            store_backend,
            script,
            speech,
            payment,
        })
    }
}

fn tier_limits(prefix: &str, default: TierLimits) -> TierLimits {
    TierLimits::new(
        env_parse(&format!("{}_DAILY_LIMIT", prefix), default.daily),
        env_parse(&format!("{}_MONTHLY_LIMIT", prefix), default.monthly),
    )
}

/// Comma separated numeric ids; anything else is skipped.
pub fn parse_admin_ids(raw: &str) -> Vec<UserId> {
    raw.split(',')
        .filter_map(|id| id.trim().parse::<i64>().ok())
        .map(UserId)
        .collect()
}

fn env_string(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_parse<T: FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|s| s.trim().parse().ok())
        .unwrap_or(default)
}

fn optional(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn required(key: &str) -> WorkerResult<String> {
    optional(key).ok_or_else(|| WorkerError::config_error(format!("{} not set", key)))
}

fn url_var(key: &str, default: &str) -> WorkerResult<String> {
    let raw = env_string(key, default);
    url::Url::parse(&raw)
        .map_err(|e| WorkerError::config_error(format!("{} is not a valid URL: {}", key, e)))?;
    Ok(raw.trim_end_matches('/').to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    const SECRETS: [&str; 3] = ["OPENAI_API_KEY", "ELEVENLABS_API_KEY", "CRYPTOPAY_TOKEN"];

    fn set_secrets() {
        for key in SECRETS {
            std::env::set_var(key, "secret");
        }
    }

    fn clear(keys: &[&str]) {
        for key in keys {
            std::env::remove_var(key);
        }
    }

    #[test]
    #[serial]
    fn test_defaults() {
        set_secrets();
        clear(&["FREE_DAILY_LIMIT", "STORE_BACKEND", "TTS_FALLBACK_API_KEY", "ADMIN_IDS"]);

        let config = WorkerConfig::from_env().unwrap();
        assert_eq!(config.limits.free, TierLimits::new(1, 10));
        assert_eq!(config.limits.premium, TierLimits::new(10, 200));
        assert_eq!(config.request_timeout, Duration::from_secs(30));
        assert_eq!(config.store_backend, StoreBackend::Firestore);
        assert_eq!(config.speech.openai_api_key.as_deref(), Some("secret"));
        assert_eq!(config.script.generate_temperature, 0.7);
        assert!(config.admin_ids.is_empty());

        clear(&SECRETS);
    }

    #[test]
    #[serial]
    fn test_overrides() {
        set_secrets();
        std::env::set_var("FREE_DAILY_LIMIT", "2");
        std::env::set_var("STORE_BACKEND", "memory");
        std::env::set_var("ADMIN_IDS", "10, 20,abc");

        let config = WorkerConfig::from_env().unwrap();
        assert_eq!(config.limits.free.daily, 2);
        assert_eq!(config.limits.free.monthly, 10);
        assert_eq!(config.store_backend, StoreBackend::Memory);
        assert_eq!(config.admin_ids, vec![UserId(10), UserId(20)]);

        clear(&["FREE_DAILY_LIMIT", "STORE_BACKEND", "ADMIN_IDS"]);
        clear(&SECRETS);
    }

    #[test]
    #[serial]
    fn test_missing_secret() {
        set_secrets();
        std::env::remove_var("ELEVENLABS_API_KEY");

        let err = WorkerConfig::from_env().unwrap_err();
        assert!(matches!(err, WorkerError::ConfigError(msg) if msg.contains("ELEVENLABS_API_KEY")));

        clear(&SECRETS);
    }

    #[test]
    #[serial]
    fn test_invalid_url() {
        set_secrets();
        std::env::set_var("OPENAI_BASE_URL", "not a url");

        assert!(WorkerConfig::from_env().is_err());

        clear(&["OPENAI_BASE_URL"]);
        clear(&SECRETS);
    }
}
