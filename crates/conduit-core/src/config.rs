use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::error::{CoreError, Result};

/// Top-level config (`conduit.toml` + `CONDUIT_*` env overrides). Every
/// recognized tunable has a field here with a `serde(default)` fallback;
/// a malformed or missing required field is a `Config` error, which is
/// fatal — callers must not substitute a built-in default on load
/// failure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConduitConfig {
    pub transport: TransportConfig,
    #[serde(default)]
    pub store: StoreConfig,
    pub llm: LlmConfig,
    #[serde(default)]
    pub memory: MemoryConfig,
    #[serde(default)]
    pub batching: BatchingConfig,
    #[serde(default)]
    pub recovery: RecoveryConfig,
    #[serde(default)]
    pub quarantine: QuarantineConfig,
    pub persona: PersonaConfig,
    #[serde(default)]
    pub review_api: ReviewApiConfig,
    #[serde(default)]
    pub concurrency: ConcurrencyConfig,
    #[serde(default)]
    pub supervisor: SupervisorConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportConfig {
    pub api_id: String,
    pub api_hash: String,
    pub phone: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default = "default_store_url")]
    pub store_url: String,
    #[serde(default = "default_kv_url")]
    pub kv_url: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            store_url: default_store_url(),
            kv_url: default_kv_url(),
        }
    }
}

fn default_store_url() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{home}/.conduit/review.db")
}

fn default_kv_url() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{home}/.conduit/kv.db")
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// Named profile to load; determines stage-1/stage-2 models and
    /// prices (the `LLM_PROFILE` env var).
    pub profile: String,
    pub stage1_key: String,
    pub stage2_key: String,
    /// Ordered fallback list of profile names tried when the active
    /// profile's daily quota is exhausted.
    #[serde(default)]
    pub fallback_profiles: Vec<String>,
    /// Named profile bundles, each pairing a stage-1 and stage-2 model
    /// spec with its per-token pricing. `profile` and every entry in
    /// `fallback_profiles` must have a matching key here.
    #[serde(default = "default_llm_profiles")]
    pub profiles: std::collections::HashMap<String, ProfileBundle>,
}

/// One named bundle of stage-1 (fast/cheap draft) and stage-2
/// (stronger, cacheable refine) model specs, loaded from `conduit.toml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProfileBundle {
    pub stage1: ModelProfile,
    pub stage2: ModelProfile,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelProfile {
    pub provider: String,
    pub model: String,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_profile_max_tokens")]
    pub max_tokens: u32,
    /// USD per input token.
    pub price_in: f64,
    /// USD per output token.
    pub price_out: f64,
    /// USD per cached (prompt-cache-hit) input token, cheaper than `price_in`.
    #[serde(default)]
    pub price_cached_in: f64,
}

impl ModelProfile {
    /// `price_in*(tokens_in - cached) + price_cached_in*cached + price_out*tokens_out`.
    pub fn cost_usd(&self, tokens_in: u32, cached_tokens: u32, tokens_out: u32) -> f64 {
        let cached = cached_tokens.min(tokens_in);
        let uncached = tokens_in - cached;
        self.price_in * uncached as f64
            + self.price_cached_in * cached as f64
            + self.price_out * tokens_out as f64
    }
}

fn default_temperature() -> f32 {
    0.7
}
fn default_profile_max_tokens() -> u32 {
    1024
}

fn default_llm_profiles() -> std::collections::HashMap<String, ProfileBundle> {
    let mut m = std::collections::HashMap::new();
    m.insert(
        "default".to_string(),
        ProfileBundle {
            stage1: ModelProfile {
                provider: "anthropic".to_string(),
                model: "claude-haiku".to_string(),
                temperature: 0.9,
                max_tokens: 512,
                price_in: 0.00000025,
                price_out: 0.00000125,
                price_cached_in: 0.00000003,
            },
            stage2: ModelProfile {
                provider: "anthropic".to_string(),
                model: "claude-sonnet".to_string(),
                temperature: 0.6,
                max_tokens: 1024,
                price_in: 0.000003,
                price_out: 0.000015,
                price_cached_in: 0.0000003,
            },
        },
    );
    m
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryConfig {
    #[serde(default = "default_max_history")]
    pub max_history: usize,
    #[serde(default = "default_recent_n")]
    pub recent_n: usize,
    #[serde(default = "default_max_context_bytes")]
    pub max_context_bytes: usize,
    #[serde(default = "default_memory_ttl_days")]
    pub memory_ttl_days: i64,
    #[serde(default = "default_profile_ttl_days")]
    pub profile_ttl_days: i64,
    #[serde(default = "default_anti_repeat_window")]
    pub anti_repeat_window: usize,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            max_history: default_max_history(),
            recent_n: default_recent_n(),
            max_context_bytes: default_max_context_bytes(),
            memory_ttl_days: default_memory_ttl_days(),
            profile_ttl_days: default_profile_ttl_days(),
            anti_repeat_window: default_anti_repeat_window(),
        }
    }
}

fn default_max_history() -> usize {
    50
}
fn default_recent_n() -> usize {
    10
}
fn default_max_context_bytes() -> usize {
    100 * 1024
}
fn default_memory_ttl_days() -> i64 {
    7
}
fn default_profile_ttl_days() -> i64 {
    30
}
fn default_anti_repeat_window() -> usize {
    20
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchingConfig {
    #[serde(default = "bool_true")]
    pub enable_batching: bool,
    #[serde(default = "default_window_initial_ms")]
    pub window_initial_ms: u64,
    #[serde(default = "default_window_typing_ext_ms")]
    pub window_typing_ext_ms: u64,
    #[serde(default = "default_min_batch")]
    pub min_batch: usize,
    #[serde(default = "default_max_batch")]
    pub max_batch: usize,
    #[serde(default = "default_max_wait_ms")]
    pub max_wait_ms: u64,
}

impl Default for BatchingConfig {
    fn default() -> Self {
        Self {
            enable_batching: true,
            window_initial_ms: default_window_initial_ms(),
            window_typing_ext_ms: default_window_typing_ext_ms(),
            min_batch: default_min_batch(),
            max_batch: default_max_batch(),
            max_wait_ms: default_max_wait_ms(),
        }
    }
}

fn bool_true() -> bool {
    true
}
fn default_window_initial_ms() -> u64 {
    1500
}
fn default_window_typing_ext_ms() -> u64 {
    5000
}
fn default_min_batch() -> usize {
    2
}
fn default_max_batch() -> usize {
    5
}
fn default_max_wait_ms() -> u64 {
    30_000
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecoveryConfig {
    #[serde(default = "default_recovery_interval_secs")]
    pub recovery_interval_secs: u64,
    #[serde(default = "default_recovery_max_age_h")]
    pub recovery_max_age_h: i64,
    #[serde(default = "default_recovery_max_per_user")]
    pub recovery_max_per_user: usize,
    #[serde(default = "default_max_concurrent_users")]
    pub max_concurrent_users: usize,
    #[serde(default = "default_telegram_rate_limit")]
    pub telegram_rate_limit: u32,
    #[serde(default = "default_consecutive_error_threshold")]
    pub consecutive_error_threshold: u32,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            recovery_interval_secs: default_recovery_interval_secs(),
            recovery_max_age_h: default_recovery_max_age_h(),
            recovery_max_per_user: default_recovery_max_per_user(),
            max_concurrent_users: default_max_concurrent_users(),
            telegram_rate_limit: default_telegram_rate_limit(),
            consecutive_error_threshold: default_consecutive_error_threshold(),
        }
    }
}

fn default_recovery_interval_secs() -> u64 {
    30 * 60
}
fn default_recovery_max_age_h() -> i64 {
    24
}
fn default_recovery_max_per_user() -> usize {
    50
}
fn default_max_concurrent_users() -> usize {
    4
}
fn default_telegram_rate_limit() -> u32 {
    30
}
fn default_consecutive_error_threshold() -> u32 {
    3
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuarantineConfig {
    #[serde(default = "default_quarantine_ttl_days")]
    pub quarantine_ttl_days: i64,
    #[serde(default = "default_status_cache_ttl_secs")]
    pub status_cache_ttl_secs: u64,
}

impl Default for QuarantineConfig {
    fn default() -> Self {
        Self {
            quarantine_ttl_days: default_quarantine_ttl_days(),
            status_cache_ttl_secs: default_status_cache_ttl_secs(),
        }
    }
}

fn default_quarantine_ttl_days() -> i64 {
    7
}
fn default_status_cache_ttl_secs() -> u64 {
    5 * 60
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersonaConfig {
    /// Directory holding persona blobs: the stable-prefix constitution and
    /// the stage-1 persona traits (the `PERSONA_PATH` env var).
    pub persona_path: String,
    /// IANA timezone string, e.g. `America/Monterrey`.
    #[serde(default = "default_timezone")]
    pub timezone: String,
}

fn default_timezone() -> String {
    "UTC".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReviewApiConfig {
    #[serde(default = "default_review_api_bind")]
    pub bind: String,
    #[serde(default = "default_review_api_token")]
    pub token: String,
    #[serde(default = "default_pending_rate_limit")]
    pub pending_rate_limit_per_min: u32,
    #[serde(default = "default_mutating_rate_limit")]
    pub mutating_rate_limit_per_min: u32,
    #[serde(default = "default_quarantine_rate_limit")]
    pub quarantine_rate_limit_per_min: u32,
    #[serde(default = "default_request_deadline_secs")]
    pub request_deadline_secs: u64,
}

impl Default for ReviewApiConfig {
    fn default() -> Self {
        Self {
            bind: default_review_api_bind(),
            token: default_review_api_token(),
            pending_rate_limit_per_min: default_pending_rate_limit(),
            mutating_rate_limit_per_min: default_mutating_rate_limit(),
            quarantine_rate_limit_per_min: default_quarantine_rate_limit(),
            request_deadline_secs: default_request_deadline_secs(),
        }
    }
}

fn default_review_api_bind() -> String {
    "127.0.0.1:8090".to_string()
}
fn default_review_api_token() -> String {
    "change-me".to_string()
}
fn default_pending_rate_limit() -> u32 {
    30
}
fn default_mutating_rate_limit() -> u32 {
    60
}
fn default_quarantine_rate_limit() -> u32 {
    10
}
fn default_request_deadline_secs() -> u64 {
    15
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConcurrencyConfig {
    #[serde(default = "default_n_supervisor")]
    pub n_supervisor: usize,
    #[serde(default = "default_n_deliver")]
    pub n_deliver: usize,
}

impl Default for ConcurrencyConfig {
    fn default() -> Self {
        Self {
            n_supervisor: default_n_supervisor(),
            n_deliver: default_n_deliver(),
        }
    }
}

fn default_n_supervisor() -> usize {
    8
}
fn default_n_deliver() -> usize {
    4
}

/// Tunables for the Supervisor's priority scoring and retry behavior.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SupervisorConfig {
    #[serde(default = "default_priority_weight_safety")]
    pub priority_weight_safety: f64,
    #[serde(default = "default_priority_weight_volume")]
    pub priority_weight_volume: f64,
    #[serde(default = "default_priority_weight_quarantine")]
    pub priority_weight_quarantine: f64,
    #[serde(default = "default_stage1_retries")]
    pub stage1_retries: u32,
    #[serde(default = "default_lock_ttl_secs")]
    pub lock_ttl_secs: u64,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            priority_weight_safety: default_priority_weight_safety(),
            priority_weight_volume: default_priority_weight_volume(),
            priority_weight_quarantine: default_priority_weight_quarantine(),
            stage1_retries: default_stage1_retries(),
            lock_ttl_secs: default_lock_ttl_secs(),
        }
    }
}

fn default_priority_weight_safety() -> f64 {
    0.5
}
fn default_priority_weight_volume() -> f64 {
    0.3
}
fn default_priority_weight_quarantine() -> f64 {
    0.2
}
fn default_stage1_retries() -> u32 {
    2
}
fn default_lock_ttl_secs() -> u64 {
    5 * 60
}

impl ConduitConfig {
    /// Loads config from a TOML file with `CONDUIT_*` env var overrides.
    /// Any failure to parse or validate is surfaced as `CoreError::Config`
    /// — callers must treat this as fatal and refuse to start, never fall
    /// back to a built-in default.
    pub fn load(config_path: Option<&str>) -> Result<Self> {
        let path = config_path
            .map(String::from)
            .unwrap_or_else(default_config_path);

        let config: ConduitConfig = Figment::new()
            .merge(Toml::file(&path))
            .merge(Env::prefixed("CONDUIT_").split("__"))
            .extract()
            .map_err(|e| CoreError::Config(e.to_string()))?;

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.persona.persona_path.trim().is_empty() {
            return Err(CoreError::Config("persona.persona_path is empty".into()));
        }
        if self.llm.profile.trim().is_empty() {
            return Err(CoreError::Config("llm.profile is empty".into()));
        }
        if !self.llm.profiles.contains_key(&self.llm.profile) {
            return Err(CoreError::Config(format!(
                "llm.profile '{}' has no matching entry in llm.profiles",
                self.llm.profile
            )));
        }
        for fallback in &self.llm.fallback_profiles {
            if !self.llm.profiles.contains_key(fallback) {
                return Err(CoreError::Config(format!(
                    "llm.fallback_profiles entry '{fallback}' has no matching entry in llm.profiles"
                )));
            }
        }
        if self.batching.min_batch == 0 || self.batching.min_batch > self.batching.max_batch {
            return Err(CoreError::Config(
                "batching.min_batch must be >0 and <= max_batch".into(),
            ));
        }
        Ok(())
    }
}

fn default_config_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{home}/.conduit/conduit.toml")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn load_fails_fast_on_missing_required_field() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("conduit.toml");
        let mut f = std::fs::File::create(&path).unwrap();
        // Missing `transport`, `llm`, `persona` tables entirely.
        writeln!(f, "[store]").unwrap();
        let err = ConduitConfig::load(Some(path.to_str().unwrap())).unwrap_err();
        assert_eq!(err.code(), "CONFIG_ERROR");
    }

    #[test]
    fn load_succeeds_with_defaults_filled_in() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("conduit.toml");
        std::fs::write(
            &path,
            r#"
            [transport]
            api_id = "1"
            api_hash = "h"
            phone = "+1"

            [llm]
            profile = "default"
            stage1_key = "k1"
            stage2_key = "k2"

            [persona]
            persona_path = "/tmp/persona"
            "#,
        )
        .unwrap();
        let cfg = ConduitConfig::load(Some(path.to_str().unwrap())).unwrap();
        assert_eq!(cfg.memory.max_history, 50);
        assert_eq!(cfg.batching.max_batch, 5);
        assert!(cfg.llm.profiles.contains_key("default"));
    }

    #[test]
    fn load_fails_when_fallback_profile_is_unknown() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("conduit.toml");
        std::fs::write(
            &path,
            r#"
            [transport]
            api_id = "1"
            api_hash = "h"
            phone = "+1"

            [llm]
            profile = "default"
            stage1_key = "k1"
            stage2_key = "k2"
            fallback_profiles = ["does-not-exist"]

            [persona]
            persona_path = "/tmp/persona"
            "#,
        )
        .unwrap();
        let err = ConduitConfig::load(Some(path.to_str().unwrap())).unwrap_err();
        assert_eq!(err.code(), "CONFIG_ERROR");
    }

    #[test]
    fn model_profile_cost_splits_cached_and_uncached_input() {
        let profile = ModelProfile {
            provider: "anthropic".into(),
            model: "claude-sonnet".into(),
            temperature: 0.6,
            max_tokens: 1024,
            price_in: 0.000003,
            price_out: 0.000015,
            price_cached_in: 0.0000003,
        };
        let cost = profile.cost_usd(1000, 400, 200);
        let expected = 0.000003 * 600.0 + 0.0000003 * 400.0 + 0.000015 * 200.0;
        assert!((cost - expected).abs() < 1e-12);
    }
}
