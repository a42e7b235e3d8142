use std::env;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Load .env file (silently ignores if missing).
pub fn load_dotenv() {
    dotenvy::dotenv().ok();
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_opt(key: &str) -> Option<String> {
    env::var(key).ok().filter(|s| !s.is_empty())
}

/// Read a profiled env var: tries {PROFILE}_{KEY} first, falls back to {KEY}.
fn profiled_env_opt(profile: &str, key: &str) -> Option<String> {
    if !profile.is_empty() {
        let prefixed = format!("{}_{}", profile, key);
        if let Some(v) = env_opt(&prefixed) {
            return Some(v);
        }
    }
    env_opt(key)
}

fn profiled_env_or(profile: &str, key: &str, default: &str) -> String {
    profiled_env_opt(profile, key).unwrap_or_else(|| default.to_string())
}

fn profiled_env_u64(profile: &str, key: &str, default: u64) -> u64 {
    profiled_env_opt(profile, key)
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn profiled_env_usize(profile: &str, key: &str, default: usize) -> usize {
    profiled_env_opt(profile, key)
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn profiled_env_duration(profile: &str, key: &str, default: Duration) -> Duration {
    profiled_env_opt(profile, key)
        .and_then(|v| parse_duration(&v))
        .unwrap_or(default)
}

/// Parse a compact duration string into a [`Duration`].
///
/// Supports components: `Xd` (days), `Xh` (hours), `Xm` (minutes), `Xs` (seconds).
/// Components can be combined: "2h30m", "1d12h", "90s".
/// A bare number is read as seconds.
/// Returns `None` if the string is empty, unparseable or overflows.
pub fn parse_duration(s: &str) -> Option<Duration> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }

    let mut total_secs: u64 = 0;
    let mut num_buf = String::new();
    let mut found_unit = false;

    for ch in s.chars() {
        if ch.is_ascii_digit() {
            num_buf.push(ch);
        } else {
            let n: u64 = num_buf.parse().ok()?;
            num_buf.clear();
            let unit: u64 = match ch {
                'd' => 86_400,
                'h' => 3_600,
                'm' => 60,
                's' => 1,
                _ => return None,
            };
            total_secs = total_secs.checked_add(n.checked_mul(unit)?)?;
            found_unit = true;
        }
    }

    if !num_buf.is_empty() {
        if found_unit {
            // "30m15" is ambiguous.
            return None;
        }
        total_secs = total_secs.checked_add(num_buf.parse::<u64>().ok()?)?;
    }

    if total_secs == 0 && !found_unit {
        return None;
    }

    Some(Duration::from_secs(total_secs))
}

// ── Top-level config ──────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Active profile name (empty = default).
    pub profile: String,
    pub segment: SegmentConfig,
}

impl Config {
    /// Build config from environment variables (call `load_dotenv()` first).
    /// Profile is read from `COHORT_PROFILE` env var. When set (e.g. `PROD`),
    /// every key is first looked up as `{PROFILE}_{KEY}`, falling back to `{KEY}`.
    pub fn from_env() -> Self {
        let profile = env_or("COHORT_PROFILE", "").to_uppercase();
        Self::for_profile(&profile)
    }

    /// Build config for a specific named profile (empty string = default).
    pub fn for_profile(profile: &str) -> Self {
        let p = profile.to_uppercase();
        let p = p.as_str();
        Self {
            profile: p.to_string(),
            segment: SegmentConfig::from_env_profiled(p),
        }
    }

    pub fn profile_label(&self) -> &str {
        if self.profile.is_empty() { "default" } else { &self.profile }
    }

    /// Print a summary for startup logs.
    pub fn log_summary(&self) {
        let s = &self.segment;
        tracing::info!("Config loaded (profile: {}):", self.profile_label());
        tracing::info!("  refresh:     every {}ms", s.refresh_interval.as_millis());
        tracing::info!(
            "  reconcile:   batch_size={}, scroll_validity={}s",
            s.update_batch_size,
            s.scroll_validity.as_secs()
        );
        tracing::info!(
            "  past events: bucket_size={}, cron='{}'",
            s.aggregate_bucket_size,
            s.past_events_cron
        );
        tracing::info!(
            "  conditions:  max_depth={}, task_tick={}s",
            s.max_condition_depth,
            s.task_tick.as_secs()
        );
    }
}

// ── Segment engine ────────────────────────────────────────────

/// Tunables for the segmentation engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SegmentConfig {
    /// Period of the definition snapshot refresh.
    pub refresh_interval: Duration,
    /// Scroll page size used by membership reconciliation.
    pub update_batch_size: usize,
    /// Validity window of a reconciliation scroll cursor.
    pub scroll_validity: Duration,
    /// Target number of profiles per past-event terms partition.
    pub aggregate_bucket_size: u64,
    /// Cron expression (5 or 6 fields) for the daily past-event recalculation.
    pub past_events_cron: String,
    /// Maximum nesting depth accepted for condition trees.
    pub max_condition_depth: usize,
    /// How often the maintenance loop checks whether a cron task is due.
    pub task_tick: Duration,
}

impl SegmentConfig {
    fn from_env_profiled(p: &str) -> Self {
        let defaults = Self::default();
        Self {
            refresh_interval: Duration::from_millis(profiled_env_u64(
                p,
                "SEGMENT_REFRESH_INTERVAL_MS",
                defaults.refresh_interval.as_millis() as u64,
            )),
            update_batch_size: profiled_env_usize(
                p,
                "SEGMENT_UPDATE_BATCH_SIZE",
                defaults.update_batch_size,
            ),
            scroll_validity: profiled_env_duration(
                p,
                "SEGMENT_SCROLL_VALIDITY",
                defaults.scroll_validity,
            ),
            aggregate_bucket_size: profiled_env_u64(
                p,
                "SEGMENT_AGGREGATE_BUCKET_SIZE",
                defaults.aggregate_bucket_size,
            )
            .max(1),
            past_events_cron: profiled_env_or(p, "SEGMENT_PAST_EVENTS_CRON", &defaults.past_events_cron),
            max_condition_depth: profiled_env_usize(
                p,
                "SEGMENT_MAX_CONDITION_DEPTH",
                defaults.max_condition_depth,
            ),
            task_tick: Duration::from_secs(profiled_env_u64(
                p,
                "SEGMENT_TASK_TICK_SECS",
                defaults.task_tick.as_secs(),
            )),
        }
    }
}

impl Default for SegmentConfig {
    fn default() -> Self {
        Self {
            refresh_interval: Duration::from_millis(1000),
            update_batch_size: 1000,
            scroll_validity: Duration::from_secs(600),
            aggregate_bucket_size: 5000,
            past_events_cron: "0 1 * * *".to_string(),
            max_condition_depth: 64,
            task_tick: Duration::from_secs(60),
        }
    }
}
