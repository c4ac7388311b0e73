use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use anyhow::Context;
use chrono::TimeDelta;
use common::logger::LogFormat;

pub const DEFAULT_BOUNDARY_OFFSET_SECS: i64 = 1;
pub const DEFAULT_TERM_WINDOW_DAYS: i64 = 30;
pub const DEFAULT_MAX_WALK_STEPS: usize = 64;

const MAX_BOUNDARY_OFFSET_SECS: i64 = 86_400;
const MAX_TERM_WINDOW_DAYS: i64 = 366;

/// Heuristics of the reconciliation engine, passed explicitly to every
/// component.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReconcileSettings {
    /// Offset the provider leaves between adjoining dates: a full-term
    /// reservation ends `duration - offset` after it starts, a sell-split
    /// child starts `offset` after its parent ends, and a cancelled
    /// reservation lives exactly `offset`.
    pub boundary_offset: TimeDelta,

    /// Length of one listing price-schedule term (nominally a month).
    pub term_window: TimeDelta,

    /// Upper bound on generations for any ancestor/descendant walk.
    /// Guards against cycles in a corrupted relation graph.
    pub max_walk_steps: usize,
}

impl Default for ReconcileSettings {
    fn default() -> Self {
        Self {
            boundary_offset: TimeDelta::seconds(DEFAULT_BOUNDARY_OFFSET_SECS),
            term_window: TimeDelta::days(DEFAULT_TERM_WINDOW_DAYS),
            max_walk_steps: DEFAULT_MAX_WALK_STEPS,
        }
    }
}

#[derive(Clone, Debug)]
pub struct AppConfig {
    /// Database connection string.
    pub database_url: String,

    /// Provider regions polled independently of each other.
    pub regions: Vec<String>,

    /// Delay between two poll cycles of one region.
    pub poll_interval: Duration,

    /// Directory holding `<region>.json` provider snapshots.
    pub snapshot_dir: PathBuf,

    pub log_format: LogFormat,

    pub reconcile: ReconcileSettings,
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let database_url = std::env::var("DATABASE_URL")
            .unwrap_or_else(|_| "sqlite://ri_audit.db?mode=rwc".to_string());

        let regions = parse_regions(
            &std::env::var("AUDIT_REGIONS").unwrap_or_else(|_| "us-east-1".to_string()),
        );
        if regions.is_empty() {
            anyhow::bail!("AUDIT_REGIONS must name at least one region");
        }

        let snapshot_dir = std::env::var("SNAPSHOT_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("./snapshots"));

        let log_format = LogFormat::from_app_env(&std::env::var("APP_ENV").unwrap_or_default());

        // tokio's interval panics on a zero period.
        let poll_secs: u64 = env_or("POLL_INTERVAL_SECS", 240u64)?;
        if poll_secs == 0 {
            anyhow::bail!("POLL_INTERVAL_SECS must be positive");
        }

        let reconcile = ReconcileSettings::checked(
            env_or("BOUNDARY_OFFSET_SECS", DEFAULT_BOUNDARY_OFFSET_SECS)?,
            env_or("TERM_WINDOW_DAYS", DEFAULT_TERM_WINDOW_DAYS)?,
            env_or("MAX_WALK_STEPS", DEFAULT_MAX_WALK_STEPS)?,
        )?;

        Ok(Self {
            database_url,
            regions,
            // The provider refreshes reservation state every few minutes.
            poll_interval: Duration::from_secs(poll_secs),
            snapshot_dir,
            log_format,
            reconcile,
        })
    }
}

impl ReconcileSettings {
    /// Builds settings from raw values, rejecting ones the engine cannot
    /// work with.
    pub fn checked(
        boundary_offset_secs: i64,
        term_window_days: i64,
        max_walk_steps: usize,
    ) -> anyhow::Result<Self> {
        if !(0..=MAX_BOUNDARY_OFFSET_SECS).contains(&boundary_offset_secs) {
            anyhow::bail!(
                "BOUNDARY_OFFSET_SECS must be within 0..={MAX_BOUNDARY_OFFSET_SECS}, got {boundary_offset_secs}"
            );
        }
        if !(1..=MAX_TERM_WINDOW_DAYS).contains(&term_window_days) {
            anyhow::bail!(
                "TERM_WINDOW_DAYS must be within 1..={MAX_TERM_WINDOW_DAYS}, got {term_window_days}"
            );
        }
        if max_walk_steps == 0 {
            anyhow::bail!("MAX_WALK_STEPS must be positive");
        }

        Ok(Self {
            boundary_offset: TimeDelta::seconds(boundary_offset_secs),
            term_window: TimeDelta::days(term_window_days),
            max_walk_steps,
        })
    }
}

fn env_or<T>(key: &'static str, default: T) -> anyhow::Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .with_context(|| format!("invalid value for {key}: '{raw}'")),
        Err(_) => Ok(default),
    }
}

fn parse_regions(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|r| !r.is_empty())
        .map(str::to_string)
        .collect()
}
