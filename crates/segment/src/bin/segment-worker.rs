//! segment-worker: runs the segmentation engine over the in-memory backend.
//!
//! Loads configuration from the environment, optionally registers extra
//! condition types and seeds definitions, profiles and events from a file,
//! then keeps the definition snapshot fresh and recalculates past-event
//! counters on schedule until Ctrl-C.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use cohort_core::{Config, Event, Profile};
use cohort_rules::schema::{ScoringPlan, Segment};
use cohort_rules::ConditionTypeRegistry;
use serde::Deserialize;
use tokio::sync::watch;
use tracing::{info, warn};

use cohort_segment::background::{spawn_maintenance_loop, spawn_refresh_loop};
use cohort_segment::{MemoryPersistence, SegmentService};

// ── CLI ─────────────────────────────────────────────────────────────

/// Segmentation worker: keeps segment memberships, scores and past-event
/// counters consistent.
#[derive(Parser, Debug)]
#[command(name = "segment-worker", version, about)]
struct Cli {
    /// YAML or JSON file with segments, scorings, profiles and events to load at startup.
    #[arg(long, env = "SEGMENT_SEED_FILE")]
    seed: Option<PathBuf>,

    /// YAML file with additional condition types.
    #[arg(long, env = "SEGMENT_CONDITION_TYPES")]
    condition_types: Option<PathBuf>,

    /// Run one past-event recalculation right after seeding.
    #[arg(long, default_value_t = false)]
    recalculate_on_start: bool,

    /// Shutdown timeout in seconds.
    #[arg(long, env = "SEGMENT_SHUTDOWN_TIMEOUT", default_value_t = 10)]
    shutdown_timeout: u64,
}

// ── Seed file ───────────────────────────────────────────────────────

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct SeedFile {
    segments: Vec<Segment>,
    scorings: Vec<ScoringPlan>,
    profiles: Vec<Profile>,
    events: Vec<Event>,
}

fn read_seed(path: &Path) -> anyhow::Result<SeedFile> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("reading seed file {}", path.display()))?;
    let seed: SeedFile = match path.extension().and_then(|e| e.to_str()) {
        Some("json") => serde_json::from_str(&raw)?,
        _ => serde_yaml::from_str(&raw)?,
    };
    Ok(seed)
}

async fn apply_seed(
    service: &SegmentService,
    store: &MemoryPersistence,
    seed: SeedFile,
) -> anyhow::Result<()> {
    for profile in &seed.profiles {
        store.insert(profile)?;
    }
    for event in &seed.events {
        store.insert(event)?;
    }
    info!(profiles = seed.profiles.len(), events = seed.events.len(), "seeded documents");

    for segment in seed.segments {
        let id = segment.id().to_string();
        service
            .set_segment_definition(segment)
            .await
            .with_context(|| format!("seeding segment '{id}'"))?;
    }
    for plan in seed.scorings {
        let id = plan.id().to_string();
        service
            .set_scoring_definition(plan)
            .await
            .with_context(|| format!("seeding scoring plan '{id}'"))?;
    }
    Ok(())
}

// ── Main ────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    cohort_core::config::load_dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = Config::from_env();
    config.log_summary();

    let mut registry =
        ConditionTypeRegistry::builtin().with_max_depth(config.segment.max_condition_depth);
    if let Some(path) = &cli.condition_types {
        let added = registry
            .load_yaml_file(path)
            .with_context(|| format!("loading condition types {}", path.display()))?;
        info!(added, path = %path.display(), "registered condition types");
    }

    let store = Arc::new(MemoryPersistence::new().with_condition_types(registry.clone()));
    let service = Arc::new(
        SegmentService::new(store.clone(), config.segment.clone()).with_registry(registry),
    );

    if let Some(path) = &cli.seed {
        let seed = read_seed(path)?;
        apply_seed(&service, &store, seed).await?;
    }
    service.refresh_definitions().await?;

    if cli.recalculate_on_start {
        let summary = service.recalculate_past_event_conditions().await?;
        info!(rules = summary.rules, updated = summary.profiles_updated, "startup recalculation done");
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let refresh = spawn_refresh_loop(service.clone(), shutdown_rx.clone());
    let maintenance = spawn_maintenance_loop(service.clone(), shutdown_rx);
    info!("segment worker running, press Ctrl-C to stop");

    tokio::signal::ctrl_c().await?;
    info!("shutdown signal received");
    let _ = shutdown_tx.send(true);

    let timeout = Duration::from_secs(cli.shutdown_timeout);
    let joined = tokio::time::timeout(timeout, async {
        let _ = refresh.await;
        let _ = maintenance.await;
    })
    .await;
    if joined.is_err() {
        warn!(timeout_secs = cli.shutdown_timeout, "background loops did not stop in time");
    }

    info!("segment worker stopped");
    Ok(())
}
