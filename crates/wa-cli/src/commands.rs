//! Shared command implementations for the campaign CLI.
//!
//! These functions are library-level so they can be tested without
//! spawning the binary: each builds its own [`ControlPlane`] against a
//! data directory and drives it directly, mirroring how `wa-daemon`
//! embeds the same control plane behind HTTP instead.

use anyhow::{Context, Result};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use wa_config::CoreConfig;
use wa_core::campaign::Recipient;
use wa_core::clock::{SharedClock, SystemClock};
use wa_core::random::{OsRandomSource, SharedRandomSource};
use wa_gateway::{MessageGateway, MockGateway};
use wa_ratelimit::QuotaLedger;
use wa_runtime::store::{CampaignStore, ScheduledMessageStore};
use wa_runtime::{ControlPlane, EventBus};
use wa_template::TemplateProcessor;
use wa_tracker::VariationTracker;

/// Assemble a [`ControlPlane`] rooted at `config.data_dir`, owned by
/// `owner`. Every subcommand call opens its own short-lived control
/// plane over the same on-disk stores.
///
/// # Errors
///
/// Returns an error if the data directory or any backing store cannot be
/// opened.
pub async fn build_control_plane(config: &CoreConfig, owner: &str) -> Result<ControlPlane> {
    let data_dir = PathBuf::from(&config.data_dir);
    std::fs::create_dir_all(&data_dir).with_context(|| format!("create data dir {}", data_dir.display()))?;

    let clock: SharedClock = Arc::new(SystemClock);
    let random: SharedRandomSource = Arc::new(OsRandomSource);

    let campaign_store = CampaignStore::open(data_dir.join("campaigns.jsonl"))
        .await
        .context("open campaign store")?;
    let scheduled = Arc::new(
        ScheduledMessageStore::open(data_dir.join("scheduled.jsonl"))
            .await
            .context("open scheduled message store")?,
    );
    let template = Arc::new(TemplateProcessor::new(config.parse_cache_capacity));
    let quota = Arc::new(QuotaLedger::new(clock.clone()));
    let gateway: Arc<dyn MessageGateway> = Arc::new(MockGateway::new(clock.clone(), random.clone()));
    let tracker = Arc::new(
        VariationTracker::open(data_dir.join("tracking.jsonl"))
            .await
            .context("open tracking store")?,
    );
    let bus = Arc::new(EventBus::new());

    Ok(ControlPlane::new(
        owner,
        campaign_store,
        scheduled,
        template,
        quota,
        gateway,
        tracker,
        bus,
        clock,
        random,
        chrono::Duration::seconds(config.lease_ttl_secs as i64),
        config.single_message_max_parallel,
        config.heartbeat_secs,
    ))
}

/// Read one recipient address per non-empty, non-comment line of a plain
/// text file.
///
/// # Errors
///
/// Returns an error if `path` cannot be read.
pub fn load_recipients(path: &Path) -> Result<Vec<Recipient>> {
    let content = std::fs::read_to_string(path).with_context(|| format!("read recipients file {}", path.display()))?;
    Ok(content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(|address| Recipient::new(address.to_string()))
        .collect())
}

/// Parse `key=value` pairs into a variable substitution map.
///
/// # Errors
///
/// Returns an error on the first entry missing an `=`.
pub fn parse_variables(pairs: &[String]) -> Result<BTreeMap<String, String>> {
    let mut variables = BTreeMap::new();
    for pair in pairs {
        let (key, value) = pair
            .split_once('=')
            .with_context(|| format!("invalid variable '{pair}', expected key=value"))?;
        variables.insert(key.to_string(), value.to_string());
    }
    Ok(variables)
}
