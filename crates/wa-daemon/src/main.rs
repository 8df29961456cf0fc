#![deny(unsafe_code)]

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration as StdDuration;
use tracing::{info, warn};
use wa_config::CoreConfig;
use wa_core::clock::{SharedClock, SystemClock};
use wa_core::quota::AccountPlan;
use wa_core::random::{OsRandomSource, SharedRandomSource};
use wa_gateway::{MessageGateway, MockGateway};
use wa_ratelimit::QuotaLedger;
use wa_runtime::store::{CampaignStore, ScheduledMessageStore};
use wa_runtime::{ControlPlane, EventBus};
use wa_template::TemplateProcessor;
use wa_tracker::VariationTracker;

#[derive(Parser, Debug)]
#[command(name = "wa-daemon", version, about = "WhatsApp campaign core daemon")]
struct Args {
    /// HTTP bind address, overriding the config file's `bind`.
    #[arg(long)]
    bind: Option<String>,

    /// Path to a TOML config file. Defaults built in if absent.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Stable identifier for this process, used for campaign lease ownership.
    #[arg(long, default_value = "wa-daemon")]
    owner: String,

    /// Enable verbose, pretty-printed logging.
    #[arg(long)]
    debug: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    wa_telemetry::init_tracing(args.debug);

    let mut config = match &args.config {
        Some(path) => CoreConfig::load(path).with_context(|| format!("load config {}", path.display()))?,
        None => CoreConfig::default(),
    };
    if let Some(bind) = &args.bind {
        config.bind = bind.clone();
    }
    config.validate().context("validate config")?;

    tokio::fs::create_dir_all(&config.data_dir)
        .await
        .with_context(|| format!("create data dir {}", config.data_dir))?;
    let data_dir = PathBuf::from(&config.data_dir);

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

    let control_plane = Arc::new(ControlPlane::new(
        args.owner,
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
    ));

    let resumed = control_plane
        .restore_and_resume(AccountPlan::default())
        .await
        .context("restore and resume campaigns")?;
    info!(resumed, "recovered running campaigns from disk");

    spawn_background_ticks(control_plane.clone(), &config);

    let app = wa_daemon::build_app(control_plane);
    let listener = tokio::net::TcpListener::bind(&config.bind)
        .await
        .with_context(|| format!("bind {}", config.bind))?;
    info!(bind = %config.bind, "wa-daemon listening");

    axum::serve(listener, app).await.context("serve")
}

fn spawn_background_ticks(control_plane: Arc<ControlPlane>, config: &CoreConfig) {
    let single_message_tick = StdDuration::from_secs(config.single_message_tick_secs.max(1));
    let reconcile_interval = StdDuration::from_secs(config.reconcile_interval_secs.max(1));

    let tick_plane = control_plane.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(single_message_tick);
        loop {
            interval.tick().await;
            if let Err(err) = tick_plane.tick_single_messages(chrono::Utc::now()).await {
                warn!(error = %err, "scheduled-message tick failed");
            }
        }
    });

    tokio::spawn(async move {
        let mut interval = tokio::time::interval(reconcile_interval);
        loop {
            interval.tick().await;
            match control_plane.reconcile(chrono::Utc::now()).await {
                Ok(resumed) if !resumed.is_empty() => {
                    info!(count = resumed.len(), "reconciliation resumed abandoned campaigns");
                }
                Ok(_) => {}
                Err(err) => warn!(error = %err, "campaign reconciliation failed"),
            }
        }
    });
}
