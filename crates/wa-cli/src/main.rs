#![deny(unsafe_code)]

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use uuid::Uuid;
use wa_cli::commands;
use wa_cli::format::{Formatter, OutputFormat};
use wa_config::CoreConfig;
use wa_core::campaign::{Campaign, CampaignStatus, Pacing, Progress};
use wa_core::ids::{AccountId, CampaignId, ScheduledMessageId};
use wa_core::quota::AccountPlan;
use wa_core::scheduled::{ScheduledMessage, ScheduledStatus};
use wa_tracker::ExportFormat;

/// Exit code for runtime errors (clap itself exits 2 for usage errors).
const EXIT_RUNTIME_ERROR: i32 = 1;

#[derive(Parser, Debug)]
#[command(name = "wa", version, about = "WhatsApp campaign core CLI")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to a TOML config file. Falls back to built-in defaults.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Stable identifier for this process, used for campaign lease ownership.
    #[arg(long, global = true, default_value = "wa-cli")]
    owner: String,

    /// Output format: json | json-pretty | text.
    #[arg(long, global = true, default_value = "text")]
    format: OutputFormat,

    /// Enable verbose, pretty-printed logging.
    #[arg(long, global = true)]
    debug: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Parse and validate a template without sending anything.
    TemplateValidate {
        /// Raw template text.
        template: String,
    },

    /// Render a few previews of a template.
    TemplatePreview {
        /// Raw template text.
        template: String,

        /// `key=value` substitutions. Can be repeated.
        #[arg(long = "var")]
        vars: Vec<String>,

        /// Number of previews to render.
        #[arg(long, default_value_t = 3)]
        count: usize,
    },

    /// Create and start a campaign.
    CampaignCreate {
        /// Owning account identifier.
        #[arg(long)]
        account_id: String,

        /// Human-readable campaign name.
        #[arg(long)]
        name: String,

        /// Raw template text.
        #[arg(long)]
        template: String,

        /// Path to a file with one recipient address per line.
        #[arg(long)]
        recipients: PathBuf,

        /// Minimum delay between consecutive sends, in milliseconds.
        #[arg(long, default_value_t = 0)]
        min_interval_ms: u64,

        /// Maximum delay between consecutive sends, in milliseconds.
        #[arg(long, default_value_t = 0)]
        max_interval_ms: u64,

        /// Maximum number of recipients dispatched concurrently.
        #[arg(long, default_value_t = 1)]
        max_parallel: usize,

        /// Account's sends-per-minute quota.
        #[arg(long, default_value_t = 60)]
        sends_per_minute: u32,

        /// Account's sends-per-day quota.
        #[arg(long, default_value_t = 10_000)]
        sends_per_day: u32,
    },

    /// Pause a running campaign.
    CampaignPause {
        /// Campaign id.
        id: Uuid,
    },

    /// Resume a paused campaign.
    CampaignResume {
        /// Campaign id.
        id: Uuid,
    },

    /// Cancel a campaign.
    CampaignCancel {
        /// Campaign id.
        id: Uuid,
    },

    /// Show a campaign's send progress.
    CampaignProgress {
        /// Campaign id.
        id: Uuid,
    },

    /// Show a campaign's variation and delivery statistics.
    CampaignStats {
        /// Campaign id.
        id: Uuid,
    },

    /// Export a campaign's raw variation log.
    CampaignExport {
        /// Campaign id.
        id: Uuid,

        /// Export format: json | csv.
        #[arg(long, default_value = "json")]
        export_format: String,

        /// Write the export to this file instead of stdout.
        #[arg(long)]
        out: Option<PathBuf>,
    },

    /// Schedule a one-off message for later delivery.
    MessageSchedule {
        /// Owning account identifier.
        #[arg(long)]
        account_id: String,

        /// Raw template text.
        #[arg(long)]
        template: String,

        /// Destination address.
        #[arg(long)]
        recipient: String,

        /// RFC 3339 timestamp at which to send.
        #[arg(long)]
        run_at: chrono::DateTime<chrono::Utc>,

        /// `key=value` substitutions. Can be repeated.
        #[arg(long = "var")]
        vars: Vec<String>,
    },

    /// Cancel a scheduled message before it is dispatched.
    MessageCancel {
        /// Scheduled message id.
        id: Uuid,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    wa_telemetry::init_tracing(cli.debug);

    if let Err(err) = run(cli).await {
        eprintln!("error: {err:#}");
        std::process::exit(EXIT_RUNTIME_ERROR);
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config = match &cli.config {
        Some(path) => CoreConfig::load(path).with_context(|| format!("load config {}", path.display()))?,
        None => CoreConfig::default(),
    };
    config.validate().context("validate config")?;
    let formatter = Formatter::new(cli.format);

    match cli.command {
        Commands::TemplateValidate { template } => {
            let parsed = wa_template::parser::parse(&template);
            println!("{}", formatter.format_template(&parsed));
            if !parsed.is_valid {
                std::process::exit(EXIT_RUNTIME_ERROR);
            }
        }
        Commands::TemplatePreview { template, vars, count } => {
            let variables = commands::parse_variables(&vars)?;
            let processor = wa_template::TemplateProcessor::new(config.parse_cache_capacity);
            for preview in processor.preview(&template, &variables, count) {
                println!("{}", preview.final_text);
            }
        }
        Commands::CampaignCreate {
            account_id,
            name,
            template,
            recipients,
            min_interval_ms,
            max_interval_ms,
            max_parallel,
            sends_per_minute,
            sends_per_day,
        } => {
            let control_plane = commands::build_control_plane(&config, &cli.owner).await?;
            let recipients = commands::load_recipients(&recipients)?;
            let total = recipients.len();
            let campaign = Campaign {
                id: CampaignId::new(),
                account_id: AccountId::new(account_id),
                name,
                template_raw: template,
                recipients,
                pacing: Pacing {
                    min_interval_ms,
                    max_interval_ms,
                    max_parallel,
                    ..Pacing::default()
                },
                created_at: chrono::Utc::now(),
                starts_at: None,
                status: CampaignStatus::Scheduled,
                progress: Progress::new(total),
                last_error: None,
            };
            let plan = AccountPlan {
                sends_per_minute,
                sends_per_day,
            };
            let id = control_plane.create_campaign(campaign, plan).await?;
            println!("{id}");
        }
        Commands::CampaignPause { id } => {
            let control_plane = commands::build_control_plane(&config, &cli.owner).await?;
            control_plane.pause(CampaignId(id)).await?;
        }
        Commands::CampaignResume { id } => {
            let control_plane = commands::build_control_plane(&config, &cli.owner).await?;
            control_plane.resume(CampaignId(id)).await?;
        }
        Commands::CampaignCancel { id } => {
            let control_plane = commands::build_control_plane(&config, &cli.owner).await?;
            control_plane.cancel(CampaignId(id)).await?;
        }
        Commands::CampaignProgress { id } => {
            let control_plane = commands::build_control_plane(&config, &cli.owner).await?;
            let progress = control_plane.progress(CampaignId(id)).await?;
            println!("{}", formatter.format_progress(&progress));
        }
        Commands::CampaignStats { id } => {
            let control_plane = commands::build_control_plane(&config, &cli.owner).await?;
            let stats = control_plane.campaign_stats(CampaignId(id), chrono::Utc::now()).await;
            println!("{}", formatter.format_stats(&stats));
        }
        Commands::CampaignExport { id, export_format, out } => {
            let control_plane = commands::build_control_plane(&config, &cli.owner).await?;
            let format = match export_format.as_str() {
                "csv" => ExportFormat::Csv,
                _ => ExportFormat::Json,
            };
            let bytes = control_plane.export_campaign(CampaignId(id), format).await?;
            match out {
                Some(path) => std::fs::write(&path, &bytes).with_context(|| format!("write export to {}", path.display()))?,
                None => {
                    use std::io::Write;
                    std::io::stdout().write_all(&bytes)?;
                }
            }
        }
        Commands::MessageSchedule {
            account_id,
            template,
            recipient,
            run_at,
            vars,
        } => {
            let control_plane = commands::build_control_plane(&config, &cli.owner).await?;
            let variables = commands::parse_variables(&vars)?;
            let message = ScheduledMessage {
                id: ScheduledMessageId::new(),
                account_id: AccountId::new(account_id),
                template_raw: template,
                recipient,
                variables,
                run_at,
                status: ScheduledStatus::Pending,
                attempts: 0,
                last_error: None,
            };
            let id = control_plane.schedule_message(message).await?;
            println!("{id}");
        }
        Commands::MessageCancel { id } => {
            let control_plane = commands::build_control_plane(&config, &cli.owner).await?;
            let cancelled = control_plane.cancel_scheduled(ScheduledMessageId(id)).await?;
            println!("{cancelled}");
        }
    }
    Ok(())
}
