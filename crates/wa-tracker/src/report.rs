//! Campaign and account reporting (component J, `spec.md` §4.J).
//!
//! Aggregates [`VariationLogEntry`] rows into distribution and delivery
//! statistics, and exports the raw rows as JSON or CSV.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::time::Instant;
use wa_core::tracking::VariationLogEntry;
use wa_error::CoreError;

/// How many times a given option was selected for one block, and what
/// share of total sends that represents.
#[derive(Debug, Clone, Serialize)]
pub struct OptionCount {
    /// The option text as it appeared in the template.
    pub option_text: String,
    /// Number of sends that selected this option.
    pub count: u64,
    /// `count / total_sent`, in `[0, 1]`. `0.0` if there were no sends.
    pub percentage: f64,
}

/// Aggregate delivery-funnel counters.
#[derive(Debug, Clone, Serialize)]
pub struct DeliveryStats {
    /// Total messages sent.
    pub sent: u64,
    /// Messages confirmed delivered.
    pub delivered: u64,
    /// Messages confirmed read.
    pub read: u64,
    /// `delivered / sent`, in `[0, 1]`. `0.0` if `sent` is zero.
    pub delivery_rate: f64,
    /// `read / sent`, in `[0, 1]`. `0.0` if `sent` is zero.
    pub read_rate: f64,
}

/// Computed statistics for a set of log entries (a campaign or an
/// account's history).
#[derive(Debug, Clone, Serialize)]
pub struct Stats {
    /// Total messages represented.
    pub total_sent: u64,
    /// Per-block option distribution, keyed by block index, each block's
    /// options sorted descending by `count`.
    pub block_distribution: BTreeMap<usize, Vec<OptionCount>>,
    /// Delivery/read funnel.
    pub delivery: DeliveryStats,
    /// Timestamp of the earliest send, if any.
    pub first_sent_at: Option<DateTime<Utc>>,
    /// Timestamp of the most recent send, if any.
    pub last_sent_at: Option<DateTime<Utc>>,
    /// When this report was computed.
    pub calculated_at: DateTime<Utc>,
    /// Wall-clock time spent computing the aggregation, in milliseconds.
    pub calculation_duration_ms: u64,
}

/// Export format for [`ReportEngine::export`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    /// The raw log entries, serialized as a JSON array.
    Json,
    /// Nine fixed columns, RFC 4180 quoted: `id, campaign_id, message_id,
    /// template, selected_variations, recipient, sent_at, delivered, read`.
    Csv,
}

/// Stateless aggregation over [`VariationLogEntry`] slices.
#[derive(Debug, Default, Clone, Copy)]
pub struct ReportEngine;

impl ReportEngine {
    /// Compute [`Stats`] for `entries`. `now` is the caller's current time
    /// (injected so reports are reproducible under a [`wa_core::clock::Clock`]).
    #[must_use]
    pub fn stats(entries: &[VariationLogEntry], now: DateTime<Utc>) -> Stats {
        let start = Instant::now();

        let total_sent = entries.len() as u64;
        let mut counts: BTreeMap<usize, BTreeMap<String, u64>> = BTreeMap::new();
        let mut delivered = 0u64;
        let mut read = 0u64;
        let mut first_sent_at = None;
        let mut last_sent_at = None;

        for entry in entries {
            if entry.delivered {
                delivered += 1;
            }
            if entry.read {
                read += 1;
            }
            first_sent_at = Some(first_sent_at.map_or(entry.sent_at, |f: DateTime<Utc>| f.min(entry.sent_at)));
            last_sent_at = Some(last_sent_at.map_or(entry.sent_at, |l: DateTime<Utc>| l.max(entry.sent_at)));

            for selection in &entry.selections {
                *counts
                    .entry(selection.block_index)
                    .or_default()
                    .entry(selection.option_text.clone())
                    .or_insert(0) += 1;
            }
        }

        let block_distribution = counts
            .into_iter()
            .map(|(block_index, by_option)| {
                let mut options: Vec<OptionCount> = by_option
                    .into_iter()
                    .map(|(option_text, count)| OptionCount {
                        option_text,
                        count,
                        percentage: percentage(count, total_sent),
                    })
                    .collect();
                options.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.option_text.cmp(&b.option_text)));
                (block_index, options)
            })
            .collect();

        Stats {
            total_sent,
            block_distribution,
            delivery: DeliveryStats {
                sent: total_sent,
                delivered,
                read,
                delivery_rate: percentage(delivered, total_sent),
                read_rate: percentage(read, total_sent),
            },
            first_sent_at,
            last_sent_at,
            calculated_at: now,
            calculation_duration_ms: u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX),
        }
    }

    /// Serialize `entries` in `format`.
    ///
    /// # Errors
    ///
    /// Returns [`wa_error::ErrorCode::StorageError`] if serialization
    /// fails (CSV writer I/O or JSON encoding).
    pub fn export(entries: &[VariationLogEntry], format: ExportFormat) -> Result<Vec<u8>, CoreError> {
        match format {
            ExportFormat::Json => serde_json::to_vec_pretty(entries).map_err(|e| CoreError::storage("failed to serialize export as JSON").with_source(e)),
            ExportFormat::Csv => export_csv(entries),
        }
    }
}

fn percentage(count: u64, total: u64) -> f64 {
    if total == 0 {
        0.0
    } else {
        count as f64 / total as f64
    }
}

fn export_csv(entries: &[VariationLogEntry]) -> Result<Vec<u8>, CoreError> {
    let mut writer = csv::WriterBuilder::new().has_headers(true).from_writer(Vec::new());

    writer
        .write_record([
            "id",
            "campaign_id",
            "message_id",
            "template",
            "selected_variations",
            "recipient",
            "sent_at",
            "delivered",
            "read",
        ])
        .map_err(|e| CoreError::storage("failed to write CSV header").with_source(e))?;

    for entry in entries {
        let campaign_id = entry.campaign_id.map(|c| c.to_string()).unwrap_or_default();
        let message_id = entry.message_id.as_ref().map(std::string::ToString::to_string).unwrap_or_default();
        let selected_variations = entry
            .selections
            .iter()
            .map(|s| format!("{}:{}", s.block_index, s.option_text))
            .collect::<Vec<_>>()
            .join(";");

        writer
            .write_record([
                entry.id.to_string(),
                campaign_id,
                message_id,
                entry.template.clone(),
                selected_variations,
                entry.recipient.clone(),
                entry.sent_at.to_rfc3339(),
                entry.delivered.to_string(),
                entry.read.to_string(),
            ])
            .map_err(|e| CoreError::storage("failed to write CSV row").with_source(e))?;
    }

    writer
        .into_inner()
        .map_err(|e| CoreError::storage("failed to flush CSV writer").with_source(e))
}
