//! End-to-end scenarios, one function per literal example (`spec.md` §8).

use chrono::Utc;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration as StdDuration;

use wa_core::campaign::{Campaign, CampaignStatus, Pacing, Progress, Recipient};
use wa_core::clock::{FixedClock, SharedClock};
use wa_core::ids::{AccountId, CampaignId};
use wa_core::quota::AccountPlan;
use wa_core::random::{SeededRandomSource, SharedRandomSource};
use wa_gateway::{MessageGateway, MockGateway};
use wa_ratelimit::QuotaLedger;
use wa_runtime::store::{CampaignStore, ScheduledMessageStore};
use wa_runtime::{ControlPlane, EventBus};
use wa_template::TemplateProcessor;
use wa_tracker::VariationTracker;

async fn control_plane_at(
    dir: &std::path::Path,
    owner: &str,
    clock: SharedClock,
    random: SharedRandomSource,
) -> ControlPlane {
    let campaign_store = CampaignStore::open(dir.join("campaigns.jsonl")).await.unwrap();
    let scheduled = Arc::new(ScheduledMessageStore::open(dir.join("scheduled.jsonl")).await.unwrap());
    let template = Arc::new(TemplateProcessor::new(16));
    let quota = Arc::new(QuotaLedger::new(clock.clone()));
    let gateway: Arc<dyn MessageGateway> = Arc::new(MockGateway::new(clock.clone(), random.clone()));
    let tracker = Arc::new(VariationTracker::open(dir.join("tracking.jsonl")).await.unwrap());
    let bus = Arc::new(EventBus::new());
    ControlPlane::new(
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
        chrono::Duration::seconds(30),
        4,
        10,
    )
}

fn recipients(n: usize) -> Vec<Recipient> {
    (0..n).map(|i| Recipient::new(format!("+1555{i:07}"))).collect()
}

/// Scenario 1: parse and combinations.
#[test]
fn scenario_1_parse_and_combinations() {
    let template = wa_template::parser::parse("Hi|Hello {{name}}, ok?|fine?");
    assert_eq!(template.blocks.len(), 2);
    assert_eq!(template.total_combinations, 4);
    assert_eq!(template.variable_names, vec!["name".to_string()]);
    assert!(template.is_valid);
    assert!(template.errors.is_empty());
}

/// Scenario 2: seeded processing is deterministic across invocations.
#[test]
fn scenario_2_seeded_processing_is_deterministic() {
    let processor = TemplateProcessor::new(16);
    let mut variables = BTreeMap::new();
    variables.insert("x".to_string(), "Z".to_string());

    let opts = wa_template::ProcessOptions {
        variables: variables.clone(),
        validate_only: false,
        seed: Some(42),
    };
    let first = processor.process("A|B {{x}}", &opts);
    let second = processor.process("A|B {{x}}", &opts);

    assert_eq!(first.final_text, second.final_text);
    assert_eq!(first.selections, second.selections);
    assert_eq!(first.selections.len(), 1);
    assert!(first.selections[0].option_index == 0 || first.selections[0].option_index == 1);
}

/// Scenario 3: quota enforcement across two tumbling minute windows.
///
/// Account plan allows 5 sends/minute; a 10-recipient campaign with zero
/// pacing delay is submitted at t=0. By t=60s exactly 5 sends have
/// committed; by t=120s all 10 have.
#[tokio::test(start_paused = true)]
async fn scenario_3_quota_enforcement_across_minute_windows() {
    let dir = tempfile::tempdir().unwrap();
    let clock = Arc::new(FixedClock::new(Utc::now()));
    let shared_clock: SharedClock = clock.clone();
    let random: SharedRandomSource = Arc::new(SeededRandomSource::new(3));
    let cp = control_plane_at(dir.path(), "owner-a", shared_clock, random).await;

    let pacing = Pacing {
        min_interval_ms: 0,
        max_interval_ms: 0,
        max_parallel: 1,
        ..Pacing::default()
    };
    let campaign = Campaign {
        id: CampaignId::new(),
        account_id: AccountId::new("acct-quota"),
        name: "quota-test".into(),
        template_raw: "Hi|Hello".into(),
        recipients: recipients(10),
        pacing,
        created_at: Utc::now(),
        starts_at: None,
        status: CampaignStatus::Scheduled,
        progress: Progress::new(10),
        last_error: None,
    };
    let id = campaign.id;
    let plan = AccountPlan {
        sends_per_minute: 5,
        sends_per_day: 10_000,
    };
    cp.create_campaign(campaign, plan).await.unwrap();

    // Advance both the injected clock (quota window rollover) and the
    // tokio timer (the scheduler's retry-after sleeps) in lockstep.
    for _ in 0..60 {
        tokio::time::advance(StdDuration::from_secs(1)).await;
        clock.advance(chrono::Duration::seconds(1));
        tokio::task::yield_now().await;
    }
    let progress = cp.progress(id).await.unwrap();
    assert_eq!(progress.succeeded, 5);

    for _ in 0..60 {
        tokio::time::advance(StdDuration::from_secs(1)).await;
        clock.advance(chrono::Duration::seconds(1));
        tokio::task::yield_now().await;
    }
    let progress = cp.progress(id).await.unwrap();
    assert_eq!(progress.succeeded, 10);
}

/// Scenario 4: crash recovery resumes from the persisted `next_index`.
#[tokio::test]
async fn scenario_4_crash_recovery_resumes_from_next_index() {
    let dir = tempfile::tempdir().unwrap();
    let clock: SharedClock = Arc::new(FixedClock::new(Utc::now()));
    let random: SharedRandomSource = Arc::new(SeededRandomSource::new(4));

    // Simulate a crash: a campaign already persisted as `running` with 47
    // of 100 recipients attempted, and no lease held by anyone.
    let id = CampaignId::new();
    {
        let store = CampaignStore::open(dir.path().join("campaigns.jsonl")).await.unwrap();
        let mut progress = Progress::new(100);
        progress.attempted = 47;
        progress.succeeded = 47;
        progress.next_index = 47;
        let campaign = Campaign {
            id,
            account_id: AccountId::new("acct-crash"),
            name: "crash-test".into(),
            template_raw: "Hi|Hello".into(),
            recipients: recipients(100),
            pacing: Pacing::default(),
            created_at: Utc::now(),
            starts_at: None,
            status: CampaignStatus::Running,
            progress,
            last_error: None,
        };
        store.insert(campaign).await.unwrap();
    }

    // A fresh process opens the same store and resumes ownership.
    let cp = control_plane_at(dir.path(), "owner-b", clock, random).await;
    let resumed = cp.restore_and_resume(AccountPlan::default()).await.unwrap();
    assert_eq!(resumed, 1);

    for _ in 0..200 {
        let progress = cp.progress(id).await.unwrap();
        if progress.is_complete() {
            break;
        }
        tokio::time::sleep(StdDuration::from_millis(20)).await;
    }
    let progress = cp.progress(id).await.unwrap();
    assert_eq!(progress.next_index, 100);
    assert_eq!(progress.succeeded + progress.failed, 100);
}

/// Scenario 5: cancellation takes effect at the next recipient boundary.
#[tokio::test]
async fn scenario_5_cancellation_stops_within_one_boundary() {
    let dir = tempfile::tempdir().unwrap();
    let clock: SharedClock = Arc::new(FixedClock::new(Utc::now()));
    let random: SharedRandomSource = Arc::new(SeededRandomSource::new(5));
    let cp = control_plane_at(dir.path(), "owner-a", clock, random).await;

    let pacing = Pacing {
        min_interval_ms: 20,
        max_interval_ms: 30,
        max_parallel: 1,
        ..Pacing::default()
    };
    let campaign = Campaign {
        id: CampaignId::new(),
        account_id: AccountId::new("acct-cancel"),
        name: "cancel-test".into(),
        template_raw: "Hi|Hello".into(),
        recipients: recipients(50),
        pacing,
        created_at: Utc::now(),
        starts_at: None,
        status: CampaignStatus::Scheduled,
        progress: Progress::new(50),
        last_error: None,
    };
    let id = campaign.id;
    cp.create_campaign(campaign, AccountPlan::default()).await.unwrap();

    // Let roughly 10 recipients commit before cancelling.
    loop {
        let progress = cp.progress(id).await.unwrap();
        if progress.attempted >= 10 {
            break;
        }
        tokio::time::sleep(StdDuration::from_millis(5)).await;
    }
    cp.cancel(id).await.unwrap();

    // Give the loop one more boundary to observe the cancellation and
    // settle, then confirm no further sends happened after that.
    tokio::time::sleep(StdDuration::from_millis(100)).await;
    let settled = cp.progress(id).await.unwrap();
    tokio::time::sleep(StdDuration::from_millis(200)).await;
    let later = cp.progress(id).await.unwrap();

    assert!(settled.attempted == 10 || settled.attempted == 11, "attempted was {}", settled.attempted);
    assert_eq!(settled.attempted, later.attempted, "no further sends should happen after cancellation settles");
}

/// Scenario 6: distribution report over 1,000 sends of a two-option,
/// variable-free template is roughly uniform.
#[tokio::test]
async fn scenario_6_distribution_report_is_roughly_uniform() {
    let dir = tempfile::tempdir().unwrap();
    let clock: SharedClock = Arc::new(FixedClock::new(Utc::now()));
    let random: SharedRandomSource = Arc::new(SeededRandomSource::new(6));
    let cp = control_plane_at(dir.path(), "owner-a", clock, random).await;

    let pacing = Pacing {
        min_interval_ms: 0,
        max_interval_ms: 0,
        max_parallel: 8,
        ..Pacing::default()
    };
    let campaign = Campaign {
        id: CampaignId::new(),
        account_id: AccountId::new("acct-dist"),
        name: "distribution-test".into(),
        template_raw: "Ol\u{e1}|Oi".into(),
        recipients: recipients(1_000),
        pacing,
        created_at: Utc::now(),
        starts_at: None,
        status: CampaignStatus::Scheduled,
        progress: Progress::new(1_000),
        last_error: None,
    };
    let id = campaign.id;
    let plan = AccountPlan {
        sends_per_minute: 100_000,
        sends_per_day: 1_000_000,
    };
    cp.create_campaign(campaign, plan).await.unwrap();

    for _ in 0..2_000 {
        let progress = cp.progress(id).await.unwrap();
        if progress.is_complete() {
            break;
        }
        tokio::time::sleep(StdDuration::from_millis(10)).await;
    }
    let progress = cp.progress(id).await.unwrap();
    assert!(progress.is_complete());

    let stats = cp.campaign_stats(id, Utc::now()).await;
    assert_eq!(stats.total_sent, 1_000);
    let options = stats.block_distribution.get(&0).expect("block 0 distribution");
    assert_eq!(options.len(), 2);
    let total: u64 = options.iter().map(|o| o.count).sum();
    assert_eq!(total, 1_000);
    for option in options {
        assert!(option.count >= 450 && option.count <= 550, "count {} outside [450, 550]", option.count);
    }
}
