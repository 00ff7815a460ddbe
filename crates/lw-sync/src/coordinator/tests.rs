use super::*;
use crate::config::{DefaultSubscription, ProbeConfig};
use crate::probe::CheckOutcome;
use crate::testing::{list_url, rule_list, MockHost, MockTransport, Reply};
use lw_core::{FetchResponse, ListRole, MemoryCache, DEFAULT_EXPIRES};
use lw_merger::MergeLimits;
use tokio::sync::broadcast::error::TryRecvError;

const SECOND: Duration = Duration::from_secs(1);

struct Fixture {
    coordinator: UpdateCoordinator,
    settings: Settings,
    cache: Arc<MemoryCache>,
    transport: Arc<MockTransport>,
    host: Arc<MockHost>,
    events: broadcast::Receiver<UpdateEvent>,
}

fn config() -> UpdaterConfig {
    UpdaterConfig {
        content_blocker_identifier: "test.blocker".to_string(),
        download_timeout: Duration::from_secs(30),
        ..UpdaterConfig::default()
    }
}

fn subscription(name: &str, expires: Duration) -> Subscription {
    Subscription::new(name, list_url(name), file_name_for(name).unwrap(), expires)
}

fn seed(settings: &Settings, names: &[&str]) {
    let subs: Vec<Subscription> = names.iter().map(|n| subscription(n, DEFAULT_EXPIRES)).collect();
    settings.save_subscriptions(&subs).unwrap();
}

fn fixture_with(
    settings: Settings,
    cache: Arc<MemoryCache>,
    config: UpdaterConfig,
    host: Arc<MockHost>,
) -> Fixture {
    let transport = MockTransport::new();
    let coordinator = UpdateCoordinator::new(
        config,
        settings.clone(),
        cache.clone(),
        transport.clone(),
        host.clone(),
    )
    .unwrap();
    let events = coordinator.subscribe_events();
    Fixture {
        coordinator,
        settings,
        cache,
        transport,
        host,
        events,
    }
}

fn fixture(names: &[&str]) -> Fixture {
    let settings = Settings::in_memory();
    seed(&settings, names);
    fixture_with(settings, Arc::new(MemoryCache::new()), config(), MockHost::new())
}

/// Collect events up to and including the next `Settled`.
async fn settle(events: &mut broadcast::Receiver<UpdateEvent>) -> Vec<UpdateEvent> {
    let mut seen = Vec::new();
    loop {
        let event = events.recv().await.unwrap();
        let done = matches!(event, UpdateEvent::Settled { .. });
        seen.push(event);
        if done {
            return seen;
        }
    }
}

fn ruleset(cache: &MemoryCache) -> Option<String> {
    cache.read(RULESET_FILE_NAME).unwrap()
}

// =============================================================================
// Settlement
// =============================================================================

#[tokio::test(start_paused = true)]
async fn expired_lists_merge_once_and_reload_once() {
    let mut f = fixture(&["easy", "privacy"]);
    f.transport.ok(&list_url("easy"), SECOND, &rule_list("ads"));
    f.transport.ok(&list_url("privacy"), 2 * SECOND, &rule_list("track"));

    let request = f.coordinator.update_active_subscriptions(false);
    assert!(matches!(
        request,
        UpdateRequest::Started { generation: GroupId(1), ref started, ref joined }
            if started.len() == 2 && joined.is_empty()
    ));
    assert!(f.coordinator.is_updating());
    assert!(f.coordinator.status().updating);

    let events = settle(&mut f.events).await;
    assert_eq!(
        events,
        vec![UpdateEvent::Settled {
            generation: GroupId(1),
            changed: true,
            failed: 0
        }]
    );
    assert_eq!(f.host.reloads(), 1);

    let merged = ruleset(&f.cache).unwrap();
    assert!(merged.contains("ads"));
    assert!(merged.contains("track"));

    let status = f.coordinator.status();
    assert!(!status.updating);
    assert!(!status.reloading);
    assert!(status.last_update.is_some());
    assert_eq!(status.generation, Some(GroupId(1)));
    assert_eq!(f.settings.last_ruleset_update().unwrap(), status.last_update);

    let easy = f.coordinator.subscription("easy").unwrap();
    assert!(easy.downloaded);
    assert!(!easy.updating);
    assert_eq!(easy.task_identifier, None);
    assert_eq!(easy.download_count, 1);
    assert!(easy.version.is_some());

    let persisted = f.settings.load_subscriptions().unwrap();
    assert!(persisted.iter().all(|s| s.downloaded && !s.updating));
}

#[tokio::test(start_paused = true)]
async fn outdated_names_follow_expiry() {
    let settings = Settings::in_memory();
    let now = Utc::now();
    let mut a = subscription("a", Duration::from_secs(3600));
    a.downloaded = true;
    a.last_update = Some(now - chrono::Duration::hours(2));
    let mut b = subscription("b", Duration::from_secs(3600));
    b.downloaded = true;
    b.last_update = Some(now - chrono::Duration::minutes(10));
    settings.save_subscriptions([&a, &b]).unwrap();

    let f = fixture_with(settings, Arc::new(MemoryCache::new()), config(), MockHost::new());
    assert_eq!(
        f.coordinator.outdated_subscription_names_at(now),
        BTreeSet::from(["a".to_string()])
    );

    f.transport.ok(&list_url("a"), SECOND, &rule_list("ads"));
    let request = f.coordinator.update_active_subscriptions(false);
    assert!(matches!(request, UpdateRequest::Started { ref started, .. } if started == &["a"]));
}

#[tokio::test(start_paused = true)]
async fn nothing_expired_means_nothing_to_do() {
    let settings = Settings::in_memory();
    let mut a = subscription("a", DEFAULT_EXPIRES);
    a.downloaded = true;
    a.last_update = Some(Utc::now());
    settings.save_subscriptions([&a]).unwrap();

    let f = fixture_with(settings, Arc::new(MemoryCache::new()), config(), MockHost::new());
    assert_eq!(f.coordinator.update_active_subscriptions(false), UpdateRequest::NothingToDo);
    assert_eq!(f.coordinator.update_subscriptions(&["missing"], true), UpdateRequest::NothingToDo);
    assert_eq!(f.coordinator.status().generation, None);
}

#[tokio::test(start_paused = true)]
async fn user_generation_raises_one_report_for_many_failures() {
    let mut f = fixture(&["a", "b", "c"]);
    f.transport.fail(&list_url("a"), SECOND);
    f.transport.ok(&list_url("b"), 2 * SECOND, &rule_list("ads"));
    f.transport.fail(&list_url("c"), 3 * SECOND);

    f.coordinator.update_active_subscriptions(true);
    let events = settle(&mut f.events).await;

    assert_eq!(events.len(), 2);
    let UpdateEvent::UpdateFailed(report) = &events[0] else {
        panic!("expected a failure report, got {:?}", events[0]);
    };
    assert_eq!(report.generation, GroupId(1));
    assert_eq!(report.names().collect::<Vec<_>>(), vec!["a", "c"]);
    assert!(report.failures.iter().all(|f| f.kind == FailureKind::Transport));
    assert_eq!(
        events[1],
        UpdateEvent::Settled {
            generation: GroupId(1),
            changed: true,
            failed: 2
        }
    );
    assert_eq!(f.host.reloads(), 1);
    assert_eq!(f.coordinator.status().failure.as_ref(), Some(report));

    let a = f.coordinator.subscription("a").unwrap();
    assert!(a.last_update_failed);
    assert!(!a.downloaded);
    assert_eq!(a.last_update, None);
    assert_eq!(a.last_failure, Some(FailureKind::Transport));
    assert_eq!(a.download_count, 1);

    f.coordinator.dismiss_failure();
    assert_eq!(f.coordinator.status().failure, None);
}

#[tokio::test(start_paused = true)]
async fn background_failures_stay_silent() {
    let mut f = fixture(&["a", "b", "c"]);
    for name in ["a", "b", "c"] {
        f.transport.fail(&list_url(name), SECOND);
    }

    f.coordinator.update_active_subscriptions(false);
    let events = settle(&mut f.events).await;

    assert_eq!(
        events,
        vec![UpdateEvent::Settled {
            generation: GroupId(1),
            changed: false,
            failed: 3
        }]
    );
    assert_eq!(f.coordinator.status().failure, None);
    assert!(f
        .coordinator
        .subscriptions()
        .iter()
        .all(|s| s.last_update_failed && !s.updating));
}

// =============================================================================
// Generations
// =============================================================================

#[tokio::test(start_paused = true)]
async fn stale_success_does_not_clear_failure_or_reload() {
    let mut f = fixture(&["x", "y"]);
    f.transport.fail(&list_url("x"), 5 * SECOND);
    f.transport.ok(&list_url("y"), 30 * SECOND, &rule_list("late"));

    // Background generation 1 downloads both lists.
    f.coordinator.update_active_subscriptions(false);
    tokio::time::sleep(SECOND).await;

    // The user asks for x while it is still in flight: generation 2 joins it.
    let second = f.coordinator.update_subscriptions(&["x"], true);
    assert_eq!(
        second,
        UpdateRequest::Started {
            generation: GroupId(2),
            started: vec![],
            joined: vec!["x".to_string()],
        }
    );

    let events = settle(&mut f.events).await;
    let UpdateEvent::UpdateFailed(report) = &events[0] else {
        panic!("expected a failure report, got {:?}", events[0]);
    };
    assert_eq!(report.generation, GroupId(2));
    assert_eq!(report.names().collect::<Vec<_>>(), vec!["x"]);
    assert_eq!(
        events[1],
        UpdateEvent::Settled {
            generation: GroupId(2),
            changed: false,
            failed: 1
        }
    );
    assert_eq!(f.host.reloads(), 1);
    assert_eq!(f.transport.calls_for(&list_url("x")), 1);

    // y still belongs to superseded generation 1.
    assert!(!f.coordinator.is_updating());
    assert!(f.coordinator.subscription("y").unwrap().updating);

    tokio::time::sleep(60 * SECOND).await;

    let y = f.coordinator.subscription("y").unwrap();
    assert!(y.downloaded);
    assert!(!y.updating);
    assert_eq!(y.download_count, 1);
    assert!(f.cache.read(y.file_name()).unwrap().is_some());
    assert!(f.settings.load_subscriptions().unwrap().iter().any(|s| s.name == "y" && s.downloaded));

    assert_eq!(f.host.reloads(), 1);
    assert!(matches!(f.events.try_recv(), Err(TryRecvError::Empty)));
    assert_eq!(f.coordinator.status().failure.unwrap().generation, GroupId(2));
}

#[tokio::test(start_paused = true)]
async fn stale_success_is_merged_by_the_next_settlement() {
    let mut f = fixture(&["x", "y"]);
    f.transport.ok(&list_url("x"), 5 * SECOND, &rule_list("ads"));
    f.transport.ok(&list_url("y"), 30 * SECOND, &rule_list("late"));

    f.coordinator.update_active_subscriptions(false);
    tokio::time::sleep(SECOND).await;
    f.coordinator.update_subscriptions(&["x"], true);
    settle(&mut f.events).await;
    assert!(!ruleset(&f.cache).unwrap().contains("late"));

    // y lands stale: recorded, but neither merged nor reloaded yet.
    tokio::time::sleep(60 * SECOND).await;
    assert!(f.coordinator.subscription("y").unwrap().downloaded);
    assert!(!ruleset(&f.cache).unwrap().contains("late"));
    assert_eq!(f.host.reloads(), 1);

    // Same versions again: nothing changes in this generation, but y's
    // earlier content still has to reach the ruleset.
    f.transport.ok(&list_url("x"), SECOND, &rule_list("ads"));
    f.transport.ok(&list_url("y"), SECOND, &rule_list("late"));
    f.coordinator.update_active_subscriptions(true);

    let events = settle(&mut f.events).await;
    assert_eq!(
        events,
        vec![UpdateEvent::Settled {
            generation: GroupId(3),
            changed: true,
            failed: 0
        }]
    );
    let merged = ruleset(&f.cache).unwrap();
    assert!(merged.contains("ads"));
    assert!(merged.contains("late"));
    assert_eq!(f.host.reloads(), 2);
}

#[tokio::test(start_paused = true)]
async fn background_join_takes_over_user_requested_leftovers() {
    let mut f = fixture(&["a", "b"]);
    f.transport.ok(&list_url("a"), 8 * SECOND, &rule_list("ads"));
    f.transport.fail(&list_url("b"), 5 * SECOND);

    f.coordinator.update_active_subscriptions(true);
    tokio::time::sleep(SECOND).await;

    // A background pass only asks for a.
    let second = f.coordinator.update_subscriptions(&["a"], false);
    assert_eq!(
        second,
        UpdateRequest::Started {
            generation: GroupId(2),
            started: vec![],
            joined: vec!["a".to_string()],
        }
    );
    let b = f.coordinator.subscription("b").unwrap();
    assert_eq!(b.updating_group_identifier, Some(GroupId(2)));
    assert!(b.user_triggered);

    let events = settle(&mut f.events).await;
    let UpdateEvent::UpdateFailed(report) = &events[0] else {
        panic!("expected a failure report, got {:?}", events[0]);
    };
    assert_eq!(report.generation, GroupId(2));
    assert_eq!(report.names().collect::<Vec<_>>(), vec!["b"]);
    assert_eq!(
        events[1],
        UpdateEvent::Settled {
            generation: GroupId(2),
            changed: true,
            failed: 1
        }
    );
    assert_eq!(f.host.reloads(), 1);
    assert_eq!(f.transport.calls_for(&list_url("b")), 1);
}

#[tokio::test(start_paused = true)]
async fn background_leftovers_finish_stale() {
    let mut f = fixture(&["a", "b"]);
    f.transport.ok(&list_url("a"), 2 * SECOND, &rule_list("ads"));
    f.transport.fail(&list_url("b"), 5 * SECOND);

    f.coordinator.update_active_subscriptions(false);
    tokio::time::sleep(SECOND).await;
    f.coordinator.update_subscriptions(&["a"], true);
    assert_eq!(
        f.coordinator.subscription("b").unwrap().updating_group_identifier,
        Some(GroupId(1))
    );

    let events = settle(&mut f.events).await;
    assert_eq!(
        events,
        vec![UpdateEvent::Settled {
            generation: GroupId(2),
            changed: true,
            failed: 0
        }]
    );
    tokio::time::sleep(10 * SECOND).await;
    assert!(f.coordinator.subscription("b").unwrap().last_update_failed);
    assert!(matches!(f.events.try_recv(), Err(TryRecvError::Empty)));
}

#[tokio::test(start_paused = true)]
async fn superseded_generation_never_settles_on_its_own() {
    let mut f = fixture(&["a", "b"]);
    f.transport.ok(&list_url("a"), 2 * SECOND, &rule_list("ads"));
    f.transport.ok(&list_url("b"), 4 * SECOND, &rule_list("track"));

    f.coordinator.update_active_subscriptions(false);
    tokio::time::sleep(SECOND).await;
    let second = f.coordinator.update_active_subscriptions(true);
    assert!(matches!(
        second,
        UpdateRequest::Started { generation: GroupId(2), ref started, ref joined }
            if started.is_empty() && joined.len() == 2
    ));

    let events = settle(&mut f.events).await;
    assert_eq!(
        events,
        vec![UpdateEvent::Settled {
            generation: GroupId(2),
            changed: true,
            failed: 0
        }]
    );
    tokio::time::sleep(60 * SECOND).await;
    assert!(matches!(f.events.try_recv(), Err(TryRecvError::Empty)));
    assert_eq!(f.host.reloads(), 1);
    assert_eq!(f.transport.calls_for(&list_url("a")), 1);
}

#[tokio::test(start_paused = true)]
async fn live_change_before_supersede_is_still_merged() {
    let mut f = fixture(&["a", "b"]);
    f.transport.ok(&list_url("a"), SECOND, &rule_list("ads"));
    f.transport.fail(&list_url("b"), 10 * SECOND);

    f.coordinator.update_active_subscriptions(false);
    tokio::time::sleep(2 * SECOND).await;
    // a already landed live in generation 1; generation 2 takes over b.
    f.coordinator.update_subscriptions(&["b"], false);

    let events = settle(&mut f.events).await;
    assert!(matches!(
        events.last(),
        Some(UpdateEvent::Settled { generation: GroupId(2), changed: true, failed: 1 })
    ));
    assert!(ruleset(&f.cache).unwrap().contains("ads"));
}

#[tokio::test(start_paused = true)]
async fn unchanged_version_skips_merge() {
    let mut f = fixture(&["x"]);
    for _ in 0..2 {
        f.transport.reply(
            &list_url("x"),
            SECOND,
            Reply::Ok(FetchResponse::new(rule_list("ads")).with_version("v1")),
        );
    }

    f.coordinator.update_active_subscriptions(true);
    settle(&mut f.events).await;
    let first_update = f.coordinator.last_update();
    assert!(first_update.is_some());

    f.coordinator.update_active_subscriptions(true);
    let events = settle(&mut f.events).await;
    assert_eq!(
        events,
        vec![UpdateEvent::Settled {
            generation: GroupId(2),
            changed: false,
            failed: 0
        }]
    );
    assert_eq!(f.coordinator.last_update(), first_update);
    assert_eq!(f.host.reloads(), 2);

    let x = f.coordinator.subscription("x").unwrap();
    assert_eq!(x.version.as_deref(), Some("v1"));
    assert_eq!(x.download_count, 2);
}

#[tokio::test(start_paused = true)]
async fn invalid_payload_keeps_enforced_content() {
    let mut f = fixture(&["x"]);
    f.transport.reply(
        &list_url("x"),
        SECOND,
        Reply::Ok(FetchResponse::new(rule_list("ads")).with_version("v1")),
    );
    f.transport.ok(&list_url("x"), SECOND, "<html>login</html>");

    f.coordinator.update_active_subscriptions(true);
    settle(&mut f.events).await;
    let last_update = f.coordinator.subscription("x").unwrap().last_update;

    f.coordinator.update_active_subscriptions(true);
    let events = settle(&mut f.events).await;
    let UpdateEvent::UpdateFailed(report) = &events[0] else {
        panic!("expected a failure report, got {:?}", events[0]);
    };
    assert_eq!(report.failures[0].kind, FailureKind::Validation);

    let x = f.coordinator.subscription("x").unwrap();
    assert!(x.downloaded);
    assert!(x.last_update_failed);
    assert_eq!(x.version.as_deref(), Some("v1"));
    assert_eq!(x.last_update, last_update);
    assert_eq!(x.last_failure, Some(FailureKind::Validation));
    assert_eq!(f.cache.read(x.file_name()).unwrap(), Some(rule_list("ads")));
}

#[tokio::test(start_paused = true)]
async fn hung_download_times_out_and_settles() {
    let settings = Settings::in_memory();
    seed(&settings, &["x"]);
    let config = UpdaterConfig {
        download_timeout: 5 * SECOND,
        ..config()
    };
    let mut f = fixture_with(settings, Arc::new(MemoryCache::new()), config, MockHost::new());
    f.transport.reply(&list_url("x"), Duration::ZERO, Reply::Hang);

    f.coordinator.update_active_subscriptions(true);
    let events = settle(&mut f.events).await;

    let UpdateEvent::UpdateFailed(report) = &events[0] else {
        panic!("expected a failure report, got {:?}", events[0]);
    };
    assert_eq!(report.failures[0].kind, FailureKind::Transport);
    assert!(!f.coordinator.is_updating());
}

// =============================================================================
// Merge and Reload
// =============================================================================

#[tokio::test(start_paused = true)]
async fn capacity_failure_is_always_raised_and_nothing_is_installed() {
    let settings = Settings::in_memory();
    seed(&settings, &["a", "b"]);
    let config = UpdaterConfig {
        merge_limits: MergeLimits {
            max_rules: 1,
            max_bytes: None,
        },
        ..config()
    };
    let mut f = fixture_with(settings, Arc::new(MemoryCache::new()), config, MockHost::new());
    f.transport.ok(&list_url("a"), SECOND, &rule_list("ads"));
    f.transport.ok(&list_url("b"), SECOND, &rule_list("track"));

    f.coordinator.update_active_subscriptions(false);
    let events = settle(&mut f.events).await;

    assert_eq!(events.len(), 2);
    assert!(matches!(
        events[0],
        UpdateEvent::MergeFailed { generation: Some(GroupId(1)), capacity: true, .. }
    ));
    assert_eq!(f.host.reloads(), 0);
    assert_eq!(ruleset(&f.cache), None);
    assert_eq!(f.coordinator.last_update(), None);
}

#[tokio::test(start_paused = true)]
async fn reload_retries_ordinary_failures() {
    let mut f = fixture(&["x"]);
    f.transport.ok(&list_url("x"), SECOND, &rule_list("ads"));
    f.host.push(Err(HostError::platform(1, "busy")));
    f.host.push(Err(HostError::platform(1, "busy")));

    f.coordinator.update_active_subscriptions(true);
    let events = settle(&mut f.events).await;

    assert_eq!(events.len(), 1);
    assert_eq!(f.host.reloads(), 3);
}

#[tokio::test(start_paused = true)]
async fn exhausted_reload_is_reported_for_user_generation_only() {
    let mut f = fixture(&["x"]);
    f.transport.ok(&list_url("x"), SECOND, &rule_list("ads"));
    f.transport.ok(&list_url("x"), SECOND, &rule_list("ads"));
    for _ in 0..6 {
        f.host.push(Err(HostError::platform(1, "rules failed to compile")));
    }

    f.coordinator.update_active_subscriptions(false);
    let events = settle(&mut f.events).await;
    assert_eq!(events.len(), 1);
    assert_eq!(f.host.reloads(), 3);

    f.coordinator.update_active_subscriptions(true);
    let events = settle(&mut f.events).await;
    assert_eq!(events.len(), 2);
    assert!(matches!(&events[0], UpdateEvent::ReloadFailed { message } if message.contains("compile")));
    assert_eq!(f.host.reloads(), 6);
}

#[tokio::test(start_paused = true)]
async fn reload_waits_for_outstanding_activity_test() {
    let settings = Settings::in_memory();
    seed(&settings, &["x"]);
    let cache = Arc::new(MemoryCache::new());
    let host = MockHost::extension(settings.clone(), cache.clone(), 10 * SECOND);
    let mut f = fixture_with(settings.clone(), cache, config(), host.clone());

    let probe_config = ProbeConfig {
        timeout: 30 * SECOND,
        ..ProbeConfig::default()
    };
    let probe = ActivationProbe::new(probe_config, settings, host.clone()).unwrap();
    f.coordinator.attach_probe(&probe);

    let check = tokio::spawn({
        let probe = probe.clone();
        async move { probe.check_activation().await }
    });
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(probe.phase(), ProbePhase::ProbeInFlight);

    f.transport.ok(&list_url("x"), SECOND, &rule_list("ads"));
    f.coordinator.update_active_subscriptions(true);
    settle(&mut f.events).await;

    assert_eq!(
        check.await.unwrap(),
        CheckOutcome::Confirmed {
            follow_up_reload: Ok(())
        }
    );
    assert!(probe.is_activated());

    // Probe reload first; the follow-up and the coordinator's deferred
    // reload only start once the extension has answered.
    let started = f.host.started();
    assert_eq!(started.len(), 3);
    assert!(started[1] - started[0] >= 10 * SECOND);
    assert!(started[2] - started[0] >= 10 * SECOND);
}

#[tokio::test(start_paused = true)]
async fn background_reload_waits_for_activation() {
    let settings = Settings::in_memory();
    seed(&settings, &["x"]);
    let cache = Arc::new(MemoryCache::new());
    let host = MockHost::extension(settings.clone(), cache.clone(), Duration::ZERO);
    let mut f = fixture_with(settings.clone(), cache, config(), host.clone());

    let activation = ActivationProbe::new(ProbeConfig::default(), settings, host).unwrap();
    f.coordinator.attach_probe(&activation);
    assert!(!activation.is_activated());

    // Merged and stored, but the platform is not asked to load it.
    f.transport.ok(&list_url("x"), SECOND, &rule_list("ads"));
    f.coordinator.update_active_subscriptions(false);
    let events = settle(&mut f.events).await;
    assert_eq!(
        events,
        vec![UpdateEvent::Settled {
            generation: GroupId(1),
            changed: true,
            failed: 0
        }]
    );
    assert!(ruleset(&f.cache).unwrap().contains("ads"));
    assert_eq!(f.host.reloads(), 0);

    // User actions reload regardless.
    f.coordinator.allow_host("example.com").await.unwrap();
    assert_eq!(f.host.reloads(), 1);

    // Once activation is confirmed, background reloads resume.
    assert!(matches!(activation.check_activation().await, CheckOutcome::Confirmed { .. }));
    assert_eq!(f.host.reloads(), 3);

    f.transport.ok(&list_url("x"), SECOND, &rule_list("track"));
    f.coordinator.update_subscriptions(&["x"], false);
    settle(&mut f.events).await;
    assert_eq!(f.host.reloads(), 4);
}

#[tokio::test(start_paused = true)]
async fn abandoned_activity_test_releases_deferred_reloads() {
    let settings = Settings::in_memory();
    seed(&settings, &["x"]);
    let cache = Arc::new(MemoryCache::new());
    let host = MockHost::extension(settings.clone(), cache.clone(), 10 * SECOND);
    let mut f = fixture_with(settings.clone(), cache, config(), host.clone());

    let check_config = ProbeConfig {
        timeout: 30 * SECOND,
        ..ProbeConfig::default()
    };
    let activation = ActivationProbe::new(check_config, settings.clone(), host).unwrap();
    f.coordinator.attach_probe(&activation);

    let check = tokio::spawn({
        let activation = activation.clone();
        async move { activation.check_activation().await }
    });
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(activation.phase(), ProbePhase::ProbeInFlight);
    check.abort();
    assert!(check.await.unwrap_err().is_cancelled());

    assert_eq!(activation.phase(), ProbePhase::Idle);
    assert!(!settings.activity_test_flag().unwrap());

    f.transport.ok(&list_url("x"), SECOND, &rule_list("ads"));
    f.coordinator.update_active_subscriptions(true);
    let events = settle(&mut f.events).await;
    assert_eq!(events.len(), 1);
    assert_eq!(f.host.reloads(), 2);
}

// =============================================================================
// List Selection
// =============================================================================

fn selection_fixture() -> Fixture {
    let settings = Settings::in_memory();
    let subs = vec![
        subscription("plain", DEFAULT_EXPIRES).with_role(ListRole::Default),
        subscription("exceptions", DEFAULT_EXPIRES).with_role(ListRole::DefaultWithExceptions),
        subscription("extra", DEFAULT_EXPIRES),
    ];
    settings.save_subscriptions(&subs).unwrap();
    fixture_with(settings, Arc::new(MemoryCache::new()), config(), MockHost::new())
}

#[tokio::test(start_paused = true)]
async fn only_the_selected_default_variant_is_updated() {
    let mut f = selection_fixture();
    assert!(f.coordinator.list_selection().acceptable_ads);
    assert_eq!(
        f.coordinator.outdated_subscription_names(),
        BTreeSet::from(["exceptions".to_string(), "extra".to_string()])
    );

    f.transport.ok(&list_url("exceptions"), SECOND, &rule_list("exceptions"));
    f.transport.ok(&list_url("extra"), SECOND, &rule_list("extra"));
    let request = f.coordinator.update_active_subscriptions(true);
    assert_eq!(
        request,
        UpdateRequest::Started {
            generation: GroupId(1),
            started: vec!["exceptions".to_string(), "extra".to_string()],
            joined: vec![],
        }
    );
    settle(&mut f.events).await;

    let merged = ruleset(&f.cache).unwrap();
    assert!(merged.contains("exceptions"));
    assert!(merged.contains("extra"));
    assert_eq!(f.transport.calls_for(&list_url("plain")), 0);
}

#[tokio::test(start_paused = true)]
async fn turning_off_acceptable_ads_reloads_then_updates() {
    let mut f = selection_fixture();
    f.transport.ok(&list_url("exceptions"), SECOND, &rule_list("exceptions"));
    f.transport.ok(&list_url("extra"), SECOND, &rule_list("extra"));
    f.coordinator.update_active_subscriptions(false);
    settle(&mut f.events).await;
    assert_eq!(f.host.reloads(), 1);

    f.transport.ok(&list_url("plain"), SECOND, &rule_list("plain"));
    let request = f.coordinator.set_acceptable_ads(false).await.unwrap();
    assert_eq!(
        request,
        UpdateRequest::Started {
            generation: GroupId(2),
            started: vec!["plain".to_string()],
            joined: vec![],
        }
    );
    // Rebuilt from what is already downloaded and reloaded before the update.
    assert!(!ruleset(&f.cache).unwrap().contains("exceptions"));
    assert_eq!(f.host.reloads(), 2);
    assert!(!f.settings.load_list_selection().unwrap().acceptable_ads);

    settle(&mut f.events).await;
    let merged = ruleset(&f.cache).unwrap();
    assert!(merged.contains("plain"));
    assert!(merged.contains("extra"));
    assert!(!merged.contains("exceptions"));
    assert_eq!(f.host.reloads(), 3);

    // No change, no work.
    assert_eq!(
        f.coordinator.set_acceptable_ads(false).await.unwrap(),
        UpdateRequest::NothingToDo
    );
    assert_eq!(f.host.reloads(), 3);

    // Without either default variant only the additional list remains.
    assert_eq!(
        f.coordinator.set_default_list_enabled(false).await.unwrap(),
        UpdateRequest::NothingToDo
    );
    let merged = ruleset(&f.cache).unwrap();
    assert!(!merged.contains("plain"));
    assert!(merged.contains("extra"));
    assert_eq!(f.host.reloads(), 4);
}

#[tokio::test]
async fn selection_survives_restart() {
    let f = selection_fixture();
    f.coordinator.set_acceptable_ads(false).await.unwrap();

    let restarted = fixture_with(f.settings.clone(), f.cache.clone(), config(), MockHost::new());
    assert!(!restarted.coordinator.list_selection().acceptable_ads);
    assert!(restarted
        .coordinator
        .outdated_subscription_names()
        .contains("plain"));
}

// =============================================================================
// Startup
// =============================================================================

#[tokio::test]
async fn startup_resets_interrupted_downloads() {
    let settings = Settings::in_memory();
    let mut x = subscription("x", DEFAULT_EXPIRES);
    x.begin_download(TaskId(7), GroupId(3), true);
    settings.save_subscriptions([&x]).unwrap();

    let f = fixture_with(settings, Arc::new(MemoryCache::new()), config(), MockHost::new());
    let x = f.coordinator.subscription("x").unwrap();
    assert!(!x.updating);
    assert_eq!(x.task_identifier, None);
    assert_eq!(x.updating_group_identifier, None);
    assert!(!f.settings.load_subscriptions().unwrap()[0].updating);
    assert!(!f.coordinator.is_updating());
}

#[tokio::test]
async fn defaults_seed_only_an_empty_store() {
    let config = UpdaterConfig {
        default_subscriptions: vec![
            DefaultSubscription::new("easy", list_url("easy"))
                .with_role(ListRole::DefaultWithExceptions),
        ],
        ..config()
    };

    let empty = Settings::in_memory();
    let f = fixture_with(empty, Arc::new(MemoryCache::new()), config.clone(), MockHost::new());
    assert_eq!(f.coordinator.subscriptions().len(), 1);
    let persisted = f.settings.load_subscriptions().unwrap();
    assert_eq!(persisted[0].name, "easy");
    assert_eq!(persisted[0].role, ListRole::DefaultWithExceptions);

    let seeded = Settings::in_memory();
    seed(&seeded, &["mine"]);
    let f = fixture_with(seeded, Arc::new(MemoryCache::new()), config, MockHost::new());
    let names: Vec<String> = f.coordinator.subscriptions().into_iter().map(|s| s.name).collect();
    assert_eq!(names, vec!["mine"]);
}

#[test]
fn construction_requires_a_runtime() {
    let result = UpdateCoordinator::new(
        config(),
        Settings::in_memory(),
        Arc::new(MemoryCache::new()),
        MockTransport::new(),
        MockHost::new(),
    );
    assert!(matches!(result, Err(SyncError::NoRuntime)));
}

// =============================================================================
// Subscription Management
// =============================================================================

#[tokio::test(start_paused = true)]
async fn unsubscribe_drops_payload_and_rebuilds() {
    let mut f = fixture(&["x", "y"]);
    f.transport.ok(&list_url("x"), SECOND, &rule_list("ads"));
    f.transport.ok(&list_url("y"), SECOND, &rule_list("track"));
    f.coordinator.update_active_subscriptions(false);
    settle(&mut f.events).await;

    let x_file = file_name_for("x").unwrap();
    assert!(f.cache.read(&x_file).unwrap().is_some());

    f.coordinator.unsubscribe("x").await.unwrap();
    assert_eq!(f.cache.read(&x_file).unwrap(), None);
    let merged = ruleset(&f.cache).unwrap();
    assert!(!merged.contains("ads"));
    assert!(merged.contains("track"));
    assert_eq!(f.host.reloads(), 2);
    assert_eq!(f.settings.load_subscriptions().unwrap().len(), 1);

    assert!(matches!(
        f.coordinator.unsubscribe("x").await,
        Err(SyncError::UnknownSubscription(name)) if name == "x"
    ));
    assert_eq!(f.host.reloads(), 2);
}

#[tokio::test(start_paused = true)]
async fn unsubscribing_last_pending_member_settles_generation() {
    let mut f = fixture(&["x", "y"]);
    f.transport.ok(&list_url("x"), 10 * SECOND, &rule_list("ads"));
    f.transport.ok(&list_url("y"), SECOND, &rule_list("track"));

    f.coordinator.update_active_subscriptions(true);
    tokio::time::sleep(2 * SECOND).await;
    f.coordinator.unsubscribe("x").await.unwrap();

    let events = settle(&mut f.events).await;
    assert_eq!(
        events,
        vec![UpdateEvent::Settled {
            generation: GroupId(1),
            changed: true,
            failed: 0
        }]
    );

    // The late completion for x lands after it was removed.
    tokio::time::sleep(20 * SECOND).await;
    assert!(f.coordinator.subscription("x").is_none());
    assert_eq!(f.cache.read(&file_name_for("x").unwrap()).unwrap(), None);
    assert_eq!(f.host.reloads(), 1);
}

#[tokio::test(start_paused = true)]
async fn allow_list_edits_rebuild_and_reload() {
    let mut f = fixture(&["x"]);
    f.transport.ok(&list_url("x"), SECOND, &rule_list("ads"));
    f.coordinator.update_active_subscriptions(false);
    settle(&mut f.events).await;

    assert!(f.coordinator.allow_host("News.Example.COM").await.unwrap());
    assert!(ruleset(&f.cache).unwrap().contains(r#""if-domain":["*news.example.com"]"#));
    assert_eq!(f.host.reloads(), 2);
    assert_eq!(f.settings.load_allow_list().unwrap().hosts(), ["news.example.com"]);

    assert!(!f.coordinator.allow_host("news.example.com.").await.unwrap());
    assert_eq!(f.host.reloads(), 2);

    assert!(f.coordinator.disallow_host("news.example.com").await.unwrap());
    assert!(!ruleset(&f.cache).unwrap().contains("news.example.com"));
    assert!(f.coordinator.allow_list().is_empty());
    assert_eq!(f.host.reloads(), 3);

    assert!(matches!(
        f.coordinator.allow_host("exa mple.com").await,
        Err(SyncError::Host(_))
    ));
}

#[tokio::test]
async fn subscribe_adds_an_outdated_list() {
    let f = fixture(&["x"]);
    assert!(matches!(
        f.coordinator.subscribe("x", &list_url("x"), DEFAULT_EXPIRES),
        Err(SyncError::AlreadySubscribed(_))
    ));
    assert!(matches!(
        f.coordinator.subscribe(" padded", &list_url("p"), DEFAULT_EXPIRES),
        Err(SyncError::InvalidName(_))
    ));

    f.coordinator
        .subscribe("fresh", &list_url("fresh"), DEFAULT_EXPIRES)
        .unwrap();
    assert!(f.coordinator.outdated_subscription_names().contains("fresh"));
    assert_eq!(f.settings.load_subscriptions().unwrap().len(), 2);
}

#[tokio::test(start_paused = true)]
async fn periodic_updates_refresh_expired_lists() {
    let settings = Settings::in_memory();
    settings
        .save_subscriptions([&subscription("x", Duration::ZERO)])
        .unwrap();
    let mut f = fixture_with(settings, Arc::new(MemoryCache::new()), config(), MockHost::new());
    f.transport.ok(&list_url("x"), SECOND, &rule_list("ads"));
    f.transport.ok(&list_url("x"), SECOND, &rule_list("ads"));

    let handle = f.coordinator.spawn_periodic_updates(Duration::from_secs(3600));
    settle(&mut f.events).await;
    settle(&mut f.events).await;
    handle.abort();

    assert_eq!(f.transport.calls_for(&list_url("x")), 2);
}

#[test]
fn file_names_are_distinct_and_flat() {
    let a = file_name_for("Easy List").unwrap();
    let b = file_name_for("easy-list").unwrap();
    assert_ne!(a, b);
    assert!(a.starts_with("list-easy-list-"));
    assert_eq!(a, file_name_for("Easy List").unwrap());
    assert!(!file_name_for("../etc/passwd").unwrap().contains('/'));
    assert!(file_name_for("").is_err());
}
