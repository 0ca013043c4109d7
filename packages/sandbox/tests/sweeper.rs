// ABOUTME: Integration tests for the reclamation sweeper
// ABOUTME: Idle and lifetime ceilings are checked independently and evictions free their ports

mod common;

use chrono::{Duration, Utc};
use common::{argv, harness, harness_with};
use pretty_assertions::assert_eq;
use sandpit_sandbox::{Eviction, EvictionReason, Sandbox};

#[tokio::test]
async fn test_idle_sandbox_is_evicted_and_port_reusable() {
    let h = harness_with(|settings| {
        settings.port_range_end = settings.port_range_start;
    })
    .await;
    let result = h
        .sandboxes
        .service
        .run_command("u1", "p1", argv(&["echo", "hi"]))
        .await
        .unwrap();
    let pool = h.sandboxes.service.runtime().pool().clone();
    assert!(pool.allocate("sbx-other").is_err());

    let record = h.registry.get(&result.sandbox_id).await.unwrap().unwrap();
    let now = record.last_activity_at + h.sandboxes.settings.idle_timeout + Duration::seconds(1);
    let evictions = h.sandboxes.sweeper.sweep_at(now).await.unwrap();

    assert_eq!(
        evictions,
        vec![Eviction {
            sandbox_id: result.sandbox_id.clone(),
            project_id: "p1".to_string(),
            reason: EvictionReason::Idle,
        }]
    );
    assert!(h.registry.list_all().await.unwrap().is_empty());
    assert!(h.fake.running_containers().is_empty());
    assert_eq!(pool.allocate("sbx-other").unwrap(), result.port.unwrap());
}

#[tokio::test]
async fn test_old_sandbox_is_evicted_despite_recent_activity() {
    let h = harness().await;
    let result = h
        .sandboxes
        .service
        .run_command("u1", "p1", argv(&["echo", "hi"]))
        .await
        .unwrap();

    let record = h.registry.get(&result.sandbox_id).await.unwrap().unwrap();
    let now = record.created_at + h.sandboxes.settings.max_lifetime + Duration::seconds(1);
    h.registry.touch(&record.id, now).await.unwrap();

    let evictions = h.sandboxes.sweeper.sweep_at(now).await.unwrap();
    assert_eq!(evictions.len(), 1);
    assert_eq!(evictions[0].reason, EvictionReason::Lifetime);
    assert_eq!(h.sandboxes.service.runtime().pool().leased(), 0);
}

#[tokio::test]
async fn test_fresh_sandbox_survives() {
    let h = harness().await;
    h.sandboxes
        .service
        .run_command("u1", "p1", argv(&["echo", "hi"]))
        .await
        .unwrap();

    let evictions = h
        .sandboxes
        .sweeper
        .sweep_at(Utc::now() + Duration::seconds(60))
        .await
        .unwrap();
    assert!(evictions.is_empty());
    assert_eq!(h.registry.list_all().await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_verdict_uses_independent_ceilings() {
    let h = harness().await;
    let sweeper = &h.sandboxes.sweeper;
    let idle = h.sandboxes.settings.idle_timeout;
    let lifetime = h.sandboxes.settings.max_lifetime;
    let now = Utc::now();

    let mut sandbox = Sandbox::new("p1", "u1", now);
    assert_eq!(sweeper.verdict(&sandbox, now), None);

    sandbox.last_activity_at = now - idle - Duration::seconds(1);
    assert_eq!(sweeper.verdict(&sandbox, now), Some(EvictionReason::Idle));

    sandbox.last_activity_at = now;
    sandbox.created_at = now - lifetime - Duration::seconds(1);
    assert_eq!(
        sweeper.verdict(&sandbox, now),
        Some(EvictionReason::Lifetime)
    );

    // exactly at the ceiling is still allowed
    sandbox.created_at = now - lifetime;
    assert_eq!(sweeper.verdict(&sandbox, now), None);
}

#[tokio::test]
async fn test_record_without_container_is_swept() {
    let h = harness().await;
    let stale = Sandbox::new("p2", "u2", Utc::now() - Duration::hours(2));
    h.registry.create(&stale).await.unwrap();

    let evictions = h.sandboxes.sweeper.sweep().await.unwrap();
    assert_eq!(evictions.len(), 1);
    assert_eq!(evictions[0].sandbox_id, stale.id);
    assert!(h.fake.calls().is_empty());
}

#[tokio::test]
async fn test_background_loop_evicts_and_stops() {
    let h = harness_with(|settings| {
        settings.idle_timeout = Duration::zero();
        settings.sweep_interval = std::time::Duration::from_millis(20);
    })
    .await;
    h.sandboxes
        .service
        .run_command("u1", "p1", argv(&["echo", "hi"]))
        .await
        .unwrap();

    let sweeper = h.sandboxes.sweeper.clone();
    sweeper.start().await;
    sweeper.start().await;
    assert!(sweeper.is_running().await);

    let mut emptied = false;
    for _ in 0..100 {
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        if h.registry.list_all().await.unwrap().is_empty() {
            emptied = true;
            break;
        }
    }
    assert!(emptied);

    sweeper.stop().await;
    assert!(!sweeper.is_running().await);
}

#[tokio::test]
async fn test_restart_leaves_a_single_loop() {
    let h = harness_with(|settings| {
        settings.sweep_interval = std::time::Duration::from_millis(20);
    })
    .await;
    let sweeper = h.sandboxes.sweeper.clone();

    sweeper.start().await;
    sweeper.stop().await;
    sweeper.start().await;

    tokio::time::sleep(std::time::Duration::from_millis(100)).await;
    assert!(sweeper.is_running().await);
    assert_eq!(sweeper.active_loops(), 1);

    sweeper.stop().await;
    tokio::time::sleep(std::time::Duration::from_millis(100)).await;
    assert_eq!(sweeper.active_loops(), 0);
}

#[tokio::test]
async fn test_record_already_stopping_is_left_to_its_owner() {
    let h = harness().await;
    let result = h
        .sandboxes
        .service
        .run_command("u1", "p1", argv(&["echo", "hi"]))
        .await
        .unwrap();
    assert!(h.registry.mark_stopping(&result.sandbox_id).await.unwrap());

    let evictions = h
        .sandboxes
        .sweeper
        .sweep_at(Utc::now() + Duration::days(1))
        .await
        .unwrap();

    assert!(evictions.is_empty());
    assert!(!h.fake.calls().iter().any(|c| c.starts_with("stop:")));
    assert_eq!(h.sandboxes.service.runtime().pool().leased(), 1);
}
