//! Integration tests for context leasing, expiry and teardown.

use snapdump_core::{
    sweep, ContextConfig, ContextPhase, ContextSource, ErrorKind, ManualClock, ReplicationContext,
    ServerId, Timestamp,
};
use snapdump_storage::StorageEngine;
use snapdump_testkit::prelude::*;
use std::sync::{Arc, Mutex};
use std::time::Duration;

fn start(fixture: &TestEngine, clock: &Arc<ManualClock>, ttl: u64) -> Arc<ReplicationContext> {
    ReplicationContext::create_with_clock(
        fixture.engine.clone(),
        TEST_DB,
        ServerId(1),
        ContextConfig::new().ttl(Duration::from_secs(ttl)),
        clock.clone(),
    )
    .unwrap()
}

#[derive(Default)]
struct Batches(Mutex<Vec<Arc<ReplicationContext>>>);

impl ContextSource for Batches {
    fn contexts(&self) -> Vec<Arc<ReplicationContext>> {
        self.0.lock().unwrap().clone()
    }

    fn remove(&self, id: snapdump_core::BatchId) {
        self.0.lock().unwrap().retain(|c| c.id() != id);
    }
}

#[test]
fn unleased_context_expires() {
    let fixture = TestEngine::with_documents(1);
    let clock = Arc::new(ManualClock::new());
    let ctx = start(&fixture, &clock, 30);

    clock.set(Timestamp::from_secs(30));
    assert_eq!(ctx.phase(), ContextPhase::Active);
    clock.set(Timestamp::from_secs(31));
    assert!(!ctx.is_deleted());
    assert!(ctx.is_reclaimable());
}

#[test]
fn leased_context_is_never_reclaimable() {
    let fixture = TestEngine::with_documents(1);
    let clock = Arc::new(ManualClock::new());
    let ctx = start(&fixture, &clock, 30);

    assert!(ctx.try_use(None, false));
    ctx.mark_deleted();
    clock.advance(Duration::from_secs(86_400));
    assert_eq!(ctx.phase(), ContextPhase::Leased);
    assert!(!ctx.is_reclaimable());
    assert!(!ctx.reclaim());

    ctx.release();
    assert_eq!(ctx.phase(), ContextPhase::Reclaimable);
}

#[test]
fn lease_compatibility() {
    let fixture = TestEngine::new();
    let clock = Arc::new(ManualClock::new());
    let ctx = start(&fixture, &clock, 30);

    assert!(ctx.try_use(Some(Duration::from_secs(10)), true));
    assert!(!ctx.try_use(Some(Duration::from_secs(10)), true));
    assert!(!ctx.try_use(None, false));
    ctx.release();

    assert!(ctx.try_use(None, false));
    assert!(ctx.try_use(None, false));
    assert!(!ctx.try_use(None, true));
    ctx.release();
    ctx.release();
    assert!(!ctx.is_used());
}

#[test]
fn end_batch_then_sweep() {
    let fixture = TestEngine::with_documents(5);
    let clock = Arc::new(ManualClock::new());
    let batches = Batches::default();
    for _ in 0..3 {
        batches.0.lock().unwrap().push(start(&fixture, &clock, 300));
    }
    assert_eq!(fixture.engine.live_snapshots(), 3);

    let ended = batches.contexts()[0].clone();
    ended.mark_deleted();
    let report = sweep(&batches, false);
    assert_eq!(report.destroyed, vec![ended.id()]);
    assert_eq!(fixture.engine.live_snapshots(), 2);

    let report = sweep(&batches, true);
    assert_eq!(report.destroyed.len(), 2);
    assert!(batches.contexts().is_empty());
    assert_eq!(fixture.engine.live_snapshots(), 0);
}

#[test]
fn database_is_pinned_until_destroy() {
    let fixture = TestEngine::with_documents(2);
    let clock = Arc::new(ManualClock::new());
    let ctx = start(&fixture, &clock, 30);

    let err = fixture.engine.drop_database(TEST_DB).unwrap_err();
    assert!(err.to_string().contains("in use"));

    ctx.destroy().unwrap();
    fixture.engine.drop_database(TEST_DB).unwrap();
    assert!(fixture.engine.database(TEST_DB).is_none());
}

#[test]
fn destroyed_context_is_gone() {
    let fixture = TestEngine::with_documents(2);
    let clock = Arc::new(ManualClock::new());
    let ctx = start(&fixture, &clock, 30);
    ctx.bind_collection(TEST_DB, TEST_COLLECTION).unwrap();
    ctx.destroy().unwrap();

    assert_eq!(ctx.count().unwrap_err().kind(), ErrorKind::Gone);
    assert_eq!(
        ctx.dump_key_chunks(10).unwrap_err().kind(),
        ErrorKind::Gone
    );
    assert_eq!(
        ctx.inventory(TEST_DB, false, false).unwrap_err().kind(),
        ErrorKind::Gone
    );
    assert_eq!(
        ctx.lease(None, false).unwrap_err().kind(),
        ErrorKind::Gone
    );
    assert_eq!(ctx.cursor_count(), 0);
}

#[test]
fn lease_guard_renews_and_releases() {
    let fixture = TestEngine::new();
    let clock = Arc::new(ManualClock::new());
    let ctx = start(&fixture, &clock, 30);

    clock.advance(Duration::from_secs(25));
    {
        let lease = ctx.lease(Some(Duration::from_secs(60)), false).unwrap();
        assert_eq!(lease.expires(), Timestamp::from_secs(85));
        assert!(ctx.is_used());
    }
    assert!(!ctx.is_used());
    clock.advance(Duration::from_secs(40));
    assert!(!ctx.is_reclaimable());
}

#[test]
fn origin_and_database_are_reported() {
    let fixture = TestEngine::new();
    let clock = Arc::new(ManualClock::new());
    let ctx = start(&fixture, &clock, 30);
    assert_eq!(ctx.origin(), ServerId(1));
    assert_eq!(ctx.database_name().as_deref(), Some(TEST_DB));
    assert_eq!(ctx.last_tick(), fixture.engine.committed_tick());
    assert_eq!(ctx.ttl(), Duration::from_secs(30));
}
