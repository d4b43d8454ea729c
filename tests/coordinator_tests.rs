// Coordinator tests - request coalescing, pass ordering, retries and quiescence

mod common;

use common::harness::TestIo;
use fresh_io::config::{CoordinatorConfig, ReadRetryConfig};
use fresh_io::services::fs::{
    Closed, FsOp, LoopState, SlowFsConfig, StatResult, WriteError,
};
use std::path::Path;
use std::time::Duration;

#[tokio::test]
async fn test_concurrent_reads_share_one_backend_call() {
    let t = TestIo::new();
    t.memory.insert("/a.txt", "alpha");

    let first = t.io.read("/a.txt");
    let second = t.io.read("/a.txt");
    let third = t.io.read("/a.txt");
    assert_eq!(first.id(), second.id());
    assert_eq!(first.id(), third.id());

    assert_eq!(first.await.unwrap(), "alpha");
    assert_eq!(second.await.unwrap(), "alpha");
    assert_eq!(third.await.unwrap(), "alpha");

    let metrics = t.metrics().await;
    assert_eq!(metrics.read_calls, 1);
}

#[tokio::test]
async fn test_read_after_settle_is_a_new_request() {
    let t = TestIo::new();
    t.memory.insert("/a.txt", "v1");

    let first = t.io.read("/a.txt");
    let first_id = first.id();
    assert_eq!(first.await.unwrap(), "v1");

    t.memory.insert("/a.txt", "v2");
    let second = t.io.read("/a.txt");
    assert_ne!(second.id(), first_id);
    assert_eq!(second.await.unwrap(), "v2");

    assert_eq!(t.metrics().await.read_calls, 2);
}

#[tokio::test]
async fn test_stat_dedup_and_not_found() {
    let t = TestIo::new();
    t.memory.insert("/present", "12345");

    let missing_a = t.io.stat("/missing");
    let missing_b = t.io.stat("/missing");
    let present = t.io.stat("/present");
    assert_eq!(missing_a.id(), missing_b.id());
    assert_ne!(missing_a.id(), present.id());

    assert_eq!(missing_a.await.unwrap(), StatResult::NotFound);
    assert_eq!(missing_b.await.unwrap(), StatResult::NotFound);

    let meta = present.await.unwrap().into_metadata().unwrap();
    assert_eq!(meta.size, 5);
    assert!(meta.is_file());

    let metrics = t.metrics().await;
    assert_eq!(metrics.stat_calls, 2);
}

#[tokio::test]
async fn test_writes_are_never_merged() {
    let t = TestIo::new();

    let first = t.io.write("/out.txt", "one");
    let second = t.io.write("/out.txt", "two");
    first.await.unwrap();
    second.await.unwrap();

    let metrics = t.metrics().await;
    assert_eq!(metrics.write_calls, 2);
    assert_eq!(metrics.calls_for(FsOp::Write, Path::new("/out.txt")), 2);
    // Queue order is preserved, so the later write wins
    assert_eq!(t.memory.contents(Path::new("/out.txt")).unwrap(), "two");
}

#[tokio::test]
async fn test_failed_write_does_not_affect_its_neighbour() {
    let t = TestIo::new();
    t.memory.fail_next(FsOp::Write, "/p", 1);

    let failing = t.io.write("/p", "a");
    let succeeding = t.io.write("/p", "b");

    assert!(matches!(failing.await, Err(WriteError::Backend(_))));
    succeeding.await.unwrap();
    assert_eq!(t.metrics().await.write_calls, 2);
    assert_eq!(t.memory.contents(Path::new("/p")).unwrap(), "b");
}

#[tokio::test]
async fn test_pass_runs_stat_then_write_then_read() {
    let t = TestIo::new();
    t.memory.insert("/r", "read me");

    // Registered in the opposite order to the phases
    let read = t.io.read("/r");
    let write = t.io.write("/w", "data");
    let stat = t.io.stat("/s");

    t.io.await_all_settled().await.unwrap();
    assert_eq!(
        t.metrics().await.ops(),
        vec![FsOp::Stat, FsOp::Write, FsOp::Read]
    );

    assert_eq!(read.await.unwrap(), "read me");
    write.await.unwrap();
    assert_eq!(stat.await.unwrap(), StatResult::NotFound);
}

#[tokio::test]
async fn test_read_queued_before_write_sees_written_data() {
    let t = TestIo::new();

    let read = t.io.read("/fresh.txt");
    let write = t.io.write("/fresh.txt", "new contents");

    write.await.unwrap();
    assert_eq!(read.await.unwrap(), "new contents");
    assert_eq!(t.metrics().await.read_calls, 1);
}

#[tokio::test]
async fn test_failed_read_is_retried_until_it_succeeds() {
    let t = TestIo::new();
    t.memory.insert("/flaky", "eventually");
    t.memory.fail_next(FsOp::Read, "/flaky", 2);

    let first = t.io.read("/flaky");
    let second = t.io.read("/flaky");

    assert_eq!(first.await.unwrap(), "eventually");
    assert_eq!(second.await.unwrap(), "eventually");
    assert_eq!(t.metrics().await.read_calls, 3);
}

#[tokio::test]
async fn test_read_of_missing_file_waits_for_it_to_appear() {
    let t = TestIo::new();

    let read = t.io.read("/later.txt");
    assert!(t.run_until_calls(3).await, "read should keep being retried");
    assert!(!t.io.snapshot().is_quiescent());

    t.memory.insert("/later.txt", "appeared");
    assert_eq!(read.await.unwrap(), "appeared");
}

#[tokio::test]
async fn test_read_joins_a_deferred_read() {
    let t = TestIo::new();
    t.memory.insert("/slowly", "ok");
    t.memory.fail_next(FsOp::Read, "/slowly", 1);

    let first = t.io.read("/slowly");
    assert!(t.run_until_calls(1).await);

    let second = t.io.read("/slowly");
    assert_eq!(first.id(), second.id());
    assert_eq!(first.await.unwrap(), "ok");
    assert_eq!(second.await.unwrap(), "ok");
    assert_eq!(t.metrics().await.read_calls, 2);
}

#[tokio::test(start_paused = true)]
async fn test_new_work_cuts_retry_delay_short() {
    let retry = ReadRetryConfig {
        initial_delay_ms: 1000,
        max_delay_ms: 1000,
        multiplier: 2,
    };
    let t = TestIo::with_config(CoordinatorConfig::immediate().with_read_retry(retry));

    let read = t.io.read("/gone");
    assert!(t.run_until_calls(1).await);

    let start = tokio::time::Instant::now();
    t.memory.insert("/gone", "back");
    let stat = t.io.stat("/other");

    assert_eq!(read.await.unwrap(), "back");
    assert_eq!(stat.await.unwrap(), StatResult::NotFound);
    assert!(start.elapsed() < Duration::from_secs(1));
}

#[tokio::test(start_paused = true)]
async fn test_work_before_retry_wait_does_not_skip_delay() {
    let retry = ReadRetryConfig {
        initial_delay_ms: 1000,
        max_delay_ms: 1000,
        multiplier: 2,
    };
    let t = TestIo::with_config(CoordinatorConfig::immediate().with_read_retry(retry));
    let start = tokio::time::Instant::now();

    let read = t.io.read("/gone");
    // Arrives while the loop is running, before any retry wait has begun
    let stat = t.io.stat("/x");

    for _ in 0..1000 {
        tokio::task::yield_now().await;
    }
    assert_eq!(t.metrics().await.read_calls, 1);
    assert_eq!(stat.await.unwrap(), StatResult::NotFound);

    t.memory.insert("/gone", "here");
    assert_eq!(read.await.unwrap(), "here");
    assert!(start.elapsed() >= Duration::from_secs(1));
    assert_eq!(t.metrics().await.read_calls, 2);
}

fn assert_gap(gap: Duration, expected_ms: u64) {
    let expected = Duration::from_millis(expected_ms);
    assert!(
        gap >= expected && gap < expected + Duration::from_millis(5),
        "expected a retry gap of about {expected:?}, got {gap:?}"
    );
}

#[tokio::test(start_paused = true)]
async fn test_retry_delay_grows_per_round_and_resets() {
    let config = CoordinatorConfig::immediate().with_read_retry(ReadRetryConfig::default());
    let t = TestIo::with_config(config);
    t.memory.insert("/flaky", "ok");
    t.memory.fail_next(FsOp::Read, "/flaky", 3);

    assert_eq!(t.io.read("/flaky").await.unwrap(), "ok");

    let times = t.metrics().await.call_times(FsOp::Read, Path::new("/flaky"));
    assert_eq!(times.len(), 4);
    let gaps: Vec<Duration> = times.windows(2).map(|w| w[1].duration_since(w[0])).collect();
    assert_gap(gaps[0], 10);
    assert_gap(gaps[1], 20);
    assert_gap(gaps[2], 40);

    // Once nothing is deferred, the next deferral starts from the first round
    assert!(t.run_until(|io| io.snapshot().state == LoopState::Idle).await);
    t.memory.insert("/second", "ok");
    t.memory.fail_next(FsOp::Read, "/second", 1);
    assert_eq!(t.io.read("/second").await.unwrap(), "ok");

    let times = t.metrics().await.call_times(FsOp::Read, Path::new("/second"));
    assert_eq!(times.len(), 2);
    assert_gap(times[1].duration_since(times[0]), 10);
}

#[tokio::test(start_paused = true)]
async fn test_stat_arriving_mid_pass_is_not_stranded() {
    let delays = SlowFsConfig {
        stat_delay: Duration::ZERO,
        read_delay: Duration::from_millis(10),
        write_delay: Duration::ZERO,
    };
    let t = TestIo::with_delays(CoordinatorConfig::immediate(), delays);
    t.memory.insert("/a", "x");

    let read = t.io.read("/a");
    assert!(t.run_until_calls(1).await);

    // Only a stat is queued when the read phase ends
    let stat = t.io.stat("/s");
    assert_eq!(read.await.unwrap(), "x");

    let stat = tokio::time::timeout(Duration::from_secs(1), stat).await;
    assert!(matches!(stat, Ok(Ok(StatResult::NotFound))), "got {stat:?}");
    assert_eq!(t.metrics().await.ops(), vec![FsOp::Read, FsOp::Stat]);
}

#[tokio::test]
async fn test_failed_write_is_reported_and_not_retried() {
    let t = TestIo::new();
    t.memory.fail_next(FsOp::Write, "/locked", 1);

    match t.io.write("/locked", "data").await {
        Err(WriteError::Backend(_)) => {}
        other => panic!("expected backend error, got {other:?}"),
    }
    assert!(t.run_until(|io| io.snapshot().state == LoopState::Idle).await);
    assert_eq!(t.metrics().await.write_calls, 1);
    assert!(t.memory.contents(Path::new("/locked")).is_none());

    t.io.write("/locked", "again").await.unwrap();
    assert_eq!(t.memory.contents(Path::new("/locked")).unwrap(), "again");
}

#[tokio::test]
async fn test_settled_waiter_fires_after_work_drains() {
    let t = TestIo::new();

    let write = t.io.write("/a", "1");
    let settled = t.io.await_all_settled();

    assert_eq!(settled.await, Ok(0));
    write.await.unwrap();

    let snapshot = t.io.snapshot();
    assert_eq!(snapshot.state, LoopState::Idle);
    assert!(snapshot.is_quiescent());
    assert_eq!(snapshot.waiters, 0);
}

#[tokio::test(start_paused = true)]
async fn test_registering_a_waiter_does_not_start_a_pass() {
    let t = TestIo::new();

    let mut settled = t.io.await_all_settled();
    let waited = tokio::time::timeout(Duration::from_millis(50), &mut settled).await;
    assert!(waited.is_err(), "waiter should stay pending while idle");
    assert_eq!(t.io.snapshot().waiters, 1);
    assert_eq!(t.io.snapshot().state, LoopState::Idle);

    let stat = t.io.stat("/anything");
    assert_eq!(settled.await, Ok(0));
    assert_eq!(stat.await.unwrap(), StatResult::NotFound);
}

#[tokio::test(start_paused = true)]
async fn test_one_waiter_released_per_quiescence() {
    let t = TestIo::new();

    let first = t.io.await_all_settled();
    let mut second = t.io.await_all_settled();
    t.io.write("/x", "1");

    assert_eq!(first.await, Ok(1));
    let waited = tokio::time::timeout(Duration::from_millis(50), &mut second).await;
    assert!(waited.is_err(), "second waiter needs its own quiescence");

    t.io.stat("/x");
    assert_eq!(second.await, Ok(0));
}

#[tokio::test]
async fn test_on_all_settled_callback_receives_remaining_count() {
    let t = TestIo::new();
    let (tx, rx) = tokio::sync::oneshot::channel();

    t.io.on_all_settled(move |remaining| {
        let _ = tx.send(remaining);
    });
    t.io.read("/nothing-here");
    t.memory.insert("/nothing-here", "now");

    assert_eq!(rx.await.unwrap(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_systemic_fault_backs_off_and_retries_pass() {
    let config = CoordinatorConfig::immediate().with_fault_backoff(Duration::from_millis(50));
    let t = TestIo::with_config(config);
    t.memory.fault_next(FsOp::Write, 1);

    let first = t.io.write("/a", "1");
    let second = t.io.write("/b", "2");

    assert!(
        t.run_until(|io| io.snapshot().state == LoopState::BackoffWait)
            .await
    );
    // Nothing was consumed by the aborted pass
    assert_eq!(t.io.snapshot().writes, 2);

    let start = tokio::time::Instant::now();
    first.await.unwrap();
    second.await.unwrap();
    assert!(start.elapsed() >= Duration::from_millis(50));

    let metrics = t.metrics().await;
    assert_eq!(metrics.write_calls, 3);
    assert_eq!(metrics.calls_for(FsOp::Write, Path::new("/a")), 2);
    assert_eq!(t.memory.contents(Path::new("/a")).unwrap(), "1");
    assert_eq!(t.memory.contents(Path::new("/b")).unwrap(), "2");
}

#[tokio::test(start_paused = true)]
async fn test_systemic_fault_during_read_keeps_waiters() {
    let config = CoordinatorConfig::immediate().with_fault_backoff(Duration::from_millis(20));
    let t = TestIo::with_config(config);
    t.memory.insert("/r", "data");
    t.memory.fault_next(FsOp::Read, 1);

    let read = t.io.read("/r");
    let settled = t.io.await_all_settled();

    assert_eq!(read.await.unwrap(), "data");
    assert_eq!(settled.await, Ok(0));
    assert_eq!(t.metrics().await.read_calls, 2);
}

#[tokio::test(start_paused = true)]
async fn test_request_arriving_mid_pass_runs_next_pass() {
    let delays = SlowFsConfig {
        stat_delay: Duration::ZERO,
        read_delay: Duration::from_millis(10),
        write_delay: Duration::ZERO,
    };
    let t = TestIo::with_delays(CoordinatorConfig::immediate(), delays);
    t.memory.insert("/a", "in flight");

    let first = t.io.read("/a");
    assert!(t.run_until_calls(1).await);

    // The read is in flight: same-path reads join it, the write waits
    let second = t.io.read("/a");
    let write = t.io.write("/b", "later");
    assert_eq!(first.id(), second.id());

    assert_eq!(first.await.unwrap(), "in flight");
    assert_eq!(second.await.unwrap(), "in flight");
    write.await.unwrap();

    assert_eq!(t.metrics().await.ops(), vec![FsOp::Read, FsOp::Write]);
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_closes_pending_and_later_requests() {
    let delays = SlowFsConfig::uniform(Duration::from_millis(10));
    let t = TestIo::with_delays(CoordinatorConfig::immediate(), delays);
    t.memory.insert("/a", "never seen");

    let read = t.io.read("/a");
    let stat = t.io.stat("/a");
    let write = t.io.write("/b", "dropped");
    let settled = t.io.await_all_settled();
    assert!(t.run_until_calls(1).await);

    t.io.shutdown();
    assert!(t.io.is_shut_down());

    assert_eq!(read.await, Err(Closed));
    assert_eq!(stat.await, Err(Closed));
    assert!(write.await.unwrap_err().is_closed());
    assert_eq!(settled.await, Err(Closed));

    assert_eq!(t.io.read("/a").await, Err(Closed));
    assert!(t.io.write("/b", "x").await.unwrap_err().is_closed());
    assert_eq!(t.io.await_all_settled().await, Err(Closed));

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(t.memory.contents(Path::new("/b")).is_none());
    assert_eq!(t.metrics().await.total_calls(), 1);
}

#[tokio::test]
async fn test_relative_paths_resolve_against_base_dir() {
    let t = TestIo::with_config(CoordinatorConfig::immediate().with_base_dir("/base"));
    t.memory.insert("/base/dir/file.txt", "contents");

    let relative = t.io.read("dir/file.txt");
    let spelled_out = t.io.read("/base/dir/../dir/./file.txt");
    assert_eq!(relative.id(), spelled_out.id());

    assert_eq!(relative.await.unwrap(), "contents");
    assert_eq!(spelled_out.await.unwrap(), "contents");
    assert_eq!(
        t.metrics().await.calls_for(FsOp::Read, Path::new("/base/dir/file.txt")),
        1
    );
}

#[tokio::test]
async fn test_relative_base_dir_still_gives_absolute_keys() {
    let cwd = std::env::current_dir().unwrap();
    let t = TestIo::with_config(CoordinatorConfig::immediate().with_base_dir("relative-base"));
    let absolute = cwd.join("relative-base").join("f.txt");
    t.memory.insert(absolute.clone(), "rel");

    assert!(t.io.path_key(Path::new("f.txt")).as_path().is_absolute());

    let relative = t.io.read("f.txt");
    let spelled_out = t.io.read(&absolute);
    assert_eq!(relative.id(), spelled_out.id());
    assert_eq!(relative.await.unwrap(), "rel");
    assert_eq!(spelled_out.await.unwrap(), "rel");
}

#[tokio::test]
async fn test_write_copy_owns_its_buffer() {
    let t = TestIo::new();

    let mut buffer = b"snapshot".to_vec();
    let write = t.io.write_copy("/copy", &buffer);
    buffer.clear();

    write.await.unwrap();
    assert_eq!(t.memory.contents(Path::new("/copy")).unwrap(), "snapshot");
}

#[tokio::test]
async fn test_clones_share_queues() {
    let t = TestIo::new();
    t.memory.insert("/shared", "same");
    let other = t.io.clone();

    let a = t.io.read("/shared");
    let b = other.read("/shared");
    assert_eq!(a.id(), b.id());
    assert_eq!(b.await.unwrap(), "same");
    assert_eq!(a.await.unwrap(), "same");
}
