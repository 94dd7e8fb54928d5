//! Integration tests for the cache warming service
//!
//! Exercises queue deduplication, ordering, error isolation and retries, and
//! end-to-end warming into a live cache.

#[path = "testutils/mod.rs"]
mod testutils;

use querycache::cache::{StatisticsTracker, WarmingConfig};
use querycache::warming::{executor, ErrorCategory};
use querycache::{
    CacheConfig, CacheWarmingService, QueryCache, WarmingContext, WarmingPhase, WarmingPriority,
    WarmingTaskError,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use testutils::test_fixture::{FixtureWarmer, RecordingWarmer, TestFixture};

fn manual_config() -> WarmingConfig {
    WarmingConfig {
        auto_process: false,
        ..WarmingConfig::default()
    }
}

fn recording_service(config: WarmingConfig) -> (CacheWarmingService, Arc<RecordingWarmer>) {
    testutils::init_logging();
    let warmer = Arc::new(RecordingWarmer::new());
    let stats = Arc::new(StatisticsTracker::new(Default::default(), 100));
    let service = CacheWarmingService::new(config, warmer.clone(), stats).unwrap();
    (service, warmer)
}

#[test]
fn test_no_duplicate_warming() {
    let (service, _) = recording_service(manual_config());

    assert!(service.add_to_queue("u1", WarmingPriority::High).unwrap());
    assert!(!service.add_to_queue("u1", WarmingPriority::High).unwrap());
    assert_eq!(service.total_queue_size(), 1);

    let response = service.warm_user_cache("u1", WarmingPriority::Low).unwrap();
    assert!(!response.success);
    assert_eq!(response.queue_size, 1);
}

#[tokio::test]
async fn test_error_isolation() {
    let (service, warmer) = recording_service(manual_config());
    warmer.fail_user("bad", WarmingTaskError::other("row decode failed"));

    service.add_to_queue("bad", WarmingPriority::High).unwrap();
    service.add_to_queue("good-1", WarmingPriority::Normal).unwrap();
    service.add_to_queue("good-2", WarmingPriority::Low).unwrap();

    assert_eq!(service.process_queue().await, 3);
    assert_eq!(warmer.users(), vec!["bad", "good-1", "good-2"]);

    let stats = service.warming_stats();
    assert_eq!(stats.runs.failed, 1);
    assert_eq!(stats.runs.succeeded, 2);
    assert_eq!(stats.errors.by_category[&ErrorCategory::Other], 1);
    assert_eq!(service.total_queue_size(), 0);
    assert!(!service.is_processing());
}

#[test]
fn test_user_with_pending_phases_is_not_queued_again() {
    let (service, _) = recording_service(manual_config());

    assert_eq!(service.progressive_warm_cache("u1").unwrap().tasks_queued, 2);
    assert!(!service.add_to_queue("u1", WarmingPriority::High).unwrap());
    assert!(!service.warm_user_cache("u1", WarmingPriority::Low).unwrap().success);
    assert_eq!(service.total_queue_size(), 2);

    service.add_to_queue("u2", WarmingPriority::Normal).unwrap();
    let targeted = service
        .smart_warm_cache("u2", &WarmingContext::new().page("exercises").hour(12))
        .unwrap();
    assert!(!targeted.success);
    assert_eq!(targeted.tasks_queued, 0);
    assert_eq!(service.total_queue_size(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_transient_failure_recovers_on_retry() {
    let (service, _) = recording_service(manual_config());
    let attempts = Arc::new(AtomicUsize::new(0));

    let counter = Arc::clone(&attempts);
    let flaky = executor(move || {
        let counter = Arc::clone(&counter);
        async move {
            if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                Err(WarmingTaskError::new("network request timed out"))
            } else {
                Ok(())
            }
        }
    });
    service
        .add_task("u1", WarmingPriority::High, WarmingPhase::Full, flaky)
        .unwrap();

    service.process_queue().await;

    assert_eq!(attempts.load(Ordering::SeqCst), 2);
    let stats = service.warming_stats();
    assert_eq!(stats.runs.succeeded, 1);
    assert_eq!(stats.runs.retries, 1);
    assert_eq!(stats.errors.by_category[&ErrorCategory::Network], 1);
}

#[tokio::test(start_paused = true)]
async fn test_attempts_are_bounded() {
    let config = WarmingConfig {
        max_attempts: 2,
        ..manual_config()
    };
    let (service, warmer) = recording_service(config);
    warmer.fail_user("u1", WarmingTaskError::network("socket hang up"));

    service.add_to_queue("u1", WarmingPriority::High).unwrap();
    service.process_queue().await;

    assert_eq!(warmer.users().len(), 2);
    assert_eq!(service.warming_stats().runs.failed, 1);
}

#[tokio::test]
async fn test_priority_order_is_respected() {
    let (service, warmer) = recording_service(manual_config());
    service.add_to_queue("low", WarmingPriority::Low).unwrap();
    service.add_to_queue("normal", WarmingPriority::Normal).unwrap();
    service.add_to_queue("high", WarmingPriority::High).unwrap();

    service.process_queue().await;
    assert_eq!(warmer.users(), vec!["high", "normal", "low"]);
}

#[tokio::test]
async fn test_removed_users_are_skipped() {
    let (service, warmer) = recording_service(manual_config());
    service.progressive_warm_cache("u1").unwrap();
    service.add_to_queue("u2", WarmingPriority::Low).unwrap();

    assert_eq!(service.remove_user_from_warming_queue("u1"), 2);
    service.process_queue().await;
    assert_eq!(warmer.users(), vec!["u2"]);
}

#[tokio::test]
async fn test_auto_processing_drains_queue() {
    let (service, warmer) = recording_service(WarmingConfig::default());

    service.add_to_queue("u1", WarmingPriority::Normal).unwrap();
    service.add_to_queue("u2", WarmingPriority::Normal).unwrap();

    for _ in 0..100 {
        if warmer.users().len() == 2 && !service.is_processing() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert_eq!(warmer.users(), vec!["u1", "u2"]);
    assert_eq!(service.total_queue_size(), 0);
}

#[tokio::test]
async fn test_concurrent_drains_run_tasks_once() {
    let (service, warmer) = recording_service(manual_config());
    for user in ["a", "b", "c"] {
        service.add_to_queue(user, WarmingPriority::Normal).unwrap();
    }

    let (first, second) = tokio::join!(service.process_queue(), service.process_queue());
    assert_eq!(first + second, 3);
    assert_eq!(warmer.users().len(), 3);
}

#[tokio::test]
async fn test_warming_populates_cache() {
    let fixture = TestFixture::with_config(CacheConfig {
        warming: manual_config(),
        ..CacheConfig::default()
    });
    fixture.seed_user("42");

    let warmer = Arc::new(FixtureWarmer {
        cache: Arc::clone(&fixture.cache),
        source: Arc::clone(&fixture.source),
    });
    let service = CacheWarmingService::for_cache(&*fixture.cache, warmer).unwrap();

    let response = service
        .smart_warm_cache("42", &WarmingContext::new().new_session().hour(12))
        .unwrap();
    assert!(response.success);
    assert_eq!(response.tasks_queued, 2);
    service.process_queue().await;

    assert_eq!(fixture.source.reads(), 2);
    assert!(fixture.list("workout_logs", "42").await.unwrap().from_cache);
    assert!(fixture.list("programs", "42").await.unwrap().from_cache);

    // Warming runs land in the cache's own statistics
    let stats = fixture.cache.enhanced_stats();
    assert_eq!(stats.warming.succeeded, 2);
    assert_eq!(stats.basic.hits, 2);
}

#[tokio::test]
async fn test_failed_fetch_during_warming_is_categorized() {
    let fixture = TestFixture::with_config(CacheConfig {
        warming: WarmingConfig {
            max_attempts: 1,
            ..manual_config()
        },
        ..CacheConfig::default()
    });
    fixture.source.fail_with("permission denied for table workout_logs");

    let warmer = Arc::new(FixtureWarmer {
        cache: Arc::clone(&fixture.cache),
        source: Arc::clone(&fixture.source),
    });
    let service = CacheWarmingService::for_cache(&*fixture.cache, warmer).unwrap();
    service.add_to_queue("42", WarmingPriority::High).unwrap();
    service.process_queue().await;

    let handler = service.error_handler();
    assert_eq!(handler.count(ErrorCategory::Auth), 1);
    assert!(fixture.cache.is_empty());
}

#[test]
fn test_cache_type_defaults_to_json() {
    let cache: QueryCache = QueryCache::new(CacheConfig::default()).unwrap();
    assert!(cache.is_empty());
}
