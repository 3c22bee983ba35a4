// Embedding cache tests
// Author: kelexine (https://github.com/kelexine)

use resilience_core::embeddings::{
    content_hash, EmbeddingConfig, EmbeddingManager, StaticMemoryProbe,
};
use resilience_core::error::{ResilienceError, Result};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

const MIB: u64 = 1024 * 1024;

fn manager_with(
    config: EmbeddingConfig,
    heap: u64,
) -> (Arc<EmbeddingManager>, Arc<StaticMemoryProbe>) {
    let probe = Arc::new(StaticMemoryProbe::new(heap));
    (Arc::new(EmbeddingManager::new(config, probe.clone())), probe)
}

fn small(max_entries: usize) -> EmbeddingConfig {
    EmbeddingConfig {
        max_entries,
        ..EmbeddingConfig::default()
    }
}

async fn embed(manager: &EmbeddingManager, text: &str) -> Result<Arc<Vec<f32>>> {
    let len = text.len() as f32;
    manager.get_or_generate(text, || async move { Ok(vec![len, 1.0]) }).await
}

#[tokio::test]
async fn test_generator_runs_once_per_text() {
    let (manager, _) = manager_with(small(10), 0);
    let generated = AtomicUsize::new(0);
    let counter = &generated;

    for _ in 0..3 {
        let vector = manager
            .get_or_generate("hello world", move || async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(vec![0.5, 0.25])
            })
            .await
            .unwrap();
        assert_eq!(*vector, vec![0.5, 0.25]);
    }

    assert_eq!(generated.load(Ordering::SeqCst), 1);
    let stats = manager.stats();
    assert_eq!((stats.misses, stats.hits), (1, 2));
}

#[tokio::test]
async fn test_generator_failure_is_not_cached() {
    let (manager, _) = manager_with(small(10), 0);
    let result = manager
        .get_or_generate("text", || async {
            Err::<Vec<f32>, _>(ResilienceError::ComputeFailed {
                provider: "openai".into(),
                message: "timeout".into(),
            })
        })
        .await;
    assert!(result.is_err());
    assert!(manager.is_empty());
}

#[tokio::test]
async fn test_capacity_plus_one_evicts_exactly_the_lru_entry() {
    let max = 5;
    let (manager, _) = manager_with(small(max), 0);
    for i in 0..max {
        embed(&manager, &format!("doc-{i}")).await.unwrap();
    }
    // Touch doc-0 so doc-1 becomes least recently used
    assert!(manager.get(&content_hash("doc-0")).is_some());

    embed(&manager, "doc-new").await.unwrap();

    assert_eq!(manager.len(), max);
    assert!(!manager.contains(&content_hash("doc-1")));
    for survivor in ["doc-0", "doc-2", "doc-3", "doc-4", "doc-new"] {
        assert!(manager.contains(&content_hash(survivor)), "{survivor} evicted");
    }
    assert_eq!(manager.stats().capacity_evictions, 1);
}

#[tokio::test]
async fn test_pre_insert_pressure_evicts_half() {
    let (manager, probe) = manager_with(small(100), 0);
    for i in 0..10 {
        embed(&manager, &format!("doc-{i}")).await.unwrap();
    }

    probe.set(550 * MIB);
    embed(&manager, "under pressure").await.unwrap();

    assert_eq!(manager.len(), 6);
    assert_eq!(manager.stats().pressure_evictions, 5);
    // Oldest half went first
    assert!(!manager.contains(&content_hash("doc-0")));
    assert!(manager.contains(&content_hash("doc-9")));
}

#[tokio::test]
async fn test_emergency_check_evicts_three_quarters() {
    let (manager, probe) = manager_with(small(100), 0);
    for i in 0..8 {
        embed(&manager, &format!("doc-{i}")).await.unwrap();
    }

    assert_eq!(manager.check_memory_pressure(), 0);
    probe.set(700 * MIB);
    assert_eq!(manager.check_memory_pressure(), 6);
    assert_eq!(manager.len(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_age_sweep_drops_untouched_entries() {
    let config = EmbeddingConfig {
        max_age: Duration::from_secs(60),
        sweep_interval: Duration::from_secs(30),
        ..small(10)
    };
    let (manager, _) = manager_with(config, 0);
    manager.start();

    embed(&manager, "stale").await.unwrap();
    tokio::time::sleep(Duration::from_secs(45)).await;
    embed(&manager, "fresh").await.unwrap();

    // The 90s sweep sees "stale" untouched for 90s and "fresh" for 45s
    tokio::time::sleep(Duration::from_secs(50)).await;

    assert!(!manager.contains(&content_hash("stale")));
    assert!(manager.contains(&content_hash("fresh")));
    assert_eq!(manager.stats().age_evictions, 1);
    manager.shutdown();
}

#[tokio::test(start_paused = true)]
async fn test_memory_monitor_runs_on_its_timer() {
    let config = EmbeddingConfig {
        monitor_interval: Duration::from_secs(10),
        ..small(10)
    };
    let (manager, probe) = manager_with(config, 0);
    manager.start();
    for i in 0..4 {
        embed(&manager, &format!("doc-{i}")).await.unwrap();
    }

    probe.set(650 * MIB);
    tokio::time::sleep(Duration::from_secs(11)).await;

    assert_eq!(manager.len(), 1);
    manager.shutdown();
}

#[tokio::test]
async fn test_shutdown_clears_everything() {
    let (manager, _) = manager_with(small(10), 0);
    manager.start();
    for i in 0..3 {
        embed(&manager, &format!("doc-{i}")).await.unwrap();
    }

    manager.shutdown();
    assert_eq!(manager.len(), 0);
    assert_eq!(manager.stats(), Default::default());
}
