use std::collections::HashSet;
use std::sync::Arc;

use zkflake_coordination::{ConnectSettings, InMemoryEnsemble};
use zkflake_registry::{SetupConfig, SnowflakeRegistry};

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn settings() -> SetupConfig {
    SetupConfig::Endpoints(
        ConnectSettings::builder()
            .endpoints(vec!["in-memory".to_string()])
            .build(),
    )
}

/// A "process": its own registry with its own coordination session.
async fn start_process(ensemble: &InMemoryEnsemble) -> SnowflakeRegistry {
    let registry = SnowflakeRegistry::new(ensemble.clone());
    registry.setup(settings()).await.unwrap();
    registry
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_fleet_issues_unique_ids() {
    init_tracing();
    let ensemble = InMemoryEnsemble::new();

    let mut processes = Vec::new();
    for _ in 0..4 {
        processes.push(Arc::new(start_process(&ensemble).await));
    }

    let mut tasks = Vec::new();
    for registry in &processes {
        for _ in 0..4 {
            let registry = Arc::clone(registry);
            tasks.push(tokio::spawn(async move {
                let generator = registry.get_generator("orders").await.unwrap();
                (0..1_000)
                    .map(|_| generator.next_id().unwrap().to_i64())
                    .collect::<Vec<_>>()
            }));
        }
    }

    let mut seen = HashSet::new();
    for task in tasks {
        for id in task.await.unwrap() {
            assert!(seen.insert(id), "duplicate id {id}");
        }
    }
    assert_eq!(seen.len(), 16_000);

    let mut worker_ids = HashSet::new();
    for registry in &processes {
        worker_ids.insert(registry.worker_id("orders").await.unwrap());
    }
    assert_eq!(worker_ids, (1..=4).collect::<HashSet<u16>>());
}

#[tokio::test]
async fn test_generator_stream_is_strictly_increasing() {
    init_tracing();
    let ensemble = InMemoryEnsemble::new();
    let registry = start_process(&ensemble).await;
    let generator = registry.get_generator("events").await.unwrap();

    let mut previous = generator.next_id().unwrap();
    for _ in 0..50_000 {
        let id = generator.next_id().unwrap();
        assert!(id.to_i64() > previous.to_i64());
        previous = id;
    }
}

#[tokio::test]
async fn test_concurrent_processes_get_distinct_worker_ids() {
    init_tracing();
    let ensemble = InMemoryEnsemble::new();

    let tasks: Vec<_> = (0..12)
        .map(|_| {
            let ensemble = ensemble.clone();
            tokio::spawn(async move {
                let registry = start_process(&ensemble).await;
                let worker_id = registry.get_generator("shared").await.unwrap().worker_id();
                (worker_id, registry)
            })
        })
        .collect();

    let mut ids = Vec::new();
    let mut alive = Vec::new();
    for task in tasks {
        let (worker_id, registry) = task.await.unwrap();
        ids.push(worker_id);
        alive.push(registry);
    }
    ids.sort_unstable();
    assert_eq!(ids, (1..=12).collect::<Vec<u16>>());
}

#[tokio::test]
async fn test_dead_process_frees_its_worker_id() {
    init_tracing();
    let ensemble = InMemoryEnsemble::new();

    let first = start_process(&ensemble).await;
    let second = start_process(&ensemble).await;
    let third = start_process(&ensemble).await;
    assert_eq!(first.get_generator("ns").await.unwrap().worker_id(), 1);
    assert_eq!(second.get_generator("ns").await.unwrap().worker_id(), 2);
    assert_eq!(third.get_generator("ns").await.unwrap().worker_id(), 3);

    // dropping the registry ends its session
    drop(second);

    let fourth = start_process(&ensemble).await;
    assert_eq!(fourth.get_generator("ns").await.unwrap().worker_id(), 2);
}
