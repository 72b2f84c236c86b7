#![cfg(feature = "zookeeper")]

use std::time::Duration;

use zkflake_coordination::{ConnectSettings, ZookeeperConnector};
use zkflake_registry::{SetupConfig, SnowflakeRegistry};
use zkflake_test_infra::zookeeper::{ZookeeperConfig, ZookeeperServer};

async fn settings(server: &ZookeeperServer) -> ConnectSettings {
    ConnectSettings::builder()
        .endpoints(vec![server.endpoint().await.expect("Failed to get endpoint")])
        .session_timeout(Duration::from_secs(4))
        .build()
}

#[tokio::test]
async fn test_registries_on_zookeeper_get_distinct_worker_ids() {
    let server = ZookeeperServer::new(ZookeeperConfig::default())
        .await
        .expect("Failed to start ZooKeeper");

    let one = SnowflakeRegistry::new(ZookeeperConnector);
    let two = SnowflakeRegistry::new(ZookeeperConnector);
    one.setup(SetupConfig::Endpoints(settings(&server).await))
        .await
        .unwrap();
    two.setup(SetupConfig::Endpoints(settings(&server).await))
        .await
        .unwrap();

    let a = one.get_generator("orders").await.unwrap();
    let b = two.get_generator("orders").await.unwrap();

    assert_eq!(a.worker_id(), 1);
    assert_eq!(b.worker_id(), 2);
    assert_ne!(a.next_id().unwrap(), b.next_id().unwrap());
}
