use crate::Result;
use testcontainers::core::{IntoContainerPort, WaitFor};
use testcontainers::runners::AsyncRunner;
use testcontainers::ImageExt;
use testcontainers::{ContainerAsync, GenericImage};
use typed_builder::TypedBuilder;

const CLIENT_PORT: u16 = 2181;

#[derive(Debug, Clone, TypedBuilder)]
pub struct ZookeeperConfig {
    /// Tag of the official `zookeeper` image.
    #[builder(default = "3.9".to_string())]
    tag: String,
    /// Server tick in milliseconds; session timeouts are negotiated to at
    /// least twice this value.
    #[builder(default = 500)]
    tick_time_ms: u32,
}

impl Default for ZookeeperConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

/// Test fixture for a disposable single-node ZooKeeper server.
pub struct ZookeeperServer {
    container: ContainerAsync<GenericImage>,
}

impl ZookeeperServer {
    /// Starts a ZooKeeper container suitable for integration tests.
    pub async fn new(config: ZookeeperConfig) -> Result<Self> {
        let container = GenericImage::new("zookeeper", config.tag.as_str())
            .with_exposed_port(CLIENT_PORT.tcp())
            .with_wait_for(WaitFor::message_on_stdout("binding to port"))
            .with_env_var("ZOO_TICK_TIME", config.tick_time_ms.to_string())
            .start()
            .await?;

        Ok(Self { container })
    }

    pub async fn host(&self) -> Result<String> {
        let host = self.container.get_host().await?.to_string();
        Ok(match host.as_str() {
            "localhost" => String::from("127.0.0.1"),
            _ => host,
        })
    }

    pub async fn port(&self) -> Result<u16> {
        Ok(self.container.get_host_port_ipv4(CLIENT_PORT).await?)
    }

    /// `host:port` of the client port, ready for a connect string.
    pub async fn endpoint(&self) -> Result<String> {
        let host = self.host().await?;
        let port = self.port().await?;
        Ok(format!("{host}:{port}"))
    }

    /// Returns the underlying container reference.
    pub fn container(&self) -> &ContainerAsync<GenericImage> {
        &self.container
    }
}
