use zk_discovery::{Client, ClientOption, DiscoveryResult, MemoryEnsemble};

pub const TEST_ENDPOINT: &str = "localhost:2181";

/// Endpoint nothing listens on.
pub const UNREACHABLE_ENDPOINT: &str = "localhost:65500";

/// An in-memory ensemble plus the endpoint clients should dial.
#[derive(Debug, Clone)]
pub struct DiscoveryEnv {
    pub ensemble: MemoryEnsemble,
    pub endpoint: String,
}

impl DiscoveryEnv {
    /// Ensemble serving [`TEST_ENDPOINT`].
    pub fn start() -> Self {
        Self {
            ensemble: MemoryEnsemble::with_servers([TEST_ENDPOINT]).expect("valid endpoint"),
            endpoint: TEST_ENDPOINT.to_owned(),
        }
    }

    /// Ensemble serving nothing; clients point at [`UNREACHABLE_ENDPOINT`].
    pub fn unreachable() -> Self {
        Self {
            ensemble: MemoryEnsemble::new(),
            endpoint: UNREACHABLE_ENDPOINT.to_owned(),
        }
    }

    pub async fn client(&self, options: Vec<ClientOption>) -> DiscoveryResult<Client> {
        Client::new(&self.ensemble, [self.endpoint.as_str()], options).await
    }
}
