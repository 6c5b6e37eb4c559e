#[allow(unused)]
pub mod env;

#[allow(unused)]
pub mod utils {
    use std::{future::Future, time::Duration};

    use zk_discovery::FactoryError;

    /// Factory turning a payload into the `host:port` string it holds.
    pub fn addr(payload: &[u8]) -> Result<String, FactoryError> {
        Ok(std::str::from_utf8(payload)?.to_owned())
    }

    /// Poll `check` until it holds, failing the test after five seconds.
    pub async fn eventually<F, Fut>(what: &str, mut check: F)
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = bool>,
    {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        while !check().await {
            if tokio::time::Instant::now() > deadline {
                panic!("timed out waiting for {what}");
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }
}
