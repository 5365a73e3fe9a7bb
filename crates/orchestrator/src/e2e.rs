//! Network bootstrap and key helpers for the encrypted mempool end to end tests.
//!
//! The chain client is an external collaborator reached through
//! [`ShieldSubmitter`], key bytes and ciphertexts are never interpreted here.

use std::time::Duration;

use async_trait::async_trait;
use configuration::NetworkConfig;
use support::{fs::FileSystem, process::ProcessManager};
use tracing::debug;

use crate::{
    errors::OrchestratorError,
    generators::{AuthorityPatch, ChainSpecPatch},
    network::Network,
    Orchestrator,
};

/// Chain client able to read the announced keys and submit encrypted extrinsics.
#[async_trait]
pub trait ShieldSubmitter: Send + Sync {
    type Signer: Send + Sync;
    type Receipt: Send;
    type Error: std::error::Error + Send + Sync + 'static;

    async fn current_key(&self) -> Result<Option<Vec<u8>>, Self::Error>;

    async fn next_key(&self) -> Result<Option<Vec<u8>>, Self::Error>;

    async fn submit_encrypted(
        &self,
        signer: &Self::Signer,
        ciphertext: Vec<u8>,
        nonce: Option<u64>,
    ) -> Result<Self::Receipt, Self::Error>;
}

#[derive(Debug, thiserror::Error)]
pub enum ShieldError {
    #[error("No key announced within {0:?}")]
    KeyNotAnnounced(Duration),
    #[error("Chain client error: {0}")]
    Client(#[source] Box<dyn std::error::Error + Send + Sync>),
}

fn client_error(err: impl std::error::Error + Send + Sync + 'static) -> ShieldError {
    ShieldError::Client(Box::new(err))
}

/// Generates the (optionally patched) chain-spec and brings the configured
/// network up, ready for the test body.
pub async fn bootstrap<PM, FS>(
    config: &NetworkConfig,
    process_manager: PM,
    filesystem: FS,
    patch: Option<&AuthorityPatch>,
) -> Result<Network<PM, FS>, OrchestratorError>
where
    PM: ProcessManager + Clone + Send + Sync,
    FS: FileSystem + Clone + Send + Sync + 'static,
{
    Orchestrator::new(process_manager, filesystem)
        .spawn(config, patch.map(|patch| patch as &dyn ChainSpecPatch))
        .await
}

/// Polls `client` every `poll` until a next key is announced.
pub async fn wait_for_next_key<C>(
    client: &C,
    timeout: Duration,
    poll: Duration,
) -> Result<Vec<u8>, ShieldError>
where
    C: ShieldSubmitter,
{
    let polling = async {
        loop {
            match client.next_key().await {
                Ok(Some(key)) => {
                    debug!("next key announced ({} bytes)", key.len());
                    return Ok(key);
                },
                Ok(None) => tokio::time::sleep(poll).await,
                Err(err) => return Err(client_error(err)),
            }
        }
    };

    match tokio::time::timeout(timeout, polling).await {
        Ok(result) => result,
        Err(_) => Err(ShieldError::KeyNotAnnounced(timeout)),
    }
}

/// Waits for the next key, encrypts with it and submits the ciphertext.
pub async fn submit_with_next_key<C, E>(
    client: &C,
    signer: &C::Signer,
    encrypt: E,
    nonce: Option<u64>,
    timeout: Duration,
) -> Result<C::Receipt, ShieldError>
where
    C: ShieldSubmitter,
    E: FnOnce(&[u8]) -> Vec<u8>,
{
    let key = wait_for_next_key(client, timeout, Duration::from_secs(1)).await?;
    let ciphertext = encrypt(&key);

    client
        .submit_encrypted(signer, ciphertext, nonce)
        .await
        .map_err(client_error)
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use configuration::{GlobalSettingsBuilder, NodeConfig, Timeouts};
    use support::{
        fs::in_memory::InMemoryFileSystem,
        process::fake::{FakeProcessManager, StreamValue},
    };

    use super::*;
    use crate::test_helpers::{informant_script, OLD_BINARY};

    #[derive(Debug, thiserror::Error)]
    #[error("rpc down")]
    struct RpcDown;

    #[derive(Default)]
    struct ScriptedClient {
        polls_before_key: Mutex<u32>,
        submitted: Mutex<Vec<(String, Vec<u8>, Option<u64>)>>,
        down: bool,
    }

    #[async_trait]
    impl ShieldSubmitter for ScriptedClient {
        type Signer = String;
        type Receipt = u32;
        type Error = RpcDown;

        async fn current_key(&self) -> Result<Option<Vec<u8>>, RpcDown> {
            Ok(Some(vec![0xaa]))
        }

        async fn next_key(&self) -> Result<Option<Vec<u8>>, RpcDown> {
            if self.down {
                return Err(RpcDown);
            }
            let mut polls = self.polls_before_key.lock().unwrap();
            if *polls == 0 {
                return Ok(Some(vec![0xbb, 0xcc]));
            }
            *polls -= 1;
            Ok(None)
        }

        async fn submit_encrypted(
            &self,
            signer: &String,
            ciphertext: Vec<u8>,
            nonce: Option<u64>,
        ) -> Result<u32, RpcDown> {
            let mut submitted = self.submitted.lock().unwrap();
            submitted.push((signer.clone(), ciphertext, nonce));
            Ok(submitted.len() as u32)
        }
    }

    #[tokio::test(start_paused = true)]
    async fn wait_for_next_key_should_poll_until_announced() {
        let client = ScriptedClient {
            polls_before_key: Mutex::new(3),
            ..Default::default()
        };

        let key = wait_for_next_key(&client, Duration::from_secs(30), Duration::from_secs(6))
            .await
            .unwrap();

        assert_eq!(key, vec![0xbb, 0xcc]);
    }

    #[tokio::test(start_paused = true)]
    async fn wait_for_next_key_should_time_out() {
        let client = ScriptedClient {
            polls_before_key: Mutex::new(100),
            ..Default::default()
        };

        let err = wait_for_next_key(&client, Duration::from_secs(10), Duration::from_secs(1))
            .await
            .unwrap_err();

        assert!(matches!(err, ShieldError::KeyNotAnnounced(timeout) if timeout == Duration::from_secs(10)));
    }

    #[tokio::test]
    async fn wait_for_next_key_should_surface_client_errors() {
        let client = ScriptedClient {
            down: true,
            ..Default::default()
        };

        let err = wait_for_next_key(&client, Duration::from_secs(10), Duration::from_secs(1))
            .await
            .unwrap_err();

        assert_eq!(err.to_string(), "Chain client error: rpc down");
    }

    #[tokio::test(start_paused = true)]
    async fn submit_should_encrypt_with_the_announced_key() {
        let client = ScriptedClient::default();

        let receipt = submit_with_next_key(
            &client,
            &"//Alice".to_string(),
            |key| key.iter().map(|byte| byte ^ 0xff).collect(),
            Some(7),
            Duration::from_secs(10),
        )
        .await
        .unwrap();

        assert_eq!(receipt, 1);
        assert_eq!(
            client.submitted.lock().unwrap()[0],
            ("//Alice".to_string(), vec![0x44, 0x33], Some(7))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn bootstrap_should_patch_the_chain_spec_and_start_the_network() {
        let spec = serde_json::json!({
            "name": "Local Testnet",
            "genesis": { "runtimeGenesis": { "patch": {
                "aura": { "authorities": [] },
                "grandpa": { "authorities": [] },
                "balances": { "balances": [] }
            } } }
        });
        let pm = FakeProcessManager::default();
        pm.push_stream(OLD_BINARY, vec![StreamValue::Stdout(spec.to_string())]);
        pm.push_stream_for_arg("--one", informant_script(1, 10));
        pm.push_stream_for_arg("--two", informant_script(1, 10));
        let fs = InMemoryFileSystem::default();
        let settings = GlobalSettingsBuilder::new()
            .with_binary_path(OLD_BINARY)
            .with_base_dir("/tmp/e2e")
            .build()
            .unwrap();
        let config = NetworkConfig::new(
            settings,
            vec![
                NodeConfig::new("one", 30334, 9944, true),
                NodeConfig::new("two", 30335, 9945, true),
            ],
        )
        .unwrap()
        .with_timeouts(Timeouts::new(5, 10, 60));
        let patch = AuthorityPatch::new("5Aura", "5Grandpa").with_balance("5Aura", 1_000);

        let network = bootstrap(&config, pm.clone(), fs.clone(), Some(&patch))
            .await
            .unwrap();

        let written: serde_json::Value = serde_json::from_str(
            &fs.read_to_string("/tmp/e2e/chain-spec.json").await.unwrap(),
        )
        .unwrap();
        assert_eq!(
            written["genesis"]["runtimeGenesis"]["patch"]["aura"]["authorities"],
            serde_json::json!(["5Aura"])
        );
        assert!(fs.exists("/tmp/e2e/network-state.json").await);
        assert_eq!(network.nodes().len(), 2);

        network.teardown().await;
        assert_eq!(pm.count(), 0);
    }
}
