use std::path::Path;

use serde_json::{json, Value};
use support::{
    fs::FileSystem,
    process::{Command, ProcessManager},
};
use tracing::{debug, info, trace, warn};

use super::errors::ChainSpecError;

/// Runtime config locations, in lookup order.
const RUNTIME_CONFIG_POINTERS: [&str; 4] = [
    "/genesis/runtimeGenesis/patch",
    "/genesis/runtimeGenesis/config",
    "/genesis/runtimeGenesisConfigPatch",
    "/genesis/runtime",
];

/// In-memory edit of a chain-spec, applied before it's written to disk.
pub trait ChainSpecPatch: Send + Sync {
    fn apply(&self, chain_spec: &mut Value) -> Result<(), ChainSpecError>;
}

impl<F> ChainSpecPatch for F
where
    F: Fn(&mut Value) -> Result<(), ChainSpecError> + Send + Sync,
{
    fn apply(&self, chain_spec: &mut Value) -> Result<(), ChainSpecError> {
        self(chain_spec)
    }
}

/// Registers one more authority, and optionally funds an account.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthorityPatch {
    pub aura: String,
    pub grandpa: String,
    pub balance: Option<(String, u64)>,
}

impl AuthorityPatch {
    pub fn new(aura: impl Into<String>, grandpa: impl Into<String>) -> Self {
        Self {
            aura: aura.into(),
            grandpa: grandpa.into(),
            balance: None,
        }
    }

    pub fn with_balance(self, account: impl Into<String>, amount: u64) -> Self {
        Self {
            balance: Some((account.into(), amount)),
            ..self
        }
    }
}

impl ChainSpecPatch for AuthorityPatch {
    fn apply(&self, chain_spec: &mut Value) -> Result<(), ChainSpecError> {
        let pointer = get_runtime_config_pointer(chain_spec).map_err(ChainSpecError::Patch)?;
        let Some(runtime_config) = chain_spec.pointer_mut(pointer) else {
            return Err(ChainSpecError::Patch(format!("pointer {pointer} vanished")));
        };

        push_to(runtime_config, "/aura/authorities", json!(self.aura))?;
        push_to(runtime_config, "/grandpa/authorities", json!([self.grandpa, 1]))?;
        if let Some((account, amount)) = &self.balance {
            push_to(runtime_config, "/balances/balances", json!([account, amount]))?;
        }

        Ok(())
    }
}

fn push_to(runtime_config: &mut Value, key: &str, entry: Value) -> Result<(), ChainSpecError> {
    let Some(current) = runtime_config.pointer_mut(key) else {
        warn!("⚠️  '{key}' key not present in runtime config, skipping");
        return Ok(());
    };

    let Some(entries) = current.as_array_mut() else {
        return Err(ChainSpecError::Patch(format!("'{key}' is not an array")));
    };
    trace!("adding {entry} to {key}");
    entries.push(entry);

    Ok(())
}

fn get_runtime_config_pointer(chain_spec: &Value) -> Result<&'static str, String> {
    RUNTIME_CONFIG_POINTERS
        .into_iter()
        .find(|pointer| chain_spec.pointer(pointer).is_some())
        .ok_or_else(|| "Can not find the runtime pointer".into())
}

/// Command building a raw chain-spec for `chain_name`.
pub fn build_spec_command(binary_path: &Path, chain_name: &str) -> Command {
    Command::new(binary_path).args([
        "build-spec",
        "--disable-default-bootnode",
        "--raw",
        "--chain",
        chain_name,
    ])
}

pub struct ChainSpecGenerator<'a, PM, FS> {
    process_manager: &'a PM,
    filesystem: &'a FS,
}

impl<'a, PM, FS> ChainSpecGenerator<'a, PM, FS>
where
    PM: ProcessManager + Send + Sync,
    FS: FileSystem + Send + Sync,
{
    pub fn new(process_manager: &'a PM, filesystem: &'a FS) -> Self {
        Self {
            process_manager,
            filesystem,
        }
    }

    /// Builds the chain-spec with `binary_path` and writes it to `output_path`.
    ///
    /// Nothing is written unless the build and the optional patch succeed.
    pub async fn generate(
        &self,
        binary_path: &Path,
        output_path: &Path,
        chain_name: &str,
        patch: Option<&dyn ChainSpecPatch>,
    ) -> Result<(), ChainSpecError> {
        let command = build_spec_command(binary_path, chain_name);
        let cmd = command.display();
        debug!("🔧 building chain-spec: {cmd}");

        let output = self
            .process_manager
            .output(command)
            .await
            .map_err(|err| ChainSpecError::Spawn(cmd, err))?;

        if !output.status.success() {
            return Err(ChainSpecError::Generation {
                status: output.status,
                stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            });
        }

        if output.stdout.iter().all(u8::is_ascii_whitespace) {
            return Err(ChainSpecError::EmptyOutput);
        }

        let contents = match patch {
            Some(patch) => {
                let mut chain_spec: Value = serde_json::from_slice(&output.stdout)?;
                patch.apply(&mut chain_spec)?;
                serde_json::to_string_pretty(&chain_spec)?
            },
            None => String::from_utf8_lossy(&output.stdout).to_string(),
        };

        if let Some(parent) = output_path.parent() {
            self.filesystem.create_dir_all(parent).await?;
        }
        self.filesystem.write(output_path, contents).await?;
        info!("📜 chain-spec written to {}", output_path.display());

        Ok(())
    }
}
