use std::{path::PathBuf, time::Instant};

use anyhow::Context;
use clap::{Parser, Subcommand};
use configuration::{ConfigError, GlobalSettingsBuilder, NetworkConfig};
use orchestrator::{
    state::teardown_from_state,
    upgrade::{UpgradeCheck, DEFAULT_FINALITY_STEP},
    Orchestrator,
};
use support::{fs::local::LocalFileSystem, process::os::OsProcessManager};
use tracing::warn;
use tracing_subscriber::filter::{EnvFilter, LevelFilter};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    #[command(subcommand)]
    pub cmd: Commands,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Spawn the network described by a toml config, Ctrl-C tears it down.
    Spawn {
        config: PathBuf,
        #[arg(
            short = 'd',
            long = "dir",
            help = "Directory for the chain-spec, the state file and the nodes data (e.g. -d /tmp/my-localnet)"
        )]
        base_dir: Option<PathBuf>,
        #[arg(short, long, help = "Node binary, takes precedence over the config")]
        binary: Option<PathBuf>,
        #[arg(
            long,
            help = "Exit once the network is up and leave it running, stop it later with `teardown`"
        )]
        detach: bool,
    },
    /// Swap a running network from one binary to another, node by node.
    UpgradeCheck {
        #[arg(long, help = "Binary the network starts from")]
        old: PathBuf,
        #[arg(long, help = "Binary every node is swapped to")]
        new: PathBuf,
        #[arg(short = 'd', long = "dir")]
        base_dir: Option<PathBuf>,
        #[arg(long, default_value_t = DEFAULT_FINALITY_STEP)]
        finality_step: u64,
    },
    /// Stop the network listed in a state file and remove its artifacts.
    Teardown { state_file: PathBuf },
}

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .from_env_lossy(),
        )
        .init();

    let args = Args::parse();

    match args.cmd {
        Commands::Spawn {
            config,
            base_dir,
            binary,
            detach,
        } => spawn(config, base_dir, binary, detach).await,
        Commands::UpgradeCheck {
            old,
            new,
            base_dir,
            finality_step,
        } => upgrade_check(old, new, base_dir, finality_step).await,
        Commands::Teardown { state_file } => {
            let report = teardown_from_state(OsProcessManager, LocalFileSystem, &state_file).await;
            for failure in &report.failures {
                warn!("⚠️ {failure}");
            }
            println!("🧹 {} nodes killed", report.orphans_killed.len());
            Ok(())
        },
    }
}

async fn spawn(
    config: PathBuf,
    base_dir: Option<PathBuf>,
    binary: Option<PathBuf>,
    detach: bool,
) -> Result<(), anyhow::Error> {
    let now = Instant::now();
    let config = network_config(&config, base_dir, binary)?;

    let orchestrator = Orchestrator::new(OsProcessManager, LocalFileSystem);
    let orchestrator = if detach {
        orchestrator.detached()
    } else {
        orchestrator
    };
    let network = orchestrator.spawn(&config, None).await?;
    println!("🚀🚀🚀 network is up, in {:.2?}", now.elapsed());

    if detach {
        if let Some(state_file) = network.detach() {
            println!(
                "run `node-harness teardown {}` to stop it",
                state_file.display()
            );
        }
        return Ok(());
    }

    let interrupted = tokio::signal::ctrl_c().await;
    let report = network.teardown().await;
    for failure in &report.failures {
        warn!("⚠️ {failure}");
    }

    interrupted.context("listening for ctrl-c")
}

async fn upgrade_check(
    old: PathBuf,
    new: PathBuf,
    base_dir: Option<PathBuf>,
    finality_step: u64,
) -> Result<(), anyhow::Error> {
    let check = UpgradeCheck::new(old, new).with_finality_step(finality_step);
    let check = match base_dir {
        Some(base_dir) => check.with_base_dir(base_dir),
        None => check,
    };

    let shutdown = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!("⚠️ can't listen for ctrl-c: {err}");
            std::future::pending::<()>().await;
        }
    };

    let report = check
        .run_until(OsProcessManager, LocalFileSystem, shutdown)
        .await?;
    for stage in &report.stages {
        println!("✅ {} upgraded, {} blocks finalized", stage.node, stage.finalized);
    }

    Ok(())
}

/// Loads the config, then applies the command line overrides.
pub fn network_config(
    config: &std::path::Path,
    base_dir: Option<PathBuf>,
    binary: Option<PathBuf>,
) -> Result<NetworkConfig, ConfigError> {
    let network_config = NetworkConfig::load_from_toml(config)?;

    // nothing to override
    if base_dir.is_none() && binary.is_none() {
        return Ok(network_config);
    }

    let settings_builder = GlobalSettingsBuilder::from_settings(network_config.settings().clone());
    let settings_builder = if let Some(base_dir) = base_dir {
        settings_builder.with_base_dir(base_dir)
    } else {
        settings_builder
    };
    let settings_builder = if let Some(binary) = binary {
        settings_builder.with_binary_path(binary)
    } else {
        settings_builder
    };

    let settings = settings_builder
        .build()
        .map_err(ConfigError::GlobalSettings)?;
    network_config.with_settings(settings)
}

#[cfg(test)]
mod test {
    use std::{
        path::{Path, PathBuf},
        time::Duration,
    };

    use super::*;

    const CONFIG: &str = "./testing/config.toml";

    #[test]
    fn works_without_any() {
        let n = network_config(Path::new(CONFIG), None, None).unwrap();

        assert_eq!(n.settings().base_dir(), Path::new("/tmp/subtensor-localnet"));
        assert_eq!(
            n.settings().binary_path(),
            Path::new("/opt/subtensor/node-subtensor")
        );
        assert_eq!(n.timeouts().finality(), Duration::from_secs(300));
        assert_eq!(n.expected_peers(), 2);
    }

    #[test]
    fn works_with_base_dir() {
        let n = network_config(Path::new(CONFIG), Some(PathBuf::from("/tmp/overrided")), None)
            .unwrap();

        assert_eq!(n.settings().base_dir(), Path::new("/tmp/overrided"));
        assert_eq!(
            n.settings().state_file(),
            PathBuf::from("/tmp/overrided/network-state.json")
        );
        assert_eq!(
            n.node_base_path(&n.nodes()[0]),
            PathBuf::from("/tmp/overrided/one")
        );
    }

    #[test]
    fn works_with_binary() {
        let n = network_config(
            Path::new(CONFIG),
            None,
            Some(PathBuf::from("./target/release/node-subtensor")),
        )
        .unwrap();

        assert_eq!(
            n.node_binary_path(&n.nodes()[2]),
            PathBuf::from("./target/release/node-subtensor")
        );
        assert_eq!(n.settings().base_dir(), Path::new("/tmp/subtensor-localnet"));
    }

    #[test]
    fn fails_with_a_missing_config() {
        let err = network_config(Path::new("./testing/missing.toml"), None, None).unwrap_err();

        assert!(matches!(err, ConfigError::Read(..)));
    }

    #[test]
    fn args_should_parse_every_subcommand() {
        let args = Args::try_parse_from(["node-harness", "spawn", CONFIG, "--detach"]).unwrap();
        assert!(matches!(args.cmd, Commands::Spawn { detach: true, .. }));

        let args = Args::try_parse_from([
            "node-harness",
            "upgrade-check",
            "--old",
            "/bin/old",
            "--new",
            "/bin/new",
        ])
        .unwrap();
        assert!(matches!(
            args.cmd,
            Commands::UpgradeCheck {
                finality_step: DEFAULT_FINALITY_STEP,
                base_dir: None,
                ..
            }
        ));

        let args =
            Args::try_parse_from(["node-harness", "teardown", "/tmp/state.json"]).unwrap();
        assert!(matches!(args.cmd, Commands::Teardown { .. }));
    }
}
