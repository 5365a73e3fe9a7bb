//! Network configuration for the harness.
//!
//! A network is described in a toml file with a `[settings]` table, optional
//! `[timeouts]` and `[convergence]` tables and one `[[nodes]]` entry per node:
//!
//! ```toml
//! [settings]
//! binary_path = "./target/release/node-subtensor"
//! base_dir = "/tmp/subtensor-localnet"
//!
//! [[nodes]]
//! name = "one"
//! port = 30334
//! rpc_port = 9944
//! validator = true
//! ```
mod global_settings;
mod network;
mod node;
pub mod shared;

pub use global_settings::{Convergence, GlobalSettings, GlobalSettingsBuilder, Timeouts};
pub use network::NetworkConfig;
pub use node::NodeConfig;
pub use shared::errors::{ConfigError, FieldError};
