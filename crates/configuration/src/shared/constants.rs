pub const DEFAULT_CHAIN: &str = "local";
pub const DEFAULT_BASE_DIR: &str = "/tmp/subtensor-localnet";
pub const DEFAULT_CHAIN_SPEC_FILE: &str = "chain-spec.json";
pub const DEFAULT_STATE_FILE: &str = "network-state.json";

pub const DEFAULT_START_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_PEERS_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_FINALITY_TIMEOUT_SECS: u64 = 600;

pub const DEFAULT_EXPECTED_FINALIZED: u64 = 5;
