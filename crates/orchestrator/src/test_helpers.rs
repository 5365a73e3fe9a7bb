use support::process::fake::StreamValue;

pub(crate) const OLD_BINARY: &str = "/bin/node-subtensor-old";
pub(crate) const NEW_BINARY: &str = "/bin/node-subtensor-new";
pub(crate) const CHAIN_SPEC: &str = "/tmp/localnet/chain-spec.json";
pub(crate) const STATE_FILE: &str = "/tmp/localnet/network-state.json";

/// Boot lines followed by one informant line per finalized block up to
/// `last_finalized`, the fake keeps repeating the last one.
pub(crate) fn informant_script(peers: u32, last_finalized: u64) -> Vec<StreamValue> {
    let mut script = vec![StreamValue::Stderr(
        "🔨 Initializing Genesis block/state\n".into(),
    )];
    script.extend((0..=last_finalized).map(|finalized| {
        StreamValue::Stderr(format!(
            "💤 Idle ({peers} peers), best: #{} (0x1a2b…3c4d), finalized #{finalized} (0x5e6f…7a8b), ⬇ 1.2kiB/s ⬆ 1.1kiB/s\n",
            finalized + 2
        ))
    }));

    script
}

pub(crate) fn raw_chain_spec() -> String {
    serde_json::json!({
        "name": "Local Testnet",
        "id": "local_testnet",
        "genesis": { "raw": { "top": {}, "childrenDefault": {} } }
    })
    .to_string()
}
