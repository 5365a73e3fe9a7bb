pub const VALID_REGEX: &str = "regex should be valid ";

pub const THIS_IS_A_BUG: &str =
    "- this is a bug please report it: https://github.com/opentensor/node-harness/issues";

/// environment variable which can be used to override the node binary location
pub const BINARY_PATH_ENV: &str = "BINARY_PATH";

/// default location of the node binary, relative to the repository root
pub const DEFAULT_BINARY_PATH: &str = "./target/release/node-subtensor";
