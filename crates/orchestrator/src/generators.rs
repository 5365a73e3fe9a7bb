pub mod chain_spec;
pub mod errors;

pub use chain_spec::{AuthorityPatch, ChainSpecGenerator, ChainSpecPatch};
