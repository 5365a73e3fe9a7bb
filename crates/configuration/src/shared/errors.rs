use std::path::PathBuf;

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("unable to read {0:?}: {1}")]
    Read(PathBuf, #[source] std::io::Error),

    #[error("invalid toml: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("settings.{0}")]
    GlobalSettings(FieldError),

    #[error("node[{0}].{1}")]
    Node(String, FieldError),

    #[error("at least one node is required")]
    NoNodes,
}

#[derive(thiserror::Error, Debug, PartialEq)]
pub enum FieldError {
    #[error("name: '{0}' should only contain lowercase letters, digits and '-'")]
    InvalidName(String),

    #[error("name: '{0}' is already used by another node")]
    DuplicatedName(String),

    #[error("{0}: port {1} is already used by another node")]
    PortAlreadyUsed(&'static str, u16),

    #[error("chain: can't be empty")]
    EmptyChain,

    #[error("{0}: timeout can't be zero")]
    ZeroTimeout(&'static str),
}
