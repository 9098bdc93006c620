pub mod config;
pub mod credentials;
pub mod error;

pub use config::{Config, RegistryEntry, RegistryKind};
pub use credentials::{ChainTokenProvider, CredentialStore, EnvTokenProvider, TokenProvider};
pub use error::{ConfigError, Result};

#[cfg(test)]
pub mod test_utils;
