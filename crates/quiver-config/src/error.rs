use miette::Diagnostic;
use quiver_utils::error::PathError;
use thiserror::Error;

#[derive(Error, Diagnostic, Debug)]
pub enum ConfigError {
    #[error("TOML serialization error: {0}")]
    #[diagnostic(
        code(quiver_config::toml_serialize),
        help("Check your configuration structure for invalid values")
    )]
    TomlSerError(#[from] toml::ser::Error),

    #[error("TOML deserialization error: {0}")]
    #[diagnostic(
        code(quiver_config::toml_deserialize),
        help("Check your config.toml syntax and structure")
    )]
    TomlDeError(#[from] toml::de::Error),

    #[error("Invalid registry scope: {0}")]
    #[diagnostic(
        code(quiver_config::invalid_scope),
        help("Scopes look like `@my-team`: lowercase letters, digits and hyphens")
    )]
    InvalidScope(String),

    #[error("Registry for scope {scope} of type `{kind}` requires a `project`")]
    #[diagnostic(
        code(quiver_config::missing_project),
        help("Set `project` to the GitLab project path or the GitHub namespace")
    )]
    MissingProject { scope: String, kind: String },

    #[error("Invalid timeout: {0}")]
    #[diagnostic(
        code(quiver_config::invalid_timeout),
        help("Use a duration such as `30s`, `2m` or `1m30s`")
    )]
    InvalidTimeout(String),

    #[error("Error while {action}: {source}")]
    #[diagnostic(code(quiver_config::io))]
    IoError {
        action: String,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    #[diagnostic(code(quiver_config::path))]
    Path(#[from] PathError),
}

pub type Result<T> = std::result::Result<T, ConfigError>;
