use std::io;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum HassctlError {
    #[error("config error: {0}")]
    Config(#[from] ConfigError),
    #[error("network error: {0}")]
    Network(#[from] NetworkError),
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("process error: {0}")]
    Process(String),
    #[error("update failed: {0}")]
    Update(String),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{path}:{line}: expected KEY=value, got `{content}`")]
    Parse {
        path: PathBuf,
        line: usize,
        content: String,
    },
    #[error("failed to read {path}: {source}")]
    Read { path: PathBuf, source: io::Error },
    #[error("settings in {path} are invalid: {message}")]
    Schema { path: PathBuf, message: String },
    #[error("VIRTUAL_ENV directory does not exist: {0}")]
    MissingVirtualEnv(PathBuf),
    #[error("HASS_USER `{0}` is not a user on this system")]
    UnknownUser(String),
    #[error("failed to look up user `{user}`: {source}")]
    UserLookup { user: String, source: nix::Error },
    #[error("{key}: `{program}` was not found on PATH")]
    ExecutableNotFound { key: &'static str, program: String },
    #[error("{key}: {path} does not exist")]
    MissingExecutable { key: &'static str, path: PathBuf },
    #[error("{key}: {path} is not an executable file")]
    NotExecutable { key: &'static str, path: PathBuf },
}

#[derive(Debug, Error)]
pub enum NetworkError {
    #[error("request to {url} failed: {source}")]
    Http { url: String, source: reqwest::Error },
    #[error("download failed: {url} (HTTP {status})")]
    Status { url: String, status: u16 },
}

#[derive(Debug, Error)]
pub enum UsageError {
    #[error("no command given")]
    MissingCommand,
    #[error("unknown command `{0}`")]
    UnknownCommand(String),
    #[error("unknown option `{0}`")]
    UnknownOption(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_errors_name_the_offending_item() {
        let err = HassctlError::from(ConfigError::UnknownUser("hass".to_string()));
        assert_eq!(
            err.to_string(),
            "config error: HASS_USER `hass` is not a user on this system"
        );

        let err = ConfigError::NotExecutable {
            key: "PIP_EXEC",
            path: PathBuf::from("/srv/ha/bin/pip3"),
        };
        assert!(err.to_string().contains("PIP_EXEC"));
        assert!(err.to_string().contains("/srv/ha/bin/pip3"));
    }
}
