// Precedence: built-in defaults, then the file, then the environment. The
// file is never evaluated as shell code.

use crate::error::ConfigError;
use crate::fetch::{ConfigFetcher, Downloader};
use crate::identity::ensure_user_exists;
use serde::de::value::{Error as ValueError, MapDeserializer};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

pub const CONFIG_PATH_ENV: &str = "HASSCTL_CONF";
pub const DEFAULT_CONFIG_PATH: &str = "/etc/hassctl.conf";
pub const DEFAULT_BRANCH: &str = "master";
pub const DEFAULT_HASS_USER: &str = "homeassistant";
pub const DEFAULT_HASS_SERVICE: &str = "home-assistant@homeassistant.service";

const BRANCH_KEY: &str = "HASSCTL_BRANCH";
const VIRTUAL_ENV_KEY: &str = "VIRTUAL_ENV";
const HASS_USER_KEY: &str = "HASS_USER";
const HASS_SERVICE_KEY: &str = "HASS_SERVICE";
const PIP_EXEC_KEY: &str = "PIP_EXEC";
const HASS_EXEC_KEY: &str = "HASS_EXEC";

pub const SETTING_KEYS: [&str; 6] = [
    BRANCH_KEY,
    VIRTUAL_ENV_KEY,
    HASS_USER_KEY,
    HASS_SERVICE_KEY,
    PIP_EXEC_KEY,
    HASS_EXEC_KEY,
];

const PIP_PROGRAM: &str = "pip3";
const HASS_PROGRAM: &str = "hass";

// Empty means unset.
#[derive(Debug, Default, Deserialize, Clone, PartialEq, Eq)]
#[serde(default)]
struct Settings {
    #[serde(rename = "HASSCTL_BRANCH")]
    branch: String,
    #[serde(rename = "VIRTUAL_ENV")]
    virtual_env: String,
    #[serde(rename = "HASS_USER")]
    hass_user: String,
    #[serde(rename = "HASS_SERVICE")]
    hass_service: String,
    #[serde(rename = "PIP_EXEC")]
    pip_exec: String,
    #[serde(rename = "HASS_EXEC")]
    hass_exec: String,
    #[serde(flatten)]
    extra: BTreeMap<String, String>,
}

impl Settings {
    fn from_map(map: BTreeMap<String, String>) -> Result<Self, ValueError> {
        Settings::deserialize(MapDeserializer::<_, ValueError>::new(map.into_iter()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Configuration {
    pub config_path: PathBuf,
    pub branch: String,
    pub virtual_env: Option<PathBuf>,
    pub target_user: String,
    pub service_pattern: String,
    pub pip_exec: PathBuf,
    pub hass_exec: PathBuf,
    pub extra: BTreeMap<String, String>,
}

pub fn resolve_config_path() -> PathBuf {
    match env::var(CONFIG_PATH_ENV) {
        Ok(path) if !path.trim().is_empty() => PathBuf::from(path),
        _ => PathBuf::from(DEFAULT_CONFIG_PATH),
    }
}

/// Strips a trailing ` # comment`, then one pair of surrounding quotes.
fn parse_value(value: &str) -> Option<&str> {
    let value = value.trim();
    for quote in ['"', '\''] {
        if let Some(rest) = value.strip_prefix(quote) {
            let end = rest.find(quote)?;
            let trailing = rest[end + 1..].trim_start();
            let closed = trailing.is_empty() || trailing.starts_with('#');
            return closed.then_some(&rest[..end]);
        }
    }
    Some(match value.find(" #") {
        Some(idx) => value[..idx].trim_end(),
        None => value,
    })
}

fn is_valid_key(key: &str) -> bool {
    let mut chars = key.chars();
    match chars.next() {
        Some(first) if first.is_ascii_alphabetic() || first == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn parse_line(raw: &str) -> Option<Result<(String, String), ()>> {
    let line = raw.trim();
    if line.is_empty() || line.starts_with('#') {
        return None;
    }
    let line = line.strip_prefix("export ").map_or(line, str::trim_start);
    let Some((key, value)) = line.split_once('=') else {
        return Some(Err(()));
    };
    if !is_valid_key(key) {
        return Some(Err(()));
    }
    match parse_value(value) {
        Some(value) => Some(Ok((key.to_string(), value.to_string()))),
        None => Some(Err(())),
    }
}

pub fn parse_config(content: &str, path: &Path) -> Result<BTreeMap<String, String>, ConfigError> {
    let mut values = BTreeMap::new();
    for (idx, raw) in content.lines().enumerate() {
        match parse_line(raw) {
            None => continue,
            Some(Ok((key, value))) => {
                values.insert(key, value);
            }
            Some(Err(())) => {
                return Err(ConfigError::Parse {
                    path: path.to_path_buf(),
                    line: idx + 1,
                    content: raw.trim().to_string(),
                })
            }
        }
    }
    Ok(values)
}

fn non_empty(value: String) -> Option<String> {
    if value.trim().is_empty() {
        None
    } else {
        Some(value)
    }
}

#[cfg(unix)]
fn is_executable(meta: &fs::Metadata) -> bool {
    use std::os::unix::fs::PermissionsExt;
    meta.is_file() && meta.permissions().mode() & 0o111 != 0
}

#[cfg(not(unix))]
fn is_executable(meta: &fs::Metadata) -> bool {
    meta.is_file()
}

fn validate_executable(key: &'static str, path: &Path) -> Result<(), ConfigError> {
    let meta = fs::metadata(path).map_err(|_| ConfigError::MissingExecutable {
        key,
        path: path.to_path_buf(),
    })?;
    if !is_executable(&meta) {
        return Err(ConfigError::NotExecutable {
            key,
            path: path.to_path_buf(),
        });
    }
    Ok(())
}

fn derive_executable(
    key: &'static str,
    configured: Option<String>,
    virtual_env: Option<&Path>,
    program: &str,
) -> Result<PathBuf, ConfigError> {
    if let Some(path) = configured {
        return Ok(PathBuf::from(path));
    }
    if let Some(venv) = virtual_env {
        return Ok(venv.join("bin").join(program));
    }
    which::which(program).map_err(|_| ConfigError::ExecutableNotFound {
        key,
        program: program.to_string(),
    })
}

pub struct ConfigStore {
    config_path: PathBuf,
    overrides: BTreeMap<String, String>,
}

impl ConfigStore {
    pub fn new(config_path: PathBuf) -> Self {
        Self {
            config_path,
            overrides: BTreeMap::new(),
        }
    }

    pub fn from_env() -> Self {
        let mut store = Self::new(resolve_config_path());
        for key in SETTING_KEYS {
            if let Ok(value) = env::var(key) {
                store = store.with_override(key, value);
            }
        }
        store
    }

    /// Blank values are ignored, leaving the file's value in place.
    pub fn with_override(mut self, key: &str, value: impl Into<String>) -> Self {
        if let Some(value) = non_empty(value.into()) {
            self.overrides.insert(key.to_string(), value);
        }
        self
    }

    fn bootstrap_branch(&self) -> String {
        self.overrides
            .get(BRANCH_KEY)
            .cloned()
            .and_then(non_empty)
            .unwrap_or_else(|| DEFAULT_BRANCH.to_string())
    }

    fn load_file(&self) -> Result<BTreeMap<String, String>, ConfigError> {
        let content = fs::read_to_string(&self.config_path).map_err(|source| ConfigError::Read {
            path: self.config_path.clone(),
            source,
        })?;
        parse_config(&content, &self.config_path)
    }

    pub fn resolve<D: Downloader>(&self, downloader: &D) -> Result<Configuration, ConfigError> {
        if !self.config_path.exists() {
            ConfigFetcher::new(downloader).fetch_default(&self.config_path, &self.bootstrap_branch());
        }
        let mut merged = if self.config_path.exists() {
            debug!(path = %self.config_path.display(), "loading config");
            self.load_file()?
        } else {
            warn!(
                "config file {} not found; using built-in defaults",
                self.config_path.display()
            );
            BTreeMap::new()
        };
        merged.extend(self.overrides.clone());
        let settings = Settings::from_map(merged).map_err(|err| ConfigError::Schema {
            path: self.config_path.clone(),
            message: err.to_string(),
        })?;
        let config = self.finish(settings)?;
        debug!(
            path = %config.config_path.display(),
            virtual_env = ?config.virtual_env,
            uninterpreted = ?config.extra.keys().collect::<Vec<_>>(),
            "configuration resolved"
        );
        Ok(config)
    }

    fn finish(&self, settings: Settings) -> Result<Configuration, ConfigError> {
        let virtual_env = non_empty(settings.virtual_env).map(PathBuf::from);
        if let Some(venv) = &virtual_env {
            if !venv.is_dir() {
                return Err(ConfigError::MissingVirtualEnv(venv.clone()));
            }
        }

        let target_user =
            non_empty(settings.hass_user).unwrap_or_else(|| DEFAULT_HASS_USER.to_string());
        ensure_user_exists(&target_user)?;

        let pip_exec = derive_executable(
            PIP_EXEC_KEY,
            non_empty(settings.pip_exec),
            virtual_env.as_deref(),
            PIP_PROGRAM,
        )?;
        validate_executable(PIP_EXEC_KEY, &pip_exec)?;
        let hass_exec = derive_executable(
            HASS_EXEC_KEY,
            non_empty(settings.hass_exec),
            virtual_env.as_deref(),
            HASS_PROGRAM,
        )?;
        validate_executable(HASS_EXEC_KEY, &hass_exec)?;

        Ok(Configuration {
            config_path: self.config_path.clone(),
            branch: non_empty(settings.branch).unwrap_or_else(|| DEFAULT_BRANCH.to_string()),
            virtual_env,
            target_user,
            service_pattern: non_empty(settings.hass_service)
                .unwrap_or_else(|| DEFAULT_HASS_SERVICE.to_string()),
            pip_exec,
            hass_exec,
            extra: settings.extra,
        })
    }
}
