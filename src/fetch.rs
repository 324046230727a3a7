use crate::error::NetworkError;
use std::env;
use std::fs;
use std::io::{self, Write};
use std::path::Path;
use tempfile::NamedTempFile;
use tracing::{debug, warn};

pub const DEFAULT_BASE_URL: &str = "https://raw.githubusercontent.com/dale3h/hassctl";
pub const CONFIG_FILE_NAME: &str = "hassctl.conf";
pub const EXECUTABLE_FILE_NAME: &str = "hassctl";

pub fn remote_base_url() -> String {
    env::var("HASSCTL_BASE_URL")
        .ok()
        .filter(|value| !value.trim().is_empty())
        .unwrap_or_else(|| DEFAULT_BASE_URL.to_string())
}

pub fn remote_url(base: &str, branch: &str, file_name: &str) -> String {
    format!("{}/{}/{}", base.trim_end_matches('/'), branch, file_name)
}

pub trait Downloader {
    fn base_url(&self) -> &str;

    fn download(&self, url: &str) -> Result<Vec<u8>, NetworkError>;
}

pub struct HttpDownloader {
    base_url: String,
    client: reqwest::blocking::Client,
}

impl HttpDownloader {
    pub fn new(base_url: String) -> Self {
        Self {
            base_url,
            client: reqwest::blocking::Client::new(),
        }
    }
}

impl Downloader for HttpDownloader {
    fn base_url(&self) -> &str {
        &self.base_url
    }

    fn download(&self, url: &str) -> Result<Vec<u8>, NetworkError> {
        let http = |source: reqwest::Error| NetworkError::Http {
            url: url.to_string(),
            source,
        };
        let response = self
            .client
            .get(url)
            .header("User-Agent", "hassctl")
            .send()
            .map_err(http)?;
        let status = response.status();
        if !status.is_success() {
            return Err(NetworkError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }
        let bytes = response.bytes().map_err(http)?;
        Ok(bytes.to_vec())
    }
}

/// Writes `content` into a temporary sibling of `path` and renames it into
/// place. The temporary file is removed on every failure path.
pub fn write_atomic(path: &Path, content: &[u8], mode: Option<u32>) -> Result<(), io::Error> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let mut tmp = tempfile::Builder::new()
        .prefix(".hassctl-")
        .tempfile_in(dir)?;
    tmp.write_all(content)?;
    tmp.as_file().sync_all()?;
    if let Some(mode) = mode {
        set_mode(&tmp, mode)?;
    }
    tmp.persist(path).map_err(|err| err.error)?;
    Ok(())
}

#[cfg(unix)]
fn set_mode(tmp: &NamedTempFile, mode: u32) -> Result<(), io::Error> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(tmp.path(), fs::Permissions::from_mode(mode))
}

#[cfg(not(unix))]
fn set_mode(_tmp: &NamedTempFile, _mode: u32) -> Result<(), io::Error> {
    Ok(())
}

pub struct ConfigFetcher<'a, D: Downloader> {
    downloader: &'a D,
}

impl<'a, D: Downloader> ConfigFetcher<'a, D> {
    pub fn new(downloader: &'a D) -> Self {
        Self { downloader }
    }

    pub fn fetch_default(&self, path: &Path, branch: &str) -> bool {
        if path.exists() {
            return false;
        }
        let url = remote_url(self.downloader.base_url(), branch, CONFIG_FILE_NAME);
        debug!(%url, path = %path.display(), "fetching default config");
        let body = match self.downloader.download(&url) {
            Ok(body) => body,
            Err(err) => {
                warn!("could not fetch default config: {err}");
                return false;
            }
        };
        if let Some(parent) = path.parent() {
            if let Err(err) = fs::create_dir_all(parent) {
                warn!("could not create {}: {err}", parent.display());
                return false;
            }
        }
        match write_atomic(path, &body, None) {
            Ok(()) => true,
            Err(err) => {
                warn!("could not write {}: {err}", path.display());
                false
            }
        }
    }
}
