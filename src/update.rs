use crate::error::HassctlError;
use crate::fetch::{remote_url, write_atomic, Downloader, EXECUTABLE_FILE_NAME};
use std::env;
use std::path::PathBuf;
use tracing::{debug, info};

const EXECUTABLE_MODE: u32 = 0o755;

// ELF, Mach-O (32/64-bit, both byte orders, universal) and PE.
const NATIVE_MAGIC: [&[u8]; 7] = [
    b"\x7fELF",
    b"\xfe\xed\xfa\xce",
    b"\xfe\xed\xfa\xcf",
    b"\xce\xfa\xed\xfe",
    b"\xcf\xfa\xed\xfe",
    b"\xca\xfe\xba\xbe",
    b"MZ",
];

fn is_native_executable(body: &[u8]) -> bool {
    NATIVE_MAGIC.iter().any(|magic| body.starts_with(magic))
}

pub struct SelfUpdater<'a, D: Downloader> {
    downloader: &'a D,
    exe_path: PathBuf,
}

impl<'a, D: Downloader> SelfUpdater<'a, D> {
    pub fn new(downloader: &'a D, exe_path: PathBuf) -> Self {
        Self {
            downloader,
            exe_path,
        }
    }

    pub fn for_current_exe(downloader: &'a D) -> Result<Self, HassctlError> {
        let exe_path = env::current_exe()?;
        Ok(Self::new(downloader, exe_path))
    }

    pub fn update(&self, branch: &str) -> Result<(), HassctlError> {
        let url = remote_url(self.downloader.base_url(), branch, EXECUTABLE_FILE_NAME);
        debug!(%url, exe = %self.exe_path.display(), "downloading hassctl");
        let body = self.downloader.download(&url)?;
        if body.is_empty() {
            return Err(HassctlError::Update(format!("{url} returned an empty body")));
        }
        if !is_native_executable(&body) {
            return Err(HassctlError::Update(format!(
                "{url} is not a native executable; refusing to replace {}",
                self.exe_path.display()
            )));
        }
        write_atomic(&self.exe_path, &body, Some(EXECUTABLE_MODE)).map_err(|err| {
            HassctlError::Update(format!(
                "could not replace {}: {err}",
                self.exe_path.display()
            ))
        })?;
        info!(branch, exe = %self.exe_path.display(), "hassctl replaced");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{FakeDownloader, FAKE_BASE_URL, NATIVE_BUILD};
    use std::fs;
    use std::path::Path;
    use tempfile::tempdir;

    fn dir_names(dir: &Path) -> Vec<String> {
        let mut names: Vec<String> = fs::read_dir(dir)
            .unwrap()
            .map(|entry| entry.unwrap().file_name().to_string_lossy().to_string())
            .collect();
        names.sort();
        names
    }

    #[test]
    fn failed_download_leaves_executable_untouched() {
        let dir = tempdir().unwrap();
        let exe = dir.path().join("hassctl");
        fs::write(&exe, b"original build").unwrap();
        let downloader = FakeDownloader::failing(404);

        let err = SelfUpdater::new(&downloader, exe.clone())
            .update("dev")
            .unwrap_err();

        assert!(matches!(err, HassctlError::Network(_)));
        assert_eq!(fs::read(&exe).unwrap(), b"original build");
        assert_eq!(dir_names(dir.path()), vec!["hassctl".to_string()]);
        assert_eq!(
            downloader.requests(),
            vec![format!("{FAKE_BASE_URL}/dev/hassctl")]
        );
    }

    #[test]
    fn empty_download_is_rejected() {
        let dir = tempdir().unwrap();
        let exe = dir.path().join("hassctl");
        fs::write(&exe, b"original build").unwrap();
        let downloader = FakeDownloader::serving(b"");

        let err = SelfUpdater::new(&downloader, exe.clone())
            .update("master")
            .unwrap_err();

        assert!(matches!(err, HassctlError::Update(_)));
        assert_eq!(fs::read(&exe).unwrap(), b"original build");
    }

    #[test]
    fn script_download_is_not_swapped_in() {
        let dir = tempdir().unwrap();
        let exe = dir.path().join("hassctl");
        fs::write(&exe, b"original build").unwrap();
        let downloader = FakeDownloader::serving(b"#!/bin/bash\necho hassctl\n");

        let err = SelfUpdater::new(&downloader, exe.clone())
            .update("master")
            .unwrap_err();

        assert!(matches!(err, HassctlError::Update(ref message) if message.contains("not a native executable")));
        assert_eq!(fs::read(&exe).unwrap(), b"original build");
        assert_eq!(dir_names(dir.path()), vec!["hassctl".to_string()]);
    }

    #[test]
    fn native_magic_is_recognized() {
        assert!(is_native_executable(NATIVE_BUILD));
        assert!(is_native_executable(b"\xcf\xfa\xed\xfe\x07\0\0\x01"));
        assert!(!is_native_executable(b"#!/bin/sh\n"));
        assert!(!is_native_executable(b"\x7fEL"));
    }

    #[cfg(unix)]
    #[test]
    fn successful_update_swaps_in_executable() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempdir().unwrap();
        let exe = dir.path().join("hassctl");
        fs::write(&exe, b"original build").unwrap();
        let downloader = FakeDownloader::serving(NATIVE_BUILD);

        SelfUpdater::new(&downloader, exe.clone())
            .update("master")
            .unwrap();

        assert_eq!(fs::read(&exe).unwrap(), NATIVE_BUILD);
        let mode = fs::metadata(&exe).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, EXECUTABLE_MODE);
        assert_eq!(dir_names(dir.path()), vec!["hassctl".to_string()]);
    }

    #[test]
    fn unwritable_directory_reports_update_error() {
        let dir = tempdir().unwrap();
        let exe = dir.path().join("missing-dir").join("hassctl");
        let downloader = FakeDownloader::serving(NATIVE_BUILD);

        let err = SelfUpdater::new(&downloader, exe.clone())
            .update("master")
            .unwrap_err();

        assert!(matches!(err, HassctlError::Update(_)));
        assert!(!exe.exists());
    }
}
