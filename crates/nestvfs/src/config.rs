//! VFS configuration.
//!
//! Loadable from TOML; every field has a default, so an empty document is a
//! valid configuration:
//!
//! ```toml
//! root = "/srv"
//! temp_root = "/var/tmp/nestvfs"
//! mount_mode = "indexed"
//! delete_on_exit = true
//! context_cache = true
//! scan_interval_ms = 5000
//!
//! [entry_failure]
//! policy = "skip"
//! allow = ["META-INF/maven"]
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use nestvfs_archive::{DEFAULT_ARCHIVE_EXTENSIONS, EntryFailurePolicy, IndexOptions};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Overrides `temp_root` when set.
pub const TEMP_DIR_ENV: &str = "NESTVFS_TEMP_DIR";

/// How an archive is materialized when mounted.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MountMode {
    /// Extract every entry into a temp directory.
    #[default]
    Expanded,
    /// Index the archive where it is.
    Indexed,
    /// Copy the file aside first; the copy becomes its physical location.
    Copy,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct VfsConfig {
    /// Host directory the `/` of the VFS namespace maps to.
    pub root: PathBuf,
    pub temp_root: Option<PathBuf>,
    pub mount_mode: MountMode,
    pub entry_failure: EntryFailurePolicy,
    /// Extensions (no dot) of files that are entered as archives.
    pub archive_extensions: Vec<String>,
    /// Use the certificate-aware archive backend.
    pub signed_archives: bool,
    pub delete_on_exit: bool,
    /// `false` selects the no-op context cache.
    pub context_cache: bool,
    pub scan_interval_ms: Option<u64>,
}

impl Default for VfsConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("/"),
            temp_root: None,
            mount_mode: MountMode::default(),
            entry_failure: EntryFailurePolicy::default(),
            archive_extensions: DEFAULT_ARCHIVE_EXTENSIONS
                .iter()
                .map(|s| s.to_string())
                .collect(),
            signed_archives: true,
            delete_on_exit: true,
            context_cache: true,
            scan_interval_ms: None,
        }
    }
}

impl VfsConfig {
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: Self = toml::from_str(text).map_err(|e| Error::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| Error::ConfigRead {
            path: path.to_path_buf(),
            source: e,
        })?;
        Self::from_toml_str(&text)
    }

    /// Apply environment overrides.
    pub fn from_env(mut self) -> Self {
        if let Some(dir) = std::env::var_os(TEMP_DIR_ENV).filter(|v| !v.is_empty()) {
            self.temp_root = Some(PathBuf::from(dir));
        }
        self
    }

    pub fn validate(&self) -> Result<()> {
        if !self.root.is_absolute() {
            return Err(Error::Config(format!(
                "root must be absolute: '{}'",
                self.root.display()
            )));
        }
        if self.scan_interval_ms == Some(0) {
            return Err(Error::Config("scan_interval_ms must be positive".into()));
        }
        if let Some(ext) = self.archive_extensions.iter().find(|e| e.is_empty() || e.contains('.')) {
            return Err(Error::Config(format!("bad archive extension '{ext}'")));
        }
        Ok(())
    }

    pub fn root(mut self, root: impl Into<PathBuf>) -> Self {
        self.root = root.into();
        self
    }

    pub fn temp_root(mut self, dir: impl Into<PathBuf>) -> Self {
        self.temp_root = Some(dir.into());
        self
    }

    pub fn mount_mode(mut self, mode: MountMode) -> Self {
        self.mount_mode = mode;
        self
    }

    pub fn entry_failure(mut self, policy: EntryFailurePolicy) -> Self {
        self.entry_failure = policy;
        self
    }

    pub fn archive_extensions<I, S>(mut self, extensions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.archive_extensions = extensions.into_iter().map(Into::into).collect();
        self
    }

    pub fn signed_archives(mut self, enabled: bool) -> Self {
        self.signed_archives = enabled;
        self
    }

    pub fn delete_on_exit(mut self, enabled: bool) -> Self {
        self.delete_on_exit = enabled;
        self
    }

    pub fn context_cache(mut self, enabled: bool) -> Self {
        self.context_cache = enabled;
        self
    }

    pub fn scan_interval(mut self, interval: Duration) -> Self {
        self.scan_interval_ms = Some(interval.as_millis().max(1) as u64);
        self
    }

    pub fn effective_temp_root(&self) -> PathBuf {
        self.temp_root
            .clone()
            .unwrap_or_else(|| std::env::temp_dir().join("nestvfs"))
    }

    pub fn scan_interval_duration(&self) -> Option<Duration> {
        self.scan_interval_ms.map(Duration::from_millis)
    }

    pub(crate) fn index_options(&self) -> IndexOptions {
        IndexOptions::default().entry_failure(self.entry_failure.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_is_default() {
        assert_eq!(VfsConfig::from_toml_str("").unwrap(), VfsConfig::default());
    }

    #[test]
    fn parses_full_document() {
        let config = VfsConfig::from_toml_str(
            r#"
            root = "/srv"
            temp_root = "/var/tmp/x"
            mount_mode = "copy"
            delete_on_exit = false
            context_cache = false
            scan_interval_ms = 250
            archive_extensions = ["jar", "kar"]

            [entry_failure]
            policy = "skip"
            allow = ["META-INF/maven"]
            "#,
        )
        .unwrap();

        assert_eq!(config.root, PathBuf::from("/srv"));
        assert_eq!(config.mount_mode, MountMode::Copy);
        assert!(!config.delete_on_exit);
        assert!(!config.context_cache);
        assert_eq!(config.scan_interval_duration(), Some(Duration::from_millis(250)));
        assert_eq!(
            config.entry_failure,
            EntryFailurePolicy::skip_matching(["META-INF/maven"])
        );
        assert_eq!(config.effective_temp_root(), PathBuf::from("/var/tmp/x"));
    }

    #[test]
    fn rejects_unknown_fields_and_bad_values() {
        assert!(matches!(
            VfsConfig::from_toml_str("colour = 1"),
            Err(Error::Config(_))
        ));
        assert!(VfsConfig::from_toml_str("mount_mode = \"sideways\"").is_err());
        assert!(VfsConfig::from_toml_str("scan_interval_ms = 0").is_err());
        assert!(VfsConfig::from_toml_str("root = \"relative\"").is_err());
    }

    #[test]
    fn builder_setters() {
        let config = VfsConfig::default()
            .root("/tmp")
            .mount_mode(MountMode::Indexed)
            .scan_interval(Duration::from_secs(2))
            .context_cache(false);
        assert_eq!(config.mount_mode, MountMode::Indexed);
        assert_eq!(config.scan_interval_ms, Some(2000));
        assert!(config.validate().is_ok());
    }
}
