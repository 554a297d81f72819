//! Canonical app identity.
//!
//! `AppKey` is the pool's cache key and the unit of stats aggregation. It is
//! derived from the deployed app directory: a package manifest's
//! `name`/`version` wins if present, otherwise the directory name is parsed
//! as `name@version` or as a nested `.../name/version` layout. `version`
//! defaults to `"0.0.0"` when it cannot be determined.

use std::fmt;
use std::path::Path;

const DEFAULT_VERSION: &str = "0.0.0";

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AppKey(String);

impl AppKey {
    pub fn new(name: impl AsRef<str>, version: impl AsRef<str>) -> Self {
        let version = version.as_ref();
        let version = if version.is_empty() {
            DEFAULT_VERSION
        } else {
            version
        };
        Self(format!("{}@{}", name.as_ref(), version))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Derive an AppKey for a deployed app directory.
    ///
    /// Order of precedence: a package manifest's `name`/`version` fields,
    /// then a flat `name@version` directory name, then a nested
    /// `.../name/version` layout, falling back to the bare directory name
    /// with `DEFAULT_VERSION`.
    pub fn from_app_dir(app_dir: &Path, package_manifest: Option<(&str, Option<&str>)>) -> Self {
        if let Some((name, version)) = package_manifest {
            if !name.is_empty() {
                return Self::new(name, version.unwrap_or(DEFAULT_VERSION));
            }
        }

        let dir_name = app_dir
            .file_name()
            .and_then(|s| s.to_str())
            .unwrap_or_default();

        if let Some((name, version)) = dir_name.split_once('@') {
            if !name.is_empty() && !version.is_empty() {
                return Self::new(name, version);
            }
        }

        // Nested layout: .../<name>/<version>
        let parent_name = app_dir
            .parent()
            .and_then(|p| p.file_name())
            .and_then(|s| s.to_str());
        if let Some(parent_name) = parent_name {
            if !dir_name.is_empty() && dir_name.chars().next().is_some_and(|c| c.is_ascii_digit())
            {
                return Self::new(parent_name, dir_name);
            }
        }

        Self::new(dir_name, DEFAULT_VERSION)
    }
}

impl fmt::Display for AppKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn flat_name_at_version_directory() {
        let dir = PathBuf::from("/deploys/my-app@1.2.3");
        let key = AppKey::from_app_dir(&dir, None);
        assert_eq!(key.as_str(), "my-app@1.2.3");
    }

    #[test]
    fn nested_name_version_directory() {
        let dir = PathBuf::from("/deploys/my-app/2.0.0");
        let key = AppKey::from_app_dir(&dir, None);
        assert_eq!(key.as_str(), "my-app@2.0.0");
    }

    #[test]
    fn bare_directory_defaults_version() {
        let dir = PathBuf::from("/deploys/my-app");
        let key = AppKey::from_app_dir(&dir, None);
        assert_eq!(key.as_str(), "my-app@0.0.0");
    }

    #[test]
    fn package_manifest_wins_over_directory_name() {
        let dir = PathBuf::from("/deploys/some-folder");
        let key = AppKey::from_app_dir(&dir, Some(("real-name", Some("3.1.0"))));
        assert_eq!(key.as_str(), "real-name@3.1.0");
    }

    #[test]
    fn package_manifest_missing_version_falls_back_to_default() {
        let dir = PathBuf::from("/deploys/some-folder");
        let key = AppKey::from_app_dir(&dir, Some(("real-name", None)));
        assert_eq!(key.as_str(), "real-name@0.0.0");
    }
}
