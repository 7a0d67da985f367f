//! Reads the configuration tree from disk.

use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use walkdir::WalkDir;

use super::schema::{FirewallSpec, PolicySpec, RuleGroupDocument, RuleGroupSpec};
use crate::error::ConfigError;

/// Reads firewall, policy and rule group documents.
///
/// References inside documents are paths relative to `base_dir` (the
/// process working directory unless configured otherwise).
#[derive(Debug, Clone)]
pub struct ConfigReader {
    base_dir: PathBuf,
}

impl Default for ConfigReader {
    fn default() -> Self {
        Self::new(".")
    }
}

impl ConfigReader {
    pub fn new<P: AsRef<Path>>(base_dir: P) -> Self {
        Self {
            base_dir: base_dir.as_ref().to_path_buf(),
        }
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// Resolves a document reference against the base directory.
    pub fn resolve(&self, reference: &str) -> PathBuf {
        let path = Path::new(reference);
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.base_dir.join(path)
        }
    }

    /// Lists the `*.json` files directly inside `dir`, sorted by file name.
    pub fn firewall_files<P: AsRef<Path>>(&self, dir: P) -> Result<Vec<PathBuf>, ConfigError> {
        let dir = dir.as_ref();
        let dir = if dir.is_absolute() {
            dir.to_path_buf()
        } else {
            self.base_dir.join(dir)
        };
        log::debug!("Config directory path: {}", dir.display());

        if let Err(e) = std::fs::read_dir(&dir) {
            return Err(ConfigError::ReadDirectory { path: dir, source: e });
        }

        let mut files = Vec::new();
        for entry in WalkDir::new(&dir)
            .min_depth(1)
            .max_depth(1)
            .sort_by_file_name()
        {
            let entry = entry.map_err(|e| ConfigError::ReadDirectory {
                path: dir.clone(),
                source: e.into(),
            })?;
            let path = entry.path();
            if path.is_file() && path.extension().is_some_and(|ext| ext == "json") {
                files.push(path.to_path_buf());
            }
        }
        Ok(files)
    }

    fn read_json<T: DeserializeOwned>(&self, path: &Path) -> Result<T, ConfigError> {
        log::debug!("Returning object for file: {}", path.display());
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFile {
            path: path.to_path_buf(),
            source: e,
        })?;
        serde_json::from_str(&content).map_err(|e| ConfigError::ParseJson {
            path: path.to_path_buf(),
            source: e,
        })
    }

    pub fn load_firewall<P: AsRef<Path>>(&self, path: P) -> Result<FirewallSpec, ConfigError> {
        self.read_json(path.as_ref())
    }

    pub fn load_policy(&self, reference: &str) -> Result<PolicySpec, ConfigError> {
        self.read_json(&self.resolve(reference))
    }

    pub fn load_rule_group_document(
        &self,
        reference: &str,
    ) -> Result<RuleGroupDocument, ConfigError> {
        self.read_json(&self.resolve(reference))
    }

    pub fn load_rule_group(&self, reference: &str) -> Result<RuleGroupSpec, ConfigError> {
        RuleGroupSpec::try_from(self.load_rule_group_document(reference)?)
    }

    /// Reads a rule text file. Returns `None` when it is unreadable or empty.
    pub fn read_rules(&self, reference: &str) -> Option<String> {
        let path = self.resolve(reference);
        log::debug!("Returning string content for file: {}", path.display());
        match std::fs::read_to_string(&path) {
            Ok(content) if !content.is_empty() => Some(content),
            Ok(_) => None,
            Err(e) => {
                log::debug!("Error reading rules file {}: {}", path.display(), e);
                None
            }
        }
    }

    /// Loads every firewall file in `dir`.
    pub fn load_tree<P: AsRef<Path>>(
        &self,
        dir: P,
    ) -> Result<Vec<(PathBuf, FirewallSpec)>, ConfigError> {
        self.firewall_files(dir)?
            .into_iter()
            .map(|path| {
                let spec = self.load_firewall(&path)?;
                Ok((path, spec))
            })
            .collect()
    }
}
