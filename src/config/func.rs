//! Per-function configuration.
//!
//! # Responsibilities
//! - Resolve the configuration attached to a handler file
//! - Merge `faas.toml` files from the root down to the handler directory
//!
//! # Design Decisions
//! - Absence of any config file is fatal for that route (`ConfigMissing`)
//! - Within a file: `[defaults]` first, then the table named after the env
//! - Deeper files override shallower ones, tables merge recursively

use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::config::schema::Environment;
use crate::error::FuncError;

/// File name looked up in every directory between the root and the handler.
pub const CONFIG_FILE: &str = "faas.toml";

/// Merged configuration handed to a function through its context.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FuncConfig {
    values: toml::Table,
}

impl FuncConfig {
    pub fn new(values: toml::Table) -> Self {
        Self { values }
    }

    /// Look up a dotted key, e.g. `plugins.http.timeout`.
    pub fn get(&self, key: &str) -> Option<&toml::Value> {
        let mut parts = key.split('.');
        let mut current = self.values.get(parts.next()?)?;
        for part in parts {
            current = current.as_table()?.get(part)?;
        }
        Some(current)
    }

    pub fn values(&self) -> &toml::Table {
        &self.values
    }
}

/// Resolves configuration for a handler file.
pub trait ConfigLoader: Send + Sync {
    fn load(&self, root: &Path, file: &Path, env: Environment) -> Result<Arc<FuncConfig>, FuncError>;
}

/// Reads cascading `faas.toml` files.
#[derive(Debug, Clone, Default)]
pub struct FileConfigLoader;

impl FileConfigLoader {
    pub fn new() -> Self {
        Self
    }

    /// Directories from `root` down to the directory holding `file`, root first.
    fn search_dirs(root: &Path, file: &Path) -> Vec<PathBuf> {
        let mut dirs = vec![root.to_path_buf()];
        let Some(parent) = file.parent() else {
            return dirs;
        };
        let Ok(relative) = parent.strip_prefix(root) else {
            return dirs;
        };

        let mut current = root.to_path_buf();
        for component in relative.components() {
            current.push(component);
            dirs.push(current.clone());
        }
        dirs
    }
}

impl ConfigLoader for FileConfigLoader {
    fn load(&self, root: &Path, file: &Path, env: Environment) -> Result<Arc<FuncConfig>, FuncError> {
        let mut merged = toml::Table::new();
        let mut found = false;

        for dir in Self::search_dirs(root, file) {
            let path = dir.join(CONFIG_FILE);
            if !path.is_file() {
                continue;
            }
            found = true;

            let content = std::fs::read_to_string(&path)
                .map_err(|e| FuncError::ConfigMissing(format!("{}: {e}", path.display())))?;
            let table: toml::Table = content
                .parse()
                .map_err(|e| FuncError::ConfigMissing(format!("{}: {e}", path.display())))?;

            if let Some(toml::Value::Table(defaults)) = table.get("defaults") {
                deep_merge(&mut merged, defaults);
            }
            if let Some(toml::Value::Table(section)) = table.get(env.as_str()) {
                deep_merge(&mut merged, section);
            }

            tracing::trace!(path = %path.display(), env = %env, "Merged function config");
        }

        if !found {
            return Err(FuncError::ConfigMissing("No config file found".into()));
        }

        Ok(Arc::new(FuncConfig::new(merged)))
    }
}

/// Recursively merge `overlay` into `base`; non-table values replace.
pub fn deep_merge(base: &mut toml::Table, overlay: &toml::Table) {
    for (key, value) in overlay {
        match (base.get_mut(key), value) {
            (Some(toml::Value::Table(existing)), toml::Value::Table(incoming)) => {
                deep_merge(existing, incoming);
            }
            _ => {
                base.insert(key.clone(), value.clone());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn missing_config_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("a.func.ts");
        let err = FileConfigLoader::new()
            .load(dir.path(), &file, Environment::Development)
            .unwrap_err();
        assert!(matches!(err, FuncError::ConfigMissing(_)));
    }

    #[test]
    fn cascades_and_selects_env() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("api/users")).unwrap();
        fs::write(
            dir.path().join(CONFIG_FILE),
            r#"
            [defaults]
            name = "root"
            [defaults.http]
            timeout = 10
            cors = true

            [production.http]
            timeout = 30
            "#,
        )
        .unwrap();
        fs::write(
            dir.path().join("api").join(CONFIG_FILE),
            r#"
            [defaults]
            name = "api"
            "#,
        )
        .unwrap();

        let file = dir.path().join("api/users/list.func.ts");
        let loader = FileConfigLoader::new();

        let dev = loader.load(dir.path(), &file, Environment::Development).unwrap();
        assert_eq!(dev.get("name").and_then(|v| v.as_str()), Some("api"));
        assert_eq!(dev.get("http.timeout").and_then(|v| v.as_integer()), Some(10));

        let prod = loader.load(dir.path(), &file, Environment::Production).unwrap();
        assert_eq!(prod.get("http.timeout").and_then(|v| v.as_integer()), Some(30));
        assert_eq!(prod.get("http.cors").and_then(|v| v.as_bool()), Some(true));
    }

    #[test]
    fn unparsable_config_is_config_missing() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join(CONFIG_FILE), "not = [valid").unwrap();
        let err = FileConfigLoader::new()
            .load(dir.path(), &dir.path().join("x.func.ts"), Environment::Development)
            .unwrap_err();
        assert!(matches!(err, FuncError::ConfigMissing(_)));
    }
}
