//! Interface enumeration from `/sys/class/net`.

use std::path::PathBuf;

use async_trait::async_trait;

use camfleet_core::{CoreError, InterfaceSource};

/// Lists the entries of a sysfs `net` class directory, sorted by name.
pub struct SysfsInterfaces {
    root: PathBuf,
}

impl SysfsInterfaces {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

#[async_trait]
impl InterfaceSource for SysfsInterfaces {
    async fn interfaces(&self) -> Result<Vec<String>, CoreError> {
        let failed = |e: std::io::Error| CoreError::InterfaceEnumeration {
            reason: format!("{}: {e}", self.root.display()),
        };

        let mut entries = tokio::fs::read_dir(&self.root).await.map_err(failed)?;
        let mut names = Vec::new();
        while let Some(entry) = entries.next_entry().await.map_err(failed)? {
            if let Some(name) = entry.file_name().to_str() {
                names.push(name.to_owned());
            }
        }
        names.sort();
        Ok(names)
    }
}
