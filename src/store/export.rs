use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use crate::domain::Collection;

/// Serialized collections keyed by logical name.
///
/// A collection that failed to load is still present, as `[]`, and is
/// listed in [`ExportBundle::degraded`] together with the failure.
#[derive(Debug, Clone, Default)]
pub struct ExportBundle {
    pub files: BTreeMap<&'static str, Vec<u8>>,
    pub degraded: Vec<(Collection, String)>,
}

impl ExportBundle {
    pub fn get(&self, name: &str) -> Option<&[u8]> {
        self.files.get(name).map(Vec::as_slice)
    }

    pub fn is_complete(&self) -> bool {
        self.degraded.is_empty()
    }

    /// Write each collection to `<dir>/<name>.json`.
    pub fn write_to_dir(&self, dir: &Path) -> std::io::Result<Vec<PathBuf>> {
        fs::create_dir_all(dir)?;
        let mut written = Vec::with_capacity(self.files.len());
        for (name, bytes) in &self.files {
            let path = dir.join(format!("{}.json", name));
            fs::write(&path, bytes)?;
            written.push(path);
        }
        Ok(written)
    }
}
