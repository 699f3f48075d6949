use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::error::LoadError;

/// Shader sources read during loading, keyed by path
///
/// Several programs share sources, so each file is read once per cycle. `clear` forgets everything
/// so that edited files are picked up by a shader reload.
#[derive(Debug, Default)]
pub struct ShaderCache {
    sources: HashMap<PathBuf, String>,
}

impl ShaderCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn source(&mut self, path: &Path) -> Result<&str, LoadError> {
        if !self.sources.contains_key(path) {
            let text = std::fs::read_to_string(path).map_err(|source| {
                if source.kind() == std::io::ErrorKind::NotFound {
                    LoadError::MissingFile(path.to_owned())
                } else {
                    LoadError::Io {
                        path: path.to_owned(),
                        source,
                    }
                }
            })?;
            log::trace!("read shader {}", path.display());
            self.sources.insert(path.to_owned(), text);
        }
        Ok(&self.sources[path])
    }

    pub fn clear(&mut self) {
        self.sources.clear();
    }

    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }
}
