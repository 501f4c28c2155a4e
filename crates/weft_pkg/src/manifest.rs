//! weft.toml manifest parsing.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const MANIFEST_FILE: &str = "weft.toml";

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    pub name: String,
    pub version: String,
    /// Program file, relative to the manifest's directory.
    #[serde(default = "default_program")]
    pub program: String,
    #[serde(default)]
    pub compile: CompileSettings,
    #[serde(default)]
    pub run: RunSettings,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompileSettings {
    pub unroll: bool,
    pub max_expanded_copies: usize,
}

impl Default for CompileSettings {
    fn default() -> Self {
        Self {
            unroll: true,
            max_expanded_copies: 1024,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunSettings {
    pub max_activations: usize,
}

impl Default for RunSettings {
    fn default() -> Self {
        Self {
            max_activations: 100_000,
        }
    }
}

fn default_program() -> String {
    "main.json".to_string()
}

#[derive(Debug, Error)]
pub enum ManifestError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid manifest {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("failed to encode manifest: {0}")]
    Encode(#[from] toml::ser::Error),
}

impl Manifest {
    /// A fresh manifest with default settings.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: "0.1.0".to_string(),
            program: default_program(),
            compile: CompileSettings::default(),
            run: RunSettings::default(),
        }
    }

    pub fn to_toml(&self) -> Result<String, ManifestError> {
        Ok(toml::to_string(self)?)
    }
}

pub fn load_manifest(path: &Path) -> Result<Manifest, ManifestError> {
    let s = std::fs::read_to_string(path).map_err(|source| ManifestError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    toml::from_str(&s).map_err(|source| ManifestError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

/// Nearest `weft.toml` in `start` or one of its ancestors. `start` may be a
/// file, in which case the search begins at its directory.
pub fn find_manifest(start: &Path) -> Option<PathBuf> {
    start
        .ancestors()
        .map(|dir| dir.join(MANIFEST_FILE))
        .find(|candidate| candidate.is_file())
}
