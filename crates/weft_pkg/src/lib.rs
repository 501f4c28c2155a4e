//! Weft project configuration: the `weft.toml` manifest.

mod manifest;

pub use manifest::{
    find_manifest, load_manifest, CompileSettings, Manifest, ManifestError, RunSettings,
    MANIFEST_FILE,
};
