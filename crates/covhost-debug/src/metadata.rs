//! Non-executing assembly metadata inspection.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::MetadataError;

/// A method as described by an assembly image's metadata.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeclaredMethod {
    pub name: String,
    pub declaring_type: String,
    #[serde(default)]
    pub source_file: String,
    #[serde(default)]
    pub line_numbers: Vec<u32>,
}

/// A type declared in an assembly image.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeclaredType {
    pub full_name: String,
    #[serde(default)]
    pub methods: Vec<DeclaredMethod>,
}

/// Reads type declarations from an assembly image without executing it.
pub trait MetadataReader: Send {
    /// Whether an image exists at `path`.
    fn exists(&self, path: &Path) -> bool {
        path.is_file()
    }

    /// Enumerate the types declared in the image at `path`.
    fn declared_types(&self, path: &Path) -> Result<Vec<DeclaredType>, MetadataError>;
}
