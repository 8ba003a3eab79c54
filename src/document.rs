//! Reading the static startup documents (event catalog, templates).
//!
//! JSON is the native format; `.yaml`/`.yml` paths go through serde_yaml instead.

use serde::de::DeserializeOwned;
use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DocumentError {
    #[error("failed to read `{path}`: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("`{path}` is not valid JSON: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("`{path}` is not valid YAML: {source}")]
    Yaml {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
}

pub fn read_document<T: DeserializeOwned>(path: &Path) -> Result<T, DocumentError> {
    let raw = fs::read_to_string(path).map_err(|source| DocumentError::Io {
        path: path.to_path_buf(),
        source,
    })?;

    if is_yaml(path) {
        serde_yaml::from_str(&raw).map_err(|source| DocumentError::Yaml {
            path: path.to_path_buf(),
            source,
        })
    } else {
        serde_json::from_str(&raw).map_err(|source| DocumentError::Json {
            path: path.to_path_buf(),
            source,
        })
    }
}

pub fn read_json<T: DeserializeOwned, R: Read>(reader: R) -> Result<T, DocumentError> {
    serde_json::from_reader(reader).map_err(|source| DocumentError::Json {
        path: PathBuf::from("<reader>"),
        source,
    })
}

fn is_yaml(path: &Path) -> bool {
    matches!(
        path.extension().and_then(|ext| ext.to_str()),
        Some("yaml") | Some("yml")
    )
}
