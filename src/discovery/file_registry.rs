use async_trait::async_trait;
use serde::Deserialize;
use std::path::PathBuf;
use tokio::fs;

use super::registry::{EndpointRecord, Registry};
use crate::errors::RegistryError;

// -----------------------------------------------------------------------------
// ----- FileRegistry ----------------------------------------------------------

/// Registry backed by a TOML file that is re-read on every query, so edits
/// show up on the next refresh:
///
/// ```toml
/// [[endpoints]]
/// service = "billing"
/// host = "10.0.0.4"
/// port = 9000
/// ```
#[derive(Debug, Clone)]
pub struct FileRegistry {
    path: PathBuf,
}

impl FileRegistry {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl Registry for FileRegistry {
    async fn query(&self, service: &str) -> Result<Vec<EndpointRecord>, RegistryError> {
        let raw = fs::read_to_string(&self.path)
            .await
            .map_err(|e| RegistryError::Io {
                path: self.path.clone(),
                source: e,
            })?;

        parse(&raw, service)
    }
}

// -----------------------------------------------------------------------------
// ----- Internal: On-disk format ----------------------------------------------

#[derive(Debug, Clone, Deserialize)]
struct RegistryFile {
    #[serde(default)]
    endpoints: Vec<RegistryFileEntry>,
}

#[derive(Debug, Clone, Deserialize)]
struct RegistryFileEntry {
    service: String,
    #[serde(alias = "host_addr")]
    host: String,
    #[serde(alias = "host_port")]
    port: u16,
}

fn parse(raw: &str, service: &str) -> Result<Vec<EndpointRecord>, RegistryError> {
    let doc: RegistryFile = toml::from_str(raw).map_err(|e| RegistryError::Toml { source: e })?;

    Ok(doc
        .endpoints
        .into_iter()
        .filter(|entry| entry.service == service)
        .map(|entry| EndpointRecord::new(entry.host, entry.port))
        .collect())
}

// -----------------------------------------------------------------------------
// ----- Tests -----------------------------------------------------------------


// -----------------------------------------------------------------------------
// -----------------------------------------------------------------------------
