//! Endpoint Catalog Module
//!
//! Maps every known endpoint to the URI prefixes of the resources it serves.
//! Correlated leaves consult it to decide whether dereferencing an instance
//! against an endpoint can produce answers at all.

use std::collections::HashMap;
use std::fs;
use std::io::{BufRead, BufReader, Read};
use std::path::Path;

use log::debug;
use thiserror::Error;

/// Errors raised while loading an endpoint description
#[derive(Error, Debug)]
pub enum CatalogError {
    #[error("Failed to read catalog: {0}")]
    Io(#[from] std::io::Error),

    #[error("Malformed catalog line {line}: {reason}")]
    Malformed { line: usize, reason: String },
}

pub type CatalogResult<T> = Result<T, CatalogError>;

/// Lookup of the URI prefixes an endpoint can answer for
pub trait EndpointCatalog: Send + Sync {
    /// URI prefixes served by `endpoint`; empty when the endpoint is unknown
    fn endpoint_prefixes(&self, endpoint: &str) -> Vec<String>;
}

/// In-memory endpoint catalog
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    endpoints: HashMap<String, Vec<String>>,
}

impl Catalog {
    /// Create an empty catalog
    pub fn new() -> Self {
        Catalog { endpoints: HashMap::new() }
    }

    /// Register the prefixes of an endpoint, extending any previous entry
    pub fn register<I, S>(&mut self, endpoint: impl Into<String>, prefixes: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let entry = self.endpoints.entry(endpoint.into()).or_default();
        for prefix in prefixes {
            let prefix = prefix.into();
            if !entry.contains(&prefix) {
                entry.push(prefix);
            }
        }
    }

    /// Parse an endpoint description.
    ///
    /// One endpoint per line, followed by the prefixes it serves, separated
    /// by whitespace. Blank lines and lines starting with `#` are skipped.
    pub fn from_reader<R: Read>(reader: R) -> CatalogResult<Self> {
        let mut catalog = Catalog::new();
        for (idx, line) in BufReader::new(reader).lines().enumerate() {
            let line = line?;
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            let mut fields = line.split_whitespace();
            let endpoint = fields.next().ok_or_else(|| CatalogError::Malformed {
                line: idx + 1,
                reason: "missing endpoint".to_string(),
            })?;
            let prefixes: Vec<&str> = fields.collect();
            if prefixes.is_empty() {
                return Err(CatalogError::Malformed {
                    line: idx + 1,
                    reason: format!("endpoint {} lists no prefixes", endpoint),
                });
            }
            catalog.register(endpoint, prefixes);
        }
        debug!("Loaded catalog with {} endpoints", catalog.len());
        Ok(catalog)
    }

    /// Load an endpoint description file
    pub fn from_file(path: impl AsRef<Path>) -> CatalogResult<Self> {
        Self::from_reader(fs::File::open(path)?)
    }

    pub fn len(&self) -> usize {
        self.endpoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.endpoints.is_empty()
    }
}

impl EndpointCatalog for Catalog {
    fn endpoint_prefixes(&self, endpoint: &str) -> Vec<String> {
        self.endpoints.get(endpoint).cloned().unwrap_or_default()
    }
}
