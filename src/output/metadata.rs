//! Optional enrichment table joined onto open endpoints
//!
//! The on-disk form is a JSON object keyed by `"ip:port"`:
//!
//! ```json
//! { "10.1.134.7:5989": { "company": "Acme", "product": "Array", "version": "1.6" } }
//! ```

use crate::network::ScanTarget;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::Path;

/// Descriptive fields for one endpoint; missing fields stay `None`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EndpointMetadata {
    pub company: Option<String>,
    pub product: Option<String>,
    pub version: Option<String>,
}

impl EndpointMetadata {
    pub fn new(company: Option<&str>, product: Option<&str>, version: Option<&str>) -> Self {
        Self {
            company: company.map(str::to_string),
            product: product.map(str::to_string),
            version: version.map(str::to_string),
        }
    }
}

/// Metadata keyed by endpoint
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetadataTable {
    records: HashMap<ScanTarget, EndpointMetadata>,
}

impl MetadataTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a table from `"ip:port"` keyed records
    ///
    /// A key that is not a valid endpoint fails the whole load.
    pub fn from_records<I, K>(records: I) -> crate::Result<Self>
    where
        I: IntoIterator<Item = (K, EndpointMetadata)>,
        K: AsRef<str>,
    {
        let mut table = Self::new();
        for (key, metadata) in records {
            let target: ScanTarget = key.as_ref().parse()?;
            table.insert(target, metadata);
        }
        Ok(table)
    }

    pub fn from_json_str(json: &str) -> crate::Result<Self> {
        let records: HashMap<String, EndpointMetadata> = serde_json::from_str(json)?;
        Self::from_records(records)
    }

    pub fn from_json_file<P: AsRef<Path>>(path: P) -> crate::Result<Self> {
        let content = fs::read_to_string(path.as_ref())?;
        let table = Self::from_json_str(&content)?;
        log::debug!(
            "Loaded {} metadata records from {}",
            table.len(),
            path.as_ref().display()
        );
        Ok(table)
    }

    pub fn insert(&mut self, target: ScanTarget, metadata: EndpointMetadata) {
        self.records.insert(target, metadata);
    }

    pub fn get(&self, target: &ScanTarget) -> Option<&EndpointMetadata> {
        self.records.get(target)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
