//! Configuration for a proxyforge run.
//!
//! Every section has serde defaults, so a JSON file only needs the keys it
//! changes.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::classify::ClassifierConfig;
use crate::codegen::GeneratorOptions;
use crate::error::{ProxyError, Result};
use crate::formats::pe::ParseOptions;
use crate::loader::LoaderConfig;

/// Master configuration for the analysis pipeline.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProxyConfig {
    /// File and image size limits.
    pub loader: LoaderConfig,
    /// Export directory limits.
    pub parser: ParseOptions,
    /// Forwarder and data probing limits.
    pub classifier: ClassifierConfig,
    /// Naming and origin loading of the generated proxy.
    pub generator: GeneratorOptions,
}

impl ProxyConfig {
    pub fn from_json_str(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path)
            .map_err(|e| ProxyError::Config(format!("{}: {}", path.display(), e)))?;
        Self::from_json_str(&text)
    }
}
