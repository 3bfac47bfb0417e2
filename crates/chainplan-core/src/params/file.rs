//! Run-time parameter overrides loaded from a parameters file.
//!
//! The file is JSON keyed by module name, with an optional `$global`
//! section applying to every module:
//!
//! ```json
//! {
//!   "CertificateNFTModule": { "name": "Course Certificate" },
//!   "$global": { "symbol": "CRT" }
//! }
//! ```

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::Context;

/// Key of the section applying to every module.
pub const GLOBAL_SECTION: &str = "$global";

/// Run-time parameter values, untyped until matched with a declaration.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParameterOverrides {
    modules: BTreeMap<String, BTreeMap<String, serde_json::Value>>,
}

impl ParameterOverrides {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an override for `module` (use [`GLOBAL_SECTION`] for all modules).
    pub fn with(
        mut self,
        module: impl Into<String>,
        name: impl Into<String>,
        value: serde_json::Value,
    ) -> Self {
        self.modules
            .entry(module.into())
            .or_default()
            .insert(name.into(), value);
        self
    }

    /// Module-scoped value first, then the global section.
    pub fn get(&self, module: &str, name: &str) -> Option<&serde_json::Value> {
        self.modules
            .get(module)
            .and_then(|params| params.get(name))
            .or_else(|| {
                self.modules
                    .get(GLOBAL_SECTION)
                    .and_then(|params| params.get(name))
            })
    }

    pub fn is_empty(&self) -> bool {
        self.modules.values().all(BTreeMap::is_empty)
    }

    /// Parse the JSON parameters format.
    pub fn from_json_str(content: &str) -> anyhow::Result<Self> {
        let raw: serde_json::Value =
            serde_json::from_str(content).context("Parameters file is not valid JSON")?;
        let sections = raw
            .as_object()
            .ok_or_else(|| anyhow::anyhow!("Parameters file must be a JSON object"))?;

        let mut overrides = Self::new();
        for (module, params) in sections {
            let params = params.as_object().ok_or_else(|| {
                anyhow::anyhow!("Parameters for module '{}' must be a JSON object", module)
            })?;
            for (name, value) in params {
                overrides = overrides.with(module.clone(), name.clone(), value.clone());
            }
        }
        Ok(overrides)
    }
}

/// Load a parameters file from disk.
pub fn load_parameters_file(path: &Path) -> anyhow::Result<ParameterOverrides> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read parameters file: {}", path.display()))?;
    ParameterOverrides::from_json_str(&content)
        .with_context(|| format!("Failed to parse parameters file: {}", path.display()))
}
