//! Declarative module manifests.
//!
//! A manifest describes modules in TOML and compiles them into the same
//! builder calls a hand-written [`Module`] would make:
//!
//! ```toml
//! root = "ElearningPlatformModule"
//!
//! [modules.CertificateNFTModule.parameters]
//! name = { type = "string", default = "Elearning Certificate" }
//! symbol = { type = "string", default = "ELC" }
//!
//! [[modules.CertificateNFTModule.actions]]
//! deploy = "CertificateNFT"
//! args = [{ param = "name" }, { param = "symbol" }]
//!
//! [modules.CertificateNFTModule.exports]
//! certificateNFT = "CertificateNFT"
//!
//! [modules.ElearningPlatformModule.uses]
//! nft = "CertificateNFTModule"
//!
//! [[modules.ElearningPlatformModule.actions]]
//! deploy = "ElearningPlatform"
//! args = [{ ref = "nft.certificateNFT" }]
//! ```
//!
//! Argument forms: `{ param = "x" }`, `{ ref = "local" }`,
//! `{ ref = "alias.export" }`, `{ address = "0x.." }`, `{ bytes = "0x.." }`,
//! `{ number = "123" }`, or bare strings, integers, booleans and arrays.

use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use serde::Deserialize;

use crate::config::parser::enhance_toml_error;
use crate::error::BuildError;
use crate::future::{Argument, FutureRef, ParamSpec, Sender};
use crate::types::{Address, ParamKind, Value};

use super::{Exports, FutureOptions, Module, ModuleBuilder};

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
struct ManifestFile {
    root: String,
    #[serde(default)]
    modules: BTreeMap<String, ModuleSpec>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct ModuleSpec {
    #[serde(default)]
    parameters: BTreeMap<String, ParamDecl>,
    #[serde(default)]
    uses: BTreeMap<String, UseSpec>,
    #[serde(default)]
    actions: Vec<ActionSpec>,
    #[serde(default)]
    exports: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
struct ParamDecl {
    #[serde(rename = "type")]
    kind: ParamKind,
    #[serde(default)]
    default: Option<toml::Value>,
    #[serde(default)]
    source: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum UseSpec {
    Name(String),
    Table {
        module: String,
        #[serde(default)]
        parameters: BTreeMap<String, toml::Value>,
    },
}

impl UseSpec {
    fn module(&self) -> &str {
        match self {
            UseSpec::Name(name) => name,
            UseSpec::Table { module, .. } => module,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
struct ActionSpec {
    #[serde(default)]
    deploy: Option<String>,
    #[serde(default)]
    call: Option<String>,
    #[serde(default)]
    target: Option<String>,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    args: Vec<ArgSpec>,
    #[serde(default)]
    after: Vec<String>,
    #[serde(default)]
    from: Option<SenderSpec>,
    #[serde(default)]
    value: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum SenderSpec {
    Index(usize),
    Address(String),
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum ArgSpec {
    Tagged(TaggedArg),
    Bool(bool),
    Integer(u64),
    Text(String),
    Array(Vec<ArgSpec>),
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "lowercase", deny_unknown_fields)]
enum TaggedArg {
    Param(String),
    Ref(String),
    Address(String),
    Bytes(String),
    Number(String),
}

/// Parsed manifest; hands out [`Module`]s for its declarations.
#[derive(Debug, Clone)]
pub struct ModuleManifest {
    inner: Arc<ManifestFile>,
}

impl ModuleManifest {
    /// Parse manifest TOML and validate its module graph.
    pub fn from_toml_str(content: &str) -> anyhow::Result<Self> {
        let file: ManifestFile =
            toml::from_str(content).map_err(|e| enhance_toml_error(e, content))?;
        let manifest = Self {
            inner: Arc::new(file),
        };
        manifest.validate()?;
        Ok(manifest)
    }

    pub fn root_name(&self) -> &str {
        &self.inner.root
    }

    pub fn module_names(&self) -> impl Iterator<Item = &str> {
        self.inner.modules.keys().map(String::as_str)
    }

    /// The module the manifest deploys.
    pub fn root_module(&self) -> Module {
        self.module(&self.inner.root)
    }

    /// Module for a declared name. Declarations are interpreted when the
    /// module is expanded.
    pub fn module(&self, name: &str) -> Module {
        let manifest = self.clone();
        let module_name = name.to_string();
        Module::new(name, move |builder| manifest.build(&module_name, builder))
    }

    fn validate(&self) -> anyhow::Result<()> {
        let modules = &self.inner.modules;
        if !modules.contains_key(&self.inner.root) {
            anyhow::bail!("Root module '{}' is not declared", self.inner.root);
        }
        for (name, spec) in modules {
            for (alias, used) in &spec.uses {
                if !modules.contains_key(used.module()) {
                    anyhow::bail!(
                        "Module '{}' uses unknown module '{}' (alias '{}')",
                        name,
                        used.module(),
                        alias
                    );
                }
            }
            for (index, action) in spec.actions.iter().enumerate() {
                match (&action.deploy, &action.call, &action.target) {
                    (Some(_), None, None) | (None, Some(_), Some(_)) => {}
                    (None, Some(_), None) => anyhow::bail!(
                        "Action {} of module '{}' calls a method without a target",
                        index + 1,
                        name
                    ),
                    _ => anyhow::bail!(
                        "Action {} of module '{}' must set exactly one of 'deploy' or 'call'",
                        index + 1,
                        name
                    ),
                }
            }
        }
        Ok(())
    }

    fn build(&self, name: &str, m: &mut ModuleBuilder<'_>) -> Result<Exports, BuildError> {
        let invalid = |detail: String| BuildError::InvalidReference {
            module: name.to_string(),
            detail,
        };
        let spec = self
            .inner
            .modules
            .get(name)
            .ok_or_else(|| invalid(format!("module '{name}' is not declared")))?;

        let mut params: HashMap<&str, FutureRef> = HashMap::new();
        for (param, decl) in &spec.parameters {
            let mut param_spec = ParamSpec::new(decl.kind);
            if let Some(default) = &decl.default {
                param_spec = param_spec.with_default(toml_to_value(default).map_err(&invalid)?);
            }
            if let Some(source) = &decl.source {
                param_spec = param_spec.with_source(source);
            }
            params.insert(param.as_str(), m.get_parameter(param, param_spec)?);
        }

        let mut used: HashMap<&str, Exports> = HashMap::new();
        for (alias, use_spec) in &spec.uses {
            let sub = self.module(use_spec.module());
            let exports = match use_spec {
                UseSpec::Name(_) => m.use_module(&sub)?,
                UseSpec::Table { parameters, .. } => {
                    let values = parameters
                        .iter()
                        .map(|(k, v)| toml_to_value(v).map(|v| (k.clone(), v)))
                        .collect::<Result<BTreeMap<_, _>, _>>()
                        .map_err(&invalid)?;
                    m.use_module_with(&sub, values)?
                }
            };
            used.insert(alias.as_str(), exports);
        }

        let mut locals: HashMap<String, FutureRef> = HashMap::new();
        let scope = Scope {
            params: &params,
            used: &used,
        };
        for action in &spec.actions {
            let args = action
                .args
                .iter()
                .map(|arg| scope.argument(arg, &locals))
                .collect::<Result<Vec<_>, _>>()
                .map_err(&invalid)?;
            let mut options = FutureOptions::new();
            if let Some(id) = &action.id {
                options = options.with_id(id);
            }
            for hint in &action.after {
                let future = scope.reference(hint, &locals).map_err(&invalid)?;
                options = options.after(&future);
            }
            if let Some(from) = &action.from {
                options = options.with_sender(sender(from).map_err(&invalid)?);
            }
            if let Some(value) = action.value {
                options = options.with_value(u128::from(value));
            }

            let future = match (&action.deploy, &action.call, &action.target) {
                (Some(contract), _, _) => m.contract(contract, args, options)?,
                (None, Some(method), Some(target)) => {
                    let target = scope.reference(target, &locals).map_err(&invalid)?;
                    m.call(&target, method, args, options)?
                }
                _ => return Err(invalid("action without 'deploy' or 'call'".to_string())),
            };
            let local = future
                .id()
                .as_str()
                .split_once('#')
                .map(|(_, local)| local.to_string())
                .unwrap_or_else(|| future.id().to_string());
            locals.insert(local, future);
        }

        let mut exports = Exports::new();
        for (export, reference) in &spec.exports {
            let future = scope.reference(reference, &locals).map_err(&invalid)?;
            exports.insert(export.clone(), future);
        }
        Ok(exports)
    }
}

struct Scope<'a> {
    params: &'a HashMap<&'a str, FutureRef>,
    used: &'a HashMap<&'a str, Exports>,
}

impl Scope<'_> {
    fn reference(
        &self,
        reference: &str,
        locals: &HashMap<String, FutureRef>,
    ) -> Result<FutureRef, String> {
        if let Some(future) = locals.get(reference) {
            return Ok(future.clone());
        }
        if let Some((alias, export)) = reference.split_once('.')
            && let Some(exports) = self.used.get(alias)
        {
            return exports
                .get(export)
                .cloned()
                .ok_or_else(|| format!("module used as '{alias}' has no export '{export}'"));
        }
        Err(format!("unknown reference '{reference}'"))
    }

    fn argument(
        &self,
        arg: &ArgSpec,
        locals: &HashMap<String, FutureRef>,
    ) -> Result<Argument, String> {
        Ok(match arg {
            ArgSpec::Tagged(TaggedArg::Param(name)) => self
                .params
                .get(name.as_str())
                .map(Argument::from)
                .ok_or_else(|| format!("unknown parameter '{name}'"))?,
            ArgSpec::Tagged(TaggedArg::Ref(reference)) => {
                Argument::from(self.reference(reference, locals)?)
            }
            ArgSpec::Tagged(TaggedArg::Address(raw)) => {
                Argument::Value(ParamKind::Address.parse_str(raw)?)
            }
            ArgSpec::Tagged(TaggedArg::Bytes(raw)) => {
                Argument::Value(ParamKind::Bytes.parse_str(raw)?)
            }
            ArgSpec::Tagged(TaggedArg::Number(raw)) => {
                Argument::Value(ParamKind::Number.parse_str(raw)?)
            }
            ArgSpec::Bool(b) => Argument::Value(Value::Bool(*b)),
            ArgSpec::Integer(n) => Argument::Value(Value::Number(u128::from(*n))),
            ArgSpec::Text(s) => Argument::Value(Value::String(s.clone())),
            ArgSpec::Array(items) => Argument::Array(
                items
                    .iter()
                    .map(|item| self.argument(item, locals))
                    .collect::<Result<Vec<_>, _>>()?,
            ),
        })
    }
}

fn sender(spec: &SenderSpec) -> Result<Sender, String> {
    match spec {
        SenderSpec::Index(index) => Ok(Sender::Account(*index)),
        SenderSpec::Address(raw) => raw.parse::<Address>().map(Sender::Address),
    }
}

fn toml_to_value(value: &toml::Value) -> Result<Value, String> {
    match value {
        toml::Value::String(s) => Ok(Value::String(s.clone())),
        toml::Value::Integer(n) => u128::try_from(*n)
            .map(Value::Number)
            .map_err(|_| format!("negative numbers are not supported: {n}")),
        toml::Value::Boolean(b) => Ok(Value::Bool(*b)),
        toml::Value::Array(items) => items
            .iter()
            .map(toml_to_value)
            .collect::<Result<Vec<_>, _>>()
            .map(Value::Array),
        other => Err(format!("unsupported value: {other}")),
    }
}

/// Load a manifest file from disk.
pub fn load_manifest(path: &Path) -> anyhow::Result<ModuleManifest> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read module manifest: {}", path.display()))?;
    ModuleManifest::from_toml_str(&content)
        .with_context(|| format!("Failed to parse module manifest: {}", path.display()))
}
