//! Module composition: expands a root module into a flat registry.
//!
//! Expansion is memoized per module: using a module a second time returns
//! the futures of the first expansion, so shared sub-modules are declared
//! exactly once. Parameters are resolved lazily once every module has been
//! expanded, and only for bindings some other future actually consumes.
//! Repeated uses are compared on their resolved parameter values: passing
//! a value equal to what the first use resolved to is not a conflict.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use tracing::debug;

use crate::error::BuildError;
use crate::future::{FutureKind, FutureRef, FutureRegistry, Payload};
use crate::params::ParameterStore;
use crate::types::{FutureId, Value};

use super::builder::ModuleBuilder;
use super::{Exports, Module};

/// Result of composing a root module.
#[derive(Debug, Clone)]
pub struct Composition {
    /// Name of the root module.
    pub root: String,
    pub registry: FutureRegistry,
    /// Exports of the root module.
    pub exports: Exports,
    /// Exported logical names of every expanded module, as future ids.
    pub module_exports: BTreeMap<String, BTreeMap<String, FutureId>>,
}

impl Composition {
    /// Resolve an exported name of any expanded module.
    pub fn export(&self, module: &str, name: &str) -> Option<&FutureId> {
        self.module_exports.get(module).and_then(|m| m.get(name))
    }
}

struct Expansion {
    params: BTreeMap<String, Value>,
    /// Caller values of later uses that differ from the first one.
    repeated: Vec<BTreeMap<String, Value>>,
    declared_params: BTreeSet<String>,
    reference: FutureRef,
    exports: Exports,
}

/// Mutable state shared by every builder during one composition pass.
#[derive(Default)]
pub struct CompositionState {
    pub(crate) registry: FutureRegistry,
    expansions: HashMap<String, Expansion>,
    in_progress: Vec<String>,
}

impl CompositionState {
    /// Expand `module`, or return the memoized expansion.
    pub(crate) fn expand(
        &mut self,
        module: &Module,
        params: BTreeMap<String, Value>,
    ) -> Result<(FutureRef, Exports), BuildError> {
        let name = module.name().to_string();

        if let Some(existing) = self.expansions.get_mut(&name) {
            if let Some(unknown) = params.keys().find(|p| !existing.declared_params.contains(*p)) {
                return Err(BuildError::InvalidReference {
                    detail: format!("module has no parameter '{unknown}'"),
                    module: name,
                });
            }
            if existing.params != params && !existing.repeated.contains(&params) {
                existing.repeated.push(params);
            }
            debug!(module = name.as_str(), "reusing memoized module expansion");
            return Ok((existing.reference.clone(), existing.exports.clone()));
        }

        if let Some(start) = self.in_progress.iter().position(|m| *m == name) {
            let mut members: Vec<FutureId> = self.in_progress[start..]
                .iter()
                .map(|m| FutureId::new(m.as_str()))
                .collect();
            members.push(FutureId::new(name.as_str()));
            return Err(BuildError::CycleDetected { members });
        }

        if name.is_empty() || name.contains('#') {
            return Err(BuildError::Module {
                module: name,
                detail: "module names must be non-empty and must not contain '#'".to_string(),
            });
        }

        debug!(module = name.as_str(), "expanding module");
        self.in_progress.push(name.clone());
        let mut builder = ModuleBuilder::new(name.clone(), self, params.clone());
        let built = module.run(&mut builder);
        let (members, caller_params, declared_params) = builder.into_parts();
        self.in_progress.pop();
        let exports = built?;

        if let Some(unknown) = caller_params.keys().find(|p| !declared_params.contains(*p)) {
            return Err(BuildError::InvalidReference {
                module: name,
                detail: format!("module has no parameter '{unknown}'"),
            });
        }

        let reference_id = FutureId::new(name.as_str());
        let export_ids: BTreeMap<String, FutureId> = exports
            .iter()
            .map(|(k, v)| (k.clone(), v.id().clone()))
            .collect();
        self.registry.insert(crate::future::Future {
            id: reference_id.clone(),
            payload: Payload::ModuleReference {
                module: name.clone(),
                members,
                exports: export_ids,
            },
            after: BTreeSet::new(),
        })?;
        let reference = FutureRef::new(reference_id, FutureKind::ModuleReference);

        self.expansions.insert(
            name,
            Expansion {
                params,
                repeated: Vec::new(),
                declared_params,
                reference: reference.clone(),
                exports: exports.clone(),
            },
        );
        Ok((reference, exports))
    }
}

/// Expand `root` and resolve every consumed parameter through `store`.
pub fn compose(root: &Module, store: &ParameterStore) -> Result<Composition, BuildError> {
    let mut state = CompositionState::default();
    let (_, exports) = state.expand(root, BTreeMap::new())?;

    let module_exports: BTreeMap<String, BTreeMap<String, FutureId>> = state
        .expansions
        .iter()
        .map(|(name, expansion)| {
            let ids = expansion
                .exports
                .iter()
                .map(|(k, v)| (k.clone(), v.id().clone()))
                .collect();
            (name.clone(), ids)
        })
        .collect();

    let mut registry = state.registry;
    resolve_parameters(&mut registry, &module_exports, store)?;
    check_repeated_uses(&registry, &state.expansions, store)?;

    debug!(
        root = root.name(),
        futures = registry.len(),
        modules = module_exports.len(),
        "composition complete"
    );

    Ok(Composition {
        root: root.name().to_string(),
        registry,
        exports,
        module_exports,
    })
}

/// Resolve consumed parameter bindings; drop the ones nothing consumes.
fn resolve_parameters(
    registry: &mut FutureRegistry,
    module_exports: &BTreeMap<String, BTreeMap<String, FutureId>>,
    store: &ParameterStore,
) -> Result<(), BuildError> {
    let mut consumed: BTreeSet<FutureId> = registry
        .iter()
        .filter(|f| !matches!(f.payload, Payload::ModuleReference { .. }))
        .flat_map(|f| f.depends_on())
        .collect();
    consumed.extend(module_exports.values().flat_map(|m| m.values().cloned()));

    let params: Vec<FutureId> = registry
        .iter()
        .filter(|f| f.kind() == FutureKind::ParameterBinding)
        .map(|f| f.id.clone())
        .collect();

    let mut unused = BTreeSet::new();
    for id in params {
        if !consumed.contains(&id) {
            debug!(parameter = id.as_str(), "dropping unused parameter");
            unused.insert(id);
            continue;
        }
        let Some(future) = registry.get_mut(&id) else {
            continue;
        };
        if let Payload::Parameter(binding) = &mut future.payload {
            let (value, origin) = store.resolve(
                &binding.module,
                &binding.name,
                &binding.spec,
                binding.caller_value.as_ref(),
            )?;
            debug!(parameter = id.as_str(), ?origin, "parameter resolved");
            binding.value = Some(value);
        }
    }

    for id in &unused {
        registry.remove(id);
    }
    if !unused.is_empty() {
        let references: Vec<FutureId> = registry
            .iter()
            .filter(|f| f.kind() == FutureKind::ModuleReference)
            .map(|f| f.id.clone())
            .collect();
        for id in references {
            if let Some(future) = registry.get_mut(&id)
                && let Payload::ModuleReference { members, .. } = &mut future.payload
            {
                members.retain(|m| !unused.contains(m));
            }
        }
    }
    Ok(())
}

/// Later uses of a module must resolve every consumed parameter to the
/// value the first use produced.
fn check_repeated_uses(
    registry: &FutureRegistry,
    expansions: &HashMap<String, Expansion>,
    store: &ParameterStore,
) -> Result<(), BuildError> {
    for (module, expansion) in expansions {
        for params in &expansion.repeated {
            for name in &expansion.declared_params {
                let id = FutureId::scoped(module, &format!("param.{name}"));
                let Some(Payload::Parameter(binding)) = registry.get(&id).map(|f| &f.payload)
                else {
                    continue;
                };
                let Some(first) = &binding.value else {
                    continue;
                };
                let (value, _) = store.resolve(module, name, &binding.spec, params.get(name))?;
                if value != *first {
                    return Err(BuildError::ConflictingParameterization {
                        module: module.clone(),
                        detail: format!(
                            "parameter '{name}' resolves to {} in one use and {} in another",
                            first.display(),
                            value.display()
                        ),
                    });
                }
            }
        }
    }
    Ok(())
}
