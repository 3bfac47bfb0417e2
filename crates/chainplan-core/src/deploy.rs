//! Deployment pipeline: compose, validate, reconcile, execute.

use std::sync::Arc;

use serde::Serialize;
use tracing::info;

use crate::chain::{Accounts, ChainClient};
use crate::error::{BuildError, DeployError};
use crate::execute::{RunOptions, RunReport, Scheduler, reconcile};
use crate::future::{FutureKind, Payload};
use crate::graph::DependencyGraph;
use crate::journal::{EntryStatus, Journal};
use crate::module::{Composition, Module, compose};
use crate::params::ParameterStore;
use crate::types::FutureId;

/// A composed and validated deployment, ready to execute.
#[derive(Debug, Clone)]
pub struct DeploymentPlan {
    pub composition: Composition,
    pub graph: DependencyGraph,
}

impl DeploymentPlan {
    /// Compose `root` and validate its dependency graph. Nothing is
    /// submitted; any error here aborts with no side effects.
    pub fn build(root: &Module, store: &ParameterStore) -> Result<Self, BuildError> {
        let composition = compose(root, store)?;
        let graph = DependencyGraph::build(&composition.registry)?;
        info!(
            root = composition.root.as_str(),
            futures = graph.len(),
            "deployment plan built"
        );
        Ok(Self { composition, graph })
    }

    /// Every on-chain future must send from a configured account.
    pub fn validate_accounts(&self, accounts: &Accounts) -> Result<(), BuildError> {
        for future in self.composition.registry.iter() {
            let from = match &future.payload {
                Payload::Deployment { from, .. } | Payload::Call { from, .. } => *from,
                _ => continue,
            };
            accounts
                .resolve(from)
                .map_err(|detail| BuildError::InvalidReference {
                    module: future.id.module().to_string(),
                    detail: format!("'{}': {detail}", future.id),
                })?;
        }
        Ok(())
    }

    /// Number of futures that send a transaction when executed.
    pub fn onchain_count(&self) -> usize {
        self.composition
            .registry
            .iter()
            .filter(|f| f.kind().is_onchain())
            .count()
    }

    /// Journal state of every future in the plan, in execution order.
    pub fn status(&self, journal: &Journal) -> Vec<PlanStatus> {
        self.graph
            .order()
            .iter()
            .filter_map(|id| {
                let future = self.composition.registry.get(id)?;
                let entry = journal.get(id);
                Some(PlanStatus {
                    id: id.clone(),
                    kind: future.kind(),
                    description: future.describe(),
                    status: entry.map(|e| e.status),
                    result: entry.and_then(|e| e.result.as_ref()).map(|r| r.display()),
                    tx_hash: entry.and_then(|e| e.external_reference.clone()),
                })
            })
            .collect()
    }
}

/// One row of the status view.
#[derive(Debug, Clone, Serialize)]
pub struct PlanStatus {
    pub id: FutureId,
    pub kind: FutureKind,
    pub description: String,
    /// `None` if the journal has no entry yet.
    pub status: Option<EntryStatus>,
    pub result: Option<String>,
    pub tx_hash: Option<String>,
}

/// Executes deployment plans against one chain.
pub struct Deployer {
    chain: Arc<dyn ChainClient>,
    accounts: Accounts,
    options: RunOptions,
}

impl Deployer {
    pub fn new(chain: Arc<dyn ChainClient>, accounts: Accounts) -> Self {
        Self {
            chain,
            accounts,
            options: RunOptions::default(),
        }
    }

    pub fn with_options(mut self, options: RunOptions) -> Self {
        self.options = options;
        self
    }

    /// Run `plan`, resuming from whatever `journal` already records.
    ///
    /// Build-time problems (bad accounts, fingerprint mismatches, a corrupt
    /// journal) are returned as errors before anything is submitted.
    /// Per-future failures are reported in the [`RunReport`].
    pub async fn deploy(
        &self,
        plan: &DeploymentPlan,
        journal: &mut Journal,
    ) -> Result<RunReport, DeployError> {
        plan.validate_accounts(&self.accounts)?;
        let registry = &plan.composition.registry;

        let reconciliation = reconcile(
            registry,
            &plan.graph,
            journal,
            self.chain.as_ref(),
            &self.accounts,
        )
        .await?;

        Scheduler::new(
            registry,
            &plan.graph,
            journal,
            self.chain.clone(),
            &self.accounts,
        )
        .with_options(self.options.clone())
        .run(reconciliation)
        .await
    }
}
