use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use serde_json::json;
use tempfile::TempDir;
use tokio::sync::Notify;

use chainplan_core::chain::{
    Accounts, ChainClient, Receipt, SimulatedChain, SimulatedSigner, TransactionKind,
    TransactionRequest, TxHash,
};
use chainplan_core::deploy::{DeploymentPlan, Deployer};
use chainplan_core::error::{BuildError, DeployError, JournalError, TransportError};
use chainplan_core::execute::{AbortSignal, FutureOutcome, RunOptions, resolve_action};
use chainplan_core::fingerprint::fingerprint;
use chainplan_core::future::{Argument, ParamSpec, Sender};
use chainplan_core::journal::{EntryStatus, FileJournalStore, Journal};
use chainplan_core::module::{Exports, FutureOptions, Module, ModuleManifest};
use chainplan_core::params::{ParameterOverrides, ParameterStore, StaticSource};
use chainplan_core::types::{Address, FutureId, Value};

const ELEARNING: &str = r#"
root = "ElearningPlatformModule"

[modules.CertificateNFTModule.parameters]
name = { type = "string", default = "Elearning Certificate" }
symbol = { type = "string", default = "ELC" }

[[modules.CertificateNFTModule.actions]]
deploy = "CertificateNFT"
args = [{ param = "name" }, { param = "symbol" }]

[modules.CertificateNFTModule.exports]
certificateNFT = "CertificateNFT"

[modules.ElearningPlatformModule.uses]
nft = "CertificateNFTModule"

[[modules.ElearningPlatformModule.actions]]
deploy = "ElearningPlatform"
args = [{ ref = "nft.certificateNFT" }]

[[modules.ElearningPlatformModule.actions]]
call = "grantRole"
target = "nft.certificateNFT"
args = [{ bytes = "0x9f2df0fed2c77648de5860a4cc508cd0818c85b8b8a1ab4ceeef8d981c8956a6" }, { ref = "ElearningPlatform" }]

[modules.ElearningPlatformModule.exports]
elearningPlatform = "ElearningPlatform"
"#;

const NFT: &str = "CertificateNFTModule#CertificateNFT";
const PLATFORM: &str = "ElearningPlatformModule#ElearningPlatform";
const GRANT: &str = "ElearningPlatformModule#CertificateNFT.grantRole";

fn accounts() -> Accounts {
    Accounts::from_keys(&["0x01".to_string(), "0x02".to_string()], &SimulatedSigner).unwrap()
}

fn no_external() -> ParameterStore {
    ParameterStore::with_source(ParameterOverrides::new(), Arc::new(StaticSource::new()))
}

fn elearning_plan(overrides: ParameterOverrides) -> DeploymentPlan {
    let manifest = ModuleManifest::from_toml_str(ELEARNING).unwrap();
    let store = ParameterStore::with_source(overrides, Arc::new(StaticSource::new()));
    DeploymentPlan::build(&manifest.root_module(), &store).unwrap()
}

fn open_journal(path: &Path) -> Journal {
    Journal::open(FileJournalStore::open(path).unwrap()).unwrap()
}

fn deployer(chain: &Arc<SimulatedChain>) -> Deployer {
    Deployer::new(chain.clone(), accounts())
}

fn id(raw: &str) -> FutureId {
    FutureId::new(raw)
}

fn deploys_of(chain: &SimulatedChain, name: &str) -> usize {
    chain
        .submissions()
        .iter()
        .filter(|tx| matches!(&tx.kind, TransactionKind::Deploy { contract, .. } if contract == name))
        .count()
}

/// Forwards to a simulated chain but can hang selected calls forever,
/// signalling `stalled` when it does.
struct StallingChain {
    inner: Arc<SimulatedChain>,
    stall_receipts: bool,
    /// `transaction_count` calls answered before stalling.
    free_counts: AtomicUsize,
    stalled: Notify,
}

impl StallingChain {
    fn new(inner: &Arc<SimulatedChain>) -> Self {
        Self {
            inner: inner.clone(),
            stall_receipts: false,
            free_counts: AtomicUsize::new(usize::MAX),
            stalled: Notify::new(),
        }
    }

    fn stalling_receipts(mut self) -> Self {
        self.stall_receipts = true;
        self
    }

    fn stalling_counts_after(self, calls: usize) -> Self {
        self.free_counts.store(calls, Ordering::SeqCst);
        self
    }

    async fn stall<T>(&self) -> T {
        self.stalled.notify_one();
        std::future::pending().await
    }
}

#[async_trait]
impl ChainClient for StallingChain {
    async fn transaction_count(&self, account: Address) -> Result<u64, TransportError> {
        let free = self.free_counts.load(Ordering::SeqCst);
        if free == 0 {
            return self.stall().await;
        }
        if free != usize::MAX {
            self.free_counts.fetch_sub(1, Ordering::SeqCst);
        }
        self.inner.transaction_count(account).await
    }

    async fn submit(&self, tx: TransactionRequest) -> Result<TxHash, TransportError> {
        self.inner.submit(tx).await
    }

    async fn wait_for_receipt(&self, hash: &TxHash) -> Result<Receipt, TransportError> {
        if self.stall_receipts {
            return self.stall().await;
        }
        self.inner.wait_for_receipt(hash).await
    }

    async fn find_receipt(&self, hash: &TxHash) -> Result<Option<Receipt>, TransportError> {
        self.inner.find_receipt(hash).await
    }
}

async fn abort_once_stalled(chain: &StallingChain, abort: &AbortSignal) {
    chain.stalled.notified().await;
    abort.abort();
}

#[tokio::test]
async fn elearning_deploys_in_dependency_order() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("journal.jsonl");
    let chain = Arc::new(SimulatedChain::default());
    let plan = elearning_plan(ParameterOverrides::new());

    let mut journal = open_journal(&path);
    let report = deployer(&chain).deploy(&plan, &mut journal).await.unwrap();

    assert!(report.is_success(), "{report:?}");
    assert_eq!(report.transactions_submitted, 3);
    assert_eq!(chain.submission_count(), 3);

    let submissions = chain.submissions();
    assert!(matches!(
        &submissions[0].kind,
        TransactionKind::Deploy { contract, args }
            if contract == "CertificateNFT"
                && args == &vec![Value::from("Elearning Certificate"), Value::from("ELC")]
    ));
    assert!(matches!(
        &submissions[1].kind,
        TransactionKind::Deploy { contract, .. } if contract == "ElearningPlatform"
    ));

    let nft = report.outcome(&id(NFT)).and_then(|o| o.result()).cloned().unwrap();
    let platform = report
        .outcome(&id(PLATFORM))
        .and_then(|o| o.result())
        .cloned()
        .unwrap();
    let TransactionKind::Call { to, method, args } = &submissions[2].kind else {
        panic!("third transaction should be the grantRole call");
    };
    assert_eq!(method, "grantRole");
    assert_eq!(Some(*to), nft.as_address());
    assert_eq!(args[1], platform);
    assert_eq!(
        chain.contract_at(&platform.as_address().unwrap()).as_deref(),
        Some("ElearningPlatform")
    );

    let exported = report
        .outcome(&id("ElearningPlatformModule"))
        .and_then(|o| o.result())
        .cloned()
        .unwrap();
    assert_eq!(
        exported,
        Value::Map(BTreeMap::from([("elearningPlatform".to_string(), platform)]))
    );
}

#[tokio::test]
async fn second_run_submits_nothing() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("journal.jsonl");
    let chain = Arc::new(SimulatedChain::default());
    let plan = elearning_plan(ParameterOverrides::new());

    let first = deployer(&chain)
        .deploy(&plan, &mut open_journal(&path))
        .await
        .unwrap();
    assert!(first.is_success());

    let second = deployer(&chain)
        .deploy(&plan, &mut open_journal(&path))
        .await
        .unwrap();
    assert!(second.is_success());
    assert_eq!(second.transactions_submitted, 0);
    assert_eq!(chain.submission_count(), 3);
    assert!(
        second
            .outcomes
            .values()
            .all(|o| matches!(o, FutureOutcome::Skipped { .. }))
    );
    assert_eq!(first.results(), second.results());
}

#[tokio::test]
async fn lost_confirmation_is_recovered_without_resending() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("journal.jsonl");
    let chain = Arc::new(SimulatedChain::default());
    let plan = elearning_plan(ParameterOverrides::new());

    chain.lose_receipt_on("ElearningPlatform");
    let interrupted = deployer(&chain)
        .deploy(&plan, &mut open_journal(&path))
        .await
        .unwrap();
    assert!(!interrupted.is_success());
    assert!(matches!(
        interrupted.outcome(&id(PLATFORM)),
        Some(FutureOutcome::PendingUnknown { .. })
    ));
    assert!(matches!(
        interrupted.outcome(&id(GRANT)),
        Some(FutureOutcome::Blocked { on }) if on.as_str() == PLATFORM
    ));
    assert_eq!(chain.submission_count(), 2);

    let journal = open_journal(&path);
    let entry = journal.get(&id(PLATFORM)).unwrap();
    assert_eq!(entry.status, EntryStatus::Pending);
    assert!(entry.external_reference.is_some());

    chain.clear_faults();
    let resumed = deployer(&chain)
        .deploy(&plan, &mut open_journal(&path))
        .await
        .unwrap();
    assert!(resumed.is_success(), "{resumed:?}");
    assert!(matches!(
        resumed.outcome(&id(PLATFORM)),
        Some(FutureOutcome::Completed { tx_hash: Some(_), .. })
    ));
    assert!(matches!(
        resumed.outcome(&id(NFT)),
        Some(FutureOutcome::Skipped { .. })
    ));
    assert_eq!(resumed.transactions_submitted, 1);
    assert_eq!(chain.submission_count(), 3);
}

#[tokio::test]
async fn start_without_submission_is_re_executed() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("journal.jsonl");
    let chain = Arc::new(SimulatedChain::default());
    let plan = elearning_plan(ParameterOverrides::new());
    let sender = accounts().addresses()[0];

    {
        let mut journal = open_journal(&path);
        journal
            .record_start(&id(NFT), "interrupted", Some(sender), Some(0))
            .unwrap();
    }

    let report = deployer(&chain)
        .deploy(&plan, &mut open_journal(&path))
        .await
        .unwrap();
    assert!(report.is_success(), "{report:?}");
    assert_eq!(chain.submission_count(), 3);
}

#[tokio::test]
async fn consumed_nonce_without_reference_is_reported_unknown() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("journal.jsonl");
    let chain = Arc::new(SimulatedChain::default());
    let plan = elearning_plan(ParameterOverrides::new());
    let sender = accounts().addresses()[0];

    // A transaction went out with nonce 0 but the crash hit before its
    // hash reached the journal.
    chain
        .submit(TransactionRequest {
            from: sender,
            nonce: 0,
            kind: TransactionKind::Deploy {
                contract: "CertificateNFT".into(),
                args: vec![],
            },
            value: 0,
        })
        .await
        .unwrap();
    {
        let mut journal = open_journal(&path);
        journal
            .record_start(&id(NFT), "interrupted", Some(sender), Some(0))
            .unwrap();
    }

    let report = deployer(&chain)
        .deploy(&plan, &mut open_journal(&path))
        .await
        .unwrap();
    assert!(!report.is_success());
    assert!(matches!(
        report.outcome(&id(NFT)),
        Some(FutureOutcome::PendingUnknown { .. })
    ));
    assert!(matches!(
        report.outcome(&id(PLATFORM)),
        Some(FutureOutcome::Blocked { .. })
    ));
    assert_eq!(report.transactions_submitted, 0);
    assert_eq!(chain.submission_count(), 1);
}

#[tokio::test]
async fn changed_parameters_are_a_fingerprint_conflict() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("journal.jsonl");
    let chain = Arc::new(SimulatedChain::default());

    let original = elearning_plan(ParameterOverrides::new());
    deployer(&chain)
        .deploy(&original, &mut open_journal(&path))
        .await
        .unwrap();

    let changed = elearning_plan(ParameterOverrides::new().with(
        "CertificateNFTModule",
        "name",
        json!("Renamed Certificate"),
    ));
    let err = deployer(&chain)
        .deploy(&changed, &mut open_journal(&path))
        .await
        .unwrap_err();

    assert!(err.is_build_time());
    assert!(matches!(
        err,
        DeployError::Journal(JournalError::FingerprintMismatch { .. })
    ));
    assert_eq!(chain.submission_count(), 3);
}

#[tokio::test]
async fn completed_entry_over_an_unfinished_dependency_is_a_conflict() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("journal.jsonl");
    {
        let mut journal = open_journal(&path);
        journal.record_start(&id(PLATFORM), "fp", None, None).unwrap();
        journal
            .record_completion(&id(PLATFORM), Value::Address(Address::ZERO))
            .unwrap();
    }
    let chain = Arc::new(SimulatedChain::default());
    let plan = elearning_plan(ParameterOverrides::new());
    let err = deployer(&chain)
        .deploy(&plan, &mut open_journal(&path))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        DeployError::Journal(JournalError::FingerprintMismatch { future_id, current, .. })
            if future_id.as_str() == PLATFORM && current.contains(NFT)
    ));
    assert_eq!(chain.submission_count(), 0);
}

#[tokio::test]
async fn run_time_parameters_reach_the_transaction() {
    let temp = TempDir::new().unwrap();
    let params = temp.path().join("params.json");
    std::fs::write(
        &params,
        r#"{ "CertificateNFTModule": { "name": "Course Certificate" }, "$global": { "symbol": "CRT" } }"#,
    )
    .unwrap();
    let overrides = chainplan_core::params::load_parameters_file(&params).unwrap();

    let chain = Arc::new(SimulatedChain::default());
    let plan = elearning_plan(overrides);
    let report = deployer(&chain)
        .deploy(&plan, &mut Journal::in_memory())
        .await
        .unwrap();
    assert!(report.is_success());

    assert_eq!(
        chain.submissions()[0].kind,
        TransactionKind::Deploy {
            contract: "CertificateNFT".into(),
            args: vec![Value::from("Course Certificate"), Value::from("CRT")],
        }
    );
}

fn branching_module() -> Module {
    Module::new("Branches", |m| {
        let a = m.contract("A", vec![], FutureOptions::new())?;
        let b = m.contract("B", vec![], FutureOptions::new())?;
        let c = m.contract("C", vec![Argument::from(&a)], FutureOptions::new())?;
        Ok(Exports::from([
            ("a".to_string(), a),
            ("b".to_string(), b),
            ("c".to_string(), c),
        ]))
    })
}

#[tokio::test]
async fn failure_blocks_only_dependents_and_is_retried() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("journal.jsonl");
    let chain = Arc::new(SimulatedChain::default());
    let plan = DeploymentPlan::build(&branching_module(), &no_external()).unwrap();

    chain.revert_on("A");
    let failed = deployer(&chain)
        .deploy(&plan, &mut open_journal(&path))
        .await
        .unwrap();
    assert!(!failed.is_success());
    assert!(matches!(
        failed.outcome(&id("Branches#A")),
        Some(FutureOutcome::Failed { error }) if error.contains("reverted")
    ));
    assert!(matches!(
        failed.outcome(&id("Branches#C")),
        Some(FutureOutcome::Blocked { on }) if on.as_str() == "Branches#A"
    ));
    assert!(matches!(
        failed.outcome(&id("Branches#B")),
        Some(FutureOutcome::Completed { .. })
    ));
    assert_eq!(failed.transactions_submitted, 2);
    assert_eq!(chain.submission_count(), 2);

    chain.clear_faults();
    let retried = deployer(&chain)
        .deploy(&plan, &mut open_journal(&path))
        .await
        .unwrap();
    assert!(retried.is_success(), "{retried:?}");
    assert!(matches!(
        retried.outcome(&id("Branches#B")),
        Some(FutureOutcome::Skipped { .. })
    ));
    assert!(matches!(
        retried.outcome(&id("Branches#C")),
        Some(FutureOutcome::Completed { .. })
    ));
    assert_eq!(retried.transactions_submitted, 2);
    assert_eq!(chain.submission_count(), 4);
    assert_eq!(deploys_of(&chain, "A"), 2);
    assert_eq!(deploys_of(&chain, "B"), 1);
    assert_eq!(deploys_of(&chain, "C"), 1);
}

#[tokio::test]
async fn resume_sends_only_the_unexecuted_subtree() {
    let root = Module::new("Resume", |m| {
        let a = m.contract("A", vec![], FutureOptions::new())?;
        let b = m.contract("B", vec![Argument::from(&a)], FutureOptions::new())?;
        let c = m.contract("C", vec![Argument::from(&b)], FutureOptions::new())?;
        Ok(Exports::from([("c".to_string(), c)]))
    });
    let plan = DeploymentPlan::build(&root, &no_external()).unwrap();
    let chain = Arc::new(SimulatedChain::default());
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("journal.jsonl");

    // A went out and was journaled as completed; B and C never started.
    let a = plan.composition.registry.get(&id("Resume#A")).unwrap();
    let action = resolve_action(a, &BTreeMap::new(), &accounts()).unwrap();
    let hash = chain.submit(action.to_transaction(0).unwrap()).await.unwrap();
    let address = chain
        .find_receipt(&hash)
        .await
        .unwrap()
        .and_then(|receipt| receipt.contract_address)
        .unwrap();
    {
        let mut journal = open_journal(&path);
        journal
            .record_start(
                &a.id,
                &fingerprint(&a.id, &action).unwrap(),
                action.sender(),
                Some(0),
            )
            .unwrap();
        journal.record_submitted(&a.id, hash.as_str()).unwrap();
        journal
            .record_completion(&a.id, Value::Address(address))
            .unwrap();
    }

    let report = deployer(&chain)
        .deploy(&plan, &mut open_journal(&path))
        .await
        .unwrap();
    assert!(report.is_success(), "{report:?}");
    assert!(matches!(
        report.outcome(&id("Resume#A")),
        Some(FutureOutcome::Skipped { .. })
    ));
    assert_eq!(report.transactions_submitted, 2);

    let submissions = chain.submissions();
    assert_eq!(submissions.len(), 3);
    assert_eq!(
        submissions[1].kind,
        TransactionKind::Deploy {
            contract: "B".into(),
            args: vec![Value::Address(address)],
        }
    );
    assert!(matches!(
        &submissions[2].kind,
        TransactionKind::Deploy { contract, .. } if contract == "C"
    ));
    assert_eq!(deploys_of(&chain, "A"), 1);
}

fn core_module() -> Module {
    Module::new("Core", |m| {
        let a = m.contract("A", vec![], FutureOptions::new())?;
        Ok(Exports::from([("a".to_string(), a)]))
    })
}

fn extended_module() -> Module {
    Module::new("Extended", |m| {
        let core = m.use_module(&core_module())?;
        m.contract("B", vec![], FutureOptions::new())?;
        Ok(core)
    })
}

#[tokio::test]
async fn journal_from_a_reset_chain_is_refused() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("journal.jsonl");

    let first_chain = Arc::new(SimulatedChain::default());
    let v1 = DeploymentPlan::build(&core_module(), &no_external()).unwrap();
    let first = deployer(&first_chain)
        .deploy(&v1, &mut open_journal(&path))
        .await
        .unwrap();
    assert!(first.is_success());

    let fresh_chain = Arc::new(SimulatedChain::default());
    let v2 = DeploymentPlan::build(&extended_module(), &no_external()).unwrap();
    let err = deployer(&fresh_chain)
        .deploy(&v2, &mut open_journal(&path))
        .await
        .unwrap_err();
    assert!(err.is_build_time());
    assert!(matches!(
        err,
        DeployError::ChainMismatch { nonce: 0, count: 0, .. }
    ));
    assert_eq!(fresh_chain.submission_count(), 0);
}

#[tokio::test]
async fn restored_chain_continues_where_the_journal_left_off() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("journal.jsonl");

    let first_chain = Arc::new(SimulatedChain::default());
    let v1 = DeploymentPlan::build(&core_module(), &no_external()).unwrap();
    deployer(&first_chain)
        .deploy(&v1, &mut open_journal(&path))
        .await
        .unwrap();
    let snapshot = serde_json::to_string(&first_chain.snapshot()).unwrap();

    let restored = Arc::new(SimulatedChain::from_snapshot(
        serde_json::from_str(&snapshot).unwrap(),
    ));
    let v2 = DeploymentPlan::build(&extended_module(), &no_external()).unwrap();
    let report = deployer(&restored)
        .deploy(&v2, &mut open_journal(&path))
        .await
        .unwrap();
    assert!(report.is_success(), "{report:?}");
    assert_eq!(report.transactions_submitted, 1);

    assert!(matches!(
        report.outcome(&id("Core#A")),
        Some(FutureOutcome::Skipped { .. })
    ));
    assert!(report.orphaned.is_empty());
    let a = report.outcome(&id("Core#A")).and_then(|o| o.result()).cloned();
    let b = report.outcome(&id("Extended#B")).and_then(|o| o.result()).cloned();
    assert!(a.is_some() && b.is_some());
    assert_ne!(a, b);
    assert_eq!(restored.submissions()[0].nonce, 1);
}

#[tokio::test]
async fn same_account_nonces_stay_sequential_under_concurrency() {
    let root = Module::new("Parallel", |m| {
        let mut exports = Exports::new();
        for name in ["A", "B", "C", "D", "E"] {
            let future = m.contract(name, vec![], FutureOptions::new())?;
            exports.insert(name.to_lowercase(), future);
        }
        let other = m.contract(
            "F",
            vec![],
            FutureOptions::new().with_sender(Sender::Account(1)),
        )?;
        exports.insert("f".to_string(), other);
        Ok(exports)
    });
    let plan = DeploymentPlan::build(&root, &no_external()).unwrap();
    let chain = Arc::new(SimulatedChain::default());

    let report = deployer(&chain)
        .with_options(RunOptions::default().with_max_concurrency(8))
        .deploy(&plan, &mut Journal::in_memory())
        .await
        .unwrap();
    assert!(report.is_success(), "{report:?}");

    let first = accounts().addresses()[0];
    let mut nonces: Vec<u64> = chain
        .submissions()
        .iter()
        .filter(|tx| tx.from == first)
        .map(|tx| tx.nonce)
        .collect();
    nonces.sort_unstable();
    assert_eq!(nonces, vec![0, 1, 2, 3, 4]);
    assert_eq!(chain.transaction_count(accounts().addresses()[1]).await.unwrap(), 1);
}

#[tokio::test]
async fn shared_submodule_deploys_once() {
    let token = Module::new("Token", |m| {
        let token = m.contract("Token", vec![], FutureOptions::new())?;
        Ok(Exports::from([("token".to_string(), token)]))
    });
    let vault = {
        let token = token.clone();
        Module::new("Vault", move |m| {
            let t = m.use_module(&token)?;
            let vault = m.contract("Vault", vec![Argument::from(&t["token"])], FutureOptions::new())?;
            Ok(Exports::from([("vault".to_string(), vault)]))
        })
    };
    let root = Module::new("App", move |m| {
        let t = m.use_module(&token)?;
        let v = m.use_module(&vault)?;
        m.contract(
            "Router",
            vec![Argument::from(&t["token"]), Argument::from(&v["vault"])],
            FutureOptions::new(),
        )?;
        Ok(v)
    });

    let plan = DeploymentPlan::build(&root, &no_external()).unwrap();
    let chain = Arc::new(SimulatedChain::default());
    let report = deployer(&chain)
        .deploy(&plan, &mut Journal::in_memory())
        .await
        .unwrap();
    assert!(report.is_success());
    let token_deploys = chain
        .submissions()
        .iter()
        .filter(|tx| matches!(&tx.kind, TransactionKind::Deploy { contract, .. } if contract == "Token"))
        .count();
    assert_eq!(token_deploys, 1);
    assert_eq!(chain.submission_count(), 3);
}

#[tokio::test]
async fn module_cycle_aborts_before_submitting() {
    fn ping() -> Module {
        Module::new("Ping", |m| m.use_module(&pong()))
    }
    fn pong() -> Module {
        Module::new("Pong", |m| m.use_module(&ping()))
    }

    let err = DeploymentPlan::build(&ping(), &no_external()).unwrap_err();
    let BuildError::CycleDetected { members } = err else {
        panic!("expected a cycle, got {err:?}");
    };
    let names: Vec<&str> = members.iter().map(FutureId::as_str).collect();
    assert_eq!(names, vec!["Ping", "Pong", "Ping"]);
}

#[tokio::test]
async fn unknown_sender_is_a_build_error() {
    let root = Module::new("M", |m| {
        let c = m.contract("C", vec![], FutureOptions::new().with_sender(Sender::Account(5)))?;
        Ok(Exports::from([("c".to_string(), c)]))
    });
    let plan = DeploymentPlan::build(&root, &no_external()).unwrap();
    let chain = Arc::new(SimulatedChain::default());
    let err = deployer(&chain)
        .deploy(&plan, &mut Journal::in_memory())
        .await
        .unwrap_err();
    assert!(err.is_build_time());
    assert_eq!(chain.submission_count(), 0);
}

#[tokio::test]
async fn aborted_run_dispatches_nothing() {
    let abort = AbortSignal::new();
    abort.abort();
    let plan = elearning_plan(ParameterOverrides::new());
    let chain = Arc::new(SimulatedChain::default());
    let report = deployer(&chain)
        .with_options(RunOptions::default().with_abort(abort))
        .deploy(&plan, &mut Journal::in_memory())
        .await
        .unwrap();
    assert!(report.aborted);
    assert!(!report.is_success());
    assert_eq!(chain.submission_count(), 0);
    assert!(
        report
            .outcomes
            .values()
            .all(|o| matches!(o, FutureOutcome::NotStarted))
    );
}

#[tokio::test]
async fn abort_during_confirmation_leaves_a_recoverable_entry() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("journal.jsonl");
    let chain = Arc::new(SimulatedChain::default());
    let stalling = Arc::new(StallingChain::new(&chain).stalling_receipts());
    let plan = elearning_plan(ParameterOverrides::new());

    let abort = AbortSignal::new();
    let runner = Deployer::new(stalling.clone(), accounts())
        .with_options(RunOptions::default().with_abort(abort.clone()));
    let mut journal = open_journal(&path);
    let (report, ()) = tokio::join!(
        runner.deploy(&plan, &mut journal),
        abort_once_stalled(&stalling, &abort)
    );
    let report = report.unwrap();
    assert!(report.aborted);
    assert!(matches!(
        report.outcome(&id(NFT)),
        Some(FutureOutcome::PendingUnknown { .. })
    ));
    assert!(matches!(
        report.outcome(&id(PLATFORM)),
        Some(FutureOutcome::Blocked { .. })
    ));
    assert_eq!(report.transactions_submitted, 1);
    drop(journal);

    let journal = open_journal(&path);
    let entry = journal.get(&id(NFT)).unwrap();
    assert_eq!(entry.status, EntryStatus::Pending);
    assert!(entry.external_reference.is_some());

    let resumed = deployer(&chain)
        .deploy(&plan, &mut open_journal(&path))
        .await
        .unwrap();
    assert!(resumed.is_success(), "{resumed:?}");
    assert!(matches!(
        resumed.outcome(&id(NFT)),
        Some(FutureOutcome::Completed { tx_hash: Some(_), .. })
    ));
    assert_eq!(resumed.transactions_submitted, 2);
    assert_eq!(deploys_of(&chain, "CertificateNFT"), 1);
    assert_eq!(chain.submission_count(), 3);
}

#[tokio::test]
async fn abort_before_this_run_started_a_retry_is_not_unknown() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("journal.jsonl");
    let chain = Arc::new(SimulatedChain::default());
    let sender = accounts().addresses()[0];
    {
        let mut journal = open_journal(&path);
        journal
            .record_start(&id(NFT), "interrupted", Some(sender), Some(0))
            .unwrap();
    }

    // Reconciliation checks the nonce once; the lane's own query hangs.
    let stalling = Arc::new(StallingChain::new(&chain).stalling_counts_after(1));
    let plan = elearning_plan(ParameterOverrides::new());
    let abort = AbortSignal::new();
    let runner = Deployer::new(stalling.clone(), accounts())
        .with_options(RunOptions::default().with_abort(abort.clone()));
    let mut journal = open_journal(&path);
    let (report, ()) = tokio::join!(
        runner.deploy(&plan, &mut journal),
        abort_once_stalled(&stalling, &abort)
    );
    let report = report.unwrap();
    assert!(report.aborted);
    assert!(matches!(
        report.outcome(&id(NFT)),
        Some(FutureOutcome::NotStarted)
    ));
    assert_eq!(report.transactions_submitted, 0);
    assert_eq!(chain.submission_count(), 0);
}

#[tokio::test]
async fn unused_parameter_needs_no_value() {
    let root = Module::new("M", |m| {
        m.get_parameter("owner", ParamSpec::new(chainplan_core::types::ParamKind::Address))?;
        let c = m.contract("C", vec![], FutureOptions::new())?;
        Ok(Exports::from([("c".to_string(), c)]))
    });
    let plan = DeploymentPlan::build(&root, &no_external()).unwrap();
    let chain = Arc::new(SimulatedChain::default());
    let report = deployer(&chain)
        .deploy(&plan, &mut Journal::in_memory())
        .await
        .unwrap();
    assert!(report.is_success());
    assert!(report.outcome(&id("M#param.owner")).is_none());
}

#[tokio::test]
async fn orphaned_entries_are_reported() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("journal.jsonl");
    let chain = Arc::new(SimulatedChain::default());
    {
        let mut journal = open_journal(&path);
        journal
            .record_start(&id("Removed#Thing"), "fp", None, None)
            .unwrap();
        journal
            .record_completion(&id("Removed#Thing"), Value::Bool(true))
            .unwrap();
    }
    let plan = DeploymentPlan::build(&branching_module(), &no_external()).unwrap();
    let report = deployer(&chain)
        .deploy(&plan, &mut open_journal(&path))
        .await
        .unwrap();
    assert!(report.is_success());
    assert_eq!(report.orphaned, vec![id("Removed#Thing")]);
}
