//! Integration tests for the deployment pipeline

use std::path::{Path, PathBuf};

use deployer::config::{NetworkClass, NetworkProfile, RelayerCredentials};
use deployer::crypto::{EvmAddress, EvmSigner};
use deployer::deployment::{
    evm_signer_from_env, ArtifactStore, DeploymentPipeline, DeploymentPlan, DeploymentStore, ReportStatus,
};
use deployer::DeployerError;
use starknet_types_core::felt::Felt;

#[path = "helpers.rs"]
mod test_helpers;
use test_helpers::{
    contract_account_class_hash, create_default_profile, eoa_class_hash, felt_of, start_fake_node, temp_dir,
    write_artifact, FakeStarknetNode, DUMMY_ACCOUNT_ADDRESS, DUMMY_EVM_PRIVATE_KEY, DUMMY_PRIVATE_KEY,
    DUMMY_RELAYER_1, ETHER,
};

/// Keyless deployment of the deterministic CREATE2 factory
const CREATE2_DEPLOYER_RAW: &str = "0xf8a58085174876e800830186a08080b853604580600e600039806000f350fe7fffffffffffffffffffffffffffffffffffffffffffffffffffffffffffffffe03601600081602082378035828234f58015156039578182fd5b8082525050506014600cf31ba02222222222222222222222222222222222222222222222222222222222222222a02222222222222222222222222222222222222222222222222222222222222222";
const CREATE2_DEPLOYER_SENDER: &str = "0x3fab184622dc19b6109349b94811493bf2a45362";
const CREATE2_DEPLOYER_ADDRESS: &str = "0x4e59b44847b379578588920ca78fbf26c0b4956c";

// ============================================================================
// HELPER FUNCTIONS
// ============================================================================

fn full_plan() -> String {
    format!(
        r#"
classes = ["core", "account", "helper"]

[core]
name = "core"
class = "core"
constructor = ["$account", "$fee_token", "$class:account", "$chain_id"]
class_hash_setters = [{{ entrypoint = "set_account_contract_class_hash", class = "account" }}]

[[singleton]]
name = "helper"
class = "helper"
salt = "0x1"

[[invocation]]
contract = "$contract:core"
entrypoint = "set_base_fee"
calldata = ["2000000000"]
check = "get_base_fee"

[[invocation]]
contract = "$contract:core"
entrypoint = "set_coinbase"
calldata = ["$account"]
check = "get_coinbase"

[[presigned]]
name = "create2_deployer"
raw = "{}"
fund_amount = "0.1"

[evm]
private_key_env = "PIPELINE_TEST_UNSET_EVM_KEY"
fund_amount = "0.5"

[[evm_deployment]]
name = "storage"
bytecode = "0x600160005560016000f3"
gas_limit = 100000
"#,
        CREATE2_DEPLOYER_RAW
    )
}

/// Build directory with every class of the plan compiled at `version`
fn prepare_workspace(tag: &str, plan: &DeploymentPlan, version: u64) -> PathBuf {
    let dir = temp_dir(tag);
    for class in &plan.classes {
        write_artifact(&dir.join("build"), class, version);
    }
    dir
}

fn create_pipeline(server_uri: &str, plan: DeploymentPlan, dir: &Path) -> DeploymentPipeline {
    DeploymentPipeline::new(
        create_default_profile(server_uri),
        plan,
        ArtifactStore::new(dir.join("build")),
        DeploymentStore::new(dir.join("deployments"), "katana"),
    )
    .unwrap()
    .with_plan_dir(dir)
}

fn statuses<'a>(reports: impl IntoIterator<Item = &'a deployer::deployment::ContractReport>) -> Vec<ReportStatus> {
    reports.into_iter().map(|r| r.status).collect()
}

// ============================================================================
// FULL RUN TESTS
// ============================================================================

/// What is tested: A full plan against an empty network, then a second run
/// Why: Every phase must land on the first run and be a no-op on the second
#[tokio::test]
async fn test_full_plan_then_idempotent_rerun() {
    let (server, node) = start_fake_node().await;
    node.set_balance(&felt_of(DUMMY_ACCOUNT_ADDRESS), 10 * ETHER);
    let plan = DeploymentPlan::from_toml(&full_plan()).unwrap();
    let dir = prepare_workspace("pipeline-full", &plan, 1);
    let signer = EvmSigner::from_hex(DUMMY_EVM_PRIVATE_KEY).unwrap();

    let pipeline = create_pipeline(&server.uri(), plan.clone(), &dir).with_evm_signer(signer.clone());
    let summary = pipeline.run().await.unwrap();

    assert_eq!(summary.network, "katana");
    assert!(summary.finished_at.is_some());
    assert_eq!(statuses(&summary.declarations), vec![ReportStatus::Declared; 3]);
    assert_eq!(statuses(&summary.contracts), vec![ReportStatus::Deployed; 2]);
    assert!(summary.invocations_transaction.is_some());
    assert_eq!(node.calls_to("set_base_fee").len(), 1);
    assert_eq!(node.calls_to("set_coinbase")[0].calldata, vec![felt_of(DUMMY_ACCOUNT_ADDRESS)]);

    // Core constructor resolved against the run's own values
    let core = summary.contract("core").unwrap();
    let core_address = felt_of(core.address.as_deref().unwrap());
    let account_class = felt_of(summary.declarations[1].class_hash.as_deref().unwrap());
    let deploy = &node.calls_to("deployContract")[0];
    assert_eq!(
        deploy.calldata[4..],
        [
            felt_of(DUMMY_ACCOUNT_ADDRESS),
            felt_of(deployer::config::DEFAULT_FEE_TOKEN),
            account_class,
            Felt::from(1263227476u64),
        ]
    );

    // Replay created the factory at its well-known address
    assert_eq!(statuses(&summary.replays), vec![ReportStatus::Replayed]);
    assert_eq!(summary.replays[0].evm_address.as_deref(), Some(CREATE2_DEPLOYER_ADDRESS));
    let sender: EvmAddress = CREATE2_DEPLOYER_SENDER.parse().unwrap();
    let factory: EvmAddress = CREATE2_DEPLOYER_ADDRESS.parse().unwrap();
    assert_eq!(
        node.class_at(&FakeStarknetNode::companion_address(&core_address, &sender)),
        Some(eoa_class_hash())
    );
    assert_eq!(
        node.class_at(&FakeStarknetNode::companion_address(&core_address, &factory)),
        Some(contract_account_class_hash())
    );

    // EVM deployment from the deployer key, funded up to the plan amount
    assert_eq!(statuses(&summary.evm_deployments), vec![ReportStatus::Deployed]);
    let deployer_companion = FakeStarknetNode::companion_address(&core_address, &signer.address());
    assert_eq!(node.balance(&deployer_companion), ETHER / 2);
    let created = deployer::evm_tx::create_address(&signer.address(), 0);
    assert_eq!(summary.evm_deployments[0].evm_address, Some(created.to_string()));

    let store = DeploymentStore::new(dir.join("deployments"), "katana");
    let records = store.load_deployments().unwrap();
    assert_eq!(records.len(), 4);
    assert_eq!(records["storage"].artifact, "inline:storage");
    assert_eq!(records["create2_deployer"].evm_address, Some(factory));

    // Second run changes nothing on chain
    let declares = node.declare_count();
    let deploys = node.calls_to("deployContract").len();
    let sends = node.calls_to("eth_send_transaction").len();
    let pipeline = create_pipeline(&server.uri(), plan, &dir).with_evm_signer(signer);
    let rerun = pipeline.run().await.unwrap();

    assert_eq!(statuses(&rerun.declarations), vec![ReportStatus::AlreadyDeclared; 3]);
    assert_eq!(statuses(&rerun.contracts), vec![ReportStatus::UpToDate; 2]);
    assert_eq!(statuses(&rerun.replays), vec![ReportStatus::Skipped]);
    assert_eq!(statuses(&rerun.evm_deployments), vec![ReportStatus::Skipped]);
    assert_eq!(node.declare_count(), declares);
    assert_eq!(node.calls_to("deployContract").len(), deploys);
    assert_eq!(node.calls_to("eth_send_transaction").len(), sends);
    assert_eq!(node.calls_to("set_base_fee").len(), 1);
    assert_eq!(node.calls_to("set_coinbase").len(), 1);
    assert!(rerun.invocations_transaction.is_none());
    assert_eq!(rerun.invocations_skipped, vec!["set_base_fee", "set_coinbase"]);
}

/// What is tested: Invocations with and without an applied check
/// Why: Only checked invocations whose state already matches are skipped
#[tokio::test]
async fn test_invocation_checks_skip_applied_state() {
    let (server, node) = start_fake_node().await;
    let plan = DeploymentPlan::from_toml(
        r#"
classes = ["core"]

[core]
name = "core"
class = "core"

[[invocation]]
contract = "$contract:core"
entrypoint = "set_base_fee"
calldata = ["1000000000"]
check = "get_base_fee"

[[invocation]]
contract = "$contract:core"
entrypoint = "set_coinbase"
calldata = ["$account"]
"#,
    )
    .unwrap();
    let dir = prepare_workspace("pipeline-invocation-checks", &plan, 1);

    // The fake core starts at the requested base fee
    let summary = create_pipeline(&server.uri(), plan, &dir).run().await.unwrap();
    assert_eq!(summary.invocations_skipped, vec!["set_base_fee"]);
    assert!(summary.invocations_transaction.is_some());
    assert!(node.calls_to("set_base_fee").is_empty());
    assert_eq!(node.calls_to("set_coinbase").len(), 1);
}

/// What is tested: A replay on a network whose profile lists relayers
/// Why: Companion top-ups must come from the relayer pool, not the operator
#[tokio::test]
async fn test_profile_relayers_fund_companions() {
    let (server, node) = start_fake_node().await;
    let relayer = felt_of(DUMMY_RELAYER_1);
    node.set_balance(&relayer, ETHER);
    let plan = DeploymentPlan::from_toml(&format!(
        r#"
classes = ["core"]

[core]
name = "core"
class = "core"

[[presigned]]
name = "create2_deployer"
raw = "{}"
fund_amount = "0.1"
"#,
        CREATE2_DEPLOYER_RAW
    ))
    .unwrap();
    let dir = prepare_workspace("pipeline-relayers", &plan, 1);
    let profile = NetworkProfile {
        relayers: vec![RelayerCredentials {
            address: relayer,
            private_key: felt_of(DUMMY_PRIVATE_KEY),
        }],
        ..create_default_profile(&server.uri())
    };

    let pipeline = DeploymentPipeline::new(
        profile,
        plan,
        ArtifactStore::new(dir.join("build")),
        DeploymentStore::new(dir.join("deployments"), "katana"),
    )
    .unwrap();
    let summary = pipeline.run().await.unwrap();
    assert_eq!(statuses(&summary.replays), vec![ReportStatus::Replayed]);

    let core = felt_of(summary.contract("core").unwrap().address.as_deref().unwrap());
    let sender: EvmAddress = CREATE2_DEPLOYER_SENDER.parse().unwrap();
    let companion = FakeStarknetNode::companion_address(&core, &sender);
    let transfers = node.calls_to("transfer");
    assert_eq!(transfers.len(), 1);
    assert_eq!(transfers[0].sender, relayer);
    assert_eq!(transfers[0].calldata[0], companion);
    assert_eq!(node.balance(&relayer), ETHER - ETHER / 10);
    assert_eq!(node.balance(&felt_of(DUMMY_ACCOUNT_ADDRESS)), 0);
}

/// What is tested: Re-running after the core class changed
/// Why: The core is upgraded in place and its class-hash setters follow
#[tokio::test]
async fn test_changed_class_upgrades_core() {
    let (server, node) = start_fake_node().await;
    let plan = DeploymentPlan::from_toml(
        r#"
classes = ["core", "account"]

[core]
name = "core"
class = "core"
constructor = ["$class:account"]
class_hash_setters = [{ entrypoint = "set_account_contract_class_hash", class = "account" }]
"#,
    )
    .unwrap();
    let dir = prepare_workspace("pipeline-upgrade", &plan, 1);

    let first = create_pipeline(&server.uri(), plan.clone(), &dir).run().await.unwrap();
    let address = first.contract("core").unwrap().address.clone();

    for class in &plan.classes {
        write_artifact(&dir.join("build"), class, 2);
    }
    let second = create_pipeline(&server.uri(), plan, &dir).run().await.unwrap();
    let core = second.contract("core").unwrap();
    assert_eq!(core.status, ReportStatus::Upgraded);
    assert_eq!(core.address, address);
    assert_eq!(statuses(&second.declarations), vec![ReportStatus::Declared; 2]);

    let setter = node.calls_to("set_account_contract_class_hash");
    assert_eq!(setter.len(), 1);
    assert_eq!(setter[0].calldata, vec![felt_of(second.declarations[1].class_hash.as_deref().unwrap())]);
}

// ============================================================================
// FAILURE TESTS
// ============================================================================

/// What is tested: EVM deployments without a deployer key
/// Why: The run stops with a configuration error and keeps earlier records
#[tokio::test]
async fn test_missing_evm_key_keeps_earlier_records() {
    let (server, _node) = start_fake_node().await;
    let plan = DeploymentPlan::from_toml(
        r#"
classes = ["core"]

[core]
name = "core"
class = "core"

[[evm_deployment]]
name = "storage"
bytecode = "0x00"
"#,
    )
    .unwrap();
    let dir = prepare_workspace("pipeline-no-key", &plan, 1);

    let err = create_pipeline(&server.uri(), plan, &dir).run().await.unwrap_err();
    assert!(matches!(err.downcast_ref::<DeployerError>(), Some(DeployerError::Config(_))));

    let store = DeploymentStore::new(dir.join("deployments"), "katana");
    assert!(store.load_deployments().unwrap().contains_key("core"));
    assert!(store.load_declarations().unwrap().contains_key("core"));
}

/// What is tested: Loading a plan whose singleton uses an unplanned class
/// Why: Plan mistakes are caught before anything is sent
#[test]
fn test_plan_with_unplanned_class_rejected() {
    let err = DeploymentPlan::from_toml(
        r#"
classes = ["core"]

[[singleton]]
name = "helper"
class = "helper"
"#,
    )
    .unwrap_err();
    assert!(format!("{:#}", err).contains("does not declare"));
}

/// What is tested: The shipped deployment template
/// Why: The template must stay a valid plan
#[test]
fn test_template_plan_parses() {
    let plan = DeploymentPlan::load_from_path(Some("config/deployment.template.toml")).unwrap();
    assert_eq!(plan.classes.len(), 4);
    assert_eq!(plan.core.as_ref().unwrap().class_hash_setters.len(), 2);
    assert_eq!(plan.invocations.len(), 2);
    assert_eq!(plan.presigned[0].name, "create2_deployer");
}

// ============================================================================
// EVM KEY TESTS
// ============================================================================

/// What is tested: EVM key resolution without the configured variable
/// Why: Development networks reuse the operator key, others get no key
#[test]
fn test_evm_signer_fallback_on_development_only() {
    let plan = DeploymentPlan::from_toml(&full_plan()).unwrap();
    let development = create_default_profile("http://127.0.0.1:5050");
    assert!(evm_signer_from_env(&plan, &development).unwrap().is_some());

    let staging = deployer::config::NetworkProfile {
        class: NetworkClass::Staging,
        ..create_default_profile("http://127.0.0.1:5050")
    };
    assert!(evm_signer_from_env(&plan, &staging).unwrap().is_none());
}
