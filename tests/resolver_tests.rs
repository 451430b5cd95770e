//! Unit tests for the cross-VM address resolver

use std::sync::Arc;

use deployer::account::StarknetAccount;
use deployer::config::{NetworkClass, NetworkProfile, DEFAULT_FEE_TOKEN};
use deployer::core_contract::CoreContract;
use deployer::crypto::EvmAddress;
use deployer::error::is_core_not_deployed;
use deployer::funding::Funder;
use deployer::relayer::RelayerPool;
use deployer::resolver::AddressResolver;
use starknet_types_core::felt::Felt;

#[path = "helpers.rs"]
mod test_helpers;
use test_helpers::{
    create_account, create_client, create_default_account, create_default_profile, eoa_class_hash, felt_of,
    start_fake_node, FakeStarknetNode, DUMMY_EVM_ADDRESS, DUMMY_RELAYER_1, ETHER,
};

const CORE: u64 = 0xc0e;

fn evm() -> EvmAddress {
    DUMMY_EVM_ADDRESS.parse().unwrap()
}

/// Resolver against a deployed core contract, funded operator included
fn create_resolver(server_uri: &str, node: &FakeStarknetNode) -> (AddressResolver, Arc<StarknetAccount>) {
    let client = create_client(server_uri);
    let funder = create_default_account(&client);
    node.set_balance(&funder.address(), 10 * ETHER);
    node.deploy_at(&Felt::from(CORE), &Felt::from(0x1u64));
    let core = CoreContract::new(client, Felt::from(CORE), "katana");
    let resolver = AddressResolver::new(Some(core), "katana", funder.clone(), felt_of(DEFAULT_FEE_TOKEN));
    (resolver, funder)
}

// ============================================================================
// ADDRESS TESTS
// ============================================================================

/// What is tested: The companion address is deterministic
/// Why: The same EVM address must map to the same account on every call
#[tokio::test]
async fn test_companion_address_is_deterministic() {
    let (server, node) = start_fake_node().await;
    let (resolver, _) = create_resolver(&server.uri(), &node);

    let first = resolver.compute_companion_address(&evm()).await.unwrap();
    let second = resolver.compute_companion_address(&evm()).await.unwrap();
    assert_eq!(first, second);
    assert_eq!(first, FakeStarknetNode::companion_address(&Felt::from(CORE), &evm()));

    let other = resolver
        .compute_companion_address(&EvmAddress([0x11; 20]))
        .await
        .unwrap();
    assert_ne!(first, other);
}

/// What is tested: Registered address lookup with fallback
/// Why: Before registration the deterministic address is still the right answer
#[tokio::test]
async fn test_resolve_falls_back_to_computed() {
    let (server, node) = start_fake_node().await;
    let (resolver, _) = create_resolver(&server.uri(), &node);
    let expected = FakeStarknetNode::companion_address(&Felt::from(CORE), &evm());

    assert_eq!(resolver.resolve_companion_address(&evm()).await.unwrap(), expected);
    resolver.deploy_and_fund(&evm(), 0).await.unwrap();
    assert_eq!(resolver.resolve_companion_address(&evm()).await.unwrap(), expected);
}

// ============================================================================
// DEPLOY AND FUND TESTS
// ============================================================================

/// What is tested: deploy_and_fund twice
/// Why: The second call must find the account funded and deployed and send nothing
#[tokio::test]
async fn test_deploy_and_fund_is_idempotent() {
    let (server, node) = start_fake_node().await;
    let (resolver, _) = create_resolver(&server.uri(), &node);
    let amount = ETHER / 10;

    let first = resolver.deploy_and_fund(&evm(), amount).await.unwrap();
    assert_eq!(first.topped_up, amount);
    assert!(first.deployed);
    assert_eq!(node.class_at(&first.starknet_address), Some(eoa_class_hash()));
    assert_eq!(node.balance(&first.starknet_address), amount);
    let invokes = node.invoke_count();
    assert_eq!(invokes, 2);

    let second = resolver.deploy_and_fund(&evm(), amount).await.unwrap();
    assert_eq!(second.topped_up, 0);
    assert!(!second.deployed);
    assert_eq!(second.starknet_address, first.starknet_address);
    assert_eq!(node.invoke_count(), invokes);
}

/// What is tested: Partially funded companion account
/// Why: Only the missing amount is sent
#[tokio::test]
async fn test_deploy_and_fund_tops_up_difference() {
    let (server, node) = start_fake_node().await;
    let (resolver, _) = create_resolver(&server.uri(), &node);
    let address = FakeStarknetNode::companion_address(&Felt::from(CORE), &evm());
    node.set_balance(&address, 30);

    let outcome = resolver.deploy_and_fund(&evm(), 100).await.unwrap();
    assert_eq!(outcome.topped_up, 70);
    assert_eq!(node.balance(&address), 100);
}

/// What is tested: deploy_and_fund with a relayer-backed funder attached
/// Why: The top-up comes from the relayer while the operator only deploys the account
#[tokio::test]
async fn test_attached_funder_pays_top_up() {
    let (server, node) = start_fake_node().await;
    let (resolver, operator) = create_resolver(&server.uri(), &node);
    let client = create_client(&server.uri());
    let relayer = felt_of(DUMMY_RELAYER_1);
    node.set_balance(&relayer, ETHER);
    let profile = NetworkProfile {
        class: NetworkClass::Staging,
        ..create_default_profile(&server.uri())
    };
    let pool = RelayerPool::new(vec![create_account(&client, DUMMY_RELAYER_1)], felt_of(DEFAULT_FEE_TOKEN)).unwrap();
    let funder = Funder::new(client, &profile).unwrap().with_relayers(Arc::new(pool));
    let resolver = resolver.with_funder(Arc::new(funder));

    let outcome = resolver.deploy_and_fund(&evm(), ETHER / 10).await.unwrap();
    assert_eq!(outcome.topped_up, ETHER / 10);
    assert!(outcome.deployed);
    assert_eq!(node.balance(&relayer), ETHER - ETHER / 10);
    assert_eq!(node.balance(&operator.address()), 10 * ETHER);
    assert_eq!(node.calls_to("transfer")[0].sender, relayer);
    assert_eq!(node.calls_to("deploy_externally_owned_account")[0].sender, operator.address());
}

// ============================================================================
// CORE CONTRACT TESTS
// ============================================================================

/// What is tested: Resolution without a deployed core contract
/// Why: Callers must be able to tell "core missing" apart from other failures
#[tokio::test]
async fn test_missing_core_is_typed_error() {
    let (server, _node) = start_fake_node().await;
    let client = create_client(&server.uri());
    let funder = create_default_account(&client);
    let fee_token = felt_of(DEFAULT_FEE_TOKEN);

    let without_record = AddressResolver::new(None, "katana", funder.clone(), fee_token);
    let err = without_record.compute_companion_address(&evm()).await.unwrap_err();
    assert!(is_core_not_deployed(&err));

    let core = CoreContract::new(client, Felt::from(CORE), "katana");
    let without_code = AddressResolver::new(Some(core), "katana", funder, fee_token);
    let err = without_code.deploy_and_fund(&evm(), 1).await.unwrap_err();
    assert!(is_core_not_deployed(&err));
}
