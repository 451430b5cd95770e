//! Unit tests for EVM transaction submission through the core contract

use deployer::config::DEFAULT_FEE_TOKEN;
use deployer::core_contract::CoreContract;
use deployer::crypto::{EvmAddress, EvmSigner};
use deployer::evm_tx::{create_address, unpack_bytes, EthTransactionSender, TransactionRequest};
use deployer::resolver::AddressResolver;
use deployer::DeployerError;
use starknet_types_core::felt::Felt;

#[path = "helpers.rs"]
mod test_helpers;
use test_helpers::{
    contract_account_class_hash, create_client, create_default_account, felt_of, start_fake_node,
    FakeStarknetNode, DUMMY_BASE_FEE, DUMMY_EVM_PRIVATE_KEY, ETHER,
};

const CORE: u64 = 0xc0e;
const CHAIN_ID: u64 = 1_263_227_476;

/// Sender routed through a deployed core contract, with the signer's
/// companion account deployed and funded
async fn create_sender(server_uri: &str, node: &FakeStarknetNode, signer: &EvmSigner) -> EthTransactionSender {
    let client = create_client(server_uri);
    let funder = create_default_account(&client);
    node.set_balance(&funder.address(), 10 * ETHER);
    node.deploy_at(&Felt::from(CORE), &Felt::ONE);

    let core = CoreContract::new(client, Felt::from(CORE), "katana");
    let resolver = AddressResolver::new(Some(core.clone()), "katana", funder, felt_of(DEFAULT_FEE_TOKEN));
    resolver.deploy_and_fund(&signer.address(), ETHER).await.unwrap();
    EthTransactionSender::new(core, CHAIN_ID, Felt::from(10_000_000_000_000_000u64))
}

fn transfer_request() -> TransactionRequest {
    TransactionRequest {
        to: Some(EvmAddress([0x22; 20])),
        value: 1,
        gas_limit: 21_000,
        ..Default::default()
    }
}

// ============================================================================
// SUBMISSION TESTS
// ============================================================================

/// What is tested: Sending a call through eth_send_transaction
/// Why: The invocation must come from the companion account and carry the
/// packed EIP-1559 payload at the core's base fee
#[tokio::test]
async fn test_send_wraps_transaction_in_invocation() {
    let (server, node) = start_fake_node().await;
    let signer = EvmSigner::from_hex(DUMMY_EVM_PRIVATE_KEY).unwrap();
    let sender = create_sender(&server.uri(), &node, &signer).await;

    let prepared = sender.prepare(&signer.address(), &transfer_request()).await.unwrap();
    assert_eq!(prepared.nonce, 0);
    assert_eq!(prepared.chain_id, Some(CHAIN_ID));

    let outcome = sender.send(&signer, &transfer_request()).await.unwrap();
    assert!(outcome.status.is_success());
    assert!(outcome.is_success());
    assert_eq!(outcome.execution.as_ref().unwrap().gas_used, 21_000);

    let companion = FakeStarknetNode::companion_address(&Felt::from(CORE), &signer.address());
    let calls = node.calls_to("eth_send_transaction");
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].sender, companion);
    assert_eq!(calls[0].to, Felt::from(CORE));
    let payload = unpack_bytes(&calls[0].calldata).unwrap();
    assert_eq!(payload[0], 0x02);
    assert_eq!(node.nonce(&companion), 1);
    assert_eq!(sender.nonce_of(&signer.address()).await.unwrap(), 1);
    assert_eq!(sender.core().get_base_fee().await.unwrap(), DUMMY_BASE_FEE);
}

/// What is tested: A contract creation
/// Why: The created contract's companion account exists afterwards
#[tokio::test]
async fn test_creation_deploys_contract_account() {
    let (server, node) = start_fake_node().await;
    let signer = EvmSigner::from_hex(DUMMY_EVM_PRIVATE_KEY).unwrap();
    let sender = create_sender(&server.uri(), &node, &signer).await;

    let request = TransactionRequest {
        to: None,
        data: vec![0x60, 0x00, 0x60, 0x00, 0xf3],
        gas_limit: 100_000,
        ..Default::default()
    };
    let outcome = sender.send(&signer, &request).await.unwrap();
    assert!(outcome.is_success());

    let created = create_address(&signer.address(), 0);
    let account = FakeStarknetNode::companion_address(&Felt::from(CORE), &created);
    assert_eq!(node.class_at(&account), Some(contract_account_class_hash()));
}

/// What is tested: A legacy fee request
/// Why: An explicit gas price selects the legacy envelope
#[tokio::test]
async fn test_explicit_gas_price_sends_legacy() {
    let (server, node) = start_fake_node().await;
    let signer = EvmSigner::from_hex(DUMMY_EVM_PRIVATE_KEY).unwrap();
    let sender = create_sender(&server.uri(), &node, &signer).await;

    let request = TransactionRequest {
        gas_price: Some(2_000_000_000),
        ..transfer_request()
    };
    sender.send(&signer, &request).await.unwrap();
    let payload = unpack_bytes(&node.calls_to("eth_send_transaction")[0].calldata).unwrap();
    // RLP list prefix, no type byte
    assert!(payload[0] >= 0xc0);
}

// ============================================================================
// EVENT DECODING TESTS
// ============================================================================

/// What is tested: A receipt with two result events
/// Why: An ambiguous receipt must be rejected, not read from the first event
#[tokio::test]
async fn test_duplicate_result_events_rejected() {
    let (server, node) = start_fake_node().await;
    let signer = EvmSigner::from_hex(DUMMY_EVM_PRIVATE_KEY).unwrap();
    let sender = create_sender(&server.uri(), &node, &signer).await;
    node.state().duplicate_events = true;

    let err = sender.send(&signer, &transfer_request()).await.unwrap_err();
    assert!(matches!(
        err.downcast_ref::<DeployerError>(),
        Some(DeployerError::EventCount { found: 2, .. })
    ));
}

/// What is tested: Sending from an address without a companion account
/// Why: The ledger rejects the invocation and the outcome is not a success
#[tokio::test]
async fn test_send_without_companion_account_fails() {
    let (server, node) = start_fake_node().await;
    let signer = EvmSigner::from_hex(DUMMY_EVM_PRIVATE_KEY).unwrap();
    let sender = create_sender(&server.uri(), &node, &signer).await;

    let stranger = EvmSigner::from_hex(&format!("0x{}", "11".repeat(32))).unwrap();
    let outcome = sender.send(&stranger, &transfer_request()).await.unwrap();
    assert!(!outcome.status.is_success());
    assert!(outcome.execution.is_none());
    assert!(!outcome.is_success());
}
