//! Shared test helpers for deployer integration tests
//!
//! Constants, builders and a stateful fake Starknet node served through
//! wiremock. The fake node keeps declared classes, deployed contracts, nonces,
//! fee-token balances and receipts, and applies the handful of entry points
//! this crate calls.

#![allow(dead_code)]

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use deployer::account::{LocalSigner, StarknetAccount};
use deployer::chains::StarknetClient;
use deployer::config::{NetworkClass, NetworkProfile, PollPolicy, DEFAULT_FEE_TOKEN};
use deployer::crypto::{parse_felt, selector, EvmAddress};
use deployer::evm_tx::{create_address, unpack_bytes, RlpItem};
use serde_json::{json, Value};
use starknet_core::types::FlattenedSierraClass;
use starknet_core::utils::get_contract_address;
use starknet_types_core::felt::Felt;
use wiremock::matchers::method;
use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

// ============================================================================
// CONSTANTS
// ============================================================================

// ------------------------------- ACCOUNTS -------------------------------

/// Dummy operator account address
pub const DUMMY_ACCOUNT_ADDRESS: &str =
    "0x0000000000000000000000000000000000000000000000000000000000000a11";

/// Dummy operator private key (Stark curve)
pub const DUMMY_PRIVATE_KEY: &str = "0x2bbf4f9fd0bbb2e60b0316c1fe0b76cf7a4d0198bd493ced9b8df2a3a24d68a";

/// Dummy relayer addresses
pub const DUMMY_RELAYER_1: &str = "0x0000000000000000000000000000000000000000000000000000000000000b01";
pub const DUMMY_RELAYER_2: &str = "0x0000000000000000000000000000000000000000000000000000000000000b02";
pub const DUMMY_RELAYER_3: &str = "0x0000000000000000000000000000000000000000000000000000000000000b03";

/// Well-known development EVM key and its address
pub const DUMMY_EVM_PRIVATE_KEY: &str = "0xac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";
pub const DUMMY_EVM_ADDRESS: &str = "0xf39fd6e51aad88f6f4ce6ab8827279cfffb92266";

// ------------------------------- NETWORK --------------------------------

/// Chain id served by the fake node ("SN_SEPOLIA")
pub const DUMMY_CHAIN_ID: &str = "0x534e5f5345504f4c4941";

/// Class hash the fake node gives companion accounts
pub const DUMMY_EOA_CLASS_HASH: &str = "0xe0a";

/// Class hash the fake node gives EVM contracts
pub const DUMMY_CONTRACT_ACCOUNT_CLASS_HASH: &str = "0xc0a";

/// Base fee returned by `get_base_fee`
pub const DUMMY_BASE_FEE: u128 = 1_000_000_000;

/// One ether in wei
pub const ETHER: u128 = 1_000_000_000_000_000_000;

// ============================================================================
// FAKE STARKNET NODE
// ============================================================================

/// A call applied by the fake node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppliedCall {
    pub sender: Felt,
    pub to: Felt,
    pub selector: Felt,
    pub calldata: Vec<Felt>,
}

/// Mutable chain state of the fake node.
#[derive(Debug, Clone, Default)]
pub struct NodeState {
    pub declared: HashMap<Felt, Value>,
    pub contracts: HashMap<Felt, Felt>,
    pub nonces: HashMap<Felt, u64>,
    pub balances: HashMap<Felt, u128>,
    pub counters: HashMap<Felt, u64>,
    /// Set through `set_base_fee`, `DUMMY_BASE_FEE` until then
    pub base_fee: Option<u128>,
    pub coinbase: Option<Felt>,
    pub receipts: HashMap<Felt, Value>,
    pub companions: HashMap<Felt, EvmAddress>,
    pub applied: Vec<AppliedCall>,
    pub invoke_count: usize,
    pub declare_count: usize,
    pub receipt_polls: usize,
    pub minted: Vec<(Felt, u128)>,
    /// Submitted transactions never become known to the receipt endpoint
    pub never_final: bool,
    /// `eth_send_transaction` emits its result event twice
    pub duplicate_events: bool,
    /// Starknet-level transfers from these senders revert
    pub failing_senders: Vec<Felt>,
}

/// Stateful wiremock responder answering Starknet JSON-RPC and `POST /mint`.
#[derive(Clone, Default)]
pub struct FakeStarknetNode {
    state: Arc<Mutex<NodeState>>,
}

fn rpc_result(result: Value) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({"jsonrpc": "2.0", "id": 1, "result": result}))
}

fn rpc_error(code: i64, message: &str) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({
        "jsonrpc": "2.0",
        "id": 1,
        "error": {"code": code, "message": message}
    }))
}

fn hex(felt: &Felt) -> String {
    format!("{:#x}", felt)
}

fn selector_of(name: &str) -> Felt {
    selector(name).unwrap()
}

/// Receipt as a node serves it; `revert_reason` set means reverted.
fn receipt_json(kind: &str, hash: &Felt, events: Vec<Value>, revert_reason: Option<String>) -> Value {
    let mut receipt = json!({
        "type": kind,
        "transaction_hash": hex(hash),
        "actual_fee": {"amount": "0x0", "unit": "WEI"},
        "finality_status": "ACCEPTED_ON_L2",
        "messages_sent": [],
        "events": events,
        "execution_resources": {
            "steps": 0,
            "data_availability": {"l1_gas": 0, "l1_data_gas": 0}
        },
        "execution_status": "SUCCEEDED",
        "block_hash": "0x1",
        "block_number": 1,
    });
    if let Some(reason) = revert_reason {
        receipt["execution_status"] = json!("REVERTED");
        receipt["revert_reason"] = json!(reason);
    }
    receipt
}

fn felt(value: &Value) -> Felt {
    parse_felt(value.as_str().unwrap_or("0x0")).unwrap_or(Felt::ZERO)
}

fn felts(value: &Value) -> Vec<Felt> {
    value
        .as_array()
        .map(|items| items.iter().map(felt).collect())
        .unwrap_or_default()
}

fn low_u128(value: &Felt) -> u128 {
    let bytes = value.to_bytes_be();
    let mut low = [0u8; 16];
    low.copy_from_slice(&bytes[16..]);
    u128::from_be_bytes(low)
}

impl FakeStarknetNode {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> MutexGuard<'_, NodeState> {
        self.state.lock().unwrap()
    }

    /// Mounts the node on `server`.
    pub async fn mount(&self, server: &MockServer) {
        Mock::given(method("POST"))
            .respond_with(self.clone())
            .mount(server)
            .await;
    }

    pub fn set_balance(&self, owner: &Felt, amount: u128) {
        self.state().balances.insert(*owner, amount);
    }

    pub fn balance(&self, owner: &Felt) -> u128 {
        self.state().balances.get(owner).copied().unwrap_or(0)
    }

    pub fn class_at(&self, address: &Felt) -> Option<Felt> {
        self.state().contracts.get(address).copied()
    }

    pub fn deploy_at(&self, address: &Felt, class_hash: &Felt) {
        self.state().contracts.insert(*address, *class_hash);
    }

    pub fn declare_count(&self) -> usize {
        self.state().declare_count
    }

    pub fn invoke_count(&self) -> usize {
        self.state().invoke_count
    }

    pub fn receipt_polls(&self) -> usize {
        self.state().receipt_polls
    }

    pub fn nonce(&self, address: &Felt) -> u64 {
        self.state().nonces.get(address).copied().unwrap_or(0)
    }

    pub fn counter(&self, address: &Felt) -> u64 {
        self.state().counters.get(address).copied().unwrap_or(0)
    }

    /// Applied calls to entry point `function`, in order.
    pub fn calls_to(&self, function: &str) -> Vec<AppliedCall> {
        let selector = selector_of(function);
        self.state()
            .applied
            .iter()
            .filter(|c| c.selector == selector)
            .cloned()
            .collect()
    }

    /// Companion address the fake core contract derives for `evm`.
    pub fn companion_address(core: &Felt, evm: &EvmAddress) -> Felt {
        get_contract_address(evm.to_felt(), eoa_class_hash(), &[evm.to_felt()], *core)
    }

    fn dispatch(&self, body: &Value) -> ResponseTemplate {
        let method = body["method"].as_str().unwrap_or_default();
        let params = &body["params"];
        let mut state = self.state();
        match method {
            "starknet_chainId" => rpc_result(json!(DUMMY_CHAIN_ID)),
            "starknet_getNonce" => {
                let address = felt(&params[1]);
                let nonce = state.nonces.get(&address).copied().unwrap_or(0);
                rpc_result(json!(format!("{:#x}", nonce)))
            }
            "starknet_getClassHashAt" => match state.contracts.get(&felt(&params[1])) {
                Some(class_hash) => rpc_result(json!(hex(class_hash))),
                None => rpc_error(20, "Contract not found"),
            },
            "starknet_getClass" => match state.declared.get(&felt(&params[1])) {
                Some(class) => rpc_result(class.clone()),
                None => rpc_error(28, "Class hash not found"),
            },
            "starknet_call" => Self::call(&mut state, &params[0]),
            "starknet_addInvokeTransaction" => Self::invoke(&mut state, &params[0]),
            "starknet_addDeclareTransaction" => Self::declare(&mut state, &params[0]),
            "starknet_getTransactionReceipt" => {
                state.receipt_polls += 1;
                let hash = felt(&params[0]);
                match state.receipts.get(&hash) {
                    Some(receipt) if !state.never_final => rpc_result(receipt.clone()),
                    _ => rpc_error(29, "Transaction hash not found"),
                }
            }
            other => rpc_error(-32601, &format!("Method {} not found", other)),
        }
    }

    fn call(state: &mut NodeState, request: &Value) -> ResponseTemplate {
        let contract = felt(&request["contract_address"]);
        let selector = felt(&request["entry_point_selector"]);
        let calldata = felts(&request["calldata"]);

        if selector == selector_of("balanceOf") {
            let owner = calldata.first().copied().unwrap_or(Felt::ZERO);
            let balance = state.balances.get(&owner).copied().unwrap_or(0);
            return rpc_result(json!([hex(&Felt::from(balance)), "0x0"]));
        }
        if selector == selector_of("compute_starknet_address") {
            let Some(evm) = calldata.first().and_then(evm_from_felt) else {
                return rpc_error(40, "invalid evm address");
            };
            let address = Self::companion_address(&contract, &evm);
            return rpc_result(json!([hex(&address)]));
        }
        if selector == selector_of("get_starknet_address") {
            let Some(evm) = calldata.first().and_then(evm_from_felt) else {
                return rpc_error(40, "invalid evm address");
            };
            let address = Self::companion_address(&contract, &evm);
            let registered = if state.contracts.contains_key(&address) {
                address
            } else {
                Felt::ZERO
            };
            return rpc_result(json!([hex(&registered)]));
        }
        if selector == selector_of("get_base_fee") {
            let fee = state.base_fee.unwrap_or(DUMMY_BASE_FEE);
            return rpc_result(json!([hex(&Felt::from(fee))]));
        }
        if selector == selector_of("get_coinbase") {
            return rpc_result(json!([hex(&state.coinbase.unwrap_or(Felt::ZERO))]));
        }
        if selector == selector_of("get_counter") {
            let count = state.counters.get(&contract).copied().unwrap_or(0);
            return rpc_result(json!([hex(&Felt::from(count))]));
        }
        rpc_error(40, "Contract error: unknown entry point")
    }

    fn next_hash(state: &NodeState) -> Felt {
        Felt::from(0x7000u64 + (state.invoke_count + state.declare_count) as u64)
    }

    fn invoke(state: &mut NodeState, tx: &Value) -> ResponseTemplate {
        let sender = felt(&tx["sender_address"]);
        let nonce = felt(&tx["nonce"]);
        let expected = state.nonces.get(&sender).copied().unwrap_or(0);
        if nonce != Felt::from(expected) {
            return rpc_error(52, "Invalid transaction nonce");
        }
        let hash = Self::next_hash(state);
        state.invoke_count += 1;

        let calldata = felts(&tx["calldata"]);
        let mut scratch = state.clone();
        let mut events = Vec::new();
        let outcome = Self::apply_multicall(&mut scratch, &sender, expected, &calldata, &mut events);

        let receipt = match outcome {
            Ok(()) => {
                *state = scratch;
                receipt_json("INVOKE", &hash, events, None)
            }
            Err(reason) => receipt_json("INVOKE", &hash, Vec::new(), Some(reason)),
        };
        state.nonces.insert(sender, expected + 1);
        state.receipts.insert(hash, receipt);
        rpc_result(json!({"transaction_hash": hex(&hash)}))
    }

    fn apply_multicall(
        state: &mut NodeState,
        sender: &Felt,
        nonce: u64,
        calldata: &[Felt],
        events: &mut Vec<Value>,
    ) -> Result<(), String> {
        let count = calldata.first().map(low_u128).unwrap_or(0) as usize;
        let mut cursor = 1;
        for _ in 0..count {
            let header = calldata.get(cursor..cursor + 3).ok_or("truncated multicall")?;
            let (to, selector, len) = (header[0], header[1], low_u128(&header[2]) as usize);
            cursor += 3;
            let args = calldata.get(cursor..cursor + len).ok_or("truncated calldata")?.to_vec();
            cursor += len;
            Self::apply_call(state, sender, nonce, &to, &selector, &args, events)?;
            state.applied.push(AppliedCall {
                sender: *sender,
                to,
                selector,
                calldata: args,
            });
        }
        Ok(())
    }

    fn apply_call(
        state: &mut NodeState,
        sender: &Felt,
        nonce: u64,
        to: &Felt,
        selector: &Felt,
        args: &[Felt],
        events: &mut Vec<Value>,
    ) -> Result<(), String> {
        if *selector == selector_of("deployContract") {
            let (class_hash, salt, len) = (args[0], args[1], low_u128(&args[3]) as usize);
            let constructor = &args[4..4 + len];
            if !state.declared.contains_key(&class_hash) {
                return Err(format!("class {} not declared", hex(&class_hash)));
            }
            let address = get_contract_address(salt, class_hash, constructor, Felt::ZERO);
            if state.contracts.contains_key(&address) {
                return Err("contract already deployed".into());
            }
            state.contracts.insert(address, class_hash);
        } else if *selector == selector_of("upgrade") {
            let new_class = args[0];
            if !state.declared.contains_key(&new_class) {
                return Err(format!("class {} not declared", hex(&new_class)));
            }
            state.contracts.insert(*to, new_class);
        } else if *selector == selector_of("set_base_fee") {
            state.base_fee = Some(low_u128(&args[0]));
        } else if *selector == selector_of("set_coinbase") {
            state.coinbase = Some(args[0]);
        } else if *selector == selector_of("increment") {
            *state.counters.entry(*to).or_insert(0) += 1;
        } else if *selector == selector_of("transfer") {
            let (recipient, amount) = (args[0], low_u128(&args[1]));
            if state.failing_senders.contains(sender) {
                return Err("transfer rejected".into());
            }
            let balance = state.balances.get(sender).copied().unwrap_or(0);
            if balance < amount {
                return Err("ERC20: transfer amount exceeds balance".into());
            }
            state.balances.insert(*sender, balance - amount);
            *state.balances.entry(recipient).or_insert(0) += amount;
        } else if *selector == selector_of("deploy_externally_owned_account") {
            let evm = evm_from_felt(&args[0]).ok_or("invalid evm address")?;
            let address = Self::companion_address(to, &evm);
            state.companions.insert(address, evm);
            state.contracts.insert(address, eoa_class_hash());
        } else if *selector == selector_of("eth_send_transaction") {
            let payload = unpack_bytes(args).map_err(|e| e.to_string())?;
            let evm_sender = state
                .companions
                .get(sender)
                .copied()
                .ok_or("sender is not a deployed companion account")?;
            if Self::is_creation(&payload)? {
                let created = create_address(&evm_sender, nonce);
                let address = Self::companion_address(to, &created);
                state.companions.insert(address, created);
                state.contracts.insert(address, contract_account_class_hash());
            }
            let event = json!({
                "from_address": hex(to),
                "keys": [hex(&selector_of("transaction_executed"))],
                "data": ["0x0", "0x1", "0x5208"],
            });
            events.push(event.clone());
            if state.duplicate_events {
                events.push(event);
            }
        }
        Ok(())
    }

    fn is_creation(payload: &[u8]) -> Result<bool, String> {
        let (body, to_index) = match payload.first() {
            Some(0x01) => (&payload[1..], 4),
            Some(0x02) => (&payload[1..], 5),
            Some(_) => (payload, 3),
            None => return Err("empty transaction".into()),
        };
        let item = RlpItem::decode(body).map_err(|e| e.to_string())?;
        let fields = item.as_list().map_err(|e| e.to_string())?;
        let to = fields.get(to_index).ok_or("missing to field")?;
        Ok(to.as_bytes().map_err(|e| e.to_string())?.is_empty())
    }

    fn declare(state: &mut NodeState, tx: &Value) -> ResponseTemplate {
        let sender = felt(&tx["sender_address"]);
        let class = tx["contract_class"].clone();
        let class_hash = match serde_json::from_value::<FlattenedSierraClass>(class.clone()) {
            Ok(flattened) => flattened.class_hash(),
            Err(e) => return rpc_error(50, &format!("Invalid contract class: {}", e)),
        };
        if state.declared.contains_key(&class_hash) {
            return rpc_error(51, "Class already declared");
        }
        let hash = Self::next_hash(state);
        state.declare_count += 1;
        state.declared.insert(class_hash, class);
        *state.nonces.entry(sender).or_insert(0) += 1;
        state.receipts.insert(hash, receipt_json("DECLARE", &hash, Vec::new(), None));
        rpc_result(json!({"transaction_hash": hex(&hash), "class_hash": hex(&class_hash)}))
    }

    fn mint(&self, body: &Value) -> ResponseTemplate {
        let address = felt(&body["address"]);
        let amount = body["amount"].as_u64().map(u128::from).unwrap_or(0);
        let mut state = self.state();
        *state.balances.entry(address).or_insert(0) += amount;
        state.minted.push((address, amount));
        let balance = state.balances[&address];
        ResponseTemplate::new(200).set_body_json(json!({"new_balance": balance.to_string(), "unit": "WEI"}))
    }
}

impl Respond for FakeStarknetNode {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        let body: Value = match serde_json::from_slice(&request.body) {
            Ok(body) => body,
            Err(_) => return ResponseTemplate::new(400),
        };
        if request.url.path() == "/mint" {
            return self.mint(&body);
        }
        self.dispatch(&body)
    }
}

fn evm_from_felt(value: &Felt) -> Option<EvmAddress> {
    let bytes = value.to_bytes_be();
    if bytes[..12].iter().any(|b| *b != 0) {
        return None;
    }
    let mut out = [0u8; 20];
    out.copy_from_slice(&bytes[12..]);
    Some(EvmAddress(out))
}

pub fn eoa_class_hash() -> Felt {
    parse_felt(DUMMY_EOA_CLASS_HASH).unwrap()
}

pub fn contract_account_class_hash() -> Felt {
    parse_felt(DUMMY_CONTRACT_ACCOUNT_CLASS_HASH).unwrap()
}

/// Starts a mock server with a fresh fake node mounted.
pub async fn start_fake_node() -> (MockServer, FakeStarknetNode) {
    let server = MockServer::start().await;
    let node = FakeStarknetNode::new();
    node.mount(&server).await;
    (server, node)
}

// ============================================================================
// HELPER FUNCTIONS
// ============================================================================

pub fn felt_of(value: &str) -> Felt {
    parse_felt(value).unwrap()
}

/// Fast polling for tests: 10ms interval, 50 attempts.
pub fn create_fast_poll() -> PollPolicy {
    PollPolicy::new(Duration::from_millis(10), Duration::from_millis(500))
}

/// Create a default development profile pointing at `rpc_url`.
/// This can be customized using Rust's struct update syntax:
/// ```
/// let profile = NetworkProfile {
///     faucet_url: Some(format!("{}/mint", server.uri())),
///     ..create_default_profile(&server.uri())
/// };
/// ```
pub fn create_default_profile(rpc_url: &str) -> NetworkProfile {
    NetworkProfile {
        name: "katana".to_string(),
        rpc_url: rpc_url.to_string(),
        companion_rpc_url: None,
        class: NetworkClass::Development,
        poll: create_fast_poll(),
        ledger_chain_id: felt_of(DUMMY_CHAIN_ID),
        companion_chain_id: 1263227476,
        account_address: felt_of(DUMMY_ACCOUNT_ADDRESS),
        private_key: felt_of(DUMMY_PRIVATE_KEY),
        relayers: Vec::new(),
        fee_token_address: felt_of(DEFAULT_FEE_TOKEN),
        max_fee: Felt::from(10_000_000_000_000_000u64),
        faucet_url: None,
    }
}

pub fn create_client(rpc_url: &str) -> Arc<StarknetClient> {
    Arc::new(StarknetClient::new(rpc_url, create_fast_poll()).unwrap())
}

/// Account at `address` signing with the dummy key.
pub fn create_account(client: &Arc<StarknetClient>, address: &str) -> Arc<StarknetAccount> {
    Arc::new(StarknetAccount::new(
        client.clone(),
        Arc::new(LocalSigner::new(felt_of(address), felt_of(DUMMY_PRIVATE_KEY))),
        felt_of(DUMMY_CHAIN_ID),
        Felt::from(10_000_000_000_000_000u64),
    ))
}

pub fn create_default_account(client: &Arc<StarknetClient>) -> Arc<StarknetAccount> {
    create_account(client, DUMMY_ACCOUNT_ADDRESS)
}

/// Fresh empty directory under the system temp dir.
pub fn temp_dir(tag: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("deployer-test-{}-{}", tag, std::process::id()));
    let _ = std::fs::remove_dir_all(&dir);
    std::fs::create_dir_all(&dir).unwrap();
    dir
}

/// Writes a Sierra/CASM artifact pair for `name` into `build_dir`.
///
/// `version` changes the program and therefore the class hash.
pub fn write_artifact(build_dir: &std::path::Path, name: &str, version: u64) {
    let selector = format!("{:#x}", selector_of("increment"));
    let sierra = json!({
        "sierra_program": ["0x1", "0x2", format!("{:#x}", version), format!("{:#x}", name.len())],
        "sierra_program_debug_info": {"type_names": [], "libfunc_names": [], "user_func_names": []},
        "contract_class_version": "0.1.0",
        "entry_points_by_type": {
            "EXTERNAL": [{"selector": selector, "function_idx": 0}],
            "L1_HANDLER": [],
            "CONSTRUCTOR": []
        },
        "abi": [{
            "type": "function",
            "name": "increment",
            "inputs": [],
            "outputs": [],
            "state_mutability": "external"
        }]
    });
    let casm = json!({
        "prime": "0x800000000000011000000000000000000000000000000000000000000000001",
        "compiler_version": "2.6.3",
        "hints": [],
        "bytecode": ["0x40780017fff7fff", "0x1", format!("{:#x}", version)],
        "entry_points_by_type": {
            "EXTERNAL": [{"selector": selector, "offset": 0, "builtins": ["range_check"]}],
            "L1_HANDLER": [],
            "CONSTRUCTOR": []
        }
    });
    std::fs::create_dir_all(build_dir).unwrap();
    std::fs::write(
        build_dir.join(format!("{}.contract_class.json", name)),
        serde_json::to_string_pretty(&sierra).unwrap(),
    )
    .unwrap();
    std::fs::write(
        build_dir.join(format!("{}.compiled_contract_class.json", name)),
        serde_json::to_string_pretty(&casm).unwrap(),
    )
    .unwrap();
}
