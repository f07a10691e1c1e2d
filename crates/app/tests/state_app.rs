//! End-to-end flows through the state application: pool ingress,
//! prepare/commit, interpreter policy and receipt stamping.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use chain5j_app::Application;
use chain5j_app::api::{BlockRef, CallMessage};
use chain5j_app::error::{AppError, MempoolError};
use chain5j_app::mempool::TxPool;
use chain5j_app::portal::{MemberInfo, NodeKey, NodePermission};
use chain5j_app::state::StateView;
use chain5j_app::vm::{NoopVm, Vm, VmBlockContext, VmError, VmMessage, VmOutcome};
use chain5j_common::crypto::public_key_to_address;
use chain5j_common::types::{
    ACCOUNT_INTERPRETER, AccountOp, AccountOpData, AccountStore, BASE_INTERPRETER, Block,
    BlockHeader, EVM_INTERPRETER, FrozenAccountData, LOST_INTERPRETER, LostRequest, PartnerData,
    Permissions, STATE_SECTION, StateRoots, Transaction, TxPoolConfig,
};
use chain5j_common::{Address, H256, U256};
use chain5j_storage::{StateSnapshot, Store};
use secp256k1::{PublicKey, SECP256K1, SecretKey};

const BLOCK_GAS_LIMIT: u64 = 5_000_000;
const DAY: u64 = 86_400;

struct OpenPortal;

impl NodePermission for OpenPortal {
    fn is_admin(&self, _address: &str, _height: u64) -> bool {
        true
    }

    fn add_supervisor(&self, _address: Address, _info: MemberInfo) -> Result<(), AppError> {
        Ok(())
    }

    fn del_supervisor(&self, _address: Address) -> Result<(), AppError> {
        Ok(())
    }
}

impl NodeKey for OpenPortal {
    fn id_from_pub(&self, _public_key: &PublicKey) -> Result<String, AppError> {
        Ok("peer".to_string())
    }
}

fn secret(fill: u8) -> SecretKey {
    let mut raw = [fill; 32];
    raw[0] = 1;
    SecretKey::from_slice(&raw).expect("valid secret")
}

fn address_of(secret: &SecretKey) -> Address {
    public_key_to_address(&secret.public_key(SECP256K1))
}

fn user(cn: &str, balance: u64, addresses: Vec<Address>) -> AccountStore {
    AccountStore {
        cn: cn.to_string(),
        domain: "root".to_string(),
        balance: U256::from(balance),
        addresses,
        ..Default::default()
    }
}

fn admin(cn: &str, addresses: Vec<Address>) -> AccountStore {
    AccountStore {
        is_admin: true,
        enable_deploy_contract: true,
        permissions: Some(Permissions::domain_admin()),
        ..user(cn, 0, addresses)
    }
}

fn genesis(accounts: Vec<AccountStore>) -> Store {
    let mut snapshot = StateSnapshot::default();
    for account in accounts {
        for address in &account.addresses {
            snapshot.address_index.insert(*address);
        }
        snapshot.accounts.insert(account.account_name(), account);
    }
    Store::with_genesis_state(snapshot).expect("genesis store")
}

fn new_app(store: &Store, vm: Arc<dyn Vm>) -> Arc<Application> {
    let portal = Arc::new(OpenPortal);
    Arc::new(Application::new(
        store.clone(),
        Default::default(),
        vm,
        portal.clone(),
        portal,
    ))
}

fn signed_tx(
    secret: &SecretKey,
    from: &str,
    to: &str,
    interpreter: &str,
    nonce: u64,
    gas_price: u64,
    gas_limit: u64,
    value: u64,
    input: Bytes,
) -> Transaction {
    let mut tx = Transaction::new(
        from,
        to,
        interpreter,
        nonce,
        gas_price,
        gas_limit,
        U256::from(value),
        input,
        0,
        Bytes::new(),
    );
    tx.sign(secret);
    tx
}

fn transfer(secret: &SecretKey, from: &str, to: &str, nonce: u64, value: u64) -> Transaction {
    signed_tx(secret, from, to, BASE_INTERPRETER, nonce, 0, 21_000, value, Bytes::new())
}

/// Prepares and commits one block at the head, advancing the canonical
/// chain. Returns the new state root and the committed receipts.
fn seal_block(
    app: &Application,
    txs: &[Transaction],
    timestamp: u64,
) -> (H256, Vec<chain5j_common::types::Receipt>, BlockHeader) {
    let head = app.storage().current_block().expect("head");
    let mut context = app.head_context("packer").expect("context");
    let header_template = BlockHeader {
        parent_hash: head.hash(),
        height: head.header.height + 1,
        timestamp,
        gas_limit: BLOCK_GAS_LIMIT,
        ..Default::default()
    };
    let outcome = app
        .prepare(&mut context, &header_template, txs, BLOCK_GAS_LIMIT)
        .expect("prepare");

    let mut roots = StateRoots::new();
    roots.set(STATE_SECTION, outcome.state_root);
    let header = BlockHeader {
        state_roots: roots.encode(),
        gas_used: outcome.gas_used,
        ..header_template
    };
    let root = app.commit(&mut context, &header).expect("commit");
    assert_eq!(root, outcome.state_root);

    let receipts = app
        .storage()
        .get_receipts(header.hash())
        .expect("receipts");
    app.storage()
        .add_block(Block::new(header.clone(), outcome.ok_txs))
        .expect("add block");
    (root, receipts, header)
}

fn balance(store: &Store, root: H256, name: &str) -> U256 {
    store
        .state_at(root)
        .expect("state")
        .accounts
        .get(name)
        .map(|a| a.balance)
        .unwrap_or_default()
}

#[test]
fn base_transfer_moves_funds_and_mints_receipt() {
    let alice_key = secret(0x11);
    let store = genesis(vec![
        user("alice", 100, vec![address_of(&alice_key)]),
        user("bob", 0, vec![]),
    ]);
    let app = new_app(&store, Arc::new(NoopVm::new()));

    let tx = transfer(&alice_key, "alice@root", "bob@root", 0, 10);
    let (root, receipts, _) = seal_block(&app, std::slice::from_ref(&tx), 1_000);

    assert_eq!(balance(&store, root, "alice@root"), U256::from(90));
    assert_eq!(balance(&store, root, "bob@root"), U256::from(10));
    assert_eq!(receipts.len(), 1);
    assert_eq!(receipts[0].status, 1);
    assert_eq!(receipts[0].gas_used, 21_000);
    assert_eq!(receipts[0].cumulative_gas_used, 21_000);
    assert_eq!(receipts[0].transaction_hash, tx.hash());

    let state = store.state_at(root).expect("state");
    assert_eq!(state.accounts["alice@root"].nonce, 1);
}

#[test]
fn nonce_gap_is_buffered_until_the_queue_catches_up() {
    let alice_key = secret(0x11);
    let store = genesis(vec![
        user("alice", 1_000, vec![address_of(&alice_key)]),
        user("bob", 0, vec![]),
    ]);
    let app = new_app(&store, Arc::new(NoopVm::new()));
    let pool = TxPool::new(TxPoolConfig::default(), app.clone());

    let tx0 = transfer(&alice_key, "alice@root", "bob@root", 0, 1);
    let tx1 = transfer(&alice_key, "alice@root", "bob@root", 1, 1);
    let tx3 = transfer(&alice_key, "alice@root", "bob@root", 3, 1);
    pool.add(None, tx0).expect("nonce 0");
    pool.add(None, tx1).expect("nonce 1");
    // Nonce 3 runs ahead: transient, buffered anyway.
    pool.add(None, tx3).expect("nonce 3 buffered");
    assert_eq!(pool.len(), 3);

    let batch = pool.fetch_txs(10, 1_000).expect("fetch");
    assert_eq!(
        batch.iter().map(Transaction::nonce).collect::<Vec<_>>(),
        vec![0, 1]
    );

    seal_block(&app, &batch, 1_000);
    for tx in &batch {
        pool.delete(tx, true).expect("delete");
    }

    // The gap at 2 still blocks nonce 3.
    assert!(pool.fetch_txs(10, 1_000).expect("fetch").is_empty());

    let tx2 = transfer(&alice_key, "alice@root", "bob@root", 2, 1);
    pool.add(None, tx2).expect("nonce 2");
    let batch = pool.fetch_txs(10, 1_000).expect("fetch");
    assert_eq!(
        batch.iter().map(Transaction::nonce).collect::<Vec<_>>(),
        vec![2, 3]
    );
}

/// VM double that burns all gas it is given.
struct OutOfGasVm;

impl Vm for OutOfGasVm {
    fn create(
        &self,
        _state: &mut dyn StateView,
        _block: &VmBlockContext,
        _msg: &VmMessage,
        _gas: u64,
    ) -> VmOutcome {
        VmOutcome {
            return_data: Bytes::new(),
            gas_left: 0,
            error: Some(VmError::OutOfGas),
        }
    }

    fn call(
        &self,
        _state: &mut dyn StateView,
        _block: &VmBlockContext,
        _msg: &VmMessage,
        _to: Address,
        _gas: u64,
    ) -> VmOutcome {
        VmOutcome {
            return_data: Bytes::new(),
            gas_left: 0,
            error: Some(VmError::OutOfGas),
        }
    }

    fn cancel(&self) {}
}

#[test]
fn evm_out_of_gas_records_failure_and_keeps_gas_debit() {
    let alice_key = secret(0x11);
    let store = genesis(vec![user("alice", 100_000, vec![address_of(&alice_key)])]);
    let app = new_app(&store, Arc::new(OutOfGasVm));

    // Contract creation with a 60k budget; the VM burns everything.
    let tx = signed_tx(
        &alice_key,
        "alice@root",
        "",
        EVM_INTERPRETER,
        0,
        1,
        60_000,
        0,
        Bytes::new(),
    );
    let (root, receipts, _) = seal_block(&app, std::slice::from_ref(&tx), 1_000);

    assert_eq!(receipts.len(), 1);
    assert_eq!(receipts[0].status, 0);
    assert_eq!(receipts[0].gas_used, 60_000);
    assert!(receipts[0].contract_address.is_some());

    // Everything rolled back except the gas debit, paid to the coinbase.
    assert_eq!(balance(&store, root, "alice@root"), U256::from(40_000));
    let coinbase_name = format!("{:#x}", Address::zero());
    assert_eq!(balance(&store, root, &coinbase_name), U256::from(60_000));
}

#[test]
fn evm_create_below_intrinsic_cost_is_rejected_cleanly() {
    let alice_key = secret(0x11);
    let store = genesis(vec![user("alice", 100_000, vec![address_of(&alice_key)])]);
    let app = new_app(&store, Arc::new(OutOfGasVm));

    // 30k cannot even cover the 53k creation base cost.
    let tx = signed_tx(
        &alice_key,
        "alice@root",
        "",
        EVM_INTERPRETER,
        0,
        1,
        30_000,
        0,
        Bytes::new(),
    );
    let genesis_root = store
        .current_block()
        .expect("head")
        .header
        .state_roots()
        .state_root();
    let (root, receipts, _) = seal_block(&app, std::slice::from_ref(&tx), 1_000);

    // Snapshot revert leaves the state byte-identical.
    assert!(receipts.is_empty());
    assert_eq!(root, genesis_root);
}

#[test]
fn frozen_account_is_rejected_at_ingress() {
    let admin_key = secret(0x21);
    let bob_key = secret(0x22);
    let store = genesis(vec![
        admin("boss", vec![address_of(&admin_key)]),
        user("bob", 50, vec![address_of(&bob_key)]),
        user("carol", 0, vec![]),
    ]);
    let app = new_app(&store, Arc::new(NoopVm::new()));

    let freeze = AccountOpData::new(
        AccountOp::FrozenAccount,
        &FrozenAccountData {
            cn: "bob".to_string(),
            domain: "root".to_string(),
            frozen: true,
        },
    )
    .expect("payload");
    let freeze_tx = signed_tx(
        &admin_key,
        "boss@root",
        "bob@root",
        ACCOUNT_INTERPRETER,
        0,
        0,
        21_000,
        0,
        freeze.encode().expect("encode"),
    );
    let (root, receipts, _) = seal_block(&app, std::slice::from_ref(&freeze_tx), 1_000);
    assert_eq!(receipts[0].status, 1);
    assert!(
        store.state_at(root).expect("state").accounts["bob@root"].is_frozen
    );

    let pool = TxPool::new(TxPoolConfig::default(), app);
    let result = pool.add(None, transfer(&bob_key, "bob@root", "carol@root", 0, 1));
    assert!(matches!(
        result,
        Err(MempoolError::App(AppError::FrozenAccount))
    ));
    assert!(pool.is_empty());
}

#[test]
fn lost_recovery_succeeds_only_after_the_waiting_period() {
    let alice_key = secret(0x31);
    let partner_key = secret(0x32);
    let recovery_key = secret(0x33);
    let recovery_addr = address_of(&recovery_key);

    let mut alice = user("alice", 10, vec![address_of(&alice_key)]);
    alice.extensions.insert(
        chain5j_common::types::PARTNER_KEY.to_string(),
        serde_json::to_vec(&PartnerData {
            cn: "partner".to_string(),
            domain: "root".to_string(),
        })
        .expect("encode")
        .into(),
    );
    let store = genesis(vec![
        alice,
        user("partner", 10, vec![address_of(&partner_key)]),
    ]);
    let app = new_app(&store, Arc::new(NoopVm::new()));

    let t0 = 1_000;
    let lost = AccountOpData::new(
        AccountOp::LostRequest,
        &LostRequest {
            cn: "alice".to_string(),
            domain: "root".to_string(),
            recover_addr: recovery_addr,
        },
    )
    .expect("payload");
    let lost_tx = signed_tx(
        &partner_key,
        "partner@root",
        "alice@root",
        LOST_INTERPRETER,
        0,
        0,
        21_000,
        0,
        lost.encode().expect("encode"),
    );
    let (root, receipts, _) = seal_block(&app, std::slice::from_ref(&lost_tx), t0);
    assert_eq!(receipts[0].status, 1);
    let stored = store.state_at(root).expect("state").accounts["alice@root"]
        .lost()
        .expect("lost record");
    assert_eq!(stored.timestamp, t0 + 2 * DAY);
    assert_eq!(stored.request.recover_addr, recovery_addr);

    let found = AccountOpData::new(AccountOp::FoundRequest, &serde_json::json!({}))
        .expect("payload");
    let claim = |nonce: u64| {
        signed_tx(
            &recovery_key,
            "alice@root",
            "",
            LOST_INTERPRETER,
            nonce,
            0,
            21_000,
            0,
            found.encode().expect("encode"),
        )
    };

    // One second early: the claim is unauthorized and the block carries
    // no receipt for it.
    let early = claim(0);
    let (root, receipts, _) = seal_block(&app, std::slice::from_ref(&early), t0 + 2 * DAY - 1);
    assert!(receipts.is_empty());
    assert_eq!(
        store.state_at(root).expect("state").accounts["alice@root"].addresses,
        vec![address_of(&alice_key)]
    );

    // On time: addresses swap to the recovery key and the record clears.
    let on_time = claim(0);
    let (root, receipts, _) = seal_block(&app, std::slice::from_ref(&on_time), t0 + 2 * DAY);
    assert_eq!(receipts.len(), 1);
    let state = store.state_at(root).expect("state");
    assert_eq!(state.accounts["alice@root"].addresses, vec![recovery_addr]);
    assert!(state.accounts["alice@root"].lost().is_none());
}

#[test]
fn commit_is_deterministic_across_runs() {
    let run = || {
        let alice_key = secret(0x41);
        let store = genesis(vec![
            user("alice", 500, vec![address_of(&alice_key)]),
            user("bob", 0, vec![]),
        ]);
        let app = new_app(&store, Arc::new(NoopVm::new()));
        let txs = vec![
            transfer(&alice_key, "alice@root", "bob@root", 0, 5),
            transfer(&alice_key, "alice@root", "bob@root", 1, 7),
            transfer(&alice_key, "alice@root", "bob@root", 2, 9),
        ];
        let (root, receipts, _) = seal_block(&app, &txs, 4_242);
        (root, receipts)
    };

    let (first_root, first_receipts) = run();
    let (second_root, second_receipts) = run();
    assert_eq!(first_root, second_root);
    assert_eq!(first_receipts, second_receipts);
}

#[test]
fn receipts_accumulate_gas_in_order() {
    let alice_key = secret(0x51);
    let store = genesis(vec![
        user("alice", 100_000, vec![address_of(&alice_key)]),
        user("bob", 0, vec![]),
    ]);
    let app = new_app(&store, Arc::new(NoopVm::new()));
    let txs: Vec<Transaction> = (0..3)
        .map(|nonce| transfer(&alice_key, "alice@root", "bob@root", nonce, 1))
        .collect();
    let (_, receipts, header) = seal_block(&app, &txs, 1_000);

    assert_eq!(receipts.len(), 3);
    let mut cumulative = 0;
    for receipt in &receipts {
        cumulative += receipt.gas_used;
        assert_eq!(receipt.cumulative_gas_used, cumulative);
    }
    assert_eq!(header.gas_used, cumulative);
}

#[test]
fn failed_transactions_do_not_leak_state() {
    let alice_key = secret(0x61);
    let other_key = secret(0x62);
    let store = genesis(vec![
        user("alice", 100, vec![address_of(&alice_key)]),
        user("bob", 0, vec![]),
    ]);
    let app = new_app(&store, Arc::new(NoopVm::new()));

    // Wrong signer: verification fails, nothing applies.
    let forged = transfer(&other_key, "alice@root", "bob@root", 0, 10);
    let genesis_root = store
        .current_block()
        .expect("head")
        .header
        .state_roots()
        .state_root();
    let mut context = app.head_context("packer").expect("context");
    let header = BlockHeader {
        height: 1,
        timestamp: 1_000,
        gas_limit: BLOCK_GAS_LIMIT,
        ..Default::default()
    };
    let outcome = app
        .prepare(&mut context, &header, std::slice::from_ref(&forged), BLOCK_GAS_LIMIT)
        .expect("prepare");
    assert_eq!(outcome.ok_txs.len(), 0);
    assert_eq!(outcome.err_txs.len(), 1);
    assert_eq!(outcome.state_root, genesis_root);
    assert_eq!(outcome.gas_used, 0);
}

#[test]
fn pending_nonce_tracks_pool_and_state() {
    let alice_key = secret(0x71);
    let store = genesis(vec![
        user("alice", 1_000, vec![address_of(&alice_key)]),
        user("bob", 0, vec![]),
    ]);
    let app = new_app(&store, Arc::new(NoopVm::new()));
    let pool = TxPool::new(TxPoolConfig::default(), app.clone());

    assert_eq!(app.pending_nonce("alice@root").expect("nonce"), 0);
    for nonce in 0..3 {
        pool.add(None, transfer(&alice_key, "alice@root", "bob@root", nonce, 1))
            .expect("add");
    }
    // The tracker covers every pooled nonce.
    assert_eq!(app.pending_nonce("alice@root").expect("nonce"), 3);
    assert!(app.cache_nonce("alice@root") >= 2);
}

/// VM double that burns everything it is given but registers a refund.
struct RefundingVm;

impl Vm for RefundingVm {
    fn create(
        &self,
        _state: &mut dyn StateView,
        _block: &VmBlockContext,
        _msg: &VmMessage,
        gas: u64,
    ) -> VmOutcome {
        VmOutcome {
            return_data: Bytes::new(),
            gas_left: gas,
            error: None,
        }
    }

    fn call(
        &self,
        state: &mut dyn StateView,
        _block: &VmBlockContext,
        _msg: &VmMessage,
        _to: Address,
        _gas: u64,
    ) -> VmOutcome {
        state.add_refund(10_000);
        VmOutcome {
            return_data: Bytes::new(),
            gas_left: 0,
            error: None,
        }
    }

    fn cancel(&self) {}
}

#[test]
fn refunds_are_capped_and_returned_to_the_payer() {
    let alice_key = secret(0x91);
    let contract = AccountStore {
        cn: "0x9254e62fbca63769dfd4cc8e23f630f0785610ce".to_string(),
        domain: "root".to_string(),
        ..Default::default()
    };
    let contract_name = contract.account_name();
    let store = genesis(vec![
        user("alice", 200_000, vec![address_of(&alice_key)]),
        contract,
    ]);
    let app = new_app(&store, Arc::new(RefundingVm));

    let tx = signed_tx(
        &alice_key,
        "alice@root",
        &contract_name,
        EVM_INTERPRETER,
        0,
        1,
        100_000,
        0,
        Bytes::new(),
    );
    let (root, receipts, _) = seal_block(&app, std::slice::from_ref(&tx), 1_000);

    // The VM consumed 100k - 21k intrinsic; the refund counter gives 10k
    // back (below the gas_used/2 cap).
    assert_eq!(receipts[0].status, 1);
    assert_eq!(receipts[0].gas_used, 90_000);
    assert_eq!(balance(&store, root, "alice@root"), U256::from(110_000));
    let coinbase_name = format!("{:#x}", Address::zero());
    assert_eq!(balance(&store, root, &coinbase_name), U256::from(90_000));
    // The call path advanced the sender nonce.
    assert_eq!(
        store.state_at(root).expect("state").accounts["alice@root"].nonce,
        1
    );
}

#[tokio::test]
async fn read_only_call_runs_against_head_state() {
    let store = genesis(vec![user("alice", 10, vec![])]);
    let app = new_app(&store, Arc::new(NoopVm::new()));
    let msg = CallMessage {
        from: "alice@root".to_string(),
        to: String::new(),
        gas_limit: 0,
        gas_price: 0,
        value: U256::zero(),
        input: Bytes::new(),
    };
    let output = app
        .call_with_timeout(msg, &BlockRef::Latest, Duration::from_millis(500))
        .await
        .expect("call");
    assert!(output.is_empty());
    // Read-only execution leaves the committed state alone.
    let head_root = store
        .current_block()
        .expect("head")
        .header
        .state_roots()
        .state_root();
    assert_eq!(balance(&store, head_root, "alice@root"), U256::from(10));
}

#[test]
fn register_account_creates_the_target() {
    let admin_key = secret(0x81);
    let new_key = secret(0x82);
    let store = genesis(vec![admin("boss", vec![address_of(&admin_key)])]);
    let app = new_app(&store, Arc::new(NoopVm::new()));

    let register = AccountOpData::new(
        AccountOp::RegisterAccount,
        &AccountStore {
            cn: "dave".to_string(),
            domain: "root".to_string(),
            addresses: vec![address_of(&new_key)],
            ..Default::default()
        },
    )
    .expect("payload");
    let tx = signed_tx(
        &admin_key,
        "boss@root",
        "dave@root",
        ACCOUNT_INTERPRETER,
        0,
        0,
        21_000,
        0,
        register.encode().expect("encode"),
    );
    let (root, receipts, _) = seal_block(&app, std::slice::from_ref(&tx), 1_000);
    assert_eq!(receipts[0].status, 1);
    let state = store.state_at(root).expect("state");
    assert!(state.accounts.contains_key("dave@root"));
    assert!(state.address_index.contains(&address_of(&new_key)));
}
