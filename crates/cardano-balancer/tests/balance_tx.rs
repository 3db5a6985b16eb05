use std::collections::BTreeMap;
use std::future::{Future, ready};

use cardano_balancer::config::BalancerConfig;
use cardano_balancer::encoding::{BincodeCodec, TxCodec};
use cardano_balancer::error::{BalanceTxError, QueryError};
use cardano_balancer::evaluation::{
    ExUnitsByPointer, ExUnitsEvaluator, ScriptFailure, TxEvaluationFailure,
};
use cardano_balancer::mk_unbalanced_tx;
use cardano_balancer::runtime::fees::{min_ada_required, min_fee};
use cardano_balancer::runtime::{BalancerRuntime, LedgerQuery, WalletInterface};
use cardano_balancer::schema::balance_constraints::{
    BalanceTxConstraintsBuilder, CoinSelectionStrategy,
};
use cardano_balancer::schema::constraints::TxConstraints;
use cardano_balancer::schema::hash::{Hash28, Hash32};
use cardano_balancer::schema::lookups::ScriptLookups;
use cardano_balancer::schema::params::ProtocolParameters;
use cardano_balancer::schema::types::{
    Address, Credential, ExUnits, Language, NativeScript, NetworkId, OutputDatum, PlutusData,
    PlutusScript, RedeemerPointer, RedeemerTag, Script, Transaction, TransactionInput,
    TransactionOutput, UnbalancedTx, UtxoMap,
};
use cardano_balancer::schema::value::{AssetClass, AssetName, Coin, MultiAsset, Value};
use tracing_subscriber::EnvFilter;

const ADA: u64 = 1_000_000;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

struct MockLedger {
    params: ProtocolParameters,
    indexed: BTreeMap<Address, UtxoMap>,
}

impl LedgerQuery for MockLedger {
    fn protocol_parameters(
        &self,
    ) -> impl Future<Output = Result<ProtocolParameters, QueryError>> + Send {
        ready(Ok(self.params.clone()))
    }

    fn network_id(&self) -> impl Future<Output = Result<NetworkId, QueryError>> + Send {
        ready(Ok(NetworkId::Testnet))
    }

    fn utxos_at(
        &self,
        address: &Address,
    ) -> impl Future<Output = Result<UtxoMap, QueryError>> + Send {
        ready(
            self.indexed
                .get(address)
                .cloned()
                .ok_or_else(|| QueryError::Unavailable(format!("no index for {address}"))),
        )
    }
}

struct MockWallet {
    change: Option<Address>,
    own: Vec<Address>,
    utxos: UtxoMap,
}

impl MockWallet {
    fn holding(utxos: UtxoMap) -> Self {
        Self {
            change: Some(wallet_address()),
            own: vec![wallet_address()],
            utxos,
        }
    }
}

impl WalletInterface for MockWallet {
    fn own_addresses(&self) -> impl Future<Output = Result<Vec<Address>, QueryError>> + Send {
        ready(Ok(self.own.clone()))
    }

    fn change_address(&self) -> impl Future<Output = Result<Address, QueryError>> + Send {
        ready(
            self.change
                .ok_or_else(|| QueryError::Unavailable("no change address".to_string())),
        )
    }

    fn utxos(&self) -> impl Future<Output = Result<UtxoMap, QueryError>> + Send {
        ready(Ok(self.utxos.clone()))
    }
}

enum MockEvaluator {
    Budget(ExUnits),
    Fail,
}

impl ExUnitsEvaluator for MockEvaluator {
    fn evaluate(
        &self,
        transaction: &Transaction,
        _additional_utxos: &UtxoMap,
    ) -> impl Future<Output = Result<ExUnitsByPointer, TxEvaluationFailure>> + Send {
        let result = match self {
            Self::Budget(units) => Ok(transaction
                .witness_set
                .redeemers
                .iter()
                .map(|redeemer| (redeemer.pointer(), *units))
                .collect()),
            Self::Fail => Err(TxEvaluationFailure::ScriptFailures(BTreeMap::from([(
                RedeemerPointer::new(RedeemerTag::Spend, 1),
                vec![ScriptFailure::ValidatorFailed {
                    error: "the validator crashed / exited prematurely".to_string(),
                    traces: vec!["deadline not reached".to_string()],
                }],
            )]))),
        };
        ready(result)
    }
}

type Runtime = BalancerRuntime<MockLedger, MockWallet, MockEvaluator, BincodeCodec>;

fn params() -> ProtocolParameters {
    let mut params = ProtocolParameters::mainnet_defaults();
    params.cost_models.insert(Language::PlutusV2, vec![100, 200, 300]);
    params
}

fn runtime(wallet: MockWallet, evaluator: MockEvaluator) -> Runtime {
    runtime_indexing(BTreeMap::new(), wallet, evaluator)
}

fn runtime_indexing(
    indexed: BTreeMap<Address, UtxoMap>,
    wallet: MockWallet,
    evaluator: MockEvaluator,
) -> Runtime {
    init_tracing();
    let ledger = MockLedger {
        params: params(),
        indexed,
    };
    BalancerRuntime::new(ledger, wallet, evaluator, BincodeCodec)
}

fn wallet_pkh() -> Hash28 {
    Hash28::new([1; 28])
}

fn wallet_address() -> Address {
    Address::enterprise(NetworkId::Testnet, Credential::PubKey(wallet_pkh()))
}

fn recipient() -> Hash28 {
    Hash28::new([2; 28])
}

fn input(byte: u8) -> TransactionInput {
    TransactionInput::new(Hash32::new([byte; 32]), 0)
}

fn wallet_utxo(byte: u8, value: Value) -> (TransactionInput, TransactionOutput) {
    (input(byte), TransactionOutput::new(wallet_address(), value))
}

fn lookups() -> ScriptLookups {
    ScriptLookups::new(NetworkId::Testnet).with_own_address(wallet_address())
}

fn compile(constraints: &TxConstraints, lookups: &ScriptLookups) -> UnbalancedTx {
    mk_unbalanced_tx(&BincodeCodec, lookups, constraints).expect("constraints compile")
}

fn pay_ada(lovelace: u64) -> UnbalancedTx {
    compile(
        &TxConstraints::new().must_pay_to_pubkey(recipient(), Value::lovelace(lovelace)),
        &lookups(),
    )
}

fn token(tag: u8) -> (Hash28, AssetName) {
    (Hash28::new([tag; 28]), AssetName::new(vec![tag]).expect("asset name"))
}

fn tokens(tag: u8, quantity: u64) -> MultiAsset {
    let (policy, name) = token(tag);
    MultiAsset::singleton(policy, name, quantity)
}

fn total_output_value(transaction: &Transaction) -> Value {
    transaction
        .body
        .outputs
        .iter()
        .try_fold(Value::zero(), |total, output| total.checked_add(&output.amount))
        .expect("no overflow")
}

/// Asserts `inputs + minted == outputs + fee + burned`.
fn assert_conserves_value(transaction: &Transaction, utxos: &UtxoMap) {
    let spent = transaction
        .body
        .inputs
        .iter()
        .try_fold(Value::zero(), |total, input| {
            total.checked_add(&utxos[input].amount)
        })
        .expect("no overflow");
    let (minted, burned) = transaction.body.mint.split().expect("mint splits");

    let mut produced = total_output_value(transaction)
        .checked_add(&burned)
        .expect("no overflow");
    produced.coin = produced
        .coin
        .checked_add(transaction.body.fee)
        .expect("no overflow");
    assert_eq!(spent.checked_add(&minted).expect("no overflow"), produced);
}

struct ScriptFixture {
    unbalanced: UnbalancedTx,
    script_input: TransactionInput,
    utxos: UtxoMap,
}

fn script_spend_fixture() -> ScriptFixture {
    let codec = BincodeCodec;
    let validator = PlutusScript {
        language: Language::PlutusV2,
        bytes: vec![0x49, 0x01, 0x00, 0x00, 0x22, 0x22, 0x00, 0x11],
    };
    let script_hash = codec
        .hash_script(&Script::Plutus(validator.clone()))
        .expect("script hash");
    let datum = PlutusData(vec![0xd8, 0x79, 0x80]);
    let datum_hash = codec.hash_datum(&datum);

    let script_input = input(9);
    let script_output = TransactionOutput::new(
        Address::enterprise(NetworkId::Testnet, Credential::Script(script_hash)),
        Value::lovelace(5 * ADA),
    )
    .with_datum(OutputDatum::Hash(datum_hash));

    let lookups = lookups()
        .with_utxo(script_input, script_output.clone())
        .with_validator(script_hash, validator)
        .with_datum(datum_hash, datum);
    let constraints = TxConstraints::new()
        .must_spend_script_output(script_input, PlutusData(vec![0x00]))
        .must_pay_to_pubkey(recipient(), Value::lovelace(5 * ADA));

    let (wallet_input, wallet_output) = wallet_utxo(1, Value::lovelace(20 * ADA));
    ScriptFixture {
        unbalanced: compile(&constraints, &lookups),
        script_input,
        utxos: UtxoMap::from([(script_input, script_output), (wallet_input, wallet_output)]),
    }
}

#[tokio::test]
async fn pays_five_ada_from_single_ten_ada_utxo() {
    let utxos = UtxoMap::from([wallet_utxo(1, Value::lovelace(10 * ADA))]);
    let runtime = runtime(
        MockWallet::holding(utxos.clone()),
        MockEvaluator::Budget(ExUnits::default()),
    );

    let balanced = runtime
        .balance_tx(pay_ada(5 * ADA), &BalanceTxConstraintsBuilder::new())
        .await
        .expect("balanced");

    assert_eq!(balanced.body.inputs.len(), 1);
    assert_eq!(balanced.body.outputs.len(), 2);
    assert_eq!(balanced.body.outputs[0].amount, Value::lovelace(5 * ADA));
    assert_eq!(balanced.body.outputs[1].address, wallet_address());
    assert_eq!(
        balanced.body.outputs[1].amount.coin,
        Coin(5 * ADA - balanced.body.fee.0)
    );
    assert_eq!(balanced.body.network_id, Some(NetworkId::Testnet));
    assert!(balanced.body.collateral.is_empty());
    assert_eq!(balanced.body.script_data_hash, None);

    let required = min_fee(&BincodeCodec, &params(), &balanced, &utxos).expect("min fee");
    assert!(balanced.body.fee >= required);
    assert!(balanced.body.fee.0 < ADA);
}

#[tokio::test]
async fn empty_wallet_is_insufficient() {
    let runtime = runtime(
        MockWallet::holding(UtxoMap::new()),
        MockEvaluator::Budget(ExUnits::default()),
    );

    let err = runtime
        .balance_tx(pay_ada(5 * ADA), &BalanceTxConstraintsBuilder::new())
        .await
        .expect_err("nothing to spend");

    match err {
        BalanceTxError::BalanceInsufficientError {
            expected,
            actual,
            invalid_in_context,
        } => {
            assert_eq!(expected, Value::lovelace(5 * ADA));
            assert_eq!(actual, Value::zero());
            assert_eq!(invalid_in_context, Value::zero());
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn non_spendable_value_is_reported_as_invalid_in_context() {
    let utxos = UtxoMap::from([
        wallet_utxo(1, Value::lovelace(10 * ADA)),
        wallet_utxo(2, Value::lovelace(50 * ADA)),
    ]);
    let runtime = runtime(
        MockWallet::holding(utxos),
        MockEvaluator::Budget(ExUnits::default()),
    );
    let builder = BalanceTxConstraintsBuilder::new()
        .must_not_spend_utxos([input(2)].into_iter().collect());

    let err = runtime
        .balance_tx(pay_ada(20 * ADA), &builder)
        .await
        .expect_err("reserved utxo");

    match err {
        BalanceTxError::BalanceInsufficientError {
            actual,
            invalid_in_context,
            ..
        } => {
            assert_eq!(actual, Value::lovelace(10 * ADA));
            assert_eq!(invalid_in_context, Value::lovelace(50 * ADA));
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn missing_token_is_reported_per_asset() {
    let runtime = runtime(
        MockWallet::holding(UtxoMap::from([wallet_utxo(1, Value::lovelace(100 * ADA))])),
        MockEvaluator::Budget(ExUnits::default()),
    );
    let unbalanced = compile(
        &TxConstraints::new()
            .must_pay_to_pubkey(recipient(), Value::new(Coin(2 * ADA), tokens(7, 5))),
        &lookups(),
    );

    let err = runtime
        .balance_tx(unbalanced, &BalanceTxConstraintsBuilder::new())
        .await
        .expect_err("token not held");

    match err {
        BalanceTxError::InsufficientUtxoBalanceToCoverAsset { asset, missing } => {
            let (policy, name) = token(7);
            assert_eq!(asset, AssetClass::token(policy, name));
            assert_eq!(missing, 5);
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn token_change_is_split_by_max_quantity() {
    let wallet = UtxoMap::from([wallet_utxo(
        1,
        Value::new(Coin(10 * ADA), tokens(3, 300)),
    )]);
    let runtime = runtime(
        MockWallet::holding(wallet.clone()),
        MockEvaluator::Budget(ExUnits::default()),
    );
    let builder = BalanceTxConstraintsBuilder::new().must_gen_change_outs_with_max_token_quantity(100);

    let balanced = runtime
        .balance_tx(pay_ada(2 * ADA), &builder)
        .await
        .expect("balanced");

    let change = &balanced.body.outputs[1..];
    assert_eq!(change.len(), 3);
    let (policy, name) = token(3);
    for output in change {
        assert_eq!(output.amount.assets.get(&policy, &name), 100);
        let required = min_ada_required(&BincodeCodec, &params(), output).expect("min ada");
        assert!(output.amount.coin >= required);
    }

    let mut produced = total_output_value(&balanced);
    produced.coin = produced.coin.checked_add(balanced.body.fee).expect("sum");
    assert_eq!(produced, wallet[&input(1)].amount);
}

#[tokio::test]
async fn change_goes_to_requested_address_with_datum() {
    let elsewhere = Address::enterprise(NetworkId::Testnet, Credential::PubKey(Hash28::new([4; 28])));
    let datum = OutputDatum::Inline(PlutusData(vec![0x01]));
    let runtime = runtime(
        MockWallet::holding(UtxoMap::from([wallet_utxo(1, Value::lovelace(10 * ADA))])),
        MockEvaluator::Budget(ExUnits::default()),
    );
    let builder = BalanceTxConstraintsBuilder::new()
        .must_send_change_to_address(elsewhere)
        .must_send_change_with_datum(datum.clone());

    let balanced = runtime
        .balance_tx(pay_ada(3 * ADA), &builder)
        .await
        .expect("balanced");

    let change = balanced.body.outputs.last().expect("change output");
    assert_eq!(change.address, elsewhere);
    assert_eq!(change.datum, datum);
}

#[tokio::test]
async fn change_address_falls_back_and_fails_without_own_addresses() {
    let wallet = MockWallet {
        change: None,
        own: Vec::new(),
        utxos: UtxoMap::from([wallet_utxo(1, Value::lovelace(10 * ADA))]),
    };
    let runtime = runtime(wallet, MockEvaluator::Budget(ExUnits::default()));

    let err = runtime
        .balance_tx(pay_ada(ADA), &BalanceTxConstraintsBuilder::new())
        .await
        .expect_err("no change address");
    assert!(matches!(err, BalanceTxError::CouldNotGetChangeAddress(_)));
}

#[tokio::test]
async fn script_spend_gets_budgets_collateral_and_integrity_hash() {
    let fixture = script_spend_fixture();
    let wallet: UtxoMap = fixture
        .utxos
        .iter()
        .filter(|(input, _)| **input != fixture.script_input)
        .map(|(input, output)| (*input, output.clone()))
        .collect();
    let runtime = runtime(
        MockWallet::holding(wallet),
        MockEvaluator::Budget(ExUnits::new(500_000, 200_000_000)),
    );

    let balanced = runtime
        .balance_tx(fixture.unbalanced.clone(), &BalanceTxConstraintsBuilder::new())
        .await
        .expect("balanced");

    assert_eq!(
        balanced.body.inputs.iter().copied().collect::<Vec<_>>(),
        vec![input(1), fixture.script_input]
    );
    assert_eq!(balanced.witness_set.redeemers.len(), 1);
    let redeemer = &balanced.witness_set.redeemers[0];
    assert_eq!(redeemer.pointer(), RedeemerPointer::new(RedeemerTag::Spend, 1));
    assert_eq!(redeemer.ex_units, ExUnits::new(500_000, 200_000_000));

    assert_eq!(balanced.body.collateral.len(), 1);
    assert!(balanced.body.total_collateral.is_some());
    assert!(balanced.body.collateral_return.is_some());
    assert!(balanced.body.script_data_hash.is_some());

    let required = min_fee(&BincodeCodec, &params(), &balanced, &fixture.utxos).expect("min fee");
    assert!(balanced.body.fee >= required);

    let rebalanced = runtime
        .rebalance_tx(
            balanced.clone(),
            fixture.unbalanced.used_utxos.clone(),
            &BalanceTxConstraintsBuilder::new(),
        )
        .await
        .expect("rebalanced");
    assert_eq!(rebalanced, balanced);
}

#[tokio::test]
async fn validator_failure_surfaces_pretty_report() {
    let fixture = script_spend_fixture();
    let runtime = runtime(
        MockWallet::holding(UtxoMap::from([wallet_utxo(1, Value::lovelace(20 * ADA))])),
        MockEvaluator::Fail,
    );

    let err = runtime
        .balance_tx(fixture.unbalanced, &BalanceTxConstraintsBuilder::new())
        .await
        .expect_err("validator fails");

    assert!(matches!(err, BalanceTxError::ExUnitsEvaluationFailed { .. }));
    let report = err.pretty();
    assert!(report.contains("Script failures:"));
    assert!(report.contains("deadline not reached"));
}

#[tokio::test]
async fn rebalancing_a_balanced_transaction_is_a_no_op() {
    let runtime = runtime(
        MockWallet::holding(UtxoMap::from([
            wallet_utxo(1, Value::lovelace(10 * ADA)),
            wallet_utxo(2, Value::lovelace(4 * ADA)),
        ])),
        MockEvaluator::Budget(ExUnits::default()),
    );
    let builder = BalanceTxConstraintsBuilder::new();

    let balanced = runtime
        .balance_tx(pay_ada(12 * ADA), &builder)
        .await
        .expect("balanced");
    assert_eq!(balanced.body.inputs.len(), 2);

    let rebalanced = runtime
        .rebalance_tx(balanced.clone(), UtxoMap::new(), &builder)
        .await
        .expect("rebalanced");
    assert_eq!(rebalanced, balanced);
}

#[tokio::test]
async fn iteration_bound_is_enforced() {
    let runtime = runtime(
        MockWallet::holding(UtxoMap::from([wallet_utxo(1, Value::lovelace(10 * ADA))])),
        MockEvaluator::Budget(ExUnits::default()),
    )
    .with_config(BalancerConfig::default().with_max_iterations(1));

    let err = runtime
        .balance_tx(pay_ada(5 * ADA), &BalanceTxConstraintsBuilder::new())
        .await
        .expect_err("one pass only selects inputs");
    assert!(matches!(
        err,
        BalanceTxError::BalancerDidNotConverge { iterations: 1 }
    ));
}

#[tokio::test]
async fn plutus_mint_balances_with_mint_redeemer() {
    let policy_script = Script::Plutus(PlutusScript {
        language: Language::PlutusV2,
        bytes: vec![0x4d, 0x01, 0x00, 0x00, 0x33],
    });
    let policy = BincodeCodec.hash_script(&policy_script).expect("policy id");
    let name = AssetName::new(b"coupon".to_vec()).expect("asset name");
    let utxos = UtxoMap::from([wallet_utxo(1, Value::lovelace(20 * ADA))]);
    let runtime = runtime(
        MockWallet::holding(utxos.clone()),
        MockEvaluator::Budget(ExUnits::new(300_000, 100_000_000)),
    );
    let unbalanced = compile(
        &TxConstraints::new()
            .must_mint_value(policy, name.clone(), 10, Some(PlutusData(vec![0x01])))
            .must_pay_to_pubkey(
                recipient(),
                Value::new(Coin(2 * ADA), MultiAsset::singleton(policy, name.clone(), 10)),
            ),
        &lookups().with_minting_policy(policy, policy_script),
    );

    let balanced = runtime
        .balance_tx(unbalanced, &BalanceTxConstraintsBuilder::new())
        .await
        .expect("balanced");

    assert_eq!(balanced.witness_set.redeemers.len(), 1);
    let redeemer = &balanced.witness_set.redeemers[0];
    assert_eq!(redeemer.pointer(), RedeemerPointer::new(RedeemerTag::Mint, 0));
    assert_eq!(redeemer.ex_units, ExUnits::new(300_000, 100_000_000));
    assert_eq!(balanced.body.collateral.len(), 1);
    assert!(balanced.body.script_data_hash.is_some());
    assert_eq!(balanced.body.outputs[0].amount.assets.get(&policy, &name), 10);
    for change in &balanced.body.outputs[1..] {
        assert!(change.amount.is_pure_ada());
    }
    assert_conserves_value(&balanced, &utxos);
}

#[tokio::test]
async fn native_burn_leaves_token_free_change() {
    let policy_script = Script::Native(NativeScript::Pubkey(wallet_pkh()));
    let policy = BincodeCodec.hash_script(&policy_script).expect("policy id");
    let name = AssetName::new(b"ticket".to_vec()).expect("asset name");
    let utxos = UtxoMap::from([
        wallet_utxo(1, Value::lovelace(10 * ADA)),
        wallet_utxo(
            2,
            Value::new(Coin(3 * ADA), MultiAsset::singleton(policy, name.clone(), 5)),
        ),
    ]);
    let runtime = runtime(
        MockWallet::holding(utxos.clone()),
        MockEvaluator::Budget(ExUnits::default()),
    );
    let unbalanced = compile(
        &TxConstraints::new().must_mint_value(policy, name, -5, None),
        &lookups().with_minting_policy(policy, policy_script),
    );

    let balanced = runtime
        .balance_tx(unbalanced, &BalanceTxConstraintsBuilder::new())
        .await
        .expect("balanced");

    assert!(balanced.body.inputs.contains(&input(2)));
    assert!(balanced.witness_set.redeemers.is_empty());
    assert!(balanced.body.collateral.is_empty());
    assert!(!balanced.body.outputs.is_empty());
    for output in &balanced.body.outputs {
        assert_eq!(output.address, wallet_address());
        assert!(output.amount.is_pure_ada());
    }
    assert_conserves_value(&balanced, &utxos);
}

#[tokio::test]
async fn additional_utxos_fund_an_empty_wallet() {
    let (extra_input, extra_output) = wallet_utxo(5, Value::lovelace(10 * ADA));
    let runtime = runtime(
        MockWallet::holding(UtxoMap::new()),
        MockEvaluator::Budget(ExUnits::default()),
    );
    let builder = BalanceTxConstraintsBuilder::new()
        .must_use_additional_utxos(UtxoMap::from([(extra_input, extra_output.clone())]));

    let balanced = runtime
        .balance_tx(pay_ada(4 * ADA), &builder)
        .await
        .expect("balanced");

    assert_eq!(
        balanced.body.inputs.iter().copied().collect::<Vec<_>>(),
        vec![extra_input]
    );
    assert_conserves_value(&balanced, &UtxoMap::from([(extra_input, extra_output)]));
}

#[tokio::test]
async fn utxos_at_addresses_replace_the_wallet_snapshot() {
    let other = Address::enterprise(NetworkId::Testnet, Credential::PubKey(Hash28::new([6; 28])));
    let indexed_utxos = UtxoMap::from([(
        input(6),
        TransactionOutput::new(other, Value::lovelace(8 * ADA)),
    )]);
    let runtime = runtime_indexing(
        BTreeMap::from([(other, indexed_utxos.clone())]),
        MockWallet::holding(UtxoMap::from([wallet_utxo(1, Value::lovelace(50 * ADA))])),
        MockEvaluator::Budget(ExUnits::default()),
    );
    let builder = BalanceTxConstraintsBuilder::new().must_use_utxos_at_addresses(vec![other]);

    let balanced = runtime
        .balance_tx(pay_ada(3 * ADA), &builder)
        .await
        .expect("balanced");

    assert_eq!(
        balanced.body.inputs.iter().copied().collect::<Vec<_>>(),
        vec![input(6)]
    );
    assert_eq!(balanced.body.outputs[1].address, wallet_address());
    assert_conserves_value(&balanced, &indexed_utxos);

    let unindexed = Address::enterprise(NetworkId::Testnet, Credential::PubKey(Hash28::new([7; 28])));
    let err = runtime
        .balance_tx(
            pay_ada(3 * ADA),
            &BalanceTxConstraintsBuilder::new().must_use_utxos_at_addresses(vec![unindexed]),
        )
        .await
        .expect_err("address not indexed");
    assert!(matches!(err, BalanceTxError::CouldNotGetUtxos(_)));
}

#[tokio::test]
async fn explicit_collateral_utxos_are_used_and_not_spent() {
    let fixture = script_spend_fixture();
    let (reserved_input, reserved_output) = wallet_utxo(3, Value::lovelace(5 * ADA));
    let runtime = runtime(
        MockWallet::holding(UtxoMap::from([
            wallet_utxo(1, Value::lovelace(20 * ADA)),
            (reserved_input, reserved_output.clone()),
        ])),
        MockEvaluator::Budget(ExUnits::new(500_000, 200_000_000)),
    );
    let builder = BalanceTxConstraintsBuilder::new()
        .must_use_collateral_utxos(UtxoMap::from([(reserved_input, reserved_output)]));

    let balanced = runtime
        .balance_tx(fixture.unbalanced, &builder)
        .await
        .expect("balanced");

    assert_eq!(
        balanced.body.collateral.iter().copied().collect::<Vec<_>>(),
        vec![reserved_input]
    );
    assert!(!balanced.body.inputs.contains(&reserved_input));
    let total = balanced.body.total_collateral.expect("total collateral");
    let returned = balanced
        .body
        .collateral_return
        .as_ref()
        .expect("collateral return");
    assert_eq!(returned.amount.coin, Coin(5 * ADA - total.0));
}

#[tokio::test]
async fn optimal_strategy_prefers_an_exact_token_match() {
    let (policy, name) = token(8);
    let utxos = UtxoMap::from([
        wallet_utxo(1, Value::new(Coin(10 * ADA), tokens(8, 70))),
        wallet_utxo(2, Value::new(Coin(10 * ADA), tokens(8, 50))),
        wallet_utxo(3, Value::new(Coin(10 * ADA), tokens(8, 30))),
    ]);
    let runtime = runtime(
        MockWallet::holding(utxos.clone()),
        MockEvaluator::Budget(ExUnits::default()),
    );
    let unbalanced = || {
        compile(
            &TxConstraints::new()
                .must_pay_to_pubkey(recipient(), Value::new(Coin(2 * ADA), tokens(8, 80))),
            &lookups(),
        )
    };

    let optimal = runtime
        .balance_tx(
            unbalanced(),
            &BalanceTxConstraintsBuilder::new()
                .must_use_coin_selection_strategy(CoinSelectionStrategy::Optimal),
        )
        .await
        .expect("balanced");
    assert_eq!(
        optimal.body.inputs.iter().copied().collect::<Vec<_>>(),
        vec![input(2), input(3)]
    );
    for change in &optimal.body.outputs[1..] {
        assert_eq!(change.amount.assets.get(&policy, &name), 0);
    }
    assert_conserves_value(&optimal, &utxos);

    let largest_first = runtime
        .balance_tx(
            unbalanced(),
            &BalanceTxConstraintsBuilder::new()
                .must_use_coin_selection_strategy(CoinSelectionStrategy::LargestFirst),
        )
        .await
        .expect("balanced");
    assert_eq!(
        largest_first.body.inputs.iter().copied().collect::<Vec<_>>(),
        vec![input(1), input(2)]
    );
}

#[tokio::test]
async fn script_transaction_without_eligible_collateral_fails() {
    let fixture = script_spend_fixture();
    let script_locked = Address::enterprise(NetworkId::Testnet, Credential::Script(Hash28::new([9; 28])));
    let runtime = runtime(
        MockWallet::holding(UtxoMap::from([wallet_utxo(1, Value::lovelace(20 * ADA))])),
        MockEvaluator::Budget(ExUnits::new(500_000, 200_000_000)),
    );
    let builder = BalanceTxConstraintsBuilder::new().must_use_collateral_utxos(UtxoMap::from([(
        input(30),
        TransactionOutput::new(script_locked, Value::lovelace(50 * ADA)),
    )]));

    let err = runtime
        .balance_tx(fixture.unbalanced, &builder)
        .await
        .expect_err("no eligible collateral");

    match err {
        BalanceTxError::CouldNotGetCollateral(diagnostics) => {
            let parsed: serde_json::Value =
                serde_json::from_str(&diagnostics).expect("json diagnostics");
            assert_eq!(parsed["candidates"].as_array().map(Vec::len), Some(0));
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn dust_collateral_cannot_fund_its_return_output() {
    let fixture = script_spend_fixture();
    let runtime = runtime(
        MockWallet::holding(UtxoMap::from([wallet_utxo(1, Value::lovelace(20 * ADA))])),
        MockEvaluator::Budget(ExUnits::new(500_000, 200_000_000)),
    );
    let builder = BalanceTxConstraintsBuilder::new().must_use_collateral_utxos(UtxoMap::from([
        wallet_utxo(31, Value::lovelace(100_000)),
    ]));

    let err = runtime
        .balance_tx(fixture.unbalanced, &builder)
        .await
        .expect_err("return below minimum ADA");
    assert!(matches!(err, BalanceTxError::CollateralReturnError(_)));
}
