//! Constraint compiler.
//!
//! [`mk_unbalanced_tx`] folds a [`TxConstraints`] list, in declaration order, into a draft
//! transaction plus unindexed redeemers. It is pure: no network queries, no input selection,
//! no fee computation. Redeemers are recorded by purpose; pointers are assigned by the
//! balancer once the input set is final.
//!
//! `MustSatisfyAnyOf` runs each alternative against a copy of the builder state and commits
//! the first copy that compiles, so a failing alternative leaves no partial effects.

use crate::encoding::TxCodec;
use crate::error::CompileError;
use crate::schema::constraints::{DatumPlacement, TxConstraint, TxConstraints, ValidityInterval};
use crate::schema::hash::{PolicyId, ScriptHash};
use crate::schema::lookups::ScriptLookups;
use crate::schema::types::{
    Address, Certificate, Credential, NativeScript, OutputDatum, PlutusData, PlutusScript,
    RedeemerPurpose, RewardAddress, Script, Transaction, TransactionInput, TransactionOutput,
    UnbalancedTx, UnindexedRedeemer, UtxoMap,
};
use crate::schema::value::{AssetName, Coin, Value};

/// Mutable draft threaded through constraint processing.
#[derive(Debug, Clone, Default)]
struct TxBuilder {
    transaction: Transaction,
    redeemers: Vec<UnindexedRedeemer>,
    used_utxos: UtxoMap,
    validity: ValidityInterval,
    spent: Value,
    spend_at_least: Value,
    produce_at_least: Value,
}

impl TxBuilder {
    fn add_datum(&mut self, datum: &PlutusData) {
        let datums = &mut self.transaction.witness_set.plutus_data;
        if !datums.contains(datum) {
            datums.push(datum.clone());
        }
    }

    fn add_plutus_script(&mut self, script: &PlutusScript) {
        let scripts = &mut self.transaction.witness_set.plutus_scripts;
        if !scripts.contains(script) {
            scripts.push(script.clone());
        }
    }

    fn add_native_script(&mut self, script: &NativeScript) {
        let scripts = &mut self.transaction.witness_set.native_scripts;
        if !scripts.contains(script) {
            scripts.push(script.clone());
        }
    }

    /// One redeemer per purpose. Registering the same data again is a no-op; different data
    /// for a purpose already present is a conflict.
    fn add_redeemer(
        &mut self,
        purpose: RedeemerPurpose,
        data: &PlutusData,
    ) -> Result<(), CompileError> {
        match self
            .redeemers
            .iter()
            .find(|redeemer| redeemer.purpose == purpose)
        {
            Some(existing) if existing.data == *data => Ok(()),
            Some(_) => Err(CompileError::ConflictingRedeemer(purpose)),
            None => {
                self.redeemers
                    .push(UnindexedRedeemer::new(purpose, data.clone()));
                Ok(())
            }
        }
    }

    fn spend(
        &mut self,
        input: TransactionInput,
        output: &TransactionOutput,
    ) -> Result<(), CompileError> {
        if self.transaction.body.inputs.insert(input) {
            self.spent = self.spent.checked_add(&output.amount)?;
        }
        self.used_utxos.insert(input, output.clone());
        Ok(())
    }

    /// Withdrawing twice from one reward address must name the same amount.
    fn withdraw(&mut self, address: RewardAddress, amount: Coin) -> Result<(), CompileError> {
        match self.transaction.body.withdrawals.get(&address) {
            Some(existing) if *existing != amount => Err(CompileError::ConflictingWithdrawal {
                address,
                existing: *existing,
                requested: amount,
            }),
            _ => {
                self.transaction.body.withdrawals.insert(address, amount);
                Ok(())
            }
        }
    }

    fn finish(mut self, lookups: &ScriptLookups) -> Result<UnbalancedTx, CompileError> {
        let body = &mut self.transaction.body;
        body.validity_start_interval = self.validity.start;
        body.ttl = self.validity.end;
        body.network_id = Some(lookups.network);

        let produced = body
            .outputs
            .iter()
            .try_fold(Value::zero(), |total, output| total.checked_add(&output.amount))?;
        let missing_inputs = self.spend_at_least.saturating_sub(&self.spent);
        let missing_outputs = self.produce_at_least.saturating_sub(&produced);
        // component-wise max of both shortfalls
        let missing =
            missing_inputs.checked_add(&missing_outputs.saturating_sub(&missing_inputs))?;
        if !missing.is_zero() {
            let address = lookups.own_address.ok_or(CompileError::OwnAddressMissing)?;
            body.outputs.push(TransactionOutput::new(address, missing));
        }

        Ok(UnbalancedTx {
            transaction: self.transaction,
            redeemers: self.redeemers,
            used_utxos: self.used_utxos,
        })
    }
}

struct Compiler<'a, C> {
    codec: &'a C,
    lookups: &'a ScriptLookups,
}

impl<C: TxCodec> Compiler<'_, C> {
    fn utxo(&self, input: &TransactionInput) -> Result<&TransactionOutput, CompileError> {
        self.lookups
            .utxos
            .get(input)
            .ok_or(CompileError::TxOutRefNotFound(*input))
    }

    fn check_script_hash(&self, expected: ScriptHash, script: &Script) -> Result<(), CompileError> {
        let actual = self.codec.hash_script(script)?;
        if actual != expected {
            return Err(CompileError::WrongScriptHash { expected, actual });
        }
        Ok(())
    }

    fn validator(&self, hash: ScriptHash) -> Result<&PlutusScript, CompileError> {
        let script = self
            .lookups
            .validators
            .get(&hash)
            .ok_or(CompileError::ValidatorNotFound(hash))?;
        self.check_script_hash(hash, &Script::Plutus(script.clone()))?;
        Ok(script)
    }

    fn native_script(&self, hash: ScriptHash) -> Result<&NativeScript, CompileError> {
        let script = self
            .lookups
            .native_scripts
            .get(&hash)
            .ok_or(CompileError::NativeScriptNotFound(hash))?;
        self.check_script_hash(hash, &Script::Native(script.clone()))?;
        Ok(script)
    }

    fn address(&self, payment: Credential, stake: Option<Credential>) -> Address {
        Address::new(self.lookups.network, payment, stake)
    }

    fn reward_address(&self, credential: Credential) -> RewardAddress {
        RewardAddress {
            network: self.lookups.network,
            credential,
        }
    }

    fn output_datum(
        &self,
        builder: &mut TxBuilder,
        datum: &PlutusData,
        placement: DatumPlacement,
    ) -> OutputDatum {
        match placement {
            DatumPlacement::Inline => OutputDatum::Inline(datum.clone()),
            DatumPlacement::Hashed => {
                builder.add_datum(datum);
                OutputDatum::Hash(self.codec.hash_datum(datum))
            }
        }
    }

    fn pay(
        builder: &mut TxBuilder,
        address: Address,
        datum: OutputDatum,
        script_ref: Option<&Script>,
        value: &Value,
    ) {
        let mut output = TransactionOutput::new(address, value.clone()).with_datum(datum);
        output.script_ref = script_ref.cloned();
        builder.transaction.body.outputs.push(output);
    }

    fn mint(
        &self,
        builder: &mut TxBuilder,
        policy: PolicyId,
        asset: &AssetName,
        amount: i64,
        redeemer: Option<&PlutusData>,
    ) -> Result<(), CompileError> {
        if amount == 0 {
            return Err(CompileError::CannotMintZero {
                policy,
                asset: asset.clone(),
            });
        }

        let script = self
            .lookups
            .minting_policies
            .get(&policy)
            .ok_or(CompileError::MintingPolicyNotFound(policy))?;
        self.check_script_hash(policy, script)?;

        match script {
            Script::Plutus(plutus) => {
                let redeemer = redeemer.ok_or(CompileError::MintRedeemerMissing(policy))?;
                builder.add_plutus_script(plutus);
                builder.add_redeemer(RedeemerPurpose::ForMint(policy), redeemer)?;
            }
            Script::Native(native) => builder.add_native_script(native),
        }

        builder
            .transaction
            .body
            .mint
            .add(policy, asset.clone(), amount)?;
        Ok(())
    }

    fn spend_script_output(
        &self,
        builder: &mut TxBuilder,
        input: TransactionInput,
        redeemer: &PlutusData,
        ref_script: Option<TransactionInput>,
    ) -> Result<(), CompileError> {
        let output = self.utxo(&input)?;
        let script_hash = output
            .address
            .payment
            .script_hash()
            .ok_or(CompileError::TxOutRefWrongType(input))?;

        if let Some(ref_input) = ref_script {
            let ref_output = self.utxo(&ref_input)?;
            let carries_validator = match &ref_output.script_ref {
                Some(script) => self.codec.hash_script(script)? == script_hash,
                None => false,
            };
            if !carries_validator {
                return Err(CompileError::WrongRefScriptHash {
                    input: ref_input,
                    expected: script_hash,
                });
            }
            builder.transaction.body.reference_inputs.insert(ref_input);
            builder.used_utxos.insert(ref_input, ref_output.clone());
        } else {
            let validator = self.validator(script_hash)?;
            builder.add_plutus_script(validator);
        }

        if let OutputDatum::Hash(hash) = &output.datum {
            let datum = self
                .lookups
                .datums
                .get(hash)
                .ok_or(CompileError::DatumNotFound(*hash))?;
            builder.add_datum(datum);
        }

        builder.spend(input, output)?;
        builder.add_redeemer(RedeemerPurpose::ForSpend(input), redeemer)
    }

    fn plutus_certificate(
        &self,
        builder: &mut TxBuilder,
        script: ScriptHash,
        certificate: Certificate,
        redeemer: &PlutusData,
    ) -> Result<(), CompileError> {
        let validator = self.validator(script)?;
        builder.add_plutus_script(validator);
        builder.transaction.body.certificates.push(certificate);
        builder.add_redeemer(RedeemerPurpose::ForCert(certificate), redeemer)
    }

    fn withdraw(
        &self,
        builder: &mut TxBuilder,
        credential: Credential,
        amount: Coin,
    ) -> Result<RewardAddress, CompileError> {
        let address = self.reward_address(credential);
        builder.withdraw(address, amount)?;
        Ok(address)
    }

    fn certificate(builder: &mut TxBuilder, certificate: Certificate) {
        builder.transaction.body.certificates.push(certificate);
    }

    fn satisfy_any(
        &self,
        builder: &mut TxBuilder,
        alternatives: &[Vec<TxConstraint>],
    ) -> Result<(), CompileError> {
        let mut errors = Vec::with_capacity(alternatives.len());
        for alternative in alternatives {
            let mut attempt = builder.clone();
            match alternative
                .iter()
                .try_for_each(|constraint| self.apply(&mut attempt, constraint))
            {
                Ok(()) => {
                    *builder = attempt;
                    return Ok(());
                }
                Err(error) => errors.push(error),
            }
        }
        Err(CompileError::CannotSatisfyAny(errors))
    }

    fn apply(&self, builder: &mut TxBuilder, constraint: &TxConstraint) -> Result<(), CompileError> {
        match constraint {
            TxConstraint::MustIncludeDatum(datum) => builder.add_datum(datum),
            TxConstraint::MustHashDatum { hash, datum } => {
                let actual = self.codec.hash_datum(datum);
                if actual != *hash {
                    return Err(CompileError::DatumWrongHash {
                        expected: *hash,
                        actual,
                    });
                }
                builder.add_datum(datum);
            }
            TxConstraint::MustValidateIn(interval) => {
                let validity = builder.validity.intersect(interval);
                if validity.is_empty() {
                    return Err(CompileError::CannotSolveTimeConstraints);
                }
                builder.validity = validity;
            }
            TxConstraint::MustBeSignedBy(pkh) => {
                builder.transaction.body.required_signers.insert(*pkh);
            }
            TxConstraint::MustSpendAtLeast(value) => {
                builder.spend_at_least = builder.spend_at_least.checked_add(value)?;
            }
            TxConstraint::MustProduceAtLeast(value) => {
                builder.produce_at_least = builder.produce_at_least.checked_add(value)?;
            }
            TxConstraint::MustPayToPubKeyAddress {
                pkh,
                stake,
                datum,
                script_ref,
                value,
            } => {
                let datum = match datum {
                    Some((datum, placement)) => self.output_datum(builder, datum, *placement),
                    None => OutputDatum::None,
                };
                let address = self.address(Credential::PubKey(*pkh), *stake);
                Self::pay(builder, address, datum, script_ref.as_ref(), value);
            }
            TxConstraint::MustPayToScript {
                script_hash,
                stake,
                datum,
                placement,
                script_ref,
                value,
            } => {
                let datum = self.output_datum(builder, datum, *placement);
                let address = self.address(Credential::Script(*script_hash), *stake);
                Self::pay(builder, address, datum, script_ref.as_ref(), value);
            }
            TxConstraint::MustPayToNativeScript {
                script_hash,
                stake,
                value,
            } => {
                let address = self.address(Credential::Script(*script_hash), *stake);
                Self::pay(builder, address, OutputDatum::None, None, value);
            }
            TxConstraint::MustMintValue {
                policy,
                asset,
                amount,
                redeemer,
            } => self.mint(builder, *policy, asset, *amount, redeemer.as_ref())?,
            TxConstraint::MustSpendPubKeyOutput(input) => {
                let output = self.utxo(input)?;
                if output.address.payment.pubkey_hash().is_none() {
                    return Err(CompileError::TxOutRefWrongType(*input));
                }
                builder.spend(*input, output)?;
            }
            TxConstraint::MustSpendScriptOutput {
                input,
                redeemer,
                ref_script,
            } => self.spend_script_output(builder, *input, redeemer, *ref_script)?,
            TxConstraint::MustSpendNativeScriptOutput(input) => {
                let output = self.utxo(input)?;
                let hash = output
                    .address
                    .payment
                    .script_hash()
                    .ok_or(CompileError::TxOutRefWrongType(*input))?;
                let script = self.native_script(hash)?;
                builder.add_native_script(script);
                builder.spend(*input, output)?;
            }
            TxConstraint::MustReferenceOutput(input) => {
                let output = self.utxo(input)?;
                builder.transaction.body.reference_inputs.insert(*input);
                builder.used_utxos.insert(*input, output.clone());
            }
            TxConstraint::MustRegisterStakePubKey(pkh) => Self::certificate(
                builder,
                Certificate::StakeRegistration(Credential::PubKey(*pkh)),
            ),
            TxConstraint::MustRegisterStakeScript(script) => Self::certificate(
                builder,
                Certificate::StakeRegistration(Credential::Script(*script)),
            ),
            TxConstraint::MustDeregisterStakePubKey(pkh) => Self::certificate(
                builder,
                Certificate::StakeDeregistration(Credential::PubKey(*pkh)),
            ),
            TxConstraint::MustDelegateStakePubKey { pkh, pool } => Self::certificate(
                builder,
                Certificate::StakeDelegation {
                    credential: Credential::PubKey(*pkh),
                    pool: *pool,
                },
            ),
            TxConstraint::MustDeregisterStakePlutusScript { script, redeemer } => self
                .plutus_certificate(
                    builder,
                    *script,
                    Certificate::StakeDeregistration(Credential::Script(*script)),
                    redeemer,
                )?,
            TxConstraint::MustDelegateStakePlutusScript {
                script,
                pool,
                redeemer,
            } => self.plutus_certificate(
                builder,
                *script,
                Certificate::StakeDelegation {
                    credential: Credential::Script(*script),
                    pool: *pool,
                },
                redeemer,
            )?,
            TxConstraint::MustWithdrawStakePubKey { pkh, amount } => {
                self.withdraw(builder, Credential::PubKey(*pkh), *amount)?;
            }
            TxConstraint::MustWithdrawStakePlutusScript {
                script,
                redeemer,
                amount,
            } => {
                let validator = self.validator(*script)?;
                builder.add_plutus_script(validator);
                let address = self.withdraw(builder, Credential::Script(*script), *amount)?;
                builder.add_redeemer(RedeemerPurpose::ForReward(address), redeemer)?;
            }
            TxConstraint::MustNotBeValid => builder.transaction.is_valid = false,
            TxConstraint::MustSatisfyAnyOf(alternatives) => {
                self.satisfy_any(builder, alternatives)?;
            }
        }
        Ok(())
    }
}

/// Compile `constraints` against `lookups` into a draft transaction.
#[tracing::instrument(level = "debug", skip_all, err)]
pub fn mk_unbalanced_tx<C: TxCodec>(
    codec: &C,
    lookups: &ScriptLookups,
    constraints: &TxConstraints,
) -> Result<UnbalancedTx, CompileError> {
    let compiler = Compiler { codec, lookups };
    let mut builder = TxBuilder::default();

    for constraint in &constraints.constraints {
        compiler.apply(&mut builder, constraint)?;
    }

    let unbalanced = builder.finish(lookups)?;
    tracing::debug!(
        inputs = unbalanced.transaction.body.inputs.len(),
        outputs = unbalanced.transaction.body.outputs.len(),
        redeemers = unbalanced.redeemers.len(),
        "compiled constraints into draft transaction"
    );
    Ok(unbalanced)
}
