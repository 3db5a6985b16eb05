//! Redeemer pointer assignment.
//!
//! Pointers follow ledger ordering of the body they are resolved against:
//! - `Spend`: position of the input in the canonical (sorted) input set
//! - `Mint`: position of the policy id among sorted mint policies
//! - `Reward`: position of the reward address among sorted withdrawals
//! - `Cert`: position of the certificate in declaration order
//!
//! Inputs change while balancing, so pointers are recomputed on every pass.

use crate::error::ReindexRedeemersError;
use crate::schema::types::{
    Redeemer, RedeemerPurpose, RedeemerTag, TransactionBody, UnindexedRedeemer,
};

fn position<T: PartialEq>(mut items: impl Iterator<Item = T>, needle: &T) -> Option<u32> {
    items
        .position(|item| item == *needle)
        .and_then(|index| u32::try_from(index).ok())
}

fn index_of(body: &TransactionBody, purpose: &RedeemerPurpose) -> Result<u32, ReindexRedeemersError> {
    match purpose {
        RedeemerPurpose::ForSpend(input) => position(body.inputs.iter(), &input)
            .ok_or(ReindexRedeemersError::CannotGetTxInIndex(*input)),
        RedeemerPurpose::ForMint(policy) => position(body.mint.policies(), &policy)
            .ok_or(ReindexRedeemersError::CannotGetMintingPolicyIndex(*policy)),
        RedeemerPurpose::ForReward(address) => position(body.withdrawals.keys(), &address)
            .ok_or(ReindexRedeemersError::CannotGetRewardAddressIndex(*address)),
        RedeemerPurpose::ForCert(certificate) => position(body.certificates.iter(), &certificate)
            .ok_or(ReindexRedeemersError::CannotGetCertificateIndex(*certificate)),
    }
}

/// Attach pointers to `redeemers` against the current state of `body`.
pub fn index_redeemers(
    body: &TransactionBody,
    redeemers: &[UnindexedRedeemer],
) -> Result<Vec<Redeemer>, ReindexRedeemersError> {
    redeemers
        .iter()
        .map(|redeemer| {
            Ok(Redeemer {
                tag: redeemer.purpose.tag(),
                index: index_of(body, &redeemer.purpose)?,
                data: redeemer.data.clone(),
                ex_units: redeemer.ex_units,
            })
        })
        .collect()
}

/// Recover purposes from pointers; inverse of [`index_redeemers`] for the same body.
pub fn unindex_redeemers(
    body: &TransactionBody,
    redeemers: &[Redeemer],
) -> Result<Vec<UnindexedRedeemer>, ReindexRedeemersError> {
    redeemers
        .iter()
        .map(|redeemer| {
            let pointer = redeemer.pointer();
            let unresolved = || ReindexRedeemersError::CannotResolvePointer(pointer);
            let index = redeemer.index as usize;

            let purpose = match redeemer.tag {
                RedeemerTag::Spend => body
                    .inputs
                    .iter()
                    .nth(index)
                    .map(|input| RedeemerPurpose::ForSpend(*input)),
                RedeemerTag::Mint => body
                    .mint
                    .policies()
                    .nth(index)
                    .map(|policy| RedeemerPurpose::ForMint(*policy)),
                RedeemerTag::Reward => body
                    .withdrawals
                    .keys()
                    .nth(index)
                    .map(|address| RedeemerPurpose::ForReward(*address)),
                RedeemerTag::Cert => body
                    .certificates
                    .get(index)
                    .map(|certificate| RedeemerPurpose::ForCert(*certificate)),
            }
            .ok_or_else(unresolved)?;

            Ok(UnindexedRedeemer {
                purpose,
                data: redeemer.data.clone(),
                ex_units: redeemer.ex_units,
            })
        })
        .collect()
}
