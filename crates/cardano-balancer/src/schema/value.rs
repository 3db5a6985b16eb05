//! Coin, multi-asset and mint arithmetic.
//!
//! Every operation is exact. Addition overflow and subtraction below zero are reported as
//! [`ValueError`]s naming the offending asset; nothing is clamped. Maps never hold zero
//! quantities or empty policy entries, so structural equality is value equality.

use std::collections::BTreeMap;
use std::fmt;

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::schema::hash::PolicyId;

/// Maximum asset name length accepted by the ledger.
pub const MAX_ASSET_NAME_LEN: usize = 32;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValueError {
    #[error("quantity overflow for {asset}")]
    Overflow { asset: AssetClass },

    #[error("value would be negative for {asset}: {have} - {need}")]
    Negative {
        asset: AssetClass,
        have: u64,
        need: u64,
    },

    #[error("asset name is {0} bytes, at most {MAX_ASSET_NAME_LEN} allowed")]
    AssetNameTooLong(usize),
}

/// Lovelace amount.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Coin(pub u64);

impl Coin {
    pub const ZERO: Self = Self(0);

    #[must_use]
    pub const fn new(lovelace: u64) -> Self {
        Self(lovelace)
    }

    #[must_use]
    pub const fn lovelace(self) -> u64 {
        self.0
    }

    pub fn checked_add(self, rhs: Self) -> Result<Self, ValueError> {
        self.0
            .checked_add(rhs.0)
            .map(Self)
            .ok_or(ValueError::Overflow {
                asset: AssetClass::Lovelace,
            })
    }

    pub fn checked_sub(self, rhs: Self) -> Result<Self, ValueError> {
        self.0
            .checked_sub(rhs.0)
            .map(Self)
            .ok_or(ValueError::Negative {
                asset: AssetClass::Lovelace,
                have: self.0,
                need: rhs.0,
            })
    }
}

impl fmt::Display for Coin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} lovelace", self.0)
    }
}

#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct AssetName(Vec<u8>);

impl AssetName {
    pub fn new(bytes: impl Into<Vec<u8>>) -> Result<Self, ValueError> {
        let bytes = bytes.into();
        if bytes.len() > MAX_ASSET_NAME_LEN {
            return Err(ValueError::AssetNameTooLong(bytes.len()));
        }
        Ok(Self(bytes))
    }

    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Display for AssetName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(&self.0))
    }
}

impl Serialize for AssetName {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        if serializer.is_human_readable() {
            serializer.serialize_str(&self.to_string())
        } else {
            self.0.serialize(serializer)
        }
    }
}

impl<'de> Deserialize<'de> for AssetName {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let bytes = if deserializer.is_human_readable() {
            hex::decode(String::deserialize(deserializer)?).map_err(D::Error::custom)?
        } else {
            Vec::<u8>::deserialize(deserializer)?
        };
        Self::new(bytes).map_err(D::Error::custom)
    }
}

impl fmt::Debug for AssetName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AssetName({self})")
    }
}

/// One fungible unit of account: lovelace or a native token.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssetClass {
    Lovelace,
    Token { policy: PolicyId, name: AssetName },
}

impl AssetClass {
    #[must_use]
    pub const fn token(policy: PolicyId, name: AssetName) -> Self {
        Self::Token { policy, name }
    }

    #[must_use]
    pub const fn is_lovelace(&self) -> bool {
        matches!(self, Self::Lovelace)
    }
}

impl fmt::Display for AssetClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Lovelace => f.write_str("lovelace"),
            Self::Token { policy, name } => write!(f, "{policy}.{name}"),
        }
    }
}

type AssetMap = BTreeMap<PolicyId, BTreeMap<AssetName, u64>>;

/// Native tokens grouped by policy.
///
/// Never holds zero quantities or empty policies, including after deserialization.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "AssetMap", into = "AssetMap")]
pub struct MultiAsset(AssetMap);

impl TryFrom<AssetMap> for MultiAsset {
    type Error = ValueError;

    fn try_from(raw: AssetMap) -> Result<Self, Self::Error> {
        let mut assets = Self::new();
        for (policy, tokens) in raw {
            for (name, quantity) in tokens {
                assets.add(policy, name, quantity)?;
            }
        }
        Ok(assets)
    }
}

impl From<MultiAsset> for AssetMap {
    fn from(assets: MultiAsset) -> Self {
        assets.0
    }
}

impl MultiAsset {
    #[must_use]
    pub const fn new() -> Self {
        Self(BTreeMap::new())
    }

    #[must_use]
    pub fn singleton(policy: PolicyId, name: AssetName, quantity: u64) -> Self {
        let mut assets = Self::new();
        if quantity > 0 {
            assets
                .0
                .entry(policy)
                .or_default()
                .insert(name, quantity);
        }
        assets
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    #[must_use]
    pub fn get(&self, policy: &PolicyId, name: &AssetName) -> u64 {
        self.0
            .get(policy)
            .and_then(|assets| assets.get(name))
            .copied()
            .unwrap_or(0)
    }

    /// Add `quantity` of one token. Zero quantities leave the map untouched.
    pub fn add(
        &mut self,
        policy: PolicyId,
        name: AssetName,
        quantity: u64,
    ) -> Result<(), ValueError> {
        if quantity == 0 {
            return Ok(());
        }
        let entry = self.0.entry(policy).or_default().entry(name.clone()).or_insert(0);
        *entry = entry.checked_add(quantity).ok_or(ValueError::Overflow {
            asset: AssetClass::token(policy, name),
        })?;
        Ok(())
    }

    /// Remove `quantity` of one token, dropping emptied entries.
    pub fn sub(
        &mut self,
        policy: PolicyId,
        name: &AssetName,
        quantity: u64,
    ) -> Result<(), ValueError> {
        if quantity == 0 {
            return Ok(());
        }
        let have = self.get(&policy, name);
        let remaining = have.checked_sub(quantity).ok_or_else(|| ValueError::Negative {
            asset: AssetClass::token(policy, name.clone()),
            have,
            need: quantity,
        })?;

        if let Some(assets) = self.0.get_mut(&policy) {
            if remaining == 0 {
                assets.remove(name);
            } else {
                assets.insert(name.clone(), remaining);
            }
            if assets.is_empty() {
                self.0.remove(&policy);
            }
        }
        Ok(())
    }

    pub fn checked_add(&self, rhs: &Self) -> Result<Self, ValueError> {
        let mut sum = self.clone();
        for (policy, name, quantity) in rhs.iter() {
            sum.add(*policy, name.clone(), quantity)?;
        }
        Ok(sum)
    }

    pub fn checked_sub(&self, rhs: &Self) -> Result<Self, ValueError> {
        let mut difference = self.clone();
        for (policy, name, quantity) in rhs.iter() {
            difference.sub(*policy, name, quantity)?;
        }
        Ok(difference)
    }

    /// Tokens in canonical order: policy id, then asset name.
    pub fn iter(&self) -> impl Iterator<Item = (&PolicyId, &AssetName, u64)> {
        self.0.iter().flat_map(|(policy, assets)| {
            assets
                .iter()
                .map(move |(name, quantity)| (policy, name, *quantity))
        })
    }

    pub fn policies(&self) -> impl Iterator<Item = &PolicyId> {
        self.0.keys()
    }

    /// Assets under one policy, in name order.
    pub fn assets_of(&self, policy: &PolicyId) -> impl Iterator<Item = (&AssetName, u64)> {
        self.0
            .get(policy)
            .into_iter()
            .flat_map(|assets| assets.iter().map(|(name, quantity)| (name, *quantity)))
    }

    #[must_use]
    pub fn token_count(&self) -> usize {
        self.0.values().map(BTreeMap::len).sum()
    }
}

/// Lovelace plus native tokens.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Value {
    pub coin: Coin,
    #[serde(default)]
    pub assets: MultiAsset,
}

impl Value {
    #[must_use]
    pub const fn new(coin: Coin, assets: MultiAsset) -> Self {
        Self { coin, assets }
    }

    #[must_use]
    pub const fn lovelace(amount: u64) -> Self {
        Self {
            coin: Coin(amount),
            assets: MultiAsset::new(),
        }
    }

    #[must_use]
    pub const fn zero() -> Self {
        Self::lovelace(0)
    }

    #[must_use]
    pub fn is_zero(&self) -> bool {
        self.coin == Coin::ZERO && self.assets.is_empty()
    }

    #[must_use]
    pub fn is_pure_ada(&self) -> bool {
        self.assets.is_empty()
    }

    pub fn checked_add(&self, rhs: &Self) -> Result<Self, ValueError> {
        Ok(Self {
            coin: self.coin.checked_add(rhs.coin)?,
            assets: self.assets.checked_add(&rhs.assets)?,
        })
    }

    pub fn checked_sub(&self, rhs: &Self) -> Result<Self, ValueError> {
        Ok(Self {
            coin: self.coin.checked_sub(rhs.coin)?,
            assets: self.assets.checked_sub(&rhs.assets)?,
        })
    }

    /// Component-wise `self >= rhs`.
    #[must_use]
    pub fn geq(&self, rhs: &Self) -> bool {
        self.coin >= rhs.coin
            && rhs
                .assets
                .iter()
                .all(|(policy, name, quantity)| self.assets.get(policy, name) >= quantity)
    }

    #[must_use]
    pub fn quantity_of(&self, asset: &AssetClass) -> u64 {
        match asset {
            AssetClass::Lovelace => self.coin.0,
            AssetClass::Token { policy, name } => self.assets.get(policy, name),
        }
    }

    pub fn add_quantity(&mut self, asset: &AssetClass, quantity: u64) -> Result<(), ValueError> {
        match asset {
            AssetClass::Lovelace => {
                self.coin = self.coin.checked_add(Coin(quantity))?;
                Ok(())
            }
            AssetClass::Token { policy, name } => self.assets.add(*policy, name.clone(), quantity),
        }
    }

    /// Every non-zero component, lovelace first.
    #[must_use]
    pub fn components(&self) -> Vec<(AssetClass, u64)> {
        let mut components = Vec::with_capacity(self.assets.token_count() + 1);
        if self.coin.0 > 0 {
            components.push((AssetClass::Lovelace, self.coin.0));
        }
        components.extend(
            self.assets
                .iter()
                .map(|(policy, name, quantity)| (AssetClass::token(*policy, name.clone()), quantity)),
        );
        components
    }

    /// Positive part of `rhs - self` per asset: what `self` lacks to cover `rhs`.
    #[must_use]
    pub fn shortfall_against(&self, rhs: &Self) -> BTreeMap<AssetClass, u64> {
        rhs.components()
            .into_iter()
            .filter_map(|(asset, needed)| {
                let have = self.quantity_of(&asset);
                (needed > have).then(|| (asset, needed - have))
            })
            .collect()
    }

    /// Component-wise `max(self - rhs, 0)`.
    #[must_use]
    pub fn saturating_sub(&self, rhs: &Self) -> Self {
        let mut assets = MultiAsset::new();
        for (policy, name, quantity) in self.assets.iter() {
            let remaining = quantity.saturating_sub(rhs.assets.get(policy, name));
            if remaining > 0 {
                assets
                    .0
                    .entry(*policy)
                    .or_default()
                    .insert(name.clone(), remaining);
            }
        }
        Self {
            coin: Coin(self.coin.0.saturating_sub(rhs.coin.0)),
            assets,
        }
    }
}

impl From<Coin> for Value {
    fn from(coin: Coin) -> Self {
        Self::lovelace(coin.0)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.coin)?;
        for (policy, name, quantity) in self.assets.iter() {
            write!(f, " + {quantity} {policy}.{name}")?;
        }
        Ok(())
    }
}

/// Signed token quantities minted (positive) or burned (negative) by a transaction.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Mint(BTreeMap<PolicyId, BTreeMap<AssetName, i64>>);

impl Mint {
    #[must_use]
    pub const fn new() -> Self {
        Self(BTreeMap::new())
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Accumulate a signed quantity; entries that cancel out are removed.
    pub fn add(&mut self, policy: PolicyId, name: AssetName, amount: i64) -> Result<(), ValueError> {
        if amount == 0 {
            return Ok(());
        }
        let assets = self.0.entry(policy).or_default();
        let current = assets.get(&name).copied().unwrap_or(0);
        let next = current.checked_add(amount).ok_or_else(|| ValueError::Overflow {
            asset: AssetClass::token(policy, name.clone()),
        })?;
        if next == 0 {
            assets.remove(&name);
        } else {
            assets.insert(name, next);
        }
        if assets.is_empty() {
            self.0.remove(&policy);
        }
        Ok(())
    }

    /// Policies in ascending order; this is the order mint redeemers are indexed against.
    pub fn policies(&self) -> impl Iterator<Item = &PolicyId> {
        self.0.keys()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&PolicyId, &AssetName, i64)> {
        self.0.iter().flat_map(|(policy, assets)| {
            assets
                .iter()
                .map(move |(name, amount)| (policy, name, *amount))
        })
    }

    /// Split into the minted (positive) and burned (negated negative) parts.
    pub fn split(&self) -> Result<(Value, Value), ValueError> {
        let mut minted = MultiAsset::new();
        let mut burned = MultiAsset::new();
        for (policy, name, amount) in self.iter() {
            if amount > 0 {
                minted.add(*policy, name.clone(), amount.unsigned_abs())?;
            } else {
                burned.add(*policy, name.clone(), amount.unsigned_abs())?;
            }
        }
        Ok((
            Value::new(Coin::ZERO, minted),
            Value::new(Coin::ZERO, burned),
        ))
    }
}
