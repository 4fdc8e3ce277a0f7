//! Core shared types used across the deleverage workspace.
//!
//! This crate defines the canonical data model that flows between the lending
//! pool, the settlement engine and the deleverager:
//! - EVM-style identifiers ([`Address`], [`U256`], [`B256`]) re-exported from
//!   `alloy-primitives`
//! - Collateral classes ([`IlkIndex`]) and pool positions ([`Position`])
//! - The settlement engine's order model: [`OrderParameters`] with its
//!   [`OfferItem`]s and [`ConsiderationItem`]s, and the signed [`Order`]
//!
//! Conventions
//! - Asset amounts are WAD-scaled (10^18) integers
//! - Rates and spot prices are RAY-scaled (10^27) integers
//! - Order hashes are SHA-256 over a fixed big-endian field encoding, and
//!   orders are signed with ED25519 over that hash
//!
pub use alloy_primitives::{Address, B256, U256};
use ed25519_dalek::{Signer, SigningKey, Verifier, VerifyingKey};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// Key selecting an intermediary transfer conduit. Zero means "no conduit".
pub type ConduitKey = B256;

/// Hash identifying an order in the settlement engine.
pub type OrderHash = B256;

/// Domain separator mixed into every order hash.
const ORDER_HASH_DOMAIN: &[u8] = b"deleverage-settlement/order/v1";

// --- Identifiers ---

/// Collateral class tracked by the lending pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, PartialOrd, Ord)]
pub struct IlkIndex(pub u32);

impl fmt::Display for IlkIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A debt position as seen by the lending pool.
///
/// `normalized_debt` is WAD-scaled in normalized units; multiply by the ilk's
/// rate (RAY) to get actual debt.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Position {
    pub collateral: U256,
    pub normalized_debt: U256,
}

// --- Order Model ---

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ItemType {
    Native = 0,
    Erc20 = 1,
    Erc721 = 2,
    Erc1155 = 3,
    Erc721WithCriteria = 4,
    Erc1155WithCriteria = 5,
}

impl ItemType {
    /// Whether items of this type are interchangeable token amounts.
    pub fn is_fungible_token(&self) -> bool {
        matches!(self, ItemType::Erc20)
    }
}

/// Who may fulfil an order and whether partial fills are allowed.
///
/// Restricted orders may only be fulfilled by their zone or their offerer.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OrderType {
    FullOpen = 0,
    PartialOpen = 1,
    FullRestricted = 2,
    PartialRestricted = 3,
    Contract = 4,
}

impl OrderType {
    pub fn is_restricted(&self) -> bool {
        matches!(self, OrderType::FullRestricted | OrderType::PartialRestricted)
    }
}

/// An item the offerer gives up.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OfferItem {
    pub item_type: ItemType,
    pub token: Address,
    pub identifier_or_criteria: U256,
    pub start_amount: U256,
    pub end_amount: U256,
}

/// An item the fulfiller must deliver to `recipient`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConsiderationItem {
    pub item_type: ItemType,
    pub token: Address,
    pub identifier_or_criteria: U256,
    pub start_amount: U256,
    pub end_amount: U256,
    pub recipient: Address,
}

impl OfferItem {
    /// Fungible item with a fixed amount.
    pub fn erc20(token: Address, amount: U256) -> Self {
        OfferItem {
            item_type: ItemType::Erc20,
            token,
            identifier_or_criteria: U256::ZERO,
            start_amount: amount,
            end_amount: amount,
        }
    }
}

impl ConsiderationItem {
    /// Fungible item with a fixed amount paid to `recipient`.
    pub fn erc20(token: Address, amount: U256, recipient: Address) -> Self {
        ConsiderationItem {
            item_type: ItemType::Erc20,
            token,
            identifier_or_criteria: U256::ZERO,
            start_amount: amount,
            end_amount: amount,
            recipient,
        }
    }
}

/// Order body covered by the offerer's signature.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OrderParameters {
    pub offerer: Address,
    pub zone: Address,
    pub offer: Vec<OfferItem>,
    pub consideration: Vec<ConsiderationItem>,
    pub order_type: OrderType,
    pub start_time: u64,
    pub end_time: u64,
    pub zone_hash: B256,
    pub salt: U256,
    pub conduit_key: ConduitKey,
    pub counter: U256,
}

impl OrderParameters {
    /// Hash of the parameters, used as the signed message and as the
    /// settlement engine's order identifier.
    pub fn hash(&self) -> OrderHash {
        let mut hasher = Sha256::new();
        hasher.update(ORDER_HASH_DOMAIN);
        hasher.update(self.offerer.as_slice());
        hasher.update(self.zone.as_slice());

        hasher.update((self.offer.len() as u64).to_be_bytes());
        for item in &self.offer {
            hasher.update([item.item_type as u8]);
            hasher.update(item.token.as_slice());
            hasher.update(item.identifier_or_criteria.to_be_bytes::<32>());
            hasher.update(item.start_amount.to_be_bytes::<32>());
            hasher.update(item.end_amount.to_be_bytes::<32>());
        }

        hasher.update((self.consideration.len() as u64).to_be_bytes());
        for item in &self.consideration {
            hasher.update([item.item_type as u8]);
            hasher.update(item.token.as_slice());
            hasher.update(item.identifier_or_criteria.to_be_bytes::<32>());
            hasher.update(item.start_amount.to_be_bytes::<32>());
            hasher.update(item.end_amount.to_be_bytes::<32>());
            hasher.update(item.recipient.as_slice());
        }

        hasher.update([self.order_type as u8]);
        hasher.update(self.start_time.to_be_bytes());
        hasher.update(self.end_time.to_be_bytes());
        hasher.update(self.zone_hash.as_slice());
        hasher.update(self.salt.to_be_bytes::<32>());
        hasher.update(self.conduit_key.as_slice());
        hasher.update(self.counter.to_be_bytes::<32>());

        let digest: [u8; 32] = hasher.finalize().into();
        B256::from(digest)
    }
}

// --- Cryptographic Primitives ---

/// ED25519 signature over an [`OrderHash`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signature(pub ed25519_dalek::Signature);

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0.to_bytes()))
    }
}

/// [`OrderParameters`] bundled with the offerer's [`Signature`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    pub parameters: OrderParameters,
    pub signature: Signature,
}

impl Order {
    /// Sign `parameters` with the offerer's key.
    pub fn sign(parameters: OrderParameters, signing_key: &SigningKey) -> Self {
        let hash = parameters.hash();
        let signature = signing_key.sign(hash.as_slice());
        Order { parameters, signature: Signature(signature) }
    }

    pub fn hash(&self) -> OrderHash {
        self.parameters.hash()
    }

    /// Check the signature against the offerer's verifying key.
    pub fn verify(&self, verifying_key: &VerifyingKey) -> Result<(), ed25519_dalek::SignatureError> {
        verifying_key.verify(self.hash().as_slice(), &self.signature.0)
    }
}
