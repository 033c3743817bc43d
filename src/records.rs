//! Transaction records and their canonical byte forms.
//!
//! Every record serialises as `tag | body | varint(sig_len) | sig` and is
//! identified by the SHA3-256 of the whole packed sequence (its [`Link`]).
//! The packed form is consensus-critical: a single byte of drift changes
//! record identifiers and invalidates signatures network-wide.
//!
//! Digests are held in natural SHA3 output order and written to the record
//! wire in reversed byte order; string forms carry a type prefix
//! (`BMK1…` for links, `BMA1…` for asset indexes).

use std::fmt;
use std::str::FromStr;

use sha3::{Digest, Sha3_256, Sha3_512};
use thiserror::Error;

use crate::account::{Account, AccountError, Signature};
use crate::currency::{Currency, CurrencyError};
use crate::varint::{from_varint64, to_varint64, VarintError};

pub const BASE_DATA_TAG: u8 = 0x01;
pub const ASSET_DATA_TAG: u8 = 0x02;
pub const BITMARK_ISSUE_TAG: u8 = 0x03;
pub const BITMARK_TRANSFER_TAG: u8 = 0x04;

pub const LINK_LENGTH: usize = 32;
pub const ASSET_INDEX_LENGTH: usize = 64;

const LINK_PREFIX: &str = "BMK1";
const ASSET_INDEX_PREFIX: &str = "BMA1";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RecordError {
    #[error("record tag is not recognised: {0:#04x}")]
    UnknownTag(u8),
    #[error("buffer too short for a complete record")]
    ShortBuffer,
    #[error("record field is malformed")]
    MalformedRecord,
    #[error("record signature verification failed")]
    InvalidSignature,
    #[error("record is signed by a different account than it declares")]
    WrongSigningAccount,
    #[error(transparent)]
    Varint(#[from] VarintError),
    #[error(transparent)]
    Account(#[from] AccountError),
    #[error(transparent)]
    Currency(#[from] CurrencyError),
}

/// Identifier of a transaction record: SHA3-256 over its packed bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Link(pub [u8; LINK_LENGTH]);

impl Link {
    pub fn as_bytes(&self) -> &[u8; LINK_LENGTH] {
        &self.0
    }

    fn pack_into(&self, buffer: &mut Vec<u8>) {
        buffer.extend_from_slice(&to_varint64(LINK_LENGTH as u64));
        buffer.extend(self.0.iter().rev());
    }

    fn unpack(buffer: &[u8]) -> Result<(Self, usize), RecordError> {
        let (length, used) = from_varint64(buffer)?;
        if length as usize != LINK_LENGTH {
            return Err(RecordError::MalformedRecord);
        }
        let end = used + LINK_LENGTH;
        if buffer.len() < end {
            return Err(RecordError::ShortBuffer);
        }
        let mut digest = [0u8; LINK_LENGTH];
        for (i, byte) in buffer[used..end].iter().rev().enumerate() {
            digest[i] = *byte;
        }
        Ok((Link(digest), end))
    }
}

impl fmt::Display for Link {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", LINK_PREFIX, hex::encode(self.0))
    }
}

impl FromStr for Link {
    type Err = RecordError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let hex_part = s
            .strip_prefix(LINK_PREFIX)
            .ok_or(RecordError::MalformedRecord)?;
        let bytes = hex::decode(hex_part).map_err(|_| RecordError::MalformedRecord)?;
        let digest: [u8; LINK_LENGTH] = bytes
            .try_into()
            .map_err(|_| RecordError::MalformedRecord)?;
        Ok(Link(digest))
    }
}

/// Content digest identifying an asset.
///
/// Bound to the fingerprint alone, so registering the same fingerprint
/// under a different name or description yields the same index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AssetIndex(pub [u8; ASSET_INDEX_LENGTH]);

impl AssetIndex {
    pub fn from_fingerprint(fingerprint: &[u8]) -> Self {
        let mut digest = [0u8; ASSET_INDEX_LENGTH];
        digest.copy_from_slice(&Sha3_512::digest(fingerprint));
        AssetIndex(digest)
    }

    pub fn as_bytes(&self) -> &[u8; ASSET_INDEX_LENGTH] {
        &self.0
    }

    fn pack_into(&self, buffer: &mut Vec<u8>) {
        buffer.extend_from_slice(&to_varint64(ASSET_INDEX_LENGTH as u64));
        buffer.extend(self.0.iter().rev());
    }

    fn unpack(buffer: &[u8]) -> Result<(Self, usize), RecordError> {
        let (length, used) = from_varint64(buffer)?;
        if length as usize != ASSET_INDEX_LENGTH {
            return Err(RecordError::MalformedRecord);
        }
        let end = used + ASSET_INDEX_LENGTH;
        if buffer.len() < end {
            return Err(RecordError::ShortBuffer);
        }
        let mut digest = [0u8; ASSET_INDEX_LENGTH];
        for (i, byte) in buffer[used..end].iter().rev().enumerate() {
            digest[i] = *byte;
        }
        Ok((AssetIndex(digest), end))
    }
}

impl fmt::Display for AssetIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", ASSET_INDEX_PREFIX, hex::encode(self.0))
    }
}

impl FromStr for AssetIndex {
    type Err = RecordError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let hex_part = s
            .strip_prefix(ASSET_INDEX_PREFIX)
            .ok_or(RecordError::MalformedRecord)?;
        let bytes = hex::decode(hex_part).map_err(|_| RecordError::MalformedRecord)?;
        let digest: [u8; ASSET_INDEX_LENGTH] = bytes
            .try_into()
            .map_err(|_| RecordError::MalformedRecord)?;
        Ok(AssetIndex(digest))
    }
}

/// Payment demanded by a transfer; absent means the transfer is free.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Payment {
    pub currency: Currency,
    pub address: String,
    pub amount: u64,
}

/// Coinbase proof-of-work record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BaseData {
    pub currency: Currency,
    pub payment_address: String,
    pub owner: Account,
    pub nonce: u64,
    pub signature: Signature,
}

/// Asset registration record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetData {
    pub description: String,
    pub name: String,
    pub fingerprint: String,
    pub registrant: Account,
    pub signature: Signature,
}

/// Issue of a claim against a registered asset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BitmarkIssue {
    pub asset_index: AssetIndex,
    pub owner: Account,
    pub nonce: u64,
    pub signature: Signature,
}

/// Transfer of a claim to a new owner, optionally demanding payment.
///
/// Signed by the previous owner; the new owner is the `owner` field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BitmarkTransfer {
    pub link: Link,
    pub payment: Option<Payment>,
    pub owner: Account,
    pub signature: Signature,
}

/// All record variants, dispatched by the leading tag byte.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransactionRecord {
    BaseData(BaseData),
    AssetData(AssetData),
    BitmarkIssue(BitmarkIssue),
    BitmarkTransfer(BitmarkTransfer),
}

fn push_string(buffer: &mut Vec<u8>, text: &str) {
    buffer.extend_from_slice(&to_varint64(text.len() as u64));
    buffer.extend_from_slice(text.as_bytes());
}

fn read_string(buffer: &[u8]) -> Result<(String, usize), RecordError> {
    let (length, used) = from_varint64(buffer)?;
    let length = usize::try_from(length).map_err(|_| RecordError::MalformedRecord)?;
    let end = used
        .checked_add(length)
        .ok_or(RecordError::MalformedRecord)?;
    if buffer.len() < end {
        return Err(RecordError::ShortBuffer);
    }
    let text = std::str::from_utf8(&buffer[used..end])
        .map_err(|_| RecordError::MalformedRecord)?;
    Ok((text.to_string(), end))
}

fn finish_pack(
    mut body: Vec<u8>,
    signed_by: &Account,
    signature: &Signature,
) -> Result<Packed, RecordError> {
    signed_by
        .verify(&body, signature)
        .map_err(|_| RecordError::InvalidSignature)?;
    signature.pack_into(&mut body);
    Ok(Packed(body))
}

impl BaseData {
    fn pack_body(&self, buffer: &mut Vec<u8>) {
        buffer.push(BASE_DATA_TAG);
        buffer.extend_from_slice(&to_varint64(self.currency.code()));
        push_string(buffer, &self.payment_address);
        self.owner.pack_into(buffer);
        buffer.extend_from_slice(&to_varint64(self.nonce));
    }

    /// Serialise and attach the signature, which must verify under the
    /// declared owner.
    pub fn pack(&self, signed_by: &Account) -> Result<Packed, RecordError> {
        if *signed_by != self.owner {
            return Err(RecordError::WrongSigningAccount);
        }
        let mut body = Vec::new();
        self.pack_body(&mut body);
        finish_pack(body, signed_by, &self.signature)
    }
}

impl AssetData {
    fn pack_body(&self, buffer: &mut Vec<u8>) {
        buffer.push(ASSET_DATA_TAG);
        push_string(buffer, &self.description);
        push_string(buffer, &self.name);
        push_string(buffer, &self.fingerprint);
        self.registrant.pack_into(buffer);
    }

    pub fn pack(&self, signed_by: &Account) -> Result<Packed, RecordError> {
        if *signed_by != self.registrant {
            return Err(RecordError::WrongSigningAccount);
        }
        let mut body = Vec::new();
        self.pack_body(&mut body);
        finish_pack(body, signed_by, &self.signature)
    }

    /// Content digest of the described asset.
    pub fn asset_index(&self) -> AssetIndex {
        AssetIndex::from_fingerprint(self.fingerprint.as_bytes())
    }
}

impl BitmarkIssue {
    fn pack_body(&self, buffer: &mut Vec<u8>) {
        buffer.push(BITMARK_ISSUE_TAG);
        self.asset_index.pack_into(buffer);
        self.owner.pack_into(buffer);
        buffer.extend_from_slice(&to_varint64(self.nonce));
    }

    pub fn pack(&self, signed_by: &Account) -> Result<Packed, RecordError> {
        if *signed_by != self.owner {
            return Err(RecordError::WrongSigningAccount);
        }
        let mut body = Vec::new();
        self.pack_body(&mut body);
        finish_pack(body, signed_by, &self.signature)
    }
}

impl BitmarkTransfer {
    fn pack_body(&self, buffer: &mut Vec<u8>) {
        buffer.push(BITMARK_TRANSFER_TAG);
        self.link.pack_into(buffer);
        match &self.payment {
            None => buffer.push(0x00),
            Some(payment) => {
                buffer.push(0x01);
                buffer.extend_from_slice(&to_varint64(payment.currency.code()));
                push_string(buffer, &payment.address);
                buffer.extend_from_slice(&to_varint64(payment.amount));
            }
        }
        self.owner.pack_into(buffer);
    }

    /// Serialise and attach the signature.
    ///
    /// The signer is the current owner of the linked record; whether
    /// `signed_by` really owns that record is a stateful concern checked
    /// elsewhere, so only the signature itself is validated here.
    pub fn pack(&self, signed_by: &Account) -> Result<Packed, RecordError> {
        let mut body = Vec::new();
        self.pack_body(&mut body);
        finish_pack(body, signed_by, &self.signature)
    }
}

/// A fully serialised, signed record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packed(Vec<u8>);

impl Packed {
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Packed(bytes)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.0
    }

    pub fn record_type(&self) -> Result<u8, RecordError> {
        self.0.first().copied().ok_or(RecordError::ShortBuffer)
    }

    /// Content digest of the packed bytes; the record's identifier.
    pub fn make_link(&self) -> Link {
        let mut digest = [0u8; LINK_LENGTH];
        digest.copy_from_slice(&Sha3_256::digest(&self.0));
        Link(digest)
    }

    /// Decode the record and verify its signature over the body bytes.
    ///
    /// Returns the record and the number of bytes consumed. Transfer
    /// signatures are made by the previous owner, whose key is not part
    /// of the record, so they are validated against chain state rather
    /// than here.
    pub fn unpack(&self) -> Result<(TransactionRecord, usize), RecordError> {
        let buffer = &self.0;
        let tag = *buffer.first().ok_or(RecordError::ShortBuffer)?;
        let mut offset = 1;
        match tag {
            BASE_DATA_TAG => {
                let (code, n) = from_varint64(&buffer[offset..])?;
                offset += n;
                let currency = Currency::from_code(code)?;
                let (payment_address, n) = read_string(&buffer[offset..])?;
                offset += n;
                let (owner, n) = Account::unpack(&buffer[offset..])?;
                offset += n;
                let (nonce, n) = from_varint64(&buffer[offset..])?;
                offset += n;
                let signature_start = offset;
                let (signature, n) = Signature::unpack(&buffer[offset..])?;
                offset += n;
                owner
                    .verify(&buffer[..signature_start], &signature)
                    .map_err(|_| RecordError::InvalidSignature)?;
                Ok((
                    TransactionRecord::BaseData(BaseData {
                        currency,
                        payment_address,
                        owner,
                        nonce,
                        signature,
                    }),
                    offset,
                ))
            }
            ASSET_DATA_TAG => {
                let (description, n) = read_string(&buffer[offset..])?;
                offset += n;
                let (name, n) = read_string(&buffer[offset..])?;
                offset += n;
                let (fingerprint, n) = read_string(&buffer[offset..])?;
                offset += n;
                let (registrant, n) = Account::unpack(&buffer[offset..])?;
                offset += n;
                let signature_start = offset;
                let (signature, n) = Signature::unpack(&buffer[offset..])?;
                offset += n;
                registrant
                    .verify(&buffer[..signature_start], &signature)
                    .map_err(|_| RecordError::InvalidSignature)?;
                Ok((
                    TransactionRecord::AssetData(AssetData {
                        description,
                        name,
                        fingerprint,
                        registrant,
                        signature,
                    }),
                    offset,
                ))
            }
            BITMARK_ISSUE_TAG => {
                let (asset_index, n) = AssetIndex::unpack(&buffer[offset..])?;
                offset += n;
                let (owner, n) = Account::unpack(&buffer[offset..])?;
                offset += n;
                let (nonce, n) = from_varint64(&buffer[offset..])?;
                offset += n;
                let signature_start = offset;
                let (signature, n) = Signature::unpack(&buffer[offset..])?;
                offset += n;
                owner
                    .verify(&buffer[..signature_start], &signature)
                    .map_err(|_| RecordError::InvalidSignature)?;
                Ok((
                    TransactionRecord::BitmarkIssue(BitmarkIssue {
                        asset_index,
                        owner,
                        nonce,
                        signature,
                    }),
                    offset,
                ))
            }
            BITMARK_TRANSFER_TAG => {
                let (link, n) = Link::unpack(&buffer[offset..])?;
                offset += n;
                let has_payment = *buffer.get(offset).ok_or(RecordError::ShortBuffer)?;
                offset += 1;
                let payment = match has_payment {
                    0x00 => None,
                    0x01 => {
                        let (code, n) = from_varint64(&buffer[offset..])?;
                        offset += n;
                        let currency = Currency::from_code(code)?;
                        let (address, n) = read_string(&buffer[offset..])?;
                        offset += n;
                        let (amount, n) = from_varint64(&buffer[offset..])?;
                        offset += n;
                        Some(Payment {
                            currency,
                            address,
                            amount,
                        })
                    }
                    _ => return Err(RecordError::MalformedRecord),
                };
                let (owner, n) = Account::unpack(&buffer[offset..])?;
                offset += n;
                let (signature, n) = Signature::unpack(&buffer[offset..])?;
                offset += n;
                Ok((
                    TransactionRecord::BitmarkTransfer(BitmarkTransfer {
                        link,
                        payment,
                        owner,
                        signature,
                    }),
                    offset,
                ))
            }
            unknown => Err(RecordError::UnknownTag(unknown)),
        }
    }
}
