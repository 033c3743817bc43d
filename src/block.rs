//! Block headers, coinbase records and whole-block codecs.
//!
//! A packed block is `header || u16le(coinbase_len) || coinbase ||
//! u16le(tx_count) || merkle tree`, where the tree is stored in full
//! (leaves first, root last) and leaf zero is always the coinbase digest.
//! The header digest is the block's identity and the value measured
//! against the difficulty target.

use std::fmt;

use sha3::{Digest, Sha3_256};
use thiserror::Error;

use crate::difficulty::{Difficulty, DifficultyError};
use crate::merkle;
use crate::records::Link;
use crate::varint::{from_varint64, to_varint64, VarintError};

/// Fixed width of a packed header:
/// `version:u32le | previous:32 | merkle_root:32 | time:u32le |
/// target:32le | nonce:u32le`.
pub const HEADER_LENGTH: usize = 108;

pub const EXTRA_NONCE_LENGTH: usize = 8;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum BlockError {
    #[error("buffer too short for a complete block")]
    ShortBuffer,
    #[error("block field is malformed")]
    MalformedRecord,
    #[error("coinbase address list is empty")]
    NoAddresses,
    #[error("transaction id list is empty")]
    NoTransactions,
    #[error("timestamp does not match the header time")]
    TimeMismatch,
    #[error("field exceeds the 16-bit length limit")]
    Oversize,
    #[error("stored merkle tree does not match the header root")]
    MerkleMismatch,
    #[error("header digest exceeds the difficulty target")]
    DifficultyNotMet,
    #[error(transparent)]
    Varint(#[from] VarintError),
    #[error(transparent)]
    Difficulty(#[from] DifficultyError),
}

/// SHA3-256 of a packed header; the block hash.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct BlockDigest(pub [u8; 32]);

impl BlockDigest {
    pub const ZERO: BlockDigest = BlockDigest([0u8; 32]);

    pub fn of(header_bytes: &[u8]) -> Self {
        let mut digest = [0u8; 32];
        digest.copy_from_slice(&Sha3_256::digest(header_bytes));
        BlockDigest(digest)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Compare the digest, read as a 256-bit little-endian integer,
    /// against a big-endian target. True when the digest is within it.
    pub fn meets(&self, target: &[u8; 32]) -> bool {
        for i in 0..32 {
            let digest_byte = self.0[31 - i];
            let target_byte = target[i];
            if digest_byte < target_byte {
                return true;
            }
            if digest_byte > target_byte {
                return false;
            }
        }
        true
    }
}

impl fmt::Display for BlockDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

/// Fixed-layout block header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    pub version: u32,
    pub previous_block: BlockDigest,
    pub merkle_root: Link,
    pub time: u32,
    pub bits: Difficulty,
    pub nonce: u32,
}

impl Header {
    pub fn pack(&self) -> [u8; HEADER_LENGTH] {
        let mut buffer = Vec::with_capacity(HEADER_LENGTH);
        buffer.extend_from_slice(&self.version.to_le_bytes());
        buffer.extend_from_slice(self.previous_block.as_bytes());
        buffer.extend_from_slice(self.merkle_root.as_bytes());
        buffer.extend_from_slice(&self.time.to_le_bytes());
        self.bits.pack_into(&mut buffer);
        buffer.extend_from_slice(&self.nonce.to_le_bytes());
        let mut packed = [0u8; HEADER_LENGTH];
        packed.copy_from_slice(&buffer);
        packed
    }

    pub fn unpack(buffer: &[u8]) -> Result<Header, BlockError> {
        if buffer.len() < HEADER_LENGTH {
            return Err(BlockError::ShortBuffer);
        }
        let version = u32::from_le_bytes([buffer[0], buffer[1], buffer[2], buffer[3]]);
        let mut previous = [0u8; 32];
        previous.copy_from_slice(&buffer[4..36]);
        let mut merkle_root = [0u8; 32];
        merkle_root.copy_from_slice(&buffer[36..68]);
        let time = u32::from_le_bytes([buffer[68], buffer[69], buffer[70], buffer[71]]);
        let (bits, _) = Difficulty::unpack(&buffer[72..104])?;
        let nonce = u32::from_le_bytes([buffer[104], buffer[105], buffer[106], buffer[107]]);
        Ok(Header {
            version,
            previous_block: BlockDigest(previous),
            merkle_root: Link(merkle_root),
            time,
            bits,
            nonce,
        })
    }

    /// Digest of the packed header: the block hash. Mining loops call
    /// this once per nonce attempt.
    pub fn digest(&self) -> BlockDigest {
        BlockDigest::of(&self.pack())
    }
}

/// A miner payout address under some currency tag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MinerAddress {
    pub currency: String,
    pub address: String,
}

/// Serialise the unsigned coinbase record for a block.
pub fn new_full_coinbase(
    number: u64,
    timestamp: u64,
    extra_nonce: &[u8; EXTRA_NONCE_LENGTH],
    addresses: &[MinerAddress],
) -> Vec<u8> {
    let mut buffer = Vec::new();
    buffer.extend_from_slice(&to_varint64(number));
    buffer.extend_from_slice(&to_varint64(timestamp));
    buffer.extend_from_slice(extra_nonce);
    buffer.extend_from_slice(&to_varint64(addresses.len() as u64));
    for entry in addresses {
        buffer.extend_from_slice(&to_varint64(entry.currency.len() as u64));
        buffer.extend_from_slice(entry.currency.as_bytes());
        buffer.extend_from_slice(&to_varint64(entry.address.len() as u64));
        buffer.extend_from_slice(entry.address.as_bytes());
    }
    buffer
}

fn read_tagged_string(buffer: &[u8]) -> Result<(String, usize), BlockError> {
    let (length, used) = from_varint64(buffer)?;
    let length = usize::try_from(length).map_err(|_| BlockError::MalformedRecord)?;
    let end = used.checked_add(length).ok_or(BlockError::MalformedRecord)?;
    if buffer.len() < end {
        return Err(BlockError::ShortBuffer);
    }
    let text = std::str::from_utf8(&buffer[used..end])
        .map_err(|_| BlockError::MalformedRecord)?;
    Ok((text.to_string(), end))
}

/// Decode a coinbase, which must occupy the whole buffer.
fn unpack_coinbase(buffer: &[u8]) -> Result<(u64, u64, Vec<MinerAddress>), BlockError> {
    let (number, n) = from_varint64(buffer)?;
    let mut offset = n;
    let (timestamp, n) = from_varint64(&buffer[offset..])?;
    offset += n;
    if buffer.len() < offset + EXTRA_NONCE_LENGTH {
        return Err(BlockError::ShortBuffer);
    }
    offset += EXTRA_NONCE_LENGTH;
    let (count, n) = from_varint64(&buffer[offset..])?;
    offset += n;
    let count = usize::try_from(count).map_err(|_| BlockError::MalformedRecord)?;
    let mut addresses = Vec::with_capacity(count);
    for _ in 0..count {
        let (currency, n) = read_tagged_string(&buffer[offset..])?;
        offset += n;
        let (address, n) = read_tagged_string(&buffer[offset..])?;
        offset += n;
        addresses.push(MinerAddress { currency, address });
    }
    if offset != buffer.len() {
        return Err(BlockError::MalformedRecord);
    }
    Ok((number, timestamp, addresses))
}

/// An unpacked block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    pub number: u64,
    pub timestamp: u64,
    pub header: Header,
    pub addresses: Vec<MinerAddress>,
    pub tx_ids: Vec<Link>,
    pub digest: BlockDigest,
}

/// Assemble and serialise a block from its parts.
///
/// `tx_ids[0]` is the coinbase slot: it is recomputed from the coinbase
/// inputs, so callers without a digest yet pass a placeholder there. The
/// header is built onto an empty chain head; a caller extending a chain
/// packs its own [`Header`] with the head digest instead.
#[allow(clippy::too_many_arguments)]
pub fn pack(
    number: u64,
    timestamp: u64,
    bits: &Difficulty,
    ntime: u32,
    nonce: u32,
    extra_nonce: &[u8; EXTRA_NONCE_LENGTH],
    addresses: &[MinerAddress],
    tx_ids: &[Link],
) -> Result<(BlockDigest, Vec<u8>), BlockError> {
    if addresses.is_empty() {
        return Err(BlockError::NoAddresses);
    }
    if tx_ids.is_empty() {
        return Err(BlockError::NoTransactions);
    }
    if timestamp != u64::from(ntime) {
        return Err(BlockError::TimeMismatch);
    }

    let coinbase = new_full_coinbase(number, timestamp, extra_nonce, addresses);
    if coinbase.len() > usize::from(u16::MAX) {
        return Err(BlockError::Oversize);
    }
    if tx_ids.len() > usize::from(u16::MAX) {
        return Err(BlockError::Oversize);
    }

    let mut coinbase_digest = [0u8; 32];
    coinbase_digest.copy_from_slice(&Sha3_256::digest(&coinbase));
    let coinbase_digest = Link(coinbase_digest);

    let tree = merkle::full_merkle_tree(coinbase_digest, &tx_ids[1..]);
    let merkle_root = tree[tree.len() - 1];

    let header = Header {
        version: 1,
        previous_block: BlockDigest::ZERO,
        merkle_root,
        time: ntime,
        bits: *bits,
        nonce,
    };
    let packed_header = header.pack();
    let digest = BlockDigest::of(&packed_header);

    let mut block = Vec::with_capacity(
        HEADER_LENGTH + 2 + coinbase.len() + 2 + tree.len() * 32,
    );
    block.extend_from_slice(&packed_header);
    block.extend_from_slice(&(coinbase.len() as u16).to_le_bytes());
    block.extend_from_slice(&coinbase);
    block.extend_from_slice(&(tx_ids.len() as u16).to_le_bytes());
    for node in &tree {
        block.extend_from_slice(node.as_bytes());
    }
    Ok((digest, block))
}

/// Parse a packed block, verifying the stored merkle tree.
pub fn unpack(buffer: &[u8]) -> Result<Block, BlockError> {
    let header = Header::unpack(buffer)?;
    let mut offset = HEADER_LENGTH;

    if buffer.len() < offset + 2 {
        return Err(BlockError::ShortBuffer);
    }
    let coinbase_length = usize::from(u16::from_le_bytes([buffer[offset], buffer[offset + 1]]));
    offset += 2;
    if buffer.len() < offset + coinbase_length {
        return Err(BlockError::ShortBuffer);
    }
    let (number, coinbase_timestamp, addresses) =
        unpack_coinbase(&buffer[offset..offset + coinbase_length])?;
    offset += coinbase_length;
    if coinbase_timestamp != u64::from(header.time) {
        return Err(BlockError::TimeMismatch);
    }

    if buffer.len() < offset + 2 {
        return Err(BlockError::ShortBuffer);
    }
    let tx_count = usize::from(u16::from_le_bytes([buffer[offset], buffer[offset + 1]]));
    offset += 2;
    if tx_count == 0 {
        return Err(BlockError::NoTransactions);
    }

    let node_count = merkle::tree_length(tx_count);
    let tree_end = offset + node_count * 32;
    if buffer.len() < tree_end {
        return Err(BlockError::ShortBuffer);
    }
    if buffer.len() != tree_end {
        return Err(BlockError::MalformedRecord);
    }
    let mut stored_tree = Vec::with_capacity(node_count);
    while offset < tree_end {
        let mut digest = [0u8; 32];
        digest.copy_from_slice(&buffer[offset..offset + 32]);
        stored_tree.push(Link(digest));
        offset += 32;
    }

    let leaves = &stored_tree[..tx_count];
    let recomputed = merkle::full_merkle_tree(leaves[0], &leaves[1..]);
    if recomputed != stored_tree {
        return Err(BlockError::MerkleMismatch);
    }
    if recomputed[recomputed.len() - 1] != header.merkle_root {
        return Err(BlockError::MerkleMismatch);
    }

    let digest = header.digest();
    Ok(Block {
        number,
        timestamp: u64::from(header.time),
        header,
        addresses,
        tx_ids: leaves.to_vec(),
        digest,
    })
}
