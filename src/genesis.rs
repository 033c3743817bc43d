//! Embedded genesis blocks.
//!
//! Each chain starts from a fixed first block whose bytes are a
//! compile-time constant and whose assembly the crate can reproduce from
//! the named mining inputs: the stratum extra nonces, the miner's header
//! nonce, the timestamp and the payout address.

use thiserror::Error;

use crate::block::{self, Block, BlockDigest, BlockError, MinerAddress};
use crate::difficulty::Difficulty;
use crate::mode::Chain;
use crate::records::Link;

pub const GENESIS_BLOCK_NUMBER: u64 = 1;

pub const LIVE_GENESIS_DIGEST: BlockDigest = BlockDigest([
    0x3d, 0x3d, 0x92, 0xff, 0x5e, 0xc3, 0xaf, 0x17, 0x5a, 0xf3,
    0x0b, 0x24, 0xb1, 0x56, 0x55, 0xc0, 0xa9, 0x1c, 0x11, 0xb5,
    0x50, 0x83, 0x27, 0x88, 0x49, 0x6c, 0x35, 0xf5, 0x6a, 0x63,
    0x01, 0x4d,
]);

pub static LIVE_GENESIS_BLOCK: &[u8] = &[
    0x01, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
    0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
    0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
    0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0xeb, 0xcc, 0x35, 0x05,
    0x38, 0x12, 0x2f, 0x59, 0x13, 0xe3, 0xc4, 0x17, 0xa8, 0xe8,
    0x93, 0xe9, 0xdc, 0xc2, 0x85, 0xcc, 0xc6, 0x05, 0x49, 0xac,
    0x1c, 0xca, 0x31, 0x6f, 0x13, 0xde, 0x6f, 0xe8, 0xb7, 0x9a,
    0x80, 0x56, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
    0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
    0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
    0x00, 0xff, 0xff, 0xff, 0x87, 0x9a, 0x6f, 0x82, 0x25, 0x00,
    0x01, 0xb7, 0xb5, 0x82, 0xb4, 0x05, 0xef, 0xd7, 0xb4, 0xfe,
    0x00, 0x00, 0x00, 0x00, 0x01, 0x00, 0x14, 0x44, 0x4f, 0x57,
    0x4e, 0x20, 0x74, 0x68, 0x65, 0x20, 0x52, 0x41, 0x42, 0x42,
    0x49, 0x54, 0x20, 0x68, 0x6f, 0x6c, 0x65, 0x01, 0x00, 0xeb,
    0xcc, 0x35, 0x05, 0x38, 0x12, 0x2f, 0x59, 0x13, 0xe3, 0xc4,
    0x17, 0xa8, 0xe8, 0x93, 0xe9, 0xdc, 0xc2, 0x85, 0xcc, 0xc6,
    0x05, 0x49, 0xac, 0x1c, 0xca, 0x31, 0x6f, 0x13, 0xde, 0x6f,
    0xe8,
];

pub const TEST_GENESIS_DIGEST: BlockDigest = BlockDigest([
    0x95, 0xa1, 0x40, 0x40, 0xac, 0x20, 0xfe, 0x83, 0x41, 0xf7,
    0x21, 0x55, 0xb9, 0xc8, 0x1f, 0xbf, 0x42, 0x75, 0xed, 0x4b,
    0xaf, 0x0a, 0x7f, 0xec, 0x68, 0xe6, 0xe9, 0x4d, 0x22, 0x63,
    0x91, 0xb7,
]);

pub static TEST_GENESIS_BLOCK: &[u8] = &[
    0x01, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
    0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
    0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
    0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0xcd, 0x22, 0xe8, 0x8a,
    0x06, 0x47, 0xd2, 0xd7, 0x14, 0xd9, 0x29, 0x3c, 0x22, 0xd9,
    0x08, 0x5f, 0x10, 0xd5, 0x84, 0xff, 0x3c, 0xb8, 0xfa, 0x41,
    0x6c, 0xf7, 0x64, 0x8a, 0x1e, 0x6e, 0x21, 0x83, 0x4b, 0x42,
    0x78, 0x54, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
    0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
    0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
    0x00, 0xff, 0xff, 0xff, 0xd4, 0xba, 0x26, 0x1e, 0x2e, 0x00,
    0x01, 0xcb, 0x84, 0xe1, 0xa3, 0x05, 0xb2, 0x01, 0x47, 0x5b,
    0x00, 0x00, 0x00, 0x00, 0x01, 0x00, 0x1d, 0x42, 0x69, 0x74,
    0x6d, 0x61, 0x72, 0x6b, 0x20, 0x54, 0x65, 0x73, 0x74, 0x69,
    0x6e, 0x67, 0x20, 0x47, 0x65, 0x6e, 0x65, 0x73, 0x69, 0x73,
    0x20, 0x42, 0x6c, 0x6f, 0x63, 0x6b, 0x01, 0x00, 0xcd, 0x22,
    0xe8, 0x8a, 0x06, 0x47, 0xd2, 0xd7, 0x14, 0xd9, 0x29, 0x3c,
    0x22, 0xd9, 0x08, 0x5f, 0x10, 0xd5, 0x84, 0xff, 0x3c, 0xb8,
    0xfa, 0x41, 0x6c, 0xf7, 0x64, 0x8a, 0x1e, 0x6e, 0x21, 0x83,
];

#[derive(Debug, Error, PartialEq, Eq)]
pub enum GenesisError {
    #[error("rebuilt genesis digest does not match the embedded constant")]
    DigestMismatch,
    #[error("rebuilt genesis bytes do not match the embedded constant")]
    BytesMismatch,
    #[error(transparent)]
    Block(#[from] BlockError),
}

/// The fixed mining inputs a chain's genesis block was produced from.
struct GenesisSource {
    ntime: u32,
    extra_nonce: [u8; block::EXTRA_NONCE_LENGTH],
    nonce: u32,
    currency: &'static str,
    address: &'static str,
}

// extra nonce is extra_nonce1 from the stratum server followed by
// extra_nonce2 from the miner
const LIVE_SOURCE: GenesisSource = GenesisSource {
    ntime: 0x5680_9ab7, // 2015-12-28T02:13:11Z
    extra_nonce: [0xef, 0xd7, 0xb4, 0xfe, 0x00, 0x00, 0x00, 0x00],
    nonce: 0x826f_9a87,
    currency: "",
    address: "DOWN the RABBIT hole",
};

const TEST_SOURCE: GenesisSource = GenesisSource {
    ntime: 0x5478_424b, // 2014-11-28T09:37:15Z
    extra_nonce: [0xb2, 0x01, 0x47, 0x5b, 0x00, 0x00, 0x00, 0x00],
    nonce: 0x1e26_bad4,
    currency: "",
    address: "Bitmark Testing Genesis Block",
};

fn source(chain: Chain) -> &'static GenesisSource {
    match chain {
        Chain::Live => &LIVE_SOURCE,
        Chain::Testing => &TEST_SOURCE,
    }
}

pub fn digest(chain: Chain) -> BlockDigest {
    match chain {
        Chain::Live => LIVE_GENESIS_DIGEST,
        Chain::Testing => TEST_GENESIS_DIGEST,
    }
}

pub fn block_bytes(chain: Chain) -> &'static [u8] {
    match chain {
        Chain::Live => LIVE_GENESIS_BLOCK,
        Chain::Testing => TEST_GENESIS_BLOCK,
    }
}

/// Rebuild a chain's genesis block from its fixed inputs and check every
/// embedded constant against it.
///
/// Verifies the header digest, the difficulty target, the full byte
/// sequence, and that unpacking then re-packing reproduces the bytes
/// exactly.
pub fn verify(chain: Chain) -> Result<Block, GenesisError> {
    let source = source(chain);
    let expected_digest = digest(chain);
    let expected_bytes = block_bytes(chain);

    let addresses = vec![MinerAddress {
        currency: source.currency.to_string(),
        address: source.address.to_string(),
    }];
    let bits = Difficulty::new();
    let (built_digest, built_bytes) = block::pack(
        GENESIS_BLOCK_NUMBER,
        u64::from(source.ntime),
        &bits,
        source.ntime,
        source.nonce,
        &source.extra_nonce,
        &addresses,
        &[Link::default()],
    )?;

    if built_digest != expected_digest {
        return Err(GenesisError::DigestMismatch);
    }
    if !built_digest.meets(bits.target()) {
        return Err(GenesisError::Block(BlockError::DifficultyNotMet));
    }
    if built_bytes != expected_bytes {
        return Err(GenesisError::BytesMismatch);
    }

    let unpacked = block::unpack(&built_bytes)?;
    let (redigest, rebytes) = block::pack(
        unpacked.number,
        unpacked.timestamp,
        &unpacked.header.bits,
        unpacked.header.time,
        unpacked.header.nonce,
        &source.extra_nonce,
        &unpacked.addresses,
        &unpacked.tx_ids,
    )?;
    if redigest != expected_digest {
        return Err(GenesisError::DigestMismatch);
    }
    if rebytes != expected_bytes {
        return Err(GenesisError::BytesMismatch);
    }

    Ok(unpacked)
}
