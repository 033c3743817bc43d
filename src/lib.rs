//! # claimchain
//!
//! Canonical binary record layer and genesis pipeline for a permissioned
//! property-claim chain: deterministic packing, signing, unpacking,
//! linking and digest computation of transaction records, plus the
//! assembly and verification of a coinbase-bearing block header against a
//! difficulty target. Byte-level stability here is consensus-critical.
//!
//! ## Core modules
//!
//! - [`varint`]: length and integer encoding shared by every wire format
//! - [`mode`]: process-wide live/testing chain latch
//! - [`account`]: network-tagged Ed25519 keys and signatures
//! - [`records`]: the four transaction record variants and their codecs
//! - [`merkle`]: full merkle tree over transaction digests
//! - [`difficulty`]: compact proof-of-work targets
//! - [`block`]: header, coinbase and whole-block codecs
//! - [`genesis`]: embedded first blocks and their self-check
//!
//! ## Collaborators
//!
//! - [`storage`]: persistent key-value pools (sled)
//! - [`bitcoin`]: external payment-chain watcher
//! - [`proofer`]: proof submission fair queue
//! - [`payment`]: pay ids and packed payment records
//! - [`counter`]: wrapping population counters

pub mod account;
pub mod bitcoin;
pub mod block;
pub mod counter;
pub mod currency;
pub mod difficulty;
pub mod genesis;
pub mod merkle;
pub mod mode;
pub mod payment;
pub mod proofer;
pub mod records;
pub mod storage;
pub mod varint;
