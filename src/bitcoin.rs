//! Bitcoin payment watcher.
//!
//! A long-lived task polls an external bitcoin node, scanning confirmed
//! blocks for `OP_RETURN` outputs that carry a pay id. Each match has its
//! other outputs aggregated into a packed payment record, stored keyed by
//! the pay id. The last processed block is checkpointed per currency so a
//! restart resumes where the watcher left off.
//!
//! External failures abandon the current polling cycle; nothing partial
//! is written and the next tick retries.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use thiserror::Error;
use tokio::sync::watch;
use tracing::{error, info, trace, warn};

use crate::currency::Currency;
use crate::payment::{self, PayId};
use crate::storage::{KeyValueStore, StorageError};

// rewrite the currency checkpoint only every few blocks
const SAVE_MODULUS: u64 = 16;
// rescan one day of blocks when the chain forked under the checkpoint
const HARD_FORK_BLOCK_COUNT: u64 = 6 * 24;
// stay this many blocks behind the most recent block
const BITCOIN_CONFIRMATIONS: u64 = 3;
// total blocks in one download
const MAXIMUM_BLOCK_COUNT: u64 = 500;
// blocks per second
const MAXIMUM_BLOCK_RATE: f64 = 20.0;

// op code with 48 byte parameter
const OP_RETURN_HEX_CODE: &str = "6a30";
const OP_RETURN_PAY_ID_OFFSET: usize = OP_RETURN_HEX_CODE.len();
const OP_RETURN_RECORD_LENGTH: usize = OP_RETURN_HEX_CODE.len() + 2 * payment::PAY_ID_LENGTH;

#[derive(Debug, Error)]
pub enum RpcError {
    #[error("external chain rpc failed: {0}")]
    ExternalRpcFailure(String),
    #[error("external chain reply is missing data: {0}")]
    ExternalDataMissing(&'static str),
}

#[derive(Debug, Error)]
pub enum WatcherError {
    #[error(transparent)]
    Rpc(#[from] RpcError),
    #[error(transparent)]
    Storage(#[from] StorageError),
}

#[derive(Debug, Clone, Deserialize)]
pub struct BitcoinBlock {
    pub height: u64,
    pub hash: String,
    #[serde(default, rename = "nextblockhash")]
    pub next_block_hash: Option<String>,
    #[serde(default)]
    pub tx: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BitcoinScriptPubKey {
    #[serde(default)]
    pub hex: String,
    #[serde(default)]
    pub addresses: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BitcoinVout {
    // decimal bitcoin amount; arbitrary-precision numbers keep the
    // node's own text so the fixed-point parser sees every digit
    pub value: serde_json::Number,
    #[serde(rename = "scriptPubKey")]
    pub script_pub_key: BitcoinScriptPubKey,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BitcoinTransaction {
    pub txid: String,
    #[serde(default)]
    pub vout: Vec<BitcoinVout>,
}

/// The bitcoin node RPC surface the watcher consumes.
#[async_trait]
pub trait BitcoinRpc: Send + Sync {
    async fn get_block_count(&self) -> Result<u64, RpcError>;
    async fn get_block_hash(&self, height: u64) -> Result<String, RpcError>;
    async fn get_block(&self, hash: &str) -> Result<BitcoinBlock, RpcError>;
    async fn get_raw_transaction(&self, tx_id: &str) -> Result<BitcoinTransaction, RpcError>;
}

/// JSON-RPC client for a bitcoind-compatible node.
pub struct BitcoinClient {
    url: String,
    auth: Option<(String, String)>,
    client: reqwest::Client,
}

impl BitcoinClient {
    pub fn new(url: impl Into<String>) -> Self {
        BitcoinClient {
            url: url.into(),
            auth: None,
            client: reqwest::Client::new(),
        }
    }

    pub fn with_credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.auth = Some((username.into(), password.into()));
        self
    }

    async fn call<T: serde::de::DeserializeOwned>(
        &self,
        method: &str,
        params: serde_json::Value,
    ) -> Result<T, RpcError> {
        let body = serde_json::json!({
            "jsonrpc": "1.0",
            "id": "claimchain",
            "method": method,
            "params": params,
        });
        let mut request = self.client.post(&self.url).json(&body);
        if let Some((username, password)) = &self.auth {
            request = request.basic_auth(username, Some(password));
        }
        let reply: serde_json::Value = request
            .send()
            .await
            .map_err(|e| RpcError::ExternalRpcFailure(e.to_string()))?
            .json()
            .await
            .map_err(|e| RpcError::ExternalRpcFailure(e.to_string()))?;
        if let Some(error) = reply.get("error") {
            if !error.is_null() {
                return Err(RpcError::ExternalRpcFailure(error.to_string()));
            }
        }
        let result = reply
            .get("result")
            .cloned()
            .ok_or(RpcError::ExternalDataMissing("result"))?;
        serde_json::from_value(result).map_err(|e| RpcError::ExternalRpcFailure(e.to_string()))
    }
}

#[async_trait]
impl BitcoinRpc for BitcoinClient {
    async fn get_block_count(&self) -> Result<u64, RpcError> {
        self.call("getblockcount", serde_json::json!([])).await
    }

    async fn get_block_hash(&self, height: u64) -> Result<String, RpcError> {
        self.call("getblockhash", serde_json::json!([height])).await
    }

    async fn get_block(&self, hash: &str) -> Result<BitcoinBlock, RpcError> {
        self.call("getblock", serde_json::json!([hash])).await
    }

    async fn get_raw_transaction(&self, tx_id: &str) -> Result<BitcoinTransaction, RpcError> {
        self.call("getrawtransaction", serde_json::json!([tx_id, 1]))
            .await
    }
}

#[derive(Debug, Clone)]
pub struct WatcherConfig {
    pub poll_interval: Duration,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        WatcherConfig {
            poll_interval: Duration::from_secs(60),
        }
    }
}

/// Scans the bitcoin chain for pay-id markers.
pub struct BitcoinWatcher<R: BitcoinRpc> {
    rpc: R,
    currency_pool: Arc<dyn KeyValueStore>,
    payment_pool: Arc<dyn KeyValueStore>,
    config: WatcherConfig,
    latest_block_number: u64,
    latest_block_hash: String,
    save_count: u64,
}

impl<R: BitcoinRpc> BitcoinWatcher<R> {
    /// Build a watcher, restoring the bitcoin checkpoint if one was
    /// saved by an earlier run.
    pub fn new(
        rpc: R,
        currency_pool: Arc<dyn KeyValueStore>,
        payment_pool: Arc<dyn KeyValueStore>,
        config: WatcherConfig,
    ) -> Result<Self, StorageError> {
        let mut latest_block_number = 0;
        let mut latest_block_hash = String::new();
        let key = Currency::Bitcoin.code().to_be_bytes();
        if let Some(value) = currency_pool.get(&key)? {
            if value.len() >= 8 {
                let mut number = [0u8; 8];
                number.copy_from_slice(&value[..8]);
                latest_block_number = u64::from_be_bytes(number);
                latest_block_hash = String::from_utf8_lossy(&value[8..]).into_owned();
            }
        }
        Ok(BitcoinWatcher {
            rpc,
            currency_pool,
            payment_pool,
            config,
            latest_block_number,
            latest_block_hash,
            save_count: 0,
        })
    }

    /// Poll until `shutdown` flips true or its sender is dropped.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        loop {
            info!("waiting…");
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                _ = tokio::time::sleep(self.config.poll_interval) => {
                    if let Err(error) = self.poll_once().await {
                        // abandoned cycle, retried on the next tick
                        warn!(%error, "polling cycle failed");
                    }
                }
            }
        }
        info!("stopped");
    }

    /// One polling cycle: fetch the confirmed tip and scan up to it.
    pub async fn poll_once(&mut self) -> Result<(), WatcherError> {
        let mut block_number = self.rpc.get_block_count().await?;
        info!(block_number, "bitcoin block count");

        if block_number <= BITCOIN_CONFIRMATIONS {
            return Ok(());
        }
        block_number -= BITCOIN_CONFIRMATIONS;
        if block_number <= self.latest_block_number {
            return Ok(());
        }

        let (n, hash) = self.process(self.latest_block_number, block_number).await?;
        if n == 0 || hash.is_empty() {
            return Ok(());
        }

        self.save_count = self
            .save_count
            .wrapping_add(n.wrapping_sub(self.latest_block_number));
        self.latest_block_number = n;
        self.latest_block_hash = hash.clone();
        if self.save_count >= SAVE_MODULUS {
            self.save_count = 0;

            let key = Currency::Bitcoin.code().to_be_bytes();
            let mut value = Vec::with_capacity(8 + hash.len());
            value.extend_from_slice(&n.to_be_bytes());
            value.extend_from_slice(hash.as_bytes());
            self.currency_pool.put(&key, &value)?;
        }
        Ok(())
    }

    /// Walk blocks from `start_block_number` towards `end_block_number`,
    /// returning the last processed height and its hash. Partial progress
    /// survives a mid-walk failure.
    async fn process(
        &self,
        start_block_number: u64,
        end_block_number: u64,
    ) -> Result<(u64, String), WatcherError> {
        let mut start = start_block_number;
        info!(start, "starting from block");
        let mut hash = self.rpc.get_block_hash(start).await?;

        // block rescan in case of hard fork
        if start >= HARD_FORK_BLOCK_COUNT && self.latest_block_hash != hash {
            start -= HARD_FORK_BLOCK_COUNT;
            info!(
                old_hash = %self.latest_block_hash,
                new_hash = %hash,
                start,
                "fork detected, restarting earlier"
            );
            hash = self.rpc.get_block_hash(start).await?;
        }

        let mut n = 0u64;
        let started = tokio::time::Instant::now();
        let mut counter = 0u64;
        loop {
            let block = match self.rpc.get_block(&hash).await {
                Ok(block) => block,
                Err(error) => {
                    error!(%hash, %error, "failed to get block");
                    break;
                }
            };
            info!(height = block.height, hash = %block.hash, "block");

            // first transaction is the chain's own coinbase
            if block.tx.len() > 1 {
                'tx_loop: for (i, tx_id) in block.tx[1..].iter().enumerate() {
                    let reply = match self.rpc.get_raw_transaction(tx_id).await {
                        Ok(reply) => reply,
                        Err(error) => {
                            error!(
                                height = block.height,
                                index = i,
                                %tx_id,
                                %error,
                                "failed to get transaction"
                            );
                            continue;
                        }
                    };
                    for (j, vout) in reply.vout.iter().enumerate() {
                        let script = &vout.script_pub_key.hex;
                        if script.len() == OP_RETURN_RECORD_LENGTH
                            && script.starts_with(OP_RETURN_HEX_CODE)
                        {
                            // the 96 hex characters after the op code are
                            // the pay id's textual form
                            let pay_id: PayId =
                                match script[OP_RETURN_PAY_ID_OFFSET..].parse() {
                                    Ok(pay_id) => pay_id,
                                    Err(_) => {
                                        error!(
                                            height = block.height,
                                            %tx_id,
                                            "failed to parse pay id"
                                        );
                                        continue 'tx_loop;
                                    }
                                };
                            trace!(?reply, "possible payment transaction");
                            self.scan_tx(pay_id, j, &reply)?;
                            continue 'tx_loop;
                        }
                    }
                }
            }

            counter += 1;
            n = block.height;
            let next = match block.next_block_hash {
                None => break,
                Some(next) => next,
            };
            if n >= end_block_number || counter >= MAXIMUM_BLOCK_COUNT {
                break;
            }

            // rate limit
            let elapsed = started.elapsed().as_secs_f64();
            if elapsed > 0.0 && counter as f64 / elapsed > MAXIMUM_BLOCK_RATE {
                tokio::time::sleep(Duration::from_secs(2)).await;
            }

            hash = next;
        }
        Ok((n, hash))
    }

    /// Aggregate a matched transaction's payments and store the packed
    /// record under its pay id.
    fn scan_tx(
        &self,
        pay_id: PayId,
        pay_id_index: usize,
        tx: &BitcoinTransaction,
    ) -> Result<(), WatcherError> {
        let mut amounts: BTreeMap<String, u64> = BTreeMap::new();
        for (i, vout) in tx.vout.iter().enumerate() {
            if i == pay_id_index {
                continue;
            }
            if vout.script_pub_key.addresses.len() == 1 {
                let address = vout.script_pub_key.addresses[0].clone();
                let satoshi = payment::convert_to_satoshi(vout.value.to_string().as_bytes());
                *amounts.entry(address).or_insert(0) += satoshi;
            }
        }

        if amounts.is_empty() {
            warn!(tx_id = %tx.txid, "found pay id but no payments in transaction");
            return Ok(());
        }

        let tx_id = match hex::decode(&tx.txid) {
            Ok(tx_id) => tx_id,
            Err(error) => {
                error!(%error, "decode bitcoin tx id error");
                return Ok(());
            }
        };
        let packed = payment::pack_payment_record(Currency::Bitcoin, &tx_id, &amounts);
        self.payment_pool.put(pay_id.as_bytes(), &packed)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryPool;
    use crate::varint::to_varint64;

    const PAY_ID_HEX: &str =
        "000102030405060708090a0b0c0d0e0f101112131415161718191a1b1c1d1e1f\
         202122232425262728292a2b2c2d2e2f";

    struct MockRpc {
        tip: u64,
        pay_block: u64,
    }

    fn number(text: &str) -> serde_json::Number {
        serde_json::from_str(text).unwrap()
    }

    #[async_trait]
    impl BitcoinRpc for MockRpc {
        async fn get_block_count(&self) -> Result<u64, RpcError> {
            Ok(self.tip)
        }

        async fn get_block_hash(&self, height: u64) -> Result<String, RpcError> {
            Ok(format!("hash-{height}"))
        }

        async fn get_block(&self, hash: &str) -> Result<BitcoinBlock, RpcError> {
            let height: u64 = hash
                .strip_prefix("hash-")
                .and_then(|h| h.parse().ok())
                .ok_or(RpcError::ExternalDataMissing("hash"))?;
            let tx = if height == self.pay_block {
                vec!["c0ffee".to_string(), "deadbeef".to_string()]
            } else {
                vec!["c0ffee".to_string()]
            };
            Ok(BitcoinBlock {
                height,
                hash: hash.to_string(),
                next_block_hash: Some(format!("hash-{}", height + 1)),
                tx,
            })
        }

        async fn get_raw_transaction(
            &self,
            tx_id: &str,
        ) -> Result<BitcoinTransaction, RpcError> {
            assert_eq!(tx_id, "deadbeef");
            Ok(BitcoinTransaction {
                txid: tx_id.to_string(),
                vout: vec![
                    BitcoinVout {
                        value: number("0"),
                        script_pub_key: BitcoinScriptPubKey {
                            hex: format!("{OP_RETURN_HEX_CODE}{PAY_ID_HEX}"),
                            addresses: Vec::new(),
                        },
                    },
                    BitcoinVout {
                        value: number("0.00005000"),
                        script_pub_key: BitcoinScriptPubKey {
                            hex: "76a914".to_string(),
                            addresses: vec!["payment-address".to_string()],
                        },
                    },
                ],
            })
        }
    }

    #[tokio::test]
    async fn test_watcher_stores_payment_and_checkpoint() {
        // let the rate limiter's sleeps auto-advance
        tokio::time::pause();
        let currency_pool = Arc::new(MemoryPool::default());
        let payment_pool = Arc::new(MemoryPool::default());
        let rpc = MockRpc {
            tip: 40,
            pay_block: 5,
        };
        let mut watcher = BitcoinWatcher::new(
            rpc,
            currency_pool.clone(),
            payment_pool.clone(),
            WatcherConfig::default(),
        )
        .unwrap();

        watcher.poll_once().await.unwrap();

        // the pay id found in block 5 maps to the packed payment record
        let pay_id: PayId = PAY_ID_HEX.parse().unwrap();
        let stored = payment_pool.get(pay_id.as_bytes()).unwrap().unwrap();
        let mut expected = to_varint64(Currency::Bitcoin.code());
        expected.extend_from_slice(&to_varint64(4));
        expected.extend_from_slice(&[0xde, 0xad, 0xbe, 0xef]);
        expected.extend_from_slice(&to_varint64(1));
        expected.extend_from_slice(&to_varint64("payment-address".len() as u64));
        expected.extend_from_slice(b"payment-address");
        expected.extend_from_slice(&to_varint64(5000));
        assert_eq!(stored, expected);

        // 37 blocks advanced, so the currency checkpoint was rewritten
        let key = Currency::Bitcoin.code().to_be_bytes();
        let checkpoint = currency_pool.get(&key).unwrap().unwrap();
        assert_eq!(&checkpoint[..8], &37u64.to_be_bytes());
        assert_eq!(&checkpoint[8..], b"hash-37");
        assert_eq!(watcher.latest_block_number, 37);
    }

    #[tokio::test]
    async fn test_watcher_waits_for_confirmations() {
        let currency_pool = Arc::new(MemoryPool::default());
        let payment_pool = Arc::new(MemoryPool::default());
        let rpc = MockRpc {
            tip: BITCOIN_CONFIRMATIONS,
            pay_block: 1,
        };
        let mut watcher = BitcoinWatcher::new(
            rpc,
            currency_pool.clone(),
            payment_pool.clone(),
            WatcherConfig::default(),
        )
        .unwrap();
        watcher.poll_once().await.unwrap();
        assert_eq!(watcher.latest_block_number, 0);
        assert!(payment_pool
            .get(PAY_ID_HEX.parse::<PayId>().unwrap().as_bytes())
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_op_return_matcher_shape() {
        assert_eq!(OP_RETURN_RECORD_LENGTH, 100);
        let script = format!("{OP_RETURN_HEX_CODE}{PAY_ID_HEX}");
        assert_eq!(script.len(), OP_RETURN_RECORD_LENGTH);
        let pay_id: PayId = script[OP_RETURN_PAY_ID_OFFSET..].parse().unwrap();
        assert_eq!(pay_id.to_string(), PAY_ID_HEX);
    }

    #[test]
    fn test_checkpoint_restore() {
        let currency_pool = Arc::new(MemoryPool::default());
        let payment_pool = Arc::new(MemoryPool::default());
        let key = Currency::Bitcoin.code().to_be_bytes();
        let mut value = 123u64.to_be_bytes().to_vec();
        value.extend_from_slice(b"hash-123");
        currency_pool.put(&key, &value).unwrap();

        let watcher = BitcoinWatcher::new(
            MockRpc {
                tip: 0,
                pay_block: 0,
            },
            currency_pool,
            payment_pool,
            WatcherConfig::default(),
        )
        .unwrap();
        assert_eq!(watcher.latest_block_number, 123);
        assert_eq!(watcher.latest_block_hash, "hash-123");
    }
}
