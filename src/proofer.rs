//! Proof submission fair queue.
//!
//! Miners push found proofs into one queue; a forwarding task routes each
//! submission to the submitter matching its identity, and every submitter
//! delivers its share to the chain node as a `block.nonce` request. The
//! queue decouples many producers from the per-connection submitters.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{error, info};

const QUEUE_DEPTH: usize = 64;

#[derive(Debug, Error)]
pub enum ProoferError {
    #[error("submitter identity already registered: {0}")]
    DuplicateIdentity(String),
    #[error("submission sink failed: {0}")]
    SinkFailure(String),
}

/// A candidate proof heading for the chain node.
#[derive(Debug, Clone)]
pub struct ProofSubmission {
    pub identity: String,
    pub job: String,
    pub packed: Vec<u8>,
}

/// The request a submitter forwards for each submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct NonceRequest {
    pub request: String,
    pub job: String,
    pub packed: String, // hex of the packed proof
}

/// Where submissions are finally delivered.
#[async_trait]
pub trait NonceSink: Send + Sync {
    async fn submit(&self, request: &NonceRequest) -> Result<serde_json::Value, ProoferError>;
}

/// One long-lived delivery loop with its own identity.
pub struct Submitter {
    identity: String,
    sink: Arc<dyn NonceSink>,
    sender: mpsc::Sender<ProofSubmission>,
    receiver: mpsc::Receiver<ProofSubmission>,
}

impl Submitter {
    pub fn new(index: usize, sink: Arc<dyn NonceSink>) -> Self {
        let (sender, receiver) = mpsc::channel(QUEUE_DEPTH);
        Submitter {
            identity: format!("submitter-{index}"),
            sink,
            sender,
            receiver,
        }
    }

    pub fn identity(&self) -> &str {
        &self.identity
    }

    async fn run(
        identity: String,
        sink: Arc<dyn NonceSink>,
        mut receiver: mpsc::Receiver<ProofSubmission>,
    ) {
        info!(%identity, "starting…");
        while let Some(submission) = receiver.recv().await {
            // the forwarder routes by identity, so a mismatch here is a
            // programming error
            if submission.identity != identity {
                error!(
                    received = %submission.identity,
                    expected = %identity,
                    "received data for wrong submitter"
                );
                continue;
            }
            let request = NonceRequest {
                request: "block.nonce".to_string(),
                job: submission.job,
                packed: hex::encode(&submission.packed),
            };
            match sink.submit(&request).await {
                Ok(reply) => info!(%identity, %reply, "server reply"),
                Err(error) => error!(%identity, %error, "submission failed"),
            }
        }
    }
}

/// Fair queue fanning many producers into per-identity submitters.
pub struct SubmitQueue {
    sender: mpsc::Sender<ProofSubmission>,
}

impl SubmitQueue {
    /// Spawn the submitters and the forwarding task.
    ///
    /// Fails when two submitters claim the same identity; the caller
    /// treats that as fatal at startup.
    pub fn start(submitters: Vec<Submitter>) -> Result<SubmitQueue, ProoferError> {
        let mut routes: HashMap<String, mpsc::Sender<ProofSubmission>> = HashMap::new();
        for submitter in submitters {
            let Submitter {
                identity,
                sink,
                sender,
                receiver,
            } = submitter;
            if routes.contains_key(&identity) {
                return Err(ProoferError::DuplicateIdentity(identity));
            }
            routes.insert(identity.clone(), sender);
            tokio::spawn(Submitter::run(identity, sink, receiver));
        }

        let (sender, mut receiver) = mpsc::channel::<ProofSubmission>(QUEUE_DEPTH);
        tokio::spawn(async move {
            while let Some(submission) = receiver.recv().await {
                match routes.get(&submission.identity) {
                    Some(route) => {
                        if route.send(submission).await.is_err() {
                            error!("submitter queue closed");
                        }
                    }
                    None => {
                        error!(identity = %submission.identity, "no submitter for identity")
                    }
                }
            }
        });
        Ok(SubmitQueue { sender })
    }

    /// A producer handle; clone freely across mining tasks.
    pub fn sender(&self) -> mpsc::Sender<ProofSubmission> {
        self.sender.clone()
    }
}
