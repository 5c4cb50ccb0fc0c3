// SPDX-License-Identifier: MIT OR Apache-2.0

//! Send Client Contract
//!
//! Destination wire protocols live outside the core; the runtime only
//! needs a client that performs one send and classifies the outcome.

use crate::core::flusher::compress::{CompressType, RawDataType};

/// Classified result of one send attempt.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SendResult {
    Ok,
    NetworkError,
    ServerError,
    QuotaExceed,
    Unauthorized,
    InvalidSequenceId,
    RequestTimeExpired,
    Discardable,
}

#[derive(Debug)]
pub struct SendRequest<'a> {
    pub project: &'a str,
    pub logstore: &'a str,
    pub region: &'a str,
    pub endpoint: &'a str,
    pub compress_type: CompressType,
    pub data_type: RawDataType,
    pub data: &'a [u8],
    pub raw_size: usize,
    pub shard_hash_key: Option<&'a str>,
    pub sequence_id: Option<u64>,
}

/// One concrete destination client. Implementations block for the duration
/// of the call and never panic; every failure maps onto a `SendResult`.
pub trait SendClient: Send + Sync {
    fn send(&self, request: &SendRequest<'_>) -> SendResult;

    /// Refreshes credentials after an `Unauthorized`; returns whether new
    /// credentials were obtained.
    fn refresh_auth(&self, _aliuid: &str) -> bool {
        false
    }
}

/// Test doubles shared by unit and integration tests.
pub mod testing {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Scripted client: returns queued results in order, then `Ok`.
    pub struct ScriptedClient {
        results: Mutex<Vec<SendResult>>,
        pub sent: AtomicUsize,
        pub payloads: Mutex<Vec<Vec<u8>>>,
        pub raw_sizes: Mutex<Vec<usize>>,
        pub sequence_ids: Mutex<Vec<Option<u64>>>,
    }

    impl ScriptedClient {
        pub fn new(mut results: Vec<SendResult>) -> Self {
            results.reverse();
            Self {
                results: Mutex::new(results),
                sent: AtomicUsize::new(0),
                payloads: Mutex::new(Vec::new()),
                raw_sizes: Mutex::new(Vec::new()),
                sequence_ids: Mutex::new(Vec::new()),
            }
        }

        pub fn sent_count(&self) -> usize {
            self.sent.load(Ordering::SeqCst)
        }
    }

    impl SendClient for ScriptedClient {
        fn send(&self, request: &SendRequest<'_>) -> SendResult {
            self.sent.fetch_add(1, Ordering::SeqCst);
            self.payloads
                .lock()
                .expect("payloads lock")
                .push(request.data.to_vec());
            self.raw_sizes
                .lock()
                .expect("raw sizes lock")
                .push(request.raw_size);
            self.sequence_ids
                .lock()
                .expect("sequence ids lock")
                .push(request.sequence_id);
            self.results
                .lock()
                .expect("results lock")
                .pop()
                .unwrap_or(SendResult::Ok)
        }
    }
}
