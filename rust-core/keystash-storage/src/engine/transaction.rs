// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Transactions scoped to a single object store.
//
// A `Transaction` is the caller's handle: each method issues one request and
// returns a `PendingRequest` for its terminal event. Requests travel over an
// unbounded channel to the engine, which holds the matching
// `TransactionReceiver` and serves them in issue order against one native
// transaction. The transaction ends when `commit` is issued or the handle is
// dropped; a failed request aborts it, and every later request on it fails.

use serde_json::Value;
use tokio::sync::mpsc;

use super::request::{PendingRequest, Responder};
use crate::error::{EngineError, EngineErrorKind};

/// Access mode of a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionMode {
    ReadOnly,
    ReadWrite,
}

/// One request issued on a transaction.
#[derive(Debug)]
pub enum TransactionRequest {
    Get {
        key: String,
        responder: Responder<Option<Value>>,
    },
    /// Key-only lookup; resolves to the stored key if present.
    GetKey {
        key: String,
        responder: Responder<Option<String>>,
    },
    /// Insert or replace.
    Put {
        key: String,
        value: Value,
        responder: Responder<()>,
    },
    /// Insert only; fails with `Constraint` if the key exists.
    Add {
        key: String,
        value: Value,
        responder: Responder<()>,
    },
    Delete {
        key: String,
        responder: Responder<()>,
    },
    Clear {
        responder: Responder<()>,
    },
    Count {
        responder: Responder<usize>,
    },
    GetAllKeys {
        responder: Responder<Vec<String>>,
    },
    /// Advance a key cursor: resolves to the first key strictly after
    /// `after` (or the first key overall), or `None` when exhausted.
    ContinueCursor {
        after: Option<String>,
        responder: Responder<Option<String>>,
    },
    Commit {
        responder: Responder<()>,
    },
}

impl TransactionRequest {
    /// Whether serving this request mutates the object store.
    pub fn is_write(&self) -> bool {
        matches!(
            self,
            TransactionRequest::Put { .. }
                | TransactionRequest::Add { .. }
                | TransactionRequest::Delete { .. }
                | TransactionRequest::Clear { .. }
        )
    }

    /// Fire this request's error event.
    pub fn fail(self, err: EngineError) {
        match self {
            TransactionRequest::Get { responder, .. } => responder.fail(err),
            TransactionRequest::GetKey { responder, .. } => responder.fail(err),
            TransactionRequest::Put { responder, .. } => responder.fail(err),
            TransactionRequest::Add { responder, .. } => responder.fail(err),
            TransactionRequest::Delete { responder, .. } => responder.fail(err),
            TransactionRequest::Clear { responder } => responder.fail(err),
            TransactionRequest::Count { responder } => responder.fail(err),
            TransactionRequest::GetAllKeys { responder } => responder.fail(err),
            TransactionRequest::ContinueCursor { responder, .. } => responder.fail(err),
            TransactionRequest::Commit { responder } => responder.fail(err),
        }
    }
}

/// Caller-side handle of a transaction on one object store.
#[derive(Debug)]
pub struct Transaction {
    store: String,
    mode: TransactionMode,
    requests: mpsc::UnboundedSender<TransactionRequest>,
}

/// Engine-side end of a transaction.
#[derive(Debug)]
pub struct TransactionReceiver {
    store: String,
    mode: TransactionMode,
    requests: mpsc::UnboundedReceiver<TransactionRequest>,
}

impl Transaction {
    /// Create a transaction handle and the receiver an engine serves it from.
    pub fn new(store: &str, mode: TransactionMode) -> (Transaction, TransactionReceiver) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Transaction {
                store: store.to_string(),
                mode,
                requests: tx,
            },
            TransactionReceiver {
                store: store.to_string(),
                mode,
                requests: rx,
            },
        )
    }

    pub fn store(&self) -> &str {
        &self.store
    }

    pub fn mode(&self) -> TransactionMode {
        self.mode
    }

    fn issue<T>(
        &self,
        build: impl FnOnce(Responder<T>) -> TransactionRequest,
    ) -> PendingRequest<T> {
        let (responder, pending) = PendingRequest::channel();
        if let Err(mpsc::error::SendError(request)) = self.requests.send(build(responder)) {
            request.fail(EngineError::new(
                EngineErrorKind::InvalidState,
                "transaction has already finished",
            ));
        }
        pending
    }

    pub fn get(&self, key: &str) -> PendingRequest<Option<Value>> {
        let key = key.to_string();
        self.issue(|responder| TransactionRequest::Get { key, responder })
    }

    pub fn get_key(&self, key: &str) -> PendingRequest<Option<String>> {
        let key = key.to_string();
        self.issue(|responder| TransactionRequest::GetKey { key, responder })
    }

    pub fn put(&self, key: &str, value: Value) -> PendingRequest<()> {
        let key = key.to_string();
        self.issue(|responder| TransactionRequest::Put {
            key,
            value,
            responder,
        })
    }

    pub fn add(&self, key: &str, value: Value) -> PendingRequest<()> {
        let key = key.to_string();
        self.issue(|responder| TransactionRequest::Add {
            key,
            value,
            responder,
        })
    }

    pub fn delete(&self, key: &str) -> PendingRequest<()> {
        let key = key.to_string();
        self.issue(|responder| TransactionRequest::Delete { key, responder })
    }

    pub fn clear(&self) -> PendingRequest<()> {
        self.issue(|responder| TransactionRequest::Clear { responder })
    }

    pub fn count(&self) -> PendingRequest<usize> {
        self.issue(|responder| TransactionRequest::Count { responder })
    }

    pub fn get_all_keys(&self) -> PendingRequest<Vec<String>> {
        self.issue(|responder| TransactionRequest::GetAllKeys { responder })
    }

    /// Open a key cursor positioned before the first key.
    pub fn open_cursor(&self) -> Cursor<'_> {
        Cursor {
            transaction: self,
            position: None,
            exhausted: false,
        }
    }

    /// Finish the transaction; resolves once its writes are durable.
    pub fn commit(self) -> PendingRequest<()> {
        self.issue(|responder| TransactionRequest::Commit { responder })
    }
}

/// A forward-only key cursor over one transaction's object store.
///
/// Each step is its own request. Once exhausted it stays exhausted.
#[derive(Debug)]
pub struct Cursor<'t> {
    transaction: &'t Transaction,
    position: Option<String>,
    exhausted: bool,
}

impl Cursor<'_> {
    /// Advance to the next key, or `None` at the end of the store.
    pub async fn next_key(&mut self) -> Result<Option<String>, EngineError> {
        if self.exhausted {
            return Ok(None);
        }
        let after = self.position.clone();
        let next = self
            .transaction
            .issue(|responder| TransactionRequest::ContinueCursor { after, responder })
            .await?;
        match &next {
            Some(key) => self.position = Some(key.clone()),
            None => self.exhausted = true,
        }
        Ok(next)
    }
}

impl TransactionReceiver {
    pub fn store(&self) -> &str {
        &self.store
    }

    pub fn mode(&self) -> TransactionMode {
        self.mode
    }

    /// Block the current (non-async) thread until the next request arrives.
    ///
    /// Returns `None` once the caller's handle has been dropped.
    pub fn blocking_next(&mut self) -> Option<TransactionRequest> {
        self.requests.blocking_recv()
    }
}

/// Native operations an engine exposes for one open object-store transaction.
pub(crate) trait ObjectStoreAccess {
    fn get(&mut self, key: &str) -> Result<Option<Value>, EngineError>;
    fn contains(&mut self, key: &str) -> Result<bool, EngineError>;
    fn put(&mut self, key: &str, value: &Value) -> Result<(), EngineError>;
    fn delete(&mut self, key: &str) -> Result<(), EngineError>;
    fn clear(&mut self) -> Result<(), EngineError>;
    fn count(&mut self) -> Result<usize, EngineError>;
    fn keys(&mut self) -> Result<Vec<String>, EngineError>;
    fn key_after(&mut self, after: Option<&str>) -> Result<Option<String>, EngineError>;
}

/// How a served transaction ended.
pub(crate) enum TransactionOutcome {
    /// Commit the native transaction, then fire the responder if any.
    Commit(Option<Responder<()>>),
    /// Roll back; the error has already been delivered to the failing request.
    Abort(EngineError, Option<Responder<()>>),
}

/// Serve every request of `receiver` against `access`, in issue order.
pub(crate) fn serve_transaction(
    receiver: &mut TransactionReceiver,
    access: &mut impl ObjectStoreAccess,
) -> TransactionOutcome {
    let mode = receiver.mode();
    let mut aborted: Option<EngineError> = None;

    while let Some(request) = receiver.blocking_next() {
        if let TransactionRequest::Commit { responder } = request {
            return match aborted {
                Some(err) => TransactionOutcome::Abort(err, Some(responder)),
                None => TransactionOutcome::Commit(Some(responder)),
            };
        }
        if let Some(err) = &aborted {
            request.fail(EngineError::aborted(format!(
                "transaction was aborted: {}",
                err.message
            )));
            continue;
        }
        if request.is_write() && mode == TransactionMode::ReadOnly {
            request.fail(EngineError::new(
                EngineErrorKind::ReadOnly,
                "write request issued on a read-only transaction",
            ));
            aborted = Some(EngineError::new(
                EngineErrorKind::ReadOnly,
                "write request issued on a read-only transaction",
            ));
            continue;
        }
        if let Err(err) = serve_request(access, request) {
            aborted = Some(err);
        }
    }

    match aborted {
        Some(err) => TransactionOutcome::Abort(err, None),
        None => TransactionOutcome::Commit(None),
    }
}

/// Serve one request. An `Err` means the request failed (its responder has
/// already fired) and the transaction must abort.
fn serve_request(
    access: &mut impl ObjectStoreAccess,
    request: TransactionRequest,
) -> Result<(), EngineError> {
    fn settle<T>(responder: Responder<T>, result: Result<T, EngineError>) -> Result<(), EngineError> {
        match result {
            Ok(value) => {
                responder.succeed(value);
                Ok(())
            }
            Err(err) => {
                responder.fail(err.clone());
                Err(err)
            }
        }
    }

    match request {
        TransactionRequest::Get { key, responder } => settle(responder, access.get(&key)),
        TransactionRequest::GetKey { key, responder } => settle(
            responder,
            access.contains(&key).map(|found| found.then_some(key)),
        ),
        TransactionRequest::Put {
            key,
            value,
            responder,
        } => settle(responder, access.put(&key, &value)),
        TransactionRequest::Add {
            key,
            value,
            responder,
        } => {
            let result = match access.contains(&key) {
                Ok(true) => Err(EngineError::new(
                    EngineErrorKind::Constraint,
                    format!("key '{key}' already exists in the object store"),
                )),
                Ok(false) => access.put(&key, &value),
                Err(err) => Err(err),
            };
            settle(responder, result)
        }
        TransactionRequest::Delete { key, responder } => settle(responder, access.delete(&key)),
        TransactionRequest::Clear { responder } => settle(responder, access.clear()),
        TransactionRequest::Count { responder } => settle(responder, access.count()),
        TransactionRequest::GetAllKeys { responder } => settle(responder, access.keys()),
        TransactionRequest::ContinueCursor { after, responder } => {
            settle(responder, access.key_after(after.as_deref()))
        }
        // Handled by the caller before dispatch.
        TransactionRequest::Commit { responder } => {
            responder.succeed(());
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use std::ops::Bound;

    #[derive(Default)]
    struct MapAccess(BTreeMap<String, Value>);

    impl ObjectStoreAccess for MapAccess {
        fn get(&mut self, key: &str) -> Result<Option<Value>, EngineError> {
            Ok(self.0.get(key).cloned())
        }
        fn contains(&mut self, key: &str) -> Result<bool, EngineError> {
            Ok(self.0.contains_key(key))
        }
        fn put(&mut self, key: &str, value: &Value) -> Result<(), EngineError> {
            self.0.insert(key.to_string(), value.clone());
            Ok(())
        }
        fn delete(&mut self, key: &str) -> Result<(), EngineError> {
            self.0.remove(key);
            Ok(())
        }
        fn clear(&mut self) -> Result<(), EngineError> {
            self.0.clear();
            Ok(())
        }
        fn count(&mut self) -> Result<usize, EngineError> {
            Ok(self.0.len())
        }
        fn keys(&mut self) -> Result<Vec<String>, EngineError> {
            Ok(self.0.keys().cloned().collect())
        }
        fn key_after(&mut self, after: Option<&str>) -> Result<Option<String>, EngineError> {
            let lower = match after {
                Some(key) => Bound::Excluded(key.to_string()),
                None => Bound::Unbounded,
            };
            Ok(self
                .0
                .range((lower, Bound::Unbounded))
                .next()
                .map(|(k, _)| k.clone()))
        }
    }

    fn spawn_server(
        mut receiver: TransactionReceiver,
    ) -> std::thread::JoinHandle<(MapAccess, bool)> {
        std::thread::spawn(move || {
            let mut access = MapAccess::default();
            let committed = match serve_transaction(&mut receiver, &mut access) {
                TransactionOutcome::Commit(responder) => {
                    if let Some(responder) = responder {
                        responder.succeed(());
                    }
                    true
                }
                TransactionOutcome::Abort(err, responder) => {
                    if let Some(responder) = responder {
                        responder.fail(err);
                    }
                    false
                }
            };
            (access, committed)
        })
    }

    #[tokio::test]
    async fn test_requests_served_in_order() {
        let (txn, receiver) = Transaction::new("entries", TransactionMode::ReadWrite);
        let server = spawn_server(receiver);

        let first = txn.put("a", Value::from(1));
        let second = txn.put("a", Value::from(2));
        let read = txn.get("a");
        first.await.unwrap();
        second.await.unwrap();
        assert_eq!(read.await.unwrap(), Some(Value::from(2)));
        txn.commit().await.unwrap();

        let (access, committed) = server.join().unwrap();
        assert!(committed);
        assert_eq!(access.0.len(), 1);
    }

    #[tokio::test]
    async fn test_add_on_existing_key_aborts() {
        let (txn, receiver) = Transaction::new("entries", TransactionMode::ReadWrite);
        let server = spawn_server(receiver);

        txn.add("k", Value::from("v")).await.unwrap();
        let err = txn.add("k", Value::from("w")).await.unwrap_err();
        assert_eq!(err.kind, EngineErrorKind::Constraint);

        // Every later request fails, including the commit.
        let later = txn.get("k").await.unwrap_err();
        assert_eq!(later.kind, EngineErrorKind::Aborted);
        let commit = txn.commit().await.unwrap_err();
        assert_eq!(commit.kind, EngineErrorKind::Constraint);

        let (_, committed) = server.join().unwrap();
        assert!(!committed);
    }

    #[tokio::test]
    async fn test_write_on_read_only_transaction_fails() {
        let (txn, receiver) = Transaction::new("entries", TransactionMode::ReadOnly);
        let server = spawn_server(receiver);

        let err = txn.put("k", Value::from(1)).await.unwrap_err();
        assert_eq!(err.kind, EngineErrorKind::ReadOnly);
        drop(txn);
        server.join().unwrap();
    }

    #[tokio::test]
    async fn test_cursor_walks_every_key_once() {
        let (txn, receiver) = Transaction::new("entries", TransactionMode::ReadWrite);
        let server = spawn_server(receiver);

        for key in ["b", "a", "c"] {
            txn.put(key, Value::Bool(true)).await.unwrap();
        }

        let mut cursor = txn.open_cursor();
        let mut seen = Vec::new();
        while let Some(key) = cursor.next_key().await.unwrap() {
            seen.push(key);
        }
        assert_eq!(seen, vec!["a", "b", "c"]);
        assert_eq!(cursor.next_key().await.unwrap(), None);

        drop(txn);
        server.join().unwrap();
    }
}
