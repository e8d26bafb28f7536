//! Per-block event ingestion for the off-chain node.
//!
//! One producer walks block results in height order and flattens every
//! transaction's events into the dispatch queue. Consumers may be
//! arbitrarily slow; the queue grows instead of back-pressuring the
//! producer.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::errors::ChainResult;

/// Multi-producer/single-consumer queue without a capacity bound. Pushes
/// never block; `recv` parks until an element or close arrives.
pub struct UnboundedQueue<T> {
    inner: Mutex<QueueInner<T>>,
    available: Condvar,
}

struct QueueInner<T> {
    items: std::collections::VecDeque<T>,
    closed: bool,
}

impl<T> UnboundedQueue<T> {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(QueueInner {
                items: std::collections::VecDeque::new(),
                closed: false,
            }),
            available: Condvar::new(),
        }
    }

    pub fn push(&self, item: T) {
        let mut inner = self.inner.lock();
        if inner.closed {
            return;
        }
        inner.items.push_back(item);
        self.available.notify_one();
    }

    /// Blocks until an item is available or the queue is closed and drained.
    pub fn recv(&self) -> Option<T> {
        let mut inner = self.inner.lock();
        loop {
            if let Some(item) = inner.items.pop_front() {
                return Some(item);
            }
            if inner.closed {
                return None;
            }
            self.available.wait(&mut inner);
        }
    }

    pub fn recv_timeout(&self, timeout: Duration) -> Option<T> {
        let mut inner = self.inner.lock();
        loop {
            if let Some(item) = inner.items.pop_front() {
                return Some(item);
            }
            if inner.closed {
                return None;
            }
            if self.available.wait_for(&mut inner, timeout).timed_out() {
                return inner.items.pop_front();
            }
        }
    }

    pub fn try_recv(&self) -> Option<T> {
        self.inner.lock().items.pop_front()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Closing is the owner's call; producers silently drop further pushes.
    pub fn close(&self) {
        self.inner.lock().closed = true;
        self.available.notify_all();
    }
}

impl<T> Default for UnboundedQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Flattened per-transaction event envelope, shaped like the upstream
/// JSON-RPC subscription payload.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct TxEventEnvelope {
    pub id: String,
    pub result: TxEventResult,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct TxEventResult {
    pub data: TxEventData,
    /// `"<eventType>.<attributeKey>"` → attribute values.
    pub events: BTreeMap<String, Vec<String>>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct TxEventData {
    #[serde(rename = "type")]
    pub kind: String,
}

pub const TX_EVENT_TYPE: &str = "tendermint/event/Tx";
pub const TX_HEIGHT_KEY: &str = "tx.height";

/// Raw block-results as returned by the RPC layer.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct BlockResults {
    #[serde(default)]
    pub txs_results: Vec<TxResult>,
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct TxResult {
    #[serde(default)]
    pub events: Vec<TxEvent>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct TxEvent {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub attributes: Vec<TxEventAttribute>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct TxEventAttribute {
    pub key: String,
    pub value: String,
}

/// Source of block results for the observer.
pub trait BlockResultsClient: Send + Sync {
    fn block_results(&self, height: i64) -> ChainResult<BlockResults>;
}

struct ObserverState {
    last_processed: AtomicI64,
    current: AtomicI64,
    caught_up: AtomicBool,
    cancelled: AtomicBool,
    wake_lock: Mutex<()>,
    wake: Condvar,
}

/// Streams block results and feeds the dispatch queue in strict height
/// order. `update_status` is idempotent: repeating the same values never
/// re-triggers processing.
pub struct BlockObserver<C> {
    client: C,
    state: Arc<ObserverState>,
    queue: Arc<UnboundedQueue<TxEventEnvelope>>,
}

impl<C: BlockResultsClient> BlockObserver<C> {
    pub fn new(client: C) -> Self {
        Self {
            client,
            state: Arc::new(ObserverState {
                last_processed: AtomicI64::new(0),
                current: AtomicI64::new(0),
                caught_up: AtomicBool::new(false),
                cancelled: AtomicBool::new(false),
                wake_lock: Mutex::new(()),
                wake: Condvar::new(),
            }),
            queue: Arc::new(UnboundedQueue::new()),
        }
    }

    /// Shared handle to the outgoing event queue.
    pub fn queue(&self) -> Arc<UnboundedQueue<TxEventEnvelope>> {
        self.queue.clone()
    }

    pub fn last_processed_height(&self) -> i64 {
        self.state.last_processed.load(Ordering::Acquire)
    }

    /// Records the chain tip and sync state. Duplicate updates are filtered
    /// against the stored atomics and produce no wakeup.
    pub fn update_status(&self, new_height: i64, caught_up: bool) {
        let state = &self.state;
        let height_changed = state.current.swap(new_height, Ordering::AcqRel) != new_height;
        let sync_changed = state.caught_up.swap(caught_up, Ordering::AcqRel) != caught_up;
        if height_changed || sync_changed {
            let _guard = state.wake_lock.lock();
            state.wake.notify_all();
        }
    }

    /// Stops the producer after the block it is currently working on. The
    /// queue stays open; closing it is the owner's responsibility.
    pub fn cancel(&self) {
        self.state.cancelled.store(true, Ordering::Release);
        let _guard = self.state.wake_lock.lock();
        self.state.wake.notify_all();
    }

    /// Producer loop. Run on a dedicated thread; returns on cancellation.
    pub fn run(&self) {
        loop {
            if self.state.cancelled.load(Ordering::Acquire) {
                return;
            }
            let caught_up = self.state.caught_up.load(Ordering::Acquire);
            let current = self.state.current.load(Ordering::Acquire);
            let last = self.state.last_processed.load(Ordering::Acquire);

            if !caught_up || last >= current {
                let mut guard = self.state.wake_lock.lock();
                // Re-check under the lock so a racing update is not missed.
                if self.state.cancelled.load(Ordering::Acquire) {
                    return;
                }
                if self.state.caught_up.load(Ordering::Acquire)
                    && self.state.last_processed.load(Ordering::Acquire)
                        < self.state.current.load(Ordering::Acquire)
                {
                    continue;
                }
                let _ = self
                    .state
                    .wake
                    .wait_for(&mut guard, Duration::from_millis(500));
                continue;
            }

            let height = last + 1;
            if self.process_block(height) {
                self.state.last_processed.store(height, Ordering::Release);
            } else if !self.state.cancelled.load(Ordering::Acquire) {
                // Transient fetch trouble: retry the same height shortly.
                std::thread::sleep(Duration::from_millis(200));
            }
        }
    }

    /// Fetches one block's results and enqueues one envelope per
    /// transaction. Returns false when the fetch failed; parse problems in
    /// individual transactions are logged and skipped.
    pub fn process_block(&self, height: i64) -> bool {
        let results = match self.client.block_results(height) {
            Ok(results) => results,
            Err(err) => {
                warn!(height, %err, "failed to fetch block results");
                return false;
            }
        };

        for (index, tx) in results.txs_results.iter().enumerate() {
            let envelope = flatten_tx_events(height, index, tx);
            self.queue.push(envelope);
        }
        debug!(
            height,
            txs = results.txs_results.len(),
            "enqueued block events"
        );
        true
    }
}

/// Flattens one transaction's events into the subscription envelope shape.
pub fn flatten_tx_events(height: i64, tx_index: usize, tx: &TxResult) -> TxEventEnvelope {
    let mut events: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for event in &tx.events {
        for attribute in &event.attributes {
            events
                .entry(format!("{}.{}", event.kind, attribute.key))
                .or_default()
                .push(attribute.value.clone());
        }
    }
    events.insert(TX_HEIGHT_KEY.to_string(), vec![height.to_string()]);

    TxEventEnvelope {
        id: format!("{height}-{tx_index}"),
        result: TxEventResult {
            data: TxEventData {
                kind: TX_EVENT_TYPE.to_string(),
            },
            events,
        },
    }
}
