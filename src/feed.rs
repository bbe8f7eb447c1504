//! Realtime offer change feed
//!
//! Watches the offer table and fans mutations out to per-user subscriptions.
//! Consumers use the events to refresh hydrated views; the feed itself never
//! drives state transitions and its events are not authoritative for
//! precondition checks.

use crate::offer::Offer;
use crate::store::{SledOfferStore, decode_offer};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, warn};

const POLL_INTERVAL: Duration = Duration::from_millis(200);

/// A mutation of the offer table, scoped to one subscriber.
#[derive(Debug, Clone)]
pub enum FeedEvent {
    /// An offer involving the subscriber was inserted or updated.
    Upserted(Offer),
    /// An offer row disappeared. The engine never deletes rows itself, so
    /// this only fires for external administrative deletes; it carries the
    /// raw key and is not participant-filtered.
    Removed(String),
}

#[derive(Debug, Clone)]
pub struct FeedConfig {
    /// Delay before a dropped watcher is re-established.
    pub reconnect_backoff: Duration,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            reconnect_backoff: Duration::from_secs(5),
        }
    }
}

/// Subscription source for offer-table mutations.
pub struct ChangeFeed {
    store: Arc<SledOfferStore>,
    config: FeedConfig,
}

impl ChangeFeed {
    pub fn new(store: Arc<SledOfferStore>) -> Self {
        Self::with_config(store, FeedConfig::default())
    }

    pub fn with_config(store: Arc<SledOfferStore>, config: FeedConfig) -> Self {
        Self { store, config }
    }

    /// Start a worker that forwards mutations of offers the given user
    /// participates in. The worker re-establishes its watcher with a fixed
    /// backoff if it ever ends, and exits once the subscription is stopped
    /// or its receiver is dropped.
    pub fn subscribe(&self, user_id: &str) -> FeedSubscription {
        let (tx, rx) = mpsc::channel();
        let stop = Arc::new(AtomicBool::new(false));

        let store = Arc::clone(&self.store);
        let stop_flag = Arc::clone(&stop);
        let backoff = self.config.reconnect_backoff;
        let user = user_id.to_string();

        let worker = thread::spawn(move || {
            while !stop_flag.load(Ordering::Relaxed) {
                let mut subscriber = store.watch();
                debug!(user_id = %user, "offer change watcher established");

                loop {
                    if stop_flag.load(Ordering::Relaxed) {
                        return;
                    }
                    match subscriber.next_timeout(POLL_INTERVAL) {
                        Ok(event) => {
                            if !forward(&tx, &user, event) {
                                return;
                            }
                        }
                        Err(RecvTimeoutError::Timeout) => continue,
                        Err(RecvTimeoutError::Disconnected) => break,
                    }
                }

                if stop_flag.load(Ordering::Relaxed) {
                    return;
                }
                warn!(user_id = %user, "offer change watcher ended, re-subscribing");
                thread::sleep(backoff);
            }
        });

        FeedSubscription {
            events: rx,
            stop,
            worker: Some(worker),
        }
    }
}

// returns false once the receiving side is gone
fn forward(tx: &Sender<FeedEvent>, user_id: &str, event: sled::Event) -> bool {
    match event {
        sled::Event::Insert { key: _, value } => match decode_offer(&value) {
            Ok(offer) => {
                if offer.is_participant(user_id) {
                    return tx.send(FeedEvent::Upserted(offer)).is_ok();
                }
                true
            }
            Err(e) => {
                warn!(error = %e, "skipping undecodable offer row in change feed");
                true
            }
        },
        sled::Event::Remove { key } => {
            let offer_id = String::from_utf8_lossy(&key).to_string();
            tx.send(FeedEvent::Removed(offer_id)).is_ok()
        }
    }
}

/// Handle to a running feed worker. Events arrive on [`events`](Self::events);
/// dropping the handle stops the worker at its next poll tick.
pub struct FeedSubscription {
    events: Receiver<FeedEvent>,
    stop: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
}

impl FeedSubscription {
    pub fn events(&self) -> &Receiver<FeedEvent> {
        &self.events
    }

    /// Block up to `timeout` for the next event.
    pub fn recv_timeout(&self, timeout: Duration) -> Result<FeedEvent, RecvTimeoutError> {
        self.events.recv_timeout(timeout)
    }

    /// Stop the worker and wait for it to wind down.
    pub fn stop(mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

impl Drop for FeedSubscription {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
    }
}
