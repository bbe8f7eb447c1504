//! Offer persistence on top of sled
//!
//! The offer table is the single source of truth for negotiation state.
//! Status transitions and completion-flag writes go through
//! `compare_and_swap` loops on the full current record, so concurrent
//! mutations of the same offer serialize at the storage layer instead of
//! clobbering each other through stale read-modify-write copies.

use crate::error::StoreError;
use crate::offer::{Offer, OfferStatus, Party, TimeStamp};
use crate::utils;
use sled::transaction::{ConflictableTransactionError, TransactionError};

/// The role an item id can play inside an offer record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemRole {
    /// The primary offered slot only.
    PrimaryOffered,
    /// The primary wanted slot only.
    PrimaryWanted,
    /// Primary or additional offered slots.
    Offered,
    /// Primary or additional wanted slots.
    Wanted,
}

impl ItemRole {
    fn matches(&self, offer: &Offer, item_id: &str) -> bool {
        match self {
            ItemRole::PrimaryOffered => offer.offered_item_id == item_id,
            ItemRole::PrimaryWanted => offer.wanted_item_id == item_id,
            ItemRole::Offered => offer.offered_item_ids().any(|id| id == item_id),
            ItemRole::Wanted => offer.wanted_item_ids().any(|id| id == item_id),
        }
    }
}

/// Result of a completion-flag update, derived from the record state the
/// compare-and-swap actually replaced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfirmOutcome {
    /// The acting party's flag landed first; waiting on the counterparty.
    FirstConfirmation(Offer),
    /// The acting party's flag landed second; this update completed the trade.
    Completed(Offer),
    /// The acting party's flag was already set.
    AlreadyConfirmed(Offer),
    /// The trade was already completed before this update.
    AlreadyCompleted(Offer),
}

/// Persistence abstraction for offer records.
///
/// An empty `statuses` filter means "any status". `apply_counter` exists so
/// that the countered-original write and its replacement insert share one
/// transaction; handing the pair to callers as two calls would leave a
/// countered offer with no replacement if the second write failed.
pub trait OfferStore: Send + Sync {
    fn insert(&self, offer: &Offer) -> Result<(), StoreError>;
    fn find_by_id(&self, offer_id: &str) -> Result<Option<Offer>, StoreError>;
    fn find_by_participant(
        &self,
        user_id: &str,
        statuses: &[OfferStatus],
    ) -> Result<Vec<Offer>, StoreError>;
    fn find_by_item_role(
        &self,
        item_id: &str,
        role: ItemRole,
        statuses: &[OfferStatus],
    ) -> Result<Vec<Offer>, StoreError>;
    /// Transition an offer to `new_status`, provided its current status is in
    /// `expected`. Returns the updated record.
    fn update_status(
        &self,
        offer_id: &str,
        new_status: OfferStatus,
        expected: &[OfferStatus],
    ) -> Result<Offer, StoreError>;
    /// Set one party's completion flag through a targeted compare-and-swap.
    /// Flips the status to `completed` and stamps `completed_at` exactly once,
    /// in the same swap that lands the second flag.
    fn update_completion_flag(
        &self,
        offer_id: &str,
        party: Party,
    ) -> Result<ConfirmOutcome, StoreError>;
    /// Atomically mark the original offer `countered` and insert its
    /// replacement. Returns the countered original.
    fn apply_counter(&self, original_id: &str, replacement: &Offer) -> Result<Offer, StoreError>;
    fn record_interest(&self, user_id: &str, item_id: &str) -> Result<(), StoreError>;
    fn has_interest(&self, user_id: &str, item_id: &str) -> Result<bool, StoreError>;
}

pub(crate) fn encode_offer(offer: &Offer) -> Result<Vec<u8>, StoreError> {
    minicbor::to_vec(offer).map_err(|e| StoreError::Codec(e.to_string()))
}

pub(crate) fn decode_offer(raw: &[u8]) -> Result<Offer, StoreError> {
    minicbor::decode(raw).map_err(|e| StoreError::Codec(e.to_string()))
}

/// Sled-backed offer store: an `offers` tree keyed by offer id and an
/// `interest` tree keyed by a hash of (user, item).
pub struct SledOfferStore {
    offers: sled::Tree,
    interest: sled::Tree,
}

impl SledOfferStore {
    pub fn open(db: &sled::Db) -> Result<Self, StoreError> {
        Ok(Self {
            offers: db.open_tree("offers")?,
            interest: db.open_tree("interest")?,
        })
    }

    /// Subscribe to raw mutations of the offer table. The realtime change
    /// feed decodes and fans these out per participant.
    pub fn watch(&self) -> sled::Subscriber {
        self.offers.watch_prefix(vec![])
    }

    fn scan<F>(&self, mut keep: F) -> Result<Vec<Offer>, StoreError>
    where
        F: FnMut(&Offer) -> bool,
    {
        let mut found = Vec::new();
        for entry in self.offers.iter() {
            let (_, raw) = entry?;
            let offer = decode_offer(&raw)?;
            if keep(&offer) {
                found.push(offer);
            }
        }
        Ok(found)
    }
}

fn status_allowed(status: OfferStatus, filter: &[OfferStatus]) -> bool {
    filter.is_empty() || filter.contains(&status)
}

impl OfferStore for SledOfferStore {
    fn insert(&self, offer: &Offer) -> Result<(), StoreError> {
        let raw = encode_offer(offer)?;
        let swap = self.offers.compare_and_swap(
            offer.offer_id.as_bytes(),
            None as Option<&[u8]>,
            Some(raw),
        )?;
        swap.map_err(|_| StoreError::AlreadyExists(offer.offer_id.clone()))
    }

    fn find_by_id(&self, offer_id: &str) -> Result<Option<Offer>, StoreError> {
        match self.offers.get(offer_id.as_bytes())? {
            Some(raw) => Ok(Some(decode_offer(&raw)?)),
            None => Ok(None),
        }
    }

    fn find_by_participant(
        &self,
        user_id: &str,
        statuses: &[OfferStatus],
    ) -> Result<Vec<Offer>, StoreError> {
        self.scan(|offer| offer.is_participant(user_id) && status_allowed(offer.status, statuses))
    }

    fn find_by_item_role(
        &self,
        item_id: &str,
        role: ItemRole,
        statuses: &[OfferStatus],
    ) -> Result<Vec<Offer>, StoreError> {
        self.scan(|offer| role.matches(offer, item_id) && status_allowed(offer.status, statuses))
    }

    fn update_status(
        &self,
        offer_id: &str,
        new_status: OfferStatus,
        expected: &[OfferStatus],
    ) -> Result<Offer, StoreError> {
        loop {
            let current_raw = self
                .offers
                .get(offer_id.as_bytes())?
                .ok_or_else(|| StoreError::NotFound(offer_id.to_string()))?;
            let current = decode_offer(&current_raw)?;

            if !expected.contains(&current.status) {
                return Err(StoreError::StatusConflict {
                    offer_id: offer_id.to_string(),
                    actual: current.status,
                });
            }

            let mut updated = current;
            updated.status = new_status;
            let new_raw = encode_offer(&updated)?;

            let swap = self.offers.compare_and_swap(
                offer_id.as_bytes(),
                Some(current_raw),
                Some(new_raw),
            )?;
            match swap {
                Ok(()) => return Ok(updated),
                // lost a race against another writer, retry on fresh state
                Err(_) => continue,
            }
        }
    }

    fn update_completion_flag(
        &self,
        offer_id: &str,
        party: Party,
    ) -> Result<ConfirmOutcome, StoreError> {
        loop {
            let current_raw = self
                .offers
                .get(offer_id.as_bytes())?
                .ok_or_else(|| StoreError::NotFound(offer_id.to_string()))?;
            let current = decode_offer(&current_raw)?;

            match current.status {
                OfferStatus::Completed => return Ok(ConfirmOutcome::AlreadyCompleted(current)),
                OfferStatus::Accepted => {}
                actual => {
                    return Err(StoreError::StatusConflict {
                        offer_id: offer_id.to_string(),
                        actual,
                    });
                }
            }

            if current.confirmed_by(party) {
                return Ok(ConfirmOutcome::AlreadyConfirmed(current));
            }

            let mut updated = current;
            updated.set_confirmed(party);
            let completes =
                updated.sender_confirmed_completion && updated.receiver_confirmed_completion;
            if completes {
                updated.status = OfferStatus::Completed;
                updated.completed_at = Some(TimeStamp::new());
            }
            let new_raw = encode_offer(&updated)?;

            let swap = self.offers.compare_and_swap(
                offer_id.as_bytes(),
                Some(current_raw),
                Some(new_raw),
            )?;
            match swap {
                Ok(()) => {
                    return Ok(if completes {
                        ConfirmOutcome::Completed(updated)
                    } else {
                        ConfirmOutcome::FirstConfirmation(updated)
                    });
                }
                // a concurrent confirmation landed first, retry on fresh state
                Err(_) => continue,
            }
        }
    }

    fn apply_counter(&self, original_id: &str, replacement: &Offer) -> Result<Offer, StoreError> {
        let result = self.offers.transaction(|tx| {
            let raw = tx.get(original_id.as_bytes())?.ok_or_else(|| {
                ConflictableTransactionError::Abort(StoreError::NotFound(original_id.to_string()))
            })?;
            let mut original = decode_offer(&raw).map_err(ConflictableTransactionError::Abort)?;

            if original.status != OfferStatus::Pending {
                return Err(ConflictableTransactionError::Abort(
                    StoreError::StatusConflict {
                        offer_id: original_id.to_string(),
                        actual: original.status,
                    },
                ));
            }
            original.status = OfferStatus::Countered;

            let original_raw =
                encode_offer(&original).map_err(ConflictableTransactionError::Abort)?;
            let replacement_raw =
                encode_offer(replacement).map_err(ConflictableTransactionError::Abort)?;

            tx.insert(original_id.as_bytes(), original_raw)?;
            tx.insert(replacement.offer_id.as_bytes(), replacement_raw)?;

            Ok(original)
        });

        match result {
            Ok(countered) => Ok(countered),
            Err(TransactionError::Abort(e)) => Err(e),
            Err(TransactionError::Storage(e)) => Err(StoreError::Backend(e)),
        }
    }

    fn record_interest(&self, user_id: &str, item_id: &str) -> Result<(), StoreError> {
        let key = utils::composite_key(&[user_id, item_id]);
        let stamped = minicbor::to_vec(TimeStamp::new()).map_err(|e| StoreError::Codec(e.to_string()))?;
        self.interest.insert(key.as_bytes(), stamped)?;
        Ok(())
    }

    fn has_interest(&self, user_id: &str, item_id: &str) -> Result<bool, StoreError> {
        let key = utils::composite_key(&[user_id, item_id]);
        Ok(self.interest.get(key.as_bytes())?.is_some())
    }
}
