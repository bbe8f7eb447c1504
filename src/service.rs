//! Service layer API for trade offer negotiation
use crate::availability::{AvailabilityChecker, AvailabilityReport};
use crate::directory::{ItemDirectory, ProfileDirectory};
use crate::error::{CompletionResult, OfferError, StoreError};
use crate::notify::NotificationDispatcher;
use crate::offer::{Offer, OfferStatus, TimeStamp};
use crate::ratelimit::{RateAction, RateLimiter};
use crate::store::{ConfirmOutcome, OfferStore};
use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Caller identity for one request. Anonymous sessions can read, but every
/// mutating operation requires an authenticated user.
#[derive(Debug, Clone)]
pub struct Session {
    user_id: Option<String>,
}

impl Session {
    pub fn authenticated(user_id: &str) -> Self {
        Self {
            user_id: Some(user_id.to_string()),
        }
    }

    pub fn anonymous() -> Self {
        Self { user_id: None }
    }

    pub fn user_id(&self) -> Option<&str> {
        self.user_id.as_deref()
    }
}

/// Snapshot of an offer's two-phase completion progress.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletionStatus {
    pub status: OfferStatus,
    pub sender_confirmed: bool,
    pub receiver_confirmed: bool,
    pub completed_at: Option<TimeStamp<Utc>>,
}

/// The negotiation engine: owns the offer state machine and arbitrates
/// every lifecycle action.
///
/// Explicitly constructed and injected; holds no process-wide state. All
/// mutating entry points re-fetch authoritative records by id before
/// evaluating preconditions, so caller-held copies are never trusted.
pub struct NegotiationService {
    store: Arc<dyn OfferStore>,
    items: Arc<dyn ItemDirectory>,
    profiles: Arc<dyn ProfileDirectory>,
    notifier: Arc<dyn NotificationDispatcher>,
    limiter: Arc<RateLimiter>,
    availability: AvailabilityChecker,
}

impl NegotiationService {
    pub fn new(
        store: Arc<dyn OfferStore>,
        items: Arc<dyn ItemDirectory>,
        profiles: Arc<dyn ProfileDirectory>,
        notifier: Arc<dyn NotificationDispatcher>,
        limiter: Arc<RateLimiter>,
    ) -> Self {
        let availability = AvailabilityChecker::new(Arc::clone(&store));
        Self {
            store,
            items,
            profiles,
            notifier,
            limiter,
            availability,
        }
    }

    /// Propose a new trade. The first id on each side is the primary item;
    /// the receiver is whoever owns the primary wanted item.
    pub fn create_offer(
        &self,
        session: &Session,
        offered_item_ids: &[String],
        wanted_item_ids: &[String],
    ) -> Result<Offer, OfferError> {
        let sender_id = session.user_id().ok_or(OfferError::NotLoggedIn)?;

        let decision = self.limiter.can_perform(sender_id, RateAction::CreateOffer);
        if !decision.allowed {
            return Err(OfferError::RateLimited {
                retry_hint: decision.message.unwrap_or_else(|| "try again later".into()),
            });
        }

        let primary_offered = offered_item_ids.first().ok_or(OfferError::InvalidItems)?;
        let primary_wanted = wanted_item_ids.first().ok_or(OfferError::InvalidItems)?;

        // the sender must own what they offer and must not own what they ask
        // for; owning both sides would be a self-trade
        let offered_item = self
            .items
            .fetch_item(primary_offered)?
            .ok_or(OfferError::InvalidItems)?;
        if offered_item.owner_id != sender_id {
            return Err(OfferError::InvalidItems);
        }
        let wanted_item = self
            .items
            .fetch_item(primary_wanted)?
            .ok_or(OfferError::InvalidItems)?;
        if wanted_item.owner_id == sender_id {
            return Err(OfferError::InvalidItems);
        }
        let receiver_id = wanted_item.owner_id.clone();

        // only the receiver's block list is consulted at creation; the
        // symmetric check happens at accept time
        if self.profiles.is_blocked(&receiver_id, sender_id)? {
            return Err(OfferError::Blocked);
        }

        let report = self
            .availability
            .check(offered_item_ids, wanted_item_ids, sender_id);
        if report.duplicate_exists {
            return Err(OfferError::DuplicateOffer);
        }
        if !report.all_available {
            return Err(OfferError::ItemsBusy {
                offered_conflicts: report.busy_offered,
                wanted_conflicts: report.busy_wanted,
            });
        }

        let offer = Offer::new(sender_id, &receiver_id, offered_item_ids, wanted_item_ids);
        self.store.insert(&offer)?;
        self.limiter.record(sender_id, RateAction::CreateOffer);
        info!(offer_id = %offer.offer_id, sender_id, receiver_id = %receiver_id, "offer created");

        // implicit interest marker toward the wanted item; best effort only
        if let Err(e) = self.store.record_interest(sender_id, primary_wanted) {
            warn!(sender_id, item_id = %primary_wanted, error = %e, "failed to record interest marker");
        }

        self.notifier.notify(
            &receiver_id,
            "New trade offer",
            &format!("Someone wants to trade for your {}", wanted_item.name),
        );

        Ok(offer)
    }

    /// Accept or reject a pending offer. Only the receiver may respond.
    ///
    /// Acceptance does not re-run the availability check; that was validated
    /// at creation. Two offers over the same item accepted back to back can
    /// therefore slip through in a narrow window, a deliberate latency
    /// tradeoff.
    pub fn respond_to_offer(
        &self,
        offer_id: &str,
        acting_user_id: &str,
        accept: bool,
    ) -> Result<bool, OfferError> {
        let offer = self
            .store
            .find_by_id(offer_id)?
            .ok_or_else(|| OfferError::OfferNotFound(offer_id.to_string()))?;

        if offer.receiver_id != acting_user_id {
            return Err(OfferError::NotReceiver);
        }

        if accept {
            self.ensure_not_blocked(&offer.sender_id, &offer.receiver_id)?;
        }

        let new_status = if accept {
            OfferStatus::Accepted
        } else {
            OfferStatus::Rejected
        };
        let updated = self
            .store
            .update_status(offer_id, new_status, &[OfferStatus::Pending])
            .map_err(|e| match e {
                StoreError::StatusConflict { actual, .. } => OfferError::OfferNotActionable(actual),
                other => OfferError::Store(other),
            })?;
        info!(offer_id, status = %updated.status, "offer response recorded");

        self.notifier.notify(
            &offer.sender_id,
            if accept {
                "Trade offer accepted"
            } else {
                "Trade offer declined"
            },
            "Open your offers to see the details",
        );

        Ok(accept)
    }

    /// Counter a pending offer: the receiver offers back the item they were
    /// asked for, but wants a different item from the original sender.
    ///
    /// Works from the freshly fetched original only; the caller supplies
    /// nothing but ids.
    pub fn create_counter_offer(
        &self,
        original_offer_id: &str,
        counter_user_id: &str,
        new_wanted_item_id: &str,
    ) -> Result<Offer, OfferError> {
        let decision = self
            .limiter
            .can_perform(counter_user_id, RateAction::CreateOffer);
        if !decision.allowed {
            return Err(OfferError::RateLimited {
                retry_hint: decision.message.unwrap_or_else(|| "try again later".into()),
            });
        }

        let original = self
            .store
            .find_by_id(original_offer_id)?
            .ok_or_else(|| OfferError::OfferNotFound(original_offer_id.to_string()))?;

        if original.status != OfferStatus::Pending {
            return Err(OfferError::OriginalTradeInvalidStatus(original.status));
        }
        if original.receiver_id != counter_user_id {
            return Err(OfferError::NotOriginalReceiver);
        }
        self.ensure_not_blocked(&original.sender_id, &original.receiver_id)?;

        // the countering side is fixed: what they originally asked me for, I
        // now offer back
        let counter_offered = vec![original.wanted_item_id.clone()];
        let counter_wanted = vec![new_wanted_item_id.to_string()];
        let report = self
            .availability
            .check(&counter_offered, &counter_wanted, counter_user_id);
        if report.duplicate_exists {
            return Err(OfferError::DuplicateOffer);
        }
        if !report.all_available {
            return Err(OfferError::ItemsBusy {
                offered_conflicts: report.busy_offered,
                wanted_conflicts: report.busy_wanted,
            });
        }

        let new_wanted = self
            .items
            .fetch_item(new_wanted_item_id)?
            .ok_or(OfferError::InvalidItems)?;
        if new_wanted.owner_id != original.sender_id {
            return Err(OfferError::InvalidItems);
        }

        let replacement = Offer::new(
            counter_user_id,
            &original.sender_id,
            &counter_offered,
            &counter_wanted,
        );
        // countered-original write and replacement insert are one transaction
        self.store
            .apply_counter(original_offer_id, &replacement)
            .map_err(|e| match e {
                StoreError::StatusConflict { actual, .. } => {
                    OfferError::OriginalTradeInvalidStatus(actual)
                }
                other => OfferError::Store(other),
            })?;
        self.limiter.record(counter_user_id, RateAction::CreateOffer);
        info!(
            original_offer_id,
            replacement_id = %replacement.offer_id,
            "counter offer created"
        );

        self.notifier.notify(
            &original.sender_id,
            "Counter offer received",
            "Your trade offer was countered",
        );

        Ok(replacement)
    }

    /// Record one party's attestation that the physical exchange happened.
    /// The trade completes when the second attestation lands; neither party
    /// can complete it unilaterally.
    pub fn confirm_completion(
        &self,
        trade_id: &str,
        acting_user_id: &str,
    ) -> Result<CompletionResult, OfferError> {
        let offer = self
            .store
            .find_by_id(trade_id)?
            .ok_or_else(|| OfferError::OfferNotFound(trade_id.to_string()))?;

        let party = offer
            .party_of(acting_user_id)
            .ok_or(OfferError::NotParticipant)?;
        self.ensure_not_blocked(&offer.sender_id, &offer.receiver_id)?;

        match offer.status {
            OfferStatus::Accepted => {}
            OfferStatus::Completed => return Ok(CompletionResult::TradeCompleted),
            actual => return Err(OfferError::TradeNotAccepted(actual)),
        }
        if offer.confirmed_by(party) {
            return Ok(CompletionResult::AlreadyConfirmed);
        }

        // targeted flag write; concurrent confirmations serialize in the store
        let outcome = self
            .store
            .update_completion_flag(trade_id, party)
            .map_err(|e| match e {
                StoreError::StatusConflict { actual, .. } => OfferError::TradeNotAccepted(actual),
                other => OfferError::Store(other),
            })?;

        match outcome {
            ConfirmOutcome::FirstConfirmation(updated) => {
                debug!(trade_id, "first completion confirmation recorded");
                if let Some(other) = updated.other_party_id(acting_user_id) {
                    self.notifier.notify(
                        other,
                        "Trade confirmation",
                        "Your trade partner confirmed the exchange",
                    );
                }
                Ok(CompletionResult::Confirmed)
            }
            ConfirmOutcome::Completed(updated) => {
                info!(trade_id, "trade completed");
                // reputation / streak / achievement recalculation is driven
                // by external consumers of the change feed
                if let Some(other) = updated.other_party_id(acting_user_id) {
                    self.notifier
                        .notify(other, "Trade completed", "Both parties confirmed the trade");
                }
                Ok(CompletionResult::TradeCompleted)
            }
            ConfirmOutcome::AlreadyConfirmed(_) => Ok(CompletionResult::AlreadyConfirmed),
            ConfirmOutcome::AlreadyCompleted(_) => Ok(CompletionResult::TradeCompleted),
        }
    }

    /// Current two-phase completion progress for a trade.
    pub fn get_completion_status(&self, trade_id: &str) -> Result<CompletionStatus, OfferError> {
        let offer = self
            .store
            .find_by_id(trade_id)?
            .ok_or_else(|| OfferError::OfferNotFound(trade_id.to_string()))?;

        Ok(CompletionStatus {
            status: offer.status,
            sender_confirmed: offer.sender_confirmed_completion,
            receiver_confirmed: offer.receiver_confirmed_completion,
            completed_at: offer.completed_at,
        })
    }

    /// Withdraw a committed offer. Either participant may cancel.
    pub fn cancel_offer(&self, offer_id: &str, acting_user_id: &str) -> Result<Offer, OfferError> {
        let offer = self
            .store
            .find_by_id(offer_id)?
            .ok_or_else(|| OfferError::OfferNotFound(offer_id.to_string()))?;
        if !offer.is_participant(acting_user_id) {
            return Err(OfferError::NotParticipant);
        }

        let cancelled = self
            .store
            .update_status(offer_id, OfferStatus::Cancelled, &OfferStatus::COMMITTED)
            .map_err(|e| match e {
                StoreError::StatusConflict { actual, .. } => OfferError::OfferNotActionable(actual),
                other => OfferError::Store(other),
            })?;
        info!(offer_id, acting_user_id, "offer cancelled");

        if let Some(other) = cancelled.other_party_id(acting_user_id) {
            self.notifier
                .notify(other, "Trade offer cancelled", "The offer was withdrawn");
        }
        Ok(cancelled)
    }

    /// Pending offers awaiting this user's response. Accepting, rejecting or
    /// countering removes an offer from this view by moving its status.
    pub fn incoming_offers(&self, user_id: &str) -> Result<Vec<Offer>, OfferError> {
        let offers = self
            .store
            .find_by_participant(user_id, &[OfferStatus::Pending])?;
        Ok(offers
            .into_iter()
            .filter(|offer| offer.receiver_id == user_id)
            .collect())
    }

    /// Committed offers this user has proposed.
    pub fn outgoing_offers(&self, user_id: &str) -> Result<Vec<Offer>, OfferError> {
        let offers = self
            .store
            .find_by_participant(user_id, &OfferStatus::COMMITTED)?;
        Ok(offers
            .into_iter()
            .filter(|offer| offer.sender_id == user_id)
            .collect())
    }

    /// Availability verdict for a proposed exchange, without creating anything.
    pub fn check_availability(
        &self,
        offered_item_ids: &[String],
        wanted_item_ids: &[String],
        acting_user_id: &str,
    ) -> AvailabilityReport {
        self.availability
            .check(offered_item_ids, wanted_item_ids, acting_user_id)
    }

    /// Whether any committed offer already promises this item.
    pub fn is_item_busy(&self, item_id: &str) -> bool {
        self.availability.is_item_busy(item_id)
    }

    // both directions: my block list, and "have they blocked me"
    fn ensure_not_blocked(&self, a: &str, b: &str) -> Result<(), OfferError> {
        if self.profiles.is_blocked(a, b)? || self.profiles.is_blocked(b, a)? {
            return Err(OfferError::Blocked);
        }
        Ok(())
    }
}
