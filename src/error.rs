//! Error and result types for the negotiation engine
use crate::offer::OfferStatus;

/// Outcome of a completion confirmation.
///
/// Repeated confirmations by the same party are informative no-ops, so the
/// happy path is a closed enum rather than a bare boolean.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionResult {
    /// The acting party confirmed first and is waiting on the counterparty.
    Confirmed,
    /// The acting party had already confirmed before this call.
    AlreadyConfirmed,
    /// Both parties have confirmed; the trade is completed.
    TradeCompleted,
}

/// Failures of the persistence layer.
#[derive(thiserror::Error, Debug)]
pub enum StoreError {
    #[error("offer not found: {0}")]
    NotFound(String),
    #[error("offer already exists: {0}")]
    AlreadyExists(String),
    #[error("offer {offer_id} is in status {actual}, not in an expected status")]
    StatusConflict {
        offer_id: String,
        actual: OfferStatus,
    },
    #[error("failed to encode or decode an offer record: {0}")]
    Codec(String),
    #[error(transparent)]
    Backend(#[from] sled::Error),
}

/// Failures of the external item/profile directories.
#[derive(thiserror::Error, Debug)]
pub enum DirectoryError {
    #[error("directory unavailable: {0}")]
    Unavailable(String),
}

/// Every reportable outcome of a negotiation operation.
///
/// Contention conditions (rate limits, busy items, duplicates) are expected
/// and recoverable; callers are meant to match on them and surface a specific
/// message rather than a generic failure.
#[derive(thiserror::Error, Debug)]
pub enum OfferError {
    #[error("caller is not logged in")]
    NotLoggedIn,
    #[error("rate limited: {retry_hint}")]
    RateLimited { retry_hint: String },
    #[error("offered or wanted items are invalid for this trade")]
    InvalidItems,
    #[error("one of the parties has blocked the other")]
    Blocked,
    #[error("an equivalent offer is already in progress")]
    DuplicateOffer,
    #[error("items are committed to other offers")]
    ItemsBusy {
        offered_conflicts: Vec<String>,
        wanted_conflicts: Vec<String>,
    },
    #[error("offer not found: {0}")]
    OfferNotFound(String),
    #[error("acting user is not the receiver of this offer")]
    NotReceiver,
    #[error("only the original receiver may counter this offer")]
    NotOriginalReceiver,
    #[error("acting user is not a participant of this trade")]
    NotParticipant,
    #[error("original offer is in status {0}, only pending offers can be countered")]
    OriginalTradeInvalidStatus(OfferStatus),
    #[error("trade is in status {0}, completion requires an accepted trade")]
    TradeNotAccepted(OfferStatus),
    #[error("offer is no longer actionable, current status: {0}")]
    OfferNotActionable(OfferStatus),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Directory(#[from] DirectoryError),
}
