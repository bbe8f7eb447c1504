//! Core offer record, status enumeration and timestamp types
use crate::utils;
use chrono::{DateTime, TimeZone, Utc};

/// Lifecycle status of an offer.
///
/// `Pending` and `Accepted` are the committed statuses: while an offer holds
/// one of them, its offered items are considered spoken for. `Rejected`,
/// `Cancelled` and `Completed` are terminal. `Countered` is terminal for the
/// offer itself but is always paired with a freshly created replacement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum OfferStatus {
    Pending,
    Accepted,
    Rejected,
    Countered,
    Cancelled,
    Completed,
}

impl OfferStatus {
    /// Statuses during which an offer's items are unavailable to other offers.
    pub const COMMITTED: [OfferStatus; 2] = [OfferStatus::Pending, OfferStatus::Accepted];

    pub fn as_str(&self) -> &'static str {
        match self {
            OfferStatus::Pending => "pending",
            OfferStatus::Accepted => "accepted",
            OfferStatus::Rejected => "rejected",
            OfferStatus::Countered => "countered",
            OfferStatus::Cancelled => "cancelled",
            OfferStatus::Completed => "completed",
        }
    }

    /// Parse a status from its serialized name. Unknown names map to
    /// `Pending` so that records written by newer schema revisions still load.
    pub fn from_name(name: &str) -> Self {
        match name {
            "accepted" => OfferStatus::Accepted,
            "rejected" => OfferStatus::Rejected,
            "countered" => OfferStatus::Countered,
            "cancelled" => OfferStatus::Cancelled,
            "completed" => OfferStatus::Completed,
            _ => OfferStatus::Pending,
        }
    }

    pub fn is_committed(&self) -> bool {
        Self::COMMITTED.contains(self)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OfferStatus::Rejected | OfferStatus::Cancelled | OfferStatus::Completed
        )
    }
}

impl std::fmt::Display for OfferStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// The status is persisted as its string name rather than a numeric tag so
// that records survive schema drift in both directions.
impl<C> minicbor::Encode<C> for OfferStatus {
    fn encode<W: minicbor::encode::Write>(
        &self,
        e: &mut minicbor::Encoder<W>,
        _: &mut C,
    ) -> Result<(), minicbor::encode::Error<W::Error>> {
        e.str(self.as_str())?.ok()
    }
}

impl<'b, C> minicbor::Decode<'b, C> for OfferStatus {
    fn decode(d: &mut minicbor::Decoder<'b>, _: &mut C) -> Result<Self, minicbor::decode::Error> {
        let name = d.str()?;

        Ok(OfferStatus::from_name(name))
    }
}

/// One side of an offer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Party {
    Sender,
    Receiver,
}

#[derive(Debug, PartialEq, Eq, PartialOrd, Ord, Clone)]
pub struct TimeStamp<T: TimeZone>(DateTime<T>);

impl TimeStamp<Utc> {
    pub fn new() -> Self {
        Self(Utc::now())
    }
    pub fn new_with(year: i32, month: u32, day: u32, hour: u32, min: u32, sec: u32) -> Self {
        Utc.with_ymd_and_hms(year, month, day, hour, min, sec)
            .unwrap()
            .into()
    }
    pub fn to_datetime_utc(&self) -> DateTime<Utc> {
        self.0
    }
}

impl Default for TimeStamp<Utc> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: TimeZone> From<DateTime<T>> for TimeStamp<T> {
    fn from(value: DateTime<T>) -> Self {
        TimeStamp(value)
    }
}

impl<C> minicbor::Encode<C> for TimeStamp<Utc> {
    fn encode<W: minicbor::encode::Write>(
        &self,
        e: &mut minicbor::Encoder<W>,
        _: &mut C,
    ) -> Result<(), minicbor::encode::Error<W::Error>> {
        if let Some(nsec) = self.0.timestamp_nanos_opt() {
            return e.i64(nsec)?.ok();
        }

        Err(minicbor::encode::Error::message(
            "failed to encode timestamp. timestamp_nanos_opt returned None",
        ))
    }
}

impl<'b, C> minicbor::Decode<'b, C> for TimeStamp<Utc> {
    fn decode(d: &mut minicbor::Decoder<'b>, _: &mut C) -> Result<Self, minicbor::decode::Error> {
        let nsecs = d.i64()?;

        Ok(TimeStamp(DateTime::from_timestamp_nanos(nsecs)))
    }
}

/// The central record of the negotiation engine: a proposed exchange of
/// items between a sender and a receiver.
///
/// The first item on each side is the primary one (kept separate for
/// backward compatibility with single-item trades); `additional_*` extend
/// the exchange to bundles. Insertion order of the additional lists carries
/// no meaning.
#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Eq)]
pub struct Offer {
    #[n(0)]
    pub offer_id: String, // uuid7, bech32 encoded
    #[n(1)]
    pub sender_id: String,
    #[n(2)]
    pub receiver_id: String,
    #[n(3)]
    pub offered_item_id: String,
    #[n(4)]
    pub wanted_item_id: String,
    #[n(5)]
    pub additional_offered_item_ids: Vec<String>,
    #[n(6)]
    pub additional_wanted_item_ids: Vec<String>,
    #[n(7)]
    pub status: OfferStatus,
    #[n(8)]
    pub sender_confirmed_completion: bool,
    #[n(9)]
    pub receiver_confirmed_completion: bool,
    #[n(10)]
    pub completed_at: Option<TimeStamp<Utc>>,
    #[n(11)]
    pub created_at: TimeStamp<Utc>,
}

impl Offer {
    /// Construct a new pending offer. The first id of each list becomes the
    /// primary item, the rest become the additional bundle.
    ///
    /// Both lists must be non-empty; callers validate that before building.
    pub fn new(sender_id: &str, receiver_id: &str, offered: &[String], wanted: &[String]) -> Self {
        let offer_id = utils::new_uuid_to_bech32("offer").unwrap_or_else(|_| uuid7::uuid7().to_string());

        Self {
            offer_id,
            sender_id: sender_id.to_string(),
            receiver_id: receiver_id.to_string(),
            offered_item_id: offered.first().cloned().unwrap_or_default(),
            wanted_item_id: wanted.first().cloned().unwrap_or_default(),
            additional_offered_item_ids: offered.iter().skip(1).cloned().collect(),
            additional_wanted_item_ids: wanted.iter().skip(1).cloned().collect(),
            status: OfferStatus::Pending,
            sender_confirmed_completion: false,
            receiver_confirmed_completion: false,
            completed_at: None,
            created_at: TimeStamp::new(),
        }
    }

    /// Which side of this offer the given user is on, if any.
    pub fn party_of(&self, user_id: &str) -> Option<Party> {
        if self.sender_id == user_id {
            Some(Party::Sender)
        } else if self.receiver_id == user_id {
            Some(Party::Receiver)
        } else {
            None
        }
    }

    pub fn is_participant(&self, user_id: &str) -> bool {
        self.party_of(user_id).is_some()
    }

    /// The counterparty of the given participant.
    pub fn other_party_id(&self, user_id: &str) -> Option<&str> {
        match self.party_of(user_id)? {
            Party::Sender => Some(&self.receiver_id),
            Party::Receiver => Some(&self.sender_id),
        }
    }

    /// Every item id on the offered side, primary first.
    pub fn offered_item_ids(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.offered_item_id.as_str())
            .chain(self.additional_offered_item_ids.iter().map(String::as_str))
    }

    /// Every item id on the wanted side, primary first.
    pub fn wanted_item_ids(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.wanted_item_id.as_str())
            .chain(self.additional_wanted_item_ids.iter().map(String::as_str))
    }

    pub fn confirmed_by(&self, party: Party) -> bool {
        match party {
            Party::Sender => self.sender_confirmed_completion,
            Party::Receiver => self.receiver_confirmed_completion,
        }
    }

    pub fn set_confirmed(&mut self, party: Party) {
        match party {
            Party::Sender => self.sender_confirmed_completion = true,
            Party::Receiver => self.receiver_confirmed_completion = true,
        }
    }
}
