//! Item availability checks against committed offers
use crate::error::StoreError;
use crate::offer::OfferStatus;
use crate::store::{ItemRole, OfferStore};
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::warn;

/// Aggregated availability verdict for a proposed exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AvailabilityReport {
    /// True when no offered or wanted item is committed elsewhere.
    pub all_available: bool,
    pub busy_offered: Vec<String>,
    pub busy_wanted: Vec<String>,
    /// A committed offer from this user with the same primary pair exists.
    pub duplicate_exists: bool,
}

impl AvailabilityReport {
    fn clear() -> Self {
        Self {
            all_available: true,
            busy_offered: vec![],
            busy_wanted: vec![],
            duplicate_exists: false,
        }
    }
}

/// Determines whether items referenced by a proposed or counter offer are
/// already committed elsewhere.
///
/// Known coverage gap: for the cross-user "wanted item already promised"
/// case only the *primary* offered slot of other offers is consulted.
/// Additional-item bundles on other users' offers would need a set-overlap
/// query and are not checked.
pub struct AvailabilityChecker {
    store: Arc<dyn OfferStore>,
}

impl AvailabilityChecker {
    pub fn new(store: Arc<dyn OfferStore>) -> Self {
        Self { store }
    }

    /// Check a full proposed exchange.
    ///
    /// Fails open: when the underlying store cannot be read the report claims
    /// everything is available and the error is logged. Blocking legitimate
    /// trades on infrastructure trouble is considered worse than the narrow
    /// double-commit window this opens.
    pub fn check(
        &self,
        offered_ids: &[String],
        wanted_ids: &[String],
        acting_user_id: &str,
    ) -> AvailabilityReport {
        match self.try_check(offered_ids, wanted_ids, acting_user_id) {
            Ok(report) => report,
            Err(e) => {
                warn!(user_id = acting_user_id, error = %e, "availability check failed, failing open");
                AvailabilityReport::clear()
            }
        }
    }

    fn try_check(
        &self,
        offered_ids: &[String],
        wanted_ids: &[String],
        acting_user_id: &str,
    ) -> Result<AvailabilityReport, StoreError> {
        // every committed offer this user is the sender of
        let own_committed: Vec<_> = self
            .store
            .find_by_participant(acting_user_id, &OfferStatus::COMMITTED)?
            .into_iter()
            .filter(|offer| offer.sender_id == acting_user_id)
            .collect();

        // an offered id is busy when one of those offers already carries it
        // on the offered side, primary or additional
        let mut busy_offered = BTreeSet::new();
        for id in offered_ids {
            if own_committed
                .iter()
                .any(|offer| offer.offered_item_ids().any(|offered| offered == id))
            {
                busy_offered.insert(id.clone());
            }
        }

        // duplicate: same primary pair already committed by this user
        let duplicate_exists = match (offered_ids.first(), wanted_ids.first()) {
            (Some(primary_offered), Some(primary_wanted)) => own_committed.iter().any(|offer| {
                offer.offered_item_id == *primary_offered && offer.wanted_item_id == *primary_wanted
            }),
            _ => false,
        };

        // a wanted id is busy when anyone's committed offer already promises
        // it as the primary offered item
        let mut busy_wanted = BTreeSet::new();
        for id in wanted_ids {
            let promised = self.store.find_by_item_role(
                id,
                ItemRole::PrimaryOffered,
                &OfferStatus::COMMITTED,
            )?;
            if !promised.is_empty() {
                busy_wanted.insert(id.clone());
            }
        }

        let all_available = busy_offered.is_empty() && busy_wanted.is_empty();
        Ok(AvailabilityReport {
            all_available,
            busy_offered: busy_offered.into_iter().collect(),
            busy_wanted: busy_wanted.into_iter().collect(),
            duplicate_exists,
        })
    }

    /// Whether any committed offer references the item on its offered side.
    /// Fails open to "not busy" on store errors, like `check`.
    pub fn is_item_busy(&self, item_id: &str) -> bool {
        match self
            .store
            .find_by_item_role(item_id, ItemRole::Offered, &OfferStatus::COMMITTED)
        {
            Ok(offers) => !offers.is_empty(),
            Err(e) => {
                warn!(item_id, error = %e, "busy check failed, failing open");
                false
            }
        }
    }
}
