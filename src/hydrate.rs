//! Batch resolution of item and profile references on offers
//!
//! Consumers render lists of offers, not single records. Hydration collects
//! the union of every referenced id across a whole list and resolves it in
//! one directory call per kind, instead of a per-offer fan-out. The result
//! is attached as derived data; nothing here is persisted or authoritative.

use crate::directory::{Item, ItemDirectory, Profile, ProfileDirectory};
use crate::error::DirectoryError;
use crate::offer::Offer;
use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::sync::{Arc, Mutex};

/// An offer together with its resolved item and profile references.
#[derive(Debug, Clone)]
pub struct HydratedOffer {
    pub offer: Offer,
    /// id → item for every resolved reference; unknown ids are absent.
    pub items: BTreeMap<String, Item>,
    pub sender_profile: Option<Profile>,
    pub receiver_profile: Option<Profile>,
}

impl HydratedOffer {
    fn bare(offer: Offer) -> Self {
        Self {
            offer,
            items: BTreeMap::new(),
            sender_profile: None,
            receiver_profile: None,
        }
    }
}

/// Bounded profile cache with insertion-order eviction. Explicitly owned by
/// one hydrator instance; never shared process-wide.
pub struct ProfileCache {
    capacity: usize,
    profiles: HashMap<String, Profile>,
    order: VecDeque<String>,
}

impl ProfileCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            profiles: HashMap::new(),
            order: VecDeque::new(),
        }
    }

    pub fn get(&self, user_id: &str) -> Option<&Profile> {
        self.profiles.get(user_id)
    }

    pub fn insert(&mut self, profile: Profile) {
        if self.profiles.contains_key(&profile.user_id) {
            self.profiles.insert(profile.user_id.clone(), profile);
            return;
        }
        while self.profiles.len() >= self.capacity {
            match self.order.pop_front() {
                Some(evicted) => {
                    self.profiles.remove(&evicted);
                }
                None => break,
            }
        }
        self.order.push_back(profile.user_id.clone());
        self.profiles.insert(profile.user_id.clone(), profile);
    }

    /// Drop a cached profile, typically because a change-feed event touched
    /// the user. The next hydration re-fetches it.
    pub fn invalidate(&mut self, user_id: &str) {
        self.profiles.remove(user_id);
        self.order.retain(|id| id != user_id);
    }

    pub fn len(&self) -> usize {
        self.profiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.profiles.is_empty()
    }
}

/// Resolves the item and profile references a list of offers carries.
pub struct Hydrator {
    items: Arc<dyn ItemDirectory>,
    profiles: Arc<dyn ProfileDirectory>,
    related: Mutex<ProfileCache>,
}

impl Hydrator {
    pub fn new(items: Arc<dyn ItemDirectory>, profiles: Arc<dyn ProfileDirectory>) -> Self {
        Self::with_cache_capacity(items, profiles, 256)
    }

    pub fn with_cache_capacity(
        items: Arc<dyn ItemDirectory>,
        profiles: Arc<dyn ProfileDirectory>,
        capacity: usize,
    ) -> Self {
        Self {
            items,
            profiles,
            related: Mutex::new(ProfileCache::new(capacity)),
        }
    }

    /// Resolve every item referenced by `offers` in a single batch fetch and
    /// attach the results. Idempotent and order-independent; offers keep
    /// their input order.
    pub fn hydrate_offers(&self, offers: Vec<Offer>) -> Result<Vec<HydratedOffer>, DirectoryError> {
        let wanted_ids: BTreeSet<String> = offers
            .iter()
            .flat_map(|offer| {
                offer
                    .offered_item_ids()
                    .chain(offer.wanted_item_ids())
                    .map(str::to_string)
                    .collect::<Vec<_>>()
            })
            .collect();

        let id_list: Vec<String> = wanted_ids.into_iter().collect();
        let fetched = self.items.fetch_items_by_ids(&id_list)?;
        let by_id: HashMap<String, Item> = fetched
            .into_iter()
            .map(|item| (item.item_id.clone(), item))
            .collect();

        Ok(offers
            .into_iter()
            .map(|offer| {
                let mut hydrated = HydratedOffer::bare(offer);
                for id in hydrated
                    .offer
                    .offered_item_ids()
                    .chain(hydrated.offer.wanted_item_ids())
                {
                    if let Some(item) = by_id.get(id) {
                        hydrated.items.insert(id.to_string(), item.clone());
                    }
                }
                hydrated
            })
            .collect())
    }

    /// Resolve both parties' profiles for every offer in one lookup, going
    /// through the bounded related-profiles cache.
    pub fn hydrate_profiles(&self, hydrated: &mut [HydratedOffer]) -> Result<(), DirectoryError> {
        let mut cache = self.related.lock().expect("profile cache lock poisoned");

        let missing: BTreeSet<String> = hydrated
            .iter()
            .flat_map(|h| [h.offer.sender_id.clone(), h.offer.receiver_id.clone()])
            .filter(|id| cache.get(id).is_none())
            .collect();

        if !missing.is_empty() {
            let id_list: Vec<String> = missing.into_iter().collect();
            for profile in self.profiles.fetch_profiles_by_ids(&id_list)? {
                cache.insert(profile);
            }
        }

        for h in hydrated.iter_mut() {
            h.sender_profile = cache.get(&h.offer.sender_id).cloned();
            h.receiver_profile = cache.get(&h.offer.receiver_id).cloned();
        }
        Ok(())
    }

    /// Forget a cached related profile; used by change-feed consumers.
    pub fn invalidate_profile(&self, user_id: &str) {
        let mut cache = self.related.lock().expect("profile cache lock poisoned");
        cache.invalidate(user_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cache_evicts_in_insertion_order() {
        let mut cache = ProfileCache::new(2);
        for id in ["u1", "u2", "u3"] {
            cache.insert(Profile {
                user_id: id.to_string(),
                display_name: id.to_string(),
                blocked_user_ids: vec![],
            });
        }

        assert_eq!(cache.len(), 2);
        assert!(cache.get("u1").is_none());
        assert!(cache.get("u2").is_some());
        assert!(cache.get("u3").is_some());
    }

    #[test]
    fn invalidate_removes_entry() {
        let mut cache = ProfileCache::new(4);
        cache.insert(Profile {
            user_id: "u1".to_string(),
            display_name: "one".to_string(),
            blocked_user_ids: vec![],
        });

        cache.invalidate("u1");
        assert!(cache.is_empty());
    }
}
