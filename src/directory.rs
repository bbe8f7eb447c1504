//! External item and profile directories
//!
//! The engine never owns items or user profiles; it resolves them through
//! these narrow interfaces. The in-memory implementations below back the
//! demo binary and the test suites, and double as a reference for embedders
//! wiring in a real catalog.

use crate::error::DirectoryError;
use std::collections::HashMap;
use std::sync::RwLock;

/// A tradeable item, referenced by id from offers.
///
/// Busy/available state is never stored on the item; it is derived from the
/// committed offers that reference it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Item {
    pub item_id: String,
    pub owner_id: String,
    pub name: String,
}

/// A lightweight profile summary for one of the trading parties.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Profile {
    pub user_id: String,
    pub display_name: String,
    pub blocked_user_ids: Vec<String>,
}

pub trait ItemDirectory: Send + Sync {
    fn fetch_item(&self, item_id: &str) -> Result<Option<Item>, DirectoryError>;
    /// Batch-resolve a set of item ids. Unknown ids are simply absent from
    /// the result; they are not an error.
    fn fetch_items_by_ids(&self, item_ids: &[String]) -> Result<Vec<Item>, DirectoryError>;
}

pub trait ProfileDirectory: Send + Sync {
    fn fetch_profiles_by_ids(&self, user_ids: &[String]) -> Result<Vec<Profile>, DirectoryError>;
    /// Whether `blocker` has `blocked` on their block list. Callers that need
    /// the symmetric answer ask both directions.
    fn is_blocked(&self, blocker_id: &str, blocked_id: &str) -> Result<bool, DirectoryError>;
}

#[derive(Default)]
pub struct InMemoryItemDirectory {
    items: RwLock<HashMap<String, Item>>,
}

impl InMemoryItemDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, item: Item) {
        let mut items = self.items.write().expect("item directory lock poisoned");
        items.insert(item.item_id.clone(), item);
    }
}

impl ItemDirectory for InMemoryItemDirectory {
    fn fetch_item(&self, item_id: &str) -> Result<Option<Item>, DirectoryError> {
        let items = self.items.read().expect("item directory lock poisoned");
        Ok(items.get(item_id).cloned())
    }

    fn fetch_items_by_ids(&self, item_ids: &[String]) -> Result<Vec<Item>, DirectoryError> {
        let items = self.items.read().expect("item directory lock poisoned");
        Ok(item_ids
            .iter()
            .filter_map(|id| items.get(id).cloned())
            .collect())
    }
}

#[derive(Default)]
pub struct InMemoryProfileDirectory {
    profiles: RwLock<HashMap<String, Profile>>,
}

impl InMemoryProfileDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, profile: Profile) {
        let mut profiles = self.profiles.write().expect("profile directory lock poisoned");
        profiles.insert(profile.user_id.clone(), profile);
    }

    /// Add `blocked_id` to `blocker_id`'s block list, creating a bare profile
    /// for the blocker if none exists yet.
    pub fn block(&self, blocker_id: &str, blocked_id: &str) {
        let mut profiles = self.profiles.write().expect("profile directory lock poisoned");
        let profile = profiles
            .entry(blocker_id.to_string())
            .or_insert_with(|| Profile {
                user_id: blocker_id.to_string(),
                display_name: blocker_id.to_string(),
                blocked_user_ids: vec![],
            });
        if !profile.blocked_user_ids.iter().any(|id| id == blocked_id) {
            profile.blocked_user_ids.push(blocked_id.to_string());
        }
    }
}

impl ProfileDirectory for InMemoryProfileDirectory {
    fn fetch_profiles_by_ids(&self, user_ids: &[String]) -> Result<Vec<Profile>, DirectoryError> {
        let profiles = self.profiles.read().expect("profile directory lock poisoned");
        Ok(user_ids
            .iter()
            .filter_map(|id| profiles.get(id).cloned())
            .collect())
    }

    fn is_blocked(&self, blocker_id: &str, blocked_id: &str) -> Result<bool, DirectoryError> {
        let profiles = self.profiles.read().expect("profile directory lock poisoned");
        Ok(profiles
            .get(blocker_id)
            .map(|profile| profile.blocked_user_ids.iter().any(|id| id == blocked_id))
            .unwrap_or(false))
    }
}
