//! End-to-end negotiation scenarios against a real sled database

use std::sync::Arc;
use std::time::Duration;

use tempfile::tempdir; // Use for test db cleanup.
use trade_offers::{
    directory::{InMemoryItemDirectory, InMemoryProfileDirectory, Item, Profile},
    error::{CompletionResult, OfferError},
    feed::{ChangeFeed, FeedEvent},
    notify::RecordingNotifier,
    offer::OfferStatus,
    ratelimit::{RateLimitConfig, RateLimiter},
    service::{NegotiationService, Session},
    store::{OfferStore, SledOfferStore},
};

struct Harness {
    // keeps the sled files alive for the duration of the test
    _dir: tempfile::TempDir,
    store: Arc<SledOfferStore>,
    items: Arc<InMemoryItemDirectory>,
    profiles: Arc<InMemoryProfileDirectory>,
    notifier: Arc<RecordingNotifier>,
    service: NegotiationService,
}

// Sled uses file-based locking to prevent concurrent access, so every test
// gets its own database under a tempdir for simplified cleanup.
fn setup() -> anyhow::Result<Harness> {
    let dir = tempdir()?;
    let db = sled::open(dir.path().join("scenarios.db"))?;
    let store = Arc::new(SledOfferStore::open(&db)?);

    let items = Arc::new(InMemoryItemDirectory::new());
    let profiles = Arc::new(InMemoryProfileDirectory::new());
    let notifier = Arc::new(RecordingNotifier::new());
    let limiter = Arc::new(RateLimiter::new(RateLimitConfig::default()));

    let service = NegotiationService::new(
        Arc::clone(&store) as Arc<dyn OfferStore>,
        Arc::clone(&items) as _,
        Arc::clone(&profiles) as _,
        Arc::clone(&notifier) as _,
        limiter,
    );

    Ok(Harness {
        _dir: dir,
        store,
        items,
        profiles,
        notifier,
        service,
    })
}

impl Harness {
    fn add_user(&self, user_id: &str) {
        self.profiles.insert(Profile {
            user_id: user_id.to_string(),
            display_name: user_id.to_string(),
            blocked_user_ids: vec![],
        });
    }

    fn add_item(&self, item_id: &str, owner_id: &str, name: &str) {
        self.items.insert(Item {
            item_id: item_id.to_string(),
            owner_id: owner_id.to_string(),
            name: name.to_string(),
        });
    }
}

fn ids(raw: &[&str]) -> Vec<String> {
    raw.iter().map(|s| s.to_string()).collect()
}

#[test]
fn full_negotiation_lifecycle() -> anyhow::Result<()> {
    let h = setup()?;
    h.add_user("user_a");
    h.add_user("user_b");
    h.add_item("item_1", "user_a", "camera");
    h.add_item("item_2", "user_b", "bike");

    // A proposes: my camera for your bike
    let offer = h
        .service
        .create_offer(&Session::authenticated("user_a"), &ids(&["item_1"]), &ids(&["item_2"]))?;
    assert_eq!(offer.status, OfferStatus::Pending);
    assert_eq!(offer.sender_id, "user_a");
    assert_eq!(offer.receiver_id, "user_b");

    // the implicit interest marker toward the wanted item landed
    assert!(h.store.has_interest("user_a", "item_2")?);

    // the offer shows up in B's incoming view until B responds
    let incoming = h.service.incoming_offers("user_b")?;
    assert_eq!(incoming.len(), 1);

    let accepted = h.service.respond_to_offer(&offer.offer_id, "user_b", true)?;
    assert!(accepted);
    assert!(h.service.incoming_offers("user_b")?.is_empty());

    // two-phase completion: first confirmation waits on the partner
    let first = h.service.confirm_completion(&offer.offer_id, "user_a")?;
    assert_eq!(first, CompletionResult::Confirmed);

    let midway = h.service.get_completion_status(&offer.offer_id)?;
    assert_eq!(midway.status, OfferStatus::Accepted);
    assert!(midway.sender_confirmed);
    assert!(!midway.receiver_confirmed);
    assert!(midway.completed_at.is_none());

    let second = h.service.confirm_completion(&offer.offer_id, "user_b")?;
    assert_eq!(second, CompletionResult::TradeCompleted);

    let done = h.service.get_completion_status(&offer.offer_id)?;
    assert_eq!(done.status, OfferStatus::Completed);
    assert!(done.sender_confirmed && done.receiver_confirmed);
    assert!(done.completed_at.is_some());

    // both parties were notified along the way
    let notified: Vec<String> = h.notifier.sent().into_iter().map(|(to, _, _)| to).collect();
    assert!(notified.contains(&"user_b".to_string()));
    assert!(notified.contains(&"user_a".to_string()));

    Ok(())
}

#[test]
fn counter_offer_swaps_roles() -> anyhow::Result<()> {
    let h = setup()?;
    h.add_user("user_a");
    h.add_user("user_b");
    h.add_item("item_1", "user_a", "camera");
    h.add_item("item_2", "user_b", "bike");
    h.add_item("item_3", "user_a", "keyboard");

    let original = h
        .service
        .create_offer(&Session::authenticated("user_a"), &ids(&["item_1"]), &ids(&["item_2"]))?;

    // B counters: offers back the bike A asked for, wants the keyboard instead
    let replacement = h
        .service
        .create_counter_offer(&original.offer_id, "user_b", "item_3")?;

    let countered = h
        .store
        .find_by_id(&original.offer_id)?
        .expect("original offer must still exist");
    assert_eq!(countered.status, OfferStatus::Countered);

    assert_eq!(replacement.sender_id, "user_b");
    assert_eq!(replacement.receiver_id, "user_a");
    assert_eq!(replacement.offered_item_id, "item_2");
    assert_eq!(replacement.wanted_item_id, "item_3");
    assert_eq!(replacement.status, OfferStatus::Pending);

    // the countered original can no longer be accepted
    let stale = h.service.respond_to_offer(&original.offer_id, "user_b", true);
    assert!(matches!(stale, Err(OfferError::OfferNotActionable(OfferStatus::Countered))));

    Ok(())
}

#[test]
fn rejection_is_terminal() -> anyhow::Result<()> {
    let h = setup()?;
    h.add_user("user_a");
    h.add_user("user_b");
    h.add_item("item_1", "user_a", "camera");
    h.add_item("item_2", "user_b", "bike");

    let offer = h
        .service
        .create_offer(&Session::authenticated("user_a"), &ids(&["item_1"]), &ids(&["item_2"]))?;

    let accepted = h.service.respond_to_offer(&offer.offer_id, "user_b", false)?;
    assert!(!accepted);

    let status = h.service.get_completion_status(&offer.offer_id)?;
    assert_eq!(status.status, OfferStatus::Rejected);

    // no second response, no completion on a rejected trade
    let again = h.service.respond_to_offer(&offer.offer_id, "user_b", true);
    assert!(matches!(again, Err(OfferError::OfferNotActionable(_))));

    let confirm = h.service.confirm_completion(&offer.offer_id, "user_a");
    assert!(matches!(confirm, Err(OfferError::TradeNotAccepted(OfferStatus::Rejected))));

    Ok(())
}

#[test]
fn either_party_can_cancel_a_committed_offer() -> anyhow::Result<()> {
    let h = setup()?;
    h.add_user("user_a");
    h.add_user("user_b");
    h.add_item("item_1", "user_a", "camera");
    h.add_item("item_2", "user_b", "bike");

    let offer = h
        .service
        .create_offer(&Session::authenticated("user_a"), &ids(&["item_1"]), &ids(&["item_2"]))?;
    h.service.respond_to_offer(&offer.offer_id, "user_b", true)?;

    let cancelled = h.service.cancel_offer(&offer.offer_id, "user_a")?;
    assert_eq!(cancelled.status, OfferStatus::Cancelled);

    // cancellation frees the items for a new offer
    let retry = h
        .service
        .create_offer(&Session::authenticated("user_a"), &ids(&["item_1"]), &ids(&["item_2"]))?;
    assert_eq!(retry.status, OfferStatus::Pending);

    Ok(())
}

#[test]
fn concurrent_confirmations_complete_exactly_once() -> anyhow::Result<()> {
    let h = setup()?;
    h.add_user("user_a");
    h.add_user("user_b");
    h.add_item("item_1", "user_a", "camera");
    h.add_item("item_2", "user_b", "bike");

    let offer = h
        .service
        .create_offer(&Session::authenticated("user_a"), &ids(&["item_1"]), &ids(&["item_2"]))?;
    h.service.respond_to_offer(&offer.offer_id, "user_b", true)?;

    let service = Arc::new(h.service);
    let offer_id = offer.offer_id.clone();

    let mut handles = vec![];
    for user in ["user_a", "user_b"] {
        let service = Arc::clone(&service);
        let offer_id = offer_id.clone();
        handles.push(std::thread::spawn(move || {
            service.confirm_completion(&offer_id, user)
        }));
    }

    let mut outcomes = vec![];
    for handle in handles {
        outcomes.push(handle.join().expect("confirmation thread panicked")?);
    }

    // both confirmations land; at least one of them observes the completion
    let completed_observations = outcomes
        .iter()
        .filter(|o| **o == CompletionResult::TradeCompleted)
        .count();
    assert!(completed_observations >= 1);
    assert!(outcomes
        .iter()
        .all(|o| matches!(o, CompletionResult::Confirmed | CompletionResult::TradeCompleted)));

    let final_state = h
        .store
        .find_by_id(&offer_id)?
        .expect("offer must still exist");
    assert_eq!(final_state.status, OfferStatus::Completed);
    assert!(final_state.sender_confirmed_completion);
    assert!(final_state.receiver_confirmed_completion);
    assert!(final_state.completed_at.is_some());

    Ok(())
}

#[test]
fn change_feed_notifies_participants_only() -> anyhow::Result<()> {
    let h = setup()?;
    h.add_user("user_a");
    h.add_user("user_b");
    h.add_user("user_c");
    h.add_item("item_1", "user_a", "camera");
    h.add_item("item_2", "user_b", "bike");

    let feed = ChangeFeed::new(Arc::clone(&h.store));
    let receiver_sub = feed.subscribe("user_b");
    let bystander_sub = feed.subscribe("user_c");
    // give the watcher threads a moment to establish before the first write
    std::thread::sleep(Duration::from_millis(300));

    let offer = h
        .service
        .create_offer(&Session::authenticated("user_a"), &ids(&["item_1"]), &ids(&["item_2"]))?;

    match receiver_sub.recv_timeout(Duration::from_secs(5)) {
        Ok(FeedEvent::Upserted(seen)) => {
            assert_eq!(seen.offer_id, offer.offer_id);
            assert_eq!(seen.status, OfferStatus::Pending);
        }
        other => panic!("expected an upsert for the receiver, got {other:?}"),
    }

    h.service.respond_to_offer(&offer.offer_id, "user_b", true)?;
    match receiver_sub.recv_timeout(Duration::from_secs(5)) {
        Ok(FeedEvent::Upserted(seen)) => assert_eq!(seen.status, OfferStatus::Accepted),
        other => panic!("expected the acceptance to fan out, got {other:?}"),
    }

    // a user outside the trade sees nothing
    assert!(bystander_sub.recv_timeout(Duration::from_millis(300)).is_err());

    receiver_sub.stop();
    bystander_sub.stop();
    Ok(())
}
