//! End-to-end walkthrough of a negotiation: proposal, counter offer,
//! acceptance and two-phase completion, with a live change feed attached.
//!
//! Run with `cargo run --example negotiation`.

use std::sync::Arc;
use std::time::Duration;

use trade_offers::{
    directory::{InMemoryItemDirectory, InMemoryProfileDirectory, Item, Profile},
    feed::{ChangeFeed, FeedEvent},
    hydrate::Hydrator,
    notify::LogNotifier,
    ratelimit::RateLimiter,
    service::{NegotiationService, Session},
    store::{OfferStore, SledOfferStore},
};

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let dir = tempfile::tempdir()?;
    let db = sled::open(dir.path().join("negotiation-demo.db"))?;
    let store = Arc::new(SledOfferStore::open(&db)?);

    let items = Arc::new(InMemoryItemDirectory::new());
    let profiles = Arc::new(InMemoryProfileDirectory::new());
    for (user, name) in [("user_alice", "Alice"), ("user_bert", "Bert")] {
        profiles.insert(Profile {
            user_id: user.to_string(),
            display_name: name.to_string(),
            blocked_user_ids: vec![],
        });
    }
    for (item, owner, name) in [
        ("item_camera", "user_alice", "film camera"),
        ("item_bike", "user_bert", "road bike"),
        ("item_synth", "user_alice", "synthesizer"),
    ] {
        items.insert(Item {
            item_id: item.to_string(),
            owner_id: owner.to_string(),
            name: name.to_string(),
        });
    }

    let service = NegotiationService::new(
        Arc::clone(&store) as Arc<dyn OfferStore>,
        Arc::clone(&items) as _,
        Arc::clone(&profiles) as _,
        Arc::new(LogNotifier),
        Arc::new(RateLimiter::default()),
    );

    // Bert watches his side of the offer table while the trade plays out
    let feed = ChangeFeed::new(Arc::clone(&store));
    let subscription = feed.subscribe("user_bert");
    std::thread::sleep(Duration::from_millis(200));

    // Alice proposes: her camera for Bert's bike
    let offer = service.create_offer(
        &Session::authenticated("user_alice"),
        &["item_camera".to_string()],
        &["item_bike".to_string()],
    )?;
    println!("proposed {} ({})", offer.offer_id, offer.status);

    // Bert would rather have the synthesizer, so he counters
    let counter = service.create_counter_offer(&offer.offer_id, "user_bert", "item_synth")?;
    println!(
        "countered: {} now offers {} for {}",
        counter.sender_id, counter.offered_item_id, counter.wanted_item_id
    );

    // Alice is the receiver of the counter offer and accepts it
    service.respond_to_offer(&counter.offer_id, "user_alice", true)?;

    // both parties confirm the exchange happened
    let first = service.confirm_completion(&counter.offer_id, "user_bert")?;
    println!("bert confirms: {first:?}");
    let second = service.confirm_completion(&counter.offer_id, "user_alice")?;
    println!("alice confirms: {second:?}");

    let status = service.get_completion_status(&counter.offer_id)?;
    println!("final status: {} (completed_at set: {})", status.status, status.completed_at.is_some());

    // render Bert's view of the finished trade through the hydration layer
    let hydrator = Hydrator::new(Arc::clone(&items) as _, Arc::clone(&profiles) as _);
    let trades = store.find_by_participant("user_bert", &[])?;
    let mut hydrated = hydrator.hydrate_offers(trades)?;
    hydrator.hydrate_profiles(&mut hydrated)?;
    for view in &hydrated {
        let partner = view
            .sender_profile
            .as_ref()
            .map(|p| p.display_name.as_str())
            .unwrap_or("?");
        println!(
            "trade {} from {partner}: {} item(s) involved",
            view.offer.offer_id,
            view.items.len()
        );
    }

    // drain whatever the change feed delivered while we worked
    while let Ok(event) = subscription.recv_timeout(Duration::from_millis(300)) {
        match event {
            FeedEvent::Upserted(o) => println!("feed: {} -> {}", o.offer_id, o.status),
            FeedEvent::Removed(id) => println!("feed: {id} removed"),
        }
    }
    subscription.stop();

    Ok(())
}
