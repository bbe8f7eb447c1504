//! Per-user sliding-window rate limiting
use chrono::{DateTime, TimeDelta, Utc};
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

/// Action categories the limiter throttles independently.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RateAction {
    CreateOffer,
    SendMessage,
    LikeItem,
}

impl RateAction {
    fn label(&self) -> &'static str {
        match self {
            RateAction::CreateOffer => "offer",
            RateAction::SendMessage => "message",
            RateAction::LikeItem => "like",
        }
    }
}

/// Thresholds per action category over one shared window length.
/// Exact numbers are deployment configuration; these defaults suit a small
/// community instance.
#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    pub window: TimeDelta,
    pub create_offer_max: usize,
    pub send_message_max: usize,
    pub like_item_max: usize,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            window: TimeDelta::seconds(60),
            create_offer_max: 5,
            send_message_max: 20,
            like_item_max: 30,
        }
    }
}

impl RateLimitConfig {
    fn max_for(&self, action: RateAction) -> usize {
        match action {
            RateAction::CreateOffer => self.create_offer_max,
            RateAction::SendMessage => self.send_message_max,
            RateAction::LikeItem => self.like_item_max,
        }
    }
}

/// Verdict for a single action attempt. When the action is denied, `message`
/// carries a human-readable hint callers surface as-is.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateDecision {
    pub allowed: bool,
    pub message: Option<String>,
}

impl RateDecision {
    fn allow() -> Self {
        Self {
            allowed: true,
            message: None,
        }
    }

    fn deny(message: String) -> Self {
        Self {
            allowed: false,
            message: Some(message),
        }
    }
}

/// Sliding-window counter per (user, action category).
///
/// `can_perform` only inspects the window; callers record a slot with
/// `record` once the action actually went through, so denied or failed
/// attempts do not consume budget.
pub struct RateLimiter {
    config: RateLimitConfig,
    windows: Mutex<HashMap<(String, RateAction), VecDeque<DateTime<Utc>>>>,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            windows: Mutex::new(HashMap::new()),
        }
    }

    pub fn can_perform(&self, user_id: &str, action: RateAction) -> RateDecision {
        self.can_perform_at(user_id, action, Utc::now())
    }

    /// Deterministic-clock variant of [`can_perform`](Self::can_perform).
    pub fn can_perform_at(
        &self,
        user_id: &str,
        action: RateAction,
        now: DateTime<Utc>,
    ) -> RateDecision {
        let mut windows = self.windows.lock().expect("rate limiter lock poisoned");
        let slots = windows
            .entry((user_id.to_string(), action))
            .or_insert_with(VecDeque::new);
        Self::prune(slots, now, self.config.window);

        let max = self.config.max_for(action);
        if slots.len() < max {
            return RateDecision::allow();
        }

        // the oldest slot in the window decides when capacity frees up
        let retry_in = slots
            .front()
            .map(|oldest| (*oldest + self.config.window - now).num_seconds().max(0))
            .unwrap_or(0);
        RateDecision::deny(format!(
            "too many {} actions, try again in {}s",
            action.label(),
            retry_in
        ))
    }

    pub fn record(&self, user_id: &str, action: RateAction) {
        self.record_at(user_id, action, Utc::now());
    }

    /// Deterministic-clock variant of [`record`](Self::record).
    pub fn record_at(&self, user_id: &str, action: RateAction, now: DateTime<Utc>) {
        let mut windows = self.windows.lock().expect("rate limiter lock poisoned");
        let slots = windows
            .entry((user_id.to_string(), action))
            .or_insert_with(VecDeque::new);
        Self::prune(slots, now, self.config.window);
        slots.push_back(now);
    }

    fn prune(slots: &mut VecDeque<DateTime<Utc>>, now: DateTime<Utc>, window: TimeDelta) {
        while let Some(oldest) = slots.front() {
            if now - *oldest >= window {
                slots.pop_front();
            } else {
                break;
            }
        }
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(RateLimitConfig::default())
    }
}
