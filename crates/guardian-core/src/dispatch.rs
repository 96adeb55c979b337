//! Emergency notification delivery with retry.
//!
//! [`NotificationDispatcher::dispatch`] returns immediately. Delivery runs in
//! a retry chain on the tokio runtime: one attempt, and on failure one retry
//! after a fixed backoff, repeated until success, cancellation or the
//! optional attempt limit. Each retry rebuilds the message from the freshest
//! location fix available at that moment.
//!
//! At most one chain exists per contact. Dispatching again for a contact with
//! a pending chain aborts the old chain and replaces it.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::location::{LocationFix, LocationProvider};
use crate::types::EmergencyContact;

/// Placeholder used when no location fix is available.
pub const LOCATION_UNAVAILABLE: &str = "Location unavailable";

const ATTEMPT_HISTORY: usize = 32;

/// Why a single delivery attempt failed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DeliveryError {
    /// The relay could not be reached.
    #[error("network error: {0}")]
    Network(String),

    /// The relay answered with a non-success status.
    #[error("relay rejected the message with status {status}")]
    Rejected {
        /// HTTP status code.
        status: u16,
    },

    /// The attempt did not finish in time.
    #[error("delivery timed out after {secs} seconds")]
    Timeout {
        /// Attempt timeout in seconds.
        secs: u64,
    },

    /// The channel is not able to send at all.
    #[error("delivery channel unavailable: {0}")]
    Unavailable(String),
}

/// Body sent to the messaging relay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct OutboundMessage {
    /// Normalized contact identifier.
    #[schema(example = "+4915112345678")]
    pub recipient: String,
    /// Message text.
    pub message: String,
}

/// Outbound transport for emergency messages.
#[async_trait]
pub trait DeliveryChannel: Send + Sync {
    /// Send one message. Must not retry internally.
    async fn deliver(&self, message: &OutboundMessage) -> Result<(), DeliveryError>;
}

/// Channel that logs messages instead of sending them.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogChannel;

#[async_trait]
impl DeliveryChannel for LogChannel {
    async fn deliver(&self, message: &OutboundMessage) -> Result<(), DeliveryError> {
        warn!(
            recipient = %message.recipient,
            message = %message.message,
            "No messaging relay configured; emergency message logged only"
        );
        Ok(())
    }
}

/// Retry schedule for a notification chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Wait between a failed attempt and the next one.
    pub backoff: Duration,
    /// Upper bound for a single attempt.
    pub attempt_timeout: Duration,
    /// Total attempts per chain. `None` retries until cancelled.
    pub max_attempts: Option<u32>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            backoff: Duration::from_secs(60),
            attempt_timeout: Duration::from_secs(15),
            max_attempts: None,
        }
    }
}

impl RetryPolicy {
    /// Whether attempt number `attempt` (1-based) may run.
    #[must_use]
    pub fn allows_attempt(&self, attempt: u32) -> bool {
        self.max_attempts.map_or(true, |max| attempt <= max)
    }
}

/// Build the emergency message text.
#[must_use]
pub fn compose_message(location: Option<&LocationFix>, now: DateTime<Utc>) -> String {
    let place = location.map_or_else(
        || LOCATION_UNAVAILABLE.to_string(),
        |fix| {
            format!(
                "Last known location: {} (captured {} ago)",
                fix.map_link(),
                format_age(fix.age(now))
            )
        },
    );
    format!("EMERGENCY: separation alarm raised. The wearer may need help. {place}")
}

fn format_age(age: Duration) -> String {
    let secs = age.as_secs();
    match secs {
        0..=59 => format!("{secs}s"),
        60..=3599 => format!("{}m {}s", secs / 60, secs % 60),
        _ => format!("{}h {}m", secs / 3600, (secs % 3600) / 60),
    }
}

/// Result of a single attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(tag = "outcome", content = "reason", rename_all = "snake_case")]
pub enum DeliveryOutcome {
    /// The relay accepted the message.
    Success,
    /// The attempt failed.
    Failure(String),
}

/// Record of one delivery attempt, published for observers. Not persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct DeliveryAttempt {
    /// Retry chain this attempt belongs to.
    pub chain_id: Uuid,
    /// 1-based attempt number within the chain.
    pub attempt: u32,
    /// Who the message was for.
    pub contact: EmergencyContact,
    /// Message text that was sent.
    pub message: String,
    /// How the attempt ended.
    pub outcome: DeliveryOutcome,
    /// When the attempt started.
    pub attempted_at: DateTime<Utc>,
}

struct PendingChain {
    id: Uuid,
    handle: JoinHandle<()>,
}

struct Shared {
    channel: Arc<dyn DeliveryChannel>,
    location: Arc<dyn LocationProvider>,
    policy: RetryPolicy,
    pending: Mutex<HashMap<EmergencyContact, PendingChain>>,
    attempts: broadcast::Sender<DeliveryAttempt>,
}

impl Shared {
    fn finish(&self, contact: &EmergencyContact, id: Uuid) {
        let mut pending = self.pending.lock();
        if pending.get(contact).is_some_and(|chain| chain.id == id) {
            pending.remove(contact);
        }
    }
}

/// Sends emergency notifications and owns their retry chains.
pub struct NotificationDispatcher {
    shared: Arc<Shared>,
}

impl fmt::Debug for NotificationDispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NotificationDispatcher")
            .field("policy", &self.shared.policy)
            .field("pending", &self.shared.pending.lock().len())
            .finish_non_exhaustive()
    }
}

impl NotificationDispatcher {
    /// Create a dispatcher.
    #[must_use]
    pub fn new(
        channel: Arc<dyn DeliveryChannel>,
        location: Arc<dyn LocationProvider>,
        policy: RetryPolicy,
    ) -> Self {
        let (attempts, _) = broadcast::channel(ATTEMPT_HISTORY);
        Self {
            shared: Arc::new(Shared {
                channel,
                location,
                policy,
                pending: Mutex::new(HashMap::new()),
                attempts,
            }),
        }
    }

    /// Retry policy in effect.
    #[must_use]
    pub fn policy(&self) -> RetryPolicy {
        self.shared.policy
    }

    /// Start a notification chain for `contact`.
    ///
    /// Never blocks and never fails; problems are logged. Must be called from
    /// within a tokio runtime.
    pub fn dispatch(&self, contact: EmergencyContact, location: Option<LocationFix>) {
        let runtime = match tokio::runtime::Handle::try_current() {
            Ok(runtime) => runtime,
            Err(e) => {
                error!(contact = %contact, error = %e, "cannot dispatch notification outside a tokio runtime");
                return;
            }
        };

        let id = Uuid::new_v4();
        let mut pending = self.shared.pending.lock();
        if let Some(previous) = pending.remove(&contact) {
            previous.handle.abort();
            info!(contact = %contact, superseded = %previous.id, chain = %id, "Superseding pending notification");
        }

        let handle = runtime.spawn(run_chain(
            Arc::clone(&self.shared),
            id,
            contact.clone(),
            location,
        ));
        info!(contact = %contact, chain = %id, has_location = location.is_some(), "Dispatching emergency notification");
        pending.insert(contact, PendingChain { id, handle });
    }

    /// Abort every pending chain, including any scheduled retry.
    pub fn cancel(&self) {
        let drained: Vec<_> = self.shared.pending.lock().drain().collect();
        for (contact, chain) in drained {
            chain.handle.abort();
            info!(contact = %contact, chain = %chain.id, "Notification cancelled");
        }
    }

    /// Abort the chain for one contact. Returns `true` if one was pending.
    pub fn cancel_contact(&self, contact: &EmergencyContact) -> bool {
        let removed = self.shared.pending.lock().remove(contact);
        removed.is_some_and(|chain| {
            chain.handle.abort();
            info!(contact = %contact, chain = %chain.id, "Notification cancelled");
            true
        })
    }

    /// Whether any chain is still running.
    #[must_use]
    pub fn has_pending(&self) -> bool {
        !self.shared.pending.lock().is_empty()
    }

    /// Contacts with a running chain.
    #[must_use]
    pub fn pending_contacts(&self) -> Vec<EmergencyContact> {
        self.shared.pending.lock().keys().cloned().collect()
    }

    /// Observe delivery attempts.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<DeliveryAttempt> {
        self.shared.attempts.subscribe()
    }
}

impl Drop for NotificationDispatcher {
    fn drop(&mut self) {
        for (_, chain) in self.shared.pending.lock().drain() {
            chain.handle.abort();
        }
    }
}

async fn run_chain(
    shared: Arc<Shared>,
    id: Uuid,
    contact: EmergencyContact,
    mut location: Option<LocationFix>,
) {
    let policy = shared.policy;
    let mut attempt: u32 = 1;

    loop {
        let attempted_at = Utc::now();
        let message = OutboundMessage {
            recipient: contact.identifier().to_string(),
            message: compose_message(location.as_ref(), attempted_at),
        };

        let result = tokio::time::timeout(policy.attempt_timeout, shared.channel.deliver(&message))
            .await
            .unwrap_or(Err(DeliveryError::Timeout {
                secs: policy.attempt_timeout.as_secs(),
            }));

        let outcome = match &result {
            Ok(()) => DeliveryOutcome::Success,
            Err(e) => DeliveryOutcome::Failure(e.to_string()),
        };
        // No receivers is fine.
        let _ = shared.attempts.send(DeliveryAttempt {
            chain_id: id,
            attempt,
            contact: contact.clone(),
            message: message.message,
            outcome,
            attempted_at,
        });

        match result {
            Ok(()) => {
                info!(contact = %contact, chain = %id, attempt, "Emergency notification delivered");
                break;
            }
            Err(e) if !policy.allows_attempt(attempt.saturating_add(1)) => {
                error!(contact = %contact, chain = %id, attempt, error = %e, "Notification failed; retry limit reached");
                break;
            }
            Err(e) => {
                warn!(
                    contact = %contact,
                    chain = %id,
                    attempt,
                    error = %e,
                    retry_in_secs = policy.backoff.as_secs(),
                    "Notification failed; retry scheduled"
                );
                tokio::time::sleep(policy.backoff).await;
                location = shared.location.latest().or(location);
                attempt = attempt.saturating_add(1);
                debug!(contact = %contact, chain = %id, attempt, has_location = location.is_some(), "Retrying notification");
            }
        }
    }

    shared.finish(&contact, id);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::location::LocationTracker;
    use std::collections::VecDeque;
    use tokio::time::Instant;

    /// Channel that replays scripted results and records every call.
    #[derive(Default)]
    struct ScriptedChannel {
        script: Mutex<VecDeque<Result<(), DeliveryError>>>,
        calls: Mutex<Vec<(OutboundMessage, Instant)>>,
        hang: bool,
    }

    impl ScriptedChannel {
        fn new(script: Vec<Result<(), DeliveryError>>) -> Arc<Self> {
            Arc::new(Self {
                script: Mutex::new(script.into()),
                ..Self::default()
            })
        }

        fn hanging() -> Arc<Self> {
            Arc::new(Self {
                hang: true,
                ..Self::default()
            })
        }

        fn calls(&self) -> Vec<(OutboundMessage, Instant)> {
            self.calls.lock().clone()
        }
    }

    #[async_trait]
    impl DeliveryChannel for ScriptedChannel {
        async fn deliver(&self, message: &OutboundMessage) -> Result<(), DeliveryError> {
            self.calls.lock().push((message.clone(), Instant::now()));
            if self.hang {
                std::future::pending::<()>().await;
            }
            self.script
                .lock()
                .pop_front()
                .unwrap_or(Err(DeliveryError::Network("unreachable".into())))
        }
    }

    fn contact(number: &str) -> EmergencyContact {
        EmergencyContact::parse(number).unwrap()
    }

    fn fix(lat: f64) -> LocationFix {
        LocationFix::new(lat, 13.404_954, Utc::now()).unwrap()
    }

    fn dispatcher(
        channel: Arc<ScriptedChannel>,
        tracker: &LocationTracker,
        policy: RetryPolicy,
    ) -> NotificationDispatcher {
        NotificationDispatcher::new(channel, Arc::new(tracker.clone()), policy)
    }

    async fn settle() {
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
    }

    #[test]
    fn test_compose_message_with_and_without_fix() {
        let now = Utc::now();
        let with_fix = compose_message(
            Some(&LocationFix::new(52.520_008, 13.404_954, now - chrono::Duration::seconds(90)).unwrap()),
            now,
        );
        assert!(with_fix.contains("https://www.google.com/maps?q=52.520008,13.404954"));
        assert!(with_fix.contains("1m 30s"));

        let without = compose_message(None, now);
        assert!(without.contains(LOCATION_UNAVAILABLE));
        assert!(!without.contains("maps"));
    }

    #[test]
    fn test_retry_policy_limits() {
        let unbounded = RetryPolicy::default();
        assert!(unbounded.allows_attempt(1_000));

        let bounded = RetryPolicy {
            max_attempts: Some(3),
            ..RetryPolicy::default()
        };
        assert!(bounded.allows_attempt(3));
        assert!(!bounded.allows_attempt(4));
    }

    #[tokio::test(start_paused = true)]
    async fn test_successful_delivery_finishes_chain() {
        let channel = ScriptedChannel::new(vec![Ok(())]);
        let tracker = LocationTracker::new();
        let dispatcher = dispatcher(channel.clone(), &tracker, RetryPolicy::default());
        let mut attempts = dispatcher.subscribe();

        dispatcher.dispatch(contact("+4915112345678"), Some(fix(52.5)));
        assert!(dispatcher.has_pending());
        settle().await;

        let calls = channel.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].0.recipient, "+4915112345678");
        assert!(calls[0].0.message.contains("maps?q=52.500000"));
        assert!(!dispatcher.has_pending());

        let attempt = attempts.recv().await.unwrap();
        assert_eq!(attempt.attempt, 1);
        assert_eq!(attempt.outcome, DeliveryOutcome::Success);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_delivery_retries_after_backoff_with_fresh_fix() {
        let channel = ScriptedChannel::new(vec![
            Err(DeliveryError::Rejected { status: 503 }),
            Ok(()),
        ]);
        let tracker = LocationTracker::new();
        let dispatcher = dispatcher(channel.clone(), &tracker, RetryPolicy::default());

        let started = Instant::now();
        dispatcher.dispatch(contact("01511234567"), Some(fix(10.0)));
        settle().await;
        assert_eq!(channel.calls().len(), 1);

        tracker.update(fix(20.0));

        tokio::time::sleep(Duration::from_secs(59)).await;
        assert_eq!(channel.calls().len(), 1);

        tokio::time::sleep(Duration::from_secs(2)).await;
        settle().await;

        let calls = channel.calls();
        assert_eq!(calls.len(), 2);
        assert!(calls[1].1 - started >= Duration::from_secs(60));
        assert!(calls[0].0.message.contains("q=10.000000"));
        assert!(calls[1].0.message.contains("q=20.000000"));
        assert!(!dispatcher.has_pending());
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_keeps_previous_fix_when_provider_has_none() {
        let channel = ScriptedChannel::new(vec![Err(DeliveryError::Network("down".into())), Ok(())]);
        let tracker = LocationTracker::new();
        let dispatcher = dispatcher(channel.clone(), &tracker, RetryPolicy::default());

        dispatcher.dispatch(contact("01511234567"), Some(fix(33.0)));
        tokio::time::sleep(Duration::from_secs(61)).await;
        settle().await;

        let calls = channel.calls();
        assert_eq!(calls.len(), 2);
        assert!(calls[1].0.message.contains("q=33.000000"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_before_retry_prevents_it() {
        let channel = ScriptedChannel::new(vec![Err(DeliveryError::Network("down".into()))]);
        let tracker = LocationTracker::new();
        let dispatcher = dispatcher(channel.clone(), &tracker, RetryPolicy::default());

        dispatcher.dispatch(contact("01511234567"), None);
        settle().await;
        assert_eq!(channel.calls().len(), 1);
        assert!(dispatcher.has_pending());

        tokio::time::sleep(Duration::from_secs(30)).await;
        dispatcher.cancel();
        assert!(!dispatcher.has_pending());

        tokio::time::sleep(Duration::from_secs(120)).await;
        settle().await;
        assert_eq!(channel.calls().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dispatch_supersedes_pending_chain_for_same_contact() {
        let channel = ScriptedChannel::new(vec![
            Err(DeliveryError::Network("down".into())),
            Err(DeliveryError::Network("down".into())),
        ]);
        let tracker = LocationTracker::new();
        let dispatcher = dispatcher(channel.clone(), &tracker, RetryPolicy::default());
        let mut attempts = dispatcher.subscribe();
        let who = contact("01511234567");

        dispatcher.dispatch(who.clone(), None);
        settle().await;
        let first = attempts.recv().await.unwrap().chain_id;

        tokio::time::sleep(Duration::from_secs(30)).await;
        dispatcher.dispatch(who.clone(), None);
        settle().await;
        let second = attempts.recv().await.unwrap().chain_id;
        assert_ne!(first, second);
        assert_eq!(dispatcher.pending_contacts(), vec![who]);

        // Only the replacement chain retries, 60s after its own failure.
        tokio::time::sleep(Duration::from_secs(31)).await;
        settle().await;
        assert_eq!(channel.calls().len(), 2);

        tokio::time::sleep(Duration::from_secs(30)).await;
        settle().await;
        assert_eq!(channel.calls().len(), 3);
        assert_eq!(attempts.recv().await.unwrap().chain_id, second);
    }

    #[tokio::test(start_paused = true)]
    async fn test_chains_for_different_contacts_are_independent() {
        let channel = ScriptedChannel::new(vec![]);
        let tracker = LocationTracker::new();
        let dispatcher = dispatcher(channel.clone(), &tracker, RetryPolicy::default());
        let a = contact("01511111111");
        let b = contact("01512222222");

        dispatcher.dispatch(a.clone(), None);
        dispatcher.dispatch(b.clone(), None);
        settle().await;
        assert_eq!(dispatcher.pending_contacts().len(), 2);

        assert!(dispatcher.cancel_contact(&a));
        assert!(!dispatcher.cancel_contact(&a));
        assert_eq!(dispatcher.pending_contacts(), vec![b]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_bounded_policy_gives_up() {
        let channel = ScriptedChannel::new(vec![]);
        let tracker = LocationTracker::new();
        let policy = RetryPolicy {
            max_attempts: Some(2),
            ..RetryPolicy::default()
        };
        let dispatcher = dispatcher(channel.clone(), &tracker, policy);

        dispatcher.dispatch(contact("01511234567"), None);
        tokio::time::sleep(Duration::from_secs(300)).await;
        settle().await;

        assert_eq!(channel.calls().len(), 2);
        assert!(!dispatcher.has_pending());
    }

    #[tokio::test(start_paused = true)]
    async fn test_hanging_attempt_times_out_and_retries() {
        let channel = ScriptedChannel::hanging();
        let tracker = LocationTracker::new();
        let dispatcher = dispatcher(channel.clone(), &tracker, RetryPolicy::default());
        let mut attempts = dispatcher.subscribe();

        dispatcher.dispatch(contact("01511234567"), None);
        tokio::time::sleep(Duration::from_secs(16)).await;
        settle().await;

        let attempt = attempts.recv().await.unwrap();
        assert_eq!(
            attempt.outcome,
            DeliveryOutcome::Failure(DeliveryError::Timeout { secs: 15 }.to_string())
        );

        tokio::time::sleep(Duration::from_secs(60)).await;
        settle().await;
        assert_eq!(channel.calls().len(), 2);
        dispatcher.cancel();
    }

    #[test]
    fn test_dispatch_outside_runtime_is_a_no_op() {
        let channel = ScriptedChannel::new(vec![]);
        let tracker = LocationTracker::new();
        let dispatcher = dispatcher(channel.clone(), &tracker, RetryPolicy::default());

        dispatcher.dispatch(contact("01511234567"), None);
        assert!(!dispatcher.has_pending());
        assert!(channel.calls().is_empty());
    }

    #[tokio::test]
    async fn test_log_channel_always_succeeds() {
        let message = OutboundMessage {
            recipient: "+4915112345678".into(),
            message: compose_message(None, Utc::now()),
        };
        assert_eq!(LogChannel.deliver(&message).await, Ok(()));
    }
}
