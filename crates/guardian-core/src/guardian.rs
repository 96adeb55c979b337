//! Pipeline coordinator.
//!
//! [`Guardian`] is the single writer of the alarm state. It classifies
//! sampler events, advances the [`AlarmStateMachine`], and drives the alert
//! sink and notification dispatcher from the resulting transitions.
//! Observers receive [`AlarmEvent`]s on a broadcast stream and the latest
//! [`StatusSnapshot`] on a watch channel; nothing outside the coordinator can
//! change the state.
//!
//! [`Guardian::spawn`] runs the coordinator as an actor. Commands, sampler
//! events and ticks are serialized through one `select!` loop with biased
//! ordering, so an in-range sample that is ready in the same turn as a tick
//! is applied first.

use std::ops::ControlFlow;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};
use utoipa::ToSchema;

use crate::alarm::{AlarmEvent, AlarmState, AlarmStateMachine, AlertProfile, GraceDuration};
use crate::alert::AlertSink;
use crate::dispatch::NotificationDispatcher;
use crate::error::{GuardianError, Result};
use crate::location::LocationProvider;
use crate::monitor::{classify_event, RangeState, SignalQuality, Threshold};
use crate::sampler::SignalSampler;
use crate::settings::PersistedSettings;
use crate::types::{EmergencyContact, SamplerEvent, SignalSample};

const EVENT_BUFFER: usize = 64;
const COMMAND_BUFFER: usize = 16;

/// Source of wall-clock time.
pub trait Clock: Send + Sync {
    /// Current instant.
    fn now(&self) -> DateTime<Utc>;
}

/// The system clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Everything an observer needs to render the current state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct StatusSnapshot {
    /// Alarm state, with the live countdown when counting down.
    pub alarm: AlarmState,
    /// Latest classification. `None` before the first sampler event.
    pub range: Option<RangeState>,
    /// Latest reading.
    pub last_sample: Option<SignalSample>,
    /// Quality band of the latest reading.
    pub signal_quality: Option<SignalQuality>,
    /// Whether the beacon is currently connected.
    pub connected: bool,
    /// Threshold in effect.
    pub rssi_threshold: Threshold,
    /// Grace period in effect.
    pub grace_secs: GraceDuration,
    /// Alert profile.
    pub profile: AlertProfile,
    /// Configured emergency contact.
    pub emergency_contact: Option<EmergencyContact>,
    /// Whether an emergency notification chain is still running.
    pub notification_pending: bool,
}

/// Request to the running coordinator.
#[derive(Debug)]
pub enum GuardianCommand {
    /// Acknowledge and clear the alarm.
    Reset {
        /// Receives the reset event, or `None` if already idle.
        reply: oneshot::Sender<Option<AlarmEvent>>,
    },
    /// Change the threshold.
    SetThreshold {
        /// New threshold.
        threshold: Threshold,
        /// Acknowledgement.
        reply: oneshot::Sender<()>,
    },
    /// Change the grace period.
    SetGrace {
        /// New grace period.
        grace: GraceDuration,
        /// Acknowledgement.
        reply: oneshot::Sender<()>,
    },
    /// Change or clear the emergency contact.
    SetContact {
        /// New contact.
        contact: Option<EmergencyContact>,
        /// Acknowledgement.
        reply: oneshot::Sender<()>,
    },
    /// Stop the sampler, the alert and all notifications, then exit.
    Shutdown {
        /// Acknowledgement.
        reply: oneshot::Sender<()>,
    },
}

/// The alarm pipeline.
pub struct Guardian {
    machine: AlarmStateMachine,
    threshold: Threshold,
    profile: AlertProfile,
    contact: Option<EmergencyContact>,
    alert: Arc<dyn AlertSink>,
    dispatcher: NotificationDispatcher,
    location: Arc<dyn LocationProvider>,
    clock: Arc<dyn Clock>,
    last_sample: Option<SignalSample>,
    range: Option<RangeState>,
    connected: bool,
    events: broadcast::Sender<AlarmEvent>,
    status: watch::Sender<StatusSnapshot>,
}

impl std::fmt::Debug for Guardian {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Guardian")
            .field("machine", &self.machine)
            .field("threshold", &self.threshold)
            .field("profile", &self.profile)
            .field("contact", &self.contact)
            .field("range", &self.range)
            .finish_non_exhaustive()
    }
}

impl Guardian {
    /// Create an idle coordinator using the system clock.
    #[must_use]
    pub fn new(
        settings: &PersistedSettings,
        profile: AlertProfile,
        alert: Arc<dyn AlertSink>,
        dispatcher: NotificationDispatcher,
        location: Arc<dyn LocationProvider>,
    ) -> Self {
        Self::with_clock(
            settings,
            profile,
            alert,
            dispatcher,
            location,
            Arc::new(SystemClock),
        )
    }

    /// Create an idle coordinator with an explicit clock.
    #[must_use]
    pub fn with_clock(
        settings: &PersistedSettings,
        profile: AlertProfile,
        alert: Arc<dyn AlertSink>,
        dispatcher: NotificationDispatcher,
        location: Arc<dyn LocationProvider>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let machine = AlarmStateMachine::new(settings.grace);
        let (events, _) = broadcast::channel(EVENT_BUFFER);
        let initial = StatusSnapshot {
            alarm: AlarmState::Idle,
            range: None,
            last_sample: None,
            signal_quality: None,
            connected: false,
            rssi_threshold: settings.threshold,
            grace_secs: settings.grace,
            profile,
            emergency_contact: settings.contact.clone(),
            notification_pending: false,
        };
        let (status, _) = watch::channel(initial);

        Self {
            machine,
            threshold: settings.threshold,
            profile,
            contact: settings.contact.clone(),
            alert,
            dispatcher,
            location,
            clock,
            last_sample: None,
            range: None,
            connected: false,
            events,
            status,
        }
    }

    /// Process one sampler event observed at `now`.
    ///
    /// The event's own timestamp is informational; timing always uses the
    /// coordinator's clock.
    pub fn handle_event(&mut self, event: SamplerEvent, now: DateTime<Utc>) -> Option<AlarmEvent> {
        match event {
            SamplerEvent::Sample(sample) => {
                if !self.connected {
                    info!(strength = sample.strength, "Beacon connected");
                }
                self.last_sample = Some(sample);
                self.connected = true;
            }
            SamplerEvent::Disconnected { at } => {
                if self.connected {
                    warn!(lost_at = %at, "Beacon disconnected");
                }
                self.connected = false;
            }
        }

        let range = classify_event(&event, self.threshold);
        if self.range != Some(range) {
            debug!(?range, threshold = self.threshold.dbm(), "Range changed");
        }
        self.range = Some(range);

        let transition = self.machine.observe(range, now);
        self.apply(transition, now);
        transition
    }

    /// Advance the countdown to `now`.
    pub fn tick(&mut self, now: DateTime<Utc>) -> Option<AlarmEvent> {
        let transition = self.machine.tick(now);
        self.apply(transition, now);
        transition
    }

    /// Clear the alarm or countdown, stop the alert and cancel every pending
    /// notification. Does nothing observable when already idle.
    pub fn reset(&mut self, now: DateTime<Utc>) -> Option<AlarmEvent> {
        let transition = self.machine.reset(now);
        self.dispatcher.cancel();
        self.alert.stop();
        self.apply(transition, now);
        transition
    }

    /// Change the threshold. Only later classifications are affected.
    pub fn set_threshold(&mut self, threshold: Threshold, now: DateTime<Utc>) {
        if threshold != self.threshold {
            info!(from = self.threshold.dbm(), to = threshold.dbm(), "Threshold changed");
        }
        self.threshold = threshold;
        self.publish(now);
    }

    /// Change the grace period. A running countdown keeps its elapsed time.
    pub fn set_grace(&mut self, grace: GraceDuration, now: DateTime<Utc>) {
        if grace != self.machine.grace() {
            info!(from = self.machine.grace().secs(), to = grace.secs(), "Grace period changed");
        }
        self.machine.set_grace(grace);
        self.publish(now);
    }

    /// Change or clear the emergency contact. Running notification chains
    /// are left alone.
    pub fn set_contact(&mut self, contact: Option<EmergencyContact>, now: DateTime<Utc>) {
        match &contact {
            Some(c) => info!(contact = %c, "Emergency contact set"),
            None => info!("Emergency contact cleared"),
        }
        self.contact = contact;
        self.publish(now);
    }

    /// Status as of `now`.
    #[must_use]
    pub fn snapshot(&self, now: DateTime<Utc>) -> StatusSnapshot {
        StatusSnapshot {
            alarm: self.machine.state(now),
            range: self.range,
            last_sample: self.last_sample,
            signal_quality: self
                .last_sample
                .map(|s| SignalQuality::from_strength(s.strength)),
            connected: self.connected,
            rssi_threshold: self.threshold,
            grace_secs: self.machine.grace(),
            profile: self.profile,
            emergency_contact: self.contact.clone(),
            notification_pending: self.dispatcher.has_pending(),
        }
    }

    /// Observe alarm transitions.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<AlarmEvent> {
        self.events.subscribe()
    }

    /// Observe status snapshots.
    #[must_use]
    pub fn status_receiver(&self) -> watch::Receiver<StatusSnapshot> {
        self.status.subscribe()
    }

    /// The notification dispatcher.
    #[must_use]
    pub const fn dispatcher(&self) -> &NotificationDispatcher {
        &self.dispatcher
    }

    fn apply(&mut self, transition: Option<AlarmEvent>, now: DateTime<Utc>) {
        if let Some(event) = transition {
            match event {
                AlarmEvent::CountdownStarted { remaining_secs, .. } => {
                    info!(grace_secs = remaining_secs, "Beacon out of range, countdown started");
                }
                AlarmEvent::CountdownTick { remaining_secs, .. } => {
                    debug!(remaining_secs, "Countdown");
                }
                AlarmEvent::CountdownCancelled { .. } => {
                    info!("Beacon back in range, countdown cancelled");
                    self.alert.stop();
                }
                AlarmEvent::AlarmTriggered { at } => {
                    warn!(at = %at, profile = ?self.profile, "Separation alarm triggered");
                    self.alert.play();
                    self.notify();
                }
                AlarmEvent::AlarmReset { .. } => {
                    info!("Alarm reset");
                    self.alert.stop();
                }
            }
            // No subscribers is fine.
            let _ = self.events.send(event);
        }
        self.publish(now);
    }

    fn notify(&self) {
        if !self.profile.notifies() {
            debug!("Audio-only profile, no notification");
            return;
        }
        match &self.contact {
            Some(contact) => self
                .dispatcher
                .dispatch(contact.clone(), self.location.latest()),
            None => info!("No emergency contact configured, skipping notification"),
        }
    }

    fn publish(&self, now: DateTime<Utc>) {
        let snapshot = self.snapshot(now);
        self.status.send_if_modified(|current| {
            if *current == snapshot {
                false
            } else {
                *current = snapshot;
                true
            }
        });
    }

    /// Apply one command. Breaks once the loop has been shut down.
    fn handle_command(
        &mut self,
        command: GuardianCommand,
        sampler: &mut impl SignalSampler,
    ) -> ControlFlow<()> {
        let now = self.clock.now();
        // Replies go to callers that may have given up waiting.
        match command {
            GuardianCommand::Reset { reply } => {
                let _ = reply.send(self.reset(now));
            }
            GuardianCommand::SetThreshold { threshold, reply } => {
                self.set_threshold(threshold, now);
                let _ = reply.send(());
            }
            GuardianCommand::SetGrace { grace, reply } => {
                self.set_grace(grace, now);
                let _ = reply.send(());
            }
            GuardianCommand::SetContact { contact, reply } => {
                self.set_contact(contact, now);
                let _ = reply.send(());
            }
            GuardianCommand::Shutdown { reply } => {
                self.shut_down(sampler);
                let _ = reply.send(());
                return ControlFlow::Break(());
            }
        }
        ControlFlow::Continue(())
    }

    fn shut_down(&mut self, sampler: &mut impl SignalSampler) {
        sampler.stop();
        self.alert.stop();
        self.dispatcher.cancel();
        info!("Guardian stopped");
    }

    /// Run the coordinator as a task.
    ///
    /// # Errors
    ///
    /// Returns [`GuardianError::SamplerStopped`] if the sampler subscription
    /// is unavailable.
    pub fn spawn<S>(
        self,
        mut sampler: S,
        tick_interval: Duration,
    ) -> Result<(GuardianHandle, JoinHandle<()>)>
    where
        S: SignalSampler + 'static,
    {
        let samples = sampler.subscribe().ok_or(GuardianError::SamplerStopped)?;
        let (commands_tx, commands_rx) = mpsc::channel(COMMAND_BUFFER);

        let handle = GuardianHandle {
            commands: commands_tx,
            status: self.status_receiver(),
            events: self.events.clone(),
        };
        let task = tokio::spawn(self.run(sampler, samples, commands_rx, tick_interval));
        Ok((handle, task))
    }

    async fn run<S: SignalSampler>(
        mut self,
        mut sampler: S,
        mut samples: mpsc::Receiver<SamplerEvent>,
        mut commands: mpsc::Receiver<GuardianCommand>,
        tick_interval: Duration,
    ) {
        let mut ticker = tokio::time::interval(tick_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        ticker.tick().await;
        let mut samples_open = true;

        info!(
            threshold = self.threshold.dbm(),
            grace_secs = self.machine.grace().secs(),
            profile = ?self.profile,
            tick_ms = u64::try_from(tick_interval.as_millis()).unwrap_or(u64::MAX),
            "Guardian running"
        );

        loop {
            tokio::select! {
                biased;

                command = commands.recv() => match command {
                    Some(command) => {
                        if self.handle_command(command, &mut sampler).is_break() {
                            break;
                        }
                    }
                    None => {
                        debug!("All guardian handles dropped");
                        self.shut_down(&mut sampler);
                        break;
                    }
                },

                event = samples.recv(), if samples_open => {
                    let now = self.clock.now();
                    match event {
                        Some(event) => {
                            self.handle_event(event, now);
                        }
                        None => {
                            warn!("Signal sampler closed; treating beacon as lost");
                            samples_open = false;
                            self.handle_event(SamplerEvent::Disconnected { at: now }, now);
                        }
                    }
                },

                _ = ticker.tick() => {
                    let now = self.clock.now();
                    self.tick(now);
                },
            }
        }
    }
}

/// Cheap, cloneable handle to a running [`Guardian`].
#[derive(Debug, Clone)]
pub struct GuardianHandle {
    commands: mpsc::Sender<GuardianCommand>,
    status: watch::Receiver<StatusSnapshot>,
    events: broadcast::Sender<AlarmEvent>,
}

impl GuardianHandle {
    async fn request<T>(
        &self,
        command: impl FnOnce(oneshot::Sender<T>) -> GuardianCommand,
    ) -> Result<T> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(command(reply))
            .await
            .map_err(|_| GuardianError::MonitorUnavailable)?;
        response.await.map_err(|_| GuardianError::MonitorUnavailable)
    }

    /// Acknowledge the alarm.
    ///
    /// # Errors
    ///
    /// Returns [`GuardianError::MonitorUnavailable`] if the loop has exited.
    pub async fn reset(&self) -> Result<Option<AlarmEvent>> {
        self.request(|reply| GuardianCommand::Reset { reply }).await
    }

    /// Change the threshold.
    ///
    /// # Errors
    ///
    /// Returns [`GuardianError::MonitorUnavailable`] if the loop has exited.
    pub async fn set_threshold(&self, threshold: Threshold) -> Result<()> {
        self.request(|reply| GuardianCommand::SetThreshold { threshold, reply })
            .await
    }

    /// Change the grace period.
    ///
    /// # Errors
    ///
    /// Returns [`GuardianError::MonitorUnavailable`] if the loop has exited.
    pub async fn set_grace(&self, grace: GraceDuration) -> Result<()> {
        self.request(|reply| GuardianCommand::SetGrace { grace, reply })
            .await
    }

    /// Change or clear the emergency contact.
    ///
    /// # Errors
    ///
    /// Returns [`GuardianError::MonitorUnavailable`] if the loop has exited.
    pub async fn set_contact(&self, contact: Option<EmergencyContact>) -> Result<()> {
        self.request(|reply| GuardianCommand::SetContact { contact, reply })
            .await
    }

    /// Stop the loop.
    ///
    /// # Errors
    ///
    /// Returns [`GuardianError::MonitorUnavailable`] if the loop already exited.
    pub async fn shutdown(&self) -> Result<()> {
        self.request(|reply| GuardianCommand::Shutdown { reply }).await
    }

    /// Latest published status.
    #[must_use]
    pub fn status(&self) -> StatusSnapshot {
        self.status.borrow().clone()
    }

    /// Watch status changes.
    #[must_use]
    pub fn watch_status(&self) -> watch::Receiver<StatusSnapshot> {
        self.status.clone()
    }

    /// Observe alarm transitions.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<AlarmEvent> {
        self.events.subscribe()
    }

    /// Whether the loop is still accepting commands.
    #[must_use]
    pub fn is_running(&self) -> bool {
        !self.commands.is_closed()
    }
}
