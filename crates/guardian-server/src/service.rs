//! Wiring of the monitor pipeline from configuration.

use std::sync::Arc;

use anyhow::Context;
use guardian_core::{
    AlertSink, ChannelSampler, CommandAlertSink, Config, DeliveryChannel, FileSettingsStore,
    Guardian, LocationTracker, LogAlertSink, LogChannel, NotificationDispatcher,
    PersistedSettings, SettingsStore,
};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::relay::RelayChannel;
use crate::state::AppState;

/// A running monitor together with the state handlers need.
pub struct Service {
    /// Handler state.
    pub state: AppState,
    /// The monitor loop task.
    pub monitor: JoinHandle<()>,
}

/// Open the settings store named by the configuration.
#[must_use]
pub fn open_settings(config: &Config) -> Arc<dyn SettingsStore> {
    let path = config
        .storage
        .settings_path
        .clone()
        .unwrap_or_else(FileSettingsStore::default_path);
    info!(path = %path.display(), "Using settings file");
    Arc::new(FileSettingsStore::new(path))
}

/// Build the delivery channel: the HTTP relay when configured, else a logging stub.
///
/// # Errors
///
/// Returns an error if the HTTP client cannot be built.
pub fn delivery_channel(config: &Config) -> anyhow::Result<Arc<dyn DeliveryChannel>> {
    let notification = &config.notification;
    match &notification.relay_url {
        Some(url) => {
            let relay = RelayChannel::new(
                url.clone(),
                notification.relay_token.clone(),
                notification.retry_policy().attempt_timeout,
            )
            .context("failed to build messaging relay client")?;
            info!(url = %relay.url(), "Emergency notifications go through the messaging relay");
            Ok(Arc::new(relay))
        }
        None => {
            warn!("No messaging relay configured; emergency notifications will only be logged");
            Ok(Arc::new(LogChannel))
        }
    }
}

/// Build the alert sink: the configured playback command, else a logging stub.
#[must_use]
pub fn alert_sink(config: &Config) -> Arc<dyn AlertSink> {
    match CommandAlertSink::new(&config.alert.command) {
        Some(sink) => Arc::new(sink),
        None => {
            info!("No alert command configured; alarms will only be logged");
            Arc::new(LogAlertSink::new())
        }
    }
}

/// Start the monitor pipeline.
///
/// Persisted settings take precedence over the configuration file; any
/// persisted value that cannot be read keeps the configured one.
///
/// # Errors
///
/// Returns an error if the configuration holds invalid monitor values or a
/// component cannot be built.
pub async fn start(
    config: Config,
    settings: Arc<dyn SettingsStore>,
    channel: Arc<dyn DeliveryChannel>,
    alert: Arc<dyn AlertSink>,
) -> anyhow::Result<Service> {
    let configured = PersistedSettings {
        threshold: config.monitor.threshold()?,
        grace: config.monitor.grace()?,
        contact: config.notification.contact()?,
    };
    let current = PersistedSettings::load(settings.as_ref(), &configured).await;
    info!(
        threshold = current.threshold.dbm(),
        grace_secs = current.grace.secs(),
        contact_configured = current.contact.is_some(),
        profile = ?config.monitor.profile,
        "Loaded monitor settings"
    );

    let location = LocationTracker::new();
    let dispatcher = NotificationDispatcher::new(
        channel,
        Arc::new(location.clone()),
        config.notification.retry_policy(),
    );
    let guardian = Guardian::new(
        &current,
        config.monitor.profile,
        alert,
        dispatcher,
        Arc::new(location.clone()),
    );

    let (sampler, feed) = ChannelSampler::new(config.monitor.sample_buffer);
    let (handle, monitor) = guardian.spawn(sampler, config.monitor.tick_interval())?;

    Ok(Service {
        state: AppState::new(handle, feed, location, settings, config),
        monitor,
    })
}
