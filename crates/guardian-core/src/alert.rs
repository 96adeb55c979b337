//! Audible alert output.
//!
//! [`AlertSink`] calls are synchronous and idempotent: `play()` on a sink
//! that is already playing and `stop()` on a silent sink do nothing.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::process::Command;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Delay before relaunching a command that failed to start or exited non-zero.
const RELAUNCH_DELAY: Duration = Duration::from_secs(1);

/// Something that can raise and silence the local alarm.
pub trait AlertSink: Send + Sync {
    /// Start the alert. No-op if already playing.
    fn play(&self);

    /// Stop the alert. No-op if already silent.
    fn stop(&self);

    /// Whether the alert is currently playing.
    fn is_playing(&self) -> bool;
}

/// Alert sink that only logs. Used when no playback command is configured.
#[derive(Debug, Default)]
pub struct LogAlertSink {
    playing: AtomicBool,
}

impl LogAlertSink {
    /// Create a silent sink.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            playing: AtomicBool::new(false),
        }
    }
}

impl AlertSink for LogAlertSink {
    fn play(&self) {
        if !self.playing.swap(true, Ordering::AcqRel) {
            warn!("ALERT: beacon separation alarm is sounding");
        }
    }

    fn stop(&self) {
        if self.playing.swap(false, Ordering::AcqRel) {
            info!("Alert silenced");
        }
    }

    fn is_playing(&self) -> bool {
        self.playing.load(Ordering::Acquire)
    }
}

/// Plays an external command in a loop until stopped.
///
/// The command is relaunched each time it exits, so a short sound file
/// repeats for as long as the alarm is raised. Stopping aborts the loop task,
/// which drops and kills the running child.
#[derive(Debug)]
pub struct CommandAlertSink {
    program: String,
    args: Vec<String>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl CommandAlertSink {
    /// Create a sink from a command line. Returns `None` for an empty command.
    #[must_use]
    pub fn new(command: &[String]) -> Option<Self> {
        let (program, args) = command.split_first()?;
        Some(Self {
            program: program.clone(),
            args: args.to_vec(),
            task: Mutex::new(None),
        })
    }

    async fn play_loop(program: String, args: Vec<String>) {
        loop {
            let status = Command::new(&program)
                .args(&args)
                .kill_on_drop(true)
                .status()
                .await;

            match status {
                Ok(status) if status.success() => {
                    debug!(program = %program, "alert command finished, replaying");
                }
                Ok(status) => {
                    warn!(program = %program, %status, "alert command exited with failure");
                    tokio::time::sleep(RELAUNCH_DELAY).await;
                }
                Err(e) => {
                    warn!(program = %program, error = %e, "failed to launch alert command");
                    tokio::time::sleep(RELAUNCH_DELAY).await;
                }
            }
        }
    }
}

impl AlertSink for CommandAlertSink {
    fn play(&self) {
        let mut task = self.task.lock();
        if task.as_ref().is_some_and(|t| !t.is_finished()) {
            return;
        }

        let runtime = match tokio::runtime::Handle::try_current() {
            Ok(runtime) => runtime,
            Err(e) => {
                warn!(error = %e, "cannot play alert outside a tokio runtime");
                return;
            }
        };

        warn!(program = %self.program, "ALERT: starting alarm playback");
        *task = Some(runtime.spawn(Self::play_loop(
            self.program.clone(),
            self.args.clone(),
        )));
    }

    fn stop(&self) {
        if let Some(task) = self.task.lock().take() {
            task.abort();
            info!(program = %self.program, "Alarm playback stopped");
        }
    }

    fn is_playing(&self) -> bool {
        self.task.lock().as_ref().is_some_and(|t| !t.is_finished())
    }
}

impl Drop for CommandAlertSink {
    fn drop(&mut self) {
        if let Some(task) = self.task.get_mut().take() {
            task.abort();
        }
    }
}
