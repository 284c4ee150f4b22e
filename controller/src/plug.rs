use std::{sync::Arc, time::Duration};

use heihei_common::PlugCode;
use thiserror::Error;
use tokio::{
    sync::{mpsc, oneshot, watch},
    time::Instant,
};
use tracing::{info, warn};

use crate::encoder::{EncodeError, Encoder};

const QUEUE_DEPTH: usize = 16;

#[derive(Debug, Error)]
pub enum PlugError {
    #[error("plug {0} controller stopped")]
    Stopped(&'static str),
    #[error("plug {plug} cannot schedule a revert {duration:?} from now")]
    DurationOutOfRange { plug: &'static str, duration: Duration },
    #[error("plug {plug} transmission failed: {source}")]
    Transmit {
        plug: &'static str,
        #[source]
        source: EncodeError,
    },
}

enum PlugCommand {
    Set {
        on: bool,
        reply: oneshot::Sender<Result<(), PlugError>>,
    },
    SetFor {
        on: bool,
        duration: Duration,
        reply: oneshot::Sender<Result<(), PlugError>>,
    },
    State {
        reply: oneshot::Sender<bool>,
    },
}

/// The one scheduled action a plug may have outstanding.
#[derive(Debug, Clone, Copy)]
struct Revert {
    at: Instant,
    on: bool,
}

/// Handle to the task that owns one RF plug.
#[derive(Clone)]
pub struct Plug {
    code: PlugCode,
    commands: mpsc::Sender<PlugCommand>,
}

impl Plug {
    /// Switches the plug off and starts its controller task.
    pub async fn spawn(
        code: PlugCode,
        encoder: Arc<Encoder>,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        let (commands, queue) = mpsc::channel(QUEUE_DEPTH);
        let mut controller = PlugController {
            code,
            encoder,
            state: false,
            revert: None,
        };

        // A failed initial transmission is already logged; the plug still starts off.
        if controller.apply(false).await.is_err() {
            info!("plug {} starting without a confirmed off", code.as_str());
        }
        tokio::spawn(controller.run(queue, shutdown));

        Self { code, commands }
    }

    pub fn code(&self) -> PlugCode {
        self.code
    }

    /// Sets the plug, cancelling any pending revert.
    ///
    /// The new state is committed even if the transmission fails; the failure is
    /// still returned.
    pub async fn set(&self, on: bool) -> Result<(), PlugError> {
        let (reply, done) = oneshot::channel();
        self.send(PlugCommand::Set { on, reply }).await?;
        done.await.map_err(|_| self.stopped())?
    }

    /// Sets the plug and schedules the opposite state after `duration`.
    ///
    /// Returns once the state is committed and the revert armed. A later `set` or
    /// `set_for_duration` replaces the pending revert. A `duration` too large to
    /// schedule is rejected and leaves the plug untouched.
    pub async fn set_for_duration(&self, on: bool, duration: Duration) -> Result<(), PlugError> {
        let (reply, done) = oneshot::channel();
        self.send(PlugCommand::SetFor {
            on,
            duration,
            reply,
        })
        .await?;
        done.await.map_err(|_| self.stopped())?
    }

    /// Last committed state.
    pub async fn state(&self) -> Result<bool, PlugError> {
        let (reply, state) = oneshot::channel();
        self.send(PlugCommand::State { reply }).await?;
        state.await.map_err(|_| self.stopped())
    }

    async fn send(&self, command: PlugCommand) -> Result<(), PlugError> {
        self.commands
            .send(command)
            .await
            .map_err(|_| self.stopped())
    }

    fn stopped(&self) -> PlugError {
        PlugError::Stopped(self.code.as_str())
    }
}

struct PlugController {
    code: PlugCode,
    encoder: Arc<Encoder>,
    state: bool,
    revert: Option<Revert>,
}

impl PlugController {
    async fn run(
        mut self,
        mut queue: mpsc::Receiver<PlugCommand>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        loop {
            tokio::select! {
                command = queue.recv() => {
                    let Some(command) = command else { break };
                    self.handle(command).await;
                }
                on = wait_for(self.revert) => {
                    self.revert = None;
                    info!("plug {} revert to {}", self.code.as_str(), on);
                    let _ = self.apply(on).await;
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        if self.revert.take().is_some() {
            info!("plug {} pending revert cancelled", self.code.as_str());
        }
        info!("plug {} controller stopped", self.code.as_str());
    }

    async fn handle(&mut self, command: PlugCommand) {
        match command {
            PlugCommand::Set { on, reply } => {
                info!("set {} {}", self.code.as_str(), on);
                self.cancel_revert();
                let _ = reply.send(self.apply(on).await);
            }
            PlugCommand::SetFor {
                on,
                duration,
                reply,
            } => {
                info!("set {} {} for {:?}", self.code.as_str(), on, duration);
                let Some(at) = Instant::now().checked_add(duration) else {
                    let err = PlugError::DurationOutOfRange {
                        plug: self.code.as_str(),
                        duration,
                    };
                    warn!("{err}");
                    let _ = reply.send(Err(err));
                    return;
                };
                self.cancel_revert();
                let result = self.apply(on).await;
                self.revert = Some(Revert { at, on: !on });
                let _ = reply.send(result);
            }
            PlugCommand::State { reply } => {
                let _ = reply.send(self.state);
            }
        }
    }

    fn cancel_revert(&mut self) {
        if self.revert.take().is_some() {
            info!("plug {} stopped existing timer", self.code.as_str());
        }
    }

    async fn apply(&mut self, on: bool) -> Result<(), PlugError> {
        // No feedback from the plug, so the requested state is taken as the truth.
        self.state = on;
        self.encoder
            .transmit(self.code, on)
            .await
            .map_err(|source| PlugError::Transmit {
                plug: self.code.as_str(),
                source,
            })
            .inspect_err(|err| warn!("{err}"))
    }
}

async fn wait_for(revert: Option<Revert>) -> bool {
    match revert {
        Some(Revert { at, on }) => {
            tokio::time::sleep_until(at).await;
            on
        }
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use heihei_common::Level;

    use super::*;
    use crate::pins::testing::{recording_pins, WriteLog};

    async fn plug() -> (Plug, WriteLog, watch::Sender<bool>) {
        let (pins, log) = recording_pins(None);
        let encoder = Arc::new(Encoder::new(pins).await.unwrap());
        let (stop, shutdown) = watch::channel(false);
        let plug = Plug::spawn(PlugCode::One, encoder, shutdown).await;
        (plug, log, stop)
    }

    async fn plug_with_failing(pin: &str) -> (Plug, WriteLog, watch::Sender<bool>) {
        let (pins, log) = recording_pins(Some(pin));
        let encoder = Arc::new(Encoder::unparked(pins));
        let (stop, shutdown) = watch::channel(false);
        let plug = Plug::spawn(PlugCode::One, encoder, shutdown).await;
        (plug, log, stop)
    }

    fn d3_levels(log: &WriteLog) -> Vec<Level> {
        log.lock()
            .unwrap()
            .iter()
            .filter(|(name, _)| name == "d3")
            .map(|(_, level)| *level)
            .collect()
    }

    #[tokio::test(start_paused = true)]
    async fn starts_off() {
        let (plug, log, _stop) = plug().await;

        assert!(!plug.state().await.unwrap());
        assert_eq!(d3_levels(&log).last(), Some(&Level::Low));
    }

    #[tokio::test(start_paused = true)]
    async fn set_is_visible_to_later_reads() {
        let (plug, log, _stop) = plug().await;

        plug.set(true).await.unwrap();
        assert!(plug.state().await.unwrap());

        plug.set(false).await.unwrap();
        assert!(!plug.state().await.unwrap());
        // parked, initial off, then the two requests
        assert_eq!(d3_levels(&log)[2..], [Level::High, Level::Low]);
    }

    #[tokio::test(start_paused = true)]
    async fn timed_set_reverts_after_duration() {
        let (plug, _log, _stop) = plug().await;

        plug.set_for_duration(true, Duration::from_secs(1))
            .await
            .unwrap();
        assert!(plug.state().await.unwrap());

        tokio::time::sleep(Duration::from_millis(500)).await;
        assert!(plug.state().await.unwrap());

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(!plug.state().await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn timed_off_reverts_to_on() {
        let (plug, _log, _stop) = plug().await;

        plug.set_for_duration(false, Duration::from_secs(2))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_secs(3)).await;
        assert!(plug.state().await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn set_supersedes_pending_revert() {
        let (plug, log, _stop) = plug().await;

        plug.set_for_duration(true, Duration::from_secs(1))
            .await
            .unwrap();
        plug.set(false).await.unwrap();

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(!plug.state().await.unwrap());
        // parked, initial off, timed on, explicit off; no revert transmission
        assert_eq!(d3_levels(&log).len(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn superseded_revert_never_fires() {
        let (plug, _log, _stop) = plug().await;

        plug.set_for_duration(true, Duration::from_secs(1))
            .await
            .unwrap();
        plug.set(true).await.unwrap();

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(plug.state().await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn newest_timed_set_wins() {
        let (plug, _log, _stop) = plug().await;

        plug.set_for_duration(true, Duration::from_secs(1))
            .await
            .unwrap();
        plug.set_for_duration(true, Duration::from_secs(10))
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(plug.state().await.unwrap());

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert!(!plug.state().await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn failed_transmission_still_commits_state() {
        let (plug, _log, _stop) = plug_with_failing("enable").await;

        let err = plug.set(true).await.unwrap_err();
        assert!(matches!(err, PlugError::Transmit { plug: "ONE", .. }));
        assert!(plug.state().await.unwrap());

        // the loop keeps serving after a failure
        assert!(plug.set(false).await.is_err());
        assert!(!plug.state().await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn unschedulable_duration_is_rejected_and_loop_keeps_serving() {
        let (plug, log, _stop) = plug().await;
        plug.set_for_duration(false, Duration::from_secs(60))
            .await
            .unwrap();

        let err = plug
            .set_for_duration(true, Duration::MAX)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            PlugError::DurationOutOfRange { plug: "ONE", .. }
        ));
        // untouched: no transmission, state and pending revert kept
        assert!(!plug.state().await.unwrap());
        assert_eq!(d3_levels(&log).len(), 3);

        tokio::time::sleep(Duration::from_secs(61)).await;
        assert!(plug.state().await.unwrap());

        plug.set(false).await.unwrap();
        assert!(!plug.state().await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn failed_initial_transmission_still_starts_off() {
        let (plug, _log, _stop) = plug_with_failing("d3").await;

        assert!(!plug.state().await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_stops_controller_and_pending_revert() {
        let (plug, log, stop) = plug().await;

        plug.set_for_duration(true, Duration::from_secs(1))
            .await
            .unwrap();
        stop.send(true).unwrap();

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(matches!(plug.state().await, Err(PlugError::Stopped("ONE"))));
        assert_eq!(d3_levels(&log).len(), 3);
    }
}
