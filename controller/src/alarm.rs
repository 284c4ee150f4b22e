use std::time::Duration;

use chrono::Local;
use thiserror::Error;
use tokio::{
    sync::{mpsc, oneshot, watch},
    time::{interval_at, Instant, MissedTickBehavior},
};
use tracing::info;

#[derive(Debug, Error)]
#[error("alarm controller stopped")]
pub struct AlarmError;

enum AlarmCommand {
    Set {
        on: bool,
        reply: oneshot::Sender<()>,
    },
    IsSet(oneshot::Sender<bool>),
}

/// Handle to the alarm task.
#[derive(Clone)]
pub struct Alarm {
    commands: mpsc::Sender<AlarmCommand>,
}

impl Alarm {
    /// Starts a disarmed alarm that samples its state every `accuracy`.
    pub fn spawn(accuracy: Duration, shutdown: watch::Receiver<bool>) -> Self {
        let (commands, queue) = mpsc::channel(16);
        tokio::spawn(run(accuracy, queue, shutdown));
        Self { commands }
    }

    /// Arms or disarms the alarm; every tick after this returns sees the new value.
    pub async fn set(&self, on: bool) -> Result<(), AlarmError> {
        let (reply, done) = oneshot::channel();
        self.commands
            .send(AlarmCommand::Set { on, reply })
            .await
            .map_err(|_| AlarmError)?;
        done.await.map_err(|_| AlarmError)
    }

    pub async fn is_set(&self) -> Result<bool, AlarmError> {
        let (reply, armed) = oneshot::channel();
        self.commands
            .send(AlarmCommand::IsSet(reply))
            .await
            .map_err(|_| AlarmError)?;
        armed.await.map_err(|_| AlarmError)
    }
}

async fn run(
    accuracy: Duration,
    mut queue: mpsc::Receiver<AlarmCommand>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = interval_at(Instant::now() + accuracy, accuracy);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut armed = false;

    loop {
        tokio::select! {
            command = queue.recv() => match command {
                Some(AlarmCommand::Set { on, reply }) => {
                    info!("alarm {}", if on { "set" } else { "unset" });
                    armed = on;
                    let _ = reply.send(());
                }
                Some(AlarmCommand::IsSet(reply)) => {
                    let _ = reply.send(armed);
                }
                None => break,
            },
            _ = ticker.tick() => {
                if armed {
                    info!(at = %Local::now(), "alarm tick");
                }
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
        }
    }

    info!("alarm controller stopped");
}
