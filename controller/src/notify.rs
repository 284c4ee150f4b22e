use chrono::{DateTime, Local, TimeZone};
use thiserror::Error;
use tokio::{
    sync::watch,
    time::{sleep_until, Instant},
};
use tracing::info;

#[derive(Debug, Error)]
#[error("notification time {0} is not in the future")]
pub struct NotifyError(String);

/// A one-shot timer armed for a wall-clock instant.
#[derive(Debug)]
pub struct Notification {
    deadline: Instant,
    target: DateTime<Local>,
}

impl Notification {
    pub fn target(&self) -> DateTime<Local> {
        self.target
    }

    /// Resolves once the target time has been reached.
    pub async fn fired(self) -> DateTime<Local> {
        sleep_until(self.deadline).await;
        self.target
    }
}

/// Arms a notification for `target`, which must be strictly in the future.
pub fn schedule_notification<Tz: TimeZone>(target: &DateTime<Tz>) -> Result<Notification, NotifyError>
where
    Tz::Offset: std::fmt::Display,
{
    let wait = target
        .clone()
        .signed_duration_since(Local::now())
        .to_std()
        .ok()
        .filter(|wait| !wait.is_zero())
        .ok_or_else(|| NotifyError(target.to_string()))?;

    Ok(Notification {
        deadline: Instant::now() + wait,
        target: target.with_timezone(&Local),
    })
}

/// Logs when `notification` fires, unless shutdown comes first.
pub async fn watch_notification(notification: Notification, mut shutdown: watch::Receiver<bool>) {
    let target = notification.target();
    tokio::select! {
        at = notification.fired() => info!(%at, "notification fired"),
        _ = shutdown.wait_for(|stopped| *stopped) => info!(%target, "notification cancelled"),
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use chrono::TimeDelta;

    use super::*;

    #[test]
    fn rejects_past_targets() {
        let past = Local::now() - TimeDelta::seconds(1);
        assert!(schedule_notification(&past).is_err());
    }

    #[tokio::test]
    async fn fires_shortly_after_target() {
        let target = Local::now() + TimeDelta::milliseconds(20);
        let notification = schedule_notification(&target).unwrap();

        let fired = tokio::time::timeout(Duration::from_secs(1), notification.fired())
            .await
            .expect("notification should fire within a second");
        assert_eq!(fired, target);
        assert!(Local::now() >= target);
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_cancels_watch() {
        let target = Local::now() + TimeDelta::hours(1);
        let notification = schedule_notification(&target).unwrap();
        let (stop, shutdown) = watch::channel(false);

        let watcher = tokio::spawn(watch_notification(notification, shutdown));
        stop.send(true).unwrap();

        tokio::time::timeout(Duration::from_secs(1), watcher)
            .await
            .expect("watch should end on shutdown")
            .unwrap();
    }
}
