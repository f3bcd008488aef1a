//! Structures to keep the process alive until some event occurs

use std::fmt;
use tokio::signal::ctrl_c;
use tokio::sync::mpsc::{channel, Receiver, Sender};
use tracing::{debug, error, warn};

/// Reason why the heart stopped beating
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeathReason {
    /// Internal kill signal has been sent
    Killed(String),
    /// SIGINT, SIGTERM or every [`HeartStone`] has been dropped
    Terminated,
}

impl fmt::Display for DeathReason {
    fn fmt(&self, w: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeathReason::Killed(reason) => write!(w, "Killed ({})", reason),
            DeathReason::Terminated => write!(w, "Terminated due to external signal"),
        }
    }
}

/// Lifecycle management struct that can be used to keep the application alive
#[derive(Debug)]
pub struct Heart {
    /// Receiver for kill requests sent by heart stones
    rx: Receiver<String>,
}

impl Heart {
    /// Creates a new heart and a linked stone to kill it remotely
    pub fn new() -> (Self, HeartStone) {
        let (tx, rx) = channel(2);
        (Self { rx }, HeartStone { remote: tx })
    }

    /// Future that waits until the heart dies for the returned reason
    pub async fn death(&mut self) -> DeathReason {
        debug!("Heart starts beating");

        tokio::select! {
            reason = self.rx.recv() => match reason {
                Some(reason) => DeathReason::Killed(reason),
                None => {
                    warn!("Every heart stone has been dropped");
                    DeathReason::Terminated
                }
            },
            _ = termination_signal() => DeathReason::Terminated,
        }
    }
}

#[cfg(unix)]
async fn termination_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    match signal(SignalKind::terminate()) {
        Ok(mut sigterm) => {
            tokio::select! {
                _ = sigterm.recv() => {},
                _ = ctrl_c() => {},
            }
        }
        Err(e) => {
            warn!(error = %e, "Unable to listen for SIGTERM");
            ctrl_c().await.ok();
        }
    }
}

#[cfg(not(unix))]
async fn termination_signal() {
    ctrl_c().await.ok();
}

/// Remote controller for the heart
#[derive(Clone)]
pub struct HeartStone {
    remote: Sender<String>,
}

impl HeartStone {
    /// Kill the associated heart
    pub async fn kill(&self, reason: impl Into<String>) {
        if let Err(e) = self.remote.send(reason.into()).await {
            error!("Failed to interact with Heart: {}", e);
        }
    }
}

#[cfg(test)]
mod does {
    use super::*;
    use futures::poll;
    use pretty_assertions::assert_eq;
    use std::time::Duration;
    use tokio::task::{spawn, yield_now};
    use tokio::time::sleep;

    #[tokio::test]
    async fn live_until_killed() {
        let (mut heart, _stone) = Heart::new();

        let handle = spawn(async move { heart.death().await });
        sleep(Duration::from_millis(50)).await;
        yield_now().await;

        assert!(!poll!(handle).is_ready());
    }

    #[tokio::test]
    async fn die_when_killed() {
        let (mut heart, stone) = Heart::new();

        let handle = spawn(async move { heart.death().await });
        stone.kill("Testing").await;

        assert_eq!(
            handle.await.unwrap(),
            DeathReason::Killed("Testing".to_owned())
        );
    }

    #[tokio::test]
    async fn die_when_every_stone_is_gone() {
        let (mut heart, stone) = Heart::new();
        drop(stone);

        assert_eq!(heart.death().await, DeathReason::Terminated);
    }
}
