//! Low-activity wait used when the write queue is found empty.
//!
//! The first empty-queue wait of a run is a one-shot idle turn; every later
//! wait is a one-shot timer. The switch is one-way for the rest of the run.

use std::pin::Pin;
use std::time::Duration;
use tokio::time::{Sleep, sleep};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Fired {
    /// The idle turn fired; progress should be broadcast once.
    Idle,
    /// The poll timer elapsed.
    Timer,
}

#[derive(Debug)]
enum Wait {
    Disarmed,
    Idle,
    Timer(Pin<Box<Sleep>>),
}

#[derive(Debug)]
pub(crate) struct Backoff {
    wait: Wait,
    idle_used: bool,
    interval: Duration,
}

impl Backoff {
    pub(crate) const fn new(interval: Duration) -> Self {
        Self { wait: Wait::Disarmed, idle_used: false, interval }
    }

    /// Arms the next wait. Re-arming replaces a pending one.
    pub(crate) fn arm(&mut self) {
        self.wait = if self.idle_used {
            Wait::Timer(Box::pin(sleep(self.interval)))
        } else {
            Wait::Idle
        };
    }

    pub(crate) fn disarm(&mut self) {
        self.wait = Wait::Disarmed;
    }

    pub(crate) const fn is_armed(&self) -> bool {
        !matches!(self.wait, Wait::Disarmed)
    }

    pub(crate) const fn uses_timer(&self) -> bool {
        self.idle_used
    }

    /// Resolves when the armed wait fires. Never resolves while disarmed.
    pub(crate) async fn fired(&mut self) -> Fired {
        match &mut self.wait {
            Wait::Disarmed => std::future::pending().await,
            Wait::Idle => {
                tokio::task::yield_now().await;
                Fired::Idle
            },
            Wait::Timer(timer) => {
                timer.as_mut().await;
                Fired::Timer
            },
        }
    }

    /// Consumes a firing. The first idle firing flips the policy to the timer.
    pub(crate) fn acknowledge(&mut self, fired: Fired) {
        self.wait = Wait::Disarmed;
        if fired == Fired::Idle {
            self.idle_used = true;
        }
    }
}
