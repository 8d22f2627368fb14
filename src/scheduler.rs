//! SchedulerActor - triggers evaluation passes
//!
//! ## Message Flow
//!
//! ```text
//! Timer tick ───────────┐
//!                       ├─▶ Monitor::run_pass ─▶ PassSummary
//! RunNow (HTTP /check) ─┘
//!     ↑
//!     └─── Commands (RunNow, Shutdown)
//! ```
//!
//! Triggers are handled one at a time: a manual trigger that arrives during a
//! scheduled pass waits for it and then runs its own pass.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::sync::{mpsc, oneshot};
use tokio::time::{Interval, MissedTickBehavior, interval};
use tracing::{debug, info, instrument, warn};

use crate::engine::{Monitor, PassSummary};

#[derive(Debug)]
pub enum SchedulerCommand {
    /// Run a pass immediately, regardless of the interval timer
    RunNow {
        respond_to: oneshot::Sender<PassSummary>,
    },

    /// Stop after the pass in flight (if any)
    Shutdown,
}

pub struct SchedulerActor {
    monitor: Arc<Monitor>,
    command_rx: mpsc::Receiver<SchedulerCommand>,
    /// `None` runs passes on command only
    period: Option<Duration>,
}

impl SchedulerActor {
    pub fn new(
        monitor: Arc<Monitor>,
        command_rx: mpsc::Receiver<SchedulerCommand>,
        period: Option<Duration>,
    ) -> Self {
        Self {
            monitor,
            command_rx,
            period,
        }
    }

    #[instrument(skip(self))]
    pub async fn run(mut self) {
        debug!("starting scheduler actor");

        let mut ticker = self.period.map(|period| {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker
        });

        loop {
            tokio::select! {
                _ = next_tick(&mut ticker) => {
                    let summary = self.monitor.run_pass().await;
                    if let Some(reason) = &summary.aborted {
                        warn!("scheduled pass aborted: {reason}");
                    }
                }

                cmd = self.command_rx.recv() => {
                    match cmd {
                        Some(SchedulerCommand::RunNow { respond_to }) => {
                            debug!("received RunNow command");
                            let summary = self.monitor.run_pass().await;
                            let _ = respond_to.send(summary);
                        }

                        Some(SchedulerCommand::Shutdown) => {
                            debug!("received shutdown command");
                            break;
                        }

                        None => {
                            warn!("command channel closed, shutting down");
                            break;
                        }
                    }
                }
            }
        }

        info!("scheduler stopped");
    }
}

async fn next_tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(ticker) => {
            ticker.tick().await;
        }
        None => std::future::pending().await,
    }
}

#[derive(Debug, Clone)]
pub struct SchedulerHandle {
    sender: mpsc::Sender<SchedulerCommand>,
}

impl SchedulerHandle {
    pub fn spawn(monitor: Arc<Monitor>, period: Option<Duration>) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::channel(32);
        let actor = SchedulerActor::new(monitor, cmd_rx, period);
        tokio::spawn(actor.run());
        Self { sender: cmd_tx }
    }

    /// Trigger a pass and wait for its summary
    pub async fn run_now(&self) -> Result<PassSummary> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(SchedulerCommand::RunNow { respond_to: tx })
            .await
            .context("failed to send RunNow command")?;

        rx.await.context("failed to receive pass summary")
    }

    pub async fn shutdown(&self) -> Result<()> {
        self.sender
            .send(SchedulerCommand::Shutdown)
            .await
            .context("failed to send Shutdown command")?;
        Ok(())
    }
}
