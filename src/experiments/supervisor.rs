// RadioSweep: Parameter Sweeps and Result Consolidation for Emulated Radio Networks
// Copyright (C) 2024-2025 Roland Schmid <roschmi@ethz.ch> and Tibor Schneider <sctibor@ethz.ch>
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program.  If not, see <http://www.gnu.org/licenses/>.
//! Retry and escalation policy around the trials of a sweep.

use std::future::Future;

use async_trait::async_trait;

use super::runner::TrialError;
use crate::remote::Stopper;

/// Result of a trial that ran to the end.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
pub enum TrialStatus {
    /// The trial succeeded and the sweep moved on to the next parameter vector.
    Advanced,
    /// The trial succeeded and it was the last one of the sweep.
    SweepComplete,
    /// The trial failed. The same parameter vector must be retried.
    Failed,
}

/// A sweep that can be executed one trial at a time.
#[async_trait]
pub trait Trial: Send {
    /// Prepare the fleet from scratch.
    async fn setup(&mut self) -> Result<(), TrialError>;

    /// Execute the trial of the current parameter vector.
    async fn run(&mut self) -> Result<TrialStatus, TrialError>;

    /// Handle to stop every participant.
    fn stopper(&self) -> Stopper;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorStep {
    Continue,
    Resetup,
    Complete,
}

#[derive(Debug, thiserror::Error)]
pub enum SweepError {
    #[error("The sweep was interrupted")]
    Interrupted,
    #[error("Cannot set up the fleet: {0}")]
    Setup(TrialError),
}

pub struct FailureSupervisor<T> {
    trial: T,
    consecutive_failures: usize,
    threshold: usize,
    resetups: usize,
}

impl<T: Trial> FailureSupervisor<T> {
    pub fn new(trial: T, threshold: usize) -> Self {
        Self {
            trial,
            consecutive_failures: 0,
            threshold: threshold.max(1),
            resetups: 0,
        }
    }

    pub fn consecutive_failures(&self) -> usize {
        self.consecutive_failures
    }

    pub fn resetups(&self) -> usize {
        self.resetups
    }

    pub fn trial(&self) -> &T {
        &self.trial
    }

    pub fn into_inner(self) -> T {
        self.trial
    }

    /// Run a single trial and apply the failure policy. After `threshold` consecutive failures,
    /// the fleet is set up again and the counter starts over. A failing re-setup counts as yet
    /// another failure.
    pub async fn run_once(&mut self) -> SupervisorStep {
        let status = match self.trial.run().await {
            Ok(status) => status,
            Err(e) => {
                log::error!("Trial failed: {e}");
                TrialStatus::Failed
            }
        };
        match status {
            TrialStatus::Advanced => {
                self.consecutive_failures = 0;
                SupervisorStep::Continue
            }
            TrialStatus::SweepComplete => {
                self.consecutive_failures = 0;
                SupervisorStep::Complete
            }
            TrialStatus::Failed => {
                self.consecutive_failures += 1;
                if self.consecutive_failures < self.threshold {
                    log::info!(
                        "Retrying the same parameters ({}/{} failures in a row)",
                        self.consecutive_failures,
                        self.threshold
                    );
                    return SupervisorStep::Continue;
                }
                log::warn!(
                    "{} failures in a row, setting up the fleet again",
                    self.consecutive_failures
                );
                self.consecutive_failures = 0;
                self.resetups += 1;
                if let Err(e) = self.trial.setup().await {
                    log::error!("Re-setup failed: {e}");
                    self.consecutive_failures = 1;
                }
                SupervisorStep::Resetup
            }
        }
    }

    /// Set up the fleet and run trials until the sweep is complete, or until `interrupt`
    /// resolves. The initial setup is attempted up to `threshold` times. On interrupt, all
    /// participants are stopped before returning.
    pub async fn run_until<F>(&mut self, interrupt: F) -> Result<(), SweepError>
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(interrupt);
        let stopper = self.trial.stopper();

        let mut attempts = 0;
        loop {
            let setup = tokio::select! {
                r = self.trial.setup() => Some(r),
                _ = &mut interrupt => None,
            };
            match setup {
                Some(Ok(())) => break,
                Some(Err(e)) => {
                    attempts += 1;
                    if attempts >= self.threshold {
                        return Err(SweepError::Setup(e));
                    }
                    log::warn!("Setup failed ({attempts}/{} attempts): {e}", self.threshold);
                }
                None => {
                    log::warn!("Interrupted during setup, stopping all nodes");
                    stopper.stop_all().await;
                    return Err(SweepError::Interrupted);
                }
            }
        }

        loop {
            let step = tokio::select! {
                step = self.run_once() => Some(step),
                _ = &mut interrupt => None,
            };
            match step {
                Some(SupervisorStep::Complete) => {
                    log::info!("Sweep complete");
                    return Ok(());
                }
                Some(_) => {}
                None => {
                    log::warn!("Interrupted, stopping all nodes");
                    stopper.stop_all().await;
                    return Err(SweepError::Interrupted);
                }
            }
        }
    }

    /// Like [`Self::run_until`], interrupted by Ctrl-C.
    pub async fn run(&mut self) -> Result<(), SweepError> {
        self.run_until(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                log::error!("Cannot listen for Ctrl-C: {e}");
                std::future::pending::<()>().await;
            }
        })
        .await
    }
}
