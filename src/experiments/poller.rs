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
//! Polls all receivers of a trial for evidence that the message arrived.

use std::{collections::BTreeMap, sync::Arc, time::Duration};

use tokio::time::Instant;

use crate::{
    remote::{broadcast_command, Participant, RemoteExecutor},
    topology::NodeId,
};

/// Result of waiting for a trial to complete.
#[derive(Debug, Clone, PartialEq)]
pub struct PollOutcome {
    pub success: bool,
    pub elapsed: Duration,
    /// Latest answer of every receiver.
    pub receipts: BTreeMap<NodeId, bool>,
}

impl PollOutcome {
    pub fn num_confirmed(&self) -> usize {
        self.receipts.values().filter(|x| **x).count()
    }
}

pub struct CompletionPoller {
    executor: Arc<dyn RemoteExecutor>,
    interval: Duration,
}

impl CompletionPoller {
    pub fn new(executor: Arc<dyn RemoteExecutor>, interval: Duration) -> Self {
        Self { executor, interval }
    }

    /// Sleep for one interval, then ask every participant except `sender` in parallel whether
    /// `probe` succeeds. Repeat until all of them confirm, or until `timeout` has elapsed.
    pub async fn await_completion(
        &self,
        trial_name: &str,
        probe: &str,
        participants: &[Participant],
        sender: NodeId,
        timeout: Duration,
    ) -> PollOutcome {
        let receivers = participants
            .iter()
            .filter(|p| p.node != sender)
            .cloned()
            .collect::<Vec<_>>();
        let mut receipts: BTreeMap<NodeId, bool> =
            receivers.iter().map(|p| (p.node, false)).collect();

        let start = Instant::now();
        let mut success = false;
        while !success && start.elapsed() < timeout {
            tokio::time::sleep(self.interval).await;

            for (node, result) in
                broadcast_command(&self.executor, &receivers, |_| probe.to_string()).await
            {
                let received = match result {
                    Ok(0) => true,
                    Ok(_) => false,
                    Err(e) => {
                        log::debug!("[node{node}] receipt query failed: {e}");
                        false
                    }
                };
                receipts.insert(node, received);
            }
            success = receipts.values().all(|x| *x);
            log::debug!(
                "{trial_name}: {}/{} nodes received the message after {:.0?}",
                receipts.values().filter(|x| **x).count(),
                receipts.len(),
                start.elapsed()
            );
        }

        PollOutcome {
            success,
            elapsed: start.elapsed(),
            receipts,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::remote::test::{participants, MockExecutor};

    #[tokio::test(start_paused = true)]
    async fn succeeds_at_next_poll() {
        let start = Instant::now();
        let executor = Arc::new(MockExecutor::new(move |_, _| {
            Ok(if start.elapsed() >= Duration::from_secs(12) { 0 } else { 2 })
        }));
        let poller = CompletionPoller::new(executor.clone(), Duration::from_secs(5));
        let outcome = poller
            .await_completion("msg_1_0", "ls data/msg_1_0", &participants(4), 1, Duration::from_secs(25))
            .await;
        assert!(outcome.success);
        assert!(outcome.elapsed >= Duration::from_secs(15));
        assert!(outcome.elapsed < Duration::from_secs(17));
        assert_eq!(outcome.receipts.keys().copied().collect::<Vec<_>>(), [2, 3, 4]);
        // the sender is never asked
        assert!(executor.commands_on("host1").is_empty());
        assert_eq!(executor.commands_on("host2").len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn one_missing_node_times_out() {
        let executor = Arc::new(MockExecutor::new(|host, _| Ok(if host == "host3" { 2 } else { 0 })));
        let poller = CompletionPoller::new(executor, Duration::from_secs(5));
        let outcome = poller
            .await_completion("msg_2_0", "probe", &participants(3), 2, Duration::from_secs(25))
            .await;
        assert!(!outcome.success);
        assert!(outcome.elapsed >= Duration::from_secs(25));
        assert_eq!(outcome.num_confirmed(), 1);
        assert!(!outcome.receipts[&3]);
    }
}
