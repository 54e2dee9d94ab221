//! Presence-based lifecycle control
//!
//! Decides when the bridge has no remaining purpose. The presence policy
//! samples the session's peer set on a fixed tick and only terminates after
//! several consecutive empty samples, so a peer reconnecting inside the
//! window does not tear the session down.

use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::transport::Transport;

/// When the bridge should stop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecyclePolicy {
    /// Sample peers every `interval`, stop after `absent_threshold` empty samples in a row
    Presence {
        interval: Duration,
        absent_threshold: u32,
    },
    /// Stop after a fixed wall-clock run time
    FixedDuration(Duration),
}

impl Default for LifecyclePolicy {
    fn default() -> Self {
        Self::Presence {
            interval: Duration::from_secs(1),
            absent_threshold: 3,
        }
    }
}

/// Lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LifecycleState {
    /// Peers present (or not yet sampled)
    #[default]
    Active,
    /// Consecutive empty samples seen so far
    Draining(u32),
    /// Shutdown has been decided
    Terminated,
}

/// Why the lifecycle controller stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownReason {
    /// No remote peers for the configured number of samples
    PeersGone,
    /// Fixed run time elapsed
    DeadlineReached,
    /// Someone else cancelled the bridge (Ctrl-C, failing pipeline)
    Cancelled,
}

impl std::fmt::Display for ShutdownReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ShutdownReason::PeersGone => write!(f, "no remote participants"),
            ShutdownReason::DeadlineReached => write!(f, "run time elapsed"),
            ShutdownReason::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Hysteresis counter over peer snapshots
#[derive(Debug, Clone)]
pub struct PresenceTracker {
    state: LifecycleState,
    absent_threshold: u32,
}

impl PresenceTracker {
    pub fn new(absent_threshold: u32) -> Self {
        Self {
            state: LifecycleState::Active,
            absent_threshold: absent_threshold.max(1),
        }
    }

    pub fn state(&self) -> LifecycleState {
        self.state
    }

    /// Feed one sample; `Terminated` is sticky
    pub fn observe(&mut self, peers_present: bool) -> LifecycleState {
        self.state = match self.state {
            LifecycleState::Terminated => LifecycleState::Terminated,
            _ if peers_present => LifecycleState::Active,
            LifecycleState::Active => self.absent(1),
            LifecycleState::Draining(count) => self.absent(count + 1),
        };
        self.state
    }

    fn absent(&self, count: u32) -> LifecycleState {
        if count >= self.absent_threshold {
            LifecycleState::Terminated
        } else {
            LifecycleState::Draining(count)
        }
    }
}

/// Run the lifecycle policy until it decides to stop or `shutdown` fires
///
/// On its own decision the controller cancels `shutdown` itself, which is
/// the signal the bridge waits on to begin teardown.
pub async fn run_lifecycle(
    policy: LifecyclePolicy,
    transport: &dyn Transport,
    shutdown: CancellationToken,
) -> ShutdownReason {
    let reason = match policy {
        LifecyclePolicy::Presence {
            interval,
            absent_threshold,
        } => watch_presence(interval, absent_threshold, transport, &shutdown).await,
        LifecyclePolicy::FixedDuration(duration) => {
            info!("Bridge will run for {:?}", duration);
            tokio::select! {
                _ = shutdown.cancelled() => ShutdownReason::Cancelled,
                _ = tokio::time::sleep(duration) => ShutdownReason::DeadlineReached,
            }
        }
    };

    if reason != ShutdownReason::Cancelled {
        info!("Lifecycle controller requesting shutdown: {}", reason);
        shutdown.cancel();
    }
    reason
}

async fn watch_presence(
    interval: Duration,
    absent_threshold: u32,
    transport: &dyn Transport,
    shutdown: &CancellationToken,
) -> ShutdownReason {
    let mut tracker = PresenceTracker::new(absent_threshold);
    // interval_at panics on a zero period
    let interval = interval.max(Duration::from_millis(1));
    let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => return ShutdownReason::Cancelled,
            _ = ticker.tick() => {}
        }

        let snapshot = match transport.list_peers().await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                warn!("Failed to sample peers: {}", e);
                continue;
            }
        };

        let previous = tracker.state();
        match tracker.observe(!snapshot.is_empty()) {
            LifecycleState::Terminated => {
                info!(
                    "No remote participants for {} consecutive samples, exiting",
                    absent_threshold
                );
                return ShutdownReason::PeersGone;
            }
            LifecycleState::Draining(count) => {
                debug!("No remote participants ({}/{})", count, absent_threshold);
            }
            LifecycleState::Active => {
                if previous != LifecycleState::Active {
                    info!("Remote participants back: {:?}", snapshot);
                }
            }
        }
    }
}
