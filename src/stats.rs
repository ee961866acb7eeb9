//! Statistics sampling.
//!
//! Stats are polled from an [`Endpoint`] at a fixed interval until the endpoint
//! closes. Every report of every snapshot is kept together with the wall-clock time
//! it was collected at.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::{Endpoint, SignalingState};

/// A single stats report, as in one entry of an `RTCStatsReport`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatsReport {
    /// Report id, unique within a snapshot.
    pub id: String,
    /// Report type, i.e. `inbound-rtp` or `candidate-pair`.
    #[serde(rename = "type")]
    pub kind: String,
    /// Timestamp (ms) reported by the endpoint.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<f64>,
    /// Every other field of the report.
    #[serde(flatten)]
    pub values: BTreeMap<String, Value>,
}

impl StatsReport {
    /// Report without values.
    pub fn new(id: impl Into<String>, kind: impl Into<String>) -> Self {
        StatsReport {
            id: id.into(),
            kind: kind.into(),
            timestamp: None,
            values: BTreeMap::new(),
        }
    }

    /// Adds a value.
    pub fn with_value(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.values.insert(key.into(), value.into());
        self
    }

    /// Get a value by name.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }
}

/// The reports returned by one stats request.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StatsSnapshot {
    /// The reports in the order the endpoint returned them.
    pub reports: Vec<StatsReport>,
}

impl From<Vec<StatsReport>> for StatsSnapshot {
    fn from(reports: Vec<StatsReport>) -> Self {
        StatsSnapshot { reports }
    }
}

/// Everything collected by a [`StatsPoller`].
///
/// `samples` and `timestamps` are parallel, one timestamp per report. Reports from the
/// same snapshot share a timestamp. Nothing is removed or reordered, so timestamps are
/// in collection order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StatsCollection {
    /// The collected reports.
    pub samples: Vec<StatsReport>,
    /// When each report was collected.
    pub timestamps: Vec<SystemTime>,
}

impl StatsCollection {
    fn push(&mut self, snapshot: StatsSnapshot, at: SystemTime) {
        for report in snapshot.reports {
            self.samples.push(report);
            self.timestamps.push(at);
        }
    }

    /// Number of collected reports.
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// Whether nothing was collected.
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Iterate reports with their timestamps.
    pub fn iter(&self) -> impl Iterator<Item = (&StatsReport, SystemTime)> + '_ {
        self.samples.iter().zip(self.timestamps.iter().copied())
    }
}

/// State of a [`StatsPoller`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollerState {
    /// Still sampling.
    Polling,
    /// The endpoint closed. Nothing more will be collected.
    Drained,
}

/// Repeatedly samples stats from one endpoint until it closes.
///
/// ```no_run
/// # use loopcall::{Endpoint, PollerState, StatsPoller};
/// # use std::sync::Arc;
/// # use std::time::Duration;
/// # async fn run(endpoint: Arc<dyn Endpoint>) {
/// let mut poller = StatsPoller::new(endpoint, Duration::from_secs(1));
/// let stats = poller.run().await;
/// assert_eq!(poller.state(), PollerState::Drained);
/// for (report, at) in stats.iter() {
///     println!("{:?} {} {}", at, report.kind, report.id);
/// }
/// # }
/// ```
pub struct StatsPoller {
    endpoint: Arc<dyn Endpoint>,
    interval: Duration,
    cancel: CancellationToken,
    state: PollerState,
    collected: StatsCollection,
}

impl StatsPoller {
    /// Creates a poller sampling `endpoint` every `interval`.
    pub fn new(endpoint: Arc<dyn Endpoint>, interval: Duration) -> Self {
        StatsPoller {
            endpoint,
            interval,
            cancel: CancellationToken::new(),
            state: PollerState::Polling,
            collected: StatsCollection::default(),
        }
    }

    /// Also stop when `cancel` fires.
    ///
    /// A cancelled poller behaves as if the endpoint closed.
    pub fn set_cancel_token(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Current state.
    pub fn state(&self) -> PollerState {
        self.state
    }

    fn check_drained(&mut self) -> bool {
        if self.state == PollerState::Drained {
            return true;
        }
        if self.cancel.is_cancelled() || self.endpoint.signaling_state() == SignalingState::Closed
        {
            trace!("Stats poller drained after {} samples", self.collected.len());
            self.state = PollerState::Drained;
        }
        self.state == PollerState::Drained
    }

    /// Poll until the endpoint closes and return what was collected.
    ///
    /// The poller is [`PollerState::Drained`] afterwards. Running it again returns an
    /// empty collection straight away.
    pub async fn run(&mut self) -> StatsCollection {
        loop {
            if self.check_drained() {
                break;
            }

            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {}
                _ = tokio::time::sleep(self.interval) => {}
            }

            // The endpoint may have closed while we slept.
            if self.check_drained() {
                break;
            }

            if self.endpoint.stats_unreliable() {
                continue;
            }

            let result = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => continue,
                r = self.endpoint.get_stats() => r,
            };

            match result {
                Ok(snapshot) => {
                    trace!("Stats sample with {} reports", snapshot.reports.len());
                    self.collected.push(snapshot, SystemTime::now());
                }
                Err(e) => {
                    debug!("Stats request failed: {}", e);
                }
            }
        }

        std::mem::take(&mut self.collected)
    }
}
