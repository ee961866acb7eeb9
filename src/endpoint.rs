use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc;

use crate::candidate::{parse_candidate, ParseError};
use crate::sdp::SessionDescription;
use crate::stats::StatsSnapshot;
use crate::{IceConfig, ParsedCandidate};

/// Errors reported by an [`Endpoint`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EndpointError {
    /// The endpoint was closed.
    #[error("Endpoint is closed")]
    Closed,

    /// The operation is not valid in the signaling state.
    #[error("Operation not allowed in signaling state {0}")]
    InvalidState(SignalingState),

    /// Anything else the implementation wants to report.
    #[error("{0}")]
    Failed(String),
}

/// Signaling state of an endpoint, as in `RTCSignalingState`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SignalingState {
    /// No offer/answer exchange in progress.
    Stable,
    /// A local offer has been applied.
    HaveLocalOffer,
    /// A remote offer has been applied.
    HaveRemoteOffer,
    /// A remote offer and a local provisional answer have been applied.
    HaveLocalPranswer,
    /// A local offer and a remote provisional answer have been applied.
    HaveRemotePranswer,
    /// The endpoint is closed.
    Closed,
}

impl fmt::Display for SignalingState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        use SignalingState::*;
        let x = match self {
            Stable => "stable",
            HaveLocalOffer => "have-local-offer",
            HaveRemoteOffer => "have-remote-offer",
            HaveLocalPranswer => "have-local-pranswer",
            HaveRemotePranswer => "have-remote-pranswer",
            Closed => "closed",
        };
        write!(f, "{x}")
    }
}

/// A candidate as handed out by the endpoint that gathered it.
///
/// The fields mirror `RTCIceCandidateInit`. The candidate text is opaque to the call
/// and forwarded verbatim; [`IceCandidate::parse()`] is only used to decide whether
/// to forward it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IceCandidate {
    /// The `candidate:...` line. Empty for the end-of-candidates marker.
    pub candidate: String,
    /// Media stream identification tag.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sdp_mid: Option<String>,
    /// Index of the m-line the candidate belongs to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sdp_m_line_index: Option<u16>,
    /// ICE username fragment.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username_fragment: Option<String>,
}

impl IceCandidate {
    /// Candidate with only the text set.
    pub fn new(candidate: impl Into<String>) -> Self {
        IceCandidate {
            candidate: candidate.into(),
            sdp_mid: None,
            sdp_m_line_index: None,
            username_fragment: None,
        }
    }

    /// Sets the mid and m-line index.
    pub fn with_mid(mut self, mid: impl Into<String>, m_line_index: u16) -> Self {
        self.sdp_mid = Some(mid.into());
        self.sdp_m_line_index = Some(m_line_index);
        self
    }

    /// Parse the candidate text.
    pub fn parse(&self) -> Result<ParsedCandidate, ParseError> {
        parse_candidate(&self.candidate)
    }
}

/// Channel an endpoint reports gathered candidates on.
///
/// `None` means gathering is complete. It is dropped like any other unforwardable
/// event, candidates sent after it are still relayed.
pub type CandidateSender = mpsc::UnboundedSender<Option<IceCandidate>>;

/// One side of a call.
///
/// This is the capability surface of a peer connection the call needs. Implementations
/// wrap whatever produces the SDP; a browser through some bridge, a native stack, or a
/// scripted mock in tests.
///
/// All methods take `&self`, implementations are expected to use interior mutability.
#[async_trait]
pub trait Endpoint: Send + Sync {
    /// Create an SDP offer.
    async fn create_offer(&self) -> Result<SessionDescription, EndpointError>;

    /// Create an SDP answer to the applied remote offer.
    async fn create_answer(&self) -> Result<SessionDescription, EndpointError>;

    /// Apply a local description.
    async fn set_local_description(&self, desc: SessionDescription) -> Result<(), EndpointError>;

    /// Apply a remote description.
    async fn set_remote_description(&self, desc: SessionDescription)
        -> Result<(), EndpointError>;

    /// Add a remote candidate.
    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<(), EndpointError>;

    /// Register where to send gathered candidates.
    ///
    /// Called once, right after the endpoint was created. Sending on a closed channel
    /// fails silently from the endpoint's point of view.
    fn on_ice_candidate(&self, tx: CandidateSender);

    /// Current signaling state.
    fn signaling_state(&self) -> SignalingState;

    /// Take a snapshot of the endpoint statistics.
    async fn get_stats(&self) -> Result<StatsSnapshot, EndpointError>;

    /// Whether [`Endpoint::get_stats()`] can't be trusted on this endpoint.
    ///
    /// Stats polling still runs on its schedule, but no requests are made.
    fn stats_unreliable(&self) -> bool {
        false
    }

    /// Close the endpoint. Must be idempotent.
    fn close(&self);
}

/// Creates the endpoints of a call.
pub trait EndpointFactory {
    /// Create a new endpoint with the given ICE configuration.
    fn create(&self, ice_config: &IceConfig) -> Result<Arc<dyn Endpoint>, EndpointError>;
}

impl<F> EndpointFactory for F
where
    F: Fn(&IceConfig) -> Result<Arc<dyn Endpoint>, EndpointError>,
{
    fn create(&self, ice_config: &IceConfig) -> Result<Arc<dyn Endpoint>, EndpointError> {
        (self)(ice_config)
    }
}
