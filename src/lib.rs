//! Drive and observe a WebRTC offer/answer negotiation between two endpoints.
//!
//! A [`Call`] owns two endpoints, `A` (the offerer) and `B` (the answerer). It runs the
//! handshake between them, relays ICE candidates through a pluggable [`CandidateFilter`],
//! and can mutate the negotiated session descriptions on the way (removing video FEC
//! from the offer, capping the video bitrate in the answer).
//!
//! The endpoints themselves are not part of this crate. Anything that can create
//! offers/answers, accept descriptions and candidates, and report stats can be driven
//! by implementing [`Endpoint`]. This makes the crate useful as a test harness for a
//! peer connection implementation: wire up two instances, restrict the candidate types
//! that may pass, and check whether they still manage to connect.
//!
//! # Usage
//!
//! ```no_run
//! # use loopcall::{Call, CallConfig, CandidateFilter, EndpointFactory, Settings};
//! # use loopcall::{resolve_relay_config, TracingSink};
//! # use std::time::Duration;
//! # async fn run() -> Result<(), loopcall::CallError> {
//! // Something that creates peer connections from an ICE configuration.
//! let factory: Box<dyn EndpointFactory> = todo!();
//!
//! // Resolve TURN servers, falling back to the defaults.
//! let ice_config = resolve_relay_config(&Settings::default(), &TracingSink).await;
//!
//! let config = CallConfig::new().set_ice_config(ice_config);
//! let call = Call::new(config, &*factory)?;
//!
//! // Only let relayed candidates through. This forces the connection over TURN.
//! call.set_ice_candidate_filter(CandidateFilter::relay_only());
//! call.constrain_video_bitrate(500);
//!
//! call.establish_connection().await?;
//!
//! // Sample stats from the offerer until it closes.
//! call.gather_stats(loopcall::Side::A, Duration::from_millis(100), |stats| {
//!     println!("collected {} samples", stats.len());
//! });
//!
//! call.close();
//! # Ok(())
//! # }
//! ```
//!
//! # Handshake
//!
//! [`Call::establish_connection()`] performs these steps in strict order:
//!
//! 1. `A` creates an offer. If [`Call::disable_video_fec()`] was called, the FEC
//!    payload types are stripped from the offer text.
//! 2. The offer is set as `A`'s local description, then as `B`'s remote description.
//! 3. `B` creates an answer. The call is now [`CallState::Answered`]. If
//!    [`Call::constrain_video_bitrate()`] was called, a `b=AS` line is added to the
//!    video section of the answer.
//! 4. The answer is set as `B`'s local description, then as `A`'s remote description.
//!    The call is now [`CallState::Connected`].
//!
//! Any failure is fatal. There are no retries, the error is returned as a
//! [`NegotiationError`][error::NegotiationError] naming the failed step.
//!
//! # Candidates
//!
//! Candidates are relayed independently of the handshake. Each candidate event is
//! parsed with [`parse_candidate()`]; unparseable candidates (such as the
//! end-of-candidates marker) are dropped. Candidates the active filter accepts are
//! forwarded unchanged to the other endpoint.
//!
//! # Closing
//!
//! [`Call::close()`] is the only cancellation primitive. It closes both endpoints and
//! turns every pending or later callback into a no-op.

#![forbid(unsafe_code)]
#![allow(clippy::new_without_default)]
#![warn(missing_docs)]

#[macro_use]
extern crate tracing;

use thiserror::Error;

mod candidate;
pub use candidate::{parse_candidate, CandidateKind, ParsedCandidate};

pub mod filter;
pub use filter::CandidateFilter;

pub mod sdp;
pub use sdp::{Munging, SdpType, SessionDescription};

mod endpoint;
pub use endpoint::{CandidateSender, Endpoint, EndpointFactory, IceCandidate, SignalingState};

pub mod stats;
pub use stats::{PollerState, StatsCollection, StatsPoller, StatsReport, StatsSnapshot};

mod config;
pub use config::{reflector_config, relay_config, resolve_reflector_config, resolve_relay_config};
pub use config::{default_reflector_config, default_relay_config};
pub use config::{CallConfig, IceConfig, IceServer, Settings};

mod trace;
pub use trace::{RecordingSink, TraceSink, TracingSink};

mod call;
pub use call::{Call, CallState, Side};

/// Various error types.
pub mod error {
    pub use crate::call::{NegotiationError, NegotiationStep};
    pub use crate::candidate::ParseError;
    pub use crate::config::ConfigError;
    pub use crate::endpoint::EndpointError;
}

/// Errors for the whole call orchestration.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum CallError {
    /// A step of the offer/answer handshake failed. The call is not usable afterwards.
    #[error("{0}")]
    Negotiation(#[from] error::NegotiationError),

    /// An endpoint could not be created or failed outside the handshake.
    #[error("{0}")]
    Endpoint(#[from] error::EndpointError),

    /// The operation is not allowed in the current state of the call.
    ///
    /// This is what a second [`Call::establish_connection()`] gets while the first
    /// one is still in flight.
    #[error("Operation not allowed when call is {0}")]
    InvalidState(CallState),

    /// The call was closed while the operation was pending.
    #[error("Call closed")]
    Closed,

    /// [`Call::new()`] was invoked outside of a tokio runtime.
    #[error("No tokio runtime available")]
    NoRuntime,
}
