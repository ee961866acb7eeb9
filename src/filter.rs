//! Candidate admission filters.
//!
//! A [`CandidateFilter`] decides which candidates are relayed to the other endpoint.
//! Filters are pure predicates over a [`ParsedCandidate`]. They are evaluated on the
//! relay task of a [`Call`][crate::Call] and must not block.

use std::borrow::Cow;
use std::fmt;
use std::sync::Arc;

use crate::{CandidateKind, ParsedCandidate};

/// Accepts every candidate.
pub fn no_filter(_: &ParsedCandidate) -> bool {
    true
}

/// Relayed (TURN) candidates.
pub fn is_relay(c: &ParsedCandidate) -> bool {
    *c.kind() == CandidateKind::Relayed
}

/// Server reflexive (STUN) candidates.
pub fn is_reflexive(c: &ParsedCandidate) -> bool {
    *c.kind() == CandidateKind::ServerReflexive
}

/// Host candidates.
pub fn is_host(c: &ParsedCandidate) -> bool {
    *c.kind() == CandidateKind::Host
}

/// Everything but host candidates.
pub fn is_not_host(c: &ParsedCandidate) -> bool {
    *c.kind() != CandidateKind::Host
}

/// Candidates with an IPv6 address.
pub fn is_ipv6(c: &ParsedCandidate) -> bool {
    c.is_ipv6()
}

type Predicate = dyn Fn(&ParsedCandidate) -> bool + Send + Sync;

/// A named predicate deciding whether a candidate is forwarded.
///
/// ```
/// # use loopcall::{CandidateFilter, parse_candidate};
/// let filter = CandidateFilter::relay_only();
///
/// let host = parse_candidate("candidate:1 1 udp 2130706431 10.0.0.1 5000 typ host").unwrap();
/// assert!(!filter.accepts(&host));
///
/// // Custom filters are closures.
/// let udp = CandidateFilter::new("udp-only", |c| c.protocol().eq_ignore_ascii_case("udp"));
/// assert!(udp.accepts(&host));
/// ```
#[derive(Clone)]
pub struct CandidateFilter {
    label: Cow<'static, str>,
    predicate: Arc<Predicate>,
}

impl CandidateFilter {
    /// Creates a filter from a label (used in logs) and a predicate.
    pub fn new<F>(label: impl Into<Cow<'static, str>>, predicate: F) -> Self
    where
        F: Fn(&ParsedCandidate) -> bool + Send + Sync + 'static,
    {
        CandidateFilter {
            label: label.into(),
            predicate: Arc::new(predicate),
        }
    }

    /// The default. Forwards everything.
    pub fn accept_all() -> Self {
        Self::new("accept-all", no_filter)
    }

    /// Only relayed candidates. Forces the connection through a TURN server.
    pub fn relay_only() -> Self {
        Self::new("relay-only", is_relay)
    }

    /// Only server reflexive candidates.
    pub fn reflexive_only() -> Self {
        Self::new("reflexive-only", is_reflexive)
    }

    /// Only host candidates.
    pub fn host_only() -> Self {
        Self::new("host-only", is_host)
    }

    /// Anything but host candidates.
    pub fn exclude_host() -> Self {
        Self::new("exclude-host", is_not_host)
    }

    /// Only IPv6 candidates.
    pub fn ipv6_only() -> Self {
        Self::new("ipv6-only", is_ipv6)
    }

    /// Label given when the filter was created.
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Evaluates the filter.
    pub fn accepts(&self, candidate: &ParsedCandidate) -> bool {
        (self.predicate)(candidate)
    }
}

impl Default for CandidateFilter {
    fn default() -> Self {
        Self::accept_all()
    }
}

impl fmt::Debug for CandidateFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CandidateFilter({})", self.label)
    }
}
