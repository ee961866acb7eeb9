use combine::error::StringStreamError;
use combine::parser::char::string;
use combine::parser::repeat::{many, sep_by, skip_until};
use combine::{attempt, satisfy, token, Parser, Stream};
use std::fmt;
use thiserror::Error;

/// Prefix that starts the candidate grammar.
const PREFIX: &str = "candidate:";

/// Positions of the fields after the prefix.
///
/// ```text
/// candidate:<foundation> <component> <protocol> <priority> <address> <port> typ <type> ...
///           0            1           2          3          4         5      6   7
/// ```
const PROTOCOL: usize = 2;
const ADDRESS: usize = 4;
const TYP: usize = 6;
const KIND: usize = 7;
const MIN_FIELDS: usize = KIND + 1;

/// Errors from parsing candidate text.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    /// Not a candidate but the marker that gathering is complete.
    #[error("end of candidates")]
    EndOfCandidates,

    /// The text does not contain `candidate:`.
    #[error("missing candidate: prefix")]
    MissingPrefix,

    /// The text ends before the candidate type.
    #[error("too few candidate fields: {found} (need {needed})")]
    TooFewFields {
        /// Number of fields after the prefix.
        found: usize,
        /// Number of fields required to reach the candidate type.
        needed: usize,
    },

    /// A fixed token of the grammar is not where it should be.
    #[error("candidate grammar: {0}")]
    Grammar(String),
}

/// Type of candidate, as named in the `typ` field.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CandidateKind {
    /// Host (local network interface)
    Host,
    /// Srflx (STUN)
    ServerReflexive,
    /// Prflx (Peer reflexive)
    PeerReflexive,
    /// Relay (TURN)
    Relayed,
    /// Any type we don't know about, kept verbatim.
    Other(String),
}

impl From<&str> for CandidateKind {
    fn from(s: &str) -> Self {
        match s {
            "host" => CandidateKind::Host,
            "srflx" => CandidateKind::ServerReflexive,
            "prflx" => CandidateKind::PeerReflexive,
            "relay" => CandidateKind::Relayed,
            _ => CandidateKind::Other(s.to_string()),
        }
    }
}

impl fmt::Display for CandidateKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let x = match self {
            CandidateKind::Host => "host",
            CandidateKind::ServerReflexive => "srflx",
            CandidateKind::PeerReflexive => "prflx",
            CandidateKind::Relayed => "relay",
            CandidateKind::Other(v) => v,
        };
        write!(f, "{x}")
    }
}

/// The parts of a candidate that filters look at.
///
/// This is derived from the raw candidate text for the duration of one filter
/// evaluation. The raw text is what gets forwarded to the other endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedCandidate {
    kind: CandidateKind,
    protocol: String,
    address: String,
}

impl ParsedCandidate {
    /// Creates a parsed candidate from its parts.
    pub fn new(kind: CandidateKind, protocol: impl Into<String>, address: impl Into<String>) -> Self {
        ParsedCandidate {
            kind,
            protocol: protocol.into(),
            address: address.into(),
        }
    }

    /// Type of the candidate (host/srflx/prflx/relay).
    pub fn kind(&self) -> &CandidateKind {
        &self.kind
    }

    /// Transport protocol as written in the candidate, i.e. `udp` or `tcp`.
    pub fn protocol(&self) -> &str {
        &self.protocol
    }

    /// Connection address as written in the candidate.
    ///
    /// This is not necessarily an IP, browsers hide host addresses behind mDNS names.
    pub fn address(&self) -> &str {
        &self.address
    }

    /// Whether the address is an IPv6 address.
    pub fn is_ipv6(&self) -> bool {
        self.address.contains(':')
    }
}

impl fmt::Display for ParsedCandidate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.kind, self.protocol, self.address)
    }
}

/// Parse candidate text into a [`ParsedCandidate`].
///
/// Everything up to and including the first `candidate:` is skipped, so both
/// `candidate:...` and `a=candidate:...` work. The fields are then picked by
/// position, the grammar being
///
/// ```text
/// candidate:<foundation> <component> <protocol> <priority> <address> <port> typ <type> ...
/// ```
///
/// Fields are separated by single spaces and the text ends at the first line end.
pub fn parse_candidate(text: &str) -> Result<ParsedCandidate, ParseError> {
    let trimmed = text.trim();
    if trimmed.is_empty() || trimmed.ends_with("end-of-candidates") {
        return Err(ParseError::EndOfCandidates);
    }

    let (fields, _) = candidate_fields()
        .parse(text)
        .map_err(|_: StringStreamError| ParseError::MissingPrefix)?;

    if fields.len() < MIN_FIELDS {
        return Err(ParseError::TooFewFields {
            found: fields.len(),
            needed: MIN_FIELDS,
        });
    }

    if fields[TYP] != "typ" {
        return Err(ParseError::Grammar(format!(
            "expected 'typ' at field {}, got '{}'",
            TYP, fields[TYP]
        )));
    }

    Ok(ParsedCandidate {
        kind: fields[KIND].as_str().into(),
        protocol: fields[PROTOCOL].clone(),
        address: fields[ADDRESS].clone(),
    })
}

/// Parser for the space separated fields following the candidate prefix.
fn candidate_fields<Input>() -> impl Parser<Input, Output = Vec<String>>
where
    Input: Stream<Token = char>,
    Input::Error: combine::ParseError<Input::Token, Input::Range, Input::Position>,
{
    (
        skip_until(attempt(string(PREFIX))),
        string(PREFIX),
        sep_by(field(), token(' ')),
    )
        .map(|(_, _, fields)| fields)
}

/// Possibly empty field. Not SP, \r or \n
fn field<Input>() -> impl Parser<Input, Output = String>
where
    Input: Stream<Token = char>,
    Input::Error: combine::ParseError<Input::Token, Input::Range, Input::Position>,
{
    many(satisfy(|c| c != ' ' && c != '\r' && c != '\n'))
}
