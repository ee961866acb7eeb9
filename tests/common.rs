#![allow(unused)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Once};
use std::time::Duration;

use async_trait::async_trait;
use loopcall::error::EndpointError;
use loopcall::{CandidateSender, Endpoint, EndpointFactory, IceCandidate, IceConfig};
use loopcall::{SdpType, SessionDescription, SignalingState, StatsReport, StatsSnapshot};
use parking_lot::Mutex;
use tokio::sync::oneshot;

pub const OFFER_SDP: &str = "v=0\r\n\
    o=- 4611731400430051336 2 IN IP4 127.0.0.1\r\n\
    s=-\r\n\
    t=0 0\r\n\
    a=group:BUNDLE audio video\r\n\
    m=audio 1 UDP/TLS/RTP/SAVPF 111\r\n\
    a=mid:audio\r\n\
    a=rtpmap:111 opus/48000/2\r\n\
    m=video 1 UDP/TLS/RTP/SAVPF 100 116 117\r\n\
    a=mid:video\r\n\
    a=rtpmap:100 VP8/90000\r\n\
    a=rtpmap:116 red/90000\r\n\
    a=rtpmap:117 ulpfec/90000\r\n";

pub const ANSWER_SDP: &str = "v=0\r\n\
    o=- 1 2 IN IP4 127.0.0.1\r\n\
    s=-\r\n\
    t=0 0\r\n\
    a=group:BUNDLE audio video\r\n\
    m=audio 9 UDP/TLS/RTP/SAVPF 111\r\n\
    a=mid:audio\r\n\
    a=rtpmap:111 opus/48000/2\r\n\
    m=video 9 UDP/TLS/RTP/SAVPF 100\r\n\
    a=mid:video\r\n\
    a=rtpmap:100 VP8/90000\r\n";

pub const HOST: &str = "candidate:1 1 udp 2130706431 192.168.1.10 50000 typ host";
pub const SRFLX: &str =
    "candidate:2 1 udp 1694498815 203.0.113.7 50001 typ srflx raddr 192.168.1.10 rport 50000";
pub const RELAY: &str =
    "candidate:3 1 udp 16777215 198.51.100.9 3478 typ relay raddr 203.0.113.7 rport 50001";

/// Calls made on the endpoints of a call, in order, i.e. `"A create_offer"`.
pub type Journal = Arc<Mutex<Vec<String>>>;

/// Endpoint driven by the tests.
pub struct MockEndpoint {
    name: &'static str,
    journal: Journal,
    signaling: Mutex<SignalingState>,
    local: Mutex<Option<SessionDescription>>,
    remote: Mutex<Option<SessionDescription>>,
    candidate_tx: Mutex<Option<CandidateSender>>,
    received: Mutex<Vec<IceCandidate>>,
    offer_gate: Mutex<Option<oneshot::Receiver<()>>>,
    fail_answer: bool,
    unreliable_stats: bool,
    close_after_stats: Option<usize>,
    stats_calls: AtomicUsize,
    closed: AtomicBool,
}

impl MockEndpoint {
    pub fn new(name: &'static str, journal: Journal) -> Self {
        MockEndpoint {
            name,
            journal,
            signaling: Mutex::new(SignalingState::Stable),
            local: Mutex::new(None),
            remote: Mutex::new(None),
            candidate_tx: Mutex::new(None),
            received: Mutex::new(Vec::new()),
            offer_gate: Mutex::new(None),
            fail_answer: false,
            unreliable_stats: false,
            close_after_stats: None,
            stats_calls: AtomicUsize::new(0),
            closed: AtomicBool::new(false),
        }
    }

    /// `create_offer` doesn't complete until the returned sender fires (or is dropped).
    pub fn gate_offer(&self) -> oneshot::Sender<()> {
        let (tx, rx) = oneshot::channel();
        *self.offer_gate.lock() = Some(rx);
        tx
    }

    pub fn failing_answer(mut self) -> Self {
        self.fail_answer = true;
        self
    }

    pub fn unreliable_stats(mut self) -> Self {
        self.unreliable_stats = true;
        self
    }

    /// Close the endpoint when the n-th stats request completes.
    pub fn close_after_stats(mut self, n: usize) -> Self {
        self.close_after_stats = Some(n);
        self
    }

    /// Report a gathered candidate. Returns false if nobody listens.
    pub fn emit_candidate(&self, text: &str) -> bool {
        self.emit(Some(IceCandidate::new(text).with_mid("0", 0)))
    }

    /// Report that gathering is complete.
    pub fn emit_end_of_gathering(&self) -> bool {
        self.emit(None)
    }

    fn emit(&self, c: Option<IceCandidate>) -> bool {
        match &*self.candidate_tx.lock() {
            Some(tx) => tx.send(c).is_ok(),
            None => false,
        }
    }

    pub fn received(&self) -> Vec<String> {
        self.received
            .lock()
            .iter()
            .map(|c| c.candidate.clone())
            .collect()
    }

    pub fn local(&self) -> Option<SessionDescription> {
        self.local.lock().clone()
    }

    pub fn remote(&self) -> Option<SessionDescription> {
        self.remote.lock().clone()
    }

    pub fn stats_calls(&self) -> usize {
        self.stats_calls.load(Ordering::SeqCst)
    }

    /// Close from the endpoint's side, like a remote hangup.
    pub fn close_now(&self) {
        Endpoint::close(self);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn record(&self, what: &str) {
        self.journal.lock().push(format!("{} {}", self.name, what));
    }

    fn check_open(&self) -> Result<(), EndpointError> {
        if self.is_closed() {
            return Err(EndpointError::Closed);
        }
        Ok(())
    }
}

#[async_trait]
impl Endpoint for MockEndpoint {
    async fn create_offer(&self) -> Result<SessionDescription, EndpointError> {
        self.record("create_offer");
        let gate = self.offer_gate.lock().take();
        if let Some(gate) = gate {
            let _ = gate.await;
        }
        self.check_open()?;
        Ok(SessionDescription::offer(OFFER_SDP))
    }

    async fn create_answer(&self) -> Result<SessionDescription, EndpointError> {
        self.record("create_answer");
        self.check_open()?;
        if self.fail_answer {
            return Err(EndpointError::Failed("no codecs in common".into()));
        }
        let state = *self.signaling.lock();
        if state != SignalingState::HaveRemoteOffer {
            return Err(EndpointError::InvalidState(state));
        }
        Ok(SessionDescription::answer(ANSWER_SDP))
    }

    async fn set_local_description(&self, desc: SessionDescription) -> Result<(), EndpointError> {
        self.record(&format!("set_local {}", desc.kind));
        self.check_open()?;
        *self.signaling.lock() = match desc.kind {
            SdpType::Offer => SignalingState::HaveLocalOffer,
            _ => SignalingState::Stable,
        };
        *self.local.lock() = Some(desc);
        Ok(())
    }

    async fn set_remote_description(&self, desc: SessionDescription) -> Result<(), EndpointError> {
        self.record(&format!("set_remote {}", desc.kind));
        self.check_open()?;
        *self.signaling.lock() = match desc.kind {
            SdpType::Offer => SignalingState::HaveRemoteOffer,
            _ => SignalingState::Stable,
        };
        *self.remote.lock() = Some(desc);
        Ok(())
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<(), EndpointError> {
        self.check_open()?;
        self.received.lock().push(candidate);
        Ok(())
    }

    fn on_ice_candidate(&self, tx: CandidateSender) {
        *self.candidate_tx.lock() = Some(tx);
    }

    fn signaling_state(&self) -> SignalingState {
        if self.is_closed() {
            return SignalingState::Closed;
        }
        *self.signaling.lock()
    }

    async fn get_stats(&self) -> Result<StatsSnapshot, EndpointError> {
        self.check_open()?;
        let n = self.stats_calls.fetch_add(1, Ordering::SeqCst) + 1;

        if self.close_after_stats == Some(n) {
            self.closed.store(true, Ordering::SeqCst);
        }

        let report = StatsReport::new(format!("{}-{}", self.name, n), "peer-connection")
            .with_value("sample", n as u64);
        Ok(vec![report].into())
    }

    fn stats_unreliable(&self) -> bool {
        self.unreliable_stats
    }

    fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.record("close");
        }
    }
}

/// Hands out the given endpoints in order, A first.
pub struct PairFactory {
    endpoints: Mutex<VecDeque<Arc<MockEndpoint>>>,
    pub ice_configs: Mutex<Vec<IceConfig>>,
}

impl PairFactory {
    pub fn new(a: Arc<MockEndpoint>, b: Arc<MockEndpoint>) -> Self {
        PairFactory {
            endpoints: Mutex::new(VecDeque::from([a, b])),
            ice_configs: Mutex::new(Vec::new()),
        }
    }
}

impl EndpointFactory for PairFactory {
    fn create(&self, ice_config: &IceConfig) -> Result<Arc<dyn Endpoint>, EndpointError> {
        self.ice_configs.lock().push(ice_config.clone());
        let next: Arc<dyn Endpoint> = self
            .endpoints
            .lock()
            .pop_front()
            .ok_or_else(|| EndpointError::Failed("no more endpoints".into()))?;
        Ok(next)
    }
}

/// A pair of plain endpoints sharing a journal.
pub fn mock_pair() -> (Arc<MockEndpoint>, Arc<MockEndpoint>, Journal) {
    let journal = Journal::default();
    let a = Arc::new(MockEndpoint::new("A", journal.clone()));
    let b = Arc::new(MockEndpoint::new("B", journal.clone()));
    (a, b, journal)
}

/// Wait until `cond` holds. Panics after 5 seconds.
pub async fn eventually(mut cond: impl FnMut() -> bool) {
    let wait = async {
        while !cond() {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    };
    tokio::time::timeout(Duration::from_secs(5), wait)
        .await
        .expect("condition not met in time");
}

pub fn init_log() {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug"));

    static START: Once = Once::new();

    START.call_once(|| {
        tracing_subscriber::registry()
            .with(fmt::layer())
            .with(env_filter)
            .init();
    });
}
