use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use serde_json::json;
use thiserror::Error;
use tokio::runtime::Handle;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, Span};

use crate::candidate::ParseError;
use crate::endpoint::EndpointError;
use crate::{CallConfig, CallError, CandidateFilter, Endpoint, EndpointFactory, IceCandidate};
use crate::{Munging, StatsCollection, StatsPoller, TraceSink};

/// The two endpoints of a call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Side {
    /// The offerer.
    A,
    /// The answerer.
    B,
}

impl Side {
    /// The other side.
    pub fn other(self) -> Side {
        match self {
            Side::A => Side::B,
            Side::B => Side::A,
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::A => write!(f, "A"),
            Side::B => write!(f, "B"),
        }
    }
}

/// State of a [`Call`].
///
/// ```text
/// idle -> offering -> answered -> connected
///             |           |
///             +-> failed <+
/// ```
///
/// `closed` is reachable from every state and is final.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CallState {
    /// Created, handshake not started.
    Idle,
    /// The offer is being created and applied.
    Offering,
    /// B created its answer.
    Answered,
    /// Both descriptions are applied on both sides.
    Connected,
    /// A handshake step failed.
    Failed,
    /// [`Call::close()`] was called.
    Closed,
}

impl fmt::Display for CallState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let x = match self {
            CallState::Idle => "idle",
            CallState::Offering => "offering",
            CallState::Answered => "answered",
            CallState::Connected => "connected",
            CallState::Failed => "failed",
            CallState::Closed => "closed",
        };
        write!(f, "{x}")
    }
}

/// The steps of the offer/answer handshake, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NegotiationStep {
    /// A creates the offer.
    CreateOffer,
    /// The offer is set as A's local description.
    SetLocalOffer,
    /// The offer is set as B's remote description.
    SetRemoteOffer,
    /// B creates the answer.
    CreateAnswer,
    /// The answer is set as B's local description.
    SetLocalAnswer,
    /// The answer is set as A's remote description.
    SetRemoteAnswer,
}

impl fmt::Display for NegotiationStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        use NegotiationStep::*;
        let x = match self {
            CreateOffer => "create offer",
            SetLocalOffer => "set local offer",
            SetRemoteOffer => "set remote offer",
            CreateAnswer => "create answer",
            SetLocalAnswer => "set local answer",
            SetRemoteAnswer => "set remote answer",
        };
        write!(f, "{x}")
    }
}

/// A handshake step failed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Negotiation failed to {step}: {source}")]
pub struct NegotiationError {
    /// The step that failed.
    pub step: NegotiationStep,
    /// What the endpoint reported.
    pub source: EndpointError,
}

#[derive(Default)]
struct Constraints {
    munging: Munging,
    offer_done: bool,
    answer_done: bool,
}

/// A call between two endpoints.
///
/// See the [crate documentation][crate] for an overview.
///
/// The call must be created inside a tokio runtime. Candidate relaying starts right
/// away in background tasks, independently of [`Call::establish_connection()`].
/// Dropping the call stops those tasks, but leaves the endpoints open.
pub struct Call {
    id: u64,
    span: Span,
    a: Arc<dyn Endpoint>,
    b: Arc<dyn Endpoint>,
    state: watch::Sender<CallState>,
    filter: Arc<RwLock<CandidateFilter>>,
    constraints: Mutex<Constraints>,
    cancel: CancellationToken,
    sink: Arc<dyn TraceSink>,
    runtime: Handle,
}

impl Call {
    /// Creates both endpoints and starts relaying candidates between them.
    ///
    /// Fails with [`CallError::NoRuntime`] outside a tokio runtime, and with
    /// [`CallError::Endpoint`] if the factory fails.
    pub fn new(config: CallConfig, factory: &dyn EndpointFactory) -> Result<Call, CallError> {
        let runtime = Handle::try_current().map_err(|_| CallError::NoRuntime)?;

        let id = fastrand::u64(..);
        let span = info_span!("call", id);
        let _enter = span.enter();

        let a = factory.create(config.ice_config())?;
        let b = match factory.create(config.ice_config()) {
            Ok(b) => b,
            Err(e) => {
                a.close();
                return Err(e.into());
            }
        };

        let (state, _) = watch::channel(CallState::Idle);
        let filter = Arc::new(RwLock::new(CandidateFilter::default()));
        let cancel = CancellationToken::new();

        for (from, source, target) in [(Side::A, &a, &b), (Side::B, &b, &a)] {
            let (tx, rx) = mpsc::unbounded_channel();
            source.on_ice_candidate(tx);

            let relay = Relay {
                from,
                target: target.clone(),
                filter: filter.clone(),
                cancel: cancel.clone(),
            };
            runtime.spawn(relay.run(rx).instrument(span.clone()));
        }

        let sink = config.trace_sink().clone();
        sink.emit("call", config.to_trace_payload());
        debug!("Call created");

        drop(_enter);

        Ok(Call {
            id,
            span,
            a,
            b,
            state,
            filter,
            constraints: Mutex::new(Constraints::default()),
            cancel,
            sink,
            runtime,
        })
    }

    /// Random id of this call, also recorded on the `call` span.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Current state.
    pub fn state(&self) -> CallState {
        *self.state.borrow()
    }

    /// Receive state changes.
    pub fn subscribe_state(&self) -> watch::Receiver<CallState> {
        self.state.subscribe()
    }

    /// The endpoint on `side`.
    pub fn endpoint(&self, side: Side) -> &dyn Endpoint {
        &**self.endpoint_arc(side)
    }

    fn endpoint_arc(&self, side: Side) -> &Arc<dyn Endpoint> {
        match side {
            Side::A => &self.a,
            Side::B => &self.b,
        }
    }

    /// Run the offer/answer handshake.
    ///
    /// Can only be done once. A second call gets [`CallError::InvalidState`], a call
    /// that was closed gets [`CallError::Closed`]. A failed step returns
    /// [`CallError::Negotiation`] and leaves the call [`CallState::Failed`].
    ///
    /// If the call is closed while a step is pending, the step's result is discarded,
    /// no further steps are made and [`CallError::Closed`] is returned.
    pub async fn establish_connection(&self) -> Result<(), CallError> {
        let mut current = CallState::Idle;
        let started = self.state.send_if_modified(|s| {
            current = *s;
            if *s == CallState::Idle {
                *s = CallState::Offering;
                true
            } else {
                false
            }
        });

        if !started {
            return Err(match current {
                CallState::Closed => CallError::Closed,
                _ => CallError::InvalidState(current),
            });
        }

        self.sink.emit("call", json!({ "state": "start" }));

        let result = self.negotiate().instrument(self.span.clone()).await;

        if let Err(CallError::Negotiation(e)) = &result {
            let _enter = self.span.enter();
            warn!("{}", e);
            self.state.send_if_modified(|s| {
                if *s == CallState::Closed {
                    false
                } else {
                    *s = CallState::Failed;
                    true
                }
            });
        }

        result
    }

    async fn negotiate(&self) -> Result<(), CallError> {
        use NegotiationStep::*;

        let mut offer = self.step(CreateOffer, self.a.create_offer()).await?;
        {
            let mut c = self.constraints.lock();
            c.offer_done = true;
            if c.munging.apply_to_offer(&mut offer) {
                debug!("Removed video FEC from offer");
            }
        }

        self.step(SetLocalOffer, self.a.set_local_description(offer.clone()))
            .await?;
        self.step(SetRemoteOffer, self.b.set_remote_description(offer))
            .await?;

        let mut answer = self.step(CreateAnswer, self.b.create_answer()).await?;
        self.advance(CallState::Answered)?;
        {
            let mut c = self.constraints.lock();
            c.answer_done = true;
            if c.munging.apply_to_answer(&mut answer) {
                debug!("Constrained video bitrate in answer");
            }
        }

        self.step(SetLocalAnswer, self.b.set_local_description(answer.clone()))
            .await?;
        self.step(SetRemoteAnswer, self.a.set_remote_description(answer))
            .await?;

        self.advance(CallState::Connected)
    }

    /// Await one handshake step, unless the call closes first.
    async fn step<T, F>(&self, step: NegotiationStep, fut: F) -> Result<T, CallError>
    where
        F: Future<Output = Result<T, EndpointError>>,
    {
        if self.cancel.is_cancelled() {
            return Err(CallError::Closed);
        }
        trace!("Negotiation step: {}", step);

        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(CallError::Closed),
            r = fut => match r {
                // Results arriving after close are discarded.
                Ok(_) if self.cancel.is_cancelled() => Err(CallError::Closed),
                Ok(v) => Ok(v),
                Err(source) => Err(NegotiationError { step, source }.into()),
            },
        }
    }

    fn advance(&self, to: CallState) -> Result<(), CallError> {
        let mut closed = false;
        self.state.send_if_modified(|s| {
            if *s == CallState::Closed {
                closed = true;
                false
            } else {
                *s = to;
                true
            }
        });

        if closed {
            return Err(CallError::Closed);
        }
        debug!("Call {}", to);
        Ok(())
    }

    /// Replace the candidate filter.
    ///
    /// Takes effect for the next candidate event. Candidates already forwarded stay
    /// forwarded.
    pub fn set_ice_candidate_filter(&self, filter: CandidateFilter) {
        let _enter = self.span.enter();
        debug!("Candidate filter: {}", filter.label());
        *self.filter.write() = filter;
    }

    /// Cap the video bitrate (kbps) in the answer. `0` removes the cap.
    ///
    /// Has no effect once the answer was created.
    pub fn constrain_video_bitrate(&self, kbps: u32) {
        let _enter = self.span.enter();
        let mut c = self.constraints.lock();
        if c.answer_done {
            warn!("Video bitrate set after the answer was created, ignoring");
            return;
        }
        c.munging.max_video_bitrate = (kbps > 0).then_some(kbps);
    }

    /// Strip video FEC from the offer.
    ///
    /// Has no effect once the offer was created.
    pub fn disable_video_fec(&self) {
        let _enter = self.span.enter();
        let mut c = self.constraints.lock();
        if c.offer_done {
            warn!("Video FEC disabled after the offer was created, ignoring");
            return;
        }
        c.munging.remove_video_fec = true;
    }

    /// Poll stats from one endpoint every `interval` until it closes.
    ///
    /// `on_done` is called exactly once, with everything collected, when the endpoint
    /// closes or the call is closed.
    pub fn gather_stats<F>(&self, side: Side, interval: Duration, on_done: F) -> JoinHandle<()>
    where
        F: FnOnce(StatsCollection) + Send + 'static,
    {
        let mut poller = StatsPoller::new(self.endpoint_arc(side).clone(), interval)
            .set_cancel_token(self.cancel.clone());

        let span = self.span.clone();
        self.runtime.spawn(
            async move {
                let stats = poller.run().await;
                debug!("Delivering {} stats samples from {}", stats.len(), side);
                on_done(stats);
            }
            .instrument(span),
        )
    }

    /// Close the call and both endpoints.
    ///
    /// Every pending step or candidate after this is ignored. Calling this more than
    /// once does nothing.
    pub fn close(&self) {
        let closed = self.state.send_if_modified(|s| {
            if *s == CallState::Closed {
                false
            } else {
                *s = CallState::Closed;
                true
            }
        });

        if !closed {
            return;
        }

        let _enter = self.span.enter();
        debug!("Call closed");

        self.cancel.cancel();
        self.sink.emit("call", json!({ "state": "end" }));
        self.a.close();
        self.b.close();
    }
}

impl Drop for Call {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

impl fmt::Debug for Call {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Call")
            .field("id", &self.id)
            .field("state", &self.state())
            .field("filter", &*self.filter.read())
            .finish()
    }
}

/// Forwards candidates from one endpoint to the other.
struct Relay {
    from: Side,
    target: Arc<dyn Endpoint>,
    filter: Arc<RwLock<CandidateFilter>>,
    cancel: CancellationToken,
}

impl Relay {
    async fn run(self, mut rx: mpsc::UnboundedReceiver<Option<IceCandidate>>) {
        loop {
            let event = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                e = rx.recv() => e,
            };

            let candidate = match event {
                Some(Some(c)) => c,
                Some(None) => {
                    trace!("{} finished gathering", self.from);
                    continue;
                }
                // Endpoint dropped its sender.
                None => break,
            };

            self.forward(candidate).await;
        }
        trace!("Candidate relay from {} stopped", self.from);
    }

    async fn forward(&self, candidate: IceCandidate) {
        let parsed = match candidate.parse() {
            Ok(v) => v,
            Err(ParseError::EndOfCandidates) => {
                trace!("{} end of candidates", self.from);
                return;
            }
            Err(e) => {
                debug!("Dropping candidate from {}: {}", self.from, e);
                return;
            }
        };

        {
            let filter = self.filter.read();
            if !filter.accepts(&parsed) {
                trace!("Filter {} rejects {} from {}", filter.label(), parsed, self.from);
                return;
            }
        }

        trace!("Forward {} from {} to {}", parsed, self.from, self.from.other());

        let result = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return,
            r = self.target.add_ice_candidate(candidate) => r,
        };

        if let Err(e) = result {
            warn!(
                "Failed to add candidate {} to {}: {}",
                parsed,
                self.from.other(),
                e
            );
        }
    }
}
