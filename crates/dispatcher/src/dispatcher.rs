//! Session Dispatcher
//!
//! All mutable session state lives in one [`SessionContext`] behind a single
//! lock. Transport connects, writes and generation calls are awaited with the
//! lock released; their outcomes are re-checked against the session epoch or
//! the turn counter before they are applied. Transport links carry the epoch
//! that opened them, so a teardown still in flight only closes its own link.

use crate::display::DisplayBuffer;
use crate::error::{DispatchError, ErrorKind};
use crate::event::DispatchEvent;
use crate::settings::{AssistantConfig, DisplayPolicy};
use generation::{GenerationSnapshot, Generator, StreamReconciler};
use metrics::counter;
use obd_protocol::{
    Epoch, LineFramer, ObdError, ReplyAssembler, ResponseClassifier, ResponseDecoder, SessionState,
    SessionStateMachine, Transport, TransportEvent, CRLF_ROLLBACK_CHARS,
};
use query_router::{QueryRouter, RouteDecision, SimilarityOracle};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Everything mutated by transport reads, routing and generation
#[derive(Default)]
struct SessionContext {
    session: SessionStateMachine,
    framer: LineFramer,
    replies: ReplyAssembler,
    /// Framed adapter output exactly as emitted
    transcript: DisplayBuffer,
    /// Conversation: notices, narrations, echoes and generated text
    display: DisplayBuffer,
    reconciler: StreamReconciler,
    turn: u64,
    turn_task: Option<JoinHandle<()>>,
    transport_task: Option<JoinHandle<()>>,
}

struct Shared {
    ctx: Mutex<SessionContext>,
    transport: Arc<dyn Transport>,
    generator: Arc<dyn Generator>,
    decoder: Arc<dyn ResponseDecoder>,
    router: QueryRouter,
    classifier: ResponseClassifier,
    events: mpsc::UnboundedSender<DispatchEvent>,
    line_terminator: String,
    display_policy: DisplayPolicy,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, SessionContext> {
        self.ctx.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn emit(&self, event: DispatchEvent) {
        if self.events.send(event).is_err() {
            debug!("Event receiver dropped");
        }
    }

    /// Apply one transport read for `epoch`
    fn on_read(&self, epoch: Epoch, bytes: &[u8]) {
        let mut guard = self.lock();
        let ctx = &mut *guard;
        if !ctx.session.is_current(epoch) {
            counter!("obd_stale_events_total", "source" => "transport").increment(1);
            debug!("Dropping {} bytes from stale epoch {}", bytes.len(), epoch);
            return;
        }
        counter!("obd_transport_bytes_total").increment(bytes.len() as u64);

        let framed = ctx.framer.feed(bytes);
        let rollback = if framed.rollback && ctx.transcript.retract_pending_cr() {
            CRLF_ROLLBACK_CHARS
        } else {
            0
        };
        let text = framed.text();
        ctx.transcript.push(&text);
        if rollback > 0 || !text.is_empty() {
            self.emit(DispatchEvent::FramedOutput { text, rollback });
        }

        ctx.replies.push(&framed);
        while let Some(reply) = ctx.replies.next_reply() {
            let assessment = self.classifier.assess(&reply, self.decoder.as_ref());
            if let Some(notice) = assessment.notice {
                push_line(&mut ctx.display, notice);
                self.emit(DispatchEvent::Status(notice.to_string()));
            }
            if let Some(narration) = assessment.narration {
                push_line(&mut ctx.display, &narration);
                self.emit(DispatchEvent::Narration(narration));
            }
            if let Some(echo) = assessment.echo {
                push_line(&mut ctx.display, &echo);
                self.emit(DispatchEvent::Echo(echo));
            }
        }
    }

    /// Report a transport failure for `epoch` and close the link.
    /// Returns false when the epoch was already superseded.
    async fn fail_session(&self, epoch: Epoch, error: &ObdError) -> bool {
        {
            let mut ctx = self.lock();
            if !ctx.session.on_transport_error(epoch) {
                return false;
            }
            // the pump may be the caller; let it finish on its own
            drop(ctx.transport_task.take());
            ctx.framer.reset();
            ctx.replies.clear();
            warn!("Session {} failed: {}", epoch, error);
            self.emit(DispatchEvent::Status(error.to_string()));
            self.emit(DispatchEvent::SessionState(SessionState::Disconnected));
        }
        self.transport.disconnect(epoch).await;
        true
    }

    /// Merge a snapshot of `turn`; false once the turn is superseded
    fn apply_snapshot(&self, turn: u64, snapshot: &GenerationSnapshot) -> bool {
        let mut guard = self.lock();
        let ctx = &mut *guard;
        if ctx.turn != turn {
            counter!("obd_stale_events_total", "source" => "generation").increment(1);
            debug!("Dropping snapshot of superseded turn {}", turn);
            return false;
        }
        counter!("obd_generation_snapshots_total").increment(1);

        let delta = ctx.reconciler.apply(snapshot);
        if !delta.is_noop() {
            ctx.display.apply(&delta);
            self.emit(DispatchEvent::DisplayDelta(delta));
        }
        true
    }
}

fn push_line(display: &mut DisplayBuffer, text: &str) {
    if !display.is_empty() && !display.as_str().ends_with('\n') {
        display.push("\n");
    }
    display.push(text);
    display.push("\n");
}

/// Forward transport events of one session until the link closes
async fn pump(shared: Arc<Shared>, epoch: Epoch, mut events: mpsc::Receiver<TransportEvent>) {
    while let Some(event) = events.recv().await {
        match event {
            TransportEvent::Read(bytes) => shared.on_read(epoch, &bytes),
            TransportEvent::Lost(reason) => {
                shared.fail_session(epoch, &ObdError::TransportIo(reason)).await;
                break;
            }
        }
    }
    debug!("Transport events for epoch {} ended", epoch);
}

/// Orchestrates one adapter session and the conversation around it
#[derive(Clone)]
pub struct Dispatcher {
    shared: Arc<Shared>,
}

impl Dispatcher {
    /// Create a dispatcher and the receiving end of its event channel
    pub fn new(
        config: &AssistantConfig,
        transport: Arc<dyn Transport>,
        oracle: Arc<dyn SimilarityOracle>,
        generator: Arc<dyn Generator>,
        decoder: Arc<dyn ResponseDecoder>,
    ) -> (Self, mpsc::UnboundedReceiver<DispatchEvent>) {
        let (events, rx) = mpsc::unbounded_channel();
        let shared = Shared {
            ctx: Mutex::new(SessionContext::default()),
            transport,
            generator,
            decoder,
            router: QueryRouter::new(oracle, config.command_width),
            classifier: ResponseClassifier::new(config.echo_min_words),
            events,
            line_terminator: config.line_terminator.clone(),
            display_policy: config.display_policy,
        };
        (
            Self {
                shared: Arc::new(shared),
            },
            rx,
        )
    }

    /// Current session state
    pub fn state(&self) -> SessionState {
        self.shared.lock().session.state()
    }

    /// Current session epoch
    pub fn epoch(&self) -> Epoch {
        self.shared.lock().session.epoch()
    }

    /// Conversation text shown so far
    pub fn display_text(&self) -> String {
        self.shared.lock().display.as_str().to_string()
    }

    /// Framed adapter output received so far
    pub fn transcript_text(&self) -> String {
        self.shared.lock().transcript.as_str().to_string()
    }

    /// Open a session with the adapter at `identity`
    pub async fn connect(&self, identity: &str) -> Result<(), DispatchError> {
        let epoch = {
            let mut ctx = self.shared.lock();
            let epoch = match ctx.session.connect() {
                Ok(epoch) => epoch,
                Err(e) => {
                    self.shared.emit(DispatchEvent::RouteError(ErrorKind::AlreadyConnecting));
                    return Err(e.into());
                }
            };
            ctx.framer.reset();
            ctx.replies.clear();
            self.shared.emit(DispatchEvent::SessionState(SessionState::Connecting));
            epoch
        };
        info!("Connecting to {}", identity);

        match self.shared.transport.connect(identity, epoch).await {
            Ok(events) => {
                {
                    let mut ctx = self.shared.lock();
                    if ctx.session.on_connected(epoch) {
                        let task = tokio::spawn(pump(Arc::clone(&self.shared), epoch, events));
                        ctx.transport_task = Some(task);
                        self.shared.emit(DispatchEvent::SessionState(SessionState::Connected));
                        return Ok(());
                    }
                }

                // superseded by a disconnect while the link was opening
                self.shared.transport.disconnect(epoch).await;
                Err(ObdError::NotConnected.into())
            }
            Err(e) => {
                self.shared.fail_session(epoch, &e).await;
                Err(e.into())
            }
        }
    }

    /// Close the session. Returns false when already disconnected.
    pub async fn disconnect(&self) -> bool {
        let link = {
            let mut ctx = self.shared.lock();
            let link = ctx.session.epoch();
            if !ctx.session.disconnect() {
                return false;
            }
            if let Some(task) = ctx.transport_task.take() {
                task.abort();
            }
            ctx.framer.reset();
            ctx.replies.clear();
            self.shared.emit(DispatchEvent::SessionState(SessionState::Disconnected));
            link
        };
        info!("Disconnecting link {}", link);
        self.shared.transport.disconnect(link).await;
        true
    }

    /// Route a user utterance and act on the decision
    pub async fn submit(&self, utterance: &str) -> Result<RouteDecision, DispatchError> {
        let decision = match self.shared.router.route(utterance) {
            Ok(decision) => decision,
            Err(e) => {
                let err = DispatchError::from(e);
                self.shared.emit(DispatchEvent::RouteError(err.kind()));
                return Err(err);
            }
        };

        match &decision {
            RouteDecision::ToTransport { command } => {
                counter!("obd_routes_total", "route" => "transport").increment(1);
                self.send_command(command).await?;
            }
            RouteDecision::ToGeneration { prompt } => {
                counter!("obd_routes_total", "route" => "generation").increment(1);
                self.start_turn(prompt).await?;
            }
            RouteDecision::Discard => {
                counter!("obd_routes_total", "route" => "discard").increment(1);
                debug!("Nothing to do for blank utterance");
            }
        }
        Ok(decision)
    }

    /// Stop delivering the current turn's snapshots. Returns false when no
    /// turn was running.
    pub fn cancel_generation(&self) -> bool {
        let mut ctx = self.shared.lock();
        ctx.turn += 1;
        match ctx.turn_task.take() {
            Some(task) => {
                task.abort();
                true
            }
            None => false,
        }
    }

    async fn send_command(&self, command: &str) -> Result<(), DispatchError> {
        let epoch = {
            let ctx = self.shared.lock();
            match ctx.session.ensure_writable() {
                Ok(epoch) => epoch,
                Err(e) => {
                    self.shared.emit(DispatchEvent::RouteError(ErrorKind::NotConnected));
                    return Err(e.into());
                }
            }
        };

        debug!("Writing command {}", command);
        let payload = format!("{}{}", command, self.shared.line_terminator);
        if let Err(e) = self.shared.transport.write(payload.as_bytes()).await {
            self.shared.fail_session(epoch, &e).await;
            return Err(e.into());
        }
        Ok(())
    }

    async fn start_turn(&self, prompt: &str) -> Result<(), DispatchError> {
        let turn = {
            let mut ctx = self.shared.lock();
            ctx.turn += 1;
            if let Some(task) = ctx.turn_task.take() {
                task.abort();
            }
            if self.shared.display_policy == DisplayPolicy::ResetPerTurn {
                ctx.display.clear();
                ctx.reconciler.reset();
            }
            ctx.turn
        };

        let mut snapshots = match self.shared.generator.generate(prompt).await {
            Ok(snapshots) => snapshots,
            Err(e) => {
                warn!("Generation for turn {} failed: {}", turn, e);
                self.shared.emit(DispatchEvent::Status(e.to_string()));
                self.shared.emit(DispatchEvent::RouteError(ErrorKind::Generation));
                return Err(e.into());
            }
        };

        let shared = Arc::clone(&self.shared);
        let task = tokio::spawn(async move {
            while let Some(snapshot) = snapshots.recv().await {
                if !shared.apply_snapshot(turn, &snapshot) || snapshot.done {
                    break;
                }
            }
        });

        let mut ctx = self.shared.lock();
        if ctx.turn == turn {
            ctx.turn_task = Some(task);
        } else {
            task.abort();
        }
        Ok(())
    }
}
