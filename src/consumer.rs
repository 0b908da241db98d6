//! Streaming response consumer: drives one in-flight reply end-to-end.
//!
//! A consumer owns the live binding between an assistant message and its
//! transport read loop. The loop runs as a spawned task and moves through
//! `Idle → Connecting → Streaming ⇄ Paused` before landing in exactly one of
//! the terminal states `Completed`, `Aborted`, or `Errored`. After a terminal
//! transition the bound message is never touched again, even if stray bytes
//! keep arriving on an already-closed transport.
//!
//! Pause blocks on a watch channel rather than re-checking a flag on a
//! timer, so resume latency is bounded by event delivery. Cancellation uses
//! a token that unblocks both suspension points (next-chunk wait and pause
//! wait) promptly, closes the transport by dropping the stream, and discards
//! frames that were already buffered but not yet applied.

use std::sync::Arc;

use tokio::sync::{Mutex, broadcast, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::error::Error;
use crate::frame::{self, Frame};
use crate::log::MessageLog;
use crate::observability::{
    STREAM_CHUNKS, STREAM_PAUSES, STREAMS_CANCELLED, STREAMS_COMPLETED, STREAMS_ERRORED,
    STREAMS_STARTED,
};
use crate::transport::{ByteStream, StreamTransport};
use crate::types::{ChatEvent, DeliveryState, Message, MessageId, SessionId};

/// Suffix appended to a reply that was stopped mid-stream.
pub const STOP_MARKER: &str = " [stopped]";

/// State of a streaming response consumer.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ConsumerState {
    /// Not yet started.
    Idle,

    /// Opening the transport stream.
    Connecting,

    /// Applying frames as they arrive.
    Streaming,

    /// Holding without consuming input until resumed or cancelled.
    Paused,

    /// The full response was delivered.
    Completed,

    /// Cancelled by the user or orchestrator.
    Aborted,

    /// Transport failure or explicit remote error.
    Errored,
}

impl ConsumerState {
    /// Returns true once the consumer can no longer change state.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ConsumerState::Completed | ConsumerState::Aborted | ConsumerState::Errored
        )
    }
}

/// Handle to one in-flight streamed reply.
///
/// The read loop runs in a spawned task; this handle carries the control
/// surface. At most one live consumer exists per session, enforced by the
/// orchestrator cancelling any predecessor before starting a new one.
pub struct StreamConsumer {
    session_id: SessionId,
    message_id: MessageId,
    cancel: CancellationToken,
    pause_tx: watch::Sender<bool>,
    state_rx: watch::Receiver<ConsumerState>,
    task: JoinHandle<()>,
}

impl StreamConsumer {
    /// Creates the assistant placeholder message and starts the read loop.
    ///
    /// Returns immediately; connecting and streaming happen in the
    /// background task and surface through `events`.
    pub async fn start(
        transport: Arc<dyn StreamTransport>,
        log: Arc<Mutex<MessageLog>>,
        events: broadcast::Sender<ChatEvent>,
        session_id: SessionId,
        user_text: String,
    ) -> StreamConsumer {
        let placeholder = Message::streaming_placeholder(session_id.clone());
        let message_id = placeholder.id;
        {
            let mut log = log.lock().await;
            log.append(placeholder.clone());
        }
        let _ = events.send(ChatEvent::MessageUpdated(placeholder));

        let cancel = CancellationToken::new();
        let (pause_tx, pause_rx) = watch::channel(false);
        let (state_tx, state_rx) = watch::channel(ConsumerState::Idle);

        let worker = StreamWorker {
            transport,
            log,
            events,
            session_id: session_id.clone(),
            message_id,
            user_text,
            cancel: cancel.clone(),
            pause_rx,
            state_tx,
            handle: StreamHandle::default(),
        };
        let task = tokio::spawn(worker.run());

        StreamConsumer {
            session_id,
            message_id,
            cancel,
            pause_tx,
            state_rx,
            task,
        }
    }

    /// The session this consumer is bound to.
    pub fn session_id(&self) -> &SessionId {
        &self.session_id
    }

    /// Identifier of the assistant message being reconstructed.
    pub fn message_id(&self) -> MessageId {
        self.message_id
    }

    /// Current state of the read loop.
    pub fn state(&self) -> ConsumerState {
        *self.state_rx.borrow()
    }

    /// Returns true once the consumer has reached a terminal state.
    pub fn is_terminal(&self) -> bool {
        self.state().is_terminal()
    }

    /// Suspends frame application at the next suspension point.
    ///
    /// No-op on a terminal consumer.
    pub fn pause(&self) {
        if self.is_terminal() {
            return;
        }
        if !self.pause_tx.send_replace(true) {
            STREAM_PAUSES.click();
        }
    }

    /// Resumes a paused consumer. No-op when not paused.
    pub fn resume(&self) {
        self.pause_tx.send_replace(false);
    }

    /// Cancels the stream: aborts the transport and discards any frames
    /// not yet applied. Idempotent and safe on a terminal consumer.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Cancels the stream and waits for the read loop to finish.
    pub async fn shutdown(self) {
        self.cancel.cancel();
        let _ = self.task.await;
    }

    /// Waits for the read loop to finish naturally.
    pub async fn join(self) {
        let _ = self.task.await;
    }
}

impl std::fmt::Debug for StreamConsumer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamConsumer")
            .field("session_id", &self.session_id)
            .field("message_id", &self.message_id)
            .field("state", &self.state())
            .finish()
    }
}

/// Live binding between the message and the read loop: carry-over bytes for
/// frames split across reads, plus the last applied progress percentage.
#[derive(Debug, Default)]
struct StreamHandle {
    carry: Vec<u8>,
    progress: f32,
}

struct StreamWorker {
    transport: Arc<dyn StreamTransport>,
    log: Arc<Mutex<MessageLog>>,
    events: broadcast::Sender<ChatEvent>,
    session_id: SessionId,
    message_id: MessageId,
    user_text: String,
    cancel: CancellationToken,
    pause_rx: watch::Receiver<bool>,
    state_tx: watch::Sender<ConsumerState>,
    handle: StreamHandle,
}

enum Step {
    Continue,
    Terminal,
}

enum Gate {
    Resumed,
    Cancelled,
}

enum Read {
    Cancelled,
    Paused,
    Item(Option<crate::error::Result<bytes::Bytes>>),
}

impl StreamWorker {
    async fn run(mut self) {
        STREAMS_STARTED.click();
        self.set_state(ConsumerState::Connecting);

        let opened = {
            let cancel = self.cancel.clone();
            tokio::select! {
                _ = cancel.cancelled() => None,
                opened = self.transport.open_stream(&self.session_id, &self.user_text) => {
                    Some(opened)
                }
            }
        };
        let mut stream = match opened {
            None => {
                self.finish_aborted().await;
                return;
            }
            Some(Err(err)) => {
                self.finish_errored(format!("The assistant stream could not be opened: {err}"))
                    .await;
                return;
            }
            Some(Ok(stream)) => stream,
        };

        let mut first_read = true;
        loop {
            // Pause gate: block on the watch channel, consuming no input.
            if *self.pause_rx.borrow() {
                self.set_state(ConsumerState::Paused);
                loop {
                    match self.pause_gate().await {
                        Gate::Cancelled => {
                            drop(stream);
                            self.finish_aborted().await;
                            return;
                        }
                        Gate::Resumed => {}
                    }
                    if !*self.pause_rx.borrow() {
                        break;
                    }
                }
                self.set_state(if first_read {
                    ConsumerState::Connecting
                } else {
                    ConsumerState::Streaming
                });
            }

            match self.next_read(&mut stream).await {
                Read::Cancelled => {
                    // Transport abort and consumer discard together: dropping
                    // the stream closes the connection, and the loop applies
                    // nothing further.
                    drop(stream);
                    self.finish_aborted().await;
                    return;
                }
                Read::Paused => continue,
                Read::Item(Some(Ok(bytes))) => {
                    STREAM_CHUNKS.click();
                    if first_read {
                        first_read = false;
                        self.set_state(ConsumerState::Streaming);
                    }
                    let out = frame::parse_chunk(&self.handle.carry, &bytes);
                    self.handle.carry = out.carry;
                    if let Step::Terminal = self.apply_frames(out.frames).await {
                        return;
                    }
                    if out.terminated {
                        self.finish_completed(None).await;
                        return;
                    }
                }
                Read::Item(Some(Err(err))) => {
                    self.finish_errored(format!("The assistant stream failed: {err}"))
                        .await;
                    return;
                }
                Read::Item(None) => {
                    // Connection closed without a sentinel: flush the
                    // trailing line, then treat it as a normal end.
                    let carry = std::mem::take(&mut self.handle.carry);
                    let out = frame::parse_chunk(&carry, b"\n");
                    if let Step::Terminal = self.apply_frames(out.frames).await {
                        return;
                    }
                    self.finish_completed(None).await;
                    return;
                }
            }
        }
    }

    async fn pause_gate(&mut self) -> Gate {
        let cancel = self.cancel.clone();
        tokio::select! {
            _ = cancel.cancelled() => Gate::Cancelled,
            changed = self.pause_rx.changed() => match changed {
                Ok(()) => Gate::Resumed,
                // The control side is gone; treat it as cancellation.
                Err(_) => Gate::Cancelled,
            },
        }
    }

    async fn next_read(&mut self, stream: &mut ByteStream) -> Read {
        use futures::StreamExt;
        let cancel = self.cancel.clone();
        tokio::select! {
            _ = cancel.cancelled() => Read::Cancelled,
            changed = self.pause_rx.changed() => match changed {
                // Back to the top of the loop, where the gate decides.
                Ok(()) => Read::Paused,
                Err(_) => Read::Cancelled,
            },
            item = stream.next() => Read::Item(item),
        }
    }

    async fn apply_frames(&mut self, frames: Vec<Frame>) -> Step {
        for frame in frames {
            if let Step::Terminal = self.apply_frame(frame).await {
                return Step::Terminal;
            }
        }
        Step::Continue
    }

    async fn apply_frame(&mut self, frame: Frame) -> Step {
        // A cancel that lands mid-batch discards the remaining frames.
        if self.cancel.is_cancelled() {
            self.finish_aborted().await;
            return Step::Terminal;
        }
        match frame {
            Frame::Progress { text, progress } => {
                if let Some(progress) = progress {
                    self.handle.progress = progress;
                }
                let updated = {
                    let mut log = self.log.lock().await;
                    log.update_streaming(&self.message_id, &text)
                };
                match updated {
                    Ok(true) => {
                        self.emit_update().await;
                        Step::Continue
                    }
                    Ok(false) => Step::Continue,
                    Err(_) => {
                        // The message froze under another hand; this handle
                        // has been superseded and must stop writing.
                        self.set_state(ConsumerState::Aborted);
                        Step::Terminal
                    }
                }
            }
            Frame::Complete { text } => {
                let final_text = if text.is_empty() { None } else { Some(text) };
                self.finish_completed(final_text).await;
                Step::Terminal
            }
            Frame::Error { message } => {
                self.finish_remote_error(message).await;
                Step::Terminal
            }
        }
    }

    async fn emit_update(&self) {
        let message = { self.log.lock().await.get(&self.message_id).cloned() };
        if let Some(message) = message {
            let _ = self.events.send(ChatEvent::MessageUpdated(message));
        }
    }

    async fn finish_completed(&mut self, final_text: Option<String>) {
        self.handle.progress = 100.0;
        let frozen = {
            let mut log = self.log.lock().await;
            log.finalize(&self.message_id, DeliveryState::Complete, final_text)
        };
        match frozen {
            Ok(message) => {
                let _ = self.events.send(ChatEvent::MessageUpdated(message));
                self.set_state(ConsumerState::Completed);
                STREAMS_COMPLETED.click();
            }
            Err(_) => self.set_state(ConsumerState::Aborted),
        }
    }

    async fn finish_aborted(&mut self) {
        let frozen = {
            let mut log = self.log.lock().await;
            match log.get(&self.message_id) {
                Some(message) if message.state == DeliveryState::Streaming => {
                    let stopped = format!("{}{}", message.content, STOP_MARKER);
                    log.finalize(&self.message_id, DeliveryState::Aborted, Some(stopped))
                }
                _ => Err(Error::cancelled("message already frozen")),
            }
        };
        if let Ok(message) = frozen {
            let _ = self.events.send(ChatEvent::MessageUpdated(message));
        }
        self.set_state(ConsumerState::Aborted);
        STREAMS_CANCELLED.click();
    }

    /// Transport-level failure: explanatory text only if nothing streamed
    /// yet, otherwise the partial content is preserved.
    async fn finish_errored(&mut self, reason: String) {
        self.freeze_errored(reason).await;
    }

    /// Explicit error frame from the remote side.
    async fn finish_remote_error(&mut self, message: String) {
        self.freeze_errored(message).await;
    }

    async fn freeze_errored(&mut self, reason: String) {
        let frozen = {
            let mut log = self.log.lock().await;
            let replacement = match log.get(&self.message_id) {
                Some(message) if message.content.is_empty() => Some(reason),
                _ => None,
            };
            log.finalize(&self.message_id, DeliveryState::Errored, replacement)
        };
        match frozen {
            Ok(message) => {
                let _ = self.events.send(ChatEvent::MessageUpdated(message));
                self.set_state(ConsumerState::Errored);
                STREAMS_ERRORED.click();
            }
            Err(_) => self.set_state(ConsumerState::Aborted),
        }
    }

    fn set_state(&self, state: ConsumerState) {
        let _ = self.state_tx.send(state);
    }
}
