//! Streaming result pipeline.
//!
//! [`QueryStream`] drives the token parser over a pool-held session and
//! fills fixed-size [`RowChunk`]s. It reads one packet at a time, so
//! memory stays bounded by the packet size plus one chunk regardless of
//! result-set cardinality.
//!
//! Only the first result set is authoritative; further result sets after
//! a DONE-with-MORE are drained and discarded. Server errors of severity
//! 11-16 are accumulated and surfaced on the `fill_chunk` call after the
//! stream ends naturally; severity >= 20 (or any error before column
//! metadata arrives in a degenerate stream) destroys the connection.

use std::ops::DerefMut;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tds_wire::token::ColumnMeta;
use tds_wire::{EnvChange, ServerMessage, Token};
use tokio::time::{Instant, timeout_at};

use crate::chunk::RowChunk;
use crate::error::{Result, SessionError};
use crate::session::{CancelHandle, Session, SessionState};

/// Default deadline for the ATTENTION acknowledgment.
pub const DEFAULT_CANCEL_TIMEOUT: Duration = Duration::from_secs(5);

/// Stream lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    /// Batch sent; no column metadata yet.
    Initializing,
    /// Column metadata received; rows flowing.
    Streaming,
    /// ATTENTION sent; consuming packets to the acknowledgment.
    Draining,
    /// Final DONE consumed; the session is Idle again.
    Complete,
    /// A fatal error was surfaced; the session was destroyed.
    Failed,
}

/// Shareable cancellation trigger for a running stream.
///
/// `cancel` is idempotent and safe at any point in the stream's life; the
/// ATTENTION goes out on the write half immediately, and the stream
/// notices on its next parser yield or chunk boundary.
#[derive(Clone)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
    attention: CancelHandle,
}

impl CancelToken {
    /// Request cancellation of the stream's query.
    pub async fn cancel(&self) -> Result<()> {
        if self.flag.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        self.attention.send_attention().await?;
        Ok(())
    }

    /// Whether cancellation has been requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }
}

/// A streaming query result bound to a session.
///
/// `S` is the session carrier: a plain `&mut Session` for direct use, or
/// an owning pool handle so a scan can keep its connection alive for the
/// stream's whole life and release it on drop.
pub struct QueryStream<S: DerefMut<Target = Session>> {
    session: S,
    state: StreamState,
    columns: Option<Arc<[ColumnMeta]>>,
    /// Warnings not yet handed to the caller.
    pending_warnings: Vec<ServerMessage>,
    /// Severity 11-16 errors, surfaced after the stream ends.
    deferred_errors: Vec<SessionError>,
    rows_affected: u64,
    /// Set after the authoritative result set's DONE-with-MORE: later
    /// metadata and rows are discarded.
    discarding: bool,
    cancel_flag: Arc<AtomicBool>,
    cancel_timeout: Duration,
}

impl<S: DerefMut<Target = Session>> QueryStream<S> {
    /// Dispatch `sql` on the session and return the stream over its
    /// response.
    pub async fn start(mut session: S, sql: &str) -> Result<Self> {
        session.start_batch(sql).await?;
        Ok(Self {
            session,
            state: StreamState::Initializing,
            columns: None,
            pending_warnings: Vec::new(),
            deferred_errors: Vec::new(),
            rows_affected: 0,
            discarding: false,
            cancel_flag: Arc::new(AtomicBool::new(false)),
            cancel_timeout: DEFAULT_CANCEL_TIMEOUT,
        })
    }

    /// Override the cancellation-acknowledgment deadline.
    pub fn set_cancel_timeout(&mut self, timeout: Duration) {
        self.cancel_timeout = timeout;
    }

    /// Column metadata of the authoritative result set.
    #[must_use]
    pub fn columns(&self) -> Option<&Arc<[ColumnMeta]>> {
        self.columns.as_ref()
    }

    /// Affected-row count from the final DONE.
    #[must_use]
    pub fn rows_affected(&self) -> u64 {
        self.rows_affected
    }

    /// Current stream state.
    #[must_use]
    pub fn state(&self) -> StreamState {
        self.state
    }

    /// Cancellation trigger usable from other tasks.
    pub fn cancel_token(&self) -> Result<CancelToken> {
        Ok(CancelToken {
            flag: Arc::clone(&self.cancel_flag),
            attention: self.session.cancel_handle()?,
        })
    }

    /// Warnings (INFO tokens) observed since the last call.
    pub fn take_warnings(&mut self) -> Vec<ServerMessage> {
        std::mem::take(&mut self.pending_warnings)
    }

    /// Fill `chunk` with up to its capacity in rows.
    ///
    /// Returns the number of rows delivered; 0 means end of stream. After
    /// cancellation, the stream drains to the ATTENTION acknowledgment
    /// (bounded by the cancel timeout) and then reports end of stream.
    pub async fn fill_chunk(&mut self, chunk: &mut RowChunk) -> Result<usize> {
        match self.state {
            StreamState::Complete => return self.finish(),
            StreamState::Failed => {
                return Err(SessionError::Protocol(
                    "stream already failed".to_string(),
                ));
            }
            StreamState::Draining => return self.drain_cancelled().await,
            StreamState::Initializing | StreamState::Streaming => {}
        }

        loop {
            // Cancellation checkpoint: between parser yields and chunks.
            if self.cancel_flag.load(Ordering::Acquire)
                && self.state != StreamState::Draining
            {
                self.state = StreamState::Draining;
                self.session.state = SessionState::Cancelling;
                return self.drain_cancelled().await;
            }

            // Drain every complete token already buffered.
            loop {
                let token = match self.session.parser.next_token() {
                    Ok(Some(token)) => token,
                    Ok(None) => break,
                    Err(e) => {
                        self.fail();
                        return Err(e.into());
                    }
                };
                match token {
                    Token::ColMetaData(cols) => {
                        if self.columns.is_none() && !self.discarding {
                            self.columns = Some(cols);
                            self.state = StreamState::Streaming;
                        }
                    }
                    Token::Row(values) => {
                        if self.discarding {
                            continue;
                        }
                        chunk.push(values);
                        if chunk.is_full() {
                            return Ok(chunk.len());
                        }
                    }
                    Token::Done(done) | Token::DoneProc(done) | Token::DoneInProc(done) => {
                        if done.status.attn {
                            // Cancellation raced a checkpoint; accept it.
                            self.complete_after_cancel();
                            return Ok(chunk.len());
                        }
                        if done.status.count && !self.discarding {
                            self.rows_affected = done.row_count;
                        }
                        if done.status.more {
                            // Later result sets are drained and discarded.
                            if self.columns.is_some() {
                                self.discarding = true;
                            }
                        } else {
                            self.state = StreamState::Complete;
                            self.session.state = SessionState::Idle;
                            if chunk.is_empty() {
                                return self.finish();
                            }
                            return Ok(chunk.len());
                        }
                    }
                    Token::Error(message) => {
                        if message.is_fatal() {
                            let err = SessionError::from_server(&message);
                            self.fail();
                            return Err(err);
                        }
                        self.deferred_errors
                            .push(SessionError::from_server(&message));
                    }
                    Token::Info(message) => self.pending_warnings.push(message),
                    Token::EnvChange(EnvChange::PacketSize { new }) => {
                        self.session.link_mut()?.set_packet_size(new).await;
                    }
                    Token::EnvChange(env) => self.session.note_env_change(&env),
                    _ => {}
                }
            }

            // Need more bytes from the wire.
            match self.session.read_packet_into_parser().await {
                Ok(true) => {}
                Ok(false) => {
                    self.fail();
                    return Err(SessionError::Protocol(
                        "connection closed mid-result".to_string(),
                    ));
                }
                Err(e) => {
                    self.state = StreamState::Failed;
                    return Err(e);
                }
            }
        }
    }

    /// End-of-stream handling: surface deferred user errors once.
    fn finish(&mut self) -> Result<usize> {
        if let Some(err) = self.deferred_errors.drain(..).next() {
            return Err(err);
        }
        Ok(0)
    }

    /// Consume packets until the DONE acknowledging the ATTENTION, bounded
    /// by the cancel timeout. On timeout the socket is destroyed.
    async fn drain_cancelled(&mut self) -> Result<usize> {
        let deadline = Instant::now() + self.cancel_timeout;
        loop {
            loop {
                let token = match self.session.parser.next_token() {
                    Ok(Some(token)) => token,
                    Ok(None) => break,
                    Err(e) => {
                        self.fail();
                        return Err(e.into());
                    }
                };
                match token {
                    Token::Done(done) | Token::DoneProc(done) | Token::DoneInProc(done) => {
                        if done.status.attn || !done.status.more {
                            // Either the acknowledgment or a natural
                            // completion that raced the cancel.
                            self.complete_after_cancel();
                            return Ok(0);
                        }
                    }
                    Token::EnvChange(env) => self.session.note_env_change(&env),
                    _ => {}
                }
            }

            let read = timeout_at(deadline, self.session.read_packet_into_parser()).await;
            match read {
                Ok(Ok(true)) => {}
                Ok(Ok(false)) => {
                    self.fail();
                    return Err(SessionError::Protocol(
                        "connection closed while draining cancellation".to_string(),
                    ));
                }
                Ok(Err(e)) => {
                    self.state = StreamState::Failed;
                    return Err(e);
                }
                Err(_) => {
                    tracing::warn!("cancellation acknowledgment timed out; destroying session");
                    self.fail();
                    return Err(SessionError::CancelTimeout);
                }
            }
        }
    }

    fn complete_after_cancel(&mut self) {
        tracing::debug!("cancellation acknowledged; session recycled");
        self.state = StreamState::Complete;
        self.session.parser.reset();
        if let Ok(link) = self.session.link_mut() {
            link.clear_receive_state();
            link.cancel_acknowledged();
        }
        self.session.state = SessionState::Idle;
        self.deferred_errors.clear();
    }

    fn fail(&mut self) {
        self.state = StreamState::Failed;
        self.session.destroy();
    }
}

impl<S: DerefMut<Target = Session>> std::fmt::Debug for QueryStream<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryStream")
            .field("state", &self.state)
            .field("columns", &self.columns.as_ref().map(|c| c.len()))
            .field("rows_affected", &self.rows_affected)
            .finish_non_exhaustive()
    }
}
