//! Connection lifecycle state machine.
//!
//! A [`Session`] owns one socket. Its lifecycle is
//! `Disconnected → Authenticating → Idle → Executing → {Cancelling → Idle
//! | Disconnected}`; transitions happen only through the operations here,
//! and terminal failures (socket, TLS, login, framing, cancel timeout)
//! destroy the session rather than leave it half-usable.

use bytes::{BufMut, Bytes, BytesMut};
use std::sync::Arc;
use tds_types::SqlValue;
use tds_wire::token::ColumnMeta;
use tds_wire::{
    EncryptionLevel, EnvChange, FedAuthExtension, Login7, PACKET_HEADER_SIZE, PacketHeader,
    PacketStatus, PacketType, PreLogin, Token, TokenStreamParser,
};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;

use mssql_tls::{PreloginFramedStream, TlsConfig, TlsConnector, TlsStream};
use mssql_transport::{AttentionHandle, Packet, Transport, TransportError};

use crate::chunk::RowChunk;
use crate::config::{EncryptMode, SessionConfig};
use crate::error::{Result, SessionError};
use crate::stream::QueryStream;

type TlsLink = TlsStream<PreloginFramedStream<TcpStream>>;

/// Lifecycle state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No socket.
    Disconnected,
    /// Handshake and login in progress.
    Authenticating,
    /// Ready for an operation; owned by the pool.
    Idle,
    /// A batch or bulk operation is in flight; owned by the acquirer.
    Executing,
    /// ATTENTION sent, draining to the acknowledgment.
    Cancelling,
}

impl SessionState {
    /// Display name used in state errors.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Disconnected => "Disconnected",
            Self::Authenticating => "Authenticating",
            Self::Idle => "Idle",
            Self::Executing => "Executing",
            Self::Cancelling => "Cancelling",
        }
    }
}

/// The framed transport, plain or TLS.
pub(crate) enum Link {
    /// TLS negotiated through the PRELOGIN tunnel.
    Tls(Transport<TlsLink>),
    /// Unencrypted (both sides advertised no TLS support).
    Plain(Transport<TcpStream>),
}

impl Link {
    pub(crate) async fn send_message(
        &mut self,
        packet_type: PacketType,
        payload: Bytes,
    ) -> std::result::Result<(), TransportError> {
        match self {
            Self::Tls(t) => t.send_message(packet_type, payload).await,
            Self::Plain(t) => t.send_message(packet_type, payload).await,
        }
    }

    pub(crate) async fn read_packet(
        &mut self,
    ) -> std::result::Result<Option<Packet>, TransportError> {
        match self {
            Self::Tls(t) => t.read_packet().await,
            Self::Plain(t) => t.read_packet().await,
        }
    }

    pub(crate) async fn set_packet_size(&mut self, size: usize) {
        match self {
            Self::Tls(t) => t.set_packet_size(size).await,
            Self::Plain(t) => t.set_packet_size(size).await,
        }
    }

    pub(crate) fn packet_size(&self) -> usize {
        match self {
            Self::Tls(t) => t.packet_size(),
            Self::Plain(t) => t.packet_size(),
        }
    }

    pub(crate) fn clear_receive_state(&mut self) {
        match self {
            Self::Tls(t) => t.clear_receive_state(),
            Self::Plain(t) => t.clear_receive_state(),
        }
    }

    pub(crate) fn has_partial_message(&self) -> bool {
        match self {
            Self::Tls(t) => t.has_partial_message(),
            Self::Plain(t) => t.has_partial_message(),
        }
    }

    pub(crate) fn cancel_handle(&self) -> CancelHandle {
        match self {
            Self::Tls(t) => CancelHandle::Tls(t.attention_handle()),
            Self::Plain(t) => CancelHandle::Plain(t.attention_handle()),
        }
    }

    pub(crate) fn cancel_acknowledged(&self) {
        match self {
            Self::Tls(t) => t.cancel_acknowledged(),
            Self::Plain(t) => t.cancel_acknowledged(),
        }
    }
}

/// Out-of-band cancellation handle for the session's socket.
#[derive(Clone)]
pub enum CancelHandle {
    /// TLS transport handle.
    Tls(AttentionHandle<TlsLink>),
    /// Plain transport handle.
    Plain(AttentionHandle<TcpStream>),
}

impl CancelHandle {
    /// Send ATTENTION; returns false when one was already pending.
    pub async fn send_attention(&self) -> std::result::Result<bool, TransportError> {
        match self {
            Self::Tls(h) => h.send_attention().await,
            Self::Plain(h) => h.send_attention().await,
        }
    }

    /// Whether a cancellation is pending acknowledgment.
    #[must_use]
    pub fn is_cancelling(&self) -> bool {
        match self {
            Self::Tls(h) => h.is_cancelling(),
            Self::Plain(h) => h.is_cancelling(),
        }
    }
}

/// An authenticated SQL Server session.
pub struct Session {
    config: SessionConfig,
    pub(crate) link: Option<Link>,
    pub(crate) state: SessionState,
    pub(crate) parser: TokenStreamParser,
    database: Option<String>,
    transaction_descriptor: u64,
    server_tds_version: Option<u32>,
}

impl Session {
    /// Connect, negotiate encryption, and authenticate.
    ///
    /// The whole handshake runs under the configured connect timeout.
    /// An Azure routing redirect surfaces as [`SessionError::Routing`];
    /// the caller re-connects against the redirect target.
    pub async fn connect(config: SessionConfig) -> Result<Self> {
        let mut session = Self {
            config,
            link: None,
            state: SessionState::Authenticating,
            parser: TokenStreamParser::new(),
            database: None,
            transaction_descriptor: 0,
            server_tds_version: None,
        };

        let deadline = session.config.connect_timeout;
        match timeout(deadline, session.handshake()).await {
            Ok(Ok(())) => {
                session.state = SessionState::Idle;
                tracing::info!(
                    host = %session.config.host,
                    port = session.config.port,
                    database = ?session.database,
                    "session established"
                );
                Ok(session)
            }
            Ok(Err(e)) => {
                session.destroy();
                Err(e)
            }
            Err(_) => {
                session.destroy();
                Err(SessionError::ConnectTimeout)
            }
        }
    }

    async fn handshake(&mut self) -> Result<()> {
        let host = self.config.host.clone();
        let port = self.config.port;

        tracing::debug!(%host, port, "opening TCP connection");
        let mut tcp = TcpStream::connect((host.as_str(), port)).await?;
        tcp.set_nodelay(true)?;

        // PRELOGIN runs over raw TCP: the TLS decision comes out of it.
        let fed_auth_required =
            self.config.credentials.is_azure_ad() || self.config.is_azure();
        let client_encryption = match self.config.encrypt {
            EncryptMode::On => EncryptionLevel::On,
            EncryptMode::Off => EncryptionLevel::NotSupported,
        };
        let prelogin = PreLogin::new(client_encryption, fed_auth_required);
        let response = Self::exchange_prelogin(&mut tcp, &prelogin).await?;

        let server_encryption = response.encryption;
        tracing::debug!(?client_encryption, ?server_encryption, "encryption negotiated");
        let use_tls = match (client_encryption, server_encryption) {
            (EncryptionLevel::NotSupported, EncryptionLevel::NotSupported) => false,
            (EncryptionLevel::NotSupported, _) => {
                return Err(SessionError::Protocol(
                    "server requires encryption but Encrypt=no was requested".to_string(),
                ));
            }
            (_, EncryptionLevel::NotSupported) => {
                return Err(SessionError::Protocol(
                    "server does not support the requested encryption".to_string(),
                ));
            }
            _ => true,
        };

        let mut link = if use_tls {
            let tls_config = TlsConfig::new()
                .trust_server_certificate(self.config.trust_server_certificate);
            let connector = TlsConnector::new(tls_config);
            let tls_stream = connector.connect_via_prelogin(tcp, &host).await?;
            Link::Tls(Transport::new(tls_stream))
        } else {
            tracing::warn!(
                "connection is UNENCRYPTED; credentials and data travel in plaintext"
            );
            Link::Plain(Transport::new(tcp))
        };

        // LOGIN7, with the FEDAUTH extension for Azure AD credentials.
        let mut login = Login7::new()
            .with_server_name(host.clone())
            .with_packet_size(self.config.requested_packet_size);
        login.app_name = self.config.app_name.clone();
        if let Some(database) = &self.config.database {
            login = login.with_database(database.clone());
        }
        let fed_auth_token = self
            .config
            .credentials
            .current_token()?
            .map(|token| token.token.to_string());
        match fed_auth_token {
            Some(token) => {
                login = login.with_fed_auth(FedAuthExtension::security_token(
                    token,
                    response.fed_auth_required,
                ));
            }
            None => {
                if let mssql_auth::Credentials::SqlServer { username, password } =
                    &self.config.credentials
                {
                    login = login.with_sql_auth(username.to_string(), password.to_string());
                }
            }
        }

        link.send_message(PacketType::Login7, login.encode()).await?;
        self.link = Some(link);
        self.process_login_response().await
    }

    /// Send PRELOGIN and read the server response over the raw socket.
    async fn exchange_prelogin(tcp: &mut TcpStream, prelogin: &PreLogin) -> Result<PreLogin> {
        let payload = prelogin.encode();
        let mut header = PacketHeader::new(
            PacketType::PreLogin,
            PacketStatus::END_OF_MESSAGE,
            (PACKET_HEADER_SIZE + payload.len()) as u16,
        );
        header.packet_id = 1;

        let mut packet = BytesMut::with_capacity(PACKET_HEADER_SIZE + payload.len());
        header.encode(&mut packet);
        packet.put_slice(&payload);
        tcp.write_all(&packet).await?;

        let mut header_buf = [0u8; PACKET_HEADER_SIZE];
        tcp.read_exact(&mut header_buf).await?;
        let length = u16::from_be_bytes([header_buf[2], header_buf[3]]) as usize;
        if length < PACKET_HEADER_SIZE {
            return Err(SessionError::Protocol(
                "malformed PRELOGIN response header".to_string(),
            ));
        }
        let mut payload = vec![0u8; length - PACKET_HEADER_SIZE];
        tcp.read_exact(&mut payload).await?;

        Ok(PreLogin::decode(&payload)?)
    }

    /// Drain the login response: LOGINACK, ENVCHANGEs, and the final DONE.
    async fn process_login_response(&mut self) -> Result<()> {
        self.parser.reset();
        let mut negotiated_packet_size = None;

        'outer: loop {
            let packet = match self.link_mut()?.read_packet().await? {
                Some(packet) => packet,
                None => {
                    return Err(SessionError::Protocol(
                        "connection closed during login".to_string(),
                    ));
                }
            };
            self.parser.feed(&packet.payload);

            while let Some(token) = self.parser.next_token()? {
                match token {
                    Token::LoginAck(ack) => {
                        tracing::debug!(
                            server = %ack.prog_name,
                            tds_version = format_args!("0x{:08X}", ack.tds_version),
                            "login acknowledged"
                        );
                        self.server_tds_version = Some(ack.tds_version);
                    }
                    Token::EnvChange(EnvChange::PacketSize { new }) => {
                        negotiated_packet_size = Some(new);
                    }
                    Token::EnvChange(EnvChange::Routing { host, port }) => {
                        return Err(SessionError::Routing { host, port });
                    }
                    Token::EnvChange(env) => self.note_env_change(&env),
                    Token::Error(e) => {
                        return Err(SessionError::Auth(
                            mssql_auth::AuthError::LoginRejected(format!(
                                "{} (error {})",
                                e.message, e.number
                            )),
                        ));
                    }
                    Token::Info(info) => {
                        tracing::debug!(number = info.number, message = %info.message, "login info");
                    }
                    Token::Done(_) => break 'outer,
                    _ => {}
                }
            }
        }

        if self.server_tds_version.is_none() {
            return Err(SessionError::Protocol(
                "login completed without LOGINACK".to_string(),
            ));
        }
        if let Some(size) = negotiated_packet_size {
            self.link_mut()?.set_packet_size(size).await;
        }
        Ok(())
    }

    /// Record a session environment change.
    pub(crate) fn note_env_change(&mut self, env: &EnvChange) {
        match env {
            EnvChange::Database { new, old } => {
                tracing::debug!(from = %old, to = %new, "database changed");
                self.database = Some(new.clone());
            }
            EnvChange::BeginTransaction { descriptor } => {
                self.transaction_descriptor = *descriptor;
            }
            EnvChange::CommitTransaction | EnvChange::RollbackTransaction => {
                self.transaction_descriptor = 0;
            }
            _ => {}
        }
    }

    pub(crate) fn link_mut(&mut self) -> Result<&mut Link> {
        self.link.as_mut().ok_or(SessionError::InvalidState {
            expected: "connected",
            actual: "Disconnected",
        })
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Current database, as reported by the server.
    #[must_use]
    pub fn database(&self) -> Option<&str> {
        self.database.as_deref()
    }

    /// Negotiated packet size.
    #[must_use]
    pub fn packet_size(&self) -> usize {
        self.link
            .as_ref()
            .map_or(tds_wire::DEFAULT_PACKET_SIZE, Link::packet_size)
    }

    /// The active transaction descriptor (0 in auto-commit).
    #[must_use]
    pub fn transaction_descriptor(&self) -> u64 {
        self.transaction_descriptor
    }

    /// Whether a server transaction is open on this session.
    #[must_use]
    pub fn in_transaction(&self) -> bool {
        self.transaction_descriptor != 0
    }

    /// Handle for cancelling the in-flight operation from another task.
    pub fn cancel_handle(&self) -> Result<CancelHandle> {
        self.link
            .as_ref()
            .map(Link::cancel_handle)
            .ok_or(SessionError::InvalidState {
                expected: "connected",
                actual: "Disconnected",
            })
    }

    /// Pool release gate: only a clean idle session is recyclable.
    ///
    /// Clean means state `Idle`, no partially assembled inbound message,
    /// and no unconsumed parser bytes.
    #[must_use]
    pub fn is_recyclable(&self) -> bool {
        self.state == SessionState::Idle
            && self.parser.buffered() == 0
            && self.link.as_ref().is_some_and(|l| !l.has_partial_message())
    }

    /// Tear down the socket. The session is not recyclable afterwards.
    pub fn destroy(&mut self) {
        if self.link.take().is_some() {
            tracing::debug!(state = self.state.as_str(), "destroying session");
        }
        self.state = SessionState::Disconnected;
        self.parser.reset();
    }

    pub(crate) fn require_idle(&self, operation: &'static str) -> Result<()> {
        if self.state != SessionState::Idle {
            tracing::warn!(operation, state = self.state.as_str(), "operation refused");
            return Err(SessionError::InvalidState {
                expected: "Idle",
                actual: self.state.as_str(),
            });
        }
        Ok(())
    }

    /// Dispatch a SQL batch and move to `Executing`.
    ///
    /// Callers drive the result through [`QueryStream`].
    pub(crate) async fn start_batch(&mut self, sql: &str) -> Result<()> {
        self.require_idle("ExecuteBatch")?;
        self.parser.reset();
        let descriptor = self.transaction_descriptor;
        let link = self.link_mut()?;
        link.clear_receive_state();

        tracing::debug!(sql_len = sql.len(), "dispatching SQL batch");
        let payload = tds_wire::encode_sql_batch(sql, descriptor);
        self.state = SessionState::Executing;
        if let Err(e) = self.link_mut()?.send_message(PacketType::SqlBatch, payload).await {
            self.destroy();
            return Err(e.into());
        }
        Ok(())
    }

    /// Read one response packet and feed it to the parser.
    ///
    /// Returns false when the socket closed cleanly between messages.
    pub(crate) async fn read_packet_into_parser(&mut self) -> Result<bool> {
        match self.link_mut()?.read_packet().await {
            Ok(Some(packet)) => {
                self.parser.feed(&packet.payload);
                Ok(true)
            }
            Ok(None) => Ok(false),
            Err(e) => {
                self.destroy();
                Err(e.into())
            }
        }
    }

    /// Run a query, streaming its rows.
    pub async fn query<'s>(&'s mut self, sql: &str) -> Result<QueryStream<&'s mut Session>> {
        QueryStream::start(self, sql).await
    }

    /// Run a statement, returning the affected row count.
    pub async fn execute_rowcount(&mut self, sql: &str) -> Result<u64> {
        let mut stream = QueryStream::start(self, sql).await?;
        let mut chunk = RowChunk::new();
        loop {
            let filled = stream.fill_chunk(&mut chunk).await?;
            if filled == 0 {
                break;
            }
            chunk.reset();
        }
        Ok(stream.rows_affected())
    }

    /// Run a query and collect every row (metadata queries only).
    pub async fn query_rows(
        &mut self,
        sql: &str,
    ) -> Result<(Option<Arc<[ColumnMeta]>>, Vec<Vec<SqlValue>>)> {
        let mut stream = QueryStream::start(self, sql).await?;
        let mut rows = Vec::new();
        let mut chunk = RowChunk::new();
        loop {
            let filled = stream.fill_chunk(&mut chunk).await?;
            if filled == 0 {
                break;
            }
            rows.extend(chunk.rows().iter().cloned());
            chunk.reset();
        }
        let columns = stream.columns().cloned();
        Ok((columns, rows))
    }

    /// Begin an explicit transaction, capturing the server descriptor.
    pub async fn begin_transaction(&mut self) -> Result<()> {
        self.execute_rowcount("BEGIN TRANSACTION").await?;
        if self.transaction_descriptor == 0 {
            return Err(SessionError::Protocol(
                "BEGIN TRANSACTION returned no transaction descriptor".to_string(),
            ));
        }
        Ok(())
    }

    /// Commit the open transaction.
    pub async fn commit(&mut self) -> Result<()> {
        self.execute_rowcount("COMMIT TRANSACTION").await?;
        self.transaction_descriptor = 0;
        Ok(())
    }

    /// Roll back the open transaction.
    pub async fn rollback(&mut self) -> Result<()> {
        self.execute_rowcount("ROLLBACK TRANSACTION").await?;
        self.transaction_descriptor = 0;
        Ok(())
    }

    /// Keepalive: cheap round trip used by the pool sweep.
    pub async fn ping(&mut self) -> bool {
        match self.execute_rowcount("SELECT 1").await {
            Ok(_) => true,
            Err(e) => {
                tracing::debug!(error = %e, "keepalive failed");
                self.destroy();
                false
            }
        }
    }

    /// Ship a BULK_LOAD payload and read the completion DONE.
    ///
    /// On any server error the session is destroyed: the bulk protocol
    /// state is not reliably recoverable.
    pub(crate) async fn execute_bulk(&mut self, payload: Bytes) -> Result<u64> {
        self.require_idle("BulkLoad")?;
        self.parser.reset();
        self.link_mut()?.clear_receive_state();
        self.state = SessionState::Executing;

        if let Err(e) = self.link_mut()?.send_message(PacketType::BulkLoad, payload).await {
            self.destroy();
            return Err(e.into());
        }

        let mut row_count = 0;
        loop {
            while let Some(token) = self.parser.next_token().map_err(|e| {
                self.destroy();
                SessionError::from(e)
            })? {
                match token {
                    Token::Done(done) => {
                        if done.status.count {
                            row_count = done.row_count;
                        }
                        if !done.status.more {
                            self.state = SessionState::Idle;
                            return Ok(row_count);
                        }
                    }
                    Token::Error(e) => {
                        let err = SessionError::from_server(&e);
                        self.destroy();
                        return Err(err);
                    }
                    Token::Info(info) => {
                        tracing::debug!(number = info.number, message = %info.message, "bulk info");
                    }
                    Token::EnvChange(env) => self.note_env_change(&env),
                    _ => {}
                }
            }
            if !self.read_packet_into_parser().await? {
                self.destroy();
                return Err(SessionError::Protocol(
                    "connection closed during bulk load".to_string(),
                ));
            }
        }
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("host", &self.config.host)
            .field("state", &self.state)
            .field("database", &self.database)
            .field("in_transaction", &self.in_transaction())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_names() {
        assert_eq!(SessionState::Idle.as_str(), "Idle");
        assert_eq!(SessionState::Cancelling.as_str(), "Cancelling");
    }
}
