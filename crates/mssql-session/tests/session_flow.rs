//! End-to-end session tests against a scripted in-process TDS server.
//!
//! The mock speaks just enough of the protocol: PRELOGIN negotiation
//! (no TLS), a LOGIN7 acknowledgment, and canned tabular responses.

use bytes::{BufMut, BytesMut};
use mssql_session::{Credentials, EncryptMode, RowChunk, Session, SessionConfig, SessionState};
use tds_types::SqlValue;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

const HEADER: usize = 8;

fn packet(ptype: u8, eom: bool, payload: &[u8]) -> Vec<u8> {
    let mut raw = Vec::with_capacity(HEADER + payload.len());
    raw.push(ptype);
    raw.push(u8::from(eom));
    raw.extend_from_slice(&((HEADER + payload.len()) as u16).to_be_bytes());
    raw.extend_from_slice(&[0, 0, 1, 0]);
    raw.extend_from_slice(payload);
    raw
}

async fn read_packet(stream: &mut TcpStream) -> (u8, bool, Vec<u8>) {
    let mut header = [0u8; HEADER];
    stream.read_exact(&mut header).await.unwrap();
    let length = u16::from_be_bytes([header[2], header[3]]) as usize;
    let mut payload = vec![0u8; length - HEADER];
    stream.read_exact(&mut payload).await.unwrap();
    (header[0], header[1] & 0x01 != 0, payload)
}

/// Read packets until end of message; returns the concatenated payload.
async fn read_message(stream: &mut TcpStream) -> (u8, Vec<u8>) {
    let mut message = Vec::new();
    loop {
        let (ptype, eom, payload) = read_packet(stream).await;
        message.extend_from_slice(&payload);
        if eom {
            return (ptype, message);
        }
    }
}

/// PRELOGIN response advertising no encryption support.
fn prelogin_response() -> Vec<u8> {
    // Option table is 11 bytes (two 5-byte entries + terminator), so the
    // option data region starts at offset 11.
    let mut payload = Vec::new();
    payload.extend_from_slice(&[0x00, 0x00, 0x0B, 0x00, 0x06]); // VERSION @11
    payload.extend_from_slice(&[0x01, 0x00, 0x11, 0x00, 0x01]); // ENCRYPTION @17
    payload.push(0xFF);
    payload.extend_from_slice(&[16, 0, 0x07, 0xD0, 0x00, 0x00]); // 16.0.2000
    payload.push(0x02); // ENCRYPT_NOT_SUP
    payload
}

/// Login response: LOGINACK + packet-size ENVCHANGE + DONE.
fn login_response() -> Vec<u8> {
    let mut tokens = BytesMut::new();

    // LOGINACK
    let mut ack = BytesMut::new();
    ack.put_u8(1); // interface: TSQL
    ack.put_u32_le(0x74000004);
    let name = "Microsoft SQL Server";
    ack.put_u8(name.len() as u8);
    for unit in name.encode_utf16() {
        ack.put_u16_le(unit);
    }
    ack.put_u32_le(0x10000000);
    tokens.put_u8(0xAD);
    tokens.put_u16_le(ack.len() as u16);
    tokens.put_slice(&ack);

    // ENVCHANGE packet size 4096 -> 4096
    let mut env = BytesMut::new();
    env.put_u8(4);
    for value in ["4096", "4096"] {
        env.put_u8(value.len() as u8);
        for unit in value.encode_utf16() {
            env.put_u16_le(unit);
        }
    }
    tokens.put_u8(0xE3);
    tokens.put_u16_le(env.len() as u16);
    tokens.put_slice(&env);

    // DONE
    tokens.put_u8(0xFD);
    tokens.put_u16_le(0);
    tokens.put_u16_le(0);
    tokens.put_u64_le(0);

    tokens.to_vec()
}

/// COLMETADATA for `(id INT NOT NULL, t DATETIME2(0) NULL)`.
fn colmetadata_id_dt2() -> Vec<u8> {
    let mut raw = vec![0x81u8, 2, 0];
    raw.extend_from_slice(&0u32.to_le_bytes());
    raw.extend_from_slice(&0u16.to_le_bytes());
    raw.push(0x38);
    raw.push(2);
    raw.extend_from_slice(&[b'i', 0, b'd', 0]);
    raw.extend_from_slice(&0u32.to_le_bytes());
    raw.extend_from_slice(&1u16.to_le_bytes());
    raw.push(0x2A);
    raw.push(0); // scale 0
    raw.push(1);
    raw.extend_from_slice(&[b't', 0]);
    raw
}

/// 2020-04-04 12:12:48 at DATETIME2(0).
fn dt2_scale0_value() -> Vec<u8> {
    let ticks: u64 = 12 * 3600 + 12 * 60 + 48;
    let days: u32 = 737_518;
    let mut raw = vec![6u8];
    raw.extend_from_slice(&ticks.to_le_bytes()[..3]);
    raw.extend_from_slice(&days.to_le_bytes()[..3]);
    raw
}

fn done_final(rows: u64) -> Vec<u8> {
    let mut raw = vec![0xFD];
    raw.extend_from_slice(&0x0010u16.to_le_bytes());
    raw.extend_from_slice(&0x00C1u16.to_le_bytes());
    raw.extend_from_slice(&rows.to_le_bytes());
    raw
}

fn done_attention() -> Vec<u8> {
    let mut raw = vec![0xFD];
    raw.extend_from_slice(&0x0020u16.to_le_bytes());
    raw.extend_from_slice(&[0, 0]);
    raw.extend_from_slice(&0u64.to_le_bytes());
    raw
}

async fn serve_handshake(stream: &mut TcpStream) {
    let (ptype, _, _) = read_packet(stream).await;
    assert_eq!(ptype, 0x12, "first message must be PRELOGIN");
    stream
        .write_all(&packet(0x12, true, &prelogin_response()))
        .await
        .unwrap();

    let (ptype, login) = read_message(stream).await;
    assert_eq!(ptype, 0x10, "second message must be LOGIN7");
    assert!(!login.is_empty());
    stream
        .write_all(&packet(0x04, true, &login_response()))
        .await
        .unwrap();
}

fn test_config(port: u16) -> SessionConfig {
    let mut config = SessionConfig::new("127.0.0.1", Credentials::sql_server("sa", "pw"));
    config.port = port;
    config.encrypt = EncryptMode::Off;
    config.database = Some("testdb".to_string());
    config
}

async fn start_server<F, Fut>(script: F) -> u16
where
    F: FnOnce(TcpStream) -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        script(stream).await;
    });
    port
}

#[tokio::test]
async fn login_and_row_path_scale_zero() {
    let port = start_server(|mut stream| async move {
        serve_handshake(&mut stream).await;

        let (ptype, _) = read_message(&mut stream).await;
        assert_eq!(ptype, 0x01, "expected SQL_BATCH");

        let mut response = colmetadata_id_dt2();
        response.push(0xD1);
        response.extend_from_slice(&1i32.to_le_bytes());
        response.extend_from_slice(&dt2_scale0_value());
        response.extend_from_slice(&done_final(1));
        stream.write_all(&packet(0x04, true, &response)).await.unwrap();
    })
    .await;

    let mut session = Session::connect(test_config(port)).await.unwrap();
    assert_eq!(session.state(), SessionState::Idle);
    assert_eq!(session.packet_size(), 4096);

    let (columns, rows) = session
        .query_rows("SELECT id, t FROM dbo.T WHERE id = 1")
        .await
        .unwrap();
    let columns = columns.unwrap();
    assert_eq!(columns.len(), 2);
    assert_eq!(columns[0].name, "id");

    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0][0], SqlValue::Int(1));
    let SqlValue::DateTime(dt) = &rows[0][1] else {
        panic!("expected datetime, got {:?}", rows[0][1]);
    };
    assert_eq!(dt.to_string(), "2020-04-04 12:12:48");

    assert_eq!(session.state(), SessionState::Idle);
    assert!(session.is_recyclable());
}

#[tokio::test]
async fn nbc_row_with_trailing_nullable_padding() {
    // Regression: 12 trailing nullable columns force NBCROW; the
    // DATETIME2(0) value must decode identically to the ROW path.
    let port = start_server(|mut stream| async move {
        serve_handshake(&mut stream).await;
        let (_, _) = read_message(&mut stream).await;

        // COLMETADATA: id INT, t DATETIME2(0), pad0..pad11 INTN NULL.
        let mut response = vec![0x81u8];
        response.extend_from_slice(&14u16.to_le_bytes());
        response.extend_from_slice(&0u32.to_le_bytes());
        response.extend_from_slice(&0u16.to_le_bytes());
        response.push(0x38);
        response.push(2);
        response.extend_from_slice(&[b'i', 0, b'd', 0]);
        response.extend_from_slice(&0u32.to_le_bytes());
        response.extend_from_slice(&1u16.to_le_bytes());
        response.push(0x2A);
        response.push(0);
        response.push(1);
        response.extend_from_slice(&[b't', 0]);
        for i in 0..12u8 {
            response.extend_from_slice(&0u32.to_le_bytes());
            response.extend_from_slice(&1u16.to_le_bytes());
            response.push(0x26);
            response.push(4);
            response.push(2);
            response.extend_from_slice(&[b'p', 0, b'0' + (i % 10), 0]);
        }

        // NBCROW: columns 2..=13 NULL (bits 2..13), id and t present.
        response.push(0xD2);
        response.extend_from_slice(&[0b1111_1100, 0b0011_1111]);
        response.extend_from_slice(&1i32.to_le_bytes());
        response.extend_from_slice(&dt2_scale0_value());
        response.extend_from_slice(&done_final(1));
        stream.write_all(&packet(0x04, true, &response)).await.unwrap();
    })
    .await;

    let mut session = Session::connect(test_config(port)).await.unwrap();
    let (_, rows) = session.query_rows("SELECT * FROM dbo.T").await.unwrap();

    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].len(), 14);
    let SqlValue::DateTime(dt) = &rows[0][1] else {
        panic!("expected datetime, got {:?}", rows[0][1]);
    };
    assert_eq!(dt.to_string(), "2020-04-04 12:12:48");
    assert!(rows[0][2..].iter().all(SqlValue::is_null));
}

#[tokio::test]
async fn cancellation_drains_and_recycles_the_session() {
    let port = start_server(|mut stream| async move {
        serve_handshake(&mut stream).await;
        let (_, _) = read_message(&mut stream).await;

        // Metadata plus a first burst of rows, message left open (no EOM).
        let mut burst = colmetadata_id_dt2();
        for i in 0..4i32 {
            burst.push(0xD1);
            burst.extend_from_slice(&i.to_le_bytes());
            burst.push(0); // t NULL
        }
        stream.write_all(&packet(0x04, false, &burst)).await.unwrap();

        // Wait for ATTENTION, then acknowledge.
        let (ptype, _, _) = read_packet(&mut stream).await;
        assert_eq!(ptype, 0x06, "expected ATTENTION");
        stream
            .write_all(&packet(0x04, true, &done_attention()))
            .await
            .unwrap();

        // Next query on the recycled session.
        let (ptype, _) = read_message(&mut stream).await;
        assert_eq!(ptype, 0x01);
        let mut response = colmetadata_id_dt2();
        response.push(0xD1);
        response.extend_from_slice(&7i32.to_le_bytes());
        response.push(0);
        response.extend_from_slice(&done_final(1));
        stream.write_all(&packet(0x04, true, &response)).await.unwrap();
    })
    .await;

    let mut session = Session::connect(test_config(port)).await.unwrap();

    {
        let mut stream = session.query("SELECT id, t FROM dbo.Big").await.unwrap();
        let token = stream.cancel_token().unwrap();

        let mut chunk = RowChunk::with_capacity(4);
        let filled = stream.fill_chunk(&mut chunk).await.unwrap();
        assert_eq!(filled, 4);

        // External cancellation mid-stream.
        token.cancel().await.unwrap();
        chunk.reset();
        let filled = stream.fill_chunk(&mut chunk).await.unwrap();
        assert_eq!(filled, 0, "cancelled stream reports end of stream");
    }

    // The session is Idle and reusable.
    assert_eq!(session.state(), SessionState::Idle);
    assert!(session.is_recyclable());

    let (_, rows) = session.query_rows("SELECT TOP 1 id, t FROM dbo.T").await.unwrap();
    assert_eq!(rows[0][0], SqlValue::Int(7));
}

#[tokio::test]
async fn server_error_restores_idle_session() {
    let port = start_server(|mut stream| async move {
        serve_handshake(&mut stream).await;
        let (_, _) = read_message(&mut stream).await;

        // ERROR 208 (severity 16) followed by DONE with the error bit.
        let mut tokens = BytesMut::new();
        let mut body = BytesMut::new();
        body.put_i32_le(208);
        body.put_u8(1);
        body.put_u8(16);
        let message = "Invalid object name 'missing'.";
        body.put_u16_le(message.len() as u16);
        for unit in message.encode_utf16() {
            body.put_u16_le(unit);
        }
        body.put_u8(0);
        body.put_u8(0);
        body.put_i32_le(1);
        tokens.put_u8(0xAA);
        tokens.put_u16_le(body.len() as u16);
        tokens.put_slice(&body);
        tokens.put_u8(0xFD);
        tokens.put_u16_le(0x0002);
        tokens.put_u16_le(0);
        tokens.put_u64_le(0);
        stream.write_all(&packet(0x04, true, &tokens)).await.unwrap();
    })
    .await;

    let mut session = Session::connect(test_config(port)).await.unwrap();
    let err = session.query_rows("SELECT * FROM missing").await.unwrap_err();
    let mssql_session::SessionError::Server { number, class, .. } = err else {
        panic!("expected server error, got {err:?}");
    };
    assert_eq!(number, 208);
    assert_eq!(class, 16);

    // Severity 16 is a user error; the connection survives.
    assert_eq!(session.state(), SessionState::Idle);
    assert!(session.is_recyclable());
}
