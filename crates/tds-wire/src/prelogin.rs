//! PRELOGIN message construction and response parsing.
//!
//! PRELOGIN is the first message on a new connection. It is an option table
//! of 5-byte `(id, offset, length)` entries terminated by 0xFF, followed by
//! the option payloads. The client always advertises VERSION and
//! ENCRYPTION; FEDAUTHREQUIRED is added when talking to Azure endpoints.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::WireError;

/// PRELOGIN option identifiers.
mod option_id {
    pub const VERSION: u8 = 0x00;
    pub const ENCRYPTION: u8 = 0x01;
    pub const FEDAUTHREQUIRED: u8 = 0x06;
    pub const TERMINATOR: u8 = 0xFF;
}

/// Encryption negotiation level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum EncryptionLevel {
    /// Encrypt login only.
    Off = 0x00,
    /// Encrypt the whole session.
    On = 0x01,
    /// Client has no TLS support.
    NotSupported = 0x02,
    /// Encryption is mandatory.
    #[default]
    Required = 0x03,
}

impl EncryptionLevel {
    /// Map a raw byte, treating unknown values as `Off`.
    #[must_use]
    pub fn from_u8(value: u8) -> Self {
        match value {
            0x00 => Self::Off,
            0x01 => Self::On,
            0x02 => Self::NotSupported,
            _ => Self::Required,
        }
    }

    /// Whether the negotiated level requires a TLS handshake.
    #[must_use]
    pub const fn needs_tls(self) -> bool {
        !matches!(self, Self::NotSupported)
    }
}

/// PRELOGIN message, used for both request building and response parsing.
#[derive(Debug, Clone, Default)]
pub struct PreLogin {
    /// Client driver version (6 bytes: major, minor, build, sub-build).
    pub version: (u8, u8, u16, u16),
    /// Requested or negotiated encryption level.
    pub encryption: EncryptionLevel,
    /// Advertise that federated authentication is desired (Azure).
    pub fed_auth_required: bool,
}

impl PreLogin {
    /// Build a client PRELOGIN request.
    #[must_use]
    pub fn new(encryption: EncryptionLevel, fed_auth_required: bool) -> Self {
        Self {
            version: (1, 0, 0, 0),
            encryption,
            fed_auth_required,
        }
    }

    /// Encode the request payload.
    #[must_use]
    pub fn encode(&self) -> Bytes {
        let option_count = if self.fed_auth_required { 3 } else { 2 };
        let table_size = option_count * 5 + 1;
        let mut buf = BytesMut::with_capacity(table_size + 8);
        let mut data = BytesMut::new();
        let mut offset = table_size as u16;

        // VERSION: 6 bytes.
        buf.put_u8(option_id::VERSION);
        buf.put_u16(offset);
        buf.put_u16(6);
        data.put_u8(self.version.0);
        data.put_u8(self.version.1);
        data.put_u16(self.version.2);
        data.put_u16_le(self.version.3);
        offset += 6;

        // ENCRYPTION: 1 byte.
        buf.put_u8(option_id::ENCRYPTION);
        buf.put_u16(offset);
        buf.put_u16(1);
        data.put_u8(self.encryption as u8);
        offset += 1;

        // FEDAUTHREQUIRED: 1 byte.
        if self.fed_auth_required {
            buf.put_u8(option_id::FEDAUTHREQUIRED);
            buf.put_u16(offset);
            buf.put_u16(1);
            data.put_u8(0x01);
        }

        buf.put_u8(option_id::TERMINATOR);
        buf.extend_from_slice(&data);
        buf.freeze()
    }

    /// Parse a server PRELOGIN response payload.
    pub fn decode(payload: &[u8]) -> Result<Self, WireError> {
        let mut table = payload;
        let mut response = Self::default();

        loop {
            if table.is_empty() {
                return Err(WireError::MalformedPrelogin("missing terminator"));
            }
            let id = table.get_u8();
            if id == option_id::TERMINATOR {
                break;
            }
            if table.len() < 4 {
                return Err(WireError::MalformedPrelogin("truncated option entry"));
            }
            let offset = table.get_u16() as usize;
            let length = table.get_u16() as usize;
            let data = payload
                .get(offset..offset + length)
                .ok_or(WireError::MalformedPrelogin("option data out of bounds"))?;

            match id {
                option_id::VERSION if data.len() >= 6 => {
                    response.version = (
                        data[0],
                        data[1],
                        u16::from_be_bytes([data[2], data[3]]),
                        u16::from_le_bytes([data[4], data[5]]),
                    );
                }
                option_id::ENCRYPTION if !data.is_empty() => {
                    response.encryption = EncryptionLevel::from_u8(data[0]);
                }
                option_id::FEDAUTHREQUIRED if !data.is_empty() => {
                    response.fed_auth_required = data[0] == 0x01;
                }
                _ => {}
            }
        }

        Ok(response)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn request_round_trips() {
        let request = PreLogin::new(EncryptionLevel::On, true);
        let payload = request.encode();
        let parsed = PreLogin::decode(&payload).unwrap();
        assert_eq!(parsed.encryption, EncryptionLevel::On);
        assert!(parsed.fed_auth_required);
    }

    #[test]
    fn option_table_layout() {
        let payload = PreLogin::new(EncryptionLevel::Required, false).encode();
        // Two options of 5 bytes each plus terminator, then 7 data bytes.
        assert_eq!(payload.len(), 11 + 7);
        assert_eq!(payload[0], 0x00); // VERSION id
        assert_eq!(payload[5], 0x01); // ENCRYPTION id
        assert_eq!(payload[10], 0xFF); // terminator
        // ENCRYPTION data byte is last.
        assert_eq!(payload[17], 0x03);
    }

    #[test]
    fn response_with_unknown_options_is_tolerated() {
        // Server advertising INSTANCE (0x02) which we ignore.
        let mut payload = Vec::new();
        payload.extend_from_slice(&[0x01, 0x00, 0x0B, 0x00, 0x01]); // ENCRYPTION at 11
        payload.extend_from_slice(&[0x02, 0x00, 0x0C, 0x00, 0x01]); // INSTANCE at 12
        payload.push(0xFF);
        payload.push(0x02); // ENCRYPT_NOT_SUP
        payload.push(0x00);
        let parsed = PreLogin::decode(&payload).unwrap();
        assert_eq!(parsed.encryption, EncryptionLevel::NotSupported);
        assert!(!parsed.encryption.needs_tls());
    }

    #[test]
    fn missing_terminator_is_malformed() {
        let payload = [0x00u8, 0x00, 0x06, 0x00, 0x06];
        assert!(matches!(
            PreLogin::decode(&payload),
            Err(WireError::MalformedPrelogin(_))
        ));
    }
}
