//! LOGIN7 message construction.
//!
//! LOGIN7 carries a fixed 94-byte header followed by an offset/length table
//! pointing into a UTF-16LE variable-data region. SQL authentication puts
//! an obfuscated password in that region; Azure AD authentication sends a
//! zero-length password and appends a FEDAUTH feature extension carrying
//! the access token.

use bytes::{BufMut, Bytes, BytesMut};

use crate::codec::{utf16_len, write_utf16};

/// Fixed LOGIN7 header size.
pub const LOGIN7_HEADER_SIZE: usize = 94;

/// TDS protocol version 7.4 as written in the LOGIN7 header.
pub const TDS_VERSION_74: u32 = 0x74_00_00_04;

/// FEDAUTH feature extension id.
const FEATURE_FEDAUTH: u8 = 0x02;
/// Feature extension list terminator.
const FEATURE_TERMINATOR: u8 = 0xFF;

/// FEDAUTH feature extension: a pre-acquired access token.
#[derive(Clone)]
pub struct FedAuthExtension {
    /// The bearer access token.
    pub token: String,
    /// Library tag reported to the server (0x02 = security token).
    pub library: u8,
    /// Workflow tag (0x01 = token-based).
    pub workflow: u8,
    /// Echo the server's FEDAUTHREQUIRED response bit.
    pub echo: bool,
}

impl FedAuthExtension {
    /// Token-based federated authentication.
    #[must_use]
    pub fn security_token(token: impl Into<String>, echo: bool) -> Self {
        Self {
            token: token.into(),
            library: 0x02,
            workflow: 0x01,
            echo,
        }
    }

    fn encode(&self) -> Bytes {
        let token_bytes = utf16_len(&self.token) * 2;
        let mut data = BytesMut::with_capacity(8 + token_bytes);
        // Option bytes: library/echo, workflow, reserved.
        data.put_u8((self.library << 1) | u8::from(self.echo));
        data.put_u8(self.workflow);
        data.put_u16_le(0);
        data.put_u32_le(token_bytes as u32);
        write_utf16(&mut data, &self.token);
        data.freeze()
    }
}

impl std::fmt::Debug for FedAuthExtension {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FedAuthExtension")
            .field("token", &"[REDACTED]")
            .field("library", &self.library)
            .field("workflow", &self.workflow)
            .finish()
    }
}

/// LOGIN7 message builder.
#[derive(Clone)]
pub struct Login7 {
    /// TDS version to request.
    pub tds_version: u32,
    /// Requested packet size.
    pub packet_size: u32,
    /// Client program version.
    pub client_prog_version: u32,
    /// Client process id.
    pub client_pid: u32,
    /// Connection id (0 for new connections).
    pub connection_id: u32,
    /// Client LCID.
    pub client_lcid: u32,
    /// Client machine name.
    pub hostname: String,
    /// SQL authentication user name (empty with FEDAUTH).
    pub username: String,
    /// SQL authentication password (empty with FEDAUTH).
    pub password: String,
    /// Application name.
    pub app_name: String,
    /// Target server name.
    pub server_name: String,
    /// Interface library name.
    pub library_name: String,
    /// Language (usually empty).
    pub language: String,
    /// Initial database.
    pub database: String,
    /// Client MAC address (zeros).
    pub client_id: [u8; 6],
    /// Attach-database file name.
    pub attach_db_file: String,
    /// Change-password field (unused).
    pub new_password: String,
    /// Federated authentication extension.
    pub fed_auth: Option<FedAuthExtension>,
}

impl Default for Login7 {
    fn default() -> Self {
        Self {
            tds_version: TDS_VERSION_74,
            packet_size: crate::packet::DEFAULT_PACKET_SIZE as u32,
            client_prog_version: 0,
            client_pid: std::process::id(),
            connection_id: 0,
            client_lcid: 0x0409,
            hostname: String::new(),
            username: String::new(),
            password: String::new(),
            app_name: String::from("mssql-bridge"),
            server_name: String::new(),
            library_name: String::from("mssql-bridge"),
            language: String::new(),
            database: String::new(),
            client_id: [0; 6],
            attach_db_file: String::new(),
            new_password: String::new(),
            fed_auth: None,
        }
    }
}

impl Login7 {
    /// Start a LOGIN7 builder with defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Use SQL authentication.
    #[must_use]
    pub fn with_sql_auth(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.username = username.into();
        self.password = password.into();
        self.fed_auth = None;
        self
    }

    /// Use Azure AD federated authentication; the password stays empty.
    #[must_use]
    pub fn with_fed_auth(mut self, extension: FedAuthExtension) -> Self {
        self.username = String::new();
        self.password = String::new();
        self.fed_auth = Some(extension);
        self
    }

    /// Set the initial database.
    #[must_use]
    pub fn with_database(mut self, database: impl Into<String>) -> Self {
        self.database = database.into();
        self
    }

    /// Set the target server name.
    #[must_use]
    pub fn with_server_name(mut self, server_name: impl Into<String>) -> Self {
        self.server_name = server_name.into();
        self
    }

    /// Set the requested packet size.
    #[must_use]
    pub fn with_packet_size(mut self, packet_size: u32) -> Self {
        self.packet_size = packet_size;
        self
    }

    /// Encode the LOGIN7 payload.
    #[must_use]
    pub fn encode(&self) -> Bytes {
        let hostname_len = utf16_len(&self.hostname) as u16;
        let username_len = utf16_len(&self.username) as u16;
        let password_len = utf16_len(&self.password) as u16;
        let app_name_len = utf16_len(&self.app_name) as u16;
        let server_name_len = utf16_len(&self.server_name) as u16;
        let library_name_len = utf16_len(&self.library_name) as u16;
        let language_len = utf16_len(&self.language) as u16;
        let database_len = utf16_len(&self.database) as u16;
        let attach_db_len = utf16_len(&self.attach_db_file) as u16;
        let new_password_len = utf16_len(&self.new_password) as u16;

        let mut var_data = BytesMut::new();
        let mut offset = LOGIN7_HEADER_SIZE as u16;

        let hostname_offset = offset;
        write_utf16(&mut var_data, &self.hostname);
        offset += hostname_len * 2;

        let username_offset = offset;
        write_utf16(&mut var_data, &self.username);
        offset += username_len * 2;

        let password_offset = offset;
        write_obfuscated_password(&mut var_data, &self.password);
        offset += password_len * 2;

        let app_name_offset = offset;
        write_utf16(&mut var_data, &self.app_name);
        offset += app_name_len * 2;

        let server_name_offset = offset;
        write_utf16(&mut var_data, &self.server_name);
        offset += server_name_len * 2;

        // With a feature extension the "unused" slot becomes a 4-byte
        // pointer to the extension block at the end of the variable data.
        let extension = self.fed_auth.as_ref().map(FedAuthExtension::encode);
        let (extension_offset, extension_len) = if extension.is_some() {
            let pointer_target = offset
                + 4
                + library_name_len * 2
                + language_len * 2
                + database_len * 2
                + attach_db_len * 2
                + new_password_len * 2;
            var_data.put_u32_le(u32::from(pointer_target));
            let slot = offset;
            offset += 4;
            (slot, 4u16)
        } else {
            (offset, 0u16)
        };

        let library_name_offset = offset;
        write_utf16(&mut var_data, &self.library_name);
        offset += library_name_len * 2;

        let language_offset = offset;
        write_utf16(&mut var_data, &self.language);
        offset += language_len * 2;

        let database_offset = offset;
        write_utf16(&mut var_data, &self.database);
        offset += database_len * 2;

        // SSPI is not supported; zero-length slot pointing at current offset.
        let sspi_offset = offset;

        let attach_db_offset = offset;
        write_utf16(&mut var_data, &self.attach_db_file);
        offset += attach_db_len * 2;

        let new_password_offset = offset;
        write_obfuscated_password(&mut var_data, &self.new_password);

        if let Some(extension_data) = extension {
            var_data.put_u8(FEATURE_FEDAUTH);
            var_data.put_u32_le(extension_data.len() as u32);
            var_data.put_slice(&extension_data);
            var_data.put_u8(FEATURE_TERMINATOR);
        }

        let total_length = LOGIN7_HEADER_SIZE + var_data.len();
        let mut buf = BytesMut::with_capacity(total_length);

        buf.put_u32_le(total_length as u32);
        buf.put_u32_le(self.tds_version);
        buf.put_u32_le(self.packet_size);
        buf.put_u32_le(self.client_prog_version);
        buf.put_u32_le(self.client_pid);
        buf.put_u32_le(self.connection_id);

        // OptionFlags1: fUseDB | fDatabase (notify on database changes and
        // fail the login if the database is unavailable).
        buf.put_u8(0x60);
        // OptionFlags2: fLanguageFatal | fODBC.
        buf.put_u8(0x03);
        // TypeFlags: default SQL_DFLT.
        buf.put_u8(0x00);
        // OptionFlags3: fExtension when a feature extension follows.
        buf.put_u8(if self.fed_auth.is_some() { 0x10 } else { 0x00 });

        buf.put_i32_le(0); // client timezone (deprecated)
        buf.put_u32_le(self.client_lcid);

        buf.put_u16_le(hostname_offset);
        buf.put_u16_le(hostname_len);
        buf.put_u16_le(username_offset);
        buf.put_u16_le(username_len);
        buf.put_u16_le(password_offset);
        buf.put_u16_le(password_len);
        buf.put_u16_le(app_name_offset);
        buf.put_u16_le(app_name_len);
        buf.put_u16_le(server_name_offset);
        buf.put_u16_le(server_name_len);
        buf.put_u16_le(extension_offset);
        buf.put_u16_le(extension_len);
        buf.put_u16_le(library_name_offset);
        buf.put_u16_le(library_name_len);
        buf.put_u16_le(language_offset);
        buf.put_u16_le(language_len);
        buf.put_u16_le(database_offset);
        buf.put_u16_le(database_len);
        buf.put_slice(&self.client_id);
        buf.put_u16_le(sspi_offset);
        buf.put_u16_le(0); // SSPI length
        buf.put_u16_le(attach_db_offset);
        buf.put_u16_le(attach_db_len);
        buf.put_u16_le(new_password_offset);
        buf.put_u16_le(new_password_len);
        buf.put_u32_le(0); // SSPI long length

        buf.put_slice(&var_data);
        buf.freeze()
    }
}

impl std::fmt::Debug for Login7 {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Login7")
            .field("server_name", &self.server_name)
            .field("database", &self.database)
            .field("username", &self.username)
            .field("password", &"[REDACTED]")
            .field("fed_auth", &self.fed_auth.is_some())
            .finish_non_exhaustive()
    }
}

/// TDS password obfuscation: swap the nibbles of every byte, then XOR 0xA5.
fn write_obfuscated_password(dst: &mut impl BufMut, password: &str) {
    for unit in password.encode_utf16() {
        let low = (unit & 0xFF) as u8;
        let high = (unit >> 8) as u8;
        dst.put_u8(low.rotate_right(4) ^ 0xA5);
        dst.put_u8(high.rotate_right(4) ^ 0xA5);
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn header_layout() {
        let login = Login7::new()
            .with_sql_auth("sa", "secret")
            .with_database("db")
            .with_server_name("server");
        let payload = login.encode();

        assert!(payload.len() > LOGIN7_HEADER_SIZE);
        let total = u32::from_le_bytes([payload[0], payload[1], payload[2], payload[3]]);
        assert_eq!(total as usize, payload.len());
        let version = u32::from_le_bytes([payload[4], payload[5], payload[6], payload[7]]);
        assert_eq!(version, TDS_VERSION_74);
    }

    #[test]
    fn password_obfuscation_known_vector() {
        // 'a' = 0x0061: low 0x61 -> swap -> 0x16 -> xor 0xA5 -> 0xB3;
        // high 0x00 -> 0x00 -> 0xA5.
        let mut buf = BytesMut::new();
        write_obfuscated_password(&mut buf, "a");
        assert_eq!(&buf[..], &[0xB3, 0xA5]);
    }

    #[test]
    fn fed_auth_login_has_empty_password_and_extension() {
        let login = Login7::new()
            .with_fed_auth(FedAuthExtension::security_token("tok", true))
            .with_database("db");
        let payload = login.encode();

        // Password length field (offset 60 in the header is the password
        // length slot: header fields before the offset table are 36 bytes,
        // then hostname(4) username(4) password offset at 44..46, length at
        // 46..48).
        let password_len = u16::from_le_bytes([payload[46], payload[47]]);
        assert_eq!(password_len, 0);
        // OptionFlags3 carries the extension bit.
        assert_eq!(payload[27] & 0x10, 0x10);
        // The feature extension list ends with the terminator.
        assert_eq!(*payload.last().unwrap(), 0xFF);
        // The token is present as UTF-16LE ("t\0o\0k\0").
        let needle = [b't', 0, b'o', 0, b'k', 0];
        assert!(payload.windows(6).any(|w| w == needle));
    }

    #[test]
    fn offsets_point_into_variable_region() {
        let login = Login7::new().with_sql_auth("user", "pw");
        let payload = login.encode();
        let hostname_offset = u16::from_le_bytes([payload[36], payload[37]]) as usize;
        assert_eq!(hostname_offset, LOGIN7_HEADER_SIZE);
    }
}
