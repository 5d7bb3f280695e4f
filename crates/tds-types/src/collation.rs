//! SQL Server collation handling for non-Unicode character columns.

/// A column collation as carried in COLMETADATA (5 bytes on the wire).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Collation {
    /// Locale ID plus collation flag bits.
    pub lcid: u32,
    /// Sort ID (0 for Windows collations).
    pub sort_id: u8,
}

/// UTF-8 collation flag (SQL Server 2019+), bit 27 of the LCID field.
const UTF8_FLAG: u32 = 0x0800_0000;

impl Collation {
    /// Collation used when the integration has to fabricate metadata
    /// (bulk-load COLMETADATA for string columns): Latin1_General_CI_AS.
    pub const LATIN1_GENERAL_CI_AS: Self = Self {
        lcid: 0x0009_0409,
        sort_id: 52,
    };

    /// Whether the collation stores data as UTF-8.
    #[must_use]
    pub fn is_utf8(&self) -> bool {
        (self.lcid & UTF8_FLAG) != 0
    }

    /// The byte encoding for this collation's code page.
    ///
    /// Falls back to Windows-1252 for unknown locales, which matches the
    /// behavior of SQL Server's default installations.
    #[must_use]
    pub fn encoding(&self) -> &'static encoding_rs::Encoding {
        if self.is_utf8() {
            return encoding_rs::UTF_8;
        }
        match self.lcid & 0xFFFF {
            0x0411 => encoding_rs::SHIFT_JIS,
            0x0804 | 0x1004 => encoding_rs::GB18030,
            0x0404 | 0x0C04 | 0x1404 => encoding_rs::BIG5,
            0x0412 => encoding_rs::EUC_KR,
            0x041E => encoding_rs::WINDOWS_874,
            0x042A => encoding_rs::WINDOWS_1258,
            0x0405 | 0x040E | 0x0415 | 0x041B | 0x0424 | 0x041A => encoding_rs::WINDOWS_1250,
            0x0419 | 0x0402 | 0x0422 | 0x0423 => encoding_rs::WINDOWS_1251,
            0x0408 => encoding_rs::WINDOWS_1253,
            0x041F => encoding_rs::WINDOWS_1254,
            0x040D => encoding_rs::WINDOWS_1255,
            0x0401 | 0x0801 | 0x0C01 => encoding_rs::WINDOWS_1256,
            0x0425 | 0x0426 | 0x0427 => encoding_rs::WINDOWS_1257,
            _ => encoding_rs::WINDOWS_1252,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn utf8_flag_detected() {
        let coll = Collation {
            lcid: 0x0409 | UTF8_FLAG,
            sort_id: 0,
        };
        assert!(coll.is_utf8());
        assert_eq!(coll.encoding(), encoding_rs::UTF_8);
    }

    #[test]
    fn english_defaults_to_1252() {
        let coll = Collation {
            lcid: 0x0409,
            sort_id: 52,
        };
        assert!(!coll.is_utf8());
        assert_eq!(coll.encoding(), encoding_rs::WINDOWS_1252);
    }

    #[test]
    fn cyrillic_maps_to_1251() {
        let coll = Collation {
            lcid: 0x0419,
            sort_id: 0,
        };
        assert_eq!(coll.encoding(), encoding_rs::WINDOWS_1251);
    }
}
