use std::fmt;
use std::io::Read;

use crate::error::{Error, Result};

pub(super) const BOM_UTF8: &[u8] = &[0xEF, 0xBB, 0xBF];
pub(super) const BOM_UTF16LE: &[u8] = &[0xFF, 0xFE];
pub(super) const BOM_UTF16BE: &[u8] = &[0xFE, 0xFF];
pub(super) const BOM_UTF32LE: &[u8] = &[0xFF, 0xFE, 0x00, 0x00];
pub(super) const BOM_UTF32BE: &[u8] = &[0x00, 0x00, 0xFE, 0xFF];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Encoding {
    Utf8,
    Utf16Le,
    Utf16Be,
    Utf32Le,
    Utf32Be,
    Windows1252,
    ShiftJis,
}

impl Encoding {
    fn bom(self) -> Option<&'static [u8]> {
        match self {
            Encoding::Utf8 => Some(BOM_UTF8),
            Encoding::Utf16Le => Some(BOM_UTF16LE),
            Encoding::Utf16Be => Some(BOM_UTF16BE),
            Encoding::Utf32Le => Some(BOM_UTF32LE),
            Encoding::Utf32Be => Some(BOM_UTF32BE),
            Encoding::Windows1252 | Encoding::ShiftJis => None,
        }
    }
}

impl fmt::Display for Encoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Encoding::Utf8 => "UTF-8",
            Encoding::Utf16Le => "UTF-16 LE",
            Encoding::Utf16Be => "UTF-16 BE",
            Encoding::Utf32Le => "UTF-32 LE",
            Encoding::Utf32Be => "UTF-32 BE",
            Encoding::Windows1252 => "Windows-1252",
            Encoding::ShiftJis => "Shift JIS",
        };
        f.write_str(name)
    }
}

/// Text content carrying its original encoding and BOM flag, so that
/// writing it back reproduces the exact input bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Text {
    content: String,
    encoding: Encoding,
    has_bom: bool,
}

impl Text {
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            encoding: Encoding::Utf8,
            has_bom: false,
        }
    }

    pub fn with_encoding(content: impl Into<String>, encoding: Encoding, has_bom: bool) -> Self {
        Self {
            content: content.into(),
            encoding,
            has_bom,
        }
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    pub fn encoding(&self) -> Encoding {
        self.encoding
    }

    pub fn has_bom(&self) -> bool {
        self.has_bom
    }

    /// Encodes the content back to its original encoding, BOM included if
    /// the original had one.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        if self.has_bom
            && let Some(bom) = self.encoding.bom()
        {
            out.extend_from_slice(bom);
        }

        match self.encoding {
            Encoding::Utf8 => out.extend_from_slice(self.content.as_bytes()),
            Encoding::Utf16Le => {
                for unit in self.content.encode_utf16() {
                    out.extend_from_slice(&unit.to_le_bytes());
                }
            }
            Encoding::Utf16Be => {
                for unit in self.content.encode_utf16() {
                    out.extend_from_slice(&unit.to_be_bytes());
                }
            }
            Encoding::Utf32Le => {
                for c in self.content.chars() {
                    out.extend_from_slice(&(c as u32).to_le_bytes());
                }
            }
            Encoding::Utf32Be => {
                for c in self.content.chars() {
                    out.extend_from_slice(&(c as u32).to_be_bytes());
                }
            }
            Encoding::Windows1252 => {
                let (encoded, _, _) = encoding_rs::WINDOWS_1252.encode(&self.content);
                out.extend_from_slice(&encoded);
            }
            Encoding::ShiftJis => {
                let (encoded, _, _) = encoding_rs::SHIFT_JIS.encode(&self.content);
                out.extend_from_slice(&encoded);
            }
        }

        Ok(out)
    }
}

/// Reads everything from `r` and decodes it with encoding detection.
pub fn read_from<R: Read>(mut r: R) -> Result<Text> {
    let mut buf = Vec::new();
    r.read_to_end(&mut buf)?;
    decode_bytes(&buf)
}

/// Detects the encoding of `data` and decodes it to UTF-8 text. Detection
/// order: BOM (UTF-32 before UTF-16 — the UTF-32 LE BOM starts with the
/// UTF-16 LE BOM), NUL-position heuristics, UTF-8 validation.
pub fn decode_bytes(data: &[u8]) -> Result<Text> {
    if data.is_empty() {
        return Ok(Text::new(""));
    }

    if let Some(rest) = data.strip_prefix(BOM_UTF32LE) {
        return Ok(Text::with_encoding(decode_utf32le(rest), Encoding::Utf32Le, true));
    }
    if let Some(rest) = data.strip_prefix(BOM_UTF32BE) {
        return Ok(Text::with_encoding(decode_utf32be(rest), Encoding::Utf32Be, true));
    }
    if let Some(rest) = data.strip_prefix(BOM_UTF16LE) {
        return Ok(Text::with_encoding(decode_utf16(rest, u16::from_le_bytes), Encoding::Utf16Le, true));
    }
    if let Some(rest) = data.strip_prefix(BOM_UTF16BE) {
        return Ok(Text::with_encoding(decode_utf16(rest, u16::from_be_bytes), Encoding::Utf16Be, true));
    }
    if let Some(rest) = data.strip_prefix(BOM_UTF8) {
        let content = String::from_utf8_lossy(rest).into_owned();
        return Ok(Text::with_encoding(content, Encoding::Utf8, true));
    }

    if data.len() >= 2 && has_utf16le_pattern(data) {
        return Ok(Text::with_encoding(decode_utf16(data, u16::from_le_bytes), Encoding::Utf16Le, false));
    }
    if data.len() >= 2 && has_utf16be_pattern(data) {
        return Ok(Text::with_encoding(decode_utf16(data, u16::from_be_bytes), Encoding::Utf16Be, false));
    }
    if data.len() >= 4 {
        if has_utf32le_pattern(data) {
            return Ok(Text::with_encoding(decode_utf32le(data), Encoding::Utf32Le, false));
        }
        if has_utf32be_pattern(data) {
            return Ok(Text::with_encoding(decode_utf32be(data), Encoding::Utf32Be, false));
        }
    }

    match std::str::from_utf8(data) {
        Ok(s) => Ok(Text::with_encoding(s.to_owned(), Encoding::Utf8, false)),
        Err(_) => Err(Error::UnknownEncoding),
    }
}

fn has_utf16le_pattern(data: &[u8]) -> bool {
    if data.len() < 4 || data.len() % 2 != 0 {
        return false;
    }

    let mut nul_count = 0;
    let mut total_checked = 0;
    let mut i = 1;
    while i < data.len() && i < 50 {
        if data[i] == 0 {
            nul_count += 1;
        }
        total_checked += 1;
        i += 2;
    }

    // At least two units with more than a third of the high bytes zero.
    total_checked >= 2 && nul_count > total_checked / 3
}

fn has_utf16be_pattern(data: &[u8]) -> bool {
    let mut nul_count = 0;
    let mut i = 0;
    while i < data.len() && i < 100 {
        if data[i] == 0 {
            nul_count += 1;
        }
        i += 2;
    }
    data.len() > 10 && nul_count > data.len() / 20
}

fn has_utf32le_pattern(data: &[u8]) -> bool {
    let mut nul_count = 0;
    let mut i = 1;
    while i < data.len() && i < 100 {
        if i + 2 < data.len() && data[i] == 0 && data[i + 1] == 0 && data[i + 2] == 0 {
            nul_count += 1;
        }
        i += 4;
    }
    data.len() > 20 && nul_count > 0
}

fn has_utf32be_pattern(data: &[u8]) -> bool {
    let mut nul_count = 0;
    let mut i = 0;
    while i < data.len() && i < 100 {
        if i + 2 < data.len() && data[i] == 0 && data[i + 1] == 0 && data[i + 2] == 0 {
            nul_count += 1;
        }
        i += 4;
    }
    data.len() > 20 && nul_count > 0
}

fn decode_utf16(data: &[u8], from_bytes: fn([u8; 2]) -> u16) -> String {
    let mut units: Vec<u16> = data
        .chunks_exact(2)
        .map(|pair| from_bytes([pair[0], pair[1]]))
        .collect();
    if data.len() % 2 != 0 {
        units.push(char::REPLACEMENT_CHARACTER as u16);
    }
    String::from_utf16_lossy(&units)
}

fn decode_utf32le(data: &[u8]) -> String {
    decode_utf32(data, u32::from_le_bytes)
}

fn decode_utf32be(data: &[u8]) -> String {
    decode_utf32(data, u32::from_be_bytes)
}

fn decode_utf32(data: &[u8], from_bytes: fn([u8; 4]) -> u32) -> String {
    let mut out = String::new();
    for quad in data.chunks_exact(4) {
        let value = from_bytes([quad[0], quad[1], quad[2], quad[3]]);
        out.push(char::from_u32(value).unwrap_or(char::REPLACEMENT_CHARACTER));
    }
    if data.len() % 4 != 0 {
        out.push(char::REPLACEMENT_CHARACTER);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_content() {
        let text = read_from(&b""[..]).unwrap();
        assert_eq!(text.content(), "");
        assert_eq!(text.encoding(), Encoding::Utf8);
        assert!(!text.has_bom());
    }

    #[test]
    fn utf8_without_bom() {
        let content = "Hello, 世界!";
        let text = decode_bytes(content.as_bytes()).unwrap();
        assert_eq!(text.content(), content);
        assert_eq!(text.encoding(), Encoding::Utf8);
        assert!(!text.has_bom());
    }

    #[test]
    fn utf8_with_bom() {
        let content = "Hello, 世界!";
        let mut data = BOM_UTF8.to_vec();
        data.extend_from_slice(content.as_bytes());

        let text = decode_bytes(&data).unwrap();
        assert_eq!(text.content(), content);
        assert_eq!(text.encoding(), Encoding::Utf8);
        assert!(text.has_bom());
    }

    #[test]
    fn utf16le_with_bom() {
        let data = [
            0xFF, 0xFE, 0x48, 0x00, 0x65, 0x00, 0x6C, 0x00, 0x6C, 0x00, 0x6F, 0x00,
        ];
        let text = decode_bytes(&data).unwrap();
        assert_eq!(text.content(), "Hello");
        assert_eq!(text.encoding(), Encoding::Utf16Le);
        assert!(text.has_bom());
    }

    #[test]
    fn utf16be_with_bom() {
        let data = [
            0xFE, 0xFF, 0x00, 0x48, 0x00, 0x65, 0x00, 0x6C, 0x00, 0x6C, 0x00, 0x6F,
        ];
        let text = decode_bytes(&data).unwrap();
        assert_eq!(text.content(), "Hello");
        assert_eq!(text.encoding(), Encoding::Utf16Be);
        assert!(text.has_bom());
    }

    #[test]
    fn utf16le_without_bom() {
        let data = [0x48, 0x00, 0x65, 0x00, 0x6C, 0x00, 0x6C, 0x00, 0x6F, 0x00];
        let text = decode_bytes(&data).unwrap();
        assert_eq!(text.content(), "Hello");
        assert_eq!(text.encoding(), Encoding::Utf16Le);
        assert!(!text.has_bom());
    }

    #[test]
    fn utf32le_with_bom() {
        let data = [
            0xFF, 0xFE, 0x00, 0x00, 0x48, 0x00, 0x00, 0x00, 0x69, 0x00, 0x00, 0x00,
        ];
        let text = decode_bytes(&data).unwrap();
        assert_eq!(text.content(), "Hi");
        assert_eq!(text.encoding(), Encoding::Utf32Le);
        assert!(text.has_bom());
    }

    #[test]
    fn utf32be_with_bom() {
        let data = [
            0x00, 0x00, 0xFE, 0xFF, 0x00, 0x00, 0x00, 0x48, 0x00, 0x00, 0x00, 0x69,
        ];
        let text = decode_bytes(&data).unwrap();
        assert_eq!(text.content(), "Hi");
        assert_eq!(text.encoding(), Encoding::Utf32Be);
        assert!(text.has_bom());
    }

    #[test]
    fn invalid_bytes_fail_detection() {
        // Invalid UTF-8, no NUL pattern.
        let data = [0xC3, 0x28, 0xA0, 0xA1];
        assert!(matches!(decode_bytes(&data), Err(Error::UnknownEncoding)));
    }

    #[test]
    fn round_trip() {
        let cases: Vec<(&str, Vec<u8>)> = vec![
            ("utf8 with bom", {
                let mut v = BOM_UTF8.to_vec();
                v.extend_from_slice(b"Hello");
                v
            }),
            ("utf8 without bom", b"Hello".to_vec()),
            (
                "utf16le with bom",
                vec![0xFF, 0xFE, 0x48, 0x00, 0x69, 0x00],
            ),
            (
                "utf16be without bom",
                vec![
                    0x00, 0x48, 0x00, 0x65, 0x00, 0x6C, 0x00, 0x6C, 0x00, 0x6F, 0x00, 0x21,
                ],
            ),
            ("empty", Vec::new()),
        ];

        for (name, data) in cases {
            let text = decode_bytes(&data).unwrap();
            let out = text.to_bytes().unwrap();
            assert_eq!(out, data, "round-trip failed for {name}");
        }
    }

    #[test]
    fn windows1252_encode() {
        let text = Text::with_encoding("caf\u{e9}", Encoding::Windows1252, false);
        assert_eq!(text.to_bytes().unwrap(), b"caf\xe9");
    }

    #[test]
    fn shift_jis_encode() {
        let text = Text::with_encoding("日本", Encoding::ShiftJis, false);
        assert_eq!(text.to_bytes().unwrap(), vec![0x93, 0xFA, 0x96, 0x7B]);
    }
}
