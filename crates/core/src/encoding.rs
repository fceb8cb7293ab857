//! Entry name decoding: legacy code pages, the Info-ZIP Unicode Path extra field, and NFC
//! normalization of whatever comes out (macOS archivers store decomposed names).

use std::fmt;

use encoding_rs::SHIFT_JIS;
use serde::{Deserialize, Serialize};
use unicode_normalization::UnicodeNormalization;

/// Character sets an archive's raw entry names may be written in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Charset {
    #[serde(rename = "utf-8")]
    Utf8,
    /// Strict JIS X 0208 Shift-JIS, without the NEC/IBM vendor rows.
    #[serde(rename = "shift-jis")]
    ShiftJis,
    #[serde(rename = "iso-8859-1")]
    Iso8859_1,
    #[serde(rename = "cp437")]
    Cp437,
    /// Windows-31J: Shift-JIS plus the NEC and IBM extension rows.
    #[serde(rename = "ms932")]
    Ms932,
}

impl Charset {
    /// Decode a raw entry name. Returns `None` when the bytes are not valid in this
    /// charset or decode to characters no real name contains: NUL and the C1 controls
    /// that appear when a legacy code page is read as Latin-1.
    pub fn decode(self, raw: &[u8]) -> Option<String> {
        let decoded: String = match self {
            Charset::Utf8 => std::str::from_utf8(raw).ok()?.to_string(),
            Charset::ShiftJis => {
                if !is_strict_shift_jis(raw) {
                    return None;
                }
                SHIFT_JIS
                    .decode_without_bom_handling_and_without_replacement(raw)?
                    .into_owned()
            }
            Charset::Ms932 => SHIFT_JIS
                .decode_without_bom_handling_and_without_replacement(raw)?
                .into_owned(),
            Charset::Iso8859_1 => raw.iter().map(|&b| char::from(b)).collect(),
            Charset::Cp437 => raw.iter().map(|&b| cp437_char(b)).collect(),
        };
        if decoded.chars().any(is_misdecoded) {
            return None;
        }
        Some(decoded.nfc().collect())
    }

    pub fn label(self) -> &'static str {
        match self {
            Charset::Utf8 => "UTF-8",
            Charset::ShiftJis => "Shift_JIS",
            Charset::Iso8859_1 => "ISO-8859-1",
            Charset::Cp437 => "CP437",
            Charset::Ms932 => "MS932",
        }
    }
}

impl fmt::Display for Charset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Plain ASCII controls such as the `\r` in macOS `Icon\r` files are left for the entry filter.
fn is_misdecoded(c: char) -> bool {
    c == '\0' || ('\u{80}'..='\u{9f}').contains(&c)
}

/// Header id of the Info-ZIP Unicode Path extra field.
const UNICODE_PATH_FIELD: u16 = 0x7075;

/// Extract the UTF-8 name from an Info-ZIP Unicode Path extra field, if present and its
/// CRC-32 matches the raw header name it claims to replace.
pub fn unicode_path_from_extra(raw_name: &[u8], extra: &[u8]) -> Option<String> {
    let mut pos = 0;
    while pos + 4 <= extra.len() {
        let id = u16::from_le_bytes([extra[pos], extra[pos + 1]]);
        let size = u16::from_le_bytes([extra[pos + 2], extra[pos + 3]]) as usize;
        let start = pos + 4;
        let end = start + size;
        if end > extra.len() {
            return None;
        }
        let body = &extra[start..end];
        if id == UNICODE_PATH_FIELD && body.len() >= 5 && body[0] == 1 {
            let crc = u32::from_le_bytes([body[1], body[2], body[3], body[4]]);
            if crc == crc32fast::hash(raw_name) {
                return std::str::from_utf8(&body[5..])
                    .ok()
                    .map(|s| s.nfc().collect());
            }
        }
        pos = end;
    }
    None
}

/// JIS X 0208 Shift-JIS structure check: rejects the NEC special row (0x87), the NEC-selected
/// IBM rows (0xED, 0xEE), user-defined rows (0xF0..=0xF9) and IBM extensions (0xFA..=0xFC).
fn is_strict_shift_jis(raw: &[u8]) -> bool {
    let mut i = 0;
    while i < raw.len() {
        let b = raw[i];
        match b {
            0x00..=0x7F | 0xA1..=0xDF => i += 1,
            0x87 | 0xED | 0xEE | 0xF0..=0xFC => return false,
            0x81..=0x9F | 0xE0..=0xEF => {
                let Some(&trail) = raw.get(i + 1) else {
                    return false;
                };
                if !matches!(trail, 0x40..=0x7E | 0x80..=0xFC) {
                    return false;
                }
                i += 2;
            }
            _ => return false,
        }
    }
    true
}

#[rustfmt::skip]
const CP437_HIGH: [char; 128] = [
    'Ç', 'ü', 'é', 'â', 'ä', 'à', 'å', 'ç', 'ê', 'ë', 'è', 'ï', 'î', 'ì', 'Ä', 'Å',
    'É', 'æ', 'Æ', 'ô', 'ö', 'ò', 'û', 'ù', 'ÿ', 'Ö', 'Ü', '¢', '£', '¥', '₧', 'ƒ',
    'á', 'í', 'ó', 'ú', 'ñ', 'Ñ', 'ª', 'º', '¿', '⌐', '¬', '½', '¼', '¡', '«', '»',
    '░', '▒', '▓', '│', '┤', '╡', '╢', '╖', '╕', '╣', '║', '╗', '╝', '╜', '╛', '┐',
    '└', '┴', '┬', '├', '─', '┼', '╞', '╟', '╚', '╔', '╩', '╦', '╠', '═', '╬', '╧',
    '╨', '╤', '╥', '╙', '╘', '╒', '╓', '╫', '╪', '┘', '┌', '█', '▄', '▌', '▐', '▀',
    'α', 'ß', 'Γ', 'π', 'Σ', 'σ', 'µ', 'τ', 'Φ', 'Θ', 'Ω', 'δ', '∞', 'φ', 'ε', '∩',
    '≡', '±', '≥', '≤', '⌠', '⌡', '÷', '≈', '°', '∙', '·', '√', 'ⁿ', '²', '■', '\u{a0}',
];

fn cp437_char(b: u8) -> char {
    if b < 0x80 {
        char::from(b)
    } else {
        CP437_HIGH[(b - 0x80) as usize]
    }
}
