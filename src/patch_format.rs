//! The `.1337` patch text format, as exported by x64dbg.
//!
//! One edit per line:
//!
//! ```text
//! >game.exe
//! 1400012A4:74->EB
//! ```
//!
//! Blank lines and lines starting with `>` or `#` are skipped.

use thiserror::Error;

use crate::descriptor::ByteEdit;

/// Offsets left after subtracting the base must stay below this bound.
pub const MAX_RELATIVE_OFFSET: u64 = 1 << 60;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LineError {
    #[error("missing ':' after the offset")]
    MissingColon,
    #[error("missing '->' between original and patched byte")]
    MissingArrow,
    #[error("{0} field is empty")]
    EmptyField(&'static str),
    #[error("invalid character {0:?}")]
    InvalidChar(char),
    #[error("{0} value does not fit")]
    Overflow(&'static str),
    #[error("offset {offset:#x} is below the base offset {base:#x}")]
    BelowBase { offset: u64, base: u64 },
    #[error("relative offset {0:#x} is out of range")]
    OffsetOutOfRange(u64),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid patch line {line_number}: {reason}")]
pub struct ParseError {
    pub line_number: usize,
    pub reason: LineError,
}

fn parse_hex(field: &str, name: &'static str) -> Result<u64, LineError> {
    if field.is_empty() {
        return Err(LineError::EmptyField(name));
    }
    if let Some(c) = field.chars().find(|c| !c.is_ascii_hexdigit()) {
        return Err(LineError::InvalidChar(c));
    }
    u64::from_str_radix(field, 16).map_err(|_| LineError::Overflow(name))
}

fn parse_byte(field: &str, name: &'static str) -> Result<u8, LineError> {
    let value = parse_hex(field, name)?;
    u8::try_from(value).map_err(|_| LineError::Overflow(name))
}

/// Parse a single `offset:original->patched` directive.
///
/// The line must already be trimmed and must not be a comment.
pub fn parse_line(line: &str, base_offset: u64) -> Result<ByteEdit, LineError> {
    let (offset, rest) = line.split_once(':').ok_or(LineError::MissingColon)?;
    let (original, tail) = rest.split_once('-').ok_or(LineError::MissingArrow)?;
    let patched = tail.strip_prefix('>').ok_or(LineError::MissingArrow)?;

    // Any extra ':', '-' or '>' ends up inside a field and fails the hex check.
    let absolute = parse_hex(offset, "offset")?;
    let original = parse_byte(original, "original")?;
    let patched = parse_byte(patched, "patched")?;

    let offset = absolute
        .checked_sub(base_offset)
        .ok_or(LineError::BelowBase {
            offset: absolute,
            base: base_offset,
        })?;
    if offset >= MAX_RELATIVE_OFFSET {
        return Err(LineError::OffsetOutOfRange(offset));
    }

    Ok(ByteEdit::new(offset, original, patched))
}

fn is_skipped(line: &str) -> bool {
    line.is_empty() || line.starts_with('>') || line.starts_with('#')
}

/// Append every edit in `text` to `out`, stopping at the first bad line.
///
/// On error `out` may hold the edits parsed before the failing line; callers
/// that need all-or-nothing semantics truncate back to their saved length
/// (see [`crate::PatchDescriptor::add_edits_from_1337`]).
pub fn parse_into(text: &str, base_offset: u64, out: &mut Vec<ByteEdit>) -> Result<(), ParseError> {
    for (idx, raw) in text.lines().enumerate() {
        let line = raw.trim();
        if is_skipped(line) {
            continue;
        }
        let edit = parse_line(line, base_offset).map_err(|reason| ParseError {
            line_number: idx + 1,
            reason,
        })?;
        out.push(edit);
    }
    Ok(())
}

/// Parse a whole `.1337` document into a fresh edit list.
pub fn parse(text: &str, base_offset: u64) -> Result<Vec<ByteEdit>, ParseError> {
    let mut edits = Vec::new();
    parse_into(text, base_offset, &mut edits)?;
    Ok(edits)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_basic_line() {
        let edit = parse_line("1400012A4:74->EB", 0x140000000).unwrap();
        assert_eq!(edit, ByteEdit::new(0x12A4, 0x74, 0xEB));
    }

    #[test]
    fn test_lowercase_hex_accepted() {
        let edit = parse_line("abc:7f->e9", 0).unwrap();
        assert_eq!(edit, ByteEdit::new(0xABC, 0x7F, 0xE9));
    }

    #[test]
    fn test_comments_and_blank_lines_skipped() {
        let text = ">Titanfall2.exe\n\n# comment\n   \n10:00->01\r\n  20:FF->00  \n";
        let edits = parse(text, 0).unwrap();
        assert_eq!(
            edits,
            vec![ByteEdit::new(0x10, 0x00, 0x01), ByteEdit::new(0x20, 0xFF, 0x00)]
        );
    }

    #[test]
    fn test_rejects_malformed_lines() {
        let cases: &[(&str, LineError)] = &[
            ("1000074->EB", LineError::MissingColon),
            ("10:74EB", LineError::MissingArrow),
            ("10:74-EB", LineError::MissingArrow),
            ("10:74=>EB", LineError::MissingArrow),
            (":74->EB", LineError::EmptyField("offset")),
            ("10:->EB", LineError::EmptyField("original")),
            ("10:74->", LineError::EmptyField("patched")),
            ("0x10:74->EB", LineError::InvalidChar('x')),
            ("10:74->EG", LineError::InvalidChar('G')),
            ("10:74->E B", LineError::InvalidChar(' ')),
            ("10:20:74->EB", LineError::InvalidChar(':')),
            ("10:74->->EB", LineError::InvalidChar('-')),
            ("10:74->>EB", LineError::InvalidChar('>')),
            ("10:100->EB", LineError::Overflow("original")),
            ("10:74->1EB", LineError::Overflow("patched")),
            ("10000000000000000:74->EB", LineError::Overflow("offset")),
        ];
        for (line, expected) in cases {
            assert_eq!(parse_line(line, 0).as_ref(), Err(expected), "line {line:?}");
        }
    }

    #[test]
    fn test_leading_zeros_allowed_in_bytes() {
        let edit = parse_line("10:00074->0EB", 0).unwrap();
        assert_eq!(edit, ByteEdit::new(0x10, 0x74, 0xEB));
    }

    #[test]
    fn test_offset_bounds() {
        assert_eq!(
            parse_line("10:00->01", 0x20),
            Err(LineError::BelowBase {
                offset: 0x10,
                base: 0x20
            })
        );
        assert_eq!(
            parse_line("1000000000000000:00->01", 0),
            Err(LineError::OffsetOutOfRange(1 << 60))
        );
        let edit = parse_line("1FFFFFFFFFFFFFFF:00->01", 0x1000000000000000).unwrap();
        assert_eq!(edit.offset, 0x0FFF_FFFF_FFFF_FFFF);
    }

    #[test]
    fn test_error_reports_line_number() {
        let err = parse("# header\n10:00->01\n20:00-01\n", 0).unwrap_err();
        assert_eq!(err.line_number, 3);
        assert_eq!(err.reason, LineError::MissingArrow);
    }
}
