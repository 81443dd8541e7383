use std::io::{self, Read};

use super::encoding::{BOM_UTF8, BOM_UTF16BE, BOM_UTF16LE, BOM_UTF32BE, BOM_UTF32LE};

/// Detection window. Git samples a similar amount.
const DETECTION_WINDOW: usize = 8192;

/// Peeks at a reader to decide whether it probably contains text, returning
/// a reader that re-emits the peeked bytes followed by the rest. Empty
/// content counts as text.
pub fn is_text_reader<R: Read>(mut r: R) -> io::Result<(impl Read + use<R>, bool)> {
    let mut buf = vec![0u8; DETECTION_WINDOW];
    let mut n = 0;
    while n < buf.len() {
        let read = r.read(&mut buf[n..])?;
        if read == 0 {
            break;
        }
        n += read;
    }
    buf.truncate(n);

    let text = is_text(&buf);
    Ok((io::Cursor::new(buf).chain(r), text))
}

/// Determines whether the given bytes represent text content. Rules, in
/// order: empty; BOM prefix; NUL ratio; UTF-16/UTF-32 NUL position
/// patterns; otherwise any NUL in the first 1024 bytes means binary.
pub fn is_text(data: &[u8]) -> bool {
    if data.is_empty() {
        return true;
    }

    if data.starts_with(BOM_UTF8)
        || data.starts_with(BOM_UTF32LE)
        || data.starts_with(BOM_UTF32BE)
        || data.starts_with(BOM_UTF16LE)
        || data.starts_with(BOM_UTF16BE)
    {
        return true;
    }

    let nul_positions: Vec<usize> = data
        .iter()
        .enumerate()
        .filter(|&(_, &b)| b == 0)
        .map(|(i, _)| i)
        .collect();
    let nul_count = nul_positions.len();

    if nul_count == 0 {
        return true;
    }

    // UTF-32 is at most 3/4 NUL bytes.
    if nul_count as f64 / data.len() as f64 > 0.75 {
        return false;
    }

    // UTF-16 LE puts NULs in odd positions only.
    if data.len() >= 4 && nul_count > 1 {
        let le_pattern = nul_positions.iter().all(|pos| pos % 2 == 1);
        if le_pattern && nul_count as f64 > data.len() as f64 / 10.0 {
            return true;
        }
    }

    // UTF-16 BE: even positions only.
    if data.len() >= 4 && nul_count > 1 {
        let be_pattern = nul_positions.iter().all(|pos| pos % 2 == 0);
        if be_pattern && nul_count as f64 > data.len() as f64 / 10.0 {
            return true;
        }
    }

    // UTF-32: NUL triplets at fixed offsets within each 4-byte unit.
    if data.len() >= 8 && nul_count >= 3 {
        if utf32_triplet_pattern(data, 1) || utf32_triplet_pattern(data, 0) {
            return true;
        }
    }

    // NULs that fit no encoding pattern: binary if any appear early.
    let check_len = data.len().min(1024);
    if data[..check_len].contains(&0) {
        return false;
    }

    true
}

/// Checks that every 4-byte unit starting at `offset` holds three NUL bytes
/// (LE: offsets 1..3, BE: offsets 0..2).
fn utf32_triplet_pattern(data: &[u8], offset: usize) -> bool {
    let mut i = offset;
    while i + 2 < data.len() {
        if data[i] != 0 || data[i + 1] != 0 || data[i + 2] != 0 {
            return false;
        }
        i += 4;
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_is_text() {
        assert!(is_text(b""));
    }

    #[test]
    fn plain_ascii_is_text() {
        assert!(is_text(b"hello world\n"));
    }

    #[test]
    fn bom_prefixed_is_always_text() {
        assert!(is_text(&[0xEF, 0xBB, 0xBF, b'h', b'i']));
        assert!(is_text(&[0xFF, 0xFE, 0x00, 0x00, 0x48, 0x00, 0x00, 0x00]));
        assert!(is_text(&[0xFE, 0xFF, 0x00, 0x48]));
    }

    #[test]
    fn nul_heavy_is_binary() {
        let mut data = vec![0u8; 100];
        data[0] = 1;
        assert!(!is_text(&data));
    }

    #[test]
    fn utf16le_pattern_is_text() {
        // "Hello " repeated, no BOM: NULs at odd positions only.
        let mut data = Vec::new();
        for _ in 0..8 {
            for b in b"Hello " {
                data.push(*b);
                data.push(0);
            }
        }
        assert!(is_text(&data));
    }

    #[test]
    fn utf16be_pattern_is_text() {
        let mut data = Vec::new();
        for _ in 0..8 {
            for b in b"Hello " {
                data.push(0);
                data.push(*b);
            }
        }
        assert!(is_text(&data));
    }

    #[test]
    fn early_stray_nul_is_binary() {
        let mut data = b"some binary header".to_vec();
        data.push(0);
        data.extend_from_slice(&[0x7F, b'E', b'L', b'F']);
        assert!(!is_text(&data));
    }

    #[test]
    fn reader_reemits_peeked_bytes() {
        let data = b"the quick brown fox".to_vec();
        let (mut reader, text) = is_text_reader(&data[..]).unwrap();
        assert!(text);
        let mut out = Vec::new();
        reader.read_to_end(&mut out).unwrap();
        assert_eq!(out, data);
    }
}
