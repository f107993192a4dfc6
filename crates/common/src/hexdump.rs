//! Hex dump formatting for raw descriptor bytes

use std::fmt::Write;

const ROW: usize = 16;

/// Render `data` as offset-prefixed rows of 16 bytes with an ASCII column
///
/// Printable bytes other than space show as themselves, everything else as
/// `.`. Short final rows are padded so the ASCII column lines up.
///
/// ```
/// let dump = common::hex_dump(b"AB\x00");
/// assert_eq!(dump.lines().next().unwrap().trim_start().split_once(':').unwrap().0, "00000000");
/// assert!(dump.ends_with("AB.\n"));
/// ```
pub fn hex_dump(data: &[u8]) -> String {
    let mut out = String::with_capacity(data.len().div_ceil(ROW) * 78);

    for (row, chunk) in data.chunks(ROW).enumerate() {
        let _ = write!(out, "  {:08x}: ", row * ROW);

        for i in 0..ROW {
            match chunk.get(i) {
                Some(byte) => {
                    let _ = write!(out, "{:02x} ", byte);
                }
                None => out.push_str("   "),
            }
        }
        out.push_str("  ");

        out.extend(chunk.iter().map(|&b| {
            if b.is_ascii_graphic() {
                b as char
            } else {
                '.'
            }
        }));
        out.push('\n');
    }

    out
}
