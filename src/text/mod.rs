//! Text handling: binary detection and encoding-preserving text I/O.

mod detect;
mod encoding;

pub use detect::{is_text, is_text_reader};
pub use encoding::{Encoding, Text, decode_bytes, read_from};
