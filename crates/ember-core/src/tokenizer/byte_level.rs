//! Byte to unicode mapping for byte-level BPE.
//!
//! Every byte value is assigned a printable character so BPE can work on an
//! alphabet without control characters or whitespace. Printable ASCII and the
//! two printable Latin-1 ranges map to themselves; the remaining 68 bytes map
//! to consecutive code points starting at U+0100, in ascending byte order.

use std::collections::HashMap;
use std::sync::OnceLock;

/// Bidirectional byte <-> char table.
#[derive(Debug)]
pub struct ByteTable {
    encoder: [char; 256],
    decoder: HashMap<char, u8>,
}

impl ByteTable {
    fn build() -> Self {
        let mut encoder = ['\0'; 256];
        let mut decoder = HashMap::with_capacity(256);
        let mut next_private = 0u32;

        for byte in 0..=255u8 {
            let c = if is_self_mapped(byte) {
                char::from(byte)
            } else {
                let code = 256 + next_private;
                next_private += 1;
                // 256..324 are all valid scalar values
                char::from_u32(code).unwrap_or(char::REPLACEMENT_CHARACTER)
            };
            encoder[byte as usize] = c;
            decoder.insert(c, byte);
        }

        Self { encoder, decoder }
    }

    /// Character standing in for `byte`.
    #[inline]
    pub fn encode_byte(&self, byte: u8) -> char {
        self.encoder[byte as usize]
    }

    /// Byte represented by `c`, if `c` belongs to the table.
    #[inline]
    pub fn decode_char(&self, c: char) -> Option<u8> {
        self.decoder.get(&c).copied()
    }

    /// Map every UTF-8 byte of `text` through the table.
    pub fn encode_str(&self, text: &str) -> String {
        text.bytes().map(|b| self.encode_byte(b)).collect()
    }

    /// Reverse [`encode_str`](Self::encode_str).
    ///
    /// Characters outside the table are passed through as their UTF-8 bytes.
    /// Invalid UTF-8 in the result is replaced with U+FFFD.
    pub fn decode_str(&self, text: &str) -> String {
        let mut bytes = Vec::with_capacity(text.len());
        let mut buf = [0u8; 4];
        for c in text.chars() {
            match self.decode_char(c) {
                Some(b) => bytes.push(b),
                None => bytes.extend_from_slice(c.encode_utf8(&mut buf).as_bytes()),
            }
        }
        String::from_utf8_lossy(&bytes).into_owned()
    }
}

fn is_self_mapped(byte: u8) -> bool {
    matches!(byte, b'!'..=b'~' | 0xA1..=0xAC | 0xAE..=0xFF)
}

/// Shared table, built on first use.
pub fn byte_table() -> &'static ByteTable {
    static TABLE: OnceLock<ByteTable> = OnceLock::new();
    TABLE.get_or_init(ByteTable::build)
}
