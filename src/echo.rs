//! Turning a received DNS query into an echo response.
//!
//! A response here is the query itself with three header-level edits: the
//! QR bit flipped to "response", AA/TC cleared, and byte 3 (RA, Z and
//! RCODE) zeroed. Nothing past the fixed 12-byte header is looked at, let
//! alone parsed.

/// Fixed size of a DNS message header.
///
/// ```text
///       0  1  2  3  4  5  6  7  0  1  2  3  4  5  6  7
///     +--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+
///     |                      ID                       |
///     +--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+
///     |QR|   Opcode  |AA|TC|RD|RA| Z|AD|CD|   RCODE   |
///     +--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+
///     |                 QD/AN/NS/ARCOUNT x4           |
/// ```
pub const HEADER_SIZE: usize = 12;

/// Anything shorter than a bare header cannot plausibly be a DNS query
/// and is dropped by every receive strategy without being counted.
pub fn plausible(buf: &[u8]) -> bool {
  buf.len() >= HEADER_SIZE
}

/// Rewrite a query header in place into a response header.
///
/// Touches only bytes 2 and 3. Idempotent: applying it to its own output
/// changes nothing.
pub fn make_echo(buf: &mut [u8]) {
  debug_assert!(buf.len() >= HEADER_SIZE);

  // clear AA and TC
  buf[2] &= 0xf9;

  // clear RA, Z and RCODE
  buf[3] = 0;

  // set QR
  buf[2] |= 0x80;
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn response_bits_for_every_flag_byte() {
    for b2 in 0..=255u8 {
      for b3 in 0..=255u8 {
        let mut buf = [0u8; HEADER_SIZE + 5];
        buf[0] = 0xab;
        buf[1] = 0xcd;
        buf[2] = b2;
        buf[3] = b3;
        for (i, b) in buf[4..].iter_mut().enumerate() {
          *b = i as u8 ^ 0x5a;
        }
        let orig = buf;

        make_echo(&mut buf);

        assert_eq!(buf[2] & 0x80, 0x80, "QR must be set");
        assert_eq!(buf[2] & 0x06, 0, "AA and TC must be clear");
        assert_eq!(buf[3], 0, "RA/Z/RCODE byte must be zero");
        // opcode and RD ride through untouched
        assert_eq!(buf[2] & 0x79, b2 & 0x79);
        assert_eq!(&buf[..2], &orig[..2]);
        assert_eq!(&buf[4..], &orig[4..]);
      }
    }
  }

  #[test]
  fn idempotent() {
    let mut buf = [0u8; HEADER_SIZE];
    buf[2] = 0x17;
    buf[3] = 0x81;
    make_echo(&mut buf);
    let once = buf;
    make_echo(&mut buf);
    assert_eq!(buf, once);
  }

  #[test]
  fn length_floor() {
    assert!(!plausible(&[0u8; 0]));
    assert!(!plausible(&[0u8; 11]));
    assert!(plausible(&[0u8; 12]));
    assert!(plausible(&[0u8; 512]));
  }
}
