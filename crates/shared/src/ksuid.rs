//! Minimal KSUID parsing: just enough to pull a timestamp and a payload
//! prefix back out of a 27-character base62 string, the way
//! `cdputils.go::timestamp` used the `segmentio/ksuid` package only to
//! build a rendered-screenshot filename. No `ksuid` crate exists anywhere
//! in the pack (see DESIGN.md), so this hand-rolls the decode rather than
//! adding an ungrounded dependency or doing the full generation/comparison
//! surface a general-purpose KSUID crate would provide.

use time::OffsetDateTime;

const BASE62_ALPHABET: &[u8] = b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz";
const ENCODED_LEN: usize = 27;
const RAW_LEN: usize = 20;
/// KSUID epoch: 2014-05-13T16:53:20Z, seconds since the Unix epoch.
const EPOCH_OFFSET: i64 = 1_400_000_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ksuid {
    bytes: [u8; RAW_LEN],
}

impl Ksuid {
    /// Decodes a base62 KSUID string. Returns `None` on any malformed
    /// input — a malformed id is treated as absent rather than fatal.
    pub fn parse(s: &str) -> Option<Self> {
        if s.len() != ENCODED_LEN {
            return None;
        }

        let mut digits = [0u8; RAW_LEN];
        let mut num = vec![0u8; 1];

        for ch in s.bytes() {
            let value = BASE62_ALPHABET.iter().position(|&c| c == ch)? as u32;

            let mut carry = value;
            for d in num.iter_mut() {
                let acc = (*d as u32) * 62 + carry;
                *d = (acc & 0xff) as u8;
                carry = acc >> 8;
            }
            while carry > 0 {
                num.push((carry & 0xff) as u8);
                carry >>= 8;
            }
        }

        if num.len() > RAW_LEN {
            return None;
        }
        for (i, b) in num.iter().enumerate() {
            digits[i] = *b;
        }
        digits[..num.len()].reverse();
        digits.rotate_left(RAW_LEN - num.len());

        Some(Self { bytes: digits })
    }

    /// Timestamp embedded in the first 4 bytes, as seconds-since-KSUID-epoch.
    pub fn time(&self) -> OffsetDateTime {
        let secs = u32::from_be_bytes([self.bytes[0], self.bytes[1], self.bytes[2], self.bytes[3]]);
        OffsetDateTime::from_unix_timestamp(EPOCH_OFFSET + secs as i64)
            .unwrap_or(OffsetDateTime::UNIX_EPOCH)
    }

    /// First 4 bytes of the 16-byte payload, as a big-endian u32.
    pub fn payload_prefix(&self) -> u32 {
        u32::from_be_bytes([self.bytes[4], self.bytes[5], self.bytes[6], self.bytes[7]])
    }
}

/// Builds a `(unix_seconds, payload_prefix)` pair for use in a filename,
/// parsing `trace_id` as a KSUID when possible and falling back to the
/// current time plus a random value otherwise — the exact fallback
/// `timestamp()` takes when `ksuid.Parse` fails.
pub fn timestamp_parts(trace_id: &str) -> (i64, u32) {
    match Ksuid::parse(trace_id) {
        Some(k) => (k.time().unix_timestamp(), k.payload_prefix()),
        None => (
            OffsetDateTime::now_utc().unix_timestamp(),
            rand::random::<u32>() >> 1,
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_length_falls_back() {
        assert!(Ksuid::parse("tooshort").is_none());
    }

    #[test]
    fn invalid_alphabet_falls_back() {
        let mut s = "0".repeat(ENCODED_LEN);
        s.replace_range(0..1, "!");
        assert!(Ksuid::parse(&s).is_none());
    }

    #[test]
    fn timestamp_parts_never_panics_on_garbage() {
        let (secs, _) = timestamp_parts("not-a-ksuid");
        assert!(secs > 0);
    }

    #[test]
    fn round_trips_a_well_formed_looking_id() {
        // 27 '0's base62-decodes to all-zero bytes: epoch timestamp 0 means
        // the KSUID epoch itself.
        let zero = "0".repeat(ENCODED_LEN);
        let k = Ksuid::parse(&zero).expect("all-zero KSUID parses");
        assert_eq!(k.time().unix_timestamp(), EPOCH_OFFSET);
        assert_eq!(k.payload_prefix(), 0);
    }
}
