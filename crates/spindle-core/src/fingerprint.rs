//! 32-bit FNV fingerprints over disc layouts and text.
//!
//! Fingerprints are deterministic and endianness-independent: scalars
//! are serialized big-endian before they are fed to the hash, so the
//! same disc produces the same id on every host.

/// Incremental 32-bit FNV hash: seed `0x811C9DC5`, per byte
/// `h = h * 0x01000193 XOR byte`.
#[derive(Debug, Clone, Copy)]
pub struct Fnv32 {
    state: u32,
}

impl Fnv32 {
    pub fn new() -> Self {
        Self { state: 0x811C_9DC5 }
    }

    pub fn add_byte(&mut self, b: u8) {
        self.state = self.state.wrapping_mul(0x0100_0193) ^ u32::from(b);
    }

    pub fn add_bytes(&mut self, bytes: &[u8]) {
        for &b in bytes {
            self.add_byte(b);
        }
    }

    pub fn add_str(&mut self, s: &str) {
        self.add_bytes(s.as_bytes());
    }

    /// Feed a scalar in big-endian byte order.
    pub fn add_u32(&mut self, v: u32) {
        self.add_bytes(&v.to_be_bytes());
    }

    pub fn finish(&self) -> u32 {
        self.state
    }
}

impl Default for Fnv32 {
    fn default() -> Self {
        Self::new()
    }
}

/// Disc fingerprint over the canonical layout:
/// `(lead_in, track count, frame lengths...)`.
pub fn disc_fingerprint(lead_in: u32, frames: &[u32]) -> u32 {
    let mut h = Fnv32::new();
    h.add_u32(lead_in);
    h.add_u32(frames.len() as u32);
    for &f in frames {
        h.add_u32(f);
    }
    h.finish()
}

/// Quantize a frame length to roughly 8-second buckets. Integer
/// truncation is deliberate: two lengths straddling a bucket boundary
/// hash differently, and the test vectors lock that in.
pub fn quantize_frames(f: u32) -> u32 {
    ((f + 38) / 75 + 4) / 8
}

/// Fuzzy disc fingerprint over `(track count, quantized lengths...)`.
/// The lead-in does not participate; rippers disagree on it freely.
pub fn fuzzy_fingerprint(frames: &[u32]) -> u32 {
    let mut h = Fnv32::new();
    h.add_u32(frames.len() as u32);
    for &f in frames {
        h.add_u32(quantize_frames(f));
    }
    h.finish()
}

/// Convert track start offsets to the canonical form: per-track frame
/// lengths plus the disc lead-in (the first track's start frame). The
/// lead-in takes the place of the seconds slot in the canonical
/// representation and in both fingerprints.
///
/// Returns `None` when the starts are not monotonic or the disc length
/// is too short for the last track, both of which would need a negative
/// frame length; such records are rejected.
pub fn frame_starts_to_lengths(seconds: u32, starts: &[u32]) -> Option<(u32, Vec<u32>)> {
    if starts.is_empty() {
        return Some((0, Vec::new()));
    }
    let lead_in = starts[0];
    let mut lengths = Vec::with_capacity(starts.len());
    for w in starts.windows(2) {
        lengths.push(w[1].checked_sub(w[0])?);
    }
    let last = seconds
        .checked_mul(75)?
        .checked_sub(starts[starts.len() - 1])?
        .checked_sub(lead_in)?;
    lengths.push(last);
    Some((lead_in, lengths))
}

/// Exact inverse of [`frame_starts_to_lengths`]: rebuild the start
/// offsets and recover the disc length in seconds.
pub fn frame_lengths_to_starts(lead_in: u32, lengths: &[u32]) -> (u32, Vec<u32>) {
    if lengths.is_empty() {
        return (0, Vec::new());
    }
    let mut starts = Vec::with_capacity(lengths.len());
    starts.push(lead_in);
    for &len in &lengths[..lengths.len() - 1] {
        let next = starts[starts.len() - 1] + len;
        starts.push(next);
    }
    let seconds = (starts[starts.len() - 1] + lengths[lengths.len() - 1] + lead_in) / 75;
    (seconds, starts)
}

#[cfg(test)]
mod tests {
    use super::*;

    const STARTS: [u32; 10] = [
        150, 20753, 41510, 53268, 75958, 91735, 103165, 120710, 144018, 160108,
    ];
    const SECONDS: u32 = 2357;
    const LENGTHS: [u32; 10] = [
        20603, 20757, 11758, 22690, 15777, 11430, 17545, 23308, 16090, 16517,
    ];

    #[test]
    fn test_fnv_string_vector() {
        let mut h = Fnv32::new();
        h.add_str("abc");
        assert_eq!(h.finish(), 0x439c_2f4b);
    }

    #[test]
    fn test_starts_to_lengths_vector() {
        let (lead_in, lengths) = frame_starts_to_lengths(SECONDS, &STARTS).unwrap();
        assert_eq!(lead_in, 150);
        assert_eq!(lengths, LENGTHS);
    }

    #[test]
    fn test_lengths_to_starts_round_trip() {
        let (lead_in, lengths) = frame_starts_to_lengths(SECONDS, &STARTS).unwrap();
        let (seconds, starts) = frame_lengths_to_starts(lead_in, &lengths);
        assert_eq!(seconds, SECONDS);
        assert_eq!(starts, STARTS);
    }

    #[test]
    fn test_disc_fingerprint_vector() {
        let (lead_in, lengths) = frame_starts_to_lengths(SECONDS, &STARTS).unwrap();
        assert_eq!(disc_fingerprint(lead_in, &lengths), 0x7592_1a6a);
    }

    #[test]
    fn test_fuzzy_fingerprint_vector() {
        let (_, lengths) = frame_starts_to_lengths(SECONDS, &STARTS).unwrap();
        assert_eq!(fuzzy_fingerprint(&lengths), 0x283f_5698);
    }

    #[test]
    fn test_fingerprints_are_deterministic() {
        let (lead_in, lengths) = frame_starts_to_lengths(SECONDS, &STARTS).unwrap();
        assert_eq!(
            disc_fingerprint(lead_in, &lengths),
            disc_fingerprint(lead_in, &lengths)
        );
        assert_eq!(fuzzy_fingerprint(&lengths), fuzzy_fingerprint(&lengths));
    }

    #[test]
    fn test_quantize_bucket_boundary() {
        assert_eq!(quantize_frames(261), 0);
        assert_eq!(quantize_frames(262), 1);
        assert_ne!(
            fuzzy_fingerprint(&[261, 1000]),
            fuzzy_fingerprint(&[262, 1000])
        );
        assert_eq!(
            fuzzy_fingerprint(&[262, 1000]),
            fuzzy_fingerprint(&[263, 1000])
        );
    }

    #[test]
    fn test_non_monotonic_starts_rejected() {
        assert_eq!(frame_starts_to_lengths(100, &[500, 400]), None);
    }

    #[test]
    fn test_short_disc_rejected() {
        // 10 seconds = 750 frames, but the last track starts at 7000
        assert_eq!(frame_starts_to_lengths(10, &[150, 7000]), None);
    }

    #[test]
    fn test_empty_layout() {
        assert_eq!(frame_starts_to_lengths(100, &[]), Some((0, Vec::new())));
        assert_eq!(frame_lengths_to_starts(0, &[]), (0, Vec::new()));
    }
}
