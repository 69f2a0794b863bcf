//! The disc record: parsing, normalization, and derived identity.
//!
//! A record arrives as one freeform text file from the vendor archive.
//! Parsing is line-oriented (`KEY=VALUE` lines plus data-bearing
//! comments), after which the record is cleaned up, validated,
//! canonicalized, and analyzed in one pass that fills every derived
//! field. There is no hidden lazy state: a constructed record is fully
//! analyzed.

use serde::{Deserialize, Serialize};

use crate::fingerprint::{
    disc_fingerprint, frame_lengths_to_starts, frame_starts_to_lengths, fuzzy_fingerprint, Fnv32,
};
use crate::text::{self, utf8, Entropy, Trigrams};

const MAX_KEY_LEN: usize = 15;
const MAX_VALUE_LEN: usize = 255;

/// One disc: artist/title/tracklist plus the canonical track layout and
/// everything derived from them.
///
/// Canonical layout: `frames` holds per-track *lengths* in CD frames and
/// the `seconds` slot holds the disc lead-in (the first track's start
/// frame), which is what both fingerprints and the store column carry.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DiscRecord {
    artist: String,
    title: String,
    year: u16,
    genre: String,
    songs: Vec<String>,
    frames: Vec<u32>,
    revision: u16,
    seconds: u32,
    valid: bool,
    discid: u32,
    fuzzy_discid: u32,
    hash: u32,
    normalized_hash: u32,
    entropy: usize,
    charcount: usize,
    uppercase: usize,
    bad_encoding: bool,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum LineState {
    Skip,
    Start,
    Key,
    Limiter,
    Start2,
    Value,
    Comment,
}

#[derive(Debug, Default)]
struct Parser {
    rec: DiscRecord,
    song_base: u32,
    reading_tracks: bool,
}

fn is_space(b: u8) -> bool {
    matches!(b, b' ' | b'\t' | 0x0b | 0x0c)
}

/// `strtoul`-style leading integer: skip leading spaces, take the digit
/// prefix, 0 when there is none.
fn leading_u32(s: &str) -> u32 {
    let mut v: u32 = 0;
    for ch in s.trim_start().chars() {
        match ch.to_digit(10) {
            Some(d) => v = v.saturating_mul(10).saturating_add(d),
            None => break,
        }
    }
    v
}

/// Values are either UTF-8 or Latin-1; repair the latter.
fn decode_value(bytes: &[u8]) -> String {
    if utf8::valid_utf8(bytes) {
        if let Ok(s) = std::str::from_utf8(bytes) {
            return s.to_owned();
        }
    }
    utf8::latin1_to_utf8(bytes)
}

fn eq_lower(a: &str, b: &str) -> bool {
    a.to_lowercase() == b.to_lowercase()
}

fn retitle(s: &mut String) {
    if text::mostly_uppercase(s) {
        let (cased, changed) = text::to_title_case(s, false);
        if changed > 0 {
            *s = cased;
        }
    }
}

/// More than 4 distinct code points in the illegal/uncommon Latin-1
/// ranges, or those plus the accented range dominating a third of the
/// distinct code points, marks a record as mis-encoded.
fn detect_bad_encoding(entropy: &Entropy) -> bool {
    let mut ct = 0usize;
    for cp in 0x00..0x20 {
        if entropy.has_value(cp) {
            ct += 1;
        }
    }
    for cp in 0x7f..0xc0 {
        if entropy.has_value(cp) {
            ct += 1;
        }
    }
    if ct > 4 {
        return true;
    }
    for cp in 0xc0..0x100 {
        if entropy.has_value(cp) {
            ct += 1;
        }
    }
    ct > entropy.size() / 3
}

impl Parser {
    fn add_comment(&mut self, value: &[u8]) {
        if value.len() > MAX_VALUE_LEN {
            return;
        }
        let comment = String::from_utf8_lossy(value);

        if !self.reading_tracks {
            if comment.starts_with("Track frame offsets:") {
                self.reading_tracks = true;
            } else if let Some(rest) = comment.strip_prefix("Disc length: ") {
                self.rec.seconds = leading_u32(rest);
            } else if let Some(rest) = comment.strip_prefix("Revision: ") {
                self.rec.revision = leading_u32(rest) as u16;
            }
        } else {
            let trimmed = comment.trim_matches(' ');
            if trimmed.is_empty() {
                self.reading_tracks = false;
            } else if let Some(rest) = trimmed.strip_prefix("Disc length: ") {
                // some records miss the blank comment between the track
                // listing and the disc length
                self.reading_tracks = false;
                self.rec.seconds = leading_u32(rest);
            } else {
                let frame = leading_u32(trimmed);
                if frame == 0 {
                    self.reading_tracks = false;
                } else {
                    self.rec.frames.push(frame);
                }
            }
        }
    }

    fn add_keyvalue(&mut self, key: &[u8], value: &mut Vec<u8>) {
        // any non-comment line ends a running track listing
        self.reading_tracks = false;

        while value.last() == Some(&b' ') {
            value.pop();
        }

        if key.is_empty() || value.is_empty() {
            return;
        }
        if key.len() > MAX_KEY_LEN || value.len() > MAX_VALUE_LEN {
            return;
        }

        let value = decode_value(value);
        let key = String::from_utf8_lossy(key);

        if key == "DISCID" {
            // the legacy id is not trusted; ids are recomputed
        } else if key == "DYEAR" {
            self.rec.year = leading_u32(&value) as u16;
        } else if key == "DGENRE" {
            self.rec.genre = value;
        } else if key == "DTITLE" {
            match value.find(" / ") {
                Some(p) => {
                    self.rec.artist = value[..p].to_string();
                    self.rec.title = value[p + 3..].to_string();
                }
                None => {
                    // no separator: artist and title are the same
                    self.rec.artist = value.clone();
                    self.rec.title = value;
                }
            }
        } else if let Some(idx) = key.strip_prefix("TTITLE") {
            let n = leading_u32(idx);
            // some track lists start at 1, not at 0
            if self.rec.songs.is_empty() {
                self.song_base = n;
            }
            match n.checked_sub(self.song_base) {
                Some(pos) if pos as usize == self.rec.songs.len() => self.rec.songs.push(value),
                _ => {}
            }
        }
    }
}

impl DiscRecord {
    /// Parse one raw record file.
    ///
    /// Always returns a record; check [`DiscRecord::valid`] before using
    /// it. Invalid and mis-encoded records keep their parsed fields for
    /// diagnostics.
    pub fn parse(data: &[u8]) -> Self {
        let mut p = Parser::default();
        let mut state = LineState::Start;
        let mut key: Vec<u8> = Vec::new();
        let mut value: Vec<u8> = Vec::new();
        let mut lastch: u8 = 0;

        for &ch in data {
            if ch == b'\n' || ch == b'\r' {
                match state {
                    LineState::Value | LineState::Skip => p.add_keyvalue(&key, &mut value),
                    LineState::Comment => p.add_comment(&value),
                    _ => {}
                }
                state = LineState::Start;
                key.clear();
                value.clear();
                continue;
            }

            match state {
                LineState::Skip => {}
                LineState::Start => {
                    if ch == b'#' {
                        state = LineState::Comment;
                    } else if !is_space(ch) {
                        state = LineState::Key;
                        key.push(ch);
                    }
                }
                LineState::Key => {
                    if is_space(ch) {
                        state = LineState::Limiter;
                    } else if ch == b'=' {
                        state = LineState::Start2;
                    } else {
                        key.push(ch);
                    }
                }
                LineState::Limiter => {
                    if is_space(ch) {
                        // stay
                    } else if ch == b'=' {
                        state = LineState::Start2;
                    } else {
                        // only space or '=' is expected here
                        state = LineState::Skip;
                    }
                }
                LineState::Start2 => {
                    if !is_space(ch) {
                        state = LineState::Value;
                        value.push(ch);
                        lastch = ch;
                    }
                }
                LineState::Value => {
                    // collapse runs of spaces as they come in
                    if lastch != b' ' || ch != b' ' {
                        value.push(ch);
                    }
                    lastch = ch;
                }
                LineState::Comment => {
                    if !value.is_empty() || !is_space(ch) {
                        value.push(ch);
                    }
                }
            }
        }
        // the last line may have no linefeed
        if matches!(state, LineState::Value | LineState::Skip) {
            p.add_keyvalue(&key, &mut value);
        }

        let mut rec = p.rec;
        rec.cleanup();
        rec.verify();
        rec.analyze_text();
        if rec.valid {
            rec.valid = !rec.bad_encoding;
        }
        match frame_starts_to_lengths(rec.seconds, &rec.frames) {
            Some((lead_in, lengths)) => {
                rec.seconds = lead_in;
                rec.frames = lengths;
            }
            None => rec.valid = false,
        }
        rec.fingerprints();
        rec
    }

    /// Reassemble a record from stored columns (canonical layout). The
    /// given disc id is kept; everything else is recomputed.
    #[allow(clippy::too_many_arguments)]
    pub fn from_parts(
        discid: u32,
        artist: String,
        title: String,
        year: u16,
        genre: String,
        songs: Vec<String>,
        frames: Vec<u32>,
        revision: u16,
        seconds: u32,
    ) -> Self {
        let mut rec = Self {
            artist,
            title,
            year,
            genre,
            songs,
            frames,
            revision,
            seconds,
            ..Self::default()
        };
        rec.verify();
        rec.analyze_text();
        rec.discid = discid;
        if rec.valid {
            rec.fuzzy_discid = fuzzy_fingerprint(&rec.frames);
        }
        rec
    }

    /// Remove the common causes of duplicate submissions: the artist
    /// echoed in front of every song, stray whitespace, and all-caps
    /// shouting.
    fn cleanup(&mut self) {
        let echo = format!("{} / ", self.artist);
        for song in &mut self.songs {
            if let Some(rest) = song.strip_prefix(&echo) {
                *song = rest.to_string();
            }
        }

        self.artist = text::trim_all(&self.artist);
        self.title = text::trim_all(&self.title);
        self.genre = text::trim_all(&self.genre);
        for song in &mut self.songs {
            *song = text::trim_all(song);
        }

        retitle(&mut self.artist);
        retitle(&mut self.title);
        retitle(&mut self.genre);
        for song in &mut self.songs {
            retitle(song);
        }
    }

    fn verify(&mut self) {
        self.valid = !self.artist.is_empty()
            && !self.title.is_empty()
            && (self.frames.is_empty() || self.songs.len() == self.frames.len())
            && self.seconds > 0;
    }

    /// Fill every text-derived field: entropy, character counts, the
    /// bad-encoding verdict, and both content hashes. Genre is cosmetic
    /// and does not participate.
    fn analyze_text(&mut self) {
        let mut entropy = Entropy::new();
        entropy.add_str(&self.artist);
        entropy.add_str(&self.title);
        for s in &self.songs {
            entropy.add_str(s);
        }
        self.entropy = entropy.size();
        self.charcount = entropy.count();
        self.uppercase = self
            .artist
            .chars()
            .chain(self.title.chars())
            .chain(self.songs.iter().flat_map(|s| s.chars()))
            .filter(|c| c.is_uppercase())
            .count();
        self.bad_encoding = detect_bad_encoding(&entropy);

        let mut h = Fnv32::new();
        h.add_str(&self.artist);
        h.add_str(&self.title);
        for s in &self.songs {
            h.add_str(s);
        }
        self.hash = h.finish();

        let mut nh = Fnv32::new();
        nh.add_str(&text::normalize(&self.artist));
        nh.add_str(&text::normalize(&self.title));
        for s in &self.songs {
            nh.add_str(&text::normalize(s));
        }
        self.normalized_hash = nh.finish();
    }

    fn fingerprints(&mut self) {
        if self.valid {
            self.discid = disc_fingerprint(self.seconds, &self.frames);
            self.fuzzy_discid = fuzzy_fingerprint(&self.frames);
        }
    }

    /// Render the record in the `xmcd 2.0` file form, with the frame
    /// start offsets re-derived from the canonical lengths.
    pub fn xmcd_file(&self) -> String {
        let (seconds, starts) = frame_lengths_to_starts(self.seconds, &self.frames);

        let mut file = String::with_capacity(1500);
        file.push_str("# xmcd 2.0 CD database file\n#\n# Track frame offsets:\n");
        for start in &starts {
            file.push_str(&format!("#       {start}\n"));
        }
        file.push_str("#\n");
        file.push_str(&format!("# Disc length: {seconds} seconds\n#\n"));
        file.push_str(&format!("# Revision: {}\n", self.revision));
        file.push_str("# Submitted via: xmcd 2.0\n#\n");
        file.push_str(&format!("DISCID={:x}\n", self.discid));
        file.push_str(&format!("DTITLE={} / {}\n", self.artist, self.title));
        if self.year > 0 {
            file.push_str(&format!("DYEAR={}\n", self.year));
        } else {
            file.push_str("DYEAR=\n");
        }
        file.push_str(&format!("DGENRE={}\n", self.genre));
        for (n, song) in self.songs.iter().enumerate() {
            file.push_str(&format!("TTITLE{n}={song}\n"));
        }
        file.push_str("EXTD=\n");
        for n in 0..self.songs.len() {
            file.push_str(&format!("EXTT{n}=\n"));
        }
        file.push_str("PLAYORDER=\n");
        file
    }

    /// Trigram similarity of two strings in their normalized forms.
    pub fn compare_normalized(left: &str, right: &str) -> u16 {
        Trigrams::score(&text::normalize(left), &text::normalize(right))
    }

    /// Exact equality of artist, title, and all songs.
    pub fn equal_strings(&self, other: &Self) -> bool {
        self.artist == other.artist && self.title == other.title && self.songs == other.songs
    }

    /// Case-folded equality of artist, title, and all songs.
    pub fn equal_lowercase_strings(&self, other: &Self) -> bool {
        if self.songs.len() != other.songs.len() {
            return false;
        }
        eq_lower(&self.artist, &other.artist)
            && eq_lower(&self.title, &other.title)
            && self
                .songs
                .iter()
                .zip(&other.songs)
                .all(|(a, b)| eq_lower(a, b))
    }

    pub fn artist(&self) -> &str {
        &self.artist
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn year(&self) -> u16 {
        self.year
    }

    pub fn genre(&self) -> &str {
        &self.genre
    }

    pub fn songs(&self) -> &[String] {
        &self.songs
    }

    /// Canonical per-track frame lengths.
    pub fn frames(&self) -> &[u32] {
        &self.frames
    }

    /// The canonical seconds slot; holds the disc lead-in frame after
    /// canonicalization (see the type-level docs).
    pub fn seconds(&self) -> u32 {
        self.seconds
    }

    pub fn revision(&self) -> u16 {
        self.revision
    }

    pub fn valid(&self) -> bool {
        self.valid
    }

    pub fn discid(&self) -> u32 {
        self.discid
    }

    pub fn fuzzy_discid(&self) -> u32 {
        self.fuzzy_discid
    }

    pub fn hash(&self) -> u32 {
        self.hash
    }

    pub fn normalized_hash(&self) -> u32 {
        self.normalized_hash
    }

    /// Distinct code points across artist, title, and songs.
    pub fn entropy(&self) -> usize {
        self.entropy
    }

    pub fn charcount(&self) -> usize {
        self.charcount
    }

    pub fn uppercase_count(&self) -> usize {
        self.uppercase
    }

    pub fn bad_encoding(&self) -> bool {
        self.bad_encoding
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const STARTS: [u32; 10] = [
        150, 20753, 41510, 53268, 75958, 91735, 103165, 120710, 144018, 160108,
    ];

    fn fixture() -> String {
        let mut rec = String::from(
            "# xmcd 2.0 CD database file\n#\n# Track frame offsets:\n",
        );
        for s in STARTS {
            rec.push_str(&format!("#       {s}\n"));
        }
        rec.push_str("#\n# Disc length: 2357 seconds\n#\n# Revision: 3\n");
        rec.push_str("# Submitted via: xmcd 2.0\n#\n");
        rec.push_str("DISCID=6809330a\n");
        rec.push_str("DTITLE=Some Artist / Some Album Title\n");
        rec.push_str("DYEAR=1995\nDGENRE=Rock\n");
        for n in 0..10 {
            rec.push_str(&format!("TTITLE{n}=Song Number {n}\n"));
        }
        rec.push_str("EXTD=\nPLAYORDER=\n");
        rec
    }

    #[test]
    fn test_parse_fixture() {
        let rec = DiscRecord::parse(fixture().as_bytes());
        assert!(rec.valid());
        assert_eq!(rec.artist(), "Some Artist");
        assert_eq!(rec.title(), "Some Album Title");
        assert_eq!(rec.year(), 1995);
        assert_eq!(rec.genre(), "Rock");
        assert_eq!(rec.revision(), 3);
        assert_eq!(rec.songs().len(), 10);
        assert_eq!(rec.songs()[0], "Song Number 0");
        // canonical form: lead-in in the seconds slot, lengths in frames
        assert_eq!(rec.seconds(), 150);
        assert_eq!(
            rec.frames(),
            &[20603, 20757, 11758, 22690, 15777, 11430, 17545, 23308, 16090, 16517]
        );
        assert_eq!(rec.discid(), 0x7592_1a6a);
        assert_eq!(rec.fuzzy_discid(), 0x283f_5698);
        assert!(!rec.bad_encoding());
    }

    #[test]
    fn test_xmcd_round_trip() {
        let rec = DiscRecord::parse(fixture().as_bytes());
        let reparsed = DiscRecord::parse(rec.xmcd_file().as_bytes());
        assert!(reparsed.valid());
        assert_eq!(reparsed.artist(), rec.artist());
        assert_eq!(reparsed.title(), rec.title());
        assert_eq!(reparsed.songs(), rec.songs());
        assert_eq!(reparsed.frames(), rec.frames());
        assert_eq!(reparsed.seconds(), rec.seconds());
        assert_eq!(reparsed.discid(), rec.discid());
    }

    #[test]
    fn test_dtitle_without_separator() {
        let rec = DiscRecord::parse(b"DTITLE=Selftitled\n# Disc length: 100 seconds\n");
        assert_eq!(rec.artist(), "Selftitled");
        assert_eq!(rec.title(), "Selftitled");
        assert!(rec.valid());
    }

    #[test]
    fn test_track_list_base_one() {
        let data = b"DTITLE=A / B\n# Disc length: 100 seconds\nTTITLE1=one\nTTITLE2=two\n";
        let rec = DiscRecord::parse(data);
        assert_eq!(rec.songs(), &["one".to_string(), "two".to_string()]);
        assert!(rec.valid());
    }

    #[test]
    fn test_misordered_track_index_skipped() {
        let data = b"DTITLE=A / B\n# Disc length: 100 seconds\nTTITLE0=one\nTTITLE2=three\nTTITLE1=two\n";
        let rec = DiscRecord::parse(data);
        // the gap is skipped; the in-order index still lands
        assert_eq!(rec.songs(), &["one".to_string(), "two".to_string()]);
    }

    #[test]
    fn test_uppercase_submission_is_title_cased() {
        let rec = DiscRecord::parse(b"DTITLE=LOUD ARTIST / SHOUTED TITLE\n# Disc length: 90 seconds\n");
        assert_eq!(rec.artist(), "Loud Artist");
        assert_eq!(rec.title(), "Shouted Title");
    }

    #[test]
    fn test_artist_echo_stripped_from_songs() {
        let data = b"DTITLE=Echo / Album\n# Disc length: 100 seconds\nTTITLE0=Echo / First\nTTITLE1=Second\n";
        let rec = DiscRecord::parse(data);
        assert_eq!(rec.songs(), &["First".to_string(), "Second".to_string()]);
    }

    #[test]
    fn test_value_spaces_collapsed() {
        let rec = DiscRecord::parse(b"DTITLE=Two   Words / And    Title  \n# Disc length: 90 seconds\n");
        assert_eq!(rec.artist(), "Two Words");
        assert_eq!(rec.title(), "And Title");
    }

    #[test]
    fn test_overlong_value_discarded() {
        let mut data = b"DTITLE=".to_vec();
        data.extend(std::iter::repeat(b'x').take(300));
        data.extend_from_slice(b"\n# Disc length: 90 seconds\n");
        let rec = DiscRecord::parse(&data);
        assert!(rec.artist().is_empty());
        assert!(!rec.valid());
    }

    #[test]
    fn test_latin1_value_repaired() {
        let mut data = b"DTITLE=Mot\xf6rhead / Bomber\n".to_vec();
        data.extend_from_slice(b"# Disc length: 90 seconds\n");
        let rec = DiscRecord::parse(&data);
        assert_eq!(rec.artist(), "Motörhead");
        assert!(rec.valid());
    }

    #[test]
    fn test_bad_encoding_detected() {
        // six distinct code points in the illegal 0x7f..0xc0 range
        let mut data = b"DTITLE=\x90\x91\x92\x93\x94\x95 / x\n".to_vec();
        data.extend_from_slice(b"# Disc length: 90 seconds\n");
        let rec = DiscRecord::parse(&data);
        assert!(rec.bad_encoding());
        assert!(!rec.valid());
    }

    #[test]
    fn test_track_count_mismatch_invalid() {
        let mut rec = String::from("# Track frame offsets:\n#    150\n#    5000\n#\n");
        rec.push_str("# Disc length: 100 seconds\nDTITLE=A / B\nTTITLE0=only one\n");
        let parsed = DiscRecord::parse(rec.as_bytes());
        assert!(!parsed.valid());
    }

    #[test]
    fn test_negative_last_length_rejected() {
        // disc length far too short for the last offset
        let rec = DiscRecord::parse(
            b"# Track frame offsets:\n#    150\n#    9000\n#\n# Disc length: 10 seconds\nDTITLE=A / B\nTTITLE0=a\nTTITLE1=b\n",
        );
        assert!(!rec.valid());
    }

    #[test]
    fn test_missing_blank_line_before_disc_length() {
        let rec = DiscRecord::parse(
            b"# Track frame offsets:\n#    150\n#    5000\n# Disc length: 100 seconds\nDTITLE=A / B\nTTITLE0=a\nTTITLE1=b\n",
        );
        assert!(rec.valid());
        assert_eq!(rec.seconds(), 150);
        assert_eq!(rec.frames().len(), 2);
    }

    #[test]
    fn test_from_parts_keeps_discid() {
        let rec = DiscRecord::from_parts(
            0xdead_beef,
            "Artist".into(),
            "Title".into(),
            2001,
            "Rock".into(),
            vec!["One".into(), "Two".into()],
            vec![5000, 6000],
            1,
            150,
        );
        assert!(rec.valid());
        assert_eq!(rec.discid(), 0xdead_beef);
        assert_eq!(rec.fuzzy_discid(), fuzzy_fingerprint(&[5000, 6000]));
        assert!(rec.entropy() > 0);
    }

    #[test]
    fn test_compare_normalized_self_is_100() {
        assert_eq!(
            DiscRecord::compare_normalized("Motörhead Bomber", "Motorhead bomber!"),
            100
        );
    }

    #[test]
    fn test_equal_lowercase_strings() {
        let a = DiscRecord::from_parts(
            1, "ABBA".into(), "Gold".into(), 0, "Pop".into(),
            vec!["Waterloo".into()], vec![1000], 0, 150,
        );
        let b = DiscRecord::from_parts(
            2, "Abba".into(), "gold".into(), 0, "Pop".into(),
            vec!["WATERLOO".into()], vec![1000], 0, 150,
        );
        assert!(!a.equal_strings(&b));
        assert!(a.equal_lowercase_strings(&b));
    }
}
