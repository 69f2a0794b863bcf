//! The matching engine: candidate loading, frame-distance scoring, and
//! reply formatting for layout queries.

use spindle_core::fingerprint::{disc_fingerprint, fuzzy_fingerprint};
use spindle_core::store::Catalog;

use crate::error::Result;

/// At most this many fuzzy candidates are reported.
const MAX_FUZZY_MATCHES: usize = 10;

/// A catalog CD that survived the frame-distance gate against a live
/// disc, with its total diff for ranking.
#[derive(Debug, Clone)]
pub struct CdMatch {
    pub cd: i64,
    pub artist: String,
    pub title: String,
    /// Stored canonical seconds slot (the disc lead-in).
    pub seconds: u32,
    pub frames: Vec<u32>,
    pub diff: u32,
}

fn load_match(
    catalog: &Catalog,
    cd: i64,
    live: &[u32],
    max_trackdiff: u32,
) -> Result<Option<CdMatch>> {
    let Some(summary) = catalog.cd_summary(cd)? else {
        return Ok(None);
    };
    let frames: Vec<u32> = catalog.tracks(cd)?.into_iter().map(|(_, f)| f).collect();

    if summary.tracks as usize != live.len() || frames.len() != live.len() {
        return Ok(None);
    }

    let mut diff = 0u32;
    for (&stored, &queried) in frames.iter().zip(live) {
        let d = stored.abs_diff(queried);
        if d > max_trackdiff {
            return Ok(None);
        }
        diff += d;
    }

    Ok(Some(CdMatch {
        cd,
        artist: summary.artist,
        title: summary.title,
        seconds: summary.seconds,
        frames,
        diff,
    }))
}

/// Load, gate, and rank candidate CDs for a live layout, best match
/// first. Duplicate links to the same CD collapse to one candidate.
pub fn collect_matches(
    catalog: &Catalog,
    cds: &[i64],
    live: &[u32],
    max_trackdiff: u32,
) -> Result<Vec<CdMatch>> {
    let mut matches: Vec<CdMatch> = Vec::new();
    for &cd in cds {
        if matches.iter().any(|m| m.cd == cd) {
            continue;
        }
        if let Some(m) = load_match(catalog, cd, live, max_trackdiff)? {
            matches.push(m);
        }
    }
    matches.sort_by_key(|m| m.diff);
    Ok(matches)
}

/// Answer a layout query: exact fingerprint lookup first, fuzzy
/// fallback second, `202` when nothing matches.
pub fn query(catalog: &Catalog, lead_in: u32, lengths: &[u32], max_trackdiff: u32) -> Result<String> {
    let discid = disc_fingerprint(lead_in, lengths);
    let matches = collect_matches(
        catalog,
        &catalog.cds_for_discid(discid)?,
        lengths,
        max_trackdiff,
    )?;

    if matches.len() == 1 {
        let m = &matches[0];
        return Ok(format!("200 generic {discid:x} {} / {}\n", m.artist, m.title));
    }
    if matches.len() > 1 {
        let mut reply =
            String::from("210 Found exact matches, list follows (until terminating `.')\n");
        for m in &matches {
            reply.push_str(&format!("generic {discid:x} {} / {}\n", m.artist, m.title));
        }
        reply.push_str(".\n");
        return Ok(reply);
    }

    let fuzzy = fuzzy_fingerprint(lengths);
    let matches = collect_matches(
        catalog,
        &catalog.cds_for_fuzzyid(fuzzy)?,
        lengths,
        max_trackdiff,
    )?;
    if matches.is_empty() {
        return Ok("202\n".to_string());
    }

    let mut reply = String::from("211 Found close matches, list follows (until terminating `.')\n");
    for m in matches.iter().take(MAX_FUZZY_MATCHES) {
        // each candidate reports its own exact fingerprint
        let own = disc_fingerprint(m.seconds, &m.frames);
        reply.push_str(&format!("generic {own:x} {} / {}\n", m.artist, m.title));
    }
    reply.push_str(".\n");
    Ok(reply)
}
