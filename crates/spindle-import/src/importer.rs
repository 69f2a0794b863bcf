//! The catalog importer: tar entries in, deduplicated CD rows out.

use std::fmt;
use std::time::Instant;

use spindle_core::record::DiscRecord;
use spindle_core::store::Catalog;

use crate::error::Result;
use crate::source::ByteSource;
use crate::tar::{EntryKind, TarReader};

/// Two records describe the same CD when any of these normalized
/// trigram scores reaches the threshold.
const TITLE_SIMILARITY: u16 = 25;

const PROGRESS_INTERVAL: u64 = 100_000;

/// Structured counters collected over one import run.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ImportReport {
    /// Records read from the archive.
    pub records: u64,
    /// Unpacked payload bytes.
    pub bytes: u64,
    /// Invalid or mis-encoded records skipped.
    pub invalid: u64,
    /// Records whose normalized name hash was already known.
    pub duplicate_hash: u64,
    /// Same disc id, differing frames, similar title.
    pub same_cd_collisions: u64,
    /// Same disc id, differing frames, unrelated title.
    pub real_collisions: u64,
    /// Same disc id and frames but unrelated titles (fingerprint
    /// collision proper).
    pub frame_duplicates: u64,
    /// Near-duplicates: same frames, similar title, merge policy ran.
    pub same_cd_frames: u64,
    pub entropy_gt: u64,
    pub entropy_eq: u64,
    pub entropy_lt: u64,
    /// Exactly equal strings.
    pub duplicate: u64,
    /// Equal when case-folded.
    pub duplicate_lower: u64,
    pub upper_count_gt: u64,
    pub upper_count_eqlt: u64,
    pub overall_count_gt: u64,
    pub overall_count_eqlt: u64,
    /// CDs inserted (net of deletions by the merge policy).
    pub added: u64,
    /// CDs overwritten by a better record.
    pub updated: u64,
}

impl fmt::Display for ImportReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "Read {} bytes, {} records, {} invalid, {} duplicate crc",
            self.bytes, self.records, self.invalid, self.duplicate_hash
        )?;
        writeln!(
            f,
            "Discid collisions (differing frames): same title: {}, real collisions: {}",
            self.same_cd_collisions, self.real_collisions
        )?;
        writeln!(f, "Frame duplicates: {}", self.frame_duplicates)?;
        writeln!(f, "Duplicate CD records: {}", self.same_cd_frames)?;
        writeln!(
            f,
            "    Entropy: gt {}, eq {}, lt {}",
            self.entropy_gt, self.entropy_eq, self.entropy_lt
        )?;
        writeln!(
            f,
            "        Same strings: {}, lowercase {}",
            self.duplicate, self.duplicate_lower
        )?;
        writeln!(
            f,
            "            Uppercase chars: gt {}, eq/lt {}",
            self.upper_count_gt, self.upper_count_eqlt
        )?;
        writeln!(
            f,
            "        Total chars: gt {}, eq/lt {}",
            self.overall_count_gt, self.overall_count_eqlt
        )?;
        writeln!(
            f,
            "    Used for updates: {}",
            self.entropy_gt + self.upper_count_gt + self.overall_count_gt
        )?;
        writeln!(
            f,
            "Total: added {} CDs, updated {} CDs",
            self.added, self.updated
        )
    }
}

/// Drives archive entries through record parsing and the dedup/merge
/// policy into the catalog.
#[derive(Debug)]
pub struct Importer {
    catalog: Catalog,
    debug: bool,
    report: ImportReport,
}

impl Importer {
    pub fn new(catalog: Catalog) -> Self {
        Self {
            catalog,
            debug: false,
            report: ImportReport::default(),
        }
    }

    /// Also write skipped and merged records to the ERRORS table.
    #[must_use]
    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    pub fn report(&self) -> &ImportReport {
        &self.report
    }

    pub fn into_catalog(self) -> Catalog {
        self.catalog
    }

    /// Import an archive. `initial` drops the fuzzy index for the bulk
    /// load and recreates it before commit. The whole run is one
    /// transaction; the counter report is printed to stdout at the end.
    pub fn import(&mut self, file: &str, initial: bool) -> Result<&ImportReport> {
        self.report = ImportReport::default();
        let started = Instant::now();
        let mut lap = Instant::now();

        let source = ByteSource::open(file, file.ends_with(".bz2"))?;
        let mut tar = TarReader::new(source);

        self.catalog.begin_bulk()?;
        if initial {
            self.catalog.drop_fuzzy_index()?;
        }

        while let Some(entry) = tar.next_entry(EntryKind::File.bit(), true)? {
            if self.report.records > 0 && self.report.records % PROGRESS_INTERVAL == 0 {
                let rps = PROGRESS_INTERVAL as f64 / lap.elapsed().as_secs_f64();
                lap = Instant::now();
                log::info!(
                    "{}s elapsed, {} records read, {:.0} records/s",
                    started.elapsed().as_secs(),
                    self.report.records,
                    rps
                );
            }
            self.report.records += 1;
            self.report.bytes += entry.data.len() as u64;
            self.ingest(&entry.data)?;
        }

        if initial {
            let index_started = Instant::now();
            self.catalog.create_fuzzy_index()?;
            log::info!(
                "fuzzy index creation took {}ms",
                index_started.elapsed().as_millis()
            );
        }
        self.catalog.commit_bulk()?;

        log::info!(
            "import done: {} records in {}s",
            self.report.records,
            started.elapsed().as_secs()
        );
        println!("{}", self.report);

        Ok(&self.report)
    }

    /// One record: parse, dedup by name hash, triage disc-id collisions,
    /// and write the surviving links.
    fn ingest(&mut self, data: &[u8]) -> Result<()> {
        let rec = DiscRecord::parse(data);

        if !rec.valid() {
            if self.debug {
                let ext = format!("{} / {}", rec.artist(), rec.title());
                self.catalog.log_error("INVALID", &ext, data)?;
            }
            self.report.invalid += 1;
            return Ok(());
        }

        let mut record_written = false;
        let cdid = match self.catalog.namehash_cd(rec.normalized_hash())? {
            Some(cd) => {
                // known content; its discid may still be a new link for
                // the same CD (slightly different rips)
                self.report.duplicate_hash += 1;
                if self.debug {
                    let ext = format!("hash duplicate: {}", rec.normalized_hash());
                    self.catalog.log_error("HASHDUP", &ext, data)?;
                }
                cd
            }
            None => {
                record_written = true;
                self.write_record(&rec)?
            }
        };

        let mut discid_valid = true;

        if let Some(ecd) = self.catalog.first_cd_for_discid(rec.discid())? {
            // the discid is taken; decide whether this is a true
            // collision, a near-duplicate to merge, or a fingerprint
            // accident
            discid_valid = false;

            let Some(existing) = self.catalog.disc_record(ecd, rec.discid())? else {
                log::warn!("discid {:x} links to missing cd {}", rec.discid(), ecd);
                return Ok(());
            };

            let same_frames =
                existing.seconds() == rec.seconds() && existing.frames() == rec.frames();
            let same_title = similar_titles(&existing, &rec);

            if !same_frames {
                // different discs sharing an id; keep the link, clients
                // disambiguate by frame lengths
                discid_valid = true;
                if same_title {
                    self.report.same_cd_collisions += 1;
                } else {
                    self.report.real_collisions += 1;
                }
                if self.debug {
                    let reason = if same_title { "SAMECDDID" } else { "SAMEDID" };
                    self.log_pair(reason, &rec, ecd, &existing, data)?;
                }
            } else if same_title {
                self.merge_near_duplicate(&rec, ecd, &existing, cdid, record_written, data)?;
            } else {
                self.report.frame_duplicates += 1;
                if self.debug {
                    self.log_pair("SAMEFRAMES", &rec, ecd, &existing, data)?;
                }
            }
        }

        if discid_valid {
            self.catalog.insert_discid(rec.discid(), cdid)?;
            self.catalog.insert_fuzzyid(rec.fuzzy_discid(), cdid)?;
        }

        Ok(())
    }

    /// Same frames, similar title: keep whichever record carries more
    /// information. Entropy decides first; ties fall back to uppercase
    /// share (accented forms), then to sheer character count.
    fn merge_near_duplicate(
        &mut self,
        rec: &DiscRecord,
        ecd: i64,
        existing: &DiscRecord,
        cdid: i64,
        record_written: bool,
        data: &[u8],
    ) -> Result<()> {
        self.report.same_cd_frames += 1;
        let mut reason = String::from("SAMECDFRAMES_REQ");
        let mut update_with_this = false;

        if rec.entropy() > existing.entropy() {
            self.report.entropy_gt += 1;
            reason.push_str("_EGT");
            update_with_this = true;
        } else if rec.entropy() == existing.entropy() {
            if rec.equal_strings(existing) {
                self.report.duplicate += 1;
                reason.push_str("_DUP");
            } else if rec.equal_lowercase_strings(existing) {
                self.report.duplicate_lower += 1;
                reason.push_str("_DLP");
                if rec.uppercase_count() > existing.uppercase_count() {
                    self.report.upper_count_gt += 1;
                    update_with_this = true;
                } else {
                    self.report.upper_count_eqlt += 1;
                }
            } else {
                if rec.charcount() > existing.charcount() {
                    self.report.overall_count_gt += 1;
                    update_with_this = true;
                } else {
                    self.report.overall_count_eqlt += 1;
                }
                self.report.entropy_eq += 1;
                reason.push_str("_EEQ");
            }
        } else {
            self.report.entropy_lt += 1;
            reason.push_str("_ELT");
        }

        if record_written {
            self.delete_record(cdid, rec.normalized_hash())?;
        }
        if update_with_this {
            self.update_record(ecd, rec)?;
        }

        if self.debug {
            self.log_pair(&reason, rec, ecd, existing, data)?;
        }

        Ok(())
    }

    fn write_record(&mut self, rec: &DiscRecord) -> Result<i64> {
        let genre = self.catalog.genre_id(rec.genre())?;
        let cdid = self.catalog.insert_cd(rec, genre)?;
        self.catalog.insert_namehash(rec.normalized_hash(), cdid)?;
        for (n, song) in rec.songs().iter().enumerate() {
            let frames = rec.frames().get(n).copied().unwrap_or(0);
            self.catalog.insert_track(cdid, n, song, frames)?;
        }
        self.report.added += 1;
        Ok(cdid)
    }

    fn update_record(&mut self, cd: i64, rec: &DiscRecord) -> Result<()> {
        let genre = self.catalog.genre_id(rec.genre())?;
        self.catalog.update_cd(cd, rec, genre)?;
        for (n, song) in rec.songs().iter().enumerate() {
            let frames = rec.frames().get(n).copied().unwrap_or(0);
            self.catalog.update_track(cd, n, song, frames)?;
        }
        self.report.updated += 1;
        Ok(())
    }

    fn delete_record(&mut self, cd: i64, hash: u32) -> Result<()> {
        self.catalog.delete_cd(cd)?;
        self.catalog.delete_tracks(cd)?;
        self.catalog.delete_namehash(hash)?;
        self.report.added -= 1;
        Ok(())
    }

    fn log_pair(
        &self,
        reason: &str,
        rec: &DiscRecord,
        ecd: i64,
        existing: &DiscRecord,
        data: &[u8],
    ) -> Result<()> {
        let ext = format!(
            "discid {:x}, cd {}, {} / {} - {} / {}",
            rec.discid(),
            ecd,
            rec.artist(),
            rec.title(),
            existing.artist(),
            existing.title()
        );
        self.catalog.log_error(reason, &ext, data)?;
        Ok(())
    }
}

fn similar_titles(left: &DiscRecord, right: &DiscRecord) -> bool {
    let combined_left = format!("{}{}", left.artist(), left.title());
    let combined_right = format!("{}{}", right.artist(), right.title());
    DiscRecord::compare_normalized(&combined_left, &combined_right) >= TITLE_SIMILARITY
        || DiscRecord::compare_normalized(left.artist(), right.artist()) >= TITLE_SIMILARITY
        || DiscRecord::compare_normalized(left.title(), right.title()) >= TITLE_SIMILARITY
}
