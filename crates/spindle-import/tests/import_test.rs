//! End-to-end import: a small tar archive of disc records goes in, the
//! deduplicated catalog comes out.

use std::io::Write;

use spindle_core::fingerprint::{disc_fingerprint, frame_starts_to_lengths};
use spindle_core::store::Catalog;
use spindle_import::Importer;
use tempfile::TempDir;

const BLOCK_LEN: usize = 512;

fn checksum(buf: &mut [u8; BLOCK_LEN]) {
    for b in &mut buf[148..156] {
        *b = b' ';
    }
    let sum: u64 = buf.iter().map(|&b| u64::from(b)).sum();
    let field = format!("{sum:06o}\0 ");
    buf[148..156].copy_from_slice(field.as_bytes());
}

fn add_file(archive: &mut Vec<u8>, name: &str, data: &[u8]) {
    let mut header = [0u8; BLOCK_LEN];
    header[..name.len()].copy_from_slice(name.as_bytes());
    let octal = format!("{:011o}", data.len());
    header[124..135].copy_from_slice(octal.as_bytes());
    header[156] = b'0';
    header[257..262].copy_from_slice(b"ustar");
    checksum(&mut header);
    archive.extend_from_slice(&header);
    archive.extend_from_slice(data);
    while archive.len() % BLOCK_LEN != 0 {
        archive.push(0);
    }
}

fn finish(archive: &mut Vec<u8>) {
    archive.extend_from_slice(&[0u8; BLOCK_LEN]);
    archive.extend_from_slice(&[0u8; BLOCK_LEN]);
}

fn record(artist: &str, title: &str, songs: &[&str], starts: &[u32], seconds: u32) -> Vec<u8> {
    let mut rec = String::from("# xmcd 2.0 CD database file\n#\n# Track frame offsets:\n");
    for s in starts {
        rec.push_str(&format!("#       {s}\n"));
    }
    rec.push_str(&format!("#\n# Disc length: {seconds} seconds\n#\n# Revision: 1\n#\n"));
    rec.push_str(&format!("DTITLE={artist} / {title}\n"));
    rec.push_str("DYEAR=1979\nDGENRE=Rock\n");
    for (n, song) in songs.iter().enumerate() {
        rec.push_str(&format!("TTITLE{n}={song}\n"));
    }
    rec.push_str("PLAYORDER=\n");
    rec.into_bytes()
}

const STARTS_A: [u32; 2] = [150, 20000];
const SECONDS_A: u32 = 600;
const STARTS_C: [u32; 2] = [180, 30000];
const SECONDS_C: u32 = 700;

fn build_archive() -> Vec<u8> {
    let mut archive = Vec::new();
    // resource fork shadowing the first record must be skipped
    add_file(&mut archive, "./._rock/a1", b"junk metadata");
    add_file(
        &mut archive,
        "rock/a1",
        &record(
            "Motorhead",
            "Bomber",
            &["Song One", "Song Two"],
            &STARTS_A,
            SECONDS_A,
        ),
    );
    // same disc, same layout, richer strings: must win the merge
    add_file(
        &mut archive,
        "rock/a2",
        &record(
            "Motörhead",
            "Bomber",
            &["Song One", "Song Two"],
            &STARTS_A,
            SECONDS_A,
        ),
    );
    // an unrelated disc
    add_file(
        &mut archive,
        "jazz/c1",
        &record(
            "Quiet Trio",
            "Blue Evening",
            &["Opening", "Closing"],
            &STARTS_C,
            SECONDS_C,
        ),
    );
    // an invalid record: no title line at all
    add_file(&mut archive, "rock/bad", b"# Disc length: 100 seconds\nTTITLE0=Orphan\n");
    finish(&mut archive);
    archive
}

fn import_archive(path: &std::path::Path, db: &std::path::Path) -> Importer {
    let catalog = Catalog::open(db).unwrap();
    let mut importer = Importer::new(catalog).with_debug(true);
    importer.import(path.to_str().unwrap(), true).unwrap();
    importer
}

#[test]
fn test_import_merges_and_deduplicates() {
    let dir = TempDir::new().unwrap();
    let tar_path = dir.path().join("dump.tar");
    std::fs::write(&tar_path, build_archive()).unwrap();

    let importer = import_archive(&tar_path, &dir.path().join("catalog.sqlite"));

    let report = importer.report().clone();
    assert_eq!(report.records, 4);
    assert_eq!(report.invalid, 1);
    assert_eq!(report.duplicate_hash, 1);
    assert_eq!(report.same_cd_frames, 1);
    assert_eq!(report.entropy_gt, 1);
    assert_eq!(report.added, 2);
    assert_eq!(report.updated, 1);

    let catalog = importer.into_catalog();
    assert_eq!(catalog.cd_count().unwrap(), 2);

    // the richer record's strings won the merge
    let (lead_in, lengths) = frame_starts_to_lengths(SECONDS_A, &STARTS_A).unwrap();
    let discid = disc_fingerprint(lead_in, &lengths);
    let cds = catalog.cds_for_discid(discid).unwrap();
    assert_eq!(cds.len(), 1);
    let stored = catalog.disc_record(cds[0], discid).unwrap().unwrap();
    assert_eq!(stored.artist(), "Motörhead");
    assert_eq!(stored.title(), "Bomber");
    assert_eq!(stored.frames(), &lengths[..]);

    // referential integrity: every index row points at a live CD
    assert_eq!(catalog.namehash_cd(stored.normalized_hash()).unwrap(), Some(cds[0]));
    for cd in catalog.cds_for_fuzzyid(stored.fuzzy_discid()).unwrap() {
        assert!(catalog.cd_summary(cd).unwrap().is_some());
    }

    // the unrelated disc is present and linked
    let (lead_c, lengths_c) = frame_starts_to_lengths(SECONDS_C, &STARTS_C).unwrap();
    let discid_c = disc_fingerprint(lead_c, &lengths_c);
    assert_eq!(catalog.cds_for_discid(discid_c).unwrap().len(), 1);
}

#[test]
fn test_import_bzip2_archive() {
    let dir = TempDir::new().unwrap();
    let tar_path = dir.path().join("dump.tar.bz2");
    let mut enc = bzip2::write::BzEncoder::new(Vec::new(), bzip2::Compression::default());
    enc.write_all(&build_archive()).unwrap();
    std::fs::write(&tar_path, enc.finish().unwrap()).unwrap();

    let importer = import_archive(&tar_path, &dir.path().join("catalog.sqlite"));
    assert_eq!(importer.report().records, 4);
    assert_eq!(importer.into_catalog().cd_count().unwrap(), 2);
}

#[test]
fn test_incremental_import_keeps_existing() {
    let dir = TempDir::new().unwrap();
    let db = dir.path().join("catalog.sqlite");

    let mut first = Vec::new();
    add_file(
        &mut first,
        "rock/a1",
        &record("Motorhead", "Bomber", &["Song One", "Song Two"], &STARTS_A, SECONDS_A),
    );
    finish(&mut first);
    let first_path = dir.path().join("first.tar");
    std::fs::write(&first_path, first).unwrap();
    import_archive(&first_path, &db);

    // the update archive only carries the new disc; keep indexes up
    let mut update = Vec::new();
    add_file(
        &mut update,
        "jazz/c1",
        &record("Quiet Trio", "Blue Evening", &["Opening", "Closing"], &STARTS_C, SECONDS_C),
    );
    finish(&mut update);
    let update_path = dir.path().join("update.tar");
    std::fs::write(&update_path, update).unwrap();

    let catalog = Catalog::open(&db).unwrap();
    let mut importer = Importer::new(catalog);
    importer.import(update_path.to_str().unwrap(), false).unwrap();
    assert_eq!(importer.report().added, 1);

    let catalog = importer.into_catalog();
    assert_eq!(catalog.cd_count().unwrap(), 2);
}
