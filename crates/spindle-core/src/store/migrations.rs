//! Catalog schema, applied through the versioned migration runner.

#[derive(Debug)]
pub struct Migration {
    pub version: u32,
    pub name: &'static str,
    pub sql: &'static str,
}

pub const MIGRATIONS: &[Migration] = &[Migration {
    version: 1,
    name: "catalog_schema",
    sql: "
CREATE TABLE CD (
    cd INTEGER PRIMARY KEY,
    artist TEXT,
    title TEXT,
    genre INTEGER,
    year INTEGER,
    seconds INTEGER,
    revision INTEGER,
    tracks INTEGER);

CREATE TABLE NAMEHASH (
    hash INTEGER PRIMARY KEY,
    cd INTEGER);

CREATE TABLE TRACKS (
    cd INTEGER,
    track INTEGER,
    song TEXT,
    frames INTEGER);

CREATE TABLE DISCID (
    discid INTEGER,
    cd INTEGER);

CREATE TABLE FUZZYID (
    fuzzyid INTEGER,
    cd INTEGER);

CREATE TABLE GENRE (
    id INTEGER PRIMARY KEY,
    name TEXT);

CREATE TABLE ERRORS (
    reason TEXT,
    extended TEXT,
    file TEXT);

CREATE INDEX track_cd_idx ON TRACKS (cd);
CREATE INDEX discid_id_idx ON DISCID (discid);
CREATE INDEX fuzzyid_id_idx ON FUZZYID (fuzzyid);
",
}];
