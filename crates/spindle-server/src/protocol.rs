//! The disc-metadata command dispatcher.
//!
//! One instance serves every session; per-session state lives in
//! [`Session`]. Commands and the first `cddb` argument are
//! case-insensitive. Malformed structure answers `530` and terminates
//! the session; unparseable numeric arguments drop it without a reply.

use std::sync::{Mutex, PoisonError};

use spindle_core::fingerprint::frame_starts_to_lengths;
use spindle_core::store::Catalog;

use crate::error::{Result, ServerError};
use crate::http::{split_http_query, wrap_reply};
use crate::matching;
use crate::net::{Session, SessionHandler};

const PROTO_LEVEL: u32 = 6;

/// The protocol handler: the catalog behind its serialization mutex
/// plus the per-server configuration.
#[derive(Debug)]
pub struct CddbProtocol {
    catalog: Mutex<Catalog>,
    expect_http: bool,
    log_protocol: bool,
    /// Per-track difference gate, in frames.
    max_trackdiff: u32,
}

impl CddbProtocol {
    /// `max_trackdiff` is configured in seconds and applied in frames.
    pub fn new(catalog: Catalog, expect_http: bool, log_protocol: bool, max_trackdiff: u16) -> Self {
        Self {
            catalog: Mutex::new(catalog),
            expect_http,
            log_protocol,
            max_trackdiff: u32::from(max_trackdiff) * 75,
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Catalog> {
        self.catalog.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn greeting(&self) -> String {
        format!(
            "201 spindle CDDBP server v{} ready at {}\n",
            env!("CARGO_PKG_VERSION"),
            chrono::Local::now().format("%a %b %d %H:%M:%S %Y")
        )
    }

    fn cddb_request(&self, line: &str, session: &mut Session) -> Result<String> {
        let mut words: Vec<String> = line.split_whitespace().map(str::to_string).collect();
        if let Some(first) = words.first_mut() {
            *first = first.to_lowercase();
        }
        if words.len() > 1 && words[0] == "cddb" {
            words[1] = words[1].to_lowercase();
        }

        if words.is_empty() {
            if !session.handshake {
                return Ok(self.greeting());
            }
            session.terminate = true;
            return Ok("530\n".to_string());
        }

        if words.len() > 1 && words[0] == "cddb" {
            match words[1].as_str() {
                "hello" => {
                    session.handshake = true;
                    Ok(register_user(&words[2..]))
                }
                _ if !session.handshake => {
                    session.terminate = true;
                    Ok("530 no handshake\n".to_string())
                }
                "lscat" => Ok(
                    "200 Okay category list follows (until terminating marker)\ngeneric\n.\n"
                        .to_string(),
                ),
                "query" => self.cmd_query(&words, session),
                "read" => self.cmd_read(&words, session),
                _ => {
                    session.terminate = true;
                    Ok("530 unsupported cddb command\n".to_string())
                }
            }
        } else {
            match words[0].as_str() {
                "hello" => {
                    session.handshake = true;
                    Ok(register_user(&words[1..]))
                }
                _ if !session.handshake => {
                    session.terminate = true;
                    Ok("530 no handshake\n".to_string())
                }
                "stat" => self.cmd_stat(),
                "proto" => cmd_proto(words.get(1)),
                "ver" => Ok(format!(
                    "200 spindle CDDBP v{}\n",
                    env!("CARGO_PKG_VERSION")
                )),
                "quit" => {
                    session.terminate = true;
                    Ok("230 spindle Closing connection. Goodbye.\n".to_string())
                }
                _ => {
                    session.terminate = true;
                    Ok("530 unsupported command\n".to_string())
                }
            }
        }
    }

    /// `cddb query <discid> <ntrks> <off1> ... <offN> <nsecs>`
    fn cmd_query(&self, words: &[String], session: &mut Session) -> Result<String> {
        if words.len() < 6 {
            session.terminate = true;
            return Ok("530 insufficient parameters\n".to_string());
        }

        let ntrks = parse_u32(&words[3])? as usize;
        if ntrks == 0 || ntrks + 5 != words.len() {
            session.terminate = true;
            return Ok("530 track count does not match parameter count\n".to_string());
        }

        // the client's own discid is parsed but not trusted
        parse_hex32(&words[2])?;

        let mut starts = Vec::with_capacity(ntrks);
        for word in &words[4..4 + ntrks] {
            starts.push(parse_u32(word)?);
        }
        let seconds = parse_u32(&words[4 + ntrks])?;

        let Some((lead_in, lengths)) = frame_starts_to_lengths(seconds, &starts) else {
            // a layout that needs a negative track length matches nothing
            return Ok("202\n".to_string());
        };

        let catalog = self.lock();
        matching::query(&catalog, lead_in, &lengths, self.max_trackdiff)
    }

    /// `cddb read <category> <discid>`
    fn cmd_read(&self, words: &[String], session: &mut Session) -> Result<String> {
        if words.len() != 4 {
            session.terminate = true;
            return Ok("530 invalid parameter count\n".to_string());
        }
        let discid = parse_hex32(&words[3])?;

        let catalog = self.lock();
        let file = match catalog.first_cd_for_discid(discid)? {
            Some(cd) => catalog
                .disc_record(cd, discid)?
                .map(|rec| rec.xmcd_file()),
            None => None,
        };

        Ok(match file {
            Some(file) => format!("210 {} {}\n{}.\n", words[2], words[3], file),
            None => format!(
                "401 {} {} No such CD entry in database.\n",
                words[2], words[3]
            ),
        })
    }

    fn cmd_stat(&self) -> Result<String> {
        let entries = self.lock().cd_count()?;
        Ok(format!(
            "210 OK, status information follows (until terminating `.')\n\
             current proto: {PROTO_LEVEL}\n\
             max proto: {PROTO_LEVEL}\n\
             gets: no\n\
             updates: no\n\
             posting: no\n\
             quotes: no\n\
             current users: 1\n\
             max users: 1000\n\
             strip ext: yes\n\
             Database entries: {entries}\n.\n"
        ))
    }
}

fn register_user(args: &[String]) -> String {
    let mut fields = args.iter().map(String::as_str);
    let user = fields.next().unwrap_or("");
    let host = fields.next().unwrap_or("");
    let client = fields.next().unwrap_or("");
    let version = fields.next().unwrap_or("");
    format!("200 hello and welcome {user}@{host} running {client} {version}\n")
}

fn cmd_proto(arg: Option<&String>) -> Result<String> {
    let level = match arg {
        Some(word) => parse_u32(word)?,
        None => 0,
    };
    Ok(if level == PROTO_LEVEL {
        format!("502 Protocol level already {PROTO_LEVEL}\n")
    } else if level > 0 {
        "501 Illegal protocol level\n".to_string()
    } else {
        format!("200 CDDB protocol level: current {PROTO_LEVEL}, supported {PROTO_LEVEL}\n")
    })
}

fn parse_u32(word: &str) -> Result<u32> {
    word.parse()
        .map_err(|_| ServerError::BadRequest(format!("not a number: {word}")))
}

fn parse_hex32(word: &str) -> Result<u32> {
    u32::from_str_radix(word, 16)
        .map_err(|_| ServerError::BadRequest(format!("not a hex number: {word}")))
}

impl SessionHandler for CddbProtocol {
    fn on_connect(&self, session: &mut Session) -> Option<String> {
        // an HTTP-expecting port must stay silent on connect
        if self.expect_http {
            None
        } else {
            self.cddb_request("", session).ok()
        }
    }

    fn on_line(&self, line: &str, session: &mut Session) -> Result<String> {
        if self.log_protocol {
            eprintln!("{line}");
        }

        if line.starts_with("GET ") {
            session.is_http = true;
            let cmds = split_http_query(line)?;
            if cmds.len() != 3 {
                return Err(ServerError::BadRequest("invalid query".into()));
            }
            // hello first, then the protocol level, then the command
            self.cddb_request(&cmds[1], session)?;
            self.cddb_request(&cmds[2], session)?;
            let body = self.cddb_request(&cmds[0], session)?;
            let reply = wrap_reply(&body);
            if self.log_protocol {
                eprintln!("{reply}");
            }
            return Ok(reply);
        }
        if session.is_http {
            // trailing client headers after the GET line are ignored
            return Ok(String::new());
        }

        self.cddb_request(line, session)
    }
}
