//! The one-shot HTTP wrapper: a GET query string carrying the protocol
//! commands.
//!
//! `GET /?cmd=cddb+query+...&hello=user+host+client+ver&proto=6 HTTP/1.1`
//! decodes to three protocol lines. `+` is space, `%XX` is a hex-escaped
//! byte, and each `&`-separated component keeps its parameter name with
//! the `=` turned into a space, so `hello=...` and `proto=...` re-enter
//! the dispatcher as the `hello` and `proto` commands. Only the first
//! component drops its name.

use crate::error::ServerError;

fn hex_digit(ch: char) -> Result<u8, ServerError> {
    match ch {
        '0'..='9' => Ok(ch as u8 - b'0'),
        'a'..='f' => Ok(10 + ch as u8 - b'a'),
        'A'..='F' => Ok(10 + ch as u8 - b'A'),
        _ => Err(ServerError::BadRequest(
            "illegal hex character in query".into(),
        )),
    }
}

/// Split a GET request line into decoded protocol command lines.
/// A request without the HTTP-version tail, or with an incomplete hex
/// escape, is malformed and drops the connection.
pub fn split_http_query(line: &str) -> Result<Vec<String>, ServerError> {
    #[derive(Clone, Copy, PartialEq)]
    enum State {
        Preamble,
        QueryCmd,
        QueryReplaceEqual,
        Query,
        HttpVersion,
    }

    let mut state = State::Preamble;
    let mut parts: Vec<String> = Vec::new();
    let mut query: Vec<u8> = Vec::new();
    let mut hex_count = 0u8;
    let mut hex_char = 0u8;
    let mut utf8 = [0u8; 4];

    for ch in line.chars() {
        match state {
            State::Preamble => {
                if ch == '?' {
                    state = State::QueryCmd;
                }
            }
            State::QueryCmd => {
                if ch == '=' {
                    state = State::Query;
                }
            }
            State::QueryReplaceEqual | State::Query => {
                if hex_count > 0 {
                    hex_char = hex_char.wrapping_mul(16).wrapping_add(hex_digit(ch)?);
                    hex_count -= 1;
                    if hex_count == 0 {
                        query.push(hex_char);
                    }
                } else if ch == '%' {
                    hex_count = 2;
                    hex_char = 0;
                } else if ch == '+' {
                    query.push(b' ');
                } else if ch == '&' {
                    parts.push(take_query(&mut query));
                    state = State::QueryReplaceEqual;
                } else if ch == ' ' {
                    parts.push(take_query(&mut query));
                    state = State::HttpVersion;
                } else if ch == '=' && state == State::QueryReplaceEqual {
                    query.push(b' ');
                    state = State::Query;
                } else {
                    query.extend_from_slice(ch.encode_utf8(&mut utf8).as_bytes());
                }
            }
            State::HttpVersion => {}
        }
    }

    if hex_count > 0 {
        return Err(ServerError::BadRequest("incomplete hex escape".into()));
    }
    if state != State::HttpVersion {
        return Err(ServerError::BadRequest("malformed HTTP request".into()));
    }

    Ok(parts)
}

fn take_query(query: &mut Vec<u8>) -> String {
    String::from_utf8_lossy(&std::mem::take(query)).into_owned()
}

/// Wrap a protocol reply in the minimal HTTP envelope.
pub fn wrap_reply(body: &str) -> String {
    let mut res = String::with_capacity(body.len() + 64);
    res.push_str(&format!(
        "HTTP/1.1 200 OK\r\nContent-Length: {}\r\n\r\n",
        body.len()
    ));
    res.push_str(body);
    res
}

#[cfg(test)]
mod tests {
    use super::*;

    const REQUEST: &str = "GET /?cmd=cddb+query+6809330a+10+150+20753+41510+53268+75958+91735+103165+120710+144018+160108+2357&hello=joachim+client+cddb-tool+0.4.7&proto=6 HTTP/1.1";

    #[test]
    fn test_split_three_components() {
        let parts = split_http_query(REQUEST).unwrap();
        assert_eq!(parts.len(), 3);
        assert_eq!(
            parts[0],
            "cddb query 6809330a 10 150 20753 41510 53268 75958 91735 103165 120710 144018 160108 2357"
        );
        assert_eq!(parts[1], "hello joachim client cddb-tool 0.4.7");
        assert_eq!(parts[2], "proto 6");
    }

    #[test]
    fn test_percent_escape() {
        let parts =
            split_http_query("GET /?cmd=cddb+read+generic+ab%2Fcd&hello=a+b+c+d&proto=6 HTTP/1.1")
                .unwrap();
        assert_eq!(parts[0], "cddb read generic ab/cd");
    }

    #[test]
    fn test_incomplete_hex_is_malformed() {
        assert!(split_http_query("GET /?cmd=x%4 HTTP/1.1").is_err());
        assert!(split_http_query("GET /?cmd=x%zz+y HTTP/1.1").is_err());
    }

    #[test]
    fn test_missing_http_version_is_malformed() {
        assert!(split_http_query("GET /?cmd=cddb+stat").is_err());
    }

    #[test]
    fn test_wrap_reply_counts_bytes() {
        let wrapped = wrap_reply("202\n");
        assert_eq!(wrapped, "HTTP/1.1 200 OK\r\nContent-Length: 4\r\n\r\n202\n");
    }
}
