//! A pluggable incremental HTTP/1.1 response parser.
//!
//! Hand-written rather than pulled from a general-purpose HTTP crate: the
//! shape is fixed (status line, headers, body, nothing exotic) and a
//! general parser buys nothing but attack surface — the same argument
//! spec.md §9 makes for the signature document's depth-aware scanner.
//! `ResponseParser` is the trait a different backend could implement; the
//! one provided here is what `hull-capability::http_client` uses.

use hull_core::HullError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseStatus {
    Incomplete,
    Complete,
}

/// Growth doubles each time and checks for overflow before the
/// multiplication — never silently wraps into an under-sized buffer.
fn grow(current: usize) -> Result<usize, HullError> {
    current
        .checked_mul(2)
        .filter(|&n| n > 0)
        .ok_or_else(|| HullError::OutOfBudget("response buffer growth overflowed".into()))
        .map(|n| n.max(256))
}

/// Caps this parser enforces; an overrun raises `IntegrityFailure`-adjacent
/// `InvalidArgument` and the caller tears the socket down — there is no
/// partial-success path once a cap is exceeded.
pub struct ParserLimits {
    pub max_headers: usize,
    pub max_header_bytes: usize,
    pub max_body_bytes: usize,
}

impl Default for ParserLimits {
    fn default() -> Self {
        ParserLimits {
            max_headers: 100,
            max_header_bytes: 64 * 1024,
            max_body_bytes: 10 * 1024 * 1024,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedResponse {
    pub status: u16,
    pub reason: String,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

enum Stage {
    StatusLine,
    Headers,
    Body { content_length: Option<usize> },
    Done,
}

/// Incremental parser: feed it bytes as they arrive off the socket via
/// repeated calls to [`IncrementalHttpParser::parse`]; it accumulates
/// internal state across calls and reports `Incomplete` until a full
/// response has been read (or `Complete`/error).
pub struct IncrementalHttpParser {
    limits: ParserLimits,
    stage: Stage,
    scratch: Vec<u8>,
    status: u16,
    reason: String,
    headers: Vec<(String, String)>,
    body: Vec<u8>,
}

impl IncrementalHttpParser {
    pub fn new(limits: ParserLimits) -> Self {
        IncrementalHttpParser {
            limits,
            stage: Stage::StatusLine,
            scratch: Vec::with_capacity(256),
            status: 0,
            reason: String::new(),
            headers: Vec::new(),
            body: Vec::new(),
        }
    }

    pub fn reset(&mut self) {
        self.stage = Stage::StatusLine;
        self.scratch.clear();
        self.status = 0;
        self.reason.clear();
        self.headers.clear();
        self.body.clear();
    }

    /// Feed `buf` (the bytes just read off the socket). Returns how many
    /// bytes were consumed and whether the response is complete.
    pub fn parse(&mut self, buf: &[u8]) -> Result<(ParseStatus, usize), HullError> {
        let mut consumed = 0;
        loop {
            match &self.stage {
                Stage::Done => return Ok((ParseStatus::Complete, consumed)),
                Stage::Body { content_length } => {
                    let remaining = &buf[consumed..];
                    if remaining.is_empty() {
                        return Ok((ParseStatus::Incomplete, consumed));
                    }
                    let need = content_length.map(|cl| cl.saturating_sub(self.body.len()));
                    let take = match need {
                        Some(need) => need.min(remaining.len()),
                        None => remaining.len(),
                    };
                    if self.body.len() + take > self.limits.max_body_bytes {
                        return Err(HullError::invalid_argument("response body exceeds configured cap"));
                    }
                    self.body.extend_from_slice(&remaining[..take]);
                    consumed += take;
                    if content_length.map(|cl| self.body.len() >= cl).unwrap_or(false) {
                        self.stage = Stage::Done;
                        return Ok((ParseStatus::Complete, consumed));
                    }
                    return Ok((ParseStatus::Incomplete, consumed));
                }
                Stage::StatusLine | Stage::Headers => {
                    let remaining = &buf[consumed..];
                    let Some(nl) = remaining.iter().position(|&b| b == b'\n') else {
                        self.accumulate_scratch(remaining)?;
                        consumed += remaining.len();
                        return Ok((ParseStatus::Incomplete, consumed));
                    };
                    let mut line_bytes = std::mem::take(&mut self.scratch);
                    line_bytes.extend_from_slice(&remaining[..nl]);
                    consumed += nl + 1;
                    let line = String::from_utf8_lossy(&line_bytes);
                    let line = line.trim_end_matches('\r');

                    match self.stage {
                        Stage::StatusLine => self.consume_status_line(line)?,
                        Stage::Headers => {
                            if line.is_empty() {
                                self.stage = self.body_stage();
                            } else {
                                self.consume_header_line(line)?;
                            }
                        }
                        _ => unreachable!(),
                    }
                }
            }
        }
    }

    fn accumulate_scratch(&mut self, bytes: &[u8]) -> Result<(), HullError> {
        if self.scratch.len() + bytes.len() > self.limits.max_header_bytes {
            return Err(HullError::invalid_argument("response header block exceeds configured cap"));
        }
        if self.scratch.capacity() < self.scratch.len() + bytes.len() {
            let target = grow(self.scratch.capacity().max(1))?;
            self.scratch.reserve(target.saturating_sub(self.scratch.len()));
        }
        self.scratch.extend_from_slice(bytes);
        Ok(())
    }

    fn consume_status_line(&mut self, line: &str) -> Result<(), HullError> {
        let mut parts = line.splitn(3, ' ');
        let _version = parts.next();
        let code = parts
            .next()
            .and_then(|s| s.parse::<u16>().ok())
            .ok_or_else(|| HullError::invalid_argument("malformed status line"))?;
        self.status = code;
        self.reason = parts.next().unwrap_or("").to_string();
        self.stage = Stage::Headers;
        Ok(())
    }

    fn consume_header_line(&mut self, line: &str) -> Result<(), HullError> {
        if self.headers.len() >= self.limits.max_headers {
            return Err(HullError::invalid_argument("response header count exceeds configured cap"));
        }
        let (name, value) = line
            .split_once(':')
            .ok_or_else(|| HullError::invalid_argument("malformed header line"))?;
        self.headers.push((name.trim().to_string(), value.trim().to_string()));
        Ok(())
    }

    fn body_stage(&self) -> Stage {
        let content_length = self
            .headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case("content-length"))
            .and_then(|(_, v)| v.parse::<usize>().ok());
        if content_length == Some(0) {
            return Stage::Done;
        }
        Stage::Body { content_length }
    }

    /// Transfer ownership of the finished response out of the parser.
    /// Only meaningful once `parse` has returned `ParseStatus::Complete`.
    pub fn into_response(self) -> ParsedResponse {
        ParsedResponse {
            status: self.status,
            reason: self.reason,
            headers: self.headers,
            body: self.body,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_a_complete_response_in_one_call() {
        let mut parser = IncrementalHttpParser::new(ParserLimits::default());
        let raw = b"HTTP/1.1 200 OK\r\nContent-Type: text/plain\r\nContent-Length: 5\r\n\r\nhello";
        let (status, consumed) = parser.parse(raw).unwrap();
        assert_eq!(status, ParseStatus::Complete);
        assert_eq!(consumed, raw.len());
        let resp = parser.into_response();
        assert_eq!(resp.status, 200);
        assert_eq!(resp.body, b"hello");
        assert_eq!(resp.headers[0], ("Content-Type".to_string(), "text/plain".to_string()));
    }

    #[test]
    fn parses_across_multiple_feeds() {
        let mut parser = IncrementalHttpParser::new(ParserLimits::default());
        let part1 = b"HTTP/1.1 200 OK\r\nContent-Length: 3\r\n";
        let part2 = b"\r\nabc";
        let (status1, _) = parser.parse(part1).unwrap();
        assert_eq!(status1, ParseStatus::Incomplete);
        let (status2, _) = parser.parse(part2).unwrap();
        assert_eq!(status2, ParseStatus::Complete);
        assert_eq!(parser.into_response().body, b"abc");
    }

    #[test]
    fn body_over_cap_is_rejected() {
        let mut parser = IncrementalHttpParser::new(ParserLimits {
            max_body_bytes: 4,
            ..Default::default()
        });
        let raw = b"HTTP/1.1 200 OK\r\nContent-Length: 10\r\n\r\n0123456789";
        assert!(parser.parse(raw).is_err());
    }

    #[test]
    fn header_count_over_cap_is_rejected() {
        let mut parser = IncrementalHttpParser::new(ParserLimits {
            max_headers: 1,
            ..Default::default()
        });
        let raw = b"HTTP/1.1 200 OK\r\nA: 1\r\nB: 2\r\n\r\n";
        assert!(parser.parse(raw).is_err());
    }

    #[test]
    fn reset_clears_parser_state() {
        let mut parser = IncrementalHttpParser::new(ParserLimits::default());
        parser.parse(b"HTTP/1.1 200 OK\r\nContent-Length: 0\r\n\r\n").unwrap();
        parser.reset();
        let raw = b"HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\n\r\n";
        let (status, _) = parser.parse(raw).unwrap();
        assert_eq!(status, ParseStatus::Complete);
        assert_eq!(parser.into_response().status, 404);
    }
}
