//! Request head sniffing
//!
//! Reads just the request line and headers of an HTTP/1.x request to learn
//! where it is going, without taking those bytes away from the tunnel: every
//! byte read ends up in the returned [`ReplayStream`].

use crate::error::SniffError;
use http::{Method, Uri};
use portico_connection::ReplayStream;
use std::str::FromStr;
use tokio::io::AsyncRead;
use tracing::trace;

/// Default limit for the request line plus headers
pub const DEFAULT_MAX_HEAD_LEN: usize = 64 * 1024;

/// Maximum number of headers to parse
const MAX_HEADERS: usize = 100;

/// Routing metadata extracted from a request head
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestMetadata {
    pub method: String,
    pub target: String,
    /// Authority of the request target, or the `Host` header; lowercased
    pub host: String,
    /// Non-empty `X-Host` header, lowercased
    pub override_host: Option<String>,
    /// Raw `Authorization` header value, empty when absent
    pub authorization: String,
    /// Length of the request line and headers, including the blank line
    pub head_len: usize,
}

impl RequestMetadata {
    /// The host the request should be routed to
    pub fn virtual_host(&self) -> &str {
        self.override_host.as_deref().unwrap_or(&self.host)
    }
}

/// A failed sniff, still holding the stream so an error can be written back
#[derive(Debug)]
pub struct SniffFailure<S> {
    pub error: SniffError,
    pub stream: ReplayStream<S>,
}

#[derive(Debug, Clone)]
pub struct RequestSniffer {
    max_head_len: usize,
}

impl Default for RequestSniffer {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_HEAD_LEN)
    }
}

impl RequestSniffer {
    pub fn new(max_head_len: usize) -> Self {
        Self { max_head_len }
    }

    /// Read and parse a request head from `io`.
    ///
    /// On success, the returned stream replays everything read so far
    /// (the head and any body bytes that arrived with it).
    pub async fn sniff<S: AsyncRead + Unpin>(
        &self,
        io: S,
    ) -> Result<(RequestMetadata, ReplayStream<S>), SniffFailure<S>> {
        let mut stream = ReplayStream::new(io);
        match self.read_head(&mut stream, &mut HeadScan::default()).await {
            Ok(metadata) => Ok((metadata, stream)),
            Err(error) => Err(SniffFailure { error, stream }),
        }
    }

    async fn read_head<S: AsyncRead + Unpin>(
        &self,
        stream: &mut ReplayStream<S>,
        scan: &mut HeadScan,
    ) -> Result<RequestMetadata, SniffError> {
        loop {
            if scan.advance(stream.buffered()) {
                if let Some(metadata) = scan.parse(stream.buffered())? {
                    trace!(
                        "Parsed {} byte request head ({} bytes buffered, {} parses)",
                        metadata.head_len,
                        stream.buffered_len(),
                        scan.parses
                    );
                    return Ok(metadata);
                }
            }

            if stream.buffered_len() >= self.max_head_len {
                return Err(SniffError::HeadTooLarge(self.max_head_len));
            }

            if stream.buffer_more(self.max_head_len).await? == 0 {
                // A malformed prefix is reported as such, not as truncated
                if let Some(metadata) = scan.parse(stream.buffered())? {
                    return Ok(metadata);
                }
                return Err(SniffError::Incomplete(stream.buffered_len()));
            }
        }
    }
}

/// Tracks how much of the buffered head has been searched for its end.
///
/// The head is only parsed once the bytes read since the last search
/// complete a blank line, so a client trickling its head in tiny segments
/// costs linear rather than quadratic work. The first bytes are also parsed
/// right away so that non-HTTP traffic is rejected without waiting.
#[derive(Debug, Default)]
struct HeadScan {
    scanned: usize,
    parses: usize,
}

impl HeadScan {
    /// Bytes of already searched data that may start a terminator
    const OVERLAP: usize = 3;

    /// Record newly buffered bytes, returning whether the head should be parsed
    fn advance(&mut self, buf: &[u8]) -> bool {
        if buf.len() <= self.scanned {
            return false;
        }
        let first = self.scanned == 0;
        let window = &buf[self.scanned.saturating_sub(Self::OVERLAP)..];
        self.scanned = buf.len();
        first || ends_blank_line(window)
    }

    fn parse(&mut self, buf: &[u8]) -> Result<Option<RequestMetadata>, SniffError> {
        self.parses += 1;
        parse_head(buf)
    }
}

/// Whether `window` contains an empty line (`\n\n` or `\n\r\n`)
fn ends_blank_line(window: &[u8]) -> bool {
    window.windows(2).any(|w| w == b"\n\n") || window.windows(3).any(|w| w == b"\n\r\n")
}

/// Parse a request head from `buf`, returning `None` while it is incomplete.
pub fn parse_head(buf: &[u8]) -> Result<Option<RequestMetadata>, SniffError> {
    let mut headers = [httparse::EMPTY_HEADER; MAX_HEADERS];
    let mut req = httparse::Request::new(&mut headers);
    let head_len = match req.parse(buf)? {
        httparse::Status::Partial => return Ok(None),
        httparse::Status::Complete(len) => len,
    };

    let method = req.method.unwrap_or_default();
    let target = req.path.unwrap_or_default();

    let authority = target_authority(method, target)?;
    let host = match authority {
        Some(authority) => authority,
        None => header(req.headers, "Host")?.unwrap_or_default().to_string(),
    };
    let override_host = header(req.headers, "X-Host")?
        .filter(|value| !value.is_empty())
        .map(str::to_lowercase);
    let authorization = header(req.headers, "Authorization")?
        .unwrap_or_default()
        .to_string();

    Ok(Some(RequestMetadata {
        method: method.to_string(),
        target: target.to_string(),
        host: host.to_lowercase(),
        override_host,
        authorization,
        head_len,
    }))
}

/// Host (and port) named by an absolute-form or authority-form request target.
fn target_authority(method: &str, target: &str) -> Result<Option<String>, SniffError> {
    if target.starts_with('/') || target == "*" {
        return Ok(None);
    }

    let uri = Uri::from_str(target).map_err(|e| SniffError::InvalidTarget(e.to_string()))?;
    if uri.scheme().is_none() && method != Method::CONNECT.as_str() {
        return Err(SniffError::InvalidTarget(target.to_string()));
    }

    let authority = uri
        .authority()
        .ok_or_else(|| SniffError::InvalidTarget(target.to_string()))?;
    let host = match authority.port() {
        Some(port) => format!("{}:{}", authority.host(), port),
        None => authority.host().to_string(),
    };
    Ok(Some(host))
}

/// First value of the header `name`, with surrounding blanks trimmed.
fn header<'a>(
    headers: &[httparse::Header<'a>],
    name: &'static str,
) -> Result<Option<&'a str>, SniffError> {
    headers
        .iter()
        .find(|h| h.name.eq_ignore_ascii_case(name))
        .map(|h| {
            std::str::from_utf8(h.value)
                .map(|value| value.trim_matches(|c| c == ' ' || c == '\t'))
                .map_err(|_| SniffError::InvalidHeader(name))
        })
        .transpose()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use tokio::io::AsyncReadExt;

    fn parse(request: &str) -> RequestMetadata {
        parse_head(request.as_bytes())
            .expect("valid request")
            .expect("complete request")
    }

    #[test]
    fn test_host_header() {
        let meta = parse("GET / HTTP/1.1\r\nHost: example.com\r\n\r\n");
        assert_eq!(meta.virtual_host(), "example.com");
        assert_eq!(meta.method, "GET");
        assert_eq!(meta.target, "/");
        assert_eq!(meta.authorization, "");
    }

    #[test]
    fn test_host_is_lowercased() {
        let meta = parse("GET / HTTP/1.1\r\nHost: Example.COM\r\n\r\n");
        assert_eq!(meta.virtual_host(), "example.com");
    }

    #[test]
    fn test_x_host_overrides_host() {
        let meta = parse("GET / HTTP/1.1\r\nHost: orig.example\r\nX-Host: Alt.Example\r\n\r\n");
        assert_eq!(meta.host, "orig.example");
        assert_eq!(meta.override_host.as_deref(), Some("alt.example"));
        assert_eq!(meta.virtual_host(), "alt.example");
    }

    #[test]
    fn test_empty_x_host_is_ignored() {
        let meta = parse("GET / HTTP/1.1\r\nX-Host: \r\nHost: orig.example\r\n\r\n");
        assert_eq!(meta.override_host, None);
        assert_eq!(meta.virtual_host(), "orig.example");
    }

    #[test]
    fn test_header_names_case_insensitive() {
        let meta =
            parse("GET / HTTP/1.1\r\nhOST: a.example\r\nx-host: b.example\r\nauthorization: tok\r\n\r\n");
        assert_eq!(meta.host, "a.example");
        assert_eq!(meta.virtual_host(), "b.example");
        assert_eq!(meta.authorization, "tok");
    }

    #[test]
    fn test_host_keeps_port() {
        let meta = parse("GET / HTTP/1.1\r\nHost: example.com:8080\r\n\r\n");
        assert_eq!(meta.virtual_host(), "example.com:8080");
    }

    #[test]
    fn test_authorization_is_raw_value() {
        let meta = parse(
            "GET / HTTP/1.1\r\nHost: example.com\r\nAuthorization: Basic dXNlcjpwYXNz\r\n\r\n",
        );
        assert_eq!(meta.authorization, "Basic dXNlcjpwYXNz");
    }

    #[test]
    fn test_first_header_wins() {
        let meta = parse(
            "GET / HTTP/1.1\r\nHost: one.example\r\nHost: two.example\r\nAuthorization: a\r\nAuthorization: b\r\n\r\n",
        );
        assert_eq!(meta.host, "one.example");
        assert_eq!(meta.authorization, "a");
    }

    #[test]
    fn test_absolute_form_target_wins_over_host() {
        let meta = parse("GET http://Target.Example:81/path HTTP/1.1\r\nHost: other.example\r\n\r\n");
        assert_eq!(meta.virtual_host(), "target.example:81");
    }

    #[test]
    fn test_absolute_form_without_port() {
        let meta = parse("GET http://target.example/path HTTP/1.1\r\n\r\n");
        assert_eq!(meta.virtual_host(), "target.example");
    }

    #[test]
    fn test_connect_authority_form() {
        let meta = parse("CONNECT tunnel.example:443 HTTP/1.1\r\n\r\n");
        assert_eq!(meta.virtual_host(), "tunnel.example:443");
    }

    #[test]
    fn test_missing_host_is_empty() {
        let meta = parse("GET / HTTP/1.0\r\n\r\n");
        assert_eq!(meta.virtual_host(), "");
    }

    #[test]
    fn test_head_len_excludes_body() {
        let request = "POST /submit HTTP/1.1\r\nHost: example.com\r\nContent-Length: 4\r\n\r\nbody";
        let meta = parse(request);
        assert_eq!(meta.head_len, request.len() - 4);
    }

    #[test]
    fn test_partial_head() {
        assert!(parse_head(b"GET / HTTP/1.1\r\nHost: exa").unwrap().is_none());
        assert!(parse_head(b"").unwrap().is_none());
    }

    #[test]
    fn test_malformed_request_line() {
        assert!(matches!(
            parse_head(b"NOT AN HTTP REQUEST\r\n\r\n"),
            Err(SniffError::Parse(_))
        ));
        assert!(parse_head(b"\x16\x03\x01\x02\x00\x01\x00\x01\xfc\x03\x03").is_err());
    }

    #[test]
    fn test_relative_target_without_slash_rejected() {
        assert!(matches!(
            parse_head(b"GET example.com HTTP/1.1\r\n\r\n"),
            Err(SniffError::InvalidTarget(_))
        ));
    }

    #[test]
    fn test_non_utf8_routing_header_rejected() {
        assert!(matches!(
            parse_head(b"GET / HTTP/1.1\r\nHost: caf\xe9.example\r\n\r\n"),
            Err(SniffError::InvalidHeader("Host"))
        ));
    }

    #[tokio::test]
    async fn test_sniff_replays_whole_stream() {
        let request: &[u8] =
            b"POST /upload HTTP/1.1\r\nHost: App.Example\r\nContent-Length: 11\r\n\r\nhello world";
        let sniffer = RequestSniffer::default();

        let (meta, mut stream) = sniffer.sniff(Cursor::new(request.to_vec())).await.unwrap();
        assert_eq!(meta.virtual_host(), "app.example");

        let mut seen = Vec::new();
        stream.read_to_end(&mut seen).await.unwrap();
        assert_eq!(seen, request);
    }

    #[tokio::test]
    async fn test_sniff_across_many_small_reads() {
        let request = b"GET /index.html HTTP/1.1\r\nHost: slow.example\r\nX-Host: fast.example\r\n\r\n";
        let (mut client, server) = tokio::io::duplex(8);

        let writer = tokio::spawn(async move {
            use tokio::io::AsyncWriteExt;
            for chunk in request.chunks(3) {
                client.write_all(chunk).await.unwrap();
                tokio::task::yield_now().await;
            }
            client.write_all(b"trailing").await.unwrap();
        });

        let (meta, mut stream) = RequestSniffer::default().sniff(server).await.unwrap();
        assert_eq!(meta.virtual_host(), "fast.example");
        writer.await.unwrap();

        let mut seen = vec![0u8; request.len() + b"trailing".len()];
        stream.read_exact(&mut seen).await.unwrap();
        assert_eq!(&seen[..request.len()], request);
        assert_eq!(&seen[request.len()..], b"trailing");
    }

    #[tokio::test]
    async fn test_sniff_eof_before_terminator() {
        let sniffer = RequestSniffer::default();
        let failure = sniffer
            .sniff(Cursor::new(b"GET / HTTP/1.1\r\nHost: example.com\r\n".to_vec()))
            .await
            .unwrap_err();

        assert!(matches!(failure.error, SniffError::Incomplete(35)));
        assert_eq!(failure.stream.buffered_len(), 35);
    }

    #[test]
    fn test_head_scan_waits_for_blank_line() {
        let mut scan = HeadScan::default();
        assert!(!scan.advance(b""));
        assert!(scan.advance(b"G"));
        assert!(!scan.advance(b"GET / HTTP/1.1\r"));
        assert!(!scan.advance(b"GET / HTTP/1.1\r\n"));
        assert!(!scan.advance(b"GET / HTTP/1.1\r\n\r"));
        assert!(scan.advance(b"GET / HTTP/1.1\r\n\r\n"));
        assert!(!scan.advance(b"GET / HTTP/1.1\r\n\r\n"));
    }

    #[test]
    fn test_head_scan_bare_lf() {
        let mut scan = HeadScan::default();
        assert!(scan.advance(b"GET / HTTP/1.1\nHost: a\n"));
        assert!(scan.advance(b"GET / HTTP/1.1\nHost: a\n\n"));
    }

    #[tokio::test]
    async fn test_trickled_head_is_parsed_a_bounded_number_of_times() {
        let mut head = b"GET / HTTP/1.1\r\nHost: trickle.example\r\n".to_vec();
        while head.len() < 16 * 1024 {
            head.extend_from_slice(b"X-Pad: aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa\r\n");
        }
        head.extend_from_slice(b"\r\n");
        let expected_len = head.len();

        let (mut client, server) = tokio::io::duplex(1);
        let writer = tokio::spawn(async move {
            use tokio::io::AsyncWriteExt;
            client.write_all(&head).await.unwrap();
            client
        });

        let sniffer = RequestSniffer::new(DEFAULT_MAX_HEAD_LEN);
        let mut stream = ReplayStream::new(server);
        let mut scan = HeadScan::default();
        let meta = sniffer.read_head(&mut stream, &mut scan).await.unwrap();
        let _client = writer.await.unwrap();

        assert_eq!(meta.virtual_host(), "trickle.example");
        assert_eq!(meta.head_len, expected_len);
        assert_eq!(stream.buffered_len(), expected_len);
        assert!(scan.parses <= 2, "head parsed {} times", scan.parses);
    }

    #[tokio::test]
    async fn test_sniff_rejects_garbage_before_blank_line() {
        let (mut client, server) = tokio::io::duplex(64);
        {
            use tokio::io::AsyncWriteExt;
            client.write_all(b"\x16\x03\x01\x02\x00\x01").await.unwrap();
        }

        let failure = RequestSniffer::default().sniff(server).await.unwrap_err();
        assert!(matches!(failure.error, SniffError::Parse(_)));
        drop(client);
    }

    #[tokio::test]
    async fn test_sniff_eof_reports_malformed_prefix() {
        let (mut client, server) = tokio::io::duplex(64);
        let writer = tokio::spawn(async move {
            use tokio::io::AsyncWriteExt;
            client.write_all(b"GET / HTTP/1.1\r\n").await.unwrap();
            tokio::task::yield_now().await;
            client.write_all(b"Bad Header\r\n").await.unwrap();
        });

        let failure = RequestSniffer::default().sniff(server).await.unwrap_err();
        writer.await.unwrap();
        assert!(matches!(failure.error, SniffError::Parse(_)));
    }

    #[tokio::test]
    async fn test_sniff_head_too_large() {
        let mut request = b"GET / HTTP/1.1\r\nHost: example.com\r\n".to_vec();
        request.extend(std::iter::repeat(b"X-Pad: aaaaaaaaaaaaaaaa\r\n").take(10).flatten());
        request.extend_from_slice(b"\r\n");

        let failure = RequestSniffer::new(64)
            .sniff(Cursor::new(request))
            .await
            .unwrap_err();
        assert!(matches!(failure.error, SniffError::HeadTooLarge(64)));
    }
}
