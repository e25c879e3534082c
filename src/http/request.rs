use crate::prelude::*;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Method {
    GET,
    POST,
    DELETE,
}

impl Method {
    pub fn is_allowed(&self, allowed_methods: &[String]) -> bool {
        allowed_methods.iter().any(|m| m == self.as_str())
    }

    pub fn as_str(&self) -> &str {
        match self {
            Method::GET => "GET",
            Method::POST => "POST",
            Method::DELETE => "DELETE",
        }
    }
}

impl Default for Method {
    fn default() -> Self {
        Method::GET
    }
}

impl FromStr for Method {
    type Err = ();
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "GET" => Ok(Method::GET),
            "POST" => Ok(Method::POST),
            "DELETE" => Ok(Method::DELETE),
            _ => Err(()),
        }
    }
}

impl Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Default)]
pub struct HttpRequest {
    pub request_line: String,
    pub method: Method,
    pub path: String,
    pub query: String,
    pub version: String,
    pub headers: HashMap<String, String>,
    pub body: Vec<u8>,
    pub valid: bool,
    pub status_code: u16,
}

impl HttpRequest {
    /// Parses the head of a request: everything up to and including the
    /// `\r\n\r\n` sentinel. On failure the request carries fallback values
    /// so an error response can still be serialized, and `status_code`
    /// holds the diagnosis.
    pub fn parse_head(raw: &[u8]) -> HttpRequest {
        let mut request = HttpRequest {
            valid: true,
            ..Default::default()
        };

        let Ok(text) = std::str::from_utf8(raw) else {
            request.fail(HTTP_BAD_REQUEST);
            return request;
        };

        let Some(first_crlf) = text.find("\r\n") else {
            request.fail(HTTP_BAD_REQUEST);
            return request;
        };
        let Some(header_sep) = text.find("\r\n\r\n") else {
            request.fail(HTTP_BAD_REQUEST);
            return request;
        };

        request.request_line = text[..first_crlf].to_string();
        let raw_headers = &text[first_crlf + 2..header_sep];

        request.parse_request_line();
        if !request.valid {
            return request;
        }

        request.parse_headers(raw_headers);
        request
    }

    fn fail(&mut self, status: u16) {
        self.set_fallback_values();
        self.status_code = status;
        self.valid = false;
    }

    fn set_fallback_values(&mut self) {
        self.method = Method::GET;
        self.path = "/".to_string();
        self.version = "HTTP/1.1".to_string();
        self.query.clear();
        self.headers.clear();
    }

    fn parse_request_line(&mut self) {
        if self.request_line.is_empty() {
            self.fail(HTTP_BAD_REQUEST);
            return;
        }

        let parts: Vec<&str> = self.request_line.split_whitespace().collect();
        let method = parts.first().copied().unwrap_or("");
        let target = parts.get(1).copied().unwrap_or("");
        let version = parts.get(2).copied().unwrap_or("");

        // Unknown method first (501), then unsupported version (505)
        match method.parse::<Method>() {
            Ok(m) => self.method = m,
            Err(_) => {
                self.fail(HTTP_NOT_IMPLEMENTED);
                return;
            }
        }

        if version != "HTTP/1.1" && version != "HTTP/1.0" {
            self.fail(HTTP_VERSION_NOT_SUPPORTED);
            return;
        }
        self.version = version.to_string();

        if parts.len() != 3 || target.is_empty() {
            self.fail(HTTP_BAD_REQUEST);
            return;
        }

        match target.split_once('?') {
            Some((path, query)) => {
                self.path = path.to_string();
                self.query = query.to_string();
                if !self.query.is_empty() && !query_is_well_formed(&self.query) {
                    self.fail(HTTP_BAD_REQUEST);
                }
            }
            None => {
                self.path = target.to_string();
                self.query.clear();
            }
        }
    }

    fn parse_headers(&mut self, raw_headers: &str) {
        if raw_headers.is_empty() {
            self.fail(HTTP_BAD_REQUEST);
            return;
        }

        // Bare \n without \r is a framing violation
        let bytes = raw_headers.as_bytes();
        for (i, b) in bytes.iter().enumerate() {
            if *b == b'\n' && (i == 0 || bytes[i - 1] != b'\r') {
                self.fail(HTTP_BAD_REQUEST);
                return;
            }
        }

        let mut header_count = 0;
        for line in raw_headers.split("\r\n") {
            if line.is_empty() {
                continue;
            }

            header_count += 1;
            if header_count > MAX_HEADER_COUNT {
                self.fail(HTTP_HEADER_FIELDS_TOO_LARGE);
                return;
            }

            let Some(colon) = line.find(':') else {
                self.fail(HTTP_BAD_REQUEST);
                return;
            };

            // Host:: style double colon
            if line.as_bytes().get(colon + 1) == Some(&b':') {
                self.fail(HTTP_BAD_REQUEST);
                return;
            }

            let key = &line[..colon];
            let value = &line[colon + 1..];

            if key.is_empty() || key.contains(' ') || key.contains('\t') {
                self.fail(HTTP_BAD_REQUEST);
                return;
            }

            // A space or tab is required after the colon
            if value.is_empty() || (!value.starts_with(' ') && !value.starts_with('\t')) {
                self.fail(HTTP_BAD_REQUEST);
                return;
            }

            self.headers
                .insert(key.to_ascii_lowercase(), value.trim().to_string());
        }

        if self.version == "HTTP/1.1" {
            match self.headers.get("host") {
                Some(host) if !host.is_empty() => {}
                _ => {
                    self.fail(HTTP_BAD_REQUEST);
                    return;
                }
            }
        }

        if self.method == Method::POST {
            match self.headers.get("content-length") {
                None => {
                    // Chunked POST carries no Content-Length
                    if !self.is_chunked() {
                        self.fail(HTTP_LENGTH_REQUIRED);
                        return;
                    }
                }
                Some(value) if value.is_empty() => {
                    self.fail(HTTP_LENGTH_REQUIRED);
                    return;
                }
                Some(value) => {
                    if !value.bytes().all(|b| b.is_ascii_digit()) {
                        self.fail(HTTP_BAD_REQUEST);
                        return;
                    }
                }
            }

            match self.headers.get("content-type") {
                Some(ct) if !ct.is_empty() => {}
                _ => {
                    self.fail(HTTP_BAD_REQUEST);
                }
            }
        }
    }

    // --- Accessors ---

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).map(String::as_str)
    }

    pub fn content_length(&self) -> usize {
        self.header("content-length")
            .and_then(|v| v.parse().ok())
            .unwrap_or(0)
    }

    pub fn content_type(&self) -> &str {
        self.header("content-type").unwrap_or("")
    }

    pub fn is_chunked(&self) -> bool {
        self.header("transfer-encoding")
            .map(|v| v.to_ascii_lowercase().contains("chunked"))
            .unwrap_or(false)
    }

    /// Keep-alive is the HTTP/1.1 default; close is the HTTP/1.0 default.
    pub fn connection_type(&self) -> &str {
        let default = if self.version == "HTTP/1.0" {
            "close"
        } else {
            "keep-alive"
        };
        self.header("connection").unwrap_or(default)
    }

    pub fn host(&self) -> &str {
        self.header("host").unwrap_or("")
    }

    pub fn uri(&self) -> String {
        if self.query.is_empty() {
            self.path.clone()
        } else {
            format!("{}?{}", self.path, self.query)
        }
    }

    pub fn cookie(&self, name: &str) -> Option<String> {
        let header = self.header("cookie")?;
        Cookies::parse(header).get(name).cloned()
    }

    /// Request headers as CGI meta-variables: `HTTP_<NAME>` with `-` → `_`.
    pub fn cgi_headers(&self) -> Vec<(String, String)> {
        self.headers
            .iter()
            .map(|(k, v)| {
                let key = format!("HTTP_{}", k.to_ascii_uppercase().replace('-', "_"));
                (key, v.clone())
            })
            .collect()
    }
}

fn query_is_well_formed(query: &str) -> bool {
    let first = query.as_bytes()[0];
    if first == b'&' || first == b'=' || first == b'?' {
        return false;
    }
    if query.contains("==") || query.contains("&&") || query.contains("??") {
        return false;
    }
    let last = query.as_bytes()[query.len() - 1];
    if last == b'=' || last == b'&' {
        return false;
    }

    // Every parameter needs exactly one '=' with non-empty key and value
    for param in query.split('&') {
        match param.find('=') {
            None => return false,
            Some(eq) if eq == 0 || eq == param.len() - 1 => return false,
            Some(_) => {}
        }
    }
    true
}

// --- Chunked transfer decoding ---

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkError {
    InvalidSize,
    InvalidFraming,
}

#[derive(Debug, PartialEq)]
enum ChunkPhase {
    Size,
    Data(usize),
    TrailingCrlf,
    Trailers,
    Done,
}

/// Resumable chunked-body decoder: survives size lines, payloads and CRLF
/// terminators split across arbitrary read boundaries. Trailer lines after
/// the final chunk are consumed and discarded.
#[derive(Debug)]
pub struct ChunkDecoder {
    buffer: Vec<u8>,
    phase: ChunkPhase,
}

impl Default for ChunkDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl ChunkDecoder {
    pub fn new() -> Self {
        Self {
            buffer: Vec::new(),
            phase: ChunkPhase::Size,
        }
    }

    pub fn finished(&self) -> bool {
        self.phase == ChunkPhase::Done
    }

    /// Bytes left over after the terminating chunk (start of a pipelined
    /// request). Only meaningful once `finished()`.
    pub fn take_remainder(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.buffer)
    }

    /// Feeds raw wire bytes, appending decoded payload to `out`.
    pub fn feed(&mut self, data: &[u8], out: &mut Vec<u8>) -> std::result::Result<(), ChunkError> {
        self.buffer.extend_from_slice(data);

        loop {
            match self.phase {
                ChunkPhase::Size => {
                    let Some(line_end) = find_subsequence(&self.buffer, b"\r\n", 0) else {
                        // A size line cannot be longer than a usize in hex
                        if self.buffer.len() > 18 {
                            return Err(ChunkError::InvalidSize);
                        }
                        return Ok(());
                    };
                    let line = std::str::from_utf8(&self.buffer[..line_end])
                        .map_err(|_| ChunkError::InvalidSize)?;
                    let size_str = line.split(';').next().unwrap_or("").trim();
                    let size = usize::from_str_radix(size_str, 16)
                        .map_err(|_| ChunkError::InvalidSize)?;
                    self.buffer.drain(..line_end + 2);

                    if size == 0 {
                        self.phase = ChunkPhase::Trailers;
                    } else {
                        self.phase = ChunkPhase::Data(size);
                    }
                }
                ChunkPhase::Data(remaining) => {
                    if self.buffer.is_empty() {
                        return Ok(());
                    }
                    let take = remaining.min(self.buffer.len());
                    out.extend_from_slice(&self.buffer[..take]);
                    self.buffer.drain(..take);
                    if take == remaining {
                        self.phase = ChunkPhase::TrailingCrlf;
                    } else {
                        self.phase = ChunkPhase::Data(remaining - take);
                        return Ok(());
                    }
                }
                ChunkPhase::TrailingCrlf => {
                    if self.buffer.len() < 2 {
                        return Ok(());
                    }
                    if &self.buffer[..2] != b"\r\n" {
                        return Err(ChunkError::InvalidFraming);
                    }
                    self.buffer.drain(..2);
                    self.phase = ChunkPhase::Size;
                }
                ChunkPhase::Trailers => {
                    let Some(line_end) = find_subsequence(&self.buffer, b"\r\n", 0) else {
                        return Ok(());
                    };
                    self.buffer.drain(..line_end + 2);
                    if line_end == 0 {
                        self.phase = ChunkPhase::Done;
                    }
                    // Non-empty trailer lines are dropped
                }
                ChunkPhase::Done => return Ok(()),
            }
        }
    }
}

pub fn find_subsequence(buffer: &[u8], needle: &[u8], start_offset: usize) -> Option<usize> {
    if needle.is_empty() {
        return None;
    }
    let search_area = buffer.get(start_offset..)?;
    search_area
        .windows(needle.len())
        .position(|w| w == needle)
        .map(|pos| start_offset + pos)
}
