use crate::prelude::*;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    ReadingHeaders,
    RoutingRequest,
    ReadingBody,
    ExecutingRequest,
    WritingDisk,
    ReadingDisk,
    WaitingCgi,
    SendingResponse,
}

/// Lazily-opened upload sink. At most 32 KiB of the source leaves for disk
/// per invocation.
#[derive(Debug)]
pub struct FileWriter {
    pub path: PathBuf,
    pub file: Option<File>,
    pub bytes_written: usize,
}

impl FileWriter {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            file: None,
            bytes_written: 0,
        }
    }

    /// Writes one slice of `data` starting at the running byte counter.
    /// Ok(true) once every byte of the source is on disk.
    pub fn write_slice(&mut self, data: &[u8]) -> io::Result<bool> {
        if self.bytes_written >= data.len() {
            return Ok(true);
        }

        if self.file.is_none() {
            self.file = Some(File::create(&self.path)?);
        }
        let file = self.file.as_mut().unwrap();

        let remaining = &data[self.bytes_written..];
        let slice = &remaining[..remaining.len().min(BUFFER_SIZE_32K)];
        file.write_all(slice)?;
        self.bytes_written += slice.len();

        Ok(self.bytes_written >= data.len())
    }
}

/// Lazily-opened download source, drained in 32 KiB slices.
#[derive(Debug)]
pub struct FileReader {
    pub path: PathBuf,
    pub file: Option<File>,
    pub bytes_read: usize,
}

impl FileReader {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            file: None,
            bytes_read: 0,
        }
    }

    /// Reads one slice into `out`. Ok(true) at EOF.
    pub fn read_slice(&mut self, out: &mut Vec<u8>) -> io::Result<bool> {
        if self.file.is_none() {
            self.file = Some(File::open(&self.path)?);
        }
        let file = self.file.as_mut().unwrap();

        let mut buf = vec![0u8; BUFFER_SIZE_32K];
        let n = file.read(&mut buf)?;
        if n == 0 {
            self.file = None;
            return Ok(true);
        }
        out.extend_from_slice(&buf[..n]);
        self.bytes_read += n;
        Ok(false)
    }
}

#[derive(Debug, Clone, Default)]
pub struct MultipartPart {
    pub name: String,
    pub filename: Option<String>,
    pub content_type: String,
    pub content: Vec<u8>,
}

#[derive(Debug)]
pub struct Connection {
    pub stream: TcpStream,
    pub token: Token,
    pub peer_ip: String,
    pub peer_port: u16,
    pub server_port: u16,
    pub state: ConnectionState,
    pub buffer: Vec<u8>,
    pub request: HttpRequest,
    pub routing: Option<RoutingResult>,
    pub chunk_decoder: ChunkDecoder,
    pub body_remaining: usize,
    pub writer: Option<FileWriter>,
    pub multipart: Vec<MultipartPart>,
    pub current_part: usize,
    pub upload_dir: PathBuf,
    pub reader: Option<FileReader>,
    pub body_content: Vec<u8>,
    pub content_type_override: Option<String>,
    pub response: Vec<u8>,
    pub bytes_sent: usize,
    pub status_code: u16,
    pub redirect_url: Option<String>,
    pub index_path: Option<PathBuf>,
    pub last_activity: Instant,
    pub keepalive_timeout: Duration,
    pub max_requests: usize,
    pub request_count: usize,
    pub should_close: bool,
    pub session_id: Option<String>,
    pub session_cookie: Option<String>,
    pub cgi: Option<CgiProcess>,
    pub configs: Vec<Arc<ServerConfig>>,
}

impl Connection {
    pub fn new(
        stream: TcpStream,
        token: Token,
        peer: SocketAddr,
        server_port: u16,
        configs: Vec<Arc<ServerConfig>>,
    ) -> Self {
        Self {
            stream,
            token,
            peer_ip: peer.ip().to_string(),
            peer_port: peer.port(),
            server_port,
            state: ConnectionState::ReadingHeaders,
            buffer: Vec::with_capacity(4096),
            request: HttpRequest::default(),
            routing: None,
            chunk_decoder: ChunkDecoder::new(),
            body_remaining: 0,
            writer: None,
            multipart: Vec::new(),
            current_part: 0,
            upload_dir: PathBuf::new(),
            reader: None,
            body_content: Vec::new(),
            content_type_override: None,
            response: Vec::new(),
            bytes_sent: 0,
            status_code: 0,
            redirect_url: None,
            index_path: None,
            last_activity: Instant::now(),
            keepalive_timeout: Duration::from_secs(15),
            max_requests: 100,
            request_count: 0,
            should_close: false,
            session_id: None,
            session_cookie: None,
            cgi: None,
            configs,
        }
    }

    pub fn touch(&mut self) {
        self.last_activity = Instant::now();
    }

    /// Drains the socket into the accumulation buffer in 32 KiB slices.
    /// Ok(true) when the peer has closed its write side.
    pub fn read_into_buffer(&mut self) -> io::Result<bool> {
        let mut buf = vec![0u8; BUFFER_SIZE_32K];
        loop {
            match self.stream.read(&mut buf) {
                Ok(0) => return Ok(true),
                Ok(n) => self.buffer.extend_from_slice(&buf[..n]),
                Err(e) if e.kind() == ErrorKind::WouldBlock => return Ok(false),
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
    }

    /// End-of-headers sentinel position (index just past `\r\n\r\n`).
    pub fn headers_end(&self) -> Option<usize> {
        find_subsequence(&self.buffer, b"\r\n\r\n", 0).map(|pos| pos + 4)
    }

    /// Moves buffered body bytes into the request, via the chunk decoder
    /// when the body is chunked. Returns an error status on framing or
    /// limit violations; `Ok(true)` when the body is complete.
    pub fn ingest_body(&mut self) -> std::result::Result<bool, u16> {
        let max_body = self
            .routing
            .as_ref()
            .and_then(|r| r.location.as_ref())
            .map(|l| l.client_max_body_size)
            .unwrap_or(usize::MAX);

        if self.request.is_chunked() {
            if self.request.version == "HTTP/1.0" {
                return Err(HTTP_VERSION_NOT_SUPPORTED);
            }

            let data = std::mem::take(&mut self.buffer);
            let mut decoded = Vec::new();
            if self.chunk_decoder.feed(&data, &mut decoded).is_err() {
                return Err(HTTP_BAD_REQUEST);
            }
            self.request.body.extend_from_slice(&decoded);

            if self.request.body.len() > max_body {
                return Err(HTTP_PAYLOAD_TOO_LARGE);
            }

            if self.chunk_decoder.finished() {
                // Bytes past the terminator belong to the next request
                self.buffer = self.chunk_decoder.take_remainder();
                return Ok(true);
            }
            Ok(false)
        } else {
            let take = self.body_remaining.min(self.buffer.len());
            if take > 0 {
                self.request.body.extend(self.buffer.drain(..take));
                self.body_remaining -= take;
            }
            Ok(self.body_remaining == 0)
        }
    }

    // --- Disk I/O ---

    /// One 32 KiB write slice per sweep. Returns true once a response has
    /// been prepared (success or failure).
    pub fn advance_disk_write(&mut self) -> bool {
        if self.multipart.is_empty() {
            let Some(writer) = self.writer.as_mut() else {
                self.status_code = HTTP_INTERNAL_SERVER_ERROR;
                self.prepare_response();
                return true;
            };
            match writer.write_slice(&self.request.body) {
                Ok(true) => {
                    self.writer = None;
                    self.status_code = HTTP_OK;
                    self.prepare_response();
                    true
                }
                Ok(false) => false,
                Err(e) => {
                    self.writer = None;
                    self.status_code = match e.kind() {
                        ErrorKind::PermissionDenied => HTTP_FORBIDDEN,
                        _ => HTTP_INTERNAL_SERVER_ERROR,
                    };
                    self.prepare_response();
                    true
                }
            }
        } else {
            self.advance_multipart_write()
        }
    }

    /// The writer advances one part at a time: the next part's file opens
    /// only after the previous part is fully flushed. Form fields (no
    /// filename) append to the upload directory log instead.
    fn advance_multipart_write(&mut self) -> bool {
        if self.current_part >= self.multipart.len() {
            self.writer = None;
            self.status_code = HTTP_OK;
            self.prepare_response();
            return true;
        }

        let part = self.multipart[self.current_part].clone();

        let Some(filename) = part.filename.as_ref() else {
            self.append_form_field(&part.name, &part.content);
            self.current_part += 1;
            return false;
        };

        if self.writer.is_none() {
            self.writer = Some(FileWriter::new(self.upload_dir.join(filename)));
        }

        let writer = self.writer.as_mut().unwrap();
        match writer.write_slice(&part.content) {
            Ok(true) => {
                self.writer = None;
                self.current_part += 1;
                false
            }
            Ok(false) => false,
            Err(e) => {
                self.writer = None;
                self.status_code = match e.kind() {
                    ErrorKind::PermissionDenied => HTTP_FORBIDDEN,
                    _ => HTTP_INTERNAL_SERVER_ERROR,
                };
                self.prepare_response();
                true
            }
        }
    }

    fn append_form_field(&self, name: &str, value: &[u8]) {
        let log_path = self.upload_dir.join("form_data.log");
        if let Ok(mut file) = OpenOptions::new().create(true).append(true).open(&log_path) {
            let line = format!("Field: {} = {}\n", name, String::from_utf8_lossy(value));
            let _ = file.write_all(line.as_bytes());
        }
    }

    /// One 32 KiB read slice per sweep. Returns true once a response has
    /// been prepared.
    pub fn advance_disk_read(&mut self) -> bool {
        let Some(reader) = self.reader.as_mut() else {
            self.status_code = HTTP_INTERNAL_SERVER_ERROR;
            self.prepare_response();
            return true;
        };

        match reader.read_slice(&mut self.body_content) {
            Ok(true) => {
                self.reader = None;
                self.status_code = HTTP_OK;
                self.prepare_response();
                true
            }
            Ok(false) => {
                self.touch();
                false
            }
            Err(e) => {
                self.reader = None;
                self.status_code = match e.kind() {
                    ErrorKind::NotFound => HTTP_NOT_FOUND,
                    ErrorKind::PermissionDenied => HTTP_FORBIDDEN,
                    _ => HTTP_INTERNAL_SERVER_ERROR,
                };
                self.prepare_response();
                true
            }
        }
    }

    // --- Response framing ---

    fn routing_refs(&self) -> (Option<&ServerConfig>, Option<&LocationConfig>) {
        match &self.routing {
            Some(routing) => (
                Some(routing.server.as_ref()),
                routing.location.as_deref(),
            ),
            None => (None, None),
        }
    }

    fn finalize_connection_header(&mut self, response: &mut HttpResponse) {
        if self.should_close
            || self.request.connection_type() == "close"
            || self.request_count + 1 >= self.max_requests
        {
            self.should_close = true;
            response.connection = "close".to_string();
        } else {
            response.connection = "keep-alive".to_string();
        }
    }

    /// Builds the response for the current status code and collected body,
    /// then flips the connection to `SendingResponse`.
    pub fn prepare_response(&mut self) {
        if self.status_code == 0 {
            self.status_code = HTTP_OK;
        }

        let mut response = HttpResponse::new(self.status_code);

        if self.status_code >= 400 {
            let (server, location) = self.routing_refs();
            let body = error_body(self.status_code, server, location);
            response.set_body(body, "text/html");
            // Any error closes the connection: routing errors fire before
            // the body is drained, and leftover body bytes would be read
            // as the next request's headers
            self.should_close = true;
        } else if let Some(url) = self.redirect_url.take() {
            response.location = Some(url);
        } else if !self.body_content.is_empty() {
            let content_type = match self.content_type_override.take() {
                Some(ct) => ct,
                None => {
                    let path = self
                        .index_path
                        .clone()
                        .unwrap_or_else(|| {
                            PathBuf::from(
                                self.routing
                                    .as_ref()
                                    .map(|r| r.mapped_path.as_str())
                                    .unwrap_or(""),
                            )
                        });
                    mime_type_for_path(&path).to_string()
                }
            };
            response.set_body(std::mem::take(&mut self.body_content), &content_type);
        }

        if let Some(cookie) = self.session_cookie.take() {
            response.add_cookie(cookie);
        }

        self.finalize_connection_header(&mut response);
        self.response = response.to_bytes();
        self.bytes_sent = 0;
        self.state = ConnectionState::SendingResponse;
    }

    /// Response construction from collected CGI output: CGI headers are
    /// lifted into the HTTP response, `Status:` overrides the status code.
    pub fn prepare_cgi_response(&mut self, raw_output: &[u8]) {
        let output = parse_cgi_output(raw_output);

        if output.status >= 400 {
            self.status_code = output.status;
            self.prepare_response();
            return;
        }

        self.status_code = output.status;
        let mut response = HttpResponse::new(output.status);
        response.set_body(output.body, &output.content_type);
        response.location = output.location;
        response.cookies = output.cookies;

        if let Some(cookie) = self.session_cookie.take() {
            response.add_cookie(cookie);
        }

        self.finalize_connection_header(&mut response);
        self.response = response.to_bytes();
        self.bytes_sent = 0;
        self.state = ConnectionState::SendingResponse;
    }

    /// Writes pending response bytes in 32 KiB slices until the socket
    /// would block. Ok(true) once the full response is on the wire.
    pub fn send_slice(&mut self) -> io::Result<bool> {
        while self.bytes_sent < self.response.len() {
            let remaining = &self.response[self.bytes_sent..];
            let slice = &remaining[..remaining.len().min(BUFFER_SIZE_32K)];
            match self.stream.write(slice) {
                Ok(0) => return Err(io::Error::from(ErrorKind::WriteZero)),
                Ok(n) => {
                    self.bytes_sent += n;
                    self.touch();
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock => return Ok(false),
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(true)
    }

    /// Keep-alive reset: clears every per-request field, bumps the request
    /// counter, and returns to `ReadingHeaders`. Pipelined bytes stay in
    /// the accumulation buffer.
    pub fn reset_for_next_request(&mut self) {
        self.request = HttpRequest::default();
        self.routing = None;
        self.chunk_decoder = ChunkDecoder::new();
        self.body_remaining = 0;
        self.writer = None;
        self.multipart.clear();
        self.current_part = 0;
        self.upload_dir = PathBuf::new();
        self.reader = None;
        self.body_content.clear();
        self.content_type_override = None;
        self.response.clear();
        self.bytes_sent = 0;
        self.status_code = 0;
        self.redirect_url = None;
        self.index_path = None;
        self.state = ConnectionState::ReadingHeaders;
        self.request_count += 1;
    }
}
