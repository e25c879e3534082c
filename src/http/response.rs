use crate::prelude::*;

#[derive(Debug)]
pub struct HttpResponse {
    pub version: String,
    pub status_code: u16,
    pub content_type: String,
    pub body: Vec<u8>,
    pub location: Option<String>,
    pub cookies: Vec<String>,
    pub connection: String,
}

impl HttpResponse {
    pub fn new(status_code: u16) -> Self {
        Self {
            version: "HTTP/1.1".to_string(),
            status_code,
            content_type: "text/plain".to_string(),
            body: Vec::new(),
            location: None,
            cookies: Vec::new(),
            connection: "keep-alive".to_string(),
        }
    }

    pub fn set_body(&mut self, body: Vec<u8>, content_type: &str) -> &mut Self {
        self.body = body;
        self.content_type = content_type.to_string();
        self
    }

    pub fn add_cookie(&mut self, cookie: String) -> &mut Self {
        self.cookies.push(cookie);
        self
    }

    pub fn reason_phrase(code: u16) -> &'static str {
        match code {
            200 => "OK",
            201 => "Created",
            204 => "No Content",
            301 => "Moved Permanently",
            302 => "Found",
            303 => "See Other",
            304 => "Not Modified",
            307 => "Temporary Redirect",
            308 => "Permanent Redirect",
            400 => "Bad Request",
            403 => "Forbidden",
            404 => "Not Found",
            405 => "Method Not Allowed",
            408 => "Request Timeout",
            411 => "Length Required",
            413 => "Payload Too Large",
            414 => "URI Too Long",
            415 => "Unsupported Media Type",
            431 => "Request Header Fields Too Large",
            500 => "Internal Server Error",
            501 => "Not Implemented",
            503 => "Service Unavailable",
            504 => "Gateway Timeout",
            505 => "HTTP Version Not Supported",
            _ => "Unknown",
        }
    }

    /// Serializes the response: status line, then Date, Server,
    /// Content-Type, Content-Length, optional Location, Set-Cookie lines,
    /// and Connection.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut head = format!(
            "{} {} {}\r\n",
            self.version,
            self.status_code,
            Self::reason_phrase(self.status_code)
        );

        head.push_str(&format!(
            "Date: {}\r\n",
            httpdate::fmt_http_date(SystemTime::now())
        ));
        head.push_str(&format!("Server: {}\r\n", SERVER_SOFTWARE));
        head.push_str(&format!("Content-Type: {}\r\n", self.content_type));
        head.push_str(&format!("Content-Length: {}\r\n", self.body.len()));

        if let Some(location) = &self.location {
            head.push_str(&format!("Location: {}\r\n", location));
        }
        for cookie in &self.cookies {
            head.push_str(&format!("Set-Cookie: {}\r\n", cookie));
        }

        head.push_str(&format!("Connection: {}\r\n\r\n", self.connection));

        let mut bytes = head.into_bytes();
        bytes.extend_from_slice(&self.body);
        bytes
    }
}

/// Error body resolution: location-level page, then server-level page, then
/// the built-in minimal HTML.
pub fn error_body(
    status: u16,
    server: Option<&ServerConfig>,
    location: Option<&LocationConfig>,
) -> Vec<u8> {
    if let Some(server) = server {
        if let Some(page) = server.error_page(status, location) {
            if let Ok(content) = fs::read(&page) {
                return content;
            }
        }
    }
    format!("<html><body><h1>Error {}</h1></body></html>", status).into_bytes()
}

// --- CGI output shaping ---

#[derive(Debug, Default)]
pub struct CgiOutput {
    pub status: u16,
    pub content_type: String,
    pub cookies: Vec<String>,
    pub location: Option<String>,
    pub body: Vec<u8>,
}

/// Splits CGI output into its header block and body, lifting
/// `Content-Type`, `Set-Cookie`, `Location` and `Status` into response
/// fields. `Status:` overrides the HTTP status code; a missing
/// `Content-Type` defaults to text/html.
pub fn parse_cgi_output(raw: &[u8]) -> CgiOutput {
    let mut out = CgiOutput {
        status: HTTP_OK,
        content_type: "text/html".to_string(),
        ..Default::default()
    };

    let (header_bytes, body) = match find_subsequence(raw, b"\r\n\r\n", 0) {
        Some(pos) => (&raw[..pos], &raw[pos + 4..]),
        None => match find_subsequence(raw, b"\n\n", 0) {
            Some(pos) => (&raw[..pos], &raw[pos + 2..]),
            // No header separator: the whole output is the body
            None => (&raw[..0], raw),
        },
    };

    out.body = body.to_vec();

    let headers = String::from_utf8_lossy(header_bytes);
    for line in headers.lines() {
        let line = line.trim_end_matches('\r');
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        let key = key.trim().to_ascii_lowercase();
        let value = value.trim();

        match key.as_str() {
            "content-type" => out.content_type = value.to_string(),
            "set-cookie" => out.cookies.push(value.to_string()),
            "location" => out.location = Some(value.to_string()),
            "status" => {
                // "Status: 404 Not Found" — only the digits matter
                if let Some(code) = value
                    .split_whitespace()
                    .next()
                    .and_then(|s| s.parse::<u16>().ok())
                {
                    out.status = code;
                }
            }
            _ => {}
        }
    }

    out
}

// --- Directory listing ---

/// Directory listing page: parent link first, then directories, then files,
/// each group alphabetical.
pub fn generate_autoindex(dir: &Path, request_path: &str) -> String {
    let mut shown_path = request_path.to_string();
    if !shown_path.ends_with('/') {
        shown_path.push('/');
    }

    let mut html = String::new();
    html.push_str("<!DOCTYPE html>\n<html>\n<head>\n");
    html.push_str(&format!("<title>Index of {}</title>\n", shown_path));
    html.push_str("<style>\n");
    html.push_str("body { font-family: Arial, sans-serif; margin: 40px; }\n");
    html.push_str("table { border-collapse: collapse; width: 100%; }\n");
    html.push_str("th, td { padding: 8px; text-align: left; border-bottom: 1px solid #ddd; }\n");
    html.push_str("</style>\n</head>\n<body>\n");
    html.push_str(&format!("<h1>Index of {}</h1>\n", shown_path));
    html.push_str("<table>\n<tr><th>Name</th><th>Last Modified</th><th>Size</th></tr>\n");

    if shown_path != "/" {
        let trimmed = shown_path.trim_end_matches('/');
        let parent = match trimmed.rfind('/') {
            Some(idx) => &trimmed[..idx + 1],
            None => "/",
        };
        html.push_str(&format!(
            "<tr><td><a href=\"{}\">../</a></td><td>-</td><td>-</td></tr>\n",
            parent
        ));
    }

    let mut entries: Vec<(String, fs::Metadata)> = Vec::new();
    if let Ok(dir_entries) = dir.read_dir() {
        for entry in dir_entries.flatten() {
            let Ok(name) = entry.file_name().into_string() else {
                continue;
            };
            if let Ok(meta) = entry.metadata() {
                entries.push((name, meta));
            }
        }
    }

    entries.sort_by(|a, b| {
        let a_dir = a.1.is_dir();
        let b_dir = b.1.is_dir();
        b_dir.cmp(&a_dir).then_with(|| a.0.cmp(&b.0))
    });

    for (name, meta) in entries {
        let is_dir = meta.is_dir();
        let link_name = if is_dir {
            format!("{}/", name)
        } else {
            name.clone()
        };
        let mtime = meta
            .modified()
            .ok()
            .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
            .map(|d| d.as_secs().to_string())
            .unwrap_or_else(|| "-".to_string());
        let size = if is_dir {
            "-".to_string()
        } else {
            let len = meta.len();
            if len < 1024 {
                format!("{} B", len)
            } else if len < 1024 * 1024 {
                format!("{} KB", len / 1024)
            } else {
                format!("{} MB", len / (1024 * 1024))
            }
        };

        html.push_str(&format!(
            "<tr><td><a href=\"{}{}\">{}</a></td><td>{}</td><td>{}</td></tr>\n",
            shown_path, link_name, link_name, mtime, size
        ));
    }

    html.push_str("</table>\n</body>\n</html>\n");
    html
}
