use crate::prelude::*;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestKind {
    Get,
    Post,
    Delete,
    CgiGet,
    CgiPost,
    Redirect,
}

#[derive(Debug, Clone)]
pub struct RoutingResult {
    pub server: Arc<ServerConfig>,
    pub location: Option<Arc<LocationConfig>>,
    pub mapped_path: String,
    pub kind: RequestKind,
    pub cgi_extension: String,
    pub script_name: String,
    pub path_info: String,
    pub path_translated: String,
    pub success: bool,
    pub status_code: u16,
}

impl RoutingResult {
    fn failure(server: Arc<ServerConfig>, location: Option<Arc<LocationConfig>>, status: u16) -> Self {
        Self {
            server,
            location,
            mapped_path: String::new(),
            kind: RequestKind::Get,
            cgi_extension: String::new(),
            script_name: String::new(),
            path_info: String::new(),
            path_translated: String::new(),
            success: false,
            status_code: status,
        }
    }
}

/// Resolves virtual host, location, method, body limit, filesystem path and
/// CGI decomposition for one parsed request.
pub fn route(
    configs: &[Arc<ServerConfig>],
    request: &HttpRequest,
    server_port: u16,
) -> RoutingResult {
    let server = find_server_config(configs, request, server_port);

    let Some(location) = server.find_matching_location(&request.path) else {
        return RoutingResult::failure(server, None, HTTP_NOT_FOUND);
    };

    if !request.method.is_allowed(&location.allow_methods) {
        return RoutingResult::failure(server, Some(location), HTTP_METHOD_NOT_ALLOWED);
    }

    // Body limit rejection happens before any body byte is read
    if request.content_length() > location.client_max_body_size {
        return RoutingResult::failure(server, Some(location), HTTP_PAYLOAD_TOO_LARGE);
    }

    let cgi_extension = extract_cgi_extension(&request.path, location.as_ref());
    let (script_name, path_info) = split_path_info(&request.path, &cgi_extension);
    let mapped_path = map_path(&script_name, location.as_ref());

    if !validate_path_security(&mapped_path, &location.root) {
        return RoutingResult::failure(server, Some(location), HTTP_FORBIDDEN);
    }

    let path_translated = build_path_translated(&location.root, &path_info);
    let kind = classify(&request.method, location.as_ref(), &cgi_extension);

    RoutingResult {
        server,
        mapped_path,
        kind,
        cgi_extension,
        script_name,
        path_info,
        path_translated,
        success: true,
        status_code: 0,
        location: Some(location),
    }
}

/// Virtual-host selection: servers listening on the accepting port are
/// candidates; the Host header (case-folded, port stripped) picks one by
/// `server_name`, and the first candidate is the default.
pub fn find_server_config(
    configs: &[Arc<ServerConfig>],
    request: &HttpRequest,
    server_port: u16,
) -> Arc<ServerConfig> {
    let candidates: Vec<&Arc<ServerConfig>> = configs
        .iter()
        .filter(|c| c.listeners.iter().any(|(_, port)| *port == server_port))
        .collect();

    let host = request
        .host()
        .split(':')
        .next()
        .unwrap_or("")
        .to_ascii_lowercase();

    if !host.is_empty() {
        for candidate in &candidates {
            if candidate
                .server_names
                .iter()
                .any(|name| name.eq_ignore_ascii_case(&host))
            {
                return Arc::clone(candidate);
            }
        }
    }

    match candidates.first() {
        Some(first) => Arc::clone(first),
        None => Arc::clone(&configs[0]),
    }
}

/// Strips the location prefix from the request path and joins the rest to
/// the location root, collapsing a doubled slash at the seam.
pub fn map_path(request_path: &str, location: &LocationConfig) -> String {
    let relative = request_path
        .strip_prefix(location.path.as_str())
        .unwrap_or(request_path);
    let root = &location.root;

    if root.ends_with('/') && relative.starts_with('/') {
        format!("{}{}", root, &relative[1..])
    } else if !root.ends_with('/') && !relative.starts_with('/') && !relative.is_empty() {
        format!("{}/{}", root, relative)
    } else {
        format!("{}{}", root, relative)
    }
}

/// Lexical rejects first, then the canonical check: resolve the nearest
/// existing ancestor, re-append the non-existent tail, and require the
/// result to stay under the canonical root. Admits uploads to files that
/// do not exist yet.
pub fn validate_path_security(mapped_path: &str, allowed_root: &str) -> bool {
    if mapped_path.contains("../") || mapped_path.contains("/..") || mapped_path.contains('\0') {
        return false;
    }

    let Some(resolved) = canonicalize_lenient(Path::new(mapped_path)) else {
        return false;
    };
    let Ok(resolved_root) = Path::new(allowed_root).canonicalize() else {
        return false;
    };

    resolved.starts_with(&resolved_root)
}

fn canonicalize_lenient(path: &Path) -> Option<PathBuf> {
    if let Ok(resolved) = path.canonicalize() {
        return Some(resolved);
    }

    let mut check = path.to_path_buf();
    let mut tail: Vec<std::ffi::OsString> = Vec::new();

    loop {
        tail.push(check.file_name()?.to_os_string());
        check = check.parent()?.to_path_buf();
        if check.as_os_str().is_empty() {
            check = PathBuf::from(".");
        }

        if let Ok(mut resolved) = check.canonicalize() {
            for part in tail.iter().rev() {
                resolved.push(part);
            }
            return Some(resolved);
        }

        if check == Path::new(".") || check == Path::new("/") {
            return None;
        }
    }
}

/// A configured extension counts only when the next path character is `/`
/// or end-of-string, so `/cgi/hello.py/extra` matches but `/x.python` does
/// not.
pub fn extract_cgi_extension(path: &str, location: &LocationConfig) -> String {
    for ext in &location.cgi_ext {
        if ext.is_empty() {
            continue;
        }
        let mut search_from = 0;
        while let Some(pos) = path[search_from..].find(ext.as_str()) {
            let abs = search_from + pos;
            let after = abs + ext.len();
            if after == path.len() || path.as_bytes()[after] == b'/' {
                return ext.clone();
            }
            search_from = abs + 1;
        }
    }
    String::new()
}

/// Splits a CGI request path at the extension boundary into the script
/// path and PATH_INFO.
pub fn split_path_info(request_path: &str, cgi_extension: &str) -> (String, String) {
    if cgi_extension.is_empty() {
        return (request_path.to_string(), String::new());
    }

    let mut search_from = 0;
    while let Some(pos) = request_path[search_from..].find(cgi_extension) {
        let abs = search_from + pos;
        let script_end = abs + cgi_extension.len();
        if script_end == request_path.len() {
            return (request_path.to_string(), String::new());
        }
        if request_path.as_bytes()[script_end] == b'/' {
            return (
                request_path[..script_end].to_string(),
                request_path[script_end..].to_string(),
            );
        }
        search_from = abs + 1;
    }
    (request_path.to_string(), String::new())
}

/// PATH_TRANSLATED = location root joined with PATH_INFO.
pub fn build_path_translated(root: &str, path_info: &str) -> String {
    if path_info.is_empty() {
        return String::new();
    }
    if root.ends_with('/') && path_info.starts_with('/') {
        format!("{}{}", root, &path_info[1..])
    } else {
        format!("{}{}", root, path_info)
    }
}

pub fn classify(method: &Method, location: &LocationConfig, cgi_extension: &str) -> RequestKind {
    if location.redirect.is_some() {
        return RequestKind::Redirect;
    }

    if !cgi_extension.is_empty() {
        match method {
            Method::GET => return RequestKind::CgiGet,
            Method::POST => return RequestKind::CgiPost,
            // DELETE on a CGI path is handled as a plain DELETE
            Method::DELETE => {}
        }
    }

    match method {
        Method::GET => RequestKind::Get,
        Method::POST => RequestKind::Post,
        Method::DELETE => RequestKind::Delete,
    }
}
