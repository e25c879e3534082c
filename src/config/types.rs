use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

// --- Defaults ---
pub const DEFAULT_HOST: &str = "0.0.0.0";
pub const DEFAULT_PORT: u16 = 8080;
pub const DEFAULT_ROOT: &str = "./www";
pub const DEFAULT_INDEX: &str = "index.html";
pub const DEFAULT_MAX_BODY_SIZE: usize = 1_048_576; // 1MB
pub const DEFAULT_BACKLOG: i32 = 128;
pub const DEFAULT_KEEPALIVE_TIMEOUT: u64 = 15;
pub const DEFAULT_KEEPALIVE_MAX_REQUESTS: usize = 100;

#[derive(Debug, Clone)]
pub struct LocationConfig {
    pub path: String,
    pub root: String,
    pub index: String,
    pub autoindex: bool,
    pub allow_methods: Vec<String>,
    pub error_pages: HashMap<u16, String>,
    pub client_max_body_size: usize,
    pub cgi_ext: Vec<String>,
    pub cgi_path: Vec<String>,
    pub upload_enabled: bool,
    pub upload_store: String,
    pub redirect: Option<(u16, String)>,
}

impl Default for LocationConfig {
    fn default() -> Self {
        Self {
            path: "/".to_string(),
            root: DEFAULT_ROOT.to_string(),
            index: DEFAULT_INDEX.to_string(),
            autoindex: false,
            allow_methods: vec!["GET".to_string()],
            error_pages: HashMap::new(),
            client_max_body_size: DEFAULT_MAX_BODY_SIZE,
            cgi_ext: Vec::new(),
            cgi_path: Vec::new(),
            upload_enabled: false,
            upload_store: String::new(),
            redirect: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub listeners: Vec<(String, u16)>,
    pub server_names: Vec<String>,
    pub root: String,
    pub index: String,
    pub autoindex: bool,
    pub backlog: i32,
    pub keepalive_timeout: u64,
    pub keepalive_max_requests: usize,
    pub allow_methods: Vec<String>,
    pub error_pages: HashMap<u16, String>,
    pub client_max_body_size: usize,
    pub cgi_ext: Vec<String>,
    pub cgi_path: Vec<String>,
    pub locations: Vec<Arc<LocationConfig>>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listeners: vec![(DEFAULT_HOST.to_string(), DEFAULT_PORT)],
            server_names: Vec::new(),
            root: DEFAULT_ROOT.to_string(),
            index: DEFAULT_INDEX.to_string(),
            autoindex: false,
            backlog: DEFAULT_BACKLOG,
            keepalive_timeout: DEFAULT_KEEPALIVE_TIMEOUT,
            keepalive_max_requests: DEFAULT_KEEPALIVE_MAX_REQUESTS,
            allow_methods: vec!["GET".to_string()],
            error_pages: HashMap::new(),
            client_max_body_size: DEFAULT_MAX_BODY_SIZE,
            cgi_ext: Vec::new(),
            cgi_path: Vec::new(),
            locations: Vec::new(),
        }
    }
}

impl ServerConfig {
    /// Longest-prefix location match. A non-root prefix only matches at a
    /// `/` boundary or at end-of-string, so `/api` does not match `/apiary`.
    pub fn find_matching_location(&self, request_path: &str) -> Option<Arc<LocationConfig>> {
        let mut best: Option<&Arc<LocationConfig>> = None;
        let mut longest = 0;

        for location in &self.locations {
            let prefix = &location.path;
            if !request_path.starts_with(prefix.as_str()) {
                continue;
            }

            let boundary_ok = prefix == "/"
                || request_path.len() == prefix.len()
                || request_path.as_bytes().get(prefix.len()) == Some(&b'/');

            if boundary_ok && prefix.len() > longest {
                best = Some(location);
                longest = prefix.len();
            }
        }

        best.cloned()
    }

    /// Custom error page lookup: location-level first, then server-level.
    /// Pages are resolved relative to the server root.
    pub fn error_page(&self, status: u16, location: Option<&LocationConfig>) -> Option<PathBuf> {
        if let Some(location) = location {
            if let Some(page) = location.error_pages.get(&status) {
                return Some(self.page_path(page));
            }
        }
        self.error_pages.get(&status).map(|page| self.page_path(page))
    }

    fn page_path(&self, page: &str) -> PathBuf {
        Path::new(&self.root).join(page.trim_start_matches('/'))
    }

    /// Unique listening ports for this server.
    pub fn ports(&self) -> Vec<u16> {
        let mut ports: Vec<u16> = self.listeners.iter().map(|(_, p)| *p).collect();
        ports.sort_unstable();
        ports.dedup();
        ports
    }
}

#[derive(Debug, Clone, Default)]
pub struct AppConfig {
    pub servers: Vec<Arc<ServerConfig>>,
}
