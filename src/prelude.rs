pub use crate::config::types::{AppConfig, LocationConfig, ServerConfig};
pub use crate::error::Result;
pub use crate::http::*;

pub use mio::{
    Events, Interest, Poll, Token,
    event::Event,
    net::{TcpListener, TcpStream},
};
pub use weblog::{debug, errors, info, trace, warn};

pub use std::collections::HashMap;
pub use std::fs::{self, File, OpenOptions};
pub use std::io::{ErrorKind, Read, Write};
pub use std::net::SocketAddr;
pub use std::path::{Path, PathBuf};
pub use std::sync::Arc;
pub use std::time::{Duration, Instant, SystemTime};

pub use std::{
    fmt::{self, Display},
    io,
    str::FromStr,
};

pub use crate::{
    cgi::{CgiIo, CgiProcess},
    router::{RequestKind, RoutingResult},
    server::Server,
    utils::{Cookies, SessionStore, SetCookie},
};

pub const BUFFER_SIZE_32K: usize = 32 * 1024;
pub const MAX_HEADER_SIZE: usize = 8 * 1024;
pub const MAX_HEADER_COUNT: usize = 100;
pub const MAX_CONNECTIONS: usize = 1024;
pub const MAX_CGI_OUTPUT: usize = 10 * 1024 * 1024;
pub const CGI_TIMEOUT: Duration = Duration::from_secs(40);
pub const POLL_TIMEOUT: Duration = Duration::from_millis(10);
pub const SERVER_SOFTWARE: &str = "webserv/1.0";
pub const SESSION_COOKIE: &str = "SESSID";

// 2xx / 3xx
pub const HTTP_OK: u16 = 200;
pub const HTTP_CREATED: u16 = 201;
pub const HTTP_NO_CONTENT: u16 = 204;
pub const HTTP_FOUND: u16 = 302;

// 4xx Client Errors
pub const HTTP_BAD_REQUEST: u16 = 400;
pub const HTTP_FORBIDDEN: u16 = 403;
pub const HTTP_NOT_FOUND: u16 = 404;
pub const HTTP_METHOD_NOT_ALLOWED: u16 = 405;
pub const HTTP_REQUEST_TIMEOUT: u16 = 408;
pub const HTTP_LENGTH_REQUIRED: u16 = 411;
pub const HTTP_PAYLOAD_TOO_LARGE: u16 = 413;
pub const HTTP_UNSUPPORTED_MEDIA_TYPE: u16 = 415;
pub const HTTP_HEADER_FIELDS_TOO_LARGE: u16 = 431;

// 5xx Server Errors
pub const HTTP_INTERNAL_SERVER_ERROR: u16 = 500;
pub const HTTP_NOT_IMPLEMENTED: u16 = 501;
pub const HTTP_GATEWAY_TIMEOUT: u16 = 504;
pub const HTTP_VERSION_NOT_SUPPORTED: u16 = 505;
