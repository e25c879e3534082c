use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use crate::config::lexer::{ConfToken, Lexer, Loc, TokenKind};
use crate::config::types::AppConfig;
use crate::config::validate;

// --- Error Handling ---

#[derive(Debug)]
pub struct ConfigError {
    pub message: String,
    pub loc: Option<Loc>,
    pub context: Vec<String>,
}

impl ConfigError {
    pub fn new(message: impl Into<String>, loc: Option<Loc>) -> Self {
        Self {
            message: message.into(),
            loc,
            context: Vec::new(),
        }
    }

    pub fn with_context(mut self, ctx: impl Into<String>) -> Self {
        self.context.push(ctx.into());
        self
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "\x1b[1;31mConfiguration Error\x1b[0m: {}", self.message)?;
        if let Some(loc) = self.loc {
            write!(f, " \x1b[38;5;244m(at line {}, col {})\x1b[0m", loc.line, loc.col)?;
        }
        if !self.context.is_empty() {
            writeln!(f, "\n   \x1b[1;34mContext trace:\x1b[0m")?;
            for (i, ctx) in self.context.iter().rev().enumerate() {
                let indent = " ".repeat(2 + i * 2);
                writeln!(f, "{}↳ {}", indent, ctx)?;
            }
        }
        Ok(())
    }
}

impl std::error::Error for ConfigError {}

pub type ParseResult<T> = Result<T, ConfigError>;

// --- Intermediate blocks (raw directives, before validation/inheritance) ---

#[derive(Debug, Default)]
pub struct LocationBlock {
    pub path: String,
    pub loc: Loc,
    pub root: Option<String>,
    pub index: Option<String>,
    pub autoindex: Option<bool>,
    pub allow_methods: Option<Vec<String>>,
    pub error_pages: HashMap<u16, String>,
    pub client_max_body_size: Option<usize>,
    pub cgi_ext: Option<Vec<String>>,
    pub cgi_path: Option<Vec<String>>,
    pub upload_enabled: Option<bool>,
    pub upload_store: Option<String>,
    pub redirect: Option<(u16, String)>,
}

#[derive(Debug, Default)]
pub struct ServerBlock {
    pub listeners: Vec<(String, u16)>,
    pub server_names: Vec<String>,
    pub root: Option<String>,
    pub index: Option<String>,
    pub autoindex: Option<bool>,
    pub backlog: Option<i32>,
    pub keepalive_timeout: Option<u64>,
    pub keepalive_max_requests: Option<usize>,
    pub allow_methods: Option<Vec<String>>,
    pub error_pages: HashMap<u16, String>,
    pub client_max_body_size: Option<usize>,
    pub cgi_ext: Option<Vec<String>>,
    pub cgi_path: Option<Vec<String>>,
    pub locations: Vec<LocationBlock>,
}

// --- Config Parser ---

pub struct ConfigParser {
    pub tokens: Vec<ConfToken>,
    pub cursor: usize,
}

impl ConfigParser {
    pub fn new(tokens: Vec<ConfToken>) -> Self {
        Self { tokens, cursor: 0 }
    }

    // ====== Token Access ======

    fn peek_kind(&self) -> Option<&TokenKind> {
        self.tokens.get(self.cursor).map(|t| &t.kind)
    }

    fn peek_loc(&self) -> Option<Loc> {
        self.tokens.get(self.cursor).map(|t| t.loc)
    }

    fn next_token(&mut self) -> Option<&ConfToken> {
        if self.cursor < self.tokens.len() {
            let t = &self.tokens[self.cursor];
            self.cursor += 1;
            Some(t)
        } else {
            None
        }
    }

    fn consume(&mut self, expected: TokenKind) -> ParseResult<()> {
        let loc = self.peek_loc();
        match self.next_token() {
            Some(t) if std::mem::discriminant(&t.kind) == std::mem::discriminant(&expected) => {
                Ok(())
            }
            Some(t) => Err(ConfigError::new(
                format!("Expected {:?}, found {:?}", expected, t.kind),
                Some(t.loc),
            )),
            None => Err(ConfigError::new(
                format!("Expected {:?}, found EOF", expected),
                loc,
            )),
        }
    }

    fn expect_word(&mut self) -> ParseResult<(String, Loc)> {
        let loc = self.peek_loc();
        match self.next_token() {
            Some(ConfToken {
                kind: TokenKind::Word(w),
                loc,
            }) => Ok((w.clone(), *loc)),
            Some(t) => Err(ConfigError::new(
                format!("Expected a value, found {:?}", t.kind),
                Some(t.loc),
            )),
            None => Err(ConfigError::new("Expected a value, found EOF", loc)),
        }
    }

    /// All word arguments of a simple directive, up to its `;`.
    fn directive_values(&mut self, directive: &str, loc: Loc) -> ParseResult<Vec<String>> {
        let mut values = Vec::new();
        loop {
            match self.peek_kind() {
                Some(TokenKind::Word(_)) => {
                    let (w, _) = self.expect_word()?;
                    values.push(w);
                }
                Some(TokenKind::Semicolon) => {
                    self.cursor += 1;
                    break;
                }
                Some(other) => {
                    return Err(ConfigError::new(
                        format!("Unexpected {:?} in `{}` directive", other, directive),
                        self.peek_loc(),
                    ));
                }
                None => {
                    return Err(ConfigError::new(
                        format!("Missing `;` after `{}` directive", directive),
                        Some(loc),
                    ));
                }
            }
        }
        if values.is_empty() {
            return Err(ConfigError::new(
                format!("Directive `{}` requires at least one argument", directive),
                Some(loc),
            ));
        }
        Ok(values)
    }

    fn single_value(&mut self, directive: &str, loc: Loc) -> ParseResult<String> {
        let values = self.directive_values(directive, loc)?;
        if values.len() != 1 {
            return Err(ConfigError::new(
                format!("Directive `{}` takes exactly one argument", directive),
                Some(loc),
            ));
        }
        Ok(values.into_iter().next().unwrap())
    }

    fn on_off(&mut self, directive: &str, loc: Loc) -> ParseResult<bool> {
        match self.single_value(directive, loc)?.as_str() {
            "on" => Ok(true),
            "off" => Ok(false),
            other => Err(ConfigError::new(
                format!("Directive `{}` expects on|off, found `{}`", directive, other),
                Some(loc),
            )),
        }
    }

    fn number<T: FromStr>(&mut self, directive: &str, loc: Loc) -> ParseResult<T> {
        let value = self.single_value(directive, loc)?;
        value.parse::<T>().map_err(|_| {
            ConfigError::new(
                format!("Directive `{}` expects a number, found `{}`", directive, value),
                Some(loc),
            )
        })
    }

    // ====== Grammar ======

    pub fn parse(&mut self) -> ParseResult<Vec<ServerBlock>> {
        let mut servers = Vec::new();

        while let Some(kind) = self.peek_kind() {
            match kind {
                TokenKind::Word(w) if w == "server" => {
                    self.cursor += 1;
                    self.consume(TokenKind::LBrace)?;
                    let server = self
                        .parse_server()
                        .map_err(|e| e.with_context(format!("server block #{}", servers.len() + 1)))?;
                    servers.push(server);
                }
                other => {
                    return Err(ConfigError::new(
                        format!("Expected `server` block, found {:?}", other),
                        self.peek_loc(),
                    ));
                }
            }
        }

        if servers.is_empty() {
            return Err(ConfigError::new("Configuration defines no server block", None));
        }
        Ok(servers)
    }

    fn parse_server(&mut self) -> ParseResult<ServerBlock> {
        let mut server = ServerBlock::default();

        loop {
            match self.peek_kind() {
                Some(TokenKind::RBrace) => {
                    self.cursor += 1;
                    return Ok(server);
                }
                Some(TokenKind::Word(_)) => {
                    let (directive, loc) = self.expect_word()?;
                    self.parse_server_directive(&mut server, &directive, loc)?;
                }
                Some(other) => {
                    return Err(ConfigError::new(
                        format!("Unexpected {:?} inside server block", other),
                        self.peek_loc(),
                    ));
                }
                None => {
                    return Err(ConfigError::new("Unclosed server block (missing `}`)", None));
                }
            }
        }
    }

    fn parse_server_directive(
        &mut self,
        server: &mut ServerBlock,
        directive: &str,
        loc: Loc,
    ) -> ParseResult<()> {
        match directive {
            "listen" => {
                let value = self.single_value(directive, loc)?;
                server.listeners.push(parse_listen(&value, loc)?);
            }
            "server_name" => server.server_names = self.directive_values(directive, loc)?,
            "root" => server.root = Some(self.single_value(directive, loc)?),
            "index" => server.index = Some(self.single_value(directive, loc)?),
            "autoindex" => server.autoindex = Some(self.on_off(directive, loc)?),
            "allow_methods" => server.allow_methods = Some(self.directive_values(directive, loc)?),
            "error_page" => {
                let (codes, page) = self.error_page_args(loc)?;
                for code in codes {
                    server.error_pages.insert(code, page.clone());
                }
            }
            "client_max_body_size" => {
                server.client_max_body_size = Some(self.number(directive, loc)?)
            }
            "backlog" => server.backlog = Some(self.number(directive, loc)?),
            "keepalive_timeout" => server.keepalive_timeout = Some(self.number(directive, loc)?),
            "keepalive_max_requests" => {
                server.keepalive_max_requests = Some(self.number(directive, loc)?)
            }
            "cgi_ext" => server.cgi_ext = Some(self.directive_values(directive, loc)?),
            "cgi_path" => server.cgi_path = Some(self.directive_values(directive, loc)?),
            "location" => {
                let (prefix, prefix_loc) = self.expect_word()?;
                self.consume(TokenKind::LBrace)?;
                let context = format!("location `{}`", prefix);
                let location = self
                    .parse_location(prefix, prefix_loc)
                    .map_err(|e| e.with_context(context))?;
                server.locations.push(location);
            }
            other => {
                return Err(ConfigError::new(
                    format!("Unknown directive `{}` in server block", other),
                    Some(loc),
                ));
            }
        }
        Ok(())
    }

    fn parse_location(&mut self, prefix: String, prefix_loc: Loc) -> ParseResult<LocationBlock> {
        let mut location = LocationBlock {
            path: prefix,
            loc: prefix_loc,
            ..Default::default()
        };

        loop {
            match self.peek_kind() {
                Some(TokenKind::RBrace) => {
                    self.cursor += 1;
                    return Ok(location);
                }
                Some(TokenKind::Word(_)) => {
                    let (directive, loc) = self.expect_word()?;
                    self.parse_location_directive(&mut location, &directive, loc)?;
                }
                Some(other) => {
                    return Err(ConfigError::new(
                        format!("Unexpected {:?} inside location block", other),
                        self.peek_loc(),
                    ));
                }
                None => {
                    return Err(ConfigError::new(
                        "Unclosed location block (missing `}`)",
                        Some(prefix_loc),
                    ));
                }
            }
        }
    }

    fn parse_location_directive(
        &mut self,
        location: &mut LocationBlock,
        directive: &str,
        loc: Loc,
    ) -> ParseResult<()> {
        match directive {
            "root" => location.root = Some(self.single_value(directive, loc)?),
            "index" => location.index = Some(self.single_value(directive, loc)?),
            "autoindex" => location.autoindex = Some(self.on_off(directive, loc)?),
            "allow_methods" => {
                location.allow_methods = Some(self.directive_values(directive, loc)?)
            }
            "error_page" => {
                let (codes, page) = self.error_page_args(loc)?;
                for code in codes {
                    location.error_pages.insert(code, page.clone());
                }
            }
            "client_max_body_size" => {
                location.client_max_body_size = Some(self.number(directive, loc)?)
            }
            "cgi_ext" => location.cgi_ext = Some(self.directive_values(directive, loc)?),
            "cgi_path" => location.cgi_path = Some(self.directive_values(directive, loc)?),
            "upload_enabled" => location.upload_enabled = Some(self.on_off(directive, loc)?),
            "upload_store" => location.upload_store = Some(self.single_value(directive, loc)?),
            "redirect" => {
                let values = self.directive_values(directive, loc)?;
                if values.len() != 2 {
                    return Err(ConfigError::new(
                        "Directive `redirect` expects `<3xx code> <target>`",
                        Some(loc),
                    ));
                }
                let code: u16 = values[0].parse().map_err(|_| {
                    ConfigError::new(
                        format!("Invalid redirect code `{}`", values[0]),
                        Some(loc),
                    )
                })?;
                location.redirect = Some((code, values[1].clone()));
            }
            other => {
                return Err(ConfigError::new(
                    format!("Unknown directive `{}` in location block", other),
                    Some(loc),
                ));
            }
        }
        Ok(())
    }

    /// `error_page <code>... <path>;` — every argument but the last is a code.
    fn error_page_args(&mut self, loc: Loc) -> ParseResult<(Vec<u16>, String)> {
        let mut values = self.directive_values("error_page", loc)?;
        if values.len() < 2 {
            return Err(ConfigError::new(
                "Directive `error_page` expects `<code>... <path>`",
                Some(loc),
            ));
        }
        let page = values.pop().unwrap();
        let mut codes = Vec::new();
        for value in values {
            let code: u16 = value.parse().map_err(|_| {
                ConfigError::new(format!("Invalid status code `{}`", value), Some(loc))
            })?;
            codes.push(code);
        }
        Ok((codes, page))
    }
}

/// `listen host:port` — a bare port listens on the wildcard address.
fn parse_listen(value: &str, loc: Loc) -> ParseResult<(String, u16)> {
    if let Some((host, port)) = value.rsplit_once(':') {
        let port: u16 = port.parse().map_err(|_| {
            ConfigError::new(format!("Invalid listen port `{}`", port), Some(loc))
        })?;
        let host = if host.is_empty() { "0.0.0.0" } else { host };
        Ok((host.to_string(), port))
    } else {
        let port: u16 = value.parse().map_err(|_| {
            ConfigError::new(format!("Invalid listen endpoint `{}`", value), Some(loc))
        })?;
        Ok(("0.0.0.0".to_string(), port))
    }
}

impl FromStr for AppConfig {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let tokens = Lexer::new(s)
            .tokenize()
            .map_err(|message| ConfigError::new(message, None))?;
        let blocks = ConfigParser::new(tokens).parse()?;
        let servers = validate::finalize(blocks)?;
        Ok(AppConfig { servers })
    }
}
