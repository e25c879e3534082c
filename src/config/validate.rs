use std::sync::Arc;

use crate::config::parser::{ConfigError, LocationBlock, ParseResult, ServerBlock};
use crate::config::types::*;

/// Turns raw parsed blocks into ready-to-serve configs: applies defaults,
/// propagates server-level settings into locations that do not override
/// them, and rejects inconsistent values.
pub fn finalize(blocks: Vec<ServerBlock>) -> ParseResult<Vec<Arc<ServerConfig>>> {
    let mut servers = Vec::new();

    for block in blocks {
        servers.push(Arc::new(finalize_server(block)?));
    }

    check_listener_conflicts(&servers)?;
    Ok(servers)
}

fn finalize_server(block: ServerBlock) -> ParseResult<ServerConfig> {
    let mut server = ServerConfig {
        listeners: if block.listeners.is_empty() {
            vec![(DEFAULT_HOST.to_string(), DEFAULT_PORT)]
        } else {
            block.listeners
        },
        server_names: block.server_names,
        root: block.root.unwrap_or_else(|| DEFAULT_ROOT.to_string()),
        index: block.index.unwrap_or_else(|| DEFAULT_INDEX.to_string()),
        autoindex: block.autoindex.unwrap_or(false),
        backlog: block.backlog.unwrap_or(DEFAULT_BACKLOG),
        keepalive_timeout: block.keepalive_timeout.unwrap_or(DEFAULT_KEEPALIVE_TIMEOUT),
        keepalive_max_requests: block
            .keepalive_max_requests
            .unwrap_or(DEFAULT_KEEPALIVE_MAX_REQUESTS),
        allow_methods: block.allow_methods.unwrap_or_else(|| vec!["GET".to_string()]),
        error_pages: block.error_pages,
        client_max_body_size: block.client_max_body_size.unwrap_or(DEFAULT_MAX_BODY_SIZE),
        cgi_ext: block.cgi_ext.unwrap_or_default(),
        cgi_path: block.cgi_path.unwrap_or_default(),
        locations: Vec::new(),
    };

    if server.backlog <= 0 {
        return Err(ConfigError::new("`backlog` must be positive", None));
    }
    if server.keepalive_max_requests == 0 {
        return Err(ConfigError::new("`keepalive_max_requests` must be positive", None));
    }
    check_methods(&server.allow_methods)?;
    check_error_pages(server.error_pages.keys())?;

    let mut location_blocks = block.locations;
    if location_blocks.is_empty() {
        // A server without locations still serves its root
        location_blocks.push(LocationBlock {
            path: "/".to_string(),
            ..Default::default()
        });
    }

    for loc_block in location_blocks {
        let location = finalize_location(loc_block, &server)?;
        server.locations.push(Arc::new(location));
    }

    Ok(server)
}

fn finalize_location(block: LocationBlock, server: &ServerConfig) -> ParseResult<LocationConfig> {
    if !block.path.starts_with('/') {
        return Err(ConfigError::new(
            format!("Location prefix `{}` must start with `/`", block.path),
            Some(block.loc),
        ));
    }

    let location = LocationConfig {
        path: block.path,
        root: block.root.unwrap_or_else(|| server.root.clone()),
        index: block.index.unwrap_or_else(|| server.index.clone()),
        autoindex: block.autoindex.unwrap_or(server.autoindex),
        allow_methods: block
            .allow_methods
            .unwrap_or_else(|| server.allow_methods.clone()),
        error_pages: block.error_pages,
        client_max_body_size: block
            .client_max_body_size
            .unwrap_or(server.client_max_body_size),
        cgi_ext: block.cgi_ext.unwrap_or_else(|| server.cgi_ext.clone()),
        cgi_path: block.cgi_path.unwrap_or_else(|| server.cgi_path.clone()),
        upload_enabled: block.upload_enabled.unwrap_or(false),
        upload_store: block.upload_store.unwrap_or_default(),
        redirect: block.redirect,
    };

    check_methods(&location.allow_methods)?;
    check_error_pages(location.error_pages.keys())?;

    if let Some((code, _)) = &location.redirect {
        if !(300..400).contains(code) {
            return Err(ConfigError::new(
                format!("`redirect` code {} is not a 3xx status", code),
                Some(block.loc),
            ));
        }
    }

    if location.upload_enabled && location.upload_store.is_empty() {
        return Err(ConfigError::new(
            format!(
                "Location `{}` enables uploads without an `upload_store`",
                location.path
            ),
            Some(block.loc),
        ));
    }

    Ok(location)
}

fn check_methods(methods: &[String]) -> ParseResult<()> {
    for method in methods {
        match method.as_str() {
            "GET" | "POST" | "DELETE" => {}
            other => {
                return Err(ConfigError::new(
                    format!("Unsupported method `{}` in `allow_methods`", other),
                    None,
                ));
            }
        }
    }
    Ok(())
}

fn check_error_pages<'a>(codes: impl Iterator<Item = &'a u16>) -> ParseResult<()> {
    for code in codes {
        if !(100..=599).contains(code) {
            return Err(ConfigError::new(
                format!("`error_page` status code {} out of range", code),
                None,
            ));
        }
    }
    Ok(())
}

/// Same (host, port, first server_name) twice is a config mistake.
fn check_listener_conflicts(servers: &[Arc<ServerConfig>]) -> ParseResult<()> {
    let mut seen = std::collections::HashSet::new();
    for server in servers {
        for (host, port) in &server.listeners {
            let name = server.server_names.first().cloned().unwrap_or_default();
            if !seen.insert((host.clone(), *port, name.clone())) {
                return Err(ConfigError::new(
                    format!(
                        "Duplicate server definition for {}:{} with name `{}`",
                        host, port, name
                    ),
                    None,
                ));
            }
        }
    }
    Ok(())
}
