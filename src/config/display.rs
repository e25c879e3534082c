use std::fmt;

use crate::config::types::{AppConfig, LocationConfig, ServerConfig};

impl fmt::Display for ServerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "  \x1b[38;5;244m───────────────────────────────────────────────\x1b[0m"
        )?;
        let endpoints: Vec<String> = self
            .listeners
            .iter()
            .map(|(host, port)| format!("{}:{}", host, port))
            .collect();
        writeln!(
            f,
            "  \x1b[1;34m⦿\x1b[0m \x1b[1;37mListen:\x1b[0m      \x1b[32m{}\x1b[0m",
            endpoints.join(", ")
        )?;
        writeln!(
            f,
            "  \x1b[1;34m⦿\x1b[0m \x1b[1;37mNames:\x1b[0m       \x1b[36m{}\x1b[0m",
            if self.server_names.is_empty() {
                "(default)".to_string()
            } else {
                self.server_names.join(" ")
            }
        )?;
        writeln!(
            f,
            "  \x1b[1;34m⦿\x1b[0m \x1b[1;37mRoot:\x1b[0m        {}",
            self.root
        )?;
        writeln!(
            f,
            "  \x1b[1;34m⦿\x1b[0m \x1b[1;37mBody Limit:\x1b[0m  \x1b[33m{} KB\x1b[0m",
            self.client_max_body_size / 1024
        )?;
        writeln!(
            f,
            "  \x1b[1;34m⦿\x1b[0m \x1b[1;37mKeep-Alive:\x1b[0m  {}s / {} requests",
            self.keepalive_timeout, self.keepalive_max_requests
        )?;

        if !self.error_pages.is_empty() {
            writeln!(f, "  \x1b[1;34m⦿\x1b[0m \x1b[1;37mError Pages:\x1b[0m")?;
            let mut pages: Vec<_> = self.error_pages.iter().collect();
            pages.sort_by_key(|(code, _)| **code);
            for (code, path) in pages {
                writeln!(f, "    \x1b[38;5;244m{:4}\x1b[0m → \x1b[31m{}\x1b[0m", code, path)?;
            }
        }

        writeln!(f, "  \x1b[1;37mLocations ({})\x1b[0m", self.locations.len())?;
        let mut sorted: Vec<_> = self.locations.iter().collect();
        sorted.sort_by(|a, b| a.path.cmp(&b.path));
        for (idx, location) in sorted.iter().enumerate() {
            let branch = if idx == sorted.len() - 1 { "  └──" } else { "  ├──" };
            writeln!(f, "{} {}", branch, location)?;
        }
        Ok(())
    }
}

impl fmt::Display for LocationConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "\x1b[1;32m{}\x1b[0m [{}]",
            self.path,
            self.allow_methods.join(" ")
        )?;
        if let Some((code, target)) = &self.redirect {
            write!(f, " → \x1b[35m{} {}\x1b[0m", code, target)?;
        }
        if !self.cgi_ext.is_empty() {
            write!(f, " cgi:{}", self.cgi_ext.join(","))?;
        }
        if self.upload_enabled {
            write!(f, " upload:{}", self.upload_store)?;
        }
        if self.autoindex {
            write!(f, " autoindex")?;
        }
        Ok(())
    }
}

impl AppConfig {
    pub fn display_config(&self) {
        println!("\x1b[1;37m═══ webserv configuration ═══\x1b[0m");
        for server in &self.servers {
            print!("{}", server);
        }
    }
}
