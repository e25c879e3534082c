use std::os::fd::OwnedFd;
use std::os::unix::fs::PermissionsExt;
use std::os::unix::net::UnixStream as StdUnixStream;
use std::process::{Child, Command, Stdio};

use mio::net::UnixStream;

use crate::prelude::*;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CgiIo {
    Continue,
    Ready,
    Error,
}

/// One spawned CGI child and its parent-side pipe endpoints. The server's
/// registry maps both endpoint tokens back to the owning connection;
/// destruction closes the endpoints, and the child is reaped through the
/// killed-process list.
#[derive(Debug)]
pub struct CgiProcess {
    pub child: Child,
    pub stdin: Option<UnixStream>,
    pub stdout: UnixStream,
    pub in_token: Option<Token>,
    pub out_token: Token,
    pub connection_token: Token,
    pub bytes_written: usize,
    pub output: Vec<u8>,
    pub started: Instant,
    pub finished: bool,
}

impl CgiProcess {
    /// Spawns the interpreter for a routed CGI request with both pipe
    /// endpoints registered for readiness. Returns the HTTP status to
    /// serve when the child cannot be started.
    #[allow(clippy::too_many_arguments)]
    pub fn spawn(
        request: &HttpRequest,
        routing: &RoutingResult,
        peer_ip: &str,
        peer_port: u16,
        server_port: u16,
        connection_token: Token,
        poll: &Poll,
        next_token: &mut usize,
    ) -> std::result::Result<CgiProcess, u16> {
        let Ok(script) = fs::canonicalize(&routing.mapped_path) else {
            errors!("CGI script not found: {}", routing.mapped_path);
            return Err(HTTP_INTERNAL_SERVER_ERROR);
        };

        if !is_executable(&script) {
            errors!("CGI script not executable: {}", script.display());
            return Err(HTTP_INTERNAL_SERVER_ERROR);
        }

        let location = routing.location.as_ref().ok_or(HTTP_INTERNAL_SERVER_ERROR)?;
        let Some(interpreter) = find_interpreter(&routing.cgi_extension, &location.cgi_path) else {
            errors!("No interpreter for CGI extension {}", routing.cgi_extension);
            return Err(HTTP_INTERNAL_SERVER_ERROR);
        };

        // Stdin pair: server writes, child reads
        let Ok((parent_in, child_in)) = StdUnixStream::pair() else {
            return Err(HTTP_INTERNAL_SERVER_ERROR);
        };
        // Stdout pair: child writes, server reads
        let Ok((parent_out, child_out)) = StdUnixStream::pair() else {
            return Err(HTTP_INTERNAL_SERVER_ERROR);
        };
        if parent_in.set_nonblocking(true).is_err() || parent_out.set_nonblocking(true).is_err() {
            return Err(HTTP_INTERNAL_SERVER_ERROR);
        }

        let mut cmd = Command::new(&interpreter);
        cmd.arg(&script)
            .env_clear()
            .envs(build_cgi_env(request, routing, peer_ip, peer_port, server_port))
            .stdin(Stdio::from(OwnedFd::from(child_in)))
            .stdout(Stdio::from(OwnedFd::from(child_out)))
            .stderr(Stdio::inherit());

        if let Some(dir) = script.parent() {
            cmd.current_dir(dir);
        }

        // Cap the child's address space so a runaway script dies in the
        // child, not in the server
        #[cfg(target_os = "linux")]
        unsafe {
            use std::os::unix::process::CommandExt;
            cmd.pre_exec(|| {
                let limit = libc::rlimit {
                    rlim_cur: 256 * 1024 * 1024,
                    rlim_max: 256 * 1024 * 1024,
                };
                if libc::setrlimit(libc::RLIMIT_AS, &limit) != 0 {
                    return Err(std::io::Error::last_os_error());
                }
                Ok(())
            });
        }

        let child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => {
                errors!("CGI spawn failed: {}", e);
                return Err(HTTP_INTERNAL_SERVER_ERROR);
            }
        };

        let mut stdout = UnixStream::from_std(parent_out);
        let out_token = Token(*next_token);
        *next_token += 1;
        if poll
            .registry()
            .register(&mut stdout, out_token, Interest::READABLE)
            .is_err()
        {
            return Err(HTTP_INTERNAL_SERVER_ERROR);
        }

        // Only a POST body feeds the child's stdin
        let (stdin, in_token) = if request.method == Method::POST {
            let mut stdin = UnixStream::from_std(parent_in);
            let token = Token(*next_token);
            *next_token += 1;
            if poll
                .registry()
                .register(&mut stdin, token, Interest::WRITABLE)
                .is_err()
            {
                return Err(HTTP_INTERNAL_SERVER_ERROR);
            }
            (Some(stdin), Some(token))
        } else {
            drop(parent_in);
            (None, None)
        };

        debug!(
            "spawned CGI pid={} script={}",
            child.id(),
            script.display()
        );

        Ok(CgiProcess {
            child,
            stdin,
            stdout,
            in_token,
            out_token,
            connection_token,
            bytes_written: 0,
            output: Vec::new(),
            started: Instant::now(),
            finished: false,
        })
    }

    /// Writes request-body bytes into the child in 32 KiB slices until the
    /// pipe would block. Ready once the full body has been written. Write
    /// failures report Continue: a dead child surfaces as an error event
    /// on the endpoint, which owns the 500 decision.
    pub fn feed(&mut self, body: &[u8]) -> CgiIo {
        let Some(stdin) = self.stdin.as_mut() else {
            return CgiIo::Ready;
        };

        while self.bytes_written < body.len() {
            let remaining = &body[self.bytes_written..];
            let slice = &remaining[..remaining.len().min(BUFFER_SIZE_32K)];
            match stdin.write(slice) {
                Ok(0) => return CgiIo::Continue,
                Ok(n) => self.bytes_written += n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(_) => return CgiIo::Continue,
            }
        }
        CgiIo::Ready
    }

    /// Drains child stdout into the rolling output buffer. Ready at EOF;
    /// Error when the 10 MiB output cap is exceeded or the read fails.
    pub fn drain(&mut self) -> CgiIo {
        let mut buf = vec![0u8; BUFFER_SIZE_32K];
        loop {
            match self.stdout.read(&mut buf) {
                Ok(0) => {
                    self.finished = true;
                    return CgiIo::Ready;
                }
                Ok(n) => {
                    if self.output.len() + n > MAX_CGI_OUTPUT {
                        errors!("CGI output exceeds {} byte cap", MAX_CGI_OUTPUT);
                        return CgiIo::Error;
                    }
                    self.output.extend_from_slice(&buf[..n]);
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock => return CgiIo::Continue,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(_) => return CgiIo::Error,
            }
        }
    }

    /// Closes the stdin endpoint: the child sees EOF on its next read.
    pub fn close_stdin(&mut self) -> Option<Token> {
        self.stdin = None;
        self.in_token.take()
    }
}

fn is_executable(path: &Path) -> bool {
    fs::metadata(path)
        .map(|m| m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

fn interpreter_name(extension: &str) -> &'static str {
    match extension {
        ".py" => "python3",
        ".php" => "php-cgi",
        ".sh" => "bash",
        ".pl" => "perl",
        _ => "python3",
    }
}

/// Probes the configured hint directories, then the fixed interpreter
/// locations, for an executable interpreter binary.
pub fn find_interpreter(extension: &str, hint_dirs: &[String]) -> Option<PathBuf> {
    let name = interpreter_name(extension);

    for dir in hint_dirs {
        let candidate = Path::new(dir).join(name);
        if is_executable(&candidate) {
            return Some(candidate);
        }
    }

    for dir in ["/usr/bin", "/usr/local/bin", "/opt/homebrew/bin"] {
        let candidate = Path::new(dir).join(name);
        if is_executable(&candidate) {
            return Some(candidate);
        }
    }
    None
}

/// The CGI/1.1 meta-variable environment for one request.
pub fn build_cgi_env(
    request: &HttpRequest,
    routing: &RoutingResult,
    peer_ip: &str,
    peer_port: u16,
    server_port: u16,
) -> HashMap<String, String> {
    let mut env = HashMap::new();

    let mut server_name = request
        .host()
        .split(':')
        .next()
        .unwrap_or("")
        .to_string();
    if server_name.is_empty() {
        server_name = routing
            .server
            .server_names
            .first()
            .cloned()
            .unwrap_or_default();
    }

    // A chunked body has no Content-Length header; the child gets the
    // decoded length instead
    let content_length = if request.is_chunked() {
        request.body.len()
    } else {
        request.content_length()
    };

    let script_filename = fs::canonicalize(&routing.mapped_path)
        .map(|p| p.display().to_string())
        .unwrap_or_else(|_| routing.mapped_path.clone());

    env.insert("GATEWAY_INTERFACE".to_string(), "CGI/1.1".to_string());
    env.insert("SERVER_PROTOCOL".to_string(), request.version.clone());
    env.insert("SERVER_NAME".to_string(), server_name);
    env.insert("SERVER_PORT".to_string(), server_port.to_string());
    env.insert("REQUEST_METHOD".to_string(), request.method.to_string());
    env.insert("QUERY_STRING".to_string(), request.query.clone());
    env.insert("SCRIPT_NAME".to_string(), routing.script_name.clone());
    env.insert("PATH_INFO".to_string(), routing.path_info.clone());
    env.insert("PATH_TRANSLATED".to_string(), routing.path_translated.clone());
    env.insert("CONTENT_LENGTH".to_string(), content_length.to_string());
    env.insert("CONTENT_TYPE".to_string(), request.content_type().to_string());
    env.insert("REMOTE_ADDR".to_string(), peer_ip.to_string());
    env.insert("REMOTE_PORT".to_string(), peer_port.to_string());
    env.insert("REDIRECT_STATUS".to_string(), "200".to_string());
    env.insert("SCRIPT_FILENAME".to_string(), script_filename);
    env.insert(
        "DOCUMENT_ROOT".to_string(),
        routing
            .location
            .as_ref()
            .map(|l| l.root.clone())
            .unwrap_or_default(),
    );
    env.insert("REQUEST_URI".to_string(), request.uri());
    env.insert(
        "PATH".to_string(),
        "/opt/homebrew/bin:/usr/local/bin:/usr/bin:/bin".to_string(),
    );
    env.insert("SERVER_SOFTWARE".to_string(), SERVER_SOFTWARE.to_string());

    for (key, value) in request.cgi_headers() {
        env.insert(key, value);
    }

    env
}
