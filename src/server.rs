use std::process::Child;

use crate::handlers;
use crate::http::connection::{Connection, ConnectionState};
use crate::prelude::*;
use crate::router;
use crate::signals;
use crate::socket::ListenerSet;
use crate::timeouts;

/// All event-loop state: listeners, the connection pool, the CGI endpoint
/// registry, and killed-but-unreaped children.
pub struct Server {
    pub config: AppConfig,
    pub listeners: HashMap<Token, (TcpListener, u16)>,
    pub connections: HashMap<Token, Connection>,
    pub cgi_to_client: HashMap<Token, Token>,
    pub zombies: Vec<Child>,
    pub session_store: SessionStore,
    next_token: usize,
}

impl Server {
    pub fn new(config: AppConfig, poll: &Poll) -> Result<Server> {
        let listener_set = ListenerSet::open(&config)?;

        let mut listeners = HashMap::new();
        let mut next_token = 0;
        for (mut listener, port) in listener_set.listeners {
            let token = Token(next_token);
            next_token += 1;
            poll.registry()
                .register(&mut listener, token, Interest::READABLE)?;
            listeners.insert(token, (listener, port));
        }

        Ok(Server {
            config,
            listeners,
            connections: HashMap::new(),
            cgi_to_client: HashMap::new(),
            zombies: Vec::new(),
            session_store: SessionStore::new(Duration::from_secs(3600)),
            next_token,
        })
    }

    fn alloc_token(&mut self) -> Token {
        let token = Token(self.next_token);
        self.next_token += 1;
        token
    }

    /// The readiness loop. A short poll timeout keeps timer-driven work
    /// (disk slices, timeout sweeps, zombie reaping) moving even when no
    /// socket is ready.
    pub fn run(&mut self, mut poll: Poll) -> Result<()> {
        let mut events = Events::with_capacity(1024);
        info!("event loop started ({} listeners)", self.listeners.len());

        while !signals::shutdown_requested() {
            if let Err(e) = poll.poll(&mut events, Some(POLL_TIMEOUT)) {
                if e.kind() == ErrorKind::Interrupted {
                    continue;
                }
                return Err(e.into());
            }

            // Handlers mutate the pools, so detach the event data first
            let snapshot: Vec<(Token, bool, bool, bool, bool)> = events
                .iter()
                .map(|e| {
                    (
                        e.token(),
                        e.is_readable(),
                        e.is_writable(),
                        e.is_error(),
                        e.is_read_closed(),
                    )
                })
                .collect();

            for (token, readable, writable, error, read_closed) in snapshot {
                if self.listeners.contains_key(&token) {
                    self.accept_connections(&poll, token);
                } else if let Some(&client) = self.cgi_to_client.get(&token) {
                    self.handle_cgi_event(&poll, token, client, readable, writable, error, read_closed);
                } else if self.connections.contains_key(&token) {
                    self.handle_connection_event(&poll, token, readable, writable, error, read_closed);
                }
            }

            timeouts::process(self, &poll);
            self.process_disk_io(&poll);
        }

        info!("shutdown signal observed, stopping");
        Ok(())
    }

    // --- Accept ---

    fn accept_connections(&mut self, poll: &Poll, token: Token) {
        loop {
            let accepted = {
                let Some((listener, _)) = self.listeners.get_mut(&token) else {
                    return;
                };
                listener.accept()
            };

            match accepted {
                Ok((mut stream, peer)) => {
                    if self.connections.len() >= MAX_CONNECTIONS {
                        warn!("connection limit reached, rejecting {}", peer);
                        drop(stream);
                        continue;
                    }

                    let port = self.listeners.get(&token).map(|(_, p)| *p).unwrap_or(0);
                    let client_token = self.alloc_token();
                    if poll
                        .registry()
                        .register(&mut stream, client_token, Interest::READABLE)
                        .is_err()
                    {
                        continue;
                    }

                    trace!("accepted {} as {:?}", peer, client_token);
                    self.connections.insert(
                        client_token,
                        Connection::new(stream, client_token, peer, port, self.config.servers.clone()),
                    );
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => {
                    errors!("accept failed: {}", e);
                    break;
                }
            }
        }
    }

    // --- Connection events ---

    fn handle_connection_event(
        &mut self,
        poll: &Poll,
        token: Token,
        readable: bool,
        writable: bool,
        error: bool,
        read_closed: bool,
    ) {
        if error {
            self.disconnect(poll, token);
            return;
        }

        if read_closed {
            // Hang-up may arrive with data still queued: reading states
            // get one final read pass before teardown
            let state = match self.connections.get(&token) {
                Some(conn) => conn.state,
                None => return,
            };
            match state {
                ConnectionState::ReadingHeaders | ConnectionState::ReadingBody => {
                    if let Some(conn) = self.connections.get_mut(&token) {
                        conn.should_close = true;
                    }
                    self.drive_read(poll, token);
                }
                ConnectionState::SendingResponse => self.drive_write(poll, token),
                _ => self.disconnect(poll, token),
            }
            return;
        }

        if writable {
            self.drive_write(poll, token);
        }
        if readable {
            self.drive_read(poll, token);
        }
    }

    fn drive_read(&mut self, poll: &Poll, token: Token) {
        let eof = {
            let Some(conn) = self.connections.get_mut(&token) else {
                return;
            };
            match conn.read_into_buffer() {
                Ok(eof) => {
                    conn.touch();
                    eof
                }
                Err(_) => {
                    // Transport errors close silently
                    self.disconnect(poll, token);
                    return;
                }
            }
        };

        self.advance_state(poll, token, eof);
    }

    /// Drives the per-connection state machine as far as buffered data
    /// allows: headers → routing → handler dispatch → body → execution.
    fn advance_state(&mut self, poll: &Poll, token: Token, eof: bool) {
        loop {
            let Some(conn) = self.connections.get_mut(&token) else {
                return;
            };

            match conn.state {
                ConnectionState::ReadingHeaders => {
                    if conn.buffer.len() > MAX_HEADER_SIZE {
                        conn.status_code = HTTP_BAD_REQUEST;
                        conn.should_close = true;
                        conn.prepare_response();
                        self.flip_to_write(poll, token);
                        return;
                    }

                    let Some(end) = conn.headers_end() else {
                        if eof {
                            // Peer closed before completing headers
                            self.disconnect(poll, token);
                        }
                        return;
                    };

                    let head: Vec<u8> = conn.buffer.drain(..end).collect();
                    conn.request = HttpRequest::parse_head(&head);

                    if !conn.request.valid {
                        conn.status_code = conn.request.status_code;
                        conn.prepare_response();
                        self.flip_to_write(poll, token);
                        return;
                    }
                    conn.state = ConnectionState::RoutingRequest;
                }

                ConnectionState::RoutingRequest => {
                    let routing = router::route(&conn.configs, &conn.request, conn.server_port);
                    conn.keepalive_timeout = Duration::from_secs(routing.server.keepalive_timeout);
                    conn.max_requests = routing.server.keepalive_max_requests;

                    let success = routing.success;
                    let status = routing.status_code;
                    let kind = routing.kind;
                    conn.routing = Some(routing);

                    if !success {
                        conn.status_code = status;
                        conn.prepare_response();
                        self.flip_to_write(poll, token);
                        return;
                    }

                    match kind {
                        RequestKind::Redirect => {
                            let redirect = conn
                                .routing
                                .as_ref()
                                .and_then(|r| r.location.as_ref())
                                .and_then(|l| l.redirect.clone());
                            if let Some((code, target)) = redirect {
                                conn.status_code = code;
                                conn.redirect_url = Some(target);
                            } else {
                                conn.status_code = HTTP_INTERNAL_SERVER_ERROR;
                            }
                            conn.prepare_response();
                            self.flip_to_write(poll, token);
                            return;
                        }
                        RequestKind::Get => {
                            handlers::handle_get(conn);
                            self.flip_to_write(poll, token);
                            return;
                        }
                        RequestKind::Delete => {
                            handlers::handle_delete(conn);
                            self.flip_to_write(poll, token);
                            return;
                        }
                        RequestKind::Post | RequestKind::CgiPost => {
                            conn.body_remaining = conn.request.content_length();
                            conn.state = ConnectionState::ReadingBody;
                        }
                        RequestKind::CgiGet => {
                            if let Err(status) = self.spawn_cgi_for(poll, token) {
                                if let Some(conn) = self.connections.get_mut(&token) {
                                    conn.status_code = status;
                                    conn.prepare_response();
                                }
                                self.flip_to_write(poll, token);
                            }
                            return;
                        }
                    }
                }

                ConnectionState::ReadingBody => match conn.ingest_body() {
                    Err(status) => {
                        conn.status_code = status;
                        conn.should_close = true;
                        conn.prepare_response();
                        self.flip_to_write(poll, token);
                        return;
                    }
                    Ok(true) => conn.state = ConnectionState::ExecutingRequest,
                    Ok(false) => {
                        if eof {
                            // Peer closed mid-body
                            conn.status_code = HTTP_BAD_REQUEST;
                            conn.should_close = true;
                            conn.prepare_response();
                            self.flip_to_write(poll, token);
                        }
                        return;
                    }
                },

                ConnectionState::ExecutingRequest => {
                    let kind = conn.routing.as_ref().map(|r| r.kind);
                    match kind {
                        Some(RequestKind::Post) => {
                            handlers::handle_post(conn);
                            self.flip_to_write(poll, token);
                            return;
                        }
                        Some(RequestKind::CgiPost) => {
                            if let Err(status) = self.spawn_cgi_for(poll, token) {
                                if let Some(conn) = self.connections.get_mut(&token) {
                                    conn.status_code = status;
                                    conn.prepare_response();
                                }
                                self.flip_to_write(poll, token);
                            }
                            return;
                        }
                        _ => {
                            conn.status_code = HTTP_INTERNAL_SERVER_ERROR;
                            conn.prepare_response();
                            self.flip_to_write(poll, token);
                            return;
                        }
                    }
                }

                _ => return,
            }
        }
    }

    /// Switches poll interest to write-only once a response is staged.
    fn flip_to_write(&mut self, poll: &Poll, token: Token) {
        if let Some(conn) = self.connections.get_mut(&token) {
            if conn.state == ConnectionState::SendingResponse {
                let tok = conn.token;
                let _ = poll
                    .registry()
                    .reregister(&mut conn.stream, tok, Interest::WRITABLE);
            }
        }
    }

    fn drive_write(&mut self, poll: &Poll, token: Token) {
        let done = {
            let Some(conn) = self.connections.get_mut(&token) else {
                return;
            };
            if conn.state != ConnectionState::SendingResponse {
                return;
            }
            match conn.send_slice() {
                Ok(done) => done,
                Err(_) => {
                    self.disconnect(poll, token);
                    return;
                }
            }
        };

        if !done {
            return;
        }

        let should_close = self
            .connections
            .get(&token)
            .map(|c| c.should_close)
            .unwrap_or(true);
        if should_close {
            self.disconnect(poll, token);
            return;
        }

        let has_pipelined = {
            let Some(conn) = self.connections.get_mut(&token) else {
                return;
            };
            conn.reset_for_next_request();
            let tok = conn.token;
            let _ = poll
                .registry()
                .reregister(&mut conn.stream, tok, Interest::READABLE);
            !conn.buffer.is_empty()
        };

        if has_pipelined {
            self.advance_state(poll, token, false);
        }
    }

    // --- Disk progress (timer-driven) ---

    /// One 32 KiB slice per connection per loop iteration so no upload or
    /// download monopolizes the loop.
    fn process_disk_io(&mut self, poll: &Poll) {
        let tokens: Vec<Token> = self
            .connections
            .iter()
            .filter(|(_, c)| {
                matches!(
                    c.state,
                    ConnectionState::WritingDisk | ConnectionState::ReadingDisk
                )
            })
            .map(|(t, _)| *t)
            .collect();

        for token in tokens {
            let Some(conn) = self.connections.get_mut(&token) else {
                continue;
            };
            match conn.state {
                ConnectionState::WritingDisk => {
                    conn.advance_disk_write();
                }
                ConnectionState::ReadingDisk => {
                    conn.advance_disk_read();
                }
                _ => {}
            }
            self.flip_to_write(poll, token);
        }
    }

    // --- CGI plumbing ---

    fn spawn_cgi_for(&mut self, poll: &Poll, token: Token) -> std::result::Result<(), u16> {
        let Some(conn) = self.connections.get_mut(&token) else {
            return Err(HTTP_INTERNAL_SERVER_ERROR);
        };
        let routing = conn.routing.clone().ok_or(HTTP_INTERNAL_SERVER_ERROR)?;

        // CGI requests carry the demo session cookie
        let cookie_value = conn.request.cookie(SESSION_COOKIE);
        let session_id = self.session_store.get_or_create(cookie_value.as_deref());
        conn.session_id = Some(session_id);

        let mut next_token = self.next_token;
        let cgi = CgiProcess::spawn(
            &conn.request,
            &routing,
            &conn.peer_ip,
            conn.peer_port,
            conn.server_port,
            token,
            poll,
            &mut next_token,
        )?;
        self.next_token = next_token;

        if let Some(in_token) = cgi.in_token {
            self.cgi_to_client.insert(in_token, token);
        }
        self.cgi_to_client.insert(cgi.out_token, token);
        conn.cgi = Some(cgi);
        conn.state = ConnectionState::WaitingCgi;
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn handle_cgi_event(
        &mut self,
        poll: &Poll,
        cgi_token: Token,
        client_token: Token,
        readable: bool,
        writable: bool,
        error: bool,
        read_closed: bool,
    ) {
        let is_stdin = {
            let Some(conn) = self.connections.get(&client_token) else {
                self.cgi_to_client.remove(&cgi_token);
                return;
            };
            match conn.cgi.as_ref() {
                Some(cgi) => cgi.in_token == Some(cgi_token),
                None => {
                    self.cgi_to_client.remove(&cgi_token);
                    return;
                }
            }
        };

        if is_stdin {
            if error {
                let body_incomplete = self
                    .connections
                    .get(&client_token)
                    .and_then(|c| c.cgi.as_ref().map(|g| g.bytes_written < c.request.body.len()))
                    .unwrap_or(false);
                if body_incomplete {
                    self.teardown_cgi(poll, client_token, HTTP_INTERNAL_SERVER_ERROR);
                } else {
                    self.close_cgi_stdin(client_token);
                }
                return;
            }

            if writable {
                let io = {
                    let Some(conn) = self.connections.get_mut(&client_token) else {
                        return;
                    };
                    let Some(cgi) = conn.cgi.as_mut() else {
                        return;
                    };
                    cgi.feed(&conn.request.body)
                };
                match io {
                    CgiIo::Continue => {}
                    CgiIo::Ready => self.close_cgi_stdin(client_token),
                    CgiIo::Error => {
                        self.teardown_cgi(poll, client_token, HTTP_INTERNAL_SERVER_ERROR)
                    }
                }
            }
            return;
        }

        // Child stdout endpoint
        if error {
            let finished = self
                .connections
                .get(&client_token)
                .and_then(|c| c.cgi.as_ref().map(|g| g.finished))
                .unwrap_or(false);
            if finished {
                // Error after EOF: the collected data is intact
                self.finish_cgi(poll, client_token);
            } else {
                self.teardown_cgi(poll, client_token, HTTP_INTERNAL_SERVER_ERROR);
            }
            return;
        }

        // Hang-up without readable still gets a final read attempt
        if readable || read_closed {
            let io = {
                let Some(conn) = self.connections.get_mut(&client_token) else {
                    return;
                };
                let Some(cgi) = conn.cgi.as_mut() else {
                    return;
                };
                cgi.drain()
            };
            match io {
                CgiIo::Continue => {}
                CgiIo::Ready => self.finish_cgi(poll, client_token),
                CgiIo::Error => self.teardown_cgi(poll, client_token, HTTP_INTERNAL_SERVER_ERROR),
            }
        }
    }

    fn close_cgi_stdin(&mut self, client_token: Token) {
        if let Some(conn) = self.connections.get_mut(&client_token) {
            if let Some(cgi) = conn.cgi.as_mut() {
                if let Some(in_token) = cgi.close_stdin() {
                    self.cgi_to_client.remove(&in_token);
                    trace!("CGI stdin closed for {:?}", client_token);
                }
            }
        }
    }

    /// Unregisters both endpoints, kills the child, and queues it for
    /// reaping when it has not exited yet.
    fn retire_cgi(&mut self, mut cgi: CgiProcess) {
        if let Some(in_token) = cgi.in_token.take() {
            self.cgi_to_client.remove(&in_token);
        }
        self.cgi_to_client.remove(&cgi.out_token);

        let _ = cgi.child.kill();
        match cgi.child.try_wait() {
            Ok(Some(_)) => {}
            _ => self.zombies.push(cgi.child),
        }
    }

    /// Child EOF: the collected output becomes the response.
    fn finish_cgi(&mut self, poll: &Poll, client_token: Token) {
        let Some(mut cgi) = self
            .connections
            .get_mut(&client_token)
            .and_then(|c| c.cgi.take())
        else {
            return;
        };
        let output = std::mem::take(&mut cgi.output);
        self.retire_cgi(cgi);

        let Some(conn) = self.connections.get_mut(&client_token) else {
            return;
        };
        conn.session_cookie = conn
            .session_id
            .clone()
            .map(|id| SetCookie::new(SESSION_COOKIE, &id).max_age(3600).to_header());
        conn.prepare_cgi_response(&output);
        self.flip_to_write(poll, client_token);
    }

    /// CGI failure or deadline: the child dies and the client gets an
    /// error status.
    pub fn teardown_cgi(&mut self, poll: &Poll, client_token: Token, status: u16) {
        let Some(cgi) = self
            .connections
            .get_mut(&client_token)
            .and_then(|c| c.cgi.take())
        else {
            return;
        };
        self.retire_cgi(cgi);

        let Some(conn) = self.connections.get_mut(&client_token) else {
            return;
        };
        conn.status_code = status;
        conn.should_close = true;
        conn.prepare_response();
        self.flip_to_write(poll, client_token);
    }

    // --- Teardown ---

    /// Idempotent connection close: pool entry removed, descriptor closed
    /// on drop, any live CGI killed with both pipes unregistered.
    pub fn disconnect(&mut self, poll: &Poll, token: Token) {
        let Some(mut conn) = self.connections.remove(&token) else {
            return;
        };
        trace!("closing {:?}", token);
        let _ = poll.registry().deregister(&mut conn.stream);

        if let Some(cgi) = conn.cgi.take() {
            self.retire_cgi(cgi);
        }
    }
}
