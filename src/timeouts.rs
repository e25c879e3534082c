use crate::http::connection::ConnectionState;
use crate::prelude::*;

/// Per-iteration sweeps: idle connections, CGI deadlines, zombie children,
/// session garbage collection.
pub fn process(server: &mut Server, poll: &Poll) {
    check_connection_timeouts(server, poll);
    check_cgi_timeouts(server, poll);
    reap_zombies(server);
    server.session_store.cleanup_if_needed();
}

/// Idle connections expire against their keep-alive timeout. A connection
/// waiting on CGI is exempt: the CGI deadline owns it. Before headers are
/// parsed the close is silent; afterwards the client gets a 408.
fn check_connection_timeouts(server: &mut Server, poll: &Poll) {
    let now = Instant::now();
    let mut silent_close = Vec::new();
    let mut request_timeout = Vec::new();

    for (token, conn) in server.connections.iter() {
        if conn.state == ConnectionState::WaitingCgi {
            continue;
        }
        if now.duration_since(conn.last_activity) <= conn.keepalive_timeout {
            continue;
        }
        match conn.state {
            ConnectionState::ReadingHeaders | ConnectionState::SendingResponse => {
                silent_close.push(*token)
            }
            _ => request_timeout.push(*token),
        }
    }

    for token in silent_close {
        debug!("connection {:?} timed out", token);
        server.disconnect(poll, token);
    }

    for token in request_timeout {
        debug!("connection {:?} timed out mid-request, sending 408", token);
        if let Some(conn) = server.connections.get_mut(&token) {
            conn.status_code = HTTP_REQUEST_TIMEOUT;
            conn.should_close = true;
            conn.prepare_response();
            let tok = conn.token;
            let _ = poll
                .registry()
                .reregister(&mut conn.stream, tok, Interest::WRITABLE);
        }
    }
}

/// One CGI record per connection, so sweeping connections visits each
/// child exactly once regardless of its two registered endpoints.
fn check_cgi_timeouts(server: &mut Server, poll: &Poll) {
    let now = Instant::now();
    let expired: Vec<Token> = server
        .connections
        .iter()
        .filter(|(_, conn)| {
            conn.cgi
                .as_ref()
                .map(|cgi| now.duration_since(cgi.started) > CGI_TIMEOUT)
                .unwrap_or(false)
        })
        .map(|(token, _)| *token)
        .collect();

    for token in expired {
        warn!("CGI deadline exceeded on {:?}, killing child", token);
        server.teardown_cgi(poll, token, HTTP_GATEWAY_TIMEOUT);
    }
}

/// Non-blocking wait over the killed-PID list; exited children leave the
/// list, the rest are retried next iteration.
fn reap_zombies(server: &mut Server) {
    server.zombies.retain_mut(|child| match child.try_wait() {
        Ok(Some(_)) => false,
        Ok(None) => true,
        Err(_) => false,
    });
}
