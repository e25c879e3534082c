use socket2::{Domain, Protocol, Socket as RawSocket, Type};

use crate::prelude::*;

/// Owned listening socket: IPv4 stream, SO_REUSEADDR, bound, listening,
/// non-blocking. Converts into a poll-registered mio listener.
#[derive(Debug)]
pub struct Socket {
    inner: RawSocket,
}

impl Socket {
    /// `0.0.0.0` binds the wildcard address.
    pub fn bind_listener(host: &str, port: u16, backlog: i32) -> Result<Socket> {
        let socket = RawSocket::new(Domain::IPV4, Type::STREAM, Some(Protocol::TCP))?;
        socket.set_reuse_address(true)?;

        let addr: SocketAddr = format!("{}:{}", host, port).parse()?;
        socket.bind(&addr.into())?;
        socket.listen(backlog)?;
        socket.set_nonblocking(true)?;

        Ok(Socket { inner: socket })
    }

    pub fn into_mio_listener(self) -> TcpListener {
        TcpListener::from_std(self.inner.into())
    }
}

/// One listening socket per unique port across all virtual hosts. Servers
/// sharing a port share the listener; Host-based selection happens at
/// routing time.
#[derive(Debug)]
pub struct ListenerSet {
    pub listeners: Vec<(TcpListener, u16)>,
}

impl ListenerSet {
    pub fn open(config: &AppConfig) -> Result<ListenerSet> {
        let mut seen_ports = std::collections::HashSet::new();
        let mut listeners = Vec::new();

        for server in &config.servers {
            for (host, port) in &server.listeners {
                if !seen_ports.insert(*port) {
                    continue;
                }
                let socket = Socket::bind_listener(host, *port, server.backlog)?;
                info!("listening on {}:{}", host, port);
                listeners.push((socket.into_mio_listener(), *port));
            }
        }

        if listeners.is_empty() {
            return Err("Configuration produced no listening sockets".into());
        }
        Ok(ListenerSet { listeners })
    }
}
