use std::io::{Read, Write};
use std::net::TcpStream;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use mio::Poll;
use webserv::config::types::{AppConfig, LocationConfig, ServerConfig};
use webserv::server::Server;

fn test_root(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("webserv_it_{}", name));
    let _ = std::fs::remove_dir_all(&dir);
    std::fs::create_dir_all(&dir).unwrap();
    dir
}

fn config_for(port: u16, root: &Path, locations: Vec<LocationConfig>) -> AppConfig {
    let root = root.to_str().unwrap().to_string();
    let locations = locations
        .into_iter()
        .map(|mut l| {
            if l.root.is_empty() {
                l.root = root.clone();
            }
            Arc::new(l)
        })
        .collect();

    let server = ServerConfig {
        listeners: vec![("127.0.0.1".to_string(), port)],
        server_names: vec!["localhost".to_string()],
        root,
        locations,
        ..Default::default()
    };
    AppConfig {
        servers: vec![Arc::new(server)],
    }
}

fn location(path: &str, methods: &[&str]) -> LocationConfig {
    LocationConfig {
        path: path.to_string(),
        root: String::new(), // filled from the server root
        allow_methods: methods.iter().map(|m| m.to_string()).collect(),
        ..Default::default()
    }
}

fn start_server(config: AppConfig) {
    thread::spawn(move || {
        let poll = Poll::new().unwrap();
        let mut server = Server::new(config, &poll).unwrap();
        server.run(poll).unwrap();
    });
    // Give the listener time to bind
    thread::sleep(Duration::from_millis(300));
}

fn connect(port: u16) -> TcpStream {
    let stream = TcpStream::connect(("127.0.0.1", port)).expect("connect to test server");
    stream
        .set_read_timeout(Some(Duration::from_secs(5)))
        .unwrap();
    stream
}

/// Reads exactly one response: the header block plus Content-Length bytes.
fn read_response(stream: &mut TcpStream) -> String {
    let mut buf = Vec::new();
    let mut tmp = [0u8; 4096];

    let header_end = loop {
        match stream.read(&mut tmp) {
            Ok(0) => return String::from_utf8_lossy(&buf).to_string(),
            Ok(n) => {
                buf.extend_from_slice(&tmp[..n]);
                if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
                    break pos + 4;
                }
            }
            Err(e) => panic!("read failed before headers: {}", e),
        }
    };

    let head = String::from_utf8_lossy(&buf[..header_end]).to_string();
    let content_length = head
        .lines()
        .find_map(|line| {
            line.to_ascii_lowercase()
                .strip_prefix("content-length:")
                .map(|v| v.trim().parse::<usize>().unwrap_or(0))
        })
        .unwrap_or(0);

    while buf.len() < header_end + content_length {
        match stream.read(&mut tmp) {
            Ok(0) => break,
            Ok(n) => buf.extend_from_slice(&tmp[..n]),
            Err(e) => panic!("read failed mid-body: {}", e),
        }
    }

    String::from_utf8_lossy(&buf).to_string()
}

fn send_request(port: u16, raw: &str) -> String {
    let mut stream = connect(port);
    stream.write_all(raw.as_bytes()).unwrap();
    read_response(&mut stream)
}

#[test]
fn test_static_get() {
    let root = test_root("static_get");
    std::fs::write(root.join("index.html"), "hi").unwrap();

    let config = config_for(18310, &root, vec![location("/", &["GET"])]);
    start_server(config);

    let response = send_request(
        18310,
        "GET /index.html HTTP/1.1\r\nHost: example.com\r\nConnection: close\r\n\r\n",
    );

    assert!(response.starts_with("HTTP/1.1 200 OK\r\n"), "{}", response);
    assert!(response.contains("Content-Type: text/html; charset=utf-8\r\n"));
    assert!(response.contains("Content-Length: 2\r\n"));
    assert!(response.ends_with("\r\n\r\nhi"));
}

#[test]
fn test_get_directory_serves_index() {
    let root = test_root("dir_index");
    std::fs::write(root.join("index.html"), "<h1>home</h1>").unwrap();

    let config = config_for(18311, &root, vec![location("/", &["GET"])]);
    start_server(config);

    let response = send_request(
        18311,
        "GET / HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n",
    );

    assert!(response.starts_with("HTTP/1.1 200 OK\r\n"), "{}", response);
    assert!(response.contains("<h1>home</h1>"));
}

#[test]
fn test_bad_version_gets_505_and_close() {
    let root = test_root("bad_version");
    let config = config_for(18312, &root, vec![location("/", &["GET"])]);
    start_server(config);

    let mut stream = connect(18312);
    stream
        .write_all(b"GET / HTTP/9.9\r\nHost: x\r\n\r\n")
        .unwrap();
    let response = read_response(&mut stream);

    assert!(
        response.starts_with("HTTP/1.1 505 HTTP Version Not Supported\r\n"),
        "{}",
        response
    );
    assert!(response.contains("Error 505"));
    assert!(response.contains("Connection: close\r\n"));

    // Server closes after the error response
    let mut tail = [0u8; 16];
    assert_eq!(stream.read(&mut tail).unwrap_or(0), 0);
}

#[test]
fn test_missing_file_404_with_custom_page() {
    let root = test_root("custom_404");
    std::fs::write(root.join("404.html"), "custom not found").unwrap();

    let mut config = config_for(18313, &root, vec![location("/", &["GET"])]);
    {
        let server = Arc::get_mut(&mut config.servers[0]).unwrap();
        server.error_pages.insert(404, "/404.html".to_string());
    }
    start_server(config);

    let response = send_request(
        18313,
        "GET /nope.txt HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n",
    );

    assert!(response.starts_with("HTTP/1.1 404 Not Found\r\n"), "{}", response);
    assert!(response.contains("custom not found"));
}

#[test]
fn test_method_not_allowed_405() {
    let root = test_root("method_405");
    let config = config_for(18314, &root, vec![location("/", &["GET"])]);
    start_server(config);

    let response = send_request(
        18314,
        "DELETE /x HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n",
    );

    assert!(response.starts_with("HTTP/1.1 405 "), "{}", response);
}

#[test]
fn test_routing_error_closes_connection_with_undrained_body() {
    let root = test_root("error_close");
    let config = config_for(18329, &root, vec![location("/", &["GET"])]);
    start_server(config);

    // The 405 fires at routing time, before the body is ever read; keeping
    // the connection alive would leave these bytes to be misread as the
    // next request's headers
    let mut stream = connect(18329);
    stream
        .write_all(
            b"POST /x HTTP/1.1\r\nHost: localhost\r\nContent-Length: 9\r\nContent-Type: text/plain\r\n\r\nleftovers",
        )
        .unwrap();

    let response = read_response(&mut stream);
    assert!(response.starts_with("HTTP/1.1 405 "), "{}", response);
    assert!(response.contains("Connection: close\r\n"), "{}", response);

    let mut tail = [0u8; 16];
    assert_eq!(stream.read(&mut tail).unwrap_or(0), 0);
}

#[test]
fn test_autoindex_listing() {
    let root = test_root("autoindex");
    std::fs::create_dir_all(root.join("browse")).unwrap();
    std::fs::write(root.join("browse/readme.txt"), "x").unwrap();

    // The prefix is stripped before the root join, so the location root
    // points at the listed directory itself
    let mut browse = location("/browse", &["GET"]);
    browse.root = root.join("browse").to_str().unwrap().to_string();
    browse.autoindex = true;
    let config = config_for(18315, &root, vec![location("/", &["GET"]), browse]);
    start_server(config);

    let response = send_request(
        18315,
        "GET /browse HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n",
    );

    assert!(response.starts_with("HTTP/1.1 200 OK\r\n"), "{}", response);
    assert!(response.contains("Index of /browse"));
    assert!(response.contains("readme.txt"));
}

#[test]
fn test_directory_without_index_or_autoindex_403() {
    let root = test_root("dir_403");
    std::fs::create_dir_all(root.join("closed")).unwrap();

    let config = config_for(18316, &root, vec![location("/", &["GET"])]);
    start_server(config);

    let response = send_request(
        18316,
        "GET /closed HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n",
    );

    assert!(response.starts_with("HTTP/1.1 403 "), "{}", response);
}

#[test]
fn test_redirect_location() {
    let root = test_root("redirect");
    let mut old = location("/old", &["GET"]);
    old.redirect = Some((301, "https://example.com/new".to_string()));
    let config = config_for(18317, &root, vec![old]);
    start_server(config);

    let response = send_request(
        18317,
        "GET /old/page HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n",
    );

    assert!(
        response.starts_with("HTTP/1.1 301 Moved Permanently\r\n"),
        "{}",
        response
    );
    assert!(response.contains("Location: https://example.com/new\r\n"));
}

#[test]
fn test_post_over_body_cap_is_413() {
    let root = test_root("post_413");
    let mut upload = location("/", &["GET", "POST"]);
    upload.client_max_body_size = 10;
    upload.upload_enabled = true;
    upload.upload_store = "uploads".to_string();
    let config = config_for(18318, &root, vec![upload]);
    start_server(config);

    // Headers only: the 413 verdict comes from Content-Length
    let response = send_request(
        18318,
        "POST /f HTTP/1.1\r\nHost: localhost\r\nContent-Length: 11\r\nContent-Type: text/plain\r\n\r\n",
    );

    assert!(response.starts_with("HTTP/1.1 413 "), "{}", response);
    // Nothing was written to disk
    let uploads = root.join("uploads");
    let empty = !uploads.exists() || uploads.read_dir().unwrap().next().is_none();
    assert!(empty, "no upload file may exist after a 413");
}

#[test]
fn test_post_single_upload_at_exact_cap() {
    let root = test_root("post_exact");
    let mut upload = location("/upload", &["POST"]);
    upload.client_max_body_size = 10;
    upload.upload_enabled = true;
    upload.upload_store = "uploads".to_string();
    let config = config_for(18319, &root, vec![upload]);
    start_server(config);

    let response = send_request(
        18319,
        "POST /upload HTTP/1.1\r\nHost: localhost\r\nContent-Length: 10\r\nContent-Type: text/plain\r\nConnection: close\r\n\r\n0123456789",
    );

    assert!(response.starts_with("HTTP/1.1 200 OK\r\n"), "{}", response);

    let uploads = root.join("uploads");
    let entries: Vec<_> = uploads.read_dir().unwrap().flatten().collect();
    assert_eq!(entries.len(), 1);
    let name = entries[0].file_name().into_string().unwrap();
    assert!(name.starts_with("file_") && name.ends_with(".txt"), "{}", name);
    assert_eq!(std::fs::read(entries[0].path()).unwrap(), b"0123456789");
}

#[test]
fn test_post_unsupported_media_type_415() {
    let root = test_root("post_415");
    let mut upload = location("/upload", &["POST"]);
    upload.upload_enabled = true;
    upload.upload_store = "uploads".to_string();
    let config = config_for(18320, &root, vec![upload]);
    start_server(config);

    let response = send_request(
        18320,
        "POST /upload HTTP/1.1\r\nHost: localhost\r\nContent-Length: 4\r\nContent-Type: video/mp4\r\nConnection: close\r\n\r\nabcd",
    );

    assert!(response.starts_with("HTTP/1.1 415 "), "{}", response);
}

#[test]
fn test_multipart_upload_two_files() {
    let root = test_root("multipart");
    let mut upload = location("/upload", &["POST"]);
    upload.upload_enabled = true;
    upload.upload_store = "uploads".to_string();
    let config = config_for(18321, &root, vec![upload]);
    start_server(config);

    let body = "------B\r\n\
                Content-Disposition: form-data; name=\"f1\"; filename=\"a.txt\"\r\n\
                Content-Type: text/plain\r\n\r\n\
                A\r\n\
                ------B\r\n\
                Content-Disposition: form-data; name=\"note\"\r\n\r\n\
                hello\r\n\
                ------B\r\n\
                Content-Disposition: form-data; name=\"f2\"; filename=\"b.bin\"\r\n\
                Content-Type: application/octet-stream\r\n\r\n\
                BB\r\n\
                ------B--\r\n";
    let request = format!(
        "POST /upload HTTP/1.1\r\nHost: localhost\r\nContent-Length: {}\r\nContent-Type: multipart/form-data; boundary=----B\r\nConnection: close\r\n\r\n{}",
        body.len(),
        body
    );

    let response = send_request(18321, &request);
    assert!(response.starts_with("HTTP/1.1 200 OK\r\n"), "{}", response);

    let uploads = root.join("uploads");
    assert_eq!(std::fs::read(uploads.join("a.txt")).unwrap(), b"A");
    assert_eq!(std::fs::read(uploads.join("b.bin")).unwrap(), b"BB");

    let log = std::fs::read_to_string(uploads.join("form_data.log")).unwrap();
    assert!(log.contains("Field: note = hello"), "{}", log);
}

#[test]
fn test_chunked_post_upload() {
    let root = test_root("chunked_post");
    let mut upload = location("/upload", &["POST"]);
    upload.upload_enabled = true;
    upload.upload_store = "uploads".to_string();
    let config = config_for(18322, &root, vec![upload]);
    start_server(config);

    let mut stream = connect(18322);
    stream
        .write_all(
            b"POST /upload HTTP/1.1\r\n\
              Host: localhost\r\n\
              Transfer-Encoding: chunked\r\n\
              Content-Type: text/plain\r\n\
              Connection: close\r\n\r\n",
        )
        .unwrap();

    // Force the decoder through partial reads
    stream.write_all(b"5\r\nHello\r\n").unwrap();
    thread::sleep(Duration::from_millis(100));
    stream.write_all(b"7\r\n World!\r\n").unwrap();
    thread::sleep(Duration::from_millis(100));
    stream.write_all(b"0\r\n\r\n").unwrap();

    let response = read_response(&mut stream);
    assert!(response.starts_with("HTTP/1.1 200 OK\r\n"), "{}", response);

    let uploads = root.join("uploads");
    let entries: Vec<_> = uploads
        .read_dir()
        .unwrap()
        .flatten()
        .filter(|e| e.file_name() != "form_data.log")
        .collect();
    assert_eq!(entries.len(), 1);
    assert_eq!(std::fs::read(entries[0].path()).unwrap(), b"Hello World!");
}

#[test]
fn test_chunked_on_http10_is_505() {
    let root = test_root("chunked_http10");
    let mut upload = location("/upload", &["POST"]);
    upload.upload_enabled = true;
    upload.upload_store = "uploads".to_string();
    let config = config_for(18323, &root, vec![upload]);
    start_server(config);

    let mut stream = connect(18323);
    stream
        .write_all(
            b"POST /upload HTTP/1.0\r\n\
              Host: localhost\r\n\
              Transfer-Encoding: chunked\r\n\
              Content-Type: text/plain\r\n\r\n\
              5\r\nHello\r\n",
        )
        .unwrap();

    let response = read_response(&mut stream);
    assert!(response.starts_with("HTTP/1.1 505 "), "{}", response);
}

#[test]
fn test_keepalive_sequential_requests() {
    let root = test_root("keepalive");
    std::fs::write(root.join("index.html"), "Hello").unwrap();

    let config = config_for(18324, &root, vec![location("/", &["GET"])]);
    start_server(config);

    let mut stream = connect(18324);

    for round in 0..3 {
        stream
            .write_all(b"GET /index.html HTTP/1.1\r\nHost: localhost\r\n\r\n")
            .unwrap();
        let response = read_response(&mut stream);
        assert!(
            response.starts_with("HTTP/1.1 200 OK\r\n"),
            "round {}: {}",
            round,
            response
        );
        assert!(response.contains("Connection: keep-alive\r\n"));
        assert!(response.ends_with("Hello"));
    }
}

#[test]
fn test_delete_then_get_is_404() {
    let root = test_root("delete_get");
    std::fs::write(root.join("victim.txt"), "bye").unwrap();

    let config = config_for(18325, &root, vec![location("/", &["GET", "DELETE"])]);
    start_server(config);

    let response = send_request(
        18325,
        "DELETE /victim.txt HTTP/1.1\r\nHost: localhost\r\n\r\n",
    );
    assert!(response.starts_with("HTTP/1.1 204 No Content\r\n"), "{}", response);
    assert!(!root.join("victim.txt").exists());

    let response = send_request(
        18325,
        "GET /victim.txt HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n",
    );
    assert!(response.starts_with("HTTP/1.1 404 "), "{}", response);
}

#[test]
fn test_header_section_cap() {
    let root = test_root("header_cap");
    std::fs::write(root.join("index.html"), "ok").unwrap();
    let config = config_for(18326, &root, vec![location("/", &["GET"])]);
    start_server(config);

    // Exactly at the 8 KiB cap: accepted
    let base = "GET /index.html HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\nX-Pad: ";
    let tail = "\r\n\r\n";
    let pad = 8192 - base.len() - tail.len();
    let request = format!("{}{}{}", base, "p".repeat(pad), tail);
    assert_eq!(request.len(), 8192);

    let response = send_request(18326, &request);
    assert!(response.starts_with("HTTP/1.1 200 OK\r\n"), "{}", response);

    // One byte over: rejected with 400
    let request = format!("{}{}{}", base, "p".repeat(pad + 1), tail);
    let response = send_request(18326, &request);
    assert!(response.starts_with("HTTP/1.1 400 "), "{}", response);
}

#[test]
fn test_cgi_get_roundtrip() {
    // Runs only where a python3 interpreter is installed
    if webserv::cgi::find_interpreter(".py", &[]).is_none() {
        return;
    }

    let root = test_root("cgi_get");
    std::fs::create_dir_all(root.join("cgi")).unwrap();
    let script = root.join("cgi/hello.py");
    std::fs::write(
        &script,
        "import sys\nsys.stdout.write(\"Content-Type: text/plain\\r\\n\\r\\nhello from cgi\")\n",
    )
    .unwrap();
    {
        use std::os::unix::fs::PermissionsExt;
        let mut perms = std::fs::metadata(&script).unwrap().permissions();
        perms.set_mode(0o755);
        std::fs::set_permissions(&script, perms).unwrap();
    }

    let mut cgi = location("/", &["GET"]);
    cgi.cgi_ext = vec![".py".to_string()];
    let config = config_for(18327, &root, vec![cgi]);
    start_server(config);

    let response = send_request(
        18327,
        "GET /cgi/hello.py HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n",
    );

    assert!(response.starts_with("HTTP/1.1 200 OK\r\n"), "{}", response);
    assert!(response.contains("Content-Type: text/plain\r\n"));
    assert!(response.contains("Set-Cookie: SESSID="));
    assert!(response.ends_with("hello from cgi"), "{}", response);
}

#[test]
fn test_cgi_post_echo() {
    if webserv::cgi::find_interpreter(".py", &[]).is_none() {
        return;
    }

    let root = test_root("cgi_post");
    std::fs::create_dir_all(root.join("cgi")).unwrap();
    let script = root.join("cgi/echo.py");
    std::fs::write(
        &script,
        "import os, sys\n\
         n = int(os.environ.get(\"CONTENT_LENGTH\", \"0\"))\n\
         data = sys.stdin.read(n)\n\
         sys.stdout.write(\"Content-Type: text/plain\\r\\n\\r\\n\" + data.upper())\n",
    )
    .unwrap();
    {
        use std::os::unix::fs::PermissionsExt;
        let mut perms = std::fs::metadata(&script).unwrap().permissions();
        perms.set_mode(0o755);
        std::fs::set_permissions(&script, perms).unwrap();
    }

    let mut cgi = location("/", &["GET", "POST"]);
    cgi.cgi_ext = vec![".py".to_string()];
    let config = config_for(18328, &root, vec![cgi]);
    start_server(config);

    let response = send_request(
        18328,
        "POST /cgi/echo.py HTTP/1.1\r\nHost: localhost\r\nContent-Length: 5\r\nContent-Type: text/plain\r\nConnection: close\r\n\r\nhello",
    );

    assert!(response.starts_with("HTTP/1.1 200 OK\r\n"), "{}", response);
    assert!(response.ends_with("HELLO"), "{}", response);
}
