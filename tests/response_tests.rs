use std::path::Path;

use webserv::http::mime::{mime_type, mime_type_for_path};
use webserv::http::response::{error_body, generate_autoindex, parse_cgi_output, HttpResponse};
use webserv::utils::{Cookies, SessionStore, SetCookie};

#[test]
fn test_response_framing() {
    let mut res = HttpResponse::new(200);
    res.set_body(b"Hello Rust".to_vec(), "text/plain");

    let bytes = res.to_bytes();
    let text = String::from_utf8_lossy(&bytes);

    assert!(text.starts_with("HTTP/1.1 200 OK\r\n"));
    assert!(text.contains("\r\nDate: "));
    assert!(text.contains("\r\nServer: webserv/1.0\r\n"));
    assert!(text.contains("\r\nContent-Type: text/plain\r\n"));
    assert!(text.contains("\r\nContent-Length: 10\r\n"));
    assert!(text.contains("\r\nConnection: keep-alive\r\n"));
    assert!(text.ends_with("\r\n\r\nHello Rust"));
}

#[test]
fn test_date_header_is_rfc1123() {
    let res = HttpResponse::new(200);
    let bytes = res.to_bytes();
    let text = String::from_utf8_lossy(&bytes);

    let date_line = text
        .lines()
        .find(|l| l.starts_with("Date: "))
        .expect("Date header present");
    // e.g. "Date: Sun, 06 Nov 1994 08:49:37 GMT"
    assert!(date_line.ends_with(" GMT"), "{}", date_line);
    assert_eq!(date_line.len(), "Date: Sun, 06 Nov 1994 08:49:37 GMT".len());
}

#[test]
fn test_location_and_cookies_emitted() {
    let mut res = HttpResponse::new(302);
    res.location = Some("/new-home".to_string());
    res.add_cookie(SetCookie::new("SESSID", "abc").max_age(60).to_header());

    let text = String::from_utf8_lossy(&res.to_bytes()).to_string();
    assert!(text.starts_with("HTTP/1.1 302 Found\r\n"));
    assert!(text.contains("\r\nLocation: /new-home\r\n"));
    assert!(text.contains("\r\nSet-Cookie: SESSID=abc; Path=/; Max-Age=60; HttpOnly; SameSite=Lax\r\n"));
}

#[test]
fn test_content_length_matches_body() {
    let mut res = HttpResponse::new(200);
    res.set_body(vec![b'x'; 12345], "application/octet-stream");

    let bytes = res.to_bytes();
    let text = String::from_utf8_lossy(&bytes);
    assert!(text.contains("Content-Length: 12345\r\n"));

    let body_start = bytes.windows(4).position(|w| w == b"\r\n\r\n").unwrap() + 4;
    assert_eq!(bytes.len() - body_start, 12345);
}

#[test]
fn test_builtin_error_body() {
    let body = error_body(418, None, None);
    assert_eq!(body, b"<html><body><h1>Error 418</h1></body></html>");
}

#[test]
fn test_cgi_output_lifting() {
    let raw = b"Content-Type: application/json\r\n\
                Set-Cookie: a=1\r\n\
                Set-Cookie: b=2\r\n\
                Location: /after\r\n\
                Status: 404 Not Found\r\n\r\n\
                {\"missing\":true}";

    let out = parse_cgi_output(raw);
    assert_eq!(out.status, 404);
    assert_eq!(out.content_type, "application/json");
    assert_eq!(out.cookies, vec!["a=1".to_string(), "b=2".to_string()]);
    assert_eq!(out.location.as_deref(), Some("/after"));
    assert_eq!(out.body, b"{\"missing\":true}");
}

#[test]
fn test_cgi_output_defaults() {
    let out = parse_cgi_output(b"X-Other: 1\r\n\r\nbody text");
    assert_eq!(out.status, 200);
    assert_eq!(out.content_type, "text/html");
    assert_eq!(out.body, b"body text");
}

#[test]
fn test_cgi_output_lf_separator() {
    let out = parse_cgi_output(b"Content-Type: text/plain\n\nplain body");
    assert_eq!(out.content_type, "text/plain");
    assert_eq!(out.body, b"plain body");
}

#[test]
fn test_cgi_output_without_headers() {
    let out = parse_cgi_output(b"just raw bytes with no separator");
    assert_eq!(out.status, 200);
    assert_eq!(out.body, b"just raw bytes with no separator");
}

#[test]
fn test_mime_table() {
    assert_eq!(mime_type(Some("html")), "text/html; charset=utf-8");
    assert_eq!(mime_type(Some("HTML")), "text/html; charset=utf-8");
    assert_eq!(mime_type(Some("css")), "text/css; charset=utf-8");
    assert_eq!(mime_type(Some("png")), "image/png");
    assert_eq!(mime_type(Some("svg")), "image/svg+xml");
    assert_eq!(mime_type(Some("mp3")), "audio/mpeg");
    assert_eq!(mime_type(Some("webm")), "video/webm");
    assert_eq!(mime_type(Some("wasm")), "application/wasm");
    assert_eq!(mime_type(Some("woff2")), "font/woff2");
    assert_eq!(mime_type(Some("xyz")), "application/octet-stream");
    assert_eq!(mime_type(None), "application/octet-stream");

    assert_eq!(
        mime_type_for_path(Path::new("/srv/www/index.html")),
        "text/html; charset=utf-8"
    );
    assert_eq!(
        mime_type_for_path(Path::new("/srv/www/noext")),
        "application/octet-stream"
    );
}

#[test]
fn test_autoindex_listing() {
    let dir = std::env::temp_dir().join("webserv_autoindex_test");
    let _ = std::fs::remove_dir_all(&dir);
    std::fs::create_dir_all(dir.join("subdir")).unwrap();
    std::fs::write(dir.join("zfile.txt"), "data").unwrap();
    std::fs::write(dir.join("afile.txt"), "data").unwrap();

    let html = generate_autoindex(&dir, "/browse");

    assert!(html.contains("<title>Index of /browse/</title>"));
    assert!(html.contains("../"));
    assert!(html.contains("subdir/"));
    assert!(html.contains("afile.txt"));
    // Directories come before files
    let dir_pos = html.find("subdir/").unwrap();
    let file_pos = html.find("afile.txt").unwrap();
    assert!(dir_pos < file_pos);

    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn test_cookie_parsing() {
    let cookies = Cookies::parse("a=1; b=hello; malformed");
    assert_eq!(cookies.get("a"), Some(&"1".to_string()));
    assert_eq!(cookies.get("b"), Some(&"hello".to_string()));
    assert_eq!(cookies.get("malformed"), None);
}

#[test]
fn test_session_store_lifecycle() {
    let mut store = SessionStore::new(std::time::Duration::from_secs(60));

    let id = store.get_or_create(None);
    assert!(!id.is_empty());
    assert_eq!(store.len(), 1);

    // Presenting the cookie keeps the same session
    let same = store.get_or_create(Some(&id));
    assert_eq!(same, id);
    assert_eq!(store.len(), 1);

    // Unknown cookie mints a fresh session
    let fresh = store.get_or_create(Some("bogus"));
    assert_ne!(fresh, id);
    assert_eq!(store.len(), 2);

    store.set(&id, "user", "alice");
    assert_eq!(store.get(&id, "user"), Some(&"alice".to_string()));
    assert_eq!(store.get(&fresh, "user"), None);
}
