use webserv::handlers::post_handler::{
    extract_boundary, filename_is_safe, generate_filename, parse_multipart,
};
use webserv::http::mime::{extension_for_content_type, is_supported_upload_type};

fn two_file_body(boundary: &str) -> Vec<u8> {
    let mut body = Vec::new();
    body.extend_from_slice(format!("--{}\r\n", boundary).as_bytes());
    body.extend_from_slice(
        b"Content-Disposition: form-data; name=\"f1\"; filename=\"a.txt\"\r\n\
          Content-Type: text/plain\r\n\r\nA\r\n",
    );
    body.extend_from_slice(format!("--{}\r\n", boundary).as_bytes());
    body.extend_from_slice(
        b"Content-Disposition: form-data; name=\"f2\"; filename=\"b.bin\"\r\n\
          Content-Type: application/octet-stream\r\n\r\nBB\r\n",
    );
    body.extend_from_slice(format!("--{}--\r\n", boundary).as_bytes());
    body
}

#[test]
fn test_extract_boundary() {
    assert_eq!(
        extract_boundary("multipart/form-data; boundary=----B"),
        Some("----B".to_string())
    );
    assert_eq!(
        extract_boundary("multipart/form-data; boundary=\"quoted\""),
        Some("quoted".to_string())
    );
    assert_eq!(extract_boundary("multipart/form-data"), None);
}

#[test]
fn test_two_file_parts() {
    let body = two_file_body("----B");
    let parts = parse_multipart(&body, "----B").unwrap();

    assert_eq!(parts.len(), 2);
    assert_eq!(parts[0].name, "f1");
    assert_eq!(parts[0].filename.as_deref(), Some("a.txt"));
    assert_eq!(parts[0].content, b"A");
    assert_eq!(parts[1].name, "f2");
    assert_eq!(parts[1].filename.as_deref(), Some("b.bin"));
    assert_eq!(parts[1].content, b"BB");
}

#[test]
fn test_form_field_part_has_no_filename() {
    let body = b"--X\r\n\
                 Content-Disposition: form-data; name=\"username\"\r\n\r\n\
                 john_doe\r\n\
                 --X--\r\n";
    let parts = parse_multipart(body, "X").unwrap();

    assert_eq!(parts.len(), 1);
    assert_eq!(parts[0].name, "username");
    assert!(parts[0].filename.is_none());
    assert_eq!(parts[0].content, b"john_doe");
}

#[test]
fn test_binary_content_preserved() {
    let mut body = Vec::new();
    body.extend_from_slice(b"--X\r\n");
    body.extend_from_slice(
        b"Content-Disposition: form-data; name=\"f\"; filename=\"raw.bin\"\r\n\r\n",
    );
    let payload = [0u8, 1, 2, 254, 255, 13, 10, 0];
    body.extend_from_slice(&payload);
    body.extend_from_slice(b"\r\n--X--\r\n");

    let parts = parse_multipart(&body, "X").unwrap();
    assert_eq!(parts.len(), 1);
    assert_eq!(parts[0].content, payload);
}

#[test]
fn test_unsafe_filename_voids_whole_upload() {
    for bad in ["../evil.txt", "a/b.txt", "a\\b.txt", "nul\0.txt", ".."] {
        let mut body = Vec::new();
        body.extend_from_slice(b"--X\r\n");
        body.extend_from_slice(b"Content-Disposition: form-data; name=\"ok\"; filename=\"good.txt\"\r\n\r\nfine\r\n");
        body.extend_from_slice(b"--X\r\n");
        body.extend_from_slice(
            format!(
                "Content-Disposition: form-data; name=\"f\"; filename=\"{}\"\r\n\r\nevil\r\n",
                bad
            )
            .as_bytes(),
        );
        body.extend_from_slice(b"--X--\r\n");

        assert!(
            parse_multipart(&body, "X").is_err(),
            "filename `{}` must void the upload",
            bad.escape_debug()
        );
    }
}

#[test]
fn test_filename_safety_rules() {
    assert!(filename_is_safe("report.pdf"));
    assert!(filename_is_safe("with space.txt"));
    assert!(!filename_is_safe("../up"));
    assert!(!filename_is_safe("dir/inner.txt"));
    assert!(!filename_is_safe("ctrl\x07.txt"));
    assert!(!filename_is_safe(""));
}

#[test]
fn test_generated_filename_shape() {
    let a = generate_filename("text/plain");
    let b = generate_filename("text/plain");

    assert!(a.starts_with("file_"), "{}", a);
    assert!(a.ends_with(".txt"), "{}", a);
    // The counter keeps same-second uploads distinct
    assert_ne!(a, b);
}

#[test]
fn test_extension_table() {
    assert_eq!(extension_for_content_type("text/plain"), "txt");
    assert_eq!(extension_for_content_type("image/png"), "png");
    assert_eq!(extension_for_content_type("application/json"), "json");
    assert_eq!(extension_for_content_type("application/x-mystery"), "bin");
}

#[test]
fn test_supported_upload_types() {
    assert!(is_supported_upload_type("text/plain"));
    assert!(is_supported_upload_type("image/png"));
    assert!(is_supported_upload_type("application/octet-stream"));
    assert!(!is_supported_upload_type("video/mp4"));
    assert!(!is_supported_upload_type("application/x-bittorrent"));
}
