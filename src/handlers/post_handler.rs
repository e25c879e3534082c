use std::sync::atomic::{AtomicU64, Ordering};
use std::time::UNIX_EPOCH;

use crate::http::connection::{Connection, ConnectionState, FileWriter, MultipartPart};
use crate::prelude::*;

static UPLOAD_COUNTER: AtomicU64 = AtomicU64::new(0);

/// POST dispatch, entered once the full body is buffered: multipart bodies
/// are split into parts, single-content bodies of a supported type get a
/// synthesized filename, anything else is 415. Both paths prime the disk
/// writer and move the connection to `WRITING_DISK`.
pub fn handle_post(conn: &mut Connection) {
    let Some(location) = conn.routing.as_ref().and_then(|r| r.location.clone()) else {
        conn.status_code = HTTP_INTERNAL_SERVER_ERROR;
        conn.prepare_response();
        return;
    };

    if !location.upload_enabled || location.upload_store.is_empty() {
        conn.status_code = HTTP_FORBIDDEN;
        conn.prepare_response();
        return;
    }

    let upload_dir = resolve_upload_dir(&location);
    if fs::create_dir_all(&upload_dir).is_err() {
        conn.status_code = HTTP_INTERNAL_SERVER_ERROR;
        conn.prepare_response();
        return;
    }
    conn.upload_dir = upload_dir;

    let content_type = conn.request.content_type().to_string();

    if content_type.contains("multipart/form-data") {
        let Some(boundary) = extract_boundary(&content_type) else {
            conn.status_code = HTTP_BAD_REQUEST;
            conn.prepare_response();
            return;
        };

        match parse_multipart(&conn.request.body, &boundary) {
            Ok(parts) if !parts.is_empty() => {
                conn.multipart = parts;
                conn.current_part = 0;
                conn.state = ConnectionState::WritingDisk;
            }
            // An invalid filename voids the whole upload: no part is written
            _ => {
                conn.status_code = HTTP_BAD_REQUEST;
                conn.prepare_response();
            }
        }
    } else if is_supported_upload_type(&content_type) {
        let filename = generate_filename(&content_type);
        conn.writer = Some(FileWriter::new(conn.upload_dir.join(filename)));
        conn.state = ConnectionState::WritingDisk;
    } else {
        conn.status_code = HTTP_UNSUPPORTED_MEDIA_TYPE;
        conn.prepare_response();
    }
}

/// The upload store is taken as-is when absolute, otherwise it lives under
/// the location root.
fn resolve_upload_dir(location: &LocationConfig) -> PathBuf {
    let store = &location.upload_store;
    if store.starts_with('/') {
        PathBuf::from(store)
    } else {
        Path::new(&location.root).join(store)
    }
}

/// `file_<epoch>_<counter>.<ext>` — the counter keeps concurrent uploads
/// within one second distinct.
pub fn generate_filename(content_type: &str) -> String {
    let epoch = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);
    let counter = UPLOAD_COUNTER.fetch_add(1, Ordering::Relaxed) + 1;
    let ext = extension_for_content_type(content_type);

    if ext.is_empty() {
        format!("file_{}_{}", epoch, counter)
    } else {
        format!("file_{}_{}.{}", epoch, counter, ext)
    }
}

pub fn extract_boundary(content_type: &str) -> Option<String> {
    let boundary = content_type.split("boundary=").nth(1)?.trim();
    let boundary = boundary.trim_matches('"');
    if boundary.is_empty() {
        None
    } else {
        Some(boundary.to_string())
    }
}

/// Rejects names that could land outside the upload store: any slash,
/// `..`, control characters or NUL.
pub fn filename_is_safe(name: &str) -> bool {
    !name.is_empty()
        && !name.contains('/')
        && !name.contains('\\')
        && !name.contains("..")
        && !name.contains('\0')
        && !name.chars().any(|c| c.is_control())
}

/// Splits a buffered multipart body at `--<boundary>` markers;
/// `--<boundary>--` terminates. Err when any file part carries an unsafe
/// filename.
pub fn parse_multipart(
    body: &[u8],
    boundary: &str,
) -> std::result::Result<Vec<MultipartPart>, ()> {
    let marker = format!("--{}", boundary).into_bytes();
    let mut parts = Vec::new();

    let Some(first) = find_subsequence(body, &marker, 0) else {
        return Err(());
    };
    let mut cursor = first;

    loop {
        let after_marker = cursor + marker.len();
        if body[after_marker..].starts_with(b"--") {
            break; // terminating boundary
        }

        // Part content begins past the marker's CRLF
        let part_start = if body[after_marker..].starts_with(b"\r\n") {
            after_marker + 2
        } else {
            after_marker
        };

        let Some(next) = find_subsequence(body, &marker, part_start) else {
            break; // no closing marker, drop the tail
        };

        if let Some(part) = parse_part(&body[part_start..next])? {
            parts.push(part);
        }
        cursor = next;
    }

    Ok(parts)
}

fn parse_part(data: &[u8]) -> std::result::Result<Option<MultipartPart>, ()> {
    let Some(header_end) = find_subsequence(data, b"\r\n\r\n", 0) else {
        return Ok(None);
    };

    let headers = String::from_utf8_lossy(&data[..header_end]);
    let mut content = &data[header_end + 4..];

    // The CRLF before the next boundary belongs to the framing, not the part
    while content.ends_with(b"\r") || content.ends_with(b"\n") {
        content = &content[..content.len() - 1];
    }

    let mut part = MultipartPart::default();
    for line in headers.lines() {
        let line = line.trim_end_matches('\r');
        if line.starts_with("Content-Disposition:") {
            if let Some(name) = disposition_param(line, "name=") {
                part.name = name;
            }
            if let Some(filename) = disposition_param(line, "filename=") {
                if !filename_is_safe(&filename) {
                    return Err(());
                }
                part.filename = Some(filename);
            }
        } else if line.starts_with("Content-Type:") {
            part.content_type = line
                .split_once(':')
                .map(|(_, v)| v.trim().to_string())
                .unwrap_or_default();
        }
    }

    if part.name.is_empty() && part.filename.is_none() {
        return Ok(None);
    }

    part.content = content.to_vec();
    Ok(Some(part))
}

fn disposition_param(line: &str, key: &str) -> Option<String> {
    for piece in line.split(';') {
        if let Some(value) = piece.trim().strip_prefix(key) {
            return Some(value.trim_matches('"').to_string());
        }
    }
    None
}
