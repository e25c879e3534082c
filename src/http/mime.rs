use std::path::Path;

/// MIME type by file extension. Textual types carry an explicit charset.
pub fn mime_type(extension: Option<&str>) -> &'static str {
    let lowered = extension.map(|e| e.to_ascii_lowercase());
    match lowered.as_deref() {
        // Text
        Some("html") | Some("htm") => "text/html; charset=utf-8",
        Some("css") => "text/css; charset=utf-8",
        Some("js") => "text/javascript; charset=utf-8",
        Some("json") => "application/json; charset=utf-8",
        Some("xml") => "application/xml; charset=utf-8",
        Some("txt") => "text/plain; charset=utf-8",
        Some("csv") => "text/csv; charset=utf-8",
        Some("md") => "text/markdown; charset=utf-8",
        // Images
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("png") => "image/png",
        Some("gif") => "image/gif",
        Some("svg") => "image/svg+xml",
        Some("webp") => "image/webp",
        Some("ico") => "image/x-icon",
        Some("bmp") => "image/bmp",
        // Audio
        Some("mp3") => "audio/mpeg",
        Some("wav") => "audio/wav",
        Some("ogg") => "audio/ogg",
        Some("m4a") => "audio/mp4",
        // Video
        Some("mp4") => "video/mp4",
        Some("webm") => "video/webm",
        Some("avi") => "video/x-msvideo",
        Some("mov") => "video/quicktime",
        // Application
        Some("pdf") => "application/pdf",
        Some("zip") => "application/zip",
        Some("tar") => "application/x-tar",
        Some("gz") => "application/gzip",
        Some("wasm") => "application/wasm",
        // Fonts
        Some("ttf") => "font/ttf",
        Some("woff") => "font/woff",
        Some("woff2") => "font/woff2",
        _ => "application/octet-stream",
    }
}

pub fn mime_type_for_path(path: &Path) -> &'static str {
    mime_type(path.extension().and_then(|e| e.to_str()))
}

/// Upload extension for a request Content-Type (no leading dot).
pub fn extension_for_content_type(content_type: &str) -> &'static str {
    if content_type.contains("text/html") {
        "html"
    } else if content_type.contains("text/css") {
        "css"
    } else if content_type.contains("text/plain") {
        "txt"
    } else if content_type.contains("image/jpeg") {
        "jpg"
    } else if content_type.contains("image/png") {
        "png"
    } else if content_type.contains("image/gif") {
        "gif"
    } else if content_type.contains("image/webp") {
        "webp"
    } else if content_type.contains("image/svg+xml") {
        "svg"
    } else if content_type.contains("application/javascript") {
        "js"
    } else if content_type.contains("application/pdf") {
        "pdf"
    } else if content_type.contains("application/json") {
        "json"
    } else {
        "bin"
    }
}

/// Content types accepted for single-content uploads.
pub fn is_supported_upload_type(content_type: &str) -> bool {
    content_type.contains("text/plain")
        || content_type.contains("text/css")
        || content_type.contains("text/html")
        || content_type.contains("image/jpeg")
        || content_type.contains("image/png")
        || content_type.contains("image/gif")
        || content_type.contains("application/javascript")
        || content_type.contains("application/json")
        || content_type.contains("application/pdf")
        || content_type.contains("application/octet-stream")
}
