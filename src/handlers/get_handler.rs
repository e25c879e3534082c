use crate::http::connection::{Connection, ConnectionState, FileReader};
use crate::prelude::*;

/// GET dispatch: directories resolve to their index file, an autoindex
/// page, or 403; plain files prime the disk reader and move the
/// connection to `READING_DISK`.
pub fn handle_get(conn: &mut Connection) {
    let Some(routing) = conn.routing.clone() else {
        conn.status_code = HTTP_INTERNAL_SERVER_ERROR;
        conn.prepare_response();
        return;
    };
    let Some(location) = routing.location.clone() else {
        conn.status_code = HTTP_INTERNAL_SERVER_ERROR;
        conn.prepare_response();
        return;
    };

    let mut path = PathBuf::from(&routing.mapped_path);

    if path.is_dir() {
        let index_candidate = if location.index.is_empty() {
            None
        } else {
            let candidate = path.join(&location.index);
            candidate.is_file().then_some(candidate)
        };

        if let Some(index) = index_candidate {
            conn.index_path = Some(index.clone());
            path = index;
        } else if location.autoindex {
            let html = generate_autoindex(&path, &conn.request.path);
            conn.status_code = HTTP_OK;
            conn.body_content = html.into_bytes();
            conn.content_type_override = Some("text/html; charset=utf-8".to_string());
            conn.prepare_response();
            return;
        } else {
            conn.status_code = HTTP_FORBIDDEN;
            conn.prepare_response();
            return;
        }
    }

    // Missing or unreadable files surface as 404/403 from the first read
    conn.reader = Some(FileReader::new(path));
    conn.state = ConnectionState::ReadingDisk;
}
