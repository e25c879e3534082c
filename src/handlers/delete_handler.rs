use crate::http::connection::Connection;
use crate::prelude::*;

/// DELETE dispatch: 404 for a missing target, 403 for directories and
/// permission failures, 204 on success. Path escape was already rejected
/// by the router.
pub fn handle_delete(conn: &mut Connection) {
    let Some(routing) = conn.routing.as_ref() else {
        conn.status_code = HTTP_INTERNAL_SERVER_ERROR;
        conn.prepare_response();
        return;
    };

    let target = PathBuf::from(&routing.mapped_path);

    if !target.exists() {
        conn.status_code = HTTP_NOT_FOUND;
        conn.prepare_response();
        return;
    }

    if target.is_dir() {
        conn.status_code = HTTP_FORBIDDEN;
        conn.prepare_response();
        return;
    }

    conn.status_code = match fs::remove_file(&target) {
        Ok(()) => HTTP_NO_CONTENT,
        Err(e) if e.kind() == ErrorKind::PermissionDenied => HTTP_FORBIDDEN,
        Err(_) => HTTP_INTERNAL_SERVER_ERROR,
    };
    conn.prepare_response();
}
