use std::path::{Path, PathBuf};

pub const MESSAGE_DIR: [&str; 2] = [".agent", "messages"];

#[must_use]
pub fn message_root(cwd: &Path) -> PathBuf {
    cwd.join(MESSAGE_DIR[0]).join(MESSAGE_DIR[1])
}

#[must_use]
pub fn sanitize_for_filename(value: &str) -> String {
    value
        .chars()
        .map(|c| match c {
            ':' | '/' | '\\' | ' ' | '.' => '-',
            _ => c,
        })
        .collect()
}

/// One log file per application session, named after the session id.
#[must_use]
pub fn message_file_name(session_id: &str) -> String {
    format!("{}.jsonl", sanitize_for_filename(session_id))
}
