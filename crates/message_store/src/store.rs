use std::collections::{HashMap, HashSet};
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use agent_events::Message;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

use crate::error::MessageStoreError;
use crate::paths::message_file_name;
use crate::schema::{JsonLine, LogHeader, MessageRecord};
use crate::MessageStore;

/// Append-only JSONL log of the committed messages of one application session.
pub struct SessionLog {
    path: PathBuf,
    file: File,
    header: LogHeader,
    messages: Vec<Message>,
    ids: HashSet<String>,
}

impl SessionLog {
    pub fn create_new(path: &Path, session_id: &str) -> Result<Self, MessageStoreError> {
        let path = path.to_path_buf();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| {
                MessageStoreError::io("creating message directory", parent, source)
            })?;
        }

        let header = LogHeader::v1(session_id, now_rfc3339()?);
        let mut file = OpenOptions::new()
            .create_new(true)
            .append(true)
            .open(&path)
            .map_err(|source| MessageStoreError::io("creating message log", &path, source))?;
        write_json_line(&path, &mut file, &header)?;

        Ok(Self {
            path,
            file,
            header,
            messages: Vec::new(),
            ids: HashSet::new(),
        })
    }

    pub fn open(path: &Path, session_id: &str) -> Result<Self, MessageStoreError> {
        let path = path.to_path_buf();
        let read_file = File::open(&path)
            .map_err(|source| MessageStoreError::io("opening message log", &path, source))?;
        let reader = BufReader::new(read_file);

        let mut header: Option<LogHeader> = None;
        let mut messages = Vec::new();
        let mut ids = HashSet::new();

        for (line_index, line_result) in reader.lines().enumerate() {
            let line_number = line_index + 1;
            let line = line_result
                .map_err(|source| MessageStoreError::io_line(&path, line_number, source))?;
            if line.trim().is_empty() {
                continue;
            }
            let parsed = parse_json_line(&path, line_number, &line)?;

            if header.is_none() {
                match parsed {
                    JsonLine::Session(parsed_header) => {
                        validate_header_line(&path, line_number, &parsed_header, session_id)?;
                        header = Some(parsed_header);
                    }
                    JsonLine::Message(_) => {
                        return Err(MessageStoreError::InvalidHeaderRecord {
                            path,
                            line: line_number,
                        });
                    }
                }

                continue;
            }

            match parsed {
                JsonLine::Session(_) => {
                    return Err(MessageStoreError::InvalidMessageRecord {
                        path,
                        line: line_number,
                    });
                }
                JsonLine::Message(record) => {
                    validate_rfc3339(&path, line_number, "ts", &record.ts)?;
                    if !ids.insert(record.message.id.clone()) {
                        return Err(MessageStoreError::DuplicateMessageId {
                            path,
                            line: line_number,
                            id: record.message.id,
                        });
                    }
                    messages.push(record.message);
                }
            }
        }

        let header =
            header.ok_or_else(|| MessageStoreError::MissingHeader { path: path.clone() })?;

        let file = OpenOptions::new()
            .append(true)
            .open(&path)
            .map_err(|source| {
                MessageStoreError::io("opening message log for append", &path, source)
            })?;

        Ok(Self {
            path,
            file,
            header,
            messages,
            ids,
        })
    }

    pub fn open_or_create(path: &Path, session_id: &str) -> Result<Self, MessageStoreError> {
        if path.exists() {
            Self::open(path, session_id)
        } else {
            Self::create_new(path, session_id)
        }
    }

    pub fn append(&mut self, message: &Message) -> Result<(), MessageStoreError> {
        if self.ids.contains(&message.id) {
            return Err(MessageStoreError::MessageAlreadyStored {
                session_id: self.header.session_id.clone(),
                id: message.id.clone(),
            });
        }

        let record = MessageRecord::new(now_rfc3339()?, message.clone());
        write_json_line(&self.path, &mut self.file, &record)?;
        self.ids.insert(message.id.clone());
        self.messages.push(message.clone());
        Ok(())
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    #[must_use]
    pub fn header(&self) -> &LogHeader {
        &self.header
    }

    #[must_use]
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    #[must_use]
    pub fn last_message(&self) -> Option<&Message> {
        self.messages.last()
    }
}

/// Directory of [`SessionLog`]s, one file per application session.
pub struct JsonlMessageStore {
    root: PathBuf,
    logs: Mutex<HashMap<String, SessionLog>>,
}

impl JsonlMessageStore {
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            logs: Mutex::new(HashMap::new()),
        }
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    #[must_use]
    pub fn log_path(&self, session_id: &str) -> PathBuf {
        self.root.join(message_file_name(session_id))
    }

    /// All committed messages of a session, oldest first.
    pub fn messages(&self, session_id: &str) -> Result<Vec<Message>, MessageStoreError> {
        self.with_log(session_id, false, |log| {
            Ok(log.map(|log| log.messages().to_vec()).unwrap_or_default())
        })
    }

    fn with_log<T>(
        &self,
        session_id: &str,
        create: bool,
        f: impl FnOnce(Option<&mut SessionLog>) -> Result<T, MessageStoreError>,
    ) -> Result<T, MessageStoreError> {
        let mut logs = lock_unpoisoned(&self.logs);
        if !logs.contains_key(session_id) {
            let path = self.log_path(session_id);
            let log = if path.exists() {
                SessionLog::open(&path, session_id)?
            } else if create {
                SessionLog::create_new(&path, session_id)?
            } else {
                return f(None);
            };
            logs.insert(session_id.to_string(), log);
        }

        f(logs.get_mut(session_id))
    }
}

impl MessageStore for JsonlMessageStore {
    fn last_message(&self, session_id: &str) -> Result<Option<Message>, MessageStoreError> {
        self.with_log(session_id, false, |log| {
            Ok(log.and_then(|log| log.last_message().cloned()))
        })
    }

    fn append_message(&self, session_id: &str, message: &Message) -> Result<(), MessageStoreError> {
        self.with_log(session_id, true, |log| match log {
            Some(log) => {
                log.append(message)?;
                tracing::debug!(
                    session_id,
                    message_id = %message.id,
                    parts = message.parts.len(),
                    "appended message to log"
                );
                Ok(())
            }
            None => Err(MessageStoreError::Unavailable(format!(
                "no log for session '{session_id}'"
            ))),
        })
    }
}

fn lock_unpoisoned<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn write_json_line<T: serde::Serialize>(
    path: &Path,
    file: &mut File,
    value: &T,
) -> Result<(), MessageStoreError> {
    let mut line =
        serde_json::to_string(value).map_err(|source| MessageStoreError::json_serialize(path, source))?;
    line.push('\n');
    file.write_all(line.as_bytes())
        .map_err(|source| MessageStoreError::io("appending message log line", path, source))?;
    file.flush()
        .map_err(|source| MessageStoreError::io("flushing message log", path, source))
}

fn now_rfc3339() -> Result<String, MessageStoreError> {
    OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .map_err(MessageStoreError::ClockFormat)
}

pub(crate) fn parse_json_line(
    path: &Path,
    line_number: usize,
    line: &str,
) -> Result<JsonLine, MessageStoreError> {
    JsonLine::from_str(line).map_err(|source| MessageStoreError::json_line(path, line_number, source))
}

pub(crate) fn validate_header_line(
    path: &Path,
    line_number: usize,
    header: &LogHeader,
    session_id: &str,
) -> Result<(), MessageStoreError> {
    if header.version != 1 {
        return Err(MessageStoreError::UnsupportedVersion {
            path: path.to_path_buf(),
            line: line_number,
            found: header.version,
        });
    }

    validate_rfc3339(path, line_number, "created_at", &header.created_at)?;

    if header.session_id != session_id {
        return Err(MessageStoreError::SessionMismatch {
            path: path.to_path_buf(),
            line: line_number,
            expected: session_id.to_string(),
            found: header.session_id.clone(),
        });
    }

    Ok(())
}

pub(crate) fn validate_rfc3339(
    path: &Path,
    line_number: usize,
    field: &'static str,
    value: &str,
) -> Result<(), MessageStoreError> {
    if OffsetDateTime::parse(value, &Rfc3339).is_err() {
        return Err(MessageStoreError::InvalidTimestamp {
            path: path.to_path_buf(),
            line: line_number,
            field,
            value: value.to_string(),
        });
    }

    Ok(())
}
