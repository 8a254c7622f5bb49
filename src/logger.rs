use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;

use chrono::Utc;
use serde_json::{Map, Value, json};
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageLogMode {
    /// Every fetch reply written in full.
    Full,
    /// First fetch in full, then only parameters whose reply changed.
    Diffed,
}

/// Appends one JSON line per device exchange.
pub(crate) struct MessageLogger {
    mode: MessageLogMode,
    file: File,
    previous: Option<Map<String, Value>>,
}

impl MessageLogger {
    pub fn new(mode: MessageLogMode, path: impl AsRef<Path>) -> std::io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            mode,
            file,
            previous: None,
        })
    }

    pub fn log_login(&mut self, status: u16, outcome: &str, cookies: &[String]) {
        let entry = json!({
            "ts": Utc::now().to_rfc3339(),
            "dir": "login",
            "status": status,
            "outcome": outcome,
            "cookies": cookies,
        });
        self.write_line(&entry);
    }

    pub fn log_request(&mut self, method: &str, path: &str, status: Option<u16>) {
        let entry = json!({
            "ts": Utc::now().to_rfc3339(),
            "dir": "req",
            "method": method,
            "path": path,
            "status": status,
        });
        self.write_line(&entry);
    }

    pub fn log_write(&mut self, body: &Value, status: u16) {
        let entry = json!({
            "ts": Utc::now().to_rfc3339(),
            "dir": "write",
            "status": status,
            "body": body,
        });
        self.write_line(&entry);
    }

    /// `params` maps each requested identifier to its reply element (or null).
    pub fn log_fetch(&mut self, status: u16, params: Map<String, Value>) {
        match self.mode {
            MessageLogMode::Full => {
                let entry = json!({
                    "ts": Utc::now().to_rfc3339(),
                    "dir": "fetch",
                    "status": status,
                    "params": params,
                });
                self.write_line(&entry);
            }
            MessageLogMode::Diffed => {
                let entry = match self.previous {
                    None => json!({
                        "ts": Utc::now().to_rfc3339(),
                        "dir": "fetch",
                        "status": status,
                        "full": true,
                        "params": params,
                    }),
                    Some(ref prev) => {
                        let changes: Vec<Value> = params
                            .iter()
                            .filter(|(id, new)| prev.get(id.as_str()) != Some(*new))
                            .map(|(id, new)| {
                                json!({ "id": id, "old": prev.get(id.as_str()), "new": new })
                            })
                            .collect();
                        json!({
                            "ts": Utc::now().to_rfc3339(),
                            "dir": "fetch",
                            "status": status,
                            "changes": changes,
                        })
                    }
                };
                self.write_line(&entry);
                // Merge so parameters polled on alternate cycles keep their history.
                let prev = self.previous.get_or_insert_with(Map::new);
                for (id, value) in params {
                    prev.insert(id, value);
                }
            }
        }
    }

    fn write_line(&mut self, entry: &Value) {
        if let Ok(line) = serde_json::to_string(entry)
            && let Err(e) = writeln!(self.file, "{line}")
        {
            warn!("failed to write log entry: {e}");
        }
    }
}
