use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::Path;

use serde::Serialize;
use serde_json::Value;

use crate::naming::MessagesByDate;
use crate::{AppError, Result};

pub const USERS_FILE: &str = "users.json";
pub const CHANNELS_FILE: &str = "channels.json";
pub const CHANNELS_BACKUP_FILE: &str = "channels_full.json.bak";
pub const ATTACHMENTS_DIR: &str = "attachments";

/// Encodes `data` as two-space indented JSON with object keys sorted, followed
/// by a newline.
pub fn serialize<W: Write, T: Serialize + ?Sized>(mut w: W, data: &T) -> Result<()> {
    let value = serde_json::to_value(data).map_err(|e| AppError::JsonSerialize(e.to_string()))?;
    serde_json::to_writer_pretty(&mut w, &canonical(value)).map_err(|e| match e.io_error_kind() {
        Some(kind) => AppError::Io(io::Error::new(kind, e)),
        None => AppError::JsonSerialize(e.to_string()),
    })?;
    w.write_all(b"\n")?;
    Ok(())
}

// Key order must not depend on whether serde_json preserves insertion order.
fn canonical(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(String, Value)> = map.into_iter().collect();
            entries.sort_by(|a, b| a.0.cmp(&b.0));
            Value::Object(entries.into_iter().map(|(k, v)| (k, canonical(v))).collect())
        }
        Value::Array(items) => Value::Array(items.into_iter().map(canonical).collect()),
        other => other,
    }
}

pub fn write_json<T: Serialize + ?Sized>(path: &Path, data: &T) -> Result<()> {
    let write_err = |e| AppError::WriteFile {
        path: path.display().to_string(),
        source: e,
    };
    let file = File::create(path).map_err(write_err)?;
    let mut writer = BufWriter::new(file);
    serialize(&mut writer, data).map_err(|e| match e {
        AppError::Io(source) => write_err(source),
        other => other,
    })?;
    writer.flush().map_err(write_err)?;
    Ok(())
}

pub fn create_dir(path: &Path) -> Result<()> {
    fs::create_dir_all(path).map_err(|e| AppError::CreateDir {
        path: path.display().to_string(),
        source: e,
    })
}

/// Writes one `<date>.json` per bucket under `dir`. Returns the number of
/// messages written.
pub fn save_channel(dir: &Path, messages: &MessagesByDate) -> Result<usize> {
    create_dir(dir)?;
    let mut count = 0;
    for (date, msgs) in messages {
        write_json(&dir.join(format!("{date}.json")), msgs)?;
        count += msgs.len();
    }
    Ok(count)
}
