use std::{
    fs::{create_dir_all, File},
    io::{BufWriter, Write},
    path::{Path, PathBuf},
};

use serde::de::IgnoredAny;

/// Destination for raw order responses, in placement order.
pub trait AuditSink: Send {
    fn record(&mut self, raw: &str);

    /// Terminate the log. Calling it more than once has no further effect.
    fn finish(&mut self);
}

/// Writes every recorded response as one element of a JSON array.
///
/// The file is truncated on open. Entries that are not themselves JSON are
/// stored as JSON strings so the array stays parseable.
pub struct JsonArrayAuditLog {
    writer: Option<BufWriter<File>>,
    path: PathBuf,
    entries: usize,
}

impl JsonArrayAuditLog {
    pub fn create(path: impl AsRef<Path>) -> std::io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
            create_dir_all(parent)?;
        }
        let mut writer = BufWriter::new(File::create(&path)?);
        writer.write_all(b"[")?;
        writer.flush()?;
        Ok(Self {
            writer: Some(writer),
            path,
            entries: 0,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn entries(&self) -> usize {
        self.entries
    }

    fn write_entry(writer: &mut BufWriter<File>, first: bool, raw: &str) -> std::io::Result<()> {
        let separator: &[u8] = if first { b"\n\t" } else { b",\n\t" };
        writer.write_all(separator)?;
        if serde_json::from_str::<IgnoredAny>(raw).is_ok() {
            writer.write_all(raw.trim().as_bytes())?;
        } else {
            let quoted = serde_json::to_string(raw)?;
            writer.write_all(quoted.as_bytes())?;
        }
        writer.flush()
    }
}

impl AuditSink for JsonArrayAuditLog {
    fn record(&mut self, raw: &str) {
        let Some(writer) = self.writer.as_mut() else {
            tracing::warn!(path = %self.path.display(), "audit log already finished, entry dropped");
            return;
        };
        match Self::write_entry(writer, self.entries == 0, raw) {
            Ok(()) => self.entries += 1,
            Err(err) => {
                tracing::warn!(path = %self.path.display(), error = %err, "failed to write audit entry")
            }
        }
    }

    fn finish(&mut self) {
        if let Some(mut writer) = self.writer.take() {
            let closing: &[u8] = if self.entries == 0 { b"]" } else { b"\n]\n" };
            if let Err(err) = writer.write_all(closing).and_then(|_| writer.flush()) {
                tracing::warn!(path = %self.path.display(), error = %err, "failed to close audit log");
            }
        }
    }
}

impl Drop for JsonArrayAuditLog {
    fn drop(&mut self) {
        self.finish();
    }
}

/// In-memory sink, mainly for tests and dry runs.
#[derive(Debug, Default)]
pub struct MemoryAuditLog {
    pub entries: Vec<String>,
    pub finished: bool,
}

impl AuditSink for MemoryAuditLog {
    fn record(&mut self, raw: &str) {
        self.entries.push(raw.to_string());
    }

    fn finish(&mut self) {
        self.finished = true;
    }
}

impl<T: AuditSink + ?Sized> AuditSink for Box<T> {
    fn record(&mut self, raw: &str) {
        (**self).record(raw)
    }

    fn finish(&mut self) {
        (**self).finish()
    }
}
