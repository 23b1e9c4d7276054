// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Durable fallback slot for the last known credential.
//!
//! Read by the request pipeline when the in-memory store is empty, written
//! after every successful refresh, cleared on definitive sign-out.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

/// A single-value durable key-value slot.
pub trait FallbackSlot: Send + Sync {
    fn load(&self) -> Option<String>;
    fn save(&self, value: &str) -> anyhow::Result<()>;
    fn clear(&self) -> anyhow::Result<()>;
}

/// On-disk slot contents.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct PersistedSlot {
    token: String,
    /// Save time as milliseconds since Unix epoch.
    #[serde(default)]
    saved_at_ms: u64,
}

/// JSON file slot with atomic writes.
///
/// A failed load is remembered until the next save or clear through this
/// slot, so an empty store does not hit the disk on every request.
#[derive(Debug)]
pub struct FileSlot {
    path: PathBuf,
    known_missing: AtomicBool,
}

impl FileSlot {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into(), known_missing: AtomicBool::new(false) }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read(&self) -> Option<String> {
        let data = match std::fs::read_to_string(&self.path) {
            Ok(d) => d,
            Err(e) => {
                tracing::debug!(path = %self.path.display(), "no fallback credential: {e}");
                return None;
            }
        };
        match serde_json::from_str::<PersistedSlot>(&data) {
            Ok(slot) if !slot.token.is_empty() => Some(slot.token),
            Ok(_) => None,
            Err(e) => {
                tracing::warn!(path = %self.path.display(), "failed to parse fallback credential: {e}");
                None
            }
        }
    }
}

impl FallbackSlot for FileSlot {
    fn load(&self) -> Option<String> {
        if self.known_missing.load(Ordering::Acquire) {
            return None;
        }
        let token = self.read();
        if token.is_none() {
            self.known_missing.store(true, Ordering::Release);
        }
        token
    }

    fn save(&self, value: &str) -> anyhow::Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let slot = PersistedSlot { token: value.to_owned(), saved_at_ms: epoch_ms() };
        write_atomic(&self.path, &serde_json::to_string_pretty(&slot)?)?;
        self.known_missing.store(false, Ordering::Release);
        Ok(())
    }

    fn clear(&self) -> anyhow::Result<()> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        self.known_missing.store(true, Ordering::Release);
        Ok(())
    }
}

/// Process-local slot, for embedding without a filesystem and for tests.
#[derive(Debug, Default)]
pub struct MemorySlot {
    value: Mutex<Option<String>>,
}

impl MemorySlot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_value(value: impl Into<String>) -> Self {
        Self { value: Mutex::new(Some(value.into())) }
    }
}

impl FallbackSlot for MemorySlot {
    fn load(&self) -> Option<String> {
        self.value.lock().clone()
    }

    fn save(&self, value: &str) -> anyhow::Result<()> {
        *self.value.lock() = Some(value.to_owned());
        Ok(())
    }

    fn clear(&self) -> anyhow::Result<()> {
        self.value.lock().take();
        Ok(())
    }
}

/// Write via a unique temp file + rename so readers never see a torn file.
///
/// The temp name carries PID + counter: concurrent saves must not share one
/// `.tmp` path, or a shorter write can keep trailing bytes of a longer one.
fn write_atomic(path: &Path, contents: &str) -> anyhow::Result<()> {
    use std::sync::atomic::AtomicU32;
    static COUNTER: AtomicU32 = AtomicU32::new(0);

    let seq = COUNTER.fetch_add(1, Ordering::Relaxed);
    let tmp_name = format!(
        "{}.{}.{}.tmp",
        path.file_name().unwrap_or_default().to_string_lossy(),
        std::process::id(),
        seq,
    );
    let tmp_path = path.with_file_name(tmp_name);
    std::fs::write(&tmp_path, contents)?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(&tmp_path, std::fs::Permissions::from_mode(0o600))?;
    }

    std::fs::rename(&tmp_path, path)?;
    Ok(())
}

fn epoch_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

#[cfg(test)]
#[path = "slot_tests.rs"]
mod tests;
