//! Failure artifacts: screenshots and text notes.
//!
//! Artifacts land in a timestamped session directory under the configured
//! diagnostics root (`.vault-harness/diagnostics/<timestamp>/`). When the
//! suite finishes, the whole directory is copied to
//! `<reports>/<timestamp>/`.

use chrono::Local;
use regex::Regex;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, OnceLock};
use tracing::{debug, warn};

fn unsafe_chars() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[^A-Za-z0-9_.-]+").ok()).as_ref()
}

/// Turns a free-form label into a file-name-safe slug.
pub fn sanitize_label(label: &str) -> String {
    let slug = match unsafe_chars() {
        Some(re) => re.replace_all(label.trim(), "-").into_owned(),
        None => label.trim().to_string(),
    };
    let slug = slug.trim_matches('-');
    if slug.is_empty() {
        "artifact".to_string()
    } else {
        slug.to_string()
    }
}

/// What a failure left behind.
#[derive(Debug, Clone)]
pub enum Artifact {
    Screenshot(Vec<u8>),
    /// Used when the browser is gone and no screenshot can be taken.
    Note(String),
}

/// Timestamped directory collecting failure artifacts for one run.
///
/// Clones share the directory and the artifact counter.
#[derive(Debug, Clone)]
pub struct DiagnosticsDir {
    session_dir: PathBuf,
    timestamp: String,
    seq: Arc<AtomicU32>,
}

impl DiagnosticsDir {
    /// Creates `<root>/<timestamp>/`.
    pub fn create(root: &Path) -> std::io::Result<Self> {
        let timestamp = Local::now().format("%Y-%m-%dT%H-%M-%S").to_string();
        let session_dir = root.join(&timestamp);
        fs::create_dir_all(&session_dir)?;
        debug!(dir = %session_dir.display(), "Created diagnostics directory");
        Ok(Self {
            session_dir,
            timestamp,
            seq: Arc::new(AtomicU32::new(1)),
        })
    }

    pub fn session_dir(&self) -> &Path {
        &self.session_dir
    }

    pub fn timestamp(&self) -> &str {
        &self.timestamp
    }

    /// Writes an artifact and returns its path.
    ///
    /// Never fails: a write error is logged and `None` returned so that
    /// diagnostics can't mask the failure being diagnosed.
    pub fn capture(&self, label: &str, artifact: &Artifact) -> Option<PathBuf> {
        let seq = self.seq.fetch_add(1, Ordering::Relaxed);
        let (extension, bytes) = match artifact {
            Artifact::Screenshot(png) => ("png", png.as_slice()),
            Artifact::Note(text) => ("txt", text.as_bytes()),
        };
        let path = self
            .session_dir
            .join(format!("{seq:03}-{}.{extension}", sanitize_label(label)));

        match fs::write(&path, bytes) {
            Ok(()) => {
                debug!(path = %path.display(), "Captured diagnostic artifact");
                Some(path)
            }
            Err(err) => {
                warn!(path = %path.display(), error = %err, "Failed to write diagnostic artifact");
                None
            }
        }
    }

    /// Lists captured artifacts, sorted by name.
    pub fn artifacts(&self) -> Vec<PathBuf> {
        let mut paths: Vec<PathBuf> = fs::read_dir(&self.session_dir)
            .map(|entries| {
                entries
                    .filter_map(Result::ok)
                    .map(|entry| entry.path())
                    .filter(|path| path.is_file())
                    .collect()
            })
            .unwrap_or_default();
        paths.sort();
        paths
    }

    /// Copies the session directory into `<reports_dir>/<timestamp>/`.
    pub fn archive_to(&self, reports_dir: &Path) -> std::io::Result<PathBuf> {
        let target = reports_dir.join(&self.timestamp);
        copy_dir_recursive(&self.session_dir, &target)?;
        debug!(from = %self.session_dir.display(), to = %target.display(), "Archived diagnostics");
        Ok(target)
    }
}

fn copy_dir_recursive(from: &Path, to: &Path) -> std::io::Result<()> {
    fs::create_dir_all(to)?;
    for entry in fs::read_dir(from)? {
        let entry = entry?;
        let dest = to.join(entry.file_name());
        if entry.file_type()?.is_dir() {
            copy_dir_recursive(&entry.path(), &dest)?;
        } else {
            fs::copy(entry.path(), dest)?;
        }
    }
    Ok(())
}
