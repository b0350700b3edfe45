//! Session lifecycle: identity derivation, directory-tree ownership, and
//! the single chokepoint every artifact path is required to pass through.

use sha1::{Digest, Sha1};
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

/// Subdirectories created under a session root, mirroring the artifact
/// categories agents A-E write into (spec §6's filesystem layout).
const SUBDIRS: &[&str] = &[
    "pdf_extraction",
    "file_analysis",
    "image_analysis",
    "url_investigation",
    "report_generator",
    "logs",
];

/// Owns one investigation's output directory tree.
///
/// `session_id` is derived once, at `begin`, as `sha1(file) + "_" +
/// "YYYYMMDD_HHMMSS"` (spec §3) from the input file's contents and the
/// start time, so two runs over the same file never collide and a session
/// directory name is reproducible given the same `(file, started_at)` pair.
#[derive(Debug, Clone)]
pub struct Session {
    session_id: String,
    root: PathBuf,
}

impl Session {
    /// Start a new session: hash `input_path`'s contents, derive an id from
    /// that hash and `started_at`, and create the directory tree under
    /// `output_directory`.
    pub fn begin(
        input_path: &Path,
        output_directory: &Path,
        started_at: chrono::DateTime<chrono::Utc>,
    ) -> Result<Self> {
        Self::begin_with_id(input_path, output_directory, started_at, None)
    }

    /// Same as `begin`, but honors an explicit `session_id` when given
    /// (spec §4.2, P10). When `explicit_id` is `Some`, no hash/timestamp
    /// derivation happens at all and resuming against an existing session
    /// directory is a no-op beyond ensuring its subdirectories exist -
    /// `input_path` is still read to confirm the file is present and
    /// readable, matching `INPUT_ERROR`'s fail-fast contract.
    pub fn begin_with_id(
        input_path: &Path,
        output_directory: &Path,
        started_at: chrono::DateTime<chrono::Utc>,
        explicit_id: Option<&str>,
    ) -> Result<Self> {
        let bytes = std::fs::read(input_path)
            .map_err(|e| Error::Input(format!("cannot read {}: {e}", input_path.display())))?;

        let session_id = match explicit_id {
            Some(id) => id.to_string(),
            None => {
                let mut hasher = Sha1::new();
                hasher.update(&bytes);
                let digest = hasher.finalize();
                let full_hash = hex::encode(digest);
                format!("{full_hash}_{}", started_at.format("%Y%m%d_%H%M%S"))
            }
        };
        let root = output_directory.join(&session_id);

        std::fs::create_dir_all(&root)
            .map_err(|e| Error::Persistence(format!("cannot create session dir: {e}")))?;
        for sub in SUBDIRS {
            std::fs::create_dir_all(root.join(sub))
                .map_err(|e| Error::Persistence(format!("cannot create {sub}: {e}")))?;
        }

        Ok(Self { session_id, root })
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve a path under this session's root. This is the single
    /// chokepoint every file an agent writes must pass through: it rejects
    /// any relative component that would escape `root` (`..`) and any
    /// absolute path, so no agent or tool can accidentally (or adversarially,
    /// via a crafted filename from inside the PDF) write outside the session
    /// directory or into `/tmp`.
    pub fn path_for(&self, relative: impl AsRef<Path>) -> Result<PathBuf> {
        let relative = relative.as_ref();
        if relative.is_absolute() {
            return Err(Error::Persistence(format!(
                "refusing absolute artifact path: {}",
                relative.display()
            )));
        }
        if relative.components().any(|c| matches!(c, std::path::Component::ParentDir)) {
            return Err(Error::Persistence(format!(
                "refusing path escaping session root: {}",
                relative.display()
            )));
        }

        let resolved = self.root.join(relative);
        debug_assert!(
            resolved.starts_with(&self.root),
            "path_for must never resolve outside the session root"
        );
        Ok(resolved)
    }

    pub fn pdf_extraction_dir(&self) -> PathBuf {
        self.root.join("pdf_extraction")
    }

    pub fn file_analysis_dir(&self) -> PathBuf {
        self.root.join("file_analysis")
    }

    pub fn image_analysis_dir(&self) -> PathBuf {
        self.root.join("image_analysis")
    }

    pub fn url_investigation_dir(&self) -> PathBuf {
        self.root.join("url_investigation")
    }

    pub fn url_investigation_task_dir(&self, task_id: &str) -> PathBuf {
        self.root.join("url_investigation").join(format!("task_{task_id}"))
    }

    pub fn report_generator_dir(&self) -> PathBuf {
        self.root.join("report_generator")
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.root.join("logs")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn fixture_pdf(dir: &Path) -> PathBuf {
        let path = dir.join("sample.pdf");
        std::fs::write(&path, b"%PDF-1.4 fixture").unwrap();
        path
    }

    #[test]
    fn begin_creates_subdir_tree() {
        let tmp = tempfile::tempdir().unwrap();
        let input = fixture_pdf(tmp.path());
        let started_at = chrono::Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();

        let session = Session::begin(&input, tmp.path(), started_at).unwrap();

        for sub in SUBDIRS {
            assert!(session.root().join(sub).is_dir());
        }
    }

    #[test]
    fn session_id_matches_sha1_underscore_timestamp_format() {
        let tmp = tempfile::tempdir().unwrap();
        let input = fixture_pdf(tmp.path());
        let started_at = chrono::Utc.with_ymd_and_hms(2026, 1, 2, 3, 4, 5).unwrap();

        let session = Session::begin(&input, tmp.path(), started_at).unwrap();

        let full_hash = hex::encode(Sha1::digest(std::fs::read(&input).unwrap()));
        let expected = format!("{full_hash}_20260102_030405");
        assert_eq!(session.session_id(), expected);
    }

    #[test]
    fn same_file_and_timestamp_yields_same_session_id() {
        let tmp = tempfile::tempdir().unwrap();
        let input = fixture_pdf(tmp.path());
        let started_at = chrono::Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();

        let a = Session::begin(&input, tmp.path(), started_at).unwrap();
        std::fs::remove_dir_all(a.root()).unwrap();
        let b = Session::begin(&input, tmp.path(), started_at).unwrap();

        assert_eq!(a.session_id(), b.session_id());
    }

    #[test]
    fn explicit_session_id_is_idempotent_resume() {
        let tmp = tempfile::tempdir().unwrap();
        let input = fixture_pdf(tmp.path());
        let started_at = chrono::Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();

        let a = Session::begin_with_id(&input, tmp.path(), started_at, Some("resumed_session")).unwrap();
        assert_eq!(a.session_id(), "resumed_session");

        std::fs::write(a.root().join("pdf_extraction").join("marker.txt"), b"keep").unwrap();

        let later = chrono::Utc.with_ymd_and_hms(2026, 1, 2, 0, 0, 0).unwrap();
        let b = Session::begin_with_id(&input, tmp.path(), later, Some("resumed_session")).unwrap();

        assert_eq!(a.session_id(), b.session_id());
        assert_eq!(a.root(), b.root());
        assert!(b.root().join("pdf_extraction").join("marker.txt").is_file());
    }

    #[test]
    fn path_for_rejects_escape_attempts() {
        let tmp = tempfile::tempdir().unwrap();
        let input = fixture_pdf(tmp.path());
        let started_at = chrono::Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        let session = Session::begin(&input, tmp.path(), started_at).unwrap();

        assert!(session.path_for("../../etc/passwd").is_err());
        assert!(session.path_for("/etc/passwd").is_err());
        assert!(session.path_for("images/page_0.png").is_ok());
    }
}
