//! Deciding what to answer for a request URI.
//!
//! [`RequestHandler::handle`] turns a URI into an [`Outcome`]. It never
//! fails: every problem with a single request, including unexpected I/O
//! errors, becomes one of the outcome variants.

use std::io;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use chrono::{DateTime, Local};
use log::debug;
use tokio::fs::File;

use crate::server::error::Error;

/// Reply body for URIs that try to climb out of the served root.
pub const TRAVERSAL_REJECTED: &str = "directory traversal rejected";

/// Reply body for URIs that name a directory.
pub const LISTING_DISABLED: &str = "directory listing disabled";

/// The directory whose contents are served.
///
/// The path is canonicalized once on construction and never changes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServedRoot {
    path: PathBuf,
}

impl ServedRoot {
    /// Opens `path` as the served root.
    ///
    /// Fails with [`Error::InvalidRoot`] if the path does not exist or is
    /// not a directory.
    pub fn new(path: impl AsRef<Path>) -> Result<Self, Error> {
        let path = path.as_ref();
        let canonical = std::fs::canonicalize(path)
            .map_err(|_| Error::InvalidRoot(path.to_path_buf()))?;
        if !canonical.is_dir() {
            return Err(Error::InvalidRoot(path.to_path_buf()));
        }
        Ok(Self { path: canonical })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether the file `name` exists directly inside the root.
    pub fn has_file(&self, name: &str) -> bool {
        self.path.join(name).is_file()
    }

    /// Joins a request path onto the root.
    ///
    /// Leading separators are dropped so the join can never re-root.
    /// Returns `None` for paths that carry a root or prefix component
    /// after that.
    fn resolve(&self, path: &str) -> Option<PathBuf> {
        let mut resolved = self.path.clone();
        for component in Path::new(path.trim_start_matches('/')).components() {
            match component {
                Component::Normal(part) => resolved.push(part),
                Component::CurDir => { }
                // Only possible as the last component since `../` is
                // rejected earlier, so this always names a directory.
                Component::ParentDir => resolved.push(".."),
                Component::RootDir | Component::Prefix(_) => return None,
            }
        }
        Some(resolved)
    }
}

/// What the transport knows about a request when handing it to the core.
#[derive(Debug, Clone)]
pub struct IncomingRequest {
    /// The request URI, percent-decoded, query string included.
    pub raw_uri: String,
    /// The client's IP address.
    pub remote_address: String,
    /// When the connection was accepted.
    pub received_at: DateTime<Local>,
}

/// The decided disposition of a single request.
#[derive(Debug)]
pub enum Outcome {
    Forbidden(&'static str),
    NotFound(String),
    FileServed(ServedFile),
    PlainText(String),
    InternalError(String),
}

/// An opened regular file below the served root.
#[derive(Debug)]
pub struct ServedFile {
    pub file: File,
    pub path: PathBuf,
    pub len: u64,
    pub mime: String,
}

/// Maps request URIs to outcomes against a served root.
///
/// Cloning is cheap; every connection task gets its own clone.
#[derive(Debug, Clone)]
pub struct RequestHandler {
    root: Arc<ServedRoot>,
}

impl RequestHandler {
    pub fn new(root: ServedRoot) -> Self {
        Self { root: Arc::new(root) }
    }

    pub fn root(&self) -> &ServedRoot {
        &self.root
    }

    /// Decides the outcome for `raw_uri`.
    ///
    /// Traversal and directory checks happen on the string before the
    /// filesystem is touched.
    pub async fn handle(&self, raw_uri: &str) -> Outcome {
        let uri = raw_uri.trim().replace('\\', "/");

        // Checking the full URI covers the path with and without the query.
        if uri.contains("../") {
            return Outcome::Forbidden(TRAVERSAL_REJECTED)
        }

        let path = match uri.split_once('?') {
            Some((path, _)) => path,
            None => uri.as_str(),
        };

        if path.ends_with('/') {
            return Outcome::Forbidden(LISTING_DISABLED)
        }

        let resolved = match self.root.resolve(path) {
            Some(resolved) => resolved,
            None => return Outcome::Forbidden(TRAVERSAL_REJECTED),
        };

        match tokio::fs::metadata(&resolved).await {
            Ok(meta) if meta.is_file() => Self::open(path, resolved).await,
            Ok(_) => Outcome::PlainText(path.to_string()),
            Err(err) if is_missing(&err) => Outcome::NotFound(path.to_string()),
            Err(err) => {
                Outcome::InternalError(format!("failed to inspect {path}: {err}"))
            }
        }
    }

    async fn open(path: &str, resolved: PathBuf) -> Outcome {
        let file = match File::open(&resolved).await {
            Ok(file) => file,
            // Removed between the metadata call and now.
            Err(err) if is_missing(&err) => {
                return Outcome::NotFound(path.to_string())
            }
            Err(err) => {
                return Outcome::InternalError(
                    format!("failed to open {path}: {err}")
                )
            }
        };
        let len = match file.metadata().await {
            Ok(meta) => meta.len(),
            Err(err) => {
                return Outcome::InternalError(
                    format!("failed to read size of {path}: {err}")
                )
            }
        };
        let mime = mime_guess::from_path(&resolved)
            .first_or_octet_stream()
            .to_string();
        debug!("serving {} ({len} bytes, {mime})", resolved.display());
        Outcome::FileServed(ServedFile { file, path: resolved, len, mime })
    }
}

fn is_missing(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::NotFound
            | io::ErrorKind::NotADirectory
            | io::ErrorKind::InvalidInput
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;

    fn fixture() -> (tempfile::TempDir, RequestHandler) {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("current-version.txt"), "1.0.0").unwrap();
        std::fs::create_dir(dir.path().join("subdir")).unwrap();
        std::fs::write(dir.path().join("subdir/app.zip"), b"PK\x03\x04").unwrap();
        let root = ServedRoot::new(dir.path()).unwrap();
        (dir, RequestHandler::new(root))
    }

    #[test]
    fn root_must_be_a_directory() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("plain.txt");
        std::fs::write(&file, "x").unwrap();

        assert!(matches!(ServedRoot::new(&file), Err(Error::InvalidRoot(_))));
        assert!(matches!(
            ServedRoot::new(dir.path().join("missing")),
            Err(Error::InvalidRoot(_))
        ));
        assert!(ServedRoot::new(dir.path()).unwrap().has_file("plain.txt"));
    }

    #[tokio::test]
    async fn serves_existing_file() {
        let (_dir, handler) = fixture();
        match handler.handle("/current-version.txt").await {
            Outcome::FileServed(mut served) => {
                assert_eq!(served.len, 5);
                assert_eq!(served.mime, "text/plain");
                assert!(served.path.starts_with(handler.root().path()));
                let mut content = String::new();
                served.file.read_to_string(&mut content).await.unwrap();
                assert_eq!(content, "1.0.0");
            }
            other => panic!("unexpected outcome {other:?}"),
        }
    }

    #[tokio::test]
    async fn unknown_extension_is_octet_stream() {
        let (dir, handler) = fixture();
        std::fs::write(dir.path().join("blob.unknownext"), b"\0\x01").unwrap();
        match handler.handle("/blob.unknownext").await {
            Outcome::FileServed(served) => {
                assert_eq!(served.mime, "application/octet-stream");
            }
            other => panic!("unexpected outcome {other:?}"),
        }
    }

    #[tokio::test]
    async fn query_string_is_ignored() {
        let (_dir, handler) = fixture();
        assert!(matches!(
            handler.handle("  /current-version.txt?t=12345  ").await,
            Outcome::FileServed(_)
        ));
    }

    #[tokio::test]
    async fn traversal_is_forbidden() {
        let (_dir, handler) = fixture();
        for uri in [
            "/../secret.txt",
            "/subdir/../current-version.txt",
            "/..\\secret.txt",
            "/current-version.txt?next=../x",
            "/a/b/../../current-version.txt",
        ] {
            assert!(
                matches!(
                    handler.handle(uri).await,
                    Outcome::Forbidden(TRAVERSAL_REJECTED)
                ),
                "{uri} was not rejected"
            );
        }
    }

    #[tokio::test]
    async fn directories_are_forbidden() {
        let (_dir, handler) = fixture();
        for uri in ["/", "/subdir/", "/missing-dir/", "/subdir\\"] {
            assert!(
                matches!(
                    handler.handle(uri).await,
                    Outcome::Forbidden(LISTING_DISABLED)
                ),
                "{uri} was not rejected"
            );
        }
    }

    #[tokio::test]
    async fn missing_file_is_not_found() {
        let (_dir, handler) = fixture();
        match handler.handle("/missing.txt").await {
            Outcome::NotFound(path) => assert_eq!(path, "/missing.txt"),
            other => panic!("unexpected outcome {other:?}"),
        }
    }

    #[tokio::test]
    async fn file_used_as_directory_is_not_found() {
        let (_dir, handler) = fixture();
        assert!(matches!(
            handler.handle("/current-version.txt/inner").await,
            Outcome::NotFound(_)
        ));
    }

    #[tokio::test]
    async fn directory_without_slash_echoes_path() {
        let (_dir, handler) = fixture();
        match handler.handle("/subdir").await {
            Outcome::PlainText(path) => assert_eq!(path, "/subdir"),
            other => panic!("unexpected outcome {other:?}"),
        }
    }

    #[tokio::test]
    async fn trailing_parent_component_never_serves_a_file() {
        let (_dir, handler) = fixture();
        for uri in ["/..", "/subdir/.."] {
            assert!(
                matches!(handler.handle(uri).await, Outcome::PlainText(_)),
                "{uri} did not resolve to a directory"
            );
        }
    }

    #[tokio::test]
    async fn redundant_separators_stay_inside_root() {
        let (_dir, handler) = fixture();
        assert!(matches!(
            handler.handle("//subdir//./app.zip").await,
            Outcome::FileServed(_)
        ));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn unreadable_file_is_internal_error() {
        use std::os::unix::fs::PermissionsExt;

        let (dir, handler) = fixture();
        let locked = dir.path().join("locked");
        std::fs::create_dir(&locked).unwrap();
        std::fs::write(locked.join("inner.txt"), "x").unwrap();
        std::fs::set_permissions(&locked, std::fs::Permissions::from_mode(0o000)).unwrap();

        // Permission bits do not bind root.
        let probe = std::fs::metadata(locked.join("inner.txt"));
        let outcome = handler.handle("/locked/inner.txt").await;
        std::fs::set_permissions(&locked, std::fs::Permissions::from_mode(0o755)).unwrap();

        if probe.is_err() {
            match outcome {
                Outcome::InternalError(detail) => {
                    assert!(detail.contains("/locked/inner.txt"));
                    assert!(!detail.contains(&*dir.path().to_string_lossy()));
                }
                other => panic!("unexpected outcome {other:?}"),
            }
        }
    }
}
