//! Working copies of remote repositories.
//!
//! A [`Checkout`] prepares a scratch directory, clones into it and removes it
//! again. [`CheckoutGuard`] ties the directory's lifetime to the analysis so
//! cleanup happens exactly once, whichever way the analysis ends. Blocking
//! work on the copy holds the guard through an `Arc`, so a working copy is
//! never removed while something still writes to it.

use crate::error::AuditError;
use git2::{Cred, FetchOptions, Progress, RemoteCallbacks};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tempfile::Builder;
use tracing::{debug, info, warn};

/// Creates, fills and removes local working copies.
pub trait Checkout: Send + Sync {
    /// Create an empty scratch directory for `repo_name`.
    fn prepare(&self, repo_name: &str) -> Result<PathBuf, AuditError>;

    /// Clone `url` into `target`, fetching every branch. Stops early once
    /// `cancel` is set.
    fn clone_repo(&self, url: &str, target: &Path, cancel: &AtomicBool) -> Result<(), AuditError>;

    /// Remove `path`. Removing a path that is already gone succeeds.
    fn cleanup(&self, path: &Path) -> Result<(), AuditError>;
}

/// [`Checkout`] using libgit2 and the system temp directory.
#[derive(Debug, Clone, Default)]
pub struct GitCheckout {
    token: Option<String>,
}

impl GitCheckout {
    pub fn new(token: Option<String>) -> Self {
        Self { token }
    }
}

impl Checkout for GitCheckout {
    fn prepare(&self, repo_name: &str) -> Result<PathBuf, AuditError> {
        let dir = Builder::new()
            .prefix(&format!("portfolio-audit-{}-", repo_name.replace('/', "-")))
            .tempdir()?;
        // The guard owns removal from here on.
        Ok(dir.keep())
    }

    fn clone_repo(&self, url: &str, target: &Path, cancel: &AtomicBool) -> Result<(), AuditError> {
        if cancel.load(Ordering::SeqCst) {
            return Err(AuditError::Cancelled(format!("clone of {}", url)));
        }
        info!("Cloning repository: {}", url);

        let mut callbacks = RemoteCallbacks::new();

        if let Some(token) = self.token.clone() {
            let attempts = AtomicUsize::new(0);
            callbacks.credentials(move |_url, _username, _allowed| {
                // libgit2 keeps asking while the credentials are rejected.
                if attempts.fetch_add(1, Ordering::SeqCst) > 0 {
                    return Err(git2::Error::from_str("authentication rejected"));
                }
                Cred::userpass_plaintext("x-access-token", &token)
            });
        }

        let received = Arc::new(AtomicUsize::new(0));
        let counter = received.clone();
        // Returning false aborts the transfer.
        callbacks.transfer_progress(move |progress: Progress<'_>| {
            counter.store(progress.received_objects(), Ordering::Relaxed);
            !cancel.load(Ordering::SeqCst)
        });

        let mut fetch_opts = FetchOptions::new();
        fetch_opts.remote_callbacks(callbacks);

        let mut builder = git2::build::RepoBuilder::new();
        builder.fetch_options(fetch_opts);
        if let Err(e) = builder.clone(url, target) {
            if cancel.load(Ordering::SeqCst) {
                return Err(AuditError::Cancelled(format!("clone of {}", url)));
            }
            return Err(e.into());
        }

        debug!(
            "Cloned {} objects into {}",
            received.load(Ordering::Relaxed),
            target.display()
        );
        Ok(())
    }

    fn cleanup(&self, path: &Path) -> Result<(), AuditError> {
        match std::fs::remove_dir_all(path) {
            Ok(()) => {
                debug!("Removed working copy {}", path.display());
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// Owns a prepared working copy until it is released or dropped.
///
/// The guard also carries the cancel flag that work on the copy polls.
pub struct CheckoutGuard {
    checkout: Arc<dyn Checkout>,
    path: Option<PathBuf>,
    cancelled: AtomicBool,
}

impl CheckoutGuard {
    pub fn prepare(checkout: Arc<dyn Checkout>, repo_name: &str) -> Result<Self, AuditError> {
        let path = checkout.prepare(repo_name)?;
        Ok(Self {
            checkout,
            path: Some(path),
            cancelled: AtomicBool::new(false),
        })
    }

    pub fn path(&self) -> &Path {
        self.path.as_deref().unwrap_or_else(|| Path::new(""))
    }

    /// Ask work still running on the copy to stop.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn cancel_flag(&self) -> &AtomicBool {
        &self.cancelled
    }

    /// Remove the working copy now and report the outcome.
    pub fn release(mut self) -> Result<(), AuditError> {
        match self.path.take() {
            Some(path) => self.checkout.cleanup(&path),
            None => Ok(()),
        }
    }
}

impl Drop for CheckoutGuard {
    fn drop(&mut self) {
        if let Some(path) = self.path.take() {
            if let Err(e) = self.checkout.cleanup(&path) {
                warn!("Failed to remove working copy {}: {}", path.display(), e);
            }
        }
    }
}

/// Turn a repository reference into `owner/name`.
///
/// Accepts `owner/name`, `https://github.com/owner/name[.git]` and
/// `git@github.com:owner/name[.git]`.
pub fn normalize_repo_ref(input: &str) -> Option<String> {
    let trimmed = input.trim().trim_end_matches('/');
    let trimmed = trimmed.strip_suffix(".git").unwrap_or(trimmed);

    let path = trimmed
        .strip_prefix("https://github.com/")
        .or_else(|| trimmed.strip_prefix("http://github.com/"))
        .or_else(|| trimmed.strip_prefix("git@github.com:"))
        .unwrap_or(trimmed);

    let mut parts = path.split('/');
    match (parts.next(), parts.next(), parts.next()) {
        (Some(owner), Some(name), None) if !owner.is_empty() && !name.is_empty() => {
            Some(format!("{}/{}", owner, name))
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use git2::{Repository, Signature};
    use std::sync::Mutex;
    use tempfile::TempDir;

    #[test]
    fn test_normalize_repo_ref() {
        assert_eq!(normalize_repo_ref("uni/timetable"), Some("uni/timetable".to_string()));
        assert_eq!(
            normalize_repo_ref("https://github.com/uni/timetable.git"),
            Some("uni/timetable".to_string())
        );
        assert_eq!(
            normalize_repo_ref("git@github.com:uni/timetable"),
            Some("uni/timetable".to_string())
        );
        assert_eq!(
            normalize_repo_ref("https://github.com/uni/timetable/"),
            Some("uni/timetable".to_string())
        );
    }

    #[test]
    fn test_normalize_repo_ref_invalid() {
        assert_eq!(normalize_repo_ref("timetable"), None);
        assert_eq!(normalize_repo_ref("https://gitlab.com/uni/timetable"), None);
        assert_eq!(normalize_repo_ref("uni/"), None);
    }

    #[test]
    fn test_prepare_and_cleanup() {
        let checkout = GitCheckout::default();
        let path = checkout.prepare("uni/timetable").unwrap();

        assert!(path.is_dir());
        assert!(path
            .file_name()
            .unwrap()
            .to_string_lossy()
            .starts_with("portfolio-audit-uni-timetable-"));

        checkout.cleanup(&path).unwrap();
        assert!(!path.exists());
        // Already gone is fine.
        checkout.cleanup(&path).unwrap();
    }

    #[test]
    fn test_clone_local_repository() {
        let origin_dir = TempDir::new().unwrap();
        let origin = Repository::init(origin_dir.path()).unwrap();
        std::fs::write(origin_dir.path().join("README.md"), "hello").unwrap();

        let mut index = origin.index().unwrap();
        index.add_path(Path::new("README.md")).unwrap();
        let tree_id = index.write_tree().unwrap();
        let tree = origin.find_tree(tree_id).unwrap();
        let sig = Signature::now("Test", "test@example.com").unwrap();
        origin
            .commit(Some("HEAD"), &sig, &sig, "init", &tree, &[])
            .unwrap();

        let checkout = GitCheckout::default();
        let target = checkout.prepare("uni/readme").unwrap();
        let url = origin_dir.path().to_string_lossy().to_string();

        checkout
            .clone_repo(&url, &target, &AtomicBool::new(false))
            .unwrap();
        assert!(target.join("README.md").is_file());

        checkout.cleanup(&target).unwrap();
    }

    #[test]
    fn test_cancelled_clone_does_not_start() {
        let checkout = GitCheckout::default();
        let target = checkout.prepare("uni/cancelled").unwrap();

        let err = checkout
            .clone_repo("/definitely/not/a/repository", &target, &AtomicBool::new(true))
            .unwrap_err();
        assert!(matches!(err, AuditError::Cancelled(_)));
        assert_eq!(std::fs::read_dir(&target).unwrap().count(), 0);

        checkout.cleanup(&target).unwrap();
    }

    #[test]
    fn test_clone_missing_source_fails() {
        let checkout = GitCheckout::default();
        let target = checkout.prepare("uni/missing").unwrap();

        let err = checkout
            .clone_repo("/definitely/not/a/repository", &target, &AtomicBool::new(false))
            .unwrap_err();
        assert!(matches!(err, AuditError::Git(_)));

        checkout.cleanup(&target).unwrap();
    }

    #[derive(Default)]
    struct CountingCheckout {
        cleanups: Mutex<Vec<PathBuf>>,
    }

    impl Checkout for CountingCheckout {
        fn prepare(&self, repo_name: &str) -> Result<PathBuf, AuditError> {
            Ok(PathBuf::from(format!("/tmp/{}", repo_name)))
        }

        fn clone_repo(
            &self,
            _url: &str,
            _target: &Path,
            _cancel: &AtomicBool,
        ) -> Result<(), AuditError> {
            Ok(())
        }

        fn cleanup(&self, path: &Path) -> Result<(), AuditError> {
            self.cleanups.lock().unwrap().push(path.to_path_buf());
            Ok(())
        }
    }

    #[test]
    fn test_guard_cleans_up_once_on_release() {
        let checkout = Arc::new(CountingCheckout::default());
        let guard = CheckoutGuard::prepare(checkout.clone(), "a").unwrap();
        assert_eq!(guard.path(), Path::new("/tmp/a"));

        guard.release().unwrap();
        assert_eq!(checkout.cleanups.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_guard_cleans_up_on_drop() {
        let checkout = Arc::new(CountingCheckout::default());
        {
            let _guard = CheckoutGuard::prepare(checkout.clone(), "b").unwrap();
        }
        assert_eq!(
            *checkout.cleanups.lock().unwrap(),
            vec![PathBuf::from("/tmp/b")]
        );
    }

    #[test]
    fn test_shared_guard_cleans_up_when_last_holder_drops() {
        let checkout = Arc::new(CountingCheckout::default());
        let guard = Arc::new(CheckoutGuard::prepare(checkout.clone(), "c").unwrap());
        let worker = guard.clone();

        guard.cancel();
        drop(guard);
        assert!(checkout.cleanups.lock().unwrap().is_empty());
        assert!(worker.cancel_flag().load(Ordering::SeqCst));

        drop(worker);
        assert_eq!(
            *checkout.cleanups.lock().unwrap(),
            vec![PathBuf::from("/tmp/c")]
        );
    }
}
