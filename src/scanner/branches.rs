//! Branch scanning for the newest declared framework version.
//!
//! The scan walks every branch of a working copy, reads the framework
//! declaration from `composer.json` at that branch and keeps the branch with
//! the highest major version. Reading a branch means checking it out, so the
//! working copy is held through a [`RefGuard`] that puts the original HEAD
//! back when the scan ends, whichever way it ends.

use crate::error::AuditError;
use crate::models::{BranchSelection, VersionPosture};
use crate::scanner::manifest::{self, ComposerManifest};
use crate::version::{self, ParsedVersion};
use git2::build::CheckoutBuilder;
use git2::{BranchType, Oid, Repository};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, warn};

/// Branch prefixes for automation and throwaway work.
pub const DEFAULT_SKIP_PREFIXES: [&str; 4] = ["dependabot", "snyk", "experiment", "feature"];

/// Decides which branches are left out of the scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkipPolicy {
    prefixes: Vec<String>,
}

impl Default for SkipPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_SKIP_PREFIXES.iter().map(|p| p.to_string()).collect())
    }
}

impl SkipPolicy {
    pub fn new(prefixes: Vec<String>) -> Self {
        Self { prefixes }
    }

    pub fn should_skip(&self, branch: &str) -> bool {
        self.prefixes.iter().any(|prefix| branch.starts_with(prefix.as_str()))
    }
}

/// Pick the branch declaring the highest major version.
///
/// `read_declaration` is called once per branch that survives `policy`.
/// Errors from it are treated like a missing declaration. On equal majors the
/// branch seen first wins, so the result depends only on the input order.
pub fn select_newest<F>(
    branches: &[String],
    mut read_declaration: F,
    policy: &SkipPolicy,
) -> BranchSelection
where
    F: FnMut(&str) -> Result<Option<String>, AuditError>,
{
    let mut newest: Option<(ParsedVersion, &str, String)> = None;

    for branch in branches {
        if policy.should_skip(branch) {
            debug!("Skipping branch {}", branch);
            continue;
        }

        let declaration = match read_declaration(branch) {
            Ok(Some(declaration)) => declaration,
            Ok(None) => continue,
            Err(e) => {
                debug!("Could not read declaration on {}: {}", branch, e);
                continue;
            }
        };

        let Some(parsed) = version::parse(&declaration) else {
            debug!("Unparseable declaration {:?} on {}", declaration, branch);
            continue;
        };

        let is_newer = match newest {
            Some((current, _, _)) => parsed > current,
            None => true,
        };

        if is_newer {
            newest = Some((parsed, branch.as_str(), declaration));
        }
    }

    match newest {
        Some((_, branch, declaration)) => BranchSelection::found(branch, declaration),
        None => BranchSelection::none(),
    }
}

/// Produces the version posture of a checked-out repository.
///
/// Implementations check `cancel` between branches and give up once it is
/// set, leaving the working copy on its original HEAD.
pub trait BranchSource: Send + Sync {
    fn scan(&self, root: &Path, cancel: &AtomicBool) -> Result<VersionPosture, AuditError>;
}

/// Scans the branches of a git working copy by checking each one out.
#[derive(Debug, Clone)]
pub struct GitBranchScanner {
    framework_package: String,
    policy: SkipPolicy,
    sort_by_name: bool,
}

impl GitBranchScanner {
    pub fn new(
        framework_package: impl Into<String>,
        policy: SkipPolicy,
        sort_by_name: bool,
    ) -> Self {
        Self {
            framework_package: framework_package.into(),
            policy,
            sort_by_name,
        }
    }
}

impl BranchSource for GitBranchScanner {
    fn scan(&self, root: &Path, cancel: &AtomicBool) -> Result<VersionPosture, AuditError> {
        let repo = Repository::open(root)?;

        let default_manifest = ComposerManifest::load(root)?;
        let mut posture = VersionPosture {
            default_declaration: default_manifest
                .as_ref()
                .and_then(|m| m.constraint(&self.framework_package)),
            php_declaration: default_manifest.as_ref().and_then(|m| m.php_constraint()),
            ..Default::default()
        };

        let mut branches = list_branches(&repo)?;
        if branches.is_empty() {
            return Ok(posture);
        }

        if self.sort_by_name {
            branches.sort_by(|a, b| a.name.cmp(&b.name));
        }

        let names: Vec<String> = branches.iter().map(|b| b.name.clone()).collect();
        posture.branches = names
            .iter()
            .filter(|name| !self.policy.should_skip(name))
            .cloned()
            .collect();

        let references: HashMap<&str, &str> = branches
            .iter()
            .map(|b| (b.name.as_str(), b.reference.as_str()))
            .collect();

        let mut guard = RefGuard::capture(&repo)?;
        posture.newest = select_newest(
            &names,
            |name| {
                if cancel.load(Ordering::SeqCst) {
                    return Err(AuditError::Cancelled(format!("branch scan of {}", name)));
                }
                let reference = references
                    .get(name)
                    .ok_or_else(|| AuditError::NotFound(format!("branch {}", name)))?;
                guard.switch_to(reference)?;
                manifest::read_declaration(guard.workdir(), &self.framework_package)
            },
            &self.policy,
        );
        guard.restore()?;

        if cancel.load(Ordering::SeqCst) {
            return Err(AuditError::Cancelled(format!(
                "branch scan of {}",
                root.display()
            )));
        }
        Ok(posture)
    }
}

/// A branch and the reference that points at it.
#[derive(Debug, Clone)]
struct BranchRef {
    name: String,
    reference: String,
}

/// Remote-tracking branches with the remote name stripped. A fresh clone
/// only has its default branch locally, so local branches are used only
/// when there are no remote ones.
fn list_branches(repo: &Repository) -> Result<Vec<BranchRef>, AuditError> {
    let mut remote = collect_branches(repo, BranchType::Remote)?;
    for branch in &mut remote {
        if let Some((_, name)) = branch.name.split_once('/') {
            branch.name = name.to_string();
        }
    }
    remote.retain(|b| b.name != "HEAD");

    if !remote.is_empty() {
        return Ok(remote);
    }

    collect_branches(repo, BranchType::Local)
}

fn collect_branches(repo: &Repository, kind: BranchType) -> Result<Vec<BranchRef>, AuditError> {
    let mut branches = Vec::new();

    for entry in repo.branches(Some(kind))? {
        let (branch, _) = entry?;
        let name = branch.name()?.map(String::from);
        let reference = branch.get().name().map(String::from);

        if let (Some(name), Some(reference)) = (name, reference) {
            branches.push(BranchRef { name, reference });
        }
    }

    Ok(branches)
}

/// Where HEAD pointed before the scan started.
#[derive(Debug, Clone)]
enum OriginalHead {
    Branch(String),
    Detached(Oid),
}

/// Exclusive hold on a working copy's HEAD.
///
/// Created before the first checkout; the original HEAD is restored by
/// [`RefGuard::restore`] or, if that is never reached, on drop.
pub struct RefGuard<'r> {
    repo: &'r Repository,
    workdir: PathBuf,
    original: OriginalHead,
    current: Option<String>,
    restored: bool,
}

impl<'r> RefGuard<'r> {
    pub fn capture(repo: &'r Repository) -> Result<Self, AuditError> {
        let workdir = repo
            .workdir()
            .ok_or_else(|| {
                AuditError::SourceUnavailable("repository has no working tree".to_string())
            })?
            .to_path_buf();

        let head = repo.head()?;
        let original = match (head.is_branch(), head.name(), head.target()) {
            (true, Some(name), _) => OriginalHead::Branch(name.to_string()),
            (_, _, Some(oid)) => OriginalHead::Detached(oid),
            _ => {
                return Err(AuditError::SourceUnavailable(
                    "HEAD does not point at a commit".to_string(),
                ))
            }
        };

        Ok(Self {
            repo,
            workdir,
            original,
            current: None,
            restored: false,
        })
    }

    pub fn workdir(&self) -> &Path {
        &self.workdir
    }

    /// Check out `reference` with a detached HEAD.
    pub fn switch_to(&mut self, reference: &str) -> Result<(), AuditError> {
        let commit = self.repo.revparse_single(reference)?.peel_to_commit()?;

        self.repo
            .checkout_tree(commit.as_object(), Some(CheckoutBuilder::new().force()))?;
        self.repo.set_head_detached(commit.id())?;
        self.current = Some(reference.to_string());

        Ok(())
    }

    /// Put HEAD and the working tree back where they were.
    pub fn restore(mut self) -> Result<(), AuditError> {
        self.restored = true;
        self.reset()
    }

    fn reset(&mut self) -> Result<(), AuditError> {
        if self.current.is_none() {
            return Ok(());
        }

        match self.original {
            OriginalHead::Branch(ref name) => self.repo.set_head(name)?,
            OriginalHead::Detached(oid) => self.repo.set_head_detached(oid)?,
        }
        self.repo
            .checkout_head(Some(CheckoutBuilder::new().force()))?;
        self.current = None;

        Ok(())
    }
}

impl Drop for RefGuard<'_> {
    fn drop(&mut self) {
        if self.restored {
            return;
        }

        if let Err(e) = self.reset() {
            warn!(
                "Failed to restore original HEAD in {}: {}",
                self.workdir.display(),
                e
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use git2::{Commit, Signature};
    use tempfile::TempDir;

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    fn reader(
        declarations: &[(&str, &str)],
    ) -> impl FnMut(&str) -> Result<Option<String>, AuditError> {
        let map: HashMap<String, String> = declarations
            .iter()
            .map(|(b, d)| (b.to_string(), d.to_string()))
            .collect();
        move |branch| Ok(map.get(branch).cloned())
    }

    #[test]
    fn test_skip_policy() {
        let policy = SkipPolicy::default();
        assert!(policy.should_skip("dependabot/composer/laravel/framework-11.0"));
        assert!(policy.should_skip("snyk-fix-123"));
        assert!(policy.should_skip("experiment-octane"));
        assert!(policy.should_skip("feature/login"));
        assert!(!policy.should_skip("main"));
        assert!(!policy.should_skip("release-feature"));
    }

    #[test]
    fn test_selects_highest_non_skipped_branch() {
        let branches = names(&["main", "feature-x", "release-11"]);
        let result = select_newest(
            &branches,
            reader(&[("main", "^10.0"), ("feature-x", "^12.0"), ("release-11", "^11.0")]),
            &SkipPolicy::default(),
        );
        assert_eq!(result, BranchSelection::found("release-11", "^11.0"));
    }

    #[test]
    fn test_dependabot_branch_never_selected() {
        let branches = names(&["main", "dependabot/bump-foo"]);
        let result = select_newest(
            &branches,
            reader(&[("main", "^9.0"), ("dependabot/bump-foo", "^13.0")]),
            &SkipPolicy::default(),
        );
        assert_eq!(result.branch.as_deref(), Some("main"));
    }

    #[test]
    fn test_skipped_branches_are_never_read() {
        let branches = names(&["dependabot/bump-foo", "main"]);
        let mut reads = Vec::new();
        select_newest(
            &branches,
            |branch| {
                reads.push(branch.to_string());
                Ok(Some("^10.0".to_string()))
            },
            &SkipPolicy::default(),
        );
        assert_eq!(reads, vec!["main"]);
    }

    #[test]
    fn test_no_usable_declaration() {
        let branches = names(&["main", "develop", "docs"]);
        let result = select_newest(
            &branches,
            reader(&[("main", "dev-master"), ("develop", "")]),
            &SkipPolicy::default(),
        );
        assert!(result.is_none());
        assert_eq!(result.declaration, None);

        let result = select_newest(&[], reader(&[]), &SkipPolicy::default());
        assert_eq!(result, BranchSelection::none());
    }

    #[test]
    fn test_read_errors_are_swallowed() {
        let branches = names(&["broken", "main"]);
        let result = select_newest(
            &branches,
            |branch| {
                if branch == "broken" {
                    Err(AuditError::NotFound("composer.json".to_string()))
                } else {
                    Ok(Some("^10.0".to_string()))
                }
            },
            &SkipPolicy::default(),
        );
        assert_eq!(result, BranchSelection::found("main", "^10.0"));
    }

    #[test]
    fn test_ties_keep_first_seen() {
        let branches = names(&["main", "release"]);
        let result = select_newest(
            &branches,
            reader(&[("main", "^11.0"), ("release", "11.7.21")]),
            &SkipPolicy::default(),
        );
        assert_eq!(result, BranchSelection::found("main", "^11.0"));
    }

    #[test]
    fn test_compound_declaration_uses_lowest_alternative() {
        let branches = names(&["main", "release"]);
        let result = select_newest(
            &branches,
            reader(&[("main", "10.*|12.*"), ("release", "^11.0")]),
            &SkipPolicy::default(),
        );
        assert_eq!(result, BranchSelection::found("release", "^11.0"));
    }

    fn manifest(version: &str) -> String {
        format!(
            r#"{{"require": {{"php": "^8.2", "laravel/framework": "{}"}}}}"#,
            version
        )
    }

    fn commit_tree(
        repo: &Repository,
        reference: &str,
        parent: Option<&Commit<'_>>,
        composer: Option<&str>,
    ) -> Oid {
        let sig = Signature::now("Test", "test@example.com").unwrap();
        let mut builder = repo.treebuilder(None).unwrap();
        let readme = repo.blob(b"# app\n").unwrap();
        builder.insert("README.md", readme, 0o100644).unwrap();
        if let Some(content) = composer {
            let blob = repo.blob(content.as_bytes()).unwrap();
            builder.insert("composer.json", blob, 0o100644).unwrap();
        }
        let tree = repo.find_tree(builder.write().unwrap()).unwrap();
        let parents: Vec<&Commit<'_>> = parent.into_iter().collect();
        repo.commit(Some(reference), &sig, &sig, "commit", &tree, &parents)
            .unwrap()
    }

    /// A bare "origin" with several branches, cloned into a working copy.
    fn cloned_fixture() -> (TempDir, TempDir) {
        let origin_dir = TempDir::new().unwrap();
        let origin = Repository::init_bare(origin_dir.path()).unwrap();

        let main = commit_tree(&origin, "refs/heads/main", None, Some(&manifest("^10.0")));
        origin.set_head("refs/heads/main").unwrap();
        let main = origin.find_commit(main).unwrap();

        commit_tree(&origin, "refs/heads/release-11", Some(&main), Some(&manifest("^11.0")));
        commit_tree(&origin, "refs/heads/feature-x", Some(&main), Some(&manifest("^12.0")));
        commit_tree(
            &origin,
            "refs/heads/dependabot/composer/laravel-13",
            Some(&main),
            Some(&manifest("^13.0")),
        );
        commit_tree(&origin, "refs/heads/gh-pages", Some(&main), None);

        let work_dir = TempDir::new().unwrap();
        Repository::clone(origin_dir.path().to_str().unwrap(), work_dir.path()).unwrap();

        (origin_dir, work_dir)
    }

    #[test]
    fn test_git_scan_selects_branch_and_restores_head() {
        let (_origin, work) = cloned_fixture();
        let scanner = GitBranchScanner::new("laravel/framework", SkipPolicy::default(), true);

        let posture = scanner.scan(work.path(), &AtomicBool::new(false)).unwrap();

        assert_eq!(posture.newest, BranchSelection::found("release-11", "^11.0"));
        assert_eq!(posture.default_declaration.as_deref(), Some("^10.0"));
        assert_eq!(posture.php_declaration.as_deref(), Some("^8.2"));
        assert_eq!(posture.branches, names(&["gh-pages", "main", "release-11"]));

        let repo = Repository::open(work.path()).unwrap();
        let head = repo.head().unwrap();
        assert!(head.is_branch());
        assert_eq!(head.shorthand(), Some("main"));

        let content = std::fs::read_to_string(work.path().join("composer.json")).unwrap();
        assert!(content.contains("^10.0"));
    }

    #[test]
    fn test_cancelled_scan_restores_head() {
        let (_origin, work) = cloned_fixture();
        let scanner = GitBranchScanner::new("laravel/framework", SkipPolicy::default(), true);

        let err = scanner
            .scan(work.path(), &AtomicBool::new(true))
            .unwrap_err();
        assert!(matches!(err, AuditError::Cancelled(_)));

        let repo = Repository::open(work.path()).unwrap();
        assert_eq!(repo.head().unwrap().shorthand(), Some("main"));
        assert!(work.path().join("composer.json").exists());
    }

    #[test]
    fn test_guard_restores_on_drop() {
        let (_origin, work) = cloned_fixture();
        let repo = Repository::open(work.path()).unwrap();

        {
            let mut guard = RefGuard::capture(&repo).unwrap();
            guard.switch_to("refs/remotes/origin/gh-pages").unwrap();
            assert!(repo.head_detached().unwrap());
            assert!(!work.path().join("composer.json").exists());
        }

        assert_eq!(repo.head().unwrap().shorthand(), Some("main"));
        assert!(work.path().join("composer.json").exists());
    }

    #[test]
    fn test_local_branches_used_without_remote() {
        let dir = TempDir::new().unwrap();
        let repo = Repository::init(dir.path()).unwrap();
        let main = commit_tree(&repo, "refs/heads/main", None, Some(&manifest("^9.0")));
        repo.set_head("refs/heads/main").unwrap();
        repo.checkout_head(Some(CheckoutBuilder::new().force()))
            .unwrap();

        let branches = list_branches(&repo).unwrap();
        assert_eq!(branches.len(), 1);
        assert_eq!(branches[0].name, "main");
        assert_eq!(branches[0].reference, "refs/heads/main");

        let scanner = GitBranchScanner::new("laravel/framework", SkipPolicy::default(), false);
        let posture = scanner.scan(dir.path(), &AtomicBool::new(false)).unwrap();
        assert_eq!(posture.newest, BranchSelection::found("main", "^9.0"));
        assert_eq!(repo.head().unwrap().target(), Some(main));
    }
}
