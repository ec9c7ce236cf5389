//! Release version resolution from the latest source-control tag.

use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::OnceLock;

use abipack_util::process::run_command;

/// Source-control collaborator queried for the most recent release tag.
pub trait VersionControl: Send + Sync {
    /// The most recent tag reachable from the checked-out revision, if any.
    fn latest_tag(&self) -> Option<String>;
}

/// Reads tags with `git describe`.
#[derive(Debug, Clone)]
pub struct GitTags {
    repo: PathBuf,
}

impl GitTags {
    pub fn new(repo: &Path) -> Self {
        Self {
            repo: repo.to_path_buf(),
        }
    }
}

impl VersionControl for GitTags {
    fn latest_tag(&self) -> Option<String> {
        let mut cmd = Command::new("git");
        cmd.arg("-C")
            .arg(&self.repo)
            .args(["describe", "--tags", "--abbrev=0"]);
        match run_command(&mut cmd) {
            Ok(output) if output.success => {
                let tag = output.stdout.trim();
                (!tag.is_empty()).then(|| tag.to_owned())
            }
            Ok(output) => {
                tracing::debug!("no release tag found: {}", output.stderr.trim());
                None
            }
            Err(e) => {
                tracing::warn!("cannot query git tags: {e}");
                None
            }
        }
    }
}

/// The version shared by every artifact of one run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Version {
    pub raw_tag: Option<String>,
    pub resolved: String,
}

/// Derive a version from a raw tag.
///
/// Strips one leading `marker`, then surrounding whitespace. A missing tag, or one
/// that is empty once stripped, resolves to `fallback`.
pub fn resolve_tag(tag: Option<&str>, marker: &str, fallback: &str) -> Version {
    let resolved = tag
        .map(str::trim)
        .map(|t| t.strip_prefix(marker).unwrap_or(t).trim())
        .filter(|t| !t.is_empty())
        .unwrap_or(fallback);
    Version {
        raw_tag: tag.map(str::to_owned),
        resolved: resolved.to_owned(),
    }
}

/// Resolves the run's version once and hands out the cached result afterwards.
pub struct VersionResolver<'a> {
    vcs: &'a dyn VersionControl,
    marker: String,
    fallback: String,
    resolved: OnceLock<Version>,
}

impl<'a> VersionResolver<'a> {
    pub fn new(vcs: &'a dyn VersionControl, marker: &str, fallback: &str) -> Self {
        Self {
            vcs,
            marker: marker.to_owned(),
            fallback: fallback.to_owned(),
            resolved: OnceLock::new(),
        }
    }

    /// The run's version. The source-control collaborator is asked exactly once.
    pub fn resolve(&self) -> &Version {
        self.resolved.get_or_init(|| {
            let tag = self.vcs.latest_tag();
            let version = resolve_tag(tag.as_deref(), &self.marker, &self.fallback);
            match &version.raw_tag {
                Some(tag) => tracing::info!("version {} (from tag `{tag}`)", version.resolved),
                None => tracing::info!("version {} (no release tag)", version.resolved),
            }
            version
        })
    }
}

impl std::fmt::Debug for VersionResolver<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VersionResolver")
            .field("marker", &self.marker)
            .field("fallback", &self.fallback)
            .field("resolved", &self.resolved.get())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
pub(crate) mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    use super::*;

    /// Answers from a queue of tags and counts how often it was asked.
    pub(crate) struct ScriptedVcs {
        answers: Mutex<Vec<Option<String>>>,
        pub(crate) calls: AtomicUsize,
    }

    impl ScriptedVcs {
        pub(crate) fn new(answers: &[Option<&str>]) -> Self {
            Self {
                answers: Mutex::new(answers.iter().rev().map(|a| a.map(str::to_owned)).collect()),
                calls: AtomicUsize::new(0),
            }
        }
    }

    impl VersionControl for ScriptedVcs {
        fn latest_tag(&self) -> Option<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.answers.lock().unwrap().pop().flatten()
        }
    }

    #[test]
    fn strips_leading_marker() {
        let v = resolve_tag(Some("v2.3.1"), "v", "0.0");
        assert_eq!(v.resolved, "2.3.1");
        assert_eq!(v.raw_tag.as_deref(), Some("v2.3.1"));
    }

    #[test]
    fn no_tag_falls_back() {
        let v = resolve_tag(None, "v", "0.0");
        assert_eq!(v.resolved, "0.0");
        assert_eq!(v.raw_tag, None);
    }

    #[test]
    fn only_one_marker_is_stripped() {
        assert_eq!(resolve_tag(Some("vv1.0"), "v", "0.0").resolved, "v1.0");
    }

    #[test]
    fn unmarked_tag_is_kept() {
        assert_eq!(resolve_tag(Some("1.4.0"), "v", "0.0").resolved, "1.4.0");
    }

    #[test]
    fn bare_marker_falls_back() {
        let v = resolve_tag(Some("v"), "v", "0.0");
        assert_eq!(v.resolved, "0.0");
        assert_eq!(v.raw_tag.as_deref(), Some("v"));
    }

    #[test]
    fn resolver_asks_vcs_once() {
        let vcs = ScriptedVcs::new(&[Some("v2.3.1"), Some("v9.9.9")]);
        let resolver = VersionResolver::new(&vcs, "v", "0.0");

        let first = resolver.resolve().clone();
        let second = resolver.resolve().clone();

        assert_eq!(first.resolved, "2.3.1");
        assert_eq!(first, second);
        assert_eq!(vcs.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn git_without_repository_has_no_tag() {
        let tmp = tempfile::tempdir().unwrap();
        assert_eq!(GitTags::new(tmp.path()).latest_tag(), None);
    }

    mod proptests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn marked_tag_resolves_to_remainder(rest in "[0-9][0-9a-z.-]{0,12}") {
                let tag = format!("v{rest}");
                prop_assert_eq!(resolve_tag(Some(&tag), "v", "0.0").resolved, rest);
            }

            #[test]
            fn resolved_never_starts_with_single_marker(tag in "v?[0-9][0-9.]{0,8}") {
                let v = resolve_tag(Some(&tag), "v", "0.0");
                prop_assert!(!v.resolved.starts_with('v'));
            }

            #[test]
            fn resolve_is_idempotent(
                answers in proptest::collection::vec(proptest::option::of("v?[0-9]{1,3}\\.[0-9]{1,3}"), 1..5),
            ) {
                let refs: Vec<Option<&str>> = answers.iter().map(|a| a.as_deref()).collect();
                let vcs = ScriptedVcs::new(&refs);
                let resolver = VersionResolver::new(&vcs, "v", "0.0");
                let first = resolver.resolve().clone();
                for _ in 0..answers.len() {
                    prop_assert_eq!(resolver.resolve(), &first);
                }
                prop_assert_eq!(vcs.calls.load(Ordering::SeqCst), 1);
                let expected = resolve_tag(refs.first().copied().flatten(), "v", "0.0");
                prop_assert_eq!(first, expected);
            }
        }
    }
}
