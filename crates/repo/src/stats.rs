//! Whole-repository overview.

use std::collections::{BTreeMap, HashSet};
use std::path::Path;

use gitsmart_core::{RepoStats, Result};

use crate::RepoAccessor;

const LANGUAGES: &[(&str, &str)] = &[
    ("rs", "Rust"),
    ("py", "Python"),
    ("js", "JavaScript"),
    ("jsx", "React"),
    ("ts", "TypeScript"),
    ("tsx", "React/TypeScript"),
    ("go", "Go"),
    ("java", "Java"),
    ("kt", "Kotlin"),
    ("scala", "Scala"),
    ("swift", "Swift"),
    ("c", "C"),
    ("h", "C/C++"),
    ("cc", "C++"),
    ("cpp", "C++"),
    ("cxx", "C++"),
    ("cs", "C#"),
    ("rb", "Ruby"),
    ("php", "PHP"),
    ("sh", "Shell"),
    ("sql", "SQL"),
    ("html", "HTML"),
    ("css", "CSS"),
    ("scss", "SCSS"),
    ("vue", "Vue"),
    ("json", "JSON"),
    ("toml", "TOML"),
    ("yml", "YAML"),
    ("yaml", "YAML"),
    ("xml", "XML"),
    ("md", "Markdown"),
];

/// Language label for `path`, judged by extension only.
pub fn language_of(path: &str) -> &'static str {
    let ext = Path::new(path)
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase);
    match ext {
        Some(ext) => LANGUAGES
            .iter()
            .find(|(e, _)| *e == ext)
            .map(|(_, lang)| *lang)
            .unwrap_or("Other"),
        None if path.rsplit('/').next() == Some("Dockerfile") => "Docker",
        None => "Other",
    }
}

impl RepoAccessor {
    pub fn repo_stats(&self) -> Result<RepoStats> {
        let current_branch = self.current_branch()?;
        let head = match self.current_head() {
            Ok(head) => head,
            Err(err) if err.is_not_found() => {
                return Ok(RepoStats {
                    current_branch,
                    ..RepoStats::default()
                });
            }
            Err(err) => return Err(err),
        };

        self.with_repo(|repo| {
            let mut revwalk = repo.revwalk()?;
            revwalk.push(git2::Oid::from_str(&head)?)?;

            let mut commit_count = 0usize;
            let mut contributors = HashSet::new();
            let mut oldest = i64::MAX;
            let mut newest = i64::MIN;
            for oid in revwalk {
                let commit = repo.find_commit(oid?)?;
                commit_count += 1;
                contributors.insert(commit.author().email().unwrap_or("").to_string());
                let secs = commit.time().seconds();
                oldest = oldest.min(secs);
                newest = newest.max(secs);
            }

            let tree = repo.find_commit(git2::Oid::from_str(&head)?)?.tree()?;
            let mut languages: BTreeMap<String, usize> = BTreeMap::new();
            let mut file_count = 0usize;
            tree.walk(git2::TreeWalkMode::PreOrder, |dir, entry| {
                if entry.kind() == Some(git2::ObjectType::Blob) {
                    file_count += 1;
                    let path = format!("{dir}{}", entry.name().unwrap_or(""));
                    *languages.entry(language_of(&path).to_string()).or_default() += 1;
                }
                git2::TreeWalkResult::Ok
            })?;

            // Max count wins; BTreeMap order breaks ties alphabetically.
            let primary_language = languages
                .iter()
                .filter(|(lang, _)| lang.as_str() != "Other")
                .fold(None::<(&String, usize)>, |best, (lang, &n)| match best {
                    Some((_, m)) if m >= n => best,
                    _ => Some((lang, n)),
                })
                .map(|(lang, _)| lang.clone());

            Ok(RepoStats {
                commit_count,
                contributor_count: contributors.len(),
                age_days: (newest - oldest).max(0) / 86_400,
                current_branch: current_branch.clone(),
                file_count,
                languages,
                primary_language,
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::commit_as;
    use tempfile::TempDir;

    #[test]
    fn language_detection_by_extension() {
        assert_eq!(language_of("src/main.rs"), "Rust");
        assert_eq!(language_of("web/App.TSX"), "React/TypeScript");
        assert_eq!(language_of("deploy/Dockerfile"), "Docker");
        assert_eq!(language_of("LICENSE"), "Other");
    }

    #[test]
    fn stats_for_empty_repository() {
        let dir = TempDir::new().unwrap();
        git2::Repository::init(dir.path()).unwrap();
        let stats = RepoAccessor::discover(dir.path()).unwrap().repo_stats().unwrap();
        assert_eq!(stats.commit_count, 0);
        assert_eq!(stats.file_count, 0);
        assert!(stats.primary_language.is_none());
    }

    #[test]
    fn stats_summarise_history_and_tree() {
        let dir = TempDir::new().unwrap();
        let repo = git2::Repository::init(dir.path()).unwrap();
        commit_as(
            &repo,
            &[("src/main.rs", Some("fn main() {}")), ("src/lib.rs", Some("")), ("README.md", Some("hi"))],
            "Initial",
            0,
            "Ann",
            "ann@x.io",
        );
        commit_as(&repo, &[("scripts/run.py", Some("print()"))], "Add script", 3 * 86_400, "Bo", "bo@x.io");

        let stats = RepoAccessor::discover(dir.path()).unwrap().repo_stats().unwrap();
        assert_eq!(stats.commit_count, 2);
        assert_eq!(stats.contributor_count, 2);
        assert_eq!(stats.age_days, 3);
        assert_eq!(stats.file_count, 4);
        assert_eq!(stats.languages.get("Rust"), Some(&2));
        assert_eq!(stats.primary_language.as_deref(), Some("Rust"));
        assert_ne!(stats.current_branch, "unknown");
    }
}
