// sitevault/src/backup/filter.rs
//
// Inclusion/exclusion rules for the archive builder. Rules are glob-like
// patterns matched against paths relative to the site root: `*` matches
// within one path segment, `**` across segments, `?` a single character.
// Exclusion wins over inclusion, and an empty include list means
// "everything". Excluding a directory excludes its whole subtree.
use anyhow::{Context, Result};
use regex::Regex;
use std::path::{Path, PathBuf};

pub struct ArchiveFilter {
    include: Vec<Regex>,
    exclude: Vec<Regex>,
    excluded_roots: Vec<PathBuf>,
}

/// Compiles one glob-like pattern into an anchored regex.
fn glob_to_regex(pattern: &str) -> Result<Regex> {
    let mut regex = String::from("^");
    let mut chars = pattern.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '*' => {
                if chars.peek() == Some(&'*') {
                    chars.next();
                    regex.push_str(".*");
                } else {
                    regex.push_str("[^/]*");
                }
            }
            '?' => regex.push_str("[^/]"),
            c if "\\.+()[]{}^$|".contains(c) => {
                regex.push('\\');
                regex.push(c);
            }
            c => regex.push(c),
        }
    }
    regex.push('$');

    Regex::new(&regex).with_context(|| format!("Invalid filter pattern: {}", pattern))
}

fn compile_all(patterns: &[String]) -> Result<Vec<Regex>> {
    patterns.iter().map(|p| glob_to_regex(p)).collect()
}

/// True if the pattern matches the path itself or any of its ancestors,
/// so that a rule naming a directory covers its subtree.
fn matches_path(regexes: &[Regex], rel: &Path) -> bool {
    let mut candidate = Some(rel);
    while let Some(path) = candidate {
        let text = path.to_string_lossy();
        if !text.is_empty() && regexes.iter().any(|re| re.is_match(&text)) {
            return true;
        }
        candidate = path.parent();
    }
    false
}

impl ArchiveFilter {
    pub fn new(include: &[String], exclude: &[String]) -> Result<Self> {
        Ok(ArchiveFilter {
            include: compile_all(include)?,
            exclude: compile_all(exclude)?,
            excluded_roots: Vec::new(),
        })
    }

    /// Unconditionally excludes a subtree, given relative to the site
    /// root. Used to keep the backup directory out of its own archive.
    pub fn exclude_subtree(&mut self, rel_root: &Path) {
        self.excluded_roots.push(rel_root.to_path_buf());
    }

    /// Whether a relative path belongs in the archive.
    pub fn allows(&self, rel: &Path) -> bool {
        if self.excluded_roots.iter().any(|root| rel.starts_with(root)) {
            return false;
        }
        if matches_path(&self.exclude, rel) {
            return false;
        }
        self.include.is_empty() || matches_path(&self.include, rel)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn filter(include: &[&str], exclude: &[&str]) -> ArchiveFilter {
        let include: Vec<String> = include.iter().map(|s| s.to_string()).collect();
        let exclude: Vec<String> = exclude.iter().map(|s| s.to_string()).collect();
        ArchiveFilter::new(&include, &exclude).unwrap()
    }

    #[test]
    fn test_star_stays_within_a_segment() {
        let f = filter(&[], &["*.log"]);
        assert!(!f.allows(Path::new("debug.log")));
        assert!(f.allows(Path::new("logs/debug.log")));
    }

    #[test]
    fn test_double_star_crosses_segments() {
        let f = filter(&[], &["**/*.log"]);
        assert!(!f.allows(Path::new("logs/debug.log")));
        assert!(!f.allows(Path::new("a/b/c/debug.log")));
        assert!(f.allows(Path::new("readme.txt")));
    }

    #[test]
    fn test_excluding_a_directory_excludes_its_subtree() {
        let f = filter(&[], &["cache"]);
        assert!(!f.allows(Path::new("cache")));
        assert!(!f.allows(Path::new("cache/pages/home.html")));
        assert!(f.allows(Path::new("content/cachednotes.txt")));
    }

    #[test]
    fn test_exclusion_beats_inclusion() {
        let f = filter(&["uploads/**"], &["uploads/tmp/**"]);
        assert!(f.allows(Path::new("uploads/2024/photo.jpg")));
        assert!(!f.allows(Path::new("uploads/tmp/scratch.jpg")));
        // Not matched by any include rule.
        assert!(!f.allows(Path::new("index.html")));
    }

    #[test]
    fn test_backup_dir_subtree_is_always_excluded() {
        let mut f = filter(&[], &[]);
        f.exclude_subtree(Path::new("backups"));
        assert!(!f.allows(Path::new("backups")));
        assert!(!f.allows(Path::new("backups/backup-example.com-1.tar.gz")));
        assert!(f.allows(Path::new("public/index.html")));
    }

    #[test]
    fn test_question_mark_matches_one_character() {
        let f = filter(&[], &["file.??"]);
        assert!(!f.allows(Path::new("file.sh")));
        assert!(f.allows(Path::new("file.html")));
    }
}
