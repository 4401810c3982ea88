// sitevault/src/restore/verification.rs
//
// Structural checks over an archive, used before trusting it for a
// restore. None of these raise: every failure mode, including a missing
// file or a container that is not a gzipped tar at all, reduces to
// `false`. Handles are scope-bound and released on every exit path.
use flate2::read::GzDecoder;
use std::fs::File;
use std::path::Path;

/// Patterns never required to be present, regardless of caller input.
const SKIP_PATTERNS: [&str; 1] = [".htaccess"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchMode {
    /// Match against the entry's file name only.
    Name,
    /// Match against the entry's full relative path.
    Path,
}

/// Reads every entry name out of the container, or `None` when the
/// container is missing, unreadable or structurally inconsistent.
fn entry_names(archive_path: &Path) -> Option<Vec<String>> {
    let file = File::open(archive_path).ok()?;
    let mut archive = tar::Archive::new(GzDecoder::new(file));

    let mut names = Vec::new();
    for entry in archive.entries().ok()? {
        let entry = entry.ok()?;
        let path = entry.path().ok()?;
        names.push(path.to_string_lossy().into_owned());
    }
    Some(names)
}

/// Structural consistency check: every entry header must parse. Not a
/// checksum of entry contents.
pub fn is_valid(archive_path: &Path) -> bool {
    entry_names(archive_path).is_some()
}

/// Locates a single entry by exact name or path, without extracting.
pub fn contains(archive_path: &Path, needle: &str, mode: MatchMode) -> bool {
    let Some(names) = entry_names(archive_path) else {
        return false;
    };

    names.iter().any(|name| match mode {
        MatchMode::Path => name == needle,
        MatchMode::Name => Path::new(name)
            .file_name()
            .map(|f| f.to_string_lossy() == needle)
            .unwrap_or(false),
    })
}

/// True only when every pattern is found as a substring of some entry
/// name. Reserved patterns are skipped. A linear scan: entry counts are
/// bounded by the site's own file count.
pub fn contains_all(archive_path: &Path, patterns: &[String]) -> bool {
    if patterns.is_empty() {
        return is_valid(archive_path);
    }
    let Some(names) = entry_names(archive_path) else {
        return false;
    };

    for pattern in patterns {
        if SKIP_PATTERNS.contains(&pattern.as_str()) {
            continue;
        }
        if !names.iter().any(|name| name.contains(pattern.as_str())) {
            return false;
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::io::Write;
    use tempfile::TempDir;

    fn write_archive(dir: &Path, entries: &[(&str, &str)]) -> std::path::PathBuf {
        let path = dir.join("test.tar.gz");
        let file = File::create(&path).unwrap();
        let enc = GzEncoder::new(file, Compression::default());
        let mut builder = tar::Builder::new(enc);

        for (name, contents) in entries {
            let mut header = tar::Header::new_gnu();
            header.set_size(contents.len() as u64);
            header.set_mode(0o644);
            header.set_cksum();
            builder.append_data(&mut header, name, contents.as_bytes()).unwrap();
        }
        builder.into_inner().unwrap().finish().unwrap();
        path
    }

    #[test]
    fn test_is_valid_never_raises() {
        let dir = TempDir::new().unwrap();

        // Missing path.
        assert!(!is_valid(&dir.path().join("nope.tar.gz")));

        // Empty file.
        let empty = dir.path().join("empty.tar.gz");
        File::create(&empty).unwrap();
        assert!(!is_valid(&empty));

        // Not a container at all.
        let garbage = dir.path().join("garbage.tar.gz");
        let mut f = File::create(&garbage).unwrap();
        f.write_all(b"this is not a tarball").unwrap();
        assert!(!is_valid(&garbage));

        // A real archive.
        let valid = write_archive(dir.path(), &[("public/index.html", "<html>")]);
        assert!(is_valid(&valid));
    }

    #[test]
    fn test_contains_by_name_and_path() {
        let dir = TempDir::new().unwrap();
        let archive = write_archive(
            dir.path(),
            &[("public/index.html", "<html>"), ("example.com.sql", "--")],
        );

        assert!(contains(&archive, "public/index.html", MatchMode::Path));
        assert!(!contains(&archive, "index.html", MatchMode::Path));
        assert!(contains(&archive, "index.html", MatchMode::Name));
        assert!(contains(&archive, "example.com.sql", MatchMode::Name));
        assert!(!contains(&archive, "missing.txt", MatchMode::Name));
    }

    #[test]
    fn test_contains_all_requires_every_pattern() {
        let dir = TempDir::new().unwrap();
        let archive = write_archive(
            dir.path(),
            &[("public/index.html", "<html>"), ("uploads/a.jpg", "jpg")],
        );

        let found = vec!["public".to_string(), "uploads".to_string()];
        assert!(contains_all(&archive, &found));

        let missing = vec!["public".to_string(), "themes".to_string()];
        assert!(!contains_all(&archive, &missing));
    }

    #[test]
    fn test_contains_all_skips_reserved_pattern() {
        let dir = TempDir::new().unwrap();
        let archive = write_archive(dir.path(), &[("public/index.html", "<html>")]);

        // .htaccess is not in the archive but is always skipped.
        let patterns = vec![".htaccess".to_string(), "public".to_string()];
        assert!(contains_all(&archive, &patterns));
    }
}
