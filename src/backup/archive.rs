// sitevault/src/backup/archive.rs
//
// The archive container: one gzipped TAR per capture, holding the
// filtered site tree plus exactly one database dump entry. Entries are
// streamed one at a time in both directions so memory stays bounded
// regardless of site size.
use flate2::write::GzEncoder;
use flate2::Compression;
use flate2::read::GzDecoder;
use std::fs::{self, File};
use std::io::Read;
use std::path::{Path, PathBuf};
use tar::Builder;
use walkdir::WalkDir;

use crate::backup::filter::ArchiveFilter;
use crate::errors::{AppError, Result};

#[derive(Debug, Clone)]
pub struct BuildOutcome {
    pub archive_path: PathBuf,
    pub file_count: u64,
    pub dir_count: u64,
    pub total_bytes: u64,
}

/// Creates the site archive at `archive_dest_path`.
///
/// Walks `site_root`, streams every file the filter allows (relative
/// path, size and permission bits are recorded by the tar header), adds
/// directory entries for manifest purposes, and finally appends the
/// database dump produced earlier as the single `dump_entry_name` entry.
///
/// On any failure the partially written archive file is removed.
pub fn build_site_archive(
    site_root: &Path,
    archive_dest_path: &Path,
    filter: &ArchiveFilter,
    dump_path: &Path,
    dump_entry_name: &str,
) -> Result<BuildOutcome> {
    if !site_root.is_dir() {
        return Err(AppError::SourceUnreadable(site_root.to_path_buf()));
    }
    if let Some(parent) = archive_dest_path.parent() {
        if !parent.exists() {
            fs::create_dir_all(parent).map_err(|e| AppError::DestinationUnwritable {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }
    }

    println!(
        "Creating archive from {} at {}",
        site_root.display(),
        archive_dest_path.display()
    );

    let result = write_archive(site_root, archive_dest_path, filter, dump_path, dump_entry_name);

    if result.is_err() && archive_dest_path.exists() {
        let _ = fs::remove_file(archive_dest_path);
    }

    result
}

fn write_archive(
    site_root: &Path,
    archive_dest_path: &Path,
    filter: &ArchiveFilter,
    dump_path: &Path,
    dump_entry_name: &str,
) -> Result<BuildOutcome> {
    let archive_file =
        File::create(archive_dest_path).map_err(|e| AppError::DestinationUnwritable {
            path: archive_dest_path.to_path_buf(),
            source: e,
        })?;
    let enc = GzEncoder::new(archive_file, Compression::default());
    let mut tar_builder = Builder::new(enc);

    let mut file_count = 0u64;
    let mut dir_count = 0u64;
    let mut total_bytes = 0u64;

    let mut walker = WalkDir::new(site_root).into_iter();
    while let Some(entry) = walker.next() {
        let entry = entry.map_err(|_| AppError::SourceUnreadable(site_root.to_path_buf()))?;
        let path = entry.path();
        let name = path
            .strip_prefix(site_root)
            .map_err(|_| AppError::SourceUnreadable(path.to_path_buf()))?;

        if name.as_os_str().is_empty() {
            continue;
        }

        if !filter.allows(name) {
            if entry.file_type().is_dir() {
                walker.skip_current_dir();
            }
            continue;
        }

        if entry.file_type().is_dir() {
            tar_builder.append_dir(name, path)?;
            dir_count += 1;
        } else if entry.file_type().is_file() {
            tar_builder.append_path_with_name(path, name)?;
            file_count += 1;
            total_bytes += entry.metadata().map(|m| m.len()).unwrap_or(0);
        }
        // Symlinks and other special files are not captured.
    }

    tar_builder.append_path_with_name(dump_path, dump_entry_name)?;
    total_bytes += fs::metadata(dump_path).map(|m| m.len()).unwrap_or(0);

    let encoder = tar_builder.into_inner()?;
    encoder.finish()?;

    println!(
        "✓ Archive created: {} files, {} directories",
        file_count, dir_count
    );

    Ok(BuildOutcome {
        archive_path: archive_dest_path.to_path_buf(),
        file_count,
        dir_count,
        total_bytes,
    })
}

/// Dry-run sizing: walks and filters exactly like a real capture, but
/// writes nothing. Returns (bytes, file count) of the would-be archive
/// content, before compression and excluding the database dump.
pub fn estimate_site_archive(site_root: &Path, filter: &ArchiveFilter) -> Result<(u64, u64)> {
    if !site_root.is_dir() {
        return Err(AppError::SourceUnreadable(site_root.to_path_buf()));
    }

    let mut total_bytes = 0u64;
    let mut file_count = 0u64;

    let mut walker = WalkDir::new(site_root).into_iter();
    while let Some(entry) = walker.next() {
        let entry = entry.map_err(|_| AppError::SourceUnreadable(site_root.to_path_buf()))?;
        let name = match entry.path().strip_prefix(site_root) {
            Ok(name) if !name.as_os_str().is_empty() => name.to_path_buf(),
            _ => continue,
        };

        if !filter.allows(&name) {
            if entry.file_type().is_dir() {
                walker.skip_current_dir();
            }
            continue;
        }

        if entry.file_type().is_file() {
            file_count += 1;
            total_bytes += entry.metadata().map(|m| m.len()).unwrap_or(0);
        }
    }

    Ok((total_bytes, file_count))
}

/// Extracts every file entry except `skip_entry` onto `dest_root`,
/// overwriting existing files, recreating directories and preserving
/// recorded permission bits. Returns the number of unpacked entries.
///
/// Entry paths are unpacked with `unpack_in`, which rejects paths that
/// would escape `dest_root`.
pub fn extract_file_entries(
    archive_path: &Path,
    dest_root: &Path,
    skip_entry: &str,
) -> Result<u64> {
    if !archive_path.is_file() {
        return Err(AppError::ArchiveNotFound(
            archive_path.display().to_string(),
        ));
    }
    fs::create_dir_all(dest_root).map_err(|e| AppError::DestinationUnwritable {
        path: dest_root.to_path_buf(),
        source: e,
    })?;

    let archive_file = File::open(archive_path)?;
    let gz_decoder = GzDecoder::new(archive_file);
    let mut archive = tar::Archive::new(gz_decoder);
    archive.set_preserve_permissions(true);

    let mut unpacked = 0u64;
    for entry in archive.entries().map_err(|_| AppError::ArchiveCorrupt(archive_path.to_path_buf()))? {
        let mut entry =
            entry.map_err(|_| AppError::ArchiveCorrupt(archive_path.to_path_buf()))?;
        let entry_path = entry
            .path()
            .map_err(|_| AppError::ArchiveCorrupt(archive_path.to_path_buf()))?
            .into_owned();

        if entry_path.to_string_lossy() == skip_entry {
            continue;
        }

        entry
            .unpack_in(dest_root)
            .map_err(|e| AppError::DestinationUnwritable {
                path: dest_root.join(&entry_path),
                source: e,
            })?;
        unpacked += 1;
    }

    Ok(unpacked)
}

/// Reads the content of one named entry without extracting to disk.
pub fn read_entry_to_string(archive_path: &Path, entry_name: &str) -> Result<String> {
    if !archive_path.is_file() {
        return Err(AppError::ArchiveNotFound(
            archive_path.display().to_string(),
        ));
    }

    let archive_file = File::open(archive_path)?;
    let gz_decoder = GzDecoder::new(archive_file);
    let mut archive = tar::Archive::new(gz_decoder);

    for entry in archive.entries().map_err(|_| AppError::ArchiveCorrupt(archive_path.to_path_buf()))? {
        let mut entry =
            entry.map_err(|_| AppError::ArchiveCorrupt(archive_path.to_path_buf()))?;
        let entry_path = entry
            .path()
            .map_err(|_| AppError::ArchiveCorrupt(archive_path.to_path_buf()))?;

        if entry_path.to_string_lossy() == entry_name {
            let mut contents = String::new();
            entry.read_to_string(&mut contents)?;
            return Ok(contents);
        }
    }

    Err(AppError::ArchiveCorrupt(archive_path.to_path_buf()))
}

/// True for root-level entries following the dump naming scheme,
/// `<site id>.<timestamp>.sql`. Keeps a site's own stray root-level
/// .sql files from being mistaken for the dump.
fn looks_like_dump_entry(name: &str) -> bool {
    if name.contains('/') || !name.ends_with(".sql") {
        return false;
    }
    let parts: Vec<&str> = name.split('.').collect();
    parts.len() >= 3
        && parts[parts.len() - 2]
            .chars()
            .all(|c| c.is_ascii_digit() || c == '-')
        && !parts[parts.len() - 2].is_empty()
}

/// Finds the single database dump entry in an archive.
pub fn find_dump_entry(archive_path: &Path) -> Result<Option<String>> {
    if !archive_path.is_file() {
        return Err(AppError::ArchiveNotFound(
            archive_path.display().to_string(),
        ));
    }

    let archive_file = File::open(archive_path)?;
    let gz_decoder = GzDecoder::new(archive_file);
    let mut archive = tar::Archive::new(gz_decoder);

    for entry in archive.entries().map_err(|_| AppError::ArchiveCorrupt(archive_path.to_path_buf()))? {
        let entry =
            entry.map_err(|_| AppError::ArchiveCorrupt(archive_path.to_path_buf()))?;
        let entry_path = entry
            .path()
            .map_err(|_| AppError::ArchiveCorrupt(archive_path.to_path_buf()))?;
        let name = entry_path.to_string_lossy().into_owned();

        if looks_like_dump_entry(&name) {
            return Ok(Some(name));
        }
    }

    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    fn make_site(root: &Path) {
        fs::create_dir_all(root.join("public/css")).unwrap();
        fs::create_dir_all(root.join("cache")).unwrap();
        fs::write(root.join("public/index.html"), "<html>home</html>").unwrap();
        fs::write(root.join("public/css/site.css"), "body {}").unwrap();
        fs::write(root.join("cache/page.html"), "cached").unwrap();
        fs::write(root.join(".env"), "DB_NAME=site\n").unwrap();
    }

    const DUMP_ENTRY: &str = "example.com.20240801-120000.sql";

    fn make_dump(dir: &Path) -> PathBuf {
        let dump = dir.join(DUMP_ENTRY);
        let mut f = File::create(&dump).unwrap();
        writeln!(f, "-- sitevault database dump").unwrap();
        writeln!(f, "INSERT INTO \"site_settings\" (\"name\") VALUES ('siteurl');").unwrap();
        dump
    }

    fn entry_names(archive: &Path) -> Vec<String> {
        let file = File::open(archive).unwrap();
        let mut tar = tar::Archive::new(GzDecoder::new(file));
        tar.entries()
            .unwrap()
            .map(|e| e.unwrap().path().unwrap().to_string_lossy().into_owned())
            .collect()
    }

    #[test]
    fn test_build_excludes_filtered_paths_and_adds_one_dump() -> anyhow::Result<()> {
        let site = TempDir::new()?;
        let scratch = TempDir::new()?;
        make_site(site.path());
        let dump = make_dump(scratch.path());

        let mut filter = ArchiveFilter::new(&[], &["cache".to_string()])?;
        filter.exclude_subtree(Path::new("backups"));

        let dest = scratch.path().join("site.tar.gz");
        let outcome = build_site_archive(
            site.path(),
            &dest,
            &filter,
            &dump,
            DUMP_ENTRY,
        )?;

        assert_eq!(outcome.file_count, 3);
        let names = entry_names(&dest);
        assert!(names.contains(&"public/index.html".to_string()));
        assert!(names.contains(&".env".to_string()));
        assert!(!names.iter().any(|n| n.starts_with("cache")));

        let dumps: Vec<_> = names.iter().filter(|n| n.ends_with(".sql")).collect();
        assert_eq!(dumps.len(), 1);
        assert_eq!(find_dump_entry(&dest)?, Some(DUMP_ENTRY.to_string()));
        Ok(())
    }

    #[test]
    fn test_build_failure_removes_partial_archive() -> anyhow::Result<()> {
        let site = TempDir::new()?;
        let scratch = TempDir::new()?;
        make_site(site.path());

        let filter = ArchiveFilter::new(&[], &[])?;
        let dest = scratch.path().join("site.tar.gz");

        // Dump path does not exist, so the append fails mid-build.
        let missing_dump = scratch.path().join("missing.sql");
        let result = build_site_archive(site.path(), &dest, &filter, &missing_dump, "missing.sql");

        assert!(result.is_err());
        assert!(!dest.exists());
        Ok(())
    }

    #[test]
    fn test_estimate_counts_without_writing() -> anyhow::Result<()> {
        let site = TempDir::new()?;
        make_site(site.path());

        let filter = ArchiveFilter::new(&[], &["cache".to_string()])?;
        let (bytes, files) = estimate_site_archive(site.path(), &filter)?;

        assert_eq!(files, 3);
        assert!(bytes > 0);
        Ok(())
    }

    #[test]
    fn test_unreadable_source_root_aborts() {
        let filter = ArchiveFilter::new(&[], &[]).unwrap();
        let result = estimate_site_archive(Path::new("/definitely/not/a/real/root"), &filter);
        assert!(matches!(result, Err(AppError::SourceUnreadable(_))));
    }

    #[test]
    fn test_round_trip_restores_paths_and_sizes() -> anyhow::Result<()> {
        let site = TempDir::new()?;
        let scratch = TempDir::new()?;
        let restored = TempDir::new()?;
        make_site(site.path());
        let dump = make_dump(scratch.path());

        let filter = ArchiveFilter::new(&[], &[])?;
        let dest = scratch.path().join("site.tar.gz");
        build_site_archive(site.path(), &dest, &filter, &dump, DUMP_ENTRY)?;

        let unpacked = extract_file_entries(&dest, restored.path(), DUMP_ENTRY)?;
        assert!(unpacked > 0);

        for rel in ["public/index.html", "public/css/site.css", ".env", "cache/page.html"] {
            let original = fs::metadata(site.path().join(rel))?;
            let copy = fs::metadata(restored.path().join(rel))?;
            assert_eq!(original.len(), copy.len(), "size mismatch for {}", rel);
        }

        // The dump entry is readable in place and was not extracted.
        let sql = read_entry_to_string(&dest, DUMP_ENTRY)?;
        assert!(sql.contains("sitevault database dump"));
        assert!(!restored.path().join(DUMP_ENTRY).exists());
        Ok(())
    }
}
