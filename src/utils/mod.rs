// sitevault/src/utils/mod.rs
use anyhow::{Context, Result};
use url::Url;

const UNITS: [&str; 9] = ["B", "KB", "MB", "GB", "TB", "PB", "EB", "ZB", "YB"];

/// Converts a raw byte count to a human-readable, 1024-based measure.
///
/// Formatting only. Everything inside the backup pipeline works in raw
/// byte counts.
pub fn bytes_to_human(bytes: u64, decimals: usize) -> String {
    let mut value = bytes as f64;
    let mut index = 0;

    while value >= 1024.0 && index < UNITS.len() - 1 {
        value /= 1024.0;
        index += 1;
    }

    format!("{:.*} {}", decimals, value, UNITS[index])
}

/// Builds a site identifier from the site URL, used in archive filenames.
///
/// The scheme is dropped and the host plus path segments are joined with
/// underscores, e.g. `https://example.com/blog` -> `example.com_blog`.
pub fn create_site_id(site_url: &str) -> Result<String> {
    let parsed = Url::parse(site_url)
        .with_context(|| format!("Invalid site URL for site id: {}", site_url))?;

    let host = parsed
        .host_str()
        .context("Site URL has no host; cannot build a site id")?;

    let mut parts = vec![host.to_string()];
    parts.extend(
        parsed
            .path()
            .split('/')
            .filter(|seg| !seg.is_empty())
            .map(|seg| seg.to_string()),
    );

    Ok(parts.join("_"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bytes_to_human_uses_binary_prefixes() {
        assert_eq!(bytes_to_human(0, 2), "0.00 B");
        assert_eq!(bytes_to_human(1023, 0), "1023 B");
        assert_eq!(bytes_to_human(1024, 2), "1.00 KB");
        assert_eq!(bytes_to_human(1536, 1), "1.5 KB");
        assert_eq!(bytes_to_human(5 * 1024 * 1024, 2), "5.00 MB");
    }

    #[test]
    fn test_create_site_id() -> anyhow::Result<()> {
        assert_eq!(create_site_id("https://example.com")?, "example.com");
        assert_eq!(create_site_id("https://example.com/blog/")?, "example.com_blog");
        assert!(create_site_id("not a url").is_err());
        Ok(())
    }
}
