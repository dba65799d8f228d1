use std::io::Write;
use std::path::Path;

/// Write a string to `path` atomically: write to a temp file in the same
/// directory, then rename over the target. Readers never observe a partial
/// file.
pub fn atomic_write_str(path: &Path, contents: &str) -> std::io::Result<()> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    tmp.write_all(contents.as_bytes())?;
    tmp.flush()?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

/// Convert a cache key to a filesystem-safe name.
///
/// Example: "home_employees_acme/Q3" → "home_employees_acme-Q3"
pub fn sanitize_key(key: &str) -> String {
    key.chars()
        .map(|c| {
            if c.is_alphanumeric() || c == '_' || c == '-' {
                c
            } else {
                '-'
            }
        })
        .collect()
}
