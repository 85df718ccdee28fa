use std::path::Path;

/// Writes content to a file atomically: write to .tmp, then rename.
/// Rename is atomic on the same filesystem (POSIX guarantee).
pub fn atomic_write(path: &Path, content: &[u8]) -> std::io::Result<()> {
    let tmp_path = path.with_extension("tmp");
    std::fs::write(&tmp_path, content)?;
    std::fs::rename(&tmp_path, path)?;
    Ok(())
}

/// Atomic write with string content (convenience).
pub fn atomic_write_str(path: &Path, content: &str) -> std::io::Result<()> {
    atomic_write(path, content.as_bytes())
}

/// Sanitize a value for safe use in filenames.
/// Keeps alphanumeric, hyphens and underscores; replaces everything else.
pub fn sanitize_filename(value: &str) -> String {
    value
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// Collapse internal whitespace and lowercase, for canonical text fields.
pub fn normalize_text(value: &str) -> String {
    value
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_atomic_write_str_roundtrip() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("out.txt");
        atomic_write_str(&path, "hello").expect("write");
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "hello");
        // Overwrite goes through the same rename path
        atomic_write_str(&path, "world").expect("overwrite");
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "world");
    }

    #[test]
    fn test_sanitize_filename() {
        assert_eq!(sanitize_filename("loan_application_basics"), "loan_application_basics");
        assert_eq!(sanitize_filename("a/b c\\d"), "a_b_c_d");
        assert_eq!(sanitize_filename("2025-06-01T00:00:00Z"), "2025-06-01T00_00_00Z");
    }

    #[test]
    fn test_normalize_text() {
        assert_eq!(normalize_text("  Groceries   Weekly  "), "groceries weekly");
        assert_eq!(normalize_text(""), "");
    }
}
