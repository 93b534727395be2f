use crate::PlannerError;

/// Validates that a listed remote path stays inside the listing root.
///
/// Remote paths always use `/` regardless of the host platform. Rejects:
/// - Empty paths
/// - Absolute paths (leading `/`)
/// - Parent directory traversal (`..`)
/// - Backslashes, which no remote in the engine produces
pub fn validate_listing_path(path: &str) -> Result<(), PlannerError> {
    if path.is_empty() {
        return Err(PlannerError::InvalidPath("empty path".into()));
    }

    if path.starts_with('/') {
        return Err(PlannerError::InvalidPath(format!(
            "absolute path not allowed: {path}"
        )));
    }

    if path.contains('\\') {
        return Err(PlannerError::InvalidPath(format!(
            "backslash not allowed: {path}"
        )));
    }

    if path.split('/').any(|component| component == "..") {
        return Err(PlannerError::InvalidPath(format!(
            "parent directory traversal not allowed: {path}"
        )));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_empty_path() {
        assert!(validate_listing_path("").is_err());
    }

    #[test]
    fn rejects_parent_dir_traversal() {
        assert!(validate_listing_path("../../etc/passwd").is_err());
        assert!(validate_listing_path("sub/../../escape").is_err());
        assert!(validate_listing_path("..").is_err());
    }

    #[test]
    fn rejects_absolute_path() {
        assert!(validate_listing_path("/tmp/file").is_err());
    }

    #[test]
    fn rejects_backslashes() {
        assert!(validate_listing_path("C:\\Windows\\evil").is_err());
    }

    #[test]
    fn accepts_nested_and_dotted_paths() {
        assert!(validate_listing_path("photos/2024/img.bmp").is_ok());
        assert!(validate_listing_path(".config/settings.json").is_ok());
        assert!(validate_listing_path("archive..old/file").is_ok());
    }

    #[test]
    fn error_carries_reason() {
        let err = validate_listing_path("").unwrap_err();
        assert_eq!(err.reason(), cloudhaul_protocol::ErrorReason::InvalidPath);
    }
}
