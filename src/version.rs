//! Kubernetes semantic version comparison and upgrade-step validation.

use std::cmp::Ordering;

use semver::Version;

use crate::error::{KcoError, Result};

/// Versions before this one need the legacy upgrade script behavior.
pub const LEGACY_CUTOFF_VERSION: &str = "1.15.0";

/// Parse a Kubernetes semantic version, accepting an optional `v` prefix.
pub fn parse_semantic_version(version: &str) -> Result<Version> {
    let trimmed = version.trim();
    let trimmed = trimmed.strip_prefix('v').unwrap_or(trimmed);
    Version::parse(trimmed).map_err(|_| KcoError::InvalidVersion(version.to_string()))
}

/// Compare two semantic version strings.
pub fn compare_semantic_versions(a: &str, b: &str) -> Result<Ordering> {
    let a = parse_semantic_version(a)?;
    let b = parse_semantic_version(b)?;
    Ok(a.cmp_precedence(&b))
}

/// True exactly when `version` is strictly before 1.15.0.
pub fn is_legacy_version(version: &str) -> Result<bool> {
    Ok(compare_semantic_versions(version, LEGACY_CUTOFF_VERSION)? == Ordering::Less)
}

/// True when a node-reported version (e.g. `v1.20.0`) equals the target.
pub fn versions_match(reported: &str, target: &str) -> bool {
    compare_semantic_versions(reported, target).is_ok_and(|o| o == Ordering::Equal)
}

/// Validate a single upgrade step.
///
/// The target must be newer than the current version, share its major
/// version and be at most one minor version ahead.
pub fn check_upgrade_path(current: &str, target: &str) -> Result<()> {
    let curr = parse_semantic_version(current)?;
    let tgt = parse_semantic_version(target)?;

    if curr.major != tgt.major {
        return Err(KcoError::UpgradeNotPossible(
            "Cross-major version upgrades are not supported".to_string(),
        ));
    }

    if tgt.cmp_precedence(&curr) != Ordering::Greater {
        return Err(KcoError::UpgradeNotPossible(format!(
            "Target version {target} is not newer than current version {current}"
        )));
    }

    if tgt.minor > curr.minor + 1 {
        return Err(KcoError::UpgradeNotPossible(format!(
            "Target version {target} skips minor versions from {current} (one minor version at a time)"
        )));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compare_semantic_versions() {
        assert_eq!(
            compare_semantic_versions("1.20.0", "1.19.3").unwrap(),
            Ordering::Greater
        );
        assert_eq!(
            compare_semantic_versions("1.15.0", "1.15.0").unwrap(),
            Ordering::Equal
        );
        assert_eq!(
            compare_semantic_versions("1.9.11", "1.10.0").unwrap(),
            Ordering::Less
        );
        assert!(compare_semantic_versions("1.x", "1.10.0").is_err());
    }

    #[test]
    fn test_legacy_cutoff() {
        assert!(is_legacy_version("1.14.9").unwrap());
        assert!(!is_legacy_version("1.15.0").unwrap());
        assert!(!is_legacy_version("1.16.2").unwrap());
    }

    #[test]
    fn test_parse_accepts_v_prefix() {
        let v = parse_semantic_version("v1.20.0").unwrap();
        assert_eq!((v.major, v.minor, v.patch), (1, 20, 0));
        assert!(matches!(
            parse_semantic_version("invalid"),
            Err(KcoError::InvalidVersion(_))
        ));
    }

    #[test]
    fn test_versions_match() {
        assert!(versions_match("v1.20.0", "1.20.0"));
        assert!(versions_match(" v1.20.0\n", "1.20.0"));
        assert!(!versions_match("v1.19.4", "1.20.0"));
        assert!(!versions_match("", "1.20.0"));
    }

    #[test]
    fn test_check_upgrade_path() {
        assert!(check_upgrade_path("1.19.4", "1.20.0").is_ok());
        assert!(check_upgrade_path("1.20.0", "1.20.2").is_ok());

        // Downgrade and same version are rejected
        assert!(check_upgrade_path("1.20.0", "1.19.4").is_err());
        assert!(check_upgrade_path("1.20.0", "1.20.0").is_err());

        // Skipping a minor version is rejected
        assert!(check_upgrade_path("1.18.0", "1.20.0").is_err());

        assert!(matches!(
            check_upgrade_path("1.28.0", "2.0.0"),
            Err(KcoError::UpgradeNotPossible(_))
        ));
    }
}
