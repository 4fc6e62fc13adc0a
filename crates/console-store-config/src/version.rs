//! Dot-separated numeric version comparison.

use std::cmp::Ordering;

/// Compare two versions of up to three dot-separated numeric components.
///
/// Missing or non-numeric components count as 0, so `"1.2"` equals
/// `"1.2.0"` and sorts below `"1.2.1"`.
#[must_use]
pub fn compare_versions(a: &str, b: &str) -> Ordering {
    components(a).cmp(&components(b))
}

fn components(version: &str) -> [u64; 3] {
    let mut parts = [0_u64; 3];
    for (slot, component) in parts.iter_mut().zip(version.split('.')) {
        *slot = component.trim().parse().unwrap_or(0);
    }
    parts
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_equal_versions() {
        assert_eq!(compare_versions("1.2.0", "1.2.0"), Ordering::Equal);
        assert_eq!(compare_versions("1.2", "1.2.0"), Ordering::Equal);
        assert_eq!(compare_versions("1", "1.0.0"), Ordering::Equal);
    }

    #[test]
    fn test_ordering() {
        assert_eq!(compare_versions("1.0.0", "1.0.1"), Ordering::Less);
        assert_eq!(compare_versions("1.10.0", "1.9.9"), Ordering::Greater);
        assert_eq!(compare_versions("2", "1.99.99"), Ordering::Greater);
    }

    #[test]
    fn test_non_numeric_components_count_as_zero() {
        assert_eq!(compare_versions("1.x.0", "1.0.0"), Ordering::Equal);
        assert_eq!(compare_versions("abc", "0"), Ordering::Equal);
    }

    #[test]
    fn test_extra_components_ignored() {
        assert_eq!(compare_versions("1.2.3.4", "1.2.3"), Ordering::Equal);
    }
}
