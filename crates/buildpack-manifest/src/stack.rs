//! Stack-scoped manifest validation.
//!
//! A manifest is valid for a stack when at least one dependency is built for
//! it and every `default_versions` entry resolves to a concrete dependency
//! on that stack.

use std::cmp::Ordering;

use crate::{Dependency, Manifest, ManifestError, ManifestResult};

impl Manifest {
    /// Whether any dependency lists `stack` in its `cf_stacks`.
    pub fn has_stack(&self, stack: &str) -> bool {
        self.dependencies.iter().any(|d| d.supports_stack(stack))
    }

    /// Validate the manifest against a target stack.
    ///
    /// An empty stack means "any stack" and always passes.
    pub fn validate_stack(&self, stack: &str) -> ManifestResult<()> {
        if stack.is_empty() {
            return Ok(());
        }

        if !self.has_stack(stack) {
            return Err(ManifestError::StackNotFound(stack.to_string()));
        }

        for default in &self.default_versions {
            self.default_version(&default.name, stack)?;
        }

        Ok(())
    }

    /// Resolve the default version of `name` for `stack`.
    ///
    /// Returns the highest dependency version matching the declared default
    /// pattern. Fails when the default is missing, declared more than once,
    /// or matches nothing on the stack.
    pub fn default_version(&self, name: &str, stack: &str) -> ManifestResult<&Dependency> {
        let no_match = || ManifestError::NoDefaultVersion {
            name: name.to_string(),
            stack: stack.to_string(),
        };

        let mut defaults = self.default_versions.iter().filter(|d| d.name == name);
        let pattern = match (defaults.next(), defaults.next()) {
            (Some(d), None) => d.version.as_str(),
            _ => return Err(no_match()),
        };

        self.dependencies
            .iter()
            .filter(|d| d.name == name)
            .filter(|d| stack.is_empty() || d.supports_stack(stack))
            .filter(|d| version_matches(pattern, &d.version))
            .max_by(|a, b| compare_versions(&a.version, &b.version))
            .ok_or_else(no_match)
    }
}

/// Match a version against a pattern such as `2.4.x`, `2.x` or `2.4.1`.
///
/// `x` and `*` segments match anything; a pattern shorter than the version
/// matches only when its last segment is a wildcard.
pub fn version_matches(pattern: &str, version: &str) -> bool {
    let pattern: Vec<&str> = pattern.split('.').collect();
    let version: Vec<&str> = version.split('.').collect();

    for (i, want) in pattern.iter().enumerate() {
        let wildcard = *want == "x" || *want == "X" || *want == "*";
        if wildcard && i == pattern.len() - 1 {
            return version.len() >= pattern.len();
        }
        match version.get(i) {
            Some(have) if wildcard || have == want => {}
            _ => return false,
        }
    }

    pattern.len() == version.len()
}

/// Order versions segment by segment, numerically where both sides parse.
fn compare_versions(a: &str, b: &str) -> Ordering {
    let mut left = a.split(['.', '-', '_', '+']);
    let mut right = b.split(['.', '-', '_', '+']);

    loop {
        match (left.next(), right.next()) {
            (None, None) => return Ordering::Equal,
            (Some(_), None) => return Ordering::Greater,
            (None, Some(_)) => return Ordering::Less,
            (Some(l), Some(r)) => {
                let ord = match (l.parse::<u64>(), r.parse::<u64>()) {
                    (Ok(l), Ok(r)) => l.cmp(&r),
                    _ => l.cmp(r),
                };
                if ord != Ordering::Equal {
                    return ord;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manifest(yaml: &str) -> Manifest {
        serde_yaml::from_str(yaml).unwrap()
    }

    const MULTI_STACK: &str = r#"
language: ruby
default_versions:
  - name: ruby
    version: 2.7.x
dependencies:
  - name: ruby
    version: 2.7.1
    uri: https://example.com/ruby-2.7.1-fs3.tgz
    sha256: aa
    cf_stacks: [cflinuxfs3]
  - name: ruby
    version: 2.7.10
    uri: https://example.com/ruby-2.7.10-fs3.tgz
    sha256: bb
    cf_stacks: [cflinuxfs3]
  - name: ruby
    version: 3.1.0
    uri: https://example.com/ruby-3.1.0-fs4.tgz
    sha256: cc
    cf_stacks: [cflinuxfs4]
"#;

    #[test]
    fn test_empty_stack_always_valid() {
        let m = manifest(MULTI_STACK);
        assert!(m.validate_stack("").is_ok());
    }

    #[test]
    fn test_unknown_stack_rejected() {
        let m = manifest(MULTI_STACK);
        let err = m.validate_stack("windows2016").unwrap_err();
        assert_eq!(err.to_string(), "Stack `windows2016` not found in manifest");
    }

    #[test]
    fn test_default_version_resolves_highest_match() {
        let m = manifest(MULTI_STACK);
        let dep = m.default_version("ruby", "cflinuxfs3").unwrap();
        assert_eq!(dep.version, "2.7.10");
    }

    #[test]
    fn test_default_without_match_on_stack() {
        let m = manifest(MULTI_STACK);
        let err = m.validate_stack("cflinuxfs4").unwrap_err();
        assert_eq!(
            err.to_string(),
            "No matching default dependency `ruby` for stack `cflinuxfs4`"
        );
    }

    #[test]
    fn test_duplicate_default_is_an_error() {
        let m = manifest(
            r#"
language: go
default_versions:
  - { name: go, version: 1.x }
  - { name: go, version: 1.20.x }
dependencies:
  - { name: go, version: 1.20.1, uri: u, sha256: s, cf_stacks: [cflinuxfs3] }
"#,
        );
        assert!(m.default_version("go", "cflinuxfs3").is_err());
    }

    #[test]
    fn test_version_patterns() {
        assert!(version_matches("2.4.1", "2.4.1"));
        assert!(!version_matches("2.4.1", "2.4.10"));
        assert!(version_matches("2.4.x", "2.4.10"));
        assert!(!version_matches("2.4.x", "2.5.0"));
        assert!(version_matches("2.x", "2.9.3"));
        assert!(version_matches("*", "7"));
        assert!(!version_matches("2.4", "2.4.1"));
        assert!(!version_matches("2.4.x", "2.4"));
    }

    #[test]
    fn test_compare_versions_numeric() {
        assert_eq!(compare_versions("2.7.10", "2.7.9"), Ordering::Greater);
        assert_eq!(compare_versions("1.0", "1.0.0"), Ordering::Less);
        assert_eq!(compare_versions("1.8.0_202", "1.8.0_191"), Ordering::Greater);
    }
}
