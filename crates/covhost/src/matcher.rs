//! Pattern matching for types and assemblies.

use covhost_store::CoverageStore;
use regex::Regex;
use tracing::debug;

use crate::ConfigError;
use crate::config::ASSEMBLY_DIRECTIVE;

/// Decides which types and assemblies get instrumented.
///
/// A pattern is either a regular expression over full type names or an
/// `assembly:NAME` directive instrumenting every type of the assembly with
/// simple name `NAME`.
#[derive(Debug, Default)]
pub struct PatternMatcher {
    types: Vec<Regex>,
    assemblies: Vec<String>,
}

impl PatternMatcher {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register every pattern, collecting the ones that were rejected.
    pub fn from_patterns(
        patterns: &[String],
        store: &dyn CoverageStore,
    ) -> (Self, Vec<ConfigError>) {
        let mut matcher = Self::new();
        let errors = patterns
            .iter()
            .enumerate()
            .filter_map(|(index, pattern)| matcher.register_pattern(pattern, index, store).err())
            .collect();
        (matcher, errors)
    }

    /// Register the pattern at position `index` of the configuration and
    /// save it to the session metadata.
    ///
    /// Type patterns are saved as `match:{index}`. Directives are saved
    /// once per distinct assembly as `match:{serial}`, the serial counting
    /// distinct directives from 1.
    pub fn register_pattern(
        &mut self,
        pattern: &str,
        index: usize,
        store: &dyn CoverageStore,
    ) -> Result<(), ConfigError> {
        if let Some(assembly) = pattern.strip_prefix(ASSEMBLY_DIRECTIVE) {
            if assembly.is_empty() {
                return Err(ConfigError::MissingAssemblyName { index });
            }
            if !self.is_whole_assembly(assembly) {
                self.assemblies.push(assembly.to_string());
                store.save_meta(&meta_key(self.assemblies.len()), pattern)?;
                debug!(assembly, "registered whole-assembly directive");
            }
            return Ok(());
        }

        let regex =
            Regex::new(pattern).map_err(|source| ConfigError::InvalidPattern { index, source })?;
        store.save_meta(&meta_key(index), pattern)?;
        self.types.push(regex);
        debug!(pattern, "registered type pattern");
        Ok(())
    }

    /// Whether any type pattern matches `full_name`.
    #[must_use]
    pub fn matches_type(&self, full_name: &str) -> bool {
        self.types.iter().any(|rx| rx.is_match(full_name))
    }

    /// Whether the assembly with simple name `name` is instrumented whole.
    #[must_use]
    pub fn is_whole_assembly(&self, name: &str) -> bool {
        self.assemblies.iter().any(|a| a == name)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.types.is_empty() && self.assemblies.is_empty()
    }
}

fn meta_key(n: usize) -> String {
    format!("match:{n:03}")
}

#[cfg(test)]
mod tests {
    use covhost_store::MemoryStore;

    use super::*;

    fn patterns(list: &[&str]) -> Vec<String> {
        list.iter().map(ToString::to_string).collect()
    }

    #[test]
    fn test_type_patterns() {
        let store = MemoryStore::new();
        let (matcher, errors) =
            PatternMatcher::from_patterns(&patterns(&["^Foo$", "Demo\\..*"]), &store);
        assert!(errors.is_empty());
        assert!(matcher.matches_type("Foo"));
        assert!(!matcher.matches_type("FooBar"));
        assert!(matcher.matches_type("Demo.Widgets.Button"));
        assert!(!matcher.is_whole_assembly("Foo"));
        assert_eq!(store.meta("match:000").as_deref(), Some("^Foo$"));
        assert_eq!(store.meta("match:001").as_deref(), Some("Demo\\..*"));
    }

    #[test]
    fn test_assembly_directive_bypasses_regex() {
        let store = MemoryStore::new();
        let (matcher, errors) =
            PatternMatcher::from_patterns(&patterns(&["assembly:MyLib"]), &store);
        assert!(errors.is_empty());
        assert!(matcher.is_whole_assembly("MyLib"));
        assert!(!matcher.matches_type("MyLib"));
        assert_eq!(store.meta("match:001").as_deref(), Some("assembly:MyLib"));
    }

    #[test]
    fn test_duplicate_directive_saved_once() {
        let store = MemoryStore::new();
        let (matcher, _) = PatternMatcher::from_patterns(
            &patterns(&["assembly:A", "assembly:A", "assembly:B"]),
            &store,
        );
        assert!(matcher.is_whole_assembly("A"));
        assert!(matcher.is_whole_assembly("B"));
        assert_eq!(store.meta("match:001").as_deref(), Some("assembly:A"));
        assert_eq!(store.meta("match:002").as_deref(), Some("assembly:B"));
        assert_eq!(store.meta("match:003"), None);
    }

    #[test]
    fn test_malformed_patterns_rejected_individually() {
        let store = MemoryStore::new();
        let (matcher, errors) =
            PatternMatcher::from_patterns(&patterns(&["assembly:", "(", "^Ok$"]), &store);
        assert_eq!(errors.len(), 2);
        assert!(matches!(errors[0], ConfigError::MissingAssemblyName { index: 0 }));
        assert!(matches!(errors[1], ConfigError::InvalidPattern { index: 1, .. }));
        assert!(matcher.matches_type("Ok"));
        assert!(!matcher.is_whole_assembly(""));
        assert_eq!(store.meta("match:000"), None);
        assert_eq!(store.meta("match:002").as_deref(), Some("^Ok$"));
    }

    #[test]
    fn test_empty_matcher_matches_nothing() {
        let matcher = PatternMatcher::new();
        assert!(matcher.is_empty());
        assert!(!matcher.matches_type("Foo"));
    }
}
