//! Alias-aware substance name matching.
//!
//! Source data is free text, so two names are considered the same substance
//! when any of the following holds, checked in order:
//!
//! 1. exact equality (after trimming),
//! 2. both names belong to the same alias group (canonical name or synonym),
//! 3. one name contains the other (`制附子` contains `附子`).
//!
//! The substring fallback trades precision for recall: a missed
//! contraindication is worse than a spurious warning.

use std::collections::HashMap;

/// Default alias groups: canonical name followed by its known synonyms and
/// processed forms.
const DEFAULT_ALIASES: &[(&str, &[&str])] = &[
    ("乌头", &["川乌", "附子", "草乌", "制川乌", "制附子"]),
    ("贝母", &["川贝", "浙贝", "川贝母", "浙贝母"]),
    ("瓜蒌", &["全瓜蒌", "瓜蒌皮", "瓜蒌仁", "天花粉"]),
    ("沙参", &["南沙参", "北沙参"]),
    ("芍药", &["赤芍", "白芍"]),
    ("朴硝", &["芒硝", "玄明粉"]),
    ("牵牛", &["牵牛子", "黑丑", "白丑"]),
    ("丁香", &["公丁香", "母丁香"]),
    ("犀角", &["广角", "水牛角"]),
    ("官桂", &["肉桂", "桂皮"]),
    ("石脂", &["赤石脂", "白石脂"]),
];

/// A canonical name and its synonyms.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AliasGroup {
    pub canonical: String,
    pub aliases: Vec<String>,
}

impl AliasGroup {
    fn contains(&self, name: &str) -> bool {
        self.canonical == name || self.aliases.iter().any(|a| a == name)
    }

    /// Canonical name followed by every alias.
    pub fn members(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.canonical.as_str()).chain(self.aliases.iter().map(String::as_str))
    }
}

/// Decides whether two substance names refer to the same thing.
#[derive(Debug, Clone)]
pub struct NameMatcher {
    groups: Vec<AliasGroup>,
}

impl Default for NameMatcher {
    fn default() -> Self {
        let groups = DEFAULT_ALIASES
            .iter()
            .map(|(canonical, aliases)| AliasGroup {
                canonical: (*canonical).to_string(),
                aliases: aliases.iter().map(|a| (*a).to_string()).collect(),
            })
            .collect();
        Self { groups }
    }
}

impl NameMatcher {
    /// Build a matcher from an explicit alias table (canonical -> synonyms).
    ///
    /// Groups are sorted by canonical name so lookups are deterministic.
    #[must_use]
    pub fn from_table(table: HashMap<String, Vec<String>>) -> Self {
        let mut groups: Vec<AliasGroup> = table
            .into_iter()
            .map(|(canonical, aliases)| AliasGroup {
                canonical: canonical.trim().to_string(),
                aliases: aliases
                    .into_iter()
                    .map(|a| a.trim().to_string())
                    .filter(|a| !a.is_empty())
                    .collect(),
            })
            .filter(|g| !g.canonical.is_empty())
            .collect();
        groups.sort_by(|a, b| a.canonical.cmp(&b.canonical));
        Self { groups }
    }

    /// Alias groups known to this matcher.
    pub fn groups(&self) -> &[AliasGroup] {
        &self.groups
    }

    /// Returns `true` when `a` and `b` name the same substance.
    ///
    /// The relation is symmetric. Blank names never match anything.
    pub fn matches(&self, a: &str, b: &str) -> bool {
        let (a, b) = (a.trim(), b.trim());
        if a.is_empty() || b.is_empty() {
            return false;
        }
        a == b || self.same_group(a, b) || a.contains(b) || b.contains(a)
    }

    fn same_group(&self, a: &str, b: &str) -> bool {
        self.groups.iter().any(|g| g.contains(a) && g.contains(b))
    }

    /// Alias group that `name` belongs to, if any.
    pub fn group_of(&self, name: &str) -> Option<&AliasGroup> {
        let name = name.trim();
        self.groups.iter().find(|g| g.contains(name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exact_match() {
        let m = NameMatcher::default();
        assert!(m.matches("甘草", "甘草"));
        assert!(m.matches(" 甘草", "甘草 "));
        assert!(!m.matches("甘草", "甘遂"));
    }

    #[test]
    fn test_alias_group_is_symmetric() {
        let m = NameMatcher::default();
        for group in m.groups() {
            let members: Vec<&str> = group.members().collect();
            for a in &members {
                for b in &members {
                    assert!(m.matches(a, b), "{a} should match {b}");
                    assert_eq!(m.matches(a, b), m.matches(b, a));
                }
            }
        }
    }

    #[test]
    fn test_aliases_across_group_members() {
        let m = NameMatcher::default();
        assert!(m.matches("川贝", "浙贝母"));
        assert!(m.matches("附子", "乌头"));
        assert!(m.matches("白芍", "赤芍"));
        assert!(!m.matches("白芍", "川贝"));
    }

    #[test]
    fn test_substring_fallback() {
        let m = NameMatcher::default();
        assert!(m.matches("炙甘草", "甘草"));
        assert!(m.matches("甘草", "炙甘草"));
    }

    #[test]
    fn test_blank_names_never_match() {
        let m = NameMatcher::default();
        assert!(!m.matches("", "甘草"));
        assert!(!m.matches("甘草", "  "));
        assert!(!m.matches("", ""));
    }

    #[test]
    fn test_custom_table_replaces_defaults() {
        let mut table = HashMap::new();
        table.insert("芍药".to_string(), vec!["白芍".to_string()]);
        let m = NameMatcher::from_table(table);
        assert!(m.matches("芍药", "白芍"));
        assert!(!m.matches("川贝", "浙贝"));
        assert_eq!(m.group_of("白芍").map(|g| g.canonical.as_str()), Some("芍药"));
    }
}
