use std::collections::BTreeSet;

/// Returns true if `s` is a valid tag: a lowercase letter followed by any
/// number of lowercase letters, digits or underscores.
pub fn is_tag(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) if first.is_ascii_lowercase() => {
            chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
        }
        _ => false,
    }
}

/// Parse a comma-separated tag list as sent in a DESCRIPTION.
/// Invalid tokens are dropped one by one; the rest of the list survives.
pub fn parse_tag_list(spec: &str) -> BTreeSet<String> {
    spec.split(',')
        .filter(|t| is_tag(t))
        .map(str::to_string)
        .collect()
}

/// Include/exclude predicate over a server's tag set, as sent in a GET.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TagFilter {
    pub include: BTreeSet<String>,
    pub exclude: BTreeSet<String>,
}

impl TagFilter {
    /// Parse a filter such as `open,sweden,-r6p0`.
    ///
    /// A `-` prefix marks an exclusion. A tag named in both sets is only
    /// included: asking for `foo,-foo` means "must have foo".
    pub fn parse(spec: &str) -> Self {
        let mut include = BTreeSet::new();
        let mut exclude = BTreeSet::new();

        for token in spec.split(',') {
            match token.strip_prefix('-') {
                Some(tag) if is_tag(tag) => {
                    exclude.insert(tag.to_string());
                }
                Some(_) => {}
                None if is_tag(token) => {
                    include.insert(token.to_string());
                }
                None => {}
            }
        }

        exclude.retain(|t| !include.contains(t));
        Self { include, exclude }
    }

    /// True if `tags` carries every included tag and none of the excluded ones.
    pub fn matches(&self, tags: &BTreeSet<String>) -> bool {
        self.include.is_subset(tags) && self.exclude.is_disjoint(tags)
    }

    pub fn is_empty(&self) -> bool {
        self.include.is_empty() && self.exclude.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set(tags: &[&str]) -> BTreeSet<String> {
        tags.iter().map(|t| t.to_string()).collect()
    }

    #[test]
    fn test_is_tag_accepts() {
        assert!(is_tag("open"));
        assert!(is_tag("r6p0"));
        assert!(is_tag("sweden_2"));
        assert!(is_tag("x"));
    }

    #[test]
    fn test_is_tag_rejects() {
        assert!(!is_tag("6abc"));
        assert!(!is_tag("Open"));
        assert!(!is_tag(""));
        assert!(!is_tag("_open"));
        assert!(!is_tag("open-source"));
        assert!(!is_tag("öppen"));
    }

    #[test]
    fn test_parse_tag_list_drops_invalid_tokens() {
        assert_eq!(parse_tag_list("open,Bad,sweden,,-x"), set(&["open", "sweden"]));
        assert!(parse_tag_list("").is_empty());
    }

    #[test]
    fn test_filter_parse() {
        let filter = TagFilter::parse("open,sweden,-r6p0");
        assert_eq!(filter.include, set(&["open", "sweden"]));
        assert_eq!(filter.exclude, set(&["r6p0"]));
    }

    #[test]
    fn test_filter_inclusion_wins_conflict() {
        let filter = TagFilter::parse("foo,-foo");
        assert_eq!(filter.include, set(&["foo"]));
        assert!(filter.exclude.is_empty());

        let filter = TagFilter::parse("-foo,foo,-bar");
        assert_eq!(filter.include, set(&["foo"]));
        assert_eq!(filter.exclude, set(&["bar"]));
    }

    #[test]
    fn test_filter_drops_invalid_tokens() {
        let filter = TagFilter::parse("-,Open,-9x,ok,");
        assert_eq!(filter.include, set(&["ok"]));
        assert!(filter.exclude.is_empty());
    }

    #[test]
    fn test_filter_matches() {
        let tags = set(&["open", "sweden"]);

        assert!(TagFilter::default().matches(&tags));
        assert!(TagFilter::parse("open").matches(&tags));
        assert!(TagFilter::parse("open,sweden").matches(&tags));
        assert!(!TagFilter::parse("open,norway").matches(&tags));
        assert!(!TagFilter::parse("-sweden").matches(&tags));
        assert!(TagFilter::parse("-norway").matches(&tags));
        assert!(TagFilter::parse("sweden,-sweden").matches(&tags));
        assert!(!TagFilter::parse("sweden,-sweden,-open").matches(&tags));
    }

    #[test]
    fn test_filter_matches_untagged_entry() {
        let none = BTreeSet::new();
        assert!(TagFilter::default().matches(&none));
        assert!(TagFilter::parse("-open").matches(&none));
        assert!(!TagFilter::parse("open").matches(&none));
    }
}
