use std::path::Path;

use glob::{glob_with, MatchOptions, Pattern};
use log::debug;

/// Glob pattern under construction. Literal text is kept alongside so an
/// unmatched pattern can fall back to it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GlobWord {
    pub text: String,
    pattern: String,
    has_glob: bool,
}

impl GlobWord {
    /// Text that may carry wildcards.
    pub fn push_active(&mut self, text: &str) {
        self.text.push_str(text);
        self.pattern.push_str(text);
        if text.contains(['*', '?', '[']) {
            self.has_glob = true;
        }
    }

    /// Text matched literally, such as quoted regions and expansion results.
    pub fn push_inert(&mut self, text: &str) {
        self.text.push_str(text);
        self.pattern.push_str(&Pattern::escape(text));
    }

    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }

    pub fn has_glob(&self) -> bool {
        self.has_glob
    }

    pub fn pattern(&self) -> &str {
        &self.pattern
    }
}

/// Expand `word` against `cwd`. Matches are sorted; relative patterns yield
/// paths relative to `cwd`. A pattern matching nothing expands to its literal
/// text.
pub fn expand_glob(word: GlobWord, cwd: &Path) -> Vec<String> {
    if !word.has_glob {
        return vec![word.text];
    }
    let relative = !Path::new(&word.text).is_absolute();
    let sep = std::path::MAIN_SEPARATOR;
    let cwd_text = cwd.to_string_lossy();
    let base = format!("{}{}", cwd_text.trim_end_matches(sep), sep);
    let full_pattern = if relative {
        format!("{}{}", Pattern::escape(&base), word.pattern)
    } else {
        word.pattern.clone()
    };
    let options = MatchOptions {
        case_sensitive: true,
        require_literal_separator: true,
        require_literal_leading_dot: true,
    };
    let paths = match glob_with(&full_pattern, options) {
        Ok(paths) => paths,
        Err(err) => {
            debug!("glob event=invalid pattern={} error={}", word.pattern, err);
            return vec![word.text];
        }
    };
    let mut matches: Vec<String> = paths
        .filter_map(Result::ok)
        .map(|path| {
            let text = path.to_string_lossy().into_owned();
            // Strip the cwd textually so prefixes such as `./` survive.
            match text.strip_prefix(base.as_str()) {
                Some(rest) if relative => rest.to_string(),
                _ => text,
            }
        })
        .collect();
    if matches.is_empty() {
        return vec![word.text];
    }
    matches.sort();
    matches
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use tempfile::tempdir;

    fn active(text: &str) -> GlobWord {
        let mut word = GlobWord::default();
        word.push_active(text);
        word
    }

    #[test]
    fn expand_glob_matches_and_sorts() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("b.rs"), "b").unwrap();
        std::fs::write(dir.path().join("a.rs"), "a").unwrap();
        std::fs::write(dir.path().join("c.txt"), "c").unwrap();
        std::fs::write(dir.path().join(".hidden.rs"), "h").unwrap();

        assert_eq!(expand_glob(active("*.rs"), dir.path()), vec!["a.rs", "b.rs"]);
        assert_eq!(expand_glob(active("?.txt"), dir.path()), vec!["c.txt"]);
        assert_eq!(expand_glob(active("[ab].rs"), dir.path()), vec!["a.rs", "b.rs"]);
    }

    #[test]
    fn unmatched_pattern_stays_literal() {
        let dir = tempdir().unwrap();
        assert_eq!(expand_glob(active("*.nothing"), dir.path()), vec!["*.nothing"]);
    }

    #[test]
    fn absolute_patterns_keep_full_paths() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("x.log"), "").unwrap();
        let pattern = format!("{}/*.log", dir.path().display());
        let expanded = expand_glob(active(&pattern), Path::new("/"));
        assert_eq!(expanded, vec![dir.path().join("x.log").display().to_string()]);
    }

    #[test]
    fn relative_prefix_is_preserved() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), "").unwrap();
        std::fs::write(dir.path().join("-x.txt"), "").unwrap();
        std::fs::create_dir(dir.path().join("sub")).unwrap();
        std::fs::write(dir.path().join("sub/b.txt"), "").unwrap();
        assert_eq!(
            expand_glob(active("./*.txt"), dir.path()),
            vec!["./-x.txt", "./a.txt"]
        );
        assert_eq!(expand_glob(active("sub/*.txt"), dir.path()), vec!["sub/b.txt"]);
        assert_eq!(expand_glob(active("sub/../a*"), dir.path()), vec!["sub/../a.txt"]);
    }

    #[test]
    fn inert_text_never_globs() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("a.rs"), "a").unwrap();
        let mut word = GlobWord::default();
        word.push_inert("*.rs");
        assert!(!word.has_glob());
        assert_eq!(expand_glob(word, dir.path()), vec!["*.rs"]);
    }

    #[test]
    fn mixed_word_escapes_inert_part() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("[x]1"), "").unwrap();
        std::fs::write(dir.path().join("x1"), "").unwrap();
        let mut word = GlobWord::default();
        word.push_inert("[x]");
        word.push_active("?");
        assert_eq!(expand_glob(word, dir.path()), vec!["[x]1"]);
    }

    proptest! {
        #[test]
        fn plain_text_is_not_a_glob(s in "[^*?\\[]{0,32}") {
            let word = active(&s);
            prop_assert!(!word.has_glob());
            prop_assert_eq!(word.pattern(), s.as_str());
        }

        #[test]
        fn wildcards_are_detected(prefix in "[a-z]{0,8}", suffix in "[a-z]{0,8}", wildcard in prop_oneof![Just('*'), Just('?')]) {
            let mut input = prefix;
            input.push(wildcard);
            input.push_str(&suffix);
            prop_assert!(active(&input).has_glob());
        }
    }
}
