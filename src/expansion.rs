//! Word expansion: braces, parameters, command substitution, tilde, globbing.
//!
//! Quoting is carried per part from the lexer, so each step only has to ask
//! whether the part it is looking at was quoted. Text produced by an
//! expansion is never glob-active; unquoted parameter and substitution
//! results are split into fields on spaces, tabs and newlines.
use crate::context::ExecutionContext;
use crate::error::ShellError;
use crate::parse::{Part, Script, WordNode};

mod braces;
mod glob;

pub use braces::expand_braces;
pub use glob::{expand_glob, GlobWord};

type CommandSubst<'a> = &'a dyn Fn(&Script) -> Result<String, ShellError>;

pub struct ExpansionContext<'a> {
    pub ctx: &'a ExecutionContext,
    /// Runs a substitution script and returns its stdout without trailing
    /// newlines.
    pub command_subst: CommandSubst<'a>,
}

/// Expand command words into argv.
pub fn expand_words(words: &[WordNode], ectx: &ExpansionContext<'_>) -> Result<Vec<String>, ShellError> {
    let mut argv = Vec::new();
    for word in words {
        for word in brace_expand(word) {
            for field in expand_fields(&word, ectx)? {
                argv.extend(expand_glob(field, &ectx.ctx.cwd));
            }
        }
    }
    Ok(argv)
}

/// Expand a redirection target, which must come out as exactly one word.
pub fn expand_target(word: &WordNode, ectx: &ExpansionContext<'_>) -> Result<String, ShellError> {
    let mut targets = expand_words(std::slice::from_ref(word), ectx)?;
    if targets.len() != 1 {
        return Err(ShellError::usage("ambiguous redirect")
            .with_context(format!("target expanded to {} words", targets.len())));
    }
    Ok(targets.remove(0))
}

/// Expand an assignment value: no splitting, no globbing.
pub fn expand_assignment(word: &WordNode, ectx: &ExpansionContext<'_>) -> Result<String, ShellError> {
    let mut out = String::new();
    for (idx, part) in word.parts.iter().enumerate() {
        match part {
            Part::Literal { text, quoted: false } if idx == 0 => {
                match expand_tilde(text, ectx.ctx) {
                    Some((home, rest)) => {
                        out.push_str(&home);
                        out.push_str(rest);
                    }
                    None => out.push_str(text),
                }
            }
            Part::Literal { text, .. } => out.push_str(text),
            other => out.push_str(&part_value(other, ectx)?),
        }
    }
    Ok(out)
}

fn brace_expand(word: &WordNode) -> Vec<WordNode> {
    match word.parts.as_slice() {
        [Part::Literal { text, quoted: false }] if text.contains('{') => expand_braces(text)
            .into_iter()
            .map(|text| WordNode {
                parts: vec![Part::Literal {
                    text,
                    quoted: false,
                }],
            })
            .collect(),
        _ => vec![word.clone()],
    }
}

/// `~` or `~/...` at the start of an unquoted word.
/// Split a leading `~` or `~/...` into the home directory and the rest.
fn expand_tilde<'t>(text: &'t str, ctx: &ExecutionContext) -> Option<(String, &'t str)> {
    let rest = text.strip_prefix('~')?;
    if !(rest.is_empty() || rest.starts_with('/') || (cfg!(windows) && rest.starts_with('\\'))) {
        return None;
    }
    Some((ctx.home_dir()?, rest))
}

fn part_value(part: &Part, ectx: &ExpansionContext<'_>) -> Result<String, ShellError> {
    Ok(match part {
        Part::Literal { text, .. } => text.clone(),
        Part::Var { name, fallback, .. } => {
            let value = ectx.ctx.env.get(name).unwrap_or_default();
            match fallback {
                Some(fallback) if value.is_empty() => fallback.clone(),
                _ => value.to_string(),
            }
        }
        Part::LastStatus { .. } => ectx.ctx.last_status.to_string(),
        Part::Subst { script, .. } => (ectx.command_subst)(script)?,
    })
}

struct FieldBuilder {
    fields: Vec<GlobWord>,
    current: GlobWord,
    // A quoted region keeps an otherwise empty field alive (`""`).
    anchored: bool,
}

impl FieldBuilder {
    fn finish(&mut self) {
        if !self.current.is_empty() || self.anchored {
            self.fields.push(std::mem::take(&mut self.current));
        }
        self.anchored = false;
    }

    fn push_split(&mut self, value: &str) {
        let is_ifs = |c: char| matches!(c, ' ' | '\t' | '\n');
        if value.starts_with(is_ifs) {
            self.finish();
        }
        let mut pieces = value.split(is_ifs).filter(|s| !s.is_empty()).peekable();
        while let Some(piece) = pieces.next() {
            self.current.push_inert(piece);
            if pieces.peek().is_some() {
                self.finish();
            }
        }
        if value.ends_with(is_ifs) && !value.trim_matches(is_ifs).is_empty() {
            self.finish();
        }
    }
}

fn expand_fields(word: &WordNode, ectx: &ExpansionContext<'_>) -> Result<Vec<GlobWord>, ShellError> {
    let mut builder = FieldBuilder {
        fields: Vec::new(),
        current: GlobWord::default(),
        anchored: false,
    };
    for (idx, part) in word.parts.iter().enumerate() {
        match part {
            Part::Literal { text, quoted: false } => {
                // The home directory is literal; what follows `~/` still globs.
                match (idx == 0).then(|| expand_tilde(text, ectx.ctx)).flatten() {
                    Some((home, rest)) => {
                        builder.current.push_inert(&home);
                        builder.current.push_active(rest);
                    }
                    None => builder.current.push_active(text),
                }
            }
            Part::Literal { text, quoted: true } => {
                builder.anchored = true;
                builder.current.push_inert(text);
            }
            Part::Var { quoted, .. } | Part::LastStatus { quoted } | Part::Subst { quoted, .. } => {
                let value = part_value(part, ectx)?;
                if *quoted {
                    builder.anchored = true;
                    builder.current.push_inert(&value);
                } else {
                    builder.push_split(&value);
                }
            }
        }
    }
    builder.finish();
    Ok(builder.fields)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::EnvMap;
    use crate::parse::{parse_template, Connector};
    use crate::value::Template;
    use std::path::PathBuf;
    use tempfile::tempdir;

    fn context(cwd: PathBuf) -> ExecutionContext {
        let mut env = EnvMap::new();
        env.set("HOME", "/home/tester");
        env.set("USERPROFILE", "/home/tester");
        env.set("SPACED", "a  b\tc");
        env.set("EMPTY", "");
        ExecutionContext::new(cwd, env)
    }

    fn argv_of(source: &str, ctx: &ExecutionContext) -> Vec<String> {
        let parsed = parse_template(&Template::from(source)).unwrap();
        let (pipeline, connector) = &parsed.script.list.items[0];
        assert_eq!(*connector, Connector::Sequential);
        let subst = |_: &Script| Ok::<_, ShellError>("sub out".to_string());
        let ectx = ExpansionContext {
            ctx,
            command_subst: &subst,
        };
        expand_words(&pipeline.commands[0].argv, &ectx).unwrap()
    }

    #[test]
    fn variables_split_only_when_unquoted() {
        let ctx = context(PathBuf::from("/"));
        assert_eq!(argv_of("echo $SPACED", &ctx), vec!["echo", "a", "b", "c"]);
        assert_eq!(argv_of("echo \"$SPACED\"", &ctx), vec!["echo", "a  b\tc"]);
        assert_eq!(argv_of("echo x$SPACED", &ctx), vec!["echo", "xa", "b", "c"]);
    }

    #[test]
    fn unset_and_empty_variables() {
        let ctx = context(PathBuf::from("/"));
        assert_eq!(argv_of("echo $NOPE end", &ctx), vec!["echo", "end"]);
        assert_eq!(argv_of("echo \"$NOPE\" end", &ctx), vec!["echo", "", "end"]);
        assert_eq!(argv_of("echo ${EMPTY:-dflt}", &ctx), vec!["echo", "dflt"]);
        assert_eq!(argv_of("echo ${HOME:-dflt}", &ctx), vec!["echo", "/home/tester"]);
    }

    #[test]
    fn last_status_and_substitution() {
        let mut ctx = context(PathBuf::from("/"));
        ctx.last_status = 3;
        assert_eq!(argv_of("echo $? $(x)", &ctx), vec!["echo", "3", "sub", "out"]);
        assert_eq!(argv_of("echo \"$(x)\"", &ctx), vec!["echo", "sub out"]);
    }

    #[test]
    fn tilde_only_at_word_start() {
        let ctx = context(PathBuf::from("/"));
        assert_eq!(
            argv_of("echo ~ ~/docs a~ '~' ~user", &ctx),
            vec!["echo", "/home/tester", "/home/tester/docs", "a~", "~", "~user"]
        );
    }

    #[test]
    fn tilde_prefix_keeps_globbing_the_rest() {
        let home = tempdir().unwrap();
        std::fs::write(home.path().join("a.txt"), "").unwrap();
        std::fs::write(home.path().join("b.log"), "").unwrap();
        let mut ctx = context(PathBuf::from("/"));
        let home_text = home.path().display().to_string();
        ctx.env.set("HOME", home_text.clone());
        ctx.env.set("USERPROFILE", home_text.clone());
        assert_eq!(
            argv_of("ls ~/*.txt", &ctx),
            vec!["ls".to_string(), format!("{home_text}/a.txt")]
        );
        assert_eq!(
            argv_of("ls ~/*.none", &ctx),
            vec!["ls".to_string(), format!("{home_text}/*.none")]
        );
    }

    #[test]
    fn braces_only_for_plain_words() {
        let ctx = context(PathBuf::from("/"));
        assert_eq!(argv_of("echo a{b,c}", &ctx), vec!["echo", "ab", "ac"]);
        assert_eq!(argv_of("echo 'a{b,c}'", &ctx), vec!["echo", "a{b,c}"]);
    }

    #[test]
    fn globs_respect_quoting() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("one.txt"), "").unwrap();
        std::fs::write(dir.path().join("two.txt"), "").unwrap();
        let mut ctx = context(dir.path().to_path_buf());
        assert_eq!(argv_of("ls *.txt", &ctx), vec!["ls", "one.txt", "two.txt"]);
        assert_eq!(argv_of("ls '*.txt'", &ctx), vec!["ls", "*.txt"]);
        assert_eq!(argv_of("ls \"*\".txt", &ctx), vec!["ls", "*.txt"]);
        assert_eq!(argv_of("ls *.none", &ctx), vec!["ls", "*.none"]);
        ctx.env.set("PAT", "*.txt");
        assert_eq!(argv_of("ls $PAT", &ctx), vec!["ls", "*.txt"]);
    }

    #[test]
    fn assignment_values_are_not_split() {
        let ctx = context(PathBuf::from("/"));
        let parsed = parse_template(&Template::from("X=~/a$SPACED true")).unwrap();
        let assignment = &parsed.script.list.items[0].0.commands[0].assignments[0];
        let subst = |_: &Script| Ok::<_, ShellError>(String::new());
        let ectx = ExpansionContext {
            ctx: &ctx,
            command_subst: &subst,
        };
        assert_eq!(expand_assignment(&assignment.value, &ectx).unwrap(), "/home/tester/aa  b\tc");
    }

    #[test]
    fn ambiguous_redirect_target() {
        let ctx = context(PathBuf::from("/"));
        let parsed = parse_template(&Template::from("echo > $SPACED")).unwrap();
        let redirect = &parsed.script.list.items[0].0.commands[0].redirects[0];
        let crate::parse::RedirectTarget::Path(word) = &redirect.target else {
            panic!("expected path target");
        };
        let subst = |_: &Script| Ok::<_, ShellError>(String::new());
        let ectx = ExpansionContext {
            ctx: &ctx,
            command_subst: &subst,
        };
        assert!(expand_target(word, &ectx).is_err());
    }
}
