//! Template source to AST.
//!
//! Lexing and interpolation are interleaved: the tokenizer walks literal
//! fragments and records each host value as a `WordPart::Value` placeholder,
//! which the interpolator then resolves by value type. Placeholders are never
//! fed back through the tokenizer, so a host value cannot introduce syntax.
use crate::error::ShellError;
use crate::value::{RawHandle, ShellValue, Template};

mod command_parser;
mod interpolate;
mod redirection_parser;
mod tokenizer;

pub use command_parser::parse_tokens;
pub use interpolate::interpolate;
pub use tokenizer::tokenize;

/// One lexical unit of the command language.
#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    Word(Word),
    /// `NAME=value` written where a word starts.
    Assignment { name: String, value: Word },
    /// An interpolated stdio handle; indexes the template values.
    Handle(usize),
    Pipe,
    And,
    Or,
    Semicolon,
    Newline,
    Background,
    Bang,
    RedirectOut { append: bool },
    RedirectIn,
    RedirectErr { append: bool },
    RedirectBoth { append: bool },
    DupErrToOut,
    DupOutToErr,
    Eof,
}

impl Token {
    pub(crate) fn describe(&self) -> &'static str {
        match self {
            Token::Word(_) => "word",
            Token::Assignment { .. } => "assignment",
            Token::Handle(_) => "handle",
            Token::Pipe => "`|`",
            Token::And => "`&&`",
            Token::Or => "`||`",
            Token::Semicolon => "`;`",
            Token::Newline => "newline",
            Token::Background => "`&`",
            Token::Bang => "`!`",
            Token::RedirectOut { append: false } => "`>`",
            Token::RedirectOut { append: true } => "`>>`",
            Token::RedirectIn => "`<`",
            Token::RedirectErr { append: false } => "`2>`",
            Token::RedirectErr { append: true } => "`2>>`",
            Token::RedirectBoth { append: false } => "`&>`",
            Token::RedirectBoth { append: true } => "`&>>`",
            Token::DupErrToOut => "`2>&1`",
            Token::DupOutToErr => "`1>&2`",
            Token::Eof => "end of input",
        }
    }
}

/// A shell word before expansion; each part keeps its own quoting state.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Word {
    pub parts: Vec<WordPart>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum WordPart {
    Literal { text: String, quoted: bool },
    Var { name: String, fallback: Option<String>, quoted: bool },
    LastStatus { quoted: bool },
    Subst { tokens: Vec<Token>, quoted: bool },
    Value { index: usize, quoted: bool },
}

impl Word {
    pub fn literal(text: &str) -> Self {
        Word {
            parts: vec![WordPart::Literal {
                text: text.to_string(),
                quoted: false,
            }],
        }
    }

    /// The text of a word made only of literal parts.
    pub fn as_literal(&self) -> Option<String> {
        let mut out = String::new();
        for part in &self.parts {
            match part {
                WordPart::Literal { text, .. } => out.push_str(text),
                _ => return None,
            }
        }
        Some(out)
    }
}

/// Parsed script: one list of pipelines.
#[derive(Debug, Clone, PartialEq)]
pub struct Script {
    pub list: List,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct List {
    pub items: Vec<(Pipeline, Connector)>,
}

/// How a pipeline connects to the one after it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Connector {
    And,
    Or,
    Sequential,
    Background,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Pipeline {
    pub commands: Vec<CommandNode>,
    pub pipefail: bool,
    pub negated: bool,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct CommandNode {
    pub argv: Vec<WordNode>,
    pub redirects: Vec<Redirect>,
    pub assignments: Vec<Assignment>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Assignment {
    pub name: String,
    pub value: WordNode,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Redirect {
    pub op: RedirectOp,
    pub target: RedirectTarget,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RedirectOp {
    In,
    Out { append: bool },
    Err { append: bool },
    Both { append: bool },
    ErrToOut,
    OutToErr,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RedirectTarget {
    Path(WordNode),
    Handle(usize),
    None,
}

/// A word after parsing; command substitutions hold parsed scripts.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WordNode {
    pub parts: Vec<Part>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Part {
    Literal { text: String, quoted: bool },
    Var { name: String, fallback: Option<String>, quoted: bool },
    LastStatus { quoted: bool },
    Subst { script: Box<Script>, quoted: bool },
}

impl Script {
    pub fn is_empty(&self) -> bool {
        self.list.items.is_empty()
    }

    /// Request first-failure exit codes for every pipeline in the script.
    pub fn set_pipefail(&mut self, enabled: bool) {
        for (pipeline, _) in &mut self.list.items {
            pipeline.pipefail = enabled;
        }
    }
}

/// A parsed template ready to execute: the AST plus the stdio handles it
/// refers to by index.
#[derive(Debug, Clone)]
pub struct ParsedTemplate {
    pub script: Script,
    pub handles: Vec<Option<RawHandle>>,
    pub source: String,
}

/// Lex, interpolate and parse a template.
pub fn parse_template(template: &Template) -> Result<ParsedTemplate, ShellError> {
    let tokens = tokenize(template)?;
    let tokens = interpolate(tokens, &template.values)?;
    let script = parse_tokens(tokens)?;
    let handles = template
        .values
        .iter()
        .map(|value| match value {
            ShellValue::Handle(handle) => Some(handle.clone()),
            _ => None,
        })
        .collect();
    Ok(ParsedTemplate {
        script,
        handles,
        source: template.display_source(),
    })
}

pub(crate) fn is_valid_var_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(ch) if ch == '_' || ch.is_ascii_alphabetic() => {}
        _ => return false,
    }
    chars.all(|ch| ch == '_' || ch.is_ascii_alphanumeric())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn var_names() {
        assert!(is_valid_var_name("HOME"));
        assert!(is_valid_var_name("_x1"));
        assert!(!is_valid_var_name("1x"));
        assert!(!is_valid_var_name(""));
        assert!(!is_valid_var_name("A-B"));
    }

    #[test]
    fn parse_template_collects_handles() {
        let template = Template::new()
            .push_str("cat ")
            .push_value(ShellValue::bytes("hi"))
            .push_str(" ")
            .push_value("x");
        let parsed = parse_template(&template).unwrap();
        assert!(parsed.handles[0].is_some());
        assert!(parsed.handles[1].is_none());
        assert_eq!(parsed.source, "cat ${0} ${1}");
    }

    #[test]
    fn set_pipefail_marks_every_pipeline() {
        let mut parsed = parse_template(&Template::from("a | b; c")).unwrap();
        parsed.script.set_pipefail(true);
        assert!(parsed.script.list.items.iter().all(|(p, _)| p.pipefail));
    }
}
