//! Host values and the template they are interleaved with.
//!
//! A `Template` is the Rust shape of a tagged template call: `fragments`
//! holds the literal source text and `values` the host values that sit in
//! the gaps, so `fragments.len() == values.len() + 1` always holds.
use std::fs::File;
use std::io;
use std::path::Path;
use std::sync::Arc;

use crate::error::ShellError;

/// A stream attached directly to a command's stdio, bypassing text escaping.
#[derive(Debug, Clone)]
pub enum RawHandle {
    File(Arc<File>),
    Bytes(Arc<[u8]>),
}

impl RawHandle {
    pub fn open(path: impl AsRef<Path>) -> io::Result<Self> {
        Ok(RawHandle::File(Arc::new(File::open(path)?)))
    }

    /// Duplicate the underlying descriptor so each attachment owns its own.
    pub(crate) fn try_clone_file(&self) -> io::Result<Option<File>> {
        match self {
            RawHandle::File(file) => file.try_clone().map(Some),
            RawHandle::Bytes(_) => Ok(None),
        }
    }
}

/// A host value interpolated into a template.
#[derive(Debug, Clone)]
pub enum ShellValue {
    String(String),
    StringArray(Vec<String>),
    Handle(RawHandle),
    Number(f64),
    Boolean(bool),
    /// Trusted shell source, lexed as if it were part of the template text.
    Raw(String),
}

impl ShellValue {
    pub fn raw(source: impl Into<String>) -> Self {
        ShellValue::Raw(source.into())
    }

    pub fn bytes(data: impl Into<Vec<u8>>) -> Self {
        ShellValue::Handle(RawHandle::Bytes(Arc::from(data.into())))
    }

    /// Text form used when the value becomes a single argv word.
    pub(crate) fn as_word(&self) -> Option<String> {
        match self {
            ShellValue::String(s) => Some(s.clone()),
            ShellValue::Number(n) => Some(format_number(*n)),
            ShellValue::Boolean(b) => Some(b.to_string()),
            ShellValue::StringArray(_) | ShellValue::Handle(_) | ShellValue::Raw(_) => None,
        }
    }
}

fn format_number(n: f64) -> String {
    if n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        format!("{n}")
    }
}

impl From<String> for ShellValue {
    fn from(value: String) -> Self {
        ShellValue::String(value)
    }
}

impl From<&str> for ShellValue {
    fn from(value: &str) -> Self {
        ShellValue::String(value.to_string())
    }
}

impl From<&String> for ShellValue {
    fn from(value: &String) -> Self {
        ShellValue::String(value.clone())
    }
}

impl From<&Path> for ShellValue {
    fn from(value: &Path) -> Self {
        ShellValue::String(value.to_string_lossy().into_owned())
    }
}

impl From<std::path::PathBuf> for ShellValue {
    fn from(value: std::path::PathBuf) -> Self {
        ShellValue::String(value.to_string_lossy().into_owned())
    }
}

impl From<&std::path::PathBuf> for ShellValue {
    fn from(value: &std::path::PathBuf) -> Self {
        ShellValue::String(value.to_string_lossy().into_owned())
    }
}

impl From<Vec<String>> for ShellValue {
    fn from(value: Vec<String>) -> Self {
        ShellValue::StringArray(value)
    }
}

impl From<Vec<&str>> for ShellValue {
    fn from(value: Vec<&str>) -> Self {
        ShellValue::StringArray(value.into_iter().map(str::to_string).collect())
    }
}

impl From<&[&str]> for ShellValue {
    fn from(value: &[&str]) -> Self {
        ShellValue::StringArray(value.iter().map(|s| s.to_string()).collect())
    }
}

impl From<&[String]> for ShellValue {
    fn from(value: &[String]) -> Self {
        ShellValue::StringArray(value.to_vec())
    }
}

impl From<&Vec<String>> for ShellValue {
    fn from(value: &Vec<String>) -> Self {
        ShellValue::StringArray(value.clone())
    }
}

impl<const N: usize> From<[&str; N]> for ShellValue {
    fn from(value: [&str; N]) -> Self {
        ShellValue::StringArray(value.iter().map(|s| s.to_string()).collect())
    }
}

impl From<File> for ShellValue {
    fn from(value: File) -> Self {
        ShellValue::Handle(RawHandle::File(Arc::new(value)))
    }
}

impl From<RawHandle> for ShellValue {
    fn from(value: RawHandle) -> Self {
        ShellValue::Handle(value)
    }
}

impl From<bool> for ShellValue {
    fn from(value: bool) -> Self {
        ShellValue::Boolean(value)
    }
}

macro_rules! number_from {
    ($($ty:ty),*) => {
        $(
            impl From<$ty> for ShellValue {
                fn from(value: $ty) -> Self {
                    ShellValue::Number(value as f64)
                }
            }
        )*
    };
}

number_from!(i8, i16, i32, i64, u8, u16, u32, u64, usize, isize, f32, f64);

/// Literal fragments interleaved with host values.
#[derive(Debug, Clone)]
pub struct Template {
    pub(crate) fragments: Vec<String>,
    pub(crate) values: Vec<ShellValue>,
}

impl Template {
    pub fn new() -> Self {
        Self {
            fragments: vec![String::new()],
            values: Vec::new(),
        }
    }

    /// Build from explicit parts; requires one more fragment than values.
    pub fn from_parts(fragments: Vec<String>, values: Vec<ShellValue>) -> Result<Self, ShellError> {
        if fragments.len() != values.len() + 1 {
            return Err(ShellError::usage(format!(
                "template has {} fragments for {} values",
                fragments.len(),
                values.len()
            ))
            .with_context("a template needs exactly one more fragment than values"));
        }
        Ok(Self { fragments, values })
    }

    /// Split `source` at each `{}` placeholder; `{{` and `}}` are literal braces.
    pub fn format(source: &str, values: Vec<ShellValue>) -> Result<Self, ShellError> {
        let mut fragments = Vec::with_capacity(values.len() + 1);
        let mut buf = String::new();
        let mut chars = source.chars().peekable();
        while let Some(ch) = chars.next() {
            match ch {
                '{' if chars.peek() == Some(&'{') => {
                    chars.next();
                    buf.push('{');
                }
                '{' if chars.peek() == Some(&'}') => {
                    chars.next();
                    fragments.push(std::mem::take(&mut buf));
                }
                '}' if chars.peek() == Some(&'}') => {
                    chars.next();
                    buf.push('}');
                }
                _ => buf.push(ch),
            }
        }
        fragments.push(buf);
        if fragments.len() != values.len() + 1 {
            return Err(ShellError::usage(format!(
                "template has {} placeholders but {} values were supplied",
                fragments.len() - 1,
                values.len()
            ))
            .with_context("use {{ and }} for literal braces"));
        }
        Ok(Self { fragments, values })
    }

    pub fn push_str(mut self, text: &str) -> Self {
        if let Some(last) = self.fragments.last_mut() {
            last.push_str(text);
        }
        self
    }

    pub fn push_value(mut self, value: impl Into<ShellValue>) -> Self {
        self.values.push(value.into());
        self.fragments.push(String::new());
        self
    }

    /// Template source with placeholders rendered as `${N}`, for diagnostics.
    pub fn display_source(&self) -> String {
        let mut out = String::new();
        for (idx, fragment) in self.fragments.iter().enumerate() {
            out.push_str(fragment);
            if idx < self.values.len() {
                out.push_str(&format!("${{{idx}}}"));
            }
        }
        out
    }
}

impl Default for Template {
    fn default() -> Self {
        Self::new()
    }
}

impl From<&str> for Template {
    fn from(source: &str) -> Self {
        Self {
            fragments: vec![source.to_string()],
            values: Vec::new(),
        }
    }
}

impl From<String> for Template {
    fn from(source: String) -> Self {
        Self {
            fragments: vec![source],
            values: Vec::new(),
        }
    }
}

/// Quote `input` so that the shell reads it back as exactly one literal word.
pub fn escape(input: &str) -> String {
    if !input.is_empty()
        && input
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | '/' | ',' | ':' | '@' | '+' | '='))
    {
        return input.to_string();
    }
    let mut out = String::with_capacity(input.len() + 2);
    out.push('\'');
    for ch in input.chars() {
        if ch == '\'' {
            out.push_str("'\\''");
        } else {
            out.push(ch);
        }
    }
    out.push('\'');
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_splits_on_placeholders() {
        let template = Template::format("echo {} | wc -c > {}", vec!["a".into(), "b".into()]).unwrap();
        assert_eq!(template.fragments, vec!["echo ", " | wc -c > ", ""]);
        assert_eq!(template.values.len(), 2);
    }

    #[test]
    fn format_keeps_escaped_braces() {
        let template = Template::format("echo a{{b,c}}", Vec::new()).unwrap();
        assert_eq!(template.fragments, vec!["echo a{b,c}"]);
    }

    #[test]
    fn format_rejects_mismatched_values() {
        let err = Template::format("echo {} {}", vec!["a".into()]).unwrap_err();
        assert_eq!(err.kind, crate::error::ErrorKind::Usage);
    }

    #[test]
    fn builder_tracks_gaps() {
        let template = Template::new().push_str("cat ").push_value("x").push_str(" | wc");
        assert_eq!(template.fragments, vec!["cat ", " | wc"]);
        assert_eq!(template.display_source(), "cat ${0} | wc");
    }

    #[test]
    fn numbers_render_without_trailing_zero() {
        assert_eq!(ShellValue::from(42).as_word().unwrap(), "42");
        assert_eq!(ShellValue::from(1.5).as_word().unwrap(), "1.5");
        assert_eq!(ShellValue::from(true).as_word().unwrap(), "true");
    }

    #[test]
    fn escape_quotes_metacharacters() {
        assert_eq!(escape("plain-word"), "plain-word");
        assert_eq!(escape("a b"), "'a b'");
        assert_eq!(escape("it's"), "'it'\\''s'");
        assert_eq!(escape(""), "''");
        assert_eq!(escape("$(rm -rf /)"), "'$(rm -rf /)'");
    }
}
