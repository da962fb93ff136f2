//! Resolve `WordPart::Value` placeholders into literal parts and handle tokens.
//!
//! Every text a host value contributes becomes a quoted literal, so nothing a
//! value carries is ever reinterpreted as syntax, glob, brace or tilde.
use crate::error::{ParseErrorKind, ShellError};
use crate::parse::{Token, Word, WordPart};
use crate::value::ShellValue;

pub fn interpolate(tokens: Vec<Token>, values: &[ShellValue]) -> Result<Vec<Token>, ShellError> {
    let mut out = Vec::with_capacity(tokens.len());
    for token in tokens {
        match token {
            Token::Word(word) => {
                if let Some(index) = bare_handle(&word, values) {
                    out.push(Token::Handle(index));
                    continue;
                }
                let words = resolve_word(word.parts, values)?;
                if words.len() != 1 && expects_target(out.last()) {
                    return Err(ShellError::usage("ambiguous redirect").with_context(format!(
                        "redirection target expands to {} words",
                        words.len()
                    )));
                }
                for parts in words {
                    out.push(Token::Word(Word { parts }));
                }
            }
            Token::Assignment { name, value } => {
                let parts = resolve_assignment(value.parts, values)?;
                out.push(Token::Assignment {
                    name,
                    value: Word { parts },
                });
            }
            other => out.push(other),
        }
    }
    Ok(out)
}

fn expects_target(previous: Option<&Token>) -> bool {
    matches!(
        previous,
        Some(
            Token::RedirectIn
                | Token::RedirectOut { .. }
                | Token::RedirectErr { .. }
                | Token::RedirectBoth { .. }
        )
    )
}

/// A word that is nothing but one handle value (ignoring empty quotes).
fn bare_handle(word: &Word, values: &[ShellValue]) -> Option<usize> {
    let mut found = None;
    for part in &word.parts {
        match part {
            WordPart::Literal { text, .. } if text.is_empty() => {}
            WordPart::Value { index, .. }
                if found.is_none() && matches!(values.get(*index), Some(ShellValue::Handle(_))) =>
            {
                found = Some(*index);
            }
            _ => return None,
        }
    }
    found
}

fn value_at(values: &[ShellValue], index: usize) -> Result<&ShellValue, ShellError> {
    values.get(index).ok_or_else(|| {
        ShellError::usage(format!("template refers to missing value ${{{index}}}"))
    })
}

fn embedded_handle(index: usize) -> ShellError {
    ShellError::parse(
        ParseErrorKind::UnexpectedToken,
        format!("stdio handle ${{{index}}} cannot be part of a larger word"),
    )
    .with_context("interpolate a handle as a word of its own, or after a redirection operator")
}

fn quoted_literal(text: String) -> WordPart {
    WordPart::Literal { text, quoted: true }
}

/// Resolve one word; an unquoted array value may split it into several.
fn resolve_word(parts: Vec<WordPart>, values: &[ShellValue]) -> Result<Vec<Vec<WordPart>>, ShellError> {
    let mut words: Vec<Vec<WordPart>> = vec![Vec::new()];
    // Set once the word has content that must survive even if every array
    // in it is empty, such as `""` or a scalar.
    let mut anchored = false;

    for part in parts {
        match part {
            WordPart::Value { index, quoted } => match value_at(values, index)? {
                ShellValue::StringArray(items) if !quoted => {
                    let mut items = items.iter();
                    if let Some(first) = items.next() {
                        push_part(&mut words, quoted_literal(first.clone()));
                    }
                    for item in items {
                        words.push(vec![quoted_literal(item.clone())]);
                    }
                }
                ShellValue::StringArray(items) => {
                    anchored = true;
                    push_part(&mut words, quoted_literal(items.join(" ")));
                }
                ShellValue::Handle(_) => return Err(embedded_handle(index)),
                ShellValue::Raw(source) => {
                    anchored = true;
                    push_part(&mut words, quoted_literal(source.clone()));
                }
                scalar => {
                    anchored = true;
                    let text = scalar.as_word().unwrap_or_default();
                    push_part(&mut words, quoted_literal(text));
                }
            },
            WordPart::Subst { tokens, quoted } => {
                anchored = true;
                let tokens = interpolate(tokens, values)?;
                push_part(&mut words, WordPart::Subst { tokens, quoted });
            }
            other => {
                anchored = true;
                push_part(&mut words, other);
            }
        }
    }

    words.retain(|parts| !parts.is_empty());
    if words.is_empty() && anchored {
        words.push(vec![quoted_literal(String::new())]);
    }
    Ok(words)
}

fn push_part(words: &mut [Vec<WordPart>], part: WordPart) {
    if let Some(current) = words.last_mut() {
        current.push(part);
    }
}

fn resolve_assignment(parts: Vec<WordPart>, values: &[ShellValue]) -> Result<Vec<WordPart>, ShellError> {
    let mut out = Vec::with_capacity(parts.len());
    for part in parts {
        match part {
            WordPart::Value { index, .. } => match value_at(values, index)? {
                ShellValue::StringArray(items) => out.push(quoted_literal(items.join(" "))),
                ShellValue::Handle(_) => return Err(embedded_handle(index)),
                ShellValue::Raw(source) => out.push(quoted_literal(source.clone())),
                scalar => out.push(quoted_literal(scalar.as_word().unwrap_or_default())),
            },
            WordPart::Subst { tokens, quoted } => out.push(WordPart::Subst {
                tokens: interpolate(tokens, values)?,
                quoted,
            }),
            other => out.push(other),
        }
    }
    Ok(out)
}
