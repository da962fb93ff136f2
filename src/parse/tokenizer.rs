//! Tokenizer for template input.
//!
//! Uses Normal/Single/Double modes to preserve quoting semantics while still
//! emitting a flat token stream for the command parser. Literal fragments and
//! host values arrive as one event stream; values are recorded as
//! placeholder parts and never re-read as characters.
use crate::error::{ParseErrorKind, ShellError};
use crate::parse::{is_valid_var_name, Token, Word, WordPart};
use crate::value::{ShellValue, Template};

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
enum ParseMode {
    Normal,
    Single,
    Double,
}

#[derive(Copy, Clone, Debug)]
enum Event {
    Char(char, usize),
    Value(usize, usize),
}

// Bound nesting depth to avoid pathological recursion in command substitution.
const MAX_SUBST_DEPTH: usize = 32;

#[derive(Default)]
struct WordBuilder {
    parts: Vec<WordPart>,
    in_token: bool,
}

impl WordBuilder {
    fn push_char(&mut self, ch: char, quoted: bool) {
        self.in_token = true;
        if let Some(WordPart::Literal { text, quoted: q }) = self.parts.last_mut() {
            if *q == quoted {
                text.push(ch);
                return;
            }
        }
        self.parts.push(WordPart::Literal {
            text: ch.to_string(),
            quoted,
        });
    }

    fn push_part(&mut self, part: WordPart) {
        self.in_token = true;
        self.parts.push(part);
    }

    // An empty quoted literal keeps `''` and `""` alive as an argument.
    fn open_quote(&mut self) {
        self.in_token = true;
        if !matches!(self.parts.last(), Some(WordPart::Literal { quoted: true, .. })) {
            self.parts.push(WordPart::Literal {
                text: String::new(),
                quoted: true,
            });
        }
    }

    fn is_empty(&self) -> bool {
        !self.in_token
    }

    fn fd_prefix(&self) -> Option<u8> {
        match self.parts.as_slice() {
            [WordPart::Literal { text, quoted: false }] => match text.as_str() {
                "0" => Some(0),
                "1" => Some(1),
                "2" => Some(2),
                _ => None,
            },
            _ => None,
        }
    }

    fn clear(&mut self) {
        self.parts.clear();
        self.in_token = false;
    }

    fn take(&mut self) -> Option<Token> {
        if !self.in_token {
            return None;
        }
        self.in_token = false;
        let parts = std::mem::take(&mut self.parts);
        Some(classify_word(Word { parts }))
    }
}

struct Frame {
    tokens: Vec<Token>,
    word: WordBuilder,
    mode: ParseMode,
    quote_pos: usize,
    // Whether the `$(` that opened this frame sat inside double quotes.
    quoted: bool,
    open_pos: usize,
}

impl Frame {
    fn new(quoted: bool, open_pos: usize) -> Self {
        Self {
            tokens: Vec::new(),
            word: WordBuilder::default(),
            mode: ParseMode::Normal,
            quote_pos: 0,
            quoted,
            open_pos,
        }
    }

    fn finish_word(&mut self) {
        if let Some(token) = self.word.take() {
            self.tokens.push(token);
        }
    }
}

struct Lexer {
    events: Vec<Event>,
    idx: usize,
    frames: Vec<Frame>,
}

/// Tokenize a template into a flat token stream terminated by `Token::Eof`.
pub fn tokenize(template: &Template) -> Result<Vec<Token>, ShellError> {
    let lexer = Lexer {
        events: collect_events(template),
        idx: 0,
        frames: vec![Frame::new(false, 0)],
    };
    lexer.run()
}

fn collect_events(template: &Template) -> Vec<Event> {
    let mut events = Vec::new();
    let mut pos = 0usize;
    for (idx, fragment) in template.fragments.iter().enumerate() {
        for ch in fragment.chars() {
            events.push(Event::Char(ch, pos));
            pos += 1;
        }
        if let Some(value) = template.values.get(idx) {
            let placeholder_len = format!("${{{idx}}}").chars().count();
            match value {
                // Raw values are trusted source text.
                ShellValue::Raw(source) => {
                    events.extend(source.chars().map(|ch| Event::Char(ch, pos)));
                }
                _ => events.push(Event::Value(idx, pos)),
            }
            pos += placeholder_len;
        }
    }
    events
}

impl Lexer {
    fn next(&mut self) -> Option<Event> {
        let event = self.events.get(self.idx).copied();
        if event.is_some() {
            self.idx += 1;
        }
        event
    }

    fn unread(&mut self) {
        self.idx -= 1;
    }

    fn peek_char(&self) -> Option<char> {
        self.peek_char_at(0)
    }

    fn peek_char_at(&self, offset: usize) -> Option<char> {
        match self.events.get(self.idx + offset) {
            Some(Event::Char(ch, _)) => Some(*ch),
            _ => None,
        }
    }

    fn frame(&mut self) -> &mut Frame {
        let last = self.frames.len() - 1;
        &mut self.frames[last]
    }

    fn emit(&mut self, token: Token) {
        self.frame().tokens.push(token);
    }

    fn finish_word(&mut self) {
        self.frame().finish_word();
    }

    fn run(mut self) -> Result<Vec<Token>, ShellError> {
        while let Some(event) = self.next() {
            match event {
                Event::Value(index, _) => {
                    let quoted = self.frame().mode != ParseMode::Normal;
                    self.frame().word.push_part(WordPart::Value { index, quoted });
                }
                Event::Char(ch, pos) => match self.frame().mode {
                    ParseMode::Normal => self.normal(ch, pos)?,
                    ParseMode::Single => self.single(ch),
                    ParseMode::Double => self.double(ch, pos)?,
                },
            }
        }

        let frame = self.frame();
        if frame.mode != ParseMode::Normal {
            let quote_char = match frame.mode {
                ParseMode::Single => "'",
                ParseMode::Double => "\"",
                ParseMode::Normal => unreachable!(),
            };
            return Err(ShellError::parse(
                ParseErrorKind::UnterminatedQuote,
                format!("Unterminated {} quote", quote_char),
            )
            .with_position(frame.quote_pos));
        }
        if self.frames.len() > 1 {
            let open_pos = self.frame().open_pos;
            return Err(ShellError::parse(
                ParseErrorKind::UnterminatedExpansion,
                "Unterminated command substitution $(...)",
            )
            .with_context("Missing closing parenthesis for command substitution")
            .with_position(open_pos));
        }

        let mut root = self.frames.pop().unwrap_or_else(|| Frame::new(false, 0));
        root.finish_word();
        root.tokens.push(Token::Eof);
        Ok(root.tokens)
    }

    fn normal(&mut self, ch: char, pos: usize) -> Result<(), ShellError> {
        match ch {
            ' ' | '\t' | '\r' => self.finish_word(),
            '\n' => {
                self.finish_word();
                self.emit(Token::Newline);
            }
            '#' if self.frame().word.is_empty() => {
                while let Some(event) = self.next() {
                    if matches!(event, Event::Char('\n', _)) {
                        self.unread();
                        break;
                    }
                }
            }
            '|' => {
                self.finish_word();
                if self.peek_char() == Some('|') {
                    self.next();
                    self.emit(Token::Or);
                } else {
                    self.emit(Token::Pipe);
                }
            }
            '&' => {
                self.finish_word();
                match self.peek_char() {
                    Some('&') => {
                        self.next();
                        self.emit(Token::And);
                    }
                    Some('>') => {
                        self.next();
                        let append = self.peek_char() == Some('>');
                        if append {
                            self.next();
                        }
                        self.emit(Token::RedirectBoth { append });
                    }
                    _ => self.emit(Token::Background),
                }
            }
            ';' => {
                self.finish_word();
                self.emit(Token::Semicolon);
            }
            '>' => self.redirect_out(pos)?,
            '<' => {
                if self.frame().word.fd_prefix() == Some(0) {
                    self.frame().word.clear();
                } else {
                    self.finish_word();
                }
                self.emit(Token::RedirectIn);
            }
            '(' => {
                return Err(ShellError::parse(
                    ParseErrorKind::UnexpectedToken,
                    "unexpected `(`",
                )
                .with_context("subshells are not supported; quote the parenthesis")
                .with_position(pos));
            }
            ')' => {
                if self.frames.len() > 1 {
                    self.close_subst();
                } else {
                    return Err(ShellError::parse(
                        ParseErrorKind::UnexpectedToken,
                        "unmatched `)`",
                    )
                    .with_position(pos));
                }
            }
            '\\' => match self.next() {
                // Backslash-newline is a line continuation.
                Some(Event::Char('\n', _)) => {}
                Some(Event::Char(next, _)) => self.frame().word.push_char(next, true),
                Some(Event::Value(..)) => {
                    self.unread();
                    self.frame().word.push_char('\\', false);
                }
                None => self.frame().word.push_char('\\', false),
            },
            '\'' => {
                let frame = self.frame();
                frame.word.open_quote();
                frame.mode = ParseMode::Single;
                frame.quote_pos = pos;
            }
            '"' => {
                let frame = self.frame();
                frame.word.open_quote();
                frame.mode = ParseMode::Double;
                frame.quote_pos = pos;
            }
            '$' => self.dollar(false, pos)?,
            '!' if self.frame().word.is_empty()
                && matches!(self.peek_char(), None | Some(' ' | '\t' | '\n')) =>
            {
                self.emit(Token::Bang);
            }
            _ => self.frame().word.push_char(ch, false),
        }
        Ok(())
    }

    fn single(&mut self, ch: char) {
        let frame = self.frame();
        if ch == '\'' {
            frame.mode = ParseMode::Normal;
        } else {
            frame.word.push_char(ch, true);
        }
    }

    fn double(&mut self, ch: char, pos: usize) -> Result<(), ShellError> {
        match ch {
            '"' => self.frame().mode = ParseMode::Normal,
            '\\' => match self.next() {
                Some(Event::Char('\n', _)) => {}
                Some(Event::Char(next, _)) if matches!(next, '$' | '`' | '"' | '\\') => {
                    self.frame().word.push_char(next, true);
                }
                Some(Event::Char(next, _)) => {
                    let word = &mut self.frame().word;
                    word.push_char('\\', true);
                    word.push_char(next, true);
                }
                Some(Event::Value(..)) => {
                    self.unread();
                    self.frame().word.push_char('\\', true);
                }
                None => self.frame().word.push_char('\\', true),
            },
            '$' => self.dollar(true, pos)?,
            _ => self.frame().word.push_char(ch, true),
        }
        Ok(())
    }

    fn redirect_out(&mut self, pos: usize) -> Result<(), ShellError> {
        let fd = match self.frame().word.fd_prefix() {
            Some(fd @ (1 | 2)) => {
                self.frame().word.clear();
                fd
            }
            _ => {
                self.finish_word();
                1
            }
        };
        let append = self.peek_char() == Some('>');
        if append {
            self.next();
        }
        if !append && self.peek_char() == Some('&') {
            let target = self.peek_char_at(1);
            self.next();
            self.next();
            let token = match (fd, target) {
                (2, Some('1')) => Token::DupErrToOut,
                (1, Some('2')) => Token::DupOutToErr,
                _ => {
                    return Err(ShellError::parse(
                        ParseErrorKind::UnexpectedToken,
                        "unsupported descriptor duplication",
                    )
                    .with_context("only 2>&1 and 1>&2 are supported")
                    .with_position(pos));
                }
            };
            self.emit(token);
            return Ok(());
        }
        let token = if fd == 2 {
            Token::RedirectErr { append }
        } else {
            Token::RedirectOut { append }
        };
        self.emit(token);
        Ok(())
    }

    fn dollar(&mut self, quoted: bool, pos: usize) -> Result<(), ShellError> {
        match self.peek_char() {
            Some('(') => {
                self.next();
                self.open_subst(quoted, pos)?;
            }
            Some('{') => {
                self.next();
                self.brace_var(quoted, pos)?;
            }
            Some('?') => {
                self.next();
                self.frame().word.push_part(WordPart::LastStatus { quoted });
            }
            Some(ch) if ch == '_' || ch.is_ascii_alphabetic() => {
                let mut name = String::new();
                while let Some(next) = self.peek_char() {
                    if next == '_' || next.is_ascii_alphanumeric() {
                        name.push(next);
                        self.next();
                    } else {
                        break;
                    }
                }
                self.frame().word.push_part(WordPart::Var {
                    name,
                    fallback: None,
                    quoted,
                });
            }
            _ => self.frame().word.push_char('$', quoted),
        }
        Ok(())
    }

    fn brace_var(&mut self, quoted: bool, pos: usize) -> Result<(), ShellError> {
        let mut inner = String::new();
        loop {
            match self.next() {
                Some(Event::Char('}', _)) => break,
                Some(Event::Char(ch, _)) => inner.push(ch),
                Some(Event::Value(_, value_pos)) => {
                    return Err(ShellError::parse(
                        ParseErrorKind::UnexpectedToken,
                        "host values cannot appear inside ${...}",
                    )
                    .with_position(value_pos));
                }
                None => {
                    return Err(ShellError::parse(
                        ParseErrorKind::UnterminatedExpansion,
                        "Unterminated parameter expansion ${}",
                    )
                    .with_context("Missing closing brace: ${variable}")
                    .with_position(pos));
                }
            }
        }
        if inner == "?" {
            self.frame().word.push_part(WordPart::LastStatus { quoted });
            return Ok(());
        }
        let (name, fallback) = match inner.split_once(":-") {
            Some((name, fallback)) => (name.to_string(), Some(fallback.to_string())),
            None => (inner, None),
        };
        if !is_valid_var_name(&name) {
            return Err(ShellError::parse(
                ParseErrorKind::UnexpectedToken,
                format!("Invalid variable name: {}", name),
            )
            .with_context("Variable names must start with a letter or underscore, followed by letters, digits, or underscores")
            .with_position(pos));
        }
        self.frame().word.push_part(WordPart::Var {
            name,
            fallback,
            quoted,
        });
        Ok(())
    }

    fn open_subst(&mut self, quoted: bool, pos: usize) -> Result<(), ShellError> {
        if self.frames.len() > MAX_SUBST_DEPTH {
            return Err(ShellError::parse(
                ParseErrorKind::UnexpectedToken,
                format!(
                    "Command substitution nesting exceeds limit of {}",
                    MAX_SUBST_DEPTH
                ),
            )
            .with_position(pos));
        }
        // The enclosing word continues after the closing parenthesis.
        self.frame().word.in_token = true;
        self.frames.push(Frame::new(quoted, pos));
        Ok(())
    }

    fn close_subst(&mut self) {
        let Some(mut frame) = self.frames.pop() else {
            return;
        };
        frame.finish_word();
        frame.tokens.push(Token::Eof);
        self.frame().word.push_part(WordPart::Subst {
            tokens: frame.tokens,
            quoted: frame.quoted,
        });
    }
}

fn classify_word(word: Word) -> Token {
    let assignment = match word.parts.first() {
        Some(WordPart::Literal { text, quoted: false }) => text
            .split_once('=')
            .filter(|(name, _)| is_valid_var_name(name))
            .map(|(name, rest)| (name.to_string(), rest.to_string())),
        _ => None,
    };
    let Some((name, rest)) = assignment else {
        return Token::Word(word);
    };
    let mut parts = Vec::with_capacity(word.parts.len());
    if !rest.is_empty() {
        parts.push(WordPart::Literal {
            text: rest,
            quoted: false,
        });
    }
    parts.extend(word.parts.into_iter().skip(1));
    Token::Assignment {
        name,
        value: Word { parts },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lex(source: &str) -> Vec<Token> {
        tokenize(&Template::from(source)).unwrap()
    }

    fn lit(text: &str, quoted: bool) -> WordPart {
        WordPart::Literal {
            text: text.to_string(),
            quoted,
        }
    }

    fn word_texts(tokens: &[Token]) -> Vec<String> {
        tokens
            .iter()
            .filter_map(|t| match t {
                Token::Word(w) => w.as_literal(),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn tokenize_basic() {
        let tokens = lex("ls -la /tmp");
        assert_eq!(word_texts(&tokens), vec!["ls", "-la", "/tmp"]);
        assert_eq!(tokens.last(), Some(&Token::Eof));
    }

    #[test]
    fn operators() {
        let tokens = lex("a | b && c || d; e & f");
        let ops: Vec<&Token> = tokens.iter().filter(|t| !matches!(t, Token::Word(_))).collect();
        assert_eq!(
            ops,
            vec![
                &Token::Pipe,
                &Token::And,
                &Token::Or,
                &Token::Semicolon,
                &Token::Background,
                &Token::Eof
            ]
        );
    }

    #[test]
    fn redirections_with_descriptors() {
        let tokens = lex("cmd > out >> log < in 2> err 2>> err2 &> both 2>&1 >&2");
        let ops: Vec<&Token> = tokens.iter().filter(|t| !matches!(t, Token::Word(_))).collect();
        assert_eq!(
            ops,
            vec![
                &Token::RedirectOut { append: false },
                &Token::RedirectOut { append: true },
                &Token::RedirectIn,
                &Token::RedirectErr { append: false },
                &Token::RedirectErr { append: true },
                &Token::RedirectBoth { append: false },
                &Token::DupErrToOut,
                &Token::DupOutToErr,
                &Token::Eof
            ]
        );
    }

    #[test]
    fn spaced_digit_is_an_argument() {
        let tokens = lex("echo 2 > f");
        assert_eq!(word_texts(&tokens), vec!["echo", "2", "f"]);
        assert!(tokens.contains(&Token::RedirectOut { append: false }));
    }

    #[test]
    fn quoting_and_escaping() {
        let tokens = lex("echo \"ab\\\"cd\" 'single # and $' foo\\ bar");
        assert_eq!(word_texts(&tokens), vec!["echo", "ab\"cd", "single # and $", "foo bar"]);

        let tokens = lex("printf '%s|%s' \"ab\"\"cd\" \"\"");
        assert_eq!(word_texts(&tokens), vec!["printf", "%s|%s", "abcd", ""]);
    }

    #[test]
    fn quotes_mark_parts() {
        let tokens = lex("a'*'b");
        let Token::Word(word) = &tokens[0] else {
            panic!("expected word");
        };
        assert_eq!(word.parts, vec![lit("a", false), lit("*", true), lit("b", false)]);
    }

    #[test]
    fn double_quote_backslash_keeps_unknown_escapes() {
        let tokens = lex("echo \"a\\nb\"");
        assert_eq!(word_texts(&tokens)[1], "a\\nb");
    }

    #[test]
    fn variables_in_and_out_of_quotes() {
        let tokens = lex("echo $HOME \"${USER}x\" ${X:-dflt} $? $ '$NOPE'");
        let Token::Word(w) = &tokens[1] else { panic!() };
        assert_eq!(
            w.parts,
            vec![WordPart::Var { name: "HOME".into(), fallback: None, quoted: false }]
        );
        let Token::Word(w) = &tokens[2] else { panic!() };
        assert_eq!(
            w.parts,
            vec![
                lit("", true),
                WordPart::Var { name: "USER".into(), fallback: None, quoted: true },
                lit("x", true)
            ]
        );
        let Token::Word(w) = &tokens[3] else { panic!() };
        assert_eq!(
            w.parts,
            vec![WordPart::Var { name: "X".into(), fallback: Some("dflt".into()), quoted: false }]
        );
        let Token::Word(w) = &tokens[4] else { panic!() };
        assert_eq!(w.parts, vec![WordPart::LastStatus { quoted: false }]);
        assert_eq!(word_texts(&tokens)[1..], ["$", "$NOPE"]);
    }

    #[test]
    fn assignments_are_recognized() {
        let tokens = lex("FOO=bar BAZ=\"a b\" cmd X=1");
        assert_eq!(
            tokens[0],
            Token::Assignment { name: "FOO".into(), value: Word::literal("bar") }
        );
        assert_eq!(
            tokens[1],
            Token::Assignment {
                name: "BAZ".into(),
                value: Word { parts: vec![lit("a b", true)] }
            }
        );
        assert!(matches!(tokens[3], Token::Assignment { .. }));
    }

    #[test]
    fn command_substitution_nests() {
        let tokens = lex("echo $(echo $(echo x)) \"$(pwd)\"");
        let Token::Word(w) = &tokens[1] else { panic!() };
        let [WordPart::Subst { tokens: inner, quoted: false }] = w.parts.as_slice() else {
            panic!("expected substitution, got {:?}", w.parts);
        };
        let Token::Word(nested) = &inner[1] else { panic!() };
        assert!(matches!(nested.parts[0], WordPart::Subst { .. }));
        let Token::Word(w) = &tokens[2] else { panic!() };
        assert!(w.parts.iter().any(|p| matches!(p, WordPart::Subst { quoted: true, .. })));
    }

    #[test]
    fn values_become_placeholders() {
        let template = Template::new()
            .push_str("echo pre")
            .push_value("a b")
            .push_str(" \"")
            .push_value("c")
            .push_str("\"");
        let tokens = tokenize(&template).unwrap();
        let Token::Word(w) = &tokens[1] else { panic!() };
        assert_eq!(w.parts, vec![lit("pre", false), WordPart::Value { index: 0, quoted: false }]);
        let Token::Word(w) = &tokens[2] else { panic!() };
        assert_eq!(w.parts, vec![lit("", true), WordPart::Value { index: 1, quoted: true }]);
    }

    #[test]
    fn raw_values_are_lexed_as_source() {
        let template = Template::new()
            .push_str("echo a ")
            .push_value(ShellValue::raw("| cat"));
        let tokens = tokenize(&template).unwrap();
        assert!(tokens.contains(&Token::Pipe));
    }

    #[test]
    fn comments_and_newlines() {
        let tokens = lex("echo a # trailing | not a pipe\necho b");
        assert_eq!(word_texts(&tokens), vec!["echo", "a", "echo", "b"]);
        assert!(tokens.contains(&Token::Newline));
        assert!(!tokens.contains(&Token::Pipe));
    }

    #[test]
    fn bang_only_as_separate_word() {
        let tokens = lex("! false hi!");
        assert_eq!(tokens[0], Token::Bang);
        assert_eq!(word_texts(&tokens), vec!["false", "hi!"]);
    }

    #[test]
    fn error_cases() {
        let err = tokenize(&Template::from("echo \"unterminated")).unwrap_err();
        assert_eq!(err.parse_kind(), Some(ParseErrorKind::UnterminatedQuote));
        assert_eq!(err.position, Some(5));

        let err = tokenize(&Template::from("echo 'x")).unwrap_err();
        assert_eq!(err.parse_kind(), Some(ParseErrorKind::UnterminatedQuote));

        let err = tokenize(&Template::from("echo $(date")).unwrap_err();
        assert_eq!(err.parse_kind(), Some(ParseErrorKind::UnterminatedExpansion));

        let err = tokenize(&Template::from("echo ${HOME")).unwrap_err();
        assert_eq!(err.parse_kind(), Some(ParseErrorKind::UnterminatedExpansion));

        let err = tokenize(&Template::from("echo ${1bad}")).unwrap_err();
        assert_eq!(err.parse_kind(), Some(ParseErrorKind::UnexpectedToken));

        let err = tokenize(&Template::from("echo )")).unwrap_err();
        assert_eq!(err.parse_kind(), Some(ParseErrorKind::UnexpectedToken));
    }

    #[test]
    fn command_substitution_nesting_limit() {
        let mut input = String::from("echo ");
        for _ in 0..MAX_SUBST_DEPTH {
            input.push_str("$(");
        }
        input.push_str("echo x");
        for _ in 0..MAX_SUBST_DEPTH {
            input.push(')');
        }
        assert!(tokenize(&Template::from(input.as_str())).is_ok());

        let mut too_deep = String::from("echo ");
        for _ in 0..=MAX_SUBST_DEPTH {
            too_deep.push_str("$(");
        }
        too_deep.push_str("echo x");
        for _ in 0..=MAX_SUBST_DEPTH {
            too_deep.push(')');
        }
        assert!(tokenize(&Template::from(too_deep.as_str())).is_err());
    }
}
