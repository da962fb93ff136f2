use crate::error::{ParseErrorKind, ShellError};
use crate::parse::redirection_parser::{redirect_op, parse_redirect_target};
use crate::parse::{
    Assignment, CommandNode, Connector, List, Part, Pipeline, Redirect, RedirectOp, RedirectTarget,
    Script, Token, Word, WordNode, WordPart,
};

/// Parse an interpolated token stream into a script.
pub fn parse_tokens(tokens: Vec<Token>) -> Result<Script, ShellError> {
    let script = Parser::new(tokens).parse_script()?;
    if script.is_empty() {
        return Err(ShellError::parse(
            ParseErrorKind::EmptyCommand,
            "empty command",
        )
        .with_context("the template contains no command to run"));
    }
    Ok(script)
}

pub(crate) struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn new(tokens: Vec<Token>) -> Self {
        Self { tokens, pos: 0 }
    }

    pub(crate) fn peek(&self) -> &Token {
        self.tokens.get(self.pos).unwrap_or(&Token::Eof)
    }

    pub(crate) fn advance(&mut self) -> Token {
        match self.tokens.get_mut(self.pos) {
            Some(token) => {
                self.pos += 1;
                std::mem::replace(token, Token::Eof)
            }
            None => Token::Eof,
        }
    }

    fn skip_newlines(&mut self) {
        while matches!(self.peek(), Token::Newline) {
            self.pos += 1;
        }
    }

    fn unexpected(&self) -> ShellError {
        let token = self.peek();
        let message = match token {
            Token::Eof => "unexpected end of input".to_string(),
            other => format!("unexpected {}", other.describe()),
        };
        ShellError::parse(ParseErrorKind::UnexpectedToken, message)
    }

    fn parse_script(&mut self) -> Result<Script, ShellError> {
        let mut list = List::default();
        loop {
            self.skip_newlines();
            if matches!(self.peek(), Token::Eof) {
                break;
            }
            let pipeline = self.parse_pipeline()?;
            let connector = match self.peek() {
                Token::And => Connector::And,
                Token::Or => Connector::Or,
                Token::Semicolon | Token::Newline | Token::Eof => Connector::Sequential,
                Token::Background => Connector::Background,
                _ => return Err(self.unexpected()),
            };
            self.advance();
            list.items.push((pipeline, connector));

            if matches!(connector, Connector::And | Connector::Or) {
                self.skip_newlines();
                if matches!(self.peek(), Token::Eof) {
                    return Err(self.unexpected().with_context(
                        "`&&` and `||` need a command on both sides",
                    ));
                }
            }
        }
        Ok(Script { list })
    }

    fn parse_pipeline(&mut self) -> Result<Pipeline, ShellError> {
        let mut pipeline = Pipeline::default();
        if matches!(self.peek(), Token::Bang) {
            self.advance();
            pipeline.negated = true;
        }
        pipeline.commands.push(self.parse_command()?);
        while matches!(self.peek(), Token::Pipe) {
            self.advance();
            self.skip_newlines();
            let command = self
                .parse_command()
                .map_err(|err| err.with_context("a pipe needs a command on both sides"))?;
            pipeline.commands.push(command);
        }
        Ok(pipeline)
    }

    fn parse_command(&mut self) -> Result<CommandNode, ShellError> {
        let mut command = CommandNode::default();
        let mut has_content = false;
        loop {
            match self.peek() {
                Token::Word(_) => {
                    if let Token::Word(word) = self.advance() {
                        command.argv.push(word_node(word)?);
                    }
                }
                Token::Assignment { .. } => {
                    if let Token::Assignment { name, value } = self.advance() {
                        if command.argv.is_empty() {
                            command.assignments.push(Assignment {
                                name,
                                value: word_node(value)?,
                            });
                        } else {
                            command.argv.push(word_node(assignment_word(name, value))?);
                        }
                    }
                }
                Token::Handle(index) => {
                    let index = *index;
                    self.advance();
                    command.redirects.push(Redirect {
                        op: RedirectOp::In,
                        target: RedirectTarget::Handle(index),
                    });
                }
                token => {
                    let Some(op) = redirect_op(token) else {
                        break;
                    };
                    self.advance();
                    let target = parse_redirect_target(self, op)?;
                    command.redirects.push(Redirect { op, target });
                }
            }
            has_content = true;
        }
        if !has_content {
            return Err(self.unexpected());
        }
        Ok(command)
    }
}

pub(crate) fn assignment_word(name: String, value: Word) -> Word {
    let mut parts = Vec::with_capacity(value.parts.len() + 1);
    parts.push(WordPart::Literal {
        text: format!("{name}="),
        quoted: false,
    });
    parts.extend(value.parts);
    Word { parts }
}

pub(crate) fn word_node(word: Word) -> Result<WordNode, ShellError> {
    let mut parts = Vec::with_capacity(word.parts.len());
    for part in word.parts {
        let part = match part {
            WordPart::Literal { text, quoted } => Part::Literal { text, quoted },
            WordPart::Var {
                name,
                fallback,
                quoted,
            } => Part::Var {
                name,
                fallback,
                quoted,
            },
            WordPart::LastStatus { quoted } => Part::LastStatus { quoted },
            WordPart::Subst { tokens, quoted } => Part::Subst {
                // `$()` is allowed and expands to nothing.
                script: Box::new(Parser::new(tokens).parse_script()?),
                quoted,
            },
            WordPart::Value { index, .. } => {
                return Err(ShellError::parse(
                    ParseErrorKind::UnexpectedToken,
                    format!("unresolved template value ${{{index}}}"),
                ))
            }
        };
        parts.push(part);
    }
    Ok(WordNode { parts })
}
