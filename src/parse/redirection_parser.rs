use crate::error::{ParseErrorKind, ShellError};
use crate::parse::command_parser::{assignment_word, word_node, Parser};
use crate::parse::{RedirectOp, RedirectTarget, Token};

pub(crate) fn redirect_op(token: &Token) -> Option<RedirectOp> {
    match token {
        Token::RedirectIn => Some(RedirectOp::In),
        Token::RedirectOut { append } => Some(RedirectOp::Out { append: *append }),
        Token::RedirectErr { append } => Some(RedirectOp::Err { append: *append }),
        Token::RedirectBoth { append } => Some(RedirectOp::Both { append: *append }),
        Token::DupErrToOut => Some(RedirectOp::ErrToOut),
        Token::DupOutToErr => Some(RedirectOp::OutToErr),
        _ => None,
    }
}

fn op_display(op: RedirectOp) -> &'static str {
    match op {
        RedirectOp::In => "<",
        RedirectOp::Out { append: false } => ">",
        RedirectOp::Out { append: true } => ">>",
        RedirectOp::Err { append: false } => "2>",
        RedirectOp::Err { append: true } => "2>>",
        RedirectOp::Both { append: false } => "&>",
        RedirectOp::Both { append: true } => "&>>",
        RedirectOp::ErrToOut => "2>&1",
        RedirectOp::OutToErr => "1>&2",
    }
}

/// Consume the target that follows a redirection operator.
pub(crate) fn parse_redirect_target(
    parser: &mut Parser,
    op: RedirectOp,
) -> Result<RedirectTarget, ShellError> {
    if matches!(op, RedirectOp::ErrToOut | RedirectOp::OutToErr) {
        return Ok(RedirectTarget::None);
    }
    match parser.peek() {
        Token::Word(_) | Token::Assignment { .. } | Token::Handle(_) => {}
        other => {
            let found = other.describe();
            return Err(ShellError::parse(
                ParseErrorKind::UnexpectedToken,
                format!("missing target for `{}`, found {}", op_display(op), found),
            )
            .with_context(format!("Expected: cmd {} filename", op_display(op))));
        }
    }
    match parser.advance() {
        Token::Word(word) => Ok(RedirectTarget::Path(word_node(word)?)),
        Token::Assignment { name, value } => {
            Ok(RedirectTarget::Path(word_node(assignment_word(name, value))?))
        }
        Token::Handle(index) => Ok(RedirectTarget::Handle(index)),
        _ => Ok(RedirectTarget::None),
    }
}
