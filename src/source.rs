//! Definition files
//!
//! A definition file holds any number of scripts, each written as a header
//! followed by a braced body:
//!
//! ```text
//! @ai float lerp(float a, float b, float t) {
//!     return a + (b - a) * t;
//! }
//! ```
//!
//! Splitting only locates headers and matching braces; bodies are kept as
//! text and parsed again when compiled.

use crate::error::{ErrorKind, Result, ScriptError};
use crate::lexer::Lexer;
use crate::parser::Parser;
use crate::script::ScriptSource;
use crate::token::TokenKind;

/// Split `text` into one source per definition, in file order.
pub fn split_definitions(text: &str) -> Result<Vec<ScriptSource>> {
    let tokens = Lexer::new(text).tokenize()?;
    let mut parser = Parser::new(tokens);
    let mut sources = Vec::new();

    while !parser.is_at_end() {
        let header = parser.header()?;
        let open = parser
            .expect(&TokenKind::LeftBrace, "expected '{' before script body")?
            .span;

        let mut depth = 1usize;
        let close = loop {
            if parser.is_at_end() {
                return Err(ScriptError::new(
                    ErrorKind::InvalidDefinition(format!(
                        "body of '{}' is missing its closing '}}'",
                        header.name()
                    )),
                    Some(open),
                ));
            }
            let token = parser.advance();
            match token.kind {
                TokenKind::LeftBrace => depth += 1,
                TokenKind::RightBrace => {
                    depth -= 1;
                    if depth == 0 {
                        break token.span;
                    }
                }
                _ => {}
            }
        };

        let mut source = ScriptSource::new(&text[open.end..close.start], header);
        source.first_line = open.line;
        sources.push(source);
    }

    Ok(sources)
}
