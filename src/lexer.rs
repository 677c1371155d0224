//! Lexical analysis of a single pipeline stage into argument strings.
//!
//! The lexer sees text that has already been split on `|`, `&&` and `||`.
//! Quotes are resolved here, so no token handed upward ever carries a quote
//! character.

use thiserror::Error;

/// Character rejected anywhere in the input.
///
/// It shows up when input arrives in an encoding the shell does not handle,
/// so it is refused outright instead of being passed to a program.
pub const INVALID_CHAR: char = '\u{02DC}';

/// Errors that can occur during the lexical analysis process.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum LexError {
    /// A single quote was opened but never closed.
    #[error("unterminated single quote")]
    UnterminatedSingleQuote,
    /// A double quote was opened but never closed.
    #[error("unterminated double quote")]
    UnterminatedDoubleQuote,
    /// The input ended right after a backslash.
    #[error("unfinished escape sequence")]
    DanglingEscape,
    /// The input contains [`INVALID_CHAR`].
    #[error("invalid character {0:?}")]
    InvalidCharacter(char),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LexingState {
    Unquoted,
    SingleQuoted,
    DoubleQuoted,
}

/// Splits one pipeline stage into arguments.
///
/// - whitespace outside quotes separates arguments;
/// - `'...'` keeps its contents verbatim, backslashes included;
/// - `"..."` keeps whitespace but still honours backslash escapes;
/// - a backslash outside single quotes escapes the next character and both
///   characters are kept, so `a\ b` is the single argument `a\ b`. `echo`
///   relies on this to see the two-character `\n` sequence.
///
/// Quote pairs that enclose nothing do not produce an argument on their own.
pub fn split_args(input: &str) -> Result<Vec<String>, LexError> {
    let mut args = Vec::new();
    let mut current = String::new();
    let mut state = LexingState::Unquoted;
    let mut escaped = false;

    for ch in input.chars() {
        if ch == INVALID_CHAR {
            return Err(LexError::InvalidCharacter(ch));
        }
        if escaped {
            current.push('\\');
            current.push(ch);
            escaped = false;
            continue;
        }
        match (state, ch) {
            (LexingState::SingleQuoted, '\'') => state = LexingState::Unquoted,
            (LexingState::SingleQuoted, c) => current.push(c),
            (_, '\\') => escaped = true,
            (LexingState::Unquoted, '\'') => state = LexingState::SingleQuoted,
            (LexingState::Unquoted, '"') => state = LexingState::DoubleQuoted,
            (LexingState::DoubleQuoted, '"') => state = LexingState::Unquoted,
            (LexingState::Unquoted, c) if c.is_whitespace() => {
                if !current.is_empty() {
                    args.push(std::mem::take(&mut current));
                }
            }
            (_, c) => current.push(c),
        }
    }

    if escaped {
        return Err(LexError::DanglingEscape);
    }
    match state {
        LexingState::SingleQuoted => return Err(LexError::UnterminatedSingleQuote),
        LexingState::DoubleQuoted => return Err(LexError::UnterminatedDoubleQuote),
        LexingState::Unquoted => {}
    }
    if !current.is_empty() {
        args.push(current);
    }
    Ok(args)
}
