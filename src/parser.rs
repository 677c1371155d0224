//! Parsing of a full input line into a [`LogicalCommand`].
//!
//! The grammar is layered:
//!
//! ```text
//! line    := segment (("&&" | "||") segment)*
//! segment := stage ("|" stage)*
//! stage   := token+ (("<" | ">" | ">>") token)*
//! ```
//!
//! Operators are found by a quote-aware character scan at each level, and only
//! the innermost level hands text to the [lexer](crate::lexer). Redirection
//! files are opened while parsing, so a missing input file aborts the line
//! before anything runs.

use crate::lexer::{self, LexError};
use std::fmt;
use std::fs::{File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Kind of redirection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RedirectKind {
    /// `<`: read standard input from a file.
    Input,
    /// `>`: write standard output to a file, truncating it.
    Output,
    /// `>>`: write standard output to the end of a file.
    Append,
}

impl RedirectKind {
    fn from_token(token: &str) -> Option<Self> {
        match token {
            "<" => Some(RedirectKind::Input),
            ">" => Some(RedirectKind::Output),
            ">>" => Some(RedirectKind::Append),
            _ => None,
        }
    }

    pub fn symbol(self) -> &'static str {
        match self {
            RedirectKind::Input => "<",
            RedirectKind::Output => ">",
            RedirectKind::Append => ">>",
        }
    }
}

impl fmt::Display for RedirectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RedirectKind::Input => f.write_str("input"),
            RedirectKind::Output | RedirectKind::Append => f.write_str("output"),
        }
    }
}

/// Operator joining two pipelines of a [`LogicalCommand`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogicalOp {
    /// `&&`
    And,
    /// `||`
    Or,
}

/// Structural errors in an otherwise well-lexed line.
#[derive(Debug, Error)]
pub enum SyntaxError {
    #[error("syntax error: {} without file", .0.symbol())]
    MissingRedirectTarget(RedirectKind),
    #[error("empty command")]
    EmptyCommand,
    #[error("empty pipeline")]
    EmptyPipeline,
}

/// Errors that abort a line before any of it executes.
#[derive(Debug, Error)]
pub enum ParseError {
    #[error(transparent)]
    Lexical(#[from] LexError),
    #[error(transparent)]
    Syntax(#[from] SyntaxError),
    /// A redirection target could not be opened.
    #[error("open {kind} file '{}': {source}", .path.display())]
    Resource {
        kind: RedirectKind,
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// One stage of a pipeline with its redirections already opened.
#[derive(Debug)]
pub struct ParsedCommand {
    /// Always equal to `args[0]`.
    pub name: String,
    /// Program name followed by its arguments; never empty.
    pub args: Vec<String>,
    /// File given with `<`, if any.
    pub input: Option<File>,
    /// File given with `>` or `>>`, if any.
    pub output: Option<File>,
    /// Whether `output` was opened by `>>`.
    pub append: bool,
}

/// Commands chained output-to-input by `|`. Never empty.
#[derive(Debug)]
pub struct Pipeline {
    pub commands: Vec<ParsedCommand>,
}

/// Pipelines joined by `&&` / `||`.
///
/// `operators.len() == pipelines.len() - 1`; `operators[i]` sits between
/// `pipelines[i]` and `pipelines[i + 1]`.
#[derive(Debug)]
pub struct LogicalCommand {
    pub pipelines: Vec<Pipeline>,
    pub operators: Vec<LogicalOp>,
}

/// Parses stages of a line, opening redirection paths relative to `cwd`.
pub struct LineParser<'a> {
    cwd: &'a Path,
}

impl<'a> LineParser<'a> {
    pub fn new(cwd: &'a Path) -> Self {
        Self { cwd }
    }

    /// Parse a whole line: `segment (("&&" | "||") segment)*`.
    pub fn parse_line(&self, line: &str) -> Result<LogicalCommand, ParseError> {
        if line.trim().is_empty() {
            return Err(SyntaxError::EmptyCommand.into());
        }

        let (segments, operators) = split_by_logical_ops(line);
        let pipelines = segments
            .iter()
            .map(|segment| self.parse_pipeline(segment))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(LogicalCommand {
            pipelines,
            operators,
        })
    }

    /// Parse one logical segment: `stage ("|" stage)*`.
    pub fn parse_pipeline(&self, segment: &str) -> Result<Pipeline, ParseError> {
        let stages = split_by_pipe(segment);
        if stages.is_empty() {
            return Err(SyntaxError::EmptyPipeline.into());
        }

        let commands = stages
            .iter()
            .map(|stage| self.parse_command(stage))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Pipeline { commands })
    }

    /// Parse one stage: arguments interleaved with `<`, `>` and `>>` targets.
    ///
    /// When a redirection of the same direction repeats, the last one wins.
    pub fn parse_command(&self, stage: &str) -> Result<ParsedCommand, ParseError> {
        let tokens = lexer::split_args(stage)?;
        if tokens.is_empty() {
            return Err(SyntaxError::EmptyCommand.into());
        }

        let mut args = Vec::new();
        let mut input_target = None;
        let mut output_target = None;
        let mut append = false;

        let mut tokens = tokens.into_iter();
        while let Some(token) = tokens.next() {
            let Some(kind) = RedirectKind::from_token(&token) else {
                args.push(token);
                continue;
            };
            let target = tokens
                .next()
                .ok_or(SyntaxError::MissingRedirectTarget(kind))?;
            match kind {
                RedirectKind::Input => input_target = Some(target),
                RedirectKind::Output | RedirectKind::Append => {
                    append = kind == RedirectKind::Append;
                    output_target = Some(target);
                }
            }
        }

        if args.is_empty() {
            return Err(SyntaxError::EmptyCommand.into());
        }

        let input = input_target
            .map(|target| self.open(RedirectKind::Input, &target))
            .transpose()?;
        let output_kind = if append {
            RedirectKind::Append
        } else {
            RedirectKind::Output
        };
        let output = output_target
            .map(|target| self.open(output_kind, &target))
            .transpose()?;

        Ok(ParsedCommand {
            name: args[0].clone(),
            args,
            input,
            output,
            append,
        })
    }

    fn open(&self, kind: RedirectKind, target: &str) -> Result<File, ParseError> {
        let path = self.cwd.join(target);
        let mut options = OpenOptions::new();
        match kind {
            RedirectKind::Input => options.read(true),
            RedirectKind::Output => options.write(true).create(true).truncate(true),
            RedirectKind::Append => options.append(true).create(true),
        };
        options
            .open(&path)
            .map_err(|source| ParseError::Resource { kind, path, source })
    }
}

/// Quote tracking shared by the operator scanners. Backslashes are not
/// interpreted at this level.
#[derive(Debug, Default)]
struct QuoteTracker {
    single: bool,
    double: bool,
}

impl QuoteTracker {
    /// Updates the state for `ch` and reports whether `ch` is outside quotes
    /// and not itself a quote.
    fn feed(&mut self, ch: char) -> bool {
        match ch {
            '\'' if !self.double => self.single = !self.single,
            '"' if !self.single => self.double = !self.double,
            _ => return !self.single && !self.double,
        }
        false
    }
}

/// Splits a line on unquoted `&&` and `||`.
///
/// Every operator closes the segment before it, and the final segment is
/// always recorded, so `segments.len() == operators.len() + 1`.
pub fn split_by_logical_ops(line: &str) -> (Vec<String>, Vec<LogicalOp>) {
    let chars: Vec<char> = line.chars().collect();
    let mut segments = Vec::new();
    let mut operators = Vec::new();
    let mut current = String::new();
    let mut quotes = QuoteTracker::default();

    let mut i = 0;
    while i < chars.len() {
        let ch = chars[i];
        let unquoted = quotes.feed(ch);
        let op = match (ch, chars.get(i + 1)) {
            ('&', Some('&')) if unquoted => Some(LogicalOp::And),
            ('|', Some('|')) if unquoted => Some(LogicalOp::Or),
            _ => None,
        };
        match op {
            Some(op) => {
                segments.push(current.trim().to_string());
                current.clear();
                operators.push(op);
                i += 2;
            }
            None => {
                current.push(ch);
                i += 1;
            }
        }
    }
    segments.push(current.trim().to_string());

    (segments, operators)
}

/// Splits a logical segment on unquoted `|`, trimming every stage.
///
/// An empty stage between two pipes is kept (and later rejected by
/// [`LineParser::parse_command`]); an empty trailing stage is dropped.
pub fn split_by_pipe(segment: &str) -> Vec<String> {
    let mut stages = Vec::new();
    let mut current = String::new();
    let mut quotes = QuoteTracker::default();

    for ch in segment.chars() {
        if quotes.feed(ch) && ch == '|' {
            stages.push(current.trim().to_string());
            current.clear();
        } else {
            current.push(ch);
        }
    }
    let last = current.trim();
    if !last.is_empty() {
        stages.push(last.to_string());
    }

    stages
}
