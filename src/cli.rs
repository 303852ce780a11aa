//! CLI utilities for the TreeStore client.
//!
//! The utilities present in this module can be used to build an interactive
//! shell that sends raw commands through [`Client::raw_command`](crate::Client::raw_command).
//!
//! Arguments are separated by whitespace; wrap an argument in double quotes to
//! keep spaces in it. Arguments are sent as typed, so binary values can be
//! entered in their escaped form (`\0A` for a newline byte).
use std::{
    io::{self, BufRead, Write},
    mem,
};

use serde_json::Value as JsonValue;
use thiserror::Error;

use crate::Client;

/// Possible commands from a user.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Command {
    /// Exit command `.exit`, or end of input
    Exit,
    /// Blank line
    Empty,
    /// Arguments of a server command, verb first
    Raw(Vec<String>),
}

#[derive(Debug, Error)]
pub enum PromptError {
    #[error("unrecognized command '{0}'")]
    UnrecognizedCommand(String),

    #[error("unterminated quote in '{0}'")]
    UnterminatedQuote(String),

    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Prompt user for a command.
pub fn prompt<R, W>(mut reader: R, mut writer: W) -> Result<Command, PromptError>
where
    R: BufRead,
    W: Write,
{
    write!(&mut writer, "> ")?;
    writer.flush()?;

    let mut s = String::default();
    if reader.read_line(&mut s)? == 0 {
        return Ok(Command::Exit);
    }
    parse_line(&s)
}

/// Runs the interactive loop until `.exit` or end of input.
///
/// Responses are pretty printed to `out`; command and parse errors go to
/// `err` and the loop continues. An I/O error on the terminal ends the loop.
pub fn repl<R, W, E>(client: &Client, mut reader: R, mut out: W, mut err: E) -> io::Result<()>
where
    R: BufRead,
    W: Write,
    E: Write,
{
    loop {
        let cmd = match prompt(&mut reader, &mut out) {
            Ok(c) => c,
            Err(PromptError::Io(e)) => return Err(e),
            Err(e) => {
                writeln!(err, "{e}")?;
                continue;
            }
        };

        match cmd {
            Command::Exit => return Ok(()),
            Command::Empty => {}
            Command::Raw(args) => match client.raw_command(&args) {
                Ok(response) => writeln!(out, "{:#}", JsonValue::Object(response))?,
                Err(e) => writeln!(err, "error: {e}")?,
            },
        }
    }
}

/// Parses one input line into a [`Command`].
pub fn parse_line(line: &str) -> Result<Command, PromptError> {
    match line.trim() {
        ".exit" => Ok(Command::Exit),
        "" => Ok(Command::Empty),
        s if s.starts_with('.') => Err(PromptError::UnrecognizedCommand(s.to_string())),
        s => split_args(s).map(Command::Raw),
    }
}

fn split_args(line: &str) -> Result<Vec<String>, PromptError> {
    let mut args = Vec::new();
    let mut current = String::new();
    let mut in_token = false;
    let mut in_quotes = false;

    for ch in line.chars() {
        match ch {
            '"' => {
                in_quotes = !in_quotes;
                in_token = true;
            }
            c if c.is_whitespace() && !in_quotes => {
                if in_token {
                    args.push(mem::take(&mut current));
                    in_token = false;
                }
            }
            c => {
                current.push(c);
                in_token = true;
            }
        }
    }

    if in_quotes {
        return Err(PromptError::UnterminatedQuote(line.to_string()));
    }
    if in_token {
        args.push(current);
    }
    Ok(args)
}
