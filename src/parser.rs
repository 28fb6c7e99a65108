//! Parser for the commands found in `.job` files.
//!
//! A job file holds one command per line:
//!
//! ```text
//! WRITE [(key,value)(key2,value2)]
//! READ [key,key2]
//! DELETE [key]
//! SHOW
//! WAIT 1000
//! BACKUP
//! HELP
//! # comments and blank lines are ignored
//! ```
use crate::protocol::{MAX_STRING_SIZE, MAX_WRITE_SIZE};
use nom::branch::alt;
use nom::bytes::complete::{tag, take_while_m_n};
use nom::character::complete::{char, digit1, space0, space1};
use nom::combinator::{all_consuming, map, map_res, value};
use nom::multi::{many1, separated_list1};
use nom::sequence::{delimited, preceded, separated_pair, terminated};
use nom::IResult;
use std::io::BufRead;
use tracing::warn;

/// A single command of a job file
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// store every (key, value) pair
    Write(Vec<(String, String)>),
    /// read the values of the keys
    Read(Vec<String>),
    /// delete the keys
    Delete(Vec<String>),
    /// dump the whole store
    Show,
    /// pause for the given number of milliseconds
    Wait(u64),
    /// snapshot the store into a backup file
    Backup,
    /// print the command summary
    Help,
    /// blank line or comment
    Empty,
    /// a line that could not be parsed, with the offending text
    Invalid(String),
}

/// usage text printed for `HELP` and alongside invalid commands
pub const HELP_TEXT: &str = "Available commands:\n  \
    WRITE [(key,value)(key2,value2),...]\n  \
    READ [key,key2,...]\n  \
    DELETE [key,key2,...]\n  \
    SHOW\n  \
    WAIT <delay_ms>\n  \
    BACKUP\n  \
    HELP\n";

/// parses a single line of a job file into a [`Command`]
pub fn parse_command(line: &str) -> Command {
    let trimmed = line.trim();
    if trimmed.is_empty() || trimmed.starts_with('#') {
        return Command::Empty;
    }

    match all_consuming(command)(trimmed) {
        Ok((_, Command::Write(pairs))) if pairs.len() > MAX_WRITE_SIZE => {
            Command::Invalid(trimmed.to_string())
        }
        Ok((_, Command::Read(keys))) if keys.len() > MAX_WRITE_SIZE => {
            Command::Invalid(trimmed.to_string())
        }
        Ok((_, Command::Delete(keys))) if keys.len() > MAX_WRITE_SIZE => {
            Command::Invalid(trimmed.to_string())
        }
        Ok((_, cmd)) => cmd,
        Err(_) => Command::Invalid(trimmed.to_string()),
    }
}

/// An iterator over the commands of a job file.
/// It ends when the end of the input (the end-of-commands marker) is reached.
pub struct Commands<R: BufRead> {
    reader: R,
    line: Vec<u8>,
}

impl<R: BufRead> Commands<R> {
    /// wraps a reader positioned at the first command
    pub fn new(reader: R) -> Self {
        Commands {
            reader,
            line: Vec::new(),
        }
    }
}

impl<R: BufRead> Iterator for Commands<R> {
    type Item = Command;

    /// A line that is not valid UTF-8 is an invalid command, reading goes on with the next one.
    fn next(&mut self) -> Option<Command> {
        self.line.clear();
        match self.reader.read_until(b'\n', &mut self.line) {
            Ok(0) => None,
            Ok(_) => match std::str::from_utf8(&self.line) {
                Ok(line) => Some(parse_command(line)),
                Err(_) => {
                    let line = String::from_utf8_lossy(&self.line);
                    Some(Command::Invalid(line.trim_end().to_string()))
                }
            },
            Err(e) => {
                warn!("stopped reading commands: {}", e);
                None
            }
        }
    }
}

fn command(input: &str) -> IResult<&str, Command> {
    alt((
        write,
        map(preceded(keyword("READ"), key_list), Command::Read),
        map(preceded(keyword("DELETE"), key_list), Command::Delete),
        map(preceded(keyword("WAIT"), map_res(digit1, str::parse::<u64>)), Command::Wait),
        value(Command::Show, tag("SHOW")),
        value(Command::Backup, tag("BACKUP")),
        value(Command::Help, tag("HELP")),
    ))(input)
}

fn write(input: &str) -> IResult<&str, Command> {
    let pair = delimited(
        char('('),
        separated_pair(padded_token, char(','), padded_token),
        char(')'),
    );
    map(
        preceded(keyword("WRITE"), delimited(char('['), many1(pair), char(']'))),
        Command::Write,
    )(input)
}

fn key_list(input: &str) -> IResult<&str, Vec<String>> {
    delimited(
        char('['),
        separated_list1(char(','), padded_token),
        char(']'),
    )(input)
}

/// a command keyword followed by at least one space
fn keyword<'a>(word: &'static str) -> impl FnMut(&'a str) -> IResult<&'a str, &'a str> {
    terminated(tag(word), space1)
}

fn padded_token(input: &str) -> IResult<&str, String> {
    delimited(space0, token, space0)(input)
}

fn token(input: &str) -> IResult<&str, String> {
    map(
        take_while_m_n(1, MAX_STRING_SIZE, |c: char| {
            !c.is_whitespace() && !"[](),".contains(c)
        }),
        String::from,
    )(input)
}
