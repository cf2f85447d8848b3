// https://github.com/Geal/nom/blob/master/doc/choosing_a_combinator.md

use nom::{
    bytes::complete::take_till1,
    character::complete::{multispace0, multispace1},
    combinator::all_consuming,
    multi::separated_list0,
    sequence::delimited,
    IResult,
};
use thiserror::Error;
use tracing::debug;

const INPUT_REDIRECT: &str = "<";
const OUTPUT_REDIRECT: &str = ">";
const BACKGROUND: &str = "&";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Command {
    pub name: String,
    /// Program name first.
    pub arguments: Vec<String>,
    pub input: Option<String>,
    pub output: Option<String>,
    pub background: bool,
}

#[derive(Debug, PartialEq, Error)]
pub enum ParseError {
    #[error("too many arguments (limit is {limit})")]
    TooManyArguments { limit: usize },
    #[error("missing command name")]
    MissingCommand,
    #[error("malformed line: {0}")]
    Malformed(String),
}

fn tokens(input: &str) -> IResult<&str, Vec<&str>> {
    delimited(
        multispace0,
        separated_list0(multispace1, take_till1(char::is_whitespace)),
        multispace0,
    )(input)
}

/// Parses one expanded line.
///
/// Returns `Ok(None)` for a blank line. `<` and `>` take the following token
/// as their path; a trailing marker without a path is dropped. `&` marks the
/// command as background wherever it appears.
pub fn parse(input: &str, max_arguments: usize) -> Result<Option<Command>, ParseError> {
    let (_, words) =
        all_consuming(tokens)(input).map_err(|e| ParseError::Malformed(e.to_string()))?;

    if words.is_empty() {
        return Ok(None);
    }

    let mut command = Command::default();
    let mut words = words.into_iter();

    while let Some(word) = words.next() {
        match word {
            INPUT_REDIRECT => command.input = words.next().map(str::to_owned),
            OUTPUT_REDIRECT => command.output = words.next().map(str::to_owned),
            BACKGROUND => command.background = true,
            _ => {
                if command.arguments.len() == max_arguments {
                    return Err(ParseError::TooManyArguments {
                        limit: max_arguments,
                    });
                }
                command.arguments.push(word.to_owned());
            }
        }
    }

    command.name = command
        .arguments
        .first()
        .cloned()
        .ok_or(ParseError::MissingCommand)?;

    debug!(?command, "parsed");
    Ok(Some(command))
}
