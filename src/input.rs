//! Prompt and line reading.

use std::io::{self, BufRead, Write};

use rustyline::error::ReadlineError;
use rustyline::{
    Cmd, ConditionalEventHandler, DefaultEditor, Event, EventContext, EventHandler, KeyEvent,
    RepeatCount,
};
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadOutcome {
    /// A line, without its trailing newline.
    Line(String),
    /// The read was cut short (^C at the editor); nothing was entered.
    Interrupted,
    Eof,
}

pub trait LineReader {
    fn read_line(&mut self, prompt: &str) -> io::Result<ReadOutcome>;
}

/// Interactive input through `rustyline`, used when stdin is a terminal.
pub struct TerminalReader {
    editor: DefaultEditor,
}

impl TerminalReader {
    pub fn new() -> io::Result<Self> {
        let mut editor = DefaultEditor::new().map_err(readline_to_io)?;
        // raw mode keeps the terminal from sending SIGTSTP for ^Z
        editor.bind_sequence(
            KeyEvent::ctrl('Z'),
            EventHandler::Conditional(Box::new(ToggleOnSuspend)),
        );
        Ok(TerminalReader { editor })
    }
}

/// Turns ^Z at the editor into the same toggle a SIGTSTP would request.
struct ToggleOnSuspend;

impl ConditionalEventHandler for ToggleOnSuspend {
    fn handle(&self, _: &Event, _: RepeatCount, _: bool, _: &EventContext) -> Option<Cmd> {
        Some(suspend_to_toggle())
    }
}

/// Raises SIGTSTP and abandons the line so the loop reports the toggle now.
fn suspend_to_toggle() -> Cmd {
    unsafe { libc::raise(libc::SIGTSTP) };
    Cmd::Interrupt
}

impl LineReader for TerminalReader {
    fn read_line(&mut self, prompt: &str) -> io::Result<ReadOutcome> {
        match self.editor.readline(prompt) {
            Ok(line) => {
                if !line.trim().is_empty() {
                    let _ = self.editor.add_history_entry(line.as_str());
                }
                Ok(ReadOutcome::Line(line))
            }
            Err(ReadlineError::Interrupted) | Err(ReadlineError::WindowResized) => {
                Ok(ReadOutcome::Interrupted)
            }
            Err(ReadlineError::Io(e)) if e.kind() == io::ErrorKind::Interrupted => {
                Ok(ReadOutcome::Interrupted)
            }
            Err(ReadlineError::Eof) => Ok(ReadOutcome::Eof),
            Err(e) => Err(readline_to_io(e)),
        }
    }
}

fn readline_to_io(err: ReadlineError) -> io::Error {
    match err {
        ReadlineError::Io(e) => e,
        other => io::Error::new(io::ErrorKind::Other, other.to_string()),
    }
}

/// Plain buffered input for pipes and files; writes the prompt itself.
pub struct StreamReader<R, W> {
    input: R,
    output: W,
}

impl<R: BufRead, W: Write> StreamReader<R, W> {
    pub fn new(input: R, output: W) -> Self {
        StreamReader { input, output }
    }
}

impl<R: BufRead, W: Write> LineReader for StreamReader<R, W> {
    fn read_line(&mut self, prompt: &str) -> io::Result<ReadOutcome> {
        self.output.write_all(prompt.as_bytes())?;
        self.output.flush()?;

        let mut line = String::new();
        if self.input.read_line(&mut line)? == 0 {
            return Ok(ReadOutcome::Eof);
        }

        if line.ends_with('\n') {
            line.pop();
            if line.ends_with('\r') {
                line.pop();
            }
        }
        Ok(ReadOutcome::Line(line))
    }
}

/// Picks the reader that fits standard input.
pub fn open_stdin() -> io::Result<Box<dyn LineReader>> {
    if unsafe { libc::isatty(libc::STDIN_FILENO) } == 1 {
        debug!("reading from a terminal");
        Ok(Box::new(TerminalReader::new()?))
    } else {
        debug!("reading from a stream");
        Ok(Box::new(StreamReader::new(
            io::BufReader::new(io::stdin()),
            io::stdout(),
        )))
    }
}
