//! Shell state and the interactive loop.

use std::fmt::Display;
use std::io::{self, Write};

use thiserror::Error;
use tracing::{debug, info};

use crate::builtin::{self, Builtin};
use crate::config::Config;
use crate::execution::{self, ExecutionError, Launch, Termination};
use crate::expand;
use crate::input::{LineReader, ReadOutcome};
use crate::job::JobRegistry;
use crate::parser::{self, Command};
use crate::sig::{self, SignalEvents};

const ENTER_FOREGROUND_ONLY: &str = "Entering foreground-only mode (& is now ignored)";
const EXIT_FOREGROUND_ONLY: &str = "Exiting foreground-only mode";

#[derive(Debug, Error)]
pub enum ShellError {
    #[error(transparent)]
    Execution(#[from] ExecutionError),
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),
}

/// Everything the shell keeps between prompts.
///
/// The handlers never touch this; they raise events in [`sig`] which
/// [`Shell::handle_signal_events`] applies on the main loop.
pub struct Shell<W> {
    config: Config,
    out: W,
    pid: u32,
    jobs: JobRegistry,
    last_status: Option<Termination>,
    background_enabled: bool,
    exiting: bool,
}

impl<W: Write> Shell<W> {
    pub fn new(config: Config, out: W) -> Self {
        let jobs = JobRegistry::new(config.max_jobs);
        Shell {
            config,
            out,
            pid: std::process::id(),
            jobs,
            last_status: None,
            background_enabled: true,
            exiting: false,
        }
    }

    pub fn jobs(&self) -> &JobRegistry {
        &self.jobs
    }

    /// Status of the last foreground command, `exit value 0` before the first.
    pub fn last_status(&self) -> Termination {
        self.last_status.unwrap_or_default()
    }

    pub fn background_enabled(&self) -> bool {
        self.background_enabled
    }

    pub fn is_exiting(&self) -> bool {
        self.exiting
    }

    /// Runs until `exit` or end of input.
    pub fn run(&mut self, reader: &mut dyn LineReader) -> Result<(), ShellError> {
        while !self.exiting {
            self.handle_signal_events()?;
            self.report_jobs()?;
            self.out.flush()?;

            match reader.read_line(&self.config.prompt)? {
                ReadOutcome::Line(line) => {
                    self.handle_signal_events()?;
                    self.execute_line(&line)?;
                }
                ReadOutcome::Interrupted => {
                    let events = self.handle_signal_events()?;
                    if !events.interrupted && events.toggles == 0 {
                        writeln!(self.out)?;
                    }
                }
                ReadOutcome::Eof => {
                    debug!("end of input");
                    self.exit();
                }
            }
        }

        self.out.flush()?;
        Ok(())
    }

    /// Expands, parses and dispatches one line.
    ///
    /// Only fatal errors are returned; anything local to the command is
    /// reported on stderr.
    pub fn execute_line(&mut self, line: &str) -> Result<(), ShellError> {
        let expanded = match expand::expand_pid(line, self.pid, self.config.max_line_length) {
            Ok(expanded) => expanded,
            Err(e) => {
                report(e);
                return Ok(());
            }
        };

        match parser::parse(&expanded, self.config.max_arguments) {
            Ok(Some(command)) => self.dispatch(&command),
            Ok(None) => Ok(()),
            Err(e) => {
                report(e);
                Ok(())
            }
        }
    }

    fn dispatch(&mut self, command: &Command) -> Result<(), ShellError> {
        match Builtin::lookup(&command.name) {
            Some(Builtin::Exit) => self.exit(),
            Some(Builtin::Cd) => {
                let target = command.arguments.get(1).map(String::as_str);
                if let Err(e) = builtin::change_directory(target) {
                    report(e);
                }
            }
            Some(Builtin::Status) => {
                let status = self.last_status();
                writeln!(self.out, "{}", status)?;
            }
            None => self.run_external(command)?,
        }

        Ok(())
    }

    fn run_external(&mut self, command: &Command) -> Result<(), ShellError> {
        if command.background && self.background_enabled {
            if let Err(e) = self.jobs.ensure_room() {
                report(e);
                return Ok(());
            }
        }

        // the child inherits stdout, buffered text must go out first
        self.out.flush()?;

        match execution::launch(command, self.background_enabled) {
            Ok(Launch::Background(pid)) => {
                if let Err(e) = self.jobs.insert(pid) {
                    report(e);
                }
            }
            Ok(Launch::Foreground(termination)) => {
                // a ^C the child survived still gets its newline from
                // handle_signal_events
                if let Termination::Signaled(_) = termination {
                    sig::clear_interrupt();
                    writeln!(self.out, "{}", termination)?;
                }
                self.last_status = Some(termination);
            }
            Err(e) if e.is_fatal() => return Err(e.into()),
            Err(e) => report(e),
        }

        Ok(())
    }

    /// Applies what the handlers recorded since the last call.
    pub fn handle_signal_events(&mut self) -> Result<SignalEvents, ShellError> {
        let events = sig::take_events();
        if events.is_empty() {
            return Ok(events);
        }
        debug!(?events, "signal events");

        for _ in 0..events.toggles {
            self.toggle_foreground_only()?;
        }
        if events.interrupted {
            writeln!(self.out)?;
        }
        if events.child_exited {
            // no foreground child exists here, launch() has already waited
            self.jobs.reap_children();
        }

        Ok(events)
    }

    pub fn toggle_foreground_only(&mut self) -> Result<(), ShellError> {
        self.background_enabled = !self.background_enabled;
        let message = if self.background_enabled {
            EXIT_FOREGROUND_ONLY
        } else {
            ENTER_FOREGROUND_ONLY
        };
        info!(background_enabled = self.background_enabled, "toggled foreground-only mode");
        writeln!(self.out, "{}", message)?;

        Ok(())
    }

    /// Prints the per-prompt job report.
    pub fn report_jobs(&mut self) -> Result<(), ShellError> {
        for report in self.jobs.poll() {
            writeln!(self.out, "{}", report)?;
        }

        Ok(())
    }

    fn exit(&mut self) {
        debug!(jobs = self.jobs.len(), "exiting");
        self.jobs.terminate_all();
        self.jobs.reap_children();
        self.exiting = true;
    }
}

fn report(err: impl Display) {
    eprintln!("smallsh: {}", err);
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::io;
    use std::thread;
    use std::time::Duration;

    use super::Shell;
    use crate::config::Config;
    use crate::execution::{self, Termination};
    use crate::input::{LineReader, ReadOutcome};
    use crate::process_lock;
    use crate::sig;

    struct Script(VecDeque<ReadOutcome>);

    impl Script {
        fn lines(lines: &[&str]) -> Self {
            Script(
                lines
                    .iter()
                    .map(|line| ReadOutcome::Line(line.to_string()))
                    .collect(),
            )
        }
    }

    impl LineReader for Script {
        fn read_line(&mut self, _prompt: &str) -> io::Result<ReadOutcome> {
            Ok(self.0.pop_front().unwrap_or(ReadOutcome::Eof))
        }
    }

    fn run(lines: &[&str]) -> (Shell<Vec<u8>>, String) {
        let mut shell = Shell::new(Config::default(), Vec::new());
        shell.run(&mut Script::lines(lines)).unwrap();
        let output = String::from_utf8(std::mem::take(&mut shell.out)).unwrap();
        (shell, output)
    }

    #[test]
    fn test_status_before_any_command() {
        let _lock = process_lock();
        sig::take_events();

        let (shell, output) = run(&["status", "exit"]);
        assert_eq!(output, "exit value 0\n");
        assert!(shell.is_exiting());
    }

    #[test]
    fn test_status_after_false() {
        let _lock = process_lock();
        sig::take_events();

        let (shell, output) = run(&["false", "status", "true", "status"]);
        assert_eq!(output, "exit value 1\nexit value 0\n");
        assert_eq!(shell.last_status(), Termination::Exited(0));
    }

    #[test]
    fn test_status_after_signal() -> Result<(), Box<dyn std::error::Error>> {
        let _lock = process_lock();
        sig::take_events();

        // the script's own $$ is left to sh
        let dir = tempfile::tempdir()?;
        let script = dir.path().join("suicide.sh");
        std::fs::write(&script, "kill -TERM $$\n")?;

        let line = format!("sh {}", script.display());
        let (shell, output) = run(&[line.as_str(), "status"]);
        assert_eq!(
            output,
            "terminated by signal 15\nterminated by signal 15\n"
        );
        assert_eq!(shell.last_status(), Termination::Signaled(libc::SIGTERM));

        Ok(())
    }

    #[test]
    fn test_blank_lines_are_ignored() {
        let _lock = process_lock();
        sig::take_events();

        let (shell, output) = run(&["", "   ", "\t"]);
        assert_eq!(output, "");
        assert!(shell.is_exiting());
    }

    #[test]
    fn test_toggle_twice_restores_mode() {
        let mut shell = Shell::new(Config::default(), Vec::new());
        assert!(shell.background_enabled());

        shell.toggle_foreground_only().unwrap();
        assert!(!shell.background_enabled());
        shell.toggle_foreground_only().unwrap();
        assert!(shell.background_enabled());

        assert_eq!(
            String::from_utf8(shell.out).unwrap(),
            "Entering foreground-only mode (& is now ignored)\nExiting foreground-only mode\n"
        );
    }

    #[test]
    fn test_foreground_only_ignores_ampersand() {
        let _lock = process_lock();
        sig::take_events();

        let mut shell = Shell::new(Config::default(), Vec::new());
        shell.toggle_foreground_only().unwrap();
        shell.execute_line("false &").unwrap();

        assert!(shell.jobs().is_empty());
        assert_eq!(shell.last_status(), Termination::Exited(1));
    }

    #[test]
    fn test_reaped_background_job_is_reported_once() -> Result<(), Box<dyn std::error::Error>> {
        let _lock = process_lock();
        sig::install_handlers()?;
        sig::take_events();

        let mut shell = Shell::new(Config::default(), Vec::new());
        shell.execute_line("true &")?;
        let pid = shell.jobs().pids().next().unwrap();
        execution::wait_exited(pid)?;

        // the SIGCHLD drain collects the status before any poll
        let mut reaped = false;
        for _ in 0..100 {
            if shell.handle_signal_events()?.child_exited {
                reaped = true;
                break;
            }
            thread::sleep(Duration::from_millis(20));
        }
        assert!(reaped);
        assert!(shell.jobs().contains(pid));

        shell.report_jobs()?;
        shell.report_jobs()?;

        assert!(shell.jobs().is_empty());
        assert_eq!(
            String::from_utf8(shell.out)?,
            format!("background pid {} is done: exit value 0\n", pid)
        );

        Ok(())
    }

    #[test]
    fn test_background_limit_is_local() {
        let _lock = process_lock();
        sig::take_events();

        let config = Config {
            max_jobs: 1,
            ..Config::default()
        };
        let mut shell = Shell::new(config, Vec::new());
        shell.execute_line("sleep 5 &").unwrap();
        shell.execute_line("sleep 5 &").unwrap();
        assert_eq!(shell.jobs().len(), 1);

        // still runs in the foreground
        shell.execute_line("true").unwrap();
        assert_eq!(shell.last_status(), Termination::Exited(0));

        shell.exit();
        while !shell.jobs().is_empty() {
            shell.report_jobs().unwrap();
            thread::sleep(Duration::from_millis(20));
        }
    }

    #[test]
    fn test_background_job_is_tracked_and_reported() {
        let _lock = process_lock();
        sig::take_events();

        let mut shell = Shell::new(Config::default(), Vec::new());
        shell.execute_line("sleep 0.2 &").unwrap();
        assert_eq!(shell.jobs().len(), 1);
        let pid = shell.jobs().pids().next().unwrap();

        shell.report_jobs().unwrap();
        // background commands never touch the foreground status
        shell.execute_line("sleep 0.5").unwrap();
        shell.report_jobs().unwrap();
        shell.report_jobs().unwrap();

        let output = String::from_utf8(shell.out).unwrap();
        assert_eq!(
            output,
            format!(
                "background pid is {}\nbackground pid {} is done: exit value 0\n",
                pid, pid
            )
        );
    }
}
