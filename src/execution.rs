use std::ffi::{CStr, CString};
use std::fmt;
use std::io;
use std::mem::MaybeUninit;
use std::os::raw::c_char;
use std::ptr::null;

use libc::{c_int, c_uint, pid_t, sigset_t, STDERR_FILENO, STDIN_FILENO, STDOUT_FILENO};
use thiserror::Error;
use tracing::{debug, warn};

use crate::parser::Command;
use crate::sig::{self, errno, BlockedSignals, SigError, SHELL_SIGNALS};

const OUTPUT_MODE: c_uint = 0o644;

/// How a child process ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    Exited(i32),
    Signaled(i32),
}

impl Termination {
    /// Decodes a raw `waitpid` status.
    pub fn from_raw(status: c_int) -> Self {
        if libc::WIFSIGNALED(status) {
            Termination::Signaled(libc::WTERMSIG(status))
        } else {
            Termination::Exited(libc::WEXITSTATUS(status))
        }
    }
}

impl Default for Termination {
    fn default() -> Self {
        Termination::Exited(0)
    }
}

impl fmt::Display for Termination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Termination::Exited(code) => write!(f, "exit value {}", code),
            Termination::Signaled(signum) => write!(f, "terminated by signal {}", signum),
        }
    }
}

#[derive(Debug, Error)]
pub enum ExecutionError {
    #[error("fork failed: {}", io::Error::from_raw_os_error(*.0))]
    Fork(c_int),
    #[error("waitpid failed: {}", io::Error::from_raw_os_error(*.0))]
    Wait(c_int),
    #[error("{0}: argument contains a NUL byte")]
    Nul(String),
    #[error(transparent)]
    Signal(#[from] SigError),
}

impl ExecutionError {
    /// Whether the whole shell has to stop, not just this command.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, ExecutionError::Nul(_))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Launch {
    Background(pid_t),
    Foreground(Termination),
}

/// Everything the child needs, converted before fork so the child side
/// does not allocate.
struct Prepared {
    program: CString,
    arguments: Vec<CString>,
    input: Option<CString>,
    output: Option<CString>,
}

impl Prepared {
    fn new(command: &Command) -> Result<Self, ExecutionError> {
        fn c_string(s: &str) -> Result<CString, ExecutionError> {
            CString::new(s).map_err(|_| ExecutionError::Nul(s.to_owned()))
        }

        Ok(Prepared {
            program: c_string(&command.name)?,
            arguments: command
                .arguments
                .iter()
                .map(|arg| c_string(arg))
                .collect::<Result<_, _>>()?,
            input: command.input.as_deref().map(c_string).transpose()?,
            output: command.output.as_deref().map(c_string).transpose()?,
        })
    }
}

/// Runs an external command.
///
/// The command goes to the background only when it asks for it and
/// `background_allowed` is set; otherwise this blocks until the child
/// terminates. Only a failed fork is reported as an error, everything that
/// goes wrong after it shows up as the child's exit status.
pub fn launch(command: &Command, background_allowed: bool) -> Result<Launch, ExecutionError> {
    let background = command.background && background_allowed;
    let prepared = Prepared::new(command)?;
    let mut argv: Vec<*const c_char> = prepared.arguments.iter().map(|a| a.as_ptr()).collect();
    argv.push(null());

    let guard = BlockedSignals::block(&SHELL_SIGNALS)?;

    match unsafe { libc::fork() } {
        -1 => Err(ExecutionError::Fork(errno())),
        0 => exec_child(&prepared, &argv, background, guard.previous()),
        pid if background => {
            drop(guard);
            debug!(pid, command = %command.name, "spawned background process");
            Ok(Launch::Background(pid))
        }
        pid => {
            sig::set_foreground(Some(pid));
            drop(guard);
            debug!(pid, command = %command.name, "spawned foreground process");

            // the child stays a zombie until the marker is gone, so the
            // interrupt handler can only ever signal a live or unreaped pid
            let exited = wait_exited(pid);

            let guard = BlockedSignals::block(&[libc::SIGINT]);
            sig::set_foreground(None);
            drop(guard);

            exited?;
            Ok(Launch::Foreground(wait_foreground(pid)?))
        }
    }
}

/// Blocks until `pid` terminates without reaping it.
pub(crate) fn wait_exited(pid: pid_t) -> Result<(), ExecutionError> {
    let mut info = unsafe { MaybeUninit::<libc::siginfo_t>::zeroed().assume_init() };

    loop {
        let options = libc::WEXITED | libc::WNOWAIT;
        match unsafe { libc::waitid(libc::P_PID, pid as libc::id_t, &mut info, options) } {
            -1 => match errno() {
                libc::EINTR => continue,
                e => {
                    warn!(pid, errno = e, "waitid on foreground process failed");
                    return Err(ExecutionError::Wait(e));
                }
            },
            _ => return Ok(()),
        }
    }
}

/// Blocks until `pid` terminates and reaps it.
pub(crate) fn wait_foreground(pid: pid_t) -> Result<Termination, ExecutionError> {
    let mut status: c_int = 0;

    loop {
        match unsafe { libc::waitpid(pid, &mut status, 0) } {
            -1 => match errno() {
                libc::EINTR => continue,
                e => {
                    warn!(pid, errno = e, "waitpid on foreground process failed");
                    return Err(ExecutionError::Wait(e));
                }
            },
            _ => {
                let termination = Termination::from_raw(status);
                debug!(pid, %termination, "foreground process finished");
                return Ok(termination);
            }
        }
    }
}

fn exec_child(
    prepared: &Prepared,
    argv: &[*const c_char],
    background: bool,
    mask: &sigset_t,
) -> ! {
    // the toggle signal never stops a job, and background jobs outlive ^C
    let dispositions = [
        (libc::SIGTSTP, true),
        (libc::SIGINT, background),
        (libc::SIGCHLD, false),
    ];
    for &(signum, ignored) in dispositions.iter() {
        if sig::set_ignored(signum, ignored).is_err() {
            child_fail(&prepared.program);
        }
    }
    unsafe { libc::sigprocmask(libc::SIG_SETMASK, mask, std::ptr::null_mut()) };

    if let Some(path) = &prepared.input {
        redirect(path, libc::O_RDONLY, STDIN_FILENO);
    }
    if let Some(path) = &prepared.output {
        redirect(
            path,
            libc::O_WRONLY | libc::O_CREAT | libc::O_TRUNC,
            STDOUT_FILENO,
        );
    }

    unsafe { libc::execvp(prepared.program.as_ptr(), argv.as_ptr()) };
    child_fail(&prepared.program)
}

fn redirect(path: &CStr, flags: c_int, target: c_int) {
    let fd = unsafe { libc::open(path.as_ptr(), flags, OUTPUT_MODE) };
    if fd == -1 {
        child_fail(path);
    }
    if unsafe { libc::dup2(fd, target) } == -1 {
        child_fail(path);
    }
    unsafe { libc::close(fd) };
}

/// Reports `<what>: <strerror>` on stderr and terminates the child.
fn child_fail(what: &CStr) -> ! {
    let message = unsafe { CStr::from_ptr(libc::strerror(errno())) };

    let parts: [&[u8]; 4] = [what.to_bytes(), b": ", message.to_bytes(), b"\n"];
    for part in parts.iter() {
        unsafe { libc::write(STDERR_FILENO, part.as_ptr() as *const _, part.len()) };
    }

    unsafe { libc::_exit(1) }
}
