//! A small interactive shell: `$$` expansion, `exit`/`cd`/`status`
//! builtins, `<`/`>` redirection, background jobs and a foreground-only
//! mode toggled with SIGTSTP.

pub mod builtin;
pub mod config;
pub mod execution;
pub mod expand;
pub mod input;
pub mod job;
pub mod parser;
pub mod shell;
pub mod sig;

#[cfg(test)]
use lazy_static::lazy_static;

#[cfg(test)]
lazy_static! {
    // tests that fork, wait or raise signals share process-wide state
    static ref PROCESS_LOCK: std::sync::Mutex<()> = std::sync::Mutex::new(());
}

#[cfg(test)]
pub(crate) fn process_lock() -> std::sync::MutexGuard<'static, ()> {
    PROCESS_LOCK.lock().unwrap_or_else(|e| e.into_inner())
}
