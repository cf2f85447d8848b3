// https://github.com/vorner/signal-hook/blob/master/signal-hook-registry/src/lib.rs

//! Signal controller.
//!
//! The three handlers installed here only touch the atomics below (plus a
//! `kill` to forward an interrupt). Everything user-visible happens on the
//! main loop after it drains the pending events with [`take_events`].

use std::io;
use std::mem::MaybeUninit;
use std::ptr::null_mut;
use std::sync::atomic::{AtomicBool, AtomicI32, AtomicU32, Ordering};

use libc::{
    c_int, c_void, pid_t, sigaction, sigaddset, sigemptyset, sigfillset, sighandler_t, siginfo_t,
    sigprocmask, sigset_t,
};
use thiserror::Error;

/// Signals whose handlers read or write shell state.
pub const SHELL_SIGNALS: [c_int; 3] = [libc::SIGINT, libc::SIGTSTP, libc::SIGCHLD];

static FOREGROUND_PID: AtomicI32 = AtomicI32::new(0);
static PENDING_TOGGLES: AtomicU32 = AtomicU32::new(0);
static INTERRUPTED: AtomicBool = AtomicBool::new(false);
static CHILD_EXITED: AtomicBool = AtomicBool::new(false);

#[derive(Debug, PartialEq, Error)]
pub enum SigError {
    #[error("{}", io::Error::from_raw_os_error(*.0))]
    Syscall(c_int),
}

/// Events raised by the handlers since the last call to [`take_events`].
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SignalEvents {
    /// Number of foreground-only toggle requests (SIGTSTP deliveries).
    pub toggles: u32,
    /// An interrupt arrived.
    pub interrupted: bool,
    /// At least one child changed state.
    pub child_exited: bool,
}

impl SignalEvents {
    pub fn is_empty(&self) -> bool {
        *self == SignalEvents::default()
    }
}

pub(crate) fn errno() -> c_int {
    io::Error::last_os_error().raw_os_error().unwrap_or(0)
}

#[cfg(any(target_os = "linux", target_os = "android"))]
unsafe fn errno_location() -> *mut c_int {
    libc::__errno_location()
}

#[cfg(any(target_os = "macos", target_os = "ios", target_os = "freebsd"))]
unsafe fn errno_location() -> *mut c_int {
    libc::__error()
}

pub(crate) extern "C" fn handler(sig: c_int, _info: *mut siginfo_t, _gdata: *mut c_void) {
    // kill() may clobber errno of the interrupted code
    let saved_errno = unsafe { *errno_location() };

    match sig {
        libc::SIGINT => {
            let pid = FOREGROUND_PID.load(Ordering::SeqCst);
            if pid > 0 {
                unsafe { libc::kill(pid, libc::SIGINT) };
            }
            INTERRUPTED.store(true, Ordering::SeqCst);
        }
        libc::SIGTSTP => {
            PENDING_TOGGLES.fetch_add(1, Ordering::SeqCst);
        }
        libc::SIGCHLD => CHILD_EXITED.store(true, Ordering::SeqCst),
        _ => {}
    }

    unsafe { *errno_location() = saved_errno };
}

/// Installs [`handler`] for every signal in [`SHELL_SIGNALS`].
pub fn install_handlers() -> Result<(), SigError> {
    for &signum in SHELL_SIGNALS.iter() {
        install_sighandler(signum, handler)?;
    }

    Ok(())
}

pub(crate) fn install_sighandler(
    signum: c_int,
    handler: extern "C" fn(c_int, *mut siginfo_t, *mut c_void),
) -> Result<(), SigError> {
    let mut sa = unsafe { MaybeUninit::<sigaction>::zeroed().assume_init() };
    sa.sa_sigaction = handler as sighandler_t;
    sa.sa_flags = libc::SA_SIGINFO | libc::SA_RESTART;
    if signum == libc::SIGCHLD {
        sa.sa_flags |= libc::SA_NOCLDSTOP;
    }
    unsafe { sigfillset(&mut sa.sa_mask as *mut _) };

    match unsafe { libc::sigaction(signum, &sa, null_mut()) } {
        -1 => Err(SigError::Syscall(errno())),
        _ => Ok(()),
    }
}

/// Sets the disposition of `signum` to `SIG_IGN` or `SIG_DFL`.
pub(crate) fn set_ignored(signum: c_int, ignored: bool) -> Result<(), SigError> {
    let disposition = if ignored { libc::SIG_IGN } else { libc::SIG_DFL };

    match unsafe { libc::signal(signum, disposition) } {
        libc::SIG_ERR => Err(SigError::Syscall(errno())),
        _ => Ok(()),
    }
}

/// Drains every pending event.
pub fn take_events() -> SignalEvents {
    SignalEvents {
        toggles: PENDING_TOGGLES.swap(0, Ordering::SeqCst),
        interrupted: INTERRUPTED.swap(false, Ordering::SeqCst),
        child_exited: CHILD_EXITED.swap(false, Ordering::SeqCst),
    }
}

/// Forgets a pending interrupt, once the foreground wait has accounted for it.
pub fn clear_interrupt() {
    INTERRUPTED.store(false, Ordering::SeqCst);
}

/// Records the child the interrupt handler forwards SIGINT to.
///
/// Callers hold a [`BlockedSignals`] guard covering SIGINT while they change
/// the marker, and reap the child only after clearing it, so the handler
/// never sees a pid that was already reaped.
pub(crate) fn set_foreground(pid: Option<pid_t>) {
    FOREGROUND_PID.store(pid.unwrap_or(0), Ordering::SeqCst);
}

pub fn foreground() -> Option<pid_t> {
    match FOREGROUND_PID.load(Ordering::SeqCst) {
        0 => None,
        pid => Some(pid),
    }
}

/// Blocks a set of signals for the calling thread until dropped.
pub struct BlockedSignals {
    previous: sigset_t,
}

impl BlockedSignals {
    pub fn block(signals: &[c_int]) -> Result<Self, SigError> {
        let mut set = unsafe { MaybeUninit::<sigset_t>::zeroed().assume_init() };
        let mut previous = unsafe { MaybeUninit::<sigset_t>::zeroed().assume_init() };

        unsafe { sigemptyset(&mut set as *mut _) };
        for &signum in signals {
            unsafe { sigaddset(&mut set as *mut _, signum) };
        }

        match unsafe { sigprocmask(libc::SIG_BLOCK, &set as *const _, &mut previous as *mut _) } {
            -1 => Err(SigError::Syscall(errno())),
            _ => Ok(BlockedSignals { previous }),
        }
    }

    /// The mask that was in effect before [`BlockedSignals::block`].
    pub fn previous(&self) -> &sigset_t {
        &self.previous
    }
}

impl Drop for BlockedSignals {
    fn drop(&mut self) {
        unsafe { sigprocmask(libc::SIG_SETMASK, &self.previous as *const _, null_mut()) };
    }
}

#[cfg(test)]
mod tests {
    use std::process::Command;
    use std::thread;
    use std::time::Duration;

    use crate::process_lock;

    #[test]
    fn test_install_handlers() {
        let _lock = process_lock();
        assert_eq!(super::install_handlers(), Ok(()));
    }

    #[test]
    fn test_toggle_is_counted() -> Result<(), Box<dyn std::error::Error>> {
        let _lock = process_lock();
        super::install_handlers()?;
        super::take_events();

        unsafe { libc::raise(libc::SIGTSTP) };
        unsafe { libc::raise(libc::SIGTSTP) };

        let events = super::take_events();
        assert_eq!(events.toggles, 2);
        assert_eq!(super::take_events().toggles, 0);

        Ok(())
    }

    #[test]
    fn test_interrupt_without_foreground() -> Result<(), Box<dyn std::error::Error>> {
        let _lock = process_lock();
        super::install_handlers()?;
        super::set_foreground(None);
        super::take_events();

        unsafe { libc::raise(libc::SIGINT) };

        let events = super::take_events();
        assert!(events.interrupted);
        assert_eq!(events.toggles, 0);

        Ok(())
    }

    #[test]
    fn test_interrupt_is_forwarded_to_foreground() -> Result<(), Box<dyn std::error::Error>> {
        let _lock = process_lock();
        super::install_handlers()?;

        let mut child = Command::new("sleep").arg("30").spawn()?;
        // give the child time to exec before it receives the signal
        thread::sleep(Duration::from_millis(100));

        super::set_foreground(Some(child.id() as libc::pid_t));
        assert_eq!(super::foreground(), Some(child.id() as libc::pid_t));
        unsafe { libc::raise(libc::SIGINT) };
        super::set_foreground(None);
        assert_eq!(super::foreground(), None);

        let status = child.wait()?;
        assert_eq!(std::os::unix::process::ExitStatusExt::signal(&status), Some(libc::SIGINT));
        assert!(super::take_events().interrupted);

        Ok(())
    }

    #[test]
    fn test_blocked_signal_is_deferred() -> Result<(), Box<dyn std::error::Error>> {
        let _lock = process_lock();
        super::install_handlers()?;
        super::take_events();

        let guard = super::BlockedSignals::block(&[libc::SIGTSTP])?;

        // the signal stays pending while it is blocked
        unsafe { libc::raise(libc::SIGTSTP) };
        assert_eq!(super::take_events().toggles, 0);

        drop(guard);
        assert_eq!(super::take_events().toggles, 1);

        Ok(())
    }
}
