use std::env;
use std::ffi::OsStr;
use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Builtin {
    Exit,
    Cd,
    Status,
}

impl Builtin {
    pub fn lookup(name: &str) -> Option<Self> {
        match name {
            "exit" => Some(Builtin::Exit),
            "cd" => Some(Builtin::Cd),
            "status" => Some(Builtin::Status),
            _ => None,
        }
    }
}

#[derive(Debug, Error)]
pub enum BuiltinError {
    #[error("cd: HOME not set")]
    NoHome,
    #[error("cd: cannot determine current directory: {0}")]
    CurrentDir(#[source] io::Error),
    #[error("cd: {}: {source}", .path.display())]
    ChangeDir {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Works out where `cd [target]` goes.
///
/// A relative target is appended to `cwd` instead of being left to the
/// kernel's own relative lookup.
pub fn resolve_directory(
    target: Option<&str>,
    home: Option<&OsStr>,
    cwd: &Path,
) -> Result<PathBuf, BuiltinError> {
    match target {
        None => home.map(PathBuf::from).ok_or(BuiltinError::NoHome),
        Some(path) if Path::new(path).is_absolute() => Ok(PathBuf::from(path)),
        Some(path) => Ok(cwd.join(path)),
    }
}

/// `cd [target]`, returning the directory that is now current.
pub fn change_directory(target: Option<&str>) -> Result<PathBuf, BuiltinError> {
    let home = env::var_os("HOME");
    let cwd = env::current_dir().map_err(BuiltinError::CurrentDir)?;
    let path = resolve_directory(target, home.as_deref(), &cwd)?;

    env::set_current_dir(&path).map_err(|source| BuiltinError::ChangeDir {
        path: path.clone(),
        source,
    })?;

    debug!(path = %path.display(), "changed directory");
    Ok(path)
}
