//! Validation functions for configuration values.
//!
//! Provides custom validation functions for archive names, directories,
//! cron expressions, SQLite files and external dump tools.

use chrono::Utc;
use rusqlite::{Connection, OpenFlags};
use sanitize_filename::{is_sanitized, sanitize};
use validator::ValidationError;

use std::path::{Path, PathBuf};
use std::result;

pub fn validate_valid_archive_base_name<S: AsRef<str>>(name: S) -> Result<(), ValidationError> {
    let name = name.as_ref();
    if name.is_empty() || !is_sanitized(name) {
        return Err(ValidationError::new("InvalidArchiveBaseName").with_message(
            format!(
                "Invalid file name, try sanitizing like {:?}",
                sanitize(name)
            )
            .into(),
        ));
    }

    Ok(())
}

/// Accepts a missing directory (it gets created on the first run) but not a
/// path that exists as something else.
pub fn validate_dir_or_absent<P: AsRef<Path>>(dir: P) -> Result<(), ValidationError> {
    let dir = dir.as_ref();
    if dir.exists() && !dir.is_dir() {
        return Err(ValidationError::new("InvalidDirectory")
            .with_message(format!("{:?} is not a directory", dir).into()));
    }

    Ok(())
}

pub fn validate_cron_str<S: AsRef<str>>(cron: S) -> Result<(), ValidationError> {
    let cron = cron.as_ref();
    if cron_parser::parse(cron, &Utc::now()).is_err() {
        return Err(ValidationError::new("InvalidCron")
            .with_message(format!("Invalid cron string: {cron:?}").into()));
    }

    Ok(())
}

pub fn validate_sql_file<P: AsRef<Path>>(path: P) -> result::Result<(), ValidationError> {
    let path = path.as_ref();
    Connection::open_with_flags(
        path,
        OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
    )
    .map(|_| ())
    .map_err(|e| {
        ValidationError::new("InvalidSqlFile")
            .with_message(format!("cannot open sql file {:?}: {}", path, e).into())
    })
}

/// Resolves an executable the way a shell would: a path with a separator is
/// taken as is, a bare name is looked up on `PATH`.
pub fn resolve_executable<P: AsRef<Path>>(exe: P) -> Option<PathBuf> {
    let exe = exe.as_ref();
    if exe.components().count() > 1 || exe.is_absolute() {
        return exe.is_file().then(|| exe.to_path_buf());
    }

    std::env::var_os("PATH").and_then(|paths| {
        std::env::split_paths(&paths)
            .map(|dir| dir.join(exe))
            .find(|candidate| candidate.is_file())
    })
}

pub fn validate_executable<P: AsRef<Path>>(exe: P) -> result::Result<(), ValidationError> {
    let exe = exe.as_ref();
    match resolve_executable(exe) {
        Some(_) => Ok(()),
        None => Err(ValidationError::new("MissingExecutable")
            .with_message(format!("{:?} does not exist", exe).into())),
    }
}
