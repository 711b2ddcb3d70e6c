pub mod copy;
pub mod ftp;
pub mod s3;

use crate::backup::function_path;
use crate::backup::result_error::error::Error;
use crate::backup::result_error::result::{convert_error_vec, Result};
use crate::backup::result_error::{AddFunctionName, AddMsg};
use crate::backup::upload::copy::CopyTarget;
use crate::backup::upload::ftp::FtpTarget;
use crate::backup::upload::s3::S3Target;
use derive_more::From;
use function_name::named;
use itertools::Itertools;
use rayon::prelude::*;
use rayon::ThreadPoolBuilder;
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::fmt::Debug;
use std::panic::{self, AssertUnwindSafe};
use std::path::Path;
use std::result;
use validator::{Validate, ValidationErrors};

/// Configuration for the destinations a sealed archive is pushed to
#[derive(Clone, From, Serialize, Deserialize, Debug)]
#[serde(tag = "type")]
#[serde(rename_all = "snake_case")]
#[serde(deny_unknown_fields)]
pub enum UploadConfig {
    Ftp(FtpTarget),
    S3(S3Target),
    Copy(CopyTarget),
}

/// One destination for a finished archive.
///
/// `push` returns only once the upload is confirmed complete. Timeouts are the
/// target's own business; a hanging target holds up [`dispatch_all`].
pub trait UploadTarget: Debug + Sync {
    /// Short description naming the destination, used in logs and errors.
    fn identity(&self) -> String;

    fn push(&self, archive: &Path) -> Result<()>;
}

impl Validate for UploadConfig {
    fn validate(&self) -> result::Result<(), ValidationErrors> {
        match self {
            UploadConfig::Ftp(inner) => inner.validate(),
            UploadConfig::S3(inner) => inner.validate(),
            UploadConfig::Copy(inner) => inner.validate(),
        }
    }
}

impl UploadTarget for UploadConfig {
    fn identity(&self) -> String {
        match self {
            UploadConfig::Ftp(inner) => inner.identity(),
            UploadConfig::S3(inner) => inner.identity(),
            UploadConfig::Copy(inner) => inner.identity(),
        }
    }

    fn push(&self, archive: &Path) -> Result<()> {
        match self {
            UploadConfig::Ftp(inner) => inner.push(archive),
            UploadConfig::S3(inner) => inner.push(archive),
            UploadConfig::Copy(inner) => inner.push(archive),
        }
    }
}

/// Pushes `archive` to every target at once and waits for all of them.
///
/// A failing target never cancels the others, and a panic inside a target
/// counts as that target failing. Each failure is logged with its
/// target, and if any failed the returned [`Error::UploadFailed`] carries all
/// of them.
#[named]
pub fn dispatch_all<T: UploadTarget>(archive: &Path, targets: &[T]) -> Result<()> {
    if targets.is_empty() {
        tracing::info!("No upload targets configured.");
        return Ok(());
    }

    tracing::info!("Uploading {:?} to {} places.", archive, targets.len());
    let pool = ThreadPoolBuilder::new()
        .num_threads(targets.len())
        .thread_name(|i| format!("upload-{i}"))
        .build()
        .map_err(Error::from)
        .add_fn_name(function_path!())?;

    // Worker threads do not inherit the caller's subscriber.
    let dispatch = tracing::dispatcher::get_default(Clone::clone);
    let outcomes: Vec<Result<()>> = pool.install(|| {
        targets
            .par_iter()
            .with_max_len(1)
            .map(|target| {
                tracing::dispatcher::with_default(&dispatch, || push_one(target, archive))
            })
            .collect()
    });

    let total = outcomes.len();
    let errors = outcomes.into_iter().filter_map(|r| r.err()).collect_vec();
    let failed = errors.len();
    convert_error_vec(errors)
        .map_err(|errors| Error::upload_failed(failed, total, errors))
        .add_fn_name(function_path!())?;

    tracing::info!("All {} uploads finished.", total);
    Ok(())
}

fn push_one<T: UploadTarget>(target: &T, archive: &Path) -> Result<()> {
    let identity = target.identity();
    tracing::info!("{}: uploading {:?}", identity, archive);
    let pushed = panic::catch_unwind(AssertUnwindSafe(|| target.push(archive)))
        .unwrap_or_else(|payload| {
            Err(Error::upload_panicked(panic_message(payload.as_ref())))
        });
    match pushed {
        Ok(()) => {
            tracing::info!("{}: upload finished.", identity);
            Ok(())
        }
        Err(e) => {
            tracing::error!("{}: upload failed:\n{}", identity, e);
            Err(e.add_msg(identity))
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(ToString::to_string)
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}
