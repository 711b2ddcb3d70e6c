use crate::backup::result_error::{AddFunctionName, AddMsg};
use itertools::Itertools;
use std::path::PathBuf;
use std::process::ExitStatus;
use thiserror::Error;
use thiserror_ext::Construct;

#[derive(Error, Debug, Construct)]
pub enum Error {
    #[error(transparent)]
    #[construct(skip)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    #[construct(skip)]
    Zip(#[from] zip::result::ZipError),
    #[error(transparent)]
    #[construct(skip)]
    WalkDir(#[from] walkdir::Error),
    #[error(transparent)]
    #[construct(skip)]
    GlobSet(#[from] globset::Error),
    #[error(transparent)]
    #[construct(skip)]
    Rusqlite(#[from] rusqlite::Error),
    #[error(transparent)]
    #[construct(skip)]
    Ftp(#[from] suppaftp::FtpError),
    #[error(transparent)]
    #[construct(skip)]
    S3(#[from] aws_sdk_s3::Error),
    #[error(transparent)]
    #[construct(skip)]
    ValidationError(#[from] validator::ValidationErrors),
    #[error(transparent)]
    #[construct(skip)]
    ThreadPoolBuildError(#[from] rayon::ThreadPoolBuildError),
    #[error(transparent)]
    #[construct(skip)]
    SerdeYml(#[from] serde_yml::Error),
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("No files found to archive in {sources:?}")]
    NoFilesFound { sources: Vec<PathBuf> },
    #[error("Bad file found in archive {archive:?}: {member}: {source}")]
    CorruptMember {
        archive: PathBuf,
        member: String,
        #[source]
        source: zip::result::ZipError,
    },
    #[error("Archive limit exceeded: {0}")]
    ArchiveLimit(String),
    #[error("Upload panicked: {0}")]
    UploadPanicked(String),
    #[error("Duplicate archive member: {0}")]
    DuplicateMember(String),
    #[error("{program} exited with {status}:\n{}", indent::indent_all_with("  ", .stderr))]
    DumpFailed {
        program: String,
        status: ExitStatus,
        stderr: String,
    },
    #[error("{failed} of {total} upload(s) failed:\n{}", indent::indent_all_with("  ", .errors.to_string()))]
    UploadFailed {
        failed: usize,
        total: usize,
        errors: Box<Error>,
    },
    #[error("{}:\n{}", msg, indent::indent_all_with("  ", error.to_string()))]
    WithMsg { msg: String, error: Box<Error> },
    #[error("{} failed:\n{}", fn_name, indent::indent_all_with("  ", error.to_string()))]
    WithFnName { fn_name: String, error: Box<Error> },
    #[error("{}", itertools::join(.0, "\n\n"))]
    LotsOfError(Vec<Error>),
}

impl<S: Into<String>> AddMsg<S> for Error {
    fn add_msg(self, msg: S) -> Self {
        Self::WithMsg {
            msg: msg.into(),
            error: Box::new(self),
        }
    }
}

impl<S: Into<String>> AddFunctionName<S> for Error {
    fn add_fn_name(self, fn_name: S) -> Self {
        Self::WithFnName {
            fn_name: fn_name.into(),
            error: Box::new(self),
        }
    }
}

impl From<Vec<Error>> for Error {
    fn from(errors: Vec<Error>) -> Self {
        if errors.is_empty() {
            panic!("Should not create lots of errors when error is empty")
        }
        Self::LotsOfError(errors.into_iter().flat_map(Error::into_iter).collect_vec())
    }
}

impl Error {
    pub fn into_iter(self) -> Box<dyn Iterator<Item = Error>> {
        match self {
            Error::LotsOfError(v) => Box::new(v.into_iter().flat_map(Error::into_iter)),
            e => Box::new(std::iter::once(e)),
        }
    }

    pub fn chain(self, other: Error) -> Error {
        Error::LotsOfError(self.into_iter().chain(other.into_iter()).collect_vec())
    }

    /// Walks down `WithMsg`/`WithFnName` wrappers to the error that caused them.
    pub fn root(&self) -> &Error {
        match self {
            Error::WithMsg { error, .. } | Error::WithFnName { error, .. } => error.root(),
            e => e,
        }
    }
}
