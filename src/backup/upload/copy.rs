use crate::backup::function_path;
use crate::backup::result_error::error::Error;
use crate::backup::result_error::result::Result;
use crate::backup::result_error::{AddFunctionName, AddMsg};
use crate::backup::upload::UploadTarget;
use bon::Builder;
use function_name::named;
use getset::Getters;
use serde::{Deserialize, Serialize};
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use validator::Validate;

/// Local copy of the archive, e.g. onto a mounted network share.
///
/// An existing directory `dest` receives the archive under its own file name.
/// Any other `dest` is taken as the full target file path.
#[derive(Clone, Debug, Serialize, Deserialize, Validate, Builder, Getters)]
#[serde(deny_unknown_fields)]
#[getset(get = "pub")]
pub struct CopyTarget {
    #[validate(length(min = 1))]
    #[builder(into)]
    dest: String,
}

impl CopyTarget {
    fn target_path(&self, file_name: &OsStr) -> PathBuf {
        let dest = Path::new(&self.dest);
        if dest.is_dir() {
            dest.join(file_name)
        } else {
            dest.to_path_buf()
        }
    }
}

impl UploadTarget for CopyTarget {
    fn identity(&self) -> String {
        format!("copy:{}", self.dest)
    }

    #[named]
    fn push(&self, archive: &Path) -> Result<()> {
        let file_name = archive
            .file_name()
            .ok_or_else(|| Error::invalid_config(format!("{:?} has no file name", archive)))?;
        let target = self.target_path(file_name);
        if let Some(parent) = target.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .map_err(Error::from)
                .add_msg(format!("Creating {:?} failed", parent))
                .add_fn_name(function_path!())?;
        }

        let copied = std::fs::copy(archive, &target)
            .map_err(Error::from)
            .add_msg(format!("Copying {:?} to {:?} failed", archive, target))
            .add_fn_name(function_path!())?;
        tracing::debug!("Copied {} bytes to {:?}", copied, target);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn archive_in(dir: &Path) -> PathBuf {
        let archive = dir.join("b.zip");
        std::fs::write(&archive, b"archive bytes").unwrap();
        archive
    }

    #[test]
    fn test_copy_into_directory() {
        let temp_dir = TempDir::new().unwrap();
        let archive = archive_in(temp_dir.path());
        let dest = temp_dir.path().join("mirror");
        std::fs::create_dir(&dest).unwrap();

        let target = CopyTarget::builder().dest(dest.to_str().unwrap()).build();
        assert!(target.validate().is_ok());
        target.push(&archive).unwrap();

        assert_eq!(std::fs::read(dest.join("b.zip")).unwrap(), b"archive bytes");
    }

    #[test]
    fn test_copy_to_file_path() {
        let temp_dir = TempDir::new().unwrap();
        let archive = archive_in(temp_dir.path());
        let dest = temp_dir.path().join("offsite").join("latest.zip");

        let target = CopyTarget::builder().dest(dest.to_str().unwrap()).build();
        target.push(&archive).unwrap();

        assert_eq!(std::fs::read(&dest).unwrap(), b"archive bytes");
    }

    #[test]
    fn test_copy_missing_archive() {
        let temp_dir = TempDir::new().unwrap();
        let target = CopyTarget::builder()
            .dest(temp_dir.path().to_str().unwrap())
            .build();

        let err = target.push(&temp_dir.path().join("gone.zip")).unwrap_err();

        assert!(matches!(err.root(), Error::Io(_)));
    }

    #[test]
    fn test_copy_empty_dest_is_invalid() {
        assert!(CopyTarget::builder().dest("").build().validate().is_err());
    }
}
