use crate::backup::archive::ArchiveHandle;
use crate::backup::extension::ExtensionProvider;
use crate::backup::function_path;
use crate::backup::redacted::RedactedString;
use crate::backup::result_error::error::Error;
use crate::backup::result_error::result::Result;
use crate::backup::result_error::{AddFunctionName, AddMsg};
use crate::backup::validate::{resolve_executable, validate_executable};
use bon::Builder;
use function_name::named;
use getset::Getters;
use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;
use std::path::PathBuf;
use std::process::Command;
use validator::Validate;

fn default_host() -> String {
    "localhost".into()
}

fn default_dump_exe() -> PathBuf {
    "mysqldump".into()
}

/// Dump of one MySQL database produced by `mysqldump`.
///
/// The password is handed over through `MYSQL_PWD` so it never shows up in
/// the process list.
#[skip_serializing_none]
#[derive(Serialize, Deserialize, Debug, Clone, Validate, Builder, Getters)]
#[serde(deny_unknown_fields)]
#[getset(get = "pub")]
pub struct MysqlDumpSource {
    #[builder(into)]
    user: String,
    #[builder(into)]
    password: RedactedString,
    #[validate(length(min = 1))]
    #[builder(into)]
    database: String,
    #[serde(default = "default_host")]
    #[builder(default = default_host(), into)]
    host: String,
    #[serde(default = "default_dump_exe")]
    #[validate(custom(function = validate_executable))]
    #[builder(default = default_dump_exe(), into)]
    dump_exe: PathBuf,
    /// Member name inside the archive, `<database>.sql` when absent
    #[builder(into)]
    dst: Option<String>,
}

impl MysqlDumpSource {
    fn member_name(&self) -> String {
        self.dst
            .clone()
            .unwrap_or_else(|| format!("{}.sql", self.database))
    }
}

impl ExtensionProvider for MysqlDumpSource {
    #[named]
    fn preflight(&self) -> Result<()> {
        self.validate()
            .map_err(Error::from)
            .add_msg(format!("{:?} cannot be used", self.dump_exe))
            .add_fn_name(function_path!())
    }

    #[named]
    fn contribute(&self, archive: &mut ArchiveHandle) -> Result<()> {
        let exe = resolve_executable(&self.dump_exe).ok_or_else(|| {
            Error::invalid_config(format!("{:?} does not exist", self.dump_exe))
        })?;
        let dump = tempfile::Builder::new()
            .prefix(&format!("{}_", self.database))
            .suffix(".sql")
            .tempfile()?;

        tracing::info!(
            "Backing up MySQL database {:?} on {} as {}",
            self.database,
            self.host,
            self.user
        );
        let output = Command::new(&exe)
            .arg(format!("--host={}", self.host))
            .arg(format!("--user={}", self.user))
            .arg(format!("--result-file={}", dump.path().display()))
            .arg(&self.database)
            .env("MYSQL_PWD", self.password.inner())
            .output()
            .map_err(Error::from)
            .add_msg(format!("Running {:?} failed", exe))
            .add_fn_name(function_path!())?;

        if !output.status.success() {
            return Err(Error::dump_failed(
                exe.display().to_string(),
                output.status,
                String::from_utf8_lossy(&output.stderr).into_owned(),
            ))
            .add_fn_name(function_path!());
        }

        tracing::info!("Writing sql dump to archive.");
        archive.add_path(dump.path(), &self.member_name())?;
        dump.close()?;
        tracing::info!("Removed temp sql dump file.");
        Ok(())
    }
}
