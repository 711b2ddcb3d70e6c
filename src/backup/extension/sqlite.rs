use crate::backup::archive::ArchiveHandle;
use crate::backup::extension::ExtensionProvider;
use crate::backup::function_path;
use crate::backup::result_error::error::Error;
use crate::backup::result_error::result::Result;
use crate::backup::result_error::{AddFunctionName, AddMsg};
use crate::backup::validate::validate_sql_file;
use bon::Builder;
use function_name::named;
use getset::Getters;
use rusqlite::{Connection, OpenFlags, MAIN_DB};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use validator::Validate;

/// Snapshot of a SQLite database taken with SQLite's online backup API, so a
/// database in use by other processes is still captured consistently.
#[derive(Serialize, Deserialize, Debug, Clone, Validate, Builder, Getters)]
#[serde(deny_unknown_fields)]
#[getset(get = "pub")]
pub struct SqliteDumpSource {
    #[validate(custom(function = validate_sql_file))]
    #[builder(into)]
    src: PathBuf,
    /// Member name inside the archive
    #[builder(into)]
    dst: String,
}

impl ExtensionProvider for SqliteDumpSource {
    #[named]
    fn preflight(&self) -> Result<()> {
        self.validate()
            .map_err(Error::from)
            .add_fn_name(function_path!())
    }

    #[named]
    fn contribute(&self, archive: &mut ArchiveHandle) -> Result<()> {
        tracing::info!("Backing up SQLite database {:?}", self.src);
        let conn = Connection::open_with_flags(
            &self.src,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .map_err(Error::from)
        .add_msg(format!("Opening {:?} failed", self.src))
        .add_fn_name(function_path!())?;

        let snapshot = tempfile::Builder::new()
            .prefix("k_zip_backup_sqlite")
            .suffix(".db")
            .tempfile()?;
        conn.backup(MAIN_DB, snapshot.path(), None)
            .map_err(Error::from)
            .add_fn_name(function_path!())?;

        archive.add_path(snapshot.path(), &self.dst)?;
        snapshot.close()?;
        tracing::info!("Removed temp SQLite snapshot.");
        Ok(())
    }
}
