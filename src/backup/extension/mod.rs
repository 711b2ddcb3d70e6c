pub mod mysql;
pub mod sqlite;

use crate::backup::archive::ArchiveHandle;
use crate::backup::extension::mysql::MysqlDumpSource;
use crate::backup::extension::sqlite::SqliteDumpSource;
use crate::backup::result_error::result::Result;
use crate::backup::result_error::AddMsg;
use derive_more::From;
use serde::{Deserialize, Serialize};
use std::fmt::Debug;
use std::result;
use validator::{Validate, ValidationErrors};

/// Configuration for generated archive content
///
/// - Sqlite: consistent snapshot of a live SQLite database
/// - Mysql: `mysqldump` output of one database
#[derive(Clone, From, Serialize, Deserialize, Debug)]
#[serde(tag = "type")]
#[serde(rename_all = "snake_case")]
#[serde(deny_unknown_fields)]
pub enum ExtensionConfig {
    Sqlite(SqliteDumpSource),
    Mysql(MysqlDumpSource),
}

/// Adds members to an archive that is still open.
///
/// Providers run in configuration order after the selected files were
/// written and before the archive is sealed. Any error aborts the build.
pub trait ExtensionProvider: Debug {
    /// Checks external requirements before anything is pruned or written.
    fn preflight(&self) -> Result<()> {
        Ok(())
    }

    fn contribute(&self, archive: &mut ArchiveHandle) -> Result<()>;
}

impl Validate for ExtensionConfig {
    fn validate(&self) -> result::Result<(), ValidationErrors> {
        match self {
            ExtensionConfig::Sqlite(inner) => inner.validate(),
            ExtensionConfig::Mysql(inner) => inner.validate(),
        }
    }
}

impl ExtensionProvider for ExtensionConfig {
    fn preflight(&self) -> Result<()> {
        match self {
            ExtensionConfig::Sqlite(inner) => inner.preflight(),
            ExtensionConfig::Mysql(inner) => inner.preflight(),
        }
    }

    fn contribute(&self, archive: &mut ArchiveHandle) -> Result<()> {
        match self {
            ExtensionConfig::Sqlite(inner) => inner.contribute(archive),
            ExtensionConfig::Mysql(inner) => inner.contribute(archive),
        }
        .add_msg(format!("Extension {:?} failed", self))
    }
}
