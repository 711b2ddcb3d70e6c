use crate::backup::archive::builder::ArchiveBuilder;
use crate::backup::extension::{ExtensionConfig, ExtensionProvider};
use crate::backup::function_path;
use crate::backup::result_error::error::Error;
use crate::backup::result_error::result::Result;
use crate::backup::result_error::{AddFunctionName, AddMsg};
use crate::backup::select::{parse_patterns, PathSelector, Pattern};
use crate::backup::upload::{dispatch_all, UploadConfig};
use crate::backup::validate::{
    validate_cron_str, validate_dir_or_absent, validate_valid_archive_base_name,
};
use crate::backup::{DEFAULT_ARCHIVE_NAME, DEFAULT_EXCLUDES, DEFAULT_INCLUDES, DEFAULT_MAX_BACKUPS};
use chrono::{DateTime, Utc};
use function_name::named;
use itertools::Itertools;
use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;
use std::path::PathBuf;
use tracing::info;
use validator::{Validate, ValidationError};

#[skip_serializing_none]
#[derive(Clone, Serialize, Deserialize, Debug, Validate)]
#[serde(deny_unknown_fields)]
pub struct BackupConfig {
    #[validate(custom(function = validate_dir_or_absent))]
    pub out_dir: PathBuf,
    pub sources: Vec<PathBuf>,
    #[serde(default = "default_excludes")]
    pub excludes: Vec<Pattern>,
    #[serde(default = "default_includes")]
    pub includes: Vec<Pattern>,
    #[serde(default = "default_max_backups")]
    #[validate(range(min = 1))]
    pub max_backups: u32,
    #[serde(default = "default_archive_name")]
    #[validate(custom(function = validate_valid_archive_base_name))]
    pub archive_name: String,
    #[serde(default)]
    pub allow_large_archive: bool,
    #[serde(default)]
    #[validate(custom(function = validate_each))]
    pub extensions: Vec<ExtensionConfig>,
    #[serde(default)]
    #[validate(custom(function = validate_each))]
    pub uploads: Vec<UploadConfig>,
    /// Runs on this schedule instead of once when set
    #[validate(custom(function = validate_cron_str))]
    pub cron: Option<String>,
}

fn default_excludes() -> Vec<Pattern> {
    parse_patterns(&DEFAULT_EXCLUDES).unwrap_or_default()
}

fn default_includes() -> Vec<Pattern> {
    parse_patterns(&DEFAULT_INCLUDES).unwrap_or_default()
}

fn default_max_backups() -> u32 {
    DEFAULT_MAX_BACKUPS
}

fn default_archive_name() -> String {
    DEFAULT_ARCHIVE_NAME.to_string()
}

fn validate_each<T: Validate>(items: &[T]) -> std::result::Result<(), ValidationError> {
    items.iter().try_for_each(Validate::validate).map_err(|e| {
        ValidationError::new("InvalidItem").with_message(e.to_string().into())
    })
}

/// Next time `cron` fires strictly after `after`.
pub fn next_run(cron: &str, after: &DateTime<Utc>) -> Result<DateTime<Utc>> {
    cron_parser::parse(cron, after)
        .map_err(|e| Error::invalid_config(format!("Invalid cron string {cron:?}: {e}")))
}

impl BackupConfig {
    pub fn selector(&self) -> Result<PathSelector> {
        PathSelector::new(&self.excludes, &self.includes)
    }

    /// Prunes `out_dir` and writes one verified archive stamped with `now`.
    #[named]
    pub fn create_archive(&self, now: DateTime<Utc>) -> Result<PathBuf> {
        let selector = self.selector().add_fn_name(function_path!())?;
        let extensions = self
            .extensions
            .iter()
            .map(|e| e as &dyn ExtensionProvider)
            .collect_vec();

        ArchiveBuilder::builder()
            .out_dir(&self.out_dir)
            .sources(&self.sources)
            .selector(&selector)
            .max_backups(self.max_backups)
            .archive_name(&self.archive_name)
            .extensions(extensions)
            .allow_large_archive(self.allow_large_archive)
            .build()
            .build(now)
    }

    /// One complete backup: archive, then upload to every target.
    ///
    /// Upload failures are reported after all targets finished; the archive
    /// stays in `out_dir` either way.
    #[named]
    pub fn run_once(&self, now: DateTime<Utc>) -> Result<PathBuf> {
        info!("Trying to create backup...");
        let archive = self.create_archive(now)?;
        info!("Created backup file: {:?}", &archive);

        dispatch_all(&archive, &self.uploads)
            .add_msg(format!("Archive {:?} was kept locally", archive))
            .add_fn_name(function_path!())?;
        Ok(archive)
    }

    /// Runs [`BackupConfig::run_once`] every time `cron` fires.
    ///
    /// Only returns on the first failed run.
    pub fn start_loop(&self) -> Result<()> {
        let cron = self
            .cron
            .as_deref()
            .ok_or_else(|| Error::invalid_config("start_loop needs a cron schedule"))?;

        let mut start = next_run(cron, &Utc::now())?;
        loop {
            let now = Utc::now();
            if now < start {
                info!("Sleeping until {start}");
                std::thread::sleep((start - now).to_std().unwrap_or_default());
            } else {
                self.run_once(now)?;
                start = next_run(cron, &now)?;
            }
        }
    }
}
