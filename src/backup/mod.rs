pub mod archive;
pub mod backup_config;
pub mod extension;
pub mod redacted;
pub mod result_error;
pub mod retention;
pub mod select;
pub mod upload;
pub mod validate;

/// Maximum number of archives kept in the backup directory.
pub static DEFAULT_MAX_BACKUPS: u32 = 10;
/// Archive file name; the stem and extension frame the timestamp.
pub static DEFAULT_ARCHIVE_NAME: &str = "backup.zip";
pub static DEFAULT_EXCLUDES: [&str; 2] = ["*/.*", "*.pyc"];
pub static DEFAULT_INCLUDES: [&str; 1] = ["*.htaccess"];

macro_rules! function_path {
    () => {
        concat!(module_path!(), "::", function_name!(), " ", file!(), ":", line!())
    };
}

pub(crate) use function_path;
