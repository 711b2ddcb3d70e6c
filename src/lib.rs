//! # k-zip-backup
//!
//! A personal backup tool: packs selected files into a timestamped zip archive,
//! keeps a bounded number of archives around and pushes every new archive to
//! any number of remote destinations.
//!
//! ## Features
//!
//! - **File Selection**: Recursive source walking with include/exclude glob rules
//! - **Retention**: Count-based pruning of the backup directory
//! - **Integrity**: Every archive is re-read and CRC checked before it is published
//! - **Extensions**: SQLite snapshots and MySQL dumps added to the same archive
//! - **Uploads**: FTP, S3-compatible object storage and plain file copies, run concurrently
//!
//! ## Quick Start
//!
//! ```no_run
//! use k_zip_backup::backup::backup_config::BackupConfig;
//! use validator::Validate;
//!
//! // Load configuration from YAML file
//! let config: BackupConfig = serde_yml::from_reader(std::fs::File::open("config.yml")?)?;
//! config.validate()?;
//!
//! // Create, verify and upload one archive
//! let archive = config.run_once(chrono::Utc::now())?;
//! println!("{}", archive.display());
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod backup;
