use chrono::Utc;
use clap::Parser;
use k_zip_backup::backup::backup_config::BackupConfig;
use k_zip_backup::backup::result_error::error::Error;
use k_zip_backup::backup::result_error::AddMsg;
use std::fs::File;
use std::path::PathBuf;
use std::process::exit;
use tracing::{error, info};
use validator::Validate;

/// Zip up your files, keep the last few archives and ship them elsewhere
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Location of config file
    #[arg(short, long)]
    config: PathBuf,
}

fn main() {
    tracing_subscriber::fmt::init();
    let args = Args::parse();

    let res = File::open(&args.config)
        .map_err(Error::from)
        .and_then(|f| {
            serde_yml::from_reader::<_, BackupConfig>(f)
                .map_err(Error::from)
                .add_msg(format!("Parse YAML config failed: {:?}", &args.config))
        })
        .and_then(|bc| {
            bc.validate()
                .map_err(Error::from)
                .map(|_| bc)
                .add_msg(format!("Config validation failed: {:?}", &args.config))
        })
        .and_then(|bc| {
            if bc.cron.is_some() {
                bc.start_loop()
            } else {
                bc.run_once(Utc::now())
                    .map(|archive| info!("Backup finished: {:?}", archive))
            }
        });

    if let Err(e) = res {
        error!("{e}");
        exit(1);
    }
}
