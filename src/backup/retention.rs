use crate::backup::function_path;
use crate::backup::result_error::error::Error;
use crate::backup::result_error::result::Result;
use crate::backup::result_error::{AddFunctionName, AddMsg};
use function_name::named;
use itertools::Itertools;
use std::cmp::Reverse;
use std::ffi::OsString;
use std::fs::read_dir;
use std::path::{Path, PathBuf};

/// Picks the entries to delete so that `max_backups - 1` remain.
///
/// Archive names embed a sortable timestamp, so descending name order is
/// newest first. One slot is left free for the archive about to be written.
pub fn plan_deletions<I: IntoIterator<Item = OsString>>(
    names: I,
    max_backups: u32,
) -> Vec<OsString> {
    let names = names.into_iter().collect_vec();
    let max_backups = max_backups as usize;
    if max_backups == 0 || names.len() <= max_backups {
        return vec![];
    }

    names
        .into_iter()
        .sorted_unstable_by_key(|n| Reverse(n.clone()))
        .skip(max_backups - 1)
        .collect_vec()
}

/// Deletes the oldest entries of `out_dir` before a new archive is added.
///
/// Creates `out_dir` when it does not exist. Read-only entries are made
/// writable first; any entry that cannot be removed fails the whole run.
#[named]
pub fn prune<P: AsRef<Path>>(out_dir: P, max_backups: u32) -> Result<Vec<PathBuf>> {
    let out_dir = out_dir.as_ref();
    if max_backups < 1 {
        return Err(Error::invalid_config(format!(
            "max_backups must be 1 or more, got {max_backups}"
        )))
        .add_fn_name(function_path!());
    }

    if !out_dir.exists() {
        tracing::info!("No backup dir found, creating {:?}", out_dir);
        std::fs::create_dir_all(out_dir)
            .map_err(Error::from)
            .add_fn_name(function_path!())?;
        return Ok(vec![]);
    }

    let names: Vec<OsString> = read_dir(out_dir)
        .and_then(|entries| entries.map_ok(|e| e.file_name()).try_collect::<_, Vec<_>, _>())
        .map_err(Error::from)
        .add_msg(format!("Listing backup dir {:?} failed", out_dir))
        .add_fn_name(function_path!())?;

    let to_delete = plan_deletions(names, max_backups);
    if to_delete.is_empty() {
        tracing::info!("No need to delete any backups.");
        return Ok(vec![]);
    }

    tracing::info!("Removing the following backup files: {:?}", to_delete);
    to_delete
        .into_iter()
        .map(|name| {
            let path = out_dir.join(name);
            remove_backup(&path)
                .add_msg(format!("Removing out of retention file {:?} failed", path))
                .add_fn_name(function_path!())
                .map(|_| path)
        })
        .collect()
}

fn remove_backup(path: &Path) -> Result<()> {
    let mut permissions = std::fs::metadata(path)?.permissions();
    if permissions.readonly() {
        #[allow(clippy::permissions_set_readonly_false)]
        permissions.set_readonly(false);
        std::fs::set_permissions(path, permissions)?;
    }
    std::fs::remove_file(path)?;
    tracing::debug!("Removed {:?}", path);
    Ok(())
}
