use crate::backup::archive::verify::verify_archive;
use crate::backup::archive::{member_name, timestamped_path, tmp_path, ArchiveHandle, ArchiveMember};
use crate::backup::extension::ExtensionProvider;
use crate::backup::function_path;
use crate::backup::result_error::error::Error;
use crate::backup::result_error::result::Result;
use crate::backup::result_error::{AddFunctionName, AddMsg};
use crate::backup::retention::prune;
use crate::backup::select::PathSelector;
use crate::backup::{DEFAULT_ARCHIVE_NAME, DEFAULT_MAX_BACKUPS};
use bon::Builder;
use chrono::{DateTime, Utc};
use function_name::named;
use std::path::{Path, PathBuf};

/// One backup run: prune, select, write, verify, publish.
#[derive(Builder)]
pub struct ArchiveBuilder<'a> {
    out_dir: &'a Path,
    sources: &'a [PathBuf],
    selector: &'a PathSelector,
    #[builder(default = DEFAULT_MAX_BACKUPS)]
    max_backups: u32,
    #[builder(default = DEFAULT_ARCHIVE_NAME)]
    archive_name: &'a str,
    #[builder(default)]
    extensions: Vec<&'a dyn ExtensionProvider>,
    #[builder(default)]
    allow_large_archive: bool,
}

impl ArchiveBuilder<'_> {
    /// Produces a verified, read-only archive in `out_dir` and returns its path.
    ///
    /// Until verification passes the archive only exists as `<path>.tmp`,
    /// which is removed again on any failure.
    #[named]
    pub fn build(&self, now: DateTime<Utc>) -> Result<PathBuf> {
        for extension in &self.extensions {
            extension.preflight().add_fn_name(function_path!())?;
        }

        let removed = prune(self.out_dir, self.max_backups).add_fn_name(function_path!())?;
        tracing::debug!("Pruned {} old backups", removed.len());

        let files = self
            .selector
            .select(self.sources)
            .add_fn_name(function_path!())?;

        let path = timestamped_path(self.out_dir, self.archive_name, now);
        let tmp = tmp_path(&path);
        tracing::info!("Creating archive {:?}", path);
        let handle = ArchiveHandle::create(&tmp, self.allow_large_archive)
            .add_fn_name(function_path!())?;

        if let Err(e) = self.write_and_publish(handle, &files, &tmp, &path) {
            if tmp.exists() {
                if let Err(remove_err) = std::fs::remove_file(&tmp) {
                    tracing::warn!("Could not remove unfinished archive {:?}: {}", tmp, remove_err);
                }
            }
            return Err(e).add_fn_name(function_path!());
        }

        let mut permissions = std::fs::metadata(&path)?.permissions();
        permissions.set_readonly(true);
        std::fs::set_permissions(&path, permissions)
            .map_err(Error::from)
            .add_msg(format!("Marking {:?} read-only failed", path))
            .add_fn_name(function_path!())?;
        tracing::info!("Archive valid and read-only.");
        Ok(path)
    }

    fn write_and_publish(
        &self,
        mut handle: ArchiveHandle,
        files: &[PathBuf],
        tmp: &Path,
        path: &Path,
    ) -> Result<Vec<ArchiveMember>> {
        for file in files {
            handle.add_path(file, &member_name(file)?)?;
        }
        for extension in &self.extensions {
            tracing::info!("Running extension {:?}", extension);
            extension.contribute(&mut handle)?;
        }

        let written = handle.finish()?;
        let size = std::fs::metadata(tmp)?.len();
        tracing::info!("Wrote {} members, archive is {} bytes.", written.len(), size);

        tracing::info!("Verifying archive...");
        let verified = verify_archive(tmp)?;

        std::fs::rename(tmp, path)
            .map_err(Error::from)
            .add_msg(format!("Renaming {:?} to {:?} failed", tmp, path))?;
        Ok(verified)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backup::select::parse_patterns;
    use crate::backup::{DEFAULT_EXCLUDES, DEFAULT_INCLUDES};
    use chrono::TimeZone;
    use itertools::Itertools;
    use std::cell::Cell;
    use std::fs::File;
    use tempfile::TempDir;
    use zip::ZipArchive;

    #[derive(Debug)]
    struct InlineExtension {
        name: &'static str,
        content: &'static str,
    }

    impl ExtensionProvider for InlineExtension {
        fn contribute(&self, archive: &mut ArchiveHandle) -> Result<()> {
            archive.add_reader(self.name, self.content.as_bytes())?;
            Ok(())
        }
    }

    #[derive(Debug, Default)]
    struct FailingExtension {
        fail_preflight: bool,
        contributed: Cell<bool>,
    }

    impl ExtensionProvider for FailingExtension {
        fn preflight(&self) -> Result<()> {
            if self.fail_preflight {
                return Err(Error::invalid_config("dump tool missing"));
            }
            Ok(())
        }

        fn contribute(&self, archive: &mut ArchiveHandle) -> Result<()> {
            self.contributed.set(true);
            archive.add_reader("partial.sql", "half a dump".as_bytes())?;
            Err(Error::invalid_config("dump broke halfway"))
        }
    }

    fn test_dir() -> TempDir {
        tempfile::Builder::new().prefix("builder").tempdir().unwrap()
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 17, 21, 30, 0).unwrap()
    }

    fn default_selector() -> PathSelector {
        PathSelector::new(
            &parse_patterns(&DEFAULT_EXCLUDES).unwrap(),
            &parse_patterns(&DEFAULT_INCLUDES).unwrap(),
        )
        .unwrap()
    }

    fn create_sources(dir: &Path) -> PathBuf {
        let src = dir.join("src");
        std::fs::create_dir_all(src.join("sub")).unwrap();
        std::fs::write(src.join("a.txt"), "alpha").unwrap();
        std::fs::write(src.join("sub/b.txt"), "beta").unwrap();
        std::fs::write(src.join("skip.pyc"), "bytecode").unwrap();
        std::fs::write(src.join(".htaccess"), "deny from all").unwrap();
        std::fs::write(src.join(".secret"), "hidden").unwrap();
        src
    }

    fn archive_names(path: &Path) -> Vec<String> {
        let archive = ZipArchive::new(File::open(path).unwrap()).unwrap();
        archive.file_names().map(str::to_owned).sorted().collect_vec()
    }

    fn dir_names(dir: &Path) -> Vec<String> {
        std::fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .sorted()
            .collect_vec()
    }

    #[test]
    fn test_build_archives_selection_and_extensions() {
        let temp_dir = test_dir();
        let src = create_sources(temp_dir.path());
        let out_dir = temp_dir.path().join("out");
        let sources = vec![src.clone()];
        let selector = default_selector();
        let extension = InlineExtension {
            name: "db/dump.sql",
            content: "CREATE TABLE t;",
        };

        let path = ArchiveBuilder::builder()
            .out_dir(&out_dir)
            .sources(&sources)
            .selector(&selector)
            .extensions(vec![&extension as &dyn ExtensionProvider])
            .build()
            .build(now())
            .unwrap();

        assert_eq!(path, out_dir.join("backup_24-05-17_21.30.00.zip"));
        assert!(std::fs::metadata(&path).unwrap().permissions().readonly());
        let expected = [".htaccess", "a.txt", "sub/b.txt"]
            .iter()
            .map(|f| member_name(src.join(f)).unwrap())
            .chain(std::iter::once("db/dump.sql".to_string()))
            .sorted()
            .collect_vec();
        assert_eq!(archive_names(&path), expected);
        assert_eq!(verify_archive(&path).unwrap().len(), 4);
        assert_eq!(dir_names(&out_dir), vec!["backup_24-05-17_21.30.00.zip"]);
    }

    #[test]
    fn test_build_same_second_gets_distinct_paths() {
        let temp_dir = test_dir();
        let src = create_sources(temp_dir.path());
        let out_dir = temp_dir.path().join("out");
        let sources = vec![src];
        let selector = default_selector();
        let builder = ArchiveBuilder::builder()
            .out_dir(&out_dir)
            .sources(&sources)
            .selector(&selector)
            .archive_name("home.zip")
            .build();

        let first = builder.build(now()).unwrap();
        let second = builder.build(now()).unwrap();

        assert_ne!(first, second);
        assert_eq!(second.file_name().unwrap(), "home_24-05-17_21.30.00_001.zip");
        assert!(first.exists() && second.exists());
    }

    #[test]
    fn test_build_nothing_selected_leaves_no_archive() {
        let temp_dir = test_dir();
        let src = temp_dir.path().join("src");
        std::fs::create_dir_all(&src).unwrap();
        std::fs::write(src.join("only.pyc"), "bytecode").unwrap();
        let out_dir = temp_dir.path().join("out");
        let sources = vec![src];
        let selector = default_selector();

        let err = ArchiveBuilder::builder()
            .out_dir(&out_dir)
            .sources(&sources)
            .selector(&selector)
            .build()
            .build(now())
            .unwrap_err();

        assert!(matches!(err.root(), Error::NoFilesFound { .. }));
        assert!(dir_names(&out_dir).is_empty());
    }

    #[test]
    fn test_build_failing_extension_leaves_nothing_behind() {
        let temp_dir = test_dir();
        let src = create_sources(temp_dir.path());
        let out_dir = temp_dir.path().join("out");
        let sources = vec![src];
        let selector = default_selector();
        let extension = FailingExtension::default();

        let err = ArchiveBuilder::builder()
            .out_dir(&out_dir)
            .sources(&sources)
            .selector(&selector)
            .extensions(vec![&extension as &dyn ExtensionProvider])
            .build()
            .build(now())
            .unwrap_err();

        assert!(extension.contributed.get());
        assert!(err.to_string().contains("dump broke halfway"));
        assert!(dir_names(&out_dir).is_empty());
    }

    #[test]
    fn test_build_failing_preflight_prunes_nothing() {
        let temp_dir = test_dir();
        let src = create_sources(temp_dir.path());
        let out_dir = temp_dir.path().join("out");
        std::fs::create_dir_all(&out_dir).unwrap();
        for day in 1..=4 {
            std::fs::write(out_dir.join(format!("backup_24-05-0{day}_00.00.00.zip")), "").unwrap();
        }
        let sources = vec![src];
        let selector = default_selector();
        let extension = FailingExtension {
            fail_preflight: true,
            ..Default::default()
        };

        let err = ArchiveBuilder::builder()
            .out_dir(&out_dir)
            .sources(&sources)
            .selector(&selector)
            .max_backups(2)
            .extensions(vec![&extension as &dyn ExtensionProvider])
            .build()
            .build(now())
            .unwrap_err();

        assert!(err.to_string().contains("dump tool missing"));
        assert!(!extension.contributed.get());
        assert_eq!(dir_names(&out_dir).len(), 4);
    }

    #[test]
    fn test_build_keeps_at_most_max_backups() {
        let temp_dir = test_dir();
        let src = create_sources(temp_dir.path());
        let out_dir = temp_dir.path().join("out");
        std::fs::create_dir_all(&out_dir).unwrap();
        for day in 1..=5 {
            std::fs::write(out_dir.join(format!("backup_24-05-0{day}_00.00.00.zip")), "").unwrap();
        }
        let sources = vec![src];
        let selector = default_selector();

        let path = ArchiveBuilder::builder()
            .out_dir(&out_dir)
            .sources(&sources)
            .selector(&selector)
            .max_backups(3)
            .build()
            .build(now())
            .unwrap();

        assert_eq!(
            dir_names(&out_dir),
            vec![
                "backup_24-05-04_00.00.00.zip",
                "backup_24-05-05_00.00.00.zip",
                "backup_24-05-17_21.30.00.zip",
            ]
        );
        assert_eq!(path.file_name().unwrap(), "backup_24-05-17_21.30.00.zip");
    }

    #[test]
    fn test_build_parent_dir_source_is_stored_once_under_real_path() {
        let temp_dir = test_dir();
        let data = temp_dir.path().join("data");
        std::fs::create_dir_all(&data).unwrap();
        std::fs::create_dir_all(temp_dir.path().join("other")).unwrap();
        std::fs::write(data.join("f.txt"), "payload").unwrap();
        let out_dir = temp_dir.path().join("out");
        let sources = vec![data.clone(), temp_dir.path().join("other/../data")];
        let selector = default_selector();

        let path = ArchiveBuilder::builder()
            .out_dir(&out_dir)
            .sources(&sources)
            .selector(&selector)
            .build()
            .build(now())
            .unwrap();

        assert_eq!(
            archive_names(&path),
            vec![member_name(data.join("f.txt")).unwrap()]
        );
    }
}
