pub mod builder;
pub mod verify;

use crate::backup::result_error::error::Error;
use crate::backup::result_error::result::Result;
use crate::backup::result_error::AddMsg;
use chrono::{DateTime, Utc};
use getset::Getters;
use std::collections::HashSet;
use std::fs::File;
use std::io::{BufWriter, IntoInnerError, Read};
use std::path::{Component, Path, PathBuf};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

/// Sortable UTC timestamp embedded in archive file names.
pub static TIME_FORMAT: &str = "%y-%m-%d_%H.%M.%S";

/// Entry count a plain (non zip64) archive can index.
pub static MAX_PLAIN_ENTRIES: usize = u16::MAX as usize;
/// Member size a plain (non zip64) archive can record.
pub static MAX_PLAIN_MEMBER_SIZE: u64 = u32::MAX as u64;

/// A member written into an archive.
#[derive(Clone, Debug, PartialEq, Eq, Getters)]
#[getset(get = "pub")]
pub struct ArchiveMember {
    name: String,
    size: u64,
}

impl ArchiveMember {
    pub fn new<S: Into<String>>(name: S, size: u64) -> Self {
        Self {
            name: name.into(),
            size,
        }
    }
}

/// Member name for a file on disk: the path without its root or drive,
/// joined with `/`.
///
/// Paths must already be clean; a `..` component is rejected rather than
/// dropped.
pub fn member_name<P: AsRef<Path>>(path: P) -> Result<String> {
    let path = path.as_ref();
    path.components()
        .filter_map(|c| match c {
            Component::Normal(s) => Some(Ok(s.to_string_lossy())),
            Component::ParentDir => Some(Err(Error::invalid_config(format!(
                "{:?} has a parent dir component and no stable member name",
                path
            )))),
            _ => None,
        })
        .collect::<Result<Vec<_>>>()
        .map(|parts| parts.join("/"))
}

/// `<stem>_<timestamp>[_<nnn>].<ext>` for the `n`th attempt at the same second.
///
/// The suffix is zero padded so names keep sorting in creation order up to
/// 999 archives within one second.
pub fn timestamped_name(archive_name: &str, dt: DateTime<Utc>, attempt: u32) -> String {
    let name = Path::new(archive_name);
    let stem = name
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let stamp = dt.format(TIME_FORMAT);
    let suffix = if attempt == 0 {
        String::new()
    } else {
        format!("_{attempt:03}")
    };

    match name.extension() {
        Some(ext) => format!("{stem}_{stamp}{suffix}.{}", ext.to_string_lossy()),
        None => format!("{stem}_{stamp}{suffix}"),
    }
}

/// First free timestamped path in `out_dir`.
///
/// An archive from the same second is never overwritten; a `_<nnn>` suffix is
/// added instead, which sorts after the unsuffixed name.
pub fn timestamped_path<P: AsRef<Path>>(out_dir: P, archive_name: &str, dt: DateTime<Utc>) -> PathBuf {
    let out_dir = out_dir.as_ref();
    (0..)
        .map(|attempt| out_dir.join(timestamped_name(archive_name, dt, attempt)))
        .find(|p| !p.exists() && !tmp_path(p).exists())
        .unwrap_or_else(|| out_dir.join(timestamped_name(archive_name, dt, 0)))
}

/// Location an archive is written to before it is verified and published.
pub fn tmp_path<P: AsRef<Path>>(path: P) -> PathBuf {
    let mut s = path.as_ref().as_os_str().to_owned();
    s.push(".tmp");
    PathBuf::from(s)
}

/// An open, not yet sealed archive.
///
/// Extensions receive it to add generated members next to the selected files.
pub struct ArchiveHandle {
    writer: ZipWriter<BufWriter<File>>,
    options: SimpleFileOptions,
    allow_large_archive: bool,
    names: HashSet<String>,
    members: Vec<ArchiveMember>,
}

impl ArchiveHandle {
    /// Creates a new archive at `path`; fails if the file already exists.
    pub fn create<P: AsRef<Path>>(path: P, allow_large_archive: bool) -> Result<Self> {
        let file = File::create_new(path.as_ref())
            .map_err(Error::from)
            .add_msg(format!("Creating archive {:?} failed", path.as_ref()))?;
        let options = SimpleFileOptions::default()
            .compression_method(CompressionMethod::Deflated)
            .large_file(allow_large_archive);

        Ok(Self {
            writer: ZipWriter::new(BufWriter::new(file)),
            options,
            allow_large_archive,
            names: HashSet::new(),
            members: Vec::new(),
        })
    }

    pub fn members(&self) -> &[ArchiveMember] {
        &self.members
    }

    fn start_member(&mut self, name: &str, size_hint: Option<u64>) -> Result<()> {
        if self.names.contains(name) {
            return Err(Error::duplicate_member(name));
        }
        if !self.allow_large_archive {
            if self.members.len() >= MAX_PLAIN_ENTRIES {
                return Err(Error::archive_limit(format!(
                    "more than {MAX_PLAIN_ENTRIES} members need allow_large_archive"
                )));
            }
            if let Some(size) = size_hint.filter(|s| *s >= MAX_PLAIN_MEMBER_SIZE) {
                return Err(Error::archive_limit(format!(
                    "{name} is {size} bytes and needs allow_large_archive"
                )));
            }
        }

        self.writer.start_file(name, self.options)?;
        self.names.insert(name.to_owned());
        Ok(())
    }

    /// Adds the file at `src` under `name`.
    pub fn add_path<P: AsRef<Path>>(&mut self, src: P, name: &str) -> Result<&ArchiveMember> {
        let src = src.as_ref();
        let mut file = File::open(src)
            .map_err(Error::from)
            .add_msg(format!("Opening {:?} failed", src))?;
        let size_hint = file.metadata().map(|m| m.len()).ok();
        self.write_member(name, &mut file, size_hint)
            .add_msg(format!("Adding {:?} as {:?} failed", src, name))
    }

    /// Adds everything `reader` yields under `name`.
    pub fn add_reader<R: Read>(&mut self, name: &str, mut reader: R) -> Result<&ArchiveMember> {
        self.write_member(name, &mut reader, None)
            .add_msg(format!("Adding {:?} failed", name))
    }

    fn write_member<R: Read + ?Sized>(
        &mut self,
        name: &str,
        reader: &mut R,
        size_hint: Option<u64>,
    ) -> Result<&ArchiveMember> {
        self.start_member(name, size_hint)?;
        let size = std::io::copy(reader, &mut self.writer)?;
        tracing::trace!("Wrote member {:?} ({} bytes)", name, size);
        self.members.push(ArchiveMember::new(name, size));
        Ok(&self.members[self.members.len() - 1])
    }

    /// Writes the central directory and flushes the file to disk.
    pub fn finish(self) -> Result<Vec<ArchiveMember>> {
        let file = self
            .writer
            .finish()?
            .into_inner()
            .map_err(IntoInnerError::into_error)?;
        file.sync_all()?;
        Ok(self.members)
    }
}
