//! Post-seal integrity check.

use crate::backup::archive::ArchiveMember;
use crate::backup::result_error::error::Error;
use crate::backup::result_error::result::Result;
use crate::backup::result_error::AddMsg;
use itertools::Itertools;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use zip::result::ZipError;
use zip::ZipArchive;

/// Reopens the archive and reads every member to the end, which makes the
/// zip reader check each member's CRC-32.
///
/// The first unreadable member fails the check with [`Error::CorruptMember`].
pub fn verify_archive<P: AsRef<Path>>(path: P) -> Result<Vec<ArchiveMember>> {
    let path = path.as_ref();
    let file = File::open(path)
        .map_err(Error::from)
        .add_msg(format!("Reopening archive {:?} failed", path))?;
    let mut archive = ZipArchive::new(BufReader::new(file))
        .map_err(Error::from)
        .add_msg(format!("Reading archive {:?} failed", path))?;
    let names = archive.file_names().map(str::to_owned).collect_vec();

    let mut members = Vec::with_capacity(archive.len());
    for index in 0..archive.len() {
        let name = names.get(index).cloned().unwrap_or_else(|| format!("#{index}"));
        let member = check_member(&mut archive, index).map_err(|source| {
            tracing::error!("Bad file found in archive {:?}: {}", path, name);
            Error::CorruptMember {
                archive: path.to_path_buf(),
                member: name.clone(),
                source,
            }
        })?;
        members.push(member);
    }

    tracing::debug!("Verified {} members of {:?}", members.len(), path);
    Ok(members)
}

fn check_member(
    archive: &mut ZipArchive<BufReader<File>>,
    index: usize,
) -> std::result::Result<ArchiveMember, ZipError> {
    let mut entry = archive.by_index(index)?;
    tracing::debug!("Info for   {}", entry.name());
    tracing::debug!("Method:    {:?}", entry.compression());
    tracing::debug!("CmpSize:   {} bytes", entry.compressed_size());
    tracing::debug!("UnCmpSize: {} bytes", entry.size());

    let read = std::io::copy(&mut entry, &mut std::io::sink())?;
    if read != entry.size() {
        return Err(ZipError::Io(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("expected {} bytes, read {}", entry.size(), read),
        )));
    }
    Ok(ArchiveMember::new(entry.name(), read))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;
    use zip::write::SimpleFileOptions;
    use zip::{CompressionMethod, ZipWriter};

    static MARKER: &[u8] = b"MARKER-CONTENT-0123456789-MARKER";

    fn write_stored_archive(path: &Path) {
        let mut writer = ZipWriter::new(File::create(path).unwrap());
        let options = SimpleFileOptions::default().compression_method(CompressionMethod::Stored);
        writer.start_file("good.txt", options).unwrap();
        writer.write_all(b"fine").unwrap();
        writer.start_file("bad.txt", options).unwrap();
        writer.write_all(MARKER).unwrap();
        writer.finish().unwrap();
    }

    #[test]
    fn test_verify_valid_archive() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("ok.zip");
        write_stored_archive(&path);

        let members = verify_archive(&path).unwrap();

        assert_eq!(
            members,
            vec![
                ArchiveMember::new("good.txt", 4),
                ArchiveMember::new("bad.txt", MARKER.len() as u64),
            ]
        );
    }

    #[test]
    fn test_verify_names_corrupt_member() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("corrupt.zip");
        write_stored_archive(&path);

        let mut bytes = std::fs::read(&path).unwrap();
        let offset = bytes
            .windows(MARKER.len())
            .position(|w| w == MARKER)
            .unwrap();
        bytes[offset + 7] ^= 0xFF;
        std::fs::write(&path, bytes).unwrap();

        let err = verify_archive(&path).unwrap_err();
        assert!(err.to_string().contains("Bad file found in archive"));
        assert!(err.to_string().contains("bad.txt"));

        match err {
            Error::CorruptMember {
                archive, member, ..
            } => {
                assert_eq!(member, "bad.txt");
                assert_eq!(archive, path);
            }
            e => panic!("Expected CorruptMember, got {e}"),
        }
    }

    #[test]
    fn test_verify_not_an_archive() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("garbage.zip");
        std::fs::write(&path, "definitely not a zip").unwrap();

        assert!(verify_archive(&path).is_err());
    }
}
