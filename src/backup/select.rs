//! Source walking and include/exclude glob selection.
//!
//! Every candidate is matched as an absolute path with `/` separators. Patterns
//! follow shell rules: `*` and `?` also match `/`, `[seq]` matches one character
//! of the set and matching is case-sensitive.

use crate::backup::function_path;
use crate::backup::result_error::error::Error;
use crate::backup::result_error::result::Result;
use crate::backup::result_error::{AddFunctionName, AddMsg};

use derive_more::{Display, From};
use dyn_iter::{DynIter, IntoDynIterator};
use function_name::named;
use getset::Getters;
use globset::{Glob, GlobBuilder, GlobSet, GlobSetBuilder};
use itertools::Itertools;
use serde::de::Visitor;
use serde::{Deserialize, Deserializer, Serialize};
use walkdir::{DirEntry, WalkDir};

use std::fmt::Formatter;
use std::path::{Component, Path, PathBuf, MAIN_SEPARATOR};
use std::result;
use std::str::FromStr;

/// A shell-style glob pattern, deserialized from a plain string.
#[derive(Clone, Debug, From, Display, Serialize, PartialEq, Eq, Getters)]
#[serde(transparent)]
#[getset(get = "pub")]
pub struct Pattern {
    glob: Glob,
}

impl FromStr for Pattern {
    type Err = globset::Error;

    fn from_str(s: &str) -> result::Result<Self, Self::Err> {
        GlobBuilder::new(s)
            .literal_separator(false)
            .case_insensitive(false)
            .build()
            .map(Pattern::from)
    }
}

struct PatternVisitor;

impl Visitor<'_> for PatternVisitor {
    type Value = Pattern;

    fn expecting(&self, formatter: &mut Formatter) -> std::fmt::Result {
        formatter.write_str("a glob pattern")
    }

    fn visit_str<E>(self, v: &str) -> result::Result<Self::Value, E>
    where
        E: serde::de::Error,
    {
        Pattern::from_str(v).map_err(serde::de::Error::custom)
    }
}

impl<'de> Deserialize<'de> for Pattern {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> result::Result<Self, D::Error> {
        deserializer.deserialize_str(PatternVisitor)
    }
}

/// Parses a list of pattern strings, failing on the first invalid one.
pub fn parse_patterns<S: AsRef<str>>(patterns: &[S]) -> Result<Vec<Pattern>> {
    patterns
        .iter()
        .map(|p| Pattern::from_str(p.as_ref()).map_err(Error::from))
        .collect()
}

/// Makes `path` absolute and lexically resolves `.` and `..`.
///
/// Symlinks are not followed, so `link/..` resolves to the directory holding
/// `link`. A `..` at the root stays at the root.
pub fn clean_absolute<P: AsRef<Path>>(path: P) -> Result<PathBuf> {
    let absolute = std::path::absolute(path.as_ref())?;
    let mut cleaned = PathBuf::new();
    for component in absolute.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                cleaned.pop();
            }
            c => cleaned.push(c),
        }
    }
    Ok(cleaned)
}

/// Makes `path` absolute and clean, and rewrites the platform separator to `/`.
pub fn normalize<P: AsRef<Path>>(path: P) -> Result<String> {
    Ok(normalized_str(&clean_absolute(path)?))
}

fn normalized_str(absolute: &Path) -> String {
    let s = absolute.to_string_lossy();
    if MAIN_SEPARATOR == '/' {
        s.into_owned()
    } else {
        s.replace(MAIN_SEPARATOR, "/")
    }
}

/// Decides which files under a set of sources end up in the archive.
///
/// Includes always win, then excludes reject, everything else is selected.
#[derive(Clone, Debug)]
pub struct PathSelector {
    excludes: GlobSet,
    includes: GlobSet,
}

fn build_globset(patterns: &[Pattern]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    patterns.iter().for_each(|p| {
        builder.add(p.glob.clone());
    });
    Ok(builder.build()?)
}

impl PathSelector {
    pub fn new(excludes: &[Pattern], includes: &[Pattern]) -> Result<Self> {
        Ok(Self {
            excludes: build_globset(excludes)?,
            includes: build_globset(includes)?,
        })
    }

    /// Tests an already absolute, `/`-separated path.
    pub fn is_included(&self, normalized: &str) -> bool {
        if self.includes.is_match(normalized) {
            return true;
        }
        !self.excludes.is_match(normalized)
    }

    /// Yields the selected files of one source.
    ///
    /// A file source is tested directly; a directory is walked recursively in
    /// file name order and only regular files (or symlinks to them) are tested.
    pub fn select_source<'a>(&'a self, source: &Path) -> Result<DynIter<'a, Result<PathBuf>>> {
        let root = clean_absolute(source)?;
        if root.is_file() {
            return Ok(if self.is_included(&normalized_str(&root)) {
                tracing::trace!("Including file source: {:?}", root);
                std::iter::once(Ok(root)).into_dyn_iter()
            } else {
                tracing::debug!("File source {:?} rejected by exclude patterns", root);
                std::iter::empty().into_dyn_iter()
            });
        }

        tracing::debug!("Scanning directory {:?}", root);
        let root_clone = root.clone();
        let entries = WalkDir::new(&root)
            .follow_links(false)
            .sort_by_file_name()
            .into_iter()
            .filter_map(move |res| match res {
                Ok(de) => self.process_dir_entry(de).map(Ok),
                Err(e) => Some(
                    Err::<PathBuf, _>(Error::from(e))
                        .add_msg(format!("Walking source {:?} failed", root_clone)),
                ),
            });

        Ok(entries.into_dyn_iter())
    }

    fn process_dir_entry(&self, de: DirEntry) -> Option<PathBuf> {
        let p = de.into_path();
        if !p.is_file() {
            tracing::trace!("Skipping {:?} not a file", p);
            return None;
        }

        if self.is_included(&normalized_str(&p)) {
            tracing::trace!("Including file: {:?}", p);
            Some(p)
        } else {
            tracing::trace!("Skipping {:?}, excluded", p);
            None
        }
    }

    /// Resolves every source into one duplicate-free, ordered file list.
    ///
    /// Fails with [`Error::NoFilesFound`] when sources were given but nothing
    /// survived selection.
    #[named]
    pub fn select<P: AsRef<Path>>(&self, sources: &[P]) -> Result<Vec<PathBuf>> {
        let mut selected = Vec::new();
        for source in sources {
            for path in self.select_source(source.as_ref())? {
                selected.push(path.add_fn_name(function_path!())?);
            }
        }

        let selected = selected.into_iter().unique().collect_vec();
        if !sources.is_empty() && selected.is_empty() {
            tracing::error!("No files found to archive");
            return Err(Error::no_files_found(
                sources
                    .iter()
                    .map(|s| s.as_ref().to_path_buf())
                    .collect_vec(),
            ))
            .add_fn_name(function_path!());
        }

        tracing::info!(
            "Selected {} files from {} sources",
            selected.len(),
            sources.len()
        );
        Ok(selected)
    }
}
