//! Opening ZIP containers whose entry names may be in any of several legacy encodings.
//!
//! A [`StrategyDescriptor`] fully determines how a container is opened: which charset raw
//! names are decoded with, whether the central directory alone is trusted (fast path) or
//! the local file headers are walked instead (slow path), and whether Info-ZIP Unicode Path
//! extra fields override the raw names. [`StrategyProber`] folds an ordered candidate list
//! with a first-success combinator.

use std::collections::HashMap;
use std::fmt;
use std::fs::File;
use std::io::{self, BufReader, Read, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use zip::read::read_zipfile_from_stream;
use zip::ZipArchive;

use crate::encoding::{self, Charset};
use crate::error::{zip_error, ReadError};

/// Charsets tried for comic archives, in priority order.
pub const COMIC_CHARSETS: &[Charset] = &[
    Charset::Utf8,
    Charset::ShiftJis,
    Charset::Iso8859_1,
    Charset::Cp437,
    Charset::Ms932,
];

/// Charsets tried for EPUB containers, in priority order.
pub const EPUB_CHARSETS: &[Charset] = &[Charset::Utf8, Charset::Iso8859_1, Charset::Cp437];

/// How a ZIP container must be opened for its names to decode correctly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StrategyDescriptor {
    pub charset: Charset,
    pub fast_path: bool,
    pub unicode_extra_fields: bool,
}

impl fmt::Display for StrategyDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}/{}",
            self.charset,
            if self.fast_path { "fast" } else { "slow" },
            if self.unicode_extra_fields { "unicode" } else { "no-unicode" }
        )
    }
}

/// The cross product of `charsets` with both parse modes and both unicode settings, grouped
/// as fast+unicode, slow+unicode, fast+no-unicode, slow+no-unicode.
pub fn full_candidates(charsets: &[Charset]) -> Vec<StrategyDescriptor> {
    let groups = [(true, true), (false, true), (true, false), (false, false)];
    groups
        .iter()
        .flat_map(|&(fast_path, unicode_extra_fields)| {
            charsets.iter().map(move |&charset| StrategyDescriptor {
                charset,
                fast_path,
                unicode_extra_fields,
            })
        })
        .collect()
}

/// One fast-path, unicode-aware candidate per charset.
pub fn charset_candidates(charsets: &[Charset]) -> Vec<StrategyDescriptor> {
    charsets
        .iter()
        .map(|&charset| StrategyDescriptor {
            charset,
            fast_path: true,
            unicode_extra_fields: true,
        })
        .collect()
}

/// The winning strategy together with whatever the successful attempt produced.
#[derive(Debug)]
pub struct ProbeOutcome<T> {
    pub strategy: StrategyDescriptor,
    pub value: T,
    pub attempts: usize,
    /// False when the preferred strategy succeeded on the first attempt.
    pub reprobed: bool,
}

/// Tries candidate strategies in order until one succeeds.
#[derive(Debug, Clone)]
pub struct StrategyProber {
    candidates: Vec<StrategyDescriptor>,
}

impl StrategyProber {
    pub fn new(candidates: Vec<StrategyDescriptor>) -> Self {
        Self { candidates }
    }

    pub fn for_comics(charsets: &[Charset]) -> Self {
        Self::new(full_candidates(charsets))
    }

    pub fn for_epub(charsets: &[Charset]) -> Self {
        Self::new(charset_candidates(charsets))
    }

    pub fn candidates(&self) -> &[StrategyDescriptor] {
        &self.candidates
    }

    /// Run `attempt` with `preferred` first (when given), then with every other candidate in
    /// order. Retryable failures move on to the next candidate; anything else is returned
    /// immediately.
    pub fn probe<T, F>(
        &self,
        path: &Path,
        preferred: Option<StrategyDescriptor>,
        mut attempt: F,
    ) -> Result<ProbeOutcome<T>, ReadError>
    where
        F: FnMut(&StrategyDescriptor) -> Result<T, ReadError>,
    {
        let ordered = preferred.into_iter().chain(
            self.candidates
                .iter()
                .copied()
                .filter(|c| Some(*c) != preferred),
        );

        let mut attempts = 0;
        let mut last_error = None;
        for strategy in ordered {
            attempts += 1;
            match attempt(&strategy) {
                Ok(value) => {
                    let reprobed = preferred != Some(strategy);
                    if reprobed {
                        tracing::debug!(
                            "Opened {} with strategy {} after {} attempts",
                            path.display(),
                            strategy,
                            attempts
                        );
                    }
                    return Ok(ProbeOutcome {
                        strategy,
                        value,
                        attempts,
                        reprobed,
                    });
                }
                Err(e) if e.is_retryable() => {
                    tracing::debug!("Strategy {} failed for {}: {}", strategy, path.display(), e);
                    last_error = Some(e);
                }
                Err(e) => return Err(e),
            }
        }

        Err(ReadError::DecodingExhausted {
            path: path.display().to_string(),
            attempts,
            last_error: last_error
                .map(|e| e.to_string())
                .unwrap_or_else(|| "no candidate strategies".to_string()),
        })
    }
}

/// A decoded entry of a ZIP container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ZipEntryInfo {
    pub name: String,
    pub is_dir: bool,
    pub size: u64,
    /// Position in the central directory (fast path) or the local header stream (slow path).
    position: usize,
}

/// A ZIP file opened under one strategy, with every entry name decoded.
pub struct ZipContainer {
    path: PathBuf,
    entries: Vec<ZipEntryInfo>,
    by_name: HashMap<String, usize>,
    archive: Option<ZipArchive<BufReader<File>>>,
}

impl ZipContainer {
    /// Open `path` under `strategy`. Fails unless the container parses and every entry name
    /// decodes under the strategy's charset.
    pub fn open(path: &Path, strategy: &StrategyDescriptor) -> Result<Self, ReadError> {
        let file = File::open(path)?;
        let (entries, archive) = if strategy.fast_path {
            let mut archive = ZipArchive::new(BufReader::new(file)).map_err(zip_error)?;
            let mut entries = Vec::with_capacity(archive.len());
            for position in 0..archive.len() {
                let entry = archive.by_index_raw(position).map_err(zip_error)?;
                entries.push(decode_entry(
                    strategy,
                    entry.name_raw(),
                    entry.extra_data(),
                    entry.size(),
                    position,
                )?);
            }
            (entries, Some(archive))
        } else {
            (scan_local_headers(BufReader::new(file), strategy)?, None)
        };

        let by_name = entries
            .iter()
            .enumerate()
            .map(|(i, e)| (e.name.clone(), i))
            .collect();

        Ok(Self {
            path: path.to_path_buf(),
            entries,
            by_name,
            archive,
        })
    }

    pub fn entries(&self) -> &[ZipEntryInfo] {
        &self.entries
    }

    pub fn find(&self, name: &str) -> Option<&ZipEntryInfo> {
        self.by_name.get(name).map(|&i| &self.entries[i])
    }

    /// Copy the uncompressed bytes of `name` into `sink`.
    pub fn copy_to(&mut self, name: &str, sink: &mut dyn Write) -> Result<u64, ReadError> {
        let position = self
            .find(name)
            .map(|e| e.position)
            .ok_or_else(|| {
                ReadError::EntryNotFound(format!("{name} in {}", self.path.display()))
            })?;

        match self.archive.as_mut() {
            Some(archive) => {
                let mut entry = archive.by_index(position).map_err(zip_error)?;
                Ok(io::copy(&mut entry, sink)?)
            }
            None => {
                let mut reader = BufReader::new(File::open(&self.path)?);
                let mut current = 0;
                while let Some(mut entry) =
                    read_zipfile_from_stream(&mut reader).map_err(zip_error)?
                {
                    if current == position {
                        return Ok(io::copy(&mut entry, sink)?);
                    }
                    current += 1;
                }
                Err(ReadError::EntryNotFound(format!(
                    "{name} in {}",
                    self.path.display()
                )))
            }
        }
    }

    pub fn read_to_vec(&mut self, name: &str) -> Result<Vec<u8>, ReadError> {
        let mut buf = Vec::new();
        self.copy_to(name, &mut buf)?;
        Ok(buf)
    }
}

fn scan_local_headers<R: Read>(
    mut reader: R,
    strategy: &StrategyDescriptor,
) -> Result<Vec<ZipEntryInfo>, ReadError> {
    let mut entries = Vec::new();
    while let Some(entry) = read_zipfile_from_stream(&mut reader).map_err(zip_error)? {
        let info = decode_entry(
            strategy,
            entry.name_raw(),
            entry.extra_data(),
            entry.size(),
            entries.len(),
        )?;
        entries.push(info);
    }
    Ok(entries)
}

fn decode_entry(
    strategy: &StrategyDescriptor,
    raw: &[u8],
    extra: Option<&[u8]>,
    size: u64,
    position: usize,
) -> Result<ZipEntryInfo, ReadError> {
    let unicode = if strategy.unicode_extra_fields {
        extra.and_then(|e| encoding::unicode_path_from_extra(raw, e))
    } else {
        None
    };
    let name = match unicode {
        Some(name) => name,
        None => strategy.charset.decode(raw).ok_or_else(|| {
            ReadError::malformed(
                "ZIP",
                format!(
                    "entry name {:?} is not valid {}",
                    String::from_utf8_lossy(raw),
                    strategy.charset
                ),
            )
        })?,
    };
    let name = name.replace('\\', "/");
    Ok(ZipEntryInfo {
        is_dir: name.ends_with('/'),
        name,
        size,
        position,
    })
}
