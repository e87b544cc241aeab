//! Content-addressable cache of parsed sources.
//!
//! Layout on disk: `<root>/<sha256(id)>/<sha256(content)>.json`. The payload
//! file stores the serialized [`ParsedSource`], so a content hit deserializes
//! it and the parser never runs. Re-exporting a source with identical bytes
//! always lands on the same payload file.

use std::fs;
use std::io::Write as _;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use sha2::{Digest, Sha256};
use tempfile::NamedTempFile;
use tracing::debug;

use engine::source::ParsedSource;

#[derive(Debug, Clone)]
pub struct SourceCache {
    root: PathBuf,
}

impl SourceCache {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Fetch the parsed form of a source, parsing only on a content miss.
    ///
    /// Idempotent: repeated calls with the same id and content return the
    /// cached payload without invoking `parse`.
    pub fn get_or_add(
        &self,
        id: &str,
        content: &[u8],
        parse: impl FnOnce(&str, &[u8]) -> Result<ParsedSource>,
    ) -> Result<ParsedSource> {
        let dir = self.root.join(content_digest(id.as_bytes()));
        let file = dir.join(format!("{}.json", content_digest(content)));

        if file.exists() {
            debug!(source_id = %id, "cache hit");
            let raw = fs::read_to_string(&file)
                .with_context(|| format!("read {}", file.display()))?;
            return serde_json::from_str(&raw)
                .with_context(|| format!("parse cached {}", file.display()));
        }

        debug!(source_id = %id, "cache miss");
        let source = parse(id, content)?;
        fs::create_dir_all(&dir).with_context(|| format!("create {}", dir.display()))?;
        write_json_atomic(&file, &source)?;
        Ok(source)
    }
}

/// Atomically write the payload. The temp file gets a unique name in the
/// payload's directory, so concurrent writers of the same payload cannot
/// clobber each other's half-written file; last rename wins.
fn write_json_atomic(path: &Path, source: &ParsedSource) -> Result<()> {
    let mut payload = serde_json::to_string_pretty(source).context("serialize parsed source")?;
    payload.push('\n');
    let dir = path.parent().context("payload path has no parent")?;
    let mut tmp = NamedTempFile::new_in(dir)
        .with_context(|| format!("create temp payload in {}", dir.display()))?;
    tmp.write_all(payload.as_bytes())
        .with_context(|| format!("write temp payload {}", tmp.path().display()))?;
    tmp.persist(path)
        .map_err(|err| err.error)
        .with_context(|| format!("replace {}", path.display()))?;
    Ok(())
}

/// Hex sha256 digest used for cache addressing; runs record the same digest
/// to pin themselves to the payload they were executed against.
pub fn content_digest(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}
