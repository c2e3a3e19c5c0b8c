use std::{collections::HashMap, sync::Mutex};

use crate::{
    asset::{Asset, AssetKind, AssetPath},
    error::{ExportError, ExportResult},
};

/// Fixed name of the descriptor entry; always the last entry of an archive.
pub const DESCRIPTOR_PATH: &str = "temp/project.json";

struct ArchiveInner {
    builder: tar::Builder<Vec<u8>>,
    assets: HashMap<AssetPath, Asset>,
    entries: usize,
}

/// Uncompressed tar of content-addressed assets plus one descriptor.
///
/// `put_asset` takes `&self` so capture tasks can share one builder behind an
/// `Arc`; writes are serialized by an internal lock. Entry order follows call
/// order, so callers record returned paths positionally.
pub struct ArchiveBuilder {
    inner: Mutex<ArchiveInner>,
}

impl Default for ArchiveBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ArchiveBuilder {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(ArchiveInner {
                builder: tar::Builder::new(Vec::new()),
                assets: HashMap::new(),
                entries: 0,
            }),
        }
    }

    /// Hashes `bytes`, derives the bucketed path and stores the entry once.
    /// Identical bytes of the same kind return the existing path.
    pub fn put_asset(&self, bytes: &[u8], kind: AssetKind) -> ExportResult<AssetPath> {
        let asset = Asset::from_bytes(bytes, kind);
        let path = asset.path();

        let mut inner = self
            .inner
            .lock()
            .map_err(|_| anyhow::anyhow!("archive lock poisoned"))?;
        if inner.assets.contains_key(&path) {
            log::trace!("archive: dedup {}", path);
            return Ok(path);
        }
        append_entry(&mut inner.builder, path.as_str(), bytes)?;
        inner.entries += 1;
        inner.assets.insert(path.clone(), asset);
        log::debug!("archive: stored {} ({} bytes)", path, bytes.len());
        Ok(path)
    }

    pub fn contains(&self, path: &AssetPath) -> bool {
        self.inner
            .lock()
            .map(|inner| inner.assets.contains_key(path))
            .unwrap_or(false)
    }

    pub fn asset(&self, path: &AssetPath) -> Option<Asset> {
        self.inner
            .lock()
            .ok()
            .and_then(|inner| inner.assets.get(path).cloned())
    }

    pub fn asset_count(&self) -> usize {
        self.inner.lock().map(|inner| inner.entries).unwrap_or(0)
    }

    /// Appends the descriptor as the final entry and seals the archive.
    pub fn finalize(self, descriptor: &[u8]) -> ExportResult<Vec<u8>> {
        let mut inner = self
            .inner
            .into_inner()
            .map_err(|_| anyhow::anyhow!("archive lock poisoned"))?;
        append_entry(&mut inner.builder, DESCRIPTOR_PATH, descriptor)?;
        let bytes = inner.builder.into_inner()?;
        log::info!(
            "archive sealed: {} assets + descriptor, {} bytes",
            inner.entries,
            bytes.len()
        );
        Ok(bytes)
    }
}

fn append_entry(builder: &mut tar::Builder<Vec<u8>>, path: &str, data: &[u8]) -> ExportResult<()> {
    let mut header = tar::Header::new_gnu();
    header.set_size(data.len() as u64);
    header.set_mode(0o644);
    // fixed mtime keeps identical exports byte-identical
    header.set_mtime(0);
    header.set_entry_type(tar::EntryType::Regular);
    builder
        .append_data(&mut header, path, data)
        .map_err(|e| ExportError::container(format!("append {}: {}", path, e)))
}

#[cfg(test)]
#[path = "archive_test.rs"]
mod archive_test;
