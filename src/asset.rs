use std::fmt;

use sha2::{Digest, Sha256};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AssetKind {
    /// PNG frame capture, stored under an `image/` sub-bucket.
    Image,
    /// MP3 audio track.
    Sound,
}

impl AssetKind {
    pub fn extension(&self) -> &'static str {
        match self {
            AssetKind::Image => "png",
            AssetKind::Sound => "mp3",
        }
    }

    fn sub_dir(&self) -> Option<&'static str> {
        match self {
            AssetKind::Image => Some("image"),
            AssetKind::Sound => None,
        }
    }
}

/// Lowercase hex SHA-256 of `bytes`.
pub fn content_hash(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Asset {
    pub hash: String,
    pub byte_length: usize,
    pub kind: AssetKind,
}

impl Asset {
    pub fn from_bytes(bytes: &[u8], kind: AssetKind) -> Self {
        Self {
            hash: content_hash(bytes),
            byte_length: bytes.len(),
            kind,
        }
    }

    pub fn path(&self) -> AssetPath {
        AssetPath::new(&self.hash, self.kind)
    }
}

/// `temp/<h0h1>/<h2h3>/[image/]<hash>.<ext>`, derived from hash and kind only.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AssetPath(String);

impl AssetPath {
    pub fn new(hash: &str, kind: AssetKind) -> Self {
        let bucket = |range: std::ops::Range<usize>| hash.get(range).unwrap_or("00");
        let mut path = format!("temp/{}/{}/", bucket(0..2), bucket(2..4));
        if let Some(dir) = kind.sub_dir() {
            path.push_str(dir);
            path.push('/');
        }
        path.push_str(hash);
        path.push('.');
        path.push_str(kind.extension());
        Self(path)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// File name without directories, e.g. `<hash>.png`.
    pub fn file_name(&self) -> &str {
        self.0.rsplit('/').next().unwrap_or(&self.0)
    }

    /// Content hash, i.e. the file name without its extension.
    pub fn hash(&self) -> &str {
        let name = self.file_name();
        name.rsplit_once('.').map_or(name, |(stem, _)| stem)
    }
}

impl fmt::Display for AssetPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for AssetPath {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
