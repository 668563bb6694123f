//! Stable name hashing for scene ids, file-set identity and loader contexts.

use std::hash::Hasher;
use std::path::Path;

use twox_hash::XxHash64;

use crate::pool::id::SourceId;

fn xxh64(bytes: &[u8]) -> u64 {
    let mut hasher = XxHash64::with_seed(0);
    hasher.write(bytes);
    hasher.finish()
}

/// 32-bit hash of a resource or context name, as stored in scene tables.
pub fn hash_name(name: &str) -> u32 {
    let h = xxh64(name.as_bytes());
    (h ^ (h >> 32)) as u32
}

/// Identity of the file set opened from `style_path`.
pub fn hash_path(style_path: &Path) -> SourceId {
    SourceId(xxh64(style_path.as_os_str().as_encoded_bytes()))
}
