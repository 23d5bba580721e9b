//! Size and nesting limits enforced on every document (§3 [SUPPLEMENT]).
//!
//! Not part of the wire contract — these exist so `insert`/`patch`/`replace`
//! can't be used to write unboundedly large or deeply nested documents.
use errors::ErrorMetadata;

pub const MAX_DOCUMENT_SIZE_BYTES: usize = 1 << 20;
pub const MAX_NESTING: usize = 16;

pub trait Size {
    /// An approximation of the serialized size of this value, in bytes.
    fn size(&self) -> usize;
    /// The depth of the deepest array/object nesting within this value.
    fn nesting(&self) -> usize;
}

pub fn check_system_size(size: usize) -> anyhow::Result<()> {
    if size > MAX_DOCUMENT_SIZE_BYTES {
        anyhow::bail!(ErrorMetadata::invalid_value(
            "DocumentTooLarge",
            format!("document of {size} bytes exceeds the {MAX_DOCUMENT_SIZE_BYTES} byte limit"),
        ));
    }
    Ok(())
}

pub fn check_nesting(nesting: usize) -> anyhow::Result<()> {
    if nesting > MAX_NESTING {
        anyhow::bail!(ErrorMetadata::invalid_value(
            "DocumentTooNested",
            format!("document nesting depth {nesting} exceeds the {MAX_NESTING} level limit"),
        ));
    }
    Ok(())
}
