use std::{
    fmt,
    ops::Deref,
};

use errors::ErrorMetadata;

use crate::base64::encode_urlsafe;

/// Maximum size of a single `bytes` value, mirroring the document size
/// ceiling so one oversized blob can't bypass `MAX_DOCUMENT_SIZE_BYTES`.
pub const MAX_BYTES_LEN: usize = 1 << 20;

/// Immutable byte sequence value (§3). `bytes` round-trips through JSON via
/// the `{__type:"arraybuffer",value:[...]}` wire encoding (§4.A).
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct ConvexBytes(Vec<u8>);

impl TryFrom<Vec<u8>> for ConvexBytes {
    type Error = anyhow::Error;

    fn try_from(v: Vec<u8>) -> anyhow::Result<Self> {
        if v.len() > MAX_BYTES_LEN {
            anyhow::bail!(ErrorMetadata::invalid_value(
                "BytesTooLarge",
                format!("bytes value of {} bytes exceeds the {MAX_BYTES_LEN} byte limit", v.len()),
            ));
        }
        Ok(ConvexBytes(v))
    }
}

impl From<ConvexBytes> for Vec<u8> {
    fn from(bytes: ConvexBytes) -> Self {
        bytes.0
    }
}

impl Deref for ConvexBytes {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.0[..]
    }
}

impl fmt::Debug for ConvexBytes {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "b\"{}\"", encode_urlsafe(&self.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_oversized_bytes() {
        let too_big = vec![0u8; MAX_BYTES_LEN + 1];
        assert!(ConvexBytes::try_from(too_big).is_err());
    }

    #[test]
    fn accepts_empty_and_small() {
        assert!(ConvexBytes::try_from(Vec::new()).is_ok());
        assert!(ConvexBytes::try_from(vec![1, 2, 3]).is_ok());
    }
}
