//! Document identity (§3, §6).
//!
//! Ids are 16 random bytes encoded as URL-safe base64 without padding. The
//! first byte is the low 8 bits of the table's `TableNumber`, assigned when
//! a table is first created, so that distinct tables' ids differ in their
//! first base64 character in the common case. Storage rows still key off the
//! table name directly; the tag exists only so ids are recognizable, never
//! to allow id decoding to substitute for looking up which table a document
//! lives in.
use std::{
    fmt,
    str::FromStr,
};

use rand::RngCore;
use thiserror::Error;

use crate::{
    base64::{
        decode_urlsafe,
        encode_urlsafe,
    },
    table_name::TableNumber,
};

pub const ID_BYTE_LEN: usize = 16;
/// `encode_urlsafe` of 16 bytes is always 22 base64 characters.
pub const ID_ENCODED_LEN: usize = 22;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum IdDecodeError {
    #[error("Id \"{0}\" is empty")]
    Empty(String),
    #[error("Id \"{0}\" contains characters outside [A-Za-z0-9_-]")]
    InvalidAlphabet(String),
    #[error("Id \"{0}\" has invalid length {1}, expected 22")]
    InvalidLength(String, usize),
}

#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DocumentId([u8; ID_BYTE_LEN]);

impl DocumentId {
    pub fn generate(table_number: TableNumber) -> Self {
        let mut bytes = [0u8; ID_BYTE_LEN];
        rand::thread_rng().fill_bytes(&mut bytes);
        bytes[0] = (table_number & 0xff) as u8;
        Self(bytes)
    }

    pub fn encode(&self) -> String {
        encode_urlsafe(&self.0)
    }

    pub fn decode(s: &str) -> Result<Self, IdDecodeError> {
        if s.is_empty() {
            return Err(IdDecodeError::Empty(s.to_owned()));
        }
        if !s
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            return Err(IdDecodeError::InvalidAlphabet(s.to_owned()));
        }
        let bytes =
            decode_urlsafe(s).map_err(|_| IdDecodeError::InvalidLength(s.to_owned(), s.len()))?;
        let bytes: [u8; ID_BYTE_LEN] = bytes
            .try_into()
            .map_err(|v: Vec<u8>| IdDecodeError::InvalidLength(s.to_owned(), v.len()))?;
        Ok(Self(bytes))
    }

    pub fn table_tag(&self) -> u8 {
        self.0[0]
    }
}

impl fmt::Debug for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DocumentId({})", self.encode())
    }
}

impl fmt::Display for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.encode())
    }
}

impl FromStr for DocumentId {
    type Err = IdDecodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::decode(s)
    }
}

impl serde::Serialize for DocumentId {
    fn serialize<S: serde::Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&self.encode())
    }
}

impl<'de> serde::Deserialize<'de> for DocumentId {
    fn deserialize<D: serde::Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        let s = String::deserialize(d)?;
        Self::decode(&s).map_err(serde::de::Error::custom)
    }
}
