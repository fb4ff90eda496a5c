//! Per-document payload files.
//!
//! A payload file is a zstd stream holding a [`FileHeader`] followed by whatever the
//! [`PayloadCodec`] writes for the bundle.

use crate::error::CacheError;
use crate::util::{
    bincode_deserialize_from, bincode_serialize_into, read_compressed, write_compressed,
    FileHeader,
};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io::{Read, Write};
use std::marker::PhantomData;
use std::path::Path;

const PAYLOAD_MAGIC: [u8; 8] = *b"LTCACHE1";
const PAYLOAD_FORMAT_VERSION: u32 = 1;

/// Everything cached for one document: the paragraph structure plus the results of the
/// sentence-level and paragraph-level rule passes.
///
/// The cache types themselves belong to the checker; this crate only moves them to and
/// from disk as one unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalysisCacheBundle<D, R> {
    pub document_cache: D,
    pub sentences_cache: R,
    /// One result cache per paragraph-level rule category.
    pub paragraphs_cache: Vec<R>,
}

impl<D, R> AnalysisCacheBundle<D, R> {
    pub fn new(document_cache: D, sentences_cache: R, paragraphs_cache: Vec<R>) -> Self {
        Self {
            document_cache,
            sentences_cache,
            paragraphs_cache,
        }
    }

    pub fn document_cache(&self) -> &D {
        &self.document_cache
    }

    pub fn sentences_cache(&self) -> &R {
        &self.sentences_cache
    }

    pub fn paragraphs_cache(&self) -> &[R] {
        &self.paragraphs_cache
    }
}

/// Turns a bundle into bytes and back. Compression and file handling are done by the
/// caller.
pub trait PayloadCodec {
    type Bundle;

    fn encode(&self, bundle: &Self::Bundle, writer: &mut dyn Write) -> Result<(), CacheError>;

    fn decode(&self, reader: &mut dyn Read) -> Result<Self::Bundle, CacheError>;
}

/// [`PayloadCodec`] for any serde type, using the crate's bincode options.
pub struct BincodeCodec<B> {
    _bundle: PhantomData<fn() -> B>,
}

impl<B> BincodeCodec<B> {
    pub fn new() -> Self {
        Self {
            _bundle: PhantomData,
        }
    }
}

impl<B> Default for BincodeCodec<B> {
    fn default() -> Self {
        Self::new()
    }
}

impl<B> Clone for BincodeCodec<B> {
    fn clone(&self) -> Self {
        Self::new()
    }
}

impl<B> fmt::Debug for BincodeCodec<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BincodeCodec").finish()
    }
}

impl<B: Serialize + DeserializeOwned> PayloadCodec for BincodeCodec<B> {
    type Bundle = B;

    fn encode(&self, bundle: &B, writer: &mut dyn Write) -> Result<(), CacheError> {
        bincode_serialize_into(writer, bundle)
    }

    fn decode(&self, reader: &mut dyn Read) -> Result<B, CacheError> {
        bincode_deserialize_from(reader)
    }
}

pub(crate) fn write_payload<C: PayloadCodec + ?Sized>(
    path: &Path,
    codec: &C,
    bundle: &C::Bundle,
) -> Result<(), CacheError> {
    let header = FileHeader {
        magic: PAYLOAD_MAGIC,
        format_version: PAYLOAD_FORMAT_VERSION,
    };
    write_compressed(path, |w| {
        bincode_serialize_into(&mut *w, &header)?;
        codec.encode(bundle, w)
    })
}

pub(crate) fn read_payload<C: PayloadCodec + ?Sized>(
    path: &Path,
    codec: &C,
) -> Result<C::Bundle, CacheError> {
    let bytes = read_compressed(path)?;
    let mut reader = bytes.as_slice();
    let header: FileHeader = bincode_deserialize_from(&mut reader)?;
    header.check(path, PAYLOAD_MAGIC, PAYLOAD_FORMAT_VERSION)?;
    codec.decode(&mut reader)
}
