//! Versioned binary persistence for [`ModuleGraph`].
//!
//! Layout: 8-byte magic, little-endian u32 format version, postcard payload.
//! The closure cache is not persisted; queries recompute it on demand, so
//! save/load round-trips every public query result.

use super::{GraphData, ModuleGraph};
use crate::errors::Error;
use anyhow::{Context, Result};
use std::fs;
use std::path::Path;

const MAGIC: &[u8; 8] = b"TPGRAPH\0";
const FORMAT_VERSION: u32 = 1;

pub fn to_file(graph: &ModuleGraph, path: &Path) -> Result<()> {
    let payload = postcard::to_allocvec(&graph.data)
        .with_context(|| format!("serializing graph for {}", path.display()))?;
    let mut bytes = Vec::with_capacity(MAGIC.len() + 4 + payload.len());
    bytes.extend_from_slice(MAGIC);
    bytes.extend_from_slice(&FORMAT_VERSION.to_le_bytes());
    bytes.extend_from_slice(&payload);
    fs::write(path, bytes).with_context(|| format!("writing graph to {}", path.display()))?;
    Ok(())
}

pub fn from_file(path: &Path) -> Result<ModuleGraph> {
    let bytes =
        fs::read(path).with_context(|| format!("reading graph from {}", path.display()))?;
    if bytes.len() < MAGIC.len() + 4 || &bytes[..MAGIC.len()] != MAGIC {
        return Err(Error::BadMagic {
            path: path.to_path_buf(),
        }
        .into());
    }
    let version = u32::from_le_bytes(
        bytes[MAGIC.len()..MAGIC.len() + 4]
            .try_into()
            .expect("length checked"),
    );
    if version != FORMAT_VERSION {
        return Err(Error::UnsupportedVersion {
            path: path.to_path_buf(),
            version,
        }
        .into());
    }
    let data: GraphData = postcard::from_bytes(&bytes[MAGIC.len() + 4..])
        .with_context(|| format!("decoding graph from {}", path.display()))?;
    Ok(ModuleGraph::from_data(data))
}
