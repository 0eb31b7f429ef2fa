//! Packing: hash-keyed tables to dense integer-indexed arrays.
//!
//! Dense indices are assigned by table iteration order (insertion order,
//! which is deterministic for a given input). Every intermediate reference
//! collapses into a single packed [`Ref`] word; metadata paths are interned
//! into the derived paths table along the way.

use tracing::debug;
use trellis_program::{
    PackedMetadata, PackedProjection, PackedSetter, ProjectionData, Ref, HIDDEN_NAME,
    MAX_TABLE_INDEX,
};

use crate::builder::{IRef, Tables};
use crate::error::{Error, Result};
use crate::intern::{ConsTable, StableHash, StableHasher};
use crate::setters::ISetter;

/// A packed path: `[condition-ref, step-ref, ...]`, deduplicated.
#[derive(Debug, Clone, PartialEq)]
struct PackedPath(Vec<Ref>);

impl StableHash for PackedPath {
    fn stable_hash(&self, h: &mut StableHasher) {
        h.write_u64(self.0.len() as u64);
        for r in &self.0 {
            h.write_u32(r.bits());
        }
    }
}

/// One ordered top-level entry: interned name primitive (or none for
/// internal derivations) plus its projection reference.
pub(crate) struct TopLevel {
    pub name: Option<u64>,
    pub projection: IRef,
}

pub(crate) fn pack(
    tables: &Tables,
    setters: &[ISetter],
    top_levels: &[TopLevel],
) -> Result<ProjectionData> {
    let packer = Packer { tables };

    // Derived paths table: intern each metadata path after per-step packing.
    let mut path_table: ConsTable<PackedPath> = ConsTable::new("paths");
    let mut meta_paths: Vec<Vec<u64>> = Vec::with_capacity(tables.metadata.len());
    for meta in tables.metadata.values() {
        let mut hashes = Vec::with_capacity(meta.paths.len());
        for (cond, steps) in &meta.paths {
            let mut packed = Vec::with_capacity(steps.len() + 1);
            packed.push(packer.pack_ref(*cond)?);
            for step in steps {
                packed.push(packer.pack_ref(*step)?);
            }
            hashes.push(path_table.intern(PackedPath(packed))?);
        }
        meta_paths.push(hashes);
    }

    let meta_data = tables
        .metadata
        .values()
        .zip(meta_paths)
        .map(|(meta, hashes)| {
            let paths = hashes
                .into_iter()
                .map(|h| index_in(&path_table, h, "paths"))
                .collect::<Result<Vec<_>>>()?;
            Ok(PackedMetadata {
                flags: meta.flags,
                paths,
            })
        })
        .collect::<Result<Vec<_>>>()?;

    let mut getters = Vec::with_capacity(tables.projections.len());
    let mut sources = Vec::with_capacity(tables.projections.len());
    for proj in tables.projections.values() {
        let args = proj
            .args
            .iter()
            .map(|&a| packer.pack_ref(a))
            .collect::<Result<Vec<_>>>()?;
        getters.push(PackedProjection {
            kind: packer.pack_ref(IRef::Prim(proj.kind))?,
            metadata: index_in(&tables.metadata, proj.metadata, "metaData")?,
            args,
        });
        sources.push(proj.source.clone());
    }

    let packed_setters = setters
        .iter()
        .map(|s| {
            Ok(PackedSetter {
                kind: packer.pack_ref(IRef::Prim(s.kind))?,
                name: packer.pack_ref(IRef::Prim(s.name))?,
                token_count: s.token_count,
                steps: s
                    .steps
                    .iter()
                    .map(|&r| packer.pack_ref(r))
                    .collect::<Result<Vec<_>>>()?,
            })
        })
        .collect::<Result<Vec<_>>>()?;

    let mut top_level_names = Vec::with_capacity(top_levels.len());
    let mut top_level_projections = Vec::with_capacity(top_levels.len());
    for tl in top_levels {
        top_level_names.push(match tl.name {
            Some(hash) => index_in(&tables.primitives, hash, "primitives")? as i32,
            None => HIDDEN_NAME,
        });
        top_level_projections.push(packer.pack_ref(tl.projection)?);
    }

    let data = ProjectionData {
        getters,
        primitives: tables.primitives.values().cloned().collect(),
        top_level_names,
        top_level_projections,
        meta_data,
        paths: path_table.values().map(|p| p.0.clone()).collect(),
        setters: packed_setters,
        sources,
    };

    debug!(
        getters = data.getters.len(),
        primitives = data.primitives.len(),
        metadata = data.meta_data.len(),
        paths = data.paths.len(),
        setters = data.setters.len(),
        "tables packed"
    );
    Ok(data)
}

struct Packer<'t> {
    tables: &'t Tables,
}

impl Packer<'_> {
    fn pack_ref(&self, r: IRef) -> Result<Ref> {
        match r {
            IRef::Int(n) => Ref::inline(n).ok_or(Error::RefOverflow {
                table: "ints",
                index: n as usize,
                max: MAX_TABLE_INDEX,
            }),
            IRef::Prim(hash) => {
                let index = index_in(&self.tables.primitives, hash, "primitives")?;
                Ref::primitive(index).ok_or(Error::RefOverflow {
                    table: "primitives",
                    index: index as usize,
                    max: MAX_TABLE_INDEX,
                })
            }
            IRef::Proj(hash) => {
                let index = index_in(&self.tables.projections, hash, "projections")?;
                Ref::projection(index).ok_or(Error::RefOverflow {
                    table: "projections",
                    index: index as usize,
                    max: MAX_TABLE_INDEX,
                })
            }
        }
    }
}

fn index_in<T: StableHash + PartialEq>(
    table: &ConsTable<T>,
    hash: u64,
    name: &'static str,
) -> Result<u32> {
    let index = table
        .index_of(hash)
        .ok_or_else(|| Error::Internal(format!("unresolved {name} hash {hash:#018x}")))?;
    u32::try_from(index).map_err(|_| Error::RefOverflow {
        table: name,
        index,
        max: u32::MAX,
    })
}
