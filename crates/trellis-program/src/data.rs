//! The packed program tables.

use bitflags::bitflags;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use trellis_expr::SetterKind;

use crate::primitive::Primitive;
use crate::refs::{Ref, RefSlot};

bitflags! {
    /// Flags of a metadata record.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct MetaFlags: u32 {
        /// The projection contributes invalidations.
        const INVALIDATES = 1;
    }
}

// Flags travel as their raw bits; unknown bits from newer programs are
// dropped on read.
impl Serialize for MetaFlags {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u32(self.bits())
    }
}

impl<'de> Deserialize<'de> for MetaFlags {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Ok(MetaFlags::from_bits_truncate(u32::deserialize(
            deserializer,
        )?))
    }
}

/// Sentinel for a hidden (internal) top-level name.
pub const HIDDEN_NAME: i32 = -1;

/// A compiled, deduplicated sub-expression.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PackedProjection {
    /// Operator-kind tag (a primitives ref).
    pub kind: Ref,
    /// Index into the metadata table.
    pub metadata: u32,
    /// Argument references.
    pub args: Vec<Ref>,
}

/// Invalidation metadata shared by projections.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PackedMetadata {
    pub flags: MetaFlags,
    /// Indices into the paths table.
    pub paths: Vec<u32>,
}

impl PackedMetadata {
    /// The reserved "no metadata" record at index 0.
    pub fn sentinel() -> Self {
        Self {
            flags: MetaFlags::empty(),
            paths: Vec::new(),
        }
    }

    pub fn is_sentinel(&self) -> bool {
        self.flags.is_empty() && self.paths.is_empty()
    }
}

/// A compiled setter recipe.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PackedSetter {
    /// Setter kind tag (a primitives ref to the kind name).
    pub kind: Ref,
    /// Setter name (a primitives ref).
    pub name: Ref,
    /// Number of bound positional path arguments.
    pub token_count: u32,
    /// Path steps, starting at a model root.
    pub steps: Vec<Ref>,
}

/// The compiler's output artifact and the runtime's sole input.
///
/// Field order is part of the contract and mirrors the serialized layout:
/// getters, primitives, topLevelNames, topLevelProjections, metaData,
/// paths, setters, sources.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectionData {
    pub getters: Vec<PackedProjection>,
    pub primitives: Vec<Primitive>,
    /// Primitive index of each top-level's exported name, or [`HIDDEN_NAME`].
    pub top_level_names: Vec<i32>,
    pub top_level_projections: Vec<Ref>,
    pub meta_data: Vec<PackedMetadata>,
    /// Each path is `[condition-ref, step-ref, ...]`.
    pub paths: Vec<Vec<Ref>>,
    pub setters: Vec<PackedSetter>,
    /// Source location per getter, for diagnostics.
    pub sources: Vec<Option<String>>,
}

impl ProjectionData {
    /// Look up an interned primitive by ref; `None` for non-primitive refs
    /// or out-of-range indices.
    pub fn primitive(&self, r: Ref) -> Option<&Primitive> {
        match r.slot() {
            RefSlot::Primitive(i) => self.primitives.get(i as usize),
            _ => None,
        }
    }

    /// Decode the setter kind tag of a compiled setter.
    pub fn setter_kind(&self, setter: &PackedSetter) -> Option<SetterKind> {
        match self.primitive(setter.kind)?.as_str()? {
            "set" => Some(SetterKind::Set),
            "splice" => Some(SetterKind::Splice),
            "push" => Some(SetterKind::Push),
            _ => None,
        }
    }

    /// Exported name of a compiled setter.
    pub fn setter_name(&self, setter: &PackedSetter) -> Option<&str> {
        self.primitive(setter.name)?.as_str()
    }

    /// Exported name of top-level `i`, if it is not hidden.
    pub fn top_level_name(&self, i: usize) -> Option<&str> {
        let name_idx = *self.top_level_names.get(i)?;
        if name_idx == HIDDEN_NAME {
            return None;
        }
        self.primitives.get(name_idx as usize)?.as_str()
    }

    /// Structural sanity checks on the packed tables. Every ref must point
    /// at a live slot and the metadata sentinel must be in place.
    pub fn check_integrity(&self) -> Result<(), String> {
        let check_ref = |r: Ref, what: &str| -> Result<(), String> {
            match r.slot() {
                RefSlot::Inline(_) => Ok(()),
                RefSlot::Primitive(i) if (i as usize) < self.primitives.len() => Ok(()),
                RefSlot::Projection(i) if (i as usize) < self.getters.len() => Ok(()),
                slot => Err(format!("{what}: dangling ref {slot:?}")),
            }
        };

        match self.meta_data.first() {
            Some(m) if m.is_sentinel() => {}
            _ => return Err("metaData[0] is not the empty sentinel".into()),
        }
        if self.getters.len() != self.sources.len() {
            return Err("sources is not parallel to getters".into());
        }
        if self.top_level_names.len() != self.top_level_projections.len() {
            return Err("topLevelNames is not parallel to topLevelProjections".into());
        }

        for (i, g) in self.getters.iter().enumerate() {
            check_ref(g.kind, &format!("getters[{i}].kind"))?;
            if g.metadata as usize >= self.meta_data.len() {
                return Err(format!("getters[{i}]: dangling metadata index"));
            }
            for &a in &g.args {
                check_ref(a, &format!("getters[{i}].args"))?;
            }
        }
        for m in &self.meta_data {
            for &p in &m.paths {
                if p as usize >= self.paths.len() {
                    return Err("metaData: dangling path index".into());
                }
            }
        }
        for path in &self.paths {
            for &r in path {
                check_ref(r, "paths")?;
            }
        }
        for s in &self.setters {
            check_ref(s.kind, "setters.kind")?;
            check_ref(s.name, "setters.name")?;
            for &r in &s.steps {
                check_ref(r, "setters.steps")?;
            }
        }
        for &r in &self.top_level_projections {
            check_ref(r, "topLevelProjections")?;
        }
        Ok(())
    }
}
