//! Dimensions and the offset provider.
//!
//! A [`Dimension`] names an axis of a field (e.g. `IDim`, `Vertex`, `K`).
//! The [`OffsetProvider`] is supplied by the caller and maps every offset
//! name used in `shift`/`neighbors` calls to either a plain Cartesian
//! dimension or a neighbor [`Connectivity`] between two mesh dimensions.

use std::collections::BTreeMap;
use std::fmt;

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

/// The kind of a dimension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum DimensionKind {
    #[default]
    Horizontal,
    Vertical,
    /// A neighbor (sparse) axis, e.g. the `V2EDim` of a vertex-to-edge field.
    Local,
}

/// A named axis.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Dimension {
    pub value: String,
    #[serde(default)]
    pub kind: DimensionKind,
}

impl Dimension {
    pub fn new(value: impl Into<String>, kind: DimensionKind) -> Self {
        Dimension { value: value.into(), kind }
    }

    pub fn horizontal(value: impl Into<String>) -> Self {
        Self::new(value, DimensionKind::Horizontal)
    }

    pub fn vertical(value: impl Into<String>) -> Self {
        Self::new(value, DimensionKind::Vertical)
    }

    pub fn local(value: impl Into<String>) -> Self {
        Self::new(value, DimensionKind::Local)
    }

    pub fn is_local(&self) -> bool {
        self.kind == DimensionKind::Local
    }
}

impl fmt::Display for Dimension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            DimensionKind::Local => write!(f, "{}[local]", self.value),
            DimensionKind::Vertical => write!(f, "{}[vertical]", self.value),
            DimensionKind::Horizontal => write!(f, "{}", self.value),
        }
    }
}

/// A neighbor relation: shifting an iterator positioned on `origin_axis`
/// by this connectivity moves it onto `neighbor_axis`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Connectivity {
    pub origin_axis: Dimension,
    pub neighbor_axis: Dimension,
    pub max_neighbors: usize,
    /// Whether some neighbor slots may be missing (mesh boundaries).
    #[serde(default)]
    pub has_skip_values: bool,
}

/// What a single offset name resolves to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OffsetProviderEntry {
    Dimension(Dimension),
    Connectivity(Connectivity),
}

/// Maps offset names to dimensions or connectivities.
///
/// Backed by a `BTreeMap` so iteration (and therefore every derived
/// dimension table) is deterministic.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OffsetProvider {
    entries: BTreeMap<String, OffsetProviderEntry>,
}

impl OffsetProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a Cartesian offset, e.g. `I -> IDim`.
    pub fn with_dimension(mut self, offset: impl Into<String>, dim: Dimension) -> Self {
        self.entries
            .insert(offset.into(), OffsetProviderEntry::Dimension(dim));
        self
    }

    /// Register a neighbor connectivity, e.g. `V2E -> Vertex → Edge`.
    pub fn with_connectivity(mut self, offset: impl Into<String>, conn: Connectivity) -> Self {
        self.entries
            .insert(offset.into(), OffsetProviderEntry::Connectivity(conn));
        self
    }

    pub fn get(&self, offset: &str) -> Option<&OffsetProviderEntry> {
        self.entries.get(offset)
    }

    pub fn connectivity(&self, offset: &str) -> Option<&Connectivity> {
        match self.entries.get(offset) {
            Some(OffsetProviderEntry::Connectivity(conn)) => Some(conn),
            _ => None,
        }
    }

    /// The Cartesian dimension an offset displaces along, if it is one.
    pub fn cartesian_dimension(&self, offset: &str) -> Option<&Dimension> {
        match self.entries.get(offset) {
            Some(OffsetProviderEntry::Dimension(dim)) => Some(dim),
            _ => None,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &OffsetProviderEntry)> {
        self.entries.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Every dimension the provider makes known, keyed by name.
    ///
    /// Each offset name is itself a local dimension (the neighbor index axis
    /// of sparse fields); Cartesian entries contribute their dimension and
    /// connectivities contribute both axes.
    pub fn dimensions(&self) -> FxHashMap<String, Dimension> {
        let mut dims = FxHashMap::default();
        for (name, entry) in &self.entries {
            dims.insert(name.clone(), Dimension::local(name.clone()));
            match entry {
                OffsetProviderEntry::Dimension(dim) => {
                    dims.insert(dim.value.clone(), dim.clone());
                }
                OffsetProviderEntry::Connectivity(conn) => {
                    dims.insert(conn.origin_axis.value.clone(), conn.origin_axis.clone());
                    dims.insert(conn.neighbor_axis.value.clone(), conn.neighbor_axis.clone());
                }
            }
        }
        dims
    }
}
