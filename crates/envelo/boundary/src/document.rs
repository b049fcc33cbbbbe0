//! Boundary configuration documents.
//!
//! The same shape is consumed from the certification authority and produced
//! by discovery for upload: one array per boundary kind.

use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::boundary::{Boundary, BoundaryDef, BoundaryKind};
use crate::error::{BoundaryError, BoundaryResult};

/// A complete boundary set, grouped by kind.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct BoundaryDocument {
    #[serde(default)]
    pub numeric_boundaries: Vec<BoundaryDef>,
    #[serde(default)]
    pub geo_boundaries: Vec<BoundaryDef>,
    #[serde(default)]
    pub time_boundaries: Vec<BoundaryDef>,
    #[serde(default)]
    pub rate_boundaries: Vec<BoundaryDef>,
    #[serde(default)]
    pub state_boundaries: Vec<BoundaryDef>,
}

impl BoundaryDocument {
    pub fn from_json(raw: &str) -> BoundaryResult<Self> {
        Ok(serde_json::from_str(raw)?)
    }

    pub fn load(path: impl AsRef<Path>) -> BoundaryResult<Self> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_json(&raw)
    }

    pub fn from_defs(defs: impl IntoIterator<Item = BoundaryDef>) -> Self {
        let mut doc = Self::default();
        for def in defs {
            doc.push(def);
        }
        doc
    }

    pub fn from_boundaries(boundaries: &[Arc<Boundary>]) -> Self {
        Self::from_defs(boundaries.iter().map(|b| b.def().clone()))
    }

    /// Route a definition into the array for its kind.
    pub fn push(&mut self, def: BoundaryDef) {
        self.section_mut(def.kind()).push(def);
    }

    fn section_mut(&mut self, kind: BoundaryKind) -> &mut Vec<BoundaryDef> {
        match kind {
            BoundaryKind::Numeric => &mut self.numeric_boundaries,
            BoundaryKind::Geo => &mut self.geo_boundaries,
            BoundaryKind::Time => &mut self.time_boundaries,
            BoundaryKind::Rate => &mut self.rate_boundaries,
            BoundaryKind::State => &mut self.state_boundaries,
        }
    }

    fn sections(&self) -> [(BoundaryKind, &Vec<BoundaryDef>); 5] {
        [
            (BoundaryKind::Numeric, &self.numeric_boundaries),
            (BoundaryKind::Geo, &self.geo_boundaries),
            (BoundaryKind::Time, &self.time_boundaries),
            (BoundaryKind::Rate, &self.rate_boundaries),
            (BoundaryKind::State, &self.state_boundaries),
        ]
    }

    pub fn len(&self) -> usize {
        self.sections().iter().map(|(_, defs)| defs.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Validate every entry and build the boundary set.
    ///
    /// Fails on the first invalid entry, on an entry filed under the wrong
    /// kind, or on a duplicate name.
    pub fn build(&self) -> BoundaryResult<Vec<Arc<Boundary>>> {
        let mut names = HashSet::new();
        let mut built = Vec::with_capacity(self.len());
        for (kind, defs) in self.sections() {
            for def in defs {
                if def.kind() != kind {
                    return Err(BoundaryError::invalid(
                        &def.name,
                        format!("{} boundary listed under {}_boundaries", def.kind(), kind),
                    ));
                }
                if !names.insert(def.name.clone()) {
                    return Err(BoundaryError::DuplicateName(def.name.clone()));
                }
                built.push(Arc::new(Boundary::new(def.clone())?));
            }
        }
        Ok(built)
    }
}
