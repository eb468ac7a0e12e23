// SPDX-License-Identifier: Apache-2.0
//! Per-entity provenance index.
//!
//! Built during reduction: for every entity an op wrote to (node id or
//! encoded edge key), the index records the ordered list of patch commit
//! shas that touched it. Slicing and `patches_for` queries read this map;
//! it is an ephemeral cache, always reconstructable from history.

use std::collections::BTreeMap;

use warp_store::Oid;

/// `entity → ordered patch shas` (fold order, deduplicated).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProvenanceIndex {
    entries: BTreeMap<String, Vec<Oid>>,
}

impl ProvenanceIndex {
    /// Creates an empty index.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records that `sha` wrote to `entity`.
    ///
    /// Ops inside one patch are recorded consecutively, so deduplication
    /// only needs to look at the tail.
    pub fn record(&mut self, entity: &str, sha: &Oid) {
        let shas = self.entries.entry(entity.to_owned()).or_default();
        if shas.last() != Some(sha) {
            shas.push(sha.clone());
        }
    }

    /// Ordered patch shas that wrote to `entity`, if any did.
    #[must_use]
    pub fn patches_for(&self, entity: &str) -> Option<&[Oid]> {
        self.entries.get(entity).map(Vec::as_slice)
    }

    /// Number of indexed entities.
    #[must_use]
    pub fn entity_count(&self) -> usize {
        self.entries.len()
    }

    /// Iterates `(entity, shas)` in entity order.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &Vec<Oid>)> {
        self.entries.iter()
    }

    /// Maps the index to its canonical wire value (the checkpoint index
    /// blob format).
    #[must_use]
    pub fn to_value(&self) -> ciborium::value::Value {
        use ciborium::value::Value;
        Value::Map(
            self.entries
                .iter()
                .map(|(entity, shas)| {
                    (
                        Value::Text(entity.clone()),
                        Value::Array(
                            shas.iter()
                                .map(|sha| Value::Text(sha.as_str().to_owned()))
                                .collect(),
                        ),
                    )
                })
                .collect(),
        )
    }

    /// Reads an index back from its wire value.
    ///
    /// # Errors
    ///
    /// Returns [`crate::canonical::CodecError`] for shape violations.
    pub fn from_value(
        value: &ciborium::value::Value,
    ) -> Result<Self, crate::canonical::CodecError> {
        use ciborium::value::Value;
        let Value::Map(map_entries) = value else {
            return Err(crate::wire::bad("provenance index must be a map"));
        };
        let mut index = Self::new();
        for (k, v) in map_entries {
            let entity = crate::wire::as_text(k, "index entity")?;
            let Value::Array(shas) = v else {
                return Err(crate::wire::bad("index entry must be an array"));
            };
            for sha in shas {
                let oid = Oid::parse(crate::wire::as_text(sha, "index sha")?)
                    .map_err(|e| crate::wire::bad(&e.to_string()))?;
                index.record(entity, &oid);
            }
        }
        Ok(index)
    }

    /// Appends every `(entity, sha)` pair of `other` into this index.
    pub fn merge(&mut self, other: &Self) {
        for (entity, shas) in other.iter() {
            for sha in shas {
                self.record(entity, sha);
            }
        }
    }
}
