//! Approximate-nearest-neighbor vector index over chunk embeddings.
//!
//! The index owns the raw vectors and the `Uuid` map; the ANN graph itself
//! (an `hnsw_rs::Hnsw`) is a derived, rebuildable structure rather than the
//! persisted artifact — `save`/`load` serialize the owned vectors and ids,
//! and `build` reconstructs the graph from them. This mirrors the
//! contract this module is grounded on: add/build/save/load, with an
//! integrity invariant that the uuid map's length always matches the
//! number of items the graph was built from.

use hnsw_rs::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{RagError, RagResult};

#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredVector {
    id: Uuid,
    vector: Vec<f32>,
}

/// Owns chunk embeddings and exposes ANN search over them.
pub struct VectorIndex {
    dims: usize,
    entries: Vec<StoredVector>,
    graph: Option<Hnsw<'static, f32, DistCosine>>,
}

impl VectorIndex {
    pub fn new(dims: usize) -> Self {
        Self {
            dims,
            entries: Vec::new(),
            graph: None,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Every uuid currently owned by this index, in internal-id order.
    pub fn ids(&self) -> impl Iterator<Item = Uuid> + '_ {
        self.entries.iter().map(|e| e.id)
    }

    /// Add a vector. Invalidates the built graph; call `build` again
    /// before querying.
    pub fn add(&mut self, id: Uuid, mut vector: Vec<f32>) -> RagResult<()> {
        if vector.len() != self.dims {
            return Err(RagError::InvalidData(format!(
                "expected {} dims, got {}",
                self.dims,
                vector.len()
            )));
        }
        crate::embedding::l2_normalize(&mut vector);
        self.entries.push(StoredVector { id, vector });
        self.graph = None;
        Ok(())
    }

    /// Copy still-valid entries from another index into this one, by id,
    /// skipping ids not present in `keep`. Used by incremental ingest to
    /// seed a staging index without re-embedding unchanged chunks.
    pub fn copy_forward(&mut self, other: &VectorIndex, keep: &std::collections::HashSet<Uuid>) {
        for entry in &other.entries {
            if keep.contains(&entry.id) {
                self.entries.push(entry.clone());
            }
        }
        self.graph = None;
    }

    /// (Re)build the ANN graph from the currently owned vectors.
    pub fn build(&mut self, ef_construction: usize) {
        let max_nb_connection = 16;
        let max_layer = 16;
        let graph: Hnsw<f32, DistCosine> = Hnsw::new(
            max_nb_connection,
            self.entries.len().max(1),
            max_layer,
            ef_construction,
            DistCosine {},
        );
        for (idx, entry) in self.entries.iter().enumerate() {
            graph.insert((&entry.vector, idx));
        }
        self.graph = Some(graph);
    }

    pub fn query(&self, vector: &[f32], n: usize) -> RagResult<Vec<(Uuid, f32)>> {
        let graph = self.graph.as_ref().ok_or_else(|| {
            RagError::IntegrityFailure("vector index queried before build()".to_string())
        })?;

        let mut query_vec = vector.to_vec();
        crate::embedding::l2_normalize(&mut query_vec);

        let ef_search = (n * 4).max(32);
        let neighbours = graph.search(&query_vec, n, ef_search);

        Ok(neighbours
            .into_iter()
            .filter_map(|nb| {
                self.entries
                    .get(nb.d_id)
                    .map(|e| (e.id, 1.0 - nb.distance as f32))
            })
            .collect())
    }

    /// Write the raw vectors to `vectors_path` and the id map to
    /// `map_path` as two independent temp-then-rename files, matching the
    /// on-disk contract's `vdb_data` / `vdb_data.map` pair. Callers
    /// arrange for both renames to happen inside the same save critical
    /// section as the other persisted artifacts.
    pub fn write_temp(&self, vectors_tmp: &std::path::Path, map_tmp: &std::path::Path) -> RagResult<()> {
        let vectors: Vec<&Vec<f32>> = self.entries.iter().map(|e| &e.vector).collect();
        let ids: Vec<Uuid> = self.entries.iter().map(|e| e.id).collect();
        std::fs::write(vectors_tmp, bincode::serialize(&vectors)?)?;
        std::fs::write(map_tmp, bincode::serialize(&ids)?)?;
        Ok(())
    }

    pub fn load(
        vectors_path: &std::path::Path,
        map_path: &std::path::Path,
        dims: usize,
        ef_construction: usize,
    ) -> RagResult<Self> {
        let vectors: Vec<Vec<f32>> = bincode::deserialize(&std::fs::read(vectors_path)?)?;
        let ids: Vec<Uuid> = bincode::deserialize(&std::fs::read(map_path)?)?;

        if vectors.len() != ids.len() {
            return Err(RagError::IntegrityFailure(format!(
                "vector file has {} entries but id map has {}",
                vectors.len(),
                ids.len()
            )));
        }

        let entries = ids
            .into_iter()
            .zip(vectors)
            .map(|(id, vector)| StoredVector { id, vector })
            .collect();

        let mut index = Self {
            dims,
            entries,
            graph: None,
        };
        if !index.is_empty() {
            index.build(ef_construction);
        }
        index.verify_integrity()?;
        Ok(index)
    }

    /// Enforce the invariant that the id list length equals the number of
    /// items the graph was built over.
    pub fn verify_integrity(&self) -> RagResult<()> {
        if let Some(graph) = &self.graph {
            let n_items = graph.get_nb_point();
            if n_items != self.entries.len() {
                return Err(RagError::IntegrityFailure(format!(
                    "uuid map has {} entries but graph has {} items",
                    self.entries.len(),
                    n_items
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_wrong_dimension() {
        let mut idx = VectorIndex::new(4);
        let result = idx.add(Uuid::new_v4(), vec![1.0, 2.0]);
        assert!(result.is_err());
    }

    #[test]
    fn build_and_query_roundtrip() {
        let mut idx = VectorIndex::new(3);
        let id1 = Uuid::new_v4();
        let id2 = Uuid::new_v4();
        idx.add(id1, vec![1.0, 0.0, 0.0]).unwrap();
        idx.add(id2, vec![0.0, 1.0, 0.0]).unwrap();
        idx.build(64);

        let results = idx.query(&[1.0, 0.0, 0.0], 1).unwrap();
        assert_eq!(results[0].0, id1);
    }

    #[test]
    fn query_before_build_errors() {
        let idx = VectorIndex::new(3);
        assert!(idx.query(&[1.0, 0.0, 0.0], 1).is_err());
    }

    #[test]
    fn copy_forward_keeps_only_listed_ids() {
        let mut src = VectorIndex::new(2);
        let keep_id = Uuid::new_v4();
        let drop_id = Uuid::new_v4();
        src.add(keep_id, vec![1.0, 0.0]).unwrap();
        src.add(drop_id, vec![0.0, 1.0]).unwrap();

        let mut dest = VectorIndex::new(2);
        let mut keep = std::collections::HashSet::new();
        keep.insert(keep_id);
        dest.copy_forward(&src, &keep);

        assert_eq!(dest.len(), 1);
    }

    #[test]
    fn write_temp_then_load_roundtrips() {
        let dir = tempfile::tempdir().unwrap();
        let vectors_path = dir.path().join("vdb_data");
        let map_path = dir.path().join("vdb_data.map");

        let mut idx = VectorIndex::new(2);
        let id = Uuid::new_v4();
        idx.add(id, vec![1.0, 0.0]).unwrap();
        idx.write_temp(&vectors_path, &map_path).unwrap();

        let loaded = VectorIndex::load(&vectors_path, &map_path, 2, 64).unwrap();
        assert_eq!(loaded.len(), 1);
        let results = loaded.query(&[1.0, 0.0], 1).unwrap();
        assert_eq!(results[0].0, id);
    }
}
