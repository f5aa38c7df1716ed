//! In-memory link graph store
//!
//! Keeps links and edges in maps guarded by a single read/write lock. Range
//! scans snapshot their results under the read lock, so iterators observe a
//! consistent view and never block later writers.

use std::collections::HashMap;
use std::sync::RwLock;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::{Edge, EdgeIterator, GraphError, GraphResult, Link, LinkGraph, LinkIterator};

#[derive(Default)]
struct GraphData {
    links: HashMap<Uuid, Link>,
    link_url_index: HashMap<String, Uuid>,
    edges: HashMap<Uuid, Edge>,
    link_edge_map: HashMap<Uuid, Vec<Uuid>>,
}

/// An in-memory [`LinkGraph`] implementation.
#[derive(Default)]
pub struct InMemoryGraph {
    data: RwLock<GraphData>,
}

impl InMemoryGraph {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> GraphResult<std::sync::RwLockReadGuard<'_, GraphData>> {
        self.data
            .read()
            .map_err(|e| GraphError::Store(format!("failed to lock graph: {e}")))
    }

    fn write(&self) -> GraphResult<std::sync::RwLockWriteGuard<'_, GraphData>> {
        self.data
            .write()
            .map_err(|e| GraphError::Store(format!("failed to lock graph: {e}")))
    }
}

/// Range check over the UUID key space. The upper bound is exclusive except
/// when it is the maximum UUID, which closes the last partition.
fn in_range(id: Uuid, from: Uuid, to: Uuid) -> bool {
    let id = id.as_u128();
    id >= from.as_u128() && (id < to.as_u128() || to == Uuid::max())
}

impl LinkGraph for InMemoryGraph {
    fn upsert_link(&self, link: &mut Link) -> GraphResult<()> {
        let mut data = self.write()?;

        // A link with the same URL turns this into an update: the caller's
        // link adopts the stored ID and the freshest retrieval time.
        if let Some(&existing_id) = data.link_url_index.get(&link.url) {
            link.id = existing_id;
            if let Some(existing) = data.links.get_mut(&existing_id) {
                if existing.retrieved_at > link.retrieved_at {
                    link.retrieved_at = existing.retrieved_at;
                }
                *existing = link.clone();
            }
            return Ok(());
        }

        // Assign an ID that is not currently in use and insert.
        let mut id = Uuid::new_v4();
        while data.links.contains_key(&id) {
            id = Uuid::new_v4();
        }
        link.id = id;
        data.link_url_index.insert(link.url.clone(), id);
        data.links.insert(id, link.clone());
        Ok(())
    }

    fn find_link(&self, id: Uuid) -> GraphResult<Link> {
        let data = self.read()?;
        data.links.get(&id).cloned().ok_or(GraphError::NotFound)
    }

    fn upsert_edge(&self, edge: &mut Edge) -> GraphResult<()> {
        let mut data = self.write()?;

        if !data.links.contains_key(&edge.src) || !data.links.contains_key(&edge.dst) {
            return Err(GraphError::UnknownEdgeLinks);
        }

        // An existing (src, dst) edge only gets its update time refreshed.
        let existing = data
            .link_edge_map
            .get(&edge.src)
            .into_iter()
            .flatten()
            .copied()
            .find(|edge_id| {
                data.edges
                    .get(edge_id)
                    .is_some_and(|e| e.src == edge.src && e.dst == edge.dst)
            });
        if let Some(edge_id) = existing {
            if let Some(stored) = data.edges.get_mut(&edge_id) {
                stored.updated_at = Utc::now();
                *edge = stored.clone();
            }
            return Ok(());
        }

        let mut id = Uuid::new_v4();
        while data.edges.contains_key(&id) {
            id = Uuid::new_v4();
        }
        edge.id = id;
        edge.updated_at = Utc::now();
        data.edges.insert(id, edge.clone());
        data.link_edge_map.entry(edge.src).or_default().push(id);
        Ok(())
    }

    fn remove_stale_edges(&self, src: Uuid, updated_before: DateTime<Utc>) -> GraphResult<()> {
        let mut data = self.write()?;

        let Some(edge_ids) = data.link_edge_map.remove(&src) else {
            return Ok(());
        };
        let mut retained = Vec::with_capacity(edge_ids.len());
        for edge_id in edge_ids {
            let stale = data
                .edges
                .get(&edge_id)
                .is_some_and(|e| e.updated_at < updated_before);
            if stale {
                data.edges.remove(&edge_id);
            } else {
                retained.push(edge_id);
            }
        }
        data.link_edge_map.insert(src, retained);
        Ok(())
    }

    fn links(
        &self,
        from: Uuid,
        to: Uuid,
        retrieved_before: DateTime<Utc>,
    ) -> GraphResult<LinkIterator> {
        let data = self.read()?;
        let snapshot: Vec<Link> = data
            .links
            .values()
            .filter(|link| in_range(link.id, from, to) && link.retrieved_at < retrieved_before)
            .cloned()
            .collect();
        Ok(Box::new(snapshot.into_iter().map(Ok)))
    }

    fn edges(
        &self,
        from: Uuid,
        to: Uuid,
        updated_before: DateTime<Utc>,
    ) -> GraphResult<EdgeIterator> {
        let data = self.read()?;
        let snapshot: Vec<Edge> = data
            .edges
            .values()
            .filter(|edge| in_range(edge.src, from, to) && edge.updated_at < updated_before)
            .cloned()
            .collect();
        Ok(Box::new(snapshot.into_iter().map(Ok)))
    }
}
