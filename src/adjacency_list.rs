use std::collections::{BTreeMap, BTreeSet};




/**
 * A minimal directed graph structure that stores only edges, each carrying a
 * label saying why the edge exists. Vertices are ordered, so that every
 * traversal is deterministic.
 */
#[derive(Clone, Debug)]
pub struct AdjacencyList<K, E = ()> {
    outgoing: BTreeMap<K, Vec<(K, E)>>,
    incoming: BTreeMap<K, Vec<(K, E)>>,
}




// ============================================================================
impl<K, E> AdjacencyList<K, E> where K: Ord + Clone, E: Clone {


    pub fn new() -> Self {
        Self::default()
    }


    /**
     * Return the number of edges in the graph.
     */
    pub fn edge_count(&self) -> usize {
        self.incoming.values().map(|edges| edges.len()).sum()
    }


    /**
     * Insert an edge from a -> b. Duplicate edges are allowed; each one
     * keeps its own label.
     */
    pub fn insert(&mut self, a: K, b: K, label: E) {
        self.outgoing.entry(a.clone()).or_default().push((b.clone(), label.clone()));
        self.incoming.entry(b).or_default().push((a, label));
    }


    /**
     * Return an iterator over the vertices with edges emanating from the given
     * vertex.
     */
    pub fn outgoing_edges(&self, a: &K) -> impl Iterator<Item = &K> {
        self.outgoing.get(a).into_iter().flat_map(|edges| edges.iter().map(|(k, _)| k))
    }


    /**
     * Return an iterator over the vertices with edges pointing to the given
     * vertex, together with the edge labels.
     */
    pub fn incoming_edges(&self, b: &K) -> impl Iterator<Item = (&K, &E)> {
        self.incoming.get(b).into_iter().flat_map(|edges| edges.iter().map(|(k, e)| (k, e)))
    }


    /**
     * Order the given vertices so that every edge points forward (Kahn's
     * algorithm). Among the vertices ready at any point, the smallest is
     * taken first, so the vertex order doubles as the tie-break priority.
     * Edges touching vertices outside the given set are ignored. On failure,
     * the vertices left on a cycle (or downstream of one) are returned.
     */
    pub fn topological_sort(&self, vertices: &[K]) -> Result<Vec<K>, Vec<K>> {
        let members: BTreeSet<&K> = vertices.iter().collect();
        let mut in_degree: BTreeMap<&K, usize> = vertices.iter().map(|v| (v, 0)).collect();

        for v in vertices {
            for w in self.outgoing_edges(v).filter(|w| members.contains(w)) {
                if let Some(n) = in_degree.get_mut(w) {
                    *n += 1;
                }
            }
        }
        let mut ready: BTreeSet<&K> = in_degree.iter().filter(|(_, n)| **n == 0).map(|(v, _)| *v).collect();
        let mut order = Vec::with_capacity(vertices.len());

        while let Some(v) = ready.iter().next().cloned() {
            ready.remove(v);
            order.push(v.clone());
            for w in self.outgoing_edges(v) {
                if let Some(n) = in_degree.get_mut(w) {
                    *n -= 1;
                    if *n == 0 {
                        ready.insert(w);
                    }
                }
            }
        }
        if order.len() == members.len() {
            Ok(order)
        } else {
            let placed: BTreeSet<&K> = order.iter().collect();
            Err(members.into_iter().filter(|v| !placed.contains(v)).cloned().collect())
        }
    }
}

impl<K, E> Default for AdjacencyList<K, E> {
    fn default() -> Self {
        Self {
            outgoing: BTreeMap::new(),
            incoming: BTreeMap::new(),
        }
    }
}
