//! Sparse collections of finite element functions indexed by multi-indices.
use crate::multiindex::MultiIndex;
use crate::space::{FunctionSpace, MeshId};
use nalgebra::DVector;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use std::collections::btree_map::Entry;
use std::collections::{BTreeMap, BTreeSet};
use std::ops::Index;

/// A discrete function: a space together with a coefficient vector in that space.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Component<S> {
    pub space: S,
    pub coeffs: DVector<f64>,
}

impl<S: FunctionSpace> Component<S> {
    /// Construct a new component.
    ///
    /// # Panics
    ///
    /// Panics if the length of `coeffs` differs from the dimension of `space`.
    pub fn new(space: S, coeffs: DVector<f64>) -> Self {
        assert_eq!(
            space.dim(),
            coeffs.len(),
            "coefficient vector length must match the dimension of the space"
        );
        Self { space, coeffs }
    }

    pub fn zeros(space: S) -> Self {
        let coeffs = DVector::zeros(space.dim());
        Self { space, coeffs }
    }

    /// The coefficients of this function interpolated into `target`.
    pub fn project_onto(&self, target: &S) -> DVector<f64> {
        if self.space.mesh_id() == target.mesh_id() {
            self.coeffs.clone()
        } else {
            target.interpolate(&self.space, &self.coeffs)
        }
    }
}

/// Maps each active multi-index to its own finite element function.
///
/// Every component lives on its own mesh. Arithmetic between two multi-vectors is
/// defined component-wise and requires matching spaces on shared keys.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(bound(
    serialize = "S: Serialize + FunctionSpace",
    deserialize = "S: Deserialize<'de> + FunctionSpace"
))]
pub struct MultiVector<S> {
    #[serde(with = "components_with_shared_meshes")]
    components: BTreeMap<MultiIndex, Component<S>>,
}

// Multi-indices are not strings, so components are stored as a sequence of entries. Each entry
// names the first earlier entry on the same mesh, so that shared meshes survive a round trip.
mod components_with_shared_meshes {
    use super::Component;
    use crate::multiindex::MultiIndex;
    use crate::space::FunctionSpace;
    use serde::de::Error;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::collections::BTreeMap;

    pub fn serialize<Ser, S>(map: &BTreeMap<MultiIndex, Component<S>>, serializer: Ser) -> Result<Ser::Ok, Ser::Error>
    where
        Ser: Serializer,
        S: Serialize + FunctionSpace,
    {
        let components: Vec<_> = map.values().collect();
        serializer.collect_seq(map.iter().enumerate().map(|(i, (mu, component))| {
            let mesh_id = component.space.mesh_id();
            let shared_with = components[..i]
                .iter()
                .position(|other| other.space.mesh_id() == mesh_id);
            (mu, component, shared_with)
        }))
    }

    pub fn deserialize<'de, De, S>(deserializer: De) -> Result<BTreeMap<MultiIndex, Component<S>>, De::Error>
    where
        De: Deserializer<'de>,
        S: Deserialize<'de> + FunctionSpace,
    {
        let mut entries = Vec::<(MultiIndex, Component<S>, Option<usize>)>::deserialize(deserializer)?;
        for i in 0..entries.len() {
            if let Some(j) = entries[i].2 {
                if j >= i {
                    return Err(De::Error::custom(format!(
                        "component {} refers to the mesh of later component {}",
                        i, j
                    )));
                }
                let (earlier, rest) = entries.split_at_mut(i);
                rest[0]
                    .1
                    .space
                    .share_mesh(&earlier[j].1.space)
                    .map_err(De::Error::custom)?;
            }
        }
        Ok(entries
            .into_iter()
            .map(|(mu, component, _)| (mu, component))
            .collect())
    }
}

impl<S> Default for MultiVector<S> {
    fn default() -> Self {
        Self {
            components: BTreeMap::new(),
        }
    }
}

impl<S: FunctionSpace> MultiVector<S> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, mu: &MultiIndex) -> Option<&Component<S>> {
        self.components.get(mu)
    }

    pub fn get_mut(&mut self, mu: &MultiIndex) -> Option<&mut Component<S>> {
        self.components.get_mut(mu)
    }

    pub fn contains(&self, mu: &MultiIndex) -> bool {
        self.components.contains_key(mu)
    }

    /// The active set $\Lambda$, in ascending order.
    pub fn active_indices(&self) -> Vec<MultiIndex> {
        self.components.keys().cloned().collect()
    }

    pub fn iter(&self) -> impl '_ + Iterator<Item = (&MultiIndex, &Component<S>)> {
        self.components.iter()
    }

    pub fn len(&self) -> usize {
        self.components.len()
    }

    pub fn is_empty(&self) -> bool {
        self.components.is_empty()
    }

    /// One past the largest stochastic dimension with non-zero degree in any active index.
    pub fn max_order(&self) -> usize {
        self.components.keys().map(MultiIndex::len).max().unwrap_or(0)
    }

    /// Total number of degrees of freedom.
    pub fn dim(&self) -> usize {
        self.components.values().map(|c| c.space.dim()).sum()
    }

    pub fn num_cells(&self) -> usize {
        self.components.values().map(|c| c.space.num_cells()).sum()
    }

    /// Insert a component, replacing any existing component for `mu`.
    ///
    /// # Panics
    ///
    /// Panics if the coefficient vector does not match the dimension of its space.
    pub fn insert(&mut self, mu: MultiIndex, component: Component<S>) -> Option<Component<S>> {
        assert_eq!(
            component.space.dim(),
            component.coeffs.len(),
            "coefficient vector length must match the dimension of the space"
        );
        self.components.insert(mu, component)
    }

    pub fn remove(&mut self, mu: &MultiIndex) -> Option<Component<S>> {
        self.components.remove(mu)
    }

    /// A multi-vector with the same active set and spaces, but zero coefficients.
    pub fn zeros_like(&self) -> Self {
        let components = self
            .components
            .iter()
            .map(|(mu, c)| (mu.clone(), Component::zeros(c.space.clone())))
            .collect();
        Self { components }
    }

    pub fn scale(&mut self, alpha: f64) {
        for c in self.components.values_mut() {
            c.coeffs *= alpha;
        }
    }

    /// `self <- self + alpha * other`.
    ///
    /// Components present only in `other` are added to `self` (zero-extension).
    ///
    /// # Panics
    ///
    /// Panics if a shared component lives in a different space.
    pub fn axpy(&mut self, alpha: f64, other: &Self) {
        for (mu, c) in &other.components {
            match self.components.entry(mu.clone()) {
                Entry::Occupied(mut entry) => {
                    let own = entry.get_mut();
                    assert_eq!(
                        own.space.mesh_id(),
                        c.space.mesh_id(),
                        "component {} lives in different spaces",
                        mu
                    );
                    own.coeffs.axpy(alpha, &c.coeffs, 1.0);
                }
                Entry::Vacant(entry) => {
                    entry.insert(Component {
                        space: c.space.clone(),
                        coeffs: &c.coeffs * alpha,
                    });
                }
            }
        }
    }

    /// Euclidean inner product of the coefficients over shared components.
    pub fn inner(&self, other: &Self) -> f64 {
        self.components
            .iter()
            .filter_map(|(mu, c)| other.components.get(mu).map(|d| c.coeffs.dot(&d.coeffs)))
            .sum()
    }

    pub fn norm(&self) -> f64 {
        self.inner(self).sqrt()
    }

    /// Project component `source` onto the space of component `target`.
    ///
    /// # Panics
    ///
    /// Panics if either multi-index is not active.
    pub fn project_onto(&self, source: &MultiIndex, target: &MultiIndex) -> DVector<f64> {
        self[source].project_onto(&self[target].space)
    }

    /// Replace the space of `mu` by a refinement and interpolate its coefficients.
    ///
    /// Returns the id of the replaced mesh, which callers can use to invalidate caches.
    pub fn refine_component(&mut self, mu: &MultiIndex, marked_cells: &BTreeSet<usize>) -> eyre::Result<MeshId> {
        let component = self
            .components
            .get_mut(mu)
            .ok_or_else(|| eyre::eyre!("cannot refine inactive multi-index {}", mu))?;
        let old_id = component.space.mesh_id();
        let refined = component.space.refine(marked_cells)?;
        component.coeffs = refined.interpolate(&component.space, &component.coeffs);
        component.space = refined;
        Ok(old_id)
    }

    pub fn refine_component_uniformly(&mut self, mu: &MultiIndex) -> eyre::Result<MeshId> {
        let component = self
            .components
            .get_mut(mu)
            .ok_or_else(|| eyre::eyre!("cannot refine inactive multi-index {}", mu))?;
        let old_id = component.space.mesh_id();
        let refined = component.space.refine_uniformly()?;
        component.coeffs = refined.interpolate(&component.space, &component.coeffs);
        component.space = refined;
        Ok(old_id)
    }

    /// Whether all components share a single mesh.
    pub fn has_shared_mesh(&self) -> bool {
        let mut ids = self.components.values().map(|c| c.space.mesh_id());
        match ids.next() {
            Some(first) => ids.all(|id| id == first),
            None => true,
        }
    }
}

impl<S> Index<&MultiIndex> for MultiVector<S> {
    type Output = Component<S>;

    fn index(&self, mu: &MultiIndex) -> &Self::Output {
        match self.components.get(mu) {
            Some(c) => c,
            None => panic!("multi-index {} is not active", mu),
        }
    }
}

impl<S: FunctionSpace> FromIterator<(MultiIndex, Component<S>)> for MultiVector<S> {
    fn from_iter<I: IntoIterator<Item = (MultiIndex, Component<S>)>>(iter: I) -> Self {
        let mut w = Self::new();
        for (mu, c) in iter {
            w.insert(mu, c);
        }
        w
    }
}

#[derive(Debug, Clone)]
struct CachedProjection {
    source_mesh: MeshId,
    coeffs: DVector<f64>,
}

/// Cache of components projected onto other spaces.
///
/// A cache belongs to a single operator application or estimator evaluation, during which
/// coefficients do not change. Entries are keyed by the source multi-index and the target
/// mesh, and remember the mesh of the source they were computed from: after the source is
/// refined the entry is stale and is recomputed on the next lookup.
#[derive(Debug, Default)]
pub struct ProjectionCache {
    entries: FxHashMap<(MultiIndex, MeshId), CachedProjection>,
    hits: usize,
    misses: usize,
}

impl ProjectionCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop all projections of the component `mu`.
    pub fn invalidate(&mut self, mu: &MultiIndex) {
        self.entries.retain(|(source, _), _| source != mu);
    }

    /// Drop all projections from or onto the given mesh.
    pub fn invalidate_mesh(&mut self, mesh: MeshId) {
        self.entries
            .retain(|(_, target), cached| *target != mesh && cached.source_mesh != mesh);
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of (hits, misses) since construction.
    pub fn statistics(&self) -> (usize, usize) {
        (self.hits, self.misses)
    }
}

/// The component `source` of `w` projected onto `target`, using and filling `cache`.
///
/// # Panics
///
/// Panics if `source` is not active in `w`.
pub fn get_projection<S: FunctionSpace>(
    w: &MultiVector<S>,
    source: &MultiIndex,
    target: &S,
    cache: &mut ProjectionCache,
) -> DVector<f64> {
    let component = &w[source];
    let source_mesh = component.space.mesh_id();
    if source_mesh == target.mesh_id() {
        return component.coeffs.clone();
    }

    let key = (source.clone(), target.mesh_id());
    if let Some(cached) = cache.entries.get(&key) {
        if cached.source_mesh == source_mesh {
            cache.hits += 1;
            return cached.coeffs.clone();
        }
    }

    cache.misses += 1;
    let coeffs = component.project_onto(target);
    cache.entries.insert(
        key,
        CachedProjection {
            source_mesh,
            coeffs: coeffs.clone(),
        },
    );
    coeffs
}
