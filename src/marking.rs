//! Marking of cells and multi-indices for refinement.
use crate::multiindex::MultiIndex;
use crate::multi_vector::{Component, MultiVector, ProjectionCache};
use crate::space::FunctionSpace;
use itertools::Itertools;
use log::{debug, info, warn};
use nalgebra::DVector;
use ordered_float::OrderedFloat;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Cells to refine, grouped by the component they belong to.
pub type CellMarkers = BTreeMap<MultiIndex, BTreeSet<usize>>;

/// How residual and projection indicators are combined for cell marking.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MarkingStrategy {
    /// Bulk marking of residual and projection indicators independently.
    Separate,
    /// Bulk marking of the sum of both indicators.
    Relative,
}

impl Default for MarkingStrategy {
    fn default() -> Self {
        Self::Separate
    }
}

/// Granularity of projection-driven refinement with [`MarkingStrategy::Separate`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProjectionMarking {
    /// Bulk marking of individual cells.
    Cell,
    /// Refine every cell of components with a dominant projection error.
    Mesh,
}

impl Default for ProjectionMarking {
    fn default() -> Self {
        Self::Cell
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MarkingParameters {
    /// Bulk fraction for cell marking.
    pub theta_eta: f64,
    /// Fraction of the largest projection error a new multi-index must reach.
    pub theta_zeta: f64,
    /// Candidates must reach the largest candidate estimate divided by `theta_delta`.
    pub theta_delta: f64,
    /// Indicators below this value are never marked.
    pub min_zeta: f64,
    /// Maximum relative growth of the active set per step.
    #[serde(rename = "max_Lambda_frac")]
    pub max_lambda_frac: f64,
    pub strategy: MarkingStrategy,
    pub projection_marking: ProjectionMarking,
}

impl Default for MarkingParameters {
    fn default() -> Self {
        Self {
            theta_eta: 0.4,
            theta_zeta: 0.1,
            theta_delta: 10.0,
            min_zeta: 1e-8,
            max_lambda_frac: 0.1,
            strategy: MarkingStrategy::default(),
            projection_marking: ProjectionMarking::default(),
        }
    }
}

/// Statistics of the projection and candidate estimates used for multi-index activation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProjectionZetaStats {
    /// Largest projection error $\delta_\mu$ among active indices.
    pub max_zeta: f64,
    /// Largest estimate among inactive candidates.
    pub max_inactive_zeta: f64,
    /// Estimates of the activated candidates, in activation order.
    pub inactive_zeta: Vec<f64>,
}

#[derive(Debug, Clone, Default)]
pub struct MarkingResult {
    pub residual_markers: CellMarkers,
    pub projection_markers: CellMarkers,
    pub new_multiindices: Vec<MultiIndex>,
    pub zeta_stats: ProjectionZetaStats,
    /// Every candidate considered, with its estimated contribution.
    pub all_candidates: BTreeMap<MultiIndex, f64>,
    /// Number of activated multi-indices that open a new stochastic dimension.
    pub new_dimensions: usize,
}

impl MarkingResult {
    pub fn num_residual_cells(&self) -> usize {
        self.residual_markers.values().map(BTreeSet::len).sum()
    }

    pub fn num_projection_cells(&self) -> usize {
        self.projection_markers.values().map(BTreeSet::len).sum()
    }

    /// Union of residual and projection markers.
    pub fn cell_markers(&self) -> CellMarkers {
        let mut markers = self.residual_markers.clone();
        for (mu, cells) in &self.projection_markers {
            markers.entry(mu.clone()).or_default().extend(cells);
        }
        markers
    }
}

/// Sort descending by value, breaking ties by key.
fn sorted_descending<K: Ord + Clone>(indicators: &[(K, f64)]) -> Vec<(K, f64)> {
    indicators
        .iter()
        .cloned()
        .sorted_by(|(k1, v1), (k2, v2)| {
            OrderedFloat(*v2)
                .cmp(&OrderedFloat(*v1))
                .then_with(|| k1.cmp(k2))
        })
        .collect()
}

/// Shortest prefix of `sorted` whose sum reaches `target`, or all of it.
fn bulk_prefix<K>(sorted: Vec<(K, f64)>, target: f64) -> Vec<K> {
    let mut sum = 0.0;
    let mut marked = Vec::new();
    for (key, value) in sorted {
        if sum >= target {
            break;
        }
        sum += value;
        marked.push(key);
    }
    marked
}

/// Dörfler (bulk) marking.
///
/// Returns the keys of the shortest prefix of the indicators sorted in descending order
/// whose sum is at least `theta` times the total sum. Ties are broken by key.
pub fn dorfler_marking<K: Ord + Clone>(indicators: &[(K, f64)], theta: f64) -> Vec<K> {
    let total: f64 = indicators.iter().map(|(_, v)| v).sum();
    if total <= 0.0 {
        return Vec::new();
    }
    bulk_prefix(sorted_descending(indicators), theta * total)
}

fn flatten(indicators: &BTreeMap<MultiIndex, DVector<f64>>) -> Vec<((MultiIndex, usize), f64)> {
    indicators
        .iter()
        .flat_map(|(mu, values)| {
            values
                .iter()
                .enumerate()
                .map(move |(cell, &v)| ((mu.clone(), cell), v))
        })
        .collect()
}

fn group(marked: Vec<(MultiIndex, usize)>) -> CellMarkers {
    let mut markers = CellMarkers::new();
    for (mu, cell) in marked {
        markers.entry(mu).or_default().insert(cell);
    }
    markers
}

/// Bulk marking over squared indicators, skipping cells whose indicator is below `min_zeta`.
fn mark_cells(indicators: Vec<((MultiIndex, usize), f64)>, theta: f64, min_zeta: f64) -> CellMarkers {
    let total: f64 = indicators.iter().map(|(_, v)| v).sum();
    if total <= 0.0 {
        return CellMarkers::new();
    }
    let eligible = indicators
        .into_iter()
        .filter(|(_, v)| v.sqrt() >= min_zeta)
        .collect_vec();
    group(bulk_prefix(sorted_descending(&eligible), theta * total))
}

/// Select cells and new multi-indices for refinement.
///
/// `residual_indicators` and `projection_indicators` hold squared indicators per cell,
/// `mi_error` the estimated contributions of inactive candidate multi-indices and `max_order`
/// the number of stochastic dimensions currently in use.
///
/// A candidate is activated if its estimate is at least `theta_zeta` times the largest
/// projection error, at least `min_zeta` and at least the largest candidate estimate divided
/// by `theta_delta`. At most `ceil(max_Lambda_frac * |Λ|)` candidates are activated, largest
/// estimates first, so `max_Lambda_frac = 0` disables activation.
pub fn mark(
    residual_indicators: &BTreeMap<MultiIndex, DVector<f64>>,
    projection_indicators: &BTreeMap<MultiIndex, DVector<f64>>,
    mi_error: &BTreeMap<MultiIndex, f64>,
    max_order: usize,
    params: &MarkingParameters,
) -> MarkingResult {
    let mut result = MarkingResult::default();

    match params.strategy {
        MarkingStrategy::Separate => {
            result.residual_markers = mark_cells(flatten(residual_indicators), params.theta_eta, params.min_zeta);
            result.projection_markers = match params.projection_marking {
                ProjectionMarking::Cell => {
                    mark_cells(flatten(projection_indicators), params.theta_eta, params.min_zeta)
                }
                ProjectionMarking::Mesh => mark_meshes(projection_indicators, params),
            };
        }
        MarkingStrategy::Relative => {
            let combined: BTreeMap<MultiIndex, DVector<f64>> = residual_indicators
                .iter()
                .map(|(mu, res)| {
                    let total = match projection_indicators.get(mu) {
                        Some(proj) => res + proj,
                        None => res.clone(),
                    };
                    (mu.clone(), total)
                })
                .collect();
            result.residual_markers = mark_cells(flatten(&combined), params.theta_eta, params.min_zeta);
        }
    }

    let max_zeta = projection_indicators
        .values()
        .map(|ind| OrderedFloat(ind.sum().sqrt()))
        .max()
        .map_or(0.0, |v| v.0);
    let max_inactive_zeta = mi_error
        .values()
        .map(|&v| OrderedFloat(v))
        .max()
        .map_or(0.0, |v| v.0);

    let threshold = (params.theta_zeta * max_zeta)
        .max(params.min_zeta)
        .max(max_inactive_zeta / params.theta_delta);
    let max_new = (params.max_lambda_frac * residual_indicators.len() as f64).ceil() as usize;

    let candidates = mi_error.iter().map(|(mu, &v)| (mu.clone(), v)).collect_vec();
    for (mu, value) in sorted_descending(&candidates) {
        if result.new_multiindices.len() >= max_new || value < threshold {
            break;
        }
        if mu.len() > max_order {
            result.new_dimensions += 1;
        }
        result.zeta_stats.inactive_zeta.push(value);
        result.new_multiindices.push(mu);
    }

    result.zeta_stats.max_zeta = max_zeta;
    result.zeta_stats.max_inactive_zeta = max_inactive_zeta;
    result.all_candidates = mi_error.clone();

    info!(
        "marked {} residual cells, {} projection cells and {} new multi-indices (threshold {:.3e})",
        result.num_residual_cells(),
        result.num_projection_cells(),
        result.new_multiindices.len(),
        threshold
    );
    result
}

/// Mark all cells of components whose projection error reaches `theta_zeta` times the maximum.
fn mark_meshes(projection_indicators: &BTreeMap<MultiIndex, DVector<f64>>, params: &MarkingParameters) -> CellMarkers {
    let errors = projection_indicators
        .iter()
        .map(|(mu, ind)| (mu, ind.sum().sqrt()))
        .collect_vec();
    let max_zeta = errors.iter().map(|(_, e)| OrderedFloat(*e)).max().map_or(0.0, |v| v.0);
    if max_zeta <= 0.0 {
        return CellMarkers::new();
    }

    let mut markers = CellMarkers::new();
    for (mu, error) in errors {
        if error >= params.theta_zeta * max_zeta && error >= params.min_zeta {
            markers.insert(mu.clone(), (0..projection_indicators[mu].len()).collect());
        }
    }
    markers
}

/// What [`refine`] changed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RefinementSummary {
    pub refined_components: usize,
    pub marked_cells: usize,
    pub new_components: usize,
}

/// Refine marked component meshes and activate new multi-indices.
///
/// Components of new multi-indices are created by `vector_factory`. Projections of refined
/// components are dropped from `cache`.
pub fn refine<S, F>(
    w: &mut MultiVector<S>,
    markers: &CellMarkers,
    new_multiindices: &[MultiIndex],
    mut cache: Option<&mut ProjectionCache>,
    mut vector_factory: F,
) -> eyre::Result<RefinementSummary>
where
    S: FunctionSpace,
    F: FnMut(&MultiIndex) -> eyre::Result<Component<S>>,
{
    let mut summary = RefinementSummary::default();

    for (mu, cells) in markers {
        if cells.is_empty() {
            continue;
        }
        if !w.contains(mu) {
            warn!("ignoring cell markers for inactive multi-index {}", mu);
            continue;
        }
        let old_mesh = w.refine_component(mu, cells)?;
        if let Some(cache) = cache.as_deref_mut() {
            cache.invalidate(mu);
            cache.invalidate_mesh(old_mesh);
        }
        summary.refined_components += 1;
        summary.marked_cells += cells.len();
        debug!("refined {} cells of {}", cells.len(), mu);
    }

    for mu in new_multiindices {
        if w.contains(mu) {
            continue;
        }
        let component = vector_factory(mu)?;
        w.insert(mu.clone(), component);
        summary.new_components += 1;
        debug!("activated multi-index {}", mu);
    }

    Ok(summary)
}

/// Refine every cell of every active component.
pub fn refine_uniformly<S: FunctionSpace>(
    w: &mut MultiVector<S>,
    mut cache: Option<&mut ProjectionCache>,
) -> eyre::Result<RefinementSummary> {
    let mut summary = RefinementSummary::default();
    for mu in w.active_indices() {
        let cells = w[&mu].space.num_cells();
        let old_mesh = w.refine_component_uniformly(&mu)?;
        if let Some(cache) = cache.as_deref_mut() {
            cache.invalidate(&mu);
            cache.invalidate_mesh(old_mesh);
        }
        summary.refined_components += 1;
        summary.marked_cells += cells;
    }
    Ok(summary)
}
