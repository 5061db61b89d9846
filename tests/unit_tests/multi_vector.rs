use crate::{mi, multi_mesh_vector, nodal_component, unit_interval_mesh};
use sgfem::fem1d::P1Space;
use sgfem::multi_vector::{get_projection, Component, MultiVector, ProjectionCache};
use sgfem::nalgebra::DVector;
use sgfem::space::FunctionSpace;
use std::collections::BTreeSet;
use util::{assert_approx_matrix_eq, assert_panics};

#[test]
fn axpy_extends_with_missing_components() {
    let mesh = unit_interval_mesh(4);
    let mut x: MultiVector<P1Space> = vec![(mi(&[]), nodal_component(mesh.clone(), |t| t))]
        .into_iter()
        .collect();
    let y: MultiVector<P1Space> = vec![
        (mi(&[]), nodal_component(mesh.clone(), |_| 1.0)),
        (mi(&[1]), nodal_component(mesh.clone(), |t| t * t)),
    ]
    .into_iter()
    .collect();

    x.axpy(2.0, &y);
    assert_eq!(x.active_indices(), vec![mi(&[]), mi(&[1])]);
    let expected_zero = DVector::from_fn(5, |i, _| 0.25 * i as f64 + 2.0);
    assert_approx_matrix_eq!(&x[&mi(&[])].coeffs, &expected_zero, abstol = 1e-15);
    assert_approx_matrix_eq!(&x[&mi(&[1])].coeffs, &(&y[&mi(&[1])].coeffs * 2.0), abstol = 1e-15);
}

#[test]
fn axpy_requires_matching_spaces() {
    let x: MultiVector<P1Space> = vec![(mi(&[]), nodal_component(unit_interval_mesh(4), |t| t))]
        .into_iter()
        .collect();
    let y: MultiVector<P1Space> = vec![(mi(&[]), nodal_component(unit_interval_mesh(4), |t| t))]
        .into_iter()
        .collect();
    // Equal vertices, but independently created meshes
    assert_panics!({
        let mut x = x.clone();
        x.axpy(1.0, &y)
    });
}

#[test]
fn inner_product_ignores_unshared_components() {
    let mesh = unit_interval_mesh(2);
    let x: MultiVector<P1Space> = vec![
        (mi(&[]), nodal_component(mesh.clone(), |_| 1.0)),
        (mi(&[1]), nodal_component(mesh.clone(), |_| 5.0)),
    ]
    .into_iter()
    .collect();
    let y: MultiVector<P1Space> = vec![
        (mi(&[]), nodal_component(mesh.clone(), |_| 2.0)),
        (mi(&[0, 1]), nodal_component(mesh.clone(), |_| 7.0)),
    ]
    .into_iter()
    .collect();
    assert_eq!(x.inner(&y), 6.0);
    assert_eq!(x.norm(), 78.0f64.sqrt());
}

#[test]
fn counts_and_shared_mesh() {
    let w = multi_mesh_vector();
    assert_eq!(w.len(), 4);
    assert_eq!(w.max_order(), 2);
    assert_eq!(w.dim(), 9 + 5 + 17 + 3);
    assert_eq!(w.num_cells(), 8 + 4 + 16 + 2);
    assert!(!w.has_shared_mesh());

    let mesh = unit_interval_mesh(3);
    let shared: MultiVector<P1Space> = vec![
        (mi(&[]), Component::zeros(P1Space::new(mesh.clone()))),
        (mi(&[1]), Component::zeros(P1Space::new(mesh.clone()))),
    ]
    .into_iter()
    .collect();
    assert!(shared.has_shared_mesh());

    let zeros = w.zeros_like();
    assert_eq!(zeros.active_indices(), w.active_indices());
    assert_eq!(zeros.norm(), 0.0);
}

#[test]
fn refining_a_component_interpolates_its_coefficients() {
    let mut w = multi_mesh_vector();
    let mu = mi(&[2]);
    let before = w[&mu].clone();
    let old_id = w.refine_component(&mu, &BTreeSet::from([1])).unwrap();
    assert_eq!(old_id, before.space.mesh_id());
    assert_ne!(w[&mu].space.mesh_id(), old_id);
    assert_eq!(w[&mu].space.dim(), 4);

    // Interpolating back recovers the original coefficients
    let back = before.space.interpolate(&w[&mu].space, &w[&mu].coeffs);
    assert_approx_matrix_eq!(&back, &before.coeffs, abstol = 1e-14);

    assert!(w.refine_component(&mi(&[5]), &BTreeSet::from([0])).is_err());
}

#[test]
fn projection_cache_detects_refined_sources() {
    let mut w = multi_mesh_vector();
    let source = mi(&[0, 1]);
    let target = w[&mi(&[])].space.clone();
    let mut cache = ProjectionCache::new();

    let first = get_projection(&w, &source, &target, &mut cache);
    let second = get_projection(&w, &source, &target, &mut cache);
    assert_eq!(first, second);
    assert_eq!(cache.statistics(), (1, 1));
    assert_eq!(cache.len(), 1);

    // Projecting onto the own mesh bypasses the cache
    let own = w[&source].space.clone();
    assert_eq!(get_projection(&w, &source, &own, &mut cache), w[&source].coeffs);
    assert_eq!(cache.statistics(), (1, 1));

    w.refine_component_uniformly(&source).unwrap();
    let refreshed = get_projection(&w, &source, &target, &mut cache);
    assert_eq!(cache.statistics(), (1, 2));
    assert_eq!(refreshed, w[&source].project_onto(&target));

    cache.invalidate(&source);
    assert!(cache.is_empty());
}

#[test]
fn projection_cache_invalidation_by_mesh() {
    let w = multi_mesh_vector();
    let target = w[&mi(&[])].space.clone();
    let mut cache = ProjectionCache::new();
    get_projection(&w, &mi(&[1]), &target, &mut cache);
    get_projection(&w, &mi(&[2]), &target, &mut cache);
    get_projection(&w, &mi(&[]), &w[&mi(&[2])].space, &mut cache);
    assert_eq!(cache.len(), 3);

    cache.invalidate_mesh(w[&mi(&[2])].space.mesh_id());
    assert_eq!(cache.len(), 1);
    cache.clear();
    assert!(cache.is_empty());
}

#[test]
fn serde_round_trip() {
    let mesh = unit_interval_mesh(4);
    let w: MultiVector<P1Space> = vec![
        (mi(&[]), nodal_component(mesh.clone(), |t| 4.0 * t)),
        (mi(&[0, 2]), nodal_component(mesh.clone(), |t| 1.0 - 2.0 * t)),
    ]
    .into_iter()
    .collect();
    let json = serde_json::to_string(&w).unwrap();
    let parsed: MultiVector<P1Space> = serde_json::from_str(&json).unwrap();
    assert_eq!(parsed, w);
}

#[test]
fn serde_round_trip_preserves_shared_meshes() {
    let shared = unit_interval_mesh(4);
    let w: MultiVector<P1Space> = vec![
        (mi(&[]), nodal_component(shared.clone(), |t| t)),
        (mi(&[1]), nodal_component(unit_interval_mesh(4), |t| t * t)),
        (mi(&[2]), nodal_component(shared.clone(), |t| 1.0 - t)),
    ]
    .into_iter()
    .collect();
    assert!(!w.has_shared_mesh());

    let json = serde_json::to_string(&w).unwrap();
    let parsed: MultiVector<P1Space> = serde_json::from_str(&json).unwrap();
    assert_eq!(parsed, w);
    let id = |mu: &[u32]| parsed[&mi(mu)].space.mesh_id();
    assert_eq!(id(&[]), id(&[2]));
    assert_ne!(id(&[]), id(&[1]));
    assert_ne!(id(&[]), w[&mi(&[])].space.mesh_id());

    let single: MultiVector<P1Space> = vec![
        (mi(&[]), Component::zeros(P1Space::new(shared.clone()))),
        (mi(&[0, 1]), Component::zeros(P1Space::new(shared))),
    ]
    .into_iter()
    .collect();
    let parsed: MultiVector<P1Space> = serde_json::from_str(&serde_json::to_string(&single).unwrap()).unwrap();
    assert!(parsed.has_shared_mesh());
}

#[test]
fn sharing_a_different_mesh_is_rejected() {
    let w: MultiVector<P1Space> = vec![
        (mi(&[]), Component::zeros(P1Space::new(unit_interval_mesh(2)))),
        (mi(&[1]), Component::zeros(P1Space::new(unit_interval_mesh(3)))),
    ]
    .into_iter()
    .collect();
    let mut value = serde_json::to_value(&w).unwrap();
    value["components"][1][2] = serde_json::json!(0);
    assert!(serde_json::from_value::<MultiVector<P1Space>>(value).is_err());

    let mut space = P1Space::new(unit_interval_mesh(2));
    let other = P1Space::new(unit_interval_mesh(2));
    space.share_mesh(&other).unwrap();
    assert_eq!(space.mesh_id(), other.mesh_id());
    assert!(space.share_mesh(&P1Space::new(unit_interval_mesh(3))).is_err());
}
