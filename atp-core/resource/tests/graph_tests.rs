//! 资源依赖图解析测试

mod common;

use atp_resource::{ResourceError, ResourceField, ResourceGraph};
use common::{as_ref, event_log, Instrument};

#[test]
fn test_open_order_respects_dependencies() {
    let log = event_log();
    let dut = Instrument::new("dut", &log).shared();
    let psu = Instrument::new("psu", &log).shared();
    let scope = Instrument::new("scope", &log).shared();

    // dut -> psu -> scope
    dut.link(ResourceField::new("power", Some(as_ref(&psu))));
    psu.link(ResourceField::new("monitor", Some(as_ref(&scope))));

    let graph = ResourceGraph::resolve(&[as_ref(&dut)]).unwrap();
    let order: Vec<String> = graph
        .open_order()
        .iter()
        .map(|r| r.name().to_string())
        .collect();

    assert_eq!(graph.len(), 3);
    assert_eq!(order, vec!["scope", "psu", "dut"]);
}

#[test]
fn test_open_order_is_deterministic_for_independent_roots() {
    let log = event_log();
    let a = Instrument::new("a", &log).shared();
    let b = Instrument::new("b", &log).shared();
    let c = Instrument::new("c", &log).shared();

    for _ in 0..5 {
        let graph = ResourceGraph::resolve(&[as_ref(&b), as_ref(&a), as_ref(&c)]).unwrap();
        let order: Vec<String> = graph
            .open_order()
            .iter()
            .map(|r| r.name().to_string())
            .collect();
        assert_eq!(order, vec!["b", "a", "c"]);
    }
}

#[test]
fn test_three_way_cycle_detected() {
    let log = event_log();
    let a = Instrument::new("a", &log).shared();
    let b = Instrument::new("b", &log).shared();
    let c = Instrument::new("c", &log).shared();

    a.link(ResourceField::new("next", Some(as_ref(&b))));
    b.link(ResourceField::new("next", Some(as_ref(&c))));
    c.link(ResourceField::new("next", Some(as_ref(&a))));

    match ResourceGraph::resolve(&[as_ref(&a)]) {
        Err(ResourceError::DependencyCycle { path }) => {
            assert_eq!(path, vec!["a", "b", "c", "a"]);
        }
        Err(other) => panic!("unexpected error: {}", other),
        Ok(_) => panic!("cycle not detected"),
    }
}

#[test]
fn test_missing_required_dependency() {
    let log = event_log();
    let dut = Instrument::new("dut", &log).shared();
    dut.link(ResourceField::new("power", None).required());

    let err = ResourceGraph::resolve(&[as_ref(&dut)]).err().unwrap();
    assert_eq!(
        err,
        ResourceError::MissingDependency {
            resource: "dut".to_string(),
            field: "power".to_string(),
        }
    );
    assert!(err.is_resolution_error());
}

#[test]
fn test_null_optional_field_is_not_a_dependency() {
    let log = event_log();
    let dut = Instrument::new("dut", &log).shared();
    dut.link(ResourceField::new("peer", None));

    let graph = ResourceGraph::resolve(&[as_ref(&dut)]).unwrap();
    assert_eq!(graph.len(), 1);
}

#[test]
fn test_ignored_self_reference_is_not_a_cycle() {
    let log = event_log();
    let dut = Instrument::new("dut", &log).shared();
    let helper = Instrument::new("helper", &log).shared();

    // dut -> helper -(ignore)-> dut
    dut.link(ResourceField::new("helper", Some(as_ref(&helper))));
    helper.link(ResourceField::new("owner", Some(as_ref(&dut))).ignored());

    let graph = ResourceGraph::resolve(&[as_ref(&dut)]).unwrap();
    assert_eq!(graph.len(), 2);
}

#[test]
fn test_parallel_edge_is_not_a_cycle() {
    let log = event_log();
    let a = Instrument::new("a", &log).shared();
    let b = Instrument::new("b", &log).shared();

    a.link(ResourceField::new("b", Some(as_ref(&b))).in_parallel());
    b.link(ResourceField::new("a", Some(as_ref(&a))));

    let graph = ResourceGraph::resolve(&[as_ref(&a)]).unwrap();
    let order: Vec<String> = graph
        .open_order()
        .iter()
        .map(|r| r.name().to_string())
        .collect();
    assert_eq!(order, vec!["a", "b"]);
}
