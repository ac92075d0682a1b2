//! Range vertices: fan-in brokering, chaining, and collection.

use recalc_common::{CellRef, CellValue, Coord, RangeRef};

use super::common::{build, num};
use crate::engine::VertexKind;

#[test]
fn range_fanin_recomputes_on_member_change() {
    let mut engine = build(&[&["1"], &["2"], &["3"], &["=SUM(A1:A3)"]]);
    assert_eq!(num(&mut engine, (3, 0)), 6.0);
    engine.set_cell_contents("Sheet1", 1, 0, "10").unwrap();
    assert_eq!(num(&mut engine, (3, 0)), 14.0);
}

#[test]
fn range_vertex_exists_once_per_rectangle() {
    let mut engine = build(&[&["1"], &["2"], &["=SUM(A1:A2)"], &["=MAX(A1:A2)"]]);
    assert_eq!(num(&mut engine, (2, 0)), 3.0);
    assert_eq!(num(&mut engine, (3, 0)), 2.0);
    assert_eq!(engine.graph.ranges.len(), 1);
}

#[test]
fn larger_range_chains_onto_its_prefix() {
    let rows: Vec<Vec<String>> = (0..10)
        .map(|i| vec![(i + 1).to_string()])
        .collect();
    let mut content = rows;
    content.push(vec!["=SUM(A1:A5)".to_string()]);
    content.push(vec!["=SUM(A1:A10)".to_string()]);
    let mut engine = crate::engine::Engine::build_from_sheets(
        vec![("Sheet1".to_string(), content)],
        crate::config::Config::default(),
    )
    .unwrap();
    assert_eq!(num(&mut engine, (10, 0)), 15.0);
    assert_eq!(num(&mut engine, (11, 0)), 55.0);

    let small = RangeRef::new(0, Coord::relative(0, 0), Coord::relative(4, 0));
    let big = RangeRef::new(0, Coord::relative(0, 0), Coord::relative(9, 0));
    let small_id = engine.graph.ranges.get(&small).unwrap();
    let big_id = engine.graph.ranges.get(&big).unwrap();
    match &engine.graph.vertex(big_id).unwrap().kind {
        VertexKind::Range { chained, .. } => assert_eq!(*chained, Some(small_id)),
        other => panic!("not a range vertex: {other:?}"),
    }
    // the chained prefix carries the shared cells; only the delta links
    // directly
    assert!(engine.graph.dependencies_of(big_id).contains(&small_id));
    assert_eq!(engine.graph.dependencies_of(big_id).len(), 1 + 5);

    // a change inside the prefix still reaches the big consumer
    engine.set_cell_contents("Sheet1", 0, 0, "100").unwrap();
    assert_eq!(num(&mut engine, (11, 0)), 154.0);
}

#[test]
fn range_vertex_collects_with_its_last_consumer() {
    let mut engine = build(&[&["1"], &["2"], &["=SUM(A1:A2)"]]);
    assert_eq!(num(&mut engine, (2, 0)), 3.0);
    assert_eq!(engine.graph.ranges.len(), 1);

    engine.set_cell_contents("Sheet1", 2, 0, "plain text").unwrap();
    assert_eq!(engine.graph.ranges.len(), 0);
}

#[test]
fn whole_column_ranges_follow_new_content() {
    let mut engine = build(&[&["1", "=SUM(A:A)"]]);
    assert_eq!(num(&mut engine, (0, 1)), 1.0);
    engine.set_cell_contents("Sheet1", 500, 0, "41").unwrap();
    assert_eq!(num(&mut engine, (0, 1)), 42.0);
}

#[test]
fn empty_cells_inside_a_range_are_not_contributors() {
    let mut engine = build(&[&["1"], &[""], &["3"], &["=SUM(A1:A3)"], &["=A2"]]);
    assert_eq!(num(&mut engine, (3, 0)), 4.0);
    // A2 is materialized as a placeholder by the direct reference
    let a2 = engine.graph.vertex_at(CellRef::at(0, 1, 0)).unwrap();
    assert!(matches!(
        engine.graph.vertex(a2).unwrap().kind,
        VertexKind::Empty { .. }
    ));
    let range = RangeRef::new(0, Coord::relative(0, 0), Coord::relative(2, 0));
    let rid = engine.graph.ranges.get(&range).unwrap();
    match &engine.graph.vertex(rid).unwrap().kind {
        VertexKind::Range { contributors, .. } => {
            assert_eq!(contributors.len(), 2);
            assert!(!contributors.contains(&a2));
        }
        other => panic!("not a range vertex: {other:?}"),
    }
    // filling the placeholder promotes it to a contributor
    engine.set_cell_contents("Sheet1", 1, 0, "2").unwrap();
    assert_eq!(num(&mut engine, (3, 0)), 6.0);
    match &engine.graph.vertex(rid).unwrap().kind {
        VertexKind::Range { contributors, .. } => assert!(contributors.contains(&a2)),
        other => panic!("not a range vertex: {other:?}"),
    }
}

#[test]
fn array_literal_spills_and_reads_by_position() {
    let mut engine = build(&[&["={1,2;3,4}"], &[], &["=B2"]]);
    assert_eq!(num(&mut engine, (0, 0)), 1.0);
    assert_eq!(num(&mut engine, (0, 1)), 2.0);
    assert_eq!(num(&mut engine, (1, 0)), 3.0);
    assert_eq!(num(&mut engine, (1, 1)), 4.0);
    assert_eq!(num(&mut engine, (2, 0)), 4.0);
}

#[test]
fn writing_into_an_array_interior_is_rejected() {
    let mut engine = build(&[&["={1,2;3,4}"]]);
    assert_eq!(num(&mut engine, (1, 1)), 4.0);
    assert!(engine.set_cell_contents("Sheet1", 1, 1, "9").is_err());
    // replacing the anchor replaces the whole array
    engine.set_cell_contents("Sheet1", 0, 0, "7").unwrap();
    assert_eq!(num(&mut engine, (0, 0)), 7.0);
    assert_eq!(
        engine.get_cell_value("Sheet1", 1, 1).unwrap(),
        CellValue::Empty
    );
}

#[test]
fn array_broadcasting_feeds_aggregates() {
    let mut engine = build(&[&["1", "2", "3"], &["=SUM(A1:C1+10)"]]);
    assert_eq!(num(&mut engine, (1, 0)), 36.0);
}
