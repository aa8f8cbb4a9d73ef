mod common;

use common::{item, open_uow, pairs, seed, Item};
use xrepo_core::{
    Filter, MemoryQuery, OrderingTransform, QuerySource, ReadOptions, RepoError, SortDirection,
    SortField, SortSpec,
};

fn owned(expected: &[(&str, i64)]) -> Vec<(String, i64)> {
    expected
        .iter()
        .map(|(name, number)| (name.to_string(), *number))
        .collect()
}

#[test]
fn parse_keeps_field_order_and_directions() {
    let spec = SortSpec::parse("Name desc,Number asc");
    assert_eq!(
        spec.fields(),
        &[
            SortField::new("Name", SortDirection::Descending),
            SortField::new("Number", SortDirection::Ascending),
        ]
    );
}

#[test]
fn store_orders_primary_desc_then_tie_break_asc() {
    let uow = open_uow();
    seed(&uow, vec![item("b", 2), item("a", 1), item("b", 1)]);

    let sorted = uow
        .repository::<Item>()
        .get_ordered_list(&ReadOptions::new(), "Name desc,Number asc")
        .unwrap();
    assert_eq!(pairs(&sorted), owned(&[("b", 1), ("b", 2), ("a", 1)]));

    let both_desc = uow
        .repository::<Item>()
        .get_ordered_list(&ReadOptions::new(), "NAME DESC, number DESC")
        .unwrap();
    assert_eq!(pairs(&both_desc), owned(&[("b", 2), ("b", 1), ("a", 1)]));
}

#[test]
fn store_ordering_matches_client_side_resort() {
    let uow = open_uow();
    let items = seed(
        &uow,
        vec![
            item("delta", 3),
            item("alpha", 7),
            item("delta", 1),
            item("charlie", 7),
            item("alpha", 2),
            item("bravo", 5),
        ],
    );

    for order in ["Name desc,Number asc", "Number desc, Name", "number asc,name desc"] {
        let from_store = uow
            .repository::<Item>()
            .get_ordered_list(&ReadOptions::new().no_tracking(), order)
            .unwrap();
        let ordering = OrderingTransform::<Item>::parse(order).unwrap();
        let from_memory = ordering
            .apply(MemoryQuery::new(items.clone()))
            .to_vec()
            .unwrap();
        assert_eq!(pairs(&from_store), pairs(&from_memory), "order `{order}`");
    }
}

#[test]
fn unknown_field_fails_before_any_store_access() {
    let uow = open_uow();
    seed(&uow, vec![item("a", 1)]);
    // Any store access would now fail with `Cancelled`.
    uow.cancellation_token().cancel();

    let err = uow
        .repository::<Item>()
        .get_ordered_list(&ReadOptions::new(), "Name desc,Foo asc")
        .unwrap_err();
    assert!(matches!(err, RepoError::PropertyNotFound { entity: "Item", ref name } if name == "Foo"));
}

#[test]
fn filter_applies_before_ordering() {
    let uow = open_uow();
    seed(
        &uow,
        vec![item("a", 1), item("b", 2), item("c", 3), item("d", 4)],
    );

    let options = ReadOptions::new().filter(Filter::ge("Number", 2).and(Filter::ne("name", "c")));
    let sorted = uow
        .repository::<Item>()
        .get_ordered_list(&options, "Number desc")
        .unwrap();
    assert_eq!(pairs(&sorted), owned(&[("d", 4), ("b", 2)]));
}

#[test]
fn composed_transform_chains_tie_breakers() {
    let uow = open_uow();
    seed(
        &uow,
        vec![item("x", 1), item("y", 2), item("x", 2), item("y", 1)],
    );

    let ordering = OrderingTransform::<Item>::by("Name", SortDirection::Descending)
        .unwrap()
        .chain(OrderingTransform::parse("Number desc").unwrap());
    let sorted = uow
        .repository::<Item>()
        .get_list(&ReadOptions::new(), Some(&ordering))
        .unwrap();
    assert_eq!(
        pairs(&sorted),
        owned(&[("y", 2), ("y", 1), ("x", 2), ("x", 1)])
    );
}

#[test]
fn asc_marker_is_removed_anywhere_in_a_segment() {
    // Only a trailing ` desc` flips the direction; any ` asc` is stripped.
    let spec = SortSpec::parse(" Number ASC ,Name");
    assert_eq!(
        spec.fields(),
        &[
            SortField::new("Number", SortDirection::Ascending),
            SortField::new("Name", SortDirection::Ascending),
        ]
    );
    assert!(SortSpec::parse("   ").is_empty());
}
