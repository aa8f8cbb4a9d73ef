mod common;

use common::{item, open_uow, seed, Item, MIGRATIONS};
use xrepo_core::{Filter, PageRequest, QuerySource, RepoError, StoreOptions, Tracking, UnitOfWork};

fn numbered(uow: &UnitOfWork, count: i64) {
    seed(uow, (1..=count).map(|n| item(&format!("item-{n:02}"), n)).collect());
}

fn numbers(items: &[Item]) -> Vec<i64> {
    items.iter().map(|item| item.number).collect()
}

#[test]
fn first_page_of_twenty_five() {
    let uow = open_uow();
    numbered(&uow, 25);

    let page = uow
        .repository::<Item>()
        .get_paged(None, "Number", PageRequest::new(1, 10))
        .unwrap();

    assert_eq!(page.row_count, 25);
    assert_eq!(page.page_count, 3);
    assert_eq!(page.first_row(), 1);
    assert_eq!(page.last_row(), 10);
    assert!(page.has_next());
    assert!(!page.has_previous());
    assert_eq!(numbers(&page.items), (1..=10).collect::<Vec<_>>());
}

#[test]
fn last_page_is_partial() {
    let uow = open_uow();
    numbered(&uow, 25);

    let page = uow
        .repository::<Item>()
        .get_paged(None, "Number", PageRequest::new(3, 10))
        .unwrap();

    assert_eq!(page.current, 3);
    assert_eq!(page.first_row(), 21);
    assert_eq!(page.last_row(), 25);
    assert!(!page.has_next());
    assert!(page.has_previous());
    assert_eq!(numbers(&page.items), vec![21, 22, 23, 24, 25]);
}

#[test]
fn descending_pages_with_filter_and_projection() {
    let uow = open_uow();
    numbered(&uow, 25);

    let filter = Filter::gt("Number", 5);
    let page = uow
        .repository::<Item>()
        .get_paged_with(Some(&filter), "Number desc", PageRequest::new(2, 6), |item| {
            item.name
        })
        .unwrap();

    assert_eq!(page.row_count, 20);
    assert_eq!(page.page_count, 4);
    assert_eq!(
        page.items,
        vec!["item-19", "item-18", "item-17", "item-16", "item-15", "item-14"]
    );
}

#[test]
fn page_past_the_end_is_empty() {
    let uow = open_uow();
    numbered(&uow, 4);

    let page = uow
        .repository::<Item>()
        .get_paged(None, "Number", PageRequest::new(5, 2))
        .unwrap();
    assert!(page.items.is_empty());
    assert_eq!(page.page_count, 2);
    assert!(!page.has_next());
}

#[test]
fn empty_store_has_no_pages() {
    let uow = open_uow();
    let page = uow
        .repository::<Item>()
        .get_paged(None, "", PageRequest::default())
        .unwrap();
    assert_eq!(page.row_count, 0);
    assert_eq!(page.page_count, 0);
    assert!(!page.has_next());
}

#[test]
fn default_page_size_comes_from_options() {
    let options = StoreOptions::from_json(r#"{"default_page_size": 4}"#).unwrap();
    let uow = UnitOfWork::open_in_memory(options, MIGRATIONS).unwrap();
    numbered(&uow, 9);

    let repo = uow.repository::<Item>();
    let request = repo.page_request(3);
    assert_eq!(request, PageRequest::new(3, 4));

    let page = repo.get_paged(None, "Number", request).unwrap();
    assert_eq!(page.page_count, 3);
    assert_eq!(numbers(&page.items), vec![9]);
}

#[test]
fn invalid_requests_and_sort_fields_are_rejected() {
    let uow = open_uow();
    numbered(&uow, 3);
    let repo = uow.repository::<Item>();

    let err = repo
        .get_paged(None, "Number", PageRequest::new(0, 10))
        .unwrap_err();
    assert!(matches!(err, RepoError::InvalidPageRequest { page: 0, size: 10 }));

    let err = repo
        .get_paged(None, "Number", PageRequest::new(1, 0))
        .unwrap_err();
    assert!(matches!(err, RepoError::InvalidPageRequest { page: 1, size: 0 }));

    let err = repo
        .get_paged(None, "Missing", PageRequest::default())
        .unwrap_err();
    assert!(matches!(err, RepoError::PropertyNotFound { .. }));
}

#[test]
fn huge_page_numbers_never_reach_the_store_as_bad_offsets() {
    let uow = open_uow();
    numbered(&uow, 3);
    let repo = uow.repository::<Item>();

    let err = repo
        .get_paged(None, "Number", PageRequest::new(usize::MAX / 2, 2))
        .unwrap_err();
    assert!(matches!(err, RepoError::InvalidPageRequest { size: 2, .. }));

    let far = PageRequest::new(i64::MAX as usize / 10 + 1, 10);
    let page = repo.get_paged(None, "Number", far).unwrap();
    assert!(page.items.is_empty());
    assert_eq!(page.row_count, 3);
    assert_eq!(page.last_row(), 3);

    let skipped = repo
        .queryable(Tracking::NoTracking, &[])
        .unwrap()
        .skip(usize::MAX)
        .take(usize::MAX)
        .to_vec()
        .unwrap();
    assert!(skipped.is_empty());
}
