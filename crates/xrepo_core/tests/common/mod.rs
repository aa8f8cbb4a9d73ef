#![allow(dead_code)]

use rusqlite::Row;
use uuid::Uuid;
use xrepo_core::{
    load_one, load_related, uuid_column, Entity, Field, FieldValue, Migration, Relation,
    StoreOptions, UnitOfWork,
};

pub const MIGRATIONS: &[Migration] = &[
    Migration::new(
        1,
        "CREATE TABLE items (
            id TEXT PRIMARY KEY NOT NULL,
            name TEXT NOT NULL,
            number INTEGER NOT NULL
        );",
    ),
    Migration::new(
        2,
        "CREATE TABLE children (
            id INTEGER PRIMARY KEY NOT NULL,
            item_id TEXT NOT NULL REFERENCES items(id) ON DELETE CASCADE,
            label TEXT NOT NULL
        );",
    ),
];

#[derive(Debug, Clone, PartialEq)]
pub struct Item {
    pub id: Uuid,
    pub name: String,
    pub number: i64,
    pub children: Vec<Child>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Child {
    pub id: i64,
    pub item_id: Uuid,
    pub label: String,
    pub item: Option<Box<Item>>,
}

static ITEM_FIELDS: &[Field<Item>] = &[
    Field::new("Id", "id", |item| FieldValue::from(item.id)),
    Field::new("Name", "name", |item| FieldValue::from(&item.name)),
    Field::new("Number", "number", |item| FieldValue::from(item.number)),
];

static ITEM_RELATIONS: &[Relation<Item>] = &[Relation::collection("Children", load_children)];

fn load_children(conn: &rusqlite::Connection, item: &mut Item) -> rusqlite::Result<()> {
    item.children = load_related::<Child>(conn, "item_id", &FieldValue::from(item.id))?;
    Ok(())
}

impl Entity for Item {
    const NAME: &'static str = "Item";
    const TABLE: &'static str = "items";
    const KEY_COLUMN: &'static str = "id";

    fn fields() -> &'static [Field<Self>] {
        ITEM_FIELDS
    }

    fn key(&self) -> FieldValue {
        FieldValue::from(self.id)
    }

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: uuid_column(row, "id")?,
            name: row.get("name")?,
            number: row.get("number")?,
            children: Vec::new(),
        })
    }

    fn relations() -> &'static [Relation<Self>] {
        ITEM_RELATIONS
    }
}

static CHILD_FIELDS: &[Field<Child>] = &[
    Field::new("Id", "id", |child| FieldValue::from(child.id)),
    Field::new("ItemId", "item_id", |child| FieldValue::from(child.item_id)),
    Field::new("Label", "label", |child| FieldValue::from(&child.label)),
];

static CHILD_RELATIONS: &[Relation<Child>] = &[Relation::reference("Item", load_parent)];

fn load_parent(conn: &rusqlite::Connection, child: &mut Child) -> rusqlite::Result<()> {
    child.item = load_one::<Item>(conn, "id", &FieldValue::from(child.item_id))?.map(Box::new);
    Ok(())
}

impl Entity for Child {
    const NAME: &'static str = "Child";
    const TABLE: &'static str = "children";
    const KEY_COLUMN: &'static str = "id";

    fn fields() -> &'static [Field<Self>] {
        CHILD_FIELDS
    }

    fn key(&self) -> FieldValue {
        FieldValue::from(self.id)
    }

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get("id")?,
            item_id: uuid_column(row, "item_id")?,
            label: row.get("label")?,
            item: None,
        })
    }

    fn relations() -> &'static [Relation<Self>] {
        CHILD_RELATIONS
    }
}

pub fn item(name: &str, number: i64) -> Item {
    Item {
        id: Uuid::new_v4(),
        name: name.to_string(),
        number,
        children: Vec::new(),
    }
}

pub fn child(id: i64, parent: &Item, label: &str) -> Child {
    Child {
        id,
        item_id: parent.id,
        label: label.to_string(),
        item: None,
    }
}

pub fn open_uow() -> UnitOfWork {
    UnitOfWork::open_in_memory(StoreOptions::default(), MIGRATIONS).unwrap()
}

/// Inserts and saves `items`, returning them.
pub fn seed(uow: &UnitOfWork, items: Vec<Item>) -> Vec<Item> {
    uow.repository::<Item>()
        .insert_range(items.iter().cloned())
        .unwrap();
    uow.save_changes().unwrap();
    items
}

/// Row count read directly from the store.
pub fn stored_rows(uow: &UnitOfWork, table: &str) -> i64 {
    uow.session()
        .connection()
        .query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| {
            row.get(0)
        })
        .unwrap()
}

pub fn pairs(items: &[Item]) -> Vec<(String, i64)> {
    items
        .iter()
        .map(|item| (item.name.clone(), item.number))
        .collect()
}
