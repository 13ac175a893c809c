//! `System.Data`: rows, tables and data sets.
//!
//! A `DataRow` does not store its values. It holds up to three record numbers (original,
//! current and proposed) that index into the per-column storage arrays of its table. A table
//! keeps its rows in a red-black tree whose nodes are structs in fixed-size pages; node ids
//! encode the page in the upper 16 bits and the slot in the lower 16, and id `0` is the
//! sentinel. Nodes with equal keys may hang off a main-tree node as a satellite tree.
//!
//! Field names are looked up with and without the leading underscore the Core runtime adds.

use strum::Display;

use crate::{
    objects::DynamicObject,
    visualizers::{TypeVisualizer, Visualization},
    Result,
};

/// Framework field name and its Core counterpart
type Names = [&'static str; 2];

const OLD_RECORD: Names = ["oldRecord", "_oldRecord"];
const NEW_RECORD: Names = ["newRecord", "_newRecord"];
const TEMP_RECORD: Names = ["tempRecord", "_tempRecord"];
const COLUMNS: Names = ["_columns", "columns"];
const COLUMN_NAME: Names = ["_columnName", "columnName"];
const STORAGE: Names = ["_storage", "storage"];
const VALUES: Names = ["values", "_values"];
const LIST: Names = ["_list", "list"];
const ITEMS: Names = ["_items", "items"];
const SIZE: Names = ["_size", "size"];
const TABLE_NAME: Names = ["tableName", "_tableName"];
const ROW_COLLECTION: Names = ["rowCollection", "_rowCollection"];
const TABLE_COLLECTION: Names = ["tableCollection", "_tableCollection"];
const ROOT: Names = ["root", "_root"];
const PAGE_TABLE: Names = ["_pageTable", "pageTable"];
const SLOTS: Names = ["Slots", "_slots"];
const LEFT: Names = ["leftId", "_leftId"];
const RIGHT: Names = ["rightId", "_rightId"];
const PARENT: Names = ["parentId", "_parentId"];
const NEXT: Names = ["nextId", "_nextId"];
const KEY: Names = ["keyOfNode", "_keyOfNode"];

const NO_RECORD: i32 = -1;
const NIL: i32 = 0;

fn has_member(object: &DynamicObject<'_>, names: Names) -> bool {
    names.iter().any(|name| object.has_field(name))
}

fn member<'s>(object: &DynamicObject<'s>, names: Names) -> Result<DynamicObject<'s>> {
    let name = names
        .iter()
        .find(|name| object.has_field(name))
        .unwrap_or(&names[0]);
    object.field(name)
}

/// Non-null items of an `ArrayList`
fn array_list_items<'s>(list: &DynamicObject<'s>) -> Result<Vec<DynamicObject<'s>>> {
    if list.is_null() {
        return Ok(Vec::new());
    }
    let items = member(list, ITEMS)?;
    if items.is_null() {
        return Ok(Vec::new());
    }

    let mut used = items.array_length()?;
    if has_member(list, SIZE) {
        let size: i32 = member(list, SIZE)?.to()?;
        used = used.min(usize::try_from(size).unwrap_or(0));
    }

    let mut result = Vec::with_capacity(used);
    for index in 0..used {
        let item = items.index(index as i64)?;
        if !item.is_null() {
            result.push(item);
        }
    }
    Ok(result)
}

/// Lifecycle state of a row, derived from its record numbers.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Display)]
pub enum RowState {
    /// Created but not attached to a table
    Detached,
    /// Attached and unmodified since the last accept
    Unchanged,
    /// Attached since the last accept
    Added,
    /// Deleted, changes not yet accepted
    Deleted,
    /// Changed since the last accept
    Modified,
}

impl RowState {
    /// State for an original and current record pair
    #[must_use]
    pub fn from_records(old_record: i32, new_record: i32) -> Self {
        if old_record == new_record {
            if old_record == NO_RECORD {
                RowState::Detached
            } else {
                RowState::Unchanged
            }
        } else if old_record == NO_RECORD {
            RowState::Added
        } else if new_record == NO_RECORD {
            RowState::Deleted
        } else {
            RowState::Modified
        }
    }
}

/// A column name and the row's value in that column.
#[derive(Clone, Debug)]
pub struct DataColumnValue<'s> {
    /// Column name
    pub name: String,
    /// Value, `None` if the row has no readable record or the column has no storage
    pub value: Option<DynamicObject<'s>>,
}

/// One row and its values in the record it currently exposes.
#[derive(Clone, Debug)]
pub struct DataRowView<'s> {
    /// The `DataRow` object
    pub row: DynamicObject<'s>,
    /// Derived lifecycle state
    pub state: RowState,
    /// Record read: proposed, else current, else original
    pub record: Option<usize>,
    /// Values, in column order
    pub columns: Vec<DataColumnValue<'s>>,
}

impl<'s> DataRowView<'s> {
    /// Read a `DataRow`.
    ///
    /// # Errors
    /// Returns the first read error.
    pub fn read(row: &DynamicObject<'s>) -> Result<Self> {
        let old_record: i32 = member(row, OLD_RECORD)?.to()?;
        let new_record: i32 = member(row, NEW_RECORD)?.to()?;
        let temp_record: i32 = member(row, TEMP_RECORD)?.to()?;

        let record = [temp_record, new_record, old_record]
            .into_iter()
            .find(|record| *record != NO_RECORD)
            .and_then(|record| usize::try_from(record).ok());

        let mut columns = Vec::new();
        let collection = member(row, COLUMNS)?;
        if !collection.is_null() {
            for column in array_list_items(&member(&collection, LIST)?)? {
                columns.push(DataColumnValue {
                    name: member(&column, COLUMN_NAME)?.to()?,
                    value: column_value(&column, record)?,
                });
            }
        }

        Ok(DataRowView {
            row: row.clone(),
            state: RowState::from_records(old_record, new_record),
            record,
            columns,
        })
    }

    /// Value of the column `name`
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&DynamicObject<'s>> {
        self.columns
            .iter()
            .find(|column| column.name == name)
            .and_then(|column| column.value.as_ref())
    }
}

fn column_value<'s>(
    column: &DynamicObject<'s>,
    record: Option<usize>,
) -> Result<Option<DynamicObject<'s>>> {
    let Some(record) = record else {
        return Ok(None);
    };

    let storage = member(column, STORAGE)?;
    if storage.is_null() {
        return Ok(None);
    }

    let values = member(&storage, VALUES)?;
    if values.is_null() || record >= values.array_length()? {
        return Ok(None);
    }
    values.index(record as i64).map(Some)
}

/// A table and its rows in tree order.
#[derive(Clone, Debug)]
pub struct DataTableView<'s> {
    /// Table name
    pub name: String,
    /// Rows
    pub rows: Vec<DataRowView<'s>>,
}

impl<'s> DataTableView<'s> {
    /// Read a `DataTable`.
    ///
    /// # Errors
    /// Returns the first read error, or a malformed error for a corrupt row tree.
    pub fn read(table: &DynamicObject<'s>) -> Result<Self> {
        let name_field = member(table, TABLE_NAME)?;
        let name = if name_field.is_null() {
            String::new()
        } else {
            name_field.to()?
        };

        let collection = member(table, ROW_COLLECTION)?;
        let mut rows = Vec::new();
        if !collection.is_null() {
            for row in tree_keys(&member(&collection, LIST)?)? {
                if !row.is_null() {
                    rows.push(DataRowView::read(&row)?);
                }
            }
        }

        Ok(DataTableView { name, rows })
    }
}

/// Tables of a data set, ordered by name.
#[derive(Clone, Debug)]
pub struct DataSetView<'s> {
    /// Tables
    pub tables: Vec<DataTableView<'s>>,
}

impl<'s> DataSetView<'s> {
    /// Table named `name`
    #[must_use]
    pub fn table(&self, name: &str) -> Option<&DataTableView<'s>> {
        self.tables.iter().find(|table| table.name == name)
    }
}

/// Keys of a paged red-black tree, in order
fn tree_keys<'s>(tree: &DynamicObject<'s>) -> Result<Vec<DynamicObject<'s>>> {
    if tree.is_null() {
        return Ok(Vec::new());
    }

    let root: i32 = member(tree, ROOT)?.to()?;
    if root == NIL {
        return Ok(Vec::new());
    }

    let pages = member(tree, PAGE_TABLE)?;
    let mut walker = TreeWalker::new(pages)?;
    let mut keys = Vec::new();
    let mut node = NIL;
    let mut main = root;

    while walker.advance(&mut node, &mut main)? {
        keys.push(member(&walker.node(node)?, KEY)?);
    }
    Ok(keys)
}

struct TreeWalker<'s> {
    pages: DynamicObject<'s>,
    budget: usize,
}

impl<'s> TreeWalker<'s> {
    fn new(pages: DynamicObject<'s>) -> Result<Self> {
        let mut slots = 0;
        for index in 0..pages.array_length()? {
            let page = pages.index(index as i64)?;
            if !page.is_null() {
                let page_slots = member(&page, SLOTS)?;
                if !page_slots.is_null() {
                    slots += page_slots.array_length()?;
                }
            }
        }

        // An in-order walk touches every link a bounded number of times
        Ok(TreeWalker {
            pages,
            budget: 16 * (slots + 1),
        })
    }

    fn node(&mut self, id: i32) -> Result<DynamicObject<'s>> {
        if self.budget == 0 {
            return Err(malformed_error!("Row tree walk does not terminate"));
        }
        self.budget -= 1;

        let page = self.pages.index(i64::from(id >> 16))?;
        if page.is_null() {
            return Err(malformed_error!("Row tree node {} is on a missing page", id));
        }
        member(&page, SLOTS)?.index(i64::from(id & 0xFFFF))
    }

    fn link(&mut self, id: i32, names: Names) -> Result<i32> {
        member(&self.node(id)?, names)?.to()
    }

    fn minimum(&mut self, mut id: i32) -> Result<i32> {
        loop {
            let left = self.link(id, LEFT)?;
            if left == NIL {
                return Ok(id);
            }
            id = left;
        }
    }

    fn successor(&mut self, mut id: i32) -> Result<i32> {
        let right = self.link(id, RIGHT)?;
        if right != NIL {
            return self.minimum(right);
        }

        let mut parent = self.link(id, PARENT)?;
        while parent != NIL && id == self.link(parent, RIGHT)? {
            id = parent;
            parent = self.link(parent, PARENT)?;
        }
        Ok(parent)
    }

    /// Move `node` to the next key-holding node; `main` is the main-tree node owning the
    /// satellite tree being walked, or the root before the first step.
    fn advance(&mut self, node: &mut i32, main: &mut i32) -> Result<bool> {
        if *node == NIL {
            *node = self.minimum(*main)?;
            *main = NIL;
        } else {
            *node = self.successor(*node)?;
            if *node == NIL && *main != NIL {
                *node = self.successor(*main)?;
                *main = NIL;
            }
        }

        if *node != NIL {
            let satellite = self.link(*node, NEXT)?;
            if satellite != NIL {
                if *main != NIL {
                    return Err(malformed_error!(
                        "Row tree node {} has a satellite tree inside a satellite tree",
                        *node
                    ));
                }
                *main = *node;
                *node = self.minimum(satellite)?;
            }
        }

        Ok(*node != NIL)
    }
}

/// Visualizer for `System.Data.DataRow`.
pub struct DataRowVisualizer;

impl TypeVisualizer for DataRowVisualizer {
    fn name(&self) -> &'static str {
        "DataRow"
    }

    fn required_fields(&self) -> &'static [&'static str] {
        &["oldRecord", "newRecord", "tempRecord", "_columns"]
    }

    fn matches_shape(&self, object: &DynamicObject<'_>) -> bool {
        [OLD_RECORD, NEW_RECORD, TEMP_RECORD, COLUMNS]
            .into_iter()
            .all(|names| has_member(object, names))
    }

    fn visualize<'s>(&self, object: &DynamicObject<'s>) -> Result<Visualization<'s>> {
        Ok(Visualization::Row(DataRowView::read(object)?))
    }
}

/// Visualizer for `System.Data.DataTable`.
pub struct DataTableVisualizer;

impl TypeVisualizer for DataTableVisualizer {
    fn name(&self) -> &'static str {
        "DataTable"
    }

    fn required_fields(&self) -> &'static [&'static str] {
        &["tableName", "rowCollection"]
    }

    fn matches_shape(&self, object: &DynamicObject<'_>) -> bool {
        has_member(object, TABLE_NAME) && has_member(object, ROW_COLLECTION)
    }

    fn visualize<'s>(&self, object: &DynamicObject<'s>) -> Result<Visualization<'s>> {
        Ok(Visualization::Table(DataTableView::read(object)?))
    }
}

/// Visualizer for `System.Data.DataSet`.
pub struct DataSetVisualizer;

impl TypeVisualizer for DataSetVisualizer {
    fn name(&self) -> &'static str {
        "DataSet"
    }

    fn required_fields(&self) -> &'static [&'static str] {
        &["tableCollection"]
    }

    fn matches_shape(&self, object: &DynamicObject<'_>) -> bool {
        has_member(object, TABLE_COLLECTION)
    }

    fn visualize<'s>(&self, object: &DynamicObject<'s>) -> Result<Visualization<'s>> {
        let collection = member(object, TABLE_COLLECTION)?;
        let mut tables = Vec::new();
        if !collection.is_null() {
            for table in array_list_items(&member(&collection, LIST)?)? {
                tables.push(DataTableView::read(&table)?);
            }
        }
        tables.sort_by(|left, right| left.name.cmp(&right.name));

        Ok(Visualization::DataSet(DataSetView { tables }))
    }
}
