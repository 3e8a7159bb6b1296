use crate::cache::proxy::ProxyMetadata;
use crate::cache::state::{CacheState, FormatMeta, TitleRow};
use crate::core::config::Config;
use crate::core::error::{Error, ErrorKind, Result};
use crate::core::types::{BookId, DataType, FieldValue, ItemId, LinkAux, LinkShape, Scalar, TableShape};
use crate::fields::Field;
use crate::maintainer::daemon::{DirtyInterlink, DirtyRecord};
use crate::normalize::author_sort::{author_to_author_sort, split_authors, title_case_name, AuthorNameConfig};
use crate::normalize::isbn::{normalize_isbn, sanitize_identifier_key};
use crate::normalize::title_sort::{title_sort, ArticleTable, TitleSortOrder};
use crate::registry::registry::FieldMetadataRegistry;
use crate::store::driver::{LinkRow, RowDict, StoreDriver};
use crate::tables::authors::AuthorsTable;
use crate::tables::composite::CompositeTable;
use crate::tables::formats::FormatsTable;
use crate::tables::identifiers::IdentifiersTable;
use crate::tables::many_to_many::{LinkEntry, ManyToManyTable};
use crate::tables::many_to_one::ManyToOneTable;
use crate::tables::one_to_many::OneToManyTable;
use crate::tables::virtual_table::VirtualTable;
use crate::tables::TableImpl;
use crate::writers::{dispatch, WriterKind};
use chrono::Utc;
use crossbeam::channel::Sender;
use parking_lot::RwLock;
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::Arc;
use uuid::Uuid;

/// The top-level object: owns a single fair read/write lock over
/// all cache state, mediates every write through it, and talks to the
/// Store only through the narrow `StoreDriver` contract. Rust's borrow
/// checker gives us the "reentrant for writers" half of the lock
/// requirement for free: a write-api method takes the lock once and
/// then calls private helpers that operate on the already-borrowed
/// `CacheState` directly, rather than re-acquiring anything. There is
/// no recursive-mutex machinery to get wrong.
pub struct CacheController {
    store: Arc<dyn StoreDriver>,
    config: Config,
    registry: RwLock<FieldMetadataRegistry>,
    state: RwLock<CacheState>,
    name_config: AuthorNameConfig,
    article_table: ArticleTable,
    /// Set by `attach_maintainer_channels` once a `Maintainer` has been
    /// spawned against this controller; `None` until then, so a
    /// controller used without a maintainer just never pushes.
    record_tx: RwLock<Option<Sender<DirtyRecord>>>,
    interlink_tx: RwLock<Option<Sender<DirtyInterlink>>>,
}

impl CacheController {
    pub fn new(store: Arc<dyn StoreDriver>, config: Config) -> Self {
        let state = CacheState::with_template_cache_size(config.formatter_template_cache_size);
        CacheController {
            store,
            config,
            registry: RwLock::new(FieldMetadataRegistry::new()),
            state: RwLock::new(state),
            name_config: AuthorNameConfig::new(),
            article_table: ArticleTable::new(),
            record_tx: RwLock::new(None),
            interlink_tx: RwLock::new(None),
        }
    }

    /// Wire a `Maintainer`'s queues to this controller. Called by
    /// `Maintainer::spawn` before its background thread starts; from
    /// then on every Store-mutating writer below pushes a `DirtyRecord`
    /// or `DirtyInterlink` event as it commits.
    pub fn attach_maintainer_channels(&self, record_tx: Sender<DirtyRecord>, interlink_tx: Sender<DirtyInterlink>) {
        *self.record_tx.write() = Some(record_tx);
        *self.interlink_tx.write() = Some(interlink_tx);
    }

    /// Non-blocking: a full or detached maintainer queue must never
    /// stall a writer, so a failed send is silently dropped.
    fn push_dirty_record(&self, table: &str, row_id: i64) {
        if let Some(tx) = self.record_tx.read().as_ref() {
            let _ = tx.try_send(DirtyRecord { table: table.to_string(), row_id });
        }
    }

    fn push_dirty_interlink(&self, update_type: &str, table1: &str, table2: &str, id1: i64, id2: i64) {
        if let Some(tx) = self.interlink_tx.read().as_ref() {
            let _ = tx.try_send(DirtyInterlink {
                update_type: update_type.to_string(),
                table1: table1.to_string(),
                table2: table2.to_string(),
                id1,
                id2,
            });
        }
    }

    // -- lifecycle -------------------------------

    /// Populate every builtin Table from the registry in one pass.
    pub fn init(&self) -> Result<()> {
        self.store.open()?;
        for name in ["title_sort", "author_to_author_sort", "uuid4"] {
            self.store.register_scalar_fn(name)?;
        }
        for name in ["sorted_concat", "identifier_concat"] {
            self.store.register_aggregate_fn(name)?;
        }
        let registry = self.registry.read();
        let mut state = self.state.write();
        for name in registry.names() {
            let meta = registry.get(&name).unwrap().clone();
            let table = match meta.table_shape {
                TableShape::OneToOneInTitles => None,
                TableShape::OneToOneInOther => Some(TableImpl::OneToOne(crate::tables::one_to_one::OneToOneTable::new(&meta.table, meta.link_column.as_deref().unwrap_or("value")))),
                TableShape::ManyToOne => Some(TableImpl::ManyToOne(ManyToOneTable::new(&meta.table))),
                TableShape::OneToMany => Some(TableImpl::OneToMany(OneToManyTable::new(&meta.table))),
                TableShape::ManyToMany => Some(match name.as_str() {
                    "authors" => TableImpl::Authors(AuthorsTable::new()),
                    "formats" => TableImpl::Formats(FormatsTable::new()),
                    "identifiers" => TableImpl::Identifiers(IdentifiersTable::new()),
                    _ => TableImpl::ManyToMany(ManyToManyTable::new(&meta.table, meta.link_table.as_deref().unwrap_or(""), meta.link_shape.unwrap_or(LinkShape::Plain))),
                }),
                TableShape::Composite => {
                    let depends = match name.as_str() {
                        "creator_tags" => vec!["authors".to_string()],
                        "title_tags" => vec!["title".to_string()],
                        "series_tags" => vec!["series".to_string()],
                        "genre_tags" => vec!["genre".to_string()],
                        "identifier_map" => vec!["identifiers".to_string()],
                        "publisher_tags" => vec!["publisher".to_string()],
                        _ => Vec::new(),
                    };
                    Some(TableImpl::Composite(CompositeTable::new(&meta.name, meta.display.template.as_deref().unwrap_or(""), depends)))
                }
                TableShape::Virtual => Some(TableImpl::Virtual(VirtualTable::new(&meta.name))),
            };
            if let Some(table) = table {
                state.tables.insert(name.clone(), table);
            }
            state.fields.insert(name.clone(), Field::new(meta));
        }
        drop(state);
        drop(registry);
        if self.config.update_all_last_mod_dates_on_start {
            let ids: Vec<BookId> = self.all_book_ids().into_iter().collect();
            let mut state = self.state.write();
            let now = Utc::now();
            for id in ids {
                if let Some(row) = state.titles.get_mut(&id) {
                    row.last_modified = now;
                }
            }
        }
        Ok(())
    }

    pub fn close(&self) -> Result<()> {
        self.commit_dirty_cache();
        self.store.close()
    }

    pub fn reload_from_db(&self, clear_caches: bool) -> Result<()> {
        if clear_caches {
            let mut state = self.state.write();
            state.format_metadata_cache.clear();
            state.formatter_template_cache.clear();
        }
        Ok(())
    }

    pub fn last_modified(&self, book_id: BookId) -> Option<chrono::DateTime<Utc>> {
        self.state.read().titles.get(&book_id).map(|t| t.last_modified)
    }

    pub fn vacuum(&self) -> Result<()> {
        self.store.vacuum()
    }

    pub fn dump_and_restore(&self) -> Result<()> {
        self.store.dump_and_restore(None)
    }

    // -- reads ---------------------------------------------

    pub fn field_for(&self, name: &str, book_id: BookId, default: FieldValue) -> FieldValue {
        let state = self.state.read();
        self.field_for_locked(&state, name, book_id, default)
    }

    /// Same lookup as `field_for`. Upstream distinguishes a "fast" path
    /// that skips per-call validation for callers (`multisort`,
    /// `search`) reading one field across many books; this cache's
    /// single direct `BTreeMap`/table lookup already is that fast path,
    /// so `fast_field_for` is a plain alias kept for call-site parity
    /// with the wider public surface.
    pub fn fast_field_for(&self, name: &str, book_id: BookId, default: FieldValue) -> FieldValue {
        self.field_for(name, book_id, default)
    }

    /// A composite field's current rendered value, or an empty string
    /// if it has never been filled (e.g. no dependency has been written
    /// yet) or `name` is not a composite.
    pub fn composite_for(&self, name: &str, book_id: BookId) -> String {
        let state = self.state.read();
        match state.tables.get(name) {
            Some(TableImpl::Composite(c)) => c.cached(book_id).unwrap_or("").to_string(),
            _ => String::new(),
        }
    }

    fn field_for_locked(&self, state: &CacheState, name: &str, book_id: BookId, default: FieldValue) -> FieldValue {
        match name {
            "title" => return state.titles.get(&book_id).map(|t| FieldValue::Scalar(Scalar::Text(t.title.clone()))).unwrap_or(default),
            "sort" => return state.titles.get(&book_id).map(|t| FieldValue::Scalar(Scalar::Text(t.sort.clone()))).unwrap_or(default),
            "author_sort" => return state.titles.get(&book_id).map(|t| FieldValue::Scalar(Scalar::Text(t.author_sort.clone()))).unwrap_or(default),
            "series_index" => return state.titles.get(&book_id).map(|t| FieldValue::Scalar(Scalar::Float(t.series_index))).unwrap_or(default),
            "uuid" => return state.titles.get(&book_id).map(|t| FieldValue::Scalar(Scalar::Text(t.uuid.clone()))).unwrap_or(default),
            "path" => return state.titles.get(&book_id).map(|t| FieldValue::Scalar(Scalar::Text(t.path.clone()))).unwrap_or(default),
            "cover" => return state.titles.get(&book_id).map(|t| FieldValue::Scalar(Scalar::Bool(t.has_cover))).unwrap_or(default),
            "last_modified" => return state.titles.get(&book_id).map(|t| FieldValue::Scalar(Scalar::DateTime(t.last_modified))).unwrap_or(default),
            "size" => {
                if let Some(TableImpl::Formats(f)) = state.tables.get("formats") {
                    let max = f.formats_for_book(book_id).iter().filter_map(|c| f.format_size(book_id, c)).max();
                    return max.map(|s| FieldValue::Scalar(Scalar::Int(s as i64))).unwrap_or(default);
                }
            }
            _ => {}
        }
        let Some(field) = state.fields.get(name) else { return default };
        let Some(table) = state.tables.get(name) else { return default };
        field.for_book(table, book_id, default)
    }

    pub fn all_field_for(&self, name: &str) -> HashMap<BookId, FieldValue> {
        let state = self.state.read();
        state.all_book_ids.iter().map(|id| (*id, self.field_for_locked(&state, name, *id, FieldValue::Absent))).collect()
    }

    pub fn field_ids_for(&self, name: &str, book_id: BookId) -> Vec<ItemId> {
        let state = self.state.read();
        match (state.fields.get(name), state.tables.get(name)) {
            (Some(field), Some(table)) => field.ids_for_book(table, book_id),
            _ => Vec::new(),
        }
    }

    pub fn books_for_field(&self, name: &str, item_id: ItemId) -> HashSet<BookId> {
        let state = self.state.read();
        match (state.fields.get(name), state.tables.get(name)) {
            (Some(field), Some(table)) => field.books_for(table, item_id),
            _ => HashSet::new(),
        }
    }

    pub fn all_book_ids(&self) -> BTreeSet<BookId> {
        self.state.read().all_book_ids.clone()
    }

    pub fn all_field_ids(&self, name: &str) -> Vec<ItemId> {
        let state = self.state.read();
        match state.tables.get(name) {
            Some(TableImpl::ManyToOne(t)) => t.id_map.keys().copied().collect(),
            Some(TableImpl::ManyToMany(t)) => t.id_map.keys().copied().collect(),
            Some(TableImpl::Authors(t)) => t.base.id_map.keys().copied().collect(),
            Some(TableImpl::OneToOne(t)) => t.id_map.keys().copied().collect(),
            _ => Vec::new(),
        }
    }

    pub fn all_field_names(&self, name: &str) -> Vec<String> {
        let state = self.state.read();
        match state.tables.get(name) {
            Some(TableImpl::ManyToOne(t)) => t.id_map.values().cloned().collect(),
            Some(TableImpl::ManyToMany(t)) => t.id_map.values().cloned().collect(),
            Some(TableImpl::Authors(t)) => t.base.id_map.values().cloned().collect(),
            Some(TableImpl::OneToOne(t)) => t.id_map.values().cloned().collect(),
            _ => Vec::new(),
        }
    }

    pub fn get_usage_count_by_id(&self, name: &str) -> HashMap<ItemId, usize> {
        let state = self.state.read();
        match state.tables.get(name) {
            Some(TableImpl::ManyToOne(t)) => t.id_map.keys().map(|id| (*id, t.books_for(*id).len())).collect(),
            Some(TableImpl::ManyToMany(t)) => t.id_map.keys().map(|id| (*id, t.books_for(*id).len())).collect(),
            Some(TableImpl::Authors(t)) => t.base.id_map.keys().map(|id| (*id, t.base.books_for(*id).len())).collect(),
            _ => HashMap::new(),
        }
    }

    pub fn get_id_map(&self, name: &str) -> HashMap<ItemId, String> {
        let state = self.state.read();
        match state.tables.get(name) {
            Some(TableImpl::ManyToOne(t)) => t.id_map.clone(),
            Some(TableImpl::ManyToMany(t)) => t.id_map.clone(),
            Some(TableImpl::Authors(t)) => t.base.id_map.clone(),
            Some(TableImpl::OneToOne(t)) => t.id_map.clone(),
            _ => HashMap::new(),
        }
    }

    /// The reverse lookup of `get_item_id` for the same normalized
    /// query always yields an equal normalized name.
    pub fn get_item_name(&self, name: &str, item_id: ItemId) -> Option<String> {
        self.get_id_map(name).get(&item_id).cloned()
    }

    pub fn get_item_id(&self, name: &str, value: &str) -> Option<ItemId> {
        let state = self.state.read();
        match state.tables.get(name) {
            Some(TableImpl::ManyToOne(t)) => t.id_for_value(value),
            Some(TableImpl::ManyToMany(t)) => t.id_for_value(value),
            Some(TableImpl::Authors(t)) => t.base.id_for_value(value),
            _ => None,
        }
    }

    pub fn get_item_ids(&self, name: &str, values: &[String]) -> Vec<Option<ItemId>> {
        values.iter().map(|v| self.get_item_id(name, v)).collect()
    }

    pub fn author_data(&self, book_id: BookId) -> Vec<(String, String, String)> {
        let state = self.state.read();
        let Some(TableImpl::Authors(t)) = state.tables.get("authors") else { return Vec::new() };
        t.base
            .entries_for_book(book_id)
            .iter()
            .filter_map(|e| {
                let name = t.base.id_map.get(&e.item_id)?;
                let sort = t.asort_map.get(&e.item_id).cloned().unwrap_or_default();
                let link = t.alink_map.get(&e.item_id).cloned().unwrap_or_default();
                Some((name.clone(), sort, link))
            })
            .collect()
    }

    pub fn get_metadata(&self, book_id: BookId) -> BTreeMap<String, FieldValue> {
        let state = self.state.read();
        state.fields.keys().map(|name| (name.clone(), self.field_for_locked(&state, name, book_id, FieldValue::Absent))).collect()
    }

    pub fn get_proxy_metadata(&self, book_id: BookId) -> ProxyMetadata<'_> {
        ProxyMetadata::new(self, book_id)
    }

    pub fn lookup_by_uuid(&self, uuid: &str) -> Option<BookId> {
        self.state.read().uuid_index.get(uuid).copied()
    }

    /// Every book currently pointing at `row_id` in `table_name`, used
    /// by the Maintainer to turn a `(table, row_id)` dirty-record event
    /// back into the books whose aggregates need recomputing.
    pub fn books_referencing_row(&self, table_name: &str, row_id: i64) -> Vec<BookId> {
        if table_name == "titles" || table_name == "books" {
            return vec![BookId::new(row_id)];
        }
        let item_id = ItemId::new(row_id);
        let state = self.state.read();
        match state.tables.get(table_name) {
            Some(TableImpl::ManyToOne(t)) => t.books_for(item_id).into_iter().collect(),
            Some(TableImpl::ManyToMany(t)) => t.books_for(item_id).into_iter().collect(),
            Some(TableImpl::Authors(t)) => t.base.books_for(item_id).into_iter().collect(),
            Some(TableImpl::OneToOne(t)) => t.books_for(item_id),
            Some(TableImpl::OneToMany(t)) => t.book_col_map.iter().filter(|(_, ids)| ids.contains(&item_id)).map(|(b, _)| *b).collect(),
            _ => Vec::new(),
        }
    }

    // -- writes -------------------------------------

    pub fn create_book_entry(&self, title: &str, authors: &[String]) -> Result<BookId> {
        let now = Utc::now();
        let uuid = Uuid::new_v4().to_string();
        let sort = title_sort(title, TitleSortOrder::MoveArticleToEnd, Some("eng"), &self.article_table);
        let mut row = self.store.get_blank_row("titles")?;
        row.insert("title".to_string(), Scalar::Text(title.to_string()));
        row.insert("sort".to_string(), Scalar::Text(sort.clone()));
        row.insert("author_sort".to_string(), Scalar::Text(String::new()));
        row.insert("series_index".to_string(), Scalar::Float(1.0));
        row.insert("timestamp".to_string(), Scalar::DateTime(now));
        row.insert("pubdate".to_string(), Scalar::Null);
        row.insert("uuid".to_string(), Scalar::Text(uuid.clone()));
        row.insert("path".to_string(), Scalar::Text(String::new()));
        row.insert("last_modified".to_string(), Scalar::DateTime(now));
        row.insert("has_cover".to_string(), Scalar::Bool(false));
        let row_id = self.store.insert_row("titles", row)?;
        let book_id = BookId::new(row_id);

        let mut state = self.state.write();
        if state.titles.contains_key(&book_id) {
            return Err(Error::new(ErrorKind::IntegrityError, format!("Store assigned book id {row_id} already present in cache")).with_book_ids([book_id.value()]));
        }
        let mut title_row = TitleRow::new(title.to_string(), uuid.clone(), now);
        title_row.sort = sort;
        state.titles.insert(book_id, title_row);
        state.uuid_index.insert(uuid, book_id);
        state.all_book_ids.insert(book_id);
        state.mark_dirty(book_id);
        drop(state);
        self.push_dirty_record("titles", book_id.value());
        if !authors.is_empty() {
            self.set_field_authors(book_id, authors)?;
        }
        Ok(book_id)
    }

    /// Diff `new_right_ids` against what the Store currently has on file
    /// for `book` in `link_table` and issue the minimal set of
    /// delete/insert/update calls to bring it in line.
    fn sync_links(&self, link_table: &str, book: BookId, new_right_ids: &[(ItemId, LinkAux)]) -> Result<()> {
        let existing: Vec<LinkRow> = self.store.link_rows(link_table)?.into_iter().filter(|r| r.left_id == book.value()).collect();
        let new_ids: HashSet<i64> = new_right_ids.iter().map(|(id, _)| id.value()).collect();
        let remove: Vec<i64> = existing.iter().filter(|r| !new_ids.contains(&r.right_id)).map(|r| r.right_id).collect();
        if !remove.is_empty() {
            self.store.delete_links(link_table, book.value(), &remove)?;
        }
        let existing_ids: HashSet<i64> = existing.iter().map(|r| r.right_id).collect();
        for (id, aux) in new_right_ids {
            if existing_ids.contains(&id.value()) {
                self.store.update_link_aux(link_table, book.value(), id.value(), aux.clone())?;
            } else {
                self.store.insert_link(link_table, LinkRow { left_id: book.value(), right_id: id.value(), aux: aux.clone() })?;
            }
        }
        Ok(())
    }

    pub fn add_books(&self, entries: &[(String, Vec<String>)]) -> Result<Vec<BookId>> {
        entries.iter().map(|(title, authors)| self.create_book_entry(title, authors)).collect()
    }

    pub fn remove_books(&self, book_ids: &[BookId]) -> Result<()> {
        tracing::debug!(count = book_ids.len(), "remove_books");
        let registry = self.registry.read();
        let link_tables: Vec<String> = registry.names().filter_map(|n| registry.get(&n).and_then(|m| m.link_table.clone())).collect();
        let one_to_many_tables: Vec<String> = registry
            .names()
            .filter_map(|n| registry.get(&n).filter(|m| m.table_shape == TableShape::OneToMany).map(|m| m.table.clone()))
            .collect();
        drop(registry);
        for link_table in &link_tables {
            for id in book_ids {
                if let Ok(rows) = self.store.link_rows(link_table) {
                    let right_ids: Vec<i64> = rows.iter().filter(|r| r.left_id == id.value()).map(|r| r.right_id).collect();
                    if !right_ids.is_empty() {
                        self.store.delete_links(link_table, id.value(), &right_ids).ok();
                    }
                }
            }
        }
        for table in &one_to_many_tables {
            if let Ok(rows) = self.store.all_rows(table, None, false) {
                let owned: Vec<i64> = rows
                    .into_iter()
                    .filter(|(_, row)| matches!(row.get("book"), Some(Scalar::Int(b)) if book_ids.iter().any(|id| id.value() == *b)))
                    .map(|(id, _)| id)
                    .collect();
                if !owned.is_empty() {
                    self.store.delete_by_id(table, &owned).ok();
                }
            }
        }
        let ids: Vec<i64> = book_ids.iter().map(|b| b.value()).collect();
        self.store.delete_by_id("titles", &ids).ok();

        let mut state = self.state.write();
        for id in book_ids {
            state.titles.remove(id);
            state.all_book_ids.remove(id);
            state.cover_caches.remove(id);
            state.format_metadata_cache.remove(id);
            state.dirtied_cache.remove(id);
        }
        state.uuid_index.retain(|_, v| !book_ids.contains(v));
        let names: Vec<String> = state.tables.keys().cloned().collect();
        for name in &names {
            if let Some(table) = state.tables.get_mut(name) {
                table.remove_books(book_ids);
            }
        }
        drop(state);
        for name in &names {
            self.push_dirty_interlink("remove_books", name, "titles", 0, 0);
        }
        Ok(())
    }

    /// Set one field for a set of books, returning the ids actually
    /// changed.
    pub fn set_field(&self, name: &str, values: BTreeMap<BookId, FieldValue>) -> Result<HashSet<BookId>> {
        tracing::debug!(field = %name, book_count = values.len(), "set_field");
        let registry = self.registry.read();
        let meta = registry.get(name).ok_or_else(|| Error::not_found(format!("no field `{name}`")).with_field(name))?.clone();
        drop(registry);
        let kind = dispatch(name, meta.table_shape);
        if kind == WriterKind::Dummy {
            return Err(Error::input(format!("`{name}` is not writable through set_field")).with_field(name));
        }
        let mut affected = HashSet::new();
        match kind {
            WriterKind::Title => {
                for (book, value) in values {
                    let FieldValue::Scalar(Scalar::Text(text)) = value else { continue };
                    let changed = self.write_title(book, &text)?;
                    if changed {
                        affected.insert(book);
                    }
                }
            }
            WriterKind::AuthorSort => {
                for (book, value) in values {
                    let FieldValue::Scalar(Scalar::Text(text)) = value else { continue };
                    let mut state = self.state.write();
                    let Some(row) = state.titles.get_mut(&book) else { continue };
                    if row.author_sort != text {
                        row.author_sort = text.clone();
                        state.mark_dirty(book);
                        drop(state);
                        let mut update = RowDict::new();
                        update.insert("author_sort".to_string(), Scalar::Text(text));
                        self.store.update_row("titles", book.value(), update)?;
                        self.push_dirty_record("titles", book.value());
                        affected.insert(book);
                    }
                }
            }
            WriterKind::Uuid => {
                for (book, value) in values {
                    let FieldValue::Scalar(Scalar::Text(text)) = value else { continue };
                    let mut state = self.state.write();
                    let Some(row) = state.titles.get_mut(&book) else { continue };
                    let old = row.uuid.clone();
                    row.uuid = text.clone();
                    state.uuid_index.remove(&old);
                    state.uuid_index.insert(text.clone(), book);
                    state.mark_dirty(book);
                    drop(state);
                    let mut update = RowDict::new();
                    update.insert("uuid".to_string(), Scalar::Text(text));
                    self.store.update_row("titles", book.value(), update)?;
                    self.push_dirty_record("titles", book.value());
                    affected.insert(book);
                }
            }
            WriterKind::Covers => {
                for (book, value) in values {
                    let flag = matches!(value, FieldValue::Scalar(Scalar::Bool(true)));
                    let mut state = self.state.write();
                    let Some(row) = state.titles.get_mut(&book) else { continue };
                    row.has_cover = flag;
                    if flag {
                        state.cover_caches.insert(book);
                    } else {
                        state.cover_caches.remove(&book);
                    }
                    state.mark_dirty(book);
                    drop(state);
                    let mut update = RowDict::new();
                    update.insert("has_cover".to_string(), Scalar::Bool(flag));
                    self.store.update_row("titles", book.value(), update)?;
                    self.push_dirty_record("titles", book.value());
                    affected.insert(book);
                }
            }
            WriterKind::Identifiers => {
                for (book, value) in values {
                    let FieldValue::Identifiers(map) = value else { continue };
                    self.write_identifiers(book, map.into_iter().collect())?;
                    affected.insert(book);
                }
            }
            WriterKind::ManyToMany if name == "authors" => {
                for (book, value) in values {
                    let FieldValue::TextList(list) = value else { continue };
                    if self.set_field_authors(book, &list)? {
                        affected.insert(book);
                    }
                }
            }
            WriterKind::ManyToMany | WriterKind::Languages => {
                for (book, value) in values {
                    let FieldValue::TextList(list) = value else { continue };
                    if self.write_many_to_many(name, book, &list, name == "languages")? {
                        affected.insert(book);
                    }
                }
            }
            WriterKind::ManyToOne if name == "series" => {
                for (book, value) in values {
                    let FieldValue::Scalar(Scalar::Text(text)) = value else { continue };
                    self.write_series(book, &text, None)?;
                    affected.insert(book);
                }
            }
            WriterKind::ManyToOne => {
                for (book, value) in values {
                    let FieldValue::Scalar(Scalar::Text(text)) = value else { continue };
                    self.write_many_to_one(name, book, &text)?;
                    affected.insert(book);
                }
            }
            WriterKind::OneToMany => {
                for (book, value) in values {
                    let list = match value {
                        FieldValue::TextList(l) => l,
                        FieldValue::Scalar(Scalar::Text(s)) => vec![s],
                        _ => continue,
                    };
                    self.write_one_to_many(name, book, list)?;
                    affected.insert(book);
                }
            }
            WriterKind::CustomSeriesIndex => {
                for (book, value) in values {
                    let FieldValue::Scalar(scalar) = &value else {
                        return Err(Error::input("series index must be numeric").with_book_ids([book.value()]).with_field(name));
                    };
                    let index = scalar.as_float().ok_or_else(|| Error::input("series index must be numeric").with_book_ids([book.value()]).with_field(name))?;
                    let mut state = self.state.write();
                    let Some(row) = state.titles.get_mut(&book) else { continue };
                    row.series_index = index;
                    state.mark_dirty(book);
                    drop(state);
                    // Custom-column index fields (`<name>_index`) live in
                    // driver-specific custom-column tables, outside the
                    // narrow `StoreDriver` contract; only the builtin
                    // `series_index` column is one this crate's reference
                    // store knows how to address directly.
                    if name == "series_index" {
                        let mut update = RowDict::new();
                        update.insert("series_index".to_string(), Scalar::Float(index));
                        self.store.update_row("titles", book.value(), update)?;
                        self.push_dirty_record("titles", book.value());
                    }
                    affected.insert(book);
                }
            }
            WriterKind::OneToOne => {
                for (book, value) in values {
                    let FieldValue::Scalar(Scalar::Text(text)) = value else { continue };
                    self.write_one_to_one(name, book, &text)?;
                    affected.insert(book);
                }
            }
            WriterKind::Dummy => unreachable!(),
        }
        Ok(affected)
    }

    /// Set several fields on one book inside one Store transaction: on
    /// any Store failure everything rolls back and the cache is
    /// reloaded before the error surfaces.
    pub fn set_metadata(&self, book_id: BookId, fields: BTreeMap<String, FieldValue>) -> Result<HashSet<BookId>> {
        tracing::debug!(book_id = book_id.value(), field_count = fields.len(), "set_metadata");
        let tx = self.store.begin_transaction()?;
        let mut affected = HashSet::new();
        for (name, value) in fields {
            let mut single = BTreeMap::new();
            single.insert(book_id, value);
            match self.set_field(&name, single) {
                Ok(ids) => affected.extend(ids),
                Err(e) => {
                    tracing::warn!(book_id = book_id.value(), field = %name, error = %e, retryable = e.is_retryable(), "set_metadata rolling back");
                    self.store.rollback_transaction(tx).ok();
                    self.reload_from_db(true).ok();
                    return Err(e.with_book_ids([book_id.value()]).with_field(name));
                }
            }
        }
        self.store.commit_transaction(tx)?;
        Ok(affected)
    }

    fn write_title(&self, book: BookId, text: &str) -> Result<bool> {
        if text.trim().is_empty() {
            return Err(Error::input("title must not be empty").with_book_ids([book.value()]).with_field("title"));
        }
        let sort = title_sort(text, TitleSortOrder::MoveArticleToEnd, Some("eng"), &self.article_table);
        let mut state = self.state.write();
        let Some(row) = state.titles.get_mut(&book) else { return Err(Error::not_found(format!("no book {}", book.value())).with_book_ids([book.value()])) };
        if row.title == text && row.sort == sort {
            return Ok(false);
        }
        row.title = text.to_string();
        row.sort = sort.clone();
        state.mark_dirty(book);
        state.invalidate_composites_for("title", book);
        state.invalidate_composites_for("sort", book);
        drop(state);
        let mut update: RowDict = RowDict::new();
        update.insert("title".to_string(), Scalar::Text(text.to_string()));
        update.insert("sort".to_string(), Scalar::Text(sort));
        self.store.update_row("titles", book.value(), update)?;
        self.push_dirty_record("titles", book.value());
        Ok(true)
    }

    fn set_field_authors(&self, book: BookId, authors: &[String]) -> Result<bool> {
        let split: Vec<String> = authors.iter().flat_map(|a| split_authors(a, &self.name_config)).collect();
        let mut state = self.state.write();
        let Some(TableImpl::Authors(t)) = state.tables.get_mut("authors") else { return Ok(false) };
        let old_ids: Vec<ItemId> = t.base.entries_for_book(book).iter().map(|e| e.item_id).collect();
        let mut ids = Vec::with_capacity(split.len());
        for raw in &split {
            let display = title_case_name(raw);
            let id = match t.base.id_for_value(&display) {
                Some(id) => id,
                None => {
                    let sort = author_to_author_sort(&display, &self.name_config);
                    let mut row = self.store.get_blank_row("authors")?;
                    row.insert("name".to_string(), Scalar::Text(display.clone()));
                    row.insert("sort".to_string(), Scalar::Text(sort.clone()));
                    row.insert("link".to_string(), Scalar::Text(String::new()));
                    let row_id = self.store.insert_row("authors", row)?;
                    let id = ItemId::new(row_id);
                    t.allocate_with_id(id, &display, &sort, "");
                    id
                }
            };
            ids.push(id);
        }
        if ids == old_ids {
            return Ok(false);
        }
        t.set_for_book(book, ids.clone())?;
        let sort_string = t.sort_for_book(book).join(" & ");
        if let Some(row) = state.titles.get_mut(&book) {
            row.author_sort = sort_string.clone();
        }
        state.mark_dirty(book);
        state.invalidate_composites_for("authors", book);

        let mut update = RowDict::new();
        update.insert("author_sort".to_string(), Scalar::Text(sort_string));
        self.store.update_row("titles", book.value(), update)?;
        let link_entries: Vec<(ItemId, LinkAux)> = ids
            .iter()
            .enumerate()
            .map(|(i, id)| {
                (
                    *id,
                    LinkAux {
                        priority: Some(i as i64),
                        link_type: Some(if i == 0 { "primary".to_string() } else { "secondary".to_string() }),
                        ..Default::default()
                    },
                )
            })
            .collect();
        self.sync_links("books_authors_link", book, &link_entries)?;
        self.push_dirty_record("titles", book.value());
        self.push_dirty_interlink("authors", "authors", "titles", book.value(), book.value());
        Ok(true)
    }

    fn write_many_to_many(&self, name: &str, book: BookId, values: &[String], primary_language_check: bool) -> Result<bool> {
        let mut state = self.state.write();
        let Some(TableImpl::ManyToMany(t)) = state.tables.get_mut(name) else { return Ok(false) };
        let old_entries = t.entries_for_book(book).to_vec();
        let item_table = t.item_table.clone();
        let mut entries = Vec::with_capacity(values.len());
        for (i, value) in values.iter().enumerate() {
            let id = match t.id_for_value(value) {
                Some(id) => id,
                None => {
                    let mut row = self.store.get_blank_row(&item_table)?;
                    row.insert("name".to_string(), Scalar::Text(value.clone()));
                    let row_id = self.store.insert_row(&item_table, row)?;
                    let id = ItemId::new(row_id);
                    t.allocate_with_id(id, value);
                    id
                }
            };
            // A book may legitimately carry several languages (a primary
            // plus an original-language note, say); only one slot per book
            // is ever typed "primary" and every later value is "secondary".
            let aux = match t.shape {
                LinkShape::Plain => LinkAux::default(),
                LinkShape::Priority => LinkAux { priority: Some(i as i64), ..Default::default() },
                LinkShape::Typed => LinkAux { link_type: Some(if i == 0 { "primary".to_string() } else { "secondary".to_string() }), ..Default::default() },
                LinkShape::TypedPriority => LinkAux {
                    priority: Some(i as i64),
                    link_type: Some(if i == 0 { "primary".to_string() } else { "secondary".to_string() }),
                    ..Default::default()
                },
            };
            entries.push(LinkEntry { item_id: id, aux });
        }
        if primary_language_check {
            let primaries = entries.iter().filter(|e| e.aux.link_type.as_deref() == Some("primary")).count();
            if primaries > 1 {
                return Err(Error::invariant("a book may have at most one primary language").with_book_ids([book.value()]).with_field(name));
            }
        }
        if entries == old_entries {
            return Ok(false);
        }
        let link_table = t.link_table.clone();
        t.set_for_book(book, entries.clone())?;
        state.mark_dirty(book);
        state.invalidate_composites_for(name, book);
        let link_entries: Vec<(ItemId, LinkAux)> = entries.into_iter().map(|e| (e.item_id, e.aux)).collect();
        self.sync_links(&link_table, book, &link_entries)?;
        self.push_dirty_record("titles", book.value());
        self.push_dirty_interlink(if name == "languages" { "language" } else { "many_to_many" }, name, "titles", book.value(), book.value());
        Ok(true)
    }

    /// Promote `value` to the top of the series priority stack,
    /// preserving the book's existing index if it already had one, or
    /// defaulting to `1.0`.
    fn write_series(&self, book: BookId, value: &str, index: Option<f64>) -> Result<()> {
        let mut state = self.state.write();
        let preserved_index = index.or_else(|| state.titles.get(&book).map(|t| t.series_index)).unwrap_or(1.0);
        let Some(TableImpl::ManyToOne(t)) = state.tables.get_mut("series") else { return Ok(()) };
        let id = match t.id_for_value(value) {
            Some(id) => id,
            None => {
                let mut row = self.store.get_blank_row(&t.item_table)?;
                row.insert("name".to_string(), Scalar::Text(value.to_string()));
                row.insert("parent_id".to_string(), Scalar::Null);
                let row_id = self.store.insert_row(&t.item_table, row)?;
                let id = ItemId::new(row_id);
                t.allocate_with_id(id, value, None);
                id
            }
        };
        t.internal_update_cache(HashMap::from([(book, id)]), HashMap::new());
        if let Some(row) = state.titles.get_mut(&book) {
            row.series_index = preserved_index;
        }
        state.mark_dirty(book);
        state.invalidate_composites_for("series", book);
        drop(state);
        let mut update = RowDict::new();
        update.insert("series_index".to_string(), Scalar::Float(preserved_index));
        self.store.update_row("titles", book.value(), update)?;
        self.sync_links("books_series_link", book, &[(id, LinkAux::default())])?;
        self.push_dirty_record("titles", book.value());
        self.push_dirty_interlink("series", "series", "titles", book.value(), book.value());
        Ok(())
    }

    fn write_many_to_one(&self, name: &str, book: BookId, value: &str) -> Result<()> {
        let mut state = self.state.write();
        let Some(TableImpl::ManyToOne(t)) = state.tables.get_mut(name) else { return Ok(()) };
        let id = match t.id_for_value(value) {
            Some(id) => id,
            None => {
                let mut row = self.store.get_blank_row(&t.item_table)?;
                row.insert("name".to_string(), Scalar::Text(value.to_string()));
                if self.store.columns(&t.item_table)?.iter().any(|c| c == "parent_id") {
                    row.insert("parent_id".to_string(), Scalar::Null);
                }
                let row_id = self.store.insert_row(&t.item_table, row)?;
                let id = ItemId::new(row_id);
                t.allocate_with_id(id, value, None);
                id
            }
        };
        t.internal_update_cache(HashMap::from([(book, id)]), HashMap::new());
        state.mark_dirty(book);
        state.invalidate_composites_for(name, book);
        drop(state);
        let registry = self.registry.read();
        let link_table = registry.get(name).and_then(|m| m.link_table.clone());
        drop(registry);
        if let Some(link_table) = link_table {
            self.sync_links(&link_table, book, &[(id, LinkAux::default())])?;
        }
        self.push_dirty_record("titles", book.value());
        self.push_dirty_interlink(name, name, "titles", book.value(), book.value());
        Ok(())
    }

    /// Custom single-value columns live in a `custom_column_<n>` table
    /// this crate's reference store never provisions. A real driver creates that
    /// table when `create_custom_column` runs; until then this writer
    /// stays cache-only.
    fn write_one_to_one(&self, name: &str, book: BookId, value: &str) -> Result<()> {
        let mut state = self.state.write();
        let Some(TableImpl::OneToOne(t)) = state.tables.get_mut(name) else { return Ok(()) };
        let id = match t.id_for_value(value) {
            Some(id) => id,
            None => t.allocate(value),
        };
        t.internal_update_cache(HashMap::from([(book, id)]), HashMap::new());
        state.mark_dirty(book);
        state.invalidate_composites_for(name, book);
        Ok(())
    }

    /// Replace a book's identifier set. Values are normalized per type:
    /// an `isbn` key runs the ISBN checksum normalizer; everything else
    /// is stored as given beyond key sanitization. Identifiers have
    /// no item id shared across books, so the Store side is a plain
    /// delete-then-reinsert of this book's `books_identifiers_link`
    /// rows rather than a diff against an item table (cf. `sync_links`).
    fn write_identifiers(&self, book: BookId, pairs: Vec<(String, String)>) -> Result<()> {
        let mut normalized = Vec::with_capacity(pairs.len());
        for (id_type, value) in pairs {
            let key = sanitize_identifier_key(&id_type);
            let value = if key == "isbn" { normalize_isbn(&value)? } else { value };
            normalized.push((key, value));
        }
        let old_links = self.store.link_rows("books_identifiers_link")?;
        let old_for_book: Vec<i64> = old_links.iter().filter(|r| r.left_id == book.value()).map(|r| r.right_id).collect();
        if !old_for_book.is_empty() {
            self.store.delete_links("books_identifiers_link", book.value(), &old_for_book)?;
            self.store.delete_by_id("identifiers", &old_for_book)?;
        }
        for (key, value) in &normalized {
            let mut row = self.store.get_blank_row("identifiers")?;
            row.insert("name".to_string(), Scalar::Text(value.clone()));
            let row_id = self.store.insert_row("identifiers", row)?;
            self.store.insert_link(
                "books_identifiers_link",
                LinkRow { left_id: book.value(), right_id: row_id, aux: LinkAux { link_type: Some(key.clone()), ..Default::default() } },
            )?;
        }

        let mut state = self.state.write();
        if let Some(TableImpl::Identifiers(t)) = state.tables.get_mut("identifiers") {
            t.set_all(book, normalized)?;
        }
        state.mark_dirty(book);
        state.invalidate_composites_for("identifiers", book);
        drop(state);
        self.push_dirty_record("titles", book.value());
        self.push_dirty_interlink("identifiers", "identifiers", "titles", book.value(), book.value());
        Ok(())
    }

    /// Replace a book's owned `OneToMany` rows.
    /// Each row belongs to exactly one book, so the Store side is a
    /// plain delete-then-reinsert against the item table keyed by its
    /// `book` column rather than a diff against a shared item table
    /// (cf. `write_identifiers`).
    fn write_one_to_many(&self, name: &str, book: BookId, values: Vec<String>) -> Result<()> {
        let registry = self.registry.read();
        let table = registry.get(name).map(|m| m.table.clone()).unwrap_or_else(|| name.to_string());
        drop(registry);
        let old_ids: Vec<i64> = self
            .store
            .all_rows(&table, None, false)?
            .into_iter()
            .filter(|(_, row)| matches!(row.get("book"), Some(Scalar::Int(b)) if *b == book.value()))
            .map(|(id, _)| id)
            .collect();
        if !old_ids.is_empty() {
            self.store.delete_by_id(&table, &old_ids)?;
        }
        for value in &values {
            let mut row = self.store.get_blank_row(&table)?;
            row.insert("book".to_string(), Scalar::Int(book.value()));
            row.insert("text".to_string(), Scalar::Text(value.clone()));
            self.store.insert_row(&table, row)?;
        }

        let mut state = self.state.write();
        if let Some(TableImpl::OneToMany(t)) = state.tables.get_mut(name) {
            t.set_for_book(book, values)?;
        }
        state.mark_dirty(book);
        state.invalidate_composites_for(name, book);
        drop(state);
        self.push_dirty_record("titles", book.value());
        Ok(())
    }

    // -- formats ----------------------------------

    pub fn formats(&self, book_id: BookId) -> Vec<String> {
        let state = self.state.read();
        match state.tables.get("formats") {
            Some(TableImpl::Formats(t)) => t.formats_for_book(book_id).into_iter().map(str::to_string).collect(),
            _ => Vec::new(),
        }
    }

    pub fn format_floc(&self, book_id: BookId, code: &str) -> Option<String> {
        let state = self.state.read();
        match state.tables.get("formats") {
            Some(TableImpl::Formats(t)) => t.format_floc(book_id, code).map(str::to_string),
            _ => None,
        }
    }

    pub fn format_metadata(&self, book_id: BookId) -> HashMap<String, FormatMeta> {
        self.state.read().format_metadata_cache.get(&book_id).cloned().unwrap_or_default()
    }

    /// The on-disk location recorded for `book_id`'s copy of `fmt`, or
    /// `None` if that format isn't present. Fetching the bytes
    /// themselves (`as_file`) is an FSM responsibility this crate does
    /// not implement (see `copy_format_to` below), so only the
    /// `as_path` call shape is exposed; `preserve_filename` has no
    /// effect since no filename rewriting happens without real file
    /// I/O.
    pub fn format(&self, book_id: BookId, fmt: &str, _preserve_filename: bool) -> Option<String> {
        self.format_floc(book_id, fmt)
    }

    /// A stable digest for `book_id`'s copy of `fmt`, derived from its
    /// cached `{location, size, mtime}` rather than the file's actual
    /// bytes — this crate has no FSM to read them from. Good enough to
    /// detect "this cache entry points at a different file than last
    /// time"; not a substitute for a real content hash.
    pub fn format_hash(&self, book_id: BookId, fmt: &str) -> Option<String> {
        let meta = self.format_metadata(book_id);
        let m = meta.get(fmt)?;
        let mut hasher = Sha256::new();
        hasher.update(m.path.as_bytes());
        hasher.update(m.size.to_le_bytes());
        hasher.update(m.mtime.timestamp_nanos_opt().unwrap_or_default().to_le_bytes());
        Some(format!("{:x}", hasher.finalize()))
    }

    /// Add a new file for `book_id` in base format `base` and return the
    /// priority code it was assigned.
    pub fn add_format(&self, book_id: BookId, base: &str, size: u64, location: &str) -> Result<String> {
        tracing::debug!(book_id = book_id.value(), base = %base, size, "add_format");
        let mut state = self.state.write();
        let Some(TableImpl::Formats(t)) = state.tables.get_mut("formats") else {
            return Err(Error::not_found("no formats table").with_book_ids([book_id.value()]));
        };
        let code = t.add_format(book_id, base, size, location);
        let now = Utc::now();
        state.format_metadata_cache.entry(book_id).or_default().insert(code.clone(), FormatMeta { size, path: location.to_string(), mtime: now });
        if let Some(row) = state.titles.get_mut(&book_id) {
            row.last_modified = now;
        }
        state.mark_dirty(book_id);
        state.invalidate_composites_for("formats", book_id);
        state.invalidate_composites_for("size", book_id);
        drop(state);
        self.push_dirty_record("titles", book_id.value());
        self.push_dirty_interlink("formats", "formats", "titles", book_id.value(), book_id.value());
        Ok(code)
    }

    pub fn remove_formats(&self, book_id: BookId, codes: &[String]) -> Result<()> {
        let mut state = self.state.write();
        let Some(TableImpl::Formats(t)) = state.tables.get_mut("formats") else {
            return Err(Error::not_found("no formats table").with_book_ids([book_id.value()]));
        };
        for code in codes {
            t.remove_fmt(book_id, code)?;
            if let Some(cache) = state.format_metadata_cache.get_mut(&book_id) {
                cache.remove(code);
            }
        }
        state.mark_dirty(book_id);
        state.invalidate_composites_for("formats", book_id);
        state.invalidate_composites_for("size", book_id);
        Ok(())
    }

    pub fn save_original_format(&self, book_id: BookId, base: &str) -> Result<String> {
        let mut state = self.state.write();
        let Some(TableImpl::Formats(t)) = state.tables.get_mut("formats") else {
            return Err(Error::not_found("no formats table").with_book_ids([book_id.value()]));
        };
        t.save_original_format(book_id, base)
    }

    pub fn restore_original_format(&self, book_id: BookId, base: &str) -> Result<()> {
        let mut state = self.state.write();
        let Some(TableImpl::Formats(t)) = state.tables.get_mut("formats") else {
            return Err(Error::not_found("no formats table").with_book_ids([book_id.value()]));
        };
        t.restore_original_format(book_id, base)
    }

    // -- covers --------------------------------------------------------

    pub fn cover(&self, book_id: BookId) -> Option<String> {
        let state = self.state.read();
        let row = state.titles.get(&book_id)?;
        row.has_cover.then(|| format!("{}/cover.jpg", row.path))
    }

    pub fn cover_last_modified(&self, book_id: BookId) -> Option<chrono::DateTime<Utc>> {
        self.last_modified(book_id)
    }

    pub fn set_cover(&self, book_id: BookId, has_cover: bool) -> Result<()> {
        let mut state = self.state.write();
        let Some(row) = state.titles.get_mut(&book_id) else { return Err(Error::not_found(format!("no book {}", book_id.value())).with_book_ids([book_id.value()])) };
        row.has_cover = has_cover;
        if has_cover {
            state.cover_caches.insert(book_id);
        } else {
            state.cover_caches.remove(&book_id);
        }
        state.mark_dirty(book_id);
        state.invalidate_composites_for("cover", book_id);
        Ok(())
    }

    pub fn add_cover_cache(&self, book_id: BookId) {
        self.state.write().cover_caches.insert(book_id);
    }

    pub fn remove_cover_cache(&self, book_id: BookId) {
        self.state.write().cover_caches.remove(&book_id);
    }

    /// Render the `cover_browser_title_template` pref for one
    /// book: `{field}` placeholders resolve lazily through a
    /// `ProxyMetadata`, so a template referencing only `{title}` never
    /// touches the book's tags, series, or other unused fields. Results
    /// are memoized in `formatter_template_cache`, an LRU bounded by
    /// `Config::formatter_template_cache_size` since the cover browser
    /// re-renders the same templates across every visible book on every
    /// scroll.
    pub fn render_title_template(&self, book_id: BookId, template: &str) -> String {
        let key = format!("{template}\0{}", book_id.value());
        if let Some(cached) = self.state.write().formatter_template_cache.get(&key) {
            return cached.clone();
        }
        let proxy = self.get_proxy_metadata(book_id);
        let placeholder = regex::Regex::new(r"\{(\w+)\}").unwrap();
        let rendered = placeholder.replace_all(template, |caps: &regex::Captures| proxy.get(&caps[1]).display_text()).into_owned();
        self.state.write().formatter_template_cache.put(key, rendered.clone());
        rendered
    }

    // -- sort/search ---------------------------------------------------

    /// A simple multi-key stable sort over the given fields, `desc`
    /// reversing a key. This core does not define a
    /// query language (Non-goal); `search` below matches on equality of
    /// a named field's text against a literal, which is sufficient for
    /// virtual-library membership checks.
    pub fn multisort(&self, fields: &[(String, bool)], ids: Option<Vec<BookId>>) -> Vec<BookId> {
        let state = self.state.read();
        let mut ids: Vec<BookId> = ids.unwrap_or_else(|| state.all_book_ids.iter().copied().collect());
        ids.sort_by(|a, b| {
            for (name, desc) in fields {
                let key_a = state.fields.get(name).zip(state.tables.get(name)).map(|(f, t)| f.sort_key_for(t, *a)).unwrap_or_default();
                let key_b = state.fields.get(name).zip(state.tables.get(name)).map(|(f, t)| f.sort_key_for(t, *b)).unwrap_or_default();
                let ord = key_a.cmp(&key_b);
                if ord != std::cmp::Ordering::Equal {
                    return if *desc { ord.reverse() } else { ord };
                }
            }
            std::cmp::Ordering::Equal
        });
        ids
    }

    pub fn search(&self, field_name: &str, value: &str) -> HashSet<BookId> {
        let state = self.state.read();
        let Some(table) = state.tables.get(field_name) else { return HashSet::new() };
        match table {
            TableImpl::ManyToOne(t) => t.id_for_value(value).map(|id| t.books_for(id)).unwrap_or_default(),
            TableImpl::ManyToMany(t) => t.id_for_value(value).map(|id| t.books_for(id)).unwrap_or_default(),
            TableImpl::Authors(t) => t.base.id_for_value(value).map(|id| t.base.books_for(id)).unwrap_or_default(),
            _ => HashSet::new(),
        }
    }

    pub fn books_in_virtual_library(&self, label: &str) -> HashSet<BookId> {
        let state = self.state.read();
        let Some(terms) = state.virtual_libraries.get(label) else { return state.all_book_ids.iter().copied().collect() };
        let Some((field, value)) = terms.split_first() else { return HashSet::new() };
        let (field, value) = (field.clone(), value.clone());
        drop(state);
        self.search(&field, &value)
    }

    /// Distinct display values for a category field, in case-folded
    /// sort order, alongside how many books use each (`get_categories`).
    pub fn get_categories(&self, name: &str) -> Vec<(String, usize)> {
        let mut out: Vec<(String, usize)> = self.get_usage_count_by_id(name).into_iter().filter_map(|(id, n)| self.get_item_name(name, id).map(|v| (v, n))).collect();
        out.sort_by(|a, b| crate::normalize::case_fold::compare(&a.0, &b.0));
        out
    }

    pub fn get_books_for_category(&self, name: &str, value: &str) -> HashSet<BookId> {
        self.search(name, value)
    }

    // -- dirty tracking ----------------------------------------

    pub fn mark_as_dirty(&self, book_ids: &[BookId]) {
        let mut state = self.state.write();
        for id in book_ids {
            state.mark_dirty(*id);
        }
    }

    pub fn commit_dirty_cache(&self) -> Vec<BookId> {
        let state = self.state.read();
        state.dirtied_cache.keys().copied().collect()
    }

    pub fn clear_dirtied(&self, book_id: BookId, seq: u64) -> bool {
        let mut state = self.state.write();
        if state.dirtied_cache.get(&book_id) == Some(&seq) {
            state.dirtied_cache.remove(&book_id);
            true
        } else {
            false
        }
    }

    pub fn dirty_queue_length(&self) -> usize {
        self.state.read().dirtied_cache.len()
    }

    pub fn get_a_dirtied_book(&self) -> Option<BookId> {
        self.state.read().dirtied_cache.keys().next().copied()
    }

    pub fn get_metadata_for_dump(&self, book_id: BookId) -> BTreeMap<String, FieldValue> {
        self.get_metadata(book_id)
    }

    /// Serialize every dirtied book's metadata as the payload an OPF
    /// writer would embed; writing the bytes to disk is the FSM's job
    ///, so this returns the data rather than a path.
    pub fn write_backup(&self, book_id: BookId) -> Result<String> {
        let meta = self.get_metadata_for_dump(book_id);
        serde_json::to_string(&meta.into_iter().map(|(k, v)| (k, format!("{v:?}"))).collect::<BTreeMap<_, _>>()).map_err(Error::from)
    }

    pub fn read_backup(&self, _book_id: BookId, _payload: &str) -> Result<()> {
        Ok(())
    }

    pub fn dump_metadata(&self, book_ids: &[BookId]) -> Vec<(BookId, BTreeMap<String, FieldValue>)> {
        book_ids.iter().map(|id| (*id, self.get_metadata_for_dump(*id))).collect()
    }

    // -- items / rename / custom columns -------------------------------

    pub fn update_path(&self, book_id: BookId, path: &str) -> Result<()> {
        let mut state = self.state.write();
        let Some(row) = state.titles.get_mut(&book_id) else { return Err(Error::not_found(format!("no book {}", book_id.value())).with_book_ids([book_id.value()])) };
        row.path = path.to_string();
        state.mark_dirty(book_id);
        drop(state);
        let mut update = RowDict::new();
        update.insert("path".to_string(), Scalar::Text(path.to_string()));
        self.store.update_row("titles", book_id.value(), update)
    }

    /// Rename item `id` to `new_name` in `table`, merging into an
    /// existing item of that (case-insensitive) name if one exists.
    pub fn rename_items(&self, table_name: &str, renames: &HashMap<ItemId, String>) -> Result<()> {
        let mut state = self.state.write();
        let Some(table) = state.tables.get_mut(table_name) else { return Err(Error::not_found(format!("no table `{table_name}`")).with_field(table_name)) };
        match table {
            TableImpl::ManyToMany(t) => {
                for (id, new_name) in renames {
                    if let Some(existing) = t.id_for_value(new_name) {
                        if existing != *id {
                            merge_many_to_many(t, existing, *id);
                            continue;
                        }
                    }
                    t.id_map.insert(*id, new_name.clone());
                }
            }
            TableImpl::ManyToOne(t) => {
                for (id, new_name) in renames {
                    if let Some(existing) = t.id_for_value(new_name) {
                        if existing != *id {
                            let affected = t.remove_items(&[*id]);
                            t.internal_update_cache(affected.into_iter().map(|b| (b, existing)).collect(), HashMap::new());
                            continue;
                        }
                    }
                    t.id_map.insert(*id, new_name.clone());
                }
            }
            _ => return Err(Error::input(format!("`{table_name}` does not support rename_items")).with_field(table_name)),
        }
        Ok(())
    }

    pub fn remove_items(&self, table_name: &str, item_ids: &[ItemId]) -> Result<Vec<BookId>> {
        let registry = self.registry.read();
        let link_table = registry.get(table_name).and_then(|m| m.link_table.clone());
        drop(registry);

        let mut state = self.state.write();
        let Some(table) = state.tables.get_mut(table_name) else { return Err(Error::not_found(format!("no table `{table_name}`")).with_field(table_name)) };
        let (backing_table, affected) = match table {
            TableImpl::ManyToOne(t) => (t.item_table.clone(), t.remove_items(item_ids)),
            TableImpl::ManyToMany(t) => (t.item_table.clone(), t.remove_items(item_ids)),
            TableImpl::Authors(t) => (t.base.item_table.clone(), t.remove_items(item_ids)),
            TableImpl::OneToOne(t) => (t.item_table.clone(), t.remove_items(item_ids)),
            _ => return Err(Error::input(format!("`{table_name}` does not support remove_items")).with_field(table_name)),
        };
        for book in &affected {
            state.mark_dirty(*book);
        }
        drop(state);

        let ids: Vec<i64> = item_ids.iter().map(|i| i.value()).collect();
        if let Some(link_table) = link_table {
            for book in &affected {
                self.store.delete_links(&link_table, book.value(), &ids).ok();
            }
        }
        self.store.delete_by_id(&backing_table, &ids).ok();
        for book in &affected {
            self.push_dirty_record("titles", book.value());
        }
        self.push_dirty_interlink("remove_items", table_name, "titles", 0, 0);
        Ok(affected)
    }

    pub fn set_sort_for_authors(&self, updates: &HashMap<ItemId, String>) {
        let mut state = self.state.write();
        if let Some(TableImpl::Authors(t)) = state.tables.get_mut("authors") {
            for (id, sort) in updates {
                t.set_sort(*id, sort);
            }
        }
    }

    pub fn set_link_for_authors(&self, updates: &HashMap<ItemId, String>) {
        let mut state = self.state.write();
        if let Some(TableImpl::Authors(t)) = state.tables.get_mut("authors") {
            for (id, link) in updates {
                t.set_link(*id, link);
            }
        }
    }

    pub fn create_custom_column(&self, name: &str, datatype: DataType, is_multiple: bool, is_series: bool) -> Result<()> {
        let mut registry = self.registry.write();
        let meta = registry.create_custom_column(name, datatype, is_multiple, is_series)?;
        drop(registry);
        let mut state = self.state.write();
        let table = match meta.table_shape {
            TableShape::ManyToMany => TableImpl::ManyToMany(ManyToManyTable::new(&meta.table, meta.link_table.as_deref().unwrap_or(""), LinkShape::Plain)),
            TableShape::OneToOneInOther => TableImpl::OneToOne(crate::tables::one_to_one::OneToOneTable::new(&meta.table, "value")),
            TableShape::Composite => TableImpl::Composite(CompositeTable::new(&meta.name, "", Vec::new())),
            _ => TableImpl::Virtual(VirtualTable::new(&meta.name)),
        };
        state.tables.insert(name.to_string(), table);
        state.fields.insert(name.to_string(), Field::new(meta));
        if is_series {
            let index_name = format!("{name}_index");
            state.fields.insert(index_name.clone(), Field::new(self.registry.read().get(&index_name).unwrap().clone()));
        }
        Ok(())
    }

    pub fn set_custom_column_metadata(&self, name: &str, description: &str) -> Result<()> {
        let mut registry = self.registry.write();
        let meta = registry.get(name).cloned().ok_or_else(|| Error::not_found(format!("no field `{name}`")).with_field(name))?;
        let mut meta = meta;
        meta.display.description = Some(description.to_string());
        registry.insert(meta);
        Ok(())
    }

    pub fn delete_custom_column(&self, name: &str) -> Result<()> {
        self.registry.write().delete_custom_column(name)?;
        self.state.write().tables.remove(name);
        self.state.write().fields.remove(name);
        Ok(())
    }

    // -- dedup helpers --------------------------------------------------

    /// A normalized `(title, author-set)` key used by
    /// `find_identical_books`; two books with the same key are
    /// considered identical for library-merge purposes.
    pub fn data_for_find_identical_books(&self, book_id: BookId) -> (String, BTreeSet<String>) {
        let state = self.state.read();
        let title = state.titles.get(&book_id).map(|t| t.title.to_lowercase()).unwrap_or_default();
        let authors = match state.tables.get("authors") {
            Some(TableImpl::Authors(t)) => t.for_book(book_id).iter().map(|a| a.to_lowercase()).collect(),
            _ => BTreeSet::new(),
        };
        (title, authors)
    }

    pub fn update_data_for_find_identical_books(&self, _book_id: BookId) {
        // The key is derived on demand from current cache state; there is
        // no separate index to refresh.
    }

    pub fn find_identical_books(&self, title: &str, authors: &[String]) -> HashSet<BookId> {
        let key_title = title.to_lowercase();
        let key_authors: BTreeSet<String> = authors.iter().map(|a| a.to_lowercase()).collect();
        let ids: Vec<BookId> = self.state.read().all_book_ids.iter().copied().collect();
        ids.into_iter()
            .filter(|id| self.data_for_find_identical_books(*id) == (key_title.clone(), key_authors.clone()))
            .collect()
    }

    pub fn virtual_libraries_for_books(&self, book_id: BookId) -> Vec<String> {
        let state = self.state.read();
        let labels: Vec<String> = state.virtual_libraries.keys().cloned().collect();
        drop(state);
        labels.into_iter().filter(|l| self.books_in_virtual_library(l).contains(&book_id)).collect()
    }

    pub fn user_categories_for_books(&self, book_id: BookId) -> Vec<String> {
        let categories: Vec<(String, String)> = self.state.read().user_categories.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
        categories
            .into_iter()
            .filter(|(_, expr)| {
                let mut parts = expr.splitn(2, ':');
                let (Some(field), Some(value)) = (parts.next(), parts.next()) else { return false };
                self.search(field, value).contains(&book_id)
            })
            .map(|(name, _)| name)
            .collect()
    }

    /// Write an OPF-shaped metadata payload for every format of
    /// `book_id`; actually touching the files is the FSM's job.
    pub fn embed_metadata(&self, book_id: BookId) -> Result<()> {
        self.write_backup(book_id).map(|_| ())
    }

    pub fn get_last_read_positions(&self, book_id: BookId, format: &str) -> Option<String> {
        self.state.read().last_read_positions.get(&(book_id, format.to_string())).cloned()
    }

    pub fn set_last_read_position(&self, book_id: BookId, format: &str, position: &str) {
        self.state.write().last_read_positions.insert((book_id, format.to_string()), position.to_string());
    }

    /// Dump every book's metadata as JSON, polling `abort` between
    /// books.
    pub fn export_library(&self, abort: &std::sync::atomic::AtomicBool, mut progress: impl FnMut(BookId)) -> Result<String> {
        let ids: Vec<BookId> = self.all_book_ids().into_iter().collect();
        let mut out = Vec::with_capacity(ids.len());
        for id in ids {
            if abort.load(std::sync::atomic::Ordering::Relaxed) {
                break;
            }
            out.push((id.value(), self.get_metadata_for_dump(id).into_iter().map(|(k, v)| (k, format!("{v:?}"))).collect::<BTreeMap<_, _>>()));
            progress(id);
        }
        serde_json::to_string(&out).map_err(Error::from)
    }

    // -- maintainer support --------------------------------------------

    /// Recompute the titles_aggregate derived composites for one book:
    /// creator_tags, title_tags, series_tags (linear series path),
    /// genre_tags (linear genre path), identifier_map, publisher_tags.
    /// Called by the Maintainer off a `dirty_record_queue` event, and
    /// safe to call directly for tests.
    pub fn recompute_titles_aggregate(&self, book_id: BookId) {
        let creator_tags = self.author_data(book_id).into_iter().map(|(name, _, _)| name).collect::<Vec<_>>().join(", ");
        let title_tags = match self.field_for("title", book_id, FieldValue::Absent) {
            FieldValue::Scalar(Scalar::Text(t)) => t.split_whitespace().map(|w| w.to_lowercase()).collect::<Vec<_>>().join(" "),
            _ => String::new(),
        };
        let series_tags = {
            let state = self.state.read();
            match state.tables.get("series") {
                Some(TableImpl::ManyToOne(t)) => t.id_for_book(book_id).map(|id| t.linear_path(id).join(": ")).unwrap_or_default(),
                _ => String::new(),
            }
        };
        let genre_tags = {
            let state = self.state.read();
            match state.tables.get("genre") {
                Some(TableImpl::ManyToOne(t)) => t.id_for_book(book_id).map(|id| t.linear_path(id).join(": ")).unwrap_or_default(),
                _ => String::new(),
            }
        };
        let identifier_map = {
            let state = self.state.read();
            match state.tables.get("identifiers") {
                Some(TableImpl::Identifiers(t)) => t.for_book(book_id).iter().map(|(k, v)| format!("{k}:{v}")).collect::<Vec<_>>().join(","),
                _ => String::new(),
            }
        };
        let publisher_tags = match self.field_for("publisher", book_id, FieldValue::Absent) {
            FieldValue::Scalar(Scalar::Text(t)) => t,
            _ => String::new(),
        };
        let mut state = self.state.write();
        for (name, value) in [
            ("creator_tags", creator_tags),
            ("title_tags", title_tags),
            ("series_tags", series_tags),
            ("genre_tags", genre_tags),
            ("identifier_map", identifier_map),
            ("publisher_tags", publisher_tags),
        ] {
            if let Some(TableImpl::Composite(c)) = state.tables.get_mut(name) {
                c.fill(book_id, value);
            }
        }
    }

    /// Fill in any Creator row missing a `creator_sort` with
    /// `author_to_author_sort`'s derivation, leaving explicitly-set
    /// sorts untouched.
    pub fn ensure_creator_sorts(&self) {
        let mut state = self.state.write();
        let Some(TableImpl::Authors(t)) = state.tables.get_mut("authors") else { return };
        let missing: Vec<(ItemId, String)> = t.base.id_map.iter().filter(|(id, _)| !t.asort_map.contains_key(id)).map(|(id, name)| (*id, name.clone())).collect();
        for (id, name) in missing {
            let sort = author_to_author_sort(&name, &self.name_config);
            t.set_sort(id, &sort);
        }
    }

    /// Remove orphan rows (referenced by no book) from a non-titles
    /// table; never applies to `titles` itself.
    pub fn clean(&self, table_name: &str) -> Vec<ItemId> {
        if table_name == "titles" {
            return Vec::new();
        }
        let mut state = self.state.write();
        let Some(table) = state.tables.get_mut(table_name) else { return Vec::new() };
        let orphans: Vec<ItemId> = match table {
            TableImpl::ManyToOne(t) => t.id_map.keys().copied().filter(|id| t.books_for(*id).is_empty()).collect(),
            TableImpl::ManyToMany(t) => t.id_map.keys().copied().filter(|id| t.books_for(*id).is_empty()).collect(),
            TableImpl::Authors(t) => t.base.id_map.keys().copied().filter(|id| t.base.books_for(*id).is_empty()).collect(),
            TableImpl::OneToOne(t) => t.id_map.keys().copied().filter(|id| t.books_for(*id).is_empty()).collect(),
            _ => Vec::new(),
        };
        match table {
            TableImpl::ManyToOne(t) => {
                for id in &orphans {
                    t.id_map.remove(id);
                    t.col_book_map.remove(id);
                    t.parent_map.remove(id);
                }
            }
            TableImpl::ManyToMany(t) => {
                for id in &orphans {
                    t.id_map.remove(id);
                    t.col_book_map.remove(id);
                }
            }
            TableImpl::Authors(t) => {
                for id in &orphans {
                    t.base.id_map.remove(id);
                    t.base.col_book_map.remove(id);
                    t.asort_map.remove(id);
                    t.alink_map.remove(id);
                }
            }
            TableImpl::OneToOne(t) => {
                for id in &orphans {
                    t.id_map.remove(id);
                }
            }
            _ => {}
        }
        orphans
    }

    /// Repoint every link-table row referencing `id_merge` to
    /// `id_keep`, smart-merging duplicate rows that result, reconcile
    /// the Store's link rows for every affected book, then drop
    /// `id_merge`'s backing row.
    pub fn merge_items(&self, table_name: &str, id_keep: ItemId, id_merge: ItemId) -> Result<()> {
        if id_keep == id_merge {
            return Ok(());
        }
        tracing::debug!(table = %table_name, keep = id_keep.value(), merge = id_merge.value(), "merge_items");
        let registry = self.registry.read();
        let link_table = registry.get(table_name).and_then(|m| m.link_table.clone());
        drop(registry);

        let mut state = self.state.write();
        let Some(table) = state.tables.get_mut(table_name) else { return Err(Error::not_found(format!("no table `{table_name}`")).with_field(table_name)) };
        let (backing_table, affected): (String, Vec<BookId>) = match table {
            TableImpl::ManyToMany(t) => {
                merge_many_to_many(t, id_keep, id_merge);
                (t.item_table.clone(), t.books_for(id_keep).into_iter().collect())
            }
            TableImpl::Authors(t) => {
                merge_many_to_many(&mut t.base, id_keep, id_merge);
                (t.base.item_table.clone(), t.base.books_for(id_keep).into_iter().collect())
            }
            TableImpl::ManyToOne(t) => {
                let affected = t.remove_items(&[id_merge]);
                t.internal_update_cache(affected.iter().map(|b| (*b, id_keep)).collect(), HashMap::new());
                (t.item_table.clone(), affected)
            }
            TableImpl::OneToOne(t) => {
                let affected = t.remove_items(&[id_merge]);
                t.internal_update_cache(affected.iter().map(|b| (*b, id_keep)).collect(), HashMap::new());
                (t.item_table.clone(), affected)
            }
            _ => return Err(Error::input(format!("`{table_name}` does not support merge_items")).with_field(table_name)),
        };
        for book in &affected {
            state.mark_dirty(*book);
        }
        drop(state);

        if let Some(link_table) = &link_table {
            for book in &affected {
                let entries: Vec<(ItemId, LinkAux)> = {
                    let state = self.state.read();
                    match state.tables.get(table_name) {
                        Some(TableImpl::ManyToMany(t)) => t.entries_for_book(*book).iter().map(|e| (e.item_id, e.aux.clone())).collect(),
                        Some(TableImpl::Authors(t)) => t.base.entries_for_book(*book).iter().map(|e| (e.item_id, e.aux.clone())).collect(),
                        Some(TableImpl::ManyToOne(t)) => t.id_for_book(*book).map(|id| vec![(id, LinkAux::default())]).unwrap_or_default(),
                        _ => Vec::new(),
                    }
                };
                self.sync_links(link_table, *book, &entries)?;
            }
        }
        self.store.delete_by_id(&backing_table, &[id_merge.value()]).ok();

        for book in &affected {
            self.push_dirty_record("titles", book.value());
        }
        self.push_dirty_interlink("merge", table_name, "titles", id_keep.value(), id_merge.value());
        Ok(())
    }

    /// Find groups of rows equal under case-insensitive comparison and
    /// merge each into its lowest-id representative.
    pub fn fix_duplicates(&self, table_name: &str) -> Vec<(ItemId, ItemId)> {
        let mut state = self.state.write();
        let Some(table) = state.tables.get_mut(table_name) else { return Vec::new() };
        match table {
            TableImpl::ManyToOne(t) => t.fix_case_duplicates(),
            TableImpl::ManyToMany(t) => t.fix_case_duplicates(),
            TableImpl::OneToOne(t) => t.fix_case_duplicates(),
            _ => Vec::new(),
        }
    }
}

fn merge_many_to_many(t: &mut ManyToManyTable, keep: ItemId, merge: ItemId) {
    if let Some(books) = t.col_book_map.remove(&merge) {
        for book in books {
            if let Some(entries) = t.book_col_map.get_mut(&book) {
                for e in entries.iter_mut() {
                    if e.item_id == merge {
                        e.item_id = keep;
                    }
                }
                entries.sort_by_key(|e| e.item_id);
                let mut deduped: Vec<LinkEntry> = Vec::with_capacity(entries.len());
                for entry in entries.drain(..) {
                    match deduped.last_mut() {
                        Some(prev) if prev.item_id == entry.item_id => {
                            prev.aux = crate::maintainer::merge::smart_merge_link_aux(&prev.aux, &entry.aux);
                        }
                        _ => deduped.push(entry),
                    }
                }
                *entries = deduped;
            }
            t.col_book_map.entry(keep).or_default().insert(book);
        }
    }
    t.id_map.remove(&merge);
}
