use crate::core::types::BookId;
use crate::fields::Field;
use crate::tables::TableImpl;
use chrono::{DateTime, Utc};
use lru::LruCache;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::num::NonZeroUsize;

/// The scalar columns that in the source schema live directly on the
/// titles/books row rather than in a satellite table. Bundled into one
/// struct per book for locality.
#[derive(Debug, Clone)]
pub struct TitleRow {
    pub title: String,
    pub sort: String,
    pub author_sort: String,
    pub series_index: f64,
    pub timestamp: DateTime<Utc>,
    pub pubdate: Option<DateTime<Utc>>,
    pub uuid: String,
    pub path: String,
    pub last_modified: DateTime<Utc>,
    pub has_cover: bool,
}

impl TitleRow {
    pub fn new(title: String, uuid: String, now: DateTime<Utc>) -> Self {
        TitleRow {
            title,
            sort: String::new(),
            author_sort: String::new(),
            series_index: 1.0,
            timestamp: now,
            pubdate: None,
            uuid,
            path: String::new(),
            last_modified: now,
            has_cover: false,
        }
    }
}

/// Cached facts about one on-disk format slot, mirroring what the FSM
/// would report.
#[derive(Debug, Clone)]
pub struct FormatMeta {
    pub size: u64,
    pub path: String,
    pub mtime: DateTime<Utc>,
}

/// Everything the Cache Controller mutates under its single write lock.
/// `CacheController` wraps exactly one `RwLock<CacheState>`;
/// nothing here is independently lockable.
pub struct CacheState {
    pub tables: HashMap<String, TableImpl>,
    pub fields: HashMap<String, Field>,
    pub all_book_ids: BTreeSet<BookId>,
    pub titles: HashMap<BookId, TitleRow>,
    pub uuid_index: HashMap<String, BookId>,
    pub dirtied_cache: BTreeMap<BookId, u64>,
    pub dirtied_sequence: u64,
    pub cover_caches: HashSet<BookId>,
    pub format_metadata_cache: HashMap<BookId, HashMap<String, FormatMeta>>,
    /// Rendered `cover_browser_title_template` output, keyed by
    /// `"{template}\0{book_id}"`. Bounded by
    /// `Config::formatter_template_cache_size` rather than left to grow
    /// unboundedly, since a library's cover browser re-renders the same
    /// handful of templates across every visible book on every scroll.
    pub formatter_template_cache: LruCache<String, String>,
    pub user_categories: BTreeMap<String, String>,
    pub virtual_libraries: BTreeMap<String, Vec<String>>,
    pub last_read_positions: HashMap<(BookId, String), String>,
    next_book_id: i64,
}

impl CacheState {
    pub fn new() -> Self {
        Self::with_template_cache_size(1_000)
    }

    pub fn with_template_cache_size(capacity: usize) -> Self {
        CacheState {
            tables: HashMap::new(),
            fields: HashMap::new(),
            all_book_ids: BTreeSet::new(),
            titles: HashMap::new(),
            uuid_index: HashMap::new(),
            dirtied_cache: BTreeMap::new(),
            dirtied_sequence: 0,
            cover_caches: HashSet::new(),
            format_metadata_cache: HashMap::new(),
            formatter_template_cache: LruCache::new(NonZeroUsize::new(capacity.max(1)).unwrap()),
            user_categories: BTreeMap::new(),
            virtual_libraries: BTreeMap::new(),
            last_read_positions: HashMap::new(),
            next_book_id: 1,
        }
    }

    pub fn allocate_book_id(&mut self) -> BookId {
        let id = BookId::new(self.next_book_id);
        self.next_book_id += 1;
        id
    }

    pub fn mark_dirty(&mut self, book_id: BookId) {
        self.dirtied_sequence += 1;
        self.dirtied_cache.insert(book_id, self.dirtied_sequence);
    }

    pub fn invalidate_composites_for(&mut self, field_name: &str, book_id: BookId) {
        for table in self.tables.values_mut() {
            if let TableImpl::Composite(c) = table {
                if c.depends_on_field(field_name) {
                    c.invalidate(book_id);
                }
            }
        }
    }
}

impl Default for CacheState {
    fn default() -> Self {
        Self::new()
    }
}
