pub mod authors;
pub mod composite;
pub mod formats;
pub mod identifiers;
pub mod many_to_many;
pub mod many_to_one;
pub mod one_to_many;
pub mod one_to_one;
pub mod virtual_table;

use crate::core::types::BookId;
use authors::AuthorsTable;
use composite::CompositeTable;
use formats::FormatsTable;
use identifiers::IdentifiersTable;
use many_to_many::ManyToManyTable;
use many_to_one::ManyToOneTable;
use one_to_many::OneToManyTable;
use one_to_one::OneToOneTable;
use virtual_table::VirtualTable;

/// A tagged sum over every table shape, keyed by field name in the
/// Cache Controller's table registry. This stands in for the per-shape
/// trait dispatch a class hierarchy would use: one flat match arm per shape rather than a `Box<dyn
/// Table>` with a handful of barely-shared methods.
#[derive(Debug)]
pub enum TableImpl {
    OneToOne(OneToOneTable),
    ManyToOne(ManyToOneTable),
    OneToMany(OneToManyTable),
    ManyToMany(ManyToManyTable),
    Authors(AuthorsTable),
    Formats(FormatsTable),
    Identifiers(IdentifiersTable),
    Composite(CompositeTable),
    Virtual(VirtualTable),
}

impl TableImpl {
    /// Remove a batch of deleted books from whichever concrete table
    /// this wraps. `Virtual` has no storage and is a no-op.
    pub fn remove_books(&mut self, book_ids: &[BookId]) {
        match self {
            TableImpl::OneToOne(t) => t.remove_books(book_ids),
            TableImpl::ManyToOne(t) => t.remove_books(book_ids),
            TableImpl::OneToMany(t) => t.remove_books(book_ids),
            TableImpl::ManyToMany(t) => t.remove_books(book_ids),
            TableImpl::Authors(t) => t.remove_books(book_ids),
            TableImpl::Formats(t) => t.remove_books(book_ids),
            TableImpl::Identifiers(t) => t.remove_books(book_ids),
            TableImpl::Composite(t) => t.remove_books(book_ids),
            TableImpl::Virtual(_) => {}
        }
    }
}
