pub mod author_sort;
pub mod case_fold;
pub mod isbn;
pub mod title_sort;
