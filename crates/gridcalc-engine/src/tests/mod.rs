mod common;

mod cache_restore;
mod insert_delete_identity;
mod sort_and_filter;
mod structural_edits;
