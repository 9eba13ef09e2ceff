//! Load a tabular dataset and walk its records one at a time.
//!
//! [`loader`] turns a CSV file, a SAS7BDAT file or a directory of `.txt`
//! files into a [`table::Table`]; [`cursor::TableCursor`] navigates it and
//! filters it by equality search; [`session::Session`] holds the active one.

pub mod cursor;
pub mod domain;
pub mod loader;
pub mod sas7bdat;
pub mod session;
pub mod table;
