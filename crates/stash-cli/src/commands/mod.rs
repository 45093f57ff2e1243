pub mod common;
pub mod document;
pub mod history;
pub mod sync;
