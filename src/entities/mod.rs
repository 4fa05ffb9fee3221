pub mod catalog;
pub mod item;
