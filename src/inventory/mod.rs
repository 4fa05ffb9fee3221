pub mod grid;
pub mod manager;
