pub mod cache;
pub mod vector;
