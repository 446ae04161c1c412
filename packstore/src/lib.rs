pub mod list;
pub mod put;
pub mod repack;
pub mod repository;
pub mod show;
