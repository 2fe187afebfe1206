//! SQLite implementation of the community repository

mod repository;

pub use repository::SqliteCommunityRepository;
