pub mod materials_repo;
pub use materials_repo::{ItemFilter, ItemPatch, ItemUpdate, MaterialsRepository};
pub mod memory_repo;
pub use memory_repo::InMemoryMaterialsRepository;
pub mod pg_repo;
pub use pg_repo::PgMaterialsRepository;
