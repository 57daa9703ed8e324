mod catalog_store;
mod memory_catalog_store;
mod pg_catalog_store;

pub use catalog_store::CatalogStore;
pub use memory_catalog_store::MemoryCatalogStore;
pub use pg_catalog_store::PgCatalogStore;
