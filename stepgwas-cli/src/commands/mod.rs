pub mod fit;
pub mod store_sites;
