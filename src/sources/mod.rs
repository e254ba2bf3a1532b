//! Where tracks come from: the music catalog API, local files and plain URLs.

pub mod catalog;
pub mod direct;
pub mod lookup;

pub use catalog::CatalogClient;
pub use lookup::{Lookup, LookupTarget, TrackLookup};
