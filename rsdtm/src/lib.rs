pub mod collect;
pub mod commons;
pub mod errors;
pub mod geo_core;
pub mod geometric;
