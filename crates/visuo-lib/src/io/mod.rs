//! File formats: acquisition images, rendered artifacts and CSV tables.

pub mod image;
pub mod tables;
