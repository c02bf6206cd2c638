pub mod aggregate;
pub mod cluster;
pub mod compose;
pub mod error;
pub mod features;
pub mod frame;
pub mod grouping;
pub mod io;
pub mod plot;
pub mod rank;
pub mod registration;
pub mod roi;
pub mod segment;
pub mod signal_path;
pub mod stats;
pub mod table;

pub use error::{Degradation, Error, Result};
pub use frame::*;
pub use table::{FeatureVector, RawResultsTable, ResultRow};
