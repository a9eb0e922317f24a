//! Training inputs: the binned feature table and the response.
//!
//! - [`BinnedTable`] - Row-major bin codes, bin counts and border tables
//! - [`Response`] - Validated labels (class ids) or regression targets
//! - [`WorkerRows`] - The slice of global rows a distributed worker owns
//!
//! The binning step itself happens upstream: this module only validates and
//! exposes its output.

mod response;
mod table;

pub use response::{Response, WorkerRows};
pub use table::{BinTableError, BinnedTable};
