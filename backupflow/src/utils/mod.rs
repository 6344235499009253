//! Path and timestamp helpers shared by the stages.

mod paths;
mod timestamps;

pub use paths::{clean_path, clean_paths, format_endpoint};
pub use timestamps::{archive_timestamp, local_timestamp};
