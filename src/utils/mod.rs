pub mod progress;

pub use progress::{ProgressStream, format_bytes};
