pub mod outline;

pub use outline::{apply_outline, read_outline, write_outline};
