pub mod copy;

pub use copy::{copy_path, write_stream};
