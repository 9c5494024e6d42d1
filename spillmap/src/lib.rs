pub mod bucket;
pub mod codec;
pub mod error;
pub mod handle;
pub mod list;
pub mod map;

pub use error::{Error, Result};
pub use map::{Options, SpillMap};
