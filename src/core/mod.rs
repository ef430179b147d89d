pub mod error;
pub mod path;
pub mod value;

pub use error::{ConfError, Result};
pub use path::{Path, Segment};
pub use value::Value;
