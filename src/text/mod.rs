pub mod similarity;
pub mod splitter;

pub use similarity::{passes, sanitize, similarity};
pub use splitter::{char_len, normalize, split};
