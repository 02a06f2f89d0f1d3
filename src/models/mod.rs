//! Data models

mod certificate;
mod result;
mod tool;

pub use certificate::*;
pub use result::*;
pub use tool::*;
