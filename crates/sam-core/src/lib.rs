pub mod context;
pub mod error;
pub mod extract;
pub mod io;
pub mod paths;
pub mod project;
pub mod registry;
pub mod section;
pub mod split;

pub use error::{Result, SamError};
