//! Types for tablewatch-core

mod fix;
mod issue;
mod state;

pub use fix::*;
pub use issue::*;
pub use state::*;
