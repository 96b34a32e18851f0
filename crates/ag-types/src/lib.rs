pub mod dataset;
pub mod errors;
pub mod non_finite;
pub mod task;

pub use dataset::*;
pub use errors::*;
pub use task::*;
