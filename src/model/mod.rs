pub mod group;
pub mod release;
pub mod repo;

pub use group::*;
pub use release::*;
pub use repo::*;
