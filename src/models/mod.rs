pub mod blob;
pub mod cleanup;
pub mod record;
pub mod report;
pub mod usage;
pub mod user;

pub use blob::*;
pub use cleanup::*;
pub use record::*;
pub use report::*;
pub use usage::*;
pub use user::*;
