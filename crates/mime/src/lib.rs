pub mod details;
pub mod index;
pub mod record;

pub use details::Details;
pub use index::{MimeIndex, PARTIAL_DOWNLOAD};
pub use record::{GlobPattern, MimeRecord};
