mod authority;
mod tick;

pub use authority::{Authority, AuthorityConfig};
pub use tick::FixedTimestep;
