pub mod bounds;
pub mod box_text;
pub mod tile;

// Foundation crate: small, well-tested primitives only.
pub use bounds::*;
pub use box_text::*;
pub use tile::*;
