pub mod dispatch;
pub mod job;
pub mod pipeline;
pub mod progress;
pub mod source;
pub mod storage;

#[cfg(test)]
mod testing;

pub use dispatch::*;
pub use job::*;
pub use pipeline::*;
pub use progress::*;
pub use source::*;
pub use storage::*;
