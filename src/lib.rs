//! ringcp: recursive file-tree copying on a single io_uring instance
//!
//! Every directory scan, stat, open, read, write, mkdir and close of a copy
//! goes through one submission/completion ring. A single-threaded
//! [`Engine`](engine::Engine) keeps many of them in flight at once, bounded
//! by the ring depth, a fixed table of registered descriptors and a fixed
//! pool of transfer buffers. When a budget runs out, work waits; it never
//! fails.

pub mod buffer;
pub mod cli;
pub mod config;
pub mod copy;
pub mod dirent;
mod dispatch;
pub mod engine;
pub mod error;
pub mod job;
pub mod limits;
pub mod pending;
mod scheduler;
pub mod slots;
pub mod table;
pub mod traversal;

// Re-export commonly used types
pub use config::{Backend, CopyConfig};
pub use copy::{copy_tree, CopyStats};
pub use engine::Engine;
pub use error::{CopyError, Result};
