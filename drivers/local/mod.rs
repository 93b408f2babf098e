//! Local filesystem driver / 本地文件系统驱动
//!
//! Serves `<root>/<bucket>/<key>` so the pipeline can run without a remote
//! endpoint.

mod driver;

pub use driver::{LocalStore, LocalStoreFactory};
