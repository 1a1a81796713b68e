pub mod error;
pub mod config;
pub mod auth;
pub mod storage;
pub mod fileinfo;
pub mod fs;
pub mod driver;

pub use error::{FsError, Result};
pub use config::DriverConfig;
pub use fs::{Driver, DriverFactory, FileInfo, Session};
pub use storage::{ByteReader, GcsObjectStore, MemoryObjectStore, ObjectMeta, ObjectStore};
pub use fileinfo::ObjectInfo;
pub use driver::{BucketDriver, BucketDriverFactory, BucketPolicy, OpContext};
