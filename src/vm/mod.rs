pub mod archive;
pub mod convert;
pub mod error;
pub mod finalize;
pub mod import;
pub mod machine;
pub mod workdir;

pub use error::{ImportError, ImportResult};
pub use import::{import_ova, ImportEnv, ImportRequest};
pub use machine::{DiskSpec, MachineRecord};
