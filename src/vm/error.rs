//! Import failure taxonomy
//!
//! Fatal errors are environment or I/O defects the user cannot fix by
//! retrying with different input. Everything derived from the input (form
//! fields, archive contents, descriptor contents, name clashes) is
//! recoverable.

use std::path::PathBuf;
use thiserror::Error;

use crate::ovf::DescriptorError;
use crate::store::StoreError;

pub type ImportResult<T> = std::result::Result<T, ImportError>;

#[derive(Error, Debug)]
pub enum ImportError {
    #[error("required fields are empty: {}", .0.join(", "))]
    EmptyFields(Vec<&'static str>),

    #[error("invalid {field}: {reason}")]
    InvalidField { field: &'static str, reason: String },

    #[error("cannot create working directory in {}: {source}", path.display())]
    WorkDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot read archive {}: {source}", path.display())]
    ArchiveOpen {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("bad archive {}: {reason}", path.display())]
    BadArchive { path: PathBuf, reason: String },

    #[error("OVF file is not found")]
    DescriptorNotFound,

    #[error(transparent)]
    Descriptor(#[from] DescriptorError),

    #[error("name '{0}' is already in use")]
    NameInUse(String),

    #[error("interface name '{0}' is already in use")]
    InterfaceInUse(String),

    #[error("unsafe disk file name '{0}' in descriptor")]
    UnsafeDiskName(String),

    #[error("disk image '{0}' is not present in the archive")]
    MissingDiskImage(String),

    #[error("cannot create VM directory {}: {reason}", path.display())]
    MachineDir { path: PathBuf, reason: String },

    #[error("cannot create image file from '{disk}': {reason}")]
    Conversion { disk: String, reason: String },

    #[error("cannot {0} progress thread")]
    Thread(&'static str),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl ImportError {
    /// Whether the failure points at the environment rather than the input
    pub fn is_fatal(&self) -> bool {
        match self {
            Self::WorkDir { .. }
            | Self::ArchiveOpen { .. }
            | Self::BadArchive { .. }
            | Self::MachineDir { .. }
            | Self::Conversion { .. }
            | Self::Thread(_) => true,
            Self::Descriptor(e) => matches!(
                e,
                DescriptorError::Namespace(_) | DescriptorError::Expression(_)
            ),
            Self::EmptyFields(_)
            | Self::InvalidField { .. }
            | Self::DescriptorNotFound
            | Self::NameInUse(_)
            | Self::InterfaceInUse(_)
            | Self::UnsafeDiskName(_)
            | Self::MissingDiskImage(_)
            | Self::Store(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ovf::XPathError;

    #[test]
    fn test_content_problems_are_recoverable() {
        assert!(!ImportError::DescriptorNotFound.is_fatal());
        assert!(!ImportError::NameInUse("web".to_string()).is_fatal());
        assert!(!ImportError::InterfaceInUse("web_eth0".to_string()).is_fatal());
        assert!(!ImportError::from(DescriptorError::MissingField("name")).is_fatal());
        assert!(!ImportError::from(DescriptorError::NoDisks).is_fatal());
    }

    #[test]
    fn test_environment_problems_are_fatal() {
        assert!(ImportError::Thread("join").is_fatal());
        assert!(ImportError::Conversion {
            disk: "d.vmdk".to_string(),
            reason: "exit 1".to_string()
        }
        .is_fatal());
        assert!(ImportError::from(DescriptorError::Namespace(XPathError::UnboundPrefix(
            "ovf".to_string()
        )))
        .is_fatal());
    }

    #[test]
    fn test_messages() {
        assert_eq!(
            ImportError::EmptyFields(vec!["Path to OVA", "Architecture"]).to_string(),
            "required fields are empty: Path to OVA, Architecture"
        );
        assert_eq!(
            ImportError::from(DescriptorError::MissingField("ncpu")).to_string(),
            "cannot get ncpu from ovf file"
        );
    }
}
