//! OVF descriptor parsing and querying

pub mod descriptor;
pub mod document;
pub mod xpath;

use thiserror::Error;

pub use descriptor::Descriptor;
pub use document::{Document, DocumentError};
pub use xpath::XPathError;

/// Descriptor file suffix inside an appliance archive
pub const DESCRIPTOR_SUFFIX: &str = ".ovf";

#[derive(Error, Debug)]
pub enum DescriptorError {
    #[error("cannot parse OVF file: {0}")]
    Parse(#[from] DocumentError),

    #[error("cannot register xml namespaces: {0}")]
    Namespace(#[source] XPathError),

    #[error("cannot evaluate OVF query: {0}")]
    Expression(#[source] XPathError),

    #[error("cannot get {0} from ovf file")]
    MissingField(&'static str),

    #[error("no drives were found in ovf file")]
    NoDisks,

    #[error("bad disk reference '{0}' in ovf file")]
    BadDiskReference(String),
}

/// First extracted entry that looks like an OVF descriptor
pub fn find_descriptor(files: &[String]) -> Option<&str> {
    files
        .iter()
        .map(String::as_str)
        .find(|f| f.len() > DESCRIPTOR_SUFFIX.len() && f.ends_with(DESCRIPTOR_SUFFIX))
}
