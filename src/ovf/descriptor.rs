//! OVF descriptor queries
//!
//! Each field is one path expression; the first match's text is the value.
//! Disks need the four-hop chain Item -> disk id -> file ref -> href, each
//! hop's result parameterising the next expression.

use tracing::debug;

use super::document::Document;
use super::xpath::XPathContext;
use super::DescriptorError;
use crate::vm::DiskSpec;

pub const OVF_NS_PREFIX: &str = "ovf";
pub const OVF_NS_URI: &str = "http://schemas.dmtf.org/ovf/envelope/1";
pub const RASD_NS_PREFIX: &str = "rasd";
pub const RASD_NS_URI: &str =
    "http://schemas.dmtf.org/wbem/wscim/1/cim-schema/2/CIM_ResourceAllocationSettingData";

/// CIM resource types used in VirtualHardwareSection items
const RESOURCE_CPU: u32 = 3;
const RESOURCE_MEMORY: u32 = 4;
const RESOURCE_ETHERNET: u32 = 10;
const RESOURCE_DISK: u32 = 17;

const XPATH_NAME: &str = "/ovf:Envelope/ovf:VirtualSystem/ovf:Name/text()";
const XPATH_HARDWARE: &str = "/ovf:Envelope/ovf:VirtualSystem/ovf:VirtualHardwareSection";

fn item_xpath(resource_type: u32, tail: &str) -> String {
    format!(
        "{}/ovf:Item[rasd:ResourceType/text()={}]{}",
        XPATH_HARDWARE, resource_type, tail
    )
}

fn disk_capacity_xpath(disk_id: &str) -> Option<String> {
    Some(format!(
        "/ovf:Envelope/ovf:DiskSection/ovf:Disk[@ovf:diskId={}]/@ovf:capacity",
        quote(disk_id)?
    ))
}

fn disk_file_ref_xpath(disk_id: &str) -> Option<String> {
    Some(format!(
        "/ovf:Envelope/ovf:DiskSection/ovf:Disk[@ovf:diskId={}]/@ovf:fileRef",
        quote(disk_id)?
    ))
}

fn file_href_xpath(file_id: &str) -> Option<String> {
    Some(format!(
        "/ovf:Envelope/ovf:References/ovf:File[@ovf:id={}]/@ovf:href",
        quote(file_id)?
    ))
}

/// Quote a value as a string literal, picking whichever quote it lacks
///
/// A value holding both quote characters has no literal form.
fn quote(value: &str) -> Option<String> {
    match (value.contains('"'), value.contains('\'')) {
        (false, _) => Some(format!("\"{}\"", value)),
        (true, false) => Some(format!("'{}'", value)),
        (true, true) => None,
    }
}

/// Query view over a parsed descriptor with the OVF namespaces registered
pub struct Descriptor<'d> {
    ctx: XPathContext<'d>,
}

impl<'d> Descriptor<'d> {
    pub fn new(doc: &'d Document) -> Result<Self, DescriptorError> {
        let mut ctx = XPathContext::new(doc);
        ctx.register_namespace(OVF_NS_PREFIX, OVF_NS_URI)
            .map_err(DescriptorError::Namespace)?;
        ctx.register_namespace(RASD_NS_PREFIX, RASD_NS_URI)
            .map_err(DescriptorError::Namespace)?;
        Ok(Self { ctx })
    }

    pub fn name(&self) -> Result<String, DescriptorError> {
        self.required_text(XPATH_NAME, "name")
    }

    pub fn cpu_count(&self) -> Result<String, DescriptorError> {
        self.required_text(&item_xpath(RESOURCE_CPU, "/rasd:VirtualQuantity/text()"), "ncpu")
    }

    pub fn memory(&self) -> Result<String, DescriptorError> {
        self.required_text(&item_xpath(RESOURCE_MEMORY, "/rasd:VirtualQuantity/text()"), "memory")
    }

    /// Resolve every disk item to its file name and capacity
    pub fn disks(&self) -> Result<Vec<DiskSpec>, DescriptorError> {
        let items = self
            .ctx
            .evaluate(&item_xpath(RESOURCE_DISK, "/rasd:HostResource/text()"))
            .map_err(DescriptorError::Expression)?;

        if items.is_empty() {
            return Err(DescriptorError::NoDisks);
        }

        let doc = self.ctx.document();
        let mut disks = Vec::with_capacity(items.len());
        for item in items {
            // HostResource looks like "ovf:/disk/vmdisk1"
            let host_resource = doc.string_value(item);
            let disk_id = host_resource
                .trim()
                .rsplit_once('/')
                .map(|(_, id)| id)
                .filter(|id| !id.is_empty())
                .ok_or_else(|| DescriptorError::BadDiskReference(host_resource.clone()))?;
            debug!("ova: drive_id: {}", disk_id);

            let bad_id = |id: &str| DescriptorError::BadDiskReference(id.to_string());
            let capacity_path = disk_capacity_xpath(disk_id).ok_or_else(|| bad_id(disk_id))?;
            let file_ref_path = disk_file_ref_xpath(disk_id).ok_or_else(|| bad_id(disk_id))?;

            let capacity = self.required_text(&capacity_path, "capacity")?;
            let file_ref = self.required_text(&file_ref_path, "file ref")?;
            let href_path = file_href_xpath(&file_ref).ok_or_else(|| bad_id(&file_ref))?;
            let file_name = self.required_text(&href_path, "file href")?;

            disks.push(DiskSpec {
                file_name,
                capacity,
            });
        }

        Ok(disks)
    }

    /// Number of ethernet adapter items; zero is fine
    pub fn network_adapter_count(&self) -> Result<u32, DescriptorError> {
        let adapters = self
            .ctx
            .evaluate(&item_xpath(RESOURCE_ETHERNET, ""))
            .map_err(DescriptorError::Expression)?;
        debug!("ova: eth num: {}", adapters.len());
        Ok(adapters.len() as u32)
    }

    fn required_text(&self, xpath: &str, field: &'static str) -> Result<String, DescriptorError> {
        let nodes = self
            .ctx
            .evaluate(xpath)
            .map_err(DescriptorError::Expression)?;

        let text = nodes
            .first()
            .map(|node| self.ctx.document().string_value(*node).trim().to_string())
            .filter(|text| !text.is_empty())
            .ok_or(DescriptorError::MissingField(field))?;

        debug!("ova: {}: {}", field, text);
        Ok(text)
    }
}
