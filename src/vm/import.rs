//! OVA Import
//!
//! Unpacks a tar appliance into a scratch directory, reads the hardware
//! description from its OVF descriptor, converts the disks to qcow2 and
//! registers the machine in the store. The scratch directory is removed
//! whatever the outcome.

use std::path::{Path, PathBuf};
use tracing::{debug, info};

use super::archive;
use super::convert::convert_disks;
use super::error::{ImportError, ImportResult};
use super::finalize::finalize;
use super::machine::{interface_name, is_valid_name, normalize_name, MachineDraft, MachineRecord};
use super::workdir::{clean_temp_dir, create_temp_dir, entry_path, CleanupReport};
use crate::commands::CommandRunner;
use crate::config::Config;
use crate::ovf::{find_descriptor, Descriptor, DescriptorError, Document};
use crate::spinner::Spinner;
use crate::store::{IdentityAllocator, Store};

const FIELD_PATH: &str = "Path to OVA";
const FIELD_ARCH: &str = "Architecture";
const FIELD_NAME: &str = "Name (optional)";

/// What the user asked to import
#[derive(Debug, Clone)]
pub struct ImportRequest {
    pub ova: PathBuf,
    pub arch: String,
    pub name: Option<String>,
}

impl ImportRequest {
    /// Check the request and turn it into an initial draft
    pub fn validate(&self, config: &Config) -> ImportResult<MachineDraft> {
        let name = self.name.as_deref().map(|n| n.trim_end().to_string());
        let arch = self.arch.trim();

        let mut empty = Vec::new();
        if name.as_deref() == Some("") {
            empty.push(FIELD_NAME);
        }
        if self.ova.as_os_str().is_empty() {
            empty.push(FIELD_PATH);
        }
        if arch.is_empty() {
            empty.push(FIELD_ARCH);
        }
        if !empty.is_empty() {
            return Err(ImportError::EmptyFields(empty));
        }

        if !self.ova.is_absolute() {
            return Err(ImportError::InvalidField {
                field: FIELD_PATH,
                reason: "path must start with '/'".to_string(),
            });
        }
        if !config.supports_arch(arch) {
            return Err(ImportError::InvalidField {
                field: FIELD_ARCH,
                reason: format!(
                    "'{}' is not one of: {}",
                    arch,
                    config.qemu_targets.join(", ")
                ),
            });
        }
        if let Some(name) = &name {
            if !is_valid_name(name) {
                return Err(ImportError::InvalidField {
                    field: FIELD_NAME,
                    reason: "use 1-30 letters, digits, '-' or '_'".to_string(),
                });
            }
        }

        Ok(MachineDraft {
            name,
            source: self.ova.clone(),
            arch: arch.to_string(),
            ..Default::default()
        })
    }
}

/// Collaborators an import runs against
pub struct ImportEnv<'a> {
    pub config: &'a Config,
    pub store: &'a Store,
    pub allocator: &'a mut dyn IdentityAllocator,
    pub runner: &'a dyn CommandRunner,
    /// Draw a spinner on stderr while working
    pub spinner: bool,
}

/// Result of a successful import
#[derive(Debug)]
pub struct ImportOutcome {
    pub record: MachineRecord,
    pub machine_dir: PathBuf,
    pub cleanup: CleanupReport,
}

// =========================================================================
// Pipeline
// =========================================================================

/// Import an OVA appliance as a new machine
///
/// Validation failures return before anything touches the disk. After
/// that, the scratch directory is cleaned exactly once on every path.
pub fn import_ova(request: &ImportRequest, env: &mut ImportEnv<'_>) -> ImportResult<ImportOutcome> {
    let mut draft = request.validate(env.config)?;

    let work_dir = create_temp_dir(&env.config.tmp_dir)?;
    let mut files = Vec::new();

    let result = run_pipeline(&mut draft, &work_dir, &mut files, env);
    let cleanup = clean_temp_dir(&work_dir, &files);

    let record = result?;
    let machine_dir = env.config.vm_dir.join(&record.name);
    info!(
        "Imported {} ({} disk(s), {} interface(s))",
        record.name,
        record.drives.len(),
        record.interfaces.len()
    );

    Ok(ImportOutcome {
        record,
        machine_dir,
        cleanup,
    })
}

fn run_pipeline(
    draft: &mut MachineDraft,
    work_dir: &Path,
    files: &mut Vec<String>,
    env: &mut ImportEnv<'_>,
) -> ImportResult<MachineRecord> {
    let spinner = Spinner::start(env.spinner)?;

    archive::extract(&draft.source, work_dir, files)?;

    let descriptor = find_descriptor(files.as_slice()).ok_or(ImportError::DescriptorNotFound)?;
    debug!("ova: ovf file found: {}", descriptor);
    let descriptor_path = entry_path(work_dir, descriptor).ok_or(ImportError::DescriptorNotFound)?;
    read_descriptor(draft, &descriptor_path)?;

    let name = draft
        .name
        .clone()
        .ok_or(ImportError::Descriptor(DescriptorError::MissingField("name")))?;
    if env.store.name_in_use(&name)? {
        return Err(ImportError::NameInUse(name));
    }
    let interfaces: Vec<String> = (0..draft.interface_count)
        .map(|i| interface_name(&name, i))
        .collect();
    if let Some(taken) = env.store.interface_in_use(&interfaces)? {
        return Err(ImportError::InterfaceInUse(taken));
    }

    convert_disks(
        env.runner,
        &env.config.qemu_img,
        &draft.disks,
        &env.config.vm_dir.join(&name),
        work_dir,
    )?;

    let record = finalize(
        draft,
        &env.config.default_drive_driver,
        &env.config.default_net_driver,
        &mut *env.allocator,
        env.store,
    )?;

    spinner.finish()?;
    Ok(record)
}

/// Fill the draft from the descriptor; the document is dropped on return
fn read_descriptor(draft: &mut MachineDraft, path: &Path) -> ImportResult<()> {
    let doc = Document::parse_file(path).map_err(DescriptorError::Parse)?;
    let descriptor = Descriptor::new(&doc)?;

    if draft.name.is_none() {
        let raw = descriptor.name()?;
        let name = normalize_name(&raw).ok_or_else(|| ImportError::InvalidField {
            field: "name",
            reason: format!("descriptor name '{}' has no usable characters", raw),
        })?;
        draft.name = Some(name);
    }
    draft.cpus = descriptor.cpu_count()?;
    draft.memory = descriptor.memory()?;
    draft.disks = descriptor.disks()?;
    draft.interface_count = descriptor.network_adapter_count()?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::testing::FakeRunner;
    use crate::ovf::descriptor::tests::SAMPLE_OVF;
    use crate::store::identity::FixedAllocator;
    use crate::store::schema::MAC_BASE;
    use crate::vm::archive::tests::build_archive;
    use crate::vm::machine::{DriveRecord, InterfaceRecord};
    use tempfile::TempDir;

    /// SAMPLE_OVF with the second disk item taken out
    fn single_disk_ovf() -> String {
        SAMPLE_OVF.replace("<rasd:HostResource>ovf:/disk/vmdisk2</rasd:HostResource>", "")
    }

    struct Fixture {
        tmp: TempDir,
        config: Config,
        store: Store,
    }

    impl Fixture {
        fn new() -> Self {
            let tmp = tempfile::tempdir().unwrap();
            let config = Config {
                vm_dir: tmp.path().join("vms"),
                tmp_dir: tmp.path().join("scratch"),
                spinner: false,
                ..Config::default()
            };
            Self {
                tmp,
                config,
                store: Store::open_in_memory().unwrap(),
            }
        }

        /// Write an appliance with the given descriptor (if any) and disk
        fn appliance(&self, ovf: Option<&str>) -> PathBuf {
            let path = self.tmp.path().join("appliance.ova");
            let mut entries: Vec<(&str, &[u8])> = Vec::new();
            if let Some(ovf) = ovf {
                entries.push(("appliance.ovf", ovf.as_bytes()));
            }
            entries.push(("appliance-disk1.vmdk", b"KDMV".as_slice()));
            build_archive(&path, &entries);
            path
        }

        fn run(
            &self,
            ova: PathBuf,
            name: Option<&str>,
            runner: &FakeRunner,
        ) -> ImportResult<ImportOutcome> {
            let mut allocator = FixedAllocator {
                mac: MAC_BASE,
                vnc: 0,
            };
            let mut env = ImportEnv {
                config: &self.config,
                store: &self.store,
                allocator: &mut allocator,
                runner,
                spinner: false,
            };
            let request = ImportRequest {
                ova,
                arch: "x86_64".to_string(),
                name: name.map(str::to_string),
            };
            import_ova(&request, &mut env)
        }

        fn scratch_is_empty(&self) -> bool {
            std::fs::read_dir(&self.config.tmp_dir).unwrap().next().is_none()
        }
    }

    #[test]
    fn test_single_disk_appliance_is_imported() {
        let fx = Fixture::new();
        let ova = fx.appliance(Some(&single_disk_ovf()));
        let runner = FakeRunner::converting();

        let outcome = fx.run(ova, None, &runner).unwrap();

        assert_eq!(outcome.record.name, "appliance");
        assert_eq!(outcome.machine_dir, fx.config.vm_dir.join("appliance"));
        assert!(outcome.machine_dir.join("appliance-disk1.vmdk").is_file());
        assert_eq!(
            outcome.record.drives,
            vec![DriveRecord {
                file_name: "appliance-disk1.vmdk".to_string(),
                capacity: "21474836480".to_string(),
                driver: "virtio".to_string(),
                boot: true,
            }]
        );
        assert!(outcome.cleanup.is_clean());
        assert!(fx.scratch_is_empty());

        let summary = fx.store.find_machine("appliance").unwrap().unwrap();
        assert_eq!(summary.cpus, "2");
        assert_eq!(summary.memory, "2048");
        assert_eq!(summary.drives, 1);
        assert_eq!(summary.interfaces, 1);
        assert_eq!(summary.vnc_port, 0);
    }

    #[test]
    fn test_failed_conversion_leaves_nothing_behind() {
        let fx = Fixture::new();
        let ova = fx.appliance(Some(&single_disk_ovf()));
        let runner = FakeRunner::new(|_, args| match args.first().map(String::as_str) {
            Some("convert") => (1, String::new()),
            _ => (0, String::new()),
        });

        let err = fx.run(ova, None, &runner).unwrap_err();

        assert!(matches!(err, ImportError::Conversion { .. }));
        assert!(err.is_fatal());
        assert!(!fx.config.vm_dir.join("appliance").exists());
        assert!(fx.store.find_machine("appliance").unwrap().is_none());
        assert!(fx.scratch_is_empty());
    }

    #[test]
    fn test_name_collision_stops_before_conversion() {
        let fx = Fixture::new();
        let first = FakeRunner::converting();
        fx.run(fx.appliance(Some(&single_disk_ovf())), Some("taken"), &first)
            .unwrap();
        std::fs::remove_dir_all(fx.config.vm_dir.join("taken")).unwrap();

        let runner = FakeRunner::converting();
        let err = fx
            .run(fx.appliance(Some(&single_disk_ovf())), Some("taken"), &runner)
            .unwrap_err();

        assert!(matches!(err, ImportError::NameInUse(ref n) if n == "taken"));
        assert!(!err.is_fatal());
        assert!(runner.calls_to("qemu-img").is_empty());
        assert!(!fx.config.vm_dir.join("taken").exists());
        assert!(fx.scratch_is_empty());
    }

    #[test]
    fn test_nested_entries_are_cleaned_up() {
        let fx = Fixture::new();
        let ova = fx.tmp.path().join("nested.ova");
        let ovf = single_disk_ovf();
        build_archive(
            &ova,
            &[
                ("appliance.ovf", ovf.as_bytes()),
                ("appliance-disk1.vmdk", b"KDMV".as_slice()),
                ("extra/readme.txt", b"notes".as_slice()),
            ],
        );

        let outcome = fx.run(ova, None, &FakeRunner::converting()).unwrap();

        assert!(outcome.cleanup.is_clean(), "{:?}", outcome.cleanup);
        assert!(fx.scratch_is_empty());
    }

    #[test]
    fn test_archive_without_descriptor() {
        let fx = Fixture::new();
        let ova = fx.appliance(None);

        let err = fx.run(ova, None, &FakeRunner::converting()).unwrap_err();

        assert!(matches!(err, ImportError::DescriptorNotFound));
        assert!(!err.is_fatal());
        assert!(fx.scratch_is_empty());
    }

    #[test]
    fn test_missing_descriptor_name_uses_override() {
        let fx = Fixture::new();
        let ovf = single_disk_ovf().replace("<Name>appliance</Name>", "");

        let outcome = fx
            .run(fx.appliance(Some(&ovf)), Some("custom  "), &FakeRunner::converting())
            .unwrap();
        assert_eq!(outcome.record.name, "custom");

        let err = fx
            .run(fx.appliance(Some(&ovf)), None, &FakeRunner::converting())
            .unwrap_err();
        assert!(matches!(
            err,
            ImportError::Descriptor(DescriptorError::MissingField("name"))
        ));
        assert!(fx.scratch_is_empty());
    }

    #[test]
    fn test_descriptor_name_is_normalised() {
        let fx = Fixture::new();
        let ovf = single_disk_ovf().replace("<Name>appliance</Name>", "<Name>Web Server 1.0</Name>");

        let outcome = fx
            .run(fx.appliance(Some(&ovf)), None, &FakeRunner::converting())
            .unwrap();
        assert_eq!(outcome.record.name, "Web_Server_1_0");
        assert_eq!(outcome.record.interfaces[0].name, "Web_Seb78a_eth0");
    }

    #[test]
    fn test_long_names_sharing_a_prefix_both_import() {
        let fx = Fixture::new();
        let import = |name: &str| {
            fx.run(
                fx.appliance(Some(&single_disk_ovf())),
                Some(name),
                &FakeRunner::converting(),
            )
            .unwrap()
        };
        let alpha = import("webserver-alpha");
        let beta = import("webserver-beta");

        let a = &alpha.record.interfaces[0].name;
        let b = &beta.record.interfaces[0].name;
        assert_ne!(a, b);
        assert!(a.len() <= 15 && b.len() <= 15);
        assert!(fx.store.name_in_use("webserver-beta").unwrap());
    }

    #[test]
    fn test_interface_clash_stops_before_conversion() {
        let fx = Fixture::new();
        // A stored machine already owns the interface the import would create
        fx.store
            .insert_machine(&MachineRecord {
                name: "legacy".to_string(),
                arch: "x86_64".to_string(),
                cpus: "1".to_string(),
                memory: "512".to_string(),
                source: PathBuf::from("/srv/legacy.ova"),
                vnc_port: 0,
                mac_block: MAC_BASE,
                interfaces: vec![InterfaceRecord {
                    name: "web_eth0".to_string(),
                    mac: "de:ad:be:ef:00:01".to_string(),
                    driver: "e1000".to_string(),
                }],
                drives: Vec::new(),
            })
            .unwrap();

        let runner = FakeRunner::converting();
        let err = fx
            .run(fx.appliance(Some(&single_disk_ovf())), Some("web"), &runner)
            .unwrap_err();

        assert!(matches!(err, ImportError::InterfaceInUse(ref n) if n == "web_eth0"));
        assert!(!err.is_fatal());
        assert!(runner.calls_to("qemu-img").is_empty());
        assert!(!fx.config.vm_dir.join("web").exists());
        assert!(fx.scratch_is_empty());
    }

    #[test]
    fn test_appliance_without_adapters() {
        let fx = Fixture::new();
        let ovf = single_disk_ovf().replace(
            "<rasd:ResourceType>10</rasd:ResourceType>",
            "<rasd:ResourceType>35</rasd:ResourceType>",
        );

        let outcome = fx
            .run(fx.appliance(Some(&ovf)), None, &FakeRunner::converting())
            .unwrap();
        assert!(outcome.record.interfaces.is_empty());
        assert_eq!(
            fx.store.find_machine("appliance").unwrap().unwrap().interfaces,
            0
        );
    }

    #[test]
    fn test_unparseable_descriptor_is_recoverable() {
        let fx = Fixture::new();
        let err = fx
            .run(fx.appliance(Some("<Envelope>")), None, &FakeRunner::converting())
            .unwrap_err();
        assert!(matches!(err, ImportError::Descriptor(DescriptorError::Parse(_))));
        assert!(!err.is_fatal());
        assert!(fx.scratch_is_empty());
    }

    #[test]
    fn test_validate_collects_empty_fields() {
        let config = Config::default();
        let request = ImportRequest {
            ova: PathBuf::new(),
            arch: " ".to_string(),
            name: Some("   ".to_string()),
        };
        match request.validate(&config).unwrap_err() {
            ImportError::EmptyFields(fields) => {
                assert_eq!(fields, vec![FIELD_NAME, FIELD_PATH, FIELD_ARCH])
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let config = Config::default();
        let request = |ova: &str, arch: &str, name: Option<&str>| ImportRequest {
            ova: PathBuf::from(ova),
            arch: arch.to_string(),
            name: name.map(str::to_string),
        };

        assert!(matches!(
            request("vm.ova", "x86_64", None).validate(&config),
            Err(ImportError::InvalidField { field: FIELD_PATH, .. })
        ));
        assert!(matches!(
            request("/vm.ova", "sparc", None).validate(&config),
            Err(ImportError::InvalidField { field: FIELD_ARCH, .. })
        ));
        assert!(matches!(
            request("/vm.ova", "x86_64", Some("bad name")).validate(&config),
            Err(ImportError::InvalidField { field: FIELD_NAME, .. })
        ));

        let draft = request("/vm.ova", "aarch64", Some("edge ")).validate(&config).unwrap();
        assert_eq!(draft.name.as_deref(), Some("edge"));
        assert_eq!(draft.arch, "aarch64");
    }
}
