pub mod memory;

pub use memory::total_ram_mib;
