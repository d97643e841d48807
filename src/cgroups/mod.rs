//! cgroups v2 resource isolation module
//!
//! Applies the sandbox [`ResourceProfile`](crate::security::ResourceProfile)
//! (memory, swap, CPU share) to locally executed commands.
//!
//! Without cgroups a runaway command could consume all host CPU/memory and
//! starve every other conversation's sandbox. When the hierarchy is not
//! writable the local backend logs a warning and runs without limits.

pub mod manager;

pub use manager::CgroupManager;
