//! Dolphin emulator memory source for Linux.
//!
//! Dolphin backs emulated RAM with a shared-memory file
//! (`/dev/shm/dolphin-emu.<pid>` or `/dev/shm/dolphinmem.<pid>` depending on
//! the build) and maps it into its own address space. Hooking finds the
//! process with `procfs`, locates those mappings in `/proc/<pid>/maps`, and
//! opens `/proc/<pid>/mem` for positional reads.
//!
//! Guest addresses are translated as follows:
//!
//! ```text
//! guest 0x80000000..0x81800000 (MEM1, 24 MiB) -> map with file offset 0x0
//! guest 0x90000000..0x94000000 (MEM2, 64 MiB) -> map with file offset 0x4000000
//! ```
//!
//! Reading `/proc/<pid>/mem` of another process needs ptrace permission
//! (same user with `kernel.yama.ptrace_scope = 0`, or `CAP_SYS_PTRACE`).

use std::fs::File;
use std::io;
use std::os::unix::fs::FileExt;

use procfs::process::{all_processes, Process};
use procfs::ProcError;
use tracing::{debug, info};

use tankwatch_core::{MemorySource, SourceError, SourceResult};

use crate::config::HookConfig;

pub const MEM1_START: u32 = 0x8000_0000;
pub const MEM1_SIZE: u32 = 0x0180_0000;
pub const MEM2_START: u32 = 0x9000_0000;
pub const MEM2_SIZE: u32 = 0x0400_0000;

/// Offset of MEM2 inside Dolphin's shared-memory file.
const MEM2_FILE_OFFSET: u64 = 0x0400_0000;

/// Path fragments identifying Dolphin's emulated-RAM file.
const RAM_FILE_MARKERS: [&str; 2] = ["dolphin-emu", "dolphinmem"];

/// Host virtual addresses where guest RAM is mapped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RamMapping {
    pub mem1: u64,
    /// Absent for GameCube titles
    pub mem2: Option<u64>,
}

impl RamMapping {
    /// Translates a guest read of `len` bytes to a host address.
    ///
    /// The whole read must fall inside one region.
    pub fn translate(&self, address: u32, len: usize) -> SourceResult<u64> {
        let invalid = SourceError::InvalidAddress { address, len };
        let start = u64::from(address);
        let end = start.checked_add(len as u64).ok_or(invalid.clone())?;

        let in_region = |base: u32, size: u32| {
            start >= u64::from(base) && end <= u64::from(base) + u64::from(size)
        };

        if in_region(MEM1_START, MEM1_SIZE) {
            return Ok(self.mem1 + (start - u64::from(MEM1_START)));
        }
        if in_region(MEM2_START, MEM2_SIZE) {
            if let Some(mem2) = self.mem2 {
                return Ok(mem2 + (start - u64::from(MEM2_START)));
            }
        }
        Err(invalid)
    }
}

/// Finds Dolphin's RAM mappings in the text of `/proc/<pid>/maps`.
///
/// Only shared mappings of the RAM file count; the `dolphin-emu`
/// executable itself is mapped private and is skipped.
pub fn find_ram_mapping(maps: &str) -> Option<RamMapping> {
    let mut mem1 = None;
    let mut mem2 = None;

    for line in maps.lines() {
        let Some(region) = MapRegion::parse(line) else {
            continue;
        };
        if !region.shared || !RAM_FILE_MARKERS.iter().any(|m| region.path.contains(m)) {
            continue;
        }

        let size = region.end.saturating_sub(region.start);
        if region.offset == 0 && size >= u64::from(MEM1_SIZE) && mem1.is_none() {
            mem1 = Some(region.start);
        } else if region.offset == MEM2_FILE_OFFSET
            && size >= u64::from(MEM2_SIZE)
            && mem2.is_none()
        {
            mem2 = Some(region.start);
        }
    }

    mem1.map(|mem1| RamMapping { mem1, mem2 })
}

/// One line of a maps file.
#[derive(Debug, PartialEq, Eq)]
struct MapRegion<'a> {
    start: u64,
    end: u64,
    shared: bool,
    offset: u64,
    path: &'a str,
}

impl<'a> MapRegion<'a> {
    /// `start-end perms offset dev inode [path]`
    fn parse(line: &'a str) -> Option<Self> {
        let mut fields = line.split_whitespace();
        let (start, end) = fields.next()?.split_once('-')?;
        let perms = fields.next()?;
        let offset = fields.next()?;
        let _dev = fields.next()?;
        let _inode = fields.next()?;
        let path = fields.next().unwrap_or("");

        Some(Self {
            start: u64::from_str_radix(start, 16).ok()?,
            end: u64::from_str_radix(end, 16).ok()?,
            shared: perms.as_bytes().get(3) == Some(&b's'),
            offset: u64::from_str_radix(offset, 16).ok()?,
            path,
        })
    }
}

fn matches_name(comm: &str, names: &[String]) -> bool {
    names.iter().any(|name| !name.is_empty() && comm.starts_with(name.as_str()))
}

fn procfs_error(err: procfs::ProcError) -> SourceError {
    let kind = match &err {
        ProcError::PermissionDenied(_) => io::ErrorKind::PermissionDenied,
        ProcError::NotFound(_) => io::ErrorKind::NotFound,
        ProcError::Io(e, _) => e.kind(),
        _ => io::ErrorKind::Other,
    };
    SourceError::Io {
        kind,
        message: err.to_string(),
    }
}

// ============================================================================
// Source
// ============================================================================

struct Hook {
    pid: i32,
    mem: File,
    ram: RamMapping,
}

/// [`MemorySource`] reading a running Dolphin process.
pub struct DolphinSource {
    process_names: Vec<String>,
    hook: Option<Hook>,
}

impl DolphinSource {
    pub fn new(process_names: Vec<String>) -> Self {
        Self {
            process_names,
            hook: None,
        }
    }

    pub fn from_config(config: &HookConfig) -> Self {
        Self::new(config.process_names.clone())
    }

    fn find_process(&self) -> SourceResult<Process> {
        let processes = all_processes().map_err(procfs_error)?;

        for process in processes.flatten() {
            let Ok(stat) = process.stat() else {
                // Exited while we were scanning
                continue;
            };
            if matches_name(&stat.comm, &self.process_names) {
                debug!(pid = process.pid, comm = %stat.comm, "Found emulator process");
                return Ok(process);
            }
        }

        Err(SourceError::ProcessNotFound {
            names: self.process_names.join(", "),
        })
    }
}

impl MemorySource for DolphinSource {
    fn hook(&mut self) -> SourceResult<()> {
        if self.is_hooked() {
            return Ok(());
        }
        self.hook = None;

        let process = self.find_process()?;
        let pid = process.pid;

        let maps = std::fs::read_to_string(format!("/proc/{pid}/maps"))?;
        let ram = find_ram_mapping(&maps).ok_or(SourceError::MemoryNotMapped { pid })?;
        let mem = process.mem().map_err(procfs_error)?;

        info!(
            pid,
            mem1 = format_args!("{:#x}", ram.mem1),
            has_mem2 = ram.mem2.is_some(),
            "Attached to emulator memory"
        );
        self.hook = Some(Hook { pid, mem, ram });
        Ok(())
    }

    fn unhook(&mut self) {
        if let Some(hook) = self.hook.take() {
            debug!(pid = hook.pid, "Detached from emulator memory");
        }
    }

    fn is_hooked(&self) -> bool {
        self.hook
            .as_ref()
            .is_some_and(|h| Process::new(h.pid).is_ok())
    }

    fn read_into(&mut self, address: u32, buf: &mut [u8]) -> SourceResult<()> {
        let hook = self.hook.as_ref().ok_or(SourceError::NotHooked)?;
        let host_address = hook.ram.translate(address, buf.len())?;
        hook.mem.read_exact_at(buf, host_address)?;
        Ok(())
    }
}
