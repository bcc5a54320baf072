//! Platform plumbing: memory mapping, hugepages, NUMA binding, clock.
//!
//! Everything here is `libc`-level and Linux-first. Hugepage and NUMA
//! handling are best effort: when the kernel does not cooperate the
//! arena still works, it is just slower.

use std::ffi::c_void;
use std::fs::OpenOptions;
use std::io;
use std::os::fd::AsRawFd;
use std::path::Path;
use std::ptr::NonNull;

use riptide_log::warn;

/// A raw shared mapping, either file-backed or anonymous.
#[derive(Debug)]
pub struct Mapping {
    base: NonNull<u8>,
    len: usize,
}

impl Mapping {
    /// Map `len` bytes of `path` read-write shared, creating and
    /// sizing the file when `create` is set.
    pub fn file(path: &Path, len: usize, create: bool) -> io::Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(create)
            .open(path)?;

        if create {
            // hugetlbfs rejects ftruncate to sizes that are not a
            // multiple of the page size backing the mount.
            file.set_len(len as u64)?;
        } else {
            let actual = file.metadata()?.len();
            if (actual as usize) < len {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("arena file is {actual} bytes, expected at least {len}"),
                ));
            }
        }

        // SAFETY: Requesting a fresh shared mapping from the kernel.
        // - addr = null lets the kernel pick a free range
        // - fd stays open only for the duration of the call; the
        //   mapping keeps its own reference to the inode
        let base = unsafe {
            libc::mmap(
                std::ptr::null_mut(),
                len,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED | libc::MAP_POPULATE,
                file.as_raw_fd(),
                0,
            )
        };
        if base == libc::MAP_FAILED {
            return Err(io::Error::last_os_error());
        }
        // SAFETY: mmap returned something other than MAP_FAILED, which
        // is never null for a non-fixed request.
        let base = unsafe { NonNull::new_unchecked(base.cast::<u8>()) };
        Ok(Self { base, len })
    }

    /// Map `len` bytes of anonymous shared memory.
    ///
    /// Used by tests and single-process deployments; the mapping is
    /// still `MAP_SHARED` so forked helpers see the same pages.
    pub fn anonymous(len: usize) -> io::Result<Self> {
        // SAFETY: Anonymous mapping, fd is -1 per POSIX.
        let base = unsafe {
            libc::mmap(
                std::ptr::null_mut(),
                len,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED | libc::MAP_ANONYMOUS,
                -1,
                0,
            )
        };
        if base == libc::MAP_FAILED {
            return Err(io::Error::last_os_error());
        }
        // SAFETY: see above.
        let base = unsafe { NonNull::new_unchecked(base.cast::<u8>()) };
        Ok(Self { base, len })
    }

    /// Base address of the mapping in this process.
    #[must_use]
    pub fn base(&self) -> NonNull<u8> {
        self.base
    }

    /// Length of the mapping in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether the mapping is empty (it never is; for clippy symmetry).
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Bind the mapping's pages to one NUMA node. Best effort: logs and
    /// continues on failure (e.g. kernels without CONFIG_NUMA).
    pub fn bind_to_numa_node(&self, node: u32) {
        #[cfg(target_os = "linux")]
        {
            const MPOL_BIND: libc::c_int = 2;
            let mut mask: libc::c_ulong = 0;
            if node < libc::c_ulong::BITS {
                mask = 1 << node;
            }
            // SAFETY: mbind over our own mapping; maxnode counts bits.
            let rc = unsafe {
                libc::syscall(
                    libc::SYS_mbind,
                    self.base.as_ptr().cast::<c_void>(),
                    self.len,
                    MPOL_BIND,
                    std::ptr::from_ref(&mask),
                    libc::c_ulong::BITS as usize + 1,
                    0,
                )
            };
            if rc != 0 {
                warn!(
                    node,
                    error = %io::Error::last_os_error(),
                    "mbind failed, arena pages stay unbound"
                );
            }
        }
        #[cfg(not(target_os = "linux"))]
        {
            let _ = node;
        }
    }
}

impl Drop for Mapping {
    fn drop(&mut self) {
        // SAFETY: base/len describe exactly the region mmap returned;
        // munmap is called once, from the owning handle.
        unsafe {
            libc::munmap(self.base.as_ptr().cast::<c_void>(), self.len);
        }
    }
}

// SAFETY: Mapping owns a raw region; the pointer is not tied to any
// thread and all mutation goes through the arena's own synchronization.
unsafe impl Send for Mapping {}
// SAFETY: Shared access is synchronized by the in-arena locks and
// atomics layered on top; the Mapping itself is immutable after mmap.
unsafe impl Sync for Mapping {}

/// Whether `path` appears to live on a hugetlbfs mount.
///
/// Heuristic: the default deployment path is
/// `/dev/hugepages/...`, and statfs-based detection adds nothing when
/// the mount is misconfigured anyway.
#[must_use]
pub fn is_hugepage_path(path: &Path) -> bool {
    path.ancestors()
        .any(|p| p.ends_with("hugepages") || p.ends_with("hugetlbfs"))
}

/// System page size in bytes.
#[must_use]
pub fn page_size() -> usize {
    // SAFETY: sysconf with a valid name has no preconditions.
    let sz = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    if sz <= 0 { 4096 } else { sz as usize }
}

/// Round `len` up to a multiple of `page`.
#[must_use]
pub fn round_up_to_page(len: usize, page: usize) -> usize {
    debug_assert!(page.is_power_of_two());
    (len + page - 1) & !(page - 1)
}

/// Monotonic nanosecond clock shared by heartbeats, session TTLs and
/// worker timestamps. Values are comparable within one boot only.
#[must_use]
pub fn monotonic_ns() -> u64 {
    let mut ts = libc::timespec {
        tv_sec: 0,
        tv_nsec: 0,
    };
    // SAFETY: clock_gettime writes to the timespec we own.
    unsafe {
        libc::clock_gettime(libc::CLOCK_MONOTONIC, &raw mut ts);
    }
    ts.tv_sec as u64 * 1_000_000_000 + ts.tv_nsec as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn anonymous_mapping_is_writable() {
        let map = Mapping::anonymous(16 * 1024).unwrap();
        // SAFETY: Fresh private-to-this-test mapping, in bounds.
        unsafe {
            map.base().as_ptr().write(0xAB);
            assert_eq!(map.base().as_ptr().read(), 0xAB);
        }
    }

    #[test]
    fn file_mapping_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("arena");
        let len = 64 * 1024;

        {
            let map = Mapping::file(&path, len, true).unwrap();
            // SAFETY: in-bounds write to our own mapping.
            unsafe { map.base().as_ptr().add(100).write(0x5A) };
        }
        let map = Mapping::file(&path, len, false).unwrap();
        // SAFETY: in-bounds read of our own mapping.
        assert_eq!(unsafe { map.base().as_ptr().add(100).read() }, 0x5A);
    }

    #[test]
    fn short_file_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("short");
        std::fs::write(&path, [0u8; 128]).unwrap();
        assert!(Mapping::file(&path, 4096, false).is_err());
    }

    #[test]
    fn hugepage_path_heuristic() {
        assert!(is_hugepage_path(Path::new("/dev/hugepages/yanet")));
        assert!(!is_hugepage_path(Path::new("/tmp/yanet")));
    }

    #[test]
    fn page_rounding() {
        assert_eq!(round_up_to_page(1, 4096), 4096);
        assert_eq!(round_up_to_page(4096, 4096), 4096);
        assert_eq!(round_up_to_page(4097, 4096), 8192);
    }

    #[test]
    fn clock_is_monotonic() {
        let a = monotonic_ns();
        let b = monotonic_ns();
        assert!(b >= a);
    }
}
