//! Off-heap memory for the slot table.
//!
//! A [`Region`] is an anonymous private mapping. The kernel hands it out
//! zero-filled, which is exactly the "every slot empty" state of the slot
//! table, so no explicit zeroing pass is needed at construction. Hugepages
//! are requested when configured and fall back to regular pages with a
//! transparent-hugepage hint.

use serde::Deserialize;
use std::io;
use std::ptr::NonNull;
use tracing::{debug, warn};

const KB: usize = 1024;
const MB: usize = 1024 * KB;
const GB: usize = 1024 * MB;

const REGULAR_PAGE: usize = 4 * KB;

/// Nodes addressable by the single-word `mbind` node mask.
const MAX_NUMA_NODES: u32 = libc::c_ulong::BITS;

/// Hugepage preference for the slot table mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HugepageSize {
    /// Regular pages. The OS may still back them with THP.
    #[default]
    None,
    /// 2MB hugepages, falling back to regular pages.
    TwoMegabyte,
    /// 1GB hugepages, falling back to regular pages.
    OneGigabyte,
}

/// The page size a mapping actually ended up with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageSize {
    /// 1GB hugepages.
    OneGigabyte,
    /// 2MB hugepages.
    TwoMegabyte,
    /// Regular pages (possibly with THP).
    Regular,
}

impl std::fmt::Display for PageSize {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PageSize::OneGigabyte => write!(f, "1GB hugepages"),
            PageSize::TwoMegabyte => write!(f, "2MB hugepages"),
            PageSize::Regular => write!(f, "4KB pages"),
        }
    }
}

/// A zero-filled, page-aligned anonymous mapping. Unmapped on drop.
#[derive(Debug)]
pub struct Region {
    ptr: NonNull<u8>,
    len: usize,
    page_size: PageSize,
}

// SAFETY: the region is plain memory owned by this value; all concurrent
// access to its contents goes through atomics in the slot table.
unsafe impl Send for Region {}
unsafe impl Sync for Region {}

impl Region {
    /// Map at least `size` bytes, optionally bound to a NUMA node.
    pub fn map(size: usize, hugepage_size: HugepageSize, numa_node: Option<u32>) -> io::Result<Self> {
        if size == 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "cannot map zero bytes",
            ));
        }
        if let Some(node) = numa_node
            && node >= MAX_NUMA_NODES
        {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("numa node {node} out of range (max {})", MAX_NUMA_NODES - 1),
            ));
        }

        let region = match hugepage_size {
            HugepageSize::OneGigabyte if size >= GB && waste_ok(size, GB) => {
                map_huge_or_regular(size, GB, PageSize::OneGigabyte)?
            }
            HugepageSize::OneGigabyte | HugepageSize::TwoMegabyte => {
                map_huge_or_regular(size, 2 * MB, PageSize::TwoMegabyte)?
            }
            HugepageSize::None => map_regular(round_up(size, REGULAR_PAGE))?,
        };

        if let Some(node) = numa_node {
            bind_to_numa_node(region.ptr.as_ptr(), region.len, node)?;
        }

        debug!(
            bytes = region.len,
            page_size = %region.page_size,
            "mapped slot table"
        );

        Ok(region)
    }

    /// Base pointer of the mapping.
    #[inline]
    pub fn as_ptr(&self) -> *mut u8 {
        self.ptr.as_ptr()
    }

    /// Mapped length in bytes (rounded up to the page size).
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    /// The page size that was used.
    pub fn page_size(&self) -> PageSize {
        self.page_size
    }
}

impl Drop for Region {
    fn drop(&mut self) {
        // SAFETY: ptr/len describe a mapping created by `mmap` and owned
        // exclusively by this value.
        let result = unsafe { libc::munmap(self.ptr.as_ptr().cast(), self.len) };
        debug_assert_eq!(result, 0, "munmap failed");
    }
}

#[inline]
fn round_up(size: usize, align: usize) -> usize {
    (size + align - 1) & !(align - 1)
}

/// Only use 1GB pages when at most half the rounded mapping would be padding.
fn waste_ok(size: usize, page: usize) -> bool {
    let rounded = round_up(size, page);
    (rounded - size) * 2 <= rounded
}

fn map_huge_or_regular(size: usize, page: usize, kind: PageSize) -> io::Result<Region> {
    let rounded = round_up(size, page);
    match try_mmap_hugepage(rounded, page) {
        Ok(ptr) => Ok(Region {
            ptr,
            len: rounded,
            page_size: kind,
        }),
        Err(e) => {
            warn!(error = %e, "{kind} unavailable, falling back to regular pages");
            // keep the 2MB rounding so THP can still back the mapping
            map_regular(round_up(size, 2 * MB))
        }
    }
}

fn map_regular(len: usize) -> io::Result<Region> {
    // SAFETY: anonymous private mapping with no fixed address.
    let ptr = unsafe {
        libc::mmap(
            std::ptr::null_mut(),
            len,
            libc::PROT_READ | libc::PROT_WRITE,
            libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
            -1,
            0,
        )
    };

    if ptr == libc::MAP_FAILED {
        return Err(io::Error::last_os_error());
    }

    #[cfg(target_os = "linux")]
    // SAFETY: advisory only, on memory we just mapped.
    unsafe {
        let _ = libc::madvise(ptr, len, libc::MADV_HUGEPAGE);
    }

    prefault(ptr.cast(), len, REGULAR_PAGE);

    Ok(Region {
        // SAFETY: mmap never returns null on success.
        ptr: unsafe { NonNull::new_unchecked(ptr.cast()) },
        len,
        page_size: PageSize::Regular,
    })
}

#[cfg(target_os = "linux")]
fn try_mmap_hugepage(len: usize, page: usize) -> io::Result<NonNull<u8>> {
    const MAP_HUGE_SHIFT: libc::c_int = 26;

    let huge_flag = match page {
        GB => libc::MAP_HUGETLB | (30 << MAP_HUGE_SHIFT),
        p if p == 2 * MB => libc::MAP_HUGETLB | (21 << MAP_HUGE_SHIFT),
        _ => {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "unsupported hugepage size",
            ));
        }
    };

    // SAFETY: anonymous private mapping with no fixed address.
    let ptr = unsafe {
        libc::mmap(
            std::ptr::null_mut(),
            len,
            libc::PROT_READ | libc::PROT_WRITE,
            libc::MAP_PRIVATE | libc::MAP_ANONYMOUS | huge_flag,
            -1,
            0,
        )
    };

    if ptr == libc::MAP_FAILED {
        return Err(io::Error::last_os_error());
    }

    prefault(ptr.cast(), len, page);

    // SAFETY: mmap never returns null on success.
    Ok(unsafe { NonNull::new_unchecked(ptr.cast()) })
}

#[cfg(not(target_os = "linux"))]
fn try_mmap_hugepage(_len: usize, _page: usize) -> io::Result<NonNull<u8>> {
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        "hugepages not supported on this platform",
    ))
}

#[cfg(target_os = "linux")]
fn bind_to_numa_node(ptr: *mut u8, len: usize, node: u32) -> io::Result<()> {
    const MPOL_BIND: libc::c_int = 2;
    const MPOL_MF_MOVE: libc::c_uint = 1 << 1;

    let mut nodemask: libc::c_ulong = 1 << node;

    // SAFETY: ptr/len describe a mapping we own; nodemask outlives the call.
    let result = unsafe {
        libc::syscall(
            libc::SYS_mbind,
            ptr as *mut libc::c_void,
            len,
            MPOL_BIND,
            &mut nodemask as *mut libc::c_ulong,
            node as libc::c_ulong + 2,
            MPOL_MF_MOVE,
        )
    };

    if result != 0 {
        return Err(io::Error::last_os_error());
    }

    Ok(())
}

#[cfg(not(target_os = "linux"))]
fn bind_to_numa_node(_ptr: *mut u8, _len: usize, _node: u32) -> io::Result<()> {
    Ok(())
}

/// Touch one byte per page so the first frame does not pay for page faults.
/// Writes zero, so the region stays zero-filled.
fn prefault(ptr: *mut u8, len: usize, page: usize) {
    for offset in (0..len).step_by(page) {
        // SAFETY: offset < len, inside the mapping.
        unsafe { std::ptr::write_volatile(ptr.add(offset), 0) };
    }
}
