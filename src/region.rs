//! Relocatable memory region
//!
//! A file-backed memory map that stores every internal reference as an
//! offset relative to the start of the map, never as a pointer. The map
//! can be unmapped, grown and remapped at a different address and every
//! previously issued [`Offset`] stays valid.
//!
//! Layout:
//! - bytes 0..6: magic `b"tabula"`
//! - byte 6: format version (major)
//! - byte 7: format version (minor)
//! - byte 16 onwards: bump-allocated structures (the dataset root is
//!   always the first allocation, at [`ROOT_OFFSET`])
//!
//! Allocation is append-only: a bump cursor hands out 8-byte aligned
//! spans and nothing is ever freed. When the cursor would pass the end
//! of the file, the map is flushed, the file is extended by a growth
//! percentage and the file is remapped.

use crate::error::{Result, StoreError};
use memmap2::{Mmap, MmapMut};
use std::fs::{File, OpenOptions};
use std::marker::PhantomData;
use std::mem::size_of;
use std::path::{Path, PathBuf};
use tracing::debug;

pub const MAGIC: [u8; 6] = *b"tabula";
pub const VERSION_MAJOR: u8 = 1;
pub const VERSION_MINOR: u8 = 0;

/// First allocatable byte; the dataset root structure lives here.
pub const ROOT_OFFSET: u64 = 16;

/// Default file extension applied on growth, in percent.
pub const DEFAULT_GROWTH_PERCENT: u64 = 50;

const HEADER_SIZE: usize = 8;
const MIN_REGION_SIZE: u64 = 4096;

fn align8(v: u64) -> u64 {
    (v + 7) & !7
}

/// Marker for types that can be copied byte-for-byte in and out of the
/// region. Implementors must be `#[repr(C)]` (or primitive) with every
/// bit pattern valid.
pub unsafe trait Pod: Copy {}

unsafe impl Pod for u8 {}
unsafe impl Pod for u16 {}
unsafe impl Pod for u32 {}
unsafe impl Pod for u64 {}
unsafe impl Pod for i8 {}
unsafe impl Pod for i16 {}
unsafe impl Pod for i32 {}
unsafe impl Pod for i64 {}
unsafe impl Pod for f32 {}
unsafe impl Pod for f64 {}

/// Typed offset into a [`Region`], relative to the start of the map.
/// Zero is the null offset; no valid allocation starts at zero because
/// the header occupies the first bytes.
#[repr(transparent)]
pub struct Offset<T> {
    off: u64,
    _marker: PhantomData<T>,
}

impl<T> Offset<T> {
    pub const NULL: Offset<T> = Offset {
        off: 0,
        _marker: PhantomData,
    };

    pub(crate) fn new(off: u64) -> Offset<T> {
        Offset {
            off,
            _marker: PhantomData,
        }
    }

    pub fn is_null(self) -> bool {
        self.off == 0
    }

    pub fn to_u64(self) -> u64 {
        self.off
    }

    /// Offset of the `index`th element of an array of `T` starting here.
    pub fn at(self, index: usize) -> Offset<T> {
        Offset::new(self.off + (index * size_of::<T>()) as u64)
    }
}

impl<T> Clone for Offset<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Offset<T> {}

impl<T> PartialEq for Offset<T> {
    fn eq(&self, other: &Self) -> bool {
        self.off == other.off
    }
}

impl<T> Eq for Offset<T> {}

impl<T> std::fmt::Debug for Offset<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Offset({})", self.off)
    }
}

unsafe impl<T: 'static> Pod for Offset<T> {}

/// Offset of a length-prefixed string: `u32` byte length followed by
/// that many UTF-8 bytes. Never NUL-terminated.
pub type Str = Offset<u8>;

enum Mapping {
    Reader(Mmap),
    Writer(MmapMut),
}

/// A file-backed, growable memory region.
///
/// A region is opened either by [`Region::create`] (read-write, single
/// writer) or [`Region::attach`] (read-only). Readers see the file as
/// it was at attach time; the writer publishes by flushing.
pub struct Region {
    path: PathBuf,
    file: File,
    map: Mapping,
    size: u64,
    cursor: u64,
    growth_percent: u64,
}

impl Region {
    /// Create a fresh region file of at least `size` bytes, truncating
    /// any existing file at `path`. The default growth percentage is
    /// [`DEFAULT_GROWTH_PERCENT`].
    pub fn create<P: AsRef<Path>>(path: P, size: u64) -> Result<Region> {
        Self::create_with_growth(path, size, DEFAULT_GROWTH_PERCENT)
    }

    pub fn create_with_growth<P: AsRef<Path>>(
        path: P,
        size: u64,
        growth_percent: u64,
    ) -> Result<Region> {
        let path = path.as_ref().to_path_buf();
        let size = align8(size.max(MIN_REGION_SIZE));
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)?;
        file.set_len(size)?;
        let mut map = unsafe { MmapMut::map_mut(&file)? };
        map[..6].copy_from_slice(&MAGIC);
        map[6] = VERSION_MAJOR;
        map[7] = VERSION_MINOR;
        debug!(path = %path.display(), size, "region created");
        Ok(Region {
            path,
            file,
            map: Mapping::Writer(map),
            size,
            cursor: ROOT_OFFSET,
            growth_percent,
        })
    }

    /// Attach read-only to an existing region file, validating the
    /// magic bytes and the format version.
    pub fn attach<P: AsRef<Path>>(path: P) -> Result<Region> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new().read(true).open(&path)?;
        let size = file.metadata()?.len();
        if size < HEADER_SIZE as u64 {
            return Err(StoreError::CorruptFormat);
        }
        let map = unsafe { Mmap::map(&file)? };
        if map[..6] != MAGIC {
            return Err(StoreError::CorruptFormat);
        }
        let (major, minor) = (map[6], map[7]);
        if major > VERSION_MAJOR {
            return Err(StoreError::IncompatibleFormatVersion { major, minor });
        }
        debug!(path = %path.display(), size, major, minor, "region attached");
        Ok(Region {
            path,
            file,
            map: Mapping::Reader(map),
            size,
            // Readers never allocate.
            cursor: size,
            growth_percent: DEFAULT_GROWTH_PERCENT,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn len(&self) -> u64 {
        self.size
    }

    pub fn is_empty(&self) -> bool {
        false
    }

    pub fn is_writer(&self) -> bool {
        matches!(self.map, Mapping::Writer(_))
    }

    /// Format version stored in the header.
    pub fn version(&self) -> (u8, u8) {
        let b = self.bytes();
        (b[6], b[7])
    }

    fn bytes(&self) -> &[u8] {
        match &self.map {
            Mapping::Reader(m) => &m[..],
            Mapping::Writer(m) => &m[..],
        }
    }

    fn bytes_mut(&mut self) -> &mut [u8] {
        match &mut self.map {
            Mapping::Writer(m) => &mut m[..],
            Mapping::Reader(_) => panic!("write through a read-only region"),
        }
    }

    /// Read a `T` at `off` by value. Reading by value rather than by
    /// reference keeps callers safe across growth: no reference into
    /// the map outlives a subsequent allocation.
    pub fn read<T: Pod>(&self, off: Offset<T>) -> T {
        self.read_at(off.to_u64())
    }

    pub fn write<T: Pod>(&mut self, off: Offset<T>, value: T) {
        self.write_at(off.to_u64(), value)
    }

    pub(crate) fn read_at<T: Pod>(&self, addr: u64) -> T {
        let bytes = self.bytes();
        assert!(
            addr as usize >= HEADER_SIZE && addr as usize + size_of::<T>() <= bytes.len(),
            "offset {} outside mapped extent", addr
        );
        unsafe { std::ptr::read_unaligned(bytes.as_ptr().add(addr as usize) as *const T) }
    }

    pub(crate) fn write_at<T: Pod>(&mut self, addr: u64, value: T) {
        let bytes = self.bytes_mut();
        assert!(
            addr as usize >= HEADER_SIZE && addr as usize + size_of::<T>() <= bytes.len(),
            "offset {} outside mapped extent", addr
        );
        unsafe {
            std::ptr::write_unaligned(bytes.as_mut_ptr().add(addr as usize) as *mut T, value)
        }
    }

    /// Allocate space for `count` values of `T`, 8-byte aligned and
    /// zero-filled, growing the file if needed.
    pub fn allocate<T: Pod>(&mut self, count: usize) -> Result<Offset<T>> {
        let addr = self.allocate_bytes((count * size_of::<T>()) as u64)?;
        Ok(Offset::new(addr))
    }

    pub(crate) fn allocate_bytes(&mut self, size: u64) -> Result<u64> {
        let size = align8(size.max(8));
        while self.cursor + size > self.size {
            self.grow()?;
        }
        let addr = self.cursor;
        self.cursor += size;
        Ok(addr)
    }

    fn grow(&mut self) -> Result<()> {
        let grown = self.size + self.size * self.growth_percent / 100;
        let new_size = align8(grown.max(self.size + 8));
        match &self.map {
            Mapping::Writer(m) => m.flush()?,
            Mapping::Reader(_) => panic!("grow on a read-only region"),
        }
        self.file.set_len(new_size)?;
        let map = unsafe { MmapMut::map_mut(&self.file)? };
        self.map = Mapping::Writer(map);
        debug!(old = self.size, new = new_size, "region grown");
        self.size = new_size;
        Ok(())
    }

    /// Flush dirty pages to the backing file. A no-op on readers.
    pub fn flush(&self) -> Result<()> {
        if let Mapping::Writer(m) = &self.map {
            m.flush()?;
        }
        Ok(())
    }

    /// Store a string as `u32` length + UTF-8 bytes.
    pub fn alloc_str(&mut self, s: &str) -> Result<Str> {
        let addr = self.allocate_bytes(4 + s.len() as u64)?;
        self.write_at::<u32>(addr, s.len() as u32);
        let start = addr as usize + 4;
        self.bytes_mut()[start..start + s.len()].copy_from_slice(s.as_bytes());
        Ok(Offset::new(addr))
    }

    /// Overwrite a previously allocated string buffer in place. The
    /// caller must have checked that `text` fits the buffer's recorded
    /// capacity.
    pub(crate) fn write_str_in_place(&mut self, s: Str, text: &str) {
        self.write_at::<u32>(s.to_u64(), text.len() as u32);
        let start = s.to_u64() as usize + 4;
        self.bytes_mut()[start..start + text.len()].copy_from_slice(text.as_bytes());
    }

    pub fn read_str(&self, s: Str) -> Option<String> {
        if s.is_null() {
            return None;
        }
        let len = self.read_at::<u32>(s.to_u64()) as usize;
        let start = s.to_u64() as usize + 4;
        Some(String::from_utf8_lossy(&self.bytes()[start..start + len]).into_owned())
    }
}
