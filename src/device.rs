//! Aligned block I/O over a raw block device or regular file
//!
//! A [`BlockDevice`] wraps one file descriptor and exposes exact-length
//! positional reads and writes at arbitrary byte offsets. When the device
//! is opened with `O_DIRECT`, every transfer is widened to the device
//! block size and staged through a block-aligned scratch buffer; spans
//! with an unaligned head or tail are handled by read-modify-write.
//!
//! Buffered mode skips the scratch dance entirely and issues plain
//! `pread`/`pwrite`.

use std::alloc::{alloc_zeroed, dealloc, Layout};
use std::fs::{File, OpenOptions};
use std::io;
use std::os::fd::AsRawFd;
use std::os::unix::fs::{FileExt, FileTypeExt, OpenOptionsExt};
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{debug, info, warn};

/// Paths with this prefix refer to block devices and are never created.
const DEVICE_DIR_PREFIX: &str = "/dev/";

/// Block size assumed for regular files (also the O_DIRECT minimum).
const DEFAULT_BLOCK_SIZE: u32 = 512;

/// Regular files opened writable at size zero are extended to this.
const MIN_FILE_SIZE: u64 = 100 * 1024 * 1024;

// Linux ioctl request codes (asm-generic): BLKSSZGET = _IO(0x12, 104),
// BLKGETSIZE64 = _IOR(0x12, 114, size_t).
const BLKSSZGET: libc::c_ulong = 0x1268;
const BLKGETSIZE64: libc::c_ulong = 0x8008_1272;

#[derive(Error, Debug)]
pub enum DeviceError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Short read: {transferred}/{requested} bytes at offset {offset}")]
    TruncatedRead {
        transferred: usize,
        requested: usize,
        offset: u64,
    },

    #[error("Short write: {transferred}/{requested} bytes at offset {offset}")]
    TruncatedWrite {
        transferred: usize,
        requested: usize,
        offset: u64,
    },

    #[error("Failed to allocate {size}-byte buffer aligned to {alignment}")]
    AllocFailed { size: usize, alignment: usize },
}

/// Scratch buffer whose start address and length are block-aligned.
///
/// O_DIRECT transfers fault with EINVAL unless the user buffer, length,
/// and file offset are all multiples of the device block size.
struct AlignedBuf {
    ptr: *mut u8,
    layout: Layout,
}

impl AlignedBuf {
    fn zeroed(size: usize, alignment: usize) -> Result<Self, DeviceError> {
        let layout = Layout::from_size_align(size, alignment)
            .map_err(|_| DeviceError::AllocFailed { size, alignment })?;
        let ptr = unsafe { alloc_zeroed(layout) };
        if ptr.is_null() {
            return Err(DeviceError::AllocFailed { size, alignment });
        }
        Ok(Self { ptr, layout })
    }

    fn as_slice(&self) -> &[u8] {
        unsafe { std::slice::from_raw_parts(self.ptr, self.layout.size()) }
    }

    fn as_mut_slice(&mut self) -> &mut [u8] {
        unsafe { std::slice::from_raw_parts_mut(self.ptr, self.layout.size()) }
    }
}

impl Drop for AlignedBuf {
    fn drop(&mut self) {
        unsafe { dealloc(self.ptr, self.layout) };
    }
}

/// Open flags for a [`BlockDevice`].
#[derive(Debug, Clone, Copy, Default)]
pub struct DeviceOptions {
    /// Open the descriptor read-only.
    pub read_only: bool,
    /// Request `O_DIRECT`. If the OS rejects it the device falls back to
    /// buffered I/O; check [`BlockDevice::is_direct`] for the outcome.
    pub direct: bool,
}

/// One open block device or raw-style regular file.
pub struct BlockDevice {
    file: File,
    path: PathBuf,
    size: u64,
    block_size: u32,
    direct: bool,
}

impl BlockDevice {
    /// Open `path` as a storage device.
    ///
    /// Regular files outside `/dev/` may be created, and are extended to
    /// 100 MiB when opened writable at size zero. Block devices report
    /// their real size and logical block size via ioctl; regular files
    /// use a 512-byte block size.
    pub fn open<P: AsRef<Path>>(path: P, options: &DeviceOptions) -> Result<Self, DeviceError> {
        let path = path.as_ref();

        if options.direct {
            match Self::open_with_flags(path, options, libc::O_DIRECT) {
                Ok(dev) => return Ok(dev),
                Err(DeviceError::Io(err)) => {
                    warn!(
                        path = %path.display(),
                        error = %err,
                        "O_DIRECT open failed, falling back to buffered I/O"
                    );
                }
                Err(err) => return Err(err),
            }
        }

        Self::open_with_flags(path, options, 0)
    }

    fn open_with_flags(
        path: &Path,
        options: &DeviceOptions,
        extra_flags: libc::c_int,
    ) -> Result<Self, DeviceError> {
        let is_device_path = path.starts_with(DEVICE_DIR_PREFIX);

        let mut open_options = OpenOptions::new();
        open_options.read(true);
        if !options.read_only {
            open_options.write(true);
            if !is_device_path {
                open_options.create(true);
            }
        }
        if extra_flags != 0 {
            open_options.custom_flags(extra_flags);
        }

        let file = open_options.open(path)?;
        let meta = file.metadata()?;
        let is_block_device = meta.file_type().is_block_device();

        let (mut size, block_size) = if is_block_device {
            (
                blk_ioctl_u64(&file, BLKGETSIZE64)?,
                blk_ioctl_u32(&file, BLKSSZGET)?,
            )
        } else {
            (meta.len(), DEFAULT_BLOCK_SIZE)
        };

        if !is_block_device && size == 0 && !options.read_only {
            info!(
                path = %path.display(),
                size = MIN_FILE_SIZE,
                "extending new backing file"
            );
            file.set_len(MIN_FILE_SIZE)?;
            size = MIN_FILE_SIZE;
        }

        let direct = extra_flags & libc::O_DIRECT != 0;
        info!(
            path = %path.display(),
            size,
            block_size,
            direct,
            block_device = is_block_device,
            "device opened"
        );

        Ok(Self {
            file,
            path: path.to_path_buf(),
            size,
            block_size,
            direct,
        })
    }

    /// Total device capacity in bytes.
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Logical block size used for alignment.
    pub fn block_size(&self) -> u32 {
        self.block_size
    }

    /// Whether the descriptor is actually running in O_DIRECT mode.
    pub fn is_direct(&self) -> bool {
        self.direct
    }

    /// Path this device was opened from.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read exactly `buf.len()` bytes starting at `offset`.
    pub fn read(&self, buf: &mut [u8], offset: u64) -> Result<(), DeviceError> {
        if buf.is_empty() {
            return Ok(());
        }

        if !self.direct {
            let n = self.file.read_at(buf, offset)?;
            if n != buf.len() {
                return Err(DeviceError::TruncatedRead {
                    transferred: n,
                    requested: buf.len(),
                    offset,
                });
            }
            return Ok(());
        }

        let span = AlignedSpan::covering(offset, buf.len(), self.block_size);
        let mut scratch = AlignedBuf::zeroed(span.size, self.block_size as usize)?;

        let n = self.file.read_at(scratch.as_mut_slice(), span.offset)?;
        if n != span.size {
            return Err(DeviceError::TruncatedRead {
                transferred: n,
                requested: span.size,
                offset: span.offset,
            });
        }

        buf.copy_from_slice(&scratch.as_slice()[span.pad..span.pad + buf.len()]);
        Ok(())
    }

    /// Write exactly `buf.len()` bytes starting at `offset`.
    ///
    /// In direct mode an unaligned head or tail triggers a read of the
    /// covering aligned span first, so neighboring bytes survive.
    pub fn write(&self, buf: &[u8], offset: u64) -> Result<(), DeviceError> {
        if buf.is_empty() {
            return Ok(());
        }

        if !self.direct {
            let n = self.file.write_at(buf, offset)?;
            if n != buf.len() {
                return Err(DeviceError::TruncatedWrite {
                    transferred: n,
                    requested: buf.len(),
                    offset,
                });
            }
            return Ok(());
        }

        let span = AlignedSpan::covering(offset, buf.len(), self.block_size);
        let mut scratch = AlignedBuf::zeroed(span.size, self.block_size as usize)?;

        if span.needs_rmw(buf.len(), self.block_size) {
            // Preserve the bytes around the caller's span. A read past the
            // current end of a sparse file may come up short; the scratch
            // buffer is already zeroed, which is what those bytes hold.
            let n = self.file.read_at(scratch.as_mut_slice(), span.offset)?;
            debug!(
                offset = span.offset,
                size = span.size,
                read = n,
                "read-modify-write staging"
            );
        }

        scratch.as_mut_slice()[span.pad..span.pad + buf.len()].copy_from_slice(buf);

        let n = self.file.write_at(scratch.as_slice(), span.offset)?;
        if n != span.size {
            return Err(DeviceError::TruncatedWrite {
                transferred: n,
                requested: span.size,
                offset: span.offset,
            });
        }
        Ok(())
    }

    /// Flush file data to stable storage.
    pub fn sync(&self) -> Result<(), DeviceError> {
        self.file.sync_data()?;
        Ok(())
    }
}

/// The block-aligned span covering an arbitrary `(offset, size)` request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct AlignedSpan {
    /// Start rounded down to a block boundary.
    offset: u64,
    /// Distance from `offset` to the caller's requested start.
    pad: usize,
    /// Span length rounded up to whole blocks.
    size: usize,
}

impl AlignedSpan {
    fn covering(offset: u64, size: usize, block_size: u32) -> Self {
        let bs = block_size as u64;
        let aligned_offset = (offset / bs) * bs;
        let pad = (offset - aligned_offset) as usize;
        let aligned_size = (size + pad).div_ceil(block_size as usize) * block_size as usize;
        Self {
            offset: aligned_offset,
            pad,
            size: aligned_size,
        }
    }

    fn needs_rmw(&self, requested: usize, block_size: u32) -> bool {
        self.pad > 0 || requested % block_size as usize != 0
    }
}

fn blk_ioctl_u64(file: &File, request: libc::c_ulong) -> Result<u64, DeviceError> {
    let mut value: u64 = 0;
    let rc = unsafe { libc::ioctl(file.as_raw_fd(), request, &mut value) };
    if rc < 0 {
        return Err(DeviceError::Io(io::Error::last_os_error()));
    }
    Ok(value)
}

fn blk_ioctl_u32(file: &File, request: libc::c_ulong) -> Result<u32, DeviceError> {
    let mut value: libc::c_int = 0;
    let rc = unsafe { libc::ioctl(file.as_raw_fd(), request, &mut value) };
    if rc < 0 {
        return Err(DeviceError::Io(io::Error::last_os_error()));
    }
    Ok(value as u32)
}
