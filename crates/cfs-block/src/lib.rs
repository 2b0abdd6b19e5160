#![forbid(unsafe_code)]
//! Volume I/O layer.
//!
//! Provides the `ByteDevice` trait with a positional file device and a
//! cursor-preserving stream device, plus [`VolumeIo`], which reads and writes
//! the superblock, chain entries, records and clusters at the offsets
//! computed by `cfs_ondisk::Layout`.
//!
//! Every device call is self-contained: it leaves the underlying cursor
//! where it found it, so calls compose freely. This is not a concurrency
//! guarantee; one volume still needs one writer.

pub mod volume_io;

pub use volume_io::{VolumeIo, read_superblock_region};

use cfs_error::{CfsError, Result};
use parking_lot::Mutex;
use std::fs::{File, OpenOptions};
use std::io::{Cursor, Read, Seek, SeekFrom, Write};
use std::os::unix::fs::FileExt;
use std::path::Path;
use std::sync::Arc;

/// Byte-addressed device for fixed-offset I/O (pread/pwrite semantics).
pub trait ByteDevice: Send + Sync {
    /// Total length in bytes.
    fn len_bytes(&self) -> u64;

    /// Read exactly `buf.len()` bytes from `offset` into `buf`.
    fn read_exact_at(&self, offset: u64, buf: &mut [u8]) -> Result<()>;

    /// Write all bytes in `buf` to `offset`.
    fn write_all_at(&self, offset: u64, buf: &[u8]) -> Result<()>;

    /// Flush pending writes to stable storage.
    fn sync(&self) -> Result<()>;
}

fn check_range(op: &str, offset: u64, len: usize, device_len: u64) -> Result<()> {
    let end = offset
        .checked_add(
            u64::try_from(len)
                .map_err(|_| CfsError::Parse(format!("{op} length overflows u64")))?,
        )
        .ok_or_else(|| CfsError::Parse(format!("{op} range overflows u64")))?;
    if end > device_len {
        return Err(CfsError::Corruption {
            offset,
            detail: format!("{op} out of bounds: len={len} device_len={device_len}"),
        });
    }
    Ok(())
}

/// File-backed byte device using `pread`/`pwrite` style I/O.
///
/// Positional I/O never moves the file cursor, so there is nothing to save
/// or restore around a call.
#[derive(Debug, Clone)]
pub struct FileByteDevice {
    file: Arc<File>,
    len: u64,
    writable: bool,
}

impl FileByteDevice {
    /// Open an existing image, read-write when permitted, else read-only.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let (file, writable) = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path.as_ref())
            .map(|file| (file, true))
            .or_else(|_| {
                OpenOptions::new()
                    .read(true)
                    .open(path.as_ref())
                    .map(|file| (file, false))
            })?;
        let len = file.metadata()?.len();
        Ok(Self {
            file: Arc::new(file),
            len,
            writable,
        })
    }

    /// Create a new zero-filled image of `len` bytes. Fails with
    /// `ErrorKind::AlreadyExists` if `path` exists.
    pub fn create_new(path: impl AsRef<Path>, len: u64) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(path.as_ref())?;
        file.set_len(len)?;
        Ok(Self {
            file: Arc::new(file),
            len,
            writable: true,
        })
    }

    #[must_use]
    pub fn is_writable(&self) -> bool {
        self.writable
    }
}

impl ByteDevice for FileByteDevice {
    fn len_bytes(&self) -> u64 {
        self.len
    }

    fn read_exact_at(&self, offset: u64, buf: &mut [u8]) -> Result<()> {
        check_range("read", offset, buf.len(), self.len)?;
        self.file.read_exact_at(buf, offset)?;
        Ok(())
    }

    fn write_all_at(&self, offset: u64, buf: &[u8]) -> Result<()> {
        if !self.writable {
            return Err(CfsError::Io(std::io::Error::from(
                std::io::ErrorKind::PermissionDenied,
            )));
        }
        check_range("write", offset, buf.len(), self.len)?;
        self.file.write_all_at(buf, offset)?;
        Ok(())
    }

    fn sync(&self) -> Result<()> {
        self.file.sync_all()?;
        Ok(())
    }
}

/// Byte device over any seekable stream.
///
/// Each call saves the stream position, seeks, transfers, and seeks back to
/// the saved position, even when the transfer fails.
#[derive(Debug)]
pub struct StreamByteDevice<T> {
    stream: Mutex<T>,
    len: u64,
}

impl<T: Read + Write + Seek + Send> StreamByteDevice<T> {
    pub fn new(mut stream: T) -> Result<Self> {
        let saved = stream.stream_position()?;
        let len = stream.seek(SeekFrom::End(0))?;
        stream.seek(SeekFrom::Start(saved))?;
        Ok(Self {
            stream: Mutex::new(stream),
            len,
        })
    }

    #[must_use]
    pub fn into_inner(self) -> T {
        self.stream.into_inner()
    }

    /// Current cursor position of the wrapped stream.
    pub fn position(&self) -> Result<u64> {
        Ok(self.stream.lock().stream_position()?)
    }

    /// Move the wrapped stream's cursor. Device calls put it back here.
    pub fn set_position(&self, pos: u64) -> Result<()> {
        self.stream.lock().seek(SeekFrom::Start(pos))?;
        Ok(())
    }

    fn at<R>(&self, offset: u64, op: impl FnOnce(&mut T) -> std::io::Result<R>) -> Result<R> {
        let mut stream = self.stream.lock();
        let saved = stream.stream_position()?;
        stream.seek(SeekFrom::Start(offset))?;
        let outcome = op(&mut *stream);
        let restored = stream.seek(SeekFrom::Start(saved));
        drop(stream);
        let value = outcome?;
        restored?;
        Ok(value)
    }
}

impl<T: Read + Write + Seek + Send> ByteDevice for StreamByteDevice<T> {
    fn len_bytes(&self) -> u64 {
        self.len
    }

    fn read_exact_at(&self, offset: u64, buf: &mut [u8]) -> Result<()> {
        check_range("read", offset, buf.len(), self.len)?;
        self.at(offset, |stream| stream.read_exact(buf))
    }

    fn write_all_at(&self, offset: u64, buf: &[u8]) -> Result<()> {
        check_range("write", offset, buf.len(), self.len)?;
        self.at(offset, |stream| stream.write_all(buf))
    }

    fn sync(&self) -> Result<()> {
        self.stream.lock().flush()?;
        Ok(())
    }
}

/// In-memory volume image.
pub type MemoryByteDevice = StreamByteDevice<Cursor<Vec<u8>>>;

impl MemoryByteDevice {
    /// Zero-filled image of `len` bytes.
    #[must_use]
    pub fn zeroed(len: usize) -> Self {
        Self {
            stream: Mutex::new(Cursor::new(vec![0_u8; len])),
            len: len as u64,
        }
    }

    /// Copy of the current image bytes.
    #[must_use]
    pub fn snapshot(&self) -> Vec<u8> {
        self.stream.lock().get_ref().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_device_round_trips() {
        let dev = MemoryByteDevice::zeroed(4096 * 4);
        dev.write_all_at(8192, &[7_u8; 4096]).expect("write");
        let mut buf = vec![0_u8; 4096];
        dev.read_exact_at(8192, &mut buf).expect("read");
        assert_eq!(buf, vec![7_u8; 4096]);
        assert_eq!(dev.len_bytes(), 16_384);
    }

    #[test]
    fn stream_device_restores_cursor() {
        let dev = MemoryByteDevice::zeroed(1024);
        dev.set_position(100).expect("seek");

        dev.write_all_at(900, b"tail").expect("write");
        assert_eq!(dev.position().expect("pos"), 100);

        let mut buf = [0_u8; 4];
        dev.read_exact_at(900, &mut buf).expect("read");
        assert_eq!(&buf, b"tail");
        assert_eq!(dev.position().expect("pos"), 100);
    }

    #[test]
    fn stream_device_restores_cursor_after_failed_read() {
        // Length is fixed at construction; shrinking the stream afterwards
        // makes the read itself fail past the bounds check.
        let dev = StreamByteDevice::new(Cursor::new(vec![1_u8; 64])).expect("device");
        dev.set_position(10).expect("seek");
        let mut buf = [0_u8; 8];
        dev.read_exact_at(56, &mut buf).expect("read");
        assert_eq!(dev.position().expect("pos"), 10);

        let mut cursor = dev.into_inner();
        cursor.get_mut().truncate(60);
        let dev = StreamByteDevice {
            stream: Mutex::new(cursor),
            len: 64,
        };
        assert!(dev.read_exact_at(56, &mut buf).is_err());
        assert_eq!(dev.position().expect("pos"), 10);
    }

    #[test]
    fn out_of_bounds_access_is_rejected() {
        let dev = MemoryByteDevice::zeroed(16);
        assert!(matches!(
            dev.write_all_at(12, &[0_u8; 8]),
            Err(CfsError::Corruption { offset: 12, .. })
        ));
        let mut buf = [0_u8; 4];
        assert!(dev.read_exact_at(u64::MAX, &mut buf).is_err());
        assert_eq!(dev.snapshot(), vec![0_u8; 16]);
    }

    #[test]
    fn file_device_create_and_reopen() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("vol.img");

        let dev = FileByteDevice::create_new(&path, 8192).expect("create");
        assert!(dev.is_writable());
        dev.write_all_at(4096, b"chainfs").expect("write");
        dev.sync().expect("sync");
        drop(dev);

        let err = FileByteDevice::create_new(&path, 8192).expect_err("exists");
        let CfsError::Io(io) = err else {
            panic!("expected an io error");
        };
        assert_eq!(io.kind(), std::io::ErrorKind::AlreadyExists);

        let dev = FileByteDevice::open(&path).expect("open");
        assert_eq!(dev.len_bytes(), 8192);
        let mut buf = [0_u8; 7];
        dev.read_exact_at(4096, &mut buf).expect("read");
        assert_eq!(&buf, b"chainfs");
    }
}
