//! Unbuffered single-block reader.
//!
//! Reading with the page cache bypassed makes the measured latency reflect
//! the storage stack itself. The kernel requires the destination buffer of
//! an unbuffered read to be block aligned.

use std::fs::{File, OpenOptions};
use std::io::{self, Read};
use std::os::unix::fs::OpenOptionsExt;
use std::path::Path;
use std::time::{Duration, Instant};

use crate::event::Errno;
use crate::probes::{BUFFER_ALIGN, Probe};

/// Heap buffer whose usable region starts on an `align` boundary.
pub struct AlignedBuffer {
    storage: Vec<u8>,
    offset: usize,
    len: usize,
}

impl AlignedBuffer {
    pub fn new(len: usize, align: usize) -> Self {
        debug_assert!(align.is_power_of_two());

        // Over-allocate and pick the aligned sub-range. The Vec is never
        // resized, so the offset stays valid.
        let storage = vec![0u8; len + align];
        let remainder = storage.as_ptr() as usize & (align - 1);
        let offset = if remainder == 0 { 0 } else { align - remainder };

        Self {
            storage,
            offset,
            len,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.storage[self.offset..self.offset + self.len]
    }
}

pub struct DirectIoProbe {
    buf: AlignedBuffer,
}

impl DirectIoProbe {
    pub fn new(size: usize) -> Self {
        Self {
            buf: AlignedBuffer::new(size, BUFFER_ALIGN),
        }
    }
}

impl Probe for DirectIoProbe {
    fn read_delay(&mut self, path: &Path) -> Result<Duration, Errno> {
        let start = Instant::now();

        // Closed on drop, on every return path
        let mut file = open_direct(path).map_err(|e| Errno::from_io_error(&e))?;
        read_once(&mut file, self.buf.as_mut_slice()).map_err(|e| Errno::from_io_error(&e))?;

        Ok(start.elapsed())
    }
}

fn open_direct(path: &Path) -> io::Result<File> {
    let mut options = OpenOptions::new();
    options.read(true);

    #[cfg(any(target_os = "linux", target_os = "android"))]
    options.custom_flags(libc::O_DIRECT | libc::O_CLOEXEC);
    #[cfg(not(any(target_os = "linux", target_os = "android")))]
    options.custom_flags(libc::O_CLOEXEC);

    let file = options.open(path)?;

    #[cfg(target_os = "macos")]
    disable_cache(&file)?;

    Ok(file)
}

#[cfg(target_os = "macos")]
fn disable_cache(file: &File) -> io::Result<()> {
    use std::os::unix::io::AsRawFd;

    let ret = unsafe { libc::fcntl(file.as_raw_fd(), libc::F_NOCACHE, 1) };
    if ret == -1 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

fn read_once(file: &mut File, buf: &mut [u8]) -> io::Result<usize> {
    loop {
        match file.read(buf) {
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            other => return other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::probes::CHECK_SIZE;

    #[test]
    fn test_aligned_buffer() {
        for _ in 0..16 {
            let mut buf = AlignedBuffer::new(CHECK_SIZE, BUFFER_ALIGN);
            assert_eq!(buf.len(), CHECK_SIZE);
            let slice = buf.as_mut_slice();
            assert_eq!(slice.len(), CHECK_SIZE);
            assert_eq!(slice.as_ptr() as usize % BUFFER_ALIGN, 0);
        }
    }

    #[test]
    fn test_missing_path() {
        let mut probe = DirectIoProbe::new(CHECK_SIZE);
        let result = probe.read_delay(Path::new("/nonexistent/iocheck/file"));
        assert_eq!(result, Err(Errno::ENOENT));
    }

    #[test]
    fn test_directory_is_not_readable() {
        let mut probe = DirectIoProbe::new(CHECK_SIZE);
        let result = probe.read_delay(&std::env::temp_dir());
        // EISDIR on read, or EINVAL where the filesystem refuses O_DIRECT
        assert!(result.is_err());
    }

    #[test]
    fn test_regular_file() {
        let path = std::env::temp_dir().join(format!("iocheck-probe-{}", std::process::id()));
        std::fs::write(&path, vec![b'x'; CHECK_SIZE]).unwrap();

        let mut probe = DirectIoProbe::new(CHECK_SIZE);
        let result = probe.read_delay(&path);
        std::fs::remove_file(&path).unwrap();

        match result {
            Ok(delay) => assert!(delay < Duration::from_secs(60)),
            // Some filesystems (older tmpfs, overlayfs) do not support O_DIRECT
            Err(errno) => assert_eq!(errno, Errno::EINVAL),
        }
    }
}
