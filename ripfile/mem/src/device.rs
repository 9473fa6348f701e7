//! The RAM device.

use crate::config::MemDeviceConfig;
use parking_lot::Mutex;
use ripfile_core::{Device, DeviceFd, FileError, FileErrorKind, FileFlags, FileResult};
use std::collections::HashMap;
use std::io::SeekFrom;
use std::sync::atomic::{AtomicUsize, Ordering};

struct OpenFd {
    name: Vec<u8>,
    pos: u64,
}

#[derive(Default)]
struct State {
    files: HashMap<Vec<u8>, Vec<u8>>,
    open: HashMap<u64, OpenFd>,
    next_fd: u64,
}

/// An in-memory transport: named byte stores with seekable descriptors.
///
/// Every `read`/`write`/`close` call bumps a counter, which is how the core's
/// tests distinguish buffered activity from physical transport traffic.
pub struct MemDevice {
    config: MemDeviceConfig,
    state: Mutex<State>,
    reads: AtomicUsize,
    writes: AtomicUsize,
    closes: AtomicUsize,
}

impl MemDevice {
    pub fn new(config: MemDeviceConfig) -> Self {
        Self {
            config,
            state: Mutex::new(State::default()),
            reads: AtomicUsize::new(0),
            writes: AtomicUsize::new(0),
            closes: AtomicUsize::new(0),
        }
    }

    /// Preload a named store, replacing any previous contents.
    pub fn insert(&self, name: &[u8], contents: &[u8]) {
        self.state
            .lock()
            .files
            .insert(name.to_vec(), contents.to_vec());
    }

    /// Snapshot of a named store's contents.
    pub fn contents(&self, name: &[u8]) -> Option<Vec<u8>> {
        self.state.lock().files.get(name).cloned()
    }

    pub fn read_calls(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    pub fn write_calls(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    pub fn close_calls(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    /// Descriptors currently open.
    pub fn open_fds(&self) -> usize {
        self.state.lock().open.len()
    }

    fn with_fd<T>(
        &self,
        fd: DeviceFd,
        context: &'static str,
        f: impl FnOnce(&mut State, &mut OpenFd) -> FileResult<T>,
    ) -> FileResult<T> {
        let mut state = self.state.lock();
        let mut entry = state
            .open
            .remove(&fd.0)
            .ok_or(FileError::new(FileErrorKind::Closed, context))?;
        let result = f(&mut state, &mut entry);
        state.open.insert(fd.0, entry);
        result
    }
}

impl Device for MemDevice {
    fn name(&self) -> &'static str {
        "ram"
    }

    fn open(&self, name: &[u8], flags: FileFlags) -> FileResult<DeviceFd> {
        let mut state = self.state.lock();
        if !state.files.contains_key(name) {
            if !flags.writable() {
                return Err(FileError::new(FileErrorKind::NotFound, "mem.open"));
            }
            state.files.insert(name.to_vec(), Vec::new());
        } else if flags.writable() && !flags.readable() {
            // Write-only open truncates, as a fresh store.
            state.files.insert(name.to_vec(), Vec::new());
        }
        state.next_fd += 1;
        let fd = state.next_fd;
        state.open.insert(
            fd,
            OpenFd {
                name: name.to_vec(),
                pos: 0,
            },
        );
        Ok(DeviceFd(fd))
    }

    fn read(&self, fd: DeviceFd, buf: &mut [u8]) -> FileResult<usize> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        self.with_fd(fd, "mem.read", |state, entry| {
            let contents = state
                .files
                .get(&entry.name)
                .ok_or(FileError::new(FileErrorKind::NotFound, "mem.read"))?;
            let pos = entry.pos.min(contents.len() as u64) as usize;
            let n = buf.len().min(contents.len() - pos);
            buf[..n].copy_from_slice(&contents[pos..pos + n]);
            entry.pos += n as u64;
            Ok(n)
        })
    }

    fn write(&self, fd: DeviceFd, buf: &[u8]) -> FileResult<usize> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        self.with_fd(fd, "mem.write", |state, entry| {
            let contents = state
                .files
                .get_mut(&entry.name)
                .ok_or(FileError::new(FileErrorKind::NotFound, "mem.write"))?;
            let pos = entry.pos as usize;
            if pos > contents.len() {
                contents.resize(pos, 0);
            }
            let overlap = buf.len().min(contents.len().saturating_sub(pos));
            contents[pos..pos + overlap].copy_from_slice(&buf[..overlap]);
            contents.extend_from_slice(&buf[overlap..]);
            entry.pos += buf.len() as u64;
            Ok(buf.len())
        })
    }

    fn seek(&self, fd: DeviceFd, pos: SeekFrom) -> FileResult<u64> {
        self.with_fd(fd, "mem.seek", |state, entry| {
            let len = state
                .files
                .get(&entry.name)
                .map_or(0, |contents| contents.len() as u64);
            let target = match pos {
                SeekFrom::Start(offset) => offset as i64,
                SeekFrom::Current(delta) => entry.pos as i64 + delta,
                SeekFrom::End(delta) => len as i64 + delta,
            };
            if target < 0 {
                return Err(FileError::new(FileErrorKind::InvalidSeek, "mem.seek"));
            }
            entry.pos = target as u64;
            Ok(entry.pos)
        })
    }

    fn close(&self, fd: DeviceFd) -> FileResult<()> {
        self.closes.fetch_add(1, Ordering::SeqCst);
        let mut state = self.state.lock();
        state
            .open
            .remove(&fd.0)
            .map(|_| ())
            .ok_or(FileError::new(FileErrorKind::Closed, "mem.close"))
    }

    fn bytes_available(&self, fd: DeviceFd, total: bool) -> FileResult<Option<u64>> {
        self.with_fd(fd, "mem.bytes_available", |state, entry| {
            let len = state
                .files
                .get(&entry.name)
                .map_or(0, |contents| contents.len() as u64);
            if total {
                Ok(Some(len))
            } else {
                Ok(Some(len.saturating_sub(entry.pos)))
            }
        })
    }

    fn buffer_size_hint(&self) -> usize {
        self.config.buffer_size_hint
    }

    fn prefers_small_buffer(&self) -> bool {
        self.config.prefers_small_buffer
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn device() -> MemDevice {
        MemDevice::new(MemDeviceConfig::default())
    }

    #[test]
    fn read_only_open_of_missing_file_fails() {
        let dev = device();
        let err = dev
            .open(b"missing", FileFlags::READ)
            .expect_err("open should fail");
        assert_eq!(err.kind(), FileErrorKind::NotFound);
    }

    #[test]
    fn write_past_end_zero_fills() {
        let dev = device();
        let fd = dev
            .open(b"f", FileFlags::WRITE)
            .expect("open should succeed");
        dev.write(fd, b"ab").expect("write should succeed");
        dev.seek(fd, SeekFrom::Start(5)).expect("seek should succeed");
        dev.write(fd, b"z").expect("write should succeed");
        assert_eq!(dev.contents(b"f").expect("store exists"), b"ab\0\0\0z");
    }

    #[test]
    fn descriptors_are_independent() {
        let dev = device();
        dev.insert(b"f", b"hello");
        let a = dev.open(b"f", FileFlags::READ).expect("open a");
        let b = dev.open(b"f", FileFlags::READ).expect("open b");
        let mut buf = [0u8; 2];
        dev.read(a, &mut buf).expect("read a");
        assert_eq!(&buf, b"he");
        dev.read(b, &mut buf).expect("read b");
        assert_eq!(&buf, b"he");
        dev.close(a).expect("close a");
        let err = dev.read(a, &mut buf).expect_err("stale fd should fail");
        assert_eq!(err.kind(), FileErrorKind::Closed);
        assert_eq!(dev.open_fds(), 1);
    }
}
