//! Save/restore sweeps, filter chains, the closed sentinel, and device
//! teardown over the RAM device.

use pretty_assertions::assert_eq;
use ripfile_core::{
    Device, DeviceFd, FileError, FileErrorKind, FileFlags, FileHandle, FileOps, FileResult,
    FileTable, PdfContextId, SaveTag,
};
use ripfile_mem::{MemDevice, MemDeviceConfig};
use std::io::SeekFrom;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing_test::traced_test;

/// Minimal pass-through filter: reads delegate to the underlying node,
/// close just retires the node.
struct PassOps;

impl FileOps for PassOps {
    fn fill(&self, fs: &mut FileTable, h: FileHandle) -> FileResult<Option<u8>> {
        match fs.resolve_underlying(h) {
            Some(u) => fs.getc(u),
            None => Ok(None),
        }
    }

    fn init(&self, _fs: &mut FileTable, _h: FileHandle) -> FileResult<()> {
        Ok(())
    }

    fn close(&self, fs: &mut FileTable, h: FileHandle) -> FileResult<()> {
        fs.mark_closed(h)
    }
}

/// Transport whose writes always fail, counting descriptor releases
/// (close and abort alike).
struct BrokenPipeDevice {
    releases: AtomicUsize,
}

impl BrokenPipeDevice {
    fn new() -> Self {
        Self {
            releases: AtomicUsize::new(0),
        }
    }

    fn releases(&self) -> usize {
        self.releases.load(Ordering::SeqCst)
    }
}

impl Device for BrokenPipeDevice {
    fn name(&self) -> &'static str {
        "brokenpipe"
    }

    fn open(&self, _name: &[u8], _flags: FileFlags) -> FileResult<DeviceFd> {
        Ok(DeviceFd(1))
    }

    fn read(&self, _fd: DeviceFd, _buf: &mut [u8]) -> FileResult<usize> {
        Ok(0)
    }

    fn write(&self, _fd: DeviceFd, _buf: &[u8]) -> FileResult<usize> {
        Err(FileError::new(FileErrorKind::Io, "pipe.write"))
    }

    fn seek(&self, _fd: DeviceFd, _pos: SeekFrom) -> FileResult<u64> {
        Ok(0)
    }

    fn close(&self, _fd: DeviceFd) -> FileResult<()> {
        self.releases.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

fn setup() -> (FileTable, Arc<MemDevice>) {
    (
        FileTable::new(),
        Arc::new(MemDevice::new(MemDeviceConfig::default())),
    )
}

fn pass_filter(
    fs: &mut FileTable,
    underlying: Option<FileHandle>,
    save: SaveTag,
    context: Option<PdfContextId>,
) -> FileHandle {
    fs.open_filter(
        Arc::new(PassOps),
        underlying,
        FileFlags::READ,
        save,
        context,
        None,
    )
    .expect("filter open should succeed")
}

#[test]
#[traced_test]
fn restore_flushes_closes_and_retires_deeper_nodes() {
    let (mut fs, dev) = setup();
    let h = fs
        .open_file(dev.clone(), b"job", FileFlags::WRITE, SaveTag::local(3))
        .expect("open should succeed");
    fs.write(h, b"0123456789").expect("write should succeed");
    fs.set_position(h, 1000).expect("seek should succeed");
    fs.putc(h, b'!').expect("putc should succeed");

    fs.restore(2);
    assert!(fs.get(h).is_none());
    assert_eq!(dev.open_fds(), 0);
    assert_eq!(dev.close_calls(), 1);

    let contents = dev.contents(b"job").expect("store exists");
    assert_eq!(contents.len(), 1001);
    assert_eq!(&contents[..10], b"0123456789");
    assert_eq!(contents[1000], b'!');

    // The sweep is idempotent across repeated restores to the same level.
    fs.restore(2);
    assert_eq!(dev.close_calls(), 1);
    assert!(logs_contain("restored file registry"));
}

#[test]
fn restore_releases_the_descriptor_when_the_final_flush_fails() {
    let mut fs = FileTable::new();
    let dev = Arc::new(BrokenPipeDevice::new());
    let h = fs
        .open_file(dev.clone(), b"pipe", FileFlags::WRITE, SaveTag::local(3))
        .expect("open should succeed");
    fs.putc(h, b'x').expect("putc should succeed");

    // The buffered byte cannot be flushed; the sweep must still give the
    // descriptor back.
    fs.restore(2);
    assert!(fs.get(h).is_none());
    assert_eq!(dev.releases(), 1);
}

#[test]
fn global_filter_survives_local_restore_with_severed_chain() {
    let (mut fs, dev) = setup();
    dev.insert(b"data", b"abc");
    let f = fs
        .open_file(dev.clone(), b"data", FileFlags::READ, SaveTag::local(3))
        .expect("open should succeed");
    let g = pass_filter(&mut fs, Some(f), SaveTag::global(0), None);

    fs.restore(2);
    assert!(fs.get(f).is_none());
    let survivor = fs.get(g).expect("global filter survives a local restore");
    assert_eq!(survivor.underlying(), None);
    // Reads through the severed chain degrade to end-of-data.
    assert_eq!(fs.getc(g).expect("getc should succeed"), None);
}

#[test]
fn finalize_redirects_dependents_to_the_closed_sentinel() {
    let (mut fs, dev) = setup();
    dev.insert(b"data", b"abc");
    let f = fs
        .open_file(dev.clone(), b"data", FileFlags::READ, SaveTag::local(1))
        .expect("open should succeed");
    let g = pass_filter(&mut fs, Some(f), SaveTag::local(1), None);

    fs.finalize(f);
    assert!(fs.get(f).is_none());
    assert_eq!(
        fs.get(g).expect("filter stays registered").underlying(),
        Some(FileHandle::CLOSED)
    );

    // Every slot of the sentinel answers with the closed family instead of
    // faulting, so the chained read is a calm end-of-data.
    assert_eq!(fs.getc(g).expect("getc should succeed"), None);
    let err = fs
        .close(FileHandle::CLOSED)
        .expect_err("closing the sentinel should fail");
    assert_eq!(err.kind(), FileErrorKind::Closed);
}

#[test]
#[should_panic(expected = "finalize")]
fn finalize_of_an_unregistered_handle_panics() {
    let (mut fs, dev) = setup();
    let h = fs
        .open_file(dev.clone(), b"gone", FileFlags::WRITE, SaveTag::local(3))
        .expect("open should succeed");
    fs.restore(2);
    fs.finalize(h);
}

#[test]
fn stale_handles_resolve_to_nothing_after_slot_reuse() {
    let (mut fs, dev) = setup();
    let old = fs
        .open_file(dev.clone(), b"a", FileFlags::WRITE, SaveTag::local(3))
        .expect("open should succeed");
    fs.restore(2);

    let fresh = fs
        .open_file(dev.clone(), b"b", FileFlags::WRITE, SaveTag::local(1))
        .expect("open should succeed");
    assert_eq!(fresh.index(), old.index());
    assert_ne!(fresh.generation(), old.generation());
    assert!(fs.get(old).is_none());
    let err = fs.getc(old).expect_err("stale handle access should fail");
    assert_eq!(err.kind(), FileErrorKind::Closed);
}

#[test]
fn double_close_reports_closed_without_touching_the_device() {
    let (mut fs, dev) = setup();
    let h = fs
        .open_file(dev.clone(), b"once", FileFlags::WRITE, SaveTag::local(1))
        .expect("open should succeed");
    fs.close(h).expect("first close should succeed");
    assert_eq!(dev.close_calls(), 1);

    let err = fs.close(h).expect_err("second close should fail");
    assert_eq!(err.kind(), FileErrorKind::Closed);
    assert_eq!(dev.close_calls(), 1);
}

#[test]
fn context_teardown_severs_only_matching_chains() {
    let (mut fs, _dev) = setup();
    let ctx = PdfContextId::new(7).expect("nonzero id");

    let u1 = pass_filter(&mut fs, None, SaveTag::local(1), Some(ctx));
    let u2 = pass_filter(&mut fs, None, SaveTag::local(1), Some(ctx));
    let w1 = pass_filter(&mut fs, Some(u1), SaveTag::local(1), None);
    let w2 = pass_filter(&mut fs, Some(u2), SaveTag::local(1), None);

    fs.close_pdf_filters(ctx, Some(u1));
    let n1 = fs.get(w1).expect("wrapper stays registered");
    assert!(!n1.is_open());
    assert_eq!(n1.underlying(), None);
    let n2 = fs.get(w2).expect("untargeted wrapper untouched");
    assert!(n2.is_open());
    assert_eq!(n2.underlying(), Some(u2));

    fs.close_pdf_filters(ctx, None);
    let n2 = fs.get(w2).expect("wrapper stays registered");
    assert!(!n2.is_open());
    assert_eq!(n2.underlying(), None);
}

#[test]
fn restore_preserves_a_pending_error() {
    let (mut fs, dev) = setup();
    fs.signal_error(FileErrorKind::Io);
    let _h = fs
        .open_file(dev.clone(), b"doomed", FileFlags::WRITE, SaveTag::local(3))
        .expect("open should succeed");
    fs.restore(2);
    assert_eq!(fs.pending_error(), Some(FileErrorKind::Io));
}

#[test]
fn device_close_refuses_while_a_node_is_open() {
    let (mut fs, dev) = setup();
    dev.insert(b"f", b"abc");
    let h = fs
        .open_file(
            dev.clone(),
            b"f",
            FileFlags::READ | FileFlags::BASE,
            SaveTag::local(1),
        )
        .expect("open should succeed");

    let bound: Arc<dyn Device> = dev.clone();
    let err = fs
        .close_device(&bound)
        .expect_err("open node must block device teardown");
    assert_eq!(err.kind(), FileErrorKind::AccessConflict);

    fs.close(h).expect("close should succeed");
    fs.close_device(&bound)
        .expect("closed base node releases its binding");
    let node = fs.get(h).expect("node stays registered");
    assert_eq!(node.descriptor(), None);
}

#[test]
fn std_streams_outlive_full_restore_and_only_flush_on_close() {
    let (mut fs, dev) = setup();
    let s = fs
        .open_std(dev.clone(), b"%stdout", FileFlags::WRITE)
        .expect("std open should succeed");
    fs.write(s, b"showpage").expect("write should succeed");

    fs.restore(0);
    assert!(fs.get(s).expect("std stream survives").is_open());

    fs.close(s).expect("std close should succeed");
    assert_eq!(dev.contents(b"%stdout").expect("store exists"), b"showpage");
    assert_eq!(dev.close_calls(), 0);
    assert!(fs.get(s).expect("std stream persists").is_open());
}

#[test]
fn dump_walks_the_underlying_chain() {
    let (mut fs, dev) = setup();
    dev.insert(b"data", b"abc");
    let f = fs
        .open_file(dev.clone(), b"data", FileFlags::READ, SaveTag::local(1))
        .expect("open should succeed");
    let g = pass_filter(&mut fs, Some(f), SaveTag::local(1), None);

    let report = fs.dump(g);
    assert_eq!(report.matches("FileNode").count(), 2);
    assert!(report.contains("data"));
}
