//! Debug mode: structural trace events and error causes.
//!
//! Kept in its own test binary because the switch is process-wide.

use std::io::Write;
use std::sync::{Arc, Mutex};

use hdfkit::{
    debug_enabled, set_debug, ArrayData, ErrorKind, File, FileBuilder, ReadOptions, WriteOptions,
};

#[derive(Clone, Default)]
struct Captured(Arc<Mutex<Vec<u8>>>);

impl Write for Captured {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

impl Captured {
    fn take(&self) -> String {
        let mut buf = self.0.lock().unwrap();
        let text = String::from_utf8_lossy(&buf).into_owned();
        buf.clear();
        text
    }
}

fn sample() -> Vec<u8> {
    let mut b = FileBuilder::new();
    b.add_dataset(
        "/m",
        ArrayData::Float64((0..16).map(f64::from).collect()),
        &WriteOptions::default().shape(&[4, 4]).chunked(&[2, 2]).gzip(6),
    )
    .unwrap();
    b.finish().unwrap()
}

#[test]
fn debug_switch_controls_traces_and_causes() {
    let captured = Captured::default();
    let writer = captured.clone();
    let subscriber = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_ansi(false)
        .with_writer(move || writer.clone())
        .finish();
    let _guard = tracing::subscriber::set_default(subscriber);

    // off by default: nothing is emitted
    assert!(!debug_enabled());
    let file = File::from_bytes(sample()).unwrap();
    file.read_slice("/m", &[1, 1], &[3, 3], None).unwrap();
    assert!(captured.take().is_empty());

    // per call
    let ds = file.dataset_with("/m", &ReadOptions::debug(true)).unwrap();
    ds.read_slice(&[1, 1], &[3, 3], None).unwrap();
    let text = captured.take();
    assert!(text.contains("dataset"), "{text}");
    assert!(text.contains("chunk"), "{text}");
    assert!(text.contains("filter stage"), "{text}");

    // globally; causes show up in messages
    let short = File::from_bytes(b"\x89HDF\r\n\x1a\n\0".to_vec()).unwrap_err();
    assert_eq!(short.kind(), ErrorKind::CorruptedFile);
    assert!(!short.to_string().contains("caused by"));

    set_debug(true);
    let file = File::from_bytes(sample()).unwrap();
    file.read_data("/m").unwrap();
    let text = captured.take();
    assert!(text.contains("superblock"), "{text}");
    assert!(text.contains("object header"), "{text}");
    assert!(text.contains("group listing"), "{text}");
    assert!(short.to_string().contains("caused by"));

    // a per-call override still silences a single read
    file.dataset_with("/m", &ReadOptions::debug(false)).unwrap().read_data().unwrap();
    assert!(captured.take().is_empty());
    set_debug(false);
}
