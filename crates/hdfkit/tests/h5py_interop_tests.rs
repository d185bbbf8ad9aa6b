//! Interop with h5py in both directions: files written here are read by the
//! reference library, and files the reference library writes are read here.
//!
//! Tests are skipped if python3 with h5py and numpy is not available.

use std::path::Path;
use std::process::Command;

use hdfkit::{ArrayData, DType, ErrorKind, File, FileBuilder, LinkInfo, Node, Value, WriteOptions};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn python_available() -> bool {
    Command::new("python3")
        .args(["-c", "import h5py, numpy; print(h5py.__version__)"])
        .output()
        .map(|o| o.status.success())
        .unwrap_or(false)
}

macro_rules! skip_if_no_python {
    () => {
        if !python_available() {
            eprintln!("SKIP: python3 with h5py not available");
            return;
        }
    };
}

/// Run a Python script with `dir` as its working directory and return its
/// trimmed stdout. Panics if the script fails.
fn run_python(dir: &Path, script: &str) -> String {
    let output = Command::new("python3")
        .args(["-c", script])
        .current_dir(dir)
        .output()
        .expect("failed to run python3");
    if !output.status.success() {
        panic!(
            "python script failed:\nSTDOUT: {}\nSTDERR: {}",
            String::from_utf8_lossy(&output.stdout),
            String::from_utf8_lossy(&output.stderr)
        );
    }
    String::from_utf8_lossy(&output.stdout).trim().to_string()
}

fn run_python_json(dir: &Path, script: &str) -> serde_json::Value {
    let out = run_python(dir, script);
    serde_json::from_str(&out).unwrap_or_else(|e| panic!("bad JSON from python ({e}): {out}"))
}

fn grid(rows: usize, cols: usize) -> Vec<f64> {
    (0..rows * cols).map(|v| v as f64).collect()
}

// ===========================================================================
// Written here, read by h5py
// ===========================================================================

#[test]
fn h5py_reads_contiguous_and_compact_datasets() {
    skip_if_no_python!();
    let dir = tempfile::tempdir().unwrap();

    let mut b = FileBuilder::new();
    b.add_dataset("values", ArrayData::Float64(vec![1.5, 2.5, -4.5]), &WriteOptions::default())
        .unwrap();
    b.add_dataset(
        "matrix",
        ArrayData::Int32((0..6).collect()),
        &WriteOptions::default().shape(&[2, 3]),
    )
    .unwrap();
    b.add_dataset(
        "small",
        ArrayData::UInt16(vec![7, 8, 9]),
        &WriteOptions::default().compact(),
    )
    .unwrap();
    b.add_dataset("i8", ArrayData::Int8(vec![-128, 0, 127]), &WriteOptions::default()).unwrap();
    b.add_dataset("u64", ArrayData::UInt64(vec![0, u64::MAX]), &WriteOptions::default()).unwrap();
    b.add_dataset("f32", ArrayData::Float32(vec![0.25, -8.0]), &WriteOptions::default()).unwrap();
    b.write(dir.path().join("out.h5")).unwrap();

    let got = run_python_json(
        dir.path(),
        r#"
import h5py, json
with h5py.File("out.h5", "r") as f:
    out = {}
    for name in ["values", "matrix", "small", "i8", "u64", "f32"]:
        ds = f[name]
        out[name] = {"dtype": str(ds.dtype), "shape": list(ds.shape), "data": ds[()].tolist()}
    out["small_layout"] = f["small"].id.get_create_plist().get_layout()
    print(json.dumps(out))
"#,
    );
    assert_eq!(got["values"]["dtype"], "float64");
    assert_eq!(got["values"]["data"], serde_json::json!([1.5, 2.5, -4.5]));
    assert_eq!(got["matrix"]["dtype"], "int32");
    assert_eq!(got["matrix"]["shape"], serde_json::json!([2, 3]));
    assert_eq!(got["matrix"]["data"], serde_json::json!([[0, 1, 2], [3, 4, 5]]));
    assert_eq!(got["small"]["dtype"], "uint16");
    assert_eq!(got["small"]["data"], serde_json::json!([7, 8, 9]));
    // H5D_COMPACT
    assert_eq!(got["small_layout"], 0);
    assert_eq!(got["i8"]["data"], serde_json::json!([-128, 0, 127]));
    assert_eq!(got["u64"]["data"], serde_json::json!([0u64, u64::MAX]));
    assert_eq!(got["f32"]["dtype"], "float32");
    assert_eq!(got["f32"]["data"], serde_json::json!([0.25, -8.0]));
}

#[test]
fn h5py_reads_filtered_chunks() {
    skip_if_no_python!();
    let dir = tempfile::tempdir().unwrap();

    let mut b = FileBuilder::new();
    b.add_dataset(
        "gz",
        ArrayData::Float64(grid(5, 7)),
        &WriteOptions::default()
            .shape(&[5, 7])
            .chunked(&[2, 3])
            .gzip(6)
            .shuffle()
            .fletcher32(),
    )
    .unwrap();
    b.add_dataset(
        "lzf",
        ArrayData::Int64((0..100).collect()),
        &WriteOptions::default().chunked(&[16]).lzf(),
    )
    .unwrap();
    b.write(dir.path().join("chunks.h5")).unwrap();

    let got = run_python_json(
        dir.path(),
        r#"
import h5py, json
with h5py.File("chunks.h5", "r") as f:
    gz, lzf = f["gz"], f["lzf"]
    print(json.dumps({
        "chunks": list(gz.chunks),
        "compression": gz.compression,
        "shuffle": gz.shuffle,
        "fletcher32": gz.fletcher32,
        "gz": gz[()].ravel().tolist(),
        "gz_slice": gz[1:4, 2:7:2].ravel().tolist(),
        "lzf_compression": lzf.compression,
        "lzf": lzf[()].tolist(),
    }))
"#,
    );
    assert_eq!(got["chunks"], serde_json::json!([2, 3]));
    assert_eq!(got["compression"], "gzip");
    assert_eq!(got["shuffle"], true);
    assert_eq!(got["fletcher32"], true);
    assert_eq!(got["gz"], serde_json::json!(grid(5, 7)));
    assert_eq!(
        got["gz_slice"],
        serde_json::json!([9.0, 11.0, 13.0, 16.0, 18.0, 20.0, 23.0, 25.0, 27.0])
    );
    assert_eq!(got["lzf_compression"], "lzf");
    assert_eq!(got["lzf"], serde_json::json!((0..100).collect::<Vec<i64>>()));
}

#[test]
fn h5py_reads_strings_attributes_and_links() {
    skip_if_no_python!();
    let dir = tempfile::tempdir().unwrap();

    let mut target = FileBuilder::new();
    target
        .add_dataset("/inner/v", ArrayData::Int32(vec![4, 5, 6]), &WriteOptions::default())
        .unwrap();
    target.write(dir.path().join("target.h5")).unwrap();

    let mut b = FileBuilder::new();
    b.create_group("/g/h").unwrap();
    b.add_dataset(
        "/g/fixed",
        ArrayData::String(vec!["alpha".into(), "be".into()]),
        &WriteOptions::default(),
    )
    .unwrap();
    b.add_dataset(
        "/g/vlen",
        ArrayData::String(vec!["x".into(), "longer text".into()]),
        &WriteOptions::default().variable_length_strings(),
    )
    .unwrap();
    b.add_dataset(
        "/g/h/filled",
        ArrayData::Int32(vec![1, 2, 3, 4]),
        &WriteOptions::default()
            .chunked(&[2])
            .fill_value(ArrayData::Int32(vec![-1]))
            .attribute("units", ArrayData::String(vec!["m".into()]))
            .attribute("scale", ArrayData::Float64(vec![0.5, 2.0])),
    )
    .unwrap();
    b.set_attribute("/g", "count", ArrayData::Int32(vec![7])).unwrap();
    b.add_soft_link("/alias", "/g/h/filled").unwrap();
    b.add_external_link("/ext", "target.h5", "/inner/v").unwrap();
    b.write(dir.path().join("main.h5")).unwrap();

    let got = run_python_json(
        dir.path(),
        r#"
import h5py, json
def text(v):
    return v.decode() if isinstance(v, bytes) else str(v)
with h5py.File("main.h5", "r") as f:
    filled = f["g/h/filled"]
    soft = f.get("alias", getlink=True)
    ext = f.get("ext", getlink=True)
    print(json.dumps({
        "fixed": [text(s) for s in f["g/fixed"][()]],
        "vlen": [text(s) for s in f["g/vlen"][()]],
        "count": int(f["g"].attrs["count"]),
        "units": text(filled.attrs["units"]),
        "scale": filled.attrs["scale"].tolist(),
        "fill": int(filled.fillvalue),
        "alias": f["alias"][()].tolist(),
        "soft_path": soft.path,
        "ext_file": ext.filename,
        "ext_path": ext.path,
        "ext": f["ext"][()].tolist(),
        "groups": sorted(f["g"].keys()),
    }))
"#,
    );
    assert_eq!(got["fixed"], serde_json::json!(["alpha", "be"]));
    assert_eq!(got["vlen"], serde_json::json!(["x", "longer text"]));
    assert_eq!(got["count"], 7);
    assert_eq!(got["units"], "m");
    assert_eq!(got["scale"], serde_json::json!([0.5, 2.0]));
    assert_eq!(got["fill"], -1);
    assert_eq!(got["alias"], serde_json::json!([1, 2, 3, 4]));
    assert_eq!(got["soft_path"], "/g/h/filled");
    assert_eq!(got["ext_file"], "target.h5");
    assert_eq!(got["ext_path"], "/inner/v");
    assert_eq!(got["ext"], serde_json::json!([4, 5, 6]));
    assert_eq!(got["groups"], serde_json::json!(["fixed", "h", "vlen"]));
}

// ===========================================================================
// Written by h5py, read here
// ===========================================================================

#[test]
fn reads_h5py_default_format() {
    skip_if_no_python!();
    let dir = tempfile::tempdir().unwrap();
    run_python(
        dir.path(),
        r#"
import h5py, numpy as np
with h5py.File("ref.h5", "w") as f:
    f.attrs["title"] = "reference"
    f.create_dataset("f64", data=np.array([1.5, 2.5, 3.5, -4.5, 0.0]))
    f.create_dataset("i16", data=np.array([256, -256], dtype=np.int16))
    f.create_dataset("u8", data=np.array([0, 128, 255], dtype=np.uint8))
    f.create_dataset("f32", data=np.array([1.5, 2.5], dtype=np.float32))
    f.create_dataset("flags", data=np.array([True, False, True]))
    f.create_dataset("fixed", data=np.array([b"alice", b"bob"], dtype="S10"))
    f.create_dataset("names", data=["alpha", "beta"], dtype=h5py.string_dtype())
    pts = np.array([(1.5, 10), (3.0, 20)], dtype=[("x", "<f8"), ("id", "<i4")])
    f.create_dataset("points", data=pts)
    g = f.create_group("level1/level2")
    g.attrs["g_attr"] = 3.25
    f["level1"].attrs["n"] = 42
    g.create_dataset("deep", data=np.arange(70, dtype=np.float64).reshape(10, 7),
                     chunks=(3, 4), compression="gzip", compression_opts=4,
                     shuffle=True, fletcher32=True)
    f["soft"] = h5py.SoftLink("/level1/level2/deep")
    f["loop"] = h5py.SoftLink("/loop")
"#,
    );

    let file = File::open(dir.path().join("ref.h5")).unwrap();
    assert_eq!(file.superblock().version, 0);

    let ds = file.dataset("f64").unwrap();
    assert_eq!(ds.dtype(), DType::F64);
    assert_eq!(ds.shape(), &[5]);
    assert_eq!(ds.read_data().unwrap(), ArrayData::Float64(vec![1.5, 2.5, 3.5, -4.5, 0.0]));
    assert_eq!(file.read_data("i16").unwrap(), ArrayData::Int16(vec![256, -256]));
    assert_eq!(file.read_data("u8").unwrap(), ArrayData::UInt8(vec![0, 128, 255]));
    assert_eq!(file.read_data("f32").unwrap(), ArrayData::Float32(vec![1.5, 2.5]));
    assert_eq!(file.read_data("flags").unwrap(), ArrayData::Bool(vec![true, false, true]));
    assert_eq!(
        file.read_data("fixed").unwrap(),
        ArrayData::String(vec!["alice".into(), "bob".into()])
    );
    let names = file.dataset("names").unwrap();
    assert_eq!(names.dtype(), DType::VariableLengthString);
    assert_eq!(
        names.read_data().unwrap(),
        ArrayData::String(vec!["alpha".into(), "beta".into()])
    );

    let points = file.dataset("points").unwrap();
    assert_eq!(
        points.dtype(),
        DType::Compound(vec![("x".into(), DType::F64), ("id".into(), DType::I32)])
    );
    assert_eq!(
        points.read_data().unwrap(),
        ArrayData::Values(vec![
            Value::Compound(vec![("x".into(), Value::Float(1.5)), ("id".into(), Value::Int(10))]),
            Value::Compound(vec![("x".into(), Value::Float(3.0)), ("id".into(), Value::Int(20))]),
        ])
    );

    let title = file.root().unwrap().attribute("title").unwrap().unwrap();
    assert_eq!(title.value, ArrayData::String(vec!["reference".into()]));
    assert!(title.shape.is_empty());
    let n = file.group("level1").unwrap().attribute("n").unwrap().unwrap();
    assert_eq!(n.value, ArrayData::Int64(vec![42]));
    let g = file.group("level1/level2").unwrap();
    assert_eq!(g.attribute("g_attr").unwrap().unwrap().value, ArrayData::Float64(vec![3.25]));

    // B-tree indexed chunks, partial edge chunks, every filter h5py applied
    let deep = g.dataset("deep").unwrap();
    assert_eq!(deep.shape(), &[10, 7]);
    assert_eq!(deep.read_data().unwrap(), ArrayData::Float64(grid(10, 7)));
    assert_eq!(
        deep.read_slice(&[8, 1], &[10, 7], Some(&[1, 3])).unwrap(),
        ArrayData::Float64(vec![57.0, 60.0, 64.0, 67.0])
    );
    let blocks: Vec<ArrayData> = deep.read_chunked(4).unwrap().map(Result::unwrap).collect();
    assert_eq!(blocks.len(), 3);

    assert_eq!(file.read_data("soft").unwrap(), ArrayData::Float64(grid(10, 7)));
    assert_eq!(
        file.get_link_info("soft").unwrap(),
        LinkInfo::Soft {
            name: "soft".into(),
            target: "/level1/level2/deep".into()
        }
    );
    assert_eq!(file.dataset("loop").unwrap_err().kind(), ErrorKind::CircularLink);
}

#[test]
fn reads_h5py_latest_format() {
    skip_if_no_python!();
    let dir = tempfile::tempdir().unwrap();
    run_python(
        dir.path(),
        r#"
import h5py, numpy as np
with h5py.File("other.h5", "w") as f:
    f.create_dataset("remote", data=np.array([9, 8, 7], dtype=np.int32))
with h5py.File("latest.h5", "w", libver="latest") as f:
    many = f.create_group("many")
    for i in range(40):
        many.create_dataset("d%02d" % i, data=np.array([i], dtype=np.int64))
    for i in range(20):
        many.attrs["a%02d" % i] = i * 1.5
    f.create_dataset("contig", data=np.arange(12, dtype=np.int32).reshape(3, 4))
    f.create_dataset("small", data=np.array([1, 2, 3], dtype=np.uint16))
    f.create_dataset("single", data=np.arange(20, dtype=np.float64).reshape(4, 5),
                     chunks=(4, 5), compression="gzip", shuffle=True)
    f.create_dataset("fixed_index", data=np.arange(100, dtype=np.float64), chunks=(10,))
    f["ext"] = h5py.ExternalLink("other.h5", "/remote")
"#,
    );

    let file = File::open(dir.path().join("latest.h5")).unwrap();
    assert!(file.superblock().version >= 2);

    // link messages in a fractal heap, indexed by a v2 B-tree
    let many = file.group("many").unwrap();
    let children = many.datasets().unwrap();
    assert_eq!(children.len(), 40);
    for i in [0i64, 17, 39] {
        let ds = many.dataset(&format!("d{i:02}")).unwrap();
        assert_eq!(ds.read_data().unwrap(), ArrayData::Int64(vec![i]));
    }
    let attrs = many.attributes().unwrap();
    assert_eq!(attrs.len(), 20);
    let a7 = many.attribute("a07").unwrap().unwrap();
    assert_eq!(a7.value, ArrayData::Float64(vec![10.5]));

    assert_eq!(file.read_data("contig").unwrap(), ArrayData::Int32((0..12).collect()));
    assert_eq!(file.read_data("small").unwrap(), ArrayData::UInt16(vec![1, 2, 3]));
    let single = file.dataset("single").unwrap();
    assert_eq!(single.read_data().unwrap(), ArrayData::Float64(grid(4, 5)));
    assert_eq!(
        single.read_slice(&[1, 1], &[3, 3], None).unwrap(),
        ArrayData::Float64(vec![6.0, 7.0, 11.0, 12.0])
    );

    // fixed-array chunk indexes are not decoded
    assert_eq!(
        file.read_data("fixed_index").unwrap_err().kind(),
        ErrorKind::UnsupportedFeature
    );

    assert_eq!(file.read_data("ext").unwrap(), ArrayData::Int32(vec![9, 8, 7]));

    let summary = file.inspect("/").unwrap();
    assert_eq!(summary.root.find("/many").unwrap().children().len(), 40);
    assert!(matches!(
        summary.root.find("/fixed_index"),
        Some(Node::Dataset { layout: "unsupported", .. })
    ));
}
