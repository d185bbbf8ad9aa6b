//! Writing API: [`FileBuilder`] and [`write_dataset`].
//!
//! Files are assembled in memory and written in one go with a version-0
//! superblock and symbol-table groups, so any HDF5 reader can open them.

use std::path::Path;

use hdfkit_format::chunked_write::ChunkFilters;
use hdfkit_format::data_read::ArrayData;
use hdfkit_format::datatype::Datatype;
use hdfkit_format::file_writer::{AttributeSpec, DatasetSpec, FileWriter, LayoutSpec, RawValues};
use hdfkit_format::selection::element_count;
use hdfkit_format::FormatError;

use crate::error::{Error, Location, Result, MEMORY_FILE};
use crate::resolver::normalize;

/// Storage layout of a new dataset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Layout {
    #[default]
    Contiguous,
    /// Stored inside the object header; small datasets only.
    Compact,
    Chunked,
}

/// Compression filter for chunked datasets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compression {
    /// Deflate at level 0-9.
    Gzip(u32),
    Lzf,
}

/// Options for one dataset.
///
/// Any filter (compression, shuffle, Fletcher32) implies a chunked layout;
/// asking for filters together with [`Layout::Compact`] is an error.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WriteOptions {
    /// Dataset shape; `None` stores a one-dimensional array of all values.
    /// An empty shape stores a scalar.
    pub shape: Option<Vec<u64>>,
    pub layout: Layout,
    /// Chunk shape; `None` picks one from the dataset shape.
    pub chunk_dims: Option<Vec<u64>>,
    pub compression: Option<Compression>,
    pub shuffle: bool,
    pub fletcher32: bool,
    /// Single-element fill value for storage that is never written.
    pub fill_value: Option<ArrayData>,
    /// Store strings as variable-length strings in the global heap instead
    /// of fixed-length strings sized to the longest value.
    pub variable_length_strings: bool,
    pub attributes: Vec<(String, ArrayData)>,
}

impl WriteOptions {
    pub fn shape(mut self, shape: &[u64]) -> Self {
        self.shape = Some(shape.to_vec());
        self
    }

    pub fn compact(mut self) -> Self {
        self.layout = Layout::Compact;
        self
    }

    pub fn chunked(mut self, chunk_dims: &[u64]) -> Self {
        self.layout = Layout::Chunked;
        self.chunk_dims = Some(chunk_dims.to_vec());
        self
    }

    pub fn gzip(mut self, level: u32) -> Self {
        self.compression = Some(Compression::Gzip(level));
        self
    }

    pub fn lzf(mut self) -> Self {
        self.compression = Some(Compression::Lzf);
        self
    }

    pub fn shuffle(mut self) -> Self {
        self.shuffle = true;
        self
    }

    pub fn fletcher32(mut self) -> Self {
        self.fletcher32 = true;
        self
    }

    pub fn fill_value(mut self, value: ArrayData) -> Self {
        self.fill_value = Some(value);
        self
    }

    pub fn variable_length_strings(mut self) -> Self {
        self.variable_length_strings = true;
        self
    }

    pub fn attribute(mut self, name: &str, value: ArrayData) -> Self {
        self.attributes.push((name.to_owned(), value));
        self
    }

    fn filters(&self) -> ChunkFilters {
        ChunkFilters {
            shuffle: self.shuffle,
            deflate: match self.compression {
                Some(Compression::Gzip(level)) => Some(level),
                _ => None,
            },
            lzf: self.compression == Some(Compression::Lzf),
            fletcher32: self.fletcher32,
        }
    }
}

/// Builder for a new HDF5 file.
///
/// # Example
///
/// ```no_run
/// use hdfkit::{ArrayData, FileBuilder, WriteOptions};
///
/// let mut builder = FileBuilder::new();
/// builder.create_group("/sensors")?;
/// builder.add_dataset(
///     "/sensors/temperature",
///     ArrayData::Float64(vec![22.5, 23.1, 21.8]),
///     &WriteOptions::default().attribute("unit", ArrayData::String(vec!["C".into()])),
/// )?;
/// builder.write("output.h5")?;
/// # Ok::<(), hdfkit::Error>(())
/// ```
#[derive(Debug, Clone, Default)]
pub struct FileBuilder {
    writer: FileWriter,
}

impl FileBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a group and any missing parents. Existing groups are kept.
    pub fn create_group(&mut self, path: &str) -> Result<()> {
        self.writer.create_group(path).map_err(|e| fail(path, e))
    }

    /// Add a dataset, creating missing parent groups.
    pub fn add_dataset(&mut self, path: &str, data: ArrayData, options: &WriteOptions) -> Result<()> {
        let spec = dataset_spec(data, options).map_err(|e| e.at(path))?;
        self.writer.add_dataset(path, spec).map_err(|e| fail(path, e))
    }

    /// Attach an attribute to an existing group or dataset (`"/"` for the
    /// root group). Strings are stored as fixed-length strings.
    pub fn set_attribute(&mut self, object_path: &str, name: &str, value: ArrayData) -> Result<()> {
        let attr = attribute_spec(name, value).map_err(|e| e.at(object_path))?;
        self.writer
            .add_attribute(object_path, attr)
            .map_err(|e| fail(object_path, e))
    }

    pub fn add_soft_link(&mut self, path: &str, target: &str) -> Result<()> {
        self.writer.add_soft_link(path, target).map_err(|e| fail(path, e))
    }

    pub fn add_external_link(&mut self, path: &str, filename: &str, object_path: &str) -> Result<()> {
        self.writer
            .add_external_link(path, filename, object_path)
            .map_err(|e| fail(path, e))
    }

    /// Encode the file.
    pub fn finish(self) -> Result<Vec<u8>> {
        self.writer.finish().map_err(|e| fail("/", e))
    }

    /// Encode the file and write it to `path`, replacing any existing file.
    pub fn write<P: AsRef<Path>>(self, path: P) -> Result<()> {
        let path = path.as_ref();
        let bytes = self.finish()?;
        std::fs::write(path, bytes).map_err(|e| Error::io(Location::new(path.display().to_string(), "/"), e))
    }
}

/// Write a new file at `path` holding one dataset at `object_path`, creating
/// any missing parent groups.
pub fn write_dataset<P: AsRef<Path>>(path: P, object_path: &str, data: ArrayData, options: &WriteOptions) -> Result<()> {
    let mut builder = FileBuilder::new();
    builder.add_dataset(object_path, data, options)?;
    builder.write(path)
}

/// A failure before the object path is known.
#[derive(Debug)]
enum Invalid {
    Format(FormatError),
    Argument(String),
    Datatype(String),
}

impl Invalid {
    fn at(self, object: &str) -> Error {
        let at = Location::new(MEMORY_FILE, normalize(object));
        match self {
            Invalid::Format(e) => Error::format(at, e),
            Invalid::Argument(detail) => Error::invalid(at, detail),
            Invalid::Datatype(detail) => Error::UnsupportedDatatype {
                at,
                detail,
                cause: None,
            },
        }
    }
}

impl From<FormatError> for Invalid {
    fn from(e: FormatError) -> Self {
        Invalid::Format(e)
    }
}

fn fail(object: &str, e: FormatError) -> Error {
    Error::format(Location::new(MEMORY_FILE, normalize(object)), e)
}

/// Datatype and encoded values for `data`.
fn encode(data: &ArrayData, vlen_strings: bool) -> std::result::Result<(Datatype, RawValues), Invalid> {
    match data {
        ArrayData::String(v) if vlen_strings => Ok((Datatype::vlen_string(8), RawValues::VlenStrings(v.clone()))),
        ArrayData::Values(_) => Err(Invalid::Datatype("generic values cannot be written".into())),
        _ => {
            let datatype = data.natural_datatype()?;
            let bytes = data.to_bytes(&datatype)?;
            Ok((datatype, RawValues::Fixed(bytes)))
        }
    }
}

fn attribute_spec(name: &str, value: ArrayData) -> std::result::Result<AttributeSpec, Invalid> {
    let (datatype, values) = encode(&value, false)?;
    // a single value becomes a scalar attribute
    let dims = if value.len() == 1 { Vec::new() } else { vec![value.len() as u64] };
    Ok(AttributeSpec {
        name: name.to_owned(),
        datatype,
        dims,
        values,
    })
}

fn dataset_spec(data: ArrayData, options: &WriteOptions) -> std::result::Result<DatasetSpec, Invalid> {
    let dims = options.shape.clone().unwrap_or_else(|| vec![data.len() as u64]);
    if element_count(&dims) != Some(data.len() as u64) {
        return Err(Invalid::Argument(format!(
            "{} values do not fill shape {dims:?}",
            data.len()
        )));
    }
    let (datatype, values) = encode(&data, options.variable_length_strings)?;

    let filters = options.filters();
    let layout = match (options.layout, filters.is_empty()) {
        (Layout::Compact, false) => return Err(Invalid::Argument("filters need a chunked layout".into())),
        (Layout::Compact, true) => LayoutSpec::Compact,
        (Layout::Contiguous, true) if options.chunk_dims.is_none() => LayoutSpec::Contiguous,
        _ => LayoutSpec::Chunked(options.chunk_dims.clone()),
    };

    let fill_value = match &options.fill_value {
        None => None,
        Some(fill) if fill.len() != 1 => return Err(Invalid::Argument("fill value must be a single element".into())),
        Some(fill) => Some(fill.to_bytes(&datatype)?),
    };

    let mut attributes = Vec::with_capacity(options.attributes.len());
    for (name, value) in &options.attributes {
        attributes.push(attribute_spec(name, value.clone())?);
    }

    let mut spec = DatasetSpec::new(datatype, dims, values);
    spec.layout = layout;
    spec.filters = filters;
    spec.fill_value = fill_value;
    spec.attributes = attributes;
    Ok(spec)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn filters_imply_chunking() {
        let opts = WriteOptions::default().gzip(4).shuffle();
        let spec = dataset_spec(ArrayData::Int32(vec![1, 2, 3, 4]), &opts).unwrap();
        assert_eq!(spec.layout, LayoutSpec::Chunked(None));
        assert_eq!(spec.filters.deflate, Some(4));
        assert!(spec.filters.shuffle);
    }

    #[test]
    fn shape_must_match_values() {
        let opts = WriteOptions::default().shape(&[2, 3]);
        let err = dataset_spec(ArrayData::Float64(vec![1.0; 5]), &opts).unwrap_err().at("x");
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
        assert_eq!(err.location().object, "/x");
    }

    #[test]
    fn compact_rejects_filters() {
        let opts = WriteOptions::default().compact().lzf();
        let err = dataset_spec(ArrayData::UInt8(vec![1, 2]), &opts).unwrap_err().at("/c");
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
    }

    #[test]
    fn vlen_strings_are_opt_in() {
        let data = ArrayData::String(vec!["a".into(), "bcd".into()]);
        let fixed = dataset_spec(data.clone(), &WriteOptions::default()).unwrap();
        assert_eq!(fixed.datatype, Datatype::fixed_string(3));
        let vlen = dataset_spec(data, &WriteOptions::default().variable_length_strings()).unwrap();
        assert!(matches!(vlen.values, RawValues::VlenStrings(ref v) if v.len() == 2));
    }

    #[test]
    fn builder_reports_duplicate_paths() {
        let mut b = FileBuilder::new();
        b.create_group("/g").unwrap();
        b.create_group("/g").unwrap();
        b.add_dataset("/g/x", ArrayData::UInt8(vec![1]), &WriteOptions::default()).unwrap();
        let err = b
            .add_dataset("g/x", ArrayData::UInt8(vec![2]), &WriteOptions::default())
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
        assert_eq!(err.location().object, "/g/x");
    }
}
