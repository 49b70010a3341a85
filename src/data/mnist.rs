//! Reader for the MNIST IDX files.
//!
//! Image files start with the big-endian header `2051, count, rows, cols`,
//! label files with `2049, count`, and the raw `u8` payload follows. Each file
//! may sit in the data directory as is or gzip compressed with a `.gz` suffix.

use std::fs::File;
use std::io::{self, BufReader, Read};
use std::path::{Path, PathBuf};

use flate2::read::GzDecoder;
use log::{debug, info, warn};

use crate::data::one_hot;
use crate::error::{Error, Result};
use crate::tensor::{Numeric, RcTensor};

pub const TRAIN_IMAGES: &str = "train-images-idx3-ubyte";
pub const TRAIN_LABELS: &str = "train-labels-idx1-ubyte";
pub const TEST_IMAGES: &str = "t10k-images-idx3-ubyte";
pub const TEST_LABELS: &str = "t10k-labels-idx1-ubyte";

pub const IMAGE_MAGIC: u32 = 2051;
pub const LABEL_MAGIC: u32 = 2049;

pub const NUM_CLASSES: usize = 10;
pub const IMAGE_ROWS: usize = 28;
pub const IMAGE_COLS: usize = 28;

const READ_CHUNK: usize = 1 << 20;

/// One split of the dataset, images stored row-major one after another.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MnistSplit {
    pub images: Vec<u8>,
    pub labels: Vec<u8>,
    pub rows: usize,
    pub cols: usize,
}

impl MnistSplit {
    pub fn new(images: Vec<u8>, labels: Vec<u8>, rows: usize, cols: usize) -> Result<Self> {
        let pixels = rows * cols;
        if pixels == 0 || images.len() != labels.len() * pixels {
            return Err(Error::CountMismatch {
                images: images.len().checked_div(pixels).unwrap_or(0),
                labels: labels.len(),
            });
        }
        Ok(MnistSplit {
            images,
            labels,
            rows,
            cols,
        })
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    pub fn image(&self, index: usize) -> Option<&[u8]> {
        let pixels = self.rows * self.cols;
        self.images.get(index * pixels..(index + 1) * pixels)
    }

    /// `[n, rows, cols]`, divided by 255 when `scale` is set.
    pub fn images_tensor<T: Numeric>(&self, scale: bool) -> RcTensor<T> {
        let factor = if scale { 1.0 / 255.0 } else { 1.0 };
        let array = self
            .images
            .iter()
            .map(|&pixel| T::from_f64_lossy(pixel as f64 * factor))
            .collect();
        RcTensor::new(array, vec![self.len(), self.rows, self.cols])
    }

    /// `[n, num_classes]` one-hot targets.
    pub fn labels_tensor<T: Numeric>(&self, num_classes: usize) -> Result<RcTensor<T>> {
        one_hot(&self.labels, num_classes)
    }
}

/// Both splits, the `(x_train, y_train), (x_test, y_test)` of the dataset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mnist {
    pub train: MnistSplit,
    pub test: MnistSplit,
}

impl Mnist {
    #[allow(clippy::type_complexity)]
    pub fn into_arrays(self) -> ((Vec<u8>, Vec<u8>), (Vec<u8>, Vec<u8>)) {
        (
            (self.train.images, self.train.labels),
            (self.test.images, self.test.labels),
        )
    }
}

/// Loads the four MNIST files from `dir`.
pub fn load_data<P: AsRef<Path>>(dir: P) -> Result<Mnist> {
    let dir = dir.as_ref();
    let train = load_split(dir, TRAIN_IMAGES, TRAIN_LABELS)?;
    let test = load_split(dir, TEST_IMAGES, TEST_LABELS)?;
    info!(
        "loaded {} training and {} test images of {}x{} from {}",
        train.len(),
        test.len(),
        train.rows,
        train.cols,
        dir.display()
    );
    for (name, split) in [("training", &train), ("test", &test)] {
        if split.is_empty() {
            warn!("{name} split in {} is empty", dir.display());
        }
    }
    Ok(Mnist { train, test })
}

pub fn load_split(dir: &Path, images_name: &str, labels_name: &str) -> Result<MnistSplit> {
    let (images, rows, cols) = read_images(dir, images_name)?;
    let labels = read_labels(dir, labels_name)?;
    MnistSplit::new(images, labels, rows, cols)
}

fn io_error(path: &Path) -> impl FnOnce(io::Error) -> Error + '_ {
    move |source| Error::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// Opens `dir/name`, falling back to `dir/name.gz`.
fn open(dir: &Path, name: &str) -> Result<(PathBuf, Box<dyn Read>)> {
    let plain = dir.join(name);
    if plain.is_file() {
        let file = File::open(&plain).map_err(io_error(&plain))?;
        debug!("reading {}", plain.display());
        return Ok((plain, Box::new(BufReader::new(file))));
    }
    let gzipped = dir.join(format!("{name}.gz"));
    if gzipped.is_file() {
        let file = File::open(&gzipped).map_err(io_error(&gzipped))?;
        debug!("reading {}", gzipped.display());
        return Ok((gzipped, Box::new(GzDecoder::new(BufReader::new(file)))));
    }
    Err(Error::MissingFile {
        name: name.to_string(),
        dir: dir.to_path_buf(),
    })
}

/// Reads exactly `len` bytes, reporting a short read as truncation.
fn read_exactly(reader: &mut dyn Read, path: &Path, len: usize) -> Result<Vec<u8>> {
    // `len` comes from the file header, let the buffer grow with the data
    let mut buf = Vec::with_capacity(len.min(READ_CHUNK));
    reader
        .take(len as u64)
        .read_to_end(&mut buf)
        .map_err(io_error(path))?;
    if buf.len() < len {
        return Err(Error::Truncated {
            path: path.to_path_buf(),
            expected: len,
            found: buf.len(),
        });
    }
    Ok(buf)
}

/// Checks the magic number and returns the `dims` header fields after it.
fn read_header(
    reader: &mut dyn Read,
    path: &Path,
    magic: u32,
    dims: usize,
) -> Result<Vec<usize>> {
    let found = be_u32(&read_exactly(reader, path, 4)?);
    if found != magic {
        return Err(Error::BadMagic {
            path: path.to_path_buf(),
            expected: magic,
            found,
        });
    }
    let fields = read_exactly(reader, path, 4 * dims)?;
    Ok(fields.chunks_exact(4).map(|field| be_u32(field) as usize).collect())
}

fn be_u32(bytes: &[u8]) -> u32 {
    u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
}

/// Product of the header dimensions, rejecting sizes no buffer could hold.
fn payload_len(path: &Path, dims: &[usize]) -> Result<usize> {
    dims.iter()
        .try_fold(1usize, |len, &dim| len.checked_mul(dim))
        .ok_or_else(|| Error::OversizedHeader {
            path: path.to_path_buf(),
            dims: dims.to_vec(),
        })
}

fn read_images(dir: &Path, name: &str) -> Result<(Vec<u8>, usize, usize)> {
    let (path, mut reader) = open(dir, name)?;
    let header = read_header(&mut reader, &path, IMAGE_MAGIC, 3)?;
    let (rows, cols) = (header[1], header[2]);
    let len = payload_len(&path, &header)?;
    let images = read_exactly(&mut reader, &path, len)?;
    Ok((images, rows, cols))
}

fn read_labels(dir: &Path, name: &str) -> Result<Vec<u8>> {
    let (path, mut reader) = open(dir, name)?;
    let header = read_header(&mut reader, &path, LABEL_MAGIC, 1)?;
    read_exactly(&mut reader, &path, header[0])
}

#[test]
fn test_split_rejects_count_mismatch() {
    assert!(matches!(
        MnistSplit::new(vec![0; 8], vec![1, 2, 3], 2, 2),
        Err(Error::CountMismatch {
            images: 2,
            labels: 3
        })
    ));
    let split = MnistSplit::new(vec![0, 1, 2, 3, 4, 5, 6, 255], vec![1, 2], 2, 2).unwrap();
    assert_eq!(split.len(), 2);
    assert_eq!(split.image(1), Some(&[4, 5, 6, 255][..]));
    assert_eq!(split.image(2), None);
}

#[test]
fn test_images_tensor_scaling() {
    let split = MnistSplit::new(vec![0, 51, 102, 255], vec![7], 2, 2).unwrap();
    let raw = split.images_tensor::<f32>(false);
    assert_eq!(raw.shape(), &vec![1, 2, 2]);
    assert_eq!(raw.data(), &[0.0, 51.0, 102.0, 255.0]);
    let scaled = split.images_tensor::<f64>(true);
    assert!((scaled.data()[1] - 0.2).abs() < 1e-12);
    assert_eq!(scaled.data()[3], 1.0);
}

#[test]
fn test_header_parsing() {
    let mut bytes: &[u8] = &[0, 0, 8, 3, 0, 0, 0, 2, 0, 0, 0, 28, 0, 0, 0, 28];
    let header = read_header(&mut bytes, Path::new("mem"), IMAGE_MAGIC, 3).unwrap();
    assert_eq!(header, vec![2, 28, 28]);

    let mut bytes: &[u8] = &[0, 0, 8, 1, 0, 0, 0, 2];
    assert!(matches!(
        read_header(&mut bytes, Path::new("mem"), IMAGE_MAGIC, 1),
        Err(Error::BadMagic {
            expected: 2051,
            found: 2049,
            ..
        })
    ));

    let mut bytes: &[u8] = &[0, 0, 8, 1, 0, 0];
    assert!(matches!(
        read_header(&mut bytes, Path::new("mem"), LABEL_MAGIC, 1),
        Err(Error::Truncated {
            expected: 4,
            found: 2,
            ..
        })
    ));
}

#[test]
#[cfg(target_pointer_width = "64")]
fn test_payload_len_overflow() {
    let path = Path::new("mem");
    assert_eq!(payload_len(path, &[2, 28, 28]).unwrap(), 1568);
    let huge = u32::MAX as usize;
    assert!(matches!(
        payload_len(path, &[huge, huge, huge]),
        Err(Error::OversizedHeader { .. })
    ));
}

#[test]
fn test_huge_header_reports_truncation() {
    let mut bytes: &[u8] = &[7; 16];
    assert!(matches!(
        read_exactly(&mut bytes, Path::new("mem"), usize::MAX / 2),
        Err(Error::Truncated { found: 16, .. })
    ));
}
