use std::fs::File;
use std::io::Write;
use std::path::Path;

use flate2::write::GzEncoder;
use flate2::Compression;
use mnist_light::data::mnist::{self, IMAGE_MAGIC, LABEL_MAGIC};
use mnist_light::data::{load_data, one_hot};
use mnist_light::Error;

fn idx_images(count: u32, rows: u32, cols: u32, pixels: &[u8]) -> Vec<u8> {
    let mut bytes = Vec::new();
    for field in [IMAGE_MAGIC, count, rows, cols] {
        bytes.extend_from_slice(&field.to_be_bytes());
    }
    bytes.extend_from_slice(pixels);
    bytes
}

fn idx_labels(labels: &[u8]) -> Vec<u8> {
    let mut bytes = Vec::new();
    bytes.extend_from_slice(&LABEL_MAGIC.to_be_bytes());
    bytes.extend_from_slice(&(labels.len() as u32).to_be_bytes());
    bytes.extend_from_slice(labels);
    bytes
}

fn write_plain(dir: &Path, name: &str, bytes: &[u8]) {
    File::create(dir.join(name))
        .unwrap()
        .write_all(bytes)
        .unwrap();
}

fn write_gz(dir: &Path, name: &str, bytes: &[u8]) {
    let file = File::create(dir.join(format!("{name}.gz"))).unwrap();
    let mut encoder = GzEncoder::new(file, Compression::default());
    encoder.write_all(bytes).unwrap();
    encoder.finish().unwrap();
}

/// Two 2x3 training images and one test image.
fn write_dataset(dir: &Path, gzip: bool) {
    let write = if gzip { write_gz } else { write_plain };
    write(
        dir,
        mnist::TRAIN_IMAGES,
        &idx_images(2, 2, 3, &[0, 1, 2, 3, 4, 5, 250, 251, 252, 253, 254, 255]),
    );
    write(dir, mnist::TRAIN_LABELS, &idx_labels(&[3, 9]));
    write(dir, mnist::TEST_IMAGES, &idx_images(1, 2, 3, &[7; 6]));
    write(dir, mnist::TEST_LABELS, &idx_labels(&[0]));
}

#[test]
fn test_load_plain_files() {
    let dir = tempfile::tempdir().unwrap();
    write_dataset(dir.path(), false);
    let mnist = load_data(dir.path()).unwrap();
    assert_eq!(mnist.train.len(), 2);
    assert_eq!((mnist.train.rows, mnist.train.cols), (2, 3));
    assert_eq!(mnist.train.labels, vec![3, 9]);
    assert_eq!(mnist.train.image(1).unwrap(), &[250, 251, 252, 253, 254, 255]);
    assert_eq!(mnist.test.len(), 1);

    let ((x_train, y_train), (x_test, y_test)) = mnist.into_arrays();
    assert_eq!(x_train.len(), 12);
    assert_eq!(y_train, vec![3, 9]);
    assert_eq!(x_test, vec![7; 6]);
    assert_eq!(y_test, vec![0]);
}

#[test]
fn test_load_gzipped_files() {
    let plain = tempfile::tempdir().unwrap();
    let gzipped = tempfile::tempdir().unwrap();
    write_dataset(plain.path(), false);
    write_dataset(gzipped.path(), true);
    assert_eq!(
        load_data(plain.path()).unwrap(),
        load_data(gzipped.path()).unwrap()
    );
}

#[test]
fn test_tensors_from_split() {
    let dir = tempfile::tempdir().unwrap();
    write_dataset(dir.path(), true);
    let mnist = load_data(dir.path()).unwrap();
    let x = mnist.train.images_tensor::<f32>(true);
    assert_eq!(x.shape(), &vec![2, 2, 3]);
    assert_eq!(x.data()[11], 1.0);
    let y = mnist.train.labels_tensor::<f32>(10).unwrap();
    assert_eq!(y.shape(), &vec![2, 10]);
    assert_eq!(y.argmax_rows(), vec![3, 9]);
    assert!(matches!(
        one_hot::<f32>(&mnist.train.labels, 5),
        Err(Error::LabelOutOfRange { label: 9, .. })
    ));
}

#[test]
fn test_missing_file() {
    let dir = tempfile::tempdir().unwrap();
    write_dataset(dir.path(), false);
    std::fs::remove_file(dir.path().join(mnist::TEST_LABELS)).unwrap();
    match load_data(dir.path()) {
        Err(Error::MissingFile { name, .. }) => assert_eq!(name, mnist::TEST_LABELS),
        other => panic!("expected a missing file error, got {other:?}"),
    }
}

#[test]
fn test_bad_magic() {
    let dir = tempfile::tempdir().unwrap();
    write_dataset(dir.path(), false);
    // a label file where the image file should be
    write_plain(dir.path(), mnist::TRAIN_IMAGES, &idx_labels(&[1, 2]));
    assert!(matches!(
        load_data(dir.path()),
        Err(Error::BadMagic {
            expected: 2051,
            found: 2049,
            ..
        })
    ));
}

#[test]
fn test_truncated_images() {
    let dir = tempfile::tempdir().unwrap();
    write_dataset(dir.path(), false);
    write_plain(
        dir.path(),
        mnist::TRAIN_IMAGES,
        &idx_images(2, 2, 3, &[0, 1, 2, 3, 4, 5, 6]),
    );
    assert!(matches!(
        load_data(dir.path()),
        Err(Error::Truncated {
            expected: 12,
            found: 7,
            ..
        })
    ));
}

#[test]
fn test_truncated_gzip_payload() {
    let dir = tempfile::tempdir().unwrap();
    write_dataset(dir.path(), true);
    write_gz(dir.path(), mnist::TRAIN_LABELS, &idx_labels(&[3, 9])[..9]);
    assert!(matches!(
        load_data(dir.path()),
        Err(Error::Truncated {
            expected: 2,
            found: 1,
            ..
        })
    ));
}

#[test]
fn test_image_label_count_mismatch() {
    let dir = tempfile::tempdir().unwrap();
    write_dataset(dir.path(), false);
    write_plain(dir.path(), mnist::TRAIN_LABELS, &idx_labels(&[1, 2, 3]));
    assert!(matches!(
        load_data(dir.path()),
        Err(Error::CountMismatch {
            images: 2,
            labels: 3
        })
    ));
}

#[test]
fn test_huge_header_is_a_truncation_error() {
    let dir = tempfile::tempdir().unwrap();
    write_dataset(dir.path(), false);
    write_plain(
        dir.path(),
        mnist::TRAIN_IMAGES,
        &idx_images(u32::MAX, 65535, 65535, &[0; 16]),
    );
    assert!(matches!(
        load_data(dir.path()),
        Err(Error::Truncated { found: 16, .. }) | Err(Error::OversizedHeader { .. })
    ));
}
