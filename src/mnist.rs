use crate::data::{TestDatum, TrainingDatum};
use crate::error::{Error, Result};
use flate2::read::GzDecoder;
use itertools::Itertools;
use ndarray::Array2;
use ndarray_rand::rand::{Rng, seq::SliceRandom};
use std::{fs::File, io::Read, path::Path};
use tracing::info;

pub const IMAGE_SIDE: usize = 28;
pub const CLASSES: usize = 10;
pub const VALIDATION_SIZE: usize = 10_000;

const IMAGE_MAGIC: u32 = 2051;
const LABEL_MAGIC: u32 = 2049;

pub struct MnistData {
    pub training_data: Vec<TrainingDatum>,
    pub validation_data: Vec<TestDatum>,
    pub test_data: Vec<TestDatum>,
}

impl MnistData {
    /// Reads the four gzip-compressed IDX files from `dir`. The final 10 000 training images are
    /// split off as validation data and the remaining training labels are one-hot encoded.
    pub fn load(dir: impl AsRef<Path>) -> Result<MnistData> {
        let dir = dir.as_ref();

        let mut training_data = read_labelled_images(
            &dir.join("train-images-idx3-ubyte.gz"),
            &dir.join("train-labels-idx1-ubyte.gz"),
        )?;
        if training_data.len() <= VALIDATION_SIZE {
            return Err(Error::MalformedIdx {
                path: dir.join("train-images-idx3-ubyte.gz").display().to_string(),
                reason: format!(
                    "{} training images leave nothing after the {VALIDATION_SIZE} validation images",
                    training_data.len()
                ),
            });
        }
        let validation_data = training_data.split_off(training_data.len() - VALIDATION_SIZE);
        let training_data: Vec<TrainingDatum> = training_data
            .iter()
            .map(|datum| datum.to_training_datum(CLASSES))
            .collect();

        let test_data = read_labelled_images(
            &dir.join("t10k-images-idx3-ubyte.gz"),
            &dir.join("t10k-labels-idx1-ubyte.gz"),
        )?;

        info!(
            training = training_data.len(),
            validation = validation_data.len(),
            test = test_data.len(),
            "loaded MNIST"
        );

        Ok(MnistData {
            training_data,
            validation_data,
            test_data,
        })
    }
}

// Read a whole gzip-compressed file into memory.
fn read_bytes(path: &Path) -> Result<Vec<u8>> {
    let file = File::open(path)?;
    let mut unzipped_file = GzDecoder::new(file);
    let mut bytes = Vec::new();
    unzipped_file.read_to_end(&mut bytes)?;
    Ok(bytes)
}

fn read_labelled_images(image_path: &Path, label_path: &Path) -> Result<Vec<TestDatum>> {
    let image_bytes = read_bytes(image_path)?;
    let label_bytes = read_bytes(label_path)?;
    images_and_labels_to_data(&image_bytes, &label_bytes)
        .map_err(|reason| Error::MalformedIdx {
            path: image_path.display().to_string(),
            reason,
        })
}

// Reads `count` big-endian u32 headers from the front of `bytes`.
fn headers(bytes: &[u8], count: usize) -> std::result::Result<Vec<u32>, String> {
    if bytes.len() < count * 4 {
        return Err(format!("expected a {}-byte header, file has {} bytes", count * 4, bytes.len()));
    }
    Ok(bytes[..count * 4]
        .chunks_exact(4)
        .map(|chunk| u32::from_be_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect())
}

// Turn the raw bytes of an IDX image file and an IDX label file into labelled [rows*columns x 1]
// columns with pixels scaled to [0, 1].
//
// The image header is four u32s: magic number (2051), image count, rows and columns. The label
// header is two u32s: magic number (2049) and label count.
fn images_and_labels_to_data(
    image_bytes: &[u8],
    label_bytes: &[u8],
) -> std::result::Result<Vec<TestDatum>, String> {
    let image_headers = headers(image_bytes, 4)?;
    let label_headers = headers(label_bytes, 2)?;

    if image_headers[0] != IMAGE_MAGIC {
        return Err(format!("image magic number {} is not {IMAGE_MAGIC}", image_headers[0]));
    }
    if label_headers[0] != LABEL_MAGIC {
        return Err(format!("label magic number {} is not {LABEL_MAGIC}", label_headers[0]));
    }

    let images = image_headers[1] as usize;
    let pixels = image_headers[2] as usize * image_headers[3] as usize;
    let labels = label_headers[1] as usize;
    if images != labels {
        return Err(format!("{images} images but {labels} labels"));
    }

    let image_body = &image_bytes[16..];
    let label_body = &label_bytes[8..];
    if pixels == 0 || image_body.len() != images * pixels || label_body.len() != labels {
        return Err(format!(
            "body holds {} pixel bytes and {} label bytes, headers promise {} and {labels}",
            image_body.len(),
            label_body.len(),
            images * pixels
        ));
    }

    // Chunk the image bytes into one group per image and pair each group with its label.
    Ok(image_body
        .iter()
        .chunks(pixels)
        .into_iter()
        .zip(label_body)
        .map(|(image_chunk, &label)| {
            let input = image_chunk
                .map(|&value| [value as f64 / 255.0])
                .collect::<Vec<_>>()
                .into();
            TestDatum::new(input, label as usize)
        })
        .collect())
}

/// Grows a training set five-fold: every square `side x side` image is kept and joined by four
/// copies shifted one pixel down, up, right and left, with the vacated row or column set to zero.
/// The result is shuffled.
pub fn expand_training_data<R: Rng + ?Sized>(
    training_data: &[TrainingDatum],
    side: usize,
    rng: &mut R,
) -> Result<Vec<TrainingDatum>> {
    let mut expanded = Vec::with_capacity(training_data.len() * 5);

    for (index, datum) in training_data.iter().enumerate() {
        if datum.input.dim() != (side * side, 1) {
            return Err(Error::shape(
                "image to expand",
                format!("{:?}", (side * side, 1)),
                format!("{:?}", datum.input.dim()),
            ));
        }
        expanded.push(datum.clone());

        let image = datum.input.view().into_shape_with_order((side, side))?;
        for (row_shift, column_shift) in [(1, 0), (-1, 0), (0, 1), (0, -1)] {
            let shifted = Array2::from_shape_fn((side, side), |(r, c)| {
                let source_row = r as isize - row_shift;
                let source_column = c as isize - column_shift;
                if (0..side as isize).contains(&source_row) && (0..side as isize).contains(&source_column) {
                    image[[source_row as usize, source_column as usize]]
                } else {
                    0.0
                }
            });
            expanded.push(TrainingDatum::new(
                shifted.into_shape_with_order((side * side, 1))?,
                datum.expected_output.clone(),
            ));
        }

        if (index + 1) % 1000 == 0 {
            info!("expanding image number {}", index + 1);
        }
    }

    expanded.shuffle(rng);
    Ok(expanded)
}
