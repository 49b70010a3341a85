use crossbeam::channel;
use rand::seq::SliceRandom;
use rand::Rng;
use rayon::prelude::*;

use crate::error::{Error, Result};
use crate::tensor::Numeric;

/// Batches assembled ahead of the consumer.
const PREFETCH: usize = 2;

/// Sample order for one epoch, shuffled with `rng` when `shuffle` is set.
pub fn batch_order<R: Rng + ?Sized>(len: usize, shuffle: bool, rng: &mut R) -> Vec<usize> {
    let mut order: Vec<usize> = (0..len).collect();
    if shuffle {
        order.shuffle(rng);
    }
    order
}

/// Contiguous copies of the rows picked for one mini-batch.
#[derive(Debug, Clone, PartialEq)]
pub struct Batch<T> {
    pub index: usize,
    pub len: usize,
    pub inputs: Vec<T>,
    pub targets: Vec<T>,
}

/// Gathers rows of a flat `inputs`/`targets` pair into mini-batches.
#[derive(Debug, Clone, Copy)]
pub struct Batcher<'a, T> {
    inputs: &'a [T],
    targets: &'a [T],
    input_width: usize,
    target_width: usize,
}

impl<'a, T: Numeric> Batcher<'a, T> {
    /// `inputs` and `targets` each hold `samples` rows of equal width.
    pub fn new(inputs: &'a [T], targets: &'a [T], samples: usize) -> Result<Self> {
        if samples == 0 {
            return Err(Error::InvalidOption("no samples to batch".to_string()));
        }
        if inputs.len() % samples != 0 || targets.len() % samples != 0 {
            return Err(Error::ShapeMismatch(format!(
                "{} input and {} target values do not split into {samples} rows",
                inputs.len(),
                targets.len()
            )));
        }
        Ok(Batcher {
            inputs,
            targets,
            input_width: inputs.len() / samples,
            target_width: targets.len() / samples,
        })
    }

    pub fn input_width(&self) -> usize {
        self.input_width
    }

    pub fn target_width(&self) -> usize {
        self.target_width
    }

    pub fn assemble(&self, index: usize, rows: &[usize]) -> Batch<T> {
        Batch {
            index,
            len: rows.len(),
            inputs: gather(self.inputs, self.input_width, rows),
            targets: gather(self.targets, self.target_width, rows),
        }
    }

    /// Feeds `consume` the batches of `order`, in order, while a scoped
    /// producer thread assembles the next ones. The last batch may be short.
    pub fn run<F>(&self, order: &[usize], batch_size: usize, mut consume: F) -> Result<()>
    where
        F: FnMut(Batch<T>) -> Result<()>,
    {
        if batch_size == 0 {
            return Err(Error::InvalidOption("batch size must be positive".to_string()));
        }
        let batcher = *self;
        crossbeam::scope(|scope| -> Result<()> {
            let (sender, receiver) = channel::bounded(PREFETCH);
            scope.spawn(move |_| {
                for (index, rows) in order.chunks(batch_size).enumerate() {
                    // the consumer hung up early
                    if sender.send(batcher.assemble(index, rows)).is_err() {
                        break;
                    }
                }
            });
            for batch in receiver {
                consume(batch)?;
            }
            Ok(())
        })
        .map_err(|_| Error::BatchProducer)?
    }
}

fn gather<T: Numeric>(source: &[T], width: usize, rows: &[usize]) -> Vec<T> {
    let mut out = vec![T::zero(); rows.len() * width];
    if width == 0 {
        return out;
    }
    out.par_chunks_mut(width)
        .zip(rows.par_iter())
        .for_each(|(dst, &row)| dst.copy_from_slice(&source[row * width..(row + 1) * width]));
    out
}

#[cfg(test)]
fn toy_data() -> (Vec<f32>, Vec<f32>) {
    // row i: inputs [i, 10 + i], target [i]
    let inputs = (0..5).flat_map(|i| [i as f32, 10.0 + i as f32]).collect();
    let targets = (0..5).map(|i| i as f32).collect();
    (inputs, targets)
}

#[test]
fn test_assemble_gathers_rows() {
    let (inputs, targets) = toy_data();
    let batcher = Batcher::new(&inputs, &targets, 5).unwrap();
    let batch = batcher.assemble(0, &[3, 0]);
    assert_eq!(batch.inputs, vec![3.0, 13.0, 0.0, 10.0]);
    assert_eq!(batch.targets, vec![3.0, 0.0]);
    assert_eq!(batch.len, 2);
}

#[test]
fn test_run_keeps_order_and_short_tail() {
    let (inputs, targets) = toy_data();
    let batcher = Batcher::new(&inputs, &targets, 5).unwrap();
    let mut seen = vec![];
    batcher
        .run(&[4, 3, 2, 1, 0], 2, |batch| {
            seen.push((batch.index, batch.targets));
            Ok(())
        })
        .unwrap();
    assert_eq!(
        seen,
        vec![(0, vec![4.0, 3.0]), (1, vec![2.0, 1.0]), (2, vec![0.0])]
    );
}

#[test]
fn test_run_stops_on_consumer_error() {
    let (inputs, targets) = toy_data();
    let batcher = Batcher::new(&inputs, &targets, 5).unwrap();
    let mut calls = 0;
    let result = batcher.run(&[0, 1, 2, 3, 4], 1, |_| {
        calls += 1;
        Err(Error::InvalidOption("stop".to_string()))
    });
    assert!(matches!(result, Err(Error::InvalidOption(_))));
    assert_eq!(calls, 1);
}

#[test]
fn test_shuffled_order_is_a_seeded_permutation() {
    use rand::SeedableRng;

    let order = batch_order(100, true, &mut rand::rngs::StdRng::seed_from_u64(42));
    let again = batch_order(100, true, &mut rand::rngs::StdRng::seed_from_u64(42));
    assert_eq!(order, again);
    assert_ne!(order, (0..100).collect::<Vec<_>>());
    let mut sorted = order.clone();
    sorted.sort_unstable();
    assert_eq!(sorted, (0..100).collect::<Vec<_>>());
    assert_eq!(
        batch_order(3, false, &mut rand::rngs::StdRng::seed_from_u64(0)),
        vec![0, 1, 2]
    );
}

#[test]
fn test_new_rejects_ragged_data() {
    let inputs = vec![0.0f32; 7];
    let targets = vec![0.0f32; 3];
    assert!(Batcher::new(&inputs, &targets, 3).is_err());
    assert!(Batcher::new(&inputs, &targets, 0).is_err());
}
