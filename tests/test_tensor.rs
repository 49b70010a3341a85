use mnist_light::tensor::*;
use mnist_light::Error;

#[test]
fn test_from_vec() {
    let tensor1 = RcTensor::<f64>::from(vec![vec![0.0, 1.0, 2.0], vec![3.0, 4.0, 5.0]]);
    let tensor2 = RcTensor::new((0..6).map(|x| x as f64).collect(), vec![2, 3]);
    assert_eq!(tensor1, tensor2);
}

#[test]
fn test_new_with_filler() {
    let vec = RcTensor::new_with_filler(vec![4], 4.0f32);
    let shape = vec.shape();
    assert_eq!(shape, &vec![4]);
    assert_eq!(vec.get(&[0]).unwrap(), &4.0);
}

#[test]
fn test_get_2x2x2() {
    let matrix = RcTensor::new((0..8).map(|x| x as f32).collect(), vec![2, 2, 2]);
    assert_eq!(*matrix.get(&[0, 0, 0]).unwrap(), 0.0);
    assert_eq!(*matrix.get(&[0, 1, 0]).unwrap(), 2.0);
    assert_eq!(*matrix.get(&[1, 1, 1]).unwrap(), 7.0);
    assert!(matches!(
        matrix.get(&[2, 0, 0]),
        Err(Error::IndexOutOfBounds { .. })
    ));
}

#[test]
fn test_get_3x3() {
    let matrix = RcTensor::new((0..9).map(|x| x as f64).collect(), vec![3, 3]);
    let mut prev = -1.0;
    for i in 0..3 {
        for j in 0..3 {
            let &curr = matrix.get(&[i, j]).unwrap();
            assert_eq!(prev + 1.0, curr);
            prev = curr;
        }
    }
    assert_eq!(matrix.get(&[2, 2]).unwrap(), &8.0);
}

#[test]
fn test_try_new() {
    assert!(matches!(
        RcTensor::try_new(vec![1.0f32; 3], vec![2, 2]),
        Err(Error::ShapeMismatch(_))
    ));
}

#[test]
fn test_broadcast_shape() {
    assert_eq!(broadcast_shape(&[128, 10], &[1, 10]), Some(vec![128, 10]));
    assert_eq!(broadcast_shape(&[], &[3, 2]), Some(vec![3, 2]));
    assert_eq!(broadcast_shape(&[3, 2], &[2, 2]), None);
}

#[test]
fn test_dense_layer_by_hand() {
    // relu(x W + b) with a batch of two rows
    let x = RcTensor::<f64>::from([[1.0, 2.0], [-1.0, 0.5]]);
    let w = RcTensor::parameter(vec![0.5, -1.0, 0.25, 1.0], vec![2, 2]);
    let b = RcTensor::parameter(vec![0.1, -0.1], vec![1, 2]);
    let y = (&x.matmul(&w) + &b).relu();
    assert_eq!(y, RcTensor::from([[1.1, 0.9], [0.0, 1.4]]));

    y.sum().backward().unwrap();
    // row two is cut by relu in the first column
    assert_eq!(w.grad().unwrap(), RcTensor::from([[1.0, 0.0], [2.0, 2.5]]));
    assert_eq!(b.grad().unwrap(), RcTensor::from([[1.0, 2.0]]));
}

#[test]
fn test_softmax_crossentropy_gradient_is_p_minus_y() {
    let logits = RcTensor::<f64>::parameter(vec![1.0, 2.0, 0.5, -1.0, 0.0, 3.0], vec![2, 3]);
    let targets = RcTensor::from([[0.0, 1.0, 0.0], [1.0, 0.0, 0.0]]);
    let probabilities = logits.softmax();
    functional::categorical_crossentropy(&probabilities, &targets)
        .backward()
        .unwrap();
    let grad = logits.grad().unwrap();
    for ((g, p), y) in grad
        .data()
        .iter()
        .zip(probabilities.data())
        .zip(targets.data())
    {
        assert!((g - (p - y) / 2.0).abs() < 1e-9, "{g} vs {}", (p - y) / 2.0);
    }
}

#[test]
fn test_no_grad_builds_no_graph() {
    let w = RcTensor::<f32>::parameter(vec![1.0, 2.0], vec![1, 2]);
    assert!(is_grad_enabled());
    let y = no_grad(|| {
        assert!(!is_grad_enabled());
        (&w * &w).sum()
    });
    assert!(is_grad_enabled());
    assert!(!y.requires_grad());
    assert!(y.backward().is_ok());
    assert!(w.grad().is_none());
}
