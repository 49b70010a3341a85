use mnist_light::config::TrainConfig;
use mnist_light::data::{one_hot, MnistSplit};
use mnist_light::nn::{Activation, Linear, Loss, Module, Sequential};
use mnist_light::model::{FitOptions, Model};
use mnist_light::optim;
use mnist_light::tensor::RcTensor;
use rand::{Rng, SeedableRng};

/// 2x2 "images" where class `c` lights up pixel `c` over faint noise.
fn toy_split(samples: usize, seed: u64) -> MnistSplit {
    let mut rng = rand::rngs::StdRng::seed_from_u64(seed);
    let mut images = Vec::with_capacity(samples * 4);
    let mut labels = Vec::with_capacity(samples);
    for n in 0..samples {
        let class = n % 3;
        for pixel in 0..4 {
            images.push(if pixel == class {
                255
            } else {
                rng.gen_range(0..25)
            });
        }
        labels.push(class as u8);
    }
    MnistSplit::new(images, labels, 2, 2).unwrap()
}

fn toy_config() -> TrainConfig {
    TrainConfig {
        input_shape: vec![2, 2],
        hidden_units: vec![8],
        num_classes: 3,
        batch_size: 10,
        epochs: 30,
        seed: 7,
        ..TrainConfig::default()
    }
}

#[test]
fn test_adam_learns_toy_problem() {
    let config = TrainConfig {
        optimizer: "adam".to_string(),
        learning_rate: Some(0.01),
        ..toy_config()
    };
    let split = toy_split(60, 1);
    let x = split.images_tensor::<f64>(config.scale_pixels);
    let y = split.labels_tensor(config.num_classes).unwrap();

    let mut rng = rand::rngs::StdRng::seed_from_u64(config.seed);
    let mut model = config.build_model::<f64, _>(&mut rng).unwrap();
    let history = model.fit(&x, &y, &config.fit_options()).unwrap();

    let losses = history.losses();
    assert_eq!(losses.len(), 30);
    assert!(losses[29] < losses[0] / 2.0, "losses={losses:?}");
    assert!(history.last().unwrap().accuracy > 0.9);

    let test = toy_split(30, 2);
    let evaluation = model
        .evaluate(
            &test.images_tensor(config.scale_pixels),
            &test.labels_tensor(config.num_classes).unwrap(),
            config.batch_size,
        )
        .unwrap();
    assert_eq!(evaluation.samples, 30);
    assert!(evaluation.accuracy > 0.9, "{evaluation:?}");
}

#[test]
fn test_sgd_with_momentum_learns_toy_problem() {
    let config = TrainConfig {
        learning_rate: Some(0.1),
        momentum: 0.9,
        ..toy_config()
    };
    let split = toy_split(60, 3);
    let x = split.images_tensor::<f32>(true);
    let y = split.labels_tensor(3).unwrap();

    let mut rng = rand::rngs::StdRng::seed_from_u64(11);
    let mut model = config.build_model::<f32, _>(&mut rng).unwrap();
    let history = model.fit(&x, &y, &config.fit_options()).unwrap();
    let first = &history.epochs[0];
    let last = history.last().unwrap();
    assert!(last.loss < first.loss / 2.0, "{history:?}");
    assert!(last.accuracy > 0.9);
}

#[test]
fn test_same_seed_same_history() {
    let config = TrainConfig {
        epochs: 3,
        ..toy_config()
    };
    let split = toy_split(30, 4);
    let x = split.images_tensor::<f64>(true);
    let y = split.labels_tensor(3).unwrap();

    let run = || {
        let mut rng = rand::rngs::StdRng::seed_from_u64(config.seed);
        let mut model = config.build_model::<f64, _>(&mut rng).unwrap();
        model.fit(&x, &y, &config.fit_options()).unwrap().losses()
    };
    assert_eq!(run(), run());
}

#[test]
fn test_predict_matches_hand_built_network() {
    let mut network = Sequential::<f64>::new();
    network.add(Linear::new(
        RcTensor::parameter(vec![1.0, 0.0, 0.0, 1.0], vec![2, 2]),
        RcTensor::parameter(vec![0.0, 0.0], vec![1, 2]),
        Activation::Softmax,
    ));
    assert_eq!(network.param_count(), 6);
    let mut model = Model::new(network);
    model.compile(
        Loss::CategoricalCrossentropy,
        optim::from_name("sgd", None).unwrap(),
    );
    let x = one_hot::<f64>(&[0, 1, 1], 2).unwrap();
    let predictions = model.predict(&x, 2).unwrap();
    assert_eq!(predictions.argmax_rows(), vec![0, 1, 1]);
    let e = std::f64::consts::E;
    assert!((predictions.data()[0] - e / (e + 1.0)).abs() < 1e-12);

    let evaluation = model.evaluate(&x, &x, 3).unwrap();
    assert_eq!(evaluation.accuracy, 1.0);
    assert!((evaluation.loss - (1.0 + 1.0 / e).ln()).abs() < 1e-9);
}

#[test]
fn test_fit_options_defaults_follow_keras() {
    let options = FitOptions::default();
    assert_eq!(options.batch_size, 32);
    assert_eq!(options.epochs, 1);
    assert!(options.shuffle);

    let config = TrainConfig::default();
    assert_eq!(config.fit_options().batch_size, 128);
    assert_eq!(config.fit_options().epochs, 10);
    let optimizer = config.build_optimizer::<f32>().unwrap();
    assert_eq!(optimizer.name(), "sgd");
    assert_eq!(optimizer.learning_rate(), 0.01);
}
