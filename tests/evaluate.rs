use anyhow::Result;
use ndarray::{Array4, ArrayD, ArrayView4, IxDyn};
use reid::{
    config::EvalConfig, Batch, EvalError, Evaluator, FeatureModel, MemorySink, Sample,
};
use reid_vision::OutputFeature;

/// Uses the raw pixels of a `(batch, 3, 1, 1)` input as the embedding.
struct PixelModel {
    mode: OutputFeature,
    eval_calls: usize,
}

impl PixelModel {
    fn new(mode: OutputFeature) -> Self {
        Self {
            mode,
            eval_calls: 0,
        }
    }
}

impl FeatureModel for PixelModel {
    fn output_feature(&self) -> OutputFeature {
        self.mode
    }

    fn eval_mode(&mut self) {
        self.eval_calls += 1;
    }

    fn forward(&mut self, images: ArrayView4<'_, f32>) -> Result<ArrayD<f32>> {
        let b = images.shape()[0];
        let out = match self.mode {
            OutputFeature::Fc => images.to_owned().into_shape_with_order(IxDyn(&[b, 3]))?,
            OutputFeature::Pool5 => images.to_owned().into_dyn(),
        };
        Ok(out)
    }
}

/// Always answers with a pooled 4-D tensor, whatever it claims to be.
struct Pool5Impostor;

impl FeatureModel for Pool5Impostor {
    fn output_feature(&self) -> OutputFeature {
        OutputFeature::Fc
    }

    fn forward(&mut self, images: ArrayView4<'_, f32>) -> Result<ArrayD<f32>> {
        Ok(images.to_owned().into_dyn())
    }
}

fn batches(items: &[(Sample, [f32; 3])], batch_size: usize) -> Vec<Batch> {
    items
        .chunks(batch_size)
        .map(|chunk| {
            let mut images = Array4::<f32>::zeros((chunk.len(), 3, 1, 1));
            for (i, (_, v)) in chunk.iter().enumerate() {
                for c in 0..3 {
                    images[[i, c, 0, 0]] = v[c];
                }
            }
            Batch {
                images,
                fnames: chunk.iter().map(|(s, _)| s.fname.clone()).collect(),
                pids: chunk.iter().map(|(s, _)| s.pid).collect(),
                cams: chunk.iter().map(|(s, _)| s.cam).collect(),
            }
        })
        .collect()
}

fn toy_split() -> (Vec<(Sample, [f32; 3])>, Vec<(Sample, [f32; 3])>) {
    let query = vec![(Sample::new("q5.jpg", 5, 0), [0.0, 0.0, 0.0])];
    let gallery = vec![
        // same identity, same camera: never scored
        (Sample::new("g5_c0.jpg", 5, 0), [0.0, 0.0, 0.0]),
        (Sample::new("g5_c1.jpg", 5, 1), [0.5, 0.0, 0.0]),
        (Sample::new("g7_c1.jpg", 7, 1), [0.0, 0.3, 0.0]),
    ];
    (query, gallery)
}

fn samples(items: &[(Sample, [f32; 3])]) -> Vec<Sample> {
    items.iter().map(|(s, _)| s.clone()).collect()
}

/// Closer false match outranks the true one; same-view copy is ignored
#[test]
fn test_evaluate_toy_scenario() -> Result<()> {
    env_logger::try_init().ok();
    let (query, gallery) = toy_split();

    let mut evaluator = Evaluator::new(PixelModel::new(OutputFeature::Fc), EvalConfig::default());
    let report = evaluator.evaluate_report(
        &batches(&query, 2),
        &batches(&gallery, 2),
        &samples(&query),
        &samples(&gallery),
    )?;

    assert!((report.map - 0.5).abs() < 1e-6, "mAP {}", report.map);
    assert_eq!(report.cmc_at(1), Some(0.0));
    assert_eq!(report.cmc_at(5), Some(1.0));
    assert_eq!(report.num_valid_queries, 1);

    println!("✓ Toy scenario: {}", report.summary());
    Ok(())
}

/// evaluate() reports through the sink and returns rank-1
#[test]
fn test_evaluate_returns_rank1_and_reports() -> Result<()> {
    env_logger::try_init().ok();
    let query = vec![
        (Sample::new("q1.jpg", 1, 0), [1.0, 0.0, 0.0]),
        (Sample::new("q2.jpg", 2, 0), [0.0, 1.0, 0.0]),
    ];
    let gallery = vec![
        (Sample::new("g1.jpg", 1, 1), [0.9, 0.0, 0.0]),
        (Sample::new("g2.jpg", 2, 2), [0.0, 0.0, 0.5]),
        (Sample::new("g3.jpg", 3, 1), [0.0, 0.8, 0.0]),
    ];

    let mut evaluator = Evaluator::new(PixelModel::new(OutputFeature::Pool5), EvalConfig::default());
    let mut sink = MemorySink::default();
    let top1 = evaluator.evaluate(
        &batches(&query, 1),
        &batches(&gallery, 1),
        &samples(&query),
        &samples(&gallery),
        &mut sink,
    )?;

    // q1 hits at rank 1; q2 is beaten by g3 and hits at rank 2
    assert_eq!(top1, 0.5);
    assert_eq!(sink.lines.len(), 1);
    assert!(sink.lines[0].starts_with("[mAP: 75.00%], [cmc1: 50.00%]"));

    println!("✓ Rank-1: {:.2}", top1);
    Ok(())
}

/// Rank-1 is returned even when the config only reports deeper ranks
#[test]
fn test_evaluate_rank1_without_cmc1_in_config() -> Result<()> {
    let query = vec![(Sample::new("q1.jpg", 1, 0), [1.0, 0.0, 0.0])];
    let gallery = vec![
        (Sample::new("g1.jpg", 1, 1), [0.9, 0.0, 0.0]),
        (Sample::new("g2.jpg", 2, 1), [0.0, 1.0, 0.0]),
    ];
    let config = EvalConfig {
        cmc_topk: vec![5, 10],
        ..EvalConfig::default()
    };
    config.validate()?;

    let mut evaluator = Evaluator::new(PixelModel::new(OutputFeature::Fc), config);
    let mut sink = MemorySink::default();
    let top1 = evaluator.evaluate(
        &batches(&query, 1),
        &batches(&gallery, 1),
        &samples(&query),
        &samples(&gallery),
        &mut sink,
    )?;

    assert_eq!(top1, 1.0);
    assert!(!sink.lines[0].contains("cmc1:"));
    Ok(())
}

/// Same inputs, same scores
#[test]
fn test_evaluate_is_deterministic() -> Result<()> {
    let (query, gallery) = toy_split();
    let mut evaluator = Evaluator::new(PixelModel::new(OutputFeature::Fc), EvalConfig::default());

    let a = evaluator.evaluate_report(
        &batches(&query, 1),
        &batches(&gallery, 3),
        &samples(&query),
        &samples(&gallery),
    )?;
    let b = evaluator.evaluate_report(
        &batches(&query, 1),
        &batches(&gallery, 1),
        &samples(&query),
        &samples(&gallery),
    )?;
    assert_eq!(a, b);
    Ok(())
}

/// No queries: defined zero report
#[test]
fn test_evaluate_empty_query() -> Result<()> {
    let (_, gallery) = toy_split();
    let mut evaluator = Evaluator::new(PixelModel::new(OutputFeature::Fc), EvalConfig::default());

    let report = evaluator.evaluate_report(
        &Vec::<Batch>::new(),
        &batches(&gallery, 2),
        &[],
        &samples(&gallery),
    )?;
    assert_eq!(report.map, 0.0);
    assert_eq!(report.num_valid_queries, 0);
    assert!(report.cmc.iter().all(|(_, s)| *s == 0.0));
    Ok(())
}

/// A gallery sample the loader never produced is a lookup failure
#[test]
fn test_evaluate_missing_embedding() {
    let (query, gallery) = toy_split();
    let mut gallery_list = samples(&gallery);
    gallery_list.push(Sample::new("never_loaded.jpg", 9, 1));

    let mut evaluator = Evaluator::new(PixelModel::new(OutputFeature::Fc), EvalConfig::default());
    let err = evaluator
        .evaluate_report(
            &batches(&query, 1),
            &batches(&gallery, 1),
            &samples(&query),
            &gallery_list,
        )
        .unwrap_err();
    assert!(matches!(err, EvalError::Lookup { ref fname } if fname == "never_loaded.jpg"));
}

/// Output rank must agree with the declared output feature
#[test]
fn test_output_feature_mismatch_is_rejected() {
    let (query, gallery) = toy_split();
    let mut evaluator = Evaluator::new(Pool5Impostor, EvalConfig::default());
    let err = evaluator
        .evaluate_report(
            &batches(&query, 1),
            &batches(&gallery, 1),
            &samples(&query),
            &samples(&gallery),
        )
        .unwrap_err();
    assert!(matches!(err, EvalError::ShapeMismatch { .. }));
}

/// Model is switched to inference mode once per extraction pass
#[test]
fn test_model_put_in_eval_mode() -> Result<()> {
    let (query, gallery) = toy_split();
    let mut model = PixelModel::new(OutputFeature::Fc);
    let opts = reid::extract::ExtractOptions::default();
    reid::extract::extract_embeddings(&mut model, &batches(&query, 1), &opts)?;
    reid::extract::extract_embeddings(&mut model, &batches(&gallery, 1), &opts)?;
    assert_eq!(model.eval_calls, 2);
    Ok(())
}
