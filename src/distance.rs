//! Dense query × gallery squared Euclidean distances.

use ndarray::{linalg::general_mat_mul, Array2, Axis};

use crate::error::{EvalError, EvalResult};
use crate::extract::Embeddings;
use reid_vision::Sample;

/// Stack the embeddings of `samples` in list order.
pub fn gather(embeddings: &Embeddings, samples: &[Sample]) -> EvalResult<Array2<f32>> {
    let mut out = Array2::<f32>::zeros((samples.len(), embeddings.dim()));
    for (mut row, sample) in out.axis_iter_mut(Axis(0)).zip(samples) {
        let feature = embeddings.get(&sample.fname).ok_or_else(|| EvalError::Lookup {
            fname: sample.fname.clone(),
        })?;
        row.assign(&feature);
    }
    Ok(out)
}

/// `D[i, j] = |x_i|² + |y_j|² − 2·x_i·y_j` for row sets `x` (m×d) and `y` (n×d).
///
/// Entries may come out slightly negative through cancellation; they are left
/// as is since only their relative order matters downstream.
pub fn squared_euclidean(x: &Array2<f32>, y: &Array2<f32>) -> EvalResult<Array2<f32>> {
    let (m, n) = (x.nrows(), y.nrows());
    if m == 0 || n == 0 {
        return Ok(Array2::zeros((m, n)));
    }
    if x.ncols() != y.ncols() {
        return Err(EvalError::shape_mismatch(
            "query/gallery embedding dimensionality",
            &[x.ncols()],
            &[y.ncols()],
        ));
    }

    let xx = x.map_axis(Axis(1), |r| r.dot(&r));
    let yy = y.map_axis(Axis(1), |r| r.dot(&r));
    let mut dist = &xx.insert_axis(Axis(1)) + &yy.insert_axis(Axis(0));
    general_mat_mul(-2.0, x, &y.t(), 1.0, &mut dist);
    Ok(dist)
}

/// Distance matrix between the query and gallery sample lists, rows and
/// columns in list order.
pub fn pairwise_distance(
    query_features: &Embeddings,
    gallery_features: &Embeddings,
    query: &[Sample],
    gallery: &[Sample],
) -> EvalResult<Array2<f32>> {
    let x = gather(query_features, query)?;
    let y = gather(gallery_features, gallery)?;
    squared_euclidean(&x, &y)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extract::EmbeddingBuilder;
    use ndarray::array;

    fn embeddings(rows: &[(&str, [f32; 3])]) -> Embeddings {
        let mut b = EmbeddingBuilder::new();
        for (name, v) in rows {
            b.insert(name, ndarray::ArrayView1::from(&v[..]), 0).unwrap();
        }
        b.finish()
    }

    #[test]
    fn test_matches_direct_formula() {
        let x = array![[1.0_f32, 2.0], [0.0, -1.0]];
        let y = array![[1.0_f32, 0.0], [3.0, 3.0], [0.0, 0.0]];
        let d = squared_euclidean(&x, &y).unwrap();

        assert_eq!(d.shape(), &[2, 3]);
        for i in 0..2 {
            for j in 0..3 {
                let diff = &x.row(i) - &y.row(j);
                let expected = diff.dot(&diff);
                assert!((d[[i, j]] - expected).abs() < 1e-5);
            }
        }
    }

    #[test]
    fn test_self_distance_diagonal_near_zero() {
        let e = embeddings(&[
            ("a", [0.3, 10.0, -2.0]),
            ("b", [100.0, 0.5, 7.0]),
            ("c", [-1.0, -1.0, -1.0]),
        ]);
        let samples: Vec<_> = ["a", "b", "c"].iter().map(|f| Sample::new(*f, 0, 0)).collect();
        let d = pairwise_distance(&e, &e, &samples, &samples).unwrap();
        for i in 0..3 {
            assert!(d[[i, i]].abs() < 1e-2, "diag {} = {}", i, d[[i, i]]);
        }
    }

    #[test]
    fn test_follows_sample_list_order() {
        let e = embeddings(&[("a", [0.0, 0.0, 0.0]), ("b", [1.0, 0.0, 0.0])]);
        let q = vec![Sample::new("b", 0, 0)];
        let g = vec![Sample::new("b", 0, 0), Sample::new("a", 0, 0)];
        let d = pairwise_distance(&e, &e, &q, &g).unwrap();
        assert_eq!(d, array![[0.0, 1.0]]);
    }

    #[test]
    fn test_missing_fname_is_lookup_error() {
        let e = embeddings(&[("a", [0.0, 0.0, 0.0])]);
        let q = vec![Sample::new("zzz", 0, 0)];
        let err = pairwise_distance(&e, &e, &q, &q).unwrap_err();
        assert!(matches!(err, EvalError::Lookup { fname } if fname == "zzz"));
    }

    #[test]
    fn test_dim_mismatch() {
        let x = Array2::<f32>::zeros((2, 3));
        let y = Array2::<f32>::zeros((2, 4));
        assert!(matches!(
            squared_euclidean(&x, &y),
            Err(EvalError::ShapeMismatch { .. })
        ));
    }

    #[test]
    fn test_empty_query() {
        let x = Array2::<f32>::zeros((0, 0));
        let y = Array2::<f32>::zeros((4, 3));
        assert_eq!(squared_euclidean(&x, &y).unwrap().shape(), &[0, 4]);
    }
}
