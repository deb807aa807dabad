// Exact nearest-neighbour index over normalized feature rows

use ndarray::{Array1, Array2, ArrayView1, Axis};

use super::weights::FeatureWeights;

/// One search hit inside the index.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Neighbor {
    /// Row in the indexed matrix
    pub row: usize,
    /// Squared Euclidean distance in weighted-normalized space
    pub distance: f64,
}

impl Neighbor {
    pub fn similarity(&self) -> f64 {
        distance_to_similarity(self.distance)
    }
}

/// Map a squared distance to a score in (0, 1]; 1 only for distance 0.
pub fn distance_to_similarity(distance: f64) -> f64 {
    1.0 / (1.0 + distance.max(0.0))
}

/// Brute-force index. Holds the unweighted normalized corpus; per-query
/// weights are applied inside the distance so the matrix never changes after
/// `build`.
#[derive(Debug, Clone)]
pub struct SimilarityIndex {
    rows: Array2<f64>,
}

impl SimilarityIndex {
    pub fn build(rows: Array2<f64>) -> Self {
        Self { rows }
    }

    /// Index with no rows and the given dimensionality.
    pub fn empty(dimensions: usize) -> Self {
        Self { rows: Array2::zeros((0, dimensions)) }
    }

    pub fn len(&self) -> usize {
        self.rows.nrows()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.nrows() == 0
    }

    pub fn dimensions(&self) -> usize {
        self.rows.ncols()
    }

    /// The `k` nearest rows under plain squared Euclidean distance.
    pub fn query(&self, vector: &Array1<f64>, k: usize) -> Vec<Neighbor> {
        self.search(vector.view(), None, k)
    }

    /// The `k` nearest rows under `sum_j (w_j * (q_j - x_ij))^2`.
    pub fn query_weighted(&self, vector: &Array1<f64>, weights: &FeatureWeights, k: usize) -> Vec<Neighbor> {
        self.search(vector.view(), Some(weights.as_slice()), k)
    }

    fn search(&self, query: ArrayView1<f64>, weights: Option<&[f64]>, k: usize) -> Vec<Neighbor> {
        assert_eq!(
            query.len(),
            self.dimensions(),
            "query has {} dimensions but the index has {}",
            query.len(),
            self.dimensions()
        );
        if let Some(w) = weights {
            assert_eq!(w.len(), self.dimensions(), "weight count does not match index dimensions");
        }

        let k = k.min(self.len());
        if k == 0 {
            return Vec::new();
        }

        let mut hits: Vec<Neighbor> = self
            .rows
            .axis_iter(Axis(0))
            .enumerate()
            .map(|(row, values)| Neighbor {
                row,
                distance: squared_distance(query, values, weights),
            })
            .collect();

        // Ascending distance; equal distances keep row order
        hits.sort_by(|a, b| a.distance.total_cmp(&b.distance).then(a.row.cmp(&b.row)));
        hits.truncate(k);
        hits
    }
}

/// Squared Euclidean distance, optionally scaling each difference by a weight.
pub fn squared_distance(a: ArrayView1<f64>, b: ArrayView1<f64>, weights: Option<&[f64]>) -> f64 {
    match weights {
        Some(w) => a
            .iter()
            .zip(b.iter())
            .zip(w.iter())
            .map(|((x, y), w)| {
                let d = w * (x - y);
                d * d
            })
            .sum(),
        None => a
            .iter()
            .zip(b.iter())
            .map(|(x, y)| (x - y) * (x - y))
            .sum(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::similarity::features::{Feature, FEATURE_COUNT};
    use ndarray::{array, Array1, Array2};

    fn corpus() -> Array2<f64> {
        array![[0.0, 0.0], [1.0, 0.0], [0.0, 3.0], [2.0, 2.0]]
    }

    #[test]
    fn query_orders_by_distance() {
        let index = SimilarityIndex::build(corpus());
        let hits = index.query(&array![0.0, 0.0], 4);
        let rows: Vec<usize> = hits.iter().map(|h| h.row).collect();
        assert_eq!(rows, vec![0, 1, 3, 2]);
        assert_eq!(hits[0].distance, 0.0);
        assert_eq!(hits[1].distance, 1.0);
        assert_eq!(hits[2].distance, 8.0);
        assert_eq!(hits[3].distance, 9.0);
    }

    #[test]
    fn k_is_clamped_to_corpus_size() {
        let index = SimilarityIndex::build(corpus());
        assert_eq!(index.query(&array![0.0, 0.0], 100).len(), 4);
        assert!(index.query(&array![0.0, 0.0], 0).is_empty());
        assert!(SimilarityIndex::empty(2).query(&array![0.0, 0.0], 5).is_empty());
    }

    #[test]
    fn ties_keep_row_order() {
        let index = SimilarityIndex::build(array![[1.0, 0.0], [0.0, 1.0], [-1.0, 0.0]]);
        let rows: Vec<usize> = index.query(&array![0.0, 0.0], 3).iter().map(|h| h.row).collect();
        assert_eq!(rows, vec![0, 1, 2]);
    }

    #[test]
    fn similarity_is_in_unit_interval() {
        assert_eq!(distance_to_similarity(0.0), 1.0);
        for d in [1e-9, 0.5, 1.0, 10.0, 1e9] {
            let s = distance_to_similarity(d);
            assert!(s > 0.0 && s < 1.0, "similarity {} for distance {}", s, d);
        }
        assert!(distance_to_similarity(1.0) > distance_to_similarity(2.0));
    }

    #[test]
    fn weighted_distance_equals_distance_of_weighted_vectors() {
        let a = array![0.5, -1.0, 2.0];
        let b = array![1.5, 1.0, -0.5];
        let w = [2.0, 0.5, 3.0];
        let wa = Array1::from_iter(a.iter().zip(w.iter()).map(|(x, w)| x * w));
        let wb = Array1::from_iter(b.iter().zip(w.iter()).map(|(x, w)| x * w));
        let direct = squared_distance(wa.view(), wb.view(), None);
        let metric = squared_distance(a.view(), b.view(), Some(&w));
        assert!((direct - metric).abs() < 1e-12);
    }

    #[test]
    fn raising_a_weight_increases_distance() {
        let mut a = Array1::<f64>::zeros(FEATURE_COUNT);
        let b = Array1::<f64>::from_elem(FEATURE_COUNT, 0.25);
        a[Feature::Tempo.index()] = 1.0;

        let mut previous = 0.0;
        for w in [0.1, 0.5, 1.0, 2.0, 5.0] {
            let weights = FeatureWeights::default().with(Feature::Tempo, w).unwrap();
            let d = squared_distance(a.view(), b.view(), Some(weights.as_slice()));
            assert!(d > previous, "distance {} did not grow past {} at weight {}", d, previous, w);
            previous = d;
        }
    }

    #[test]
    fn weighted_query_can_change_the_ranking() {
        let index = SimilarityIndex::build(array![
            [1.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0],
            [0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 1.2, 0.0, 0.0],
        ]);
        let query = Array1::<f64>::zeros(FEATURE_COUNT);

        let uniform = index.query_weighted(&query, &FeatureWeights::uniform(), 2);
        assert_eq!(uniform[0].row, 0);

        let tempo_light = FeatureWeights::uniform().with(Feature::Tempo, 0.1).unwrap();
        let reweighted = index.query_weighted(&query, &tempo_light, 2);
        assert_eq!(reweighted[0].row, 1);
    }
}
