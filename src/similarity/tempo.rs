// Tempo estimation from note onsets

/// Shortest onset difference considered a beat candidate (seconds).
const MIN_IOI: f64 = 0.05;
/// Longest onset difference considered a beat candidate (seconds).
const MAX_IOI: f64 = 2.0;
/// Onset differences closer than this to a cluster centre join that cluster.
const CLUSTER_WIDTH: f64 = 0.025;
/// Largest integer ratio credited between two clusters.
const MAX_MULTIPLE: usize = 8;

const MIN_BPM: f64 = 60.0;
const MAX_BPM: f64 = 240.0;

#[derive(Debug, Clone, Copy)]
struct IoiCluster {
    centre: f64,
    count: usize,
}

/// Estimate a tempo in BPM from onset times (seconds, any order).
///
/// Returns `None` when the onsets do not support an estimate: fewer than two
/// usable onset differences, or two equally strong candidates that disagree.
pub fn estimate_tempo(onsets: &[f64]) -> Option<f64> {
    let mut sorted: Vec<f64> = onsets.iter().copied().filter(|t| t.is_finite()).collect();
    sorted.sort_by(|a, b| a.total_cmp(b));

    let clusters = cluster_onset_intervals(&sorted);
    if clusters.is_empty() {
        return None;
    }

    let mut scored: Vec<(f64, f64)> = clusters
        .iter()
        .enumerate()
        .map(|(i, cluster)| (score_cluster(i, &clusters), cluster.centre))
        .collect();
    // Best score first; equal scores keep the shorter period first
    scored.sort_by(|a, b| b.0.total_cmp(&a.0).then(a.1.total_cmp(&b.1)));

    let (best_score, best_centre) = scored[0];
    let best_bpm = fold_bpm(60.0 / best_centre);

    if let Some(&(runner_score, runner_centre)) = scored.get(1) {
        let runner_bpm = fold_bpm(60.0 / runner_centre);
        if (best_score - runner_score).abs() < 1e-9 && (best_bpm - runner_bpm).abs() > 1.0 {
            return None;
        }
    }

    best_bpm.is_finite().then_some(best_bpm)
}

fn cluster_onset_intervals(sorted_onsets: &[f64]) -> Vec<IoiCluster> {
    let mut clusters: Vec<IoiCluster> = Vec::new();

    for (i, &a) in sorted_onsets.iter().enumerate() {
        for &b in &sorted_onsets[i + 1..] {
            let ioi = b - a;
            if ioi < MIN_IOI {
                continue;
            }
            if ioi > MAX_IOI {
                break;
            }
            match clusters.iter_mut().find(|c| (c.centre - ioi).abs() < CLUSTER_WIDTH) {
                Some(cluster) => {
                    cluster.centre = (cluster.centre * cluster.count as f64 + ioi) / (cluster.count + 1) as f64;
                    cluster.count += 1;
                }
                None => clusters.push(IoiCluster { centre: ioi, count: 1 }),
            }
        }
    }

    clusters
}

/// A cluster earns its own count plus a share of every cluster sitting at an
/// integer multiple of its period.
fn score_cluster(index: usize, clusters: &[IoiCluster]) -> f64 {
    let base = clusters[index];
    let mut score = base.count as f64;

    for (j, other) in clusters.iter().enumerate() {
        if j == index {
            continue;
        }
        let ratio = other.centre / base.centre;
        let k = ratio.round();
        if k < 2.0 || k > MAX_MULTIPLE as f64 {
            continue;
        }
        if (other.centre - k * base.centre).abs() < CLUSTER_WIDTH * k {
            score += other.count as f64 / k;
        }
    }

    score
}

fn fold_bpm(mut bpm: f64) -> f64 {
    if !bpm.is_finite() || bpm <= 0.0 {
        return f64::NAN;
    }
    while bpm < MIN_BPM {
        bpm *= 2.0;
    }
    while bpm >= MAX_BPM {
        bpm /= 2.0;
    }
    bpm
}
