//! Sample lists for query/gallery splits stored as flat image directories.
//!
//! File names follow the Market-1501/VeRi convention `<pid>_c<cam>...`, with a
//! signed identity and a one-based camera number.

use anyhow::{Context, Result};
use log::info;
use rand::{rngs::StdRng, seq::index, SeedableRng};
use std::collections::HashMap;
use std::path::Path;

use reid_vision::Sample;

const IMAGE_EXTENSIONS: [&str; 3] = ["jpg", "jpeg", "png"];

/// Identity label that marks a discarded detection.
pub const DISCARDED_PID: i64 = -1;

/// Parse `(pid, zero-based cam)` out of a file name such as `0002_c1s1_000451_03.jpg`.
pub fn parse_fname(fname: &str) -> Option<(i64, u32)> {
    let (pid, rest) = fname.split_once("_c")?;
    let pid: i64 = pid.parse().ok()?;
    let digits: String = rest.chars().take_while(|c| c.is_ascii_digit()).collect();
    let cam: u32 = digits.parse().ok()?;
    Some((pid, cam.checked_sub(1)?))
}

/// Scan `dir` into a sample list sorted by file name.
///
/// Discarded detections are skipped. With `relabel` identities are mapped to
/// `0..n` in first-seen order, otherwise raw identities are kept. Returns the
/// samples and the number of distinct identities.
pub fn scan_split(dir: &Path, relabel: bool) -> Result<(Vec<Sample>, usize)> {
    let mut fnames = Vec::new();
    for entry in std::fs::read_dir(dir).with_context(|| format!("reading {}", dir.display()))? {
        let path = entry?.path();
        let is_image = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| IMAGE_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
            .unwrap_or(false);
        if !is_image {
            continue;
        }
        if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
            fnames.push(name.to_string());
        }
    }
    fnames.sort();

    let mut all_pids: HashMap<i64, i64> = HashMap::new();
    let mut samples = Vec::with_capacity(fnames.len());
    for fname in fnames {
        let (pid, cam) = parse_fname(&fname)
            .with_context(|| format!("cannot parse identity/camera from {}", fname))?;
        if pid == DISCARDED_PID {
            continue;
        }
        let next = all_pids.len() as i64;
        let label = *all_pids
            .entry(pid)
            .or_insert(if relabel { next } else { pid });
        samples.push(Sample::new(fname, label, cam));
    }

    Ok((samples, all_pids.len()))
}

/// Keep `floor(len * fraction)` samples drawn with `seed`, in their original order.
pub fn subsample(samples: &[Sample], fraction: f32, seed: u64) -> Vec<Sample> {
    if fraction >= 1.0 {
        return samples.to_vec();
    }
    let amount = (samples.len() as f64 * fraction.max(0.0) as f64).floor() as usize;
    let mut rng = StdRng::seed_from_u64(seed);
    let mut picked = index::sample(&mut rng, samples.len(), amount).into_vec();
    picked.sort_unstable();
    picked.into_iter().map(|i| samples[i].clone()).collect()
}

/// Identity / image counts per split.
#[derive(Debug, Clone, Default)]
pub struct DatasetSummary {
    rows: Vec<(String, usize, usize)>,
}

impl DatasetSummary {
    pub fn add(&mut self, subset: &str, num_ids: usize, num_images: usize) -> &mut Self {
        self.rows.push((subset.to_string(), num_ids, num_images));
        self
    }

    pub fn lines(&self) -> Vec<String> {
        let mut out = vec![
            "  subset   | # ids | # images".to_string(),
            "  ---------------------------".to_string(),
        ];
        out.extend(
            self.rows
                .iter()
                .map(|(name, ids, images)| format!("  {:<8} | {:5} | {:8}", name, ids, images)),
        );
        out
    }

    pub fn log(&self, name: &str) {
        info!("{} dataset loaded", name);
        for line in self.lines() {
            info!("{}", line);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_fname() {
        assert_eq!(parse_fname("0002_c1s1_000451_03.jpg"), Some((2, 0)));
        assert_eq!(parse_fname("-1_c3s2_000100_01.jpg"), Some((-1, 2)));
        assert_eq!(parse_fname("0776_c012.jpg"), Some((776, 11)));
        assert_eq!(parse_fname("0001_c0.jpg"), None);
        assert_eq!(parse_fname("readme.jpg"), None);
    }

    #[test]
    fn test_subsample_keeps_order_and_is_seeded() {
        let samples: Vec<_> = (0..10).map(|i| Sample::new(format!("{i}.jpg"), i, 0)).collect();
        let a = subsample(&samples, 0.2, 7);
        let b = subsample(&samples, 0.2, 7);
        assert_eq!(a.len(), 2);
        assert_eq!(a, b);
        assert!(a[0].pid < a[1].pid);
        assert_eq!(subsample(&samples, 1.0, 7).len(), 10);
    }

    #[test]
    fn test_summary_lines() {
        let mut s = DatasetSummary::default();
        s.add("query", 3, 12);
        let lines = s.lines();
        assert_eq!(lines[2], "  query    |     3 |       12");
    }
}
