//! Otsu thresholding, masks and centroids.

use super::types::{Centroid, Mask, Projection};

/// Otsu threshold over the full 16-bit histogram.
///
/// For each cut `T` in `1..=max`, background is `[0, T)` and object is
/// `[T, max]`; the between-class score `nB * nO * (muB - muO)^2` is
/// maximised and the first maximal cut wins. Returns 0 when no cut splits
/// the image into two non-empty classes.
pub fn otsu_threshold(img: &Projection) -> u16 {
    let max = img.max_value() as usize;
    if max == 0 {
        return 0;
    }

    let mut hist = vec![0u64; max + 1];
    for &p in img.pixels() {
        hist[p as usize] += 1;
    }
    let total: u64 = hist.iter().sum();
    let total_sum: f64 = hist
        .iter()
        .enumerate()
        .map(|(v, &n)| v as f64 * n as f64)
        .sum();

    let mut best = 0.0f64;
    let mut best_t = 0usize;
    let mut n_b = 0u64;
    let mut sum_b = 0.0f64;
    for t in 1..=max {
        n_b += hist[t - 1];
        sum_b += (t - 1) as f64 * hist[t - 1] as f64;
        let n_o = total - n_b;
        if n_b == 0 {
            continue;
        }
        if n_o == 0 {
            break;
        }
        let mu_b = sum_b / n_b as f64;
        let mu_o = (total_sum - sum_b) / n_o as f64;
        let score = n_b as f64 * n_o as f64 * (mu_b - mu_o) * (mu_b - mu_o);
        if score > best {
            best = score;
            best_t = t;
        }
    }
    best_t as u16
}

/// Pixels at or above `threshold` are on.
pub fn binarize(img: &Projection, threshold: u16) -> Mask {
    Mask {
        width: img.width(),
        height: img.height(),
        on: img.pixels().iter().map(|&p| p >= threshold).collect(),
    }
}

/// Clear the top `rows` rows (burned-in timestamp).
pub fn zero_band(mask: &mut Mask, rows: u32) {
    let end = (rows.min(mask.height) as usize) * mask.width as usize;
    mask.on[..end].iter_mut().for_each(|b| *b = false);
}

/// Centroid of the on pixels. An empty mask yields `(0.5, 0.5)` with a
/// zero count.
pub fn centroid(mask: &Mask) -> Centroid {
    let width = mask.width.max(1) as usize;
    let (mut sx, mut sy, mut n) = (0.0f64, 0.0f64, 0usize);
    for (i, &on) in mask.on.iter().enumerate() {
        if !on {
            continue;
        }
        sx += (i % width) as f64;
        sy += (i / width) as f64;
        n += 1;
    }
    if n == 0 {
        return Centroid {
            x: 0.5,
            y: 0.5,
            count: 0,
        };
    }
    Centroid {
        x: sx / n as f64 + 0.5,
        y: sy / n as f64 + 0.5,
        count: n,
    }
}
