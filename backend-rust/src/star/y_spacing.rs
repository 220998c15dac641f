//! Channel Y-axis spacing.
//!
//! Channels are numbered back (0) to front (N-1); their y coordinates
//! must stay strictly descending with at least the mechanical pitch
//! between neighbors. When a caller positions a subset of channels, the
//! remaining channels may need to make space: the gap constraint
//! propagates outward from the requested channels, back-to-front on the
//! back side and front-to-back on the front side.

use std::collections::BTreeMap;

use crate::error::{BackendError, Result};

/// Minimum distance between neighboring channels (mm).
pub const MIN_CHANNEL_PITCH: f64 = 9.0;
/// The frontmost channel may not go below this (mm).
pub const Y_FRONT_LIMIT: f64 = 6.0;
/// The backmost channel may not go beyond this (mm).
pub const Y_BACK_LIMIT: f64 = 650.0;

/// Compute the target y for every channel given requested positions for
/// some of them.
///
/// `current` is the present y of each channel, back to front. Requested
/// channels land exactly where asked; with `make_space` the others are
/// pushed outward as needed. Without `make_space` any violated
/// constraint is an error. Positions violating the mechanical limits
/// never produce a movement plan.
pub fn space_channel_ys(
    current: &[f64],
    requested: &BTreeMap<usize, f64>,
    make_space: bool,
) -> Result<Vec<f64>> {
    let n = current.len();
    if requested.is_empty() {
        return Err(BackendError::InvalidArgument(
            "no channel positions requested".into(),
        ));
    }
    if let Some(&channel) = requested.keys().find(|&&c| c >= n) {
        return Err(BackendError::InvalidArgument(format!(
            "channel {channel} out of range, machine has {n} channels"
        )));
    }

    // Requested channels must be mutually feasible: a pair i < j needs at
    // least (j - i) pitches between them.
    let anchors: Vec<(usize, f64)> = requested.iter().map(|(&c, &y)| (c, y)).collect();
    for window in anchors.windows(2) {
        let (i, yi) = window[0];
        let (j, yj) = window[1];
        if yi - yj < MIN_CHANNEL_PITCH * (j - i) as f64 - 1e-9 {
            return Err(BackendError::InvalidArgument(format!(
                "channels {i} and {j} requested too close together ({yi} and {yj})"
            )));
        }
    }

    let mut ys = current.to_vec();
    for (&channel, &y) in requested {
        ys[channel] = y;
    }

    let first_anchor = anchors[0].0;
    let last_anchor = anchors[anchors.len() - 1].0;

    if make_space {
        // Back side: push backward (larger y), nearest channel first.
        for i in (0..first_anchor).rev() {
            if ys[i] < ys[i + 1] + MIN_CHANNEL_PITCH {
                ys[i] = ys[i + 1] + MIN_CHANNEL_PITCH;
            }
        }
        // Front side: push forward (smaller y).
        for i in last_anchor + 1..n {
            if ys[i] > ys[i - 1] - MIN_CHANNEL_PITCH {
                ys[i] = ys[i - 1] - MIN_CHANNEL_PITCH;
            }
        }
        // Channels between anchors get squeezed into their window.
        for i in first_anchor + 1..last_anchor {
            if requested.contains_key(&i) {
                continue;
            }
            if ys[i] > ys[i - 1] - MIN_CHANNEL_PITCH {
                ys[i] = ys[i - 1] - MIN_CHANNEL_PITCH;
            }
        }
        for i in (first_anchor + 1..last_anchor).rev() {
            if requested.contains_key(&i) {
                continue;
            }
            if ys[i] < ys[i + 1] + MIN_CHANNEL_PITCH {
                ys[i] = ys[i + 1] + MIN_CHANNEL_PITCH;
            }
        }
    }

    // Whether spacing was computed or supplied, the result must be
    // strictly descending with full pitch.
    for i in 1..n {
        if ys[i - 1] - ys[i] < MIN_CHANNEL_PITCH - 1e-9 {
            return Err(BackendError::InvalidArgument(format!(
                "channels {} and {} end up closer than {MIN_CHANNEL_PITCH} mm",
                i - 1,
                i
            )));
        }
    }
    if ys[0] > Y_BACK_LIMIT {
        return Err(BackendError::InvalidArgument(format!(
            "channel 0 would move to y {} beyond the back limit {Y_BACK_LIMIT}",
            ys[0]
        )));
    }
    if ys[n - 1] < Y_FRONT_LIMIT {
        return Err(BackendError::InvalidArgument(format!(
            "channel {} would move to y {} beyond the front limit {Y_FRONT_LIMIT}",
            n - 1,
            ys[n - 1]
        )));
    }
    Ok(ys)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spread(n: usize) -> Vec<f64> {
        // A typical idle spread: 9 mm pitch ending at the front limit.
        (0..n)
            .map(|i| Y_FRONT_LIMIT + (n - 1 - i) as f64 * MIN_CHANNEL_PITCH)
            .collect()
    }

    #[test]
    fn single_channel_pushes_neighbors_out() {
        let current = spread(8);
        let mut requested = BTreeMap::new();
        requested.insert(3, 200.0);
        let ys = space_channel_ys(&current, &requested, true).unwrap();
        assert_eq!(ys[3], 200.0);
        // Channels behind moved back with exactly one pitch each.
        assert_eq!(ys[2], 209.0);
        assert_eq!(ys[1], 218.0);
        assert_eq!(ys[0], 227.0);
        // Channels in front were already far enough and stayed.
        assert_eq!(ys[4], current[4]);
        for i in 1..8 {
            assert!(ys[i - 1] - ys[i] >= MIN_CHANNEL_PITCH - 1e-9);
        }
    }

    #[test]
    fn requested_pair_too_close_is_rejected() {
        let current = spread(8);
        let mut requested = BTreeMap::new();
        requested.insert(2, 100.0);
        requested.insert(4, 95.0);
        assert!(space_channel_ys(&current, &requested, true).is_err());
    }

    #[test]
    fn off_limit_results_are_rejected_without_a_plan() {
        let current = spread(8);
        // Pushing channel 7 to the front limit leaves no room below.
        let mut requested = BTreeMap::new();
        requested.insert(0, 660.0);
        assert!(space_channel_ys(&current, &requested, true).is_err());

        let mut requested = BTreeMap::new();
        requested.insert(7, 2.0);
        assert!(space_channel_ys(&current, &requested, true).is_err());
    }

    #[test]
    fn make_space_false_requires_a_valid_layout() {
        let current = spread(8);
        let mut requested = BTreeMap::new();
        // Collides with channel 6 at y 15 in the idle spread.
        requested.insert(7, 10.0);
        assert!(space_channel_ys(&current, &requested, false).is_err());

        let mut requested = BTreeMap::new();
        requested.insert(7, 6.0);
        let ys = space_channel_ys(&current, &requested, false).unwrap();
        assert_eq!(ys[7], 6.0);
    }

    #[test]
    fn channels_between_anchors_are_squeezed() {
        let current = spread(8);
        let mut requested = BTreeMap::new();
        requested.insert(2, 300.0);
        requested.insert(5, 270.0);
        let ys = space_channel_ys(&current, &requested, true).unwrap();
        assert_eq!(ys[2], 300.0);
        assert_eq!(ys[5], 270.0);
        assert!(ys[3] <= 291.0 + 1e-9);
        assert!(ys[4] >= 279.0 - 1e-9);
        for i in 1..8 {
            assert!(ys[i - 1] - ys[i] >= MIN_CHANNEL_PITCH - 1e-9);
        }
    }
}
