//! Cost balancing between the major and minor device.
//!
//! The balancer picks the subset of candidates whose summed cost is closest
//! to half of the total. Small candidate counts are searched exhaustively;
//! larger ones use a subset-sum table over scaled costs.

/// Largest candidate count searched exhaustively.
pub const MAX_EXHAUSTIVE_CANDIDATES: usize = 20;

/// Resolution of the subset-sum table used above the exhaustive limit.
const DP_BUCKETS: u64 = 4096;

/// Select the subset of `costs` whose sum is closest to `target`.
///
/// Up to [`MAX_EXHAUSTIVE_CANDIDATES`] candidates the search is exhaustive,
/// trying each candidate included before excluded and keeping the first
/// subset with a strictly smaller deviation. Above that the result is
/// optimal up to the cost scaling of the subset-sum table.
pub fn closest_subset(costs: &[u64], target: u64) -> Vec<bool> {
    if costs.len() <= MAX_EXHAUSTIVE_CANDIDATES {
        let mut search = Exhaustive {
            costs,
            target,
            best: u64::MAX,
            current: vec![false; costs.len()],
            chosen: vec![false; costs.len()],
        };
        search.dfs(0, 0);
        search.chosen
    } else {
        subset_sum(costs, target)
    }
}

/// Decide which candidates run on the major device.
///
/// The target is half the total cost. If the closest subset falls below the
/// target the selection is inverted, so the major device always gets the
/// bigger half.
pub fn assign_major(costs: &[u64]) -> Vec<bool> {
    let total: u64 = costs.iter().sum();
    let target = total / 2;
    let mut selection = closest_subset(costs, target);

    let chosen: u64 = costs
        .iter()
        .zip(&selection)
        .filter(|(_, selected)| **selected)
        .map(|(cost, _)| cost)
        .sum();
    if chosen < target {
        for selected in &mut selection {
            *selected = !*selected;
        }
    }

    tracing::debug!(total, target, chosen, "balanced candidates");
    selection
}

struct Exhaustive<'a> {
    costs: &'a [u64],
    target: u64,
    best: u64,
    current: Vec<bool>,
    chosen: Vec<bool>,
}

impl Exhaustive<'_> {
    fn dfs(&mut self, index: usize, sum: u64) {
        if index == self.costs.len() {
            let deviation = sum.abs_diff(self.target);
            if deviation < self.best {
                self.best = deviation;
                self.chosen.copy_from_slice(&self.current);
            }
            return;
        }

        self.current[index] = true;
        self.dfs(index + 1, sum + self.costs[index]);

        self.current[index] = false;
        self.dfs(index + 1, sum);
    }
}

/// 0/1 subset-sum over costs scaled into at most [`DP_BUCKETS`] buckets.
fn subset_sum(costs: &[u64], target: u64) -> Vec<bool> {
    let total: u64 = costs.iter().sum();
    let scale = total.div_ceil(DP_BUCKETS).max(1);
    let weights: Vec<usize> = costs.iter().map(|&c| (c / scale) as usize).collect();
    let capacity: usize = weights.iter().sum();
    let scaled_target = (target / scale) as usize;

    // `from[s]` is the item that first reached sum `s`.
    let mut reached = vec![false; capacity + 1];
    let mut from: Vec<Option<usize>> = vec![None; capacity + 1];
    reached[0] = true;
    for (item, &weight) in weights.iter().enumerate() {
        if weight == 0 {
            continue;
        }
        for sum in (weight..=capacity).rev() {
            if reached[sum - weight] && !reached[sum] {
                reached[sum] = true;
                from[sum] = Some(item);
            }
        }
    }

    let mut best_sum = 0;
    let mut best_deviation = usize::MAX;
    for (sum, _) in reached.iter().enumerate().filter(|(_, r)| **r) {
        let deviation = sum.abs_diff(scaled_target);
        if deviation < best_deviation {
            best_deviation = deviation;
            best_sum = sum;
        }
    }

    let mut selection = vec![false; costs.len()];
    let mut sum = best_sum;
    while let Some(item) = from[sum] {
        selection[item] = true;
        sum -= weights[item];
    }
    selection
}
