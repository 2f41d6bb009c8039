//! Attempt placement across an experiment's capable resources.
//!
//! Every candidate starts at weight 1.0. Each attempt goes to the
//! highest-weight resource (first one on ties), whose weight then drops
//! by `1 / num_attempts`. N attempts over M resources therefore land
//! `ceil(N/M)` or `floor(N/M)` per resource in one pass.

use tracing::debug;

use sweepgrid_core::{JobAttempt, Resource};

/// An attempt and the resource chosen for it.
#[derive(Debug, Clone, PartialEq)]
pub struct Assignment {
    pub attempt: JobAttempt,
    pub resource: Resource,
}

/// Pick a target index for each of `num_items` items over `num_targets`
/// targets. Empty if there are no targets.
pub fn weighted_spread(num_items: usize, num_targets: usize) -> Vec<usize> {
    if num_targets == 0 || num_items == 0 {
        return Vec::new();
    }

    let step = 1.0 / num_items as f64;
    let mut weights = vec![1.0_f64; num_targets];
    let mut picks = Vec::with_capacity(num_items);

    for _ in 0..num_items {
        let mut best = 0;
        for (i, w) in weights.iter().enumerate().skip(1) {
            if *w > weights[best] {
                best = i;
            }
        }
        weights[best] -= step;
        picks.push(best);
    }
    picks
}

/// Spread `attempts` over `resources`. Hands the attempts back untouched
/// if there is nowhere to put them.
pub fn assign(
    attempts: Vec<JobAttempt>,
    resources: &[Resource],
) -> Result<Vec<Assignment>, Vec<JobAttempt>> {
    if resources.is_empty() {
        return Err(attempts);
    }

    let picks = weighted_spread(attempts.len(), resources.len());
    let assignments: Vec<Assignment> = attempts
        .into_iter()
        .zip(picks)
        .map(|(attempt, i)| Assignment {
            attempt,
            resource: resources[i].clone(),
        })
        .collect();

    debug!(
        attempts = assignments.len(),
        resources = resources.len(),
        "attempts assigned"
    );
    Ok(assignments)
}
