//! Time-budgeted shuffle scheduler.
//!
//! Greedy round-robin over a randomly ordered list of subscriptions: every pass offers
//! each subscription one slot for its earliest unwatched video that still fits.

use std::collections::HashSet;
use std::time::Duration;

use anyhow::Result;
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;

use feed_hub_types::{ShuffleScope, VideoId};

use crate::catalog::{Video, VideoCatalog};

/// Consecutive passes without a pick before the scheduler gives up.
const IDLE_PASS_LIMIT: usize = 3;

#[derive(Debug, Clone)]
pub struct ShuffleRequest {
    pub user_id: i64,
    pub scope: ShuffleScope,
    pub budget: Duration,
    /// Videos that must not be picked (for example the current video and the queue).
    pub exclude: HashSet<VideoId>,
    /// Fixes the subscription order; `None` draws from entropy.
    pub seed: Option<u64>,
}

impl ShuffleRequest {
    pub fn new(user_id: i64, scope: ShuffleScope, budget: Duration) -> Self {
        Self {
            user_id,
            scope,
            budget,
            exclude: HashSet::new(),
            seed: None,
        }
    }
}

/// Build an ordered playlist for `request`.
///
/// The globally earliest unwatched video is always picked first, even if it alone exceeds
/// the budget. Every later pick fits the remaining budget. The result is in pick order.
pub async fn build_playlist(
    catalog: &dyn VideoCatalog,
    request: &ShuffleRequest,
) -> Result<Vec<Video>> {
    let mut subscriptions = catalog
        .subscription_ids_for_scope(request.user_id, request.scope)
        .await?;
    if subscriptions.is_empty() {
        tracing::debug!(user_id = request.user_id, scope = ?request.scope, "shuffle scope is empty");
        return Ok(Vec::new());
    }
    let mut rng = match request.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };
    subscriptions.shuffle(&mut rng);

    let mut excluded = request.exclude.clone();
    let Some(seed_video) = catalog
        .earliest_unwatched(&subscriptions, &excluded)
        .await?
    else {
        return Ok(Vec::new());
    };
    let mut remaining = request.budget.saturating_sub(seed_video.duration());
    excluded.insert(seed_video.id);
    let mut picked = vec![seed_video];

    let mut idle_passes = 0;
    while idle_passes < IDLE_PASS_LIMIT && !remaining.is_zero() {
        let mut added = false;
        for subscription in &subscriptions {
            let Some(video) = catalog
                .earliest_unwatched(std::slice::from_ref(subscription), &excluded)
                .await?
            else {
                continue;
            };
            if video.duration() > remaining {
                continue;
            }
            remaining -= video.duration();
            excluded.insert(video.id);
            picked.push(video);
            added = true;
        }
        if added {
            idle_passes = 0;
        } else {
            idle_passes += 1;
        }
    }

    tracing::info!(
        user_id = request.user_id,
        scope = ?request.scope,
        subscriptions = subscriptions.len(),
        picked = picked.len(),
        remaining_secs = remaining.as_secs(),
        "shuffle playlist built"
    );
    Ok(picked)
}
