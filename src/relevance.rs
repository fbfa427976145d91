//! Deterministic relevance scoring for posts.
//!
//! The score is a pure function of a post, its votes and comments, the
//! authors' verification tiers, the effective moderation flag, and an
//! injected `now`. Two replicas holding the same state compute the same
//! score, which makes rankings auditable.
//!
//! ```text
//! score = max(0, (base + engagement + author + upvoters + commenters)
//!                 * decay(now) * moderation_factor)
//! ```
//!
//! with a 7-day half-life exponential decay and a 0.5 factor for moderated
//! posts.

use crate::constants::{
    MS_PER_DAY, SCORE_BASE, SCORE_HALF_LIFE_DAYS, SCORE_MODERATED_FACTOR, SCORE_PER_COMMENT,
    SCORE_PER_UPVOTE, SCORE_PER_VERIFIED_COMMENTER, SCORE_PER_VERIFIED_UPVOTER,
    SCORE_VERIFIED_AUTHOR,
};
use crate::identity::VerificationStatus;
use crate::message::{Message, MessageBody};
use std::collections::HashSet;

/// Computes the relevance score of `post`.
///
/// `votes` and `comments` are the messages currently targeting the post;
/// non-vote/non-comment messages in the slices are ignored. `now_ms` is
/// injected so the function stays pure and testable.
pub fn relevance_score<F>(
    post: &Message,
    votes: &[&Message],
    comments: &[&Message],
    verification_of: F,
    moderated: bool,
    now_ms: u64,
) -> f64
where
    F: Fn(&str) -> VerificationStatus,
{
    let upvoters: Vec<&str> = votes
        .iter()
        .filter(|v| matches!(v.body, MessageBody::Vote { value: 1, .. }))
        .map(|v| v.author.as_str())
        .collect();
    let comment_count = comments
        .iter()
        .filter(|c| matches!(c.body, MessageBody::Comment { .. }))
        .count();

    let engagement =
        SCORE_PER_UPVOTE * upvoters.len() as f64 + SCORE_PER_COMMENT * comment_count as f64;

    let author_bonus = if verification_of(&post.author) == VerificationStatus::EnsVerified {
        SCORE_VERIFIED_AUTHOR
    } else {
        0.0
    };

    let verified_upvoters = upvoters
        .iter()
        .filter(|author| verification_of(author) == VerificationStatus::EnsVerified)
        .count();

    let verified_commenters: HashSet<&str> = comments
        .iter()
        .filter(|c| matches!(c.body, MessageBody::Comment { .. }))
        .map(|c| c.author.as_str())
        .filter(|author| verification_of(author) == VerificationStatus::EnsVerified)
        .collect();

    let raw = SCORE_BASE
        + engagement
        + author_bonus
        + SCORE_PER_VERIFIED_UPVOTER * verified_upvoters as f64
        + SCORE_PER_VERIFIED_COMMENTER * verified_commenters.len() as f64;

    let days_old = now_ms.saturating_sub(post.timestamp) as f64 / MS_PER_DAY;
    let decay = (-std::f64::consts::LN_2 * days_old / SCORE_HALF_LIFE_DAYS).exp();
    let moderation_factor = if moderated { SCORE_MODERATED_FACTOR } else { 1.0 };

    (raw * decay * moderation_factor).max(0.0)
}
