//! Derived read models built on demand.
//!
//! Enhanced views denormalize a post or cell with its votes, moderation
//! flag, and relevance score for rendering. They are computed from the
//! replica's indexes and thrown away; nothing here is stored or gossiped.

use crate::identity::VerificationStatus;
use crate::message::{Message, MessageBody, ModTargetKind};
use crate::relevance::relevance_score;
use crate::replica::Replica;
use std::collections::HashSet;

/// Seven days in milliseconds: the recent-activity window for cells.
const RECENT_ACTIVITY_WINDOW_MS: u64 = 7 * 24 * 60 * 60 * 1000;

/// A post enriched with its vote tallies, moderation flag, and score.
#[derive(Debug, Clone)]
pub struct EnhancedPost {
    pub post: Message,
    /// Authors of current +1 votes.
    pub upvoters: Vec<String>,
    /// Authors of current -1 votes.
    pub downvoters: Vec<String>,
    pub comment_count: usize,
    pub moderated: bool,
    pub relevance: f64,
    pub verified_upvoter_count: usize,
    pub verified_commenters: HashSet<String>,
}

/// A cell enriched with activity statistics.
#[derive(Debug, Clone)]
pub struct EnhancedCell {
    pub cell: Message,
    pub post_count: usize,
    /// Distinct authors of posts and comments in the cell.
    pub active_author_count: usize,
    /// Posts and comments inside the 7-day window ending at `now`.
    pub recent_activity_count: usize,
    pub moderated_post_count: usize,
}

impl Replica {
    /// Builds the enhanced view of one post, or `None` when it is unknown.
    ///
    /// `verification_of` supplies author tiers (normally the identity
    /// resolver's cache); `now_ms` drives the decay term.
    pub fn enhanced_post<F>(&self, post_id: &str, verification_of: F, now_ms: u64) -> Option<EnhancedPost>
    where
        F: Fn(&str) -> VerificationStatus,
    {
        let post = self.post(post_id)?.clone();
        let cell_id = post.cell_id().unwrap_or_default().to_string();

        let votes = self.votes_for_target(post_id);
        let mut upvoters = Vec::new();
        let mut downvoters = Vec::new();
        for vote in &votes {
            if let MessageBody::Vote { value, .. } = vote.body {
                if value == 1 {
                    upvoters.push(vote.author.clone());
                } else {
                    downvoters.push(vote.author.clone());
                }
            }
        }

        let comments = self.comments_for_post(post_id);
        let moderated = self.is_moderated(&cell_id, ModTargetKind::Post, post_id);
        let relevance = relevance_score(
            &post,
            &votes,
            &comments,
            &verification_of,
            moderated,
            now_ms,
        );

        let verified_upvoter_count = upvoters
            .iter()
            .filter(|author| verification_of(author) == VerificationStatus::EnsVerified)
            .count();
        let verified_commenters: HashSet<String> = comments
            .iter()
            .map(|comment| comment.author.clone())
            .filter(|author| verification_of(author) == VerificationStatus::EnsVerified)
            .collect();

        Some(EnhancedPost {
            upvoters,
            downvoters,
            comment_count: comments.len(),
            moderated,
            relevance,
            verified_upvoter_count,
            verified_commenters,
            post,
        })
    }

    /// Posts of a cell as enhanced views, sorted by descending relevance.
    pub fn ranked_posts<F>(&self, cell_id: &str, verification_of: F, now_ms: u64) -> Vec<EnhancedPost>
    where
        F: Fn(&str) -> VerificationStatus,
    {
        let mut enhanced: Vec<EnhancedPost> = self
            .posts_in_cell(cell_id)
            .iter()
            .filter_map(|post| self.enhanced_post(&post.id, &verification_of, now_ms))
            .collect();
        enhanced.sort_by(|a, b| {
            b.relevance
                .partial_cmp(&a.relevance)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.post.id.cmp(&b.post.id))
        });
        enhanced
    }

    /// Builds the enhanced view of one cell, or `None` when it is unknown.
    pub fn enhanced_cell(&self, cell_id: &str, now_ms: u64) -> Option<EnhancedCell> {
        let cell = self.cell(cell_id)?.clone();
        let posts = self.posts_in_cell(cell_id);

        let mut authors: HashSet<&str> = HashSet::new();
        let mut recent_activity_count = 0usize;
        let mut moderated_post_count = 0usize;
        let window_start = now_ms.saturating_sub(RECENT_ACTIVITY_WINDOW_MS);

        for post in &posts {
            authors.insert(post.author.as_str());
            if post.timestamp >= window_start {
                recent_activity_count += 1;
            }
            if self.is_moderated(cell_id, ModTargetKind::Post, &post.id) {
                moderated_post_count += 1;
            }
            for comment in self.comments_for_post(&post.id) {
                authors.insert(comment.author.as_str());
                if comment.timestamp >= window_start {
                    recent_activity_count += 1;
                }
            }
        }

        Some(EnhancedCell {
            post_count: posts.len(),
            active_author_count: authors.len(),
            recent_activity_count,
            moderated_post_count,
            cell,
        })
    }
}
