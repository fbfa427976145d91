//! Shared constants for message validation and engine limits.
//!
//! These limits are part of the interoperability contract: a replica may
//! tighten them locally but must never loosen them, or peers running the
//! reference limits would reject its messages.

// =============================================================================
// Content Size Limits
// =============================================================================

/// Maximum post title length in bytes.
pub const MAX_TITLE_LEN: usize = 300;

/// Maximum post/comment body length in bytes.
pub const MAX_BODY_LEN: usize = 10_000;

/// Maximum cell name length in bytes.
pub const MAX_CELL_NAME_LEN: usize = 50;

/// Maximum cell description length in bytes.
pub const MAX_CELL_DESCRIPTION_LEN: usize = 500;

/// Maximum cell icon reference length in bytes (URL or emoji).
pub const MAX_CELL_ICON_LEN: usize = 500;

/// Maximum call sign length in bytes.
pub const MAX_CALL_SIGN_LEN: usize = 50;

/// Maximum moderation reason length in bytes.
pub const MAX_MODERATION_REASON_LEN: usize = 500;

// =============================================================================
// Timestamp Validation
// =============================================================================

/// Maximum allowed clock skew for author timestamps (5 minutes).
///
/// A message whose timestamp lies further than this in the future of the
/// local clock is rejected as malformed.
pub const MAX_CLOCK_SKEW_MS: u64 = 5 * 60 * 1000;

// =============================================================================
// Identity Resolution
// =============================================================================

/// Freshness window for cached identities (5 minutes). Entries older than
/// this are refreshed on access; staleness is informational, never a
/// correctness input.
pub const IDENTITY_FRESHNESS_MS: u64 = 5 * 60 * 1000;

// =============================================================================
// Delegation
// =============================================================================

/// Seven days in milliseconds.
pub const DELEGATION_7D_MS: u64 = 7 * 24 * 60 * 60 * 1000;

/// Thirty days in milliseconds.
pub const DELEGATION_30D_MS: u64 = 30 * 24 * 60 * 60 * 1000;

// =============================================================================
// Relevance Scoring
// =============================================================================

/// Base score every post starts from.
pub const SCORE_BASE: f64 = 100.0;

/// Score contribution per upvote.
pub const SCORE_PER_UPVOTE: f64 = 10.0;

/// Score contribution per comment.
pub const SCORE_PER_COMMENT: f64 = 3.0;

/// Bonus when the post author is ENS-verified.
pub const SCORE_VERIFIED_AUTHOR: f64 = 20.0;

/// Bonus per ENS-verified upvoter.
pub const SCORE_PER_VERIFIED_UPVOTER: f64 = 5.0;

/// Bonus per distinct ENS-verified commenter.
pub const SCORE_PER_VERIFIED_COMMENTER: f64 = 10.0;

/// Decay half-life in days.
pub const SCORE_HALF_LIFE_DAYS: f64 = 7.0;

/// Multiplier applied to posts under an effective moderation.
pub const SCORE_MODERATED_FACTOR: f64 = 0.5;

/// Milliseconds per day, used by the decay computation.
pub const MS_PER_DAY: f64 = 86_400_000.0;

// =============================================================================
// Display
// =============================================================================

/// Number of leading hex characters (including `0x`) in a shortened address.
pub const ADDRESS_DISPLAY_PREFIX: usize = 6;

/// Number of trailing hex characters in a shortened address.
pub const ADDRESS_DISPLAY_SUFFIX: usize = 4;

/// Returns the `0xAAAA…DDDD` shortened form of a wallet address.
///
/// Addresses shorter than the combined prefix and suffix are returned as-is.
///
/// # Example
///
/// ```
/// use opchan::constants::address_short;
///
/// let addr = "0x1234567890abcdef1234567890abcdef12345678";
/// assert_eq!(address_short(addr), "0x1234…5678");
/// ```
pub fn address_short(address: &str) -> String {
    if address.len() <= ADDRESS_DISPLAY_PREFIX + ADDRESS_DISPLAY_SUFFIX {
        return address.to_string();
    }
    format!(
        "{}…{}",
        &address[..ADDRESS_DISPLAY_PREFIX],
        &address[address.len() - ADDRESS_DISPLAY_SUFFIX..]
    )
}
