//! Planning order for generations.
//!
//! Generations are ranked by their tags against an ordered list:
//! - A generation takes the rank of the first listed tag it carries
//! - Generations matching no listed tag (or untagged) rank last
//! - Lower rank is planned first; ties keep store order

use crate::store::EligibleGeneration;

/// Tag recorded in breakdowns for generations without tags.
pub const UNTAGGED: &str = "untagged";

/// Rank of a tag set. Lower runs first.
pub fn tag_rank(tags: &[String], tag_priority: &[String]) -> usize {
    tag_priority
        .iter()
        .position(|wanted| tags.iter().any(|t| t == wanted))
        .unwrap_or(tag_priority.len())
}

/// Tag a generation is reported under.
pub fn primary_tag(tags: &[String]) -> &str {
    tags.first().map(String::as_str).unwrap_or(UNTAGGED)
}

/// Sort generations by tag rank. Stable, so equal ranks keep store order.
pub fn sort_by_tag_rank(generations: &mut [EligibleGeneration], tag_priority: &[String]) {
    generations.sort_by_key(|g| tag_rank(&g.tags, tag_priority));
}
