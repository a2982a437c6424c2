//! Branch-aware range resolution.
//!
//! A timeline's text is the concatenation of each ancestor's own paragraphs
//! up to its divergence point, followed by the timeline's own paragraphs.
//! [`range_keys`] computes where each requested position lives without
//! touching storage; [`resolve_range`] loads them.

use storyteller_core::error::DomainError;
use storyteller_core::keys::ParagraphKey;
use storyteller_core::record::{ParagraphRecord, TimelineRecord};
use storyteller_core::repository::StoryRepository;

/// Keys of the paragraphs at positions `start..=end` of `timeline`, in
/// position order.
#[must_use]
pub fn range_keys(timeline: &TimelineRecord, start: u32, end: u32) -> Vec<ParagraphKey> {
    let start = start.max(1);
    let end = end.min(timeline.length);
    if start > end {
        return Vec::new();
    }

    let mut keys = Vec::with_capacity((end - start + 1) as usize);
    let mut branch_end = 0;
    for point in &timeline.ancestor_points {
        if point.position >= start {
            let from = (branch_end + 1).max(start);
            let to = point.position.min(end);
            keys.extend((from..=to).map(|p| ParagraphKey::new(point.timeline_id, p)));
            if to == end {
                return keys;
            }
        }
        branch_end = point.position;
    }

    let from = (branch_end + 1).max(start);
    keys.extend((from..=end).map(|p| ParagraphKey::new(timeline.id, p)));
    keys
}

/// Loads paragraphs `start..=end` of `timeline`; `end` defaults to the tip.
///
/// The result stops at the first position storage has no record for, so a
/// read racing an in-flight fork comes back short rather than failing.
///
/// # Errors
///
/// Returns `DomainError::Infrastructure` if storage fails.
pub async fn resolve_range(
    repo: &dyn StoryRepository,
    timeline: &TimelineRecord,
    start: u32,
    end: Option<u32>,
) -> Result<Vec<ParagraphRecord>, DomainError> {
    let keys = range_keys(timeline, start, end.unwrap_or(timeline.length));
    if keys.is_empty() {
        return Ok(Vec::new());
    }
    let loaded = repo.load_paragraphs(&keys).await?;
    Ok(loaded.into_iter().map_while(|paragraph| paragraph).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, TimeZone, Utc};
    use storyteller_core::keys::TimelineId;
    use storyteller_core::record::TimelineDraft;
    use storyteller_core::repository::TimelineTxn;
    use storyteller_store::MemoryStoryRepository;

    fn fixed_now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 1, 15, 10, 0, 0).unwrap()
    }

    fn record(id: i64, points: Vec<ParagraphKey>, length: u32) -> TimelineRecord {
        TimelineRecord {
            id: TimelineId(id),
            ancestor_points: points,
            length,
            auth_token_digest: None,
            lock_expiry: None,
            pending: None,
            created_at: fixed_now(),
            updated_at: fixed_now(),
        }
    }

    fn key(timeline: i64, position: u32) -> ParagraphKey {
        ParagraphKey::new(TimelineId(timeline), position)
    }

    async fn append(repo: &MemoryStoryRepository, id: TimelineId, text: &str) {
        repo.transact(id, &|txn: &mut TimelineTxn| {
            txn.timeline.length += 1;
            txn.new_paragraphs.push(ParagraphRecord {
                timeline_id: txn.timeline.id,
                position: txn.timeline.length,
                text: text.to_owned(),
                created_at: fixed_now(),
                branch_count: 0,
            });
            Ok(())
        })
        .await
        .unwrap();
    }

    #[test]
    fn test_root_range_reads_own_group() {
        let root = record(1, Vec::new(), 4);
        assert_eq!(range_keys(&root, 2, 3), vec![key(1, 2), key(1, 3)]);
    }

    #[test]
    fn test_range_crosses_single_fork_point() {
        let fork = record(2, vec![key(1, 3)], 6);

        assert_eq!(
            range_keys(&fork, 1, 6),
            vec![key(1, 1), key(1, 2), key(1, 3), key(2, 4), key(2, 5), key(2, 6)]
        );
    }

    #[test]
    fn test_range_crosses_nested_fork_points() {
        let grandchild = record(3, vec![key(1, 2), key(2, 4)], 5);

        assert_eq!(
            range_keys(&grandchild, 2, 5),
            vec![key(1, 2), key(2, 3), key(2, 4), key(3, 5)]
        );
    }

    #[test]
    fn test_range_skips_ancestors_before_start() {
        let grandchild = record(3, vec![key(1, 2), key(2, 4)], 6);
        assert_eq!(range_keys(&grandchild, 5, 6), vec![key(3, 5), key(3, 6)]);
    }

    #[test]
    fn test_range_ending_inside_ancestor_stops_there() {
        let fork = record(2, vec![key(1, 3)], 6);
        assert_eq!(range_keys(&fork, 1, 2), vec![key(1, 1), key(1, 2)]);
    }

    #[test]
    fn test_range_is_clamped_to_filled_positions() {
        let root = record(1, Vec::new(), 2);

        assert_eq!(range_keys(&root, 0, 9), vec![key(1, 1), key(1, 2)]);
        assert!(range_keys(&root, 3, 9).is_empty());
    }

    #[test]
    fn test_bare_fork_reads_only_inherited_positions() {
        let bare = record(2, vec![key(1, 3)], 3);
        assert_eq!(range_keys(&bare, 1, 3), vec![key(1, 1), key(1, 2), key(1, 3)]);
    }

    #[tokio::test]
    async fn test_resolve_range_reads_across_fork() {
        // Arrange
        let repo = MemoryStoryRepository::new();
        let (root, _) = repo
            .insert_timeline(TimelineDraft {
                ancestor_points: Vec::new(),
                length: 0,
                first_paragraph: None,
                created_at: fixed_now(),
            })
            .await
            .unwrap();
        for text in ["Alpha one", "Alpha two", "Alpha three", "Alpha four"] {
            append(&repo, root.id, text).await;
        }
        let (fork, _) = repo
            .insert_timeline(TimelineDraft {
                ancestor_points: vec![ParagraphKey::new(root.id, 2)],
                length: 3,
                first_paragraph: Some("Beta three".to_owned()),
                created_at: fixed_now(),
            })
            .await
            .unwrap();

        // Act
        let first = resolve_range(&repo, &fork, 1, None).await.unwrap();
        let second = resolve_range(&repo, &fork, 1, None).await.unwrap();

        // Assert
        let texts: Vec<_> = first.iter().map(|p| p.text.as_str()).collect();
        assert_eq!(texts, vec!["Alpha one", "Alpha two", "Beta three"]);
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_resolve_range_truncates_at_first_gap() {
        // Arrange
        let repo = MemoryStoryRepository::new();
        let (root, _) = repo
            .insert_timeline(TimelineDraft {
                ancestor_points: Vec::new(),
                length: 0,
                first_paragraph: None,
                created_at: fixed_now(),
            })
            .await
            .unwrap();
        append(&repo, root.id, "Alpha one").await;
        append(&repo, root.id, "Alpha two").await;
        // A snapshot claiming more positions than storage holds.
        let racing = record(root.id.0, Vec::new(), 4);

        // Act
        let paragraphs = resolve_range(&repo, &racing, 1, None).await.unwrap();

        // Assert
        assert_eq!(paragraphs.len(), 2);
        assert_eq!(paragraphs[1].position, 2);
    }

    #[tokio::test]
    async fn test_resolve_empty_range_skips_storage() {
        let repo = storyteller_test_support::FailingStoryRepository;
        let root = record(1, Vec::new(), 0);

        let paragraphs = resolve_range(&repo, &root, 1, None).await.unwrap();

        assert!(paragraphs.is_empty());
    }
}
