//! Groups consecutive releases of one repository published close together.

use std::collections::HashMap;

use chrono::Duration;

use crate::model::{GroupRepo, Release, ReleaseGroup};
use crate::normalize::sort_releases;

/// Largest gap between neighbouring releases of one group.
pub const GROUP_WINDOW_HOURS: i64 = 2;

fn same_repo(a: &Release, b: &Release) -> bool {
    a.repo.name == b.repo.name && a.repo.owner.login == b.repo.owner.login
}

fn close_group(releases: Vec<Release>) -> Option<ReleaseGroup> {
    let first = releases.first()?;
    let repo = GroupRepo {
        name: first.repo.name.clone(),
        url: first.repo.url.clone(),
        owner: first.repo.owner.clone(),
    };
    Some(ReleaseGroup {
        id: format!(
            "{}-{}",
            first.repo.full_name(),
            first.published_at.to_rfc3339()
        ),
        published_at: first.published_at,
        is_single_release: releases.len() == 1,
        repo,
        releases,
    })
}

/// Sorts newest first and splits into groups. A release joins the current
/// group when it belongs to the same repository and was published at most
/// [`GROUP_WINDOW_HOURS`] before the group's last-added release.
pub fn group_releases(releases: &[Release]) -> Vec<ReleaseGroup> {
    let mut sorted = releases.to_vec();
    sort_releases(&mut sorted);

    let window = Duration::hours(GROUP_WINDOW_HOURS);
    let mut groups = Vec::new();
    let mut current: Vec<Release> = Vec::new();

    for release in sorted {
        let starts_new = current.last().is_some_and(|last| {
            !same_repo(last, &release) || (last.published_at - release.published_at).abs() > window
        });
        if starts_new {
            groups.extend(close_group(std::mem::take(&mut current)));
        }
        current.push(release);
    }
    groups.extend(close_group(current));

    groups
}

/// Span of a multi-release group as `"{h}h {m}m"` or `"{m}m"`.
pub fn format_group_time_diff(group: &ReleaseGroup) -> Option<String> {
    if group.releases.len() <= 1 {
        return None;
    }
    let newest = group.releases.first()?.published_at;
    let oldest = group.releases.last()?.published_at;
    let span = newest - oldest;

    let hours = span.num_hours();
    let minutes = span.num_minutes();
    if hours > 0 {
        Some(format!("{}h {}m", hours, minutes % 60))
    } else {
        Some(format!("{}m", minutes))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct Fingerprint {
    len: usize,
    first: Option<String>,
    last: Option<String>,
}

impl Fingerprint {
    fn of(releases: &[Release]) -> Self {
        Self {
            len: releases.len(),
            first: releases.first().map(|r| r.id.clone()),
            last: releases.last().map(|r| r.id.clone()),
        }
    }
}

/// Memoizes [`group_releases`] by the length and boundary ids of its input.
///
/// The input must already be deduplicated and sorted newest first; two
/// different lists with the same length and boundary ids share a result.
#[derive(Debug, Default)]
pub struct ReleaseGrouper {
    memo: HashMap<Fingerprint, Vec<ReleaseGroup>>,
}

impl ReleaseGrouper {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn group(&mut self, releases: &[Release]) -> &[ReleaseGroup] {
        self.memo
            .entry(Fingerprint::of(releases))
            .or_insert_with(|| group_releases(releases))
    }

    pub fn clear(&mut self) {
        self.memo.clear();
    }

    pub fn len(&self) -> usize {
        self.memo.len()
    }

    pub fn is_empty(&self) -> bool {
        self.memo.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::normalize::tests::{release, repo};
    use chrono::{DateTime, TimeZone, Utc};

    fn t(secs: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap() + Duration::seconds(secs)
    }

    #[test]
    fn test_two_hours_is_same_group() {
        let r = repo("o", "r");
        let releases = vec![
            release("a", &r, t(0)),
            release("b", &r, t(-2 * 3600)),
        ];

        let groups = group_releases(&releases);

        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].releases.len(), 2);
        assert!(!groups[0].is_single_release);
    }

    #[test]
    fn test_one_second_over_two_hours_splits() {
        let r = repo("o", "r");
        let releases = vec![
            release("a", &r, t(0)),
            release("b", &r, t(-2 * 3600 - 1)),
        ];

        let groups = group_releases(&releases);

        assert_eq!(groups.len(), 2);
        assert!(groups.iter().all(|g| g.is_single_release));
    }

    #[test]
    fn test_gap_is_measured_from_last_added_release() {
        let r = repo("o", "r");
        // Each neighbour is 90 minutes apart; the chain spans 3 hours.
        let releases = vec![
            release("a", &r, t(0)),
            release("b", &r, t(-90 * 60)),
            release("c", &r, t(-180 * 60)),
        ];

        let groups = group_releases(&releases);

        assert_eq!(groups.len(), 1);
        assert_eq!(format_group_time_diff(&groups[0]).as_deref(), Some("3h 0m"));
    }

    #[test]
    fn test_other_repo_in_between_splits() {
        let r = repo("o", "r");
        let s = repo("o", "s");
        let releases = vec![
            release("a", &r, t(0)),
            release("x", &s, t(-60)),
            release("b", &r, t(-120)),
        ];

        let groups = group_releases(&releases);

        let ids: Vec<&str> = groups.iter().map(|g| g.releases[0].id.as_str()).collect();
        assert_eq!(ids, vec!["a", "x", "b"]);
    }

    #[test]
    fn test_group_identity_and_order() {
        let r = repo("tokio-rs", "tokio");
        let releases = vec![
            release("old", &r, t(-60)),
            release("new", &r, t(0)),
        ];

        let groups = group_releases(&releases);

        assert_eq!(groups[0].id, format!("tokio-rs/tokio-{}", t(0).to_rfc3339()));
        assert_eq!(groups[0].published_at, t(0));
        assert_eq!(groups[0].releases[0].id, "new");
        assert_eq!(groups[0].repo.owner.login, "tokio-rs");
    }

    #[test]
    fn test_same_instant_orders_by_repo() {
        let releases = vec![
            release("z", &repo("zeta", "z"), t(0)),
            release("a", &repo("alpha", "a"), t(0)),
        ];

        let groups = group_releases(&releases);

        assert_eq!(groups[0].repo.owner.login, "alpha");
        assert_eq!(groups[1].repo.owner.login, "zeta");
    }

    #[test]
    fn test_empty_input() {
        assert!(group_releases(&[]).is_empty());
    }

    #[test]
    fn test_format_group_time_diff() {
        let r = repo("o", "r");
        let single = group_releases(&[release("a", &r, t(0))]);
        assert_eq!(format_group_time_diff(&single[0]), None);

        let short = group_releases(&[release("a", &r, t(0)), release("b", &r, t(-45 * 60))]);
        assert_eq!(format_group_time_diff(&short[0]).as_deref(), Some("45m"));

        let long = group_releases(&[release("a", &r, t(0)), release("b", &r, t(-(90 * 60 + 30)))]);
        assert_eq!(format_group_time_diff(&long[0]).as_deref(), Some("1h 30m"));
    }

    #[test]
    fn test_grouper_memoizes_by_fingerprint() {
        let r = repo("o", "r");
        let releases = vec![release("a", &r, t(0)), release("b", &r, t(-60))];
        let mut grouper = ReleaseGrouper::new();

        let first = grouper.group(&releases).to_vec();
        let again = grouper.group(&releases).to_vec();
        assert_eq!(first, again);
        assert_eq!(grouper.len(), 1);

        let mut more = releases.clone();
        more.push(release("c", &r, t(-120)));
        assert_eq!(grouper.group(&more)[0].releases.len(), 3);
        assert_eq!(grouper.len(), 2);

        grouper.clear();
        assert!(grouper.is_empty());
    }
}
