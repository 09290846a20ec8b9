//! Plain-text rendering of grouped releases for the terminal.

use std::fmt::Write;

use crate::group::format_group_time_diff;
use crate::model::{Release, ReleaseGroup};

fn labels(release: &Release) -> String {
    let mut labels = String::new();
    if release.is_prerelease {
        labels.push_str(" [pre-release]");
    }
    if release.is_draft {
        labels.push_str(" [draft]");
    }
    labels
}

fn write_group(out: &mut String, group: &ReleaseGroup) -> std::fmt::Result {
    write!(
        out,
        "{}/{}  {}",
        group.repo.owner.login,
        group.repo.name,
        group.published_at.format("%Y-%m-%d %H:%M UTC")
    )?;
    if let Some(span) = format_group_time_diff(group) {
        write!(out, "  ({} releases over {})", group.releases.len(), span)?;
    }
    writeln!(out)?;

    for release in &group.releases {
        if release.name == release.tag_name {
            writeln!(out, "  {}{}", release.tag_name, labels(release))?;
        } else {
            writeln!(out, "  {}  {}{}", release.tag_name, release.name, labels(release))?;
        }
        writeln!(out, "    {}", release.url)?;
    }
    Ok(())
}

/// Renders groups newest first, separated by blank lines.
pub fn render(groups: &[ReleaseGroup]) -> String {
    if groups.is_empty() {
        return "No releases from starred repositories in the last 3 months.\n".to_string();
    }

    let mut out = String::new();
    for (i, group) in groups.iter().enumerate() {
        if i > 0 {
            out.push('\n');
        }
        // Writing to a String cannot fail.
        let _ = write_group(&mut out, group);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::group::group_releases;
    use crate::normalize::tests::{release, repo};
    use chrono::{Duration, TimeZone, Utc};

    #[test]
    fn test_render_empty() {
        assert!(render(&[]).starts_with("No releases"));
    }

    #[test]
    fn test_render_groups() {
        let t = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        let tokio = repo("tokio-rs", "tokio");
        let serde = repo("serde-rs", "serde");

        let mut rc = release("v1.1.0-rc1", &tokio, t - Duration::minutes(30));
        rc.is_prerelease = true;
        let mut named = release("v1.0.200", &serde, t - Duration::days(1));
        named.name = "Serde 1.0.200".to_string();

        let groups = group_releases(&[release("v1.1.0", &tokio, t), rc, named]);
        let text = render(&groups);

        let expected = "\
tokio-rs/tokio  2024-05-01 12:00 UTC  (2 releases over 30m)
  v1.1.0
    https://github.com/tokio-rs/tokio/releases/tag/v1.1.0
  v1.1.0-rc1 [pre-release]
    https://github.com/tokio-rs/tokio/releases/tag/v1.1.0-rc1

serde-rs/serde  2024-04-30 12:00 UTC
  v1.0.200  Serde 1.0.200
    https://github.com/serde-rs/serde/releases/tag/v1.0.200
";
        assert_eq!(text, expected);
    }
}
