use chrono::{DateTime, Days, NaiveDate, TimeZone, Utc};
use serde::Serialize;

use super::model::ConversationListItem;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ConversationGroups {
    pub today: Vec<ConversationListItem>,
    pub yesterday: Vec<ConversationListItem>,
    pub previous_7_days: Vec<ConversationListItem>,
    pub older: Vec<ConversationListItem>,
}

/// Buckets conversations by creation time against local-day boundaries of
/// `now`. Each bucket is ordered by `updated_at`, newest first.
pub fn group_by_recency<Tz: TimeZone>(
    mut items: Vec<ConversationListItem>,
    now: &DateTime<Tz>,
) -> ConversationGroups {
    let today_date = now.date_naive();
    let today = local_midnight(&now.timezone(), today_date);
    let yesterday = local_midnight(&now.timezone(), days_before(today_date, 1));
    let week_ago = local_midnight(&now.timezone(), days_before(today_date, 7));

    items.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));

    let mut groups = ConversationGroups::default();
    for item in items {
        let bucket = if item.created_at >= today {
            &mut groups.today
        } else if item.created_at >= yesterday {
            &mut groups.yesterday
        } else if item.created_at >= week_ago {
            &mut groups.previous_7_days
        } else {
            &mut groups.older
        };
        bucket.push(item);
    }
    groups
}

fn days_before(date: NaiveDate, days: u64) -> NaiveDate {
    date.checked_sub_days(Days::new(days)).unwrap_or(NaiveDate::MIN)
}

/// First instant of `date` in `tz`, as UTC. Skips forward over DST gaps.
fn local_midnight<Tz: TimeZone>(tz: &Tz, date: NaiveDate) -> DateTime<Utc> {
    let mut naive = date.and_time(chrono::NaiveTime::MIN);
    for _ in 0..4 {
        if let Some(instant) = tz.from_local_datetime(&naive).earliest() {
            return instant.with_timezone(&Utc);
        }
        naive += chrono::Duration::hours(1);
    }
    Utc.from_utc_datetime(&naive)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::FixedOffset;

    fn item(id: &str, created: DateTime<Utc>, updated: DateTime<Utc>) -> ConversationListItem {
        ConversationListItem {
            id: id.to_string(),
            title: id.to_string(),
            preview: String::new(),
            created_at: created,
            updated_at: updated,
        }
    }

    fn utc(d: u32, h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, d, h, m, 0).unwrap()
    }

    fn ids(items: &[ConversationListItem]) -> Vec<&str> {
        items.iter().map(|i| i.id.as_str()).collect()
    }

    #[test]
    fn buckets_by_created_at_boundaries() {
        let now = utc(14, 15, 0);
        let groups = group_by_recency(
            vec![
                item("midnight", utc(14, 0, 0), utc(14, 0, 0)),
                item("late-yesterday", utc(13, 23, 59), utc(13, 23, 59)),
                item("yesterday-start", utc(13, 0, 0), utc(13, 0, 0)),
                item("week-edge", utc(7, 0, 0), utc(7, 0, 0)),
                item("too-old", utc(6, 23, 59), utc(6, 23, 59)),
            ],
            &now,
        );

        assert_eq!(ids(&groups.today), vec!["midnight"]);
        assert_eq!(ids(&groups.yesterday), vec!["late-yesterday", "yesterday-start"]);
        assert_eq!(ids(&groups.previous_7_days), vec!["week-edge"]);
        assert_eq!(ids(&groups.older), vec!["too-old"]);
    }

    #[test]
    fn buckets_sort_by_updated_at_descending() {
        let now = utc(14, 15, 0);
        let groups = group_by_recency(
            vec![
                item("stale", utc(14, 1, 0), utc(14, 2, 0)),
                item("fresh", utc(14, 3, 0), utc(14, 14, 0)),
                item("old-but-touched", utc(14, 0, 30), utc(14, 10, 0)),
            ],
            &now,
        );
        assert_eq!(ids(&groups.today), vec!["fresh", "old-but-touched", "stale"]);
    }

    #[test]
    fn day_boundaries_follow_the_local_offset() {
        // 01:30 on the 14th in UTC+3 is 22:30 on the 13th in UTC.
        let tz = FixedOffset::east_opt(3 * 3600).unwrap();
        let now = tz.with_ymd_and_hms(2026, 3, 14, 1, 30, 0).unwrap();

        let groups = group_by_recency(
            vec![
                item("after-local-midnight", utc(13, 21, 30), utc(13, 21, 30)),
                item("before-local-midnight", utc(13, 20, 59), utc(13, 20, 59)),
            ],
            &now,
        );

        assert_eq!(ids(&groups.today), vec!["after-local-midnight"]);
        assert_eq!(ids(&groups.yesterday), vec!["before-local-midnight"]);
    }

    #[test]
    fn empty_input_gives_empty_groups() {
        assert_eq!(
            group_by_recency(Vec::new(), &utc(14, 0, 0)),
            ConversationGroups::default()
        );
    }
}
