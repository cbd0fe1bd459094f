//! Friendly relative timestamps for the dashboard's recency column

use chrono::{DateTime, Datelike, Days, Local, Utc};

/// Describe how long ago `t` occurred relative to `reference`.
pub fn relative(t: Option<DateTime<Utc>>, reference: DateTime<Utc>) -> String {
    let Some(t) = t else {
        return "unknown".to_string();
    };
    if t > reference {
        return "just now".to_string();
    }

    let diff = reference - t;
    if diff.num_seconds() < 60 {
        let seconds = diff.num_seconds().max(1);
        return format!("{}s ago", seconds);
    }
    if diff.num_minutes() < 60 {
        let minutes = diff.num_minutes().max(1);
        if minutes == 1 {
            return "1 min ago".to_string();
        }
        return format!("{} min ago", minutes);
    }

    let local_t = t.with_timezone(&Local);
    let local_ref = reference.with_timezone(&Local);
    if same_day(&local_t, &local_ref) {
        return format!("today {}", local_t.format("%-I:%M%P"));
    }
    if is_yesterday(&local_t, &local_ref) {
        return format!("yesterday {}", local_t.format("%-I:%M%P"));
    }

    let days = diff.num_hours() / 24;
    if days < 7 {
        if days <= 1 {
            return "1 day ago".to_string();
        }
        return format!("{} days ago", days);
    }
    if local_t.year() == local_ref.year() {
        return local_t.format("%b %-d").to_string();
    }
    local_t.format("%b %-d %Y").to_string()
}

fn same_day(a: &DateTime<Local>, b: &DateTime<Local>) -> bool {
    a.year() == b.year() && a.month() == b.month() && a.day() == b.day()
}

fn is_yesterday(t: &DateTime<Local>, reference: &DateTime<Local>) -> bool {
    match reference.checked_sub_days(Days::new(1)) {
        Some(prev) => same_day(t, &prev),
        None => false,
    }
}
