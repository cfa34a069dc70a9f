//! Forex Factory calendar harvest
//!
//! The calendar page lazy-loads rows on scroll, so the harvest steps the
//! viewport down in small increments and re-collects all rows after each
//! step through one injected script. Row text is parsed and filtered on the
//! Rust side: high-impact events only, target currencies only, Bangkok
//! local times converted to UTC.

use std::collections::HashSet;
use std::time::Duration;

use chrono::{Datelike, FixedOffset, LocalResult, NaiveDate, NaiveTime, TimeZone, Utc};
use tracing::{debug, info};

use crate::engine::{EngineError, PageSession};

/// Currencies worth keeping
const TARGET_CURRENCIES: &[&str] = &["USD", "EUR", "GBP", "AUD", "NZD"];

/// Impact cell title that marks a high-impact row
const HIGH_IMPACT_TITLE: &str = "High Impact Expected";

/// Forex Factory displays times in this zone when no account is logged in.
const BANGKOK_UTC_OFFSET_HOURS: i32 = 7;

const INITIAL_RENDER_WAIT: Duration = Duration::from_secs(3);
const AFTER_SCROLL_TOP_WAIT: Duration = Duration::from_secs(1);
const SCROLL_STEP_PX: i64 = 100;
const SCROLL_STEP_WAIT: Duration = Duration::from_millis(120);

/// One persisted calendar record (snake_case on the wire, matching the
/// stored news file format).
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct CalendarEvent {
    /// RFC 3339 event time in UTC.
    pub event_time_utc: String,
    pub currency: String,
    pub impact: String,
    pub event: String,
}

/// Collects every calendar row currently in the DOM, walking previous
/// siblings for the date/time cells (rows sharing a time slot leave those
/// cells blank), plus the live document height for the scroll loop.
const COLLECT_ROWS_SCRIPT: &str = r#"
(() => {
    const walkUp = (row, selector) => {
        let el = row;
        while (el) {
            const hit = el.querySelector(selector);
            if (hit) return hit.innerText;
            el = el.previousElementSibling;
        }
        return null;
    };
    const rows = [];
    for (const row of document.querySelectorAll('tr.calendar__row')) {
        const id = row.getAttribute('data-event-id');
        if (!id) continue;
        const currency = row.querySelector('.calendar__currency span');
        const impact = row.querySelector('.calendar__impact span');
        const title = row.querySelector('.calendar__event-title');
        rows.push({
            id: id,
            date: walkUp(row, '.calendar__date .date'),
            time: walkUp(row, '.calendar__cell.calendar__time span'),
            currency: currency ? currency.innerText.trim() : null,
            impact: impact ? impact.getAttribute('title') : null,
            event: title ? title.innerText.trim() : '',
        });
    }
    return { scrollHeight: document.body.scrollHeight, rows: rows };
})()
"#;

/// Raw row as the injected script reports it
#[derive(Debug, serde::Deserialize)]
struct RawRow {
    id: String,
    date: Option<String>,
    time: Option<String>,
    currency: Option<String>,
    impact: Option<String>,
    #[serde(default)]
    event: Option<String>,
}

#[derive(Debug, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
struct HarvestPage {
    scroll_height: i64,
    rows: Vec<RawRow>,
}

/// Scroll through the already-navigated calendar page and return every
/// high-impact event for the target currencies, in DOM order, first
/// occurrence of each event id winning.
pub async fn harvest(session: &mut dyn PageSession) -> Result<Vec<CalendarEvent>, EngineError> {
    tokio::time::sleep(INITIAL_RENDER_WAIT).await;
    session.evaluate("window.scrollTo(0, 0)").await?;
    tokio::time::sleep(AFTER_SCROLL_TOP_WAIT).await;

    let year = Utc::now().year();
    let mut seen: HashSet<String> = HashSet::new();
    let mut events: Vec<CalendarEvent> = Vec::new();
    let mut scroll_y: i64 = 0;

    info!("Scrolling calendar page and collecting rows");
    loop {
        session
            .evaluate(&format!("window.scrollTo(0, {})", scroll_y))
            .await?;
        tokio::time::sleep(SCROLL_STEP_WAIT).await;

        let value = session.evaluate(COLLECT_ROWS_SCRIPT).await?;
        let page: HarvestPage = serde_json::from_value(value)
            .map_err(|e| EngineError::ExtractionError(format!("collector payload: {}", e)))?;

        for raw in &page.rows {
            if seen.contains(&raw.id) {
                continue;
            }
            if let Some(event) = parse_row(raw, year) {
                seen.insert(raw.id.clone());
                events.push(event);
            }
        }

        scroll_y += SCROLL_STEP_PX;
        // The document grows as rows lazy-load; the height is re-read from
        // the same collect pass.
        if scroll_y >= page.scroll_height {
            break;
        }
    }

    info!("Harvest collected {} high-impact events", events.len());
    Ok(events)
}

/// Apply the row filters and build the event record. None means the row is
/// skipped (wrong currency/impact, all-day or tentative slot, unparseable
/// date).
fn parse_row(raw: &RawRow, year: i32) -> Option<CalendarEvent> {
    let currency = raw.currency.as_deref()?.trim();
    if !TARGET_CURRENCIES.contains(&currency) {
        return None;
    }
    if raw.impact.as_deref()? != HIGH_IMPACT_TITLE {
        return None;
    }

    // "All Day" / "Tentative" rows carry no clock and are skipped.
    let time = find_clock(raw.time.as_deref()?)?;
    let date = parse_row_date(raw.date.as_deref()?, year)?;

    let event_time_utc = to_utc_rfc3339(date, time)?;
    debug!("Accepted row {}: {} {}", raw.id, currency, event_time_utc);

    Some(CalendarEvent {
        event_time_utc,
        currency: currency.to_string(),
        impact: "HIGH".to_string(),
        event: raw.event.clone().unwrap_or_default(),
    })
}

/// Find the first `h:mm am|pm` clock in `text`, case-insensitive. Regex-free
/// scan: a digit run, a colon, two digits, optional spaces, then am/pm.
fn find_clock(text: &str) -> Option<NaiveTime> {
    let lower = text.to_lowercase();
    let bytes = lower.as_bytes();

    let mut i = 0;
    while i < bytes.len() {
        if !bytes[i].is_ascii_digit() {
            i += 1;
            continue;
        }
        let digits_start = i;
        while i < bytes.len() && bytes[i].is_ascii_digit() {
            i += 1;
        }
        let hour_str = &lower[digits_start..i];
        if hour_str.len() > 2 || i >= bytes.len() || bytes[i] != b':' {
            continue;
        }
        i += 1;
        let minute_start = i;
        while i < bytes.len() && bytes[i].is_ascii_digit() {
            i += 1;
        }
        if i - minute_start != 2 {
            continue;
        }
        let minute_str = &lower[minute_start..i];

        let mut j = i;
        while j < bytes.len() && bytes[j] == b' ' {
            j += 1;
        }
        let meridiem = lower.get(j..j + 2)?;
        if meridiem != "am" && meridiem != "pm" {
            continue;
        }

        let hour: u32 = hour_str.parse().ok()?;
        let minute: u32 = minute_str.parse().ok()?;
        if !(1..=12).contains(&hour) || minute > 59 {
            continue;
        }
        let hour24 = match (meridiem, hour) {
            ("am", 12) => 0,
            ("am", h) => h,
            ("pm", 12) => 12,
            ("pm", h) => h + 12,
            _ => unreachable!(),
        };
        return NaiveTime::from_hms_opt(hour24, minute, 0);
    }
    None
}

/// Parse the date cell ("Sun\nAug 24" flattened to "Sun Aug 24") with the
/// current UTC year appended.
fn parse_row_date(text: &str, year: i32) -> Option<NaiveDate> {
    let flattened = text.replace('\n', " ");
    let cleaned = flattened.split_whitespace().collect::<Vec<_>>().join(" ");
    NaiveDate::parse_from_str(&format!("{} {}", cleaned, year), "%a %b %d %Y").ok()
}

/// Interpret date+time as Bangkok local and convert to UTC RFC 3339.
fn to_utc_rfc3339(date: NaiveDate, time: NaiveTime) -> Option<String> {
    let offset = FixedOffset::east_opt(BANGKOK_UTC_OFFSET_HOURS * 3600)?;
    let local = match offset.from_local_datetime(&date.and_time(time)) {
        LocalResult::Single(dt) => dt,
        _ => return None,
    };
    Some(local.with_timezone(&Utc).to_rfc3339())
}
