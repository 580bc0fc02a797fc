// sync-core/src/ical.rs
//! C6: encodes a normalized [`Event`] as a single-VEVENT iCalendar
//! document.

use crate::normalize::Event;

const PRODID: &str = "-//calendar-sync//outlook-to-icloud//EN";

/// Encoding options that vary per configuration rather than per event.
pub struct EncodeOptions {
    pub event_tag: String,
    pub include_second_reminder: bool,
}

/// Encodes `event` under `uid` as a complete `VCALENDAR` document
/// containing exactly one `VEVENT`.
pub fn encode_event(event: &Event, uid: &str, options: &EncodeOptions) -> String {
    let summary = if options.event_tag.is_empty() {
        non_empty_or_default(&event.subject)
    } else {
        format!("[{}] {}", options.event_tag, non_empty_or_default(&event.subject))
    };

    let mut lines = vec![
        "BEGIN:VCALENDAR".to_string(),
        "VERSION:2.0".to_string(),
        format!("PRODID:{PRODID}"),
        "BEGIN:VEVENT".to_string(),
        format!("UID:{uid}"),
        format!("DTSTAMP:{}", now_stamp()),
    ];

    if event.is_all_day {
        lines.push(format!("DTSTART;VALUE=DATE:{}", event.start_local.format("%Y%m%d")));
        lines.push(format!("DTEND;VALUE=DATE:{}", event.end_local.format("%Y%m%d")));
    } else {
        lines.push(format!("DTSTART:{}", event.start_utc.format("%Y%m%dT%H%M%SZ")));
        lines.push(format!("DTEND:{}", event.end_utc.format("%Y%m%dT%H%M%SZ")));
    }

    lines.push(format!("SUMMARY:{}", escape_text(&summary)));
    if !event.body.is_empty() {
        lines.push(format!("DESCRIPTION:{}", escape_text(&event.body)));
    }
    if !event.location.is_empty() {
        lines.push(format!("LOCATION:{}", escape_text(&event.location)));
    }

    if !event.is_all_day {
        lines.extend(valarm("-PT10M"));
        if options.include_second_reminder {
            lines.extend(valarm("-PT3M"));
        }
    }

    lines.push("END:VEVENT".to_string());
    lines.push("END:VCALENDAR".to_string());

    lines.join("\r\n") + "\r\n"
}

fn valarm(trigger: &str) -> Vec<String> {
    vec![
        "BEGIN:VALARM".to_string(),
        format!("TRIGGER:{trigger}"),
        "ACTION:DISPLAY".to_string(),
        "DESCRIPTION:Reminder".to_string(),
        "END:VALARM".to_string(),
    ]
}

fn non_empty_or_default(subject: &str) -> String {
    if subject.trim().is_empty() {
        "No Subject".to_string()
    } else {
        subject.to_string()
    }
}

fn escape_text(value: &str) -> String {
    value
        .replace('\\', "\\\\")
        .replace(';', "\\;")
        .replace(',', "\\,")
        .replace('\n', "\\n")
}

fn now_stamp() -> String {
    chrono::Utc::now().format("%Y%m%dT%H%M%SZ").to_string()
}
