use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// School week used by the timetable: Monday through Saturday.
/// Wire and storage keys are the lowercase Indonesian day names the
/// upstream system uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum WeekDay {
    #[serde(rename = "senin")]
    Monday,
    #[serde(rename = "selasa")]
    Tuesday,
    #[serde(rename = "rabu")]
    Wednesday,
    #[serde(rename = "kamis")]
    Thursday,
    #[serde(rename = "jumat")]
    Friday,
    #[serde(rename = "sabtu")]
    Saturday,
}

impl WeekDay {
    pub const ALL: [WeekDay; 6] = [
        WeekDay::Monday,
        WeekDay::Tuesday,
        WeekDay::Wednesday,
        WeekDay::Thursday,
        WeekDay::Friday,
        WeekDay::Saturday,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            WeekDay::Monday => "senin",
            WeekDay::Tuesday => "selasa",
            WeekDay::Wednesday => "rabu",
            WeekDay::Thursday => "kamis",
            WeekDay::Friday => "jumat",
            WeekDay::Saturday => "sabtu",
        }
    }

    /// Capitalized form for printable headers.
    pub fn display_name(self) -> &'static str {
        match self {
            WeekDay::Monday => "Senin",
            WeekDay::Tuesday => "Selasa",
            WeekDay::Wednesday => "Rabu",
            WeekDay::Thursday => "Kamis",
            WeekDay::Friday => "Jumat",
            WeekDay::Saturday => "Sabtu",
        }
    }

    pub fn parse(s: &str) -> Option<WeekDay> {
        match s.trim().to_ascii_lowercase().as_str() {
            "senin" => Some(WeekDay::Monday),
            "selasa" => Some(WeekDay::Tuesday),
            "rabu" => Some(WeekDay::Wednesday),
            "kamis" => Some(WeekDay::Thursday),
            "jumat" => Some(WeekDay::Friday),
            "sabtu" => Some(WeekDay::Saturday),
            _ => None,
        }
    }
}

/// Wall-clock time of day as minutes since midnight.
///
/// The upstream data carries zero-padded 24-hour "HH:MM" strings and leans
/// on their lexical ordering; parsing into minutes keeps the same ordering
/// without the format assumption.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(into = "String")]
pub struct TimeOfDay(u16);

impl TimeOfDay {
    pub fn from_minutes(minutes: u16) -> Option<TimeOfDay> {
        if minutes < 24 * 60 {
            Some(TimeOfDay(minutes))
        } else {
            None
        }
    }

    pub fn minutes(self) -> u16 {
        self.0
    }

    /// Strict "HH:MM" parse: exactly two zero-padded digit pairs separated
    /// by a colon, hour 00-23, minute 00-59.
    pub fn parse(s: &str) -> Result<TimeOfDay, ScheduleError> {
        let bytes = s.as_bytes();
        let well_formed = bytes.len() == 5
            && bytes[2] == b':'
            && bytes[0].is_ascii_digit()
            && bytes[1].is_ascii_digit()
            && bytes[3].is_ascii_digit()
            && bytes[4].is_ascii_digit();
        if !well_formed {
            return Err(ScheduleError::new(
                "invalid_schedule",
                format!("time must be zero-padded HH:MM, got {:?}", s),
            ));
        }
        let hour = u16::from((bytes[0] - b'0') * 10 + (bytes[1] - b'0'));
        let minute = u16::from((bytes[3] - b'0') * 10 + (bytes[4] - b'0'));
        if hour > 23 || minute > 59 {
            return Err(ScheduleError::new(
                "invalid_schedule",
                format!("time out of range: {}", s),
            ));
        }
        Ok(TimeOfDay(hour * 60 + minute))
    }
}

impl fmt::Display for TimeOfDay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}:{:02}", self.0 / 60, self.0 % 60)
    }
}

impl From<TimeOfDay> for String {
    fn from(t: TimeOfDay) -> String {
        t.to_string()
    }
}

/// What occupies a slot: a taught subject or a labeled break.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum SlotKind {
    Lesson {
        subject: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        code: Option<String>,
    },
    Break {
        label: String,
    },
}

/// One scheduled interval on a weekday.
///
/// `sort_order` is persisted for stable display when times tie; the grid
/// computation never reads it.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TimeSlot {
    pub day: WeekDay,
    pub start_time: TimeOfDay,
    pub end_time: TimeOfDay,
    #[serde(flatten)]
    pub kind: SlotKind,
    pub sort_order: i64,
}

/// A rendered cell: the slot it shows, how many grid rows it covers, and
/// whether this boundary falls inside an already-started slot (in which
/// case the cell must not be emitted at all; a prior row's rowspan covers
/// its space).
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CellSpan {
    pub slot: TimeSlot,
    pub row_span: usize,
    pub is_continuation: bool,
}

/// One table row of the compacted grid, spanning one boundary interval.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TimeRow {
    pub label: String,
    pub start_time: TimeOfDay,
    pub end_time: TimeOfDay,
    pub cells: BTreeMap<WeekDay, CellSpan>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ScheduleError {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl ScheduleError {
    pub fn new(code: &str, message: impl Into<String>) -> Self {
        Self {
            code: code.to_string(),
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }
}

impl fmt::Display for ScheduleError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

/// Checks one day's slot list before it is accepted into storage: every
/// slot must end after it starts, starts must be unique, and no two slots
/// may overlap. Overlap is rejected outright rather than resolved by any
/// tie-break; `compact_week` itself stays permissive.
pub fn validate_day_slots(slots: &[TimeSlot]) -> Result<(), ScheduleError> {
    for s in slots {
        if s.end_time <= s.start_time {
            return Err(ScheduleError::new(
                "invalid_schedule",
                format!("slot must end after it starts: {}-{}", s.start_time, s.end_time),
            )
            .with_details(serde_json::json!({
                "day": s.day.as_str(),
                "startTime": s.start_time.to_string(),
                "endTime": s.end_time.to_string(),
            })));
        }
    }

    let mut sorted: Vec<&TimeSlot> = slots.iter().collect();
    sorted.sort_by_key(|s| s.start_time);

    for pair in sorted.windows(2) {
        let (a, b) = (pair[0], pair[1]);
        if a.start_time == b.start_time {
            return Err(ScheduleError::new(
                "invalid_schedule",
                format!("two slots share start time {}", a.start_time),
            )
            .with_details(serde_json::json!({
                "day": a.day.as_str(),
                "startTime": a.start_time.to_string(),
            })));
        }
        if a.end_time > b.start_time {
            return Err(ScheduleError::new(
                "invalid_schedule",
                format!(
                    "slots overlap: {}-{} and {}-{}",
                    a.start_time, a.end_time, b.start_time, b.end_time
                ),
            )
            .with_details(serde_json::json!({
                "day": a.day.as_str(),
                "first": format!("{}-{}", a.start_time, a.end_time),
                "second": format!("{}-{}", b.start_time, b.end_time),
            })));
        }
    }

    Ok(())
}

/// Compacts a week of slots into a minimal row set for table rendering.
///
/// Every distinct start/end across all days becomes a row boundary; each
/// consecutive boundary pair is one row. A slot spanning several rows is
/// owned by the row where it starts (carrying its full rowspan) and marked
/// as a continuation in the rows it merely covers.
///
/// Pure and total: no validation happens here. If a day carries
/// overlapping slots the first match in iteration order wins for each row,
/// which yields a well-formed (if arguable) grid rather than a failure.
pub fn compact_week(slots: &[TimeSlot]) -> Vec<TimeRow> {
    let mut by_day: BTreeMap<WeekDay, Vec<&TimeSlot>> = BTreeMap::new();
    for s in slots {
        by_day.entry(s.day).or_default().push(s);
    }

    let mut boundary_set: BTreeSet<TimeOfDay> = BTreeSet::new();
    for s in slots {
        boundary_set.insert(s.start_time);
        boundary_set.insert(s.end_time);
    }
    let boundaries: Vec<TimeOfDay> = boundary_set.into_iter().collect();
    if boundaries.len() < 2 {
        return Vec::new();
    }

    let mut rows: Vec<TimeRow> = Vec::with_capacity(boundaries.len() - 1);
    for window in boundaries.windows(2) {
        let (lo, hi) = (window[0], window[1]);
        let mut cells: BTreeMap<WeekDay, CellSpan> = BTreeMap::new();

        for (day, day_slots) in &by_day {
            let Some(slot) = day_slots
                .iter()
                .find(|s| s.start_time <= lo && s.end_time > lo)
            else {
                continue;
            };

            let row_span = boundaries
                .windows(2)
                .filter(|w| w[0] >= slot.start_time && w[1] <= slot.end_time)
                .count();

            cells.insert(
                *day,
                CellSpan {
                    slot: (*slot).clone(),
                    row_span,
                    is_continuation: lo != slot.start_time,
                },
            );
        }

        rows.push(TimeRow {
            label: format!("{}-{}", lo, hi),
            start_time: lo,
            end_time: hi,
            cells,
        });
    }

    rows
}

#[cfg(test)]
mod tests {
    use super::*;

    fn t(s: &str) -> TimeOfDay {
        TimeOfDay::parse(s).expect("valid time")
    }

    fn lesson(day: WeekDay, start: &str, end: &str, subject: &str) -> TimeSlot {
        TimeSlot {
            day,
            start_time: t(start),
            end_time: t(end),
            kind: SlotKind::Lesson {
                subject: subject.to_string(),
                code: None,
            },
            sort_order: 0,
        }
    }

    fn pause(day: WeekDay, start: &str, end: &str, label: &str) -> TimeSlot {
        TimeSlot {
            day,
            start_time: t(start),
            end_time: t(end),
            kind: SlotKind::Break {
                label: label.to_string(),
            },
            sort_order: 0,
        }
    }

    #[test]
    fn time_of_day_parse_and_order() {
        assert_eq!(t("00:00").minutes(), 0);
        assert_eq!(t("07:45").minutes(), 7 * 60 + 45);
        assert_eq!(t("23:59").minutes(), 23 * 60 + 59);
        assert!(t("07:00") < t("07:45"));
        assert_eq!(t("07:05").to_string(), "07:05");

        assert!(TimeOfDay::parse("7:00").is_err());
        assert!(TimeOfDay::parse("07:60").is_err());
        assert!(TimeOfDay::parse("24:00").is_err());
        assert!(TimeOfDay::parse("07.00").is_err());
        assert!(TimeOfDay::parse("").is_err());
    }

    #[test]
    fn empty_input_yields_no_rows() {
        assert!(compact_week(&[]).is_empty());
    }

    #[test]
    fn single_slot_yields_one_row_span_one() {
        let slots = vec![lesson(WeekDay::Monday, "07:00", "07:45", "Matematika")];
        let rows = compact_week(&slots);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].label, "07:00-07:45");

        let cell = rows[0].cells.get(&WeekDay::Monday).expect("monday cell");
        assert_eq!(cell.row_span, 1);
        assert!(!cell.is_continuation);
        for day in WeekDay::ALL.iter().skip(1) {
            assert!(rows[0].cells.get(day).is_none());
        }
    }

    #[test]
    fn cross_day_boundaries_merge_into_shared_rows() {
        // Monday: 07:00-07:45 lesson, then a break to 08:30.
        // Tuesday: one lesson spanning the whole 07:00-08:30 window.
        let slots = vec![
            lesson(WeekDay::Monday, "07:00", "07:45", "Matematika"),
            pause(WeekDay::Monday, "07:45", "08:30", "Istirahat"),
            lesson(WeekDay::Tuesday, "07:00", "08:30", "IPA"),
        ];
        let rows = compact_week(&slots);
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].label, "07:00-07:45");
        assert_eq!(rows[1].label, "07:45-08:30");

        let mon0 = rows[0].cells.get(&WeekDay::Monday).expect("mon row0");
        assert_eq!(mon0.row_span, 1);
        assert!(!mon0.is_continuation);

        let tue0 = rows[0].cells.get(&WeekDay::Tuesday).expect("tue row0");
        assert_eq!(tue0.row_span, 2);
        assert!(!tue0.is_continuation);

        let mon1 = rows[1].cells.get(&WeekDay::Monday).expect("mon row1");
        assert_eq!(mon1.row_span, 1);
        assert!(!mon1.is_continuation);
        assert_eq!(
            mon1.slot.kind,
            SlotKind::Break {
                label: "Istirahat".to_string()
            }
        );

        let tue1 = rows[1].cells.get(&WeekDay::Tuesday).expect("tue row1");
        assert!(tue1.is_continuation);
        assert_eq!(tue1.slot.start_time, t("07:00"));
    }

    #[test]
    fn row_count_is_boundary_count_minus_one() {
        let slots = vec![
            lesson(WeekDay::Monday, "07:00", "08:00", "Matematika"),
            lesson(WeekDay::Wednesday, "07:30", "09:00", "IPS"),
            lesson(WeekDay::Friday, "10:00", "11:00", "Seni"),
        ];
        // Boundaries: 07:00 07:30 08:00 09:00 10:00 11:00.
        let rows = compact_week(&slots);
        assert_eq!(rows.len(), 5);
    }

    #[test]
    fn gaps_produce_rows_with_empty_cells() {
        let slots = vec![
            lesson(WeekDay::Monday, "07:00", "08:00", "Matematika"),
            lesson(WeekDay::Tuesday, "09:00", "10:00", "IPA"),
        ];
        let rows = compact_week(&slots);
        // 07:00 08:00 09:00 10:00 -> three rows; the middle one is the gap.
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[1].label, "08:00-09:00");
        assert!(rows[1].cells.is_empty());
        assert!(rows[0].cells.contains_key(&WeekDay::Monday));
        assert!(!rows[0].cells.contains_key(&WeekDay::Tuesday));
        assert!(rows[2].cells.contains_key(&WeekDay::Tuesday));
    }

    #[test]
    fn row_span_totals_cover_every_owned_row() {
        let slots = vec![
            lesson(WeekDay::Monday, "07:00", "07:45", "Matematika"),
            pause(WeekDay::Monday, "07:45", "08:30", "Istirahat"),
            lesson(WeekDay::Tuesday, "07:00", "08:30", "IPA"),
            lesson(WeekDay::Wednesday, "07:20", "08:10", "IPS"),
        ];
        let rows = compact_week(&slots);

        for day in WeekDay::ALL {
            let owned_span: usize = rows
                .iter()
                .filter_map(|r| r.cells.get(&day))
                .filter(|c| !c.is_continuation)
                .map(|c| c.row_span)
                .sum();
            let covered_rows = rows
                .iter()
                .filter(|r| {
                    slots.iter().any(|s| {
                        s.day == day && r.start_time >= s.start_time && r.end_time <= s.end_time
                    })
                })
                .count();
            assert_eq!(owned_span, covered_rows, "day {}", day.as_str());
        }
    }

    #[test]
    fn compaction_is_idempotent() {
        let slots = vec![
            lesson(WeekDay::Monday, "07:00", "07:45", "Matematika"),
            pause(WeekDay::Monday, "07:45", "08:30", "Istirahat"),
            lesson(WeekDay::Tuesday, "07:00", "08:30", "IPA"),
        ];
        assert_eq!(compact_week(&slots), compact_week(&slots));
    }

    #[test]
    fn overlap_keeps_first_slot_in_iteration_order() {
        // Not valid upstream data; the grid must still come out well-formed
        // with the first matching slot owning contested rows.
        let slots = vec![
            lesson(WeekDay::Monday, "07:00", "08:00", "Matematika"),
            lesson(WeekDay::Monday, "07:30", "08:30", "IPA"),
        ];
        let rows = compact_week(&slots);
        assert_eq!(rows.len(), 3);
        let owner = rows[1].cells.get(&WeekDay::Monday).expect("contested row");
        assert_eq!(
            owner.slot.kind,
            SlotKind::Lesson {
                subject: "Matematika".to_string(),
                code: None
            }
        );
        assert!(owner.is_continuation);
    }

    #[test]
    fn validate_rejects_inverted_and_empty_intervals() {
        let inverted = vec![lesson(WeekDay::Monday, "08:00", "07:00", "Matematika")];
        assert!(validate_day_slots(&inverted).is_err());
        let empty_interval = vec![lesson(WeekDay::Monday, "08:00", "08:00", "Matematika")];
        assert!(validate_day_slots(&empty_interval).is_err());
    }

    #[test]
    fn validate_rejects_duplicate_starts_and_overlap() {
        let duplicate = vec![
            lesson(WeekDay::Monday, "07:00", "07:45", "Matematika"),
            lesson(WeekDay::Monday, "07:00", "08:00", "IPA"),
        ];
        assert!(validate_day_slots(&duplicate).is_err());

        let overlapping = vec![
            lesson(WeekDay::Monday, "07:00", "08:00", "Matematika"),
            lesson(WeekDay::Monday, "07:30", "08:30", "IPA"),
        ];
        assert!(validate_day_slots(&overlapping).is_err());

        let adjacent = vec![
            lesson(WeekDay::Monday, "07:00", "08:00", "Matematika"),
            lesson(WeekDay::Monday, "08:00", "09:00", "IPA"),
        ];
        assert!(validate_day_slots(&adjacent).is_ok());
    }
}
