//! Calendar record handler.
//!
//! An event record is an 8-byte prefix (start/end time, packed date, a flag
//! word) followed by optional sections in a fixed order: alarm, repeat rule,
//! exception dates, then a NUL-delimited text tail holding the description
//! and the note.  Each section appears only when its flag bit is set.
//!
//! Packing never trusts a stored flag word: presence bits are recomputed
//! from which optional fields are actually populated.  The low ten flag
//! bits and the undocumented byte 7 of the repeat section carry unknown
//! device state and are re-emitted verbatim.

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use serde::Serialize;
use std::io::Cursor;

use crate::category::CategoryBlock;
use crate::codec::{AppInfo, CodecError, DbCodec, Payload, RecordInfo};

const EVENT_PREFIX_LEN: usize = 8;
const ALARM_LEN: usize = 2;
const REPEAT_LEN: usize = 8;

const FLAG_WHEN_CHANGED: u16 = 0x8000;
const FLAG_ALARM: u16 = 0x4000;
const FLAG_REPEAT: u16 = 0x2000;
const FLAG_NOTE: u16 = 0x1000;
const FLAG_EXCEPTIONS: u16 = 0x0800;
const FLAG_DESCRIPTION: u16 = 0x0400;
const OTHER_FLAGS_MASK: u16 = 0x03FF;

/// End-date slot value meaning the repeat never ends.
const NO_END_DATE: u16 = 0xFFFF;

/// Week number encoding "the last week of the month".
const LAST_WEEK: u8 = 5;

// ── Value types ──────────────────────────────────────────────────────────────

/// Calendar date, stored packed: day in bits 0-4, month in bits 5-8,
/// year-1904 in bits 9-15.  Field ranges are not validated on parse.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct EventDate {
    pub year: u16,
    pub month: u8,
    pub day: u8,
}

impl EventDate {
    pub const fn new(year: u16, month: u8, day: u8) -> Self {
        EventDate { year, month, day }
    }

    pub fn from_packed(packed: u16) -> Self {
        EventDate {
            day: (packed & 0x001F) as u8,
            month: ((packed >> 5) & 0x000F) as u8,
            year: (packed >> 9) + 1904,
        }
    }

    pub fn to_packed(self) -> u16 {
        (self.year.saturating_sub(1904) << 9)
            | (u16::from(self.month) & 0x000F) << 5
            | (u16::from(self.day) & 0x001F)
    }
}

/// Wall-clock start and end of a timed event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct EventTime {
    pub start_hour: u8,
    pub start_minute: u8,
    pub end_hour: u8,
    pub end_minute: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum AlarmUnit {
    Minutes,
    Hours,
    Days,
}

impl AlarmUnit {
    fn from_byte(byte: u8) -> Result<Self, CodecError> {
        match byte {
            0 => Ok(AlarmUnit::Minutes),
            1 => Ok(AlarmUnit::Hours),
            2 => Ok(AlarmUnit::Days),
            other => Err(CodecError::Malformed {
                what: "alarm section",
                detail: format!("unknown advance unit {other}"),
            }),
        }
    }

    fn to_byte(self) -> u8 {
        match self {
            AlarmUnit::Minutes => 0,
            AlarmUnit::Hours => 1,
            AlarmUnit::Days => 2,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Alarm {
    /// How far before the event the alarm fires.
    pub advance: i8,
    pub unit: AlarmUnit,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum RepeatKind {
    /// Section present on disk but carrying no rule.
    None,
    Daily,
    Weekly {
        /// `days[i]` is set when the event occurs on weekday `i`, 0 = Sunday.
        days: [bool; 7],
        start_of_week: u8,
    },
    MonthlyByDay {
        /// Week of the month, 0-4; [`LAST_WEEK`] means the last week.
        week: u8,
        /// Weekday, 0 = Sunday.
        weekday: u8,
    },
    MonthlyByDate,
    Yearly,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Repeat {
    pub kind: RepeatKind,
    /// Interval count: every `frequency` days, weeks, months or years.
    pub frequency: u8,
    pub end: Option<EventDate>,
    /// Byte 7 of the section.  Meaning undocumented, preserved verbatim.
    pub unknown: u8,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Event {
    /// `None` for untimed events (all four time bytes 0xFF on disk).
    pub time: Option<EventTime>,
    pub date: EventDate,
    pub alarm: Option<Alarm>,
    pub repeat: Option<Repeat>,
    pub exceptions: Vec<EventDate>,
    pub description: Option<String>,
    pub note: Option<String>,
    pub when_changed: bool,
    /// Low ten bits of the flag word, preserved verbatim.
    pub other_flags: u16,
}

impl Event {
    /// Untimed single event on `date` with no extras.
    pub fn on(date: EventDate) -> Self {
        Event {
            time: None,
            date,
            alarm: None,
            repeat: None,
            exceptions: Vec::new(),
            description: None,
            note: None,
            when_changed: false,
            other_flags: 0,
        }
    }
}

// ── Handler ──────────────────────────────────────────────────────────────────

/// Handler for the built-in calendar application's record database.
pub struct DatebookCodec;

impl DbCodec for DatebookCodec {
    fn name(&self) -> &'static str {
        "datebook"
    }

    fn parse_app_info(&self, data: &[u8]) -> Result<AppInfo, CodecError> {
        Ok(AppInfo::Categories(CategoryBlock::parse(data)?))
    }

    fn parse_record(&self, _info: &RecordInfo, data: &[u8]) -> Result<Payload, CodecError> {
        parse_event(data).map(Payload::Event)
    }

    fn pack_record(&self, value: &Payload) -> Result<Vec<u8>, CodecError> {
        match value {
            Payload::Event(event) => pack_event(event),
            other => Err(CodecError::WrongValueKind {
                codec: self.name(),
                got: other.kind(),
            }),
        }
    }
}

fn section(data: &[u8], cursor: &Cursor<&[u8]>, need: usize, what: &'static str) -> Result<(), CodecError> {
    let have = data.len() - cursor.position() as usize;
    if have < need {
        return Err(CodecError::Truncated { what, need, have });
    }
    Ok(())
}

/// Split the next NUL-terminated field off `tail`.  A field without a
/// terminator runs to the end of the record.
fn split_field(tail: &[u8]) -> Option<(String, &[u8])> {
    if tail.is_empty() {
        return None;
    }
    match tail.iter().position(|&b| b == 0) {
        Some(i) => Some((
            String::from_utf8_lossy(&tail[..i]).into_owned(),
            &tail[i + 1..],
        )),
        None => Some((String::from_utf8_lossy(tail).into_owned(), &[])),
    }
}

fn parse_event(data: &[u8]) -> Result<Event, CodecError> {
    if data.len() < EVENT_PREFIX_LEN {
        return Err(CodecError::Truncated {
            what: "event record",
            need: EVENT_PREFIX_LEN,
            have: data.len(),
        });
    }
    let mut cursor = Cursor::new(data);
    let start_hour = cursor.read_u8()?;
    let start_minute = cursor.read_u8()?;
    let end_hour = cursor.read_u8()?;
    let end_minute = cursor.read_u8()?;
    let date = EventDate::from_packed(cursor.read_u16::<BigEndian>()?);
    let flags = cursor.read_u16::<BigEndian>()?;

    let time = if [start_hour, start_minute, end_hour, end_minute] == [0xFF; 4] {
        None
    } else {
        Some(EventTime {
            start_hour,
            start_minute,
            end_hour,
            end_minute,
        })
    };

    let alarm = if flags & FLAG_ALARM != 0 {
        section(data, &cursor, ALARM_LEN, "alarm section")?;
        let advance = cursor.read_i8()?;
        let unit = AlarmUnit::from_byte(cursor.read_u8()?)?;
        Some(Alarm { advance, unit })
    } else {
        None
    };

    let repeat = if flags & FLAG_REPEAT != 0 {
        section(data, &cursor, REPEAT_LEN, "repeat section")?;
        let type_byte = cursor.read_u8()?;
        cursor.read_u8()?; // pad
        let end_raw = cursor.read_u16::<BigEndian>()?;
        let frequency = cursor.read_u8()?;
        let repeat_on = cursor.read_u8()?;
        let start_of_week = cursor.read_u8()?;
        let unknown = cursor.read_u8()?;

        let kind = match type_byte {
            0 => RepeatKind::None,
            1 => RepeatKind::Daily,
            2 => {
                let mut days = [false; 7];
                for (i, day) in days.iter_mut().enumerate() {
                    *day = repeat_on & (1 << i) != 0;
                }
                RepeatKind::Weekly {
                    days,
                    start_of_week,
                }
            }
            3 => RepeatKind::MonthlyByDay {
                week: repeat_on / 7,
                weekday: repeat_on % 7,
            },
            4 => RepeatKind::MonthlyByDate,
            5 => RepeatKind::Yearly,
            other => {
                return Err(CodecError::Malformed {
                    what: "repeat section",
                    detail: format!("unknown repeat type {other}"),
                })
            }
        };
        let end = if end_raw == NO_END_DATE {
            None
        } else {
            Some(EventDate::from_packed(end_raw))
        };
        Some(Repeat {
            kind,
            frequency,
            end,
            unknown,
        })
    } else {
        None
    };

    let mut exceptions = Vec::new();
    if flags & FLAG_EXCEPTIONS != 0 {
        section(data, &cursor, 2, "exception list")?;
        let count = cursor.read_u16::<BigEndian>()? as usize;
        section(data, &cursor, count * 2, "exception list")?;
        for _ in 0..count {
            exceptions.push(EventDate::from_packed(cursor.read_u16::<BigEndian>()?));
        }
    }

    // Text tail: fields are consumed sequentially, so with the description
    // bit clear the note takes the first available field.
    let mut tail = &data[cursor.position() as usize..];
    let mut description = None;
    let mut note = None;
    if flags & FLAG_DESCRIPTION != 0 {
        let (field, rest) = split_field(tail).ok_or(CodecError::Truncated {
            what: "description field",
            need: 1,
            have: 0,
        })?;
        description = Some(field);
        tail = rest;
    }
    if flags & FLAG_NOTE != 0 {
        let (field, _rest) = split_field(tail).ok_or(CodecError::Truncated {
            what: "note field",
            need: 1,
            have: 0,
        })?;
        note = Some(field);
    }

    Ok(Event {
        time,
        date,
        alarm,
        repeat,
        exceptions,
        description,
        note,
        when_changed: flags & FLAG_WHEN_CHANGED != 0,
        other_flags: flags & OTHER_FLAGS_MASK,
    })
}

fn pack_event(event: &Event) -> Result<Vec<u8>, CodecError> {
    if event.exceptions.len() > u16::MAX as usize {
        return Err(CodecError::Malformed {
            what: "exception list",
            detail: format!("{} exception dates exceed the u16 count", event.exceptions.len()),
        });
    }

    let mut out = Vec::with_capacity(EVENT_PREFIX_LEN + REPEAT_LEN);
    match event.time {
        Some(t) => out.extend_from_slice(&[t.start_hour, t.start_minute, t.end_hour, t.end_minute]),
        None => out.extend_from_slice(&[0xFF; 4]),
    }
    out.write_u16::<BigEndian>(event.date.to_packed())?;

    let mut flags = event.other_flags & OTHER_FLAGS_MASK;
    if event.when_changed {
        flags |= FLAG_WHEN_CHANGED;
    }
    if event.alarm.is_some() {
        flags |= FLAG_ALARM;
    }
    if event.repeat.is_some() {
        flags |= FLAG_REPEAT;
    }
    if event.note.is_some() {
        flags |= FLAG_NOTE;
    }
    if !event.exceptions.is_empty() {
        flags |= FLAG_EXCEPTIONS;
    }
    if event.description.is_some() {
        flags |= FLAG_DESCRIPTION;
    }
    out.write_u16::<BigEndian>(flags)?;

    if let Some(alarm) = &event.alarm {
        out.write_i8(alarm.advance)?;
        out.write_u8(alarm.unit.to_byte())?;
    }

    if let Some(repeat) = &event.repeat {
        let (type_byte, repeat_on, start_of_week) = match &repeat.kind {
            RepeatKind::None => (0, 0, 0),
            RepeatKind::Daily => (1, 0, 0),
            RepeatKind::Weekly {
                days,
                start_of_week,
            } => {
                let mut bits = 0u8;
                for (i, &day) in days.iter().enumerate() {
                    if day {
                        bits |= 1 << i;
                    }
                }
                (2, bits, *start_of_week)
            }
            RepeatKind::MonthlyByDay { week, weekday } => {
                (3, (*week).min(LAST_WEEK) * 7 + *weekday % 7, 0)
            }
            RepeatKind::MonthlyByDate => (4, 0, 0),
            RepeatKind::Yearly => (5, 0, 0),
        };
        out.write_u8(type_byte)?;
        out.write_u8(0)?;
        out.write_u16::<BigEndian>(match repeat.end {
            Some(date) => date.to_packed(),
            None => NO_END_DATE,
        })?;
        out.write_u8(repeat.frequency)?;
        out.write_u8(repeat_on)?;
        out.write_u8(start_of_week)?;
        out.write_u8(repeat.unknown)?;
    }

    if !event.exceptions.is_empty() {
        out.write_u16::<BigEndian>(event.exceptions.len() as u16)?;
        for exception in &event.exceptions {
            out.write_u16::<BigEndian>(exception.to_packed())?;
        }
    }

    if let Some(description) = &event.description {
        out.extend_from_slice(description.as_bytes());
        out.push(0);
    }
    if let Some(note) = &event.note {
        out.extend_from_slice(note.as_bytes());
        out.push(0);
    }
    Ok(out)
}
