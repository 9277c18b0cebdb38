//! Timezone.
//!
//! Every local-time view of `Date` goes through one [`LocalClock`] for the
//! profile zone, so offsets follow the zone's daylight saving rules at each
//! instant. Getters, setters, the multi-field constructor and parsing of
//! strings without a zone designator all agree. `toLocale*String` and
//! `Intl.DateTimeFormat` default to the profile zone unless the caller names
//! one.

use chrono::{DateTime, Datelike, LocalResult, NaiveDate, Offset, TimeZone, Timelike};
use chrono_tz::{OffsetComponents, Tz};
use js_sys::{Array, Function, Object, Reflect};
use wasm_bindgen::prelude::*;
use wasm_bindgen::JsCast;

use super::{arg, InstallContext, SurfaceInterceptor};
use crate::profile::TimezoneProfile;
use crate::stealth::{self, ApplyTrap, Binding};
use crate::surface::Surface;

const MS_PER_DAY: f64 = 86_400_000.0;

/// ECMAScript time value range.
const MAX_TIME: f64 = 8.64e15;

/// Local calendar fields exposed by `Date.prototype` getters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LocalField {
    FullYear,
    Month,
    Date,
    Day,
    Hours,
    Minutes,
}

impl LocalField {
    const GETTERS: [(&'static str, LocalField); 6] = [
        ("getFullYear", LocalField::FullYear),
        ("getMonth", LocalField::Month),
        ("getDate", LocalField::Date),
        ("getDay", LocalField::Day),
        ("getHours", LocalField::Hours),
        ("getMinutes", LocalField::Minutes),
    ];
}

/// Local `Date.prototype` setters. Each writes a run of wall fields starting
/// at `first` in `[year, month, date, hours, minutes, seconds, ms]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LocalSetter {
    FullYear,
    Month,
    Date,
    Hours,
    Minutes,
    Seconds,
    Milliseconds,
}

impl LocalSetter {
    const SETTERS: [(&'static str, LocalSetter); 7] = [
        ("setFullYear", LocalSetter::FullYear),
        ("setMonth", LocalSetter::Month),
        ("setDate", LocalSetter::Date),
        ("setHours", LocalSetter::Hours),
        ("setMinutes", LocalSetter::Minutes),
        ("setSeconds", LocalSetter::Seconds),
        ("setMilliseconds", LocalSetter::Milliseconds),
    ];

    fn slots(self) -> (usize, usize) {
        match self {
            LocalSetter::FullYear => (0, 3),
            LocalSetter::Month => (1, 2),
            LocalSetter::Date => (2, 1),
            LocalSetter::Hours => (3, 4),
            LocalSetter::Minutes => (4, 3),
            LocalSetter::Seconds => (5, 2),
            LocalSetter::Milliseconds => (6, 1),
        }
    }
}

/// Wall clock of the profile zone.
#[derive(Debug, Clone)]
pub struct LocalClock {
    zone: Tz,
    standard_display: String,
    daylight_display: String,
}

impl LocalClock {
    /// `None` if the zone name is not in the tz database.
    pub fn new(tz: &TimezoneProfile) -> Option<Self> {
        Some(Self {
            zone: tz.name.parse().ok()?,
            standard_display: tz.display_name.clone(),
            daylight_display: tz
                .daylight_display_name
                .clone()
                .unwrap_or_else(|| tz.display_name.clone()),
        })
    }

    fn local(&self, epoch_ms: f64) -> Option<DateTime<Tz>> {
        if !epoch_ms.is_finite() || epoch_ms.abs() > MAX_TIME {
            return None;
        }
        Some(DateTime::from_timestamp_millis(epoch_ms as i64)?.with_timezone(&self.zone))
    }

    /// Offset east of UTC in effect at `epoch_ms`, in seconds.
    fn offset_seconds(&self, epoch_ms: f64) -> Option<i32> {
        self.local(epoch_ms).map(|t| t.offset().fix().local_minus_utc())
    }

    /// `Date.prototype.getTimezoneOffset`: minutes *west* of UTC at the
    /// instant, `NaN` for an invalid date.
    pub fn timezone_offset(&self, epoch_ms: f64) -> f64 {
        match self.offset_seconds(epoch_ms) {
            Some(secs) => -(secs as f64) / 60.0,
            None => f64::NAN,
        }
    }

    /// Value of a local getter, `NaN` for an invalid date.
    pub fn field(&self, epoch_ms: f64, field: LocalField) -> f64 {
        let Some(t) = self.local(epoch_ms) else {
            return f64::NAN;
        };
        (match field {
            LocalField::FullYear => t.year(),
            LocalField::Month => t.month0() as i32,
            LocalField::Date => t.day() as i32,
            LocalField::Day => t.weekday().num_days_from_sunday() as i32,
            LocalField::Hours => t.hour() as i32,
            LocalField::Minutes => t.minute() as i32,
        }) as f64
    }

    /// Local wall time of `epoch_ms`, encoded as if it were UTC.
    pub fn to_wall(&self, epoch_ms: f64) -> f64 {
        match self.offset_seconds(epoch_ms) {
            Some(secs) => epoch_ms + secs as f64 * 1000.0,
            None => f64::NAN,
        }
    }

    /// Instant at which the zone's clocks show `wall_ms`. Repeated wall times
    /// resolve to the earlier instant; skipped ones use the offset from before
    /// the transition.
    pub fn from_wall(&self, wall_ms: f64) -> f64 {
        if !wall_ms.is_finite() || wall_ms.abs() > MAX_TIME + MS_PER_DAY {
            return f64::NAN;
        }
        let Some(naive) = DateTime::from_timestamp_millis(wall_ms as i64).map(|t| t.naive_utc()) else {
            return f64::NAN;
        };
        let offset_secs = match self.zone.offset_from_local_datetime(&naive) {
            LocalResult::Single(o) | LocalResult::Ambiguous(o, _) => o.fix().local_minus_utc(),
            LocalResult::None => match self.offset_seconds(wall_ms - MS_PER_DAY) {
                Some(secs) => secs,
                None => return f64::NAN,
            },
        };
        time_clip(wall_ms - offset_secs as f64 * 1000.0)
    }

    /// Apply a local setter to `epoch_ms`. Returns the new time value.
    pub fn set_local(&self, epoch_ms: f64, setter: LocalSetter, values: &[f64]) -> f64 {
        let wall = if epoch_ms.is_nan() {
            if setter != LocalSetter::FullYear {
                return f64::NAN;
            }
            0.0
        } else {
            self.to_wall(epoch_ms)
        };
        let Some(mut fields) = wall_fields(wall) else {
            return f64::NAN;
        };
        if values.is_empty() {
            return f64::NAN;
        }
        let (first, count) = setter.slots();
        for (slot, value) in fields[first..first + count].iter_mut().zip(values) {
            *slot = *value;
        }
        self.from_wall(make_date(&fields))
    }

    fn display(&self, t: &DateTime<Tz>) -> &str {
        if t.offset().dst_offset().num_minutes() != 0 {
            &self.daylight_display
        } else {
            &self.standard_display
        }
    }

    /// `Wed Oct 14 2026`
    pub fn date_string(&self, epoch_ms: f64) -> String {
        match self.local(epoch_ms) {
            Some(t) => t.format("%a %b %d %Y").to_string(),
            None => "Invalid Date".into(),
        }
    }

    /// `10:30:00 GMT-0400 (Eastern Daylight Time)`
    pub fn time_string(&self, epoch_ms: f64) -> String {
        match self.local(epoch_ms) {
            Some(t) => format!("{} ({})", t.format("%H:%M:%S GMT%z"), self.display(&t)),
            None => "Invalid Date".into(),
        }
    }

    /// `Date.prototype.toString`
    pub fn date_time_string(&self, epoch_ms: f64) -> String {
        match self.local(epoch_ms) {
            Some(_) => format!("{} {}", self.date_string(epoch_ms), self.time_string(epoch_ms)),
            None => "Invalid Date".into(),
        }
    }
}

fn time_clip(ms: f64) -> f64 {
    if ms.is_finite() && ms.abs() <= MAX_TIME {
        ms.trunc() + 0.0
    } else {
        f64::NAN
    }
}

/// `[year, month0, date, hours, minutes, seconds, ms]` of a wall time.
fn wall_fields(wall_ms: f64) -> Option<[f64; 7]> {
    let t = DateTime::from_timestamp_millis(wall_ms as i64)?;
    Some([
        t.year() as f64,
        t.month0() as f64,
        t.day() as f64,
        t.hour() as f64,
        t.minute() as f64,
        t.second() as f64,
        t.timestamp_subsec_millis() as f64,
    ])
}

/// ECMAScript `MakeDate(MakeDay(y, m, d), MakeTime(h, min, s, ms))`. Fields
/// may overflow their ranges, as with the native API.
pub fn make_date(fields: &[f64; 7]) -> f64 {
    if fields.iter().any(|f| !f.is_finite()) {
        return f64::NAN;
    }
    let [y, m, d, h, min, s, ms] = fields.map(f64::trunc);
    let year = y + (m / 12.0).floor();
    let month = m.rem_euclid(12.0);
    if year.abs() > 300_000.0 {
        return f64::NAN;
    }
    let Some(first) = NaiveDate::from_ymd_opt(year as i32, month as u32 + 1, 1) else {
        return f64::NAN;
    };
    let epoch = NaiveDate::from_ymd_opt(1970, 1, 1).unwrap_or_default();
    let day = first.signed_duration_since(epoch).num_days() as f64 + d - 1.0;
    day * MS_PER_DAY + h * 3_600_000.0 + min * 60_000.0 + s * 1000.0 + ms
}

/// Wall fields for `new Date(y, m, ...)`. Two-digit years map to 19xx.
pub fn constructor_fields(values: &[f64]) -> [f64; 7] {
    let mut fields = [f64::NAN, 0.0, 1.0, 0.0, 0.0, 0.0, 0.0];
    for (slot, value) in fields.iter_mut().zip(values) {
        *slot = *value;
    }
    let year = fields[0].trunc();
    if (0.0..=99.0).contains(&year) {
        fields[0] = 1900.0 + year;
    }
    fields
}

/// Whether the native parser reads `text` as local time: it carries no zone
/// designator and is not an ISO date-only form (those are UTC).
pub fn is_local_date_string(text: &str) -> bool {
    let text = text.trim();
    if is_iso_date_only(text) {
        return false;
    }
    let upper = text.to_ascii_uppercase();
    if upper.contains("GMT") || upper.contains("UTC") {
        return false;
    }
    let Some(time_at) = upper.find(':') else {
        return true;
    };
    let time = &upper[time_at..];
    if time.ends_with('Z') {
        return false;
    }
    !has_numeric_offset(time)
}

fn is_iso_date_only(text: &str) -> bool {
    let body = text.strip_prefix(|c| c == '+' || c == '-').unwrap_or(text);
    let mut parts = body.split('-');
    let year_ok = parts
        .next()
        .map(|y| (4..=6).contains(&y.len()) && y.bytes().all(|b| b.is_ascii_digit()))
        .unwrap_or(false);
    year_ok && parts.all(|p| p.len() == 2 && p.bytes().all(|b| b.is_ascii_digit()))
}

/// `+hh:mm`, `-hhmm` and friends.
fn has_numeric_offset(time: &str) -> bool {
    let bytes = time.as_bytes();
    bytes.iter().enumerate().any(|(i, b)| {
        if *b != b'+' && *b != b'-' {
            return false;
        }
        let rest: Vec<u8> = bytes[i + 1..].iter().copied().filter(|c| *c != b':').take(4).collect();
        rest.len() == 4 && rest.iter().all(u8::is_ascii_digit)
    })
}

/// Native `Date` entry points, captured before any override.
#[derive(Clone)]
struct NativeDate {
    ctor: Function,
    parse: Function,
    get_time: Function,
    set_time: Function,
    timezone_offset: Function,
}

impl NativeDate {
    fn capture() -> Result<Self, JsValue> {
        let ctor: Function = stealth::global("Date")?.dyn_into()?;
        let proto = Reflect::get(&ctor, &"prototype".into())?;
        let method = |holder: &JsValue, name: &str| -> Result<Function, JsValue> {
            Reflect::get(holder, &name.into())?.dyn_into()
        };
        Ok(Self {
            parse: method(&ctor, "parse")?,
            get_time: method(&proto, "getTime")?,
            set_time: method(&proto, "setTime")?,
            timezone_offset: method(&proto, "getTimezoneOffset")?,
            ctor,
        })
    }

    /// Time value of a `Date` receiver. Anything else throws natively.
    fn time_of(&self, this_arg: &JsValue) -> Result<f64, JsValue> {
        Ok(Reflect::apply(&self.get_time, this_arg, &Array::new())?
            .as_f64()
            .unwrap_or(f64::NAN))
    }

    /// `Date.parse`, with local-time strings read in the profile zone.
    fn parse(&self, clock: &LocalClock, text: &str) -> Result<f64, JsValue> {
        let host_ms = Reflect::apply(&self.parse, &self.ctor, &Array::of1(&text.into()))?
            .as_f64()
            .unwrap_or(f64::NAN);
        if host_ms.is_nan() || !is_local_date_string(text) {
            return Ok(host_ms);
        }
        let host_date = Reflect::construct(&self.ctor, &Array::of1(&host_ms.into()))?;
        let host_west = Reflect::apply(&self.timezone_offset, &host_date, &Array::new())?
            .as_f64()
            .unwrap_or(0.0);
        Ok(clock.from_wall(host_ms - host_west * 60_000.0))
    }
}

fn to_number(value: &JsValue) -> f64 {
    value
        .as_f64()
        .unwrap_or_else(|| js_sys::Number::new(value).value_of())
}

fn numbers(args: &JsValue) -> Vec<f64> {
    let args: &Array = args.unchecked_ref();
    args.iter().map(|v| to_number(&v)).collect()
}

pub struct TimezoneInterceptor;

impl SurfaceInterceptor for TimezoneInterceptor {
    fn surface(&self) -> Surface {
        Surface::Timezone
    }

    fn install(&self, cx: &InstallContext<'_>) -> Result<Vec<Binding>, JsValue> {
        let tz = &cx.profile.timezone;
        let clock = LocalClock::new(tz).ok_or_else(|| JsValue::from_str(&format!("unknown zone {}", tz.name)))?;
        let native = NativeDate::capture()?;
        let date_proto = stealth::prototype("Date")?;
        let owner = "Date.prototype";
        let mut bindings = Vec::new();

        let c = clock.clone();
        bindings.push(cx.stealth.override_method(
            Surface::Timezone,
            owner,
            &date_proto,
            "getTimezoneOffset",
            date_trap(move |ms| JsValue::from_f64(c.timezone_offset(ms)), &native),
        )?);

        for (name, field) in LocalField::GETTERS {
            let c = clock.clone();
            bindings.push(cx.stealth.override_method(
                Surface::Timezone,
                owner,
                &date_proto,
                name,
                date_trap(move |ms| JsValue::from_f64(c.field(ms, field)), &native),
            )?);
        }

        for (name, setter) in LocalSetter::SETTERS {
            let c = clock.clone();
            let n = native.clone();
            let trap: ApplyTrap = Closure::wrap(Box::new(
                move |_target: JsValue, this_arg: JsValue, args: JsValue| -> Result<JsValue, JsValue> {
                    let ms = n.time_of(&this_arg)?;
                    let updated = c.set_local(ms, setter, &numbers(&args));
                    Reflect::apply(&n.set_time, &this_arg, &Array::of1(&updated.into()))
                },
            )
                as Box<dyn FnMut(JsValue, JsValue, JsValue) -> Result<JsValue, JsValue>>);
            bindings.push(cx.stealth.override_method(Surface::Timezone, owner, &date_proto, name, trap)?);
        }

        let formatters: [(&str, fn(&LocalClock, f64) -> String); 3] = [
            ("toString", LocalClock::date_time_string),
            ("toDateString", LocalClock::date_string),
            ("toTimeString", LocalClock::time_string),
        ];
        for (name, render) in formatters {
            let c = clock.clone();
            bindings.push(cx.stealth.override_method(
                Surface::Timezone,
                owner,
                &date_proto,
                name,
                date_trap(move |ms| JsValue::from_str(&render(&c, ms)), &native),
            )?);
        }

        for name in ["toLocaleString", "toLocaleDateString", "toLocaleTimeString"] {
            let zone = tz.name.clone();
            let trap: ApplyTrap = Closure::wrap(Box::new(
                move |target: JsValue, this_arg: JsValue, args: JsValue| -> Result<JsValue, JsValue> {
                    let options = with_default_zone(&arg(&args, 1), &zone)?;
                    let forwarded = Array::of2(&arg(&args, 0), &options);
                    Reflect::apply::<fn() -> JsValue>(target.unchecked_ref(), &this_arg, &forwarded)
                },
            )
                as Box<dyn FnMut(JsValue, JsValue, JsValue) -> Result<JsValue, JsValue>>);
            bindings.push(cx.stealth.override_method(Surface::Timezone, owner, &date_proto, name, trap)?);
        }

        let c = clock.clone();
        let n = native.clone();
        let parse_trap: ApplyTrap = Closure::wrap(Box::new(
            move |target: JsValue, this_arg: JsValue, args: JsValue| -> Result<JsValue, JsValue> {
                match arg(&args, 0).as_string() {
                    Some(text) => Ok(n.parse(&c, &text)?.into()),
                    None => Reflect::apply::<fn() -> JsValue>(target.unchecked_ref(), &this_arg, args.unchecked_ref()),
                }
            },
        ) as Box<dyn FnMut(JsValue, JsValue, JsValue) -> Result<JsValue, JsValue>>);
        bindings.push(cx.stealth.override_method(
            Surface::Timezone,
            "Date",
            native.ctor.as_ref(),
            "parse",
            parse_trap,
        )?);

        bindings.push(install_date_constructor(cx, &clock, &native)?);

        if let Some(binding) = install_date_time_format(cx, &tz.name)? {
            bindings.push(binding);
        }

        Ok(bindings)
    }
}

/// Trap for a `Date.prototype` method computed from the instant. Non-Date
/// receivers throw from the native `getTime`.
fn date_trap(compute: impl Fn(f64) -> JsValue + 'static, native: &NativeDate) -> ApplyTrap {
    let native = native.clone();
    Closure::wrap(Box::new(
        move |_target: JsValue, this_arg: JsValue, _args: JsValue| -> Result<JsValue, JsValue> {
            let ms = native.time_of(&this_arg)?;
            Ok(compute(ms))
        },
    ) as Box<dyn FnMut(JsValue, JsValue, JsValue) -> Result<JsValue, JsValue>>)
}

/// `new Date(y, m, ...)` and `new Date(string)` read wall time in the profile
/// zone. `Date()` called as a function renders the current time.
fn install_date_constructor(cx: &InstallContext<'_>, clock: &LocalClock, native: &NativeDate) -> Result<Binding, JsValue> {
    let c = clock.clone();
    let n = native.clone();
    let construct: ApplyTrap = Closure::wrap(Box::new(
        move |target: JsValue, args: JsValue, new_target: JsValue| -> Result<JsValue, JsValue> {
            let list: &Array = args.unchecked_ref();
            let forwarded = match list.length() {
                0 => list.clone(),
                1 => match list.get(0).as_string() {
                    Some(text) => Array::of1(&n.parse(&c, &text)?.into()),
                    None => list.clone(),
                },
                _ => {
                    let wall = make_date(&constructor_fields(&numbers(&args)));
                    Array::of1(&c.from_wall(wall).into())
                }
            };
            Reflect::construct_with_new_target(target.unchecked_ref(), &forwarded, new_target.unchecked_ref())
        },
    ) as Box<dyn FnMut(JsValue, JsValue, JsValue) -> Result<JsValue, JsValue>>);

    let c = clock.clone();
    let call: ApplyTrap = Closure::wrap(Box::new(
        move |_target: JsValue, _this_arg: JsValue, _args: JsValue| -> Result<JsValue, JsValue> {
            Ok(JsValue::from_str(&c.date_time_string(js_sys::Date::now())))
        },
    ) as Box<dyn FnMut(JsValue, JsValue, JsValue) -> Result<JsValue, JsValue>>);

    cx.stealth
        .override_constructor(Surface::Timezone, "globalThis", &js_sys::global(), "Date", construct, call)
}

/// Copy of `options` with `timeZone` defaulted to `zone`.
fn with_default_zone(options: &JsValue, zone: &str) -> Result<JsValue, JsValue> {
    let key = JsValue::from_str("timeZone");
    if options.is_undefined() || options.is_null() {
        let fresh = Object::new();
        Reflect::set(&fresh, &key, &JsValue::from_str(zone))?;
        return Ok(fresh.into());
    }
    if !options.is_object() || !Reflect::get(options, &key)?.is_undefined() {
        return Ok(options.clone());
    }
    let copy = Object::assign(&Object::new(), options.unchecked_ref());
    Reflect::set(&copy, &key, &JsValue::from_str(zone))?;
    Ok(copy.into())
}

/// Formatters built without an explicit zone use the profile zone, so
/// `format`, `formatToParts` and `resolvedOptions` all agree with `Date`.
fn install_date_time_format(cx: &InstallContext<'_>, zone: &str) -> Result<Option<Binding>, JsValue> {
    let intl = stealth::global("Intl")?;
    if intl.is_undefined() || Reflect::get(&intl, &"DateTimeFormat".into())?.is_undefined() {
        return Ok(None);
    }

    let zone_new = zone.to_string();
    let construct: ApplyTrap = Closure::wrap(Box::new(
        move |target: JsValue, args: JsValue, new_target: JsValue| -> Result<JsValue, JsValue> {
            let options = with_default_zone(&arg(&args, 1), &zone_new)?;
            let forwarded = Array::of2(&arg(&args, 0), &options);
            Reflect::construct_with_new_target(target.unchecked_ref(), &forwarded, new_target.unchecked_ref())
        },
    ) as Box<dyn FnMut(JsValue, JsValue, JsValue) -> Result<JsValue, JsValue>>);

    let zone_call = zone.to_string();
    let call: ApplyTrap = Closure::wrap(Box::new(
        move |target: JsValue, this_arg: JsValue, args: JsValue| -> Result<JsValue, JsValue> {
            let options = with_default_zone(&arg(&args, 1), &zone_call)?;
            let forwarded = Array::of2(&arg(&args, 0), &options);
            Reflect::apply::<fn() -> JsValue>(target.unchecked_ref(), &this_arg, &forwarded)
        },
    ) as Box<dyn FnMut(JsValue, JsValue, JsValue) -> Result<JsValue, JsValue>>);

    cx.stealth
        .override_constructor(Surface::Timezone, "Intl", &intl, "DateTimeFormat", construct, call)
        .map(Some)
}
