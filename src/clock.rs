//! Push the host's UTC time into the device RTC so that file mtimes the
//! device stamps on upload are comparable with local ones.

use chrono::{DateTime, Datelike, Timelike, Utc};

use crate::session::{RemoteSession, Result};

/// Code that sets the RTC to `now` and prints the value read back.
///
/// The tuple layout is `(year, month, day, weekday, hour, minute, second,
/// subseconds)` with Monday as weekday 0.
pub fn rtc_datetime_code(now: DateTime<Utc>) -> String {
    let mut code = String::from("import machine\nimport utime\nrtc=machine.RTC()\n");
    code.push_str(&format!(
        "rtc.datetime(({}, {}, {}, {}, {}, {}, {}, 0))\n",
        now.year(),
        now.month(),
        now.day(),
        now.weekday().num_days_from_monday(),
        now.hour(),
        now.minute(),
        now.second()
    ));
    code.push_str("print(rtc.datetime())");
    code
}

/// Set the device clock; returns the device's confirmation line.
pub fn sync_clock<S: RemoteSession + ?Sized>(session: &mut S, now: DateTime<Utc>) -> Result<String> {
    let out = session.execute(&rtc_datetime_code(now))?;
    Ok(out.trim().to_string())
}
