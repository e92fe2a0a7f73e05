//! HAR (`.har`) ingestion: turns a recorded page load into the `Transfer`
//! dependency forest `sim_core::TransferManager` expects.
//!
//! Grounded line-for-line on `harParser.py`'s `HarParser`: the content-length
//! vs. body-size fallback for transfer size, origin/ssl extraction from the
//! request URL, and the finish-time-ordered walk that reconstructs parent/
//! child dependencies from a flat list of HAR entries.

use std::io::Read;

use anyhow::{bail, Context, Result};
use log::warn;
use serde::Deserialize;
use sim_core::transfer_manager::TransferManager;
use sim_core::transfer::ObjectTimings;

#[derive(Debug, Deserialize)]
struct Har {
    log: HarLog,
}

#[derive(Debug, Deserialize)]
struct HarLog {
    entries: Vec<HarEntry>,
}

#[derive(Debug, Deserialize)]
struct HarEntry {
    #[serde(rename = "startedDateTime")]
    started_date_time: String,
    time: f64,
    request: HarRequest,
    response: HarResponse,
    timings: HarTimings,
}

#[derive(Debug, Deserialize)]
struct HarRequest {
    url: String,
}

#[derive(Debug, Deserialize)]
struct HarResponse {
    #[serde(rename = "headersSize")]
    headers_size: i64,
    #[serde(rename = "bodySize")]
    body_size: i64,
    headers: Vec<HarHeader>,
}

#[derive(Debug, Deserialize)]
struct HarHeader {
    name: String,
    value: String,
}

#[derive(Debug, Deserialize)]
struct HarTimings {
    connect: f64,
    receive: f64,
    wait: f64,
    blocked: f64,
    dns: f64,
    send: f64,
}

/// A fully parsed HAR entry, before dependency reconstruction.
struct ParsedEntry {
    size: u64,
    origin: String,
    ssl: bool,
    har_start_time: f64,
    har_finish_time: f64,
    object_timings: ObjectTimings,
}

/// Days since the Unix epoch for a proleptic Gregorian calendar date, via
/// Howard Hinnant's `days_from_civil`. HAR timestamps only ever need to be
/// diffed against each other (never formatted or compared to wall time), so
/// this plus a seconds-of-day component is enough and keeps the crate off a
/// dedicated date/time dependency the way the reference only ever subtracts
/// two parsed datetimes too.
fn days_from_civil(y: i64, m: i64, d: i64) -> i64 {
    let y = if m <= 2 { y - 1 } else { y };
    let era = if y >= 0 { y } else { y - 399 } / 400;
    let yoe = (y - era * 400) as i64;
    let mp = (m + 9) % 12;
    let doy = (153 * mp + 2) / 5 + d - 1;
    let doe = yoe * 365 + yoe / 4 - yoe / 100 + doy;
    era * 146097 + doe - 719468
}

/// Parses a HAR `startedDateTime` like `2017-05-01T12:00:00.123+02:00` into
/// seconds since the Unix epoch, dropping the trailing UTC-offset suffix the
/// same way `harParser.py` does (`startTimeStr[:-6]`) rather than applying
/// it — both implementations treat every timestamp in a page-load trace as
/// already being in one consistent zone, since only relative deltas matter.
fn parse_har_time(raw: &str) -> Result<f64> {
    if raw.len() < 6 {
        bail!("HAR timestamp too short: {raw}");
    }
    let naive = &raw[..raw.len() - 6];
    let (date, time) = naive.split_once('T').with_context(|| format!("malformed HAR timestamp: {raw}"))?;
    let mut date_parts = date.splitn(3, '-');
    let y: i64 = date_parts.next().context("missing year")?.parse()?;
    let mo: i64 = date_parts.next().context("missing month")?.parse()?;
    let d: i64 = date_parts.next().context("missing day")?.parse()?;

    let mut time_parts = time.splitn(3, ':');
    let h: i64 = time_parts.next().context("missing hour")?.parse()?;
    let mi: i64 = time_parts.next().context("missing minute")?.parse()?;
    let s: f64 = time_parts.next().context("missing seconds")?.parse()?;

    let days = days_from_civil(y, mo, d);
    Ok(days as f64 * 86400.0 + (h * 3600 + mi * 60) as f64 + s)
}

fn retrieve_content_length(response: &HarResponse) -> i64 {
    response
        .headers
        .iter()
        .find(|h| h.name == "Content-Length")
        .and_then(|h| h.value.parse::<i64>().ok())
        .unwrap_or(0)
}

fn retrieve_body_size(response: &HarResponse) -> i64 {
    response.body_size.max(0)
}

fn parse_entry(har_start: f64, entry: &HarEntry, verification: bool) -> Result<Option<ParsedEntry>> {
    let start_time = parse_har_time(&entry.started_date_time)? - har_start;
    if start_time < 0.0 {
        bail!("HAR entry started before the trace's first entry");
    }
    let finish_time = start_time + entry.time / 1000.0;

    let mut url_parts = entry.request.url.splitn(4, '/');
    url_parts.next(); // scheme:
    url_parts.next(); // empty (the // after scheme:)
    let origin = url_parts
        .next()
        .with_context(|| format!("malformed request URL: {}", entry.request.url))?
        .to_string();
    let ssl = entry.request.url.starts_with("https");

    let header_size = entry.response.headers_size.max(0);
    let body_size = retrieve_body_size(&entry.response);
    let content_length = retrieve_content_length(&entry.response);

    let size = if verification {
        if body_size > 0 {
            body_size
        } else {
            content_length
        }
    } else if content_length > 0 {
        content_length
    } else {
        body_size
    } + header_size;

    if size < 1 {
        warn!(
            "dropping broken transfer: start={start_time:.3} time={:.0} size={size} ssl={ssl} origin={origin}",
            entry.time
        );
        return Ok(None);
    }

    Ok(Some(ParsedEntry {
        size: size as u64,
        origin,
        ssl,
        har_start_time: start_time,
        har_finish_time: finish_time,
        object_timings: ObjectTimings {
            connect: Some(entry.timings.connect / 1000.0),
            receive: Some(entry.timings.receive / 1000.0),
            wait: Some(entry.timings.wait / 1000.0),
            blocked: Some(entry.timings.blocked / 1000.0),
            dns: Some(entry.timings.dns / 1000.0),
            send: Some(entry.timings.send / 1000.0),
        },
    }))
}

/// Reads a HAR file and loads every valid entry into `tm` as a `Transfer`
/// with parent/child links reconstructed per §4.8, returning the page's
/// origin (the root transfer's host).
pub fn load(reader: impl Read, tm: &mut TransferManager, verification: bool) -> Result<String> {
    let har: Har = serde_json::from_reader(reader).context("parsing HAR JSON")?;
    if har.log.entries.is_empty() {
        bail!("HAR file has no entries");
    }

    let har_start = parse_har_time(&har.log.entries[0].started_date_time)?;

    let mut parsed: Vec<ParsedEntry> = Vec::new();
    for entry in &har.log.entries {
        if let Some(p) = parse_entry(har_start, entry, verification)? {
            parsed.push(p);
        }
    }
    if parsed.is_empty() {
        bail!("HAR file had no usable (non-broken) entries");
    }
    parsed.sort_by(|a, b| a.har_start_time.total_cmp(&b.har_start_time));

    let origin = parsed[0].origin.clone();
    let ids: Vec<_> = parsed
        .iter()
        .map(|p| {
            tm.add_transfer(
                p.size,
                p.origin.clone(),
                p.ssl,
                Some(p.har_start_time),
                Some(p.har_finish_time),
                Some(p.object_timings.clone()),
            )
        })
        .collect();

    // finish-time-ordered walk: each transfer becomes the child of the most
    // recently finished transfer whose finish time precedes its start time.
    let mut by_finish: Vec<usize> = (0..parsed.len()).collect();
    by_finish.sort_by(|&a, &b| parsed[a].har_finish_time.total_cmp(&parsed[b].har_finish_time));
    let mut finish_cursor = 0usize;
    let mut last_dependency: Option<usize> = None;

    for (i, p) in parsed.iter().enumerate().skip(1) {
        while finish_cursor < by_finish.len() && parsed[by_finish[finish_cursor]].har_finish_time < p.har_start_time {
            last_dependency = Some(by_finish[finish_cursor]);
            finish_cursor += 1;
        }

        match last_dependency {
            None => {
                // no transfer has finished yet: this one has no real parent
                // and is left parentless, so `TransferManager::enable_roots`
                // picks it up as a root alongside the page's first transfer.
                warn!("harfile has multiple first transfers - index file missing?");
            }
            Some(dep) => tm.add_child(ids[dep], ids[i]),
        }
    }

    Ok(origin)
}

#[cfg(test)]
mod tests {
    use super::*;
    use sim_core::transfer_manager::TransferManager;
    use std::io::Cursor;

    fn entry(started: &str, time_ms: f64, url: &str, content_length: i64) -> String {
        format!(
            r#"{{
                "startedDateTime": "{started}",
                "time": {time_ms},
                "request": {{"url": "{url}"}},
                "response": {{
                    "headersSize": 100,
                    "bodySize": 0,
                    "headers": [{{"name": "Content-Length", "value": "{content_length}"}}]
                }},
                "timings": {{"connect": 10, "receive": 5, "wait": 20, "blocked": 1, "dns": 2, "send": 1}}
            }}"#
        )
    }

    #[test]
    fn days_from_civil_matches_known_epoch_offsets() {
        assert_eq!(days_from_civil(1970, 1, 1), 0);
        assert_eq!(days_from_civil(2017, 5, 1), 17287);
    }

    #[test]
    fn parse_har_time_drops_offset_suffix() {
        let t = parse_har_time("1970-01-01T00:00:01.000+02:00").unwrap();
        assert!((t - 1.0).abs() < 1e-6);
    }

    #[test]
    fn loads_root_and_child_from_two_entries() {
        let har = format!(
            r#"{{"log": {{"entries": [{}, {}]}}}}"#,
            entry("2017-05-01T12:00:00.000+00:00", 100.0, "https://example.com/index.html", 1000),
            entry("2017-05-01T12:00:00.050+00:00", 50.0, "https://example.com/style.css", 200),
        );
        let mut tm = TransferManager::new();
        let origin = load(Cursor::new(har), &mut tm, false).unwrap();
        assert_eq!(origin, "example.com");
        assert_eq!(tm.all_transfer_ids().len(), 2);
    }

    #[test]
    fn drops_entries_with_no_usable_size() {
        let entry_json = r#"{
            "startedDateTime": "2017-05-01T12:00:00.000+00:00",
            "time": 10,
            "request": {"url": "https://example.com/empty"},
            "response": {
                "headersSize": 0,
                "bodySize": 0,
                "headers": [{"name": "Content-Length", "value": "0"}]
            },
            "timings": {"connect": 0, "receive": 0, "wait": 0, "blocked": 0, "dns": 0, "send": 0}
        }"#;
        let har = format!(r#"{{"log": {{"entries": [{entry_json}]}}}}"#);
        let mut tm = TransferManager::new();
        let result = load(Cursor::new(har), &mut tm, false);
        assert!(result.is_err(), "a HAR file with only a broken entry should have no usable entries");
    }

    #[test]
    fn verification_mode_prefers_body_size_over_content_length() {
        let entry_json = r#"{
            "startedDateTime": "2017-05-01T12:00:00.000+00:00",
            "time": 10,
            "request": {"url": "https://example.com/a"},
            "response": {
                "headersSize": 0,
                "bodySize": 500,
                "headers": [{"name": "Content-Length", "value": "1000"}]
            },
            "timings": {"connect": 0, "receive": 0, "wait": 0, "blocked": 0, "dns": 0, "send": 0}
        }"#;
        let har = format!(r#"{{"log": {{"entries": [{entry_json}]}}}}"#);
        let mut tm = TransferManager::new();
        load(Cursor::new(har), &mut tm, true).unwrap();
        assert_eq!(tm.transfer(tm.all_transfer_ids()[0]).size(), 500);
    }
}
