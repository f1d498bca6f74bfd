//! Strftime-style time descriptors in file path names.
//!
//! A dataset path such as `/data/acme/%Y/xxx_%Y%m%d.nc` names a whole set of
//! files. The descriptors are converted to fixed-width glob character classes
//! for directory listing, and a matched path is parsed back against the
//! original descriptor string to recover the file's UTC time.

use chrono::format::{parse as strftime_parse, Parsed, StrftimeItems};
use chrono::{DateTime, NaiveDate, TimeZone, Utc};

use crate::errors::NcSeriesErr;

/// The recognized time descriptors and their glob character classes.
///
/// No other descriptor types are supported in dataset paths.
const DESCRIPTORS: [(&str, &str, usize); 7] = [
    ("%Y", "[12][0-9][0-9][0-9]", 4),
    ("%y", "[0-9][0-9]", 2),
    ("%m", "[01][0-9]", 2),
    ("%d", "[0-3][0-9]", 2),
    ("%H", "[0-2][0-9]", 2),
    ("%M", "[0-5][0-9]", 2),
    ("%S", "[0-5][0-9]", 2),
];

/// Convert strftime time descriptors to a glob-compatible expression.
///
/// For example, convert `%Y` to `[12][0-9][0-9][0-9]`. The glob expression
/// can then be used to match path names containing a four digit year.
pub fn globify_time_descriptors(path: &str) -> String {
    let mut out = path.to_string();
    for (desc, class, _) in DESCRIPTORS.iter() {
        out = out.replace(desc, class);
    }
    out
}

/// Match a file or directory name against a globified path segment.
///
/// Only the glob subset produced by [`globify_time_descriptors`] is
/// supported: literal characters plus `[...]` character classes (single
/// characters and `a-z` style ranges), each matching exactly one character.
pub(crate) fn glob_match(name: &str, glob: &str) -> bool {
    let mut nchars = name.chars();
    let mut gchars = glob.chars();

    while let Some(gc) = gchars.next() {
        let nc = match nchars.next() {
            Some(c) => c,
            None => return false,
        };

        if gc != '[' {
            if gc != nc {
                return false;
            }
            continue;
        }

        // collect the class up to the closing bracket
        let mut class: Vec<char> = vec![];
        let mut closed = false;
        for c in gchars.by_ref() {
            if c == ']' {
                closed = true;
                break;
            }
            class.push(c);
        }
        if !closed || !class_contains(&class, nc) {
            return false;
        }
    }

    nchars.next().is_none()
}

fn class_contains(class: &[char], c: char) -> bool {
    let mut i = 0;
    while i < class.len() {
        if i + 2 < class.len() && class[i + 1] == '-' {
            if class[i] <= c && c <= class[i + 2] {
                return true;
            }
            i += 3;
        } else {
            if class[i] == c {
                return true;
            }
            i += 1;
        }
    }
    false
}

/// Parse the UTC time encoded in `path` by the descriptors in `pattern`.
///
/// Fields absent from the pattern default to Jan 1 and midnight; a pattern
/// without any year descriptor defaults to 1970. A descriptor appearing more
/// than once in the pattern with inconsistent values breaks direct parsing;
/// in that case the common prefix of path and pattern is stripped, all but
/// the last occurrence of each repeated descriptor is removed (deleting the
/// corresponding fixed-width span from the path), and the parse is retried.
/// A path that still cannot be parsed is an error; callers discard such
/// candidates.
pub fn parse_path_time(path: &str, pattern: &str) -> Result<DateTime<Utc>, NcSeriesErr> {
    if let Some(time) = try_strptime(path, pattern) {
        return Ok(time);
    }

    // The direct parse chokes when a descriptor occurs twice with different
    // values, e.g. two %Y in 'dir/data_%Y/file_%Y%m%d.dat' where the
    // directory year lags the file year. Reduce to the last occurrence.
    let prefix = common_prefix_len(path, pattern);
    let mut rpath = path[prefix..].to_string();
    let mut rpattern = pattern[prefix..].to_string();

    for (desc, _, width) in DESCRIPTORS.iter() {
        while rpattern.matches(desc).count() > 1 {
            match descriptor_span(&rpath, &rpattern, desc) {
                Some((pat_idx, path_idx)) => {
                    rpattern.replace_range(pat_idx..pat_idx + desc.len(), "");
                    rpath.replace_range(path_idx..path_idx + width, "");
                }
                None => break,
            }
        }
    }

    try_strptime(&rpath, &rpattern).ok_or_else(|| {
        NcSeriesErr::PathParse(format!("'{}' does not match '{}'", path, pattern))
    })
}

/// Byte length of the common prefix, stopping before any '%' so a
/// descriptor is never split.
fn common_prefix_len(a: &str, b: &str) -> usize {
    a.bytes()
        .zip(b.bytes())
        .take_while(|(x, y)| x == y && *x != b'%')
        .count()
}

/// Locate the first occurrence of `desc` in `pattern` along with the byte
/// index of the fixed-width span it matches in `path`. Walks the two strings
/// in step, literal byte by literal byte.
fn descriptor_span(path: &str, pattern: &str, desc: &str) -> Option<(usize, usize)> {
    let pat = pattern.as_bytes();
    let mut pat_idx = 0;
    let mut path_idx = 0;

    while pat_idx < pat.len() {
        if pat[pat_idx] == b'%' && pat_idx + 1 < pat.len() {
            let token = &pattern[pat_idx..pat_idx + 2];
            let width = DESCRIPTORS
                .iter()
                .find(|(d, _, _)| *d == token)
                .map(|(_, _, w)| *w)?;
            if token == desc {
                return Some((pat_idx, path_idx));
            }
            pat_idx += 2;
            path_idx += width;
        } else {
            pat_idx += 1;
            path_idx += 1;
        }
        if path_idx > path.len() {
            return None;
        }
    }

    None
}

/// Parse with chrono's strftime items, filling unspecified fields with
/// defaults. Returns `None` if the string does not match the pattern or the
/// parsed fields are inconsistent.
fn try_strptime(s: &str, fmt: &str) -> Option<DateTime<Utc>> {
    let mut parsed = Parsed::new();
    strftime_parse(&mut parsed, s, StrftimeItems::new(fmt)).ok()?;

    let year = parsed.year.or_else(|| {
        parsed.year_mod_100.map(|y| {
            // same century mapping as strptime's %y
            if y >= 69 {
                1900 + y
            } else {
                2000 + y
            }
        })
    });
    let year = year.unwrap_or(1970);

    let month = parsed.month.unwrap_or(1);
    let day = parsed.day.unwrap_or(1);
    let hour = match (parsed.hour_div_12, parsed.hour_mod_12) {
        (Some(d), Some(m)) => d * 12 + m,
        _ => 0,
    };
    let minute = parsed.minute.unwrap_or(0);
    let second = parsed.second.unwrap_or(0);

    let naive = NaiveDate::from_ymd_opt(year, month, day)?.and_hms_opt(hour, minute, second)?;
    Some(Utc.from_utc_datetime(&naive))
}

#[cfg(test)]
mod unit {
    use super::*;

    fn utc(y: i32, mo: u32, d: u32, h: u32, mi: u32, s: u32) -> DateTime<Utc> {
        Utc.from_utc_datetime(
            &NaiveDate::from_ymd_opt(y, mo, d)
                .unwrap()
                .and_hms_opt(h, mi, s)
                .unwrap(),
        )
    }

    #[test]
    fn globify_replaces_all_descriptors() {
        assert_eq!(
            globify_time_descriptors("x_%Y%m%d.nc"),
            "x_[12][0-9][0-9][0-9][01][0-9][0-3][0-9].nc"
        );
        assert_eq!(globify_time_descriptors("plain.nc"), "plain.nc");
    }

    #[test]
    fn glob_match_classes_and_literals() {
        let glob = globify_time_descriptors("x_%Y%m%d.nc");
        assert!(glob_match("x_20140715.nc", &glob));
        assert!(!glob_match("x_20149715.nc", &glob)); // bad month
        assert!(!glob_match("y_20140715.nc", &glob)); // bad literal
        assert!(!glob_match("x_20140715.ncx", &glob)); // trailing junk
        assert!(!glob_match("x_2014071.nc", &glob)); // too short
    }

    #[test]
    fn round_trip_of_formatted_patterns() {
        let cases = [
            ("acme/%Y/xxx_%Y%m%d.nc", utc(2014, 7, 15, 0, 0, 0)),
            ("x_%Y%m%d_%H%M%S.nc", utc(2020, 1, 2, 12, 34, 56)),
            ("%Y/%m/%d/t%H.nc", utc(1999, 12, 31, 23, 0, 0)),
            ("noaa_%y%m%d.dat", utc(2005, 3, 9, 0, 0, 0)),
        ];

        for (pattern, time) in cases.iter() {
            let path = time.format(pattern).to_string();
            let parsed = parse_path_time(&path, pattern).unwrap();
            assert_eq!(parsed, *time, "pattern {}", pattern);
        }
    }

    #[test]
    fn duplicate_year_consistent_values() {
        let time = parse_path_time("dir/data_2013/file_20130715.dat", "dir/data_%Y/file_%Y%m%d.dat")
            .unwrap();
        assert_eq!(time, utc(2013, 7, 15, 0, 0, 0));
    }

    #[test]
    fn duplicate_year_inconsistent_values_binds_last() {
        // Year rolled over but the directory still says 2013: the file name wins.
        let time = parse_path_time("dir/data_2013/file_20140101.dat", "dir/data_%Y/file_%Y%m%d.dat")
            .unwrap();
        assert_eq!(time, utc(2014, 1, 1, 0, 0, 0));
    }

    #[test]
    fn unparseable_path_is_an_error() {
        let res = parse_path_time("dir/file_2014blah.dat", "dir/file_%Y%m%d.dat");
        assert!(matches!(res, Err(NcSeriesErr::PathParse(_))));
    }

    #[test]
    fn missing_fields_default() {
        let time = parse_path_time("y2014.nc", "y%Y.nc").unwrap();
        assert_eq!(time, utc(2014, 1, 1, 0, 0, 0));
    }
}
