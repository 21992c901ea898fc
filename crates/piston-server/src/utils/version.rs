use std::cmp::Ordering;

/// Loader and game version ordering: numeric segments compare as numbers,
/// and a `-tag` suffix sorts before the bare version.
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct Version(String);

#[derive(Debug, PartialEq, Eq, PartialOrd, Ord)]
enum Part {
    Numeric(u64),
    Text(String),
}

impl Version {
    pub fn new(v: &str) -> Self {
        Version(v.trim().to_string())
    }

    fn parts(s: &str) -> Vec<Part> {
        let mut parts = Vec::new();
        let mut current = String::new();
        let mut numeric = false;

        let flush = |buf: &mut String, numeric: bool, parts: &mut Vec<Part>| {
            if buf.is_empty() {
                return;
            }
            if numeric {
                parts.push(Part::Numeric(buf.parse().unwrap_or(0)));
            } else {
                parts.push(Part::Text(std::mem::take(buf)));
            }
            buf.clear();
        };

        for c in s.chars() {
            if c == '.' || c == '-' || c == '+' || c == '_' {
                flush(&mut current, numeric, &mut parts);
                continue;
            }
            let is_digit = c.is_ascii_digit();
            if !current.is_empty() && is_digit != numeric {
                flush(&mut current, numeric, &mut parts);
            }
            numeric = is_digit;
            current.push(c);
        }
        flush(&mut current, numeric, &mut parts);
        parts
    }

    fn compare_parts(a: &str, b: &str) -> Ordering {
        let a = Self::parts(a);
        let b = Self::parts(b);
        for (ap, bp) in a.iter().zip(b.iter()) {
            match ap.cmp(bp) {
                Ordering::Equal => continue,
                ord => return ord,
            }
        }
        a.len().cmp(&b.len())
    }
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        let (a_base, a_tag) = match self.0.split_once('-') {
            Some((b, t)) => (b, Some(t)),
            None => (self.0.as_str(), None),
        };
        let (b_base, b_tag) = match other.0.split_once('-') {
            Some((b, t)) => (b, Some(t)),
            None => (other.0.as_str(), None),
        };

        match Self::compare_parts(a_base, b_base) {
            Ordering::Equal => {}
            ord => return ord,
        }

        match (a_tag, b_tag) {
            (None, None) => Ordering::Equal,
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (Some(at), Some(bt)) => Self::compare_parts(at, bt),
        }
    }
}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

pub fn compare_versions(a: &str, b: &str) -> Ordering {
    Version::new(a).cmp(&Version::new(b))
}

/// `(minor, patch)` of a release id such as `1.20.4`; `None` for snapshots
/// (`24w14a`), pre-releases and anything not starting with `1.`.
pub fn release_parts(game_version: &str) -> Option<(u32, u32)> {
    let rest = game_version.strip_prefix("1.")?;
    let mut it = rest.split('.');
    let minor = it.next()?.parse().ok()?;
    let patch = match it.next() {
        Some(p) => p.parse().ok()?,
        None => 0,
    };
    if it.next().is_some() {
        return None;
    }
    Some((minor, patch))
}
