use serde_json::{Map, Value};

use crate::error::ConfigError;

/// The type constraint attached to a placeholder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamKind {
    /// `{name}`: any non-empty segment, captured as a string.
    Any,
    /// `{name:int}`: optionally signed decimal integer within `i64`, captured
    /// as a number.
    Int,
    /// `{name:alnum}`: ASCII letters and digits.
    Alnum,
    /// `{name:hex}`: hexadecimal digits.
    Hex,
    /// `{*name}`: the remainder of the path, slashes included.
    CatchAll,
}

impl ParamKind {
    fn parse(kind: &str) -> Option<Self> {
        match kind {
            "" => Some(Self::Any),
            "int" => Some(Self::Int),
            "alnum" => Some(Self::Alnum),
            "hex" => Some(Self::Hex),
            _ => None,
        }
    }

    fn accepts(self, value: &str) -> bool {
        if value.is_empty() {
            return false;
        }
        match self {
            Self::Any => !value.contains('/'),
            Self::CatchAll => true,
            Self::Int => value.parse::<i64>().is_ok(),
            Self::Alnum => value.bytes().all(|b| b.is_ascii_alphanumeric()),
            Self::Hex => value.bytes().all(|b| b.is_ascii_hexdigit()),
        }
    }

    /// Decodes a raw path value and checks it against this kind. Values that
    /// are not valid UTF-8 once decoded never match.
    fn capture(self, raw: &str) -> Option<Value> {
        let value = urlencoding::decode(raw).ok()?;
        if !self.accepts(&value) {
            return None;
        }
        match self {
            Self::Int => value.parse::<i64>().ok().map(Value::from),
            _ => Some(Value::String(value.into_owned())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Static(String),
    Param { name: String, kind: ParamKind },
}

/// Pattern
///
/// A parsed route pattern. Placeholders occupy whole path segments and are
/// translated to positional `matchit` parameters (`{p0}`, `{p1}`, ...) so that
/// routes differing only in placeholder names or types share one matcher
/// entry and are disambiguated by their type constraints.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pattern {
    raw: String,
    segments: Vec<Segment>,
    trailing_slash: bool,
}

impl Pattern {
    pub fn parse(raw: &str) -> Result<Self, ConfigError> {
        let invalid = |reason: &str| ConfigError::InvalidPattern {
            pattern: raw.to_string(),
            reason: reason.to_string(),
        };

        let rest = raw
            .strip_prefix('/')
            .ok_or_else(|| invalid("must start with '/'"))?;

        let mut segments = Vec::new();
        let mut trailing_slash = rest.is_empty();
        let parts: Vec<&str> = if rest.is_empty() {
            Vec::new()
        } else {
            rest.split('/').collect()
        };

        for (index, part) in parts.iter().enumerate() {
            let last = index + 1 == parts.len();
            if part.is_empty() {
                if last {
                    trailing_slash = true;
                    continue;
                }
                return Err(invalid("empty path segment"));
            }

            if let Some(inner) = part.strip_prefix('{').and_then(|p| p.strip_suffix('}')) {
                let (name, kind) = match inner.strip_prefix('*') {
                    Some(name) => (name, ParamKind::CatchAll),
                    None => {
                        let (name, kind) = inner.split_once(':').unwrap_or((inner, ""));
                        let kind = ParamKind::parse(kind)
                            .ok_or_else(|| invalid(&format!("unknown placeholder type '{kind}'")))?;
                        (name, kind)
                    }
                };
                if name.is_empty() || !name.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'_') {
                    return Err(invalid(&format!("invalid placeholder name '{name}'")));
                }
                if kind == ParamKind::CatchAll && !last {
                    return Err(invalid("catch-all placeholder must be the last segment"));
                }
                let duplicate = segments
                    .iter()
                    .any(|s| matches!(s, Segment::Param { name: n, .. } if n == name));
                if duplicate {
                    return Err(invalid(&format!("placeholder '{name}' appears twice")));
                }
                segments.push(Segment::Param {
                    name: name.to_string(),
                    kind,
                });
            } else if part.contains(['{', '}']) {
                return Err(invalid("placeholders must span a whole segment"));
            } else {
                segments.push(Segment::Static((*part).to_string()));
            }
        }

        Ok(Self {
            raw: raw.to_string(),
            segments,
            trailing_slash,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// The pattern in `matchit` syntax, with positional parameter names.
    pub fn matcher_path(&self) -> String {
        let mut path = String::new();
        let mut position = 0;
        for segment in &self.segments {
            path.push('/');
            match segment {
                Segment::Static(text) => path.push_str(text),
                Segment::Param { kind, .. } => {
                    let star = if *kind == ParamKind::CatchAll { "*" } else { "" };
                    path.push_str(&format!("{{{star}p{position}}}"));
                    position += 1;
                }
            }
        }
        if self.trailing_slash {
            path.push('/');
        }
        path
    }

    /// Maps the positional values captured by the matcher back to this
    /// pattern's named, typed parameters, percent-decoded. `None` when a value
    /// violates its placeholder's type constraint.
    pub fn capture(&self, matched: &matchit::Params<'_, '_>) -> Option<Map<String, Value>> {
        let mut params = Map::new();
        let placeholders = self.segments.iter().filter_map(|segment| match segment {
            Segment::Param { name, kind } => Some((name, *kind)),
            Segment::Static(_) => None,
        });
        for (position, (name, kind)) in placeholders.enumerate() {
            let raw = matched.get(format!("p{position}"))?;
            params.insert(name.clone(), kind.capture(raw)?);
        }
        Some(params)
    }

    /// Substitutes `params` into the pattern, returning the path segments to
    /// append to a base URL and whether the path ends with a slash.
    pub fn generate(&self, params: &Map<String, Value>) -> Result<(Vec<String>, bool), String> {
        let mut out = Vec::with_capacity(self.segments.len());
        for segment in &self.segments {
            match segment {
                Segment::Static(text) => out.push(text.clone()),
                Segment::Param { name, kind } => {
                    let value = match params.get(name) {
                        Some(Value::String(s)) => s.clone(),
                        Some(Value::Number(n)) => n.to_string(),
                        Some(Value::Bool(b)) => b.to_string(),
                        Some(other) => {
                            return Err(format!("parameter '{name}' cannot be used in a path: {other}"));
                        }
                        None => return Err(format!("missing parameter '{name}'")),
                    };
                    if !kind.accepts(&value) {
                        return Err(format!("parameter '{name}' does not satisfy its type"));
                    }
                    if *kind == ParamKind::CatchAll {
                        out.extend(value.split('/').map(str::to_string));
                    } else {
                        out.push(value);
                    }
                }
            }
        }
        Ok((out, self.trailing_slash))
    }
}
