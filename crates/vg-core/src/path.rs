//! Name, metadata and path grammar (spec §4.1).
//!
//! `full_name = head ( "?" meta-list )?` is parsed by [`parse_full_name`];
//! the path expression (either a var's own head, or an explicit
//! `metadata["path"]` override, or a monitor's `root_path`) is parsed by
//! [`parse_path`].

use vg_error::{ErrorCode, VgError};

/// The head of a `full_name`: what the declaration names before its
/// metadata suffix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HeadTerm {
    Integer(i64),
    /// `@name` — a monitor or var rooted directly at an ambient binding.
    /// Declaration heads use this form for root vars instead of the
    /// ordinary name grammar (root_path strings are path expressions,
    /// not `head?meta` declarations — see DESIGN.md).
    Root(String),
    Name {
        qualifier: Option<String>,
        name: String,
        callable: bool,
    },
}

impl HeadTerm {
    /// The var's short `name` field, derived from the head.
    pub fn short_name(&self) -> String {
        match self {
            HeadTerm::Integer(i) => i.to_string(),
            HeadTerm::Root(name) => name.clone(),
            HeadTerm::Name { name, .. } => name.clone(),
        }
    }

    /// The single-component path implied by this head when no explicit
    /// `metadata["path"]` override is present.
    pub fn default_path(&self) -> Vec<PathComponent> {
        match self {
            HeadTerm::Integer(i) => vec![PathComponent::Index(*i as usize)],
            HeadTerm::Root(name) => vec![PathComponent::Root(name.clone())],
            HeadTerm::Name { qualifier: Some(module), name, .. } => {
                vec![PathComponent::Qualified { module: module.clone(), name: name.clone() }]
            }
            HeadTerm::Name { callable: true, name, .. } => vec![PathComponent::Callable(name.clone())],
            HeadTerm::Name { name, .. } => vec![PathComponent::Field(name.clone())],
        }
    }
}

/// One step of a compiled path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathComponent {
    /// `@name` — an ambient root lookup.
    Root(String),
    /// One level of `..` up-traversal.
    Up,
    Field(String),
    Index(usize),
    /// A `module.name` qualifier referencing an ambient binding.
    Qualified { module: String, name: String },
    /// A `name()` callable reference.
    Callable(String),
}

/// A parsed `full_name`: the head term plus its metadata map.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FullName {
    pub head: HeadTerm,
    pub metadata: Vec<(String, String)>,
}

impl FullName {
    pub fn get(&self, key: &str) -> Option<&str> {
        self.metadata.iter().find(|(k, _)| k == key).map(|(_, v)| v.as_str())
    }
}

/// Splits on the first unescaped `?`, parses the head, then the
/// comma-separated `key(=value)?` metadata list. Commas inside values are
/// `\,`-escaped.
pub fn parse_full_name(s: &str) -> Result<FullName, VgError> {
    let (head_str, meta_str) = split_unescaped(s, '?');
    let head = parse_head(&head_str)?;
    let metadata = match meta_str {
        Some(m) => parse_metadata(&m)?,
        None => Vec::new(),
    };
    Ok(FullName { head, metadata })
}

fn split_unescaped(s: &str, sep: char) -> (String, Option<String>) {
    let chars: Vec<char> = s.chars().collect();
    let mut i = 0;
    while i < chars.len() {
        if chars[i] == '\\' && i + 1 < chars.len() {
            i += 2;
            continue;
        }
        if chars[i] == sep {
            let head: String = chars[..i].iter().collect();
            let rest: String = chars[i + 1..].iter().collect();
            return (head, Some(rest));
        }
        i += 1;
    }
    (s.to_string(), None)
}

fn parse_head(s: &str) -> Result<HeadTerm, VgError> {
    let s = s.trim();
    if s.is_empty() {
        return Err(VgError::new(ErrorCode::PathGrammarInvalid, "empty head in full name"));
    }
    if let Some(name) = s.strip_prefix('@') {
        if name.is_empty() {
            return Err(VgError::new(ErrorCode::PathGrammarInvalid, "empty root name after @"));
        }
        return Ok(HeadTerm::Root(name.to_string()));
    }
    if let Ok(i) = s.parse::<i64>() {
        return Ok(HeadTerm::Integer(i));
    }
    let (body, callable) = match s.strip_suffix("()") {
        Some(body) => (body, true),
        None => (s, false),
    };
    if body.is_empty() {
        return Err(VgError::new(ErrorCode::PathGrammarInvalid, "empty identifier before ()"));
    }
    let (qualifier, name) = match body.split_once('.') {
        Some((module, rest)) if !module.is_empty() && !rest.is_empty() => {
            (Some(module.to_string()), rest.to_string())
        }
        _ => (None, body.to_string()),
    };
    Ok(HeadTerm::Name { qualifier, name, callable })
}

fn parse_metadata(s: &str) -> Result<Vec<(String, String)>, VgError> {
    let mut out = Vec::new();
    for raw_item in split_unescaped_list(s, ',') {
        let (key, value) = split_unescaped(&raw_item, '=');
        let key = key.trim().to_string();
        if key.is_empty() {
            return Err(VgError::new(ErrorCode::PathGrammarInvalid, "empty metadata key"));
        }
        let value = value.unwrap_or_default().replace("\\,", ",").replace("\\=", "=");
        out.push((key, value));
    }
    Ok(out)
}

fn split_unescaped_list(s: &str, sep: char) -> Vec<String> {
    if s.is_empty() {
        return Vec::new();
    }
    let chars: Vec<char> = s.chars().collect();
    let mut items = Vec::new();
    let mut cur = String::new();
    let mut i = 0;
    while i < chars.len() {
        if chars[i] == '\\' && i + 1 < chars.len() {
            cur.push(chars[i]);
            cur.push(chars[i + 1]);
            i += 2;
            continue;
        }
        if chars[i] == sep {
            items.push(std::mem::take(&mut cur));
            i += 1;
            continue;
        }
        cur.push(chars[i]);
        i += 1;
    }
    items.push(cur);
    items
}

/// Parses a path expression such as `a.b.c[1].f()`, `@person`, or
/// `Base.somefun`, into an ordered list of [`PathComponent`]s.
///
/// A leading `@name` is an ambient root lookup. Runs of `N` dots between
/// steps (`N >= 1`) emit `N - 1` [`PathComponent::Up`] steps; a single dot
/// is an ordinary separator. A segment beginning with an uppercase ASCII
/// letter, appearing as the very first step, followed by exactly one dot
/// and another segment, is parsed as a single
/// [`PathComponent::Qualified`] (module-qualified ambient binding) rather
/// than two field steps — see DESIGN.md for why this heuristic was chosen
/// over always splitting on `.`.
pub fn parse_path(s: &str) -> Result<Vec<PathComponent>, VgError> {
    let s = s.trim();
    if s.is_empty() {
        return Ok(Vec::new());
    }
    let chars: Vec<char> = s.chars().collect();
    let mut out = Vec::new();
    let mut i = 0;

    if chars[0] == '@' {
        let start = 1;
        let mut j = start;
        while j < chars.len() && is_ident_char(chars[j]) {
            j += 1;
        }
        if j == start {
            return Err(VgError::new(ErrorCode::PathGrammarInvalid, "empty root name after @"));
        }
        out.push(PathComponent::Root(chars[start..j].iter().collect()));
        i = j;
    }

    while i < chars.len() {
        if chars[i] == '.' {
            let run_start = i;
            while i < chars.len() && chars[i] == '.' {
                i += 1;
            }
            let run_len = i - run_start;
            let ups = run_len - 1;
            for _ in 0..ups {
                out.push(PathComponent::Up);
            }
            continue;
        }
        if chars[i] == '[' {
            let close = chars[i..]
                .iter()
                .position(|&c| c == ']')
                .map(|p| p + i)
                .ok_or_else(|| VgError::new(ErrorCode::PathGrammarInvalid, "unterminated [ in path"))?;
            let digits: String = chars[i + 1..close].iter().collect();
            let idx: usize = digits
                .parse()
                .map_err(|_| VgError::new(ErrorCode::PathGrammarInvalid, format!("bad index [{digits}]")))?;
            out.push(PathComponent::Index(idx));
            i = close + 1;
            continue;
        }
        let seg_start = i;
        while i < chars.len() && chars[i] != '.' && chars[i] != '[' {
            i += 1;
        }
        let mut seg: String = chars[seg_start..i].iter().collect();
        let callable = seg.ends_with("()");
        if callable {
            seg.truncate(seg.len() - 2);
        }
        if seg.is_empty() {
            return Err(VgError::new(ErrorCode::PathGrammarInvalid, "empty path segment"));
        }

        let is_first_step = out.is_empty() || out.iter().all(|c| matches!(c, PathComponent::Up));
        if is_first_step && !callable && starts_uppercase(&seg) && i < chars.len() && chars[i] == '.' {
            // Look ahead for exactly one dot then another plain segment.
            let after_dot = i + 1;
            let mut k = after_dot;
            while k < chars.len() && chars[k] != '.' && chars[k] != '[' {
                k += 1;
            }
            if k > after_dot && (k == chars.len() || chars[k] == '.' ) {
                let next_seg: String = chars[after_dot..k].iter().collect();
                if !next_seg.ends_with("()") {
                    out.push(PathComponent::Qualified { module: seg, name: next_seg });
                    i = k;
                    continue;
                }
            }
        }

        out.push(if callable {
            PathComponent::Callable(seg)
        } else {
            PathComponent::Field(seg)
        });
    }

    Ok(out)
}

fn is_ident_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

fn starts_uppercase(s: &str) -> bool {
    s.chars().next().map(|c| c.is_ascii_uppercase()).unwrap_or(false)
}
