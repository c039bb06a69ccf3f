use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt::{Display, Formatter, Write};
use std::str::FromStr;

use regex::Regex;
use thiserror::Error;

use super::errors::Error;

const PAGE_KEY: &str = "page";
const PAGE_SIZE_KEY: &str = "page_size";
const DEFAULT_PAGE_NUMBER: u64 = 1;

/// Characters that carry meaning in the text grammar and are escaped when printed.
const RESERVED: &[char] = &['\\', ',', '[', ']', '{', '}', '(', ')', '"'];

/// Leading characters selecting a keyword type other than exact match.
const SIGILS: &[char] = &['~', '[', '{', '('];

/// Spells an empty list item or range bound, which would otherwise print as nothing.
const EMPTY_ITEM: &str = "\"\"";

#[derive(Error, Debug, PartialEq, Eq)]
pub enum QueryParseError {
    #[error("invalid query token {token:?}: {reason}")]
    InvalidToken { token: String, reason: String },

    #[error("duplicated query key {0:?}")]
    DuplicatedKey(String),
}

impl From<QueryParseError> for Error {
    fn from(value: QueryParseError) -> Self {
        Error::BadRequest(value.to_string())
    }
}

/// A predicate on one keyword of a listing filter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Keyword {
    Exact(String),
    Fuzzy(String),
    Range {
        min: Option<String>,
        max: Option<String>,
    },
    OrList(Vec<String>),
    AndList(Vec<String>),
    /// Passed through verbatim; printed without escaping.
    Raw(String),
}

impl Keyword {
    pub fn exact(value: impl ToString) -> Self {
        Keyword::Exact(value.to_string())
    }

    pub fn fuzzy(value: impl Into<String>) -> Self {
        Keyword::Fuzzy(value.into())
    }

    pub fn or_list<I, S>(values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: ToString,
    {
        Keyword::OrList(values.into_iter().map(|v| v.to_string()).collect())
    }

    pub fn and_list<I, S>(values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: ToString,
    {
        Keyword::AndList(values.into_iter().map(|v| v.to_string()).collect())
    }

    /// Evaluates the predicate against every value of a (possibly multi-valued) field.
    pub fn matches(&self, field_values: &[String]) -> bool {
        match self {
            Keyword::Exact(v) | Keyword::Raw(v) => field_values.iter().any(|f| f == v),
            Keyword::Fuzzy(v) => field_values.iter().any(|f| f.contains(v.as_str())),
            Keyword::Range { min, max } => field_values.iter().any(|f| {
                min.as_deref()
                    .is_none_or(|m| compare_scalars(f, m) != Ordering::Less)
                    && max
                        .as_deref()
                        .is_none_or(|m| compare_scalars(f, m) != Ordering::Greater)
            }),
            Keyword::OrList(values) => field_values.iter().any(|f| values.contains(f)),
            Keyword::AndList(values) => values.iter().all(|v| field_values.contains(v)),
        }
    }
}

/// Numbers compare numerically, everything else lexicographically.
fn compare_scalars(a: &str, b: &str) -> Ordering {
    match (a.parse::<i64>(), b.parse::<i64>()) {
        (Ok(a), Ok(b)) => a.cmp(&b),
        _ => a.cmp(b),
    }
}

/// Uniform filter and page object accepted by every store listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Query {
    pub page_number: u64,
    /// Zero disables pagination.
    pub page_size: u64,
    pub keywords: BTreeMap<String, Keyword>,
}

impl Default for Query {
    fn default() -> Self {
        Self {
            page_number: DEFAULT_PAGE_NUMBER,
            page_size: 0,
            keywords: BTreeMap::new(),
        }
    }
}

impl Query {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_keyword(mut self, key: impl Into<String>, keyword: Keyword) -> Self {
        self.keywords.insert(key.into(), keyword);
        self
    }

    pub fn with_page(mut self, page_number: u64, page_size: u64) -> Self {
        self.page_number = page_number.max(DEFAULT_PAGE_NUMBER);
        self.page_size = page_size;
        self
    }

    pub fn keyword(&self, key: &str) -> Option<&Keyword> {
        self.keywords.get(key)
    }

    /// True when every keyword matches the values `lookup` yields for its key.
    /// Keys unknown to `lookup` never match.
    pub fn matches<F>(&self, lookup: F) -> bool
    where
        F: Fn(&str) -> Option<Vec<String>>,
    {
        self.keywords.iter().all(|(key, keyword)| match lookup(key) {
            Some(values) => keyword.matches(&values),
            None => false,
        })
    }

    pub fn paginate<T>(&self, items: Vec<T>) -> Vec<T> {
        if self.page_size == 0 {
            return items;
        }
        let skip = (self.page_number.max(1) - 1).saturating_mul(self.page_size) as usize;
        items
            .into_iter()
            .skip(skip)
            .take(self.page_size as usize)
            .collect()
    }

    pub fn parse(text: &str) -> Result<Self, QueryParseError> {
        let key_pattern = Regex::new(r"^[A-Za-z0-9_.]+$").map_err(|e| {
            QueryParseError::InvalidToken {
                token: text.to_string(),
                reason: e.to_string(),
            }
        })?;

        let mut query = Query::default();
        for token in split_top_level(text)? {
            if token.is_empty() {
                continue;
            }
            let Some((key, raw_value)) = token.split_once('=') else {
                return Err(invalid(&token, "expected key=value"));
            };
            let key = key.trim();
            if !key_pattern.is_match(key) {
                return Err(invalid(&token, "invalid key"));
            }

            match key {
                PAGE_KEY => query.page_number = parse_page_number(&token, raw_value)?,
                PAGE_SIZE_KEY => query.page_size = parse_page_number(&token, raw_value)?,
                _ => {
                    if query.keywords.contains_key(key) {
                        return Err(QueryParseError::DuplicatedKey(key.to_string()));
                    }
                    let keyword = parse_keyword(&token, raw_value)?;
                    query.keywords.insert(key.to_string(), keyword);
                }
            }
        }

        if query.page_number == 0 {
            return Err(invalid("page=0", "page numbers start at 1"));
        }

        Ok(query)
    }
}

impl FromStr for Query {
    type Err = QueryParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Query::parse(s)
    }
}

impl Display for Query {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let mut parts: Vec<String> = self
            .keywords
            .iter()
            .map(|(key, keyword)| format!("{key}={}", print_keyword(keyword)))
            .collect();

        if self.page_number != DEFAULT_PAGE_NUMBER {
            parts.push(format!("{PAGE_KEY}={}", self.page_number));
        }
        if self.page_size != 0 {
            parts.push(format!("{PAGE_SIZE_KEY}={}", self.page_size));
        }

        f.write_str(&parts.join(","))
    }
}

fn invalid(token: &str, reason: &str) -> QueryParseError {
    QueryParseError::InvalidToken {
        token: token.to_string(),
        reason: reason.to_string(),
    }
}

fn parse_page_number(token: &str, value: &str) -> Result<u64, QueryParseError> {
    value
        .trim()
        .parse::<u64>()
        .map_err(|e| invalid(token, &e.to_string()))
}

/// Splits on commas outside brackets, keeping escapes intact for the value parser.
fn split_top_level(text: &str) -> Result<Vec<String>, QueryParseError> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut depth = 0usize;
    let mut chars = text.chars();

    while let Some(c) = chars.next() {
        match c {
            '\\' => {
                current.push(c);
                match chars.next() {
                    Some(escaped) => current.push(escaped),
                    None => return Err(invalid(text, "dangling escape")),
                }
            }
            '[' | '{' | '(' => {
                depth += 1;
                current.push(c);
            }
            ']' | '}' | ')' => {
                depth = depth
                    .checked_sub(1)
                    .ok_or_else(|| invalid(&current, "unbalanced bracket"))?;
                current.push(c);
            }
            ',' if depth == 0 => tokens.push(std::mem::take(&mut current)),
            _ => current.push(c),
        }
    }

    if depth != 0 {
        return Err(invalid(&current, "unbalanced bracket"));
    }
    tokens.push(current);

    Ok(tokens)
}

fn parse_keyword(token: &str, value: &str) -> Result<Keyword, QueryParseError> {
    if let Some(rest) = value.strip_prefix('~') {
        return Ok(Keyword::Fuzzy(unescape(token, rest)?));
    }

    if let Some(inner) = enclosed(value, '[', ']') {
        let items = split_list(token, inner)?;
        let [min, max] = items.as_slice() else {
            return Err(invalid(token, "a range takes exactly two bounds"));
        };
        if min.is_none() && max.is_none() {
            return Err(invalid(token, "a range needs at least one bound"));
        }
        return Ok(Keyword::Range {
            min: min.clone(),
            max: max.clone(),
        });
    }

    if let Some(inner) = enclosed(value, '{', '}') {
        return Ok(Keyword::OrList(list_values(token, inner)?));
    }

    if let Some(inner) = enclosed(value, '(', ')') {
        return Ok(Keyword::AndList(list_values(token, inner)?));
    }

    if value.starts_with(SIGILS) {
        return Err(invalid(token, "unescaped type sigil"));
    }
    Ok(Keyword::Exact(unescape(token, value)?))
}

fn enclosed(value: &str, open: char, close: char) -> Option<&str> {
    value.strip_prefix(open)?.strip_suffix(close)
}

fn list_values(token: &str, inner: &str) -> Result<Vec<String>, QueryParseError> {
    if inner.is_empty() {
        return Ok(Vec::new());
    }
    Ok(split_list(token, inner)?
        .into_iter()
        .map(Option::unwrap_or_default)
        .collect())
}

/// Splits list items on unescaped commas. A blank item is `None`; `""` is
/// an explicitly empty one.
fn split_list(token: &str, inner: &str) -> Result<Vec<Option<String>>, QueryParseError> {
    let mut raw_items = Vec::new();
    let mut current = String::new();
    let mut chars = inner.chars();
    while let Some(c) = chars.next() {
        match c {
            '\\' => {
                current.push(c);
                match chars.next() {
                    Some(escaped) => current.push(escaped),
                    None => return Err(invalid(token, "dangling escape")),
                }
            }
            ',' => raw_items.push(std::mem::take(&mut current)),
            '[' | ']' | '{' | '}' | '(' | ')' => {
                return Err(invalid(token, "nested lists are not supported"));
            }
            _ => current.push(c),
        }
    }
    raw_items.push(current);

    raw_items
        .into_iter()
        .map(|raw| match raw.as_str() {
            "" => Ok(None),
            EMPTY_ITEM => Ok(Some(String::new())),
            _ => unescape(token, &raw).map(Some),
        })
        .collect()
}

/// Resolves backslash escapes; every other character is literal.
fn unescape(token: &str, value: &str) -> Result<String, QueryParseError> {
    let mut out = String::with_capacity(value.len());
    let mut chars = value.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            match chars.next() {
                Some(escaped) => out.push(escaped),
                None => return Err(invalid(token, "dangling escape")),
            }
        } else {
            out.push(c);
        }
    }
    Ok(out)
}

fn escape(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        if RESERVED.contains(&c) {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

fn print_item(value: &str) -> String {
    if value.is_empty() {
        EMPTY_ITEM.to_string()
    } else {
        escape(value)
    }
}

fn print_list(values: &[String], open: char, close: char) -> String {
    let mut out = String::new();
    out.push(open);
    let _ = write!(
        out,
        "{}",
        values.iter().map(|v| print_item(v)).collect::<Vec<_>>().join(",")
    );
    out.push(close);
    out
}

fn print_keyword(keyword: &Keyword) -> String {
    match keyword {
        Keyword::Exact(v) if v.starts_with('~') => format!("\\{}", escape(v)),
        Keyword::Exact(v) => escape(v),
        Keyword::Fuzzy(v) => format!("~{}", escape(v)),
        Keyword::Range { min, max } => format!(
            "[{},{}]",
            min.as_deref().map(print_item).unwrap_or_default(),
            max.as_deref().map(print_item).unwrap_or_default()
        ),
        Keyword::OrList(values) => print_list(values, '{', '}'),
        Keyword::AndList(values) => print_list(values, '(', ')'),
        Keyword::Raw(v) => v.clone(),
    }
}
