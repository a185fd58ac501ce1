//! ORDER BY and LIMIT clauses.

/// Sort direction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SortDirection {
    #[default]
    Asc,
    Desc,
}

impl SortDirection {
    pub const fn as_str(self) -> &'static str {
        match self {
            SortDirection::Asc => "ASC",
            SortDirection::Desc => "DESC",
        }
    }

    pub const fn reversed(self) -> Self {
        match self {
            SortDirection::Asc => SortDirection::Desc,
            SortDirection::Desc => SortDirection::Asc,
        }
    }

    /// Parse `ASC`/`DESC`, case-insensitively.
    pub fn parse(text: &str) -> Option<Self> {
        if text.eq_ignore_ascii_case("asc") {
            Some(SortDirection::Asc)
        } else if text.eq_ignore_ascii_case("desc") {
            Some(SortDirection::Desc)
        } else {
            None
        }
    }
}

/// One ORDER BY term.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderBy {
    /// Column or expression, canonical SQL.
    pub expr: String,
    pub direction: SortDirection,
}

impl OrderBy {
    pub fn new(expr: impl Into<String>, direction: SortDirection) -> Self {
        Self {
            expr: expr.into(),
            direction,
        }
    }

    pub fn asc(expr: impl Into<String>) -> Self {
        Self::new(expr, SortDirection::Asc)
    }

    pub fn desc(expr: impl Into<String>) -> Self {
        Self::new(expr, SortDirection::Desc)
    }

    pub fn to_sql(&self) -> String {
        format!("{} {}", self.expr, self.direction.as_str())
    }
}

/// Split a sort string such as `"Title" ASC, COALESCE(a, b) DESC, ID` into
/// terms. Commas inside parentheses or quotes do not split.
pub fn parse_sort(spec: &str) -> Vec<OrderBy> {
    let mut terms = Vec::new();
    let mut depth = 0usize;
    let mut quote: Option<char> = None;
    let mut current = String::new();

    for c in spec.chars() {
        match (quote, c) {
            (Some(q), c) if c == q => quote = None,
            (Some(_), _) => {}
            (None, '"' | '\'') => quote = Some(c),
            (None, '(') => depth += 1,
            (None, ')') => depth = depth.saturating_sub(1),
            (None, ',') if depth == 0 => {
                terms.extend(parse_term(&current));
                current.clear();
                continue;
            }
            _ => {}
        }
        current.push(c);
    }
    terms.extend(parse_term(&current));
    terms
}

fn parse_term(term: &str) -> Option<OrderBy> {
    let term = term.trim();
    if term.is_empty() {
        return None;
    }
    if let Some((expr, last)) = term.rsplit_once(char::is_whitespace) {
        if let Some(direction) = SortDirection::parse(last) {
            return Some(OrderBy::new(expr.trim(), direction));
        }
    }
    Some(OrderBy::asc(term))
}

/// LIMIT/OFFSET state. `length == None` means unbounded.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Limit {
    pub length: Option<u64>,
    pub offset: u64,
}

impl Limit {
    pub fn new(length: Option<u64>, offset: u64) -> Self {
        Self { length, offset }
    }

    pub fn is_set(&self) -> bool {
        self.length.is_some() || self.offset > 0
    }

    /// Number of rows a query with this limit returns when `total` rows
    /// match without it.
    pub fn apply_to_count(&self, total: u64) -> u64 {
        match self.length {
            Some(length) if total >= self.offset + length => length,
            _ => total.saturating_sub(self.offset),
        }
    }
}
