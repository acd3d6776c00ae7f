//! SQL source types and the Cached Query data model (§3 "Cached Query",
//! §4.4): splitting `;`-delimited multi-statement text into SubQueries,
//! rewriting `?` placeholders to `$n`, and classifying each SubQuery's
//! statement kind and RETURNING-clause presence.

/// A SQL source the query engine can execute.
///
/// Implemented for `&str` (persistent: eligible for server-side prepared
/// statement caching keyed by its hash) and [`SqlOnce`] (never cached, for
/// one-shot generated SQL).
pub trait Sql {
    fn sql(&self) -> &str;

    /// Whether this SQL source may be cached as a named prepared statement.
    fn persistent(&self) -> bool;
}

impl Sql for &str {
    fn sql(&self) -> &str {
        self
    }

    fn persistent(&self) -> bool {
        true
    }
}

impl Sql for String {
    fn sql(&self) -> &str {
        self
    }

    fn persistent(&self) -> bool {
        true
    }
}

/// Wraps a SQL string to force one-shot (unnamed, unprepared) execution.
pub struct SqlOnce<'sql>(pub &'sql str);

impl Sql for SqlOnce<'_> {
    fn sql(&self) -> &str {
        self.0
    }

    fn persistent(&self) -> bool {
        false
    }
}

pub trait SqlExt: Sized {
    fn once(self) -> SqlOnce<'static>
    where
        Self: 'static;
}

impl SqlExt for &'static str {
    fn once(self) -> SqlOnce<'static> {
        SqlOnce(self)
    }
}

/// A rewritten SubQuery's native text, handed to the query engine in place
/// of the caller's original [`Sql`] source. Carries the original source's
/// [`Sql::persistent`] flag through unchanged.
pub(crate) struct Native {
    text: String,
    persistent: bool,
}

impl Native {
    /// Wraps already-native SQL text that didn't come from a [`SubQuery`]
    /// (the `rewrite_batched_inserts` multi-row `INSERT` rewrite builds its
    /// own text rather than going through a single SubQuery's placeholders).
    pub(crate) fn raw(text: String, persistent: bool) -> Self {
        Self { text, persistent }
    }
}

impl Sql for Native {
    fn sql(&self) -> &str {
        &self.text
    }

    fn persistent(&self) -> bool {
        self.persistent
    }
}

/// The statement kind a [`SubQuery`] was classified as, by its leading
/// keyword (comments and whitespace skipped, CTEs classified by `WITH`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatementKind {
    Select,
    Insert,
    Update,
    Delete,
    Merge,
    Ddl,
    Other,
}

/// One `;`-delimited statement out of a [`CachedQuery`].
#[derive(Debug, Clone)]
pub struct SubQuery {
    /// The native SQL as sent to the server: `?` placeholders rewritten to
    /// `$1`, `$2`, ... Already-native `$n` text with no `?` at all passes
    /// through unchanged.
    sql: String,
    /// Number of `?` placeholders rewritten (0 if the source already used
    /// `$n` placeholders).
    param_count: u16,
    kind: StatementKind,
    /// Whether a top-level `RETURNING` clause is present (inside neither a
    /// string literal, quoted identifier, nor a comment).
    returning: bool,
}

impl SubQuery {
    pub fn sql(&self) -> &str {
        &self.sql
    }

    pub fn param_count(&self) -> u16 {
        self.param_count
    }

    pub fn kind(&self) -> StatementKind {
        self.kind
    }

    pub fn has_returning(&self) -> bool {
        self.returning
    }

    pub(crate) fn into_native(self, persistent: bool) -> Native {
        Native { text: self.sql, persistent }
    }

    /// Appends `RETURNING clause` to the statement text (§4.4
    /// "Returning-generated-keys"). Caller is responsible for checking
    /// [`SubQuery::has_returning`] first; calling this on a statement that
    /// already has one produces invalid SQL.
    pub(crate) fn with_appended_returning(mut self, clause: &str) -> Self {
        self.sql.push_str(" RETURNING ");
        self.sql.push_str(clause);
        self.returning = true;
        self
    }

    /// Rewrites a single-row `INSERT ... VALUES (...)` into a `row_count`-row
    /// form, renumbering each copy's placeholders (§4.4 "Batch execution" /
    /// `reWriteBatchedInserts`). Returns `None` if no single top-level
    /// `VALUES (...)` tuple can be located — callers fall back to one
    /// `Bind`/`Execute` pair per row in that case.
    ///
    /// Only called when [`SubQuery::has_returning`] is `false`: rewriting a
    /// batch with `RETURNING` into one multi-row statement would return all
    /// rows from a single `CommandComplete`, losing the per-original-row
    /// result mapping the caller expects from a batch.
    pub(crate) fn rewrite_as_multi_row_insert(&self, row_count: usize) -> Option<String> {
        let n = self.param_count as usize;
        if n == 0 || row_count < 2 {
            return None;
        }

        let values_kw = find_top_level_keyword(&self.sql, "VALUES")?;
        let open = self.sql[values_kw..].find('(').map(|i| values_kw + i)?;
        let close = matching_paren(&self.sql, open)?;
        let tuple = &self.sql[open + 1..close];

        let mut values = String::new();
        for row in 0..row_count {
            if row > 0 {
                values.push_str(", ");
            }
            values.push('(');
            values.push_str(&renumber_placeholders(tuple, row * n));
            values.push(')');
        }

        Some(format!("{}{values}{}", &self.sql[..open], &self.sql[close + 1..]))
    }
}

fn renumber_placeholders(tuple: &str, offset: usize) -> String {
    let mut out = String::with_capacity(tuple.len());
    let mut chars = tuple.chars().peekable();
    while let Some(c) = chars.next() {
        if c != '$' {
            out.push(c);
            continue;
        }
        let mut digits = String::new();
        while let Some(&d) = chars.peek() {
            if d.is_ascii_digit() {
                digits.push(d);
                chars.next();
            } else {
                break;
            }
        }
        out.push('$');
        match digits.parse::<usize>() {
            Ok(original) => out.push_str(&(original + offset).to_string()),
            Err(_) => out.push_str(&digits),
        }
    }
    out
}

/// Finds `keyword`'s first top-level, whole-word occurrence (outside string
/// and quoted-identifier literals), returning its byte offset.
fn find_top_level_keyword(sql: &str, keyword: &str) -> Option<usize> {
    let bytes = sql.as_bytes();
    let mut in_single = false;
    let mut in_double = false;
    let mut i = 0;
    while i < bytes.len() {
        let b = bytes[i];
        if in_single {
            if b == b'\'' {
                in_single = false;
            }
            i += 1;
            continue;
        }
        if in_double {
            if b == b'"' {
                in_double = false;
            }
            i += 1;
            continue;
        }
        match b {
            b'\'' => {
                in_single = true;
                i += 1;
                continue;
            }
            b'"' => {
                in_double = true;
                i += 1;
                continue;
            }
            _ => {}
        }
        if b.is_ascii_alphabetic() || b == b'_' {
            let start = i;
            while i < bytes.len() && (bytes[i].is_ascii_alphanumeric() || bytes[i] == b'_') {
                i += 1;
            }
            if sql[start..i].eq_ignore_ascii_case(keyword) {
                return Some(start);
            }
            continue;
        }
        i += 1;
    }
    None
}

/// Finds the `)` matching the `(` at byte offset `open`, honoring nested
/// parens and string literals.
fn matching_paren(sql: &str, open: usize) -> Option<usize> {
    let bytes = sql.as_bytes();
    let mut depth = 0i32;
    let mut in_single = false;
    let mut i = open;
    while i < bytes.len() {
        let b = bytes[i];
        if in_single {
            if b == b'\'' {
                in_single = false;
            }
            i += 1;
            continue;
        }
        match b {
            b'\'' => in_single = true,
            b'(' => depth += 1,
            b')' => {
                depth -= 1;
                if depth == 0 {
                    return Some(i);
                }
            }
            _ => {}
        }
        i += 1;
    }
    None
}

/// A parsed client SQL string decomposed into one or more [`SubQuery`]s.
///
/// A cached server-side name (a [`StatementName`]) is attached once the
/// engine has actually prepared a SubQuery; `CachedQuery` itself only
/// carries the client-visible shape of the text.
#[derive(Debug, Clone)]
pub struct CachedQuery {
    sub_queries: Vec<SubQuery>,
}

impl CachedQuery {
    /// Splits `text` on top-level `;`, rewriting `?` to `$n` and classifying
    /// each resulting [`SubQuery`] along the way.
    pub fn parse(text: &str) -> Self {
        Self { sub_queries: split_and_rewrite(text) }
    }

    pub fn sub_queries(&self) -> &[SubQuery] {
        &self.sub_queries
    }

    pub fn is_single_statement(&self) -> bool {
        self.sub_queries.len() == 1
    }

    pub(crate) fn into_sub_queries(self) -> Vec<SubQuery> {
        self.sub_queries
    }
}

fn split_and_rewrite(text: &str) -> Vec<SubQuery> {
    let mut subs = Vec::new();
    let mut cur = String::new();
    let mut placeholder_n: u16 = 0;
    let mut word_buf = String::new();
    let mut returning = false;

    let mut in_single = false;
    let mut in_double = false;
    let mut comment_depth: u32 = 0;
    let mut in_line_comment = false;

    let mut chars = text.chars().peekable();
    while let Some(c) = chars.next() {
        if in_line_comment {
            cur.push(c);
            if c == '\n' {
                in_line_comment = false;
            }
            continue;
        }
        if comment_depth > 0 {
            cur.push(c);
            if c == '*' && chars.peek() == Some(&'/') {
                cur.push(chars.next().unwrap());
                comment_depth -= 1;
            } else if c == '/' && chars.peek() == Some(&'*') {
                cur.push(chars.next().unwrap());
                comment_depth += 1;
            }
            continue;
        }
        if in_single {
            cur.push(c);
            if c == '\'' {
                if chars.peek() == Some(&'\'') {
                    cur.push(chars.next().unwrap());
                } else {
                    in_single = false;
                }
            }
            continue;
        }
        if in_double {
            cur.push(c);
            if c == '"' {
                if chars.peek() == Some(&'"') {
                    cur.push(chars.next().unwrap());
                } else {
                    in_double = false;
                }
            }
            continue;
        }

        if c.is_alphanumeric() || c == '_' {
            word_buf.push(c);
            cur.push(c);
            continue;
        }
        if word_buf.eq_ignore_ascii_case("returning") {
            returning = true;
        }
        word_buf.clear();

        match c {
            '\'' => {
                in_single = true;
                cur.push(c);
            }
            '"' => {
                in_double = true;
                cur.push(c);
            }
            '-' if chars.peek() == Some(&'-') => {
                cur.push(c);
                cur.push(chars.next().unwrap());
                in_line_comment = true;
            }
            '/' if chars.peek() == Some(&'*') => {
                cur.push(c);
                cur.push(chars.next().unwrap());
                comment_depth = 1;
            }
            '?' => {
                placeholder_n += 1;
                cur.push('$');
                let mut buf = itoa::Buffer::new();
                cur.push_str(buf.format(placeholder_n));
            }
            ';' => {
                subs.push(finish_sub_query(std::mem::take(&mut cur), placeholder_n, returning));
                placeholder_n = 0;
                returning = false;
            }
            _ => cur.push(c),
        }
    }
    if word_buf.eq_ignore_ascii_case("returning") {
        returning = true;
    }
    if !cur.trim().is_empty() {
        subs.push(finish_sub_query(cur, placeholder_n, returning));
    }
    subs
}

fn finish_sub_query(raw: String, param_count: u16, returning: bool) -> SubQuery {
    let sql = raw.trim().to_string();
    let kind = classify(&sql);
    SubQuery { sql, param_count, kind, returning }
}

fn classify(sql: &str) -> StatementKind {
    match first_keyword(sql).as_str() {
        "SELECT" | "TABLE" | "VALUES" | "WITH" => StatementKind::Select,
        "INSERT" => StatementKind::Insert,
        "UPDATE" => StatementKind::Update,
        "DELETE" => StatementKind::Delete,
        "MERGE" => StatementKind::Merge,
        "CREATE" | "ALTER" | "DROP" | "TRUNCATE" | "COMMENT" | "GRANT" | "REVOKE" => StatementKind::Ddl,
        _ => StatementKind::Other,
    }
}

/// First bare keyword of `sql`, skipping leading whitespace and comments,
/// uppercased for matching.
fn first_keyword(sql: &str) -> String {
    let mut chars = sql.chars().peekable();
    loop {
        match chars.peek().copied() {
            Some(c) if c.is_whitespace() => {
                chars.next();
            }
            Some('-') => {
                let mut probe = chars.clone();
                probe.next();
                if probe.peek() == Some(&'-') {
                    chars.next();
                    chars.next();
                    for c in chars.by_ref() {
                        if c == '\n' {
                            break;
                        }
                    }
                } else {
                    break;
                }
            }
            Some('/') => {
                let mut probe = chars.clone();
                probe.next();
                if probe.peek() == Some(&'*') {
                    chars.next();
                    chars.next();
                    let mut depth = 1u32;
                    while depth > 0 {
                        match chars.next() {
                            Some('*') if chars.peek() == Some(&'/') => {
                                chars.next();
                                depth -= 1;
                            }
                            Some('/') if chars.peek() == Some(&'*') => {
                                chars.next();
                                depth += 1;
                            }
                            Some(_) => {}
                            None => break,
                        }
                    }
                } else {
                    break;
                }
            }
            _ => break,
        }
    }

    let mut word = String::new();
    while let Some(&c) = chars.peek() {
        if c.is_alphabetic() {
            word.push(c.to_ascii_uppercase());
            chars.next();
        } else {
            break;
        }
    }
    word
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rewrites_question_mark_placeholders() {
        let cq = CachedQuery::parse("SELECT * FROM t WHERE a = ? AND b = ?");
        assert_eq!(cq.sub_queries()[0].sql(), "SELECT * FROM t WHERE a = $1 AND b = $2");
        assert_eq!(cq.sub_queries()[0].param_count(), 2);
    }

    #[test]
    fn native_dollar_placeholders_pass_through() {
        let cq = CachedQuery::parse("SELECT * FROM t WHERE a = $1");
        assert_eq!(cq.sub_queries()[0].sql(), "SELECT * FROM t WHERE a = $1");
        assert_eq!(cq.sub_queries()[0].param_count(), 0);
    }

    #[test]
    fn question_mark_inside_string_literal_is_not_rewritten() {
        let cq = CachedQuery::parse("SELECT '??' FROM t WHERE a = ?");
        assert_eq!(cq.sub_queries()[0].sql(), "SELECT '??' FROM t WHERE a = $1");
    }

    #[test]
    fn splits_top_level_semicolons() {
        let cq = CachedQuery::parse("SELECT 1; INSERT INTO t VALUES (1); -- trailing\n");
        assert_eq!(cq.sub_queries().len(), 2);
        assert_eq!(cq.sub_queries()[0].kind(), StatementKind::Select);
        assert_eq!(cq.sub_queries()[1].kind(), StatementKind::Insert);
    }

    #[test]
    fn semicolon_inside_string_does_not_split() {
        let cq = CachedQuery::parse("SELECT 'a;b' FROM t");
        assert!(cq.is_single_statement());
    }

    #[test]
    fn classifies_statement_kinds() {
        assert_eq!(CachedQuery::parse("update t set a=1").sub_queries()[0].kind(), StatementKind::Update);
        assert_eq!(CachedQuery::parse("delete from t").sub_queries()[0].kind(), StatementKind::Delete);
        assert_eq!(CachedQuery::parse("create table t(a int)").sub_queries()[0].kind(), StatementKind::Ddl);
        assert_eq!(CachedQuery::parse("  -- comment\nSELECT 1").sub_queries()[0].kind(), StatementKind::Select);
    }

    #[test]
    fn rewrites_insert_values_for_batching() {
        let sub = &CachedQuery::parse("INSERT INTO t(a, b) VALUES ($1, $2)").into_sub_queries()[0];
        let rewritten = sub.rewrite_as_multi_row_insert(3).unwrap();
        assert_eq!(rewritten, "INSERT INTO t(a, b) VALUES ($1, $2), ($3, $4), ($5, $6)");
    }

    #[test]
    fn no_rewrite_without_a_values_tuple() {
        let sub = &CachedQuery::parse("INSERT INTO t SELECT * FROM other").into_sub_queries()[0];
        assert!(sub.rewrite_as_multi_row_insert(3).is_none());
    }

    #[test]
    fn detects_top_level_returning_clause() {
        assert!(CachedQuery::parse("INSERT INTO t(a) VALUES ($1) RETURNING id").sub_queries()[0].has_returning());
        assert!(!CachedQuery::parse("INSERT INTO t(a) VALUES ($1)").sub_queries()[0].has_returning());
        assert!(!CachedQuery::parse("SELECT 'RETURNING' FROM t").sub_queries()[0].has_returning());
    }
}
