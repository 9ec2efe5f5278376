//! Ad-hoc query sanitizer.
//!
//! Gate for free-text read queries that no registry function can express.
//! A query either passes every check and comes out as a [`SanitizedQuery`]
//! with a row cap, or it is rejected outright with the first reason found.
//! Rejected queries are never stripped and retried.

use crate::error::{AnalyticsError, Result};
use regex::Regex;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::LazyLock;

/// The fact table every aggregate reads.
pub const FACT_TABLE: &str = "orders";

/// Tables an ad-hoc query may reference, bare names only.
pub const ALLOWED_TABLES: &[&str] = &[FACT_TABLE];

/// Row cap appended to queries without one.
pub const MAX_ROWS: u64 = 1000;

const BLOCKED_KEYWORDS: &[&str] = &[
    "INSERT", "UPDATE", "DELETE", "DROP", "ALTER", "TRUNCATE", "CREATE", "GRANT", "REVOKE",
    "EXEC", "EXECUTE", "INTO", "TABLE", "VALUES",
];

static STARTS_WITH_SELECT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^\s*SELECT\b").expect("valid regex"));

static BLOCKED_KEYWORD: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(r"(?i)\b({})\b", BLOCKED_KEYWORDS.join("|"))).expect("valid regex")
});

static STACKED_STATEMENT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r";\s*\S").expect("valid regex"));

static UNION_SELECT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\bUNION\s*((ALL|DISTINCT)\s+)?[(\s]*SELECT\b").expect("valid regex")
});

static UNICODE_ESCAPE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bU&|\bUESCAPE\b").expect("valid regex"));

static EXTENDED_PROCEDURE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\b(xp|sp)_\w*").expect("valid regex"));

static TRAILING_LIMIT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\bLIMIT\s+(\d+|ALL)(\s+OFFSET\s+\d+)?\s*$").expect("valid regex")
});

/// A query that passed the sanitizer. Only [`sanitize_query`] creates one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SanitizedQuery(String);

impl SanitizedQuery {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Result of sanitizing a query: `{valid, sanitized_query}` or
/// `{valid: false, error}`.
#[derive(Debug, Clone, PartialEq)]
pub struct SanitizeOutcome(std::result::Result<SanitizedQuery, String>);

impl SanitizeOutcome {
    pub fn is_valid(&self) -> bool {
        self.0.is_ok()
    }

    pub fn sanitized_query(&self) -> Option<&str> {
        self.0.as_ref().ok().map(SanitizedQuery::as_str)
    }

    pub fn error(&self) -> Option<&str> {
        self.0.as_ref().err().map(String::as_str)
    }

    /// Convert into an executable query or a rejection error.
    pub fn into_query(self) -> Result<SanitizedQuery> {
        self.0.map_err(AnalyticsError::SanitizationRejected)
    }
}

impl Serialize for SanitizeOutcome {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        #[derive(Serialize)]
        struct Wire<'a> {
            valid: bool,
            #[serde(skip_serializing_if = "Option::is_none")]
            sanitized_query: Option<&'a str>,
            #[serde(skip_serializing_if = "Option::is_none")]
            error: Option<&'a str>,
        }

        Wire {
            valid: self.is_valid(),
            sanitized_query: self.sanitized_query(),
            error: self.error(),
        }
        .serialize(serializer)
    }
}

/// Run all checks against `query`. First failure wins.
pub fn sanitize_query(query: &str) -> SanitizeOutcome {
    SanitizeOutcome(check(query))
}

fn check(query: &str) -> std::result::Result<SanitizedQuery, String> {
    if !STARTS_WITH_SELECT.is_match(query) {
        return Err("only SELECT queries are allowed".to_string());
    }

    if let Some(m) = BLOCKED_KEYWORD.find(query) {
        return Err(format!("blocked keyword: {}", m.as_str().to_uppercase()));
    }

    if query.contains("--") || query.contains("/*") || query.contains("*/") || query.contains('#')
    {
        return Err("comments are not allowed".to_string());
    }
    if STACKED_STATEMENT.is_match(query) {
        return Err("multiple statements are not allowed".to_string());
    }
    if UNION_SELECT.is_match(query) {
        return Err("UNION SELECT is not allowed".to_string());
    }
    if let Some(m) = EXTENDED_PROCEDURE.find(query) {
        return Err(format!("procedure calls are not allowed: {}", m.as_str()));
    }
    if query.contains('\\') {
        return Err("backslashes are not allowed".to_string());
    }
    if query.contains('$') {
        return Err("dollar quoting is not allowed".to_string());
    }
    if UNICODE_ESCAPE.is_match(query) {
        return Err("unicode escapes are not allowed".to_string());
    }

    let tokens = tokenize(query)?;
    let scan = TableScan::run(&tokens);
    for table in &scan.tables {
        if !ALLOWED_TABLES.contains(&table.as_str()) {
            return Err(format!("table not allowed: {}", table));
        }
    }
    check_identifiers(&tokens, &scan.aliases)?;
    check_function_calls(&tokens)?;

    Ok(SanitizedQuery(apply_row_cap(query)))
}

/// Drop a trailing `;`, then append or lower the `LIMIT`.
fn apply_row_cap(query: &str) -> String {
    let mut body = query.trim();
    if let Some(stripped) = body.strip_suffix(';') {
        body = stripped.trim_end();
    }

    match TRAILING_LIMIT.captures(body) {
        Some(caps) => {
            // LIMIT ALL parses as unbounded
            let requested: u64 = caps[1].parse().unwrap_or(u64::MAX);
            if requested <= MAX_ROWS {
                body.to_string()
            } else {
                let digits = caps.get(1).map(|m| m.range()).unwrap_or(0..0);
                format!("{}{}{}", &body[..digits.start], MAX_ROWS, &body[digits.end..])
            }
        }
        None => format!("{} LIMIT {}", body, MAX_ROWS),
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    /// Bare or dotted identifier, keyword, or `*` segment (`o.*`).
    Word(String),
    /// Single double-quoted identifier.
    Quoted(String),
    Literal,
    Open,
    Close,
    Comma,
    Other,
}

type Chars<'a> = std::iter::Peekable<std::str::Chars<'a>>;

fn tokenize(query: &str) -> std::result::Result<Vec<Token>, String> {
    let mut tokens = Vec::new();
    let mut chars = query.chars().peekable();

    while let Some(&c) = chars.peek() {
        if c.is_whitespace() {
            chars.next();
        } else if c == '\'' {
            chars.next();
            skip_string_literal(&mut chars)?;
            tokens.push(Token::Literal);
        } else if c.is_ascii_digit() {
            while matches!(chars.peek(), Some(n) if n.is_alphanumeric() || *n == '.') {
                chars.next();
            }
            tokens.push(Token::Literal);
        } else if c == '"' || c.is_alphabetic() || c == '_' {
            tokens.push(read_identifier(&mut chars)?);
        } else {
            chars.next();
            tokens.push(match c {
                '(' => Token::Open,
                ')' => Token::Close,
                ',' => Token::Comma,
                _ => Token::Other,
            });
        }
    }

    Ok(tokens)
}

fn skip_string_literal(chars: &mut Chars<'_>) -> std::result::Result<(), String> {
    while let Some(n) = chars.next() {
        if n == '\'' {
            if chars.peek() == Some(&'\'') {
                chars.next();
            } else {
                return Ok(());
            }
        }
    }
    Err("unterminated string literal".to_string())
}

fn read_quoted_identifier(chars: &mut Chars<'_>) -> std::result::Result<String, String> {
    let mut ident = String::new();
    while let Some(n) = chars.next() {
        if n == '"' {
            if chars.peek() == Some(&'"') {
                chars.next();
                ident.push('"');
            } else {
                return Ok(ident);
            }
        } else {
            ident.push(n);
        }
    }
    Err("unterminated quoted identifier".to_string())
}

/// One identifier with its dotted parts: `o.status`, `"public"."orders"`, `o.*`.
fn read_identifier(chars: &mut Chars<'_>) -> std::result::Result<Token, String> {
    let mut parts: Vec<String> = Vec::new();
    let mut quoted = false;

    loop {
        match chars.peek() {
            Some(&'"') => {
                chars.next();
                parts.push(read_quoted_identifier(chars)?);
                quoted = true;
            }
            Some(&'*') if !parts.is_empty() => {
                chars.next();
                parts.push("*".to_string());
            }
            Some(&n) if n.is_alphanumeric() || n == '_' => {
                let mut part = String::new();
                while let Some(&n) = chars.peek() {
                    if n.is_alphanumeric() || n == '_' {
                        part.push(n);
                        chars.next();
                    } else {
                        break;
                    }
                }
                if parts.is_empty() && part.eq_ignore_ascii_case("e") && chars.peek() == Some(&'\'')
                {
                    return Err("escape string literals are not allowed".to_string());
                }
                parts.push(part);
            }
            _ => break,
        }
        if chars.peek() == Some(&'.') {
            chars.next();
        } else {
            break;
        }
    }

    if quoted && parts.len() == 1 {
        Ok(Token::Quoted(parts.remove(0)))
    } else {
        Ok(Token::Word(parts.join(".")))
    }
}

const CLAUSE_KEYWORDS: &[&str] = &[
    "WHERE", "GROUP", "ORDER", "HAVING", "LIMIT", "OFFSET", "JOIN", "INNER", "LEFT", "RIGHT",
    "FULL", "CROSS", "NATURAL", "ON", "USING", "UNION", "WINDOW", "FETCH", "FOR", "EXCEPT",
    "INTERSECT",
];

/// Name prefixes of catalog objects and functions that read outside the
/// tenant's rows.
const SYSTEM_PREFIXES: &[&str] = &["pg_", "information_schema", "dblink", "lo_"];

const SYSTEM_FUNCTIONS: &[&str] = &["current_setting", "set_config"];

fn is_word(token: Option<&Token>, keyword: &str) -> bool {
    matches!(token, Some(Token::Word(w)) if w.eq_ignore_ascii_case(keyword))
}

fn is_system_name(name: &str) -> bool {
    SYSTEM_PREFIXES.iter().any(|p| name.starts_with(*p))
        || SYSTEM_FUNCTIONS.contains(&name)
        || name.contains("_to_xml")
}

/// Reject catalog names, and dotted names whose qualifier is neither the
/// fact table nor an alias bound in `FROM`/`JOIN`.
fn check_identifiers(
    tokens: &[Token],
    aliases: &HashSet<String>,
) -> std::result::Result<(), String> {
    for token in tokens {
        let (name, parts) = match token {
            Token::Word(w) => (
                w,
                w.to_lowercase()
                    .split('.')
                    .map(str::to_string)
                    .collect::<Vec<_>>(),
            ),
            Token::Quoted(q) => (q, vec![q.to_lowercase()]),
            _ => continue,
        };

        if let Some(system) = parts.iter().find(|p| is_system_name(p)) {
            return Err(format!("system objects are not allowed: {}", system));
        }
        let qualified_by_unknown = parts.len() == 2
            && parts[0] != FACT_TABLE
            && !aliases.contains(parts[0].as_str());
        if parts.len() > 2 || qualified_by_unknown {
            return Err(format!("schema-qualified names are not allowed: {}", name));
        }
    }
    Ok(())
}

/// Functions an ad-hoc query may call. Anything else followed by `(` is
/// rejected, since some built-ins run query text passed as a string and
/// would read past the tenant scope.
const ALLOWED_FUNCTIONS: &[&str] = &[
    "count", "sum", "avg", "min", "max", "stddev", "stddev_pop", "stddev_samp", "variance",
    "round", "floor", "ceil", "ceiling", "abs", "coalesce", "nullif", "greatest", "least",
    "lower", "upper", "trim", "length", "substring", "concat", "date_trunc", "date_part",
    "extract", "to_char", "now", "row_number", "rank", "dense_rank", "lag", "lead",
    "percentile_cont", "percentile_disc",
    // type modifiers: `CAST(x AS numeric(10, 2))`
    "numeric", "decimal", "varchar", "char",
];

/// Keywords that take a parenthesized operand without being a call.
const PAREN_KEYWORDS: &[&str] = &[
    "SELECT", "FROM", "JOIN", "LATERAL", "WHERE", "AND", "OR", "NOT", "IN", "EXISTS", "ANY",
    "ALL", "SOME", "ON", "USING", "AS", "BY", "HAVING", "WHEN", "THEN", "ELSE", "CASE", "OVER",
    "FILTER", "WITHIN", "BETWEEN", "IS", "LIKE", "ILIKE", "DISTINCT", "ROW", "CAST", "WITH",
    "LIMIT", "OFFSET", "EXCEPT", "INTERSECT",
];

fn check_function_calls(tokens: &[Token]) -> std::result::Result<(), String> {
    for pair in tokens.windows(2) {
        if pair[1] != Token::Open {
            continue;
        }
        match &pair[0] {
            Token::Quoted(name) => {
                return Err(format!("quoted function names are not allowed: {}", name));
            }
            Token::Word(name) => {
                let allowed = PAREN_KEYWORDS.iter().any(|k| name.eq_ignore_ascii_case(k))
                    || ALLOWED_FUNCTIONS.contains(&name.to_lowercase().as_str());
                if !allowed {
                    return Err(format!("function not allowed: {}", name));
                }
            }
            _ => {}
        }
    }
    Ok(())
}

#[derive(Debug, Clone, Copy)]
struct Scope {
    /// `FROM`/`JOIN` inside this level name tables.
    query: bool,
    /// Set when the `(` stood where a table goes; `Some(true)` inside a
    /// comma-separated `FROM` list.
    from_list: Option<bool>,
}

/// Table names and aliases bound in `FROM`/`JOIN` positions, lowercased.
///
/// `FROM` inside expression parentheses (`EXTRACT(MONTH FROM ...)`) is not
/// a table reference. `FROM` inside a parenthesized `SELECT`, or a
/// parenthesized join tree in table position, is.
#[derive(Debug, Default)]
struct TableScan {
    tables: Vec<String>,
    aliases: HashSet<String>,
    /// `(` tokens found in table position, with their list mode.
    table_parens: HashMap<usize, bool>,
}

impl TableScan {
    fn run(tokens: &[Token]) -> Self {
        let mut scan = Self::default();
        let mut scopes = vec![Scope {
            query: true,
            from_list: None,
        }];
        let mut i = 0;

        while i < tokens.len() {
            match &tokens[i] {
                Token::Open => {
                    let from_list = scan.table_parens.get(&i).copied();
                    let subquery = is_word(tokens.get(i + 1), "SELECT")
                        || is_word(tokens.get(i + 1), "WITH");
                    scopes.push(Scope {
                        query: subquery || from_list.is_some(),
                        from_list,
                    });
                    i += 1;
                    if from_list.is_some() && !subquery {
                        // join tree: `(orders o JOIN ...)`
                        i = scan.read_from_list(tokens, i, true);
                    }
                }
                Token::Close => {
                    i += 1;
                    if scopes.len() > 1 {
                        if let Some(Scope {
                            from_list: Some(multi),
                            ..
                        }) = scopes.pop()
                        {
                            let (next, more) = scan.skip_alias(tokens, i);
                            i = next;
                            if multi && more {
                                i = scan.read_from_list(tokens, i, true);
                            }
                        }
                    }
                }
                Token::Word(w)
                    if (w.eq_ignore_ascii_case("FROM") || w.eq_ignore_ascii_case("JOIN"))
                        && scopes.last().map(|s| s.query).unwrap_or(true)
                        // `IS DISTINCT FROM`
                        && !is_word(i.checked_sub(1).and_then(|p| tokens.get(p)), "DISTINCT") =>
                {
                    let multi = w.eq_ignore_ascii_case("FROM");
                    i = scan.read_from_list(tokens, i + 1, multi);
                }
                _ => i += 1,
            }
        }

        scan
    }

    /// Read table references starting at `i`; one item unless `multi`.
    /// Returns the index of the first token not consumed.
    fn read_from_list(&mut self, tokens: &[Token], mut i: usize, multi: bool) -> usize {
        loop {
            while is_word(tokens.get(i), "LATERAL") {
                i += 1;
            }
            match tokens.get(i) {
                Some(Token::Word(name)) | Some(Token::Quoted(name)) => {
                    self.tables.push(name.to_lowercase());
                    i += 1;
                }
                Some(Token::Open) => {
                    self.table_parens.insert(i, multi);
                    return i;
                }
                _ => return i,
            }

            let (next, more) = self.skip_alias(tokens, i);
            i = next;
            if !(multi && more) {
                return i;
            }
        }
    }

    /// Skip and record an optional alias; reports whether a `,` follows.
    fn skip_alias(&mut self, tokens: &[Token], mut i: usize) -> (usize, bool) {
        let explicit = is_word(tokens.get(i), "AS");
        if explicit {
            i += 1;
        }
        match tokens.get(i) {
            Some(Token::Word(alias))
                if explicit || !CLAUSE_KEYWORDS.iter().any(|k| alias.eq_ignore_ascii_case(k)) =>
            {
                self.aliases.insert(alias.to_lowercase());
                i += 1;
            }
            Some(Token::Quoted(alias)) => {
                self.aliases.insert(alias.to_lowercase());
                i += 1;
            }
            _ => {}
        }
        if tokens.get(i) == Some(&Token::Comma) {
            (i + 1, true)
        } else {
            (i, false)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rejected(query: &str) -> String {
        let outcome = sanitize_query(query);
        assert!(!outcome.is_valid(), "expected rejection: {query}");
        outcome.error().unwrap().to_string()
    }

    fn accepted(query: &str) -> String {
        let outcome = sanitize_query(query);
        assert!(outcome.is_valid(), "expected acceptance: {query}: {:?}", outcome.error());
        outcome.sanitized_query().unwrap().to_string()
    }

    #[test]
    fn test_rejects_stacked_drop() {
        let error = rejected("SELECT * FROM orders; DROP TABLE orders");
        assert_eq!(error, "blocked keyword: DROP");
    }

    #[test]
    fn test_accepts_select_one_with_limit() {
        assert_eq!(accepted("SELECT 1"), "SELECT 1 LIMIT 1000");
    }

    #[test]
    fn test_rejects_unlisted_table() {
        assert_eq!(rejected("SELECT * FROM users"), "table not allowed: users");
        assert_eq!(
            rejected("SELECT * FROM orders o JOIN customers c ON c.id = o.customer_id"),
            "table not allowed: customers"
        );
        assert_eq!(
            rejected("SELECT * FROM orders, pg_user"),
            "table not allowed: pg_user"
        );
        assert_eq!(
            rejected("SELECT * FROM public.orders"),
            "table not allowed: public.orders"
        );
    }

    #[test]
    fn test_idempotent_after_limit() {
        for q in [
            "SELECT 1",
            "select status, count(*) from orders group by status;",
            "SELECT * FROM orders LIMIT 50",
            "SELECT * FROM orders LIMIT 5000",
        ] {
            let once = accepted(q);
            assert_eq!(accepted(&once), once);
        }
    }

    #[test]
    fn test_must_start_with_select() {
        assert_eq!(
            rejected("WITH x AS (SELECT 1) SELECT * FROM x"),
            "only SELECT queries are allowed"
        );
        assert_eq!(rejected("  show tables"), "only SELECT queries are allowed");
        accepted("  select 1");
    }

    #[test]
    fn test_blocked_keywords_are_whole_words() {
        assert_eq!(
            rejected("SELECT * INTO backup FROM orders"),
            "blocked keyword: INTO"
        );
        assert_eq!(rejected("SELECT 1; exec sp_who"), "blocked keyword: EXEC");
        // substrings of identifiers are fine
        accepted("SELECT created_at_local, updated_by FROM orders");
    }

    #[test]
    fn test_rejects_comments_union_and_procedures() {
        assert_eq!(rejected("SELECT 1 -- hi"), "comments are not allowed");
        assert_eq!(rejected("SELECT /* x */ 1"), "comments are not allowed");
        assert_eq!(
            rejected("SELECT 1 FROM orders UNION ALL SELECT 2"),
            "UNION SELECT is not allowed"
        );
        assert_eq!(
            rejected("SELECT 1; SELECT 2"),
            "multiple statements are not allowed"
        );
        assert!(rejected("SELECT xp_cmdshell('dir')").starts_with("procedure calls"));
    }

    #[test]
    fn test_trailing_semicolon_is_dropped() {
        assert_eq!(
            accepted("SELECT COUNT(*) FROM orders ;  "),
            "SELECT COUNT(*) FROM orders LIMIT 1000"
        );
    }

    #[test]
    fn test_existing_limit_capped() {
        assert_eq!(
            accepted("SELECT * FROM orders LIMIT 5000 OFFSET 10"),
            "SELECT * FROM orders LIMIT 1000 OFFSET 10"
        );
        assert_eq!(
            accepted("SELECT * FROM orders LIMIT 10"),
            "SELECT * FROM orders LIMIT 10"
        );
    }

    #[test]
    fn test_expression_from_is_not_a_table() {
        accepted(
            "SELECT EXTRACT(MONTH FROM order_date) AS m, SUM(total_amount) \
             FROM orders GROUP BY 1",
        );
        accepted("SELECT TRIM(BOTH ' ' FROM status) FROM orders");
    }

    #[test]
    fn test_subquery_tables_checked() {
        accepted("SELECT * FROM (SELECT status FROM orders) AS s");
        assert_eq!(
            rejected("SELECT * FROM (SELECT id FROM secrets) s"),
            "table not allowed: secrets"
        );
    }

    #[test]
    fn test_string_literals_do_not_hide_tables() {
        accepted("SELECT * FROM orders WHERE marketplace = 'from users'");
    }

    #[test]
    fn test_parenthesized_join_tables_checked() {
        assert_eq!(
            rejected("SELECT * FROM (orders JOIN public.orders p ON true)"),
            "table not allowed: public.orders"
        );
        assert_eq!(
            rejected("SELECT * FROM ((orders o CROSS JOIN secrets s))"),
            "table not allowed: secrets"
        );
        assert_eq!(
            rejected("SELECT * FROM (SELECT status FROM orders) s, accounts"),
            "table not allowed: accounts"
        );
        accepted("SELECT o.status FROM (orders o) WHERE o.total_amount > 10");
    }

    #[test]
    fn test_rejects_table_and_values_shorthand() {
        assert_eq!(
            rejected("SELECT * FROM orders WHERE id IN (TABLE pg_user)"),
            "blocked keyword: TABLE"
        );
        assert_eq!(
            rejected("SELECT * FROM (VALUES (1)) v"),
            "blocked keyword: VALUES"
        );
    }

    #[test]
    fn test_rejects_catalog_and_qualified_names() {
        assert_eq!(
            rejected("SELECT (SELECT usename FROM orders LIMIT 1), pg_catalog.pg_user FROM orders"),
            "system objects are not allowed: pg_catalog"
        );
        assert_eq!(
            rejected("SELECT query_to_xml('select 1', true, true, '') FROM orders"),
            "system objects are not allowed: query_to_xml"
        );
        assert_eq!(
            rejected("SELECT secret.payload FROM orders"),
            "schema-qualified names are not allowed: secret.payload"
        );
        assert_eq!(
            rejected(r#"SELECT "other"."orders".status FROM orders"#),
            "schema-qualified names are not allowed: other.orders.status"
        );
        accepted("SELECT o.status, orders.marketplace FROM orders o");
        accepted("SELECT s.n FROM (SELECT COUNT(*) AS n FROM orders) AS s");
        accepted("SELECT status FROM orders WHERE status IS DISTINCT FROM 'paid'");
    }

    #[test]
    fn test_rejects_escape_strings_and_dollar_quotes() {
        assert_eq!(
            rejected("SELECT * FROM orders WHERE status = E'x'"),
            "escape string literals are not allowed"
        );
        assert_eq!(
            rejected(r"SELECT * FROM orders WHERE status = 'a\' "),
            "backslashes are not allowed"
        );
        assert_eq!(
            rejected("SELECT $$'$$, x FROM orders"),
            "dollar quoting is not allowed"
        );
        assert_eq!(
            rejected("SELECT * FROM orders WHERE status = 'open"),
            "unterminated string literal"
        );
        // doubled quotes stay inside the literal
        accepted("SELECT * FROM orders WHERE marketplace = 'o''reilly from users'");
    }

    #[test]
    fn test_limit_all_is_capped() {
        assert_eq!(
            accepted("SELECT * FROM orders LIMIT ALL"),
            "SELECT * FROM orders LIMIT 1000"
        );
        assert_eq!(
            accepted("SELECT * FROM orders limit all offset 5;"),
            "SELECT * FROM orders limit 1000 offset 5"
        );
    }

    #[test]
    fn test_rejects_functions_outside_allow_list() {
        assert_eq!(
            rejected("SELECT ts_stat('SELECT to_tsvector(tenant_id) FROM public.orders')"),
            "function not allowed: ts_stat"
        );
        assert_eq!(
            rejected("SELECT ts_rewrite('a'::tsquery, 'SELECT t, s FROM aliases') FROM orders"),
            "function not allowed: ts_rewrite"
        );
        assert_eq!(
            rejected("SELECT md5(status) FROM orders"),
            "function not allowed: md5"
        );
        assert_eq!(
            rejected(r#"SELECT "query_to_xml"('SELECT 1', true, false, '') FROM orders"#),
            "system objects are not allowed: query_to_xml"
        );
        assert_eq!(
            rejected(r#"SELECT "Count"(*) FROM orders"#),
            "quoted function names are not allowed: Count"
        );
        assert_eq!(
            rejected("SELECT orders.count(*) FROM orders"),
            "function not allowed: orders.count"
        );
    }

    #[test]
    fn test_allowed_functions_and_keywords() {
        accepted(
            "SELECT marketplace, COUNT(*), ROUND(AVG(total_amount), 2), \
             TO_CHAR(DATE_TRUNC('month', order_date), 'YYYY-MM') \
             FROM orders WHERE status IN ('paid', 'shipped') AND NOT (total_amount < 0) \
             GROUP BY marketplace, DATE_TRUNC('month', order_date)",
        );
        accepted("SELECT CAST(total_amount AS numeric(10, 2)) FROM orders");
        accepted(
            "SELECT status, RANK() OVER (ORDER BY COUNT(*) DESC) FROM orders \
             WHERE EXISTS (SELECT 1 FROM orders) GROUP BY status",
        );
        accepted("SELECT CASE WHEN (total_amount > 100) THEN 'big' ELSE 'small' END FROM orders");
    }

    #[test]
    fn test_rejects_unicode_escapes() {
        assert_eq!(
            rejected(
                r#"SELECT U&"query!005fto!005fxml" UESCAPE '!'('SELECT * FROM public.orders', true, false, '')"#
            ),
            "unicode escapes are not allowed"
        );
        assert_eq!(
            rejected(r#"SELECT U&"!0070g_sleep" UESCAPE '!'(30)"#),
            "unicode escapes are not allowed"
        );
        assert_eq!(
            rejected("SELECT * FROM orders WHERE status = u&'paid'"),
            "unicode escapes are not allowed"
        );
    }

    #[test]
    fn test_rejects_parenthesized_union() {
        assert_eq!(
            rejected("SELECT 1 FROM orders UNION (SELECT 2)"),
            "UNION SELECT is not allowed"
        );
    }

    #[test]
    fn test_outcome_serialization() {
        let ok = serde_json::to_value(sanitize_query("SELECT 1")).unwrap();
        assert_eq!(ok["valid"], true);
        assert_eq!(ok["sanitized_query"], "SELECT 1 LIMIT 1000");

        let bad = serde_json::to_value(sanitize_query("DELETE FROM orders")).unwrap();
        assert_eq!(bad["valid"], false);
        assert!(bad.get("sanitized_query").is_none());
    }

    #[test]
    fn test_rejection_converts_to_error() {
        let err = sanitize_query("SELECT * FROM users").into_query().unwrap_err();
        assert_eq!(err.kind(), "sanitization_rejected");
    }
}
