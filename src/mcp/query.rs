//! Read-only validation and pagination for `execute_sql`.
//!
//! Pagination priority: `page` + `per_page`, then `offset` + `max_rows`, then
//! `max_rows` alone, else none. The server-wide `--max-rows` stands in for a
//! missing (or zero) `max_rows`.

use once_cell::sync::Lazy;
use regex::Regex;
use tracing::error;

use crate::mcp::error::QueryError;
use crate::mcp::types::ExecuteSqlParams;

/// Statements allowed in read-only mode.
static READ_PATTERNS: Lazy<Result<Vec<Regex>, String>> = Lazy::new(|| {
    compile_all(&[
        r"(?i)^SELECT\s",
        r"(?i)^SHOW\s",
        r"(?i)^DESCRIBE\s",
        r"(?i)^DESC\s",
        r"(?i)^EXPLAIN\s",
        r"(?is)^WITH\s+.*\s+SELECT\s",
    ])
});

/// Write verbs rejected anywhere in a read-only statement.
static WRITE_PATTERNS: Lazy<Result<Vec<Regex>, String>> = Lazy::new(|| {
    compile_all(&[
        r"(?i)\bINSERT\s+INTO\b",
        r"(?i)\bUPDATE\s+",
        r"(?i)\bDELETE\s+FROM\b",
        r"(?i)\bDROP\s+",
        r"(?i)\bCREATE\s+",
        r"(?i)\bALTER\s+",
        r"(?i)\bTRUNCATE\s+",
        r"(?i)\bRENAME\s+",
        r"(?i)\bREPLACE\s+INTO\b",
        r"(?i)\bMERGE\s+INTO\b",
        r"(?i)\bGRANT\s+",
        r"(?i)\bREVOKE\s+",
    ])
});

static LIMIT_CLAUSE: Lazy<Result<Regex, String>> = Lazy::new(|| compile(r"(?i)\bLIMIT\s+\d+"));

fn compile(pattern: &str) -> Result<Regex, String> {
    Regex::new(pattern).map_err(|e| {
        error!(pattern = %pattern, error = %e, "Invalid SQL pattern");
        e.to_string()
    })
}

/// All or nothing: one bad pattern disables the whole set.
fn compile_all(patterns: &[&str]) -> Result<Vec<Regex>, String> {
    patterns.iter().map(|p| compile(p)).collect()
}

fn loaded<T>(patterns: &'static Result<T, String>) -> Result<&'static T, QueryError> {
    patterns
        .as_ref()
        .map_err(|e| QueryError::Pattern(e.clone()))
}

/// `LIMIT`/`OFFSET` pair appended to a statement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pagination {
    pub limit: i64,
    pub offset: i64,
}

/// Requested pagination, before validation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PaginationSpec {
    pub max_rows: Option<i64>,
    pub offset: Option<i64>,
    pub page: Option<i64>,
    pub per_page: Option<i64>,
}

/// Whether `sql` is a read statement with no nested write verb.
pub fn is_read_only(sql: &str) -> bool {
    validate_read_only(sql).is_ok()
}

pub fn validate_read_only(sql: &str) -> Result<(), QueryError> {
    let read = loaded(&READ_PATTERNS)?;
    let write = loaded(&WRITE_PATTERNS)?;
    let normalized = sql.trim();

    if read.iter().any(|p| p.is_match(normalized)) && !write.iter().any(|p| p.is_match(normalized))
    {
        Ok(())
    } else {
        Err(QueryError::NotReadOnly)
    }
}

pub fn compute_pagination(spec: &PaginationSpec) -> Result<Option<Pagination>, QueryError> {
    if let (Some(page), Some(per_page)) = (spec.page, spec.per_page) {
        if page < 1 {
            return Err(QueryError::InvalidPage);
        }
        if per_page < 1 {
            return Err(QueryError::InvalidPerPage);
        }
        return Ok(Some(Pagination {
            limit: per_page,
            offset: (page - 1).saturating_mul(per_page),
        }));
    }

    if let (Some(offset), Some(max_rows)) = (spec.offset, spec.max_rows) {
        if offset < 0 {
            return Err(QueryError::InvalidOffset);
        }
        if max_rows < 1 {
            return Err(QueryError::InvalidMaxRows);
        }
        return Ok(Some(Pagination {
            limit: max_rows,
            offset,
        }));
    }

    if let Some(max_rows) = spec.max_rows {
        if max_rows < 1 {
            return Err(QueryError::InvalidMaxRows);
        }
        return Ok(Some(Pagination {
            limit: max_rows,
            offset: 0,
        }));
    }

    Ok(None)
}

/// Append `LIMIT n OFFSET m`, dropping one trailing `;`.
pub fn append_pagination(sql: &str, pagination: Pagination) -> Result<String, QueryError> {
    if loaded(&LIMIT_CLAUSE)?.is_match(sql) {
        return Err(QueryError::LimitConflict);
    }

    let trimmed = sql.trim();
    let statement = trimmed.strip_suffix(';').unwrap_or(trimmed);

    Ok(format!(
        "{} LIMIT {} OFFSET {}",
        statement, pagination.limit, pagination.offset
    ))
}

/// Applies the server's read-only and row-cap policy to `execute_sql` calls.
#[derive(Debug, Clone, Copy, Default)]
pub struct QueryExecutor {
    readonly: bool,
    max_rows: Option<i64>,
}

impl QueryExecutor {
    pub fn new(readonly: bool, max_rows: Option<i64>) -> Self {
        Self { readonly, max_rows }
    }

    pub fn readonly(&self) -> bool {
        self.readonly
    }

    /// Validate and rewrite the statement about to be sent to the database.
    pub fn prepare(&self, params: &ExecuteSqlParams) -> Result<String, QueryError> {
        if self.readonly {
            validate_read_only(&params.sql)?;
        }

        let spec = PaginationSpec {
            max_rows: params.max_rows.filter(|n| *n != 0).or(self.max_rows),
            offset: params.offset,
            page: params.page,
            per_page: params.per_page,
        };

        match compute_pagination(&spec)? {
            Some(pagination) => append_pagination(&params.sql, pagination),
            None => Ok(params.sql.clone()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    mod read_only {
        use super::*;

        #[test]
        fn test_allows_read_statements() {
            for sql in [
                "SELECT * FROM users",
                "  select id from users  ",
                "SHOW TABLES",
                "DESCRIBE users",
                "DESC users",
                "EXPLAIN SELECT * FROM users",
                "WITH recent AS (SELECT * FROM orders) SELECT * FROM recent",
                "WITH recent AS (\n  SELECT * FROM orders\n)\nSELECT * FROM recent",
            ] {
                assert!(is_read_only(sql), "should allow: {}", sql);
            }
        }

        #[test]
        fn test_rejects_write_statements() {
            for sql in [
                "INSERT INTO users (name) VALUES ('a')",
                "UPDATE users SET name = 'a'",
                "DELETE FROM users",
                "DROP TABLE users",
                "CREATE TABLE t (id int)",
                "ALTER TABLE users ADD COLUMN x int",
                "TRUNCATE users",
                "GRANT ALL ON users TO bob",
            ] {
                assert!(!is_read_only(sql), "should reject: {}", sql);
            }
        }

        #[test]
        fn test_rejects_nested_write() {
            let err =
                validate_read_only("SELECT * FROM users WHERE id IN (DELETE FROM temp)").unwrap_err();
            assert_eq!(err, QueryError::NotReadOnly);
        }

        #[test]
        fn test_rejects_select_without_whitespace_boundary() {
            assert!(!is_read_only("SELECT"));
        }

        #[test]
        fn test_bad_pattern_fails_the_whole_set() {
            assert!(compile(r"(?i)\bLIMIT\s+\d+").is_ok());
            assert!(compile_all(&[r"(?i)^SELECT\s", r"(unclosed"]).is_err());
        }

        #[test]
        fn test_unavailable_patterns_refuse_statements() {
            static BROKEN: Lazy<Result<Vec<Regex>, String>> =
                Lazy::new(|| compile_all(&[r"[z-a]"]));

            assert!(matches!(loaded(&BROKEN), Err(QueryError::Pattern(_))));
            assert!(loaded(&READ_PATTERNS).is_ok());
            assert!(loaded(&WRITE_PATTERNS).is_ok());
            assert!(loaded(&LIMIT_CLAUSE).is_ok());
        }
    }

    mod pagination {
        use super::*;

        fn spec(
            max_rows: Option<i64>,
            offset: Option<i64>,
            page: Option<i64>,
            per_page: Option<i64>,
        ) -> PaginationSpec {
            PaginationSpec {
                max_rows,
                offset,
                page,
                per_page,
            }
        }

        #[test]
        fn test_page_per_page_wins() {
            let result = compute_pagination(&spec(Some(20), Some(5), Some(2), Some(10))).unwrap();
            assert_eq!(result, Some(Pagination { limit: 10, offset: 10 }));
        }

        #[test]
        fn test_offset_and_max_rows() {
            let result = compute_pagination(&spec(Some(20), Some(10), None, None)).unwrap();
            assert_eq!(result, Some(Pagination { limit: 20, offset: 10 }));
        }

        #[test]
        fn test_max_rows_only() {
            let result = compute_pagination(&spec(Some(50), None, None, None)).unwrap();
            assert_eq!(result, Some(Pagination { limit: 50, offset: 0 }));
        }

        #[test]
        fn test_page_without_per_page_is_ignored() {
            assert_eq!(compute_pagination(&spec(None, None, Some(3), None)).unwrap(), None);
        }

        #[test]
        fn test_no_pagination() {
            assert_eq!(compute_pagination(&PaginationSpec::default()).unwrap(), None);
        }

        #[test]
        fn test_validation_errors() {
            assert_eq!(
                compute_pagination(&spec(None, None, Some(0), Some(10))),
                Err(QueryError::InvalidPage)
            );
            assert_eq!(
                compute_pagination(&spec(None, None, Some(1), Some(-5))),
                Err(QueryError::InvalidPerPage)
            );
            assert_eq!(
                compute_pagination(&spec(Some(10), Some(-1), None, None)),
                Err(QueryError::InvalidOffset)
            );
            assert_eq!(
                compute_pagination(&spec(Some(0), None, None, None)),
                Err(QueryError::InvalidMaxRows)
            );
        }
    }

    mod append {
        use super::*;

        const FIRST_TEN: Pagination = Pagination { limit: 10, offset: 0 };

        #[test]
        fn test_appends_limit_and_offset() {
            assert_eq!(
                append_pagination("SELECT * FROM users", FIRST_TEN).unwrap(),
                "SELECT * FROM users LIMIT 10 OFFSET 0"
            );
        }

        #[test]
        fn test_strips_trailing_semicolon_and_whitespace() {
            assert_eq!(
                append_pagination("  SELECT * FROM t;  ", FIRST_TEN).unwrap(),
                "SELECT * FROM t LIMIT 10 OFFSET 0"
            );
        }

        #[test]
        fn test_existing_limit_conflicts() {
            assert_eq!(
                append_pagination("SELECT * FROM t LIMIT 5", FIRST_TEN),
                Err(QueryError::LimitConflict)
            );
            assert_eq!(
                append_pagination("select * from t limit 5", FIRST_TEN),
                Err(QueryError::LimitConflict)
            );
        }

        #[test]
        fn test_limit_word_in_identifier_is_fine() {
            assert!(append_pagination("SELECT rate_limit FROM plans", FIRST_TEN).is_ok());
        }
    }

    mod executor {
        use super::*;

        fn params(sql: &str) -> ExecuteSqlParams {
            ExecuteSqlParams {
                sql: sql.to_string(),
                ..Default::default()
            }
        }

        #[test]
        fn test_global_max_rows_applies_when_absent() {
            let executor = QueryExecutor::new(false, Some(100));
            assert_eq!(
                executor.prepare(&params("SELECT 1")).unwrap(),
                "SELECT 1 LIMIT 100 OFFSET 0"
            );
        }

        #[test]
        fn test_zero_max_rows_falls_back_to_global() {
            let executor = QueryExecutor::new(false, Some(25));
            let mut call = params("SELECT 1");
            call.max_rows = Some(0);
            assert_eq!(executor.prepare(&call).unwrap(), "SELECT 1 LIMIT 25 OFFSET 0");
        }

        #[test]
        fn test_call_max_rows_beats_global() {
            let executor = QueryExecutor::new(false, Some(25));
            let mut call = params("SELECT 1");
            call.max_rows = Some(5);
            assert_eq!(executor.prepare(&call).unwrap(), "SELECT 1 LIMIT 5 OFFSET 0");
        }

        #[test]
        fn test_no_pagination_leaves_sql_untouched() {
            let executor = QueryExecutor::new(false, None);
            assert_eq!(
                executor.prepare(&params("SELECT * FROM t LIMIT 5;")).unwrap(),
                "SELECT * FROM t LIMIT 5;"
            );
        }

        #[test]
        fn test_readonly_rejects_writes_before_pagination() {
            let executor = QueryExecutor::new(true, Some(10));
            assert_eq!(
                executor.prepare(&params("DELETE FROM users")),
                Err(QueryError::NotReadOnly)
            );
        }

        #[test]
        fn test_writes_allowed_when_not_readonly() {
            let executor = QueryExecutor::new(false, None);
            assert!(executor.prepare(&params("DELETE FROM users")).is_ok());
        }
    }
}
