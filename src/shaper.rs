//! Classification of query text into transport shapes.
//!
//! Queries are opaque text; only the leading keyword and a handful of
//! clauses are inspected, in a fixed priority order.

use std::sync::LazyLock;

use regex::Regex;
use reqwest::Method;

use crate::format::{canonical_name, FORMAT_NAMES};

static FORMAT_CLAUSE: LazyLock<Regex> = LazyLock::new(|| {
    let mut names = FORMAT_NAMES.to_vec();
    names.sort_by_key(|name| std::cmp::Reverse(name.len()));
    Regex::new(&format!(r"(?i)\bFORMAT\s+({})\b", names.join("|"))).expect("constant pattern")
});

static SELECT_LIKE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^(?:SELECT|WITH|SHOW|DESC|DESCRIBE|EXISTS\s+TABLE)\b")
        .expect("constant pattern")
});

static INSERT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^INSERT\b").expect("constant pattern"));

static VALUES: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\s+VALUES\b").expect("constant pattern"));

static VALUES_TRAILING: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\s+VALUES\s*$").expect("constant pattern"));

static INSERT_SELECT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)^INSERT\s+INTO\s+\S+\s+(?:\([^)]+\)\s*)?SELECT\b").expect("constant pattern")
});

static ANY_FORMAT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bFORMAT\b").expect("constant pattern"));

/// Format used for streamed inserts without a `FORMAT` clause; only `\t`,
/// `\\` and `\n` need escaping.
const STREAMED_INSERT_FORMAT: &str = "TabSeparated";

/// Shape of a query as far as the transport is concerned.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum QueryKind {
    /// `SELECT`, `WITH`, `SHOW`, `DESC[RIBE]`, `EXISTS TABLE`.
    SelectLike,
    /// `INSERT ... VALUES (...)` with the values in the query text.
    InsertValuesInline,
    /// `INSERT ... VALUES` with literal rows streamed after the query.
    InsertValuesStreamed,
    /// `INSERT INTO t [(cols)] SELECT ...`.
    InsertSelect,
    /// `INSERT` expecting formatted rows streamed after the query.
    InsertStreamedRows,
    /// DDL and everything else.
    Other,
}

impl QueryKind {
    /// Whether the request body stays open for rows written by the caller.
    pub fn is_streamed(self) -> bool {
        matches!(self, Self::InsertValuesStreamed | Self::InsertStreamedRows)
    }
}

/// Where the query text travels.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Transmission {
    /// `query` URL parameter of a `GET`.
    QueryString,
    /// Body of a `POST`.
    Body,
}

/// Caller choices that influence shaping, already merged across the
/// connection and the call.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct QuerySettings {
    pub format: Option<String>,
    pub omit_format: bool,
    pub data_objects: bool,
    pub readonly: bool,
}

/// Fully shaped query, immutable once built.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct QueryRequest {
    /// Trimmed query text as given by the caller.
    pub raw_text: String,
    pub kind: QueryKind,
    /// Response format, or input format for streamed inserts.
    pub format: Option<String>,
    /// Whether the `FORMAT` clause is left out of [`QueryRequest::sql`].
    pub omit_format: bool,
    pub readonly: bool,
    pub transmission: Transmission,
    /// Final query text sent to the server.
    pub sql: String,
}

impl QueryRequest {
    pub fn method(&self) -> Method {
        match self.transmission {
            Transmission::QueryString => Method::GET,
            Transmission::Body => Method::POST,
        }
    }

    /// Whether the request is complete without rows from the caller.
    pub fn is_finalized(&self) -> bool {
        !self.kind.is_streamed()
    }
}

/// Classifies `sql` and builds the request text.
pub fn shape_query(sql: &str, settings: &QuerySettings) -> QueryRequest {
    let raw_text = sql.trim();
    let mut format = settings.format.clone();
    let mut omit_format = settings.omit_format;

    if !omit_format {
        if let Some(caps) = FORMAT_CLAUSE.captures(raw_text) {
            format = canonical_name(&caps[1]).map(str::to_owned);
            omit_format = true;
        }
    }

    let mut line_ending = "";
    let kind = if SELECT_LIKE.is_match(raw_text) {
        if format.is_none() {
            let default = if settings.data_objects {
                "JSON"
            } else {
                "JSONCompact"
            };
            format = Some(default.to_owned());
        }
        QueryKind::SelectLike
    } else if INSERT.is_match(raw_text) {
        if VALUES.is_match(raw_text) {
            format = Some("Values".to_owned());
            omit_format = true;
            if VALUES_TRAILING.is_match(raw_text) {
                QueryKind::InsertValuesStreamed
            } else {
                QueryKind::InsertValuesInline
            }
        } else if INSERT_SELECT.is_match(raw_text) {
            omit_format = true;
            QueryKind::InsertSelect
        } else {
            line_ending = "\n";
            if ANY_FORMAT.is_match(raw_text) {
                omit_format = true;
            } else if format.is_none() {
                format = Some(STREAMED_INSERT_FORMAT.to_owned());
            }
            QueryKind::InsertStreamedRows
        }
    } else {
        omit_format = true;
        QueryKind::Other
    };

    let mut composed = raw_text.to_owned();
    if let (false, Some(format)) = (omit_format, format.as_deref()) {
        composed.push_str(" FORMAT ");
        composed.push_str(format);
    }
    composed.push_str(line_ending);

    let transmission = if settings.readonly {
        Transmission::QueryString
    } else {
        Transmission::Body
    };

    QueryRequest {
        raw_text: raw_text.to_owned(),
        kind,
        format,
        omit_format,
        readonly: settings.readonly,
        transmission,
        sql: composed,
    }
}

#[cfg(test)]
mod tests {
    use reqwest::Method;

    use super::{shape_query, QueryKind, QuerySettings, Transmission};
    use crate::format::FORMAT_NAMES;

    fn shape(sql: &str) -> super::QueryRequest {
        shape_query(sql, &QuerySettings::default())
    }

    #[test]
    fn trailing_format_clause_is_adopted_for_every_name() {
        for name in FORMAT_NAMES {
            let sql = format!("SELECT * FROM t FORMAT {name}");
            let request = shape(&sql);
            assert_eq!(request.format.as_deref(), Some(*name), "{sql}");
            assert!(request.omit_format);
            assert_eq!(request.sql, sql);
        }
    }

    #[test]
    fn format_clause_is_matched_case_insensitively() {
        let request = shape("select 1 format jsoneachrow");
        assert_eq!(request.format.as_deref(), Some("JSONEachRow"));
        assert_eq!(request.sql, "select 1 format jsoneachrow");
    }

    #[test]
    fn names_and_types_variants_are_not_shadowed_by_shorter_names() {
        for name in [
            "JSONEachRowWithNamesAndTypes",
            "JSONCompactEachRowWithNamesAndTypes",
        ] {
            let sql = format!("SELECT 1 FORMAT {name}");
            let request = shape(&sql);
            assert_eq!(request.format.as_deref(), Some(name));
            assert_eq!(request.sql, sql);
        }
    }

    #[test]
    fn forced_omit_format_skips_clause_detection() {
        let request = shape_query(
            "SELECT 1 FORMAT CSV",
            &QuerySettings {
                omit_format: true,
                ..QuerySettings::default()
            },
        );
        assert_eq!(request.format.as_deref(), Some("JSONCompact"));
        assert_eq!(request.sql, "SELECT 1 FORMAT CSV");
    }

    #[test]
    fn select_like_defaults() {
        for sql in [
            "SELECT 1",
            "  with x as (select 1) select * from x",
            "SHOW DATABASES",
            "DESC t",
            "DESCRIBE TABLE t",
            "EXISTS TABLE t",
        ] {
            let request = shape(sql);
            assert_eq!(request.kind, QueryKind::SelectLike, "{sql}");
            assert_eq!(request.format.as_deref(), Some("JSONCompact"));
            assert!(request.sql.ends_with(" FORMAT JSONCompact"));
        }

        let request = shape_query(
            "SELECT 1",
            &QuerySettings {
                data_objects: true,
                ..QuerySettings::default()
            },
        );
        assert_eq!(request.format.as_deref(), Some("JSON"));
        assert_eq!(request.sql, "SELECT 1 FORMAT JSON");
    }

    #[test]
    fn insert_values_trailing_stays_open() {
        let request = shape("INSERT INTO t VALUES");
        assert_eq!(request.kind, QueryKind::InsertValuesStreamed);
        assert_eq!(request.format.as_deref(), Some("Values"));
        assert!(!request.is_finalized());
        assert_eq!(request.sql, "INSERT INTO t VALUES");
    }

    #[test]
    fn insert_format_values_stays_open() {
        let request = shape("INSERT INTO t FORMAT Values");
        assert_eq!(request.kind, QueryKind::InsertValuesStreamed);
        assert_eq!(request.format.as_deref(), Some("Values"));
    }

    #[test]
    fn insert_values_inline_is_self_contained() {
        let request = shape("INSERT INTO t VALUES (1),(2),(3)");
        assert_eq!(request.kind, QueryKind::InsertValuesInline);
        assert!(request.is_finalized());
        assert!(request.omit_format);
        assert_eq!(request.sql, "INSERT INTO t VALUES (1),(2),(3)");
    }

    #[test]
    fn insert_select() {
        for sql in [
            "INSERT INTO t SELECT * FROM s",
            "INSERT INTO t (a, b) SELECT a, b FROM s",
            "insert into db.t\n(a)\nselect 1",
        ] {
            let request = shape(sql);
            assert_eq!(request.kind, QueryKind::InsertSelect, "{sql}");
            assert!(request.is_finalized());
            assert_eq!(request.sql, sql.trim());
        }
    }

    #[test]
    fn streamed_insert_defaults_to_tab_separated() {
        let request = shape("INSERT INTO t");
        assert_eq!(request.kind, QueryKind::InsertStreamedRows);
        assert_eq!(request.format.as_deref(), Some("TabSeparated"));
        assert!(!request.omit_format);
        assert_eq!(request.sql, "INSERT INTO t FORMAT TabSeparated\n");
    }

    #[test]
    fn streamed_insert_with_format_option() {
        let request = shape_query(
            "INSERT INTO t",
            &QuerySettings {
                format: Some("JSONEachRow".to_owned()),
                ..QuerySettings::default()
            },
        );
        assert_eq!(request.sql, "INSERT INTO t FORMAT JSONEachRow\n");
    }

    #[test]
    fn streamed_insert_with_format_clause_keeps_it() {
        let request = shape("INSERT INTO t FORMAT CSV");
        assert_eq!(request.kind, QueryKind::InsertStreamedRows);
        assert_eq!(request.format.as_deref(), Some("CSV"));
        assert_eq!(request.sql, "INSERT INTO t FORMAT CSV\n");
    }

    #[test]
    fn other_statements_omit_format() {
        let request = shape("CREATE TABLE t (a UInt8) ENGINE = Memory");
        assert_eq!(request.kind, QueryKind::Other);
        assert!(request.omit_format);
        assert_eq!(request.format, None);
        assert_eq!(request.sql, "CREATE TABLE t (a UInt8) ENGINE = Memory");
    }

    #[test]
    fn readonly_uses_get_and_query_string() {
        let request = shape_query(
            "SELECT 1",
            &QuerySettings {
                readonly: true,
                ..QuerySettings::default()
            },
        );
        assert_eq!(request.transmission, Transmission::QueryString);
        assert_eq!(request.method(), Method::GET);
        assert_eq!(shape("SELECT 1").method(), Method::POST);
    }
}
