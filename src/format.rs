//! Output format names recognized in `FORMAT` clauses.

/// Format names that a `FORMAT <name>` clause is matched against.
pub const FORMAT_NAMES: &[&str] = &[
    "BlockTabSeparated",
    "CSV",
    "CSVWithNames",
    "JSON",
    "JSONCompact",
    "JSONEachRow",
    "JSONCompactEachRow",
    "JSONEachRowWithProgress",
    "JSONEachRowWithNamesAndTypes",
    "JSONCompactEachRowWithProgress",
    "JSONCompactEachRowWithNamesAndTypes",
    "Native",
    "Null",
    "Pretty",
    "PrettyCompact",
    "PrettyCompactMonoBlock",
    "PrettyNoEscapes",
    "PrettyCompactNoEscapes",
    "PrettySpaceNoEscapes",
    "PrettySpace",
    "RowBinary",
    "TabSeparated",
    "TabSeparatedRaw",
    "TabSeparatedWithNames",
    "TabSeparatedWithNamesAndTypes",
    "TSKV",
    "Values",
    "Vertical",
    "XML",
];

/// Returns the canonical spelling of a known format name.
pub fn canonical_name(name: &str) -> Option<&'static str> {
    FORMAT_NAMES
        .iter()
        .copied()
        .find(|known| known.eq_ignore_ascii_case(name))
}

/// How a response body in a given format is decoded.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FormatFamily {
    /// `{ "meta": [...], "data": [...], ... }` documents.
    Document,
    /// One JSON value per line.
    EachRow(EachRowFlavor),
    /// Anything else; the body is handed back as text.
    Opaque,
}

/// Variations of the row-delimited JSON formats.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct EachRowFlavor {
    pub compact: bool,
    pub with_progress: bool,
    /// Leading names and types lines before the first row.
    pub with_names_and_types: bool,
}

impl FormatFamily {
    pub fn of(format: Option<&str>) -> Self {
        let Some(format) = format else {
            return Self::Opaque;
        };
        if format.contains("EachRow") {
            let compact = format.contains("Compact");
            return Self::EachRow(EachRowFlavor {
                compact,
                with_progress: format.contains("WithProgress"),
                with_names_and_types: format.contains("WithNamesAndTypes"),
            });
        }
        if format.starts_with("JSON") {
            return Self::Document;
        }
        Self::Opaque
    }

    pub fn is_json(self) -> bool {
        !matches!(self, Self::Opaque)
    }
}

/// Formats whose bodies must parse as JSON; other formats fall back to
/// raw text when they do not.
pub fn requires_json(format: Option<&str>) -> bool {
    matches!(format, Some("JSON") | Some("JSONCompact"))
}

#[cfg(test)]
mod tests {
    use super::{canonical_name, requires_json, EachRowFlavor, FormatFamily};

    #[test]
    fn canonical_name_is_case_insensitive() {
        assert_eq!(canonical_name("jsoncompact"), Some("JSONCompact"));
        assert_eq!(canonical_name("tskv"), Some("TSKV"));
        assert_eq!(canonical_name("Parquet"), None);
    }

    #[test]
    fn families() {
        assert_eq!(FormatFamily::of(Some("JSON")), FormatFamily::Document);
        assert_eq!(FormatFamily::of(Some("JSONCompact")), FormatFamily::Document);
        assert_eq!(FormatFamily::of(Some("CSV")), FormatFamily::Opaque);
        assert_eq!(FormatFamily::of(None), FormatFamily::Opaque);
        assert_eq!(
            FormatFamily::of(Some("JSONCompactEachRowWithNamesAndTypes")),
            FormatFamily::EachRow(EachRowFlavor {
                compact: true,
                with_progress: false,
                with_names_and_types: true,
            })
        );
        assert_eq!(
            FormatFamily::of(Some("JSONEachRowWithProgress")),
            FormatFamily::EachRow(EachRowFlavor {
                compact: false,
                with_progress: true,
                with_names_and_types: false,
            })
        );
    }

    #[test]
    fn only_document_formats_require_json() {
        assert!(requires_json(Some("JSON")));
        assert!(requires_json(Some("JSONCompact")));
        assert!(!requires_json(Some("JSONEachRow")));
        assert!(!requires_json(None));
    }
}
