use querygate_shared::StatementType;

/// Leading keywords, checked in order. `DESCRIBE` precedes `DESC` so the
/// longer spelling always wins.
const KEYWORDS: &[(&str, StatementType)] = &[
    ("SELECT", StatementType::Select),
    ("INSERT", StatementType::Insert),
    ("UPDATE", StatementType::Update),
    ("DELETE", StatementType::Delete),
    ("DROP", StatementType::Drop),
    ("CREATE", StatementType::Create),
    ("ALTER", StatementType::Alter),
    ("TRUNCATE", StatementType::Truncate),
    ("SHOW", StatementType::Show),
    ("DESCRIBE", StatementType::Describe),
    ("DESC", StatementType::Describe),
    ("EXPLAIN", StatementType::Explain),
    ("WITH", StatementType::With),
];

/// Tags a statement by its leading keyword. Total: anything unrecognised is
/// `Unknown`.
#[must_use]
pub fn classify(query: &str) -> StatementType {
    let normalized = query.trim().to_ascii_uppercase();

    for (keyword, ty) in KEYWORDS {
        if let Some(rest) = normalized.strip_prefix(keyword) {
            if rest.starts_with(|c: char| c.is_ascii_whitespace()) {
                return *ty;
            }
        }
    }
    StatementType::Unknown
}

/// Whether a data-changing keyword appears as a whole word anywhere in the
/// text. Catches writes nested in a `WITH` or behind a leading `SELECT`.
#[must_use]
pub fn mentions_write(query: &str) -> bool {
    query
        .split(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
        .any(|word| {
            ["INSERT", "UPDATE", "DELETE", "MERGE"]
                .iter()
                .any(|kw| word.eq_ignore_ascii_case(kw))
        })
}
