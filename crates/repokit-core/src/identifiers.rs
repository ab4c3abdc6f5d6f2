//! Identifier validation and quoting.

use std::sync::OnceLock;

use regex::Regex;

fn identifier_regex() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").ok())
        .as_ref()
}

/// Is `name` usable as an entity, field or association name?
///
/// Names must start with a letter or underscore and contain only ASCII
/// letters, digits and underscores. Dots are reserved for association paths.
pub fn is_identifier(name: &str) -> bool {
    identifier_regex().is_some_and(|re| re.is_match(name))
}

/// Quote an identifier using ANSI double-quoting.
///
/// Embedded double-quotes are escaped by doubling them.
///
/// ```
/// use repokit_core::quote_ident;
///
/// assert_eq!(quote_ident("member"), "\"member\"");
/// assert_eq!(quote_ident("user\"name"), "\"user\"\"name\"");
/// ```
#[inline]
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Quote an identifier using MySQL backtick quoting.
///
/// ```
/// use repokit_core::quote_ident_mysql;
///
/// assert_eq!(quote_ident_mysql("member"), "`member`");
/// assert_eq!(quote_ident_mysql("user`name"), "`user``name`");
/// ```
#[inline]
pub fn quote_ident_mysql(name: &str) -> String {
    format!("`{}`", name.replace('`', "``"))
}
