//! Raw property sources.
//!
//! # Invariants
//!
//! - Sources are immutable after construction
//! - A source never parses values; typed parsing happens in `ConfigurationView`

use std::collections::HashMap;
use std::ffi::OsString;
use std::iter::Peekable;
use std::path::{Path, PathBuf};
use std::str::Chars;

use super::ConfigError;

/// A provider of raw, untyped property values.
pub trait PropertySource: std::fmt::Debug + Send + Sync {
    /// Raw value for `name`, if this source defines it.
    fn value(&self, name: &str) -> Option<String>;

    /// Short human-readable description used in log output.
    fn describe(&self) -> String;
}

/// Properties read from a `key=value` file.
///
/// The format follows Java `.properties` files:
/// - `#` and `!` start comment lines
/// - the key ends at the first unescaped `=`, `:` or whitespace
/// - whitespace around the separator and before the value is skipped
/// - `\\`, `\=`, `\:`, `\ `, `\t`, `\n`, `\r`, `\f` and `\uXXXX` are unescaped
/// - a line ending in an odd number of backslashes joins the next line
#[derive(Debug, Clone)]
pub struct FileProperties {
    path: PathBuf,
    properties: HashMap<String, String>,
}

impl FileProperties {
    /// Read and parse the file at `path`.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Io` if the file cannot be read.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(Self {
            path: path.to_path_buf(),
            properties: parse_properties(&contents),
        })
    }

    /// Number of properties defined by the file.
    #[must_use]
    pub fn len(&self) -> usize {
        self.properties.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.properties.is_empty()
    }

    /// All key/value pairs, in no particular order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.properties
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

impl PropertySource for FileProperties {
    fn value(&self, name: &str) -> Option<String> {
        self.properties.get(name).cloned()
    }

    fn describe(&self) -> String {
        format!("file {}", self.path.display())
    }
}

/// Returns true if `line` ends in an odd number of backslashes.
fn continues(line: &str) -> bool {
    line.chars().rev().take_while(|&c| c == '\\').count() % 2 == 1
}

/// Whitespace as `.properties` files define it.
const fn is_blank(c: char) -> bool {
    matches!(c, ' ' | '\t' | '\x0c')
}

fn parse_properties(contents: &str) -> HashMap<String, String> {
    let mut properties = HashMap::new();
    let mut pending = String::new();

    for line in contents.lines() {
        let line = line.trim_start_matches(is_blank);

        if pending.is_empty() && (line.is_empty() || line.starts_with('#') || line.starts_with('!'))
        {
            continue;
        }

        if continues(line) {
            pending.push_str(&line[..line.len() - 1]);
            continue;
        }

        pending.push_str(line);
        let logical = std::mem::take(&mut pending);
        insert_line(&mut properties, &logical);
    }

    // A continuation on the final line still yields a property
    if !pending.is_empty() {
        insert_line(&mut properties, &pending);
    }

    properties
}

fn insert_line(properties: &mut HashMap<String, String>, line: &str) {
    let mut chars = line.chars().peekable();

    let mut key = String::new();
    while let Some(c) = chars.next_if(|&c| c != '=' && c != ':' && !is_blank(c)) {
        if c == '\\' {
            unescape_next(&mut chars, &mut key);
        } else {
            key.push(c);
        }
    }

    while chars.next_if(|&c| is_blank(c)).is_some() {}
    if chars.next_if(|&c| c == '=' || c == ':').is_some() {
        while chars.next_if(|&c| is_blank(c)).is_some() {}
    }

    let mut value = String::new();
    while let Some(c) = chars.next() {
        if c == '\\' {
            unescape_next(&mut chars, &mut value);
        } else {
            value.push(c);
        }
    }

    if key.is_empty() {
        return;
    }
    properties.insert(key, value);
}

/// Decode the escape following a backslash into `out`.
///
/// Unknown escapes yield the escaped character itself. A malformed `\u`
/// escape is kept literally.
fn unescape_next(chars: &mut Peekable<Chars<'_>>, out: &mut String) {
    let Some(c) = chars.next() else {
        return;
    };
    match c {
        't' => out.push('\t'),
        'n' => out.push('\n'),
        'r' => out.push('\r'),
        'f' => out.push('\x0c'),
        'u' => {
            let mut digits = String::with_capacity(4);
            while digits.len() < 4
                && let Some(digit) = chars.next_if(char::is_ascii_hexdigit)
            {
                digits.push(digit);
            }
            match u32::from_str_radix(&digits, 16).ok().and_then(char::from_u32) {
                Some(decoded) if digits.len() == 4 => out.push(decoded),
                _ => {
                    out.push('u');
                    out.push_str(&digits);
                }
            }
        }
        other => out.push(other),
    }
}

/// Properties read from environment variables.
///
/// The property `foo-bar` is read from the variable `FOO_BAR`.
#[derive(Debug, Clone, Default)]
pub struct EnvironmentProperties {
    variables: HashMap<String, String>,
}

impl EnvironmentProperties {
    /// Snapshot the current process environment.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::MalformedEnvironment` if a variable name is
    /// empty or contains `=`.
    pub fn from_process() -> Result<Self, ConfigError> {
        Self::from_vars(std::env::vars_os())
    }

    /// Build from an explicit list of variables.
    ///
    /// Variables whose name or value is not valid Unicode cannot name a
    /// property; they are logged and skipped.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::MalformedEnvironment` if a variable name is
    /// empty or contains `=`.
    pub fn from_vars<I, K, V>(vars: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<OsString>,
        V: Into<OsString>,
    {
        let mut variables = HashMap::new();
        for (name, value) in vars {
            let name = match name.into().into_string() {
                Ok(name) => name,
                Err(name) => {
                    tracing::warn!(
                        "Ignoring environment variable {}: name is not valid unicode",
                        name.to_string_lossy()
                    );
                    continue;
                }
            };
            if name.is_empty() || name.contains('=') {
                return Err(ConfigError::MalformedEnvironment(format!(
                    "invalid variable name \"{name}\""
                )));
            }
            let Ok(value) = value.into().into_string() else {
                tracing::warn!("Ignoring environment variable {name}: value is not valid unicode");
                continue;
            };
            variables.insert(name, value);
        }
        Ok(Self { variables })
    }

    /// Environment variable name for a property name.
    #[must_use]
    pub fn variable_name(property_name: &str) -> String {
        property_name.to_ascii_uppercase().replace('-', "_")
    }
}

impl PropertySource for EnvironmentProperties {
    fn value(&self, name: &str) -> Option<String> {
        self.variables.get(&Self::variable_name(name)).cloned()
    }

    fn describe(&self) -> String {
        "environment variables".to_string()
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    fn write_file(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().expect("create temp file");
        file.write_all(contents.as_bytes()).expect("write temp file");
        file
    }

    #[test]
    fn test_parse_basic_and_comments() {
        let file = write_file(
            "# comment\n\
             ! also a comment\n\
             \n\
             foo=1\n\
             bar : two words\n\
             baz\n\
             enable-environment-properties = true\n",
        );
        let properties = FileProperties::load(file.path()).expect("load");

        assert_eq!(properties.value("foo").as_deref(), Some("1"));
        assert_eq!(properties.value("bar").as_deref(), Some("two words"));
        assert_eq!(properties.value("baz").as_deref(), Some(""));
        assert_eq!(
            properties.value("enable-environment-properties").as_deref(),
            Some("true")
        );
        assert_eq!(properties.value("# comment"), None);
        assert_eq!(properties.len(), 4);
    }

    #[test]
    fn test_whitespace_separates_key_from_value() {
        let file = write_file(
            "enable-environment-properties true\n\
             foo 1\n\
             \tbar\t  =  two\n\
             baz:\tthree\n",
        );
        let properties = FileProperties::load(file.path()).expect("load");

        assert_eq!(
            properties.value("enable-environment-properties").as_deref(),
            Some("true")
        );
        assert_eq!(properties.value("foo").as_deref(), Some("1"));
        assert_eq!(properties.value("bar").as_deref(), Some("two"));
        assert_eq!(properties.value("baz").as_deref(), Some("three"));
        assert_eq!(properties.value("foo 1"), None);
    }

    #[test]
    fn test_escapes_are_decoded() {
        let file = write_file(
            "path=C:\\\\data\n\
             key\\=x=y\n\
             a\\:b:c\n\
             with\\ space = v\n\
             tabs=1\\t2\\n3\n\
             unicode=caf\\u00e9\n\
             broken=\\u12\n\
             other=\\q\n",
        );
        let properties = FileProperties::load(file.path()).expect("load");

        assert_eq!(properties.value("path").as_deref(), Some("C:\\data"));
        assert_eq!(properties.value("key=x").as_deref(), Some("y"));
        assert_eq!(properties.value("a:b").as_deref(), Some("c"));
        assert_eq!(properties.value("with space").as_deref(), Some("v"));
        assert_eq!(properties.value("tabs").as_deref(), Some("1\t2\n3"));
        assert_eq!(properties.value("unicode").as_deref(), Some("café"));
        assert_eq!(properties.value("broken").as_deref(), Some("u12"));
        assert_eq!(properties.value("other").as_deref(), Some("q"));
        assert_eq!(properties.value("key\\"), None);
    }

    #[test]
    fn test_trailing_whitespace_is_kept() {
        let file = write_file("password=secret \nescaped=\\ lead\n");
        let properties = FileProperties::load(file.path()).expect("load");

        assert_eq!(properties.value("password").as_deref(), Some("secret "));
        assert_eq!(properties.value("escaped").as_deref(), Some(" lead"));
    }

    #[test]
    fn test_parse_continuation_and_duplicates() {
        let file = write_file("list = a,\\\n    b,\\\n    c\nkey=first\nkey=second\n");
        let properties = FileProperties::load(file.path()).expect("load");

        assert_eq!(properties.value("list").as_deref(), Some("a,b,c"));
        assert_eq!(properties.value("key").as_deref(), Some("second"));
    }

    #[test]
    fn test_escaped_backslash_does_not_continue() {
        let file = write_file("path=C:\\\\\nnext=1\n");
        let properties = FileProperties::load(file.path()).expect("load");

        assert_eq!(properties.value("path").as_deref(), Some("C:\\"));
        assert_eq!(properties.value("next").as_deref(), Some("1"));
    }

    #[test]
    fn test_value_may_contain_separators() {
        let file = write_file("url=http://host:8080/a=b\n");
        let properties = FileProperties::load(file.path()).expect("load");
        assert_eq!(
            properties.value("url").as_deref(),
            Some("http://host:8080/a=b")
        );
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let dir = tempfile::tempdir().expect("create temp dir");
        let error = FileProperties::load(&dir.path().join("absent.properties"))
            .expect_err("file does not exist");
        assert!(matches!(error, ConfigError::Io { .. }));
    }

    #[test]
    fn test_environment_name_mapping() {
        assert_eq!(
            EnvironmentProperties::variable_name("enable-environment-properties"),
            "ENABLE_ENVIRONMENT_PROPERTIES"
        );
        let environment =
            EnvironmentProperties::from_vars([("API_SESSION_TIMEOUT", "5")]).expect("valid");
        assert_eq!(
            environment.value("api-session-timeout").as_deref(),
            Some("5")
        );
        assert_eq!(environment.value("api_session_timeout").as_deref(), Some("5"));
        assert_eq!(environment.value("other"), None);
    }

    #[cfg(unix)]
    #[test]
    fn test_environment_skips_non_unicode_variables() {
        use std::os::unix::ffi::OsStringExt;

        let environment = EnvironmentProperties::from_vars([
            (OsString::from("FOO"), OsString::from_vec(vec![0x66, 0x6f, 0x80])),
            (OsString::from_vec(vec![0x42, 0xff]), OsString::from("x")),
            (OsString::from("BAR"), OsString::from("3")),
        ])
        .expect("non-unicode variables are skipped");

        assert_eq!(environment.value("foo"), None);
        assert_eq!(environment.value("bar").as_deref(), Some("3"));
    }

    #[test]
    fn test_environment_rejects_malformed_names() {
        for name in ["", "FOO=BAR"] {
            let error = EnvironmentProperties::from_vars([(name, "1")])
                .expect_err("malformed variable name");
            assert!(matches!(error, ConfigError::MalformedEnvironment(_)));
        }
    }
}
