//! Build stamp substitution
//!
//! Stamp info files hold one `KEY value` pair per line. Templates reference
//! them as `{KEY}`; `{{` and `}}` stand for literal braces.

use crate::error::{ResolverError, Result};
use crate::logging::Logger;
use std::collections::HashMap;
use std::path::Path;

#[derive(Debug, Clone, Default)]
pub struct Stamper {
    vars: HashMap<String, String>,
}

impl Stamper {
    pub fn new(vars: HashMap<String, String>) -> Self {
        Self { vars }
    }

    /// Load and merge stamp info files in order; later files win on duplicates.
    pub fn from_files<P: AsRef<Path>>(paths: &[P], logger: &Logger) -> Result<Self> {
        let mut vars = HashMap::new();

        for path in paths {
            let path = path.as_ref();
            let content = std::fs::read_to_string(path).map_err(|e| {
                ResolverError::Argument(format!(
                    "Failed to read stamp info file {}: {}",
                    path.display(),
                    e
                ))
            })?;

            for line in content.lines() {
                if line.trim().is_empty() {
                    continue;
                }
                let (key, value) = line.split_once(' ').ok_or_else(|| {
                    ResolverError::Argument(format!(
                        "Malformed line in {}: {}",
                        path.display(),
                        line
                    ))
                })?;
                if vars.contains_key(key) {
                    logger.warning(&format!(
                        "Duplicate value for key \"{}\": using \"{}\"",
                        key, value
                    ));
                }
                vars.insert(key.to_string(), value.to_string());
            }
        }

        logger.detail(&format!("Loaded {} stamp variables", vars.len()));
        Ok(Self { vars })
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.vars.get(key).map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }

    /// Substitute every `{KEY}` in `template`
    pub fn stamp(&self, template: &str) -> Result<String> {
        let mut output = String::with_capacity(template.len());
        let mut chars = template.chars().peekable();

        while let Some(c) = chars.next() {
            match c {
                '{' if chars.peek() == Some(&'{') => {
                    chars.next();
                    output.push('{');
                }
                '}' if chars.peek() == Some(&'}') => {
                    chars.next();
                    output.push('}');
                }
                '{' => {
                    let mut key = String::new();
                    loop {
                        match chars.next() {
                            Some('}') => break,
                            Some(c) => key.push(c),
                            None => {
                                return Err(ResolverError::Argument(format!(
                                    "Unterminated placeholder in '{}'",
                                    template
                                )));
                            }
                        }
                    }
                    let value = self.get(&key).ok_or_else(|| {
                        ResolverError::Argument(format!(
                            "Unknown stamp variable '{}' in '{}'",
                            key, template
                        ))
                    })?;
                    output.push_str(value);
                }
                '}' => {
                    return Err(ResolverError::Argument(format!(
                        "Single '}}' in '{}'",
                        template
                    )));
                }
                c => output.push(c),
            }
        }

        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn stamper(pairs: &[(&str, &str)]) -> Stamper {
        Stamper::new(
            pairs
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        )
    }

    #[test]
    fn test_stamp_git_commit() {
        let stamper = stamper(&[("STABLE_GIT_COMMIT", "9428a3b3")]);
        assert_eq!(
            stamper.stamp("fake.gcr.io/foo/bar:{STABLE_GIT_COMMIT}").unwrap(),
            "fake.gcr.io/foo/bar:9428a3b3"
        );
    }

    #[test]
    fn test_escaped_braces() {
        let stamper = stamper(&[("USER", "ci")]);
        assert_eq!(stamper.stamp("{{literal}}-{USER}").unwrap(), "{literal}-ci");
    }

    #[test]
    fn test_unknown_and_malformed_placeholders() {
        let stamper = stamper(&[]);
        for template in ["gcr.io/foo:{MISSING}", "gcr.io/foo:{OPEN", "gcr.io/foo:x}"] {
            let err = stamper.stamp(template).unwrap_err();
            assert!(matches!(err, ResolverError::Argument(_)), "{}", template);
        }
    }

    #[test]
    fn test_from_files_later_value_wins() {
        let mut first = tempfile::NamedTempFile::new().unwrap();
        writeln!(first, "BUILD_USER alice\n\nSTABLE_GIT_COMMIT abc").unwrap();
        let mut second = tempfile::NamedTempFile::new().unwrap();
        writeln!(second, "BUILD_USER bob smith").unwrap();

        let stamper =
            Stamper::from_files(&[first.path(), second.path()], &Logger::new_quiet()).unwrap();
        assert_eq!(stamper.get("BUILD_USER"), Some("bob smith"));
        assert_eq!(stamper.get("STABLE_GIT_COMMIT"), Some("abc"));
    }

    #[test]
    fn test_whitespace_only_lines_skipped() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "   \nSTABLE_GIT_COMMIT abc\n\t\r\n").unwrap();

        let stamper = Stamper::from_files(&[file.path()], &Logger::new_quiet()).unwrap();
        assert_eq!(stamper.get("STABLE_GIT_COMMIT"), Some("abc"));
        assert_eq!(stamper.get(""), None);
    }

    #[test]
    fn test_malformed_stamp_line() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "NOVALUE").unwrap();
        let err = Stamper::from_files(&[file.path()], &Logger::new_quiet()).unwrap_err();
        assert!(matches!(err, ResolverError::Argument(_)));
    }
}
