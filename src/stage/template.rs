//! `{placeholder}` substitution for stage arguments.

use std::path::PathBuf;
use std::sync::LazyLock;

use regex::Regex;

use super::StageError;

/// Placeholders a stage argument may reference.
pub const PLACEHOLDERS: [&str; 9] = [
    "input",
    "output",
    "source",
    "final",
    "index",
    "key",
    "year",
    "staging_dir",
    "output_dir",
];

/// Matches `{name}` where `name` is an identifier.
#[allow(clippy::expect_used)]
static PLACEHOLDER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\{([A-Za-z_][A-Za-z0-9_]*)\}").expect("placeholder regex is valid") // Static pattern, safe to panic
});

/// Values substituted into a stage's arguments for one item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageContext {
    /// Current input of the chain (the downloaded asset for the first stage).
    pub input: PathBuf,
    /// This stage's declared output, already rendered.
    pub output: Option<PathBuf>,
    /// The downloaded asset.
    pub source: PathBuf,
    /// The item's final artifact.
    pub final_artifact: PathBuf,
    /// 1-based position of the item in the run.
    pub index: usize,
    /// Stable file key of the item.
    pub key: String,
    /// Acquisition year, when known.
    pub year: Option<i32>,
    /// Directory holding per-item intermediates.
    pub staging_dir: PathBuf,
    /// Directory holding final artifacts.
    pub output_dir: PathBuf,
}

impl StageContext {
    fn value(&self, name: &str) -> Option<String> {
        let path = |p: &PathBuf| p.display().to_string();
        match name {
            "input" => Some(path(&self.input)),
            "output" => self.output.as_ref().map(path),
            "source" => Some(path(&self.source)),
            "final" => Some(path(&self.final_artifact)),
            "index" => Some(self.index.to_string()),
            "key" => Some(self.key.clone()),
            "year" => Some(year_label(self.year)),
            "staging_dir" => Some(path(&self.staging_dir)),
            "output_dir" => Some(path(&self.output_dir)),
            _ => None,
        }
    }
}

/// `{year}` value: the year, or `unknown`.
#[must_use]
pub fn year_label(year: Option<i32>) -> String {
    year.map_or_else(|| "unknown".to_string(), |y| y.to_string())
}

/// Names referenced by `template`, in order of appearance.
#[must_use]
pub fn placeholders_in(template: &str) -> Vec<&str> {
    PLACEHOLDER_RE
        .captures_iter(template)
        .filter_map(|c| c.get(1).map(|m| m.as_str()))
        .collect()
}

/// Checks that `template` only references known placeholders.
///
/// # Errors
///
/// Returns [`StageError::UnknownPlaceholder`] for the first unknown name.
pub fn check_template(template: &str) -> Result<(), StageError> {
    match placeholders_in(template)
        .into_iter()
        .find(|name| !PLACEHOLDERS.contains(name))
    {
        Some(name) => Err(StageError::UnknownPlaceholder {
            name: name.to_string(),
            template: template.to_string(),
        }),
        None => Ok(()),
    }
}

/// Substitutes every placeholder in `template`.
///
/// # Errors
///
/// Returns [`StageError::UnknownPlaceholder`] for unknown names and
/// [`StageError::UnboundPlaceholder`] for `{output}` on a stage without one.
pub fn render(template: &str, context: &StageContext) -> Result<String, StageError> {
    substitute(template, |name| context.value(name))
}

/// Substitutes placeholders using `lookup`; a `None` from `lookup` is an
/// unbound placeholder.
///
/// # Errors
///
/// Same as [`render`].
pub fn substitute<F>(template: &str, lookup: F) -> Result<String, StageError>
where
    F: Fn(&str) -> Option<String>,
{
    check_template(template)?;

    let mut rendered = String::with_capacity(template.len());
    let mut last = 0;
    for caps in PLACEHOLDER_RE.captures_iter(template) {
        let (Some(whole), Some(name)) = (caps.get(0), caps.get(1)) else {
            continue;
        };
        let value = lookup(name.as_str()).ok_or_else(|| StageError::UnboundPlaceholder {
            name: name.as_str().to_string(),
            template: template.to_string(),
        })?;
        rendered.push_str(&template[last..whole.start()]);
        rendered.push_str(&value);
        last = whole.end();
    }
    rendered.push_str(&template[last..]);
    Ok(rendered)
}
