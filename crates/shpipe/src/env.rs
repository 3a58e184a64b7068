//! Ordered environment mapping.

use std::ffi::OsString;

/// Environment variables in insertion order.
///
/// Order is kept so a child process sees variables the way they were set.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Env {
    vars: Vec<(String, String)>,
}

impl Env {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the current process environment.
    ///
    /// Entries whose name or value is not valid UTF-8 are left out, so a child
    /// never receives an altered copy of them.
    pub fn from_process() -> Self {
        Self::from_os_vars(std::env::vars_os())
    }

    fn from_os_vars(vars: impl IntoIterator<Item = (OsString, OsString)>) -> Self {
        let mut env = Self::new();
        for (name, value) in vars {
            match (name.into_string(), value.into_string()) {
                (Ok(name), Ok(value)) => env.vars.push((name, value)),
                (name, _) => {
                    let name = name.unwrap_or_else(|raw| raw.to_string_lossy().into_owned());
                    tracing::warn!(%name, "skipping environment variable with non-UTF-8 data");
                }
            }
        }
        env
    }

    /// Value of `name`, or the empty string when unset.
    ///
    /// If the mapping holds duplicates, the last one wins.
    pub fn get(&self, name: &str) -> &str {
        self.vars
            .iter()
            .rev()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
            .unwrap_or("")
    }

    pub fn contains(&self, name: &str) -> bool {
        self.vars.iter().any(|(k, _)| k == name)
    }

    /// Overwrite the first entry named `name`, or append a new one.
    ///
    /// Later duplicates of `name` are dropped, leaving exactly one entry.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let value = value.into();
        match self.vars.iter().position(|(k, _)| *k == name) {
            Some(first) => {
                self.vars[first].1 = value;
                let mut index = 0;
                self.vars.retain(|(k, _)| {
                    let keep = index <= first || *k != name;
                    index += 1;
                    keep
                });
            }
            None => self.vars.push((name, value)),
        }
    }

    /// Number of entries with the given name.
    pub fn count(&self, name: &str) -> usize {
        self.vars.iter().filter(|(k, _)| k == name).count()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.vars.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.vars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }
}

impl<K, V> FromIterator<(K, V)> for Env
where
    K: Into<String>,
    V: Into<String>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            vars: iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect(),
        }
    }
}
