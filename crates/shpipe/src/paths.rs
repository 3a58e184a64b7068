//! Path resolution against a scope's current directory.

use std::path::{Component, Path, PathBuf};

/// Resolve `segments` against `dir`.
///
/// - no segments: `dir` itself
/// - absolute first segment: the segments joined on their own, `dir` ignored
/// - otherwise: every segment joined onto `dir`
///
/// The result is cleaned lexically: empty segments and `.` vanish, `..`
/// removes the previous component, and a root inside a later segment does
/// not restart the path.
pub fn resolve<I, S>(dir: &Path, segments: I) -> PathBuf
where
    I: IntoIterator<Item = S>,
    S: AsRef<Path>,
{
    let segments: Vec<S> = segments.into_iter().collect();
    let absolute = segments
        .first()
        .is_some_and(|first| first.as_ref().is_absolute());

    let mut cleaned = Cleaned::default();
    if !absolute {
        cleaned.extend(dir, true);
    }
    for (i, segment) in segments.iter().enumerate() {
        cleaned.extend(segment.as_ref(), absolute && i == 0);
    }
    cleaned.finish()
}

#[derive(Default)]
struct Cleaned {
    path: PathBuf,
    /// Normal components that a `..` may still remove.
    depth: usize,
}

impl Cleaned {
    fn extend(&mut self, segment: &Path, base: bool) {
        for component in segment.components() {
            match component {
                Component::Prefix(prefix) if base => self.path.push(prefix.as_os_str()),
                Component::RootDir if base => self.path.push(Component::RootDir.as_os_str()),
                Component::Prefix(_) | Component::RootDir | Component::CurDir => {}
                Component::ParentDir => {
                    if self.depth > 0 {
                        self.path.pop();
                        self.depth -= 1;
                    } else if !self.path.has_root() {
                        self.path.push("..");
                    }
                }
                Component::Normal(name) => {
                    self.path.push(name);
                    self.depth += 1;
                }
            }
        }
    }

    fn finish(self) -> PathBuf {
        if self.path.as_os_str().is_empty() {
            PathBuf::from(".")
        } else {
            self.path
        }
    }
}
