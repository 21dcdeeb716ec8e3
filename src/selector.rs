use std::{
    fmt::Display,
    fs, io,
    path::{Path, PathBuf},
};

use anyhow::Context;
use log::{debug, warn};
use rand::{seq::SliceRandom, Rng};

/// An image file that can be attached to a mail
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    pub path: PathBuf,
    /// File name, used as the identifier in the history and caption lookups
    pub name: String,
}

impl Attachment {
    pub fn new(path: PathBuf) -> Self {
        let name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.to_string_lossy().into_owned());
        Self { path, name }
    }
}

impl Display for Attachment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name)
    }
}

/// Lists the regular files in `dir`, sorted by path. A missing directory has no candidates.
pub fn list_candidates(dir: &Path) -> anyhow::Result<Vec<Attachment>> {
    let read_dir = match fs::read_dir(dir) {
        Ok(read_dir) => read_dir,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            warn!("Image directory {dir:?} does not exist");
            return Ok(Vec::new());
        }
        Err(e) => return Err(e).with_context(|| format!("Failed to read directory {dir:?}")),
    };
    let mut paths = Vec::new();
    for entry in read_dir {
        let entry = entry.with_context(|| format!("Failed to read entry in {dir:?}"))?;
        let path = entry.path();
        if path.is_file() {
            paths.push(path);
        }
    }
    paths.sort();
    debug!("Found {} candidate attachments in {dir:?}", paths.len());
    Ok(paths.into_iter().map(Attachment::new).collect())
}

/// Picks a random attachment, preferring those not yet mailed
///
/// Returns `None` only when `candidates` is empty. Once every candidate has been
/// mailed the choice falls back to a uniformly random one.
pub fn select_attachment<R, F>(
    mut candidates: Vec<Attachment>,
    was_mailed: F,
    rng: &mut R,
) -> Option<Attachment>
where
    R: Rng + ?Sized,
    F: Fn(&str) -> bool,
{
    candidates.shuffle(rng);
    match candidates.iter().position(|c| !was_mailed(&c.name)) {
        Some(index) => Some(candidates.swap_remove(index)),
        None => {
            if !candidates.is_empty() {
                debug!("All {} attachments already mailed, repeating one", candidates.len());
            }
            candidates.into_iter().next()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{rngs::StdRng, SeedableRng};
    use rstest::rstest;
    use std::collections::{HashMap, HashSet};
    use tempfile::TempDir;

    fn attachments(names: &[&str]) -> Vec<Attachment> {
        names
            .iter()
            .map(|name| Attachment::new(PathBuf::from("Images").join(name)))
            .collect()
    }

    #[test]
    fn empty_has_no_selection() {
        let mut rng = StdRng::seed_from_u64(1);
        assert_eq!(select_attachment(Vec::new(), |_| false, &mut rng), None);
    }

    #[rstest]
    #[case(&["a.jpg"])]
    #[case(&["a.jpg", "b.jpg"])]
    #[case(&["a.jpg", "b.jpg", "c.png", "d.gif"])]
    fn always_selects_when_candidates_exist(#[case] names: &[&str]) {
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..50 {
            assert!(select_attachment(attachments(names), |_| false, &mut rng).is_some());
            assert!(select_attachment(attachments(names), |_| true, &mut rng).is_some());
        }
    }

    #[test]
    fn prefers_unused() {
        let mut rng = StdRng::seed_from_u64(42);
        let mailed: HashSet<&str> = ["a.jpg", "c.jpg", "d.jpg"].into();
        for _ in 0..100 {
            let selected = select_attachment(
                attachments(&["a.jpg", "b.jpg", "c.jpg", "d.jpg", "e.jpg"]),
                |name| mailed.contains(name),
                &mut rng,
            )
            .unwrap();
            assert!(!mailed.contains(selected.name.as_str()), "{selected}");
        }
    }

    #[test]
    fn second_file_chosen_after_first_mailed() {
        let mut rng = StdRng::seed_from_u64(3);
        let selected =
            select_attachment(attachments(&["a.jpg", "b.jpg"]), |n| n == "a.jpg", &mut rng);
        assert_eq!(selected.unwrap().name, "b.jpg");
    }

    #[test]
    fn exhausted_candidates_fall_back_uniformly() {
        let mut rng = StdRng::seed_from_u64(11);
        let mut counts: HashMap<String, u32> = HashMap::new();
        for _ in 0..2000 {
            let selected =
                select_attachment(attachments(&["a.jpg", "b.jpg"]), |_| true, &mut rng).unwrap();
            *counts.entry(selected.name).or_default() += 1;
        }
        assert_eq!(counts.len(), 2);
        for count in counts.values() {
            assert!((800..=1200).contains(count), "{counts:?}");
        }
    }

    #[test]
    fn unused_candidates_chosen_uniformly() {
        let mut rng = StdRng::seed_from_u64(5);
        let mut counts: HashMap<String, u32> = HashMap::new();
        for _ in 0..3000 {
            let selected = select_attachment(
                attachments(&["a.jpg", "b.jpg", "c.jpg", "d.jpg"]),
                |name| name == "d.jpg",
                &mut rng,
            )
            .unwrap();
            *counts.entry(selected.name).or_default() += 1;
        }
        assert_eq!(counts.len(), 3);
        for count in counts.values() {
            assert!((800..=1200).contains(count), "{counts:?}");
        }
    }

    #[test]
    fn lists_only_files() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("b.jpg"), b"b").unwrap();
        fs::write(dir.path().join("a.jpg"), b"a").unwrap();
        fs::create_dir(dir.path().join("nested")).unwrap();

        let names: Vec<_> = list_candidates(dir.path())
            .unwrap()
            .into_iter()
            .map(|c| c.name)
            .collect();
        assert_eq!(names, vec!["a.jpg", "b.jpg"]);
    }

    #[test]
    fn missing_directory_has_no_candidates() {
        let dir = TempDir::new().unwrap();
        assert!(list_candidates(&dir.path().join("Images")).unwrap().is_empty());
    }
}
