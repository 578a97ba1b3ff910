use std::collections::{HashMap, HashSet, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use tracing::warn;

use crate::error::Result;
use crate::feature::prd::{self, Prd};

/// In-memory cache of discovered PRDs, guarded by a read-write lock so
/// `get`/`list` never block on each other, only on `refresh`.
///
/// Orders PRDs by `depends_on` using Kahn's algorithm over the cached set.
pub struct PrdStore {
    root: PathBuf,
    cache: RwLock<HashMap<String, Prd>>,
}

impl PrdStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            cache: RwLock::new(HashMap::new()),
        }
    }

    /// Rebuild the cache from disk. Discovery walks `root` for `*.md`
    /// files one level deep; a PRD that fails to parse is skipped with a
    /// warning rather than aborting the whole refresh.
    pub fn refresh(&self) -> Result<()> {
        let mut discovered = HashMap::new();
        let entries = match std::fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                *self.cache.write().unwrap() = discovered;
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        };

        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("md") {
                continue;
            }
            match prd::read(&path) {
                Ok(parsed) => {
                    discovered.insert(parsed.frontmatter.prd_id.clone(), parsed);
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "skipping invalid PRD");
                }
            }
        }

        *self.cache.write().unwrap() = discovered;
        Ok(())
    }

    pub fn get(&self, prd_id: &str) -> Option<Prd> {
        self.cache.read().unwrap().get(prd_id).cloned()
    }

    pub fn list(&self) -> Vec<Prd> {
        self.cache.read().unwrap().values().cloned().collect()
    }

    /// PRDs whose `depends_on` are all `complete`, ordered so a dependency
    /// always precedes its dependents (Kahn's algorithm over the cached
    /// set). Dependencies on IDs outside the cache are ignored. A
    /// dependency cycle is broken
    /// by appending the remaining cycle members in `prd_id` order rather
    /// than dropping them, since silently excluding a ready PRD would be
    /// worse than an arbitrary order among the cycle.
    pub fn list_ready(&self) -> Vec<Prd> {
        let cache = self.cache.read().unwrap();
        let candidates: Vec<&Prd> = cache
            .values()
            .filter(|prd| prd.frontmatter.status != "complete" && prd.frontmatter.status != "archived")
            .filter(|prd| {
                prd.frontmatter.depends_on.iter().all(|dep| {
                    cache
                        .get(dep)
                        .map(|d| d.frontmatter.status == "complete")
                        .unwrap_or(true)
                })
            })
            .collect();

        let ids: HashSet<&str> = candidates.iter().map(|p| p.frontmatter.prd_id.as_str()).collect();

        let mut successors: HashMap<&str, Vec<&str>> = HashMap::new();
        let mut in_degree: HashMap<&str, usize> = HashMap::new();
        for prd in &candidates {
            in_degree.entry(prd.frontmatter.prd_id.as_str()).or_insert(0);
        }
        for prd in &candidates {
            for dep in &prd.frontmatter.depends_on {
                if ids.contains(dep.as_str()) && dep.as_str() != prd.frontmatter.prd_id {
                    successors.entry(dep.as_str()).or_default().push(&prd.frontmatter.prd_id);
                    *in_degree.entry(&prd.frontmatter.prd_id).or_default() += 1;
                }
            }
        }

        let mut roots: Vec<&str> = in_degree.iter().filter(|&(_, d)| *d == 0).map(|(&id, _)| id).collect();
        roots.sort_unstable();
        let mut queue: VecDeque<&str> = roots.into();
        let mut ordered_ids = Vec::with_capacity(candidates.len());
        let mut remaining = in_degree.clone();

        while let Some(id) = queue.pop_front() {
            ordered_ids.push(id);
            if let Some(next) = successors.get(id) {
                let mut unlocked: Vec<&str> = Vec::new();
                for &succ in next {
                    if let Some(deg) = remaining.get_mut(succ) {
                        *deg -= 1;
                        if *deg == 0 {
                            unlocked.push(succ);
                        }
                    }
                }
                unlocked.sort_unstable();
                for id in unlocked {
                    queue.push_back(id);
                }
            }
        }

        // Any IDs not placed are part of a dependency cycle; append them in
        // a stable order rather than dropping them.
        let mut placed: HashSet<&str> = ordered_ids.iter().copied().collect();
        let mut leftover: Vec<&str> = ids.iter().filter(|id| !placed.contains(*id)).copied().collect();
        leftover.sort_unstable();
        ordered_ids.extend(leftover.iter().copied());
        placed.extend(leftover);

        let by_id: HashMap<&str, &Prd> = candidates.iter().map(|p| (p.frontmatter.prd_id.as_str(), *p)).collect();
        ordered_ids.into_iter().filter_map(|id| by_id.get(id).map(|p| (*p).clone())).collect()
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}
