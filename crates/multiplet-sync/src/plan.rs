//! Diff engine: remote catalog minus local cache → download plan.
//!
//! Plans are grouped per dataset for UI progress reporting and ordered
//! smallest-first within each group so the first completions land quickly.
//! Identical inputs always produce an identical plan.

use serde::Serialize;
use std::collections::{BTreeMap, HashSet};

use crate::catalog::{ArtifactMeta, DatasetKey};

/// Artifacts of one dataset that need fetching, size-ascending.
#[derive(Debug, Clone, Serialize)]
pub struct PlanGroup {
    pub dataset: DatasetKey,
    pub artifacts: Vec<ArtifactMeta>,
}

/// Ordered download plan. Iteration order is the order workers pick up
/// tasks; completion order across workers is unspecified.
#[derive(Debug, Clone, Default, Serialize)]
pub struct DownloadPlan {
    pub groups: Vec<PlanGroup>,
}

impl DownloadPlan {
    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    pub fn task_count(&self) -> usize {
        self.groups.iter().map(|g| g.artifacts.len()).sum()
    }

    pub fn total_bytes(&self) -> u64 {
        self.groups
            .iter()
            .flat_map(|g| g.artifacts.iter())
            .map(|a| a.size)
            .sum()
    }

    /// All tasks in pickup order: groups in dataset order, artifacts
    /// size-ascending within each group.
    pub fn tasks(&self) -> impl Iterator<Item = &ArtifactMeta> {
        self.groups.iter().flat_map(|g| g.artifacts.iter())
    }
}

/// Compute the set of remote artifacts missing locally.
///
/// A remote entry is included iff no local entry matches on id AND
/// fingerprint; a stale local fingerprint means the entry is superseded
/// and must be re-fetched.
pub fn compute_plan(remote: &[ArtifactMeta], local: &[ArtifactMeta]) -> DownloadPlan {
    let present: HashSet<_> = local.iter().map(|m| (&m.id, &m.fingerprint)).collect();

    let mut groups: BTreeMap<DatasetKey, Vec<ArtifactMeta>> = BTreeMap::new();
    for meta in remote {
        if present.contains(&(&meta.id, &meta.fingerprint)) {
            continue;
        }
        groups.entry(meta.id.dataset()).or_default().push(meta.clone());
    }

    for artifacts in groups.values_mut() {
        artifacts.sort_by(|a, b| a.size.cmp(&b.size).then_with(|| a.id.cmp(&b.id)));
    }

    DownloadPlan {
        groups: groups
            .into_iter()
            .map(|(dataset, artifacts)| PlanGroup { dataset, artifacts })
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{ArtifactId, Fingerprint, IonFamily, ModelKind};

    fn remote_meta(
        model: ModelKind,
        ion: IonFamily,
        variant: &str,
        size: u64,
        fp: &str,
    ) -> ArtifactMeta {
        ArtifactMeta {
            id: ArtifactId::new(model, ion, variant),
            size,
            fingerprint: Fingerprint::sha256(fp),
            download_ref: format!("files/{}/{}", model.as_str(), variant),
            params: Default::default(),
        }
    }

    #[test]
    fn test_stale_fingerprint_is_refetched() {
        // Local A is stale; remote declares A(f1, 10) and B(f2, 1000).
        let remote = vec![
            remote_meta(ModelKind::Lattice, IonFamily::ThreeD, "a", 10, "f1"),
            remote_meta(ModelKind::Lattice, IonFamily::ThreeD, "b", 1000, "f2"),
        ];
        let local = vec![remote_meta(ModelKind::Lattice, IonFamily::ThreeD, "a", 10, "f0")];

        let plan = compute_plan(&remote, &local);
        let ordered: Vec<_> = plan.tasks().map(|m| (m.id.variant.as_str(), m.size)).collect();
        assert_eq!(ordered, vec![("a", 10), ("b", 1000)]);
        assert_eq!(plan.task_count(), 2);
        assert_eq!(plan.total_bytes(), 1010);
    }

    #[test]
    fn test_matching_cache_yields_empty_plan() {
        let remote = vec![
            remote_meta(ModelKind::Lattice, IonFamily::ThreeD, "a", 10, "f1"),
            remote_meta(ModelKind::Lattice, IonFamily::ThreeD, "b", 1000, "f2"),
        ];
        let plan = compute_plan(&remote, &remote);
        assert!(plan.is_empty());
        assert_eq!(plan.task_count(), 0);
    }

    #[test]
    fn test_groups_by_dataset_and_sorts_by_size() {
        let remote = vec![
            remote_meta(ModelKind::SingleSite, IonFamily::FiveD, "big", 900, "s1"),
            remote_meta(ModelKind::Lattice, IonFamily::ThreeD, "mid", 500, "l1"),
            remote_meta(ModelKind::SingleSite, IonFamily::FiveD, "small", 5, "s2"),
            remote_meta(ModelKind::Lattice, IonFamily::FourD, "other", 100, "l2"),
        ];

        let plan = compute_plan(&remote, &[]);
        assert_eq!(plan.groups.len(), 3);

        // Dataset order is deterministic (model, then ion).
        let datasets: Vec<_> = plan.groups.iter().map(|g| g.dataset.label()).collect();
        assert_eq!(datasets, vec!["lat/3d_d1", "lat/4d_d1", "ss/5d_d1"]);

        // Smallest-first inside a dataset.
        let ss = &plan.groups[2];
        let variants: Vec<_> = ss.artifacts.iter().map(|a| a.id.variant.as_str()).collect();
        assert_eq!(variants, vec!["small", "big"]);
    }

    #[test]
    fn test_equal_sizes_break_ties_by_id() {
        let remote = vec![
            remote_meta(ModelKind::Lattice, IonFamily::ThreeD, "zz", 64, "f1"),
            remote_meta(ModelKind::Lattice, IonFamily::ThreeD, "aa", 64, "f2"),
        ];
        let plan = compute_plan(&remote, &[]);
        let variants: Vec<_> = plan.tasks().map(|a| a.id.variant.as_str()).collect();
        assert_eq!(variants, vec!["aa", "zz"]);
    }

    #[test]
    fn test_deterministic_for_identical_inputs() {
        let remote = vec![
            remote_meta(ModelKind::Lattice, IonFamily::ThreeD, "c", 30, "f3"),
            remote_meta(ModelKind::SingleSite, IonFamily::FourD, "a", 10, "f1"),
            remote_meta(ModelKind::Lattice, IonFamily::FiveD, "b", 20, "f2"),
        ];
        let local = vec![remote_meta(ModelKind::Lattice, IonFamily::FiveD, "b", 20, "f2")];

        let first = compute_plan(&remote, &local);
        let second = compute_plan(&remote, &local);

        let order =
            |p: &DownloadPlan| p.tasks().map(|a| a.id.clone()).collect::<Vec<_>>();
        assert_eq!(order(&first), order(&second));
    }
}
