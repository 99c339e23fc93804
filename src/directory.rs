use std::collections::BTreeMap;

use serde::Serialize;

use crate::domain::{match_domain, Affinity, HostInfo};
use crate::login::{LoginId, Recency};
use crate::settings::Settings;

/// One credential file offered to the user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Candidate {
    #[serde(flatten)]
    pub id: LoginId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub domain: Option<HostInfo>,
    pub affinity: Affinity,
    pub recency: Recency,
}

impl Candidate {
    /// `store/path`, as shown to users and matched by [`CredentialDirectory::search`].
    pub fn label(&self) -> String {
        self.id.to_string()
    }
}

/// Store listings turned into an ordered candidate list.
#[derive(Debug, Clone, Default)]
pub struct CredentialDirectory {
    candidates: Vec<Candidate>,
}

impl CredentialDirectory {
    /// Rank `files` (store id to store-relative paths) for `current_host`.
    pub fn build(
        files: &BTreeMap<String, Vec<String>>,
        current_host: &str,
        settings: &Settings,
    ) -> Self {
        let current = HostInfo::parse(current_host);
        let mut candidates: Vec<Candidate> = files
            .iter()
            .flat_map(|(store_id, paths)| {
                paths.iter().map(move |path| LoginId::new(store_id, path))
            })
            .map(|id| {
                let domain = match_domain(&id.path, current_host);
                let affinity = match (&domain, &current) {
                    (Some(domain), Some(current)) => Affinity::of(domain, current),
                    _ => Affinity::None,
                };
                let recency = settings.recency(current_host, &id);
                Candidate {
                    id,
                    domain,
                    affinity,
                    recency,
                }
            })
            .collect();

        candidates.sort_by(|a, b| {
            b.affinity
                .cmp(&a.affinity)
                .then(b.recency.count.cmp(&a.recency.count))
                .then(b.recency.when.cmp(&a.recency.when))
                .then_with(|| a.id.cmp(&b.id))
        });
        Self { candidates }
    }

    pub fn candidates(&self) -> &[Candidate] {
        &self.candidates
    }

    /// Candidates whose domain relates to the active host.
    pub fn matching(&self) -> impl Iterator<Item = &Candidate> {
        self.candidates
            .iter()
            .filter(|candidate| candidate.affinity != Affinity::None)
    }

    /// Candidates containing every whitespace-separated term of `query`.
    pub fn search(&self, query: &str) -> Vec<&Candidate> {
        let terms: Vec<String> = query.split_whitespace().map(str::to_lowercase).collect();
        self.candidates
            .iter()
            .filter(|candidate| {
                let label = candidate.label().to_lowercase();
                terms.iter().all(|term| label.contains(term))
            })
            .collect()
    }
}
