//! Ambiguity splitting.

use std::collections::HashMap;

use conceptlink_shared::{CandidateLink, Identifier, LinkSet, ResolutionRecord};

/// Partition `links` by how many distinct targets each source has.
///
/// Sources with exactly one target are unambiguous; the rest contribute one
/// [`ResolutionRecord`] per distinct target with `keep` unset. Sources and
/// targets keep the order in which they first appear.
pub fn split(links: &[CandidateLink]) -> LinkSet {
    let mut order: Vec<&Identifier> = Vec::new();
    let mut targets: HashMap<&Identifier, Vec<&Identifier>> = HashMap::new();

    for link in links {
        let entry = targets.entry(&link.source).or_insert_with(|| {
            order.push(&link.source);
            Vec::new()
        });
        if !entry.contains(&&link.target) {
            entry.push(&link.target);
        }
    }

    let mut set = LinkSet::default();
    for source in order {
        let group = &targets[source];
        if let [only] = group.as_slice() {
            set.unambiguous
                .push(CandidateLink::new(source.clone(), (*only).clone()));
        } else {
            set.ambiguous.extend(group.iter().map(|target| {
                ResolutionRecord::from(CandidateLink::new(source.clone(), (*target).clone()))
            }));
        }
    }
    set
}
