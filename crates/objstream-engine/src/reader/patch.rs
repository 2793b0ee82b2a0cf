use std::collections::HashMap;

use objstream_types::ObjectId;

use crate::error::UnresolvedReference;
use crate::graph::{FieldSite, Handle};

/// A reference that must be delivered once its target is decoded.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct PatchRequest {
    pub holder: Handle,
    pub holder_id: ObjectId,
    pub site: FieldSite,
    pub target: ObjectId,
}

/// Outstanding patch requests, indexed by the id they wait for.
#[derive(Debug, Default)]
pub(crate) struct PatchTable {
    waiting: HashMap<ObjectId, Vec<PatchRequest>>,
    per_holder: HashMap<Handle, usize>,
    total: usize,
}

impl PatchTable {
    pub fn record(&mut self, request: PatchRequest) {
        self.waiting.entry(request.target).or_default().push(request);
        *self.per_holder.entry(request.holder).or_default() += 1;
        self.total += 1;
    }

    /// Remove and return every request waiting on `target`, in the order
    /// they were recorded.
    pub fn take(&mut self, target: ObjectId) -> Vec<PatchRequest> {
        let requests = self.waiting.remove(&target).unwrap_or_default();
        for request in &requests {
            self.settle(request.holder);
        }
        requests
    }

    fn settle(&mut self, holder: Handle) {
        if let Some(count) = self.per_holder.get_mut(&holder) {
            *count -= 1;
            if *count == 0 {
                self.per_holder.remove(&holder);
            }
        }
        self.total -= 1;
    }

    pub fn outstanding_for(&self, holder: Handle) -> usize {
        self.per_holder.get(&holder).copied().unwrap_or(0)
    }

    pub fn total(&self) -> usize {
        self.total
    }

    pub fn is_empty(&self) -> bool {
        self.total == 0
    }

    /// Everything still waiting, ordered by holder then site.
    pub fn unresolved(&self) -> Vec<UnresolvedReference> {
        let mut out: Vec<UnresolvedReference> = self
            .waiting
            .values()
            .flatten()
            .map(|r| UnresolvedReference {
                holder: r.holder_id,
                holder_handle: r.holder,
                site: r.site,
                target: r.target,
            })
            .collect();
        out.sort();
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(holder: u32, site: u32, target: u32) -> PatchRequest {
        PatchRequest {
            holder: Handle::from_index(holder),
            holder_id: ObjectId::from_raw(holder + 1),
            site: FieldSite::new(site),
            target: ObjectId::from_raw(target),
        }
    }

    #[test]
    fn take_settles_holders() {
        let mut table = PatchTable::default();
        table.record(request(0, 0, 5));
        table.record(request(0, 1, 6));
        table.record(request(1, 0, 5));
        assert_eq!(table.total(), 3);
        assert_eq!(table.outstanding_for(Handle::from_index(0)), 2);

        let taken = table.take(ObjectId::from_raw(5));
        assert_eq!(taken, vec![request(0, 0, 5), request(1, 0, 5)]);
        assert_eq!(table.total(), 1);
        assert_eq!(table.outstanding_for(Handle::from_index(0)), 1);
        assert_eq!(table.outstanding_for(Handle::from_index(1)), 0);
        assert!(table.take(ObjectId::from_raw(5)).is_empty());
    }

    #[test]
    fn unresolved_report_is_sorted() {
        let mut table = PatchTable::default();
        table.record(request(2, 0, 9));
        table.record(request(0, 3, 8));
        table.record(request(0, 1, 9));
        let report = table.unresolved();
        let sites: Vec<_> = report
            .iter()
            .map(|r| (r.holder.get(), r.site.index))
            .collect();
        assert_eq!(sites, vec![(1, 1), (1, 3), (3, 0)]);
    }
}
