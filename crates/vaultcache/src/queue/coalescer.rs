//! The reordering rule and waiter fan-out, kept pure and independent of the
//! storage driver so it can be unit-tested on its own.

use std::collections::HashSet;

use tokio::sync::oneshot;
use vaultcache_core::{CacheElement, CacheError};
use vaultcache_storage::{OpOutcome, PreparedOp};

/// What a single caller request asked for, before coalescing.
pub enum PendingKind {
    SelectByKey(Vec<String>),
    SelectByType(Vec<String>),
    Insert(Vec<CacheElement>),
    InvalidateByKey(Vec<String>),
    InvalidateByType(Vec<String>),
    InvalidateAll,
    GetKeys,
    Vacuum,
}

/// What a caller's sink receives once its share of a batched result is
/// known.
#[derive(Debug, Clone)]
pub enum PendingOutcome {
    Unit,
    Rows(Vec<CacheElement>),
    Keys(Vec<String>),
}

pub type Sink = oneshot::Sender<Result<PendingOutcome, CacheError>>;

/// One original caller request, queued and awaiting its turn in a drain.
pub struct PendingOp {
    pub kind: PendingKind,
    pub sink: Sink,
}

/// How one emitted [`PreparedOp`] fans its result back out to the original
/// requests it absorbed.
enum FanoutGroup {
    /// Selects: each source only wants the rows matching its own keys (or
    /// type names). Filtered independently per source.
    Select { sources: Vec<(HashSet<String>, Sink)> },
    /// Everything else: every absorbed source gets the same outcome.
    Uniform { sinks: Vec<Sink> },
}

/// Rewrites a drained queue into the minimal equivalent batched sequence,
/// returning the ops to submit (in one transaction, in this order) and,
/// parallel to them, how to fan each op's [`OpOutcome`] back out.
pub fn coalesce(drained: Vec<PendingOp>) -> (Vec<PreparedOp>, Vec<FanoutPlan>) {
    let mut ops = Vec::new();
    let mut fanout = Vec::new();

    let mut open_select_by_key: Option<(HashSet<String>, Vec<(HashSet<String>, Sink)>)> = None;
    let mut open_select_by_type: Option<(HashSet<String>, Vec<(HashSet<String>, Sink)>)> = None;
    let mut open_invalidate_by_key: Option<(HashSet<String>, Vec<Sink>)> = None;
    let mut open_invalidate_by_type: Option<(HashSet<String>, Vec<Sink>)> = None;

    macro_rules! flush_select_by_key {
        () => {
            if let Some((keys, sources)) = open_select_by_key.take() {
                ops.push(PreparedOp::BulkSelectByKey(keys.into_iter().collect()));
                fanout.push(FanoutPlan::select(sources));
            }
        };
    }
    macro_rules! flush_select_by_type {
        () => {
            if let Some((types, sources)) = open_select_by_type.take() {
                ops.push(PreparedOp::BulkSelectByType(types.into_iter().collect()));
                fanout.push(FanoutPlan::select(sources));
            }
        };
    }
    macro_rules! flush_invalidate_by_key {
        () => {
            if let Some((keys, sinks)) = open_invalidate_by_key.take() {
                ops.push(PreparedOp::BulkInvalidateByKey(keys.into_iter().collect()));
                fanout.push(FanoutPlan::uniform(sinks));
            }
        };
    }
    macro_rules! flush_invalidate_by_type {
        () => {
            if let Some((types, sinks)) = open_invalidate_by_type.take() {
                ops.push(PreparedOp::BulkInvalidateByType(
                    types.into_iter().collect(),
                ));
                fanout.push(FanoutPlan::uniform(sinks));
            }
        };
    }
    macro_rules! flush_all {
        () => {
            flush_select_by_key!();
            flush_select_by_type!();
            flush_invalidate_by_key!();
            flush_invalidate_by_type!();
        };
    }

    for entry in drained {
        let PendingOp { kind, sink } = entry;
        match kind {
            PendingKind::SelectByKey(keys) => {
                let wanted: HashSet<String> = keys.into_iter().collect();
                let entry = open_select_by_key.get_or_insert_with(|| (HashSet::new(), Vec::new()));
                entry.0.extend(wanted.iter().cloned());
                entry.1.push((wanted, sink));
            }
            PendingKind::SelectByType(types) => {
                let wanted: HashSet<String> = types.into_iter().collect();
                let entry =
                    open_select_by_type.get_or_insert_with(|| (HashSet::new(), Vec::new()));
                entry.0.extend(wanted.iter().cloned());
                entry.1.push((wanted, sink));
            }
            PendingKind::InvalidateByKey(keys) => {
                let entry =
                    open_invalidate_by_key.get_or_insert_with(|| (HashSet::new(), Vec::new()));
                entry.0.extend(keys);
                entry.1.push(sink);
            }
            PendingKind::InvalidateByType(types) => {
                let entry =
                    open_invalidate_by_type.get_or_insert_with(|| (HashSet::new(), Vec::new()));
                entry.0.extend(types);
                entry.1.push(sink);
            }
            PendingKind::Insert(rows) => {
                // An Insert may rewrite values an open Select would observe,
                // and an open Invalidate of the same key must not execute
                // after the Insert it logically preceded; flush both before
                // emitting the Insert on its own.
                flush_all!();
                ops.push(PreparedOp::BulkInsert(rows));
                fanout.push(FanoutPlan::uniform(vec![sink]));
            }
            PendingKind::InvalidateAll => {
                flush_all!();
                ops.push(PreparedOp::InvalidateAll);
                fanout.push(FanoutPlan::uniform(vec![sink]));
            }
            PendingKind::GetKeys => {
                flush_all!();
                ops.push(PreparedOp::GetKeys);
                fanout.push(FanoutPlan::uniform(vec![sink]));
            }
            PendingKind::Vacuum => {
                flush_all!();
                ops.push(PreparedOp::Vacuum);
                fanout.push(FanoutPlan::uniform(vec![sink]));
            }
        }
    }
    flush_all!();

    (ops, fanout)
}

/// Wraps a [`FanoutGroup`] so the coalescer's internals stay private.
pub struct FanoutPlan(FanoutGroup);

impl FanoutPlan {
    fn select(sources: Vec<(HashSet<String>, Sink)>) -> Self {
        Self(FanoutGroup::Select { sources })
    }

    fn uniform(sinks: Vec<Sink>) -> Self {
        Self(FanoutGroup::Uniform { sinks })
    }

    /// Deliver `outcome` (or a storage failure) to every sink this plan
    /// represents, filtering rows down to what each original source
    /// requested.
    pub fn dispatch(self, outcome: Result<OpOutcome, CacheError>) {
        match self.0 {
            FanoutGroup::Select { sources } => match outcome {
                Ok(OpOutcome::Rows(rows)) => {
                    for (wanted, sink) in sources {
                        let filtered: Vec<CacheElement> = rows
                            .iter()
                            .filter(|r| wanted.contains(&r.key) || wanted.contains_type(r))
                            .cloned()
                            .collect();
                        let _ = sink.send(Ok(PendingOutcome::Rows(filtered)));
                    }
                }
                Ok(_) => {
                    for (_, sink) in sources {
                        let _ = sink.send(Ok(PendingOutcome::Rows(Vec::new())));
                    }
                }
                Err(e) => {
                    for (_, sink) in sources {
                        let _ = sink.send(Err(e.clone()));
                    }
                }
            },
            FanoutGroup::Uniform { sinks } => {
                let mapped = outcome.map(|o| match o {
                    OpOutcome::Unit => PendingOutcome::Unit,
                    OpOutcome::Rows(rows) => PendingOutcome::Rows(rows),
                    OpOutcome::Keys(keys) => PendingOutcome::Keys(keys),
                });
                for sink in sinks {
                    let _ = sink.send(mapped.clone());
                }
            }
        }
    }
}

trait WantedExt {
    fn contains_type(&self, row: &CacheElement) -> bool;
}

impl WantedExt for HashSet<String> {
    fn contains_type(&self, row: &CacheElement) -> bool {
        row.type_name
            .as_deref()
            .map(|t| self.contains(t))
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn op(kind: PendingKind) -> (PendingOp, oneshot::Receiver<Result<PendingOutcome, CacheError>>) {
        let (tx, rx) = oneshot::channel();
        (PendingOp { kind, sink: tx }, rx)
    }

    #[tokio::test]
    async fn coalesces_selects_across_an_invalidate() {
        let (op1, rx1) = op(PendingKind::SelectByKey(vec!["Foo".into()]));
        let (op2, rx2) = op(PendingKind::SelectByKey(vec!["Bar".into()]));
        let (op3, _rx3) = op(PendingKind::InvalidateByKey(vec!["Bamf".into()]));
        let (op4, rx4) = op(PendingKind::SelectByKey(vec!["Baz".into()]));

        let (ops, fanout) = coalesce(vec![op1, op2, op3, op4]);
        assert_eq!(ops.len(), 2);
        assert!(matches!(&ops[0], PreparedOp::BulkSelectByKey(keys) if keys.len() == 3));
        assert!(matches!(&ops[1], PreparedOp::BulkInvalidateByKey(keys) if keys.len() == 1));

        let rows = vec![
            CacheElement::new("Foo", vec![1], 0),
            CacheElement::new("Bar", vec![2], 0),
        ];
        let mut fanout = fanout.into_iter();
        fanout
            .next()
            .unwrap()
            .dispatch(Ok(OpOutcome::Rows(rows)));
        fanout.next().unwrap().dispatch(Ok(OpOutcome::Unit));

        let out1 = rx1.await.unwrap().unwrap();
        assert!(matches!(out1, PendingOutcome::Rows(r) if r.len() == 1 && r[0].key == "Foo"));
        let out2 = rx2.await.unwrap().unwrap();
        assert!(matches!(out2, PendingOutcome::Rows(r) if r.len() == 1 && r[0].key == "Bar"));
        let out4 = rx4.await.unwrap().unwrap();
        assert!(matches!(out4, PendingOutcome::Rows(r) if r.is_empty()));
    }

    #[tokio::test]
    async fn insert_is_a_barrier_for_open_selects() {
        let (op1, rx1) = op(PendingKind::SelectByKey(vec!["Foo".into()]));
        let (op2, _) = op(PendingKind::Insert(vec![CacheElement::new(
            "Foo",
            vec![1, 2, 3],
            0,
        )]));
        let (op3, rx3) = op(PendingKind::SelectByKey(vec!["Foo".into()]));
        let (op4, _) = op(PendingKind::Insert(vec![CacheElement::new(
            "Foo",
            vec![4, 5, 6],
            0,
        )]));

        let (ops, fanout) = coalesce(vec![op1, op2, op3, op4]);
        assert_eq!(ops.len(), 4);
        assert!(matches!(&ops[0], PreparedOp::BulkSelectByKey(_)));
        assert!(matches!(&ops[1], PreparedOp::BulkInsert(_)));
        assert!(matches!(&ops[2], PreparedOp::BulkSelectByKey(_)));
        assert!(matches!(&ops[3], PreparedOp::BulkInsert(_)));

        let mut fanout = fanout.into_iter();
        fanout.next().unwrap().dispatch(Ok(OpOutcome::Rows(vec![])));
        assert!(matches!(rx1.await.unwrap().unwrap(), PendingOutcome::Rows(r) if r.is_empty()));

        fanout.next().unwrap().dispatch(Ok(OpOutcome::Unit));
        fanout.next().unwrap().dispatch(Ok(OpOutcome::Rows(vec![
            CacheElement::new("Foo", vec![1, 2, 3], 0),
        ])));
        assert!(
            matches!(rx3.await.unwrap().unwrap(), PendingOutcome::Rows(r) if r[0].value == vec![1,2,3])
        );
    }
}
