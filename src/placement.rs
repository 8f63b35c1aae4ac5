use rand::Rng;

use crate::counter::Counter;
use crate::model::{Execution, Processor, CONCURRENCY_ALLOW};

/// Hint controlling the `forbid` branch's single-target selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Rebalance {
    /// Least-loaded (index 0 after a stable ascending sort by `undone`).
    #[default]
    LeastLoaded,
    /// Uniformly random pick among eligible processors.
    Random,
}

/// Given a firing and the current processor set for its application,
/// returns the target set per the job's concurrency policy:
/// - `allow` broadcasts to every eligible worker (sorted by load, though
///   order no longer matters once every target is selected),
/// - `forbid` routes to a single worker: least-loaded by default, or a
///   uniformly random pick when `rebalance == Random`.
///
/// Processors are refreshed from `counter` before sorting: `undone` is
/// always recomputed from live counter state, never trusted from the
/// caller.
pub fn place(
    processors: Vec<Processor>,
    ex: &Execution,
    counter: &Counter,
    rebalance: Rebalance,
) -> Vec<Processor> {
    if processors.is_empty() {
        return Vec::new();
    }

    let quota = ex.quota_label();
    let mut processors = processors;
    for p in processors.iter_mut() {
        p.undone = counter.get(&p.node_name, &quota);
    }
    // Vec::sort_by is stable: ties retain input order.
    processors.sort_by(|a, b| a.undone.cmp(&b.undone));

    if ex.concurrency == CONCURRENCY_ALLOW {
        return processors;
    }

    match rebalance {
        Rebalance::Random => {
            let idx = rand::thread_rng().gen_range(0..processors.len());
            vec![processors[idx].clone()]
        }
        Rebalance::LeastLoaded => vec![processors[0].clone()],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Job;

    fn processor(node_name: &str) -> Processor {
        Processor {
            application: "spider".into(),
            node_name: node_name.into(),
            ip: "127.0.0.1".into(),
            port: 9001,
            status: true,
            max_execution_limit: 10,
            undone: 0,
        }
    }

    fn execution(concurrency: &str) -> Execution {
        let job = Job::builder()
            .name("j1")
            .schedule("@every 2s")
            .application("spider")
            .concurrency(concurrency)
            .build();
        Execution::new(&job)
    }

    #[test]
    fn empty_processor_list_yields_empty_targets() {
        let counter = Counter::new();
        let ex = execution("forbid");
        assert!(place(Vec::new(), &ex, &counter, Rebalance::LeastLoaded).is_empty());
    }

    #[test]
    fn allow_broadcasts_to_every_processor() {
        let counter = Counter::new();
        let ex = execution("allow");
        let targets = place(
            vec![processor("w1"), processor("w2")],
            &ex,
            &counter,
            Rebalance::LeastLoaded,
        );
        assert_eq!(targets.len(), 2);
    }

    #[test]
    fn forbid_default_picks_least_loaded() {
        let counter = Counter::new();
        counter.plus("w1", "undo");
        counter.plus("w1", "undo");
        counter.plus("w1", "undo");
        counter.plus("w1", "undo");
        counter.plus("w1", "undo"); // w1 undone = 5
        counter.plus("w2", "undo");
        counter.plus("w2", "undo"); // w2 undone = 2

        let ex = execution("forbid");
        let targets = place(
            vec![processor("w1"), processor("w2")],
            &ex,
            &counter,
            Rebalance::LeastLoaded,
        );
        assert_eq!(targets.len(), 1);
        assert_eq!(targets[0].node_name, "w2");
    }

    #[test]
    fn sort_is_stable_on_ties() {
        let counter = Counter::new();
        let ex = execution("allow");
        let targets = place(
            vec![processor("w1"), processor("w2"), processor("w3")],
            &ex,
            &counter,
            Rebalance::LeastLoaded,
        );
        let names: Vec<&str> = targets.iter().map(|p| p.node_name.as_str()).collect();
        assert_eq!(names, vec!["w1", "w2", "w3"]);
    }

    #[test]
    fn forbid_random_picks_one_of_the_eligible_set() {
        let counter = Counter::new();
        let ex = execution("forbid");
        let targets = place(
            vec![processor("w1"), processor("w2")],
            &ex,
            &counter,
            Rebalance::Random,
        );
        assert_eq!(targets.len(), 1);
        assert!(["w1", "w2"].contains(&targets[0].node_name.as_str()));
    }
}
