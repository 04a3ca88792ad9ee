use crate::model::{DataSourceRef, Query, QueryResult};
use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};
use std::fmt::{Display, Formatter};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchState {
    Pending,
    Started,
    Done,
}

/// The queries of one request that target the same datasource. They are sent
/// to the executor together, so dependencies between them are resolved by
/// the executor and never show up in `depends`.
#[derive(Debug, Clone, PartialEq)]
pub struct Batch {
    pub datasource: DataSourceRef,
    pub queries: Vec<Query>,
    /// RefIDs owned by other batches that must have results before this one starts.
    pub depends: BTreeSet<String>,
    pub state: BatchState,
}

impl Batch {
    fn new(datasource: DataSourceRef) -> Batch {
        Batch {
            datasource,
            queries: vec![],
            depends: BTreeSet::new(),
            state: BatchState::Pending,
        }
    }

    pub fn ref_ids(&self) -> Vec<String> {
        self.queries.iter().map(|q| q.ref_id.clone()).collect()
    }

    pub fn is_ready(&self, results: &HashMap<String, QueryResult>) -> bool {
        self.state == BatchState::Pending && self.depends.iter().all(|d| results.contains_key(d))
    }

    pub fn mark_started(&mut self) {
        if self.state == BatchState::Pending {
            self.state = BatchState::Started;
        }
    }

    pub fn mark_done(&mut self) {
        self.state = BatchState::Done;
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum BatchError {
    DuplicateRefId(String),
    SelfDependency(String),
    UnknownDependency { ref_id: String, depends_on: String },
    DependencyCycle(Vec<String>),
}

impl Display for BatchError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            BatchError::DuplicateRefId(r) => {
                write!(f, "RefID {} is used by more than one query", r)
            }
            BatchError::SelfDependency(r) => {
                write!(f, "Query {} depends on itself", r)
            }
            BatchError::UnknownDependency { ref_id, depends_on } => {
                write!(
                    f,
                    "Query {} depends on {} which is not part of the request",
                    ref_id, depends_on
                )
            }
            BatchError::DependencyCycle(refs) => {
                write!(f, "Dependency cycle between queries {}", refs.join(", "))
            }
        }
    }
}

/// Groups queries by datasource in first-seen order and wires up the
/// cross-batch dependencies. The result is validated up front, so the
/// scheduler can rely on every batch eventually becoming ready.
pub fn get_batches(queries: &[Query]) -> Result<Vec<Batch>, BatchError> {
    let mut batches: Vec<Batch> = vec![];
    let mut batch_of_ref: HashMap<&str, usize> = HashMap::new();

    for q in queries {
        let index = match batches.iter().position(|b| b.datasource == q.datasource) {
            Some(i) => i,
            None => {
                batches.push(Batch::new(q.datasource.clone()));
                batches.len() - 1
            }
        };
        if batch_of_ref.insert(&q.ref_id, index).is_some() {
            return Err(BatchError::DuplicateRefId(q.ref_id.clone()));
        }
        batches[index].queries.push(q.clone());
    }

    for q in queries {
        let own = batch_of_ref[q.ref_id.as_str()];
        for d in &q.depends {
            if d == &q.ref_id {
                return Err(BatchError::SelfDependency(q.ref_id.clone()));
            }
            match batch_of_ref.get(d.as_str()) {
                None => {
                    return Err(BatchError::UnknownDependency {
                        ref_id: q.ref_id.clone(),
                        depends_on: d.clone(),
                    })
                }
                Some(other) if *other != own => {
                    batches[own].depends.insert(d.clone());
                }
                Some(_) => {}
            }
        }
    }

    check_acyclic(&batches, &batch_of_ref)?;
    Ok(batches)
}

fn check_acyclic(batches: &[Batch], batch_of_ref: &HashMap<&str, usize>) -> Result<(), BatchError> {
    let mut in_degree = vec![0usize; batches.len()];
    let mut dependents: Vec<HashSet<usize>> = vec![HashSet::new(); batches.len()];
    for (i, b) in batches.iter().enumerate() {
        let upstream: HashSet<usize> = b.depends.iter().map(|d| batch_of_ref[d.as_str()]).collect();
        in_degree[i] = upstream.len();
        for u in upstream {
            dependents[u].insert(i);
        }
    }

    let mut queue: VecDeque<usize> = (0..batches.len()).filter(|i| in_degree[*i] == 0).collect();
    let mut visited = 0;
    while let Some(i) = queue.pop_front() {
        visited += 1;
        for d in &dependents[i] {
            in_degree[*d] -= 1;
            if in_degree[*d] == 0 {
                queue.push_back(*d);
            }
        }
    }

    if visited == batches.len() {
        Ok(())
    } else {
        let stuck = batches
            .iter()
            .enumerate()
            .filter(|(i, _)| in_degree[*i] > 0)
            .flat_map(|(_, b)| b.ref_ids())
            .collect();
        Err(BatchError::DependencyCycle(stuck))
    }
}
