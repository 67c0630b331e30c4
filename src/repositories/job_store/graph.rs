//! Depth-bounded dependency graph around a job.

use std::collections::{BTreeMap, BTreeSet, HashSet, VecDeque};

use sea_orm::{ColumnTrait, EntityTrait, QueryFilter, QueryOrder, QuerySelect};
use serde::Serialize;
use tracing::{debug, instrument};

use super::query::{HistoryOptions, load_job};
use super::{JobStore, StoreError, find_job_row};
use crate::models::{Flows, Job, Jobs, flow, job, job_history};

/// Traversal depth in each direction from the starting job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GraphOptions {
    pub producer_depth: u32,
    pub consumer_depth: u32,
}

impl Default for GraphOptions {
    fn default() -> Self {
        Self {
            producer_depth: 1,
            consumer_depth: 1,
        }
    }
}

/// A job in the graph with the depth it was first reached at.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GraphNode {
    #[serde(flatten)]
    pub job: Job,
    pub depth: u32,
    /// Latest execution, if the job ever ran
    pub history: Option<job_history::Model>,
}

/// Nodes keyed by job id and `(producer, consumer)` edges.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct JobGraph {
    pub nodes: BTreeMap<String, GraphNode>,
    pub edges: Vec<(String, String)>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    /// Follow edges towards the jobs that must succeed first.
    Producers,
    /// Follow edges towards the jobs waiting on this one.
    Consumers,
}

impl JobStore {
    /// Collects the jobs around `job_id` up to the given depths.
    ///
    /// Each direction is walked breadth first, so a job keeps the shallowest
    /// depth it is discovered at and is expanded at most once per direction.
    /// Cycles therefore terminate. Returns `None` when the job does not exist.
    #[instrument(skip(self))]
    pub async fn get_graph(
        &self,
        job_id: &str,
        options: GraphOptions,
    ) -> Result<Option<JobGraph>, StoreError> {
        let Some(root) = find_job_row(self.db(), job_id).await? else {
            return Ok(None);
        };

        let mut nodes = BTreeMap::new();
        let mut edges = BTreeSet::new();
        let root_serial = root.id;
        nodes.insert(root.job_id.clone(), self.graph_node(root, 0).await?);

        for (direction, bound) in [
            (Direction::Producers, options.producer_depth),
            (Direction::Consumers, options.consumer_depth),
        ] {
            let mut queue = VecDeque::from([(root_serial, job_id.to_string(), 0u32)]);
            let mut expanded = HashSet::new();

            while let Some((serial_id, current, depth)) = queue.pop_front() {
                if depth >= bound || !expanded.insert(serial_id) {
                    continue;
                }

                for neighbour in self.neighbours(serial_id, direction).await? {
                    let edge = match direction {
                        Direction::Producers => (neighbour.job_id.clone(), current.clone()),
                        Direction::Consumers => (current.clone(), neighbour.job_id.clone()),
                    };
                    edges.insert(edge);

                    let next_depth = depth + 1;
                    let next = (neighbour.id, neighbour.job_id.clone(), next_depth);
                    match nodes.get_mut(&neighbour.job_id) {
                        Some(node) => node.depth = node.depth.min(next_depth),
                        None => {
                            let key = neighbour.job_id.clone();
                            let node = self.graph_node(neighbour, next_depth).await?;
                            nodes.insert(key, node);
                        }
                    }
                    queue.push_back(next);
                }
            }
        }

        debug!(nodes = nodes.len(), edges = edges.len(), "Built job graph");
        Ok(Some(JobGraph {
            nodes,
            edges: edges.into_iter().collect(),
        }))
    }

    async fn graph_node(&self, row: job::Model, depth: u32) -> Result<GraphNode, StoreError> {
        let history = self
            .get_execution_history(&row.job_id, &HistoryOptions::default())
            .await?
            .into_iter()
            .next();
        let job = load_job(self.db(), row).await?;
        Ok(GraphNode {
            job,
            depth,
            history,
        })
    }

    async fn neighbours(
        &self,
        serial_id: i32,
        direction: Direction,
    ) -> Result<Vec<job::Model>, StoreError> {
        let (from, to) = match direction {
            Direction::Producers => (flow::Column::ConsumerId, flow::Column::ProducerId),
            Direction::Consumers => (flow::Column::ProducerId, flow::Column::ConsumerId),
        };

        let ids = Flows::find()
            .select_only()
            .column(to)
            .filter(from.eq(serial_id))
            .into_tuple::<i32>()
            .all(self.db())
            .await?;
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        Ok(Jobs::find()
            .filter(job::Column::Id.is_in(ids))
            .order_by_asc(job::Column::JobId)
            .all(self.db())
            .await?)
    }
}
