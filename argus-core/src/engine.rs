//! Engine context
//!
//! The process-wide coordination point: owns the resource graph, the
//! scheduler, the job manager, and the per-device build permits, all
//! constructed from one [`EngineConfig`] and passed down explicitly. The
//! graph is fully assembled in `new` and never mutated afterwards, so
//! `start` only launches threads and `stop` only tears them down; both
//! are idempotent.

use std::sync::Arc;

use crate::Timestamp;
use crate::config::EngineConfig;
use crate::error::{Error, Result};
use crate::exec::RetrieveResult;
use crate::index::SearchResult;
use crate::plan::{PlaceholderGroup, RetrievePlan, VectorPlan};
use crate::sched::{
    BuildMgr, JobHandle, JobManager, JobOutcome, JobRequest, PathOptimizer, Resource,
    ResourceGraph, ResourceKind, Scheduler,
};
use crate::segment::SegmentInternal;
use crate::storage::{FileManager, LocalFileManager};

pub struct Engine {
    config: EngineConfig,
    graph: Arc<ResourceGraph>,
    scheduler: Scheduler,
    job_manager: JobManager,
}

impl Engine {
    pub fn new(config: EngineConfig) -> Result<Self> {
        let config = config.validate()?;
        let graph = Arc::new(build_simple_graph(&config)?);
        graph.validate()?;

        let optimizer = Arc::new(PathOptimizer::new(
            Arc::clone(&graph),
            config.gpu_search_pool.clone(),
            config.gpu_build_pool.clone(),
        ));
        let build_mgr = Arc::new(BuildMgr::new(config.all_gpus()));
        let file_manager: Option<Arc<dyn FileManager>> = config.index_root.as_ref().map(|root| {
            Arc::new(LocalFileManager::new(root).with_mmap(config.enable_mmap))
                as Arc<dyn FileManager>
        });
        let scheduler = Scheduler::new(
            Arc::clone(&graph),
            build_mgr,
            file_manager,
            config.cpu_executor_threads,
        );
        let job_manager = JobManager::new(Arc::clone(&graph), optimizer);

        Ok(Self {
            config,
            graph,
            scheduler,
            job_manager,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn graph(&self) -> &ResourceGraph {
        &self.graph
    }

    /// Launch the scheduler threads. Idempotent.
    pub fn start(&self) -> Result<()> {
        self.scheduler.start()
    }

    /// Stop the scheduler, cancelling whatever is still queued. Idempotent.
    pub fn stop(&self) {
        self.scheduler.stop();
    }

    pub fn is_running(&self) -> bool {
        self.scheduler.is_running()
    }

    pub fn submit(&self, request: JobRequest) -> Result<JobHandle> {
        if !self.scheduler.is_running() {
            return Err(Error::Config("engine is not started".into()));
        }
        self.job_manager.submit(request)
    }

    /// Submit an ANN search over `segments` and wait for the merged
    /// result.
    pub fn search(
        &self,
        plan: VectorPlan,
        placeholders: PlaceholderGroup,
        segments: Vec<Arc<dyn SegmentInternal>>,
        ts: Timestamp,
    ) -> Result<SearchResult> {
        let handle = self.submit(JobRequest::Search {
            plan,
            placeholders,
            segments,
            ts,
            deadline: None,
        })?;
        match handle.wait()? {
            JobOutcome::Search(result) => Ok(result),
            other => Err(Error::Unexpected(format!(
                "search job produced {:?}",
                other
            ))),
        }
    }

    /// Submit a retrieve (or count) over `segments` and wait.
    pub fn retrieve(
        &self,
        plan: RetrievePlan,
        segments: Vec<Arc<dyn SegmentInternal>>,
        ts: Timestamp,
    ) -> Result<RetrieveResult> {
        let handle = self.submit(JobRequest::Retrieve {
            plan,
            segments,
            ts,
            deadline: None,
        })?;
        match handle.wait()? {
            JobOutcome::Retrieve(result) => Ok(result),
            other => Err(Error::Unexpected(format!(
                "retrieve job produced {:?}",
                other
            ))),
        }
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Build the `simple`-mode resource graph: one disk, one cpu, a gpu node
/// per pooled device. Search-pool devices come first; devices only in the
/// build pool are added afterwards as independent gpu resources.
fn build_simple_graph(config: &EngineConfig) -> Result<ResourceGraph> {
    let mut graph = ResourceGraph::new();
    graph.add(Resource::new("disk", ResourceKind::Disk, 0, true, false))?;
    graph.add(Resource::new("cpu", ResourceKind::Cpu, 0, true, true))?;
    graph.connect("disk", "cpu", config.disk_cpu_bandwidth)?;

    for &device_id in &config.gpu_search_pool {
        let name = format!("gpu{}", device_id);
        graph.add(Resource::new(&name, ResourceKind::Gpu, device_id, true, true))?;
        graph.connect("cpu", &name, config.cpu_gpu_bandwidth)?;
    }
    for device_id in config.build_only_gpus() {
        let name = format!("gpu{}", device_id);
        graph.add(Resource::new(&name, ResourceKind::Gpu, device_id, true, true))?;
        graph.connect("cpu", &name, config.cpu_gpu_bandwidth)?;
    }
    Ok(graph)
}

#[cfg(test)]
mod tests {
    use std::time::{Duration, Instant};

    use super::*;
    use crate::plan::{CompareOp, Expr, Literal, Metric, SearchInfo};
    use crate::segment::MemSegment;
    use crate::storage::{FileManagerContext, IndexMeta};

    fn vector_segment(offset: f32, rows: usize) -> Arc<dyn SegmentInternal> {
        let mut builder = MemSegment::builder();
        let data: Vec<f32> = (0..rows)
            .flat_map(|i| [offset + i as f32, 0.0])
            .collect();
        builder.add_vector_column("embedding", 2, Metric::L2, data);
        Arc::new(builder.build().unwrap())
    }

    fn scalar_segment(values: Vec<i64>) -> (Arc<dyn SegmentInternal>, crate::FieldId) {
        let mut builder = MemSegment::builder();
        let field = builder.add_int64_column("v", values);
        (Arc::new(builder.build().unwrap()), field)
    }

    fn started_engine(config: EngineConfig) -> Engine {
        let engine = Engine::new(config).unwrap();
        engine.start().unwrap();
        engine
    }

    #[test]
    fn test_simple_graph_topology() {
        let config = EngineConfig {
            gpu_search_pool: vec![0],
            gpu_build_pool: vec![0, 1],
            ..Default::default()
        };
        let engine = Engine::new(config).unwrap();
        let graph = engine.graph();
        assert!(graph.get("disk").is_some());
        assert!(graph.get("cpu").is_some());
        assert!(graph.get("gpu0").is_some());
        // build-only device 1 still joins the graph
        assert!(graph.get("gpu1").is_some());
        assert_eq!(graph.resources().len(), 4);
        assert_eq!(
            graph.shortest_path("disk", "gpu1").unwrap(),
            vec!["disk", "cpu", "gpu1"]
        );
    }

    #[test]
    fn test_start_stop_idempotent() {
        let engine = Engine::new(EngineConfig::default()).unwrap();
        engine.start().unwrap();
        engine.start().unwrap();
        assert!(engine.is_running());
        engine.stop();
        engine.stop();
        assert!(!engine.is_running());
    }

    #[test]
    fn test_submit_before_start_rejected() {
        let engine = Engine::new(EngineConfig::default()).unwrap();
        let (segment, _) = scalar_segment(vec![1, 2, 3]);
        let err = engine
            .retrieve(
                RetrievePlan {
                    filter: None,
                    limit: -1,
                    is_count: false,
                },
                vec![segment],
                100,
            )
            .unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_search_job_merges_segments() {
        let engine = started_engine(EngineConfig::default());
        // segment 0 rows at x=0,1,2; segment 1 rows at x=0.5,1.5,2.5
        let segments = vec![vector_segment(0.0, 3), vector_segment(0.5, 3)];

        let plan = VectorPlan {
            vector_field: 100,
            search_info: SearchInfo::new(3, Metric::L2),
            filter: None,
        };
        let placeholders = PlaceholderGroup::new(1, 2, vec![0.0, 0.0]);
        let result = engine.search(plan, placeholders, segments, 100).unwrap();

        // global ids: segment 1 starts at base 3; nearest are 0 (x=0),
        // 3 (x=0.5), 1 (x=1)
        assert_eq!(result.query_offsets(0), &[0, 3, 1]);
        engine.stop();
    }

    #[test]
    fn test_retrieve_job_across_segments() {
        let engine = started_engine(EngineConfig::default());
        let (seg_a, field_a) = scalar_segment(vec![1, 7, 3]);
        let (seg_b, _) = scalar_segment(vec![7, 5, 7]);

        let plan = RetrievePlan {
            filter: Some(Expr::compare(field_a, CompareOp::Eq, Literal::Int64(7))),
            limit: -1,
            is_count: false,
        };
        let result = engine.retrieve(plan, vec![seg_a, seg_b], 100).unwrap();
        // matches: row 1 of segment a, rows 0 and 2 of segment b (base 3)
        assert_eq!(result, RetrieveResult::Offsets(vec![1, 3, 5]));
        engine.stop();
    }

    #[test]
    fn test_count_job_sums_segments() {
        let engine = started_engine(EngineConfig::default());
        let (seg_a, field_a) = scalar_segment(vec![7, 7, 1]);
        let (seg_b, _) = scalar_segment(vec![7, 1, 1]);

        let plan = RetrievePlan {
            filter: Some(Expr::compare(field_a, CompareOp::Eq, Literal::Int64(7))),
            limit: -1,
            is_count: true,
        };
        let result = engine.retrieve(plan, vec![seg_a, seg_b], 100).unwrap();
        assert_eq!(result, RetrieveResult::Count(3));
        engine.stop();
    }

    #[test]
    fn test_failing_task_fails_job() {
        let engine = started_engine(EngineConfig::default());
        let (seg_a, field_a) = scalar_segment(vec![1, 2, 3]);
        let (seg_b, _) = scalar_segment(vec![4, 5, 6]);

        // a field no segment carries fails the typing pre-pass on every
        // task; the first failure must fail the whole job
        let unknown_field = field_a + 1000;
        let plan = RetrievePlan {
            filter: Some(Expr::compare(unknown_field, CompareOp::Eq, Literal::Int64(1))),
            limit: -1,
            is_count: false,
        };
        let err = engine.retrieve(plan, vec![seg_a, seg_b], 100).unwrap_err();
        assert!(matches!(err, Error::InvalidExpression(_)));
        engine.stop();
    }

    #[test]
    fn test_deadline_fails_job() {
        let engine = started_engine(EngineConfig::default());
        let (segment, _) = scalar_segment(vec![1, 2, 3]);
        let handle = engine
            .submit(JobRequest::Retrieve {
                plan: RetrievePlan {
                    filter: None,
                    limit: -1,
                    is_count: false,
                },
                segments: vec![segment],
                ts: 100,
                deadline: Some(Instant::now() - Duration::from_millis(1)),
            })
            .unwrap();
        let err = handle.wait().unwrap_err();
        assert!(matches!(err, Error::DeadlineExceeded));
        engine.stop();
    }

    #[test]
    fn test_cancel_job() {
        let engine = started_engine(EngineConfig::default());
        let (segment, _) = scalar_segment(vec![1, 2, 3]);
        let handle = engine
            .submit(JobRequest::Retrieve {
                plan: RetrievePlan {
                    filter: None,
                    limit: -1,
                    is_count: false,
                },
                segments: vec![segment],
                ts: 100,
                deadline: None,
            })
            .unwrap();
        handle.cancel();
        // the job either raced to completion as cancelled or was cancelled
        // before execution; both surface Cancelled
        match handle.wait() {
            Err(Error::Cancelled) => {}
            other => panic!("expected cancelled job, got {:?}", other.map(|_| ())),
        }
        engine.stop();
    }

    #[test]
    fn test_gpu_search_routing() {
        let config = EngineConfig {
            gpu_search_pool: vec![0, 1],
            gpu_build_pool: vec![0],
            ..Default::default()
        };
        let engine = started_engine(config);
        let segments = vec![vector_segment(0.0, 4)];

        let plan = VectorPlan {
            vector_field: 100,
            search_info: SearchInfo::new(2, Metric::L2)
                .with_params(serde_json::json!({"use_gpu": true})),
            filter: None,
        };
        let placeholders = PlaceholderGroup::new(1, 2, vec![2.0, 0.0]);
        let result = engine.search(plan, placeholders, segments, 100).unwrap();
        assert_eq!(result.query_offsets(0), &[2, 1]);
        engine.stop();
    }

    #[test]
    fn test_build_and_load_jobs() {
        let dir = tempfile::tempdir().unwrap();
        let config = EngineConfig {
            index_root: Some(dir.path().to_path_buf()),
            ..Default::default()
        };
        let engine = started_engine(config);

        let ctx = FileManagerContext {
            collection_id: 1,
            partition_id: 1,
            segment_id: 9,
            field_id: 100,
        };
        let meta = IndexMeta {
            segment_id: 9,
            field_id: 100,
            build_id: 1,
            version: 1,
        };

        let handle = engine
            .submit(JobRequest::Build {
                dim: 2,
                metric: Metric::L2,
                data: vec![0.0, 0.0, 1.0, 1.0],
                ctx,
                meta,
            })
            .unwrap();
        assert!(matches!(handle.wait(), Ok(JobOutcome::Built)));

        let handle = engine.submit(JobRequest::Load { ctx, meta }).unwrap();
        assert!(matches!(handle.wait(), Ok(JobOutcome::Loaded)));
        engine.stop();
    }

    #[test]
    fn test_stop_with_queued_work_unblocks_waiters() {
        let engine = started_engine(EngineConfig::default());
        let (segment, _) = scalar_segment(vec![1, 2, 3]);
        let handle = engine
            .submit(JobRequest::Retrieve {
                plan: RetrievePlan {
                    filter: None,
                    limit: -1,
                    is_count: false,
                },
                segments: vec![segment],
                ts: 100,
                deadline: None,
            })
            .unwrap();
        engine.stop();
        // whichever way the race went, wait() must return
        let _ = handle.wait();
    }
}
