// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 strucflow contributors

//! Stage-wave scheduler
//!
//! Walks the frozen topological order one stage at a time. Within a
//! per-binding stage, bindings run concurrently up to the tool concurrency
//! limit; a failed binding is isolated and only its own downstream nodes
//! are skipped. A shared stage runs once, after every contributing binding
//! has finished; a missing contribution is a fatal join error naming the
//! bindings that failed to deliver.

use colored::Colorize;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use super::node::{expand, GROUP_BINDING};
use crate::cache::{stage_key, Cache, CachedEntry};
use crate::errors::{StrucflowError, StrucflowResult};
use crate::graph::{EdgeKind, InputSource, PipelineGraph, StageKind, StageScope, StageSpec};
use crate::ops::{Inputs, InvocationContext, Outputs};
use crate::params::ParameterBinding;
use crate::resolve::ArtifactResolver;
use crate::store::ArtifactStore;
use crate::value::Value;

/// Options for one run
#[derive(Debug, Clone)]
pub struct RunOptions {
    /// Maximum concurrent external tool invocations
    pub concurrency: usize,
    /// Bypass the cache and re-invoke every tool
    pub no_cache: bool,
    /// Print the expanded plan without executing anything
    pub dry_run: bool,
    /// Fail a binding when any element of a map-expanded stage fails
    ///
    /// When disabled, failed elements are dropped from the merged output
    /// lists and the binding continues with the survivors.
    pub abort_on_map_failure: bool,
    /// Suppress per-node progress output
    pub quiet: bool,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            concurrency: 1,
            no_cache: false,
            dry_run: false,
            abort_on_map_failure: true,
            quiet: true,
        }
    }
}

/// One isolated per-binding failure
#[derive(Debug, Clone)]
pub struct BindingFailure {
    pub binding: String,
    pub stage: String,
    pub error: String,
}

/// Outcome of one run
#[derive(Debug)]
pub struct RunReport {
    /// Bindings whose per-binding stages all completed
    pub succeeded: Vec<String>,
    /// First failure per failed binding
    pub failed: Vec<BindingFailure>,
    /// A cross-binding or shared-stage failure, fatal to the run
    pub fatal: Option<String>,
    pub duration: Duration,
    /// Node executions satisfied from the cache
    pub cache_hits: usize,
    /// External tool invocations actually performed
    pub executed: usize,
}

impl RunReport {
    pub fn success(&self) -> bool {
        self.failed.is_empty() && self.fatal.is_none()
    }
}

/// Orchestrates one pipeline run
pub struct Scheduler {
    graph: Arc<PipelineGraph>,
    bindings: Vec<ParameterBinding>,
    resolver: ArtifactResolver,
    cache: Arc<dyn Cache>,
    store: Arc<ArtifactStore>,
    workspace_root: PathBuf,
}

/// What one node task hands back to the stage loop
struct NodeOutcome {
    binding_id: String,
    result: StrucflowResult<Outputs>,
    from_cache: bool,
}

impl Scheduler {
    pub fn new(
        graph: PipelineGraph,
        bindings: Vec<ParameterBinding>,
        resolver: ArtifactResolver,
        cache: Arc<dyn Cache>,
        store: ArtifactStore,
        workspace_root: impl Into<PathBuf>,
    ) -> Self {
        Self {
            graph: Arc::new(graph),
            bindings,
            resolver,
            cache,
            store: Arc::new(store),
            workspace_root: workspace_root.into(),
        }
    }

    /// Execute the pipeline over all bindings
    pub async fn run(&self, options: &RunOptions) -> StrucflowResult<RunReport> {
        let start = Instant::now();

        if options.dry_run {
            return Ok(self.plan(options, start));
        }

        let semaphore = Arc::new(Semaphore::new(options.concurrency.max(1)));
        let cache_hits = Arc::new(AtomicUsize::new(0));
        let executed = Arc::new(AtomicUsize::new(0));

        // Completed node outputs, keyed by (stage, binding id)
        let mut results: BTreeMap<(String, String), Outputs> = BTreeMap::new();
        // First failure per binding; later stages skip these bindings
        let mut failures: BTreeMap<String, BindingFailure> = BTreeMap::new();
        let mut fatal: Option<String> = None;

        let order: Vec<String> = self
            .graph
            .topological_order()
            .map(|s| s.name.clone())
            .collect();

        for stage_name in &order {
            let stage = self.graph.stage(stage_name)?;

            if stage.scope == StageScope::Shared {
                match self
                    .run_shared_stage(
                        stage,
                        &results,
                        &failures,
                        options,
                        &semaphore,
                        &cache_hits,
                        &executed,
                    )
                    .await
                {
                    Ok((outputs, from_cache)) => {
                        self.report_node(options, stage_name, GROUP_BINDING, from_cache, None);
                        results.insert((stage_name.clone(), GROUP_BINDING.to_string()), outputs);
                    }
                    Err(e) => {
                        self.report_node(options, stage_name, GROUP_BINDING, false, Some(&e));
                        fatal = Some(e.to_string());
                        break;
                    }
                }
                continue;
            }

            let mut tasks: JoinSet<NodeOutcome> = JoinSet::new();
            for binding in &self.bindings {
                let binding_id = binding.id();
                if failures.contains_key(&binding_id) {
                    tracing::debug!(stage = %stage_name, binding = %binding_id, "skipping failed binding");
                    continue;
                }

                let inputs = match self.gather_per_binding_inputs(stage, binding, &results) {
                    Ok(inputs) => inputs,
                    Err(e) => {
                        self.report_node(options, stage_name, &binding_id, false, Some(&e));
                        failures.insert(
                            binding_id.clone(),
                            BindingFailure {
                                binding: binding_id,
                                stage: stage_name.clone(),
                                error: e.to_string(),
                            },
                        );
                        continue;
                    }
                };

                let task = NodeTask {
                    graph: Arc::clone(&self.graph),
                    stage: stage_name.clone(),
                    binding_id: binding_id.clone(),
                    cache: Arc::clone(&self.cache),
                    store: Arc::clone(&self.store),
                    semaphore: Arc::clone(&semaphore),
                    workspace_root: self.workspace_root.clone(),
                    no_cache: options.no_cache,
                    abort_on_map_failure: options.abort_on_map_failure,
                    cache_hits: Arc::clone(&cache_hits),
                    executed: Arc::clone(&executed),
                };
                tasks.spawn(async move { task.run(inputs).await });
            }

            while let Some(joined) = tasks.join_next().await {
                let outcome = joined.map_err(|e| StrucflowError::Io {
                    message: format!("stage '{}' worker panicked: {}", stage_name, e),
                })?;

                match outcome.result {
                    Ok(outputs) => {
                        self.report_node(
                            options,
                            stage_name,
                            &outcome.binding_id,
                            outcome.from_cache,
                            None,
                        );
                        results.insert((stage_name.clone(), outcome.binding_id), outputs);
                    }
                    Err(e) => {
                        self.report_node(options, stage_name, &outcome.binding_id, false, Some(&e));
                        failures.insert(
                            outcome.binding_id.clone(),
                            BindingFailure {
                                binding: outcome.binding_id,
                                stage: stage_name.clone(),
                                error: e.to_string(),
                            },
                        );
                    }
                }
            }
        }

        let succeeded = self
            .bindings
            .iter()
            .map(|b| b.id())
            .filter(|id| !failures.contains_key(id))
            .collect();

        Ok(RunReport {
            succeeded,
            failed: failures.into_values().collect(),
            fatal,
            duration: start.elapsed(),
            cache_hits: cache_hits.load(Ordering::SeqCst),
            executed: executed.load(Ordering::SeqCst),
        })
    }

    /// Print the expanded plan without touching the cache or any tool
    fn plan(&self, options: &RunOptions, start: Instant) -> RunReport {
        if !options.quiet {
            for node in expand(&self.graph, &self.bindings) {
                println!("{} {} [{}]", "→".blue(), node.stage, node.binding_id.dimmed());
            }
        }
        RunReport {
            succeeded: self.bindings.iter().map(|b| b.id()).collect(),
            failed: Vec::new(),
            fatal: None,
            duration: start.elapsed(),
            cache_hits: 0,
            executed: 0,
        }
    }

    fn report_node(
        &self,
        options: &RunOptions,
        stage: &str,
        binding: &str,
        from_cache: bool,
        error: Option<&StrucflowError>,
    ) {
        match error {
            Some(e) => {
                tracing::warn!(stage, binding, error = %e, "node failed");
                if !options.quiet {
                    println!("{} {} [{}]: {}", "✗".red(), stage, binding.dimmed(), e);
                }
            }
            None => {
                tracing::info!(stage, binding, from_cache, "node complete");
                if !options.quiet {
                    let suffix = if from_cache {
                        " (cached)".dimmed().to_string()
                    } else {
                        String::new()
                    };
                    println!("{} {} [{}]{}", "✓".green(), stage, binding.dimmed(), suffix);
                }
            }
        }
    }

    /// Assemble inputs for one per-binding node from templates and edges
    fn gather_per_binding_inputs(
        &self,
        stage: &StageSpec,
        binding: &ParameterBinding,
        results: &BTreeMap<(String, String), Outputs>,
    ) -> StrucflowResult<Inputs> {
        let mut inputs = Inputs::new();
        for (input, source) in self.graph.input_sources(&stage.name)? {
            let value = match source {
                InputSource::Template(template) => {
                    if stage.kind == StageKind::MapExpanded {
                        Value::paths(self.resolver.resolve_all(template, binding)?)
                    } else {
                        Value::Path(self.resolver.resolve(template, binding)?)
                    }
                }
                InputSource::Edge { from, output, kind } => {
                    if *kind != EdgeKind::PerBinding {
                        return Err(StrucflowError::InvalidEdge {
                            from: from.clone(),
                            to: stage.name.clone(),
                            reason: "join edge into a per-binding stage".to_string(),
                        });
                    }
                    self.upstream_output(results, from, &binding.id(), output, &stage.name)?
                }
            };
            inputs.insert(input.clone(), value);
        }
        Ok(inputs)
    }

    /// Run a shared node, gathering join edges across all bindings in
    /// binding order
    #[allow(clippy::too_many_arguments)]
    async fn run_shared_stage(
        &self,
        stage: &StageSpec,
        results: &BTreeMap<(String, String), Outputs>,
        failures: &BTreeMap<String, BindingFailure>,
        options: &RunOptions,
        semaphore: &Arc<Semaphore>,
        cache_hits: &Arc<AtomicUsize>,
        executed: &Arc<AtomicUsize>,
    ) -> StrucflowResult<(Outputs, bool)> {
        let mut inputs = Inputs::new();
        let group_binding = ParameterBinding::new([]);

        for (input, source) in self.graph.input_sources(&stage.name)? {
            let value = match source {
                InputSource::Template(template) => {
                    Value::Path(self.resolver.resolve(template, &group_binding)?)
                }
                InputSource::Edge {
                    from,
                    output,
                    kind: EdgeKind::PerBinding,
                } => self.upstream_output(results, from, GROUP_BINDING, output, &stage.name)?,
                InputSource::Edge {
                    from,
                    output,
                    kind: EdgeKind::JoinBindings,
                } => self.gather_join(results, failures, from, output, &stage.name)?,
            };
            inputs.insert(input.clone(), value);
        }

        let task = NodeTask {
            graph: Arc::clone(&self.graph),
            stage: stage.name.clone(),
            binding_id: GROUP_BINDING.to_string(),
            cache: Arc::clone(&self.cache),
            store: Arc::clone(&self.store),
            semaphore: Arc::clone(semaphore),
            workspace_root: self.workspace_root.clone(),
            no_cache: options.no_cache,
            abort_on_map_failure: options.abort_on_map_failure,
            cache_hits: Arc::clone(cache_hits),
            executed: Arc::clone(executed),
        };
        let outcome = task.run(inputs).await;
        outcome.result.map(|o| (o, outcome.from_cache))
    }

    /// One gathered value per binding, in binding order
    ///
    /// A map-expanded producer's per-element list is flattened into the
    /// gathered stream, so downstream aggregators see one flat record list
    /// regardless of how many elements each binding expanded to.
    fn gather_join(
        &self,
        results: &BTreeMap<(String, String), Outputs>,
        failures: &BTreeMap<String, BindingFailure>,
        from: &str,
        output: &str,
        consumer: &str,
    ) -> StrucflowResult<Value> {
        let producer = self.graph.stage(from)?;
        let mut gathered = Vec::new();
        let mut missing = Vec::new();

        for binding in &self.bindings {
            let binding_id = binding.id();
            match results.get(&(from.to_string(), binding_id.clone())) {
                Some(outputs) => {
                    let value = outputs.get(output).cloned().ok_or_else(|| {
                        StrucflowError::stage_execution(
                            consumer,
                            GROUP_BINDING,
                            format!("upstream '{}' produced no output '{}'", from, output),
                        )
                    })?;
                    match (producer.kind, value) {
                        (StageKind::MapExpanded, Value::List(elements)) => {
                            gathered.extend(elements)
                        }
                        (_, value) => gathered.push(value),
                    }
                }
                None => {
                    debug_assert!(failures.contains_key(&binding_id));
                    missing.push(binding_id);
                }
            }
        }

        if !missing.is_empty() {
            return Err(StrucflowError::Join {
                stage: consumer.to_string(),
                missing,
            });
        }

        Ok(Value::List(gathered))
    }

    fn upstream_output(
        &self,
        results: &BTreeMap<(String, String), Outputs>,
        from: &str,
        binding_id: &str,
        output: &str,
        consumer: &str,
    ) -> StrucflowResult<Value> {
        results
            .get(&(from.to_string(), binding_id.to_string()))
            .and_then(|outputs| outputs.get(output))
            .cloned()
            .ok_or_else(|| {
                StrucflowError::stage_execution(
                    consumer,
                    binding_id,
                    format!("upstream output '{}.{}' is unavailable", from, output),
                )
            })
    }
}

/// Everything one node needs to execute off the stage loop
struct NodeTask {
    graph: Arc<PipelineGraph>,
    stage: String,
    binding_id: String,
    cache: Arc<dyn Cache>,
    store: Arc<ArtifactStore>,
    semaphore: Arc<Semaphore>,
    workspace_root: PathBuf,
    no_cache: bool,
    abort_on_map_failure: bool,
    cache_hits: Arc<AtomicUsize>,
    executed: Arc<AtomicUsize>,
}

impl NodeTask {
    async fn run(self, inputs: Inputs) -> NodeOutcome {
        let result = self.execute(&inputs).await;
        let (result, from_cache) = match result {
            Ok((outputs, from_cache)) => (Ok(outputs), from_cache),
            Err(e) => (Err(e), false),
        };
        NodeOutcome {
            binding_id: self.binding_id,
            result,
            from_cache,
        }
    }

    async fn execute(&self, inputs: &Inputs) -> StrucflowResult<(Outputs, bool)> {
        let stage = self.graph.stage(&self.stage)?;

        let (outputs, from_cache) = match stage.kind {
            StageKind::Aggregate => {
                let aggregate = stage.aggregate.as_ref().ok_or_else(|| {
                    StrucflowError::InvalidStage {
                        stage: stage.name.clone(),
                        reason: "aggregator stage has no aggregate transform".to_string(),
                    }
                })?;
                // Pure reshape: never cached, recomputation is cheap
                (aggregate.aggregate(&stage.name, inputs)?, false)
            }
            StageKind::Plain => self.invoke_element(stage, inputs).await?,
            StageKind::MapExpanded => self.invoke_map(stage, inputs).await?,
        };

        if stage.publish {
            self.store
                .publish(&self.binding_id, &stage.name, &outputs)
                .await?;
        }

        Ok((outputs, from_cache))
    }

    /// Replicate the operation over the elements of the single list input
    ///
    /// Every element is attempted even after a failure, so the error can
    /// name all failed indices. Merged outputs are index-aligned with the
    /// input list.
    async fn invoke_map(&self, stage: &StageSpec, inputs: &Inputs) -> StrucflowResult<(Outputs, bool)> {
        let input_name = &stage.inputs[0];
        let elements: Vec<Value> = match inputs.get(input_name) {
            Some(Value::List(items)) => items.clone(),
            Some(other) => vec![other.clone()],
            None => {
                return Err(StrucflowError::stage_execution(
                    &stage.name,
                    &self.binding_id,
                    format!("missing input '{}'", input_name),
                ))
            }
        };

        let total = elements.len();
        let mut element_outputs = Vec::with_capacity(total);
        let mut failed = Vec::new();
        let mut first_error = None;
        let mut all_cached = true;

        for (index, element) in elements.into_iter().enumerate() {
            let element_inputs: Inputs = [(input_name.clone(), element)].into();
            match self.invoke_element(stage, &element_inputs).await {
                Ok((outputs, from_cache)) => {
                    all_cached &= from_cache;
                    element_outputs.push(outputs);
                }
                Err(e) => {
                    tracing::warn!(
                        stage = %stage.name,
                        binding = %self.binding_id,
                        index,
                        error = %e,
                        "map element failed"
                    );
                    first_error.get_or_insert_with(|| e.to_string());
                    failed.push(index);
                }
            }
        }

        if !failed.is_empty() && (self.abort_on_map_failure || element_outputs.is_empty()) {
            return Err(StrucflowError::MapExecution {
                stage: stage.name.clone(),
                binding: self.binding_id.clone(),
                failed,
                total,
                first_error: first_error.unwrap_or_default(),
            });
        }
        if !failed.is_empty() {
            // Survivor mode: merged lists carry only the succeeded elements
            tracing::warn!(
                stage = %stage.name,
                binding = %self.binding_id,
                failed = failed.len(),
                total,
                "continuing with surviving map elements"
            );
        }

        let mut merged = Outputs::new();
        for output in &stage.outputs {
            let column: Vec<Value> = element_outputs
                .iter()
                .map(|outputs| outputs.get(output).cloned().unwrap_or(Value::List(vec![])))
                .collect();
            merged.insert(output.clone(), Value::List(column));
        }

        Ok((merged, all_cached))
    }

    /// One cached tool invocation
    async fn invoke_element(
        &self,
        stage: &StageSpec,
        inputs: &Inputs,
    ) -> StrucflowResult<(Outputs, bool)> {
        let operation = stage.operation.as_ref().ok_or_else(|| {
            StrucflowError::InvalidStage {
                stage: stage.name.clone(),
                reason: "stage has no external operation".to_string(),
            }
        })?;

        let key = stage_key(&stage.name, &operation.fingerprint(), inputs)?;

        if !self.no_cache {
            if let Some(entry) = self.cache.get(&key).await? {
                tracing::debug!(stage = %stage.name, key = %&key[..12], "cache hit");
                self.cache_hits.fetch_add(1, Ordering::SeqCst);
                return Ok((entry.outputs, true));
            }
        }

        // The workspace is a pure function of the cache key, so a re-run
        // of identical work lands in the same directory
        let workspace = self.workspace_root.join(&stage.name).join(&key[..12]);
        tokio::fs::create_dir_all(&workspace).await?;

        let ctx = InvocationContext {
            stage: stage.name.clone(),
            binding: self.binding_id.clone(),
            workspace,
        };

        let permit = self
            .semaphore
            .acquire()
            .await
            .map_err(|_| StrucflowError::Io {
                message: "tool concurrency limiter closed".to_string(),
            })?;
        let outputs = operation.invoke(&ctx, inputs).await?;
        drop(permit);

        self.executed.fetch_add(1, Ordering::SeqCst);
        self.cache
            .store(&CachedEntry::new(
                &stage.name,
                &self.binding_id,
                key,
                outputs.clone(),
            ))
            .await?;

        Ok((outputs, false))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::FilesystemCache;
    use crate::graph::{GraphBuilder, StageSpec};
    use crate::ops::testing::{inputs_mention, RecordingOp};
    use crate::params::ParameterSource;
    use crate::resolve::AmbiguityPolicy;
    use std::path::Path;
    use tempfile::TempDir;

    struct Fixture {
        _dir: TempDir,
        data: PathBuf,
        cache_dir: PathBuf,
        store_root: PathBuf,
        workspaces: PathBuf,
    }

    impl Fixture {
        fn new(subjects: &[&str]) -> Self {
            let dir = TempDir::new().unwrap();
            let data = dir.path().join("data");
            for subject in subjects {
                let anat = data.join(subject);
                std::fs::create_dir_all(&anat).unwrap();
                std::fs::write(anat.join("t1w.nii"), subject).unwrap();
            }
            Self {
                data,
                cache_dir: dir.path().join("cache"),
                store_root: dir.path().join("derivatives"),
                workspaces: dir.path().join("work"),
                _dir: dir,
            }
        }

        fn scheduler(&self, graph: PipelineGraph, subjects: &[&str]) -> Scheduler {
            let bindings = ParameterSource::single("subject_id", subjects).unwrap();
            Scheduler::new(
                graph,
                bindings,
                ArtifactResolver::new(&self.data, AmbiguityPolicy::Strict),
                Arc::new(FilesystemCache::new(self.cache_dir.clone()).unwrap()),
                ArtifactStore::new(&self.store_root),
                &self.workspaces,
            )
        }
    }

    fn joined_graph(
        seg: Arc<RecordingOp>,
        tpl: Arc<RecordingOp>,
    ) -> PipelineGraph {
        GraphBuilder::new()
            .stage(StageSpec::map("segment", seg).template("image", "{subject_id}/*.nii"))
            .stage(StageSpec::plain("template", tpl).shared())
            .join("segment", "maps", "template", "records")
            .build()
            .unwrap()
    }

    fn seg_op() -> Arc<RecordingOp> {
        Arc::new(RecordingOp::new("seg", &["image"], &["maps"]))
    }

    fn tpl_op() -> Arc<RecordingOp> {
        Arc::new(RecordingOp::new("tpl", &["records"], &["out"]))
    }

    #[tokio::test]
    async fn test_full_run_succeeds_across_bindings() {
        let fx = Fixture::new(&["sub-01", "sub-02"]);
        let seg = seg_op();
        let tpl = tpl_op();
        let scheduler = fx.scheduler(joined_graph(seg.clone(), tpl.clone()), &["sub-01", "sub-02"]);

        let report = scheduler.run(&RunOptions::default()).await.unwrap();

        assert!(report.success());
        assert_eq!(report.succeeded, vec!["sub-01", "sub-02"]);
        assert_eq!(report.executed, 3);
        assert_eq!(seg.calls().load(Ordering::SeqCst), 2);
        assert_eq!(tpl.calls().load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_rerun_is_satisfied_from_cache() {
        let fx = Fixture::new(&["sub-01", "sub-02"]);
        let seg = seg_op();
        let tpl = tpl_op();
        let scheduler = fx.scheduler(joined_graph(seg.clone(), tpl.clone()), &["sub-01", "sub-02"]);

        scheduler.run(&RunOptions::default()).await.unwrap();
        let report = scheduler.run(&RunOptions::default()).await.unwrap();

        assert!(report.success());
        assert_eq!(report.executed, 0);
        assert_eq!(report.cache_hits, 3);
        // The tools were never invoked again
        assert_eq!(seg.calls().load(Ordering::SeqCst), 2);
        assert_eq!(tpl.calls().load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_changed_input_reruns_only_that_binding() {
        let fx = Fixture::new(&["sub-01", "sub-02"]);
        let seg = seg_op();
        let tpl = tpl_op();
        let scheduler = fx.scheduler(joined_graph(seg.clone(), tpl.clone()), &["sub-01", "sub-02"]);

        scheduler.run(&RunOptions::default()).await.unwrap();
        std::fs::write(fx.data.join("sub-02/t1w.nii"), "rescanned").unwrap();
        let report = scheduler.run(&RunOptions::default()).await.unwrap();

        assert!(report.success());
        // Only sub-02's segmentation re-ran; its (unchanged) outputs let
        // the downstream template hit the cache again
        assert_eq!(report.executed, 1);
        assert_eq!(seg.calls().load(Ordering::SeqCst), 3);
        assert_eq!(tpl.calls().load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_binding_failure_is_isolated_and_join_names_it() {
        let fx = Fixture::new(&["sub-01", "sub-02", "sub-03"]);
        let seg = Arc::new(
            RecordingOp::new("seg", &["image"], &["maps"])
                .fail_when(|inputs| inputs_mention(inputs, "sub-02")),
        );
        let tpl = tpl_op();
        let scheduler = fx.scheduler(
            joined_graph(seg.clone(), tpl.clone()),
            &["sub-01", "sub-02", "sub-03"],
        );

        let report = scheduler.run(&RunOptions::default()).await.unwrap();

        assert!(!report.success());
        assert_eq!(report.succeeded, vec!["sub-01", "sub-03"]);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].binding, "sub-02");
        assert_eq!(report.failed[0].stage, "segment");
        // The join refused to run and names the missing contributor
        let fatal = report.fatal.unwrap();
        assert!(fatal.contains("sub-02"));
        assert_eq!(tpl.calls().load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_map_expansion_is_index_aligned() {
        let fx = Fixture::new(&[]);
        let anat = fx.data.join("sub-01");
        std::fs::create_dir_all(&anat).unwrap();
        for name in ["c.nii", "a.nii", "b.nii"] {
            std::fs::write(anat.join(name), name).unwrap();
        }

        let seg = seg_op();
        let graph = GraphBuilder::new()
            .stage(StageSpec::map("segment", seg.clone()).template("image", "{subject_id}/*.nii"))
            .build()
            .unwrap();
        let scheduler = fx.scheduler(graph, &["sub-01"]);

        let report = scheduler.run(&RunOptions::default()).await.unwrap();

        assert!(report.success());
        assert_eq!(seg.calls().load(Ordering::SeqCst), 3);
        assert_eq!(report.executed, 3);
    }

    #[tokio::test]
    async fn test_changed_element_reruns_only_that_element() {
        let fx = Fixture::new(&[]);
        let anat = fx.data.join("sub-01");
        std::fs::create_dir_all(&anat).unwrap();
        for name in ["a.nii", "b.nii", "c.nii"] {
            std::fs::write(anat.join(name), name).unwrap();
        }

        let seg = seg_op();
        let graph = GraphBuilder::new()
            .stage(StageSpec::map("segment", seg.clone()).template("image", "{subject_id}/*.nii"))
            .build()
            .unwrap();
        let scheduler = fx.scheduler(graph, &["sub-01"]);

        scheduler.run(&RunOptions::default()).await.unwrap();
        std::fs::write(anat.join("b.nii"), "changed").unwrap();
        let report = scheduler.run(&RunOptions::default()).await.unwrap();

        assert!(report.success());
        assert_eq!(report.executed, 1);
        assert_eq!(report.cache_hits, 2);
        assert_eq!(seg.calls().load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_keep_going_drops_failed_map_elements() {
        let fx = Fixture::new(&[]);
        let anat = fx.data.join("sub-01");
        std::fs::create_dir_all(&anat).unwrap();
        for name in ["a.nii", "b.nii", "c.nii"] {
            std::fs::write(anat.join(name), name).unwrap();
        }

        let seg = Arc::new(
            RecordingOp::new("seg", &["image"], &["maps"])
                .fail_when(|inputs| inputs_mention(inputs, "b.nii")),
        );
        let graph = GraphBuilder::new()
            .stage(StageSpec::map("segment", seg.clone()).template("image", "{subject_id}/*.nii"))
            .build()
            .unwrap();
        let scheduler = fx.scheduler(graph, &["sub-01"]);

        let strict = scheduler.run(&RunOptions::default()).await.unwrap();
        assert!(!strict.success());

        let options = RunOptions {
            abort_on_map_failure: false,
            ..Default::default()
        };
        let report = scheduler.run(&options).await.unwrap();

        // The surviving two elements carry the binding through
        assert!(report.success());
        assert_eq!(report.cache_hits, 2);
    }

    #[tokio::test]
    async fn test_dry_run_invokes_nothing() {
        let fx = Fixture::new(&["sub-01"]);
        let seg = seg_op();
        let tpl = tpl_op();
        let scheduler = fx.scheduler(joined_graph(seg.clone(), tpl.clone()), &["sub-01"]);

        let options = RunOptions {
            dry_run: true,
            ..Default::default()
        };
        let report = scheduler.run(&options).await.unwrap();

        assert!(report.success());
        assert_eq!(report.executed, 0);
        assert_eq!(seg.calls().load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_no_cache_forces_reexecution() {
        let fx = Fixture::new(&["sub-01"]);
        let seg = seg_op();
        let tpl = tpl_op();
        let scheduler = fx.scheduler(joined_graph(seg.clone(), tpl.clone()), &["sub-01"]);

        scheduler.run(&RunOptions::default()).await.unwrap();
        let options = RunOptions {
            no_cache: true,
            ..Default::default()
        };
        let report = scheduler.run(&options).await.unwrap();

        assert!(report.success());
        assert_eq!(report.cache_hits, 0);
        assert_eq!(seg.calls().load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_published_stage_lands_in_store() {
        let fx = Fixture::new(&["sub-01"]);
        let seg = seg_op();
        let tpl = tpl_op();
        let graph = GraphBuilder::new()
            .stage(
                StageSpec::map("segment", seg)
                    .template("image", "{subject_id}/*.nii")
                    .publish(),
            )
            .stage(StageSpec::plain("template", tpl).shared().publish())
            .join("segment", "maps", "template", "records")
            .build()
            .unwrap();
        let scheduler = fx.scheduler(graph, &["sub-01"]);

        let report = scheduler.run(&RunOptions::default()).await.unwrap();

        assert!(report.success());
        assert!(Path::new(&fx.store_root)
            .join("sub-01/segment/manifest.json")
            .exists());
        assert!(Path::new(&fx.store_root)
            .join("group/template/manifest.json")
            .exists());
    }
}
