// Query Execution Engine Implementation
//
// This module turns a physical plan into a running pipeline of workers and
// hands the caller a single stream of answers terminated by EOF.

use std::sync::Arc;
use std::time::Instant;

use crossbeam::channel::{unbounded, Receiver, Sender};
use log::{debug, info};

use crate::common::{Message, VarSet};
use crate::config::FederationConfig;
use crate::logical::Query;
use crate::query::executor::context::ExecutionContext;
use crate::query::executor::error::ExecResult;
use crate::query::executor::result::{QueryResult, QueryResultSet};
use crate::query::planner::{PlanCompiler, PlanNode};
use crate::source::SourceContactor;

/// Start a worker evaluating `plan` and return the channel it writes to
pub(crate) fn spawn_plan(plan: Arc<PlanNode>, ctx: &ExecutionContext) -> ExecResult<Receiver<Message>> {
    let (tx, rx) = unbounded();
    ctx.spawn("plan", move |ctx| plan.execute(tx, ctx))?;
    Ok(rx)
}

/// Plans and runs federated queries
pub struct ExecutionEngine {
    config: FederationConfig,
    contactor: Arc<dyn SourceContactor>,
}

impl ExecutionEngine {
    pub fn new(config: FederationConfig, contactor: Arc<dyn SourceContactor>) -> Self {
        ExecutionEngine { config, contactor }
    }

    pub fn config(&self) -> &FederationConfig {
        &self.config
    }

    /// Compile a query with the engine's settings
    pub fn compile(&self, query: &Query) -> QueryResult<Option<PlanNode>> {
        let compiler = PlanCompiler::new(self.config.adaptive, self.config.buffer_size, Arc::clone(&self.contactor));
        Ok(compiler.compile(query)?)
    }

    /// Start executing `root` in a new run. The answers arrive on the
    /// returned handle.
    pub fn execute(&self, root: impl Into<Arc<PlanNode>>) -> ExecResult<ExecutionHandle> {
        let root = root.into();
        let vars = root.vars().clone();
        let (tx, rx) = unbounded();
        let ctx = self.execute_into(root, tx)?;
        Ok(ExecutionHandle { rx, ctx, vars })
    }

    /// Start executing `root` in a new run, writing its answers to `out`
    pub fn execute_into(&self, root: impl Into<Arc<PlanNode>>, out: Sender<Message>) -> ExecResult<ExecutionContext> {
        let root = root.into();
        let ctx = ExecutionContext::new();
        debug!("Executing plan in run {}:\n{}", ctx.run_id(), root);
        ctx.spawn("root", move |ctx| root.execute(out, ctx))?;
        Ok(ctx)
    }

    /// Compile and run a query to completion
    pub fn run(&self, query: &Query) -> QueryResult<QueryResultSet> {
        let start = Instant::now();
        let plan = match self.compile(query)? {
            Some(plan) => plan,
            None => return Ok(QueryResultSet::default()),
        };

        let results = self.execute(plan)?.collect()?;
        info!("Query produced {} answers in {:?}", results.row_count(), start.elapsed());
        Ok(results)
    }
}

/// Output stream of a running plan
pub struct ExecutionHandle {
    rx: Receiver<Message>,
    ctx: ExecutionContext,
    /// Variables of the root node
    vars: VarSet,
}

impl ExecutionHandle {
    /// Next item of the answer stream
    pub fn recv(&self) -> ExecResult<Message> {
        self.ctx.recv(&self.rx)
    }

    /// Stop the run, waking all its workers
    pub fn cancel(&self) {
        self.ctx.cancel();
    }

    pub fn context(&self) -> &ExecutionContext {
        &self.ctx
    }

    pub fn vars(&self) -> &VarSet {
        &self.vars
    }

    /// Read the stream to its EOF, then wait for the run's workers
    pub fn collect(self) -> QueryResult<QueryResultSet> {
        let mut results = QueryResultSet::new(&self.vars);
        loop {
            match self.recv() {
                Ok(Message::Row(row)) => results.add_row(row),
                Ok(Message::Unmatched(_)) => {}
                Ok(Message::Eof) => break,
                Err(e) => {
                    // Report the root cause recorded by the failing worker
                    self.ctx.wait()?;
                    return Err(e.into());
                }
            }
        }
        self.ctx.wait()?;
        Ok(results)
    }
}
