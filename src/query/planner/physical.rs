// Physical Query Plan
//
// The physical plan is a binary tree of three node kinds: leaves that fetch
// a subquery from one endpoint, correlated leaves that dereference instances
// coming from another part of the plan, and binary nodes that combine two
// subplans with an operator strategy.
//
// Nodes are immutable once built, apart from their cardinality caches.
// `instantiate` derives a new, independent tree with some variables bound.

use std::fmt;
use std::sync::Arc;

use crossbeam::channel::{unbounded, Sender};
use log::debug;

use crate::catalog::EndpointCatalog;
use crate::common::{Message, Row, VarSet};
use crate::logical::template::substitute_var;
use crate::logical::{Query, Service, Term};
use crate::query::executor::context::ExecutionContext;
use crate::query::executor::error::ExecResult;
use crate::query::executor::operators::{OperatorStrategy, RightInput};
use crate::query::planner::cardinality::{Cardinality, CardinalityCache, CardinalityEstimator};
use crate::source::SourceContactor;

/// A node of the physical plan
pub enum PlanNode {
    /// Subquery answered independently by one endpoint
    Leaf(LeafOperator),
    /// Subquery parameterized by instances bound elsewhere in the plan
    Correlated(CorrelatedLeafOperator),
    /// Operator over two subplans
    Binary(BinaryPlanNode),
}

impl PlanNode {
    /// Build a binary node; its variables are the union of both children's
    pub fn binary(operator: Arc<dyn OperatorStrategy>, left: PlanNode, right: PlanNode) -> Self {
        let vars = left.vars().union(right.vars()).cloned().collect();
        PlanNode::Binary(BinaryPlanNode {
            operator,
            vars,
            left: Arc::new(left),
            right: Arc::new(right),
            cache: CardinalityCache::new(),
        })
    }

    /// Variables bound in every row this node emits
    pub fn vars(&self) -> &VarSet {
        match self {
            PlanNode::Leaf(leaf) => &leaf.vars,
            PlanNode::Correlated(leaf) => &leaf.vars,
            PlanNode::Binary(node) => &node.vars,
        }
    }

    /// Evaluate the node, writing rows and a final EOF to `out`.
    ///
    /// Leaves block until their source is exhausted; binary nodes start
    /// workers for their children and operator, then return.
    pub fn execute(&self, out: Sender<Message>, ctx: &ExecutionContext) -> ExecResult<()> {
        match self {
            PlanNode::Leaf(leaf) => leaf.execute(out, ctx),
            PlanNode::Correlated(leaf) => leaf.execute(out, ctx),
            PlanNode::Binary(node) => node.execute(out, ctx),
        }
    }

    /// New tree with the variables of `bindings` replaced by their values
    pub fn instantiate(&self, bindings: &Row) -> PlanNode {
        match self {
            PlanNode::Leaf(leaf) => PlanNode::Leaf(leaf.instantiate(bindings)),
            PlanNode::Correlated(leaf) => PlanNode::Correlated(leaf.instantiate(bindings)),
            PlanNode::Binary(node) => PlanNode::Binary(node.instantiate(bindings)),
        }
    }

    pub fn get_cardinality(&self) -> Cardinality {
        match self {
            PlanNode::Leaf(leaf) => leaf.get_cardinality(),
            PlanNode::Correlated(_) => None,
            PlanNode::Binary(node) => node.get_cardinality(),
        }
    }

    pub fn get_join_cardinality(&self, vars: &VarSet) -> Cardinality {
        match self {
            PlanNode::Leaf(leaf) => leaf.get_join_cardinality(vars),
            PlanNode::Correlated(_) => None,
            PlanNode::Binary(node) => node.get_join_cardinality(vars),
        }
    }

    pub fn all_triples_low_selectivity(&self) -> bool {
        match self {
            PlanNode::Leaf(leaf) => leaf.service.all_triples_low_selectivity(),
            PlanNode::Correlated(_) => false,
            PlanNode::Binary(node) => {
                node.left.all_triples_low_selectivity() && node.right.all_triples_low_selectivity()
            }
        }
    }

    /// Number of triple positions below this node
    pub fn places(&self) -> usize {
        match self {
            PlanNode::Leaf(leaf) => leaf.service.places(),
            PlanNode::Correlated(_) => 0,
            PlanNode::Binary(node) => node.left.places() + node.right.places(),
        }
    }

    /// Number of constant triple positions below this node
    pub fn constant_number(&self) -> usize {
        match self {
            PlanNode::Leaf(leaf) => leaf.service.constant_number(),
            PlanNode::Correlated(_) => 0,
            PlanNode::Binary(node) => node.left.constant_number() + node.right.constant_number(),
        }
    }

    /// Share of constant positions; 0 for a node without triples
    pub fn constant_percentage(&self) -> f64 {
        let places = self.places();
        if places == 0 {
            return 0.0;
        }
        self.constant_number() as f64 / places as f64
    }

    /// Whether the node produces its rows on its own. Correlated leaves only
    /// run once an operator hands them instances.
    pub fn has_independent_producer(&self) -> bool {
        !matches!(self, PlanNode::Correlated(_))
    }

    fn explain(&self, f: &mut fmt::Formatter<'_>, depth: usize) -> fmt::Result {
        let pad = "  ".repeat(depth);
        match self {
            PlanNode::Leaf(leaf) => {
                writeln!(f, "{}Leaf <{}> {}", pad, leaf.endpoint, format_vars(&leaf.vars))?;
                writeln!(f, "{}  {}", pad, leaf.query_text.replace('\n', " "))
            }
            PlanNode::Correlated(leaf) => writeln!(
                f,
                "{}CorrelatedLeaf [{}] {}",
                pad,
                leaf.endpoints.join(", "),
                format_vars(&leaf.vars)
            ),
            PlanNode::Binary(node) => {
                writeln!(f, "{}{} {}", pad, node.operator.name(), format_vars(&node.vars))?;
                node.left.explain(f, depth + 1)?;
                node.right.explain(f, depth + 1)
            }
        }
    }
}

impl fmt::Display for PlanNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.explain(f, 0)
    }
}

fn format_vars(vars: &VarSet) -> String {
    let names: Vec<String> = vars.iter().map(|v| format!("?{}", v)).collect();
    format!("{{{}}}", names.join(", "))
}

fn without_bound(vars: &VarSet, bindings: &Row) -> VarSet {
    vars.iter().filter(|v| !bindings.contains(v)).cloned().collect()
}

/// Leaf answered independently by one endpoint
pub struct LeafOperator {
    query: Arc<Query>,
    service: Service,
    endpoint: String,
    query_text: String,
    vars: VarSet,
    contactor: Arc<dyn SourceContactor>,
    buffer_size: usize,
    cache: CardinalityCache,
}

impl LeafOperator {
    pub fn new(query: Arc<Query>, service: Service, contactor: Arc<dyn SourceContactor>, buffer_size: usize) -> Self {
        let (endpoint, query_text, vars) = service.info_io(&query);
        LeafOperator {
            query,
            service,
            endpoint,
            query_text,
            vars,
            contactor,
            buffer_size,
            cache: CardinalityCache::new(),
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Subquery sent to the endpoint
    pub fn query_text(&self) -> &str {
        &self.query_text
    }

    pub fn service(&self) -> &Service {
        &self.service
    }

    fn estimator(&self) -> CardinalityEstimator {
        CardinalityEstimator::new(Arc::clone(&self.contactor), self.buffer_size)
    }

    pub fn get_cardinality(&self) -> Cardinality {
        self.cache
            .cardinality(|| self.estimator().service_cardinality(&self.query, &self.service, &VarSet::new()))
    }

    pub fn get_join_cardinality(&self, vars: &VarSet) -> Cardinality {
        if vars.is_empty() {
            return self.get_cardinality();
        }
        self.cache
            .join_cardinality(vars, || self.estimator().service_cardinality(&self.query, &self.service, vars))
    }

    pub fn instantiate(&self, bindings: &Row) -> LeafOperator {
        LeafOperator::new(
            Arc::clone(&self.query),
            self.service.instantiate(bindings),
            Arc::clone(&self.contactor),
            self.buffer_size,
        )
    }

    /// Fetch the subquery through a contactor worker and relay its items
    pub fn execute(&self, out: Sender<Message>, ctx: &ExecutionContext) -> ExecResult<()> {
        let (tx, rx) = unbounded();
        let contactor = Arc::clone(&self.contactor);
        let endpoint = self.endpoint.clone();
        let query_text = self.query_text.clone();
        let buffer_size = self.buffer_size;
        ctx.spawn("contact", move |_| {
            contactor.contact(&endpoint, &query_text, &tx, buffer_size);
            Ok(())
        })?;

        loop {
            let message = ctx.recv(&rx)?;
            let eof = message.is_eof();
            ctx.send(&out, message)?;
            if eof {
                return Ok(());
            }
        }
    }
}

/// URI prefix used to judge whether an endpoint can describe an instance
fn instance_prefix(instance: &str) -> &str {
    match instance.find("/resource") {
        Some(pos) => &instance[..pos],
        None => instance,
    }
}

/// Leaf whose query depends on instances bound by another part of the plan
pub struct CorrelatedLeafOperator {
    template: String,
    vars: VarSet,
    endpoints: Vec<String>,
    catalog: Arc<dyn EndpointCatalog>,
    contactor: Arc<dyn SourceContactor>,
    buffer_size: usize,
    /// (variable, instance) pairs fixed by `instantiate`
    bound: Vec<(String, String)>,
}

impl CorrelatedLeafOperator {
    /// `template` is a query whose projected variables are `vars`; any of
    /// them can later be bound to an instance URI.
    pub fn new(
        template: impl Into<String>,
        vars: VarSet,
        endpoints: Vec<String>,
        catalog: Arc<dyn EndpointCatalog>,
        contactor: Arc<dyn SourceContactor>,
        buffer_size: usize,
    ) -> Self {
        CorrelatedLeafOperator {
            template: template.into(),
            vars,
            endpoints,
            catalog,
            contactor,
            buffer_size,
            bound: Vec::new(),
        }
    }

    pub fn instantiate(&self, bindings: &Row) -> CorrelatedLeafOperator {
        let mut bound = self.bound.clone();
        for var in &self.vars {
            if let Some(value) = bindings.get(var) {
                bound.push((var.clone(), value.to_string()));
            }
        }
        CorrelatedLeafOperator {
            template: self.template.clone(),
            vars: without_bound(&self.vars, bindings),
            endpoints: self.endpoints.clone(),
            catalog: Arc::clone(&self.catalog),
            contactor: Arc::clone(&self.contactor),
            buffer_size: self.buffer_size,
            bound,
        }
    }

    /// Run with the instances fixed by `instantiate`
    pub fn execute(&self, out: Sender<Message>, ctx: &ExecutionContext) -> ExecResult<()> {
        let (variables, instances): (Vec<String>, Vec<String>) = self.bound.iter().cloned().unzip();
        self.execute_correlated(&variables, &instances, out, ctx)
    }

    /// Query text with each variable's projection removed and its other
    /// occurrences replaced by the instance IRI
    pub fn bind_template(&self, variables: &[String], instances: &[String]) -> String {
        let mut text = self.template.clone();
        for (var, instance) in variables.iter().zip(instances) {
            text = substitute_var(&text, var, "", Some(1));
            text = substitute_var(&text, var, &Term::from_value(instance).to_string(), None);
        }
        text
    }

    /// Endpoints that can describe the first instance. Without instances
    /// every candidate endpoint is relevant.
    pub fn relevant_endpoints(&self, instances: &[String]) -> Vec<String> {
        let Some(instance) = instances.first() else {
            return self.endpoints.clone();
        };
        if instance.contains("sparql?query") {
            return Vec::new();
        }
        let prefix = instance_prefix(instance);
        self.endpoints
            .iter()
            .filter(|e| self.catalog.endpoint_prefixes(e).iter().any(|p| p == prefix))
            .cloned()
            .collect()
    }

    /// Dereference `instances` against every relevant endpoint, relaying all
    /// answers to `out` followed by a single EOF. When no endpoint is
    /// relevant the unbound variables are relayed instead.
    pub fn execute_correlated(
        &self,
        variables: &[String],
        instances: &[String],
        out: Sender<Message>,
        ctx: &ExecutionContext,
    ) -> ExecResult<()> {
        let endpoints = self.relevant_endpoints(instances);
        if endpoints.is_empty() {
            debug!("No relevant endpoint for {:?}", instances.first());
            ctx.send(&out, Message::Unmatched(self.vars.clone()))?;
            return ctx.send(&out, Message::Eof);
        }

        let query_text = self.bind_template(variables, instances);
        let (tx, rx) = unbounded();
        for endpoint in &endpoints {
            let tx = tx.clone();
            let contactor = Arc::clone(&self.contactor);
            let endpoint = endpoint.clone();
            let query_text = query_text.clone();
            let buffer_size = self.buffer_size;
            ctx.spawn("contact", move |_| {
                contactor.contact(&endpoint, &query_text, &tx, buffer_size);
                Ok(())
            })?;
        }
        drop(tx);

        let mut pending = endpoints.len();
        while pending > 0 {
            match ctx.recv(&rx)? {
                Message::Eof => pending -= 1,
                message => ctx.send(&out, message)?,
            }
        }
        ctx.send(&out, Message::Eof)
    }
}

/// Operator over two subplans
pub struct BinaryPlanNode {
    operator: Arc<dyn OperatorStrategy>,
    vars: VarSet,
    left: Arc<PlanNode>,
    right: Arc<PlanNode>,
    cache: CardinalityCache,
}

impl BinaryPlanNode {
    pub fn operator(&self) -> &dyn OperatorStrategy {
        self.operator.as_ref()
    }

    pub fn left(&self) -> &PlanNode {
        &self.left
    }

    pub fn right(&self) -> &PlanNode {
        &self.right
    }

    pub fn get_cardinality(&self) -> Cardinality {
        self.cache.cardinality(|| self.operator.cardinality(&self.left, &self.right))
    }

    pub fn get_join_cardinality(&self, vars: &VarSet) -> Cardinality {
        if vars.is_empty() {
            return self.get_cardinality();
        }
        self.cache
            .join_cardinality(vars, || self.operator.join_cardinality(&self.left, &self.right, vars))
    }

    pub fn instantiate(&self, bindings: &Row) -> BinaryPlanNode {
        BinaryPlanNode {
            operator: self.operator.instantiate(bindings),
            vars: without_bound(&self.vars, bindings),
            left: Arc::new(self.left.instantiate(bindings)),
            right: Arc::new(self.right.instantiate(bindings)),
            cache: CardinalityCache::new(),
        }
    }

    /// Start one worker for the left child, one for the right child when it
    /// produces rows on its own, and one for the operator. Strategies that
    /// consume the right subplan itself get it unevaluated.
    pub fn execute(&self, out: Sender<Message>, ctx: &ExecutionContext) -> ExecResult<()> {
        let (left_tx, left_rx) = unbounded();
        let left = Arc::clone(&self.left);
        ctx.spawn("left", move |ctx| left.execute(left_tx, ctx))?;

        let right = if self.operator.consumes_subplan() || !self.right.has_independent_producer() {
            RightInput::Subplan(Arc::clone(&self.right))
        } else {
            let (right_tx, right_rx) = unbounded();
            let right = Arc::clone(&self.right);
            ctx.spawn("right", move |ctx| right.execute(right_tx, ctx))?;
            RightInput::Channel(right_rx)
        };

        let operator = Arc::clone(&self.operator);
        ctx.spawn(operator.name(), move |ctx| operator.execute(left_rx, right, out, ctx))?;
        Ok(())
    }
}
