//! Block-program graph embedded in every exported object.
//!
//! The graph plays the captured frames back as costumes: on start it enters
//! the scene, resets and starts the project timer, plays sound #1 and loops
//! while the timer is below the clip duration, switching to costume
//! `floor(timer * fps) + 1`. A final switch to the last costume covers any
//! rounding shortfall of the loop.

use serde::Serialize;
use serde_json::Value;

use super::id::IdSource;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Param {
    Node(ScriptNode),
    Literal(Value),
}

impl Param {
    pub fn null() -> Self {
        Param::Literal(Value::Null)
    }

    pub fn text(s: &str) -> Self {
        Param::Literal(Value::String(s.to_string()))
    }

    pub fn as_node(&self) -> Option<&ScriptNode> {
        match self {
            Param::Node(node) => Some(node),
            Param::Literal(_) => None,
        }
    }
}

impl From<ScriptNode> for Param {
    fn from(node: ScriptNode) -> Self {
        Param::Node(node)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScriptNode {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub x: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub y: Option<f64>,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Vec<Param>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub statements: Option<Vec<Vec<ScriptNode>>>,
}

impl ScriptNode {
    pub fn new(ids: &mut dyn IdSource, kind: &str) -> Self {
        Self {
            id: ids.next_id(),
            x: None,
            y: None,
            kind: kind.to_string(),
            params: None,
            statements: None,
        }
    }

    pub fn with_params(mut self, params: Vec<Param>) -> Self {
        self.params = Some(params);
        self
    }

    pub fn with_statements(mut self, statements: Vec<Vec<ScriptNode>>) -> Self {
        self.statements = Some(statements);
        self
    }

    /// Child nodes in parameter order, then statement order.
    pub fn children(&self) -> impl Iterator<Item = &ScriptNode> {
        let params = self.params.iter().flatten().filter_map(Param::as_node);
        let statements = self.statements.iter().flatten().flatten();
        params.chain(statements)
    }

    /// Nodes in this subtree, including `self`.
    pub fn node_count(&self) -> usize {
        1 + self.children().map(ScriptNode::node_count).sum::<usize>()
    }

    pub fn visit<'a>(&'a self, f: &mut dyn FnMut(&'a ScriptNode)) {
        f(self);
        for child in self.children() {
            child.visit(f);
        }
    }
}

/// `number` literal block. Integral values serialize without a fraction.
pub fn number(ids: &mut dyn IdSource, value: f64) -> ScriptNode {
    ScriptNode::new(ids, "number").with_params(vec![Param::Literal(js_number(value))])
}

pub fn js_number(value: f64) -> Value {
    if value.is_finite() && value.fract() == 0.0 && value.abs() < 9_007_199_254_740_992.0 {
        Value::from(value as i64)
    } else {
        Value::from(value)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Less,
    Times,
    Plus,
}

/// Node family used for timer reset and binary operators.
pub trait OperatorStrategy {
    fn reset_timer(&self, ids: &mut dyn IdSource) -> ScriptNode;

    fn binary(
        &self,
        ids: &mut dyn IdSource,
        op: BinaryOp,
        left: ScriptNode,
        right: ScriptNode,
    ) -> ScriptNode;
}

/// One dedicated node type per operator; the operator slot stays `null`.
pub struct LegacyOperators;

impl OperatorStrategy for LegacyOperators {
    fn reset_timer(&self, ids: &mut dyn IdSource) -> ScriptNode {
        ScriptNode::new(ids, "reset_project_timer")
    }

    fn binary(
        &self,
        ids: &mut dyn IdSource,
        op: BinaryOp,
        left: ScriptNode,
        right: ScriptNode,
    ) -> ScriptNode {
        let kind = match op {
            BinaryOp::Less => "boolean_smaller",
            BinaryOp::Times => "calc_times",
            BinaryOp::Plus => "calc_plus",
        };
        ScriptNode::new(ids, kind).with_params(vec![left.into(), Param::null(), right.into()])
    }
}

/// Generic operator node types parameterized by an operator name.
pub struct GenericOperators;

impl OperatorStrategy for GenericOperators {
    fn reset_timer(&self, ids: &mut dyn IdSource) -> ScriptNode {
        ScriptNode::new(ids, "choose_project_timer_action")
            .with_params(vec![Param::null(), Param::text("RESET")])
    }

    fn binary(
        &self,
        ids: &mut dyn IdSource,
        op: BinaryOp,
        left: ScriptNode,
        right: ScriptNode,
    ) -> ScriptNode {
        let (kind, name) = match op {
            BinaryOp::Less => ("boolean_basic_operator", "LESS"),
            BinaryOp::Times => ("calc_basic", "MULTI"),
            BinaryOp::Plus => ("calc_basic", "PLUS"),
        };
        ScriptNode::new(ids, kind).with_params(vec![left.into(), Param::text(name), right.into()])
    }
}

pub fn strategy(use_dummy_code: bool) -> &'static dyn OperatorStrategy {
    if use_dummy_code {
        &LegacyOperators
    } else {
        &GenericOperators
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlaybackTiming {
    /// Seconds.
    pub duration: f64,
    pub framerate: f64,
    pub frame_count: u64,
}

pub type ScriptForest = Vec<Vec<ScriptNode>>;

/// Builds the two top-level chains of the playback program.
pub fn playback_script(
    timing: &PlaybackTiming,
    ops: &dyn OperatorStrategy,
    ids: &mut dyn IdSource,
) -> ScriptForest {
    let entry = vec![
        ScriptNode::new(ids, "when_run_button_click"),
        ScriptNode::new(ids, "start_scene"),
    ];

    let mut scene = vec![ScriptNode::new(ids, "when_scene_start")];
    scene.push(ops.reset_timer(ids));
    scene.push(ScriptNode::new(ids, "choose_project_timer_action"));
    let sound = number(ids, 1.0);
    scene.push(ScriptNode::new(ids, "sound_something_with_block").with_params(vec![sound.into()]));

    let timer = ScriptNode::new(ids, "get_project_timer_value");
    let limit = number(ids, timing.duration);
    let condition = ops.binary(ids, BinaryOp::Less, timer, limit);

    let timer = ScriptNode::new(ids, "get_project_timer_value");
    let fps = number(ids, timing.framerate);
    let scaled = ops.binary(ids, BinaryOp::Times, timer, fps);
    let floor = ScriptNode::new(ids, "calc_operation").with_params(vec![
        Param::null(),
        scaled.into(),
        Param::null(),
        Param::text("floor"),
    ]);
    let one = number(ids, 1.0);
    let costume = ops.binary(ids, BinaryOp::Plus, floor, one);
    let change = ScriptNode::new(ids, "change_to_some_shape").with_params(vec![costume.into()]);

    scene.push(
        ScriptNode::new(ids, "repeat_while_true")
            .with_params(vec![condition.into(), Param::text("while")])
            .with_statements(vec![vec![change]]),
    );

    let last = number(ids, timing.frame_count as f64);
    scene.push(ScriptNode::new(ids, "change_to_some_shape").with_params(vec![last.into()]));

    vec![entry, scene]
}

#[cfg(test)]
#[path = "script_test.rs"]
mod script_test;
