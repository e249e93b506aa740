//! The session arena that owns every tensor and graph node.

use std::cell::{Ref, RefCell, RefMut};

use arbor_buffer::{Accelerator, AcceleratorConfig, NumericBuffer, Result, Shape};

use crate::node::{Entry, Node, Op, TensorId};
use crate::tensor::Tensor;

/// Session settings.
#[derive(Debug, Clone, Default)]
pub struct SessionConfig {
    pub accelerator: AcceleratorConfig,
}

impl SessionConfig {
    /// Defaults, with the accelerator capacity read from the environment.
    pub fn from_env() -> Self {
        Self {
            accelerator: AcceleratorConfig::from_env(),
        }
    }
}

#[derive(Debug, Default)]
pub(crate) struct Arena {
    entries: Vec<Entry>,
}

impl Arena {
    pub(crate) fn entry(&self, id: TensorId) -> &Entry {
        &self.entries[id.0]
    }

    pub(crate) fn entry_mut(&mut self, id: TensorId) -> &mut Entry {
        &mut self.entries[id.0]
    }

    fn push(&mut self, entry: Entry) -> TensorId {
        let id = TensorId(self.entries.len());
        self.entries.push(entry);
        id
    }
}

/// Owns the tensors of one computation and the accelerator they may move to.
///
/// Tensors are [`Tensor`] handles borrowing the session, so a graph lives
/// exactly as long as its session. Build a graph, run backward, read the
/// gradients, then drop the session.
///
/// ```
/// use arbor_graph::prelude::*;
///
/// let session = Session::new();
/// let x = session.var(NumericBuffer::from_vec(vec![1.0, 2.0], [2]).unwrap());
/// let y = (x * x).sum(0, false).unwrap();
/// y.backward(None).unwrap();
/// assert_eq!(x.grad().unwrap().unwrap().to_vec().unwrap(), vec![2.0, 4.0]);
/// ```
#[derive(Debug)]
pub struct Session {
    arena: RefCell<Arena>,
    accelerator: Accelerator,
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

impl Session {
    pub fn new() -> Self {
        Self::with_config(SessionConfig::default())
    }

    pub fn with_config(config: SessionConfig) -> Self {
        Self::with_accelerator(Accelerator::new(config.accelerator))
    }

    /// Share an existing accelerator pool.
    pub fn with_accelerator(accelerator: Accelerator) -> Self {
        Self {
            arena: RefCell::new(Arena::default()),
            accelerator,
        }
    }

    pub fn accelerator(&self) -> &Accelerator {
        &self.accelerator
    }

    /// Number of tensors recorded so far.
    pub fn len(&self) -> usize {
        self.arena.borrow().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Wrap a buffer as a leaf tensor.
    pub fn leaf(&self, value: NumericBuffer, requires_grad: bool) -> Tensor<'_> {
        let id = self.arena.borrow_mut().push(Entry {
            value,
            grad: None,
            requires_grad,
            used: false,
            node: None,
        });
        Tensor::new(self, id)
    }

    /// Leaf that does not track gradients.
    pub fn constant(&self, value: NumericBuffer) -> Tensor<'_> {
        self.leaf(value, false)
    }

    /// Leaf that tracks gradients.
    pub fn var(&self, value: NumericBuffer) -> Tensor<'_> {
        self.leaf(value, true)
    }

    pub fn from_vec(&self, data: Vec<f64>, shape: impl Into<Shape>) -> Result<Tensor<'_>> {
        Ok(self.constant(NumericBuffer::from_vec(data, shape)?))
    }

    pub fn scalar(&self, value: f64) -> Tensor<'_> {
        self.constant(NumericBuffer::scalar(value))
    }

    /// The recorded producer of a tensor, if it tracks gradients and is not a leaf.
    pub fn node(&self, id: TensorId) -> Option<Node> {
        self.arena.borrow().entry(id).node.clone()
    }

    pub(crate) fn arena(&self) -> Ref<'_, Arena> {
        self.arena.borrow()
    }

    pub(crate) fn arena_mut(&self) -> RefMut<'_, Arena> {
        self.arena.borrow_mut()
    }

    /// Run `op` on `inputs` and record the result.
    ///
    /// The output tracks gradients when any input does, and only then gets a
    /// graph node. Inputs are marked as used either way. A failing kernel
    /// leaves the arena untouched.
    pub(crate) fn apply(&self, op: Op, inputs: &[TensorId]) -> Result<TensorId> {
        let (value, tracks, input_shapes) = {
            let arena = self.arena.borrow();
            let operands: Vec<&NumericBuffer> =
                inputs.iter().map(|&id| &arena.entry(id).value).collect();
            let value = op.forward(&operands)?;
            let tracks = inputs.iter().any(|&id| arena.entry(id).requires_grad);
            let shapes = operands.iter().map(|b| b.shape().clone()).collect();
            (value, tracks, shapes)
        };

        let mut arena = self.arena.borrow_mut();
        for &id in inputs {
            arena.entry_mut(id).used = true;
        }
        let node = tracks.then(|| Node {
            op,
            inputs: inputs.to_vec(),
            input_shapes,
        });
        let id = arena.push(Entry {
            value,
            grad: None,
            requires_grad: tracks,
            used: false,
            node,
        });
        log::trace!(
            "recorded {} = {} {:?}",
            id,
            arena.entry(id).node.as_ref().map_or("untracked", |n| n.op.name()),
            inputs
        );
        Ok(id)
    }
}
