//! Reverse-mode backward pass over the session arena.
//!
//! Uses a topological sort so that each node's adjoint is complete before it
//! is propagated to the node's inputs. Adjoints for one pass are kept in a
//! scratch map and only added to the stored gradients once every rule has
//! succeeded.

use std::collections::{HashMap, HashSet};

use arbor_buffer::{DeviceError, NumericBuffer, Result, ShapeError, TensorError};
use arbor_kernels as k;

use crate::node::TensorId;
use crate::session::{Arena, Session};

/// Post-order over the gradient-tracking tensors reachable from `root`.
///
/// Every tensor appears after all of its inputs, so iterating the result in
/// reverse visits each tensor after all of its consumers.
pub(crate) fn topological_sort(arena: &Arena, root: TensorId) -> Vec<TensorId> {
    let mut visited = HashSet::new();
    let mut order = Vec::new();
    dfs(arena, root, &mut visited, &mut order);
    order
}

fn dfs(arena: &Arena, id: TensorId, visited: &mut HashSet<TensorId>, order: &mut Vec<TensorId>) {
    if !visited.insert(id) {
        return;
    }
    if let Some(node) = &arena.entry(id).node {
        for &input in &node.inputs {
            if arena.entry(input).requires_grad {
                dfs(arena, input, visited, order);
            }
        }
    }
    order.push(id);
}

/// Build the initial adjoint of `root`.
fn seed_gradient(arena: &Arena, root: TensorId, seed: Option<TensorId>) -> Result<NumericBuffer> {
    let value = &arena.entry(root).value;
    let shape = value.shape();

    let Some(seed) = seed else {
        if !shape.is_single() {
            return Err(ShapeError::MissingSeed {
                shape: shape.clone(),
            }
            .into());
        }
        return k::ones_like(value);
    };

    let seed = &arena.entry(seed).value;
    seed.ensure_live()?;
    if seed.device() != value.device() {
        return Err(DeviceError::DeviceMismatch {
            lhs: value.device(),
            rhs: seed.device(),
        }
        .into());
    }

    if shape.is_single() && seed.numel() == 1 {
        // Any one-element seed works for a one-element root.
        k::reshape(seed, shape)
    } else if seed.shape() == shape {
        seed.try_clone()
    } else {
        Err(ShapeError::SeedMismatch {
            expected: shape.clone(),
            actual: seed.shape().clone(),
        }
        .into())
    }
}

/// Run backward from `root`, adding the result into stored gradients.
pub(crate) fn backward(session: &Session, root: TensorId, seed: Option<TensorId>) -> Result<()> {
    let updates = {
        let arena = session.arena();
        if !arena.entry(root).requires_grad {
            return Err(TensorError::NoGradient);
        }
        arena.entry(root).value.ensure_live()?;

        let order = topological_sort(&arena, root);
        for &id in &order {
            arena.entry(id).value.ensure_live()?;
        }
        log::debug!("backward from {} over {} tensors", root, order.len());

        let mut adjoints: HashMap<TensorId, NumericBuffer> = HashMap::new();
        adjoints.insert(root, seed_gradient(&arena, root, seed)?);

        let mut finished = Vec::with_capacity(order.len());
        for &id in order.iter().rev() {
            // Not every visited tensor lies on a path that received a gradient.
            let Some(adjoint) = adjoints.remove(&id) else {
                continue;
            };
            let entry = arena.entry(id);

            if let Some(node) = &entry.node {
                let inputs: Vec<&NumericBuffer> =
                    node.inputs.iter().map(|&i| &arena.entry(i).value).collect();
                let grads =
                    node.op
                        .local_gradients(&inputs, &node.input_shapes, &entry.value, &adjoint)?;
                log::trace!("{} {} -> {:?}", id, node.op.name(), node.inputs);

                for (&input, grad) in node.inputs.iter().zip(grads) {
                    if !arena.entry(input).requires_grad {
                        continue;
                    }
                    match adjoints.get_mut(&input) {
                        Some(acc) => k::accumulate(acc, &grad)?,
                        None => {
                            adjoints.insert(input, grad);
                        }
                    }
                }
            }

            finished.push((id, adjoint));
        }

        // Gradients are stored on their value's device, whichever device the
        // adjoint was computed on. A missing gradient counts as zeros, so the
        // first write stores the adjoint itself.
        let accel = session.accelerator();
        let mut updates = Vec::with_capacity(finished.len());
        for (id, adjoint) in finished {
            let entry = arena.entry(id);
            let device = entry.value.device();
            let adjoint = if adjoint.device() == device {
                adjoint
            } else {
                log::debug!("moving gradient of {} to {}", id, device);
                adjoint.copy_to(device, accel)?
            };
            let grad = match &entry.grad {
                Some(existing) => {
                    let mut total = existing.copy_to(device, accel)?;
                    k::accumulate(&mut total, &adjoint)?;
                    total
                }
                None => adjoint,
            };
            updates.push((id, grad));
        }
        updates
    };

    let mut arena = session.arena_mut();
    for (id, grad) in updates {
        arena.entry_mut(id).grad = Some(grad);
    }
    Ok(())
}
