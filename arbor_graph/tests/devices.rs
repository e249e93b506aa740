//! Graphs whose tensors live on the accelerator.

use approx::assert_abs_diff_eq;
use arbor_graph::prelude::*;
use arbor_graph::{finite_diff_tensor_grad, max_grad_error};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn buf(data: Vec<f64>, dims: &[usize]) -> NumericBuffer {
    NumericBuffer::from_vec(data, Shape::from(dims)).unwrap()
}

fn random_buffer(rng: &mut StdRng, dims: &[usize]) -> NumericBuffer {
    let shape = Shape::from(dims);
    let data = (0..shape.numel()).map(|_| rng.gen::<f64>()).collect();
    NumericBuffer::from_vec(data, shape).unwrap()
}

fn small_session(capacity_bytes: usize) -> Session {
    Session::with_config(SessionConfig {
        accelerator: AcceleratorConfig::with_capacity(capacity_bytes),
    })
}

/// z = (a+b)*(a*b) + c + d + (c*d) + e + (c*d), summed over both axes.
fn mixed_expression<'s>(t: &[Tensor<'s>]) -> Result<Tensor<'s>> {
    let (a, b, c, d, e) = (t[0], t[1], t[2], t[3], t[4]);
    let z = (a + b) * (a * b) + c + d + (c * d) + e + (c * d);
    z.sum(0, false)?.sum(0, false)
}

fn mixed_inputs(rng: &mut StdRng) -> Vec<NumericBuffer> {
    let shapes: [&[usize]; 5] = [&[4, 5], &[4, 5], &[4, 1], &[1, 1], &[1, 5]];
    shapes
        .iter()
        .map(|dims| random_buffer(rng, dims))
        .collect()
}

#[test]
fn accelerator_backward_matches_finite_differences() {
    init_logging();
    let mut rng = StdRng::seed_from_u64(2024);
    let inputs = mixed_inputs(&mut rng);

    let session = Session::new();
    let vars: Vec<Tensor<'_>> = inputs
        .iter()
        .map(|b| session.var(b.try_clone().unwrap()))
        .collect();
    for v in &vars {
        v.to_accelerator().unwrap();
    }

    let z = mixed_expression(&vars).unwrap();
    assert_eq!(z.device(), Device::Accelerator);
    assert!(z.shape().is_scalar());

    let seed = session.scalar(1.0);
    seed.to_accelerator().unwrap();
    z.backward(Some(&seed)).unwrap();

    // Gradients stay with their values until moved back.
    assert!(matches!(
        vars[0].grad(),
        Err(TensorError::Device(DeviceError::NotOnHost))
    ));

    let mut grads = Vec::new();
    for v in &vars {
        v.to_host().unwrap();
        grads.push(v.grad().unwrap().unwrap());
    }
    for (g, input) in grads.iter().zip(inputs.iter()) {
        assert_eq!(g.shape(), input.shape());
    }

    let fd = finite_diff_tensor_grad(mixed_expression, &inputs, 1e-6).unwrap();
    for (g, f) in grads.iter().zip(fd.iter()) {
        assert!(max_grad_error(&g.to_vec().unwrap(), f) < 1e-4);
    }
}

#[test]
fn host_and_accelerator_graphs_agree() {
    let mut rng = StdRng::seed_from_u64(5);
    let inputs = mixed_inputs(&mut rng);

    let run = |on_accelerator: bool| -> Vec<Vec<f64>> {
        let session = Session::new();
        let vars: Vec<Tensor<'_>> = inputs
            .iter()
            .map(|b| session.var(b.try_clone().unwrap()))
            .collect();
        let seed = session.scalar(1.0);
        if on_accelerator {
            vars.iter().for_each(|v| v.to_accelerator().unwrap());
            seed.to_accelerator().unwrap();
        }
        mixed_expression(&vars).unwrap().backward(Some(&seed)).unwrap();
        vars.iter()
            .map(|v| {
                v.to_host().unwrap();
                v.grad().unwrap().unwrap().to_vec().unwrap()
            })
            .collect()
    };

    let host = run(false);
    let device = run(true);
    for (h, d) in host.iter().flatten().zip(device.iter().flatten()) {
        assert_abs_diff_eq!(*h, *d, epsilon = 1e-12);
    }
}

#[test]
fn round_trip_is_bit_identical() {
    let mut rng = StdRng::seed_from_u64(99);
    let session = Session::new();
    let x = session.var(random_buffer(&mut rng, &[3, 7]));
    let before: Vec<u64> = x.to_vec().unwrap().iter().map(|v| v.to_bits()).collect();

    x.to_accelerator().unwrap();
    x.to_host().unwrap();

    let after: Vec<u64> = x.to_vec().unwrap().iter().map(|v| v.to_bits()).collect();
    assert_eq!(before, after);
    assert_eq!(x.shape().dims(), &[3, 7]);
}

#[test]
fn transfer_moves_existing_gradient() {
    let session = Session::new();
    let x = session.var(buf(vec![1.0, 2.0], &[2]));
    (x * x).sum(0, false).unwrap().backward(None).unwrap();

    x.to_accelerator().unwrap();
    assert_eq!(session.accelerator().live_allocations(), 2);
    assert!(x.grad().unwrap_err().is_device());

    x.to_host().unwrap();
    assert_eq!(x.grad().unwrap().unwrap().to_vec().unwrap(), vec![2.0, 4.0]);
    assert_eq!(session.accelerator().live_allocations(), 0);
}

#[test]
fn out_of_memory_transfer_leaves_tensor_on_host() {
    let session = small_session(64);
    let x = session.var(buf(vec![1.5; 16], &[4, 4]));

    let err = x.to_accelerator().unwrap_err();
    assert!(matches!(err, TensorError::Device(DeviceError::OutOfMemory { .. })));
    assert!(x.is_on_host());
    assert_eq!(x.to_vec().unwrap(), vec![1.5; 16]);
    assert_eq!(session.accelerator().used_bytes(), 0);
}

#[test]
fn transfer_is_all_or_nothing_with_gradient() {
    // Fits the value but not the value and its gradient.
    let session = small_session(48);
    let x = session.var(buf(vec![1.0, 2.0, 3.0, 4.0], &[4]));
    (x * x).sum(0, false).unwrap().backward(None).unwrap();

    assert!(x.to_accelerator().unwrap_err().is_device());
    assert!(x.is_on_host());
    assert_eq!(x.grad().unwrap().unwrap().to_vec().unwrap(), vec![2.0, 4.0, 6.0, 8.0]);
    assert_eq!(session.accelerator().live_allocations(), 0);
}

#[test]
fn freed_operand_fails_backward_without_side_effects() {
    let session = Session::new();
    let a = session.var(buf(vec![1.0, 2.0], &[2]));
    let b = session.var(buf(vec![3.0, 4.0], &[2]));
    a.to_accelerator().unwrap();
    b.to_accelerator().unwrap();

    let z = (a * b).sum(0, false).unwrap();
    a.free_accelerator();

    assert!(z.backward(None).unwrap_err().is_use_after_free());
    b.to_host().unwrap();
    assert!(b.grad().unwrap().is_none());
    assert!((a * b).sum(0, false).is_err());
}

#[test]
fn free_releases_value_and_gradient() {
    let session = Session::new();
    let x = session.var(buf(vec![1.0, 2.0], &[2]));
    x.to_accelerator().unwrap();
    let seed = session.scalar(1.0);
    seed.to_accelerator().unwrap();
    (x * x).sum(0, false).unwrap().backward(Some(&seed)).unwrap();

    let before = session.accelerator().live_allocations();
    x.free_accelerator();
    assert_eq!(session.accelerator().live_allocations(), before - 2);
    assert!(x.grad().unwrap_err().is_use_after_free());
    assert!(x.exp().unwrap_err().is_use_after_free());
}

#[test]
fn seed_must_share_root_device() {
    let session = Session::new();
    let x = session.var(buf(vec![1.0, 2.0], &[2]));
    x.to_accelerator().unwrap();
    let z = (x * x).sum(0, false).unwrap();

    let host_seed = session.scalar(1.0);
    let err = z.backward(Some(&host_seed)).unwrap_err();
    assert_eq!(
        err,
        TensorError::Device(DeviceError::DeviceMismatch {
            lhs: Device::Accelerator,
            rhs: Device::Host,
        })
    );

    // The implicit seed is created on the root's device.
    z.backward(None).unwrap();
    x.to_host().unwrap();
    assert_eq!(x.grad().unwrap().unwrap().to_vec().unwrap(), vec![2.0, 4.0]);
}

#[test]
fn gradient_is_stored_on_value_device() {
    init_logging();
    let session = Session::new();
    let a = session.var(buf(vec![1.0, 2.0, 3.0], &[3]));
    let b = session.var(buf(vec![4.0, 5.0, 6.0], &[3]));
    a.to_accelerator().unwrap();
    b.to_accelerator().unwrap();
    let z = (a + b).sum(0, false).unwrap();

    // The adjoint for `a` is computed on the accelerator but `a` now lives
    // on the host.
    a.to_host().unwrap();
    z.backward(None).unwrap();
    assert!(a.is_on_host());
    assert_eq!(a.grad().unwrap().unwrap().to_vec().unwrap(), vec![1.0; 3]);
    assert!(b.grad().unwrap_err().is_device());

    // Accumulating into the host gradient stays on the host.
    z.backward(None).unwrap();
    assert_eq!(a.grad().unwrap().unwrap().to_vec().unwrap(), vec![2.0; 3]);

    b.to_host().unwrap();
    assert_eq!(b.grad().unwrap().unwrap().to_vec().unwrap(), vec![2.0; 3]);
    z.to_host().unwrap();
    // Only the intermediate `a + b` and its gradient are left on the device.
    assert_eq!(session.accelerator().live_allocations(), 2);
}
