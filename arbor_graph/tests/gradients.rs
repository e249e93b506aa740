//! Backward-pass results checked against closed forms and finite differences.

use approx::assert_abs_diff_eq;
use arbor_graph::prelude::*;
use arbor_graph::{autodiff_grad, finite_diff_tensor_grad};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

const EPS: f64 = 1e-6;
const TOL: f64 = 1e-4;

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn buf(data: Vec<f64>, dims: &[usize]) -> NumericBuffer {
    NumericBuffer::from_vec(data, Shape::from(dims)).unwrap()
}

/// Uniform values in [lo, hi).
fn random_buffer(rng: &mut StdRng, dims: &[usize], lo: f64, hi: f64) -> NumericBuffer {
    let shape = Shape::from(dims);
    let data = (0..shape.numel()).map(|_| rng.gen_range(lo..hi)).collect();
    NumericBuffer::from_vec(data, shape).unwrap()
}

/// Values of magnitude in [0.5, 2) with random sign, away from kinks at zero.
fn signed_buffer(rng: &mut StdRng, dims: &[usize]) -> NumericBuffer {
    let shape = Shape::from(dims);
    let data = (0..shape.numel())
        .map(|_| {
            let v = rng.gen_range(0.5..2.0);
            if rng.gen_bool(0.5) {
                v
            } else {
                -v
            }
        })
        .collect();
    NumericBuffer::from_vec(data, shape).unwrap()
}

fn assert_grad_close(name: &str, autodiff: &[f64], finite_diff: &[f64], tol: f64) {
    assert_eq!(autodiff.len(), finite_diff.len(), "{}: length mismatch", name);
    for (i, (ad, fd)) in autodiff.iter().zip(finite_diff.iter()).enumerate() {
        let err = (ad - fd).abs();
        assert!(
            err < tol,
            "{}: element {} mismatch: autodiff={}, finite_diff={}, err={}",
            name,
            i,
            ad,
            fd,
            err
        );
    }
}

macro_rules! check_gradients {
    ($name:expr, $inputs:expr, $f:expr) => {{
        let inputs = $inputs;
        let ad = autodiff_grad($f, &inputs).unwrap();
        let fd = finite_diff_tensor_grad($f, &inputs, EPS).unwrap();
        for (i, (a, f)) in ad.iter().zip(fd.iter()).enumerate() {
            assert_grad_close(&format!("{} input {}", $name, i), a, f, TOL);
        }
    }};
}

#[test]
fn random_expressions_match_finite_differences() {
    init_logging();
    let mut rng = StdRng::seed_from_u64(42);
    let shape_pairs: [(&[usize], &[usize]); 5] = [
        (&[4, 5], &[1, 5]),
        (&[3], &[2, 3]),
        (&[2, 3, 4], &[3, 1]),
        (&[], &[2, 2]),
        (&[4, 1], &[1, 1]),
    ];

    for (lhs, rhs) in shape_pairs {
        let name = format!("{:?} with {:?}", lhs, rhs);
        check_gradients!(
            name,
            [random_buffer(&mut rng, lhs, -1.0, 1.0), random_buffer(&mut rng, rhs, -1.0, 1.0)],
            |t| {
                let (a, b) = (t[0], t[1]);
                a.add(b)?.mul(a.mul(b)?)?.add(a)?.sum(0, true)
            }
        );
    }
}

#[test]
fn chained_sums_match_finite_differences() {
    let mut rng = StdRng::seed_from_u64(3);
    check_gradients!(
        "drop axes",
        [random_buffer(&mut rng, &[3, 4], -1.0, 1.0)],
        |t| t[0].mul(t[0])?.sum(1, false)?.sum(0, false)
    );
    check_gradients!(
        "keep axes",
        [random_buffer(&mut rng, &[3, 4], -1.0, 1.0)],
        |t| t[0].mul(t[0])?.sum(0, true)?.sum(1, true)
    );
    check_gradients!(
        "mixed",
        [random_buffer(&mut rng, &[2, 3, 4], -1.0, 1.0)],
        |t| t[0].exp()?.sum(1, false)?.sum(1, true)
    );
}

#[test]
fn supplemented_ops_match_finite_differences() {
    let mut rng = StdRng::seed_from_u64(11);

    check_gradients!(
        "sub/div",
        [
            signed_buffer(&mut rng, &[3, 4]),
            random_buffer(&mut rng, &[1, 4], 0.5, 2.0)
        ],
        |t| t[0].sub(t[1])?.div(t[1])
    );
    check_gradients!(
        "neg/exp/log",
        [random_buffer(&mut rng, &[2, 3], 0.5, 2.0)],
        |t| t[0].log()?.neg()?.exp()
    );
    check_gradients!(
        "pow",
        [random_buffer(&mut rng, &[5], 0.5, 2.0)],
        |t| t[0].powf(2.5)
    );
    check_gradients!("relu", [signed_buffer(&mut rng, &[4, 3])], |t| t[0].relu()?.mul(t[0]));
    check_gradients!(
        "matmul/transpose",
        [
            random_buffer(&mut rng, &[3, 4], -1.0, 1.0),
            random_buffer(&mut rng, &[3, 2], -1.0, 1.0)
        ],
        |t| t[0].transpose()?.matmul(t[1])
    );
}

/// Distinct values in random order, so every slice has a unique maximum.
fn distinct_buffer(rng: &mut StdRng, dims: &[usize]) -> NumericBuffer {
    let shape = Shape::from(dims);
    let mut data: Vec<f64> = (0..shape.numel()).map(|i| 0.25 * i as f64 - 1.0).collect();
    for i in (1..data.len()).rev() {
        data.swap(i, rng.gen_range(0..=i));
    }
    NumericBuffer::from_vec(data, shape).unwrap()
}

#[test]
fn max_reductions_match_finite_differences() {
    let mut rng = StdRng::seed_from_u64(7);
    check_gradients!(
        "max drop axis",
        [distinct_buffer(&mut rng, &[3, 4])],
        |t| t[0].max(1, false)?.exp()?.sum(0, false)
    );
    check_gradients!(
        "max keep axis",
        [distinct_buffer(&mut rng, &[2, 3, 4]), random_buffer(&mut rng, &[1, 3, 4], 0.5, 2.0)],
        |t| t[0].max(0, true)?.mul(t[1])?.exp()
    );
}

#[test]
fn max_routes_gradient_to_first_maximum() {
    let session = Session::new();
    let x = session.var(buf(vec![2.0, 7.0, 7.0, 1.0, 0.5, 3.0], &[2, 3]));

    let m = x.max(1, false).unwrap();
    assert_eq!(m.to_vec().unwrap(), vec![7.0, 3.0]);
    assert_eq!(x.argmax(1, false).unwrap().to_vec().unwrap(), vec![1.0, 2.0]);

    m.backward(Some(&session.from_vec(vec![1.0, 10.0], [2]).unwrap()))
        .unwrap();
    assert_eq!(
        x.grad().unwrap().unwrap().to_vec().unwrap(),
        vec![0.0, 1.0, 0.0, 0.0, 0.0, 10.0]
    );
}

#[test]
fn broadcast_operand_gets_gradient_of_its_own_shape() {
    let session = Session::new();
    let a = session.var(buf((0..20).map(f64::from).collect(), &[4, 5]));
    let e = session.var(buf(vec![1.0, 2.0, 3.0, 4.0, 5.0], &[1, 5]));

    let z = a.add(e).unwrap();
    assert_eq!(z.shape().dims(), &[4, 5]);

    let total = z.sum(0, false).unwrap().sum(0, false).unwrap();
    total.backward(None).unwrap();

    let de = e.grad().unwrap().unwrap();
    assert_eq!(de.shape().dims(), &[1, 5]);
    assert_eq!(de.to_vec().unwrap(), vec![4.0; 5]);
    assert_eq!(a.grad().unwrap().unwrap().to_vec().unwrap(), vec![1.0; 20]);
}

#[test]
fn shared_subexpression_accumulates_both_paths() {
    let session = Session::new();
    let a = session.var(buf(vec![1.0, 2.0, 3.0], &[3]));
    let b = session.var(buf(vec![4.0, 5.0, 6.0], &[3]));

    let z = (a + b) + (a * b);
    z.backward(Some(&session.from_vec(vec![1.0; 3], [3]).unwrap()))
        .unwrap();

    assert_eq!(a.grad().unwrap().unwrap().to_vec().unwrap(), vec![5.0, 6.0, 7.0]);
    assert_eq!(b.grad().unwrap().unwrap().to_vec().unwrap(), vec![2.0, 3.0, 4.0]);
}

#[test]
fn product_sum_gradients_swap_operands() {
    let session = Session::new();
    let a = session.var(buf(vec![1.0, 2.0, 3.0, 4.0], &[2, 2]));
    let b = session.var(buf(vec![5.0, 6.0, 7.0, 8.0], &[2, 2]));

    let z = (a * b).sum(0, false).unwrap().sum(0, false).unwrap();
    assert_eq!(z.item().unwrap(), 70.0);
    z.backward(None).unwrap();

    assert_eq!(a.grad().unwrap().unwrap().to_vec().unwrap(), vec![5.0, 6.0, 7.0, 8.0]);
    assert_eq!(b.grad().unwrap().unwrap().to_vec().unwrap(), vec![1.0, 2.0, 3.0, 4.0]);
}

#[test]
fn non_scalar_root_without_seed_is_a_shape_error() {
    let session = Session::new();
    let a = session.var(buf(vec![1.0, 2.0], &[2]));
    let z = a * a;

    let err = z.backward(None).unwrap_err();
    assert!(err.is_shape());
    assert!(a.grad().unwrap().is_none());
}

#[test]
fn explicit_unit_seed_equals_implicit_seed() {
    let grads_with = |seed: Option<f64>| {
        let session = Session::new();
        let a = session.var(buf(vec![1.0, 2.0, 3.0, 4.0], &[2, 2]));
        let b = session.var(buf(vec![5.0, 6.0, 7.0, 8.0], &[2, 2]));
        // (1, 1) root: keepdim sums
        let z = (a * b + a).sum(0, true).unwrap().sum(1, true).unwrap();
        assert_eq!(z.shape().dims(), &[1, 1]);

        match seed {
            Some(v) => z.backward(Some(&session.scalar(v))).unwrap(),
            None => z.backward(None).unwrap(),
        }
        (
            a.grad().unwrap().unwrap().to_vec().unwrap(),
            b.grad().unwrap().unwrap().to_vec().unwrap(),
        )
    };

    let implicit = grads_with(None);
    assert_eq!(implicit, grads_with(Some(1.0)));

    let doubled = grads_with(Some(2.0));
    for (d, i) in doubled.0.iter().zip(implicit.0.iter()) {
        assert_abs_diff_eq!(*d, 2.0 * i, epsilon = 1e-12);
    }
}

#[test]
fn repeated_backward_accumulates_until_zeroed() {
    let session = Session::new();
    let x = session.var(buf(vec![1.0, -2.0], &[2]));
    let z = (x * x).sum(0, false).unwrap();

    z.backward(None).unwrap();
    z.backward(None).unwrap();
    assert_eq!(x.grad().unwrap().unwrap().to_vec().unwrap(), vec![4.0, -8.0]);

    x.zero_grad().unwrap();
    assert_eq!(x.grad().unwrap().unwrap().to_vec().unwrap(), vec![0.0, 0.0]);

    z.backward(None).unwrap();
    assert_eq!(x.grad().unwrap().unwrap().to_vec().unwrap(), vec![2.0, -4.0]);
}

#[test]
fn intermediate_tensors_keep_their_gradients() {
    let session = Session::new();
    let x = session.var(buf(vec![1.0, 2.0], &[2]));
    let y = x.exp().unwrap();
    let z = y.sum(0, false).unwrap();
    z.backward(None).unwrap();

    assert_eq!(y.grad().unwrap().unwrap().to_vec().unwrap(), vec![1.0, 1.0]);
    let dx = x.grad().unwrap().unwrap().to_vec().unwrap();
    assert_abs_diff_eq!(dx[0], 1.0_f64.exp(), epsilon = 1e-12);
    assert_abs_diff_eq!(dx[1], 2.0_f64.exp(), epsilon = 1e-12);
}

#[test]
fn constants_receive_no_gradient() {
    let session = Session::new();
    let x = session.var(buf(vec![1.0, 2.0], &[2]));
    let c = session.from_vec(vec![3.0, 4.0], [2]).unwrap();
    let z = (x * c).sum(0, false).unwrap();
    z.backward(None).unwrap();

    assert_eq!(x.grad().unwrap().unwrap().to_vec().unwrap(), vec![3.0, 4.0]);
    assert!(c.grad().unwrap().is_none());
}

#[test]
fn failing_backward_leaves_gradients_unchanged() {
    let session = Session::new();
    let x = session.var(buf(vec![1.0, 2.0], &[2]));
    let z = (x * x).sum(0, false).unwrap();
    z.backward(None).unwrap();

    let y = x * x;
    let wrong = session.from_vec(vec![1.0, 1.0, 1.0], [3]).unwrap();
    assert!(y.backward(Some(&wrong)).is_err());
    assert_eq!(x.grad().unwrap().unwrap().to_vec().unwrap(), vec![2.0, 4.0]);
}
