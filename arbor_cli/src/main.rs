//! arbor-demo: gradients of a broadcasting expression, checked against
//! finite differences.
//!
//! Usage:
//!   arbor-demo [--seed N] [--eps EPS] [--capacity-bytes BYTES] [--host-only]
//!
//! Builds `z = (a+b)*(a*b) + c + d + (c*d) + e + (c*d)` from random inputs of
//! shapes (4,5), (4,5), (4,1), (1,1) and (1,5), reduces it to a scalar, runs
//! backward on the accelerator and compares every gradient with central
//! differences computed on the host.

use clap::Parser;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use arbor_buffer::{AcceleratorConfig, NumericBuffer, Result, Shape};
use arbor_graph::{finite_diff_tensor_grad, max_grad_error, Session, SessionConfig, Tensor};

const NAMES: [&str; 5] = ["a", "b", "c", "d", "e"];
const SHAPES: [&[usize]; 5] = [&[4, 5], &[4, 5], &[4, 1], &[1, 1], &[1, 5]];
const TOLERANCE: f64 = 1e-4;

/// Reverse-mode autodiff demo
#[derive(Parser, Debug)]
#[command(name = "arbor-demo")]
#[command(version, about, long_about = None)]
struct Args {
    /// Seed for the random inputs
    #[arg(long, default_value_t = 0)]
    seed: u64,

    /// Finite difference step
    #[arg(long, default_value_t = 1e-6)]
    eps: f64,

    /// Accelerator capacity in bytes (defaults to $ARBOR_ACCELERATOR_CAPACITY or 256 MiB)
    #[arg(long, value_name = "BYTES")]
    capacity_bytes: Option<usize>,

    /// Keep every tensor on the host
    #[arg(long)]
    host_only: bool,
}

fn expression<'s>(t: &[Tensor<'s>]) -> Result<Tensor<'s>> {
    let (a, b, c, d, e) = (t[0], t[1], t[2], t[3], t[4]);
    let cd = c.mul(d)?;
    let z = a
        .add(b)?
        .mul(a.mul(b)?)?
        .add(c)?
        .add(d)?
        .add(cd)?
        .add(e)?
        .add(cd)?;
    z.sum(0, false)?.sum(0, false)
}

fn random_inputs(seed: u64) -> Result<Vec<NumericBuffer>> {
    let mut rng = StdRng::seed_from_u64(seed);
    SHAPES
        .iter()
        .map(|dims| {
            let shape = Shape::from(*dims);
            let data = (0..shape.numel()).map(|_| rng.gen::<f64>()).collect();
            NumericBuffer::from_vec(data, shape)
        })
        .collect()
}

fn run(args: &Args) -> Result<bool> {
    let config = match args.capacity_bytes {
        Some(bytes) => SessionConfig {
            accelerator: AcceleratorConfig::with_capacity(bytes),
        },
        None => SessionConfig::from_env(),
    };
    let session = Session::with_config(config);
    let inputs = random_inputs(args.seed)?;

    println!("=== Reverse-Mode Autodiff Demo ===\n");
    println!("Expression: z = sum(sum((a+b)*(a*b) + c + d + (c*d) + e + (c*d)))");
    for (name, input) in NAMES.iter().zip(inputs.iter()) {
        println!("{} {} =\n{}\n", name, input.shape(), input);
    }

    let vars = inputs
        .iter()
        .map(|b| Ok(session.var(b.try_clone()?)))
        .collect::<Result<Vec<_>>>()?;
    let seed = session.scalar(1.0);
    if !args.host_only {
        for v in &vars {
            v.to_accelerator()?;
        }
        seed.to_accelerator()?;
    }

    let z = expression(&vars)?;
    println!("Graph built on {} ({} tensors)", z.device(), session.len());
    z.backward(Some(&seed))?;

    z.to_host()?;
    println!("Value:      z = {:.10}\n", z.item()?);

    let mut grads = Vec::with_capacity(vars.len());
    for v in &vars {
        v.to_host()?;
        grads.push(v.grad()?.map(|g| g.to_vec()).transpose()?.unwrap_or_default());
    }
    seed.free_accelerator();
    log::info!(
        "{} accelerator allocations live after reading gradients, {} bytes free",
        session.accelerator().live_allocations(),
        session.accelerator().available_bytes()
    );

    println!("Autodiff gradients:");
    for ((name, v), grad) in NAMES.iter().zip(vars.iter()).zip(grads.iter()) {
        let buffer = NumericBuffer::from_vec(grad.clone(), v.shape())?;
        println!("  d{} =\n{}\n", name, buffer);
    }

    let fd = finite_diff_tensor_grad(expression, &inputs, args.eps)?;

    println!("Gradient errors (eps={:e}):", args.eps);
    let mut max_err: f64 = 0.0;
    for ((name, ad), fd) in NAMES.iter().zip(grads.iter()).zip(fd.iter()) {
        let err = max_grad_error(ad, fd);
        println!("  |autodiff - fd| for {}: {:.2e}", name, err);
        max_err = max_err.max(err);
    }
    println!("  Max absolute error:    {:.2e}\n", max_err);

    let passed = max_err < TOLERANCE;
    if passed {
        println!("PASS: Max error ({:.2e}) < tolerance ({:.2e})", max_err, TOLERANCE);
    } else {
        println!("FAIL: Max error ({:.2e}) >= tolerance ({:.2e})", max_err, TOLERANCE);
    }
    Ok(passed)
}

fn main() {
    env_logger::init();
    let args = Args::parse();

    match run(&args) {
        Ok(true) => {}
        Ok(false) => std::process::exit(1),
        Err(e) => {
            eprintln!("error: {}", e);
            std::process::exit(2);
        }
    }
}
