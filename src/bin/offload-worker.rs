//! Demo worker process for the offload gate.
//!
//! Reads one job request on stdin and writes the response line on stdout.
//! Hosts a handful of sample jobs used by the integration tests and the
//! documentation.

use std::time::Duration;

use anyhow::bail;
use offload_gate::infra::{serve_stdio, JobRegistry};
use offload_gate::util::init_tracing;

fn fib(n: u64) -> u64 {
    let (mut a, mut b) = (0_u64, 1_u64);
    for _ in 0..n {
        (a, b) = (b, a.wrapping_add(b));
    }
    a
}

fn registry() -> JobRegistry {
    let mut registry = JobRegistry::new();
    registry
        .register("fib", |n: u64| Ok(fib(n)))
        .register("sum", |values: Vec<i64>| Ok(values.iter().sum::<i64>()))
        .register("sleep_ms", |ms: u64| {
            std::thread::sleep(Duration::from_millis(ms));
            Ok(ms)
        })
        .register("fail", |message: String| -> anyhow::Result<()> {
            bail!(message)
        })
        .register("panic", |message: String| -> anyhow::Result<()> {
            panic!("{message}")
        })
        .register("exit", |code: i32| -> anyhow::Result<()> {
            eprintln!("worker exiting with code {code}");
            std::process::exit(code)
        });
    registry
}

fn main() -> anyhow::Result<()> {
    init_tracing();
    serve_stdio(&registry())
}
