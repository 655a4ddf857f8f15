//! Tier-up on the embedded isolate: the `v8` profile's flags must promote a
//! scaffolded candidate to optimized code within the warm-up loop.
//!
//! Runs in its own test binary because it starts V8 with natives syntax.

use std::time::Duration;

use oracle::{ExitStatus, IsolateTransport, TargetProfile, Transport};

/// `%GetOptimizationStatus` bit set for Maglev and TurboFan code.
const OPTIMIZED: u32 = 1 << 4;

fn optimization_status(stdout: &str) -> u32 {
    stdout
        .lines()
        .last()
        .and_then(|line| line.trim().parse().ok())
        .unwrap_or_else(|| panic!("no status in output: {:?}", stdout))
}

#[tokio::test]
async fn test_warmup_reaches_optimizing_tier() {
    let mut config = TargetProfile::builtin("v8").unwrap().config().clone();
    config.launch.arguments.push("--allow-natives-syntax".to_string());
    let profile = TargetProfile::from_config(config).unwrap();

    let program = format!(
        "{}\nprint(%GetOptimizationStatus({}));\n",
        profile.scaffold().wrap("return opt_param ? 'a' : 'b';"),
        profile.oracle_params().candidate
    );
    let mut transport = IsolateTransport::new(profile.launch(), profile.sentinel().clone());
    let result = transport.execute(&program, Duration::from_secs(10)).await.unwrap();
    assert_eq!(result.status, ExitStatus::Exited(0), "stderr: {}", result.stderr);

    let status = optimization_status(&result.stdout);
    assert_ne!(status & OPTIMIZED, 0, "status {:#b} is not optimized", status);
}
