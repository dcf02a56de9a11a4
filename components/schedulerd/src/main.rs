// SPDX-FileCopyrightText: Copyright (c) 2024-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

mod connector;
mod server;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;

use cohort_scheduler::config::SchedulerConf;
use cohort_scheduler::metrics::PrometheusRecorder;
use cohort_scheduler::plugins::default_registry;
use cohort_scheduler::{logging, CancellationToken, Result, Scheduler};

use connector::StandaloneCluster;

#[derive(Parser, Debug)]
#[command(name = "schedulerd", author, version, about = "Gang-aware batch scheduler", long_about = None)]
struct Args {
    /// Scheduler identity; workloads naming another scheduler are ignored
    #[arg(long, default_value = "cohort")]
    scheduler_name: String,

    /// Path of the scheduler configuration file
    #[arg(long)]
    scheduler_conf: Option<PathBuf>,

    /// Period between scheduling cycles (e.g. "1s", "500ms")
    #[arg(long, default_value = "1s", value_parser = parse_duration)]
    schedule_period: Duration,

    /// Queue jobs land in when their group names none
    #[arg(long, default_value = "default")]
    default_queue: String,

    /// Gain leadership before running the loop; for replicated deployments
    #[arg(long)]
    leader_elect: bool,

    /// Namespace of the leader-election lock object
    #[arg(long)]
    lock_object_namespace: Option<String>,

    /// Address serving /metrics and /health
    #[arg(long, default_value = "0.0.0.0:8080")]
    listen_address: String,

    /// Path to a kubeconfig with authorization and master location
    #[arg(long)]
    kubeconfig: Option<PathBuf>,

    /// Address of the cluster API server (overrides kubeconfig)
    #[arg(long)]
    master: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    logging::init();

    let args = Args::parse();
    validate_args(&args)?;

    let conf = SchedulerConf::load(args.scheduler_conf.as_deref())?;

    let prometheus_registry = prometheus::Registry::new();
    let recorder = Arc::new(PrometheusRecorder::new(&prometheus_registry)?);

    let cluster = StandaloneCluster::new(&args.default_queue);
    if args.kubeconfig.is_some() || args.master.is_some() {
        tracing::warn!(
            "this build carries the standalone connector; kubeconfig/master are ignored"
        );
    }
    if args.leader_elect {
        tracing::warn!("leader election is delegated to the deployment environment");
    }

    let scheduler = Scheduler::new(
        conf,
        default_registry(),
        cluster.effectors(),
        recorder,
        args.schedule_period,
    )?;

    let cancel = CancellationToken::new();

    let addr = parse_listen_address(&args.listen_address)?;
    tokio::spawn(server::start_http_server(
        addr,
        prometheus_registry,
        cancel.child_token(),
    ));

    let cancel_on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("interrupt received; finishing current cycle");
            cancel_on_signal.cancel();
        }
    });

    tracing::info!(
        scheduler = %args.scheduler_name,
        period = ?args.schedule_period,
        "starting scheduling loop"
    );
    scheduler.run(cancel).await
}

fn validate_args(args: &Args) -> Result<()> {
    if args.leader_elect && args.lock_object_namespace.is_none() {
        anyhow::bail!("--lock-object-namespace is required when --leader-elect is set");
    }
    if args.schedule_period.is_zero() {
        anyhow::bail!("--schedule-period must be positive");
    }
    Ok(())
}

/// Accepts "500ms", "1s", "2m", "1h" or a bare number of seconds.
fn parse_duration(input: &str) -> std::result::Result<Duration, String> {
    let input = input.trim();
    let parse = |value: &str| {
        value
            .trim()
            .parse::<f64>()
            .map_err(|e| format!("invalid duration '{input}': {e}"))
    };

    if let Some(value) = input.strip_suffix("ms") {
        return Ok(Duration::from_secs_f64(parse(value)? / 1000.0));
    }
    if let Some(value) = input.strip_suffix('h') {
        return Ok(Duration::from_secs_f64(parse(value)? * 3600.0));
    }
    if let Some(value) = input.strip_suffix('m') {
        return Ok(Duration::from_secs_f64(parse(value)? * 60.0));
    }
    if let Some(value) = input.strip_suffix('s') {
        return Ok(Duration::from_secs_f64(parse(value)?));
    }
    Ok(Duration::from_secs_f64(parse(input)?))
}

/// Accepts ":8080" shorthand for all interfaces.
fn parse_listen_address(input: &str) -> Result<SocketAddr> {
    let normalized = if input.starts_with(':') {
        format!("0.0.0.0{input}")
    } else {
        input.to_string()
    };
    normalized
        .parse()
        .map_err(|e| anyhow::anyhow!("invalid listen address '{input}': {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("1s", Duration::from_secs(1))]
    #[case("500ms", Duration::from_millis(500))]
    #[case("2m", Duration::from_secs(120))]
    #[case("1h", Duration::from_secs(3600))]
    #[case("0.5", Duration::from_millis(500))]
    fn test_parse_duration(#[case] input: &str, #[case] expected: Duration) {
        assert_eq!(parse_duration(input).unwrap(), expected);
    }

    #[test]
    fn test_parse_duration_rejects_garbage() {
        assert!(parse_duration("soon").is_err());
    }

    #[test]
    fn test_listen_address_shorthand() {
        let addr = parse_listen_address(":8080").unwrap();
        assert_eq!(addr.port(), 8080);
        assert!(parse_listen_address("127.0.0.1:9090").is_ok());
        assert!(parse_listen_address("nonsense").is_err());
    }

    #[test]
    fn test_leader_elect_requires_lock_namespace() {
        let args = Args::parse_from(["schedulerd", "--leader-elect"]);
        assert!(validate_args(&args).is_err());

        let args = Args::parse_from([
            "schedulerd",
            "--leader-elect",
            "--lock-object-namespace",
            "kube-system",
        ]);
        assert!(validate_args(&args).is_ok());
    }
}
