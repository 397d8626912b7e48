//! Reporter: rankings per dimension group, baseline deltas, and the
//! rendered Markdown and JSON artifacts.
//!
//! [`build_report`] and [`render_markdown`] are pure; [`publish`] is the
//! only function that writes.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::info;

use coldbench_core::*;
use coldbench_state::RunStore;

use crate::config::ReportConfig;
use crate::error::{ManagerError, ManagerResult};

/// Below this scale-to-zero wait a run is flagged as a quick test.
pub const QUICK_TEST_SECS: u64 = 300;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Report {
    pub run_id: RunId,
    pub generated_at: u64,
    pub created_at: u64,
    pub collected_at: u64,
    pub benchmark_config: BenchmarkConfig,
    pub quick_test: bool,
    pub summary: RunSummary,
    pub services: Vec<ServiceReport>,
    pub fastest_cold_start: Option<Fastest>,
    pub baseline_run_id: Option<RunId>,
    pub comparisons: Vec<Comparison>,
    pub errors: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServiceReport {
    pub service_type: String,
    pub state: AgentState,
    pub groups: Vec<DimensionGroup>,
    pub failures: Vec<UnitFailure>,
}

/// Units sharing one combination of dimension values.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DimensionGroup {
    pub dimensions: BTreeMap<String, String>,
    /// Ranked by cold-start p50, fastest first.
    pub cold_start: Vec<ColdStartRow>,
    /// Ranked by warm p50, fastest first.
    pub warm: Vec<WarmRow>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ColdStartRow {
    pub rank: u32,
    pub implementation: String,
    pub p50: f64,
    pub p95: f64,
    pub p99: f64,
    pub min: f64,
    pub max: f64,
    pub successes: u32,
    pub iterations: u32,
    pub non_idle_starts: u32,
    pub contract_pct: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WarmRow {
    pub rank: u32,
    pub implementation: String,
    pub p50: f64,
    pub p95: f64,
    pub p99: f64,
    pub throughput: f64,
    /// 0–100.
    pub success_rate: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UnitFailure {
    pub implementation: String,
    pub deployment_unit_id: String,
    pub error: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Fastest {
    pub service_type: String,
    pub implementation: String,
    pub dimensions: BTreeMap<String, String>,
    pub p50: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Metric {
    ColdStartP50,
    WarmP50,
}

impl Metric {
    fn label(self) -> &'static str {
        match self {
            Metric::ColdStartP50 => "cold start p50",
            Metric::WarmP50 => "warm p50",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Regression,
    Improvement,
    Unchanged,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Comparison {
    /// `service_type/implementation[dimensions]`.
    pub key: String,
    pub metric: Metric,
    pub baseline_ms: f64,
    pub current_ms: f64,
    /// Positive means slower than the baseline.
    pub delta_pct: f64,
    pub verdict: Verdict,
}

pub fn classify(delta_pct: f64, thresholds: &ReportConfig) -> Verdict {
    if delta_pct > thresholds.regression_threshold_pct {
        Verdict::Regression
    } else if delta_pct < -thresholds.improvement_threshold_pct {
        Verdict::Improvement
    } else {
        Verdict::Unchanged
    }
}

// ── Building ───────────────────────────────────────────────────

pub fn build_report(
    run: &RunDocument,
    baseline: Option<&Baseline>,
    thresholds: &ReportConfig,
    generated_at: u64,
) -> Report {
    let services: Vec<ServiceReport> = run.agents.values().map(service_report).collect();
    let comparisons = baseline
        .map(|b| compare(run, &b.run, thresholds))
        .unwrap_or_default();

    Report {
        run_id: run.run_id.clone(),
        generated_at,
        created_at: run.created_at,
        collected_at: run.collected_at,
        benchmark_config: run.benchmark_config.clone(),
        quick_test: run.benchmark_config.scale_to_zero_timeout_secs < QUICK_TEST_SECS,
        summary: run.summary.clone(),
        fastest_cold_start: fastest(run),
        services,
        baseline_run_id: baseline.map(|b| b.run.run_id.clone()),
        comparisons,
        errors: run.errors.clone(),
    }
}

fn service_report(agent: &AgentOutcome) -> ServiceReport {
    let mut groups: BTreeMap<BTreeMap<String, String>, Vec<&ResultRecord>> = BTreeMap::new();
    let mut failures = Vec::new();
    for record in &agent.results {
        if record.status == ResultStatus::Failed {
            failures.push(UnitFailure {
                implementation: record.implementation.clone(),
                deployment_unit_id: record.deployment_unit_id.clone(),
                error: record.error.clone().unwrap_or_else(|| "unknown error".into()),
            });
            continue;
        }
        groups.entry(record.dimensions.clone()).or_default().push(record);
    }

    ServiceReport {
        service_type: agent.service_type.clone(),
        state: agent.state,
        groups: groups
            .into_iter()
            .map(|(dimensions, records)| DimensionGroup {
                dimensions,
                cold_start: rank_cold(&records),
                warm: rank_warm(&records),
            })
            .collect(),
        failures,
    }
}

fn rank_cold(records: &[&ResultRecord]) -> Vec<ColdStartRow> {
    let mut rows: Vec<ColdStartRow> = records
        .iter()
        .filter_map(|r| {
            let cold = r.cold_start.as_ref()?;
            let stats = cold.statistics?;
            Some(ColdStartRow {
                rank: 0,
                implementation: r.implementation.clone(),
                p50: stats.p50,
                p95: stats.p95,
                p99: stats.p99,
                min: stats.min,
                max: stats.max,
                successes: cold.success_count,
                iterations: cold.success_count + cold.failure_count,
                non_idle_starts: cold.non_idle_starts,
                contract_pct: r.contract_compliance.as_ref().map(|c| c.percentage),
            })
        })
        .collect();
    rows.sort_by(|a, b| a.p50.total_cmp(&b.p50));
    for (i, row) in rows.iter_mut().enumerate() {
        row.rank = i as u32 + 1;
    }
    rows
}

fn rank_warm(records: &[&ResultRecord]) -> Vec<WarmRow> {
    let mut rows: Vec<WarmRow> = records
        .iter()
        .filter_map(|r| {
            let warm = r.warm_requests.as_ref()?;
            let stats = warm.statistics?;
            Some(WarmRow {
                rank: 0,
                implementation: r.implementation.clone(),
                p50: stats.p50,
                p95: stats.p95,
                p99: stats.p99,
                throughput: warm.throughput,
                success_rate: (1.0 - warm.error_rate) * 100.0,
            })
        })
        .collect();
    rows.sort_by(|a, b| a.p50.total_cmp(&b.p50));
    for (i, row) in rows.iter_mut().enumerate() {
        row.rank = i as u32 + 1;
    }
    rows
}

fn fastest(run: &RunDocument) -> Option<Fastest> {
    run.agents
        .values()
        .flat_map(|a| a.results.iter().map(move |r| (a, r)))
        .filter(|(_, r)| r.status == ResultStatus::Success)
        .filter_map(|(a, r)| Some((a, r, r.cold_start_p50()?)))
        .min_by(|x, y| x.2.total_cmp(&y.2))
        .map(|(a, r, p50)| Fastest {
            service_type: a.service_type.clone(),
            implementation: r.implementation.clone(),
            dimensions: r.dimensions.clone(),
            p50,
        })
}

fn successful_records(run: &RunDocument) -> BTreeMap<String, &ResultRecord> {
    run.agents
        .values()
        .flat_map(|a| {
            a.results
                .iter()
                .filter(|r| r.status == ResultStatus::Success)
                .map(move |r| (r.comparison_key(&a.service_type), r))
        })
        .collect()
}

fn compare(run: &RunDocument, baseline: &RunDocument, thresholds: &ReportConfig) -> Vec<Comparison> {
    let before = successful_records(baseline);
    let mut comparisons = Vec::new();
    for (key, current) in successful_records(run) {
        let Some(previous) = before.get(&key) else {
            continue;
        };
        let metrics = [
            (Metric::ColdStartP50, previous.cold_start_p50(), current.cold_start_p50()),
            (Metric::WarmP50, previous.warm_p50(), current.warm_p50()),
        ];
        for (metric, baseline_ms, current_ms) in metrics {
            let (Some(baseline_ms), Some(current_ms)) = (baseline_ms, current_ms) else {
                continue;
            };
            if baseline_ms <= 0.0 {
                continue;
            }
            let delta_pct = (current_ms - baseline_ms) / baseline_ms * 100.0;
            comparisons.push(Comparison {
                key: key.clone(),
                metric,
                baseline_ms,
                current_ms,
                delta_pct,
                verdict: classify(delta_pct, thresholds),
            });
        }
    }
    comparisons
}

// ── Rendering ──────────────────────────────────────────────────

fn format_time(secs: u64) -> String {
    chrono::DateTime::from_timestamp(secs as i64, 0)
        .map(|t| t.format("%Y-%m-%d %H:%M:%S UTC").to_string())
        .unwrap_or_else(|| secs.to_string())
}

fn format_dimensions(dimensions: &BTreeMap<String, String>) -> String {
    if dimensions.is_empty() {
        return "default".into();
    }
    dimensions
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join(", ")
}

pub fn render_markdown(report: &Report) -> String {
    Markdown(report).to_string()
}

struct Markdown<'a>(&'a Report);

impl fmt::Display for Markdown<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let report = self.0;
        let s = &report.summary;
        let cfg = &report.benchmark_config;

        writeln!(f, "# Cold Start Benchmark Report\n")?;
        writeln!(f, "- **Run:** `{}`", report.run_id)?;
        writeln!(f, "- **Started:** {}", format_time(report.created_at))?;
        writeln!(f, "- **Collected:** {}", format_time(report.collected_at))?;
        writeln!(
            f,
            "- **Agents:** {} ({} completed, {} failed, {} timed out, {} missing)",
            s.agents_total, s.agents_completed, s.agents_failed, s.agents_timed_out, s.agents_missing
        )?;
        writeln!(
            f,
            "- **Units:** {} ({} succeeded, {} failed)\n",
            s.units_total, s.units_succeeded, s.units_failed
        )?;

        if report.quick_test {
            writeln!(
                f,
                "> **Quick test:** the scale-to-zero wait was {}s (under {} minutes). \
                 Cold starts may have hit running instances.\n",
                cfg.scale_to_zero_timeout_secs,
                QUICK_TEST_SECS / 60
            )?;
        }

        writeln!(f, "## Configuration\n")?;
        writeln!(f, "| Setting | Value |\n|---|---|")?;
        writeln!(f, "| Cold start iterations | {} |", cfg.cold_start_iterations)?;
        writeln!(f, "| Warm requests | {} |", cfg.warm_requests)?;
        writeln!(f, "| Warm concurrency | {} |", cfg.warm_concurrency)?;
        writeln!(f, "| Request timeout | {} ms |", cfg.request_timeout_ms)?;
        writeln!(f, "| Scale-to-zero wait | {} s |\n", cfg.scale_to_zero_timeout_secs)?;

        for service in &report.services {
            writeln!(f, "## {} ({})\n", service.service_type, service.state.as_str())?;
            if service.groups.is_empty() && service.failures.is_empty() {
                writeln!(f, "No results.\n")?;
            }
            for group in &service.groups {
                writeln!(f, "### {}\n", format_dimensions(&group.dimensions))?;
                if !group.cold_start.is_empty() {
                    writeln!(f, "#### Cold start\n")?;
                    writeln!(
                        f,
                        "| Rank | Implementation | p50 (ms) | p95 (ms) | p99 (ms) | Min (ms) | Max (ms) | Success | Non-idle | Contract |"
                    )?;
                    writeln!(f, "|---|---|---|---|---|---|---|---|---|---|")?;
                    for row in &group.cold_start {
                        let contract = row
                            .contract_pct
                            .map(|p| format!("{p:.0}%"))
                            .unwrap_or_else(|| "n/a".into());
                        writeln!(
                            f,
                            "| {} | {} | {:.1} | {:.1} | {:.1} | {:.1} | {:.1} | {}/{} | {} | {} |",
                            row.rank,
                            row.implementation,
                            row.p50,
                            row.p95,
                            row.p99,
                            row.min,
                            row.max,
                            row.successes,
                            row.iterations,
                            row.non_idle_starts,
                            contract
                        )?;
                    }
                    writeln!(f)?;
                }
                if !group.warm.is_empty() {
                    writeln!(f, "#### Warm requests\n")?;
                    writeln!(
                        f,
                        "| Rank | Implementation | p50 (ms) | p95 (ms) | p99 (ms) | Req/s | Success rate |"
                    )?;
                    writeln!(f, "|---|---|---|---|---|---|---|")?;
                    for row in &group.warm {
                        writeln!(
                            f,
                            "| {} | {} | {:.1} | {:.1} | {:.1} | {:.1} | {:.1}% |",
                            row.rank, row.implementation, row.p50, row.p95, row.p99, row.throughput, row.success_rate
                        )?;
                    }
                    writeln!(f)?;
                }
            }
            if !service.failures.is_empty() {
                writeln!(f, "#### Failed units\n")?;
                for failure in &service.failures {
                    writeln!(
                        f,
                        "- {} (`{}`): {}",
                        failure.implementation, failure.deployment_unit_id, failure.error
                    )?;
                }
                writeln!(f)?;
            }
        }

        if let Some(baseline) = &report.baseline_run_id {
            writeln!(f, "## Baseline comparison (run `{baseline}`)\n")?;
            if report.comparisons.is_empty() {
                writeln!(f, "No units in common with the baseline.\n")?;
            } else {
                writeln!(f, "| Unit | Metric | Baseline (ms) | Current (ms) | Delta | Verdict |")?;
                writeln!(f, "|---|---|---|---|---|---|")?;
                for c in &report.comparisons {
                    let verdict = match c.verdict {
                        Verdict::Regression => "**regression**",
                        Verdict::Improvement => "improvement",
                        Verdict::Unchanged => "unchanged",
                    };
                    writeln!(
                        f,
                        "| {} | {} | {:.1} | {:.1} | {:+.1}% | {} |",
                        c.key,
                        c.metric.label(),
                        c.baseline_ms,
                        c.current_ms,
                        c.delta_pct,
                        verdict
                    )?;
                }
                writeln!(f)?;
            }
        }

        writeln!(f, "## Summary\n")?;
        match &report.fastest_cold_start {
            Some(fastest) => {
                writeln!(
                    f,
                    "Fastest cold start: **{}** ({}, {}) at {:.1} ms p50.",
                    fastest.implementation,
                    fastest.service_type,
                    format_dimensions(&fastest.dimensions),
                    fastest.p50
                )?;
            }
            None => {
                writeln!(f, "No successful cold start was measured.")?;
            }
        }
        if report.baseline_run_id.is_some() {
            let count = |v: Verdict| report.comparisons.iter().filter(|c| c.verdict == v).count();
            writeln!(
                f,
                "\nRegressions: {}. Improvements: {}.",
                count(Verdict::Regression),
                count(Verdict::Improvement)
            )?;
        }

        if !report.errors.is_empty() {
            writeln!(f, "\n## Errors\n")?;
            for e in &report.errors {
                writeln!(f, "- {e}")?;
            }
        }
        Ok(())
    }
}

// ── Publishing ─────────────────────────────────────────────────

/// Build the report for a stored run against the current baseline and write
/// `report.md` and `report.json` next to the run document.
pub fn publish(store: &RunStore, run_id: &str, thresholds: &ReportConfig) -> ManagerResult<Report> {
    let run = store
        .get_run(run_id)?
        .ok_or_else(|| ManagerError::NotFound(format!("run document for run {run_id}")))?;
    let baseline = store.get_baseline()?;
    let report = build_report(&run, baseline.as_ref(), thresholds, epoch_secs());

    let json = serde_json::to_string_pretty(&report)
        .map_err(|e| ManagerError::Serialize(e.to_string()))?;
    store.put_report(run_id, "json", &json)?;
    store.put_report(run_id, "md", &render_markdown(&report))?;

    info!(
        %run_id,
        baseline = report.baseline_run_id.as_deref().unwrap_or("none"),
        regressions = report.comparisons.iter().filter(|c| c.verdict == Verdict::Regression).count(),
        "report published"
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(implementation: &str, cpu: &str, cold: &[f64], warm: &[f64]) -> ResultRecord {
        let cold_start = ColdStartResult {
            measurements_ms: cold.to_vec(),
            statistics: Statistics::compute(cold),
            samples: Vec::new(),
            success_count: cold.len() as u32,
            failure_count: 0,
            non_idle_starts: 0,
        };
        let warm_requests = WarmResult {
            total_requests: warm.len() as u32,
            successful: warm.len() as u32,
            failed: 0,
            duration_ms: 1000.0,
            statistics: Statistics::compute(warm),
            throughput: warm.len() as f64,
            error_rate: 0.0,
        };
        ResultRecord {
            implementation: implementation.into(),
            deployment_unit_id: format!("svc-{implementation}-{cpu}"),
            status: ResultStatus::Success,
            error: None,
            dimensions: BTreeMap::from([("cpu".to_string(), cpu.to_string())]),
            cold_start: Some(cold_start),
            warm_requests: Some(warm_requests),
            contract_compliance: None,
        }
    }

    fn run(run_id: &str, results: Vec<ResultRecord>) -> RunDocument {
        let agent = AgentOutcome {
            service_type: "webhook".into(),
            state: AgentState::Completed,
            phase: Some(Phase::Completed),
            results,
            errors: Vec::new(),
        };
        RunDocument {
            run_id: run_id.into(),
            created_at: 1_700_000_000,
            collected_at: 1_700_003_600,
            benchmark_config: BenchmarkConfig::default(),
            agents: BTreeMap::from([("webhook".to_string(), agent)]),
            summary: RunSummary::default(),
            errors: Vec::new(),
        }
    }

    #[test]
    fn ranks_within_each_dimension_group() {
        let current = run(
            "r2",
            vec![
                record("rust", "1", &[300.0], &[5.0]),
                record("go", "1", &[200.0], &[6.0]),
                record("rust", "2", &[150.0], &[4.0]),
            ],
        );
        let report = build_report(&current, None, &ReportConfig::default(), 0);
        let service = &report.services[0];
        assert_eq!(service.groups.len(), 2);

        let cpu1 = &service.groups[0];
        assert_eq!(cpu1.dimensions["cpu"], "1");
        let order: Vec<&str> = cpu1.cold_start.iter().map(|r| r.implementation.as_str()).collect();
        assert_eq!(order, ["go", "rust"]);
        assert_eq!(cpu1.cold_start[0].rank, 1);
        let warm_order: Vec<&str> = cpu1.warm.iter().map(|r| r.implementation.as_str()).collect();
        assert_eq!(warm_order, ["rust", "go"]);

        let fastest = report.fastest_cold_start.unwrap();
        assert_eq!(fastest.implementation, "rust");
        assert_eq!(fastest.dimensions["cpu"], "2");
        assert!(!report.quick_test);
    }

    #[test]
    fn deltas_beyond_threshold_are_flagged() {
        let baseline = Baseline {
            promoted_at: 0,
            run: run(
                "r1",
                vec![
                    record("go", "1", &[200.0], &[10.0]),
                    record("rust", "1", &[100.0], &[10.0]),
                ],
            ),
        };
        let current = run(
            "r2",
            vec![
                record("go", "1", &[230.0], &[10.5]),
                record("rust", "1", &[80.0], &[10.0]),
                record("zig", "1", &[50.0], &[10.0]),
            ],
        );
        let report = build_report(&current, Some(&baseline), &ReportConfig::default(), 0);
        assert_eq!(report.baseline_run_id.as_deref(), Some("r1"));

        let verdict = |key: &str, metric: Metric| {
            report
                .comparisons
                .iter()
                .find(|c| c.key == key && c.metric == metric)
                .map(|c| (c.delta_pct.round(), c.verdict))
        };
        assert_eq!(
            verdict("webhook/go[cpu=1]", Metric::ColdStartP50),
            Some((15.0, Verdict::Regression))
        );
        assert_eq!(
            verdict("webhook/go[cpu=1]", Metric::WarmP50),
            Some((5.0, Verdict::Unchanged))
        );
        assert_eq!(
            verdict("webhook/rust[cpu=1]", Metric::ColdStartP50),
            Some((-20.0, Verdict::Improvement))
        );
        assert!(verdict("webhook/zig[cpu=1]", Metric::ColdStartP50).is_none());
    }

    #[test]
    fn classify_respects_thresholds() {
        let t = ReportConfig {
            regression_threshold_pct: 10.0,
            improvement_threshold_pct: 5.0,
        };
        assert_eq!(classify(10.0, &t), Verdict::Unchanged);
        assert_eq!(classify(10.1, &t), Verdict::Regression);
        assert_eq!(classify(-5.1, &t), Verdict::Improvement);
        assert_eq!(classify(-4.9, &t), Verdict::Unchanged);
    }

    #[test]
    fn markdown_mentions_quick_test_and_failures() {
        let mut current = run("r3", vec![record("go", "1", &[120.0, 140.0], &[5.0])]);
        current.benchmark_config.scale_to_zero_timeout_secs = 60;
        let failed = ResultRecord {
            status: ResultStatus::Failed,
            error: Some("deploy: image pull failed".into()),
            cold_start: None,
            warm_requests: None,
            ..record("node", "1", &[], &[])
        };
        if let Some(agent) = current.agents.get_mut("webhook") {
            agent.results.push(failed);
        }

        let report = build_report(&current, None, &ReportConfig::default(), 0);
        assert!(report.quick_test);
        let md = render_markdown(&report);
        assert!(md.contains("**Quick test:**"));
        assert!(md.contains("| 1 | go | 140.0 |"));
        assert!(md.contains("- node (`svc-node-1`): deploy: image pull failed"));
        assert!(md.contains("Fastest cold start: **go** (webhook, cpu=1)"));
        assert!(md.contains("2023-11-14 22:13:20 UTC"));
    }

    #[test]
    fn markdown_renders_every_section() {
        let baseline = Baseline {
            promoted_at: 0,
            run: run("r1", vec![record("go", "1", &[200.0], &[10.0])]),
        };
        let mut current = run("r2", vec![record("go", "1", &[230.0], &[10.0])]);
        current.errors.push("agent db: collection timed out".into());

        let report = build_report(&current, Some(&baseline), &ReportConfig::default(), 0);
        let md = render_markdown(&report);
        assert!(md.starts_with("# Cold Start Benchmark Report\n"));
        assert!(md.contains("## Baseline comparison (run `r1`)"));
        assert!(md.contains("| +15.0% | **regression** |"));
        assert!(md.contains("Regressions: 1. Improvements: 0."));
        assert!(md.ends_with("## Errors\n\n- agent db: collection timed out\n"));
    }

    #[test]
    fn publish_writes_both_artifacts() {
        let store = RunStore::in_memory().unwrap();
        store.put_run(&run("r4", vec![record("go", "1", &[100.0], &[5.0])])).unwrap();
        let report = publish(&store, "r4", &ReportConfig::default()).unwrap();
        assert_eq!(report.run_id, "r4");
        assert!(store.get_report("r4", "md").unwrap().unwrap().starts_with("# Cold Start"));
        let json: Report = serde_json::from_str(&store.get_report("r4", "json").unwrap().unwrap()).unwrap();
        assert_eq!(json, report);

        assert!(matches!(
            publish(&store, "missing", &ReportConfig::default()),
            Err(ManagerError::NotFound(_))
        ));
    }
}
