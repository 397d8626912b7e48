//! Aggregator: merge per-Agent results into one run document.
//!
//! Pure. Every Agent invoked for the run appears in the output, whether it
//! completed, failed, timed out, rejected the deploy, or went silent.

use std::collections::BTreeMap;

use coldbench_core::*;

/// What the Orchestrator gathered from one accepted Agent.
#[derive(Debug, Clone, Default)]
pub struct Collected {
    pub service_type: String,
    /// Last status read, if any.
    pub status: Option<StatusRecord>,
    pub results: Option<ResultsDocument>,
    /// The collection deadline passed before the status became terminal.
    pub timed_out: bool,
    pub errors: Vec<String>,
}

pub fn aggregate(
    invocation: &InvocationRecord,
    collected: Vec<Collected>,
    collected_at: u64,
) -> RunDocument {
    let mut by_type: BTreeMap<String, Collected> = collected
        .into_iter()
        .map(|c| (c.service_type.clone(), c))
        .collect();

    let mut agents = BTreeMap::new();
    for invoked in &invocation.agents {
        let outcome = if invoked.accepted {
            match by_type.remove(&invoked.service_type) {
                Some(c) => outcome_of(c),
                None => AgentOutcome {
                    service_type: invoked.service_type.clone(),
                    state: AgentState::Missing,
                    phase: None,
                    results: Vec::new(),
                    errors: vec!["no collection data".into()],
                },
            }
        } else {
            AgentOutcome {
                service_type: invoked.service_type.clone(),
                state: AgentState::Rejected,
                phase: None,
                results: Vec::new(),
                errors: invoked.error.iter().cloned().collect(),
            }
        };
        agents.insert(invoked.service_type.clone(), outcome);
    }

    let summary = summarize(&agents);
    let errors = agents
        .values()
        .filter(|a| a.state != AgentState::Completed)
        .map(|a| match a.errors.first() {
            Some(first) => format!("{}: {}: {first}", a.service_type, a.state.as_str()),
            None => format!("{}: {}", a.service_type, a.state.as_str()),
        })
        .collect();

    RunDocument {
        run_id: invocation.run_id.clone(),
        created_at: invocation.created_at,
        collected_at,
        benchmark_config: invocation.benchmark_config.clone(),
        agents,
        summary,
        errors,
    }
}

fn outcome_of(c: Collected) -> AgentOutcome {
    let phase = c.status.as_ref().map(|s| s.phase);
    let state = match (phase, c.timed_out, c.results.is_some()) {
        (_, true, _) => AgentState::TimedOut,
        (Some(Phase::Completed), _, _) => AgentState::Completed,
        (Some(Phase::Failed), _, _) => AgentState::Failed,
        (Some(_), _, _) => AgentState::TimedOut,
        (None, _, true) => AgentState::Completed,
        (None, _, false) => AgentState::Missing,
    };
    let mut errors = c.status.map(|s| s.errors).unwrap_or_default();
    errors.extend(c.errors);
    AgentOutcome {
        service_type: c.service_type,
        state,
        phase,
        results: c.results.map(|r| r.results).unwrap_or_default(),
        errors,
    }
}

fn summarize(agents: &BTreeMap<String, AgentOutcome>) -> RunSummary {
    let mut summary = RunSummary {
        agents_total: agents.len() as u32,
        ..RunSummary::default()
    };
    for agent in agents.values() {
        match agent.state {
            AgentState::Completed => summary.agents_completed += 1,
            AgentState::Failed | AgentState::Rejected => summary.agents_failed += 1,
            AgentState::TimedOut => summary.agents_timed_out += 1,
            AgentState::Missing => summary.agents_missing += 1,
        }
        for record in &agent.results {
            summary.units_total += 1;
            match record.status {
                ResultStatus::Success => summary.units_succeeded += 1,
                ResultStatus::Failed => summary.units_failed += 1,
            }
        }
    }
    summary
}

#[cfg(test)]
mod tests {
    use super::*;

    fn invoked(service_type: &str, accepted: bool) -> AgentInvocation {
        AgentInvocation {
            service_type: service_type.into(),
            endpoint: format!("http://{service_type}:8080"),
            accepted,
            response: None,
            error: (!accepted).then(|| "deploy rejected (409 duplicate)".to_string()),
        }
    }

    fn record(implementation: &str, status: ResultStatus) -> ResultRecord {
        ResultRecord {
            implementation: implementation.into(),
            deployment_unit_id: format!("svc-{implementation}-r1-0"),
            status,
            error: None,
            dimensions: BTreeMap::new(),
            cold_start: None,
            warm_requests: None,
            contract_compliance: None,
        }
    }

    fn status(service_type: &str, phase: Phase) -> StatusRecord {
        StatusRecord {
            phase,
            ..StatusRecord::new("r1", service_type)
        }
    }

    #[test]
    fn every_invoked_agent_is_accounted_for() {
        let invocation = InvocationRecord {
            run_id: "r1".into(),
            created_at: 100,
            benchmark_config: BenchmarkConfig::default(),
            agents: vec![
                invoked("done", true),
                invoked("broken", true),
                invoked("slow", true),
                invoked("silent", true),
                invoked("refused", false),
            ],
        };
        let collected = vec![
            Collected {
                service_type: "done".into(),
                status: Some(status("done", Phase::Completed)),
                results: Some(ResultsDocument {
                    run_id: "r1".into(),
                    service_type: "done".into(),
                    completed_at: 150,
                    results: vec![
                        record("a", ResultStatus::Success),
                        record("b", ResultStatus::Failed),
                    ],
                }),
                ..Collected::default()
            },
            Collected {
                service_type: "broken".into(),
                status: Some(StatusRecord {
                    errors: vec!["every unit failed measurement".into()],
                    ..status("broken", Phase::Failed)
                }),
                ..Collected::default()
            },
            Collected {
                service_type: "slow".into(),
                status: Some(status("slow", Phase::Measuring)),
                timed_out: true,
                ..Collected::default()
            },
        ];

        let run = aggregate(&invocation, collected, 200);
        assert_eq!(run.agents.len(), 5);
        assert_eq!(run.agents["done"].state, AgentState::Completed);
        assert_eq!(run.agents["broken"].state, AgentState::Failed);
        assert_eq!(run.agents["slow"].state, AgentState::TimedOut);
        assert_eq!(run.agents["slow"].phase, Some(Phase::Measuring));
        assert_eq!(run.agents["silent"].state, AgentState::Missing);
        assert_eq!(run.agents["refused"].state, AgentState::Rejected);

        assert_eq!(
            run.summary,
            RunSummary {
                agents_total: 5,
                agents_completed: 1,
                agents_failed: 2,
                agents_timed_out: 1,
                agents_missing: 1,
                units_total: 2,
                units_succeeded: 1,
                units_failed: 1,
            }
        );
        assert_eq!(run.errors.len(), 4);
        assert!(run.errors.contains(&"broken: failed: every unit failed measurement".to_string()));
        assert_eq!(run.collected_at, 200);
        assert_eq!(run.created_at, 100);
    }

    #[test]
    fn results_without_status_count_as_completed() {
        let invocation = InvocationRecord {
            run_id: "r1".into(),
            created_at: 0,
            benchmark_config: BenchmarkConfig::default(),
            agents: vec![invoked("echo", true)],
        };
        let collected = vec![Collected {
            service_type: "echo".into(),
            results: Some(ResultsDocument {
                run_id: "r1".into(),
                service_type: "echo".into(),
                completed_at: 1,
                results: vec![record("a", ResultStatus::Success)],
            }),
            ..Collected::default()
        }];
        let run = aggregate(&invocation, collected, 1);
        assert_eq!(run.agents["echo"].state, AgentState::Completed);
        assert!(run.errors.is_empty());
    }
}
