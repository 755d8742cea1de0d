//! 计划运行中的资源生命周期测试

mod common;

use std::sync::Arc;
use std::time::Duration;

use atp_common::Verdict;
use atp_context::ExecutionContext;
use atp_executor::{
    EngineSettings, ExecutionOptions, PlanExecutor, TestPlan, TestStep, VerdictStep,
};
use atp_resource::{ResourceField, ResourceStrategy};
use atp_results::PlanRun;
use common::{as_ref, event_log, events, Instrument, Probe};
use indexmap::IndexMap;

async fn run_with(strategy: ResourceStrategy, plan: &TestPlan) -> Arc<PlanRun> {
    let settings = EngineSettings::default().with_resource_strategy(strategy);
    PlanExecutor::new(settings)
        .execute(plan, Vec::new(), IndexMap::new())
        .await
}

fn cycle(log: &common::EventLog) -> Arc<Instrument> {
    let a = Instrument::new("a", log).shared();
    let b = Instrument::new("b", log).shared();
    let c = Instrument::new("c", log).shared();
    a.link(ResourceField::new("next", Some(as_ref(&b))));
    b.link(ResourceField::new("next", Some(as_ref(&c))));
    c.link(ResourceField::new("next", Some(as_ref(&a))));
    a
}

#[tokio::test]
async fn test_cycle_fails_eager_run_before_any_step() {
    let log = event_log();
    let a = cycle(&log);
    let plan = TestPlan::new("cycle").with_step(TestStep::new("use", Probe::using(as_ref(&a))));

    let run = run_with(ResourceStrategy::Eager, &plan).await;

    assert!(run.failed_to_start());
    assert_eq!(run.verdict(), Verdict::Error);
    assert_eq!(plan.steps()[0].attempts(), 0);
    assert!(events(&log).is_empty());
}

#[tokio::test]
async fn test_cycle_fails_lazy_step_only() {
    let log = event_log();
    let a = cycle(&log);
    let plan = TestPlan::new("cycle")
        .with_step(TestStep::new("before", VerdictStep::new(Verdict::Pass)))
        .with_step(TestStep::new("use", Probe::using(as_ref(&a))));

    let run = run_with(ResourceStrategy::Lazy, &plan).await;

    assert!(!run.failed_to_start());
    assert_eq!(plan.steps()[0].verdict(), Verdict::Pass);
    assert_eq!(plan.steps()[1].verdict(), Verdict::Error);
    assert_eq!(run.verdict(), Verdict::Error);
    assert!(events(&log).is_empty());
}

#[tokio::test]
async fn test_ignored_self_reference_is_not_a_cycle() {
    for strategy in [ResourceStrategy::Eager, ResourceStrategy::Lazy] {
        let log = event_log();
        let dut = Instrument::new("dut", &log).shared();
        dut.link(ResourceField::new("loopback", Some(as_ref(&dut))).ignored());
        dut.link(ResourceField::new("spare", None));

        let plan = TestPlan::new("self").with_step(TestStep::new("use", Probe::using(as_ref(&dut))));
        let run = run_with(strategy, &plan).await;

        assert_eq!(run.verdict(), Verdict::Pass, "{}", strategy.display_name());
        assert_eq!(events(&log), vec!["open:dut", "close:dut"]);
    }
}

#[tokio::test]
async fn test_eager_opens_before_first_step() {
    let log = event_log();
    let dmm = Instrument::new("dmm", &log).shared();
    let plan = TestPlan::new("eager")
        .with_step(TestStep::new("observe", Probe::observing(as_ref(&dmm), true)))
        .with_step(TestStep::new("use", Probe::using(as_ref(&dmm))));

    let run = run_with(ResourceStrategy::Eager, &plan).await;

    assert_eq!(run.verdict(), Verdict::Pass);
    assert_eq!(dmm.opens(), 1);
}

#[tokio::test]
async fn test_lazy_opens_on_first_use() {
    let log = event_log();
    let psu = Instrument::new("psu", &log).shared();
    let dmm = Instrument::new("dmm", &log).shared();
    dmm.link(ResourceField::new("supply", Some(as_ref(&psu))).required());

    let plan = TestPlan::new("lazy")
        .with_step(TestStep::new("observe", Probe::observing(as_ref(&dmm), false)))
        .with_step(TestStep::new("use", Probe::using(as_ref(&dmm))))
        .with_step(TestStep::new("again", Probe::using(as_ref(&dmm))));

    let run = run_with(ResourceStrategy::Lazy, &plan).await;

    assert_eq!(run.verdict(), Verdict::Pass);
    assert_eq!(dmm.opens(), 1);
    assert_eq!(
        events(&log),
        vec!["open:psu", "open:dmm", "close:dmm", "close:psu"]
    );
}

#[tokio::test]
async fn test_missing_required_dependency() {
    let log = event_log();
    let dmm = Instrument::new("dmm", &log).shared();
    dmm.link(ResourceField::new("supply", None).required());
    let plan = TestPlan::new("missing").with_step(TestStep::new("use", Probe::using(as_ref(&dmm))));

    let eager = run_with(ResourceStrategy::Eager, &plan).await;
    assert!(eager.failed_to_start());
    assert_eq!(eager.verdict(), Verdict::Error);

    let lazy = run_with(ResourceStrategy::Lazy, &plan).await;
    assert!(!lazy.failed_to_start());
    assert_eq!(plan.steps()[0].verdict(), Verdict::Error);
    assert_eq!(lazy.verdict(), Verdict::Error);
}

#[tokio::test]
async fn test_open_failure_under_eager_fails_to_start() {
    let log = event_log();
    let scope = Instrument::new("scope", &log).failing_open().shared();
    let plan = TestPlan::new("broken").with_step(TestStep::new("use", Probe::using(as_ref(&scope))));

    let run = run_with(ResourceStrategy::Eager, &plan).await;

    assert!(run.failed_to_start());
    assert_eq!(run.exit_code(), Verdict::Error.exit_code());
    assert_eq!(plan.steps()[0].attempts(), 0);
}

#[tokio::test]
async fn test_close_failure_keeps_verdict() {
    let log = event_log();
    let psu = Instrument::new("psu", &log).shared();
    let dmm = Instrument::new("dmm", &log).failing_close().shared();
    dmm.link(ResourceField::new("supply", Some(as_ref(&psu))));
    let plan = TestPlan::new("close").with_step(TestStep::new("use", Probe::using(as_ref(&dmm))));

    let run = run_with(ResourceStrategy::Eager, &plan).await;

    assert_eq!(run.verdict(), Verdict::Pass);
    assert_eq!(events(&log), vec!["open:psu", "open:dmm", "close:psu"]);
}

#[tokio::test]
async fn test_abort_during_eager_open_is_aborted_not_error() {
    let log = event_log();
    let chamber = Instrument::new("chamber", &log)
        .slow_open(Duration::from_secs(30))
        .shared();
    let plan =
        TestPlan::new("warmup").with_step(TestStep::new("use", Probe::using(as_ref(&chamber))));

    let root = ExecutionContext::root("operator");
    let trigger = root.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        trigger.abort();
    });

    let settings = EngineSettings::default().with_resource_strategy(ResourceStrategy::Eager);
    let run = PlanExecutor::new(settings)
        .execute_with(&plan, ExecutionOptions::new().with_context(root))
        .await;

    assert!(!run.failed_to_start());
    assert_eq!(run.verdict(), Verdict::Aborted);
    assert_eq!(run.exit_code(), Verdict::Aborted.exit_code());
    assert_eq!(plan.steps()[0].attempts(), 0);
    assert!(events(&log).is_empty());
}
